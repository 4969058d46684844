//! Persistence for workflows, approval records, requests and the audit trail.
//!
//! Everything that must be atomic goes through a [`StoreTx`]: the approval
//! chain insert at submission, and the lookup → transition → audit →
//! aggregate sequence of a callback. Dropping a transaction without calling
//! [`StoreTx::commit`] rolls it back.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::approval::{ApprovalRecord, ApprovalStatus};
use crate::models::audit::AuditLogEntry;
use crate::models::request::{MaintenanceRequest, RequestStage};
use crate::models::workflow::{NewWorkflow, StepTemplate, WorkflowDefinition};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("injected failure at {0}")]
    Injected(&'static str),

    #[error("store error: {0}")]
    Internal(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait ApprovalStore: Send + Sync {
    /// Open a transaction.
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>>;

    // -- Workflow definitions (editor boundary) --

    /// Active, non-archived definitions with their current steps, in
    /// creation order.
    async fn active_workflows(&self) -> StoreResult<Vec<WorkflowDefinition>>;

    /// Non-archived definitions (active or not) with their current steps.
    async fn list_workflows(&self) -> StoreResult<Vec<WorkflowDefinition>>;

    async fn get_workflow(&self, id: Uuid) -> StoreResult<Option<WorkflowDefinition>>;

    async fn create_workflow(&self, wf: &NewWorkflow) -> StoreResult<WorkflowDefinition>;

    /// Replace a definition's fields and steps as a new revision.
    async fn update_workflow(
        &self,
        id: Uuid,
        wf: &NewWorkflow,
    ) -> StoreResult<Option<WorkflowDefinition>>;

    /// Store `steps` (already renumbered) as the next revision of `id`.
    /// Fails with [`StoreError::Conflict`] unless `id` is still at
    /// `expected_revision`.
    async fn replace_steps(
        &self,
        id: Uuid,
        expected_revision: i32,
        steps: Vec<StepTemplate>,
    ) -> StoreResult<Option<WorkflowDefinition>>;

    async fn archive_workflow(&self, id: Uuid) -> StoreResult<bool>;

    // -- Read-only views --

    async fn get_request(&self, id: Uuid) -> StoreResult<Option<MaintenanceRequest>>;

    async fn list_approvals(&self, request_id: Uuid) -> StoreResult<Vec<ApprovalRecord>>;

    async fn list_pending_approvals(&self) -> StoreResult<Vec<ApprovalRecord>>;

    async fn list_audit(&self, request_id: Uuid) -> StoreResult<Vec<AuditLogEntry>>;
}

/// One unit of work. Reads through a transaction see its own writes.
#[async_trait]
pub trait StoreTx: Send {
    /// Insert the request row, failing with [`StoreError::Conflict`] if it
    /// already carries approval records.
    async fn insert_request(&mut self, request: &MaintenanceRequest) -> StoreResult<()>;

    /// Insert a whole approval chain.
    async fn insert_approvals(&mut self, records: &[ApprovalRecord]) -> StoreResult<()>;

    /// Find the record whose token digest equals `token_hash` and lock it
    /// until the transaction ends.
    async fn lock_approval_by_token_hash(
        &mut self,
        token_hash: &str,
    ) -> StoreResult<Option<ApprovalRecord>>;

    /// Write the transition fields of `record`, guarded by the record still
    /// being `pending`. Returns false if the guard failed.
    async fn update_pending_approval(&mut self, record: &ApprovalRecord) -> StoreResult<bool>;

    /// Lock the request row so stage recomputations for one request are
    /// serialised: each sees every transition committed before it.
    async fn lock_request(&mut self, request_id: Uuid) -> StoreResult<()>;

    async fn approvals_for_request(&mut self, request_id: Uuid)
        -> StoreResult<Vec<ApprovalRecord>>;

    /// Step templates of one workflow revision.
    async fn workflow_steps(
        &mut self,
        workflow_id: Uuid,
        revision: i32,
    ) -> StoreResult<Vec<StepTemplate>>;

    async fn append_audit(&mut self, entry: &AuditLogEntry) -> StoreResult<()>;

    async fn set_request_stage(&mut self, request_id: Uuid, stage: RequestStage)
        -> StoreResult<()>;

    /// Move every pending record with `token_expires_at < now` to
    /// [`ApprovalStatus::Expired`]. Returns the records as updated.
    async fn expire_overdue(&mut self, now: DateTime<Utc>) -> StoreResult<Vec<ApprovalRecord>>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;
}

/// Status transition guard shared by the store implementations.
pub(crate) fn can_transition(from: ApprovalStatus, to: ApprovalStatus) -> bool {
    from == ApprovalStatus::Pending && to != ApprovalStatus::Pending
}
