//! In-process [`ApprovalStore`] used by the test suite and `serve --in-memory`.
//!
//! A single async mutex serialises transactions. Each transaction works on a
//! copy of the state and swaps it in on commit, so an abandoned transaction
//! leaves nothing behind.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use subtle::ConstantTimeEq;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{can_transition, ApprovalStore, StoreError, StoreResult, StoreTx};
use crate::models::approval::{ApprovalRecord, ApprovalStatus};
use crate::models::audit::AuditLogEntry;
use crate::models::request::{MaintenanceRequest, RequestStage};
use crate::models::workflow::{NewWorkflow, StepTemplate, WorkflowDefinition};

/// Points at which an armed store fails with [`StoreError::Injected`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    /// Fail while inserting the approval at this zero-based index of a chain.
    InsertApprovalAt(usize),
    UpdateApproval,
    AppendAudit,
    SetRequestStage,
    Commit,
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    /// Creation order is the tie-break for workflow selection.
    workflows: Vec<WorkflowDefinition>,
    steps: HashMap<(Uuid, i32), Vec<StepTemplate>>,
    requests: HashMap<Uuid, MaintenanceRequest>,
    approvals: Vec<ApprovalRecord>,
    audit: Vec<AuditLogEntry>,
    faults: HashSet<FailPoint>,
}

impl MemoryState {
    fn with_steps(&self, wf: &WorkflowDefinition) -> WorkflowDefinition {
        let mut wf = wf.clone();
        wf.steps = self
            .steps
            .get(&(wf.id, wf.revision))
            .cloned()
            .unwrap_or_default();
        wf
    }

    fn check(&self, point: FailPoint, name: &'static str) -> StoreResult<()> {
        if self.faults.contains(&point) {
            return Err(StoreError::Injected(name));
        }
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a fault point. It stays armed until [`MemoryStore::clear_faults`].
    pub async fn fail_on(&self, point: FailPoint) {
        self.state.lock().await.faults.insert(point);
    }

    pub async fn clear_faults(&self) {
        self.state.lock().await.faults.clear();
    }

    /// Count of audit entries for one approval record.
    pub async fn audit_count_for(&self, approval_id: Uuid) -> usize {
        self.state
            .lock()
            .await
            .audit
            .iter()
            .filter(|e| e.approval_id == approval_id)
            .count()
    }

    /// Rewrite a record's expiry, e.g. to simulate an approver who waited
    /// past the deadline.
    pub async fn set_token_expiry(&self, approval_id: Uuid, at: DateTime<Utc>) -> bool {
        let mut state = self.state.lock().await;
        match state.approvals.iter_mut().find(|a| a.id == approval_id) {
            Some(record) => {
                record.token_expires_at = at;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl ApprovalStore for MemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        let guard = self.state.clone().lock_owned().await;
        let work = guard.clone();
        Ok(Box::new(MemoryTx { guard, work }))
    }

    async fn active_workflows(&self) -> StoreResult<Vec<WorkflowDefinition>> {
        let state = self.state.lock().await;
        Ok(state
            .workflows
            .iter()
            .filter(|w| w.is_active && !w.archived)
            .map(|w| state.with_steps(w))
            .collect())
    }

    async fn list_workflows(&self) -> StoreResult<Vec<WorkflowDefinition>> {
        let state = self.state.lock().await;
        Ok(state
            .workflows
            .iter()
            .filter(|w| !w.archived)
            .map(|w| state.with_steps(w))
            .collect())
    }

    async fn get_workflow(&self, id: Uuid) -> StoreResult<Option<WorkflowDefinition>> {
        let state = self.state.lock().await;
        Ok(state
            .workflows
            .iter()
            .find(|w| w.id == id && !w.archived)
            .map(|w| state.with_steps(w)))
    }

    async fn create_workflow(&self, wf: &NewWorkflow) -> StoreResult<WorkflowDefinition> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let def = WorkflowDefinition {
            id: Uuid::new_v4(),
            name: wf.name.clone(),
            description: wf.description.clone(),
            category: wf.category.clone(),
            priority: wf.priority.clone(),
            is_active: wf.is_active,
            archived: false,
            revision: 1,
            created_at: now,
            updated_at: now,
            steps: Vec::new(),
        };
        state
            .steps
            .insert((def.id, 1), wf.step_templates(def.id, 1));
        state.workflows.push(def.clone());
        Ok(state.with_steps(&def))
    }

    async fn update_workflow(
        &self,
        id: Uuid,
        wf: &NewWorkflow,
    ) -> StoreResult<Option<WorkflowDefinition>> {
        let mut state = self.state.lock().await;
        let Some(def) = state.workflows.iter_mut().find(|w| w.id == id && !w.archived) else {
            return Ok(None);
        };
        def.name = wf.name.clone();
        def.description = wf.description.clone();
        def.category = wf.category.clone();
        def.priority = wf.priority.clone();
        def.is_active = wf.is_active;
        def.revision += 1;
        def.updated_at = Utc::now();
        let def = def.clone();
        state
            .steps
            .insert((id, def.revision), wf.step_templates(id, def.revision));
        Ok(Some(state.with_steps(&def)))
    }

    async fn replace_steps(
        &self,
        id: Uuid,
        expected_revision: i32,
        steps: Vec<StepTemplate>,
    ) -> StoreResult<Option<WorkflowDefinition>> {
        let mut state = self.state.lock().await;
        let Some(def) = state.workflows.iter_mut().find(|w| w.id == id && !w.archived) else {
            return Ok(None);
        };
        if def.revision != expected_revision {
            return Err(StoreError::Conflict(format!(
                "workflow {} is at revision {}, not {}",
                id, def.revision, expected_revision
            )));
        }
        def.revision += 1;
        def.updated_at = Utc::now();
        let def = def.clone();
        let steps = steps
            .into_iter()
            .map(|s| StepTemplate {
                workflow_id: id,
                revision: def.revision,
                ..s
            })
            .collect();
        state.steps.insert((id, def.revision), steps);
        Ok(Some(state.with_steps(&def)))
    }

    async fn archive_workflow(&self, id: Uuid) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        match state.workflows.iter_mut().find(|w| w.id == id && !w.archived) {
            Some(def) => {
                def.archived = true;
                def.is_active = false;
                def.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get_request(&self, id: Uuid) -> StoreResult<Option<MaintenanceRequest>> {
        Ok(self.state.lock().await.requests.get(&id).cloned())
    }

    async fn list_approvals(&self, request_id: Uuid) -> StoreResult<Vec<ApprovalRecord>> {
        let state = self.state.lock().await;
        let mut rows: Vec<_> = state
            .approvals
            .iter()
            .filter(|a| a.request_id == request_id)
            .cloned()
            .collect();
        rows.sort_by_key(|a| a.step_order);
        Ok(rows)
    }

    async fn list_pending_approvals(&self) -> StoreResult<Vec<ApprovalRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .approvals
            .iter()
            .filter(|a| a.status == ApprovalStatus::Pending)
            .cloned()
            .collect())
    }

    async fn list_audit(&self, request_id: Uuid) -> StoreResult<Vec<AuditLogEntry>> {
        let state = self.state.lock().await;
        Ok(state
            .audit
            .iter()
            .filter(|e| e.request_id == request_id)
            .cloned()
            .collect())
    }
}

pub struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    work: MemoryState,
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn insert_request(&mut self, request: &MaintenanceRequest) -> StoreResult<()> {
        if self.work.requests.contains_key(&request.id) {
            return Err(StoreError::Conflict(format!(
                "request {} was already submitted",
                request.id
            )));
        }
        self.work.requests.insert(request.id, request.clone());
        Ok(())
    }

    async fn insert_approvals(&mut self, records: &[ApprovalRecord]) -> StoreResult<()> {
        for (i, record) in records.iter().enumerate() {
            self.work
                .check(FailPoint::InsertApprovalAt(i), "insert_approval")?;
            let duplicate = self.work.approvals.iter().any(|a| {
                (a.request_id == record.request_id && a.step_order == record.step_order)
                    || a.token_hash == record.token_hash
            });
            if duplicate {
                return Err(StoreError::Conflict(format!(
                    "approval for request {} step {} already exists",
                    record.request_id, record.step_order
                )));
            }
            self.work.approvals.push(record.clone());
        }
        Ok(())
    }

    async fn lock_approval_by_token_hash(
        &mut self,
        token_hash: &str,
    ) -> StoreResult<Option<ApprovalRecord>> {
        // The whole state is already held by this transaction.
        Ok(self
            .work
            .approvals
            .iter()
            .find(|a| bool::from(a.token_hash.as_bytes().ct_eq(token_hash.as_bytes())))
            .cloned())
    }

    async fn update_pending_approval(&mut self, record: &ApprovalRecord) -> StoreResult<bool> {
        self.work.check(FailPoint::UpdateApproval, "update_approval")?;
        let Some(existing) = self.work.approvals.iter_mut().find(|a| a.id == record.id) else {
            return Ok(false);
        };
        if !can_transition(existing.status, record.status) {
            return Ok(false);
        }
        existing.status = record.status;
        existing.approved_at = record.approved_at;
        existing.rejected_at = record.rejected_at;
        existing.rejection_reason = record.rejection_reason.clone();
        existing.ip_address = record.ip_address.clone();
        existing.user_agent = record.user_agent.clone();
        existing.updated_at = record.updated_at;
        Ok(true)
    }

    async fn lock_request(&mut self, _request_id: Uuid) -> StoreResult<()> {
        Ok(())
    }

    async fn approvals_for_request(
        &mut self,
        request_id: Uuid,
    ) -> StoreResult<Vec<ApprovalRecord>> {
        Ok(self
            .work
            .approvals
            .iter()
            .filter(|a| a.request_id == request_id)
            .cloned()
            .collect())
    }

    async fn workflow_steps(
        &mut self,
        workflow_id: Uuid,
        revision: i32,
    ) -> StoreResult<Vec<StepTemplate>> {
        Ok(self
            .work
            .steps
            .get(&(workflow_id, revision))
            .cloned()
            .unwrap_or_default())
    }

    async fn append_audit(&mut self, entry: &AuditLogEntry) -> StoreResult<()> {
        self.work.check(FailPoint::AppendAudit, "append_audit")?;
        self.work.audit.push(entry.clone());
        Ok(())
    }

    async fn set_request_stage(
        &mut self,
        request_id: Uuid,
        stage: RequestStage,
    ) -> StoreResult<()> {
        self.work
            .check(FailPoint::SetRequestStage, "set_request_stage")?;
        let request = self
            .work
            .requests
            .get_mut(&request_id)
            .ok_or_else(|| StoreError::Internal(format!("request {} not found", request_id)))?;
        request.stage = stage;
        request.updated_at = Utc::now();
        Ok(())
    }

    async fn expire_overdue(&mut self, now: DateTime<Utc>) -> StoreResult<Vec<ApprovalRecord>> {
        let mut expired = Vec::new();
        for record in self
            .work
            .approvals
            .iter_mut()
            .filter(|a| a.status == ApprovalStatus::Pending && now > a.token_expires_at)
        {
            record.status = ApprovalStatus::Expired;
            record.updated_at = now;
            expired.push(record.clone());
        }
        Ok(expired)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryTx { mut guard, work } = *self;
        work.check(FailPoint::Commit, "commit")?;
        *guard = work;
        Ok(())
    }
}
