//! The approval engine: turns a submitted request into an approval chain,
//! processes approver callbacks and keeps each request's stage in step with
//! its records.

pub mod aggregate;
pub mod callback;
pub mod factory;
pub mod token;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::middleware::metrics;
use crate::models::approval::ApprovalRecord;
use crate::models::request::{MaintenanceRequest, RequestStage, SubmittedRequest};
use crate::notification::{ActionLinks, ApprovalNotice, NotificationDispatcher};
use crate::store::{ApprovalStore, StoreResult, StoreTx};
use aggregate::AutoApprovePolicy;

#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Token lifetime for steps whose `timeout_hours` is zero.
    pub default_timeout_hours: i32,
    pub links: ActionLinks,
}

/// How a submission's approval chain was decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstantiationPolicy {
    WorkflowMatched,
    NoWorkflowAutoApproved,
}

impl InstantiationPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            InstantiationPolicy::WorkflowMatched => "workflow_matched",
            InstantiationPolicy::NoWorkflowAutoApproved => "no_workflow_auto_approved",
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SubmissionReport {
    pub request_id: Uuid,
    pub workflow_id: Option<Uuid>,
    pub workflow_revision: Option<i32>,
    pub stage: RequestStage,
    pub approvals_created: usize,
    pub policy: InstantiationPolicy,
    /// Background delivery of the approval notices, if any were sent.
    #[serde(skip)]
    pub notifications: Option<JoinHandle<()>>,
}

#[derive(Debug, Default, Serialize)]
pub struct SweepReport {
    pub records_expired: usize,
    pub requests_updated: usize,
}

pub struct ApprovalEngine {
    store: Arc<dyn ApprovalStore>,
    dispatcher: NotificationDispatcher,
    settings: EngineSettings,
}

impl ApprovalEngine {
    pub fn new(
        store: Arc<dyn ApprovalStore>,
        dispatcher: NotificationDispatcher,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            dispatcher,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<dyn ApprovalStore> {
        &self.store
    }

    /// Entry point for the request-submission collaborator.
    ///
    /// The request row and its whole approval chain are committed in one
    /// transaction before any notice leaves the process. Notification
    /// failures never surface here.
    pub async fn submit(&self, submitted: SubmittedRequest) -> StoreResult<SubmissionReport> {
        let now = Utc::now();
        let workflows = self.store.active_workflows().await?;
        let mut request = MaintenanceRequest::from_submission(submitted, now);

        let selected = factory::select_workflow(
            &workflows,
            request.category.as_deref(),
            request.priority.as_deref(),
        );

        let (policy, issued) = match selected {
            Some(workflow) => {
                request.workflow_id = Some(workflow.id);
                request.workflow_revision = Some(workflow.revision);
                let issued = factory::instantiate(
                    &request,
                    workflow,
                    now,
                    self.settings.default_timeout_hours,
                );
                (InstantiationPolicy::WorkflowMatched, issued)
            }
            None => {
                warn!(
                    request_id = %request.id,
                    category = ?request.category,
                    priority = ?request.priority,
                    "no approval workflow matched; request proceeds without approval gates"
                );
                (InstantiationPolicy::NoWorkflowAutoApproved, Vec::new())
            }
        };

        request.stage = aggregate::aggregate_statuses(issued.iter().map(|i| i.record.status));

        let records: Vec<_> = issued.iter().map(|i| i.record.clone()).collect();
        if let Err(e) = self.persist_chain(&request, &records).await {
            metrics::record_instantiation("failed");
            warn!(request_id = %request.id, error = %e, "failed to persist approval chain");
            return Err(e);
        }
        metrics::record_instantiation(policy.as_str());

        info!(
            request_id = %request.id,
            workflow_id = ?request.workflow_id,
            workflow_revision = ?request.workflow_revision,
            approvals_created = issued.len(),
            stage = %request.stage,
            "approval chain instantiated"
        );

        let total_steps = issued.len();
        let notices: Vec<ApprovalNotice> = issued
            .iter()
            .map(|i| {
                ApprovalNotice::new(
                    &request,
                    &i.record,
                    &i.token,
                    total_steps,
                    &self.settings.links,
                )
            })
            .collect();
        let notifications = if notices.is_empty() || self.dispatcher.is_empty() {
            None
        } else {
            Some(self.dispatcher.dispatch(notices))
        };

        Ok(SubmissionReport {
            request_id: request.id,
            workflow_id: request.workflow_id,
            workflow_revision: request.workflow_revision,
            stage: request.stage,
            approvals_created: total_steps,
            policy,
            notifications,
        })
    }

    async fn persist_chain(
        &self,
        request: &MaintenanceRequest,
        records: &[ApprovalRecord],
    ) -> StoreResult<()> {
        let mut tx = self.store.begin().await?;
        tx.insert_request(request).await?;
        tx.insert_approvals(records).await?;
        tx.commit().await
    }

    /// Expire every overdue pending record and bring the affected requests'
    /// stages up to date, in one transaction. Writes no audit entries.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> StoreResult<SweepReport> {
        let mut tx = self.store.begin().await?;
        let expired = tx.expire_overdue(now).await?;

        let mut request_ids: Vec<Uuid> = expired.iter().map(|r| r.request_id).collect();
        request_ids.sort();
        request_ids.dedup();

        for request_id in &request_ids {
            recompute_stage(tx.as_mut(), *request_id).await?;
        }
        tx.commit().await?;

        metrics::record_expired("sweep", expired.len());
        if !expired.is_empty() {
            info!(
                records_expired = expired.len(),
                requests_updated = request_ids.len(),
                "expiry sweep completed"
            );
        }
        Ok(SweepReport {
            records_expired: expired.len(),
            requests_updated: request_ids.len(),
        })
    }
}

/// Recompute a request's stage from the full set of its records and persist
/// it. The request row is locked first so concurrent recomputations for the
/// same request see each other's transitions.
pub(crate) async fn recompute_stage(
    tx: &mut dyn StoreTx,
    request_id: Uuid,
) -> StoreResult<RequestStage> {
    tx.lock_request(request_id).await?;
    let records = tx.approvals_for_request(request_id).await?;
    let policy = match records.first() {
        Some(r) => {
            let steps = tx.workflow_steps(r.workflow_id, r.workflow_revision).await?;
            AutoApprovePolicy::from_steps(&steps)
        }
        None => AutoApprovePolicy::none(),
    };
    let stage = aggregate::aggregate(&records, &policy);
    tx.set_request_stage(request_id, stage).await?;
    Ok(stage)
}
