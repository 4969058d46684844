use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::{SubmissionReport, SweepReport};
use crate::errors::AppError;
use crate::models::approval::ApprovalRecord;
use crate::models::audit::AuditLogEntry;
use crate::models::request::{MaintenanceRequest, SubmittedRequest};
use crate::models::workflow::{reorder_steps, NewWorkflow, WorkflowDefinition};
use crate::AppState;

// ── Request / Response DTOs ──────────────────────────────────

#[derive(Deserialize)]
pub struct ReorderRequest {
    /// Current step orders, listed in their new sequence.
    pub order: Vec<i32>,
}

/// A request as the dashboard shows it.
#[derive(Serialize)]
pub struct RequestView {
    #[serde(flatten)]
    pub request: MaintenanceRequest,
    pub status_label: &'static str,
    pub workflow_stage: &'static str,
}

impl From<MaintenanceRequest> for RequestView {
    fn from(request: MaintenanceRequest) -> Self {
        Self {
            status_label: request.stage.status_label(),
            workflow_stage: request.stage.workflow_stage(),
            request,
        }
    }
}

// ── Workflow editor ──────────────────────────────────────────

/// GET /api/v1/workflows
pub async fn list_workflows(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<WorkflowDefinition>>, AppError> {
    Ok(Json(state.engine.store().list_workflows().await?))
}

/// POST /api/v1/workflows
pub async fn create_workflow(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<NewWorkflow>,
) -> Result<(StatusCode, Json<WorkflowDefinition>), AppError> {
    let payload = payload.normalized().map_err(AppError::BadRequest)?;
    let created = state.engine.store().create_workflow(&payload).await?;
    tracing::info!(
        workflow_id = %created.id,
        steps = created.steps.len(),
        "workflow created"
    );
    Ok((StatusCode::CREATED, Json(created)))
}

/// GET /api/v1/workflows/:id
pub async fn get_workflow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<WorkflowDefinition>, AppError> {
    state
        .engine
        .store()
        .get_workflow(id)
        .await?
        .map(Json)
        .ok_or(AppError::NotFound("workflow"))
}

/// PUT /api/v1/workflows/:id: stores the payload as a new revision
pub async fn update_workflow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<NewWorkflow>,
) -> Result<Json<WorkflowDefinition>, AppError> {
    let payload = payload.normalized().map_err(AppError::BadRequest)?;
    let updated = state
        .engine
        .store()
        .update_workflow(id, &payload)
        .await?
        .ok_or(AppError::NotFound("workflow"))?;
    tracing::info!(workflow_id = %id, revision = updated.revision, "workflow updated");
    Ok(Json(updated))
}

/// POST /api/v1/workflows/:id/reorder
pub async fn reorder_workflow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ReorderRequest>,
) -> Result<Json<WorkflowDefinition>, AppError> {
    let store = state.engine.store();
    let current = store
        .get_workflow(id)
        .await?
        .ok_or(AppError::NotFound("workflow"))?;
    let steps = reorder_steps(&current.steps, &payload.order, current.revision + 1)
        .map_err(AppError::BadRequest)?;
    // a PUT that landed since the read makes this a 409
    let updated = store
        .replace_steps(id, current.revision, steps)
        .await?
        .ok_or(AppError::NotFound("workflow"))?;
    Ok(Json(updated))
}

/// DELETE /api/v1/workflows/:id: archives; referenced revisions stay
pub async fn delete_workflow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    if state.engine.store().archive_workflow(id).await? {
        tracing::info!(workflow_id = %id, "workflow archived");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound("workflow"))
    }
}

// ── Requests ─────────────────────────────────────────────────

/// POST /api/v1/requests/submitted
pub async fn submit_request(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SubmittedRequest>,
) -> Result<(StatusCode, Json<SubmissionReport>), AppError> {
    if payload.title.trim().is_empty() {
        return Err(AppError::BadRequest("title must not be empty".into()));
    }
    let report = state.engine.submit(payload).await?;
    Ok((StatusCode::CREATED, Json(report)))
}

/// GET /api/v1/requests/:id
pub async fn get_request(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<RequestView>, AppError> {
    state
        .engine
        .store()
        .get_request(id)
        .await?
        .map(|r| Json(r.into()))
        .ok_or(AppError::NotFound("request"))
}

/// GET /api/v1/requests/:id/approvals
pub async fn list_request_approvals(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<ApprovalRecord>>, AppError> {
    Ok(Json(state.engine.store().list_approvals(id).await?))
}

/// GET /api/v1/requests/:id/audit
pub async fn list_request_audit(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<AuditLogEntry>>, AppError> {
    Ok(Json(state.engine.store().list_audit(id).await?))
}

// ── Approvals ────────────────────────────────────────────────

/// GET /api/v1/approvals: pending records across all requests
pub async fn list_pending_approvals(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ApprovalRecord>>, AppError> {
    Ok(Json(state.engine.store().list_pending_approvals().await?))
}

/// POST /api/v1/approvals/sweep
pub async fn run_sweep(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SweepReport>, AppError> {
    Ok(Json(state.engine.sweep_expired(Utc::now()).await?))
}
