//! The callback processor: applies one approver decision to one approval
//! record.
//!
//! Lookup, expiry check, transition, audit append and stage recomputation
//! all run inside a single store transaction holding the record's row
//! lock. Two clicks on the same link therefore serialise: the first one
//! transitions, the second finds a terminal record and changes nothing.

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

use super::token::{hash_token, log_fingerprint, verify_token};
use super::{recompute_stage, ApprovalEngine};
use crate::middleware::metrics;
use crate::models::approval::{ApprovalAction, ApprovalRecord, ApprovalStatus, ClientMeta};
use crate::models::audit::AuditLogEntry;
use crate::models::request::RequestStage;
use crate::store::StoreError;

/// Raw callback parameters as they arrived on the query string.
#[derive(Debug, Clone, Default)]
pub struct CallbackInput {
    pub token: Option<String>,
    pub action: Option<String>,
    pub reason: Option<String>,
    pub meta: ClientMeta,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutcomeKind {
    Success,
    AlreadyProcessed,
    Expired,
    Rejected,
    NotFound,
    Error,
}

impl OutcomeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OutcomeKind::Success => "success",
            OutcomeKind::AlreadyProcessed => "already-processed",
            OutcomeKind::Expired => "expired",
            OutcomeKind::Rejected => "rejected",
            OutcomeKind::NotFound => "not-found",
            OutcomeKind::Error => "error",
        }
    }
}

/// What the approver is shown. Rendering is the HTTP layer's business.
#[derive(Debug, Clone, Serialize)]
pub struct OutcomeDocument {
    pub kind: OutcomeKind,
    pub title: String,
    pub message: String,
    pub detail: Option<String>,
    pub status_code: u16,
}

impl OutcomeDocument {
    fn new(kind: OutcomeKind, status_code: u16, title: &str, message: String) -> Self {
        Self {
            kind,
            title: title.to_string(),
            message,
            detail: None,
            status_code,
        }
    }

    fn with_detail(mut self, detail: Option<String>) -> Self {
        self.detail = detail.filter(|d| !d.trim().is_empty());
        self
    }
}

#[derive(Debug, Error)]
pub enum CallbackError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("approval token not found")]
    NotFound,

    #[error("action '{0}' is not allowed for this step")]
    InvalidAction(&'static str),

    #[error("persistence failure: {0}")]
    Persistence(#[from] StoreError),
}

impl CallbackError {
    /// The outcome shown for this error. Store errors are not echoed back.
    pub fn outcome(&self) -> OutcomeDocument {
        match self {
            CallbackError::InvalidRequest(reason) => OutcomeDocument::new(
                OutcomeKind::Error,
                400,
                "Invalid link",
                format!("This approval link is incomplete: {}.", reason),
            ),
            CallbackError::NotFound => OutcomeDocument::new(
                OutcomeKind::NotFound,
                404,
                "Link not recognised",
                "This approval link is not valid. It may have been mistyped or replaced by a newer one."
                    .to_string(),
            ),
            CallbackError::InvalidAction(_) => OutcomeDocument::new(
                OutcomeKind::Error,
                400,
                "Action not allowed",
                "This approval step cannot be rejected. Contact the maintenance team if the request should not go ahead."
                    .to_string(),
            ),
            CallbackError::Persistence(_) => OutcomeDocument::new(
                OutcomeKind::Error,
                500,
                "Something went wrong",
                "Your response could not be recorded. Please try the link again in a few minutes."
                    .to_string(),
            ),
        }
    }
}

/// How a callback was resolved, before it is turned into a document.
#[derive(Debug)]
enum Resolution {
    /// The record was already terminal; nothing was written.
    AlreadyProcessed(ApprovalRecord),
    /// The record was pending past its deadline and is now expired.
    Expired(ApprovalRecord),
    Transitioned {
        record: ApprovalRecord,
        stage: RequestStage,
    },
}

fn format_when(at: DateTime<Utc>) -> String {
    at.format("%B %-d, %Y at %H:%M UTC").to_string()
}

fn required(value: Option<&str>, name: &str) -> Result<String, CallbackError> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| CallbackError::InvalidRequest(format!("missing {}", name)))
}

impl ApprovalEngine {
    /// Process one click on an approve/reject link.
    pub async fn process_callback(&self, input: CallbackInput, now: DateTime<Utc>) -> OutcomeDocument {
        let started = Instant::now();
        let doc = match self.resolve_callback(input, now).await {
            Ok(resolution) => self.describe(resolution).await,
            Err(e) => {
                match &e {
                    CallbackError::Persistence(err) => {
                        error!(error = %err, "approval callback failed")
                    }
                    other => warn!(reason = %other, "approval callback refused"),
                }
                e.outcome()
            }
        };
        metrics::record_callback(doc.kind.as_str(), started.elapsed().as_secs_f64());
        doc
    }

    async fn resolve_callback(
        &self,
        input: CallbackInput,
        now: DateTime<Utc>,
    ) -> Result<Resolution, CallbackError> {
        let token = required(input.token.as_deref(), "token")?;
        let raw_action = required(input.action.as_deref(), "action")?;
        let action = ApprovalAction::parse(&raw_action)
            .ok_or_else(|| CallbackError::InvalidRequest(format!("unknown action '{}'", raw_action)))?;

        let mut tx = self.store.begin().await?;
        let mut record = tx
            .lock_approval_by_token_hash(&hash_token(&token))
            .await?
            .filter(|r| verify_token(&token, &r.token_hash))
            .ok_or(CallbackError::NotFound)?;

        let fingerprint = log_fingerprint(&token);

        if record.status.is_terminal() {
            info!(
                approval_id = %record.id,
                status = %record.status,
                token = %fingerprint,
                "callback on already-resolved approval"
            );
            return Ok(Resolution::AlreadyProcessed(record));
        }

        if record.is_expired_at(now) {
            record.status = ApprovalStatus::Expired;
            record.updated_at = now;
            if !tx.update_pending_approval(&record).await? {
                return Err(StoreError::Internal(format!(
                    "approval {} left pending under lock",
                    record.id
                ))
                .into());
            }
            recompute_stage(tx.as_mut(), record.request_id).await?;
            tx.commit().await?;
            metrics::record_expired("callback", 1);
            info!(
                approval_id = %record.id,
                request_id = %record.request_id,
                token = %fingerprint,
                "approval token used after expiry"
            );
            return Ok(Resolution::Expired(record));
        }

        if action == ApprovalAction::Reject {
            let steps = tx
                .workflow_steps(record.workflow_id, record.workflow_revision)
                .await?;
            let can_reject = steps
                .iter()
                .find(|s| s.step_order == record.step_order)
                .map_or(true, |s| s.can_reject);
            if !can_reject {
                return Err(CallbackError::InvalidAction(action.as_str()));
            }
        }

        record.status = action.target_status();
        record.updated_at = now;
        record.ip_address = input.meta.ip_address.clone();
        record.user_agent = input.meta.user_agent.clone();
        let notes = match action {
            ApprovalAction::Approve => {
                record.approved_at = Some(now);
                None
            }
            ApprovalAction::Reject => {
                let reason = input.reason.unwrap_or_default();
                record.rejected_at = Some(now);
                record.rejection_reason = Some(reason.clone());
                Some(reason)
            }
        };

        if !tx.update_pending_approval(&record).await? {
            return Err(StoreError::Internal(format!(
                "approval {} left pending under lock",
                record.id
            ))
            .into());
        }
        tx.append_audit(&AuditLogEntry::for_transition(
            &record,
            ApprovalStatus::Pending,
            notes,
            &input.meta,
            now,
        ))
        .await?;
        let stage = recompute_stage(tx.as_mut(), record.request_id).await?;
        tx.commit().await?;

        info!(
            approval_id = %record.id,
            request_id = %record.request_id,
            step_order = record.step_order,
            action = action.as_str(),
            stage = %stage,
            token = %fingerprint,
            "approval decision recorded"
        );
        Ok(Resolution::Transitioned { record, stage })
    }

    async fn request_title(&self, record: &ApprovalRecord) -> String {
        match self.store.get_request(record.request_id).await {
            Ok(Some(request)) => request.title,
            Ok(None) => "this request".to_string(),
            Err(e) => {
                warn!(request_id = %record.request_id, error = %e, "could not load request title");
                "this request".to_string()
            }
        }
    }

    async fn describe(&self, resolution: Resolution) -> OutcomeDocument {
        match resolution {
            Resolution::AlreadyProcessed(record) => match record.status {
                ApprovalStatus::Expired => expired_document(&record),
                status => {
                    let title = self.request_title(&record).await;
                    let when = record
                        .resolved_at()
                        .map(|at| format!(" on {}", format_when(at)))
                        .unwrap_or_default();
                    OutcomeDocument::new(
                        OutcomeKind::AlreadyProcessed,
                        200,
                        "Already processed",
                        format!(
                            "\"{}\" was already {}{}. No further action is needed.",
                            title, status, when
                        ),
                    )
                    .with_detail(record.rejection_reason.clone())
                }
            },
            Resolution::Expired(record) => expired_document(&record),
            Resolution::Transitioned { record, stage } => {
                let title = self.request_title(&record).await;
                match record.status {
                    ApprovalStatus::Rejected => OutcomeDocument::new(
                        OutcomeKind::Rejected,
                        200,
                        "Request rejected",
                        format!(
                            "You rejected \"{}\". The maintenance team has been informed.",
                            title
                        ),
                    )
                    .with_detail(record.rejection_reason.clone()),
                    _ => {
                        let next = match stage {
                            RequestStage::ReadyForExecution => {
                                "All approvals are in; the work can now be scheduled."
                            }
                            _ => "The request is waiting on the remaining approvers.",
                        };
                        OutcomeDocument::new(
                            OutcomeKind::Success,
                            200,
                            "Request approved",
                            format!("You approved \"{}\" (step {}). {}", title, record.step_order, next),
                        )
                    }
                }
            }
        }
    }
}

fn expired_document(record: &ApprovalRecord) -> OutcomeDocument {
    OutcomeDocument::new(
        OutcomeKind::Expired,
        410,
        "Link expired",
        format!(
            "This approval link expired on {}. Ask the maintenance team to send a new one.",
            format_when(record.token_expires_at)
        ),
    )
}
