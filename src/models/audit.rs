use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use uuid::Uuid;

use super::approval::{ApprovalRecord, ApprovalStatus, ClientMeta};

/// Append-only record of one processed callback.
///
/// Written in the same transaction as the status transition it describes;
/// never updated or deleted afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub request_id: Uuid,
    pub approval_id: Uuid,
    pub action: AuditAction,
    pub performed_by_email: String,
    pub performed_by_name: String,
    pub previous_status: ApprovalStatus,
    pub new_status: ApprovalStatus,
    pub notes: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub metadata: Json<AuditMetadata>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum AuditAction {
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuditMetadata {
    pub step_order: i32,
    pub token_used: bool,
}

impl AuditLogEntry {
    /// Build the entry for a transition the callback processor just applied
    /// to `record`. The actor is always the record's approver: the token is
    /// the only credential, so caller-supplied identity is never trusted.
    pub fn for_transition(
        record: &ApprovalRecord,
        previous_status: ApprovalStatus,
        notes: Option<String>,
        meta: &ClientMeta,
        at: DateTime<Utc>,
    ) -> Self {
        let action = match record.status {
            ApprovalStatus::Rejected => AuditAction::Rejected,
            _ => AuditAction::Approved,
        };
        Self {
            id: Uuid::new_v4(),
            request_id: record.request_id,
            approval_id: record.id,
            action,
            performed_by_email: record.approver_email.clone(),
            performed_by_name: record.approver_name.clone(),
            previous_status,
            new_status: record.status,
            notes,
            ip_address: meta.ip_address.clone(),
            user_agent: meta.user_agent.clone(),
            metadata: Json(AuditMetadata {
                step_order: record.step_order,
                token_used: true,
            }),
            created_at: at,
        }
    }
}
