use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A maintenance request as seen by the approval engine. The submission
/// collaborator owns everything else about it.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MaintenanceRequest {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub priority: Option<String>,
    pub workflow_id: Option<Uuid>,
    pub workflow_revision: Option<i32>,
    pub stage: RequestStage,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MaintenanceRequest {
    pub fn from_submission(req: SubmittedRequest, now: DateTime<Utc>) -> Self {
        Self {
            id: req.id,
            title: req.title,
            description: req.description,
            category: req.category,
            priority: req.priority,
            workflow_id: None,
            workflow_revision: None,
            stage: RequestStage::AwaitingApproval,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Body of the `onRequestSubmitted` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmittedRequest {
    pub id: Uuid,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
}

/// Overall approval stage of a request, always derived from its records.
#[derive(Debug, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "kebab-case")]
#[sqlx(type_name = "varchar", rename_all = "kebab-case")]
pub enum RequestStage {
    AwaitingApproval,
    ReadyForExecution,
    Rejected,
}

impl RequestStage {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestStage::AwaitingApproval => "awaiting-approval",
            RequestStage::ReadyForExecution => "ready-for-execution",
            RequestStage::Rejected => "rejected",
        }
    }

    /// Status label the maintenance dashboard displays for this stage.
    pub fn status_label(self) -> &'static str {
        match self {
            RequestStage::AwaitingApproval => "Open",
            RequestStage::ReadyForExecution => "Assigned",
            RequestStage::Rejected => "Rejected",
        }
    }

    /// The dashboard's `workflow_stage` column value for this stage.
    pub fn workflow_stage(self) -> &'static str {
        match self {
            RequestStage::AwaitingApproval => "submitted",
            RequestStage::ReadyForExecution => "assigned",
            RequestStage::Rejected => "cancelled",
        }
    }
}

impl std::fmt::Display for RequestStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_serializes_kebab_case() {
        let json = serde_json::to_string(&RequestStage::ReadyForExecution).unwrap();
        assert_eq!(json, "\"ready-for-execution\"");
        assert_eq!(RequestStage::ReadyForExecution.as_str(), "ready-for-execution");
    }

    #[test]
    fn test_dashboard_labels() {
        assert_eq!(RequestStage::AwaitingApproval.status_label(), "Open");
        assert_eq!(RequestStage::ReadyForExecution.workflow_stage(), "assigned");
        assert_eq!(RequestStage::Rejected.workflow_stage(), "cancelled");
    }
}
