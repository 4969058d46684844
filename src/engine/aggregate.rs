//! Derives a request's overall stage from its approval records.
//!
//! A set fold: the result never depends on record order, and steps may be
//! resolved in any order.

use std::collections::HashSet;

use crate::models::approval::{ApprovalRecord, ApprovalStatus};
use crate::models::request::RequestStage;
use crate::models::workflow::StepTemplate;

/// Step orders whose templates carry `auto_approve_on_timeout`. Read from
/// the workflow revision at aggregation time, never cached on records.
#[derive(Debug, Clone, Default)]
pub struct AutoApprovePolicy {
    steps: HashSet<i32>,
}

impl AutoApprovePolicy {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn from_steps(steps: &[StepTemplate]) -> Self {
        Self {
            steps: steps
                .iter()
                .filter(|s| s.auto_approve_on_timeout)
                .map(|s| s.step_order)
                .collect(),
        }
    }

    pub fn auto_approves(&self, step_order: i32) -> bool {
        self.steps.contains(&step_order)
    }
}

/// Status a record counts as for aggregation.
pub fn effective_status(record: &ApprovalRecord, policy: &AutoApprovePolicy) -> ApprovalStatus {
    match record.status {
        ApprovalStatus::Expired if policy.auto_approves(record.step_order) => {
            ApprovalStatus::Approved
        }
        status => status,
    }
}

pub fn aggregate(records: &[ApprovalRecord], policy: &AutoApprovePolicy) -> RequestStage {
    aggregate_statuses(records.iter().map(|r| effective_status(r, policy)))
}

/// - any rejected → `Rejected`
/// - all approved (including none at all) → `ReadyForExecution`
/// - otherwise → `AwaitingApproval`
pub fn aggregate_statuses<I>(statuses: I) -> RequestStage
where
    I: IntoIterator<Item = ApprovalStatus>,
{
    let mut all_approved = true;
    for status in statuses {
        match status {
            ApprovalStatus::Rejected => return RequestStage::Rejected,
            ApprovalStatus::Approved => {}
            ApprovalStatus::Pending | ApprovalStatus::Expired => all_approved = false,
        }
    }
    if all_approved {
        RequestStage::ReadyForExecution
    } else {
        RequestStage::AwaitingApproval
    }
}
