//! Workflow selection and approval-record instantiation.

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use super::token::ApprovalToken;
use crate::models::approval::{ApprovalRecord, ApprovalStatus};
use crate::models::request::MaintenanceRequest;
use crate::models::workflow::WorkflowDefinition;

/// Pick the definition for a request: the most specific matching filter
/// wins, ties go to the earliest-created definition. `defs` must be in
/// creation order.
pub fn select_workflow<'a>(
    defs: &'a [WorkflowDefinition],
    category: Option<&str>,
    priority: Option<&str>,
) -> Option<&'a WorkflowDefinition> {
    let mut best: Option<&WorkflowDefinition> = None;
    for def in defs.iter().filter(|d| d.matches(category, priority)) {
        match best {
            Some(b) if b.specificity() >= def.specificity() => {}
            _ => best = Some(def),
        }
    }
    best
}

/// A record ready to persist together with the plaintext token that the
/// notification for it must carry.
pub struct IssuedApproval {
    pub record: ApprovalRecord,
    pub token: ApprovalToken,
}

/// One pending record per step of `workflow`, in step order, each with a
/// fresh token expiring `timeout_hours` (or `default_timeout_hours`) from
/// `now`.
pub fn instantiate(
    request: &MaintenanceRequest,
    workflow: &WorkflowDefinition,
    now: DateTime<Utc>,
    default_timeout_hours: i32,
) -> Vec<IssuedApproval> {
    let mut steps: Vec<_> = workflow.steps.iter().collect();
    steps.sort_by_key(|s| s.step_order);

    steps
        .into_iter()
        .map(|step| {
            let token = ApprovalToken::generate();
            let hours = step.effective_timeout_hours(default_timeout_hours);
            let record = ApprovalRecord {
                id: Uuid::new_v4(),
                request_id: request.id,
                workflow_id: workflow.id,
                workflow_revision: workflow.revision,
                step_order: step.step_order,
                approver_email: step.approver_email.clone(),
                approver_name: step.approver_name.clone(),
                token_hash: token.hash(),
                token_expires_at: now + Duration::hours(i64::from(hours)),
                status: ApprovalStatus::Pending,
                approved_at: None,
                rejected_at: None,
                rejection_reason: None,
                ip_address: None,
                user_agent: None,
                created_at: now,
                updated_at: now,
            };
            IssuedApproval { record, token }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::request::{RequestStage, SubmittedRequest};
    use crate::models::workflow::StepTemplate;

    fn def(name: &str, category: Option<&str>, priority: Option<&str>) -> WorkflowDefinition {
        let now = Utc::now();
        WorkflowDefinition {
            id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            category: category.map(String::from),
            priority: priority.map(String::from),
            is_active: true,
            archived: false,
            revision: 1,
            created_at: now,
            updated_at: now,
            steps: Vec::new(),
        }
    }

    fn step(wf: &WorkflowDefinition, order: i32, hours: i32) -> StepTemplate {
        StepTemplate {
            workflow_id: wf.id,
            revision: wf.revision,
            step_order: order,
            required_role: "manager".into(),
            approver_name: format!("Approver {}", order),
            approver_email: format!("approver{}@example.com", order),
            can_reject: true,
            timeout_hours: hours,
            auto_approve_on_timeout: false,
        }
    }

    #[test]
    fn test_most_specific_match_wins() {
        let defs = vec![
            def("default", None, None),
            def("priority", None, Some("high")),
            def("category", Some("plumbing"), None),
            def("both", Some("plumbing"), Some("high")),
        ];
        let pick = |c, p| select_workflow(&defs, c, p).map(|d| d.name.as_str());

        assert_eq!(pick(Some("plumbing"), Some("high")), Some("both"));
        assert_eq!(pick(Some("plumbing"), Some("low")), Some("category"));
        assert_eq!(pick(Some("electrical"), Some("high")), Some("priority"));
        assert_eq!(pick(Some("electrical"), None), Some("default"));
        assert_eq!(pick(None, None), Some("default"));
    }

    #[test]
    fn test_ties_go_to_first_created() {
        let defs = vec![
            def("first", Some("hvac"), None),
            def("second", Some("hvac"), None),
        ];
        let picked = select_workflow(&defs, Some("hvac"), None).unwrap();
        assert_eq!(picked.name, "first");
    }

    #[test]
    fn test_inactive_and_unmatched_are_skipped() {
        let mut inactive = def("inactive", None, None);
        inactive.is_active = false;
        let defs = vec![inactive, def("hvac-only", Some("hvac"), None)];
        assert!(select_workflow(&defs, Some("plumbing"), None).is_none());
    }

    #[test]
    fn test_category_filter_does_not_match_missing_category() {
        let defs = vec![def("hvac", Some("hvac"), None)];
        assert!(select_workflow(&defs, None, Some("high")).is_none());
    }

    #[test]
    fn test_instantiate_one_pending_record_per_step() {
        let mut wf = def("two-step", None, None);
        wf.steps = vec![step(&wf, 2, 0), step(&wf, 1, 24)];
        let now = Utc::now();
        let request = MaintenanceRequest::from_submission(
            SubmittedRequest {
                id: Uuid::new_v4(),
                title: "Leaking pipe".into(),
                description: None,
                category: None,
                priority: None,
            },
            now,
        );
        assert_eq!(request.stage, RequestStage::AwaitingApproval);

        let issued = instantiate(&request, &wf, now, 48);
        assert_eq!(issued.len(), 2);
        assert_eq!(issued[0].record.step_order, 1);
        assert_eq!(issued[1].record.step_order, 2);
        assert_eq!(issued[0].record.token_expires_at, now + Duration::hours(24));
        // zero timeout falls back to the default
        assert_eq!(issued[1].record.token_expires_at, now + Duration::hours(48));
        for i in &issued {
            assert_eq!(i.record.status, ApprovalStatus::Pending);
            assert_eq!(i.record.request_id, request.id);
            assert_eq!(i.record.token_hash, i.token.hash());
        }
        assert_ne!(issued[0].record.token_hash, issued[1].record.token_hash);
    }
}
