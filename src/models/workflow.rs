use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Fallback for steps saved without an explicit timeout.
pub const DEFAULT_TIMEOUT_HOURS: i32 = 48;

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("static regex"));

/// A named, ordered approval chain, optionally scoped to a request
/// category and/or priority.
///
/// Every edit produces a new `revision`; approval records pin the revision
/// they were created from, so older revisions of `steps` stay readable.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WorkflowDefinition {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub priority: Option<String>,
    pub is_active: bool,
    pub archived: bool,
    pub revision: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[sqlx(skip)]
    pub steps: Vec<StepTemplate>,
}

impl WorkflowDefinition {
    /// Whether the definition's filters admit a request with this
    /// category/priority. A `None` filter is a wildcard.
    pub fn matches(&self, category: Option<&str>, priority: Option<&str>) -> bool {
        fn admits(filter: Option<&str>, value: Option<&str>) -> bool {
            match filter {
                None => true,
                Some(f) => value.is_some_and(|v| v.trim().eq_ignore_ascii_case(f.trim())),
            }
        }
        self.is_active
            && !self.archived
            && admits(self.category.as_deref(), category)
            && admits(self.priority.as_deref(), priority)
    }

    /// category+priority (3) > category-only (2) > priority-only (1) > default (0)
    pub fn specificity(&self) -> u8 {
        match (self.category.is_some(), self.priority.is_some()) {
            (true, true) => 3,
            (true, false) => 2,
            (false, true) => 1,
            (false, false) => 0,
        }
    }

    pub fn step(&self, step_order: i32) -> Option<&StepTemplate> {
        self.steps.iter().find(|s| s.step_order == step_order)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, sqlx::FromRow)]
pub struct StepTemplate {
    pub workflow_id: Uuid,
    pub revision: i32,
    pub step_order: i32,
    pub required_role: String,
    pub approver_name: String,
    pub approver_email: String,
    pub can_reject: bool,
    pub timeout_hours: i32,
    pub auto_approve_on_timeout: bool,
}

impl StepTemplate {
    /// Token lifetime in hours; zero means "use the configured default".
    pub fn effective_timeout_hours(&self, default_hours: i32) -> i32 {
        if self.timeout_hours > 0 {
            self.timeout_hours
        } else {
            default_hours
        }
    }
}

/// Payload of the workflow editor for create and update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewWorkflow {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub steps: Vec<NewStep>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewStep {
    #[serde(default = "default_role")]
    pub required_role: String,
    pub approver_name: String,
    pub approver_email: String,
    #[serde(default = "default_true")]
    pub can_reject: bool,
    #[serde(default = "default_timeout")]
    pub timeout_hours: i32,
    #[serde(default)]
    pub auto_approve_on_timeout: bool,
}

fn default_true() -> bool {
    true
}

fn default_role() -> String {
    "manager".to_string()
}

fn default_timeout() -> i32 {
    DEFAULT_TIMEOUT_HOURS
}

impl NewWorkflow {
    /// Trim empty filter strings to `None` and check field constraints.
    pub fn normalized(mut self) -> Result<Self, String> {
        self.name = self.name.trim().to_string();
        if self.name.is_empty() {
            return Err("workflow name must not be empty".into());
        }
        self.category = non_empty(self.category);
        self.priority = non_empty(self.priority);
        self.description = non_empty(self.description);

        for (i, step) in self.steps.iter_mut().enumerate() {
            step.approver_email = step.approver_email.trim().to_string();
            step.approver_name = step.approver_name.trim().to_string();
            if !EMAIL_RE.is_match(&step.approver_email) {
                return Err(format!(
                    "step {}: invalid approver email '{}'",
                    i + 1,
                    step.approver_email
                ));
            }
            if step.timeout_hours < 0 {
                return Err(format!("step {}: timeout_hours must be >= 0", i + 1));
            }
        }
        Ok(self)
    }

    /// Materialise the steps as templates of `revision`, numbered 1..N in
    /// the order given.
    pub fn step_templates(&self, workflow_id: Uuid, revision: i32) -> Vec<StepTemplate> {
        self.steps
            .iter()
            .enumerate()
            .map(|(i, s)| StepTemplate {
                workflow_id,
                revision,
                step_order: i as i32 + 1,
                required_role: s.required_role.clone(),
                approver_name: s.approver_name.clone(),
                approver_email: s.approver_email.clone(),
                can_reject: s.can_reject,
                timeout_hours: s.timeout_hours,
                auto_approve_on_timeout: s.auto_approve_on_timeout,
            })
            .collect()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Renumber `steps` following `order`, a permutation of the current step
/// orders. Returns the new dense 1..N sequence stamped with `revision`.
pub fn reorder_steps(
    steps: &[StepTemplate],
    order: &[i32],
    revision: i32,
) -> Result<Vec<StepTemplate>, String> {
    if order.len() != steps.len() {
        return Err(format!(
            "order must list all {} steps, got {}",
            steps.len(),
            order.len()
        ));
    }
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::with_capacity(steps.len());
    for (i, old) in order.iter().enumerate() {
        if !seen.insert(*old) {
            return Err(format!("step {} listed twice", old));
        }
        let step = steps
            .iter()
            .find(|s| s.step_order == *old)
            .ok_or_else(|| format!("unknown step {}", old))?;
        out.push(StepTemplate {
            step_order: i as i32 + 1,
            revision,
            ..step.clone()
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(name: &str) -> NewStep {
        NewStep {
            required_role: "manager".into(),
            approver_name: name.into(),
            approver_email: format!("{}@example.com", name),
            can_reject: true,
            timeout_hours: 48,
            auto_approve_on_timeout: false,
        }
    }

    fn payload() -> NewWorkflow {
        NewWorkflow {
            name: " Plumbing ".into(),
            description: Some("".into()),
            category: Some("  ".into()),
            priority: Some("high".into()),
            is_active: true,
            steps: vec![step("alice"), step("bob"), step("carol")],
        }
    }

    #[test]
    fn test_normalized_trims_and_drops_blank_filters() {
        let wf = payload().normalized().unwrap();
        assert_eq!(wf.name, "Plumbing");
        assert_eq!(wf.category, None);
        assert_eq!(wf.description, None);
        assert_eq!(wf.priority.as_deref(), Some("high"));
    }

    #[test]
    fn test_normalized_rejects_bad_email() {
        let mut wf = payload();
        wf.steps[1].approver_email = "not-an-email".into();
        let err = wf.normalized().unwrap_err();
        assert!(err.contains("step 2"), "{}", err);
    }

    #[test]
    fn test_normalized_rejects_negative_timeout() {
        let mut wf = payload();
        wf.steps[0].timeout_hours = -1;
        assert!(wf.normalized().is_err());
    }

    #[test]
    fn test_step_templates_are_dense_from_one() {
        let id = Uuid::new_v4();
        let steps = payload().step_templates(id, 1);
        let orders: Vec<i32> = steps.iter().map(|s| s.step_order).collect();
        assert_eq!(orders, vec![1, 2, 3]);
        assert!(steps.iter().all(|s| s.workflow_id == id && s.revision == 1));
    }

    #[test]
    fn test_reorder_renumbers_all_steps() {
        let steps = payload().step_templates(Uuid::new_v4(), 1);
        let reordered = reorder_steps(&steps, &[3, 1, 2], 2).unwrap();
        let names: Vec<&str> = reordered.iter().map(|s| s.approver_name.as_str()).collect();
        assert_eq!(names, vec!["carol", "alice", "bob"]);
        let orders: Vec<i32> = reordered.iter().map(|s| s.step_order).collect();
        assert_eq!(orders, vec![1, 2, 3]);
        assert!(reordered.iter().all(|s| s.revision == 2));
    }

    #[test]
    fn test_reorder_rejects_non_permutations() {
        let steps = payload().step_templates(Uuid::new_v4(), 1);
        assert!(reorder_steps(&steps, &[1, 2], 2).is_err());
        assert!(reorder_steps(&steps, &[1, 1, 2], 2).is_err());
        assert!(reorder_steps(&steps, &[1, 2, 9], 2).is_err());
    }

    #[test]
    fn test_zero_timeout_falls_back_to_default() {
        let mut s = payload().step_templates(Uuid::new_v4(), 1).remove(0);
        s.timeout_hours = 0;
        assert_eq!(s.effective_timeout_hours(DEFAULT_TIMEOUT_HOURS), 48);
        s.timeout_hours = 2;
        assert_eq!(s.effective_timeout_hours(DEFAULT_TIMEOUT_HOURS), 2);
    }
}
