//! Shared fixtures: an engine over `MemoryStore` whose only notification
//! channel is an in-process outbox, so tests can read the issued tokens.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use approvals::engine::callback::{CallbackInput, OutcomeDocument};
use approvals::engine::{ApprovalEngine, EngineSettings, SubmissionReport};
use approvals::models::approval::{ApprovalRecord, ClientMeta};
use approvals::models::request::SubmittedRequest;
use approvals::models::workflow::{NewStep, NewWorkflow, WorkflowDefinition};
use approvals::notification::{ActionLinks, ApprovalNotice, ApprovalNotifier, NotificationDispatcher};
use approvals::store::memory::MemoryStore;
use approvals::store::ApprovalStore;
use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

#[derive(Default)]
pub struct Outbox {
    sent: Mutex<Vec<ApprovalNotice>>,
}

impl Outbox {
    pub fn all(&self) -> Vec<ApprovalNotice> {
        self.sent.lock().unwrap().clone()
    }

    pub fn for_request(&self, request_id: Uuid) -> Vec<ApprovalNotice> {
        let mut notices: Vec<_> = self
            .all()
            .into_iter()
            .filter(|n| n.request_id == request_id)
            .collect();
        notices.sort_by_key(|n| n.step_order);
        notices
    }
}

#[async_trait]
impl ApprovalNotifier for Outbox {
    fn channel(&self) -> &'static str {
        "outbox"
    }

    async fn notify(&self, notice: &ApprovalNotice) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(notice.clone());
        Ok(())
    }
}

pub struct Harness {
    pub store: MemoryStore,
    pub engine: Arc<ApprovalEngine>,
    pub outbox: Arc<Outbox>,
}

pub const PUBLIC_URL: &str = "https://maintenance.example.com";

pub fn harness() -> Harness {
    let store = MemoryStore::new();
    let outbox = Arc::new(Outbox::default());
    let dispatcher = NotificationDispatcher::new(vec![outbox.clone() as Arc<dyn ApprovalNotifier>]);
    let settings = EngineSettings {
        default_timeout_hours: 48,
        links: ActionLinks::new(PUBLIC_URL).unwrap(),
    };
    let engine = Arc::new(ApprovalEngine::new(
        Arc::new(store.clone()),
        dispatcher,
        settings,
    ));
    Harness {
        store,
        engine,
        outbox,
    }
}

pub fn step(name: &str) -> NewStep {
    NewStep {
        required_role: "manager".into(),
        approver_name: name.into(),
        approver_email: format!("{}@example.com", name.to_lowercase()),
        can_reject: true,
        timeout_hours: 48,
        auto_approve_on_timeout: false,
    }
}

pub fn workflow(name: &str, category: Option<&str>, steps: Vec<NewStep>) -> NewWorkflow {
    NewWorkflow {
        name: name.into(),
        description: None,
        category: category.map(String::from),
        priority: None,
        is_active: true,
        steps,
    }
}

pub fn submission(title: &str, category: Option<&str>) -> SubmittedRequest {
    SubmittedRequest {
        id: Uuid::new_v4(),
        title: title.into(),
        description: Some("details".into()),
        category: category.map(String::from),
        priority: Some("high".into()),
    }
}

impl Harness {
    pub async fn create_workflow(&self, wf: NewWorkflow) -> WorkflowDefinition {
        self.store.create_workflow(&wf).await.unwrap()
    }

    /// A plumbing workflow with approvers Alice (step 1) and Bob (step 2).
    pub async fn two_step_workflow(&self) -> WorkflowDefinition {
        self.create_workflow(workflow(
            "Plumbing approvals",
            Some("plumbing"),
            vec![step("Alice"), step("Bob")],
        ))
        .await
    }

    /// Submit and wait for the notices to land in the outbox.
    pub async fn submit(&self, req: SubmittedRequest) -> (SubmissionReport, Vec<ApprovalNotice>) {
        let id = req.id;
        let mut report = self.engine.submit(req).await.unwrap();
        if let Some(handle) = report.notifications.take() {
            handle.await.unwrap();
        }
        (report, self.outbox.for_request(id))
    }

    pub async fn click(&self, token: &str, action: &str, reason: Option<&str>) -> OutcomeDocument {
        self.engine
            .process_callback(
                CallbackInput {
                    token: Some(token.to_string()),
                    action: Some(action.to_string()),
                    reason: reason.map(String::from),
                    meta: ClientMeta {
                        ip_address: Some("203.0.113.7".into()),
                        user_agent: Some("MailClient/1.0".into()),
                    },
                },
                Utc::now(),
            )
            .await
    }

    pub async fn approvals(&self, request_id: Uuid) -> Vec<ApprovalRecord> {
        self.store.list_approvals(request_id).await.unwrap()
    }
}
