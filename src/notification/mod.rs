//! Outbound approval requests.
//!
//! The engine hands the dispatcher one [`ApprovalNotice`] per pending record
//! after the approval chain is committed. Delivery is fire-and-forget: a
//! failed send is logged and counted, and never touches approval state.

pub mod slack;
pub mod webhook;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use url::Url;
use uuid::Uuid;

use crate::engine::token::ApprovalToken;
use crate::middleware::metrics;
use crate::models::approval::ApprovalRecord;
use crate::models::request::MaintenanceRequest;

/// Path of the public callback endpoint, relative to the public base URL.
pub const CALLBACK_PATH: &str = "approvals/callback";

/// Everything the mail-rendering collaborator needs for one approver.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalNotice {
    pub approver_email: String,
    pub approver_name: String,
    pub request_id: Uuid,
    pub request_title: String,
    pub request_description: String,
    pub request_priority: String,
    pub request_category: String,
    pub approval_token: String,
    pub step_order: i32,
    pub total_steps: usize,
    pub expires_at: DateTime<Utc>,
    pub approve_url: String,
    pub reject_url: String,
}

impl ApprovalNotice {
    pub fn new(
        request: &MaintenanceRequest,
        record: &ApprovalRecord,
        token: &ApprovalToken,
        total_steps: usize,
        links: &ActionLinks,
    ) -> Self {
        Self {
            approver_email: record.approver_email.clone(),
            approver_name: record.approver_name.clone(),
            request_id: request.id,
            request_title: request.title.clone(),
            request_description: request.description.clone().unwrap_or_default(),
            request_priority: request.priority.clone().unwrap_or_default(),
            request_category: request.category.clone().unwrap_or_default(),
            approval_token: token.as_str().to_string(),
            step_order: record.step_order,
            total_steps,
            expires_at: record.token_expires_at,
            approve_url: links.action_url(token, "approve"),
            reject_url: links.action_url(token, "reject"),
        }
    }
}

/// Builds the approve/reject links embedded in notifications.
#[derive(Debug, Clone)]
pub struct ActionLinks {
    base: Url,
}

impl ActionLinks {
    pub fn new(public_url: &str) -> anyhow::Result<Self> {
        let mut base = Url::parse(public_url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self { base })
    }

    pub fn action_url(&self, token: &ApprovalToken, action: &str) -> String {
        let mut url = self
            .base
            .join(CALLBACK_PATH)
            .unwrap_or_else(|_| self.base.clone());
        url.query_pairs_mut()
            .append_pair("token", token.as_str())
            .append_pair("action", action);
        url.to_string()
    }
}

/// A delivery channel for approval notices.
#[async_trait]
pub trait ApprovalNotifier: Send + Sync {
    /// Short channel name for logs and metrics.
    fn channel(&self) -> &'static str;

    async fn notify(&self, notice: &ApprovalNotice) -> anyhow::Result<()>;
}

#[derive(Clone, Default)]
pub struct NotificationDispatcher {
    notifiers: Vec<Arc<dyn ApprovalNotifier>>,
}

impl NotificationDispatcher {
    pub fn new(notifiers: Vec<Arc<dyn ApprovalNotifier>>) -> Self {
        Self { notifiers }
    }

    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }

    /// Send every notice through every channel on a background task. The
    /// channels of one notice are driven concurrently. The handle is only
    /// useful to callers that want to wait for delivery.
    pub fn dispatch(&self, notices: Vec<ApprovalNotice>) -> JoinHandle<()> {
        let notifiers = self.notifiers.clone();
        tokio::spawn(async move {
            for notice in &notices {
                let sends = notifiers.iter().map(|n| async move { (n, n.notify(notice).await) });
                for (notifier, result) in join_all(sends).await {
                    match result {
                        Ok(()) => {
                            metrics::record_notification(notifier.channel(), "sent");
                            info!(
                                channel = notifier.channel(),
                                request_id = %notice.request_id,
                                step_order = notice.step_order,
                                "approval notice sent"
                            );
                        }
                        Err(e) => {
                            metrics::record_notification(notifier.channel(), "failed");
                            warn!(
                                channel = notifier.channel(),
                                request_id = %notice.request_id,
                                step_order = notice.step_order,
                                error = %e,
                                "approval notice delivery failed"
                            );
                        }
                    }
                }
            }
        })
    }
}
