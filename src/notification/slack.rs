use anyhow::Context;
use async_trait::async_trait;
use serde::Serialize;

use super::{ApprovalNotice, ApprovalNotifier};

/// Posts a short heads-up to a Slack incoming webhook. The action links are
/// left out; they are bearer credentials meant for the approver only.
#[derive(Clone)]
pub struct SlackNotifier {
    client: reqwest::Client,
    webhook_url: String,
}

impl SlackNotifier {
    pub fn new(webhook_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            webhook_url,
        }
    }
}

fn render_text(notice: &ApprovalNotice) -> String {
    format!(
        "*Approval requested* (step {} of {})\n\nRequest: *{}*\nPriority: {}\nApprover: {} <{}>\nExpires: {}",
        notice.step_order,
        notice.total_steps,
        notice.request_title,
        if notice.request_priority.is_empty() { "-" } else { &notice.request_priority },
        notice.approver_name,
        notice.approver_email,
        notice.expires_at.format("%Y-%m-%d %H:%M UTC"),
    )
}

#[async_trait]
impl ApprovalNotifier for SlackNotifier {
    fn channel(&self) -> &'static str {
        "slack"
    }

    async fn notify(&self, notice: &ApprovalNotice) -> anyhow::Result<()> {
        let message = SlackMessage {
            text: render_text(notice),
        };

        let resp = self
            .client
            .post(&self.webhook_url)
            .json(&message)
            .send()
            .await
            .context("failed to send slack notification")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("slack returned error: status={}, body={}", status, body);
        }

        tracing::info!(request_id = %notice.request_id, "sent slack notification");
        Ok(())
    }
}

#[derive(Serialize)]
struct SlackMessage {
    text: String,
}
