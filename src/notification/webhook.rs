use anyhow::Result;
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{ApprovalNotice, ApprovalNotifier};

// ── Webhook Event ─────────────────────────────────────────────

/// Body posted to each webhook endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookEvent<'a> {
    pub event_type: &'static str,
    /// ISO-8601 timestamp of when the event was built.
    pub timestamp: String,
    pub notice: &'a ApprovalNotice,
}

impl<'a> WebhookEvent<'a> {
    pub fn approval_requested(notice: &'a ApprovalNotice) -> Self {
        Self {
            event_type: "approval_requested",
            timestamp: chrono::Utc::now().to_rfc3339(),
            notice,
        }
    }
}

// ── HMAC Signing ─────────────────────────────────────────────

/// HMAC-SHA256 of `payload` as "sha256=<hex>".
fn hmac_sha256_hex(secret: &str, payload: &[u8]) -> Result<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("invalid webhook secret: {}", e))?;
    mac.update(payload);
    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

// ── Webhook Notifier ──────────────────────────────────────────

/// Posts approval notices to the configured URLs, where an external mailer
/// renders and sends the approver email.
/// - HMAC-SHA256 signing (`x-approvals-signature`) when a secret is set
/// - retries with back-off (0s → 1s → 5s)
#[derive(Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    urls: Vec<String>,
    secret: Option<String>,
    backoff_secs: Vec<u64>,
}

impl WebhookNotifier {
    pub fn new(urls: Vec<String>, secret: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent("Approvals-Webhook/1.0")
            .build()?;
        Ok(Self {
            client,
            urls,
            secret,
            backoff_secs: vec![0, 1, 5],
        })
    }

    /// Override the retry schedule. Each entry is one attempt, preceded by
    /// that many seconds of sleep.
    pub fn with_backoff(mut self, backoff_secs: Vec<u64>) -> Self {
        self.backoff_secs = backoff_secs;
        self
    }

    /// Deliver one event to one URL, retrying per the back-off schedule.
    pub async fn send(&self, url: &str, event: &WebhookEvent<'_>) -> Result<()> {
        let payload = serde_json::to_vec(event)?;
        let delivery_id = uuid::Uuid::new_v4().to_string();
        let timestamp = chrono::Utc::now().timestamp().to_string();
        let signature = match self.secret.as_deref() {
            Some(s) => Some(hmac_sha256_hex(s, &payload)?),
            None => None,
        };

        for (attempt, &delay) in self.backoff_secs.iter().enumerate() {
            if delay > 0 {
                debug!(url, attempt, delay_secs = delay, "retrying webhook delivery");
                tokio::time::sleep(Duration::from_secs(delay)).await;
            }

            let mut req = self
                .client
                .post(url)
                .header("content-type", "application/json")
                .header("x-approvals-delivery-id", &delivery_id)
                .header("x-approvals-timestamp", &timestamp)
                .header("x-approvals-event", event.event_type);

            if let Some(ref sig) = signature {
                req = req.header("x-approvals-signature", sig.as_str());
            }

            match req.body(payload.clone()).send().await {
                Ok(resp) if resp.status().is_success() => {
                    info!(
                        url,
                        delivery_id = %delivery_id,
                        attempt,
                        status = %resp.status(),
                        "webhook delivered"
                    );
                    return Ok(());
                }
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    warn!(
                        url,
                        delivery_id = %delivery_id,
                        attempt,
                        status = %status,
                        body = %body,
                        "webhook delivery failed (non-2xx)"
                    );
                }
                Err(e) => {
                    warn!(
                        url,
                        delivery_id = %delivery_id,
                        attempt,
                        error = %e,
                        "webhook request error"
                    );
                }
            }
        }

        Err(anyhow::anyhow!(
            "webhook delivery failed after {} attempts: {}",
            self.backoff_secs.len(),
            url
        ))
    }
}

#[async_trait]
impl ApprovalNotifier for WebhookNotifier {
    fn channel(&self) -> &'static str {
        "webhook"
    }

    /// Every URL is attempted; the first failure is reported after all ran.
    async fn notify(&self, notice: &ApprovalNotice) -> Result<()> {
        let event = WebhookEvent::approval_requested(notice);
        let mut first_err = None;
        for url in &self.urls {
            if let Err(e) = self.send(url, &event).await {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────
