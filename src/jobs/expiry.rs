//! Background job: expire approval tokens nobody acted on.
//!
//! Callbacks already expire records lazily. The sweep catches the ones no
//! approver ever clicks, so requests whose overdue steps auto-approve on
//! timeout move forward on their own.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time;

use crate::engine::ApprovalEngine;

/// Spawn the sweep task. Call this once at startup.
pub fn spawn(engine: Arc<ApprovalEngine>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = time::interval(every);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if let Err(e) = engine.sweep_expired(Utc::now()).await {
                tracing::error!("expiry sweep failed: {}", e);
            }
        }
    })
}
