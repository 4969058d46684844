use serde::Deserialize;

use crate::models::workflow::DEFAULT_TIMEOUT_HOURS;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    /// Key for the management API. `None` disables it (every call is 401).
    pub admin_key: Option<String>,
    /// Base URL the approve/reject links point at.
    pub public_url: String,
    /// Token lifetime for steps that leave `timeout_hours` at zero.
    pub default_timeout_hours: i32,
    /// Comma-separated list of endpoints receiving approval notices.
    pub notify_webhook_urls: Vec<String>,
    pub webhook_secret: Option<String>,
    pub slack_webhook_url: Option<String>,
    /// Period of the expiry sweep in seconds. 0 = disabled.
    pub sweep_interval_secs: u64,
}

fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let admin_key = var("APPROVALS_ADMIN_KEY");
    if admin_key.is_none() {
        let env_mode = std::env::var("APPROVALS_ENV")
            .or_else(|_| std::env::var("RUST_ENV"))
            .unwrap_or_default();
        if env_mode == "production" {
            anyhow::bail!("APPROVALS_ADMIN_KEY must be set when running in production.");
        }
        eprintln!("⚠️  APPROVALS_ADMIN_KEY is not set; the management API will refuse every call.");
    }

    let port = std::env::var("APPROVALS_PORT")
        .unwrap_or_else(|_| "8080".into())
        .parse()
        .unwrap_or(8080);

    let default_timeout_hours = std::env::var("APPROVALS_DEFAULT_TIMEOUT_HOURS")
        .ok()
        .and_then(|v| v.parse::<i32>().ok())
        .filter(|h| *h > 0)
        .unwrap_or(DEFAULT_TIMEOUT_HOURS);

    Ok(Config {
        port,
        database_url: std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/approvals".into()),
        admin_key,
        public_url: var("APPROVALS_PUBLIC_URL")
            .unwrap_or_else(|| format!("http://localhost:{}", port)),
        default_timeout_hours,
        notify_webhook_urls: std::env::var("APPROVALS_NOTIFY_WEBHOOK_URLS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
        webhook_secret: var("APPROVALS_WEBHOOK_SECRET"),
        slack_webhook_url: var("APPROVALS_SLACK_WEBHOOK_URL"),
        sweep_interval_secs: std::env::var("APPROVALS_SWEEP_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(300),
    })
}
