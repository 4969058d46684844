//! Public approve/reject endpoint hit from the links in approval emails.
//!
//! No authentication: the token in the query string is the credential.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    response::Response,
};
use chrono::Utc;
use serde::Deserialize;

use crate::engine::callback::CallbackInput;
use crate::models::approval::ClientMeta;
use crate::AppState;

const UNKNOWN: &str = "unknown";

#[derive(Debug, Default, Deserialize)]
pub struct CallbackParams {
    pub token: Option<String>,
    pub action: Option<String>,
    pub reason: Option<String>,
}

/// Caller IP and user agent. Behind the proxy the first `x-forwarded-for`
/// entry is the client.
pub fn client_meta(headers: &HeaderMap) -> ClientMeta {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    let ip_address = header("x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .or_else(|| header("x-real-ip"))
        .unwrap_or(UNKNOWN)
        .to_string();
    let user_agent = header("user-agent").unwrap_or(UNKNOWN).to_string();

    ClientMeta {
        ip_address: Some(ip_address),
        user_agent: Some(user_agent),
    }
}

/// GET /approvals/callback (and the legacy /functions/v1/process-approval)
pub async fn process_approval(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    params: Option<Query<CallbackParams>>,
) -> Response {
    // an unparseable query still gets the HTML page, as a missing-parameter 400
    let params = params.map(|Query(p)| p).unwrap_or_default();
    let input = CallbackInput {
        token: params.token,
        action: params.action,
        reason: params.reason,
        meta: client_meta(&headers),
    };
    let doc = state.engine.process_callback(input, Utc::now()).await;
    state.pages.respond(&doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_first_forwarded_entry_wins() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.2"));
        headers.insert("user-agent", HeaderValue::from_static("Mail/1.0"));
        let meta = client_meta(&headers);
        assert_eq!(meta.ip_address.as_deref(), Some("203.0.113.7"));
        assert_eq!(meta.user_agent.as_deref(), Some("Mail/1.0"));
    }

    #[test]
    fn test_falls_back_to_real_ip_then_unknown() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.2"));
        assert_eq!(client_meta(&headers).ip_address.as_deref(), Some("10.0.0.2"));

        let meta = client_meta(&HeaderMap::new());
        assert_eq!(meta.ip_address.as_deref(), Some("unknown"));
        assert_eq!(meta.user_agent.as_deref(), Some("unknown"));
    }
}
