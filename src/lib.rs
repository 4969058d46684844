//! Multi-step approval workflows for maintenance requests.
//!
//! The binary in `main.rs` wires configuration, storage and notifiers
//! together; integration tests in `tests/` build the same router around an
//! in-memory store.

pub mod api;
pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod jobs;
pub mod middleware;
pub mod models;
pub mod notification;
pub mod store;

use std::sync::Arc;

use axum::http::{header, HeaderName, Method};
use axum::routing::get;
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};

use api::render::OutcomePages;
use engine::ApprovalEngine;

/// Shared application state passed to handlers and middleware.
pub struct AppState {
    pub engine: Arc<ApprovalEngine>,
    pub pages: OutcomePages,
    /// Management API key; `None` locks the management API.
    pub admin_key: Option<String>,
}

/// The full HTTP surface: health, metrics, the public callback and the
/// management API under `/api/v1`.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health endpoints (no auth)
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(|| async { "ok" }))
        .route(
            "/metrics",
            get(|| async { middleware::metrics::encode_metrics() }),
        )
        .merge(api::public_router())
        .nest("/api/v1", api::api_router(state.clone()))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(cors_layer())
        .layer(axum::middleware::from_fn(middleware::request_id))
        .layer(axum::middleware::from_fn(middleware::security_headers))
}

/// Restrict CORS to the dashboard origin (`DASHBOARD_ORIGIN`, localhost in
/// development).
fn cors_layer() -> CorsLayer {
    let dashboard_origin =
        std::env::var("DASHBOARD_ORIGIN").unwrap_or_else(|_| "http://localhost:3000".to_string());
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(move |origin, _| {
            let origin_str = origin.to_str().unwrap_or("");
            origin_str == dashboard_origin
                || origin_str.starts_with("http://localhost:")
                || origin_str.starts_with("http://127.0.0.1:")
        }))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static("x-admin-key"),
            HeaderName::from_static("x-request-id"),
        ])
}
