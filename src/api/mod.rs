use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use subtle::ConstantTimeEq;

use crate::AppState;

pub mod callback;
pub mod handlers;
pub mod render;

/// Build the Management API router.
/// All routes are relative; the caller mounts this under `/api/v1`.
pub fn api_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/workflows",
            get(handlers::list_workflows).post(handlers::create_workflow),
        )
        .route(
            "/workflows/:id",
            get(handlers::get_workflow)
                .put(handlers::update_workflow)
                .delete(handlers::delete_workflow),
        )
        .route("/workflows/:id/reorder", post(handlers::reorder_workflow))
        .route("/requests/submitted", post(handlers::submit_request))
        .route("/requests/:id", get(handlers::get_request))
        .route(
            "/requests/:id/approvals",
            get(handlers::list_request_approvals),
        )
        .route("/requests/:id/audit", get(handlers::list_request_audit))
        .route("/approvals", get(handlers::list_pending_approvals))
        .route("/approvals/sweep", post(handlers::run_sweep))
        .layer(middleware::from_fn_with_state(state, admin_auth))
        .fallback(fallback_404)
}

/// Routes reachable without credentials.
pub fn public_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/approvals/callback", get(callback::process_approval))
        // links already sent by the previous deployment point here
        .route(
            "/functions/v1/process-approval",
            get(callback::process_approval),
        )
}

async fn fallback_404() -> StatusCode {
    StatusCode::NOT_FOUND
}

/// Middleware: validates `X-Admin-Key` (or a bearer token) against the
/// configured admin key. Without a configured key every call is refused.
async fn admin_auth(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let provided_key = req
        .headers()
        .get("x-admin-key")
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            req.headers()
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(|t| t.trim())
        });

    let Some(expected) = state.admin_key.as_deref() else {
        tracing::warn!("admin API: APPROVALS_ADMIN_KEY is not set, refusing request");
        return Err(StatusCode::UNAUTHORIZED);
    };

    match provided_key {
        Some(k) if bool::from(k.as_bytes().ct_eq(expected.as_bytes())) => Ok(next.run(req).await),
        Some(k) => {
            // never log the expected key or the full provided key
            let masked = if k.len() > 8 {
                format!("{}…{}", &k[..4], &k[k.len() - 4..])
            } else {
                "****".to_string()
            };
            tracing::warn!("admin API: invalid key (provided: '{}')", masked);
            Err(StatusCode::UNAUTHORIZED)
        }
        None => {
            tracing::warn!("admin API: missing X-Admin-Key header");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}
