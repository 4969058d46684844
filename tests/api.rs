//! HTTP surface tests: the full router over `MemoryStore`, driven with
//! `tower::ServiceExt::oneshot`.

mod common;

use std::sync::Arc;

use approvals::api::render::OutcomePages;
use approvals::{build_router, AppState};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use tower::ServiceExt;

const ADMIN_KEY: &str = "test-admin-key-0123456789";

struct TestApp {
    router: Router,
    h: common::Harness,
}

fn app() -> TestApp {
    let h = common::harness();
    let state = Arc::new(AppState {
        engine: h.engine.clone(),
        pages: OutcomePages::new().unwrap(),
        admin_key: Some(ADMIN_KEY.to_string()),
    });
    TestApp {
        router: build_router(state),
        h,
    }
}

async fn send(router: &Router, req: Request<Body>) -> (StatusCode, axum::http::HeaderMap, String) {
    let resp = router.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let headers = resp.headers().clone();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, headers, String::from_utf8(bytes.to_vec()).unwrap())
}

fn admin(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-admin-key", ADMIN_KEY);
    match body {
        Some(b) => builder
            .header("content-type", "application/json")
            .body(Body::from(b.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn plumbing_workflow() -> Value {
    json!({
        "name": "Plumbing approvals",
        "category": "plumbing",
        "steps": [
            { "approver_name": "Alice", "approver_email": "alice@example.com" },
            { "approver_name": "Bob", "approver_email": "bob@example.com", "timeout_hours": 24 }
        ]
    })
}

mod health {
    use super::*;

    #[tokio::test]
    async fn test_healthz_carries_security_headers() {
        let app = app();
        let (status, headers, body) = send(&app.router, get("/healthz")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
        assert!(headers.contains_key("x-request-id"));
        assert_eq!(headers["referrer-policy"], "no-referrer");
        assert_eq!(headers["x-content-type-options"], "nosniff");
        assert_eq!(headers["cache-control"], "no-store");
    }

    #[tokio::test]
    async fn test_metrics_endpoint_is_public() {
        let app = app();
        let (status, _, _) = send(&app.router, get("/metrics")).await;
        assert_eq!(status, StatusCode::OK);
    }
}

mod admin_auth {
    use super::*;

    #[tokio::test]
    async fn test_management_api_requires_key() {
        let app = app();

        let (status, _, _) = send(&app.router, get("/api/v1/workflows")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let wrong = Request::builder()
            .uri("/api/v1/workflows")
            .header("x-admin-key", "wrong-key-value")
            .body(Body::empty())
            .unwrap();
        let (status, _, _) = send(&app.router, wrong).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let bearer = Request::builder()
            .uri("/api/v1/workflows")
            .header("authorization", format!("Bearer {}", ADMIN_KEY))
            .body(Body::empty())
            .unwrap();
        let (status, _, body) = send(&app.router, bearer).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "[]");
    }

    #[tokio::test]
    async fn test_unset_admin_key_locks_management_api() {
        let h = common::harness();
        let router = build_router(Arc::new(AppState {
            engine: h.engine.clone(),
            pages: OutcomePages::new().unwrap(),
            admin_key: None,
        }));
        let (status, _, _) = send(&router, admin("GET", "/api/v1/workflows", None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}

mod workflows {
    use super::*;

    #[tokio::test]
    async fn test_create_numbers_steps_densely() {
        let app = app();
        let (status, _, body) = send(
            &app.router,
            admin("POST", "/api/v1/workflows", Some(plumbing_workflow())),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let wf: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(wf["revision"], 1);
        assert_eq!(wf["steps"][0]["step_order"], 1);
        assert_eq!(wf["steps"][1]["step_order"], 2);
        assert_eq!(wf["steps"][1]["timeout_hours"], 24);
        assert_eq!(wf["steps"][0]["required_role"], "manager");
    }

    #[tokio::test]
    async fn test_create_rejects_bad_email() {
        let app = app();
        let payload = json!({
            "name": "Broken",
            "steps": [{ "approver_name": "X", "approver_email": "not-an-email" }]
        });
        let (status, _, body) =
            send(&app.router, admin("POST", "/api/v1/workflows", Some(payload))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let err: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(err["error"]["code"], "bad_request");
    }

    #[tokio::test]
    async fn test_update_reorder_and_archive() {
        let app = app();
        let (_, _, body) = send(
            &app.router,
            admin("POST", "/api/v1/workflows", Some(plumbing_workflow())),
        )
        .await;
        let wf: Value = serde_json::from_str(&body).unwrap();
        let id = wf["id"].as_str().unwrap().to_string();

        let (status, _, body) = send(
            &app.router,
            admin(
                "POST",
                &format!("/api/v1/workflows/{}/reorder", id),
                Some(json!({ "order": [2, 1] })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let wf: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(wf["revision"], 2);
        assert_eq!(wf["steps"][0]["approver_name"], "Bob");
        assert_eq!(wf["steps"][0]["step_order"], 1);
        assert_eq!(wf["steps"][1]["approver_name"], "Alice");

        let (status, _, _) = send(
            &app.router,
            admin(
                "POST",
                &format!("/api/v1/workflows/{}/reorder", id),
                Some(json!({ "order": [1, 1] })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let mut edited = plumbing_workflow();
        edited["name"] = json!("Plumbing (edited)");
        let (status, _, body) = send(
            &app.router,
            admin("PUT", &format!("/api/v1/workflows/{}", id), Some(edited)),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let wf: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(wf["revision"], 3);
        assert_eq!(wf["name"], "Plumbing (edited)");

        let (status, _, _) = send(
            &app.router,
            admin("DELETE", &format!("/api/v1/workflows/{}", id), None),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _, _) = send(
            &app.router,
            admin("GET", &format!("/api/v1/workflows/{}", id), None),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_reorder_does_not_overwrite_a_newer_edit() {
        use approvals::models::workflow::reorder_steps;
        use approvals::store::{ApprovalStore, StoreError};

        let app = app();
        let wf = app.h.two_step_workflow().await;
        let stale = app.h.store.get_workflow(wf.id).await.unwrap().unwrap();

        // an edit lands between the reorder's read and its write
        let edited = common::workflow(
            "Plumbing approvals",
            Some("plumbing"),
            vec![common::step("Carol"), common::step("Dan"), common::step("Eve")],
        );
        app.h
            .store
            .update_workflow(wf.id, &edited)
            .await
            .unwrap()
            .unwrap();

        let steps = reorder_steps(&stale.steps, &[2, 1], stale.revision + 1).unwrap();
        let err = app
            .h
            .store
            .replace_steps(wf.id, stale.revision, steps)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        let current = app.h.store.get_workflow(wf.id).await.unwrap().unwrap();
        assert_eq!(current.revision, 2);
        let names: Vec<_> = current.steps.iter().map(|s| s.approver_name.as_str()).collect();
        assert_eq!(names, vec!["Carol", "Dan", "Eve"]);

        // a reorder against the fresh revision still goes through
        let (status, _, body) = send(
            &app.router,
            admin(
                "POST",
                &format!("/api/v1/workflows/{}/reorder", wf.id),
                Some(json!({ "order": [3, 1, 2] })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let wf: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(wf["revision"], 3);
        assert_eq!(wf["steps"][0]["approver_name"], "Eve");
    }
}

mod requests {
    use super::*;

    async fn submit(app: &TestApp, id: &str, category: &str) -> (StatusCode, Value) {
        let (status, _, body) = send(
            &app.router,
            admin(
                "POST",
                "/api/v1/requests/submitted",
                Some(json!({ "id": id, "title": "Leaking pipe", "category": category })),
            ),
        )
        .await;
        (status, serde_json::from_str(&body).unwrap())
    }

    #[tokio::test]
    async fn test_submit_reports_policy_and_conflicts_on_repeat() {
        let app = app();
        send(
            &app.router,
            admin("POST", "/api/v1/workflows", Some(plumbing_workflow())),
        )
        .await;
        let id = uuid::Uuid::new_v4().to_string();

        let (status, report) = submit(&app, &id, "plumbing").await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(report["policy"], "workflow_matched");
        assert_eq!(report["approvals_created"], 2);
        assert_eq!(report["stage"], "awaiting-approval");

        let (status, err) = submit(&app, &id, "plumbing").await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(err["error"]["code"], "conflict");

        let (status, _, body) = send(
            &app.router,
            admin("GET", &format!("/api/v1/requests/{}/approvals", id), None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let approvals: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(approvals.as_array().unwrap().len(), 2);
        assert!(approvals[0].get("token_hash").is_none());
    }

    #[tokio::test]
    async fn test_unmatched_request_is_ready_immediately() {
        let app = app();
        let id = uuid::Uuid::new_v4().to_string();
        let (status, report) = submit(&app, &id, "electrical").await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(report["policy"], "no_workflow_auto_approved");
        assert_eq!(report["stage"], "ready-for-execution");

        let (_, _, body) = send(
            &app.router,
            admin("GET", &format!("/api/v1/requests/{}", id), None),
        )
        .await;
        let request: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(request["stage"], "ready-for-execution");
        assert_eq!(request["status_label"], "Assigned");
        assert_eq!(request["workflow_stage"], "assigned");
    }

    #[tokio::test]
    async fn test_unknown_request_is_404() {
        let app = app();
        let (status, _, _) = send(
            &app.router,
            admin(
                "GET",
                &format!("/api/v1/requests/{}", uuid::Uuid::new_v4()),
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}

mod callback {
    use super::*;

    async fn setup(app: &TestApp) -> (uuid::Uuid, Vec<approvals::notification::ApprovalNotice>) {
        app.h.two_step_workflow().await;
        let (report, notices) = app
            .h
            .submit(common::submission("Leaking <pipe>", Some("plumbing")))
            .await;
        (report.request_id, notices)
    }

    fn path_of(url: &str) -> String {
        let parsed = url::Url::parse(url).unwrap();
        format!("{}?{}", parsed.path(), parsed.query().unwrap())
    }

    #[tokio::test]
    async fn test_approve_link_round_trip() {
        let app = app();
        let (request_id, notices) = setup(&app).await;

        let (status, headers, body) = send(&app.router, get(&path_of(&notices[0].approve_url))).await;
        assert_eq!(status, StatusCode::OK);
        assert!(headers["content-type"].to_str().unwrap().starts_with("text/html"));
        assert!(body.contains("Request approved"));
        // title is escaped in the page
        assert!(body.contains("Leaking &lt;pipe&gt;"));

        let (status, _, body) = send(&app.router, get(&path_of(&notices[0].approve_url))).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("Already processed"));

        let (_, _, body) = send(
            &app.router,
            admin("GET", &format!("/api/v1/requests/{}/audit", request_id), None),
        )
        .await;
        let audit: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(audit.as_array().unwrap().len(), 1);
        assert_eq!(audit[0]["action"], "approved");
    }

    #[tokio::test]
    async fn test_legacy_path_and_forwarded_ip() {
        let app = app();
        let (request_id, notices) = setup(&app).await;
        let uri = format!(
            "/functions/v1/process-approval?token={}&action=reject&reason=too%20costly",
            notices[1].approval_token
        );
        let req = Request::builder()
            .uri(uri)
            .header("x-forwarded-for", "198.51.100.4, 10.0.0.1")
            .header("user-agent", "Outlook")
            .body(Body::empty())
            .unwrap();
        let (status, _, body) = send(&app.router, req).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("Request rejected"));
        assert!(body.contains("too costly"));

        let records = app.h.approvals(request_id).await;
        assert_eq!(records[1].ip_address.as_deref(), Some("198.51.100.4"));
        assert_eq!(records[1].user_agent.as_deref(), Some("Outlook"));

        let (_, _, body) = send(
            &app.router,
            admin("GET", &format!("/api/v1/requests/{}", request_id), None),
        )
        .await;
        let request: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(request["stage"], "rejected");
        assert_eq!(request["status_label"], "Rejected");
        assert_eq!(request["workflow_stage"], "cancelled");
    }

    #[tokio::test]
    async fn test_status_codes_for_bad_links() {
        let app = app();
        let (_, notices) = setup(&app).await;

        let (status, _, _) = send(&app.router, get("/approvals/callback")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _, _) = send(
            &app.router,
            get(&format!(
                "/approvals/callback?token={}",
                notices[0].approval_token
            )),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _, body) = send(
            &app.router,
            get("/approvals/callback?token=forged&action=approve"),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body.contains("not valid"));
    }

    #[tokio::test]
    async fn test_malformed_query_gets_outcome_page() {
        let app = app();
        let (request_id, notices) = setup(&app).await;
        let token = &notices[0].approval_token;

        let (status, headers, body) = send(
            &app.router,
            get(&format!(
                "/approvals/callback?token={}&token={}&action=approve",
                token, token
            )),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(headers["content-type"].to_str().unwrap().starts_with("text/html"));
        assert!(body.contains("<!DOCTYPE html>"));

        let records = app.h.approvals(request_id).await;
        assert_eq!(records[0].status.to_string(), "pending");
    }

    #[tokio::test]
    async fn test_expired_link_is_gone() {
        let app = app();
        let (request_id, notices) = setup(&app).await;
        let records = app.h.approvals(request_id).await;
        app.h
            .store
            .set_token_expiry(records[0].id, Utc::now() - Duration::hours(1))
            .await;

        let (status, _, body) = send(&app.router, get(&path_of(&notices[0].approve_url))).await;
        assert_eq!(status, StatusCode::GONE);
        assert!(body.contains("Link expired"));
    }

    #[tokio::test]
    async fn test_sweep_endpoint() {
        let app = app();
        let (request_id, _) = setup(&app).await;
        let records = app.h.approvals(request_id).await;
        app.h
            .store
            .set_token_expiry(records[0].id, Utc::now() - Duration::hours(1))
            .await;

        let (status, _, body) = send(&app.router, admin("POST", "/api/v1/approvals/sweep", None)).await;
        assert_eq!(status, StatusCode::OK);
        let report: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(report["records_expired"], 1);

        let (_, _, body) = send(&app.router, admin("GET", "/api/v1/approvals", None)).await;
        let pending: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(pending.as_array().unwrap().len(), 1);
    }
}
