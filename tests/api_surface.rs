//! Router-level tests over the in-memory store.

use std::sync::Arc;

use axum::{
    Extension,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header::CONTENT_TYPE},
};
use gardi::api::{ApiState, router};
use gardi::mfa::{
    MfaConfig, MfaCore,
    audit::TracingAuditLog,
    crypto::MasterKey,
    directory::NullDirectory,
    notify::RecordingNotifier,
    rate_limit::NoopRateLimiter,
    recovery_codes::Pepper,
    store::{MemoryStore, StoreHandles},
};
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

struct TestApp {
    app: axum::Router,
    notifier: Arc<RecordingNotifier>,
    user_id: Uuid,
    tenant_id: Uuid,
}

fn test_app() -> TestApp {
    let notifier = Arc::new(RecordingNotifier::new());
    let core = MfaCore::new(
        StoreHandles::from_memory(Arc::new(MemoryStore::new())),
        Arc::new(NullDirectory),
        notifier.clone(),
        Arc::new(TracingAuditLog),
        MasterKey::generate(),
        Pepper::generate(),
        MfaConfig::new(),
    );
    let state = Arc::new(ApiState::new(core, Arc::new(NoopRateLimiter), None));

    let (router, _openapi) = router().split_for_parts();
    TestApp {
        app: router.layer(Extension(state)),
        notifier,
        user_id: Uuid::new_v4(),
        tenant_id: Uuid::new_v4(),
    }
}

impl TestApp {
    fn request(&self, method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("x-gardi-user", self.user_id.to_string())
            .header("x-gardi-tenant", self.tenant_id.to_string())
            .header("x-gardi-roles", "member,admin");
        if body.is_some() {
            builder = builder.header(CONTENT_TYPE, "application/json");
        }
        builder
            .body(body.map_or_else(Body::empty, |value| Body::from(value.to_string())))
            .expect("request builds")
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self
            .app
            .clone()
            .oneshot(request)
            .await
            .expect("handler responds");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body reads");
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }
}

#[tokio::test]
async fn health_reports_the_memory_store() {
    let app = test_app();
    let request = Request::builder()
        .method("GET")
        .uri("/health")
        .body(Body::empty())
        .expect("request builds");
    let (status, body) = app.send(request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["store"], "memory");
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn missing_identity_headers_are_unauthorized() {
    let app = test_app();
    let request = Request::builder()
        .method("GET")
        .uri("/v1/mfa/methods")
        .body(Body::empty())
        .expect("request builds");
    let (status, _) = app.send(request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn sms_enrollment_and_challenge_over_http() {
    let app = test_app();

    // No factors yet: nothing gates the login.
    let (status, body) = app
        .send(app.request("GET", "/v1/mfa/methods", None))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["gate"], "not_required");

    // Enroll SMS.
    let (status, body) = app
        .send(app.request(
            "POST",
            "/v1/mfa/enroll/sms",
            Some(json!({ "phone": "+15550100123" })),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["factor_type"], "sms");
    assert!(body["code_expires_at"].is_string());

    let code = app.notifier.last_code().expect("code dispatched");
    let (status, body) = app
        .send(app.request("POST", "/v1/mfa/verify/sms", Some(json!({ "code": code }))))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["factor_type"], "sms");

    // The factor now gates the login.
    let (status, body) = app
        .send(app.request("GET", "/v1/mfa/methods", None))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["gate"], "challenge_required");
    assert_eq!(body["methods"], json!(["sms"]));

    // Issue and verify a login code.
    let (status, _) = app
        .send(app.request("POST", "/v1/mfa/send-code", Some(json!({ "method": "sms" }))))
        .await;
    assert_eq!(status, StatusCode::OK);

    let code = app.notifier.last_code().expect("login code dispatched");
    let (status, body) = app
        .send(app.request(
            "POST",
            "/v1/mfa/challenge",
            Some(json!({ "method": "sms", "code": code })),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["verified"], true);
    assert_eq!(body["used_recovery"], false);
}

#[tokio::test]
async fn wrong_login_code_maps_to_bad_request() {
    let app = test_app();

    app.send(app.request(
        "POST",
        "/v1/mfa/enroll/sms",
        Some(json!({ "phone": "+15550100123" })),
    ))
    .await;
    let code = app.notifier.last_code().expect("code dispatched");
    app.send(app.request("POST", "/v1/mfa/verify/sms", Some(json!({ "code": code }))))
        .await;
    app.send(app.request("POST", "/v1/mfa/send-code", Some(json!({ "method": "sms" }))))
        .await;

    let (status, body) = app
        .send(app.request(
            "POST",
            "/v1/mfa/challenge",
            Some(json!({ "method": "sms", "code": "0000000" })),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_code");
}

#[tokio::test]
async fn unknown_enroll_method_is_rejected() {
    let app = test_app();
    let (status, _) = app
        .send(app.request("POST", "/v1/mfa/enroll/webauthn", Some(json!({}))))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn policy_round_trips_for_admins() {
    let app = test_app();
    let path = format!("/v1/tenants/{}/mfa/policy", app.tenant_id);

    let (status, body) = app.send(app.request("GET", &path, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["grace_period_days"], 0);

    let (status, _) = app
        .send(app.request(
            "POST",
            &path,
            Some(json!({
                "required_for_roles": ["member"],
                "allowed_factor_types": ["totp"],
                "grace_period_days": 7,
                "enforced_from": null
            })),
        ))
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = app.send(app.request("GET", &path, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["grace_period_days"], 7);
    assert_eq!(body["allowed_factor_types"], json!(["totp"]));

    // The policy now routes this unenrolled user into enrollment.
    let (status, body) = app
        .send(app.request("GET", "/v1/mfa/methods", None))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["gate"], "enrollment_required");

    // Another tenant's policy is out of reach.
    let other = format!("/v1/tenants/{}/mfa/policy", Uuid::new_v4());
    let (status, _) = app.send(app.request("GET", &other, None)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}
