//! HTTP surface tests, driven through the router without binding a socket.

use super::TestHarness;
use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use credential_verifier::http::router;
use credential_verifier::storage::LogStore;
use credential_verifier::{
    Access, AuthorityReader, BackendKind, CredentialRecord, CredentialStatus, VerificationCache,
    VerificationDecision, VerificationEngine,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.expect("request failed");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    let body = serde_json::from_slice(&bytes).expect("JSON body");
    (status, body)
}

fn verify_request(body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/verify")
        .header(header::CONTENT_TYPE, "application/json")
        .body(body.into())
        .expect("request")
}

fn app(harness: &TestHarness) -> Router {
    router(harness.engine(), "*").expect("router")
}

#[tokio::test]
async fn test_health() {
    let harness = TestHarness::setup(BackendKind::Log);
    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .expect("request");

    let (status, body) = send(app(&harness), request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "ok", "worker": "worker-1" }));
    assert_eq!(harness.stored_len(), 0);
}

#[tokio::test]
async fn test_verify_valid_credential() {
    let harness = TestHarness::setup(BackendKind::Indexed);
    harness.issue(CredentialRecord::new("cred-1", "Acme University"));

    let (status, body) = send(
        app(&harness),
        verify_request(json!({ "id": "cred-1", "holder": "ignored" }).to_string()),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], json!(true));
    assert_eq!(body["worker"], json!("worker-1"));
    assert_eq!(body["status"], json!("valid"));
    assert_eq!(body["issuer"], json!("Acme University"));
    assert!(body["timestamp"].as_str().expect("timestamp").ends_with('Z'));
}

#[tokio::test]
async fn test_verify_replays_timestamp() {
    let harness = TestHarness::setup(BackendKind::Log);
    harness.issue(CredentialRecord::new("cred-1", "Acme"));

    let (_, first) = send(app(&harness), verify_request(r#"{"id":"cred-1"}"#)).await;
    let (_, second) = send(app(&harness), verify_request(r#"{"id":"cred-1"}"#)).await;

    assert_eq!(first["timestamp"], second["timestamp"]);
    assert_eq!(harness.authority_reads(), 1);
}

#[tokio::test]
async fn test_verify_unknown_credential() {
    let harness = TestHarness::setup(BackendKind::Log);

    let (status, body) = send(app(&harness), verify_request(r#"{"id":"cred-404"}"#)).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(
        body,
        json!({
            "valid": false,
            "message": "Credential not found",
            "worker": "worker-1",
        })
    );
    assert_eq!(harness.stored_len(), 1);
}

#[tokio::test]
async fn test_verify_revoked_credential() {
    let harness = TestHarness::setup(BackendKind::Log);
    harness.issue(CredentialRecord::new("cred-2", "Acme").with_status(CredentialStatus::Revoked));

    let (status, body) = send(app(&harness), verify_request(r#"{"id":"cred-2"}"#)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], json!(false));
    assert_eq!(body["status"], json!("revoked"));
}

#[tokio::test]
async fn test_verify_rejects_bad_bodies() {
    let harness = TestHarness::setup(BackendKind::Log);
    let bodies = [
        r#"{"holder":"nobody"}"#,
        r#"{"id":42}"#,
        r#"{"id":""}"#,
        "{ not json",
        "",
    ];

    for raw in bodies {
        let (status, body) = send(app(&harness), verify_request(raw)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "body {raw:?}");
        assert_eq!(
            body,
            json!({ "error": "Invalid credential format. Must include an id field." })
        );
    }
    assert_eq!(harness.authority_reads(), 0);
    assert_eq!(harness.stored_len(), 0);
}

#[tokio::test]
async fn test_verify_storage_failure_is_internal_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, b"").expect("blocker file");
    let engine = VerificationEngine::new(
        VerificationCache::new(
            Arc::new(LogStore::<VerificationDecision>::new(
                blocker.join("verifications.json"),
                Access::ReadWrite,
            )),
            16,
            Duration::from_secs(5),
        ),
        AuthorityReader::new(
            Arc::new(LogStore::<CredentialRecord>::new(
                dir.path().join("credentials.json"),
                Access::ReadOnly,
            )),
            Duration::from_secs(5),
        ),
        "worker-1",
    );
    let app = router(Arc::new(engine), "https://wallet.example").expect("router");

    let (status, body) = send(app, verify_request(r#"{"id":"cred-1"}"#)).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({ "error": "Internal server error" }));
}

#[test]
fn test_router_rejects_bad_cors_origin() {
    let harness = TestHarness::setup(BackendKind::Log);
    assert!(router(harness.engine(), "bad\norigin").is_err());
}
