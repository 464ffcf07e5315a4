//! HTTP transport for the verification engine.
//!
//! - `POST /verify` with `{ "id": "..." }` runs [`VerificationEngine::verify`]
//! - `GET /health` reports liveness without touching any store
//!
//! Body fields other than `id` are accepted and ignored.

use crate::error::{Error, Result};
use crate::record::VerificationDecision;
use crate::verification::VerificationEngine;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::SecondsFormat;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

const INVALID_CREDENTIAL_FORMAT: &str = "Invalid credential format. Must include an id field.";
const INTERNAL_ERROR: &str = "Internal server error";

/// `200` body for a credential the authority knows about.
#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    /// Whether the credential is valid.
    pub valid: bool,
    /// Worker that made the decision.
    pub worker: String,
    /// When the decision was made (ISO 8601).
    pub timestamp: String,
    /// Authority status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Credential issuer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
}

/// `404` body for an unknown credential.
#[derive(Debug, Serialize)]
pub struct NotFoundResponse {
    /// Always false.
    pub valid: bool,
    /// Why the credential was rejected.
    pub message: String,
    /// Worker that made the decision.
    pub worker: String,
}

/// `400`/`500` body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error description.
    pub error: String,
}

/// `GET /health` body.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"`.
    pub status: &'static str,
    /// This process's worker id.
    pub worker: String,
}

impl From<VerificationDecision> for VerifyResponse {
    fn from(decision: VerificationDecision) -> Self {
        Self {
            valid: decision.is_valid,
            worker: decision.verified_by,
            timestamp: decision
                .verified_at
                .to_rfc3339_opts(SecondsFormat::Millis, true),
            status: Some(decision.status.as_str().to_string()),
            issuer: decision.issuer,
        }
    }
}

/// Build the service router.
///
/// # Errors
///
/// Returns [`Error::Config`] if `cors_origin` is not a valid header value.
pub fn router(engine: Arc<VerificationEngine>, cors_origin: &str) -> Result<Router> {
    let origin = if cors_origin == "*" {
        AllowOrigin::any()
    } else {
        let value = HeaderValue::from_str(cors_origin)
            .map_err(|e| Error::Config(format!("invalid CORS origin {cors_origin:?}: {e}")))?;
        AllowOrigin::exact(value)
    };
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Ok(Router::new()
        .route("/verify", post(verify))
        .route("/health", get(health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(engine))
}

async fn verify(
    State(engine): State<Arc<VerificationEngine>>,
    body: std::result::Result<Json<Value>, JsonRejection>,
) -> Response {
    let id = match &body {
        Ok(Json(value)) => value.get("id").and_then(Value::as_str),
        Err(rejection) => {
            warn!("[{}] Rejected verify body: {rejection}", engine.worker_id());
            None
        }
    };
    let Some(id) = id else {
        return bad_request();
    };

    match engine.verify(id).await {
        Ok(decision) if decision.is_not_found() => {
            let body = NotFoundResponse {
                valid: false,
                message: decision
                    .reason
                    .unwrap_or_else(|| crate::record::REASON_NOT_FOUND.to_string()),
                worker: engine.worker_id().to_string(),
            };
            (StatusCode::NOT_FOUND, Json(body)).into_response()
        }
        Ok(decision) => (StatusCode::OK, Json(VerifyResponse::from(decision))).into_response(),
        Err(Error::InvalidRequest(_)) => bad_request(),
        Err(e) => {
            error!("[{}] Error verifying credential: {e}", engine.worker_id());
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: INTERNAL_ERROR.to_string(),
                }),
            )
                .into_response()
        }
    }
}

async fn health(State(engine): State<Arc<VerificationEngine>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        worker: engine.worker_id().to_string(),
    })
}

fn bad_request() -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: INVALID_CREDENTIAL_FORMAT.to_string(),
        }),
    )
        .into_response()
}
