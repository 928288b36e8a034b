// SPDX-License-Identifier: MIT

//! HTTP handlers for the contact gateway.
//!
//! Two sibling endpoints: `/api/verify` (reCAPTCHA verification gate) and
//! `/api/contact` (mail relay), each with a `GET` info/liveness view and a
//! `POST` operation. In intended use a frontend calls the gate first and
//! only submits the contact form once the gate approves; the endpoints are
//! not chained server-side.

use crate::error::ApiError;
use crate::limiter::FixedWindowLimiter;
use crate::mailer::{ContactSubmission, MailRelay};
use crate::middleware::api_throttle;
use crate::recaptcha::VerificationGate;
use axum::{
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::from_fn_with_state,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use axum::extract::{rejection::JsonRejection, State};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;

/// Shared application state.
pub struct AppState {
    pub gate: VerificationGate,
    pub relay: MailRelay,
}

/// Verification request body.
#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    #[serde(rename = "recaptchaToken", default)]
    pub recaptcha_token: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
}

/// Verification response body.
#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
}

/// Contact request body. Fields are optional so presence failures surface
/// as our own 400 rather than a deserializer rejection.
#[derive(Debug, Deserialize)]
pub struct ContactRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Contact response body.
#[derive(Debug, Serialize)]
pub struct ContactResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

/// Endpoint info response.
#[derive(Debug, Serialize)]
pub struct InfoResponse {
    pub service: &'static str,
    pub method: &'static str,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub configured: Option<bool>,
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
}

/// Client identity for rate limiting: first `x-forwarded-for` entry, else
/// `x-real-ip`, else the `"unknown"` sentinel (callers behind no proxy all
/// share that bucket).
pub fn client_identity(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        })
        .unwrap_or("unknown")
        .to_string()
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "contact-gateway",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `POST /api/verify` — run the verification gate.
///
/// The body is deserialized by hand so a malformed or wrong-typed payload
/// (a numeric token, say) gets the same 400 envelope as a missing one
/// instead of the extractor's plain-text 422.
pub async fn verify(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<VerifyRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match payload {
        Ok(json) => json,
        Err(_) => {
            return verify_rejection(ApiError::BadRequest(
                "Missing or invalid recaptchaToken".to_string(),
            ));
        }
    };
    let identity = client_identity(&headers);

    match state
        .gate
        .verify(req.recaptcha_token.as_deref(), req.action.as_deref(), &identity)
        .await
    {
        Ok(allowed) => (
            StatusCode::OK,
            Json(VerifyResponse {
                allowed: true,
                score: allowed.score,
                action: allowed.action,
                hostname: allowed.hostname,
                reason: None,
                errors: None,
            }),
        )
            .into_response(),
        Err(err) => verify_rejection(err),
    }
}

fn verify_rejection(err: ApiError) -> Response {
    let status = err.status();
    let errors = match &err {
        ApiError::VerificationDenied { errors, .. } => errors.clone(),
        _ => None,
    };
    let body = VerifyResponse {
        allowed: false,
        score: None,
        action: None,
        hostname: None,
        reason: Some(err.to_string()),
        errors,
    };
    with_retry_after((status, Json(body)).into_response(), &err)
}

/// `GET /api/verify` — endpoint info. Reads nothing mutable.
pub async fn verify_info(State(state): State<Arc<AppState>>) -> Json<InfoResponse> {
    Json(InfoResponse {
        service: "reCAPTCHA v3 Verification API",
        method: "POST only",
        status: "operational",
        configured: Some(state.gate.is_configured()),
    })
}

/// `POST /api/contact` — validate and relay a submission.
pub async fn contact(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ContactRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match payload {
        Ok(json) => json,
        Err(_) => {
            return contact_rejection(ApiError::BadRequest(
                "Missing required fields".to_string(),
            ));
        }
    };
    let submission = ContactSubmission {
        name: req.name.unwrap_or_default(),
        email: req.email.unwrap_or_default(),
        message: req.message.unwrap_or_default(),
    };

    match state.relay.dispatch(&submission).await {
        Ok(()) => (
            StatusCode::OK,
            Json(ContactResponse {
                success: true,
                message: Some("Email sent successfully"),
                error: None,
                details: None,
                retryable: None,
            }),
        )
            .into_response(),
        Err(err) => contact_rejection(err),
    }
}

fn contact_rejection(err: ApiError) -> Response {
    let status = err.status();
    let details = match &err {
        ApiError::UpstreamRejected { details, .. } if !details.is_empty() => {
            Some(details.clone())
        }
        _ => None,
    };
    let retryable = matches!(err, ApiError::Transport { .. }).then_some(true);
    let body = ContactResponse {
        success: false,
        message: None,
        error: Some(err.to_string()),
        details,
        retryable,
    };
    with_retry_after((status, Json(body)).into_response(), &err)
}

/// `GET /api/contact` — endpoint info including configuration state.
pub async fn contact_info(State(state): State<Arc<AppState>>) -> Json<InfoResponse> {
    Json(InfoResponse {
        service: "Server-Side Email Sending API",
        method: "POST only",
        status: "operational",
        configured: Some(state.relay.is_configured()),
    })
}

fn with_retry_after(mut response: Response, err: &ApiError) -> Response {
    if let Some(secs) = err.retry_after_secs() {
        if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
    }
    response
}

/// Assemble the full HTTP surface: API routes behind the outer throttle,
/// health endpoints outside it, CORS for browser callers.
pub fn router(
    state: Arc<AppState>,
    api_limiter: Arc<FixedWindowLimiter>,
    cors_allowed_origin: Option<&str>,
) -> Router {
    let cors = match cors_allowed_origin {
        Some(origin) => match origin.parse::<HeaderValue>() {
            Ok(value) => CorsLayer::new()
                .allow_origin(value)
                .allow_methods([
                    axum::http::Method::GET,
                    axum::http::Method::POST,
                    axum::http::Method::OPTIONS,
                ])
                .allow_headers([header::CONTENT_TYPE]),
            Err(_) => {
                warn!(origin, "invalid CORS_ALLOWED_ORIGIN, falling back to permissive");
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any)
            }
        },
        None => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    };

    let api = Router::new()
        .route("/verify", get(verify_info).post(verify))
        .route("/contact", get(contact_info).post(contact))
        .layer(from_fn_with_state(api_limiter, api_throttle));

    Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
        .nest("/api", api)
        .layer(cors)
        .with_state(state)
}
