// SPDX-License-Identifier: MIT

//! Outer traffic shaping for the `/api` prefix.
//!
//! A second, coarser fixed-window limiter sits in front of every API route
//! and composes with the per-endpoint limiter inside the verification
//! gate: a request must pass both. Every API response is also stamped with
//! security headers and cache suppression, since nothing served here may
//! be cached by intermediaries.

use crate::handlers::client_identity;
use crate::limiter::{FixedWindowLimiter, RateLimitResult};
use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

/// Envelope for an outer-layer rejection.
#[derive(Debug, Serialize)]
struct ThrottleResponse {
    allowed: bool,
    reason: String,
    error: &'static str,
}

/// Rate limit + header middleware for API routes.
///
/// Only `POST` consumes quota: the `GET` info views are liveness probes
/// and must never mutate rate-limit state.
pub async fn api_throttle(
    State(limiter): State<Arc<FixedWindowLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    if request.method() != Method::POST {
        let mut response = next.run(request).await;
        apply_common_headers(&mut response);
        return response;
    }

    let identity = client_identity(request.headers());

    match limiter.check(&identity).await {
        RateLimitResult::Limited { reason, retry_after } => {
            warn!(
                target: "abuse",
                identity,
                path = %request.uri().path(),
                "API rate limit exceeded"
            );

            let retry_secs = (retry_after.as_secs_f64().ceil() as u64).max(1);
            let mut response = (
                StatusCode::TOO_MANY_REQUESTS,
                Json(ThrottleResponse {
                    allowed: false,
                    reason,
                    error: "Too Many Requests",
                }),
            )
                .into_response();

            let headers = response.headers_mut();
            if let Ok(value) = HeaderValue::from_str(&retry_secs.to_string()) {
                headers.insert(header::RETRY_AFTER, value);
            }
            if let Ok(value) = HeaderValue::from_str(&limiter.max_requests().to_string()) {
                headers.insert("x-ratelimit-limit", value);
            }
            headers.insert("x-ratelimit-remaining", HeaderValue::from_static("0"));
            if let Ok(value) = HeaderValue::from_str(&window_reset_timestamp(&limiter)) {
                headers.insert("x-ratelimit-reset", value);
            }

            apply_common_headers(&mut response);
            response
        }
        RateLimitResult::Allowed { .. } => {
            let mut response = next.run(request).await;
            apply_common_headers(&mut response);
            response
        }
    }
}

/// Wall-clock timestamp of the next window boundary, for the
/// `X-RateLimit-Reset` header.
fn window_reset_timestamp(limiter: &FixedWindowLimiter) -> String {
    let window = chrono::Duration::from_std(limiter.window())
        .unwrap_or_else(|_| chrono::Duration::seconds(60));
    (Utc::now() + window).to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn apply_common_headers(response: &mut Response) {
    let headers = response.headers_mut();
    headers.insert("x-content-type-options", HeaderValue::from_static("nosniff"));
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "referrer-policy",
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-store, no-cache, must-revalidate, proxy-revalidate"),
    );
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(header::EXPIRES, HeaderValue::from_static("0"));
}
