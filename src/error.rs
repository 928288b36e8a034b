// SPDX-License-Identifier: MIT

//! Error taxonomy for the gateway.
//!
//! Every variant maps to a stable HTTP status and a safe, non-leaking
//! message. Handlers render these into the per-endpoint JSON envelopes;
//! nothing here is fatal to the process.

use axum::http::StatusCode;
use thiserror::Error;

/// Classified transport-level failure to an upstream service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Peer closed the connection mid-flight
    ConnectionReset,
    /// Request exceeded the socket timeout
    Timeout,
    /// DNS resolution or TCP connect failed
    Unreachable,
    /// Anything else network-shaped
    Other,
}

impl TransportErrorKind {
    /// User-facing message for the exhausted-retries response.
    pub fn user_message(self) -> &'static str {
        match self {
            Self::ConnectionReset => "Connection interrupted while sending email. Please try again.",
            Self::Timeout => "Request timed out while contacting the email service.",
            Self::Unreachable => "Could not reach email service.",
            Self::Other => "Failed to connect to email service.",
        }
    }
}

/// Gateway error taxonomy.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Required credentials are unset; the operator must fix this
    #[error("Server configuration error")]
    ServerMisconfigured,

    /// Either rate limit layer rejected the request
    #[error("{reason}")]
    RateLimited { reason: String, retry_after_secs: u64 },

    /// Caller-correctable input problem
    #[error("{0}")]
    BadRequest(String),

    /// The verification provider declined the token (policy outcome,
    /// not a transport fault)
    #[error("{reason}")]
    VerificationDenied {
        reason: String,
        errors: Option<Vec<String>>,
    },

    /// Token was presented from a hostname outside the allow-list
    #[error("Unauthorized domain")]
    UnauthorizedDomain { hostname: String },

    /// The mail provider answered with a non-2xx application status;
    /// passed through untried
    #[error("Failed to send email")]
    UpstreamRejected { status: u16, details: String },

    /// Transport retries exhausted against the mail provider
    #[error("{}", .kind.user_message())]
    Transport { kind: TransportErrorKind },

    /// Catch-all boundary error
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::ServerMisconfigured | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::BadRequest(_) | Self::VerificationDenied { .. } => StatusCode::BAD_REQUEST,
            Self::UnauthorizedDomain { .. } => StatusCode::FORBIDDEN,
            Self::UpstreamRejected { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Self::Transport { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// `Retry-After` header value, where one applies.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_secs, .. } => Some(*retry_after_secs),
            Self::Transport { .. } => Some(30),
            _ => None,
        }
    }

    /// Whether the caller may usefully retry the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::RateLimited { .. })
    }
}
