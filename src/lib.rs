// SPDX-License-Identifier: MIT

//! Contact API Gateway
//!
//! This crate fronts a portfolio site's contact flow with two small
//! endpoints:
//!
//! - `/api/verify` — reCAPTCHA v3 token verification: score threshold,
//!   action match with an allow-list, hostname allow-list (blocking in
//!   production, advisory in development), per-IP fixed-window rate
//!   limiting
//! - `/api/contact` — contact-form relay to EmailJS with bounded retry,
//!   exponential backoff, transport error classification, and an
//!   IPv4-forced fallback client
//!
//! A coarser fixed-window limiter covers the whole `/api` prefix; the two
//! limiter layers compose. All state is per-process and in-memory.

pub mod clock;
pub mod config;
pub mod error;
pub mod handlers;
pub mod limiter;
pub mod mailer;
pub mod middleware;
pub mod recaptcha;
pub mod retry;

pub use config::Config;
pub use error::{ApiError, TransportErrorKind};
pub use limiter::{FixedWindowLimiter, RateLimitResult};
pub use mailer::{ContactSubmission, MailRelay};
pub use recaptcha::{VerificationGate, VerifyAllowed};
pub use retry::{retry_with_backoff, RetryPolicy};
