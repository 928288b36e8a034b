// SPDX-License-Identifier: MIT

//! Contact Gateway Service
//!
//! Serverless-style contact flow for a portfolio site, packaged as one
//! long-running process:
//!
//! - `POST /api/verify`: reCAPTCHA v3 verification with score, action and
//!   hostname policy plus per-IP rate limiting
//! - `POST /api/contact`: contact-form relay to EmailJS with bounded
//!   retry and backoff
//!
//! ## Configuration
//!
//! Everything comes from environment variables, read once at startup:
//!
//! - `BIND_ADDR`: server bind address (default: 0.0.0.0:8080)
//! - `APP_ENV`: `development` or `production` (default: development)
//! - `RECAPTCHA_SECRET_KEY`, `RECAPTCHA_MIN_SCORE`,
//!   `RECAPTCHA_ALLOWED_HOSTNAMES` (comma-separated)
//! - `EMAILJS_SERVICE_ID`, `EMAILJS_TEMPLATE_ID`, `EMAILJS_PUBLIC_KEY`,
//!   `EMAILJS_PRIVATE_KEY`
//! - `MAX_REQUESTS_PER_WINDOW`, `API_MAX_REQUESTS_PER_WINDOW`,
//!   `RATE_LIMIT_WINDOW_MS`
//! - `CORS_ALLOWED_ORIGIN`: specific origin, or unset for permissive
//!
//! Missing upstream credentials do not prevent startup; the affected
//! endpoint answers 500 until the operator supplies them.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use contact_gateway::{
    config::Config,
    handlers::{self, AppState},
    limiter::FixedWindowLimiter,
    mailer::{EmailJsTransport, MailRelay},
    recaptcha::{HttpSiteverify, VerificationGate},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    // Load configuration
    let config = Config::from_env();
    info!(
        bind_addr = %config.bind_addr,
        environment = ?config.environment,
        max_requests = config.rate_limit.max_requests,
        api_max_requests = config.rate_limit.api_max_requests,
        window_ms = config.rate_limit.window_ms,
        recaptcha_configured = config.recaptcha.secret_key.is_some(),
        email_configured = config.email.is_configured(),
        "Starting contact gateway"
    );

    let window = config.rate_limit.window_duration();
    let verify_limiter = Arc::new(FixedWindowLimiter::new(
        config.rate_limit.max_requests,
        window,
    ));
    let api_limiter = Arc::new(FixedWindowLimiter::new(
        config.rate_limit.api_max_requests,
        window,
    ));

    let siteverify = Arc::new(HttpSiteverify::new(config.recaptcha.verify_url.clone()));
    let gate = VerificationGate::new(
        config.recaptcha.clone(),
        config.environment,
        verify_limiter.clone(),
        siteverify,
    );

    let transport = Arc::new(EmailJsTransport::new(
        config.email.endpoint.clone(),
        config.email.timeout(),
    )?);
    let relay = MailRelay::new(config.email.clone(), transport);

    let state = Arc::new(AppState { gate, relay });

    // Spawn cleanup task for expired rate-limit windows
    let sweep_api = api_limiter.clone();
    let sweep_verify = verify_limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            sweep_api.cleanup().await;
            sweep_verify.cleanup().await;
        }
    });

    // Build router
    let app = handlers::router(state, api_limiter, config.cors_allowed_origin.as_deref())
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr: SocketAddr = config.bind_addr.parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %addr, "Server listening");

    axum::serve(listener, app).await?;

    Ok(())
}
