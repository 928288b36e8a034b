// SPDX-License-Identifier: MIT

//! reCAPTCHA v3 verification gate.
//!
//! Decides whether a client-submitted token represents a likely-human
//! action. The pipeline is linear: configuration check, rate limit, token
//! presence, one siteverify call (never retried; tokens are single-use),
//! then the policy checks: success flag, score threshold, action match and
//! allow-list, hostname allow-list. The hostname check only blocks in
//! production; development deployments log and proceed.
//!
//! Every rejection is logged with the client identity and reason, never
//! with the raw token or secret.

use crate::config::{Environment, RecaptchaConfig};
use crate::error::ApiError;
use crate::limiter::{FixedWindowLimiter, RateLimitResult};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

/// Actions the frontend is known to emit with its tokens.
const ALLOWED_ACTIONS: &[&str] = &["submit", "contact"];

/// Siteverify error code that in practice means the site key is not
/// registered for the domain serving the widget.
const DOMAIN_MISMATCH_CODE: &str = "browser-error";

/// Wire format of the siteverify response.
#[derive(Debug, Clone, Deserialize)]
pub struct SiteverifyResponse {
    pub success: bool,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub challenge_ts: Option<String>,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(rename = "error-codes", default)]
    pub error_codes: Option<Vec<String>>,
}

/// Failure talking to the siteverify endpoint.
#[derive(Debug, Error)]
pub enum SiteverifyError {
    #[error("siteverify returned status {0}")]
    Status(u16),
    #[error("siteverify transport error: {0}")]
    Transport(String),
}

/// Upstream verification provider. A trait seam so tests can substitute
/// a recording fake.
#[async_trait]
pub trait Siteverify: Send + Sync {
    async fn verify(
        &self,
        secret: &str,
        token: &str,
    ) -> Result<SiteverifyResponse, SiteverifyError>;
}

/// Production siteverify client (form-encoded POST over HTTPS).
pub struct HttpSiteverify {
    client: reqwest::Client,
    url: String,
}

impl HttpSiteverify {
    pub fn new(url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
        }
    }
}

#[async_trait]
impl Siteverify for HttpSiteverify {
    async fn verify(
        &self,
        secret: &str,
        token: &str,
    ) -> Result<SiteverifyResponse, SiteverifyError> {
        let response = self
            .client
            .post(&self.url)
            .form(&[("secret", secret), ("response", token)])
            .send()
            .await
            .map_err(|e| SiteverifyError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SiteverifyError::Status(status.as_u16()));
        }

        response
            .json()
            .await
            .map_err(|e| SiteverifyError::Transport(e.to_string()))
    }
}

/// Fields surfaced to the caller on acceptance.
#[derive(Debug, Clone)]
pub struct VerifyAllowed {
    pub score: Option<f64>,
    pub action: Option<String>,
    pub hostname: Option<String>,
}

/// The verification gate policy engine.
pub struct VerificationGate {
    config: RecaptchaConfig,
    environment: Environment,
    limiter: Arc<FixedWindowLimiter>,
    upstream: Arc<dyn Siteverify>,
}

impl VerificationGate {
    pub fn new(
        config: RecaptchaConfig,
        environment: Environment,
        limiter: Arc<FixedWindowLimiter>,
        upstream: Arc<dyn Siteverify>,
    ) -> Self {
        Self {
            config,
            environment,
            limiter,
            upstream,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.config.secret_key.is_some()
    }

    /// Run the full decision pipeline for one request.
    pub async fn verify(
        &self,
        token: Option<&str>,
        expected_action: Option<&str>,
        identity: &str,
    ) -> Result<VerifyAllowed, ApiError> {
        // 1. Configuration: an unset secret is an operator problem, not abuse
        let Some(secret) = self.config.secret_key.as_deref() else {
            error!("RECAPTCHA_SECRET_KEY not configured");
            return Err(ApiError::ServerMisconfigured);
        };

        // 2. Rate limit per client identity
        if let RateLimitResult::Limited { reason, retry_after } =
            self.limiter.check(identity).await
        {
            log_rejection(identity, &reason, None);
            return Err(ApiError::RateLimited {
                reason,
                retry_after_secs: (retry_after.as_secs_f64().ceil() as u64).max(1),
            });
        }

        // 3. Token presence; the upstream is never called without one
        let Some(token) = token.filter(|t| !t.is_empty()) else {
            log_rejection(identity, "missing or empty token", None);
            return Err(ApiError::BadRequest(
                "Missing or invalid recaptchaToken".to_string(),
            ));
        };

        // 4. Single siteverify attempt
        let data = match self.upstream.verify(secret, token).await {
            Ok(data) => data,
            Err(err) => {
                error!(error = %err, "siteverify call failed");
                return Err(ApiError::Internal(
                    "Internal server error during verification".to_string(),
                ));
            }
        };

        // 5. Provider verdict
        if !data.success {
            return Err(self.denied(identity, data.error_codes));
        }

        // 6. Score threshold; a missing score (non-scoring token type) is
        // tolerated
        match data.score {
            Some(score) if score < self.config.min_score => {
                let reason = format!("Suspicious activity detected (score: {score:.2})");
                log_rejection(identity, &reason, None);
                return Err(ApiError::BadRequest(reason));
            }
            Some(_) => {}
            None => info!("no score in siteverify response, possibly a non-scoring token"),
        }

        // 7. Action label: must echo the caller's expectation, and must be
        // one we actually emit
        if let (Some(expected), Some(actual)) = (expected_action, data.action.as_deref()) {
            if actual != expected {
                log_rejection(identity, "action mismatch, possible token replay", Some(actual));
                return Err(ApiError::BadRequest("Action mismatch".to_string()));
            }
        }
        if let Some(actual) = data.action.as_deref() {
            if !ALLOWED_ACTIONS.contains(&actual) {
                log_rejection(identity, "unrecognized action", Some(actual));
                return Err(ApiError::BadRequest("Unrecognized action".to_string()));
            }
        }

        // 8. Hostname allow-list (hardened deployments only; empty list
        // disables the check)
        if !self.config.allowed_hostnames.is_empty() {
            if let Some(hostname) = data.hostname.as_deref() {
                if !self.hostname_allowed(hostname) {
                    if self.environment.is_production() {
                        log_rejection(identity, "unauthorized domain", Some(hostname));
                        return Err(ApiError::UnauthorizedDomain {
                            hostname: hostname.to_string(),
                        });
                    }
                    warn!(hostname, "hostname outside allow-list, allowing in development");
                }
            }
        }

        // 9. Accepted
        info!(
            identity,
            score = data.score,
            action = data.action.as_deref(),
            "verification accepted"
        );
        Ok(VerifyAllowed {
            score: data.score,
            action: data.action,
            hostname: data.hostname,
        })
    }

    /// Shape the response for a `success: false` provider verdict.
    fn denied(&self, identity: &str, error_codes: Option<Vec<String>>) -> ApiError {
        let domain_mismatch = error_codes
            .as_deref()
            .map(|codes| codes.iter().any(|c| c == DOMAIN_MISMATCH_CODE))
            .unwrap_or(false);

        let reason = if domain_mismatch {
            "reCAPTCHA rejected this domain. Check that the site key is registered for this hostname."
        } else {
            "reCAPTCHA verification failed"
        };

        if domain_mismatch && !self.environment.is_production() {
            // Outside production this is almost always a local key/domain
            // misconfiguration, not abuse
            warn!(codes = ?error_codes, "verification failed, likely key/domain misconfiguration");
        } else {
            log_rejection(identity, reason, error_codes.as_deref().map(|c| c.join(",")).as_deref());
        }

        ApiError::VerificationDenied {
            reason: reason.to_string(),
            errors: error_codes,
        }
    }

    fn hostname_allowed(&self, hostname: &str) -> bool {
        let hostname = hostname.to_lowercase();
        self.config.allowed_hostnames.iter().any(|allowed| {
            hostname == *allowed || hostname.ends_with(&format!(".{allowed}"))
        })
    }
}

/// Abuse-log a rejection for operator review. Context only; never the
/// token or secret.
fn log_rejection(identity: &str, reason: &str, detail: Option<&str>) {
    warn!(target: "abuse", identity, reason, detail, "verification rejected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Recording fake upstream: counts calls, pops queued responses.
    struct FakeSiteverify {
        calls: AtomicU32,
        responses: Mutex<Vec<Result<SiteverifyResponse, SiteverifyError>>>,
    }

    impl FakeSiteverify {
        fn returning(response: SiteverifyResponse) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                responses: Mutex::new(vec![Ok(response)]),
            })
        }

        fn failing(err: SiteverifyError) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                responses: Mutex::new(vec![Err(err)]),
            })
        }

        fn call_count(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Siteverify for FakeSiteverify {
        async fn verify(
            &self,
            _secret: &str,
            _token: &str,
        ) -> Result<SiteverifyResponse, SiteverifyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .expect("responses lock poisoned")
                .pop()
                .expect("fake upstream exhausted")
        }
    }

    fn upstream_ok(score: Option<f64>, action: Option<&str>, hostname: Option<&str>) -> SiteverifyResponse {
        SiteverifyResponse {
            success: true,
            score,
            action: action.map(String::from),
            challenge_ts: None,
            hostname: hostname.map(String::from),
            error_codes: None,
        }
    }

    fn gate(environment: Environment, upstream: Arc<dyn Siteverify>) -> VerificationGate {
        gate_with_hostnames(environment, upstream, Vec::new())
    }

    fn gate_with_hostnames(
        environment: Environment,
        upstream: Arc<dyn Siteverify>,
        allowed_hostnames: Vec<String>,
    ) -> VerificationGate {
        let config = RecaptchaConfig {
            secret_key: Some("test-secret".to_string()),
            allowed_hostnames,
            ..Default::default()
        };
        let limiter = Arc::new(FixedWindowLimiter::new(5, Duration::from_secs(60)));
        VerificationGate::new(config, environment, limiter, upstream)
    }

    #[tokio::test]
    async fn accepts_good_token_with_matching_action() {
        let upstream = FakeSiteverify::returning(upstream_ok(Some(0.9), Some("submit"), None));
        let gate = gate(Environment::Production, upstream.clone());

        let allowed = gate
            .verify(Some("tok"), Some("submit"), "1.2.3.4")
            .await
            .expect("should be allowed");

        assert_eq!(allowed.score, Some(0.9));
        assert_eq!(allowed.action.as_deref(), Some("submit"));
        assert_eq!(upstream.call_count(), 1);
    }

    #[tokio::test]
    async fn low_score_rejected_with_two_decimal_reason() {
        let upstream = FakeSiteverify::returning(upstream_ok(Some(0.2), Some("submit"), None));
        let gate = gate(Environment::Production, upstream);

        let err = gate
            .verify(Some("tok"), Some("submit"), "id")
            .await
            .expect_err("score 0.2 should be rejected");

        match err {
            ApiError::BadRequest(reason) => assert!(reason.contains("0.20"), "got {reason}"),
            other => panic!("expected BadRequest, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_score_is_tolerated() {
        let upstream = FakeSiteverify::returning(upstream_ok(None, Some("submit"), None));
        let gate = gate(Environment::Production, upstream);

        assert!(gate.verify(Some("tok"), Some("submit"), "id").await.is_ok());
    }

    #[tokio::test]
    async fn provider_failure_passes_error_codes_through() {
        let upstream = FakeSiteverify::returning(SiteverifyResponse {
            success: false,
            score: None,
            action: None,
            challenge_ts: None,
            hostname: None,
            error_codes: Some(vec!["invalid-input-response".to_string()]),
        });
        let gate = gate(Environment::Production, upstream);

        let err = gate.verify(Some("tok"), None, "id").await.expect_err("should deny");
        match err {
            ApiError::VerificationDenied { errors, .. } => {
                assert_eq!(errors, Some(vec!["invalid-input-response".to_string()]));
            }
            other => panic!("expected VerificationDenied, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn browser_error_gets_friendlier_reason() {
        let upstream = FakeSiteverify::returning(SiteverifyResponse {
            success: false,
            score: None,
            action: None,
            challenge_ts: None,
            hostname: None,
            error_codes: Some(vec!["browser-error".to_string()]),
        });
        let gate = gate(Environment::Development, upstream);

        let err = gate.verify(Some("tok"), None, "id").await.expect_err("should deny");
        match err {
            ApiError::VerificationDenied { reason, .. } => {
                assert!(reason.contains("site key"), "got {reason}");
            }
            other => panic!("expected VerificationDenied, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_token_never_calls_upstream() {
        let upstream = FakeSiteverify::returning(upstream_ok(Some(0.9), None, None));
        let gate = gate(Environment::Production, upstream.clone());

        let err = gate.verify(None, None, "id").await.expect_err("no token");
        assert!(matches!(err, ApiError::BadRequest(_)));
        assert_eq!(upstream.call_count(), 0);

        let err = gate.verify(Some(""), None, "id").await.expect_err("empty token");
        assert!(matches!(err, ApiError::BadRequest(_)));
        assert_eq!(upstream.call_count(), 0);
    }

    #[tokio::test]
    async fn missing_secret_is_server_misconfiguration() {
        let upstream = FakeSiteverify::returning(upstream_ok(Some(0.9), None, None));
        let limiter = Arc::new(FixedWindowLimiter::new(5, Duration::from_secs(60)));
        let gate = VerificationGate::new(
            RecaptchaConfig::default(),
            Environment::Production,
            limiter,
            upstream.clone(),
        );

        let err = gate.verify(Some("tok"), None, "id").await.expect_err("no secret");
        assert!(matches!(err, ApiError::ServerMisconfigured));
        assert_eq!(upstream.call_count(), 0);
    }

    #[tokio::test]
    async fn action_mismatch_rejected() {
        let upstream = FakeSiteverify::returning(upstream_ok(Some(0.9), Some("contact"), None));
        let gate = gate(Environment::Production, upstream);

        let err = gate
            .verify(Some("tok"), Some("submit"), "id")
            .await
            .expect_err("mismatched action");
        match err {
            ApiError::BadRequest(reason) => assert_eq!(reason, "Action mismatch"),
            other => panic!("expected BadRequest, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unrecognized_action_rejected() {
        let upstream = FakeSiteverify::returning(upstream_ok(Some(0.9), Some("checkout"), None));
        let gate = gate(Environment::Production, upstream);

        let err = gate.verify(Some("tok"), None, "id").await.expect_err("unknown action");
        match err {
            ApiError::BadRequest(reason) => assert_eq!(reason, "Unrecognized action"),
            other => panic!("expected BadRequest, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn hostname_outside_allow_list_blocks_in_production() {
        let upstream =
            FakeSiteverify::returning(upstream_ok(Some(0.9), Some("submit"), Some("evil.test")));
        let gate = gate_with_hostnames(
            Environment::Production,
            upstream,
            vec!["example.com".to_string()],
        );

        let err = gate.verify(Some("tok"), None, "id").await.expect_err("bad hostname");
        assert!(matches!(err, ApiError::UnauthorizedDomain { .. }));
    }

    #[tokio::test]
    async fn hostname_outside_allow_list_warns_only_in_development() {
        let upstream =
            FakeSiteverify::returning(upstream_ok(Some(0.9), Some("submit"), Some("evil.test")));
        let gate = gate_with_hostnames(
            Environment::Development,
            upstream,
            vec!["example.com".to_string()],
        );

        assert!(gate.verify(Some("tok"), None, "id").await.is_ok());
    }

    #[tokio::test]
    async fn subdomains_of_allowed_hostnames_pass() {
        let upstream = FakeSiteverify::returning(upstream_ok(
            Some(0.9),
            Some("submit"),
            Some("www.example.com"),
        ));
        let gate = gate_with_hostnames(
            Environment::Production,
            upstream,
            vec!["example.com".to_string()],
        );

        let allowed = gate.verify(Some("tok"), None, "id").await.expect("subdomain ok");
        assert_eq!(allowed.hostname.as_deref(), Some("www.example.com"));
    }

    #[tokio::test]
    async fn upstream_http_error_maps_to_internal() {
        let upstream = FakeSiteverify::failing(SiteverifyError::Status(502));
        let gate = gate(Environment::Production, upstream);

        let err = gate.verify(Some("tok"), None, "id").await.expect_err("upstream down");
        match err {
            ApiError::Internal(reason) => {
                assert_eq!(reason, "Internal server error during verification");
            }
            other => panic!("expected Internal, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn rate_limit_exhaustion_yields_429_with_reason() {
        let upstream = FakeSiteverify::returning(upstream_ok(Some(0.9), Some("submit"), None));
        let config = RecaptchaConfig {
            secret_key: Some("test-secret".to_string()),
            ..Default::default()
        };
        let limiter = Arc::new(FixedWindowLimiter::new(1, Duration::from_secs(60)));
        let gate = VerificationGate::new(config, Environment::Production, limiter, upstream.clone());

        assert!(gate.verify(Some("tok"), Some("submit"), "id").await.is_ok());

        let err = gate.verify(Some("tok"), Some("submit"), "id").await.expect_err("limited");
        match err {
            ApiError::RateLimited { reason, retry_after_secs } => {
                assert!(reason.contains("Rate limit exceeded"), "got {reason}");
                assert!(retry_after_secs >= 1 && retry_after_secs <= 60);
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }
        // The limited request never reached the upstream
        assert_eq!(upstream.call_count(), 1);
    }
}
