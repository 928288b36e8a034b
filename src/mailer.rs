// SPDX-License-Identifier: MIT

//! Contact-form mail relay.
//!
//! Validates a submission, then forwards it to the EmailJS send API.
//! Network-level failures are retried with exponential backoff (3 attempts,
//! 1s/2s delays); an application-level non-2xx from the provider is passed
//! through to the caller untried. From the second attempt onward the
//! transport binds to IPv4, which works around hosts whose IPv6 route to
//! the provider is broken.

use crate::config::EmailConfig;
use crate::error::{ApiError, TransportErrorKind};
use crate::retry::{retry_with_backoff, RetryPolicy};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

pub const NAME_MIN: usize = 2;
pub const NAME_MAX: usize = 50;
pub const MESSAGE_MIN: usize = 10;
pub const MESSAGE_MAX: usize = 1000;

/// A validated-or-not contact form submission. Email format is left to
/// the provider; only presence is enforced here.
#[derive(Debug, Clone, Deserialize)]
pub struct ContactSubmission {
    pub name: String,
    pub email: String,
    pub message: String,
}

impl ContactSubmission {
    /// Field checks in submission order; the first failure wins.
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.name.is_empty() || self.email.is_empty() || self.message.is_empty() {
            return Err(ApiError::BadRequest("Missing required fields".to_string()));
        }

        let name_len = self.name.chars().count();
        if !(NAME_MIN..=NAME_MAX).contains(&name_len) {
            return Err(ApiError::BadRequest(
                "Name must be between 2-50 characters".to_string(),
            ));
        }

        let message_len = self.message.chars().count();
        if !(MESSAGE_MIN..=MESSAGE_MAX).contains(&message_len) {
            return Err(ApiError::BadRequest(
                "Message must be between 10-1000 characters".to_string(),
            ));
        }

        Ok(())
    }
}

/// Wire payload for the EmailJS send endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct SendPayload {
    pub service_id: String,
    pub template_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(rename = "accessToken")]
    pub access_token: String,
    pub template_params: TemplateParams,
}

#[derive(Debug, Clone, Serialize)]
pub struct TemplateParams {
    pub name: String,
    pub email: String,
    pub message: String,
}

/// The provider answered; status may still be non-2xx.
#[derive(Debug, Clone)]
pub struct DispatchResponse {
    pub status: u16,
    pub body: String,
}

/// The provider could not be reached at all.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

/// Outbound mail transport. A trait seam so tests can substitute a
/// scripted fake.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(
        &self,
        payload: &SendPayload,
        attempt: u32,
    ) -> Result<DispatchResponse, TransportError>;
}

/// Production transport: fresh HTTPS request per call, 30s socket timeout,
/// IPv4-bound client for retry attempts.
pub struct EmailJsTransport {
    client: reqwest::Client,
    ipv4_client: reqwest::Client,
    endpoint: String,
}

impl EmailJsTransport {
    pub fn new(endpoint: String, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let ipv4_client = reqwest::Client::builder()
            .timeout(timeout)
            .local_address(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
            .build()?;
        Ok(Self {
            client,
            ipv4_client,
            endpoint,
        })
    }
}

#[async_trait]
impl MailTransport for EmailJsTransport {
    async fn send(
        &self,
        payload: &SendPayload,
        attempt: u32,
    ) -> Result<DispatchResponse, TransportError> {
        let client = if attempt <= 1 {
            &self.client
        } else {
            &self.ipv4_client
        };

        let response = client
            .post(&self.endpoint)
            .json(payload)
            .send()
            .await
            .map_err(|err| TransportError {
                kind: classify(&err),
                message: err.to_string(),
            })?;

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Ok(DispatchResponse { status, body })
    }
}

/// Map a reqwest failure onto the transport taxonomy by inspecting the
/// underlying socket error.
fn classify(err: &reqwest::Error) -> TransportErrorKind {
    if err.is_timeout() {
        return TransportErrorKind::Timeout;
    }

    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            match io.kind() {
                std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::ConnectionAborted => {
                    return TransportErrorKind::ConnectionReset;
                }
                std::io::ErrorKind::TimedOut => return TransportErrorKind::Timeout,
                _ => {}
            }
        }
        source = cause.source();
    }

    if err.is_connect() {
        return TransportErrorKind::Unreachable;
    }
    TransportErrorKind::Other
}

/// The mail relay component.
pub struct MailRelay {
    config: EmailConfig,
    policy: RetryPolicy,
    transport: Arc<dyn MailTransport>,
}

impl MailRelay {
    pub fn new(config: EmailConfig, transport: Arc<dyn MailTransport>) -> Self {
        Self::with_policy(config, RetryPolicy::default(), transport)
    }

    pub fn with_policy(
        config: EmailConfig,
        policy: RetryPolicy,
        transport: Arc<dyn MailTransport>,
    ) -> Self {
        Self {
            config,
            policy,
            transport,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.config.is_configured()
    }

    /// Validate and forward one submission.
    pub async fn dispatch(&self, submission: &ContactSubmission) -> Result<(), ApiError> {
        submission.validate()?;

        let (Some(service_id), Some(template_id), Some(private_key)) = (
            self.config.service_id.clone(),
            self.config.template_id.clone(),
            self.config.private_key.clone(),
        ) else {
            error!("EmailJS not configured");
            return Err(ApiError::ServerMisconfigured);
        };

        let payload = SendPayload {
            service_id,
            template_id,
            user_id: self.config.public_key.clone(),
            access_token: private_key,
            template_params: TemplateParams {
                name: submission.name.clone(),
                email: submission.email.clone(),
                message: submission.message.clone(),
            },
        };

        info!(name = %submission.name, email = %submission.email, "sending contact email");

        let response = retry_with_backoff(
            &self.policy,
            // Every transport-level failure is worth another try; non-2xx
            // provider answers never reach this predicate
            |_err: &TransportError| true,
            |attempt| self.transport.send(&payload, attempt),
        )
        .await
        .map_err(|err| {
            error!(kind = ?err.kind, error = %err.message, "mail transport failed after retries");
            ApiError::Transport { kind: err.kind }
        })?;

        if !(200..300).contains(&response.status) {
            warn!(status = response.status, "EmailJS rejected the request");
            return Err(ApiError::UpstreamRejected {
                status: response.status,
                details: response.body,
            });
        }

        info!("email sent successfully");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::time::Instant;

    fn submission() -> ContactSubmission {
        ContactSubmission {
            name: "Ada Lovelace".to_string(),
            email: "ada@example.com".to_string(),
            message: "I would like to discuss a project with you.".to_string(),
        }
    }

    fn configured() -> EmailConfig {
        EmailConfig {
            service_id: Some("service_abc".to_string()),
            template_id: Some("template_xyz".to_string()),
            public_key: Some("pub".to_string()),
            private_key: Some("priv".to_string()),
            ..Default::default()
        }
    }

    fn reset_error() -> TransportError {
        TransportError {
            kind: TransportErrorKind::ConnectionReset,
            message: "connection reset by peer".to_string(),
        }
    }

    /// Scripted transport: pops one result per attempt, records attempt
    /// numbers.
    struct FakeTransport {
        script: Mutex<VecDeque<Result<DispatchResponse, TransportError>>>,
        attempts: Mutex<Vec<u32>>,
    }

    impl FakeTransport {
        fn scripted(
            script: Vec<Result<DispatchResponse, TransportError>>,
        ) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                attempts: Mutex::new(Vec::new()),
            })
        }

        fn attempts(&self) -> Vec<u32> {
            self.attempts.lock().expect("attempts lock poisoned").clone()
        }
    }

    #[async_trait]
    impl MailTransport for FakeTransport {
        async fn send(
            &self,
            _payload: &SendPayload,
            attempt: u32,
        ) -> Result<DispatchResponse, TransportError> {
            self.attempts.lock().expect("attempts lock poisoned").push(attempt);
            self.script
                .lock()
                .expect("script lock poisoned")
                .pop_front()
                .expect("fake transport script exhausted")
        }
    }

    fn ok_response() -> DispatchResponse {
        DispatchResponse {
            status: 200,
            body: "OK".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_recover_on_third_attempt() {
        let transport = FakeTransport::scripted(vec![
            Err(reset_error()),
            Err(reset_error()),
            Ok(ok_response()),
        ]);
        let relay = MailRelay::new(configured(), transport.clone());
        let start = Instant::now();

        relay.dispatch(&submission()).await.expect("third attempt succeeds");

        assert_eq!(transport.attempts(), vec![1, 2, 3]);
        // 1000ms after the first failure, 2000ms after the second
        assert_eq!(start.elapsed(), Duration::from_millis(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_resets_classify_as_interrupted() {
        let transport = FakeTransport::scripted(vec![
            Err(reset_error()),
            Err(reset_error()),
            Err(reset_error()),
        ]);
        let relay = MailRelay::new(configured(), transport.clone());

        let err = relay.dispatch(&submission()).await.expect_err("all attempts fail");

        assert_eq!(transport.attempts().len(), 3);
        match &err {
            ApiError::Transport { kind } => assert_eq!(*kind, TransportErrorKind::ConnectionReset),
            other => panic!("expected Transport, got {other:?}"),
        }
        assert!(err.is_retryable());
        assert_eq!(err.retry_after_secs(), Some(30));
        assert!(err.to_string().contains("interrupted"));
    }

    #[tokio::test]
    async fn provider_rejection_is_not_retried() {
        let transport = FakeTransport::scripted(vec![Ok(DispatchResponse {
            status: 422,
            body: "The template ID is invalid".to_string(),
        })]);
        let relay = MailRelay::new(configured(), transport.clone());

        let err = relay.dispatch(&submission()).await.expect_err("provider said no");

        assert_eq!(transport.attempts(), vec![1]);
        match err {
            ApiError::UpstreamRejected { status, details } => {
                assert_eq!(status, 422);
                assert!(details.contains("template ID"));
            }
            other => panic!("expected UpstreamRejected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unconfigured_relay_short_circuits() {
        let transport = FakeTransport::scripted(vec![]);
        let relay = MailRelay::new(EmailConfig::default(), transport.clone());

        let err = relay.dispatch(&submission()).await.expect_err("not configured");
        assert!(matches!(err, ApiError::ServerMisconfigured));
        assert!(transport.attempts().is_empty());
    }

    #[tokio::test]
    async fn validation_failure_never_touches_transport() {
        let transport = FakeTransport::scripted(vec![]);
        let relay = MailRelay::new(configured(), transport.clone());

        let short = ContactSubmission {
            name: "A".to_string(),
            ..submission()
        };
        let err = relay.dispatch(&short).await.expect_err("name too short");
        assert!(matches!(err, ApiError::BadRequest(_)));
        assert!(transport.attempts().is_empty());
    }

    #[test]
    fn name_bounds_are_inclusive() {
        let mut s = submission();

        s.name = "A".to_string();
        assert!(matches!(
            s.validate(),
            Err(ApiError::BadRequest(msg)) if msg == "Name must be between 2-50 characters"
        ));

        s.name = "A".repeat(51);
        assert!(matches!(
            s.validate(),
            Err(ApiError::BadRequest(msg)) if msg == "Name must be between 2-50 characters"
        ));

        s.name = "Jo".to_string();
        assert!(s.validate().is_ok());

        s.name = "A".repeat(50);
        assert!(s.validate().is_ok());
    }

    #[test]
    fn message_bounds_are_inclusive() {
        let mut s = submission();

        s.message = "x".repeat(9);
        assert!(matches!(
            s.validate(),
            Err(ApiError::BadRequest(msg)) if msg == "Message must be between 10-1000 characters"
        ));

        s.message = "x".repeat(1001);
        assert!(s.validate().is_err());

        s.message = "x".repeat(10);
        assert!(s.validate().is_ok());

        s.message = "x".repeat(1000);
        assert!(s.validate().is_ok());
    }

    #[test]
    fn empty_fields_are_missing() {
        let mut s = submission();
        s.email = String::new();
        assert!(matches!(
            s.validate(),
            Err(ApiError::BadRequest(msg)) if msg == "Missing required fields"
        ));
    }

    #[test]
    fn payload_omits_user_id_when_public_key_unset() {
        let payload = SendPayload {
            service_id: "s".to_string(),
            template_id: "t".to_string(),
            user_id: None,
            access_token: "pk".to_string(),
            template_params: TemplateParams {
                name: "n".to_string(),
                email: "e".to_string(),
                message: "m".to_string(),
            },
        };
        let value = serde_json::to_value(&payload).expect("serializes");
        assert!(value.get("user_id").is_none());
        assert_eq!(value["accessToken"], "pk");
        assert_eq!(value["template_params"]["name"], "n");
    }
}
