// SPDX-License-Identifier: MIT

//! Configuration for the contact gateway.
//!
//! Everything is read from the environment exactly once, in
//! [`Config::from_env`], and handed to the handlers through shared state.
//! Missing upstream credentials are a valid, constructible state: the
//! affected endpoint answers 500 on use instead of the process crashing.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Deployment environment. Relaxes the hostname policy in development.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn is_production(self) -> bool {
        matches!(self, Environment::Production)
    }

    fn from_env_var(value: Option<String>) -> Self {
        match value.as_deref() {
            Some("production") | Some("prod") => Environment::Production,
            _ => Environment::Development,
        }
    }
}

/// Top-level service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server bind address (default: 0.0.0.0:8080)
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Deployment environment (default: development)
    #[serde(default = "default_environment")]
    pub environment: Environment,

    /// Allowed CORS origin; `None` means permissive (`*`)
    #[serde(default)]
    pub cors_allowed_origin: Option<String>,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// reCAPTCHA verification configuration
    #[serde(default)]
    pub recaptcha: RecaptchaConfig,

    /// EmailJS relay configuration
    #[serde(default)]
    pub email: EmailConfig,
}

/// Fixed-window rate limit thresholds.
///
/// The per-endpoint limiter and the coarser API-prefix limiter share one
/// window length but carry distinct request caps; the two layers compose.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum requests per window per identity for the verify endpoint
    /// (default: 5)
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,

    /// Maximum requests per window per identity across all `/api` paths
    /// (default: 10)
    #[serde(default = "default_api_max_requests")]
    pub api_max_requests: u32,

    /// Window length in milliseconds (default: 60000)
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
}

/// reCAPTCHA siteverify policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecaptchaConfig {
    /// Shared secret for the siteverify API; unset means the verify
    /// endpoint is unconfigured
    #[serde(default)]
    pub secret_key: Option<String>,

    /// Minimum acceptable v3 score (default: 0.5)
    #[serde(default = "default_min_score")]
    pub min_score: f64,

    /// Hostnames allowed to present tokens (exact or subdomain match);
    /// empty disables the hostname check
    #[serde(default)]
    pub allowed_hostnames: Vec<String>,

    /// Siteverify endpoint URL
    #[serde(default = "default_verify_url")]
    pub verify_url: String,
}

/// EmailJS transactional-send configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    #[serde(default)]
    pub service_id: Option<String>,

    #[serde(default)]
    pub template_id: Option<String>,

    /// Public key, sent as `user_id` in the dispatch payload
    #[serde(default)]
    pub public_key: Option<String>,

    /// Private key, sent as `accessToken` in the dispatch payload
    #[serde(default)]
    pub private_key: Option<String>,

    /// Send endpoint URL
    #[serde(default = "default_email_endpoint")]
    pub endpoint: String,

    /// Per-request socket timeout in seconds (default: 30)
    #[serde(default = "default_email_timeout_secs")]
    pub timeout_secs: u64,
}

// Default value functions
fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_environment() -> Environment {
    Environment::Development
}

fn default_max_requests() -> u32 {
    5
}

fn default_api_max_requests() -> u32 {
    10
}

fn default_window_ms() -> u64 {
    60_000
}

fn default_min_score() -> f64 {
    0.5
}

fn default_verify_url() -> String {
    "https://www.google.com/recaptcha/api/siteverify".to_string()
}

fn default_email_endpoint() -> String {
    "https://api.emailjs.com/api/v1.0/email/send".to_string()
}

fn default_email_timeout_secs() -> u64 {
    30
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            environment: default_environment(),
            cors_allowed_origin: None,
            rate_limit: RateLimitConfig::default(),
            recaptcha: RecaptchaConfig::default(),
            email: EmailConfig::default(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            api_max_requests: default_api_max_requests(),
            window_ms: default_window_ms(),
        }
    }
}

impl Default for RecaptchaConfig {
    fn default() -> Self {
        Self {
            secret_key: None,
            min_score: default_min_score(),
            allowed_hostnames: Vec::new(),
            verify_url: default_verify_url(),
        }
    }
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            service_id: None,
            template_id: None,
            public_key: None,
            private_key: None,
            endpoint: default_email_endpoint(),
            timeout_secs: default_email_timeout_secs(),
        }
    }
}

impl RateLimitConfig {
    pub fn window_duration(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

impl EmailConfig {
    /// The public key is optional: EmailJS accepts a missing `user_id`
    /// when a private access token is supplied.
    pub fn is_configured(&self) -> bool {
        self.service_id.is_some() && self.template_id.is_some() && self.private_key.is_some()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let defaults = RateLimitConfig::default();
        Self {
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| default_bind_addr()),
            environment: Environment::from_env_var(std::env::var("APP_ENV").ok()),
            cors_allowed_origin: std::env::var("CORS_ALLOWED_ORIGIN").ok(),
            rate_limit: RateLimitConfig {
                max_requests: std::env::var("MAX_REQUESTS_PER_WINDOW")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(defaults.max_requests),
                api_max_requests: std::env::var("API_MAX_REQUESTS_PER_WINDOW")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(defaults.api_max_requests),
                window_ms: std::env::var("RATE_LIMIT_WINDOW_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(defaults.window_ms),
            },
            recaptcha: RecaptchaConfig {
                secret_key: std::env::var("RECAPTCHA_SECRET_KEY").ok(),
                min_score: std::env::var("RECAPTCHA_MIN_SCORE")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or_else(default_min_score),
                allowed_hostnames: std::env::var("RECAPTCHA_ALLOWED_HOSTNAMES")
                    .map(|v| {
                        v.split(',')
                            .map(|h| h.trim().to_lowercase())
                            .filter(|h| !h.is_empty())
                            .collect()
                    })
                    .unwrap_or_default(),
                verify_url: std::env::var("RECAPTCHA_VERIFY_URL")
                    .unwrap_or_else(|_| default_verify_url()),
            },
            email: EmailConfig {
                service_id: std::env::var("EMAILJS_SERVICE_ID").ok(),
                template_id: std::env::var("EMAILJS_TEMPLATE_ID").ok(),
                public_key: std::env::var("EMAILJS_PUBLIC_KEY").ok(),
                private_key: std::env::var("EMAILJS_PRIVATE_KEY").ok(),
                endpoint: std::env::var("EMAILJS_ENDPOINT")
                    .unwrap_or_else(|_| default_email_endpoint()),
                timeout_secs: std::env::var("EMAILJS_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or_else(default_email_timeout_secs),
            },
        }
    }
}
