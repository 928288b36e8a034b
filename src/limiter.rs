// SPDX-License-Identifier: MIT

//! Fixed-window rate limiter keyed by client identity.
//!
//! One counter per identity per window. A new identity, or an identity
//! whose window has elapsed, gets a fresh record with count 1; within a
//! live window the counter increments until it hits the cap. Fixed-window
//! counting admits up to a 2x burst across a window boundary, which is
//! acceptable for abuse deterrence but not for precise quota enforcement.
//!
//! State lives behind a mutex in process memory and is lost on restart;
//! a multi-instance deployment needs an external shared counter store
//! instead.

use crate::clock::{Clock, SystemClock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

/// Result of a rate limit check.
#[derive(Debug, Clone)]
pub enum RateLimitResult {
    /// Request is allowed
    Allowed {
        /// Remaining requests in the current window
        remaining: u32,
    },
    /// Request is rate limited
    Limited {
        /// Human-readable reason, safe to return to the caller
        reason: String,
        /// Time until the window resets
        retry_after: Duration,
    },
}

impl RateLimitResult {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitResult::Allowed { .. })
    }
}

/// One counter window for a single identity.
#[derive(Debug)]
struct RateLimitRecord {
    count: u32,
    window_reset_at: Instant,
}

/// Fixed-window counter limiter.
///
/// Identities are opaque strings; callers without a forwarded-for or
/// real-ip header all map to the `"unknown"` sentinel and therefore share
/// one bucket.
pub struct FixedWindowLimiter {
    max_requests: u32,
    window: Duration,
    clock: Arc<dyn Clock>,
    records: Mutex<HashMap<String, RateLimitRecord>>,
}

impl FixedWindowLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self::with_clock(max_requests, window, Arc::new(SystemClock::new()))
    }

    pub fn with_clock(max_requests: u32, window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            max_requests,
            window,
            clock,
            records: Mutex::new(HashMap::new()),
        }
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Check and count one request from `identity`. Never fails; a
    /// saturated window simply yields `Limited`.
    pub async fn check(&self, identity: &str) -> RateLimitResult {
        let now = self.clock.now();
        let mut records = self.records.lock().await;

        match records.get_mut(identity) {
            Some(record) if now <= record.window_reset_at => {
                if record.count >= self.max_requests {
                    let retry_after = record.window_reset_at.saturating_duration_since(now);
                    debug!(identity, count = record.count, "rate limit exceeded");
                    RateLimitResult::Limited {
                        reason: format!(
                            "Rate limit exceeded. Max {} requests per minute.",
                            self.max_requests
                        ),
                        retry_after,
                    }
                } else {
                    record.count += 1;
                    RateLimitResult::Allowed {
                        remaining: self.max_requests.saturating_sub(record.count),
                    }
                }
            }
            _ => {
                records.insert(
                    identity.to_string(),
                    RateLimitRecord {
                        count: 1,
                        window_reset_at: now + self.window,
                    },
                );
                RateLimitResult::Allowed {
                    remaining: self.max_requests.saturating_sub(1),
                }
            }
        }
    }

    /// Drop records whose window has expired (called periodically).
    pub async fn cleanup(&self) {
        let now = self.clock.now();
        let mut records = self.records.lock().await;
        records.retain(|_, record| now <= record.window_reset_at);
    }

    /// Number of identities currently tracked.
    pub async fn tracked_identities(&self) -> usize {
        self.records.lock().await.len()
    }
}
