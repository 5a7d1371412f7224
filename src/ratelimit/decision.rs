//! Admission decisions and their client-facing rendering.

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;

use super::policy::Policy;

/// HTTP status used for rejected requests.
pub const TOO_MANY_REQUESTS: u16 = 429;

/// Message used when a policy carries none.
pub const DEFAULT_MESSAGE: &str = "Too many requests, please try again later.";

/// Outcome of a single admission check.
///
/// `reset_at_ms` differs by outcome. On admission it is `now + window`, a
/// cheap upper bound for headers. On denial it is the exact instant the
/// oldest counted request leaves the window, which is also what
/// `retry_after_secs` is derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub allowed: bool,
    /// The policy's request ceiling
    pub limit: u32,
    /// Requests left in the current window after this one
    pub remaining: u32,
    /// Reset instant in milliseconds since the Unix epoch
    pub reset_at_ms: u64,
    /// Whole seconds from the decision until `reset_at_ms`, rounded up
    pub reset_after_secs: u64,
    /// Whole seconds to wait before retrying; only set on denial
    pub retry_after_secs: Option<u64>,
}

impl Decision {
    pub(crate) fn allow(limit: u32, remaining: u32, now_ms: u64, reset_at_ms: u64) -> Self {
        Self {
            allowed: true,
            limit,
            remaining,
            reset_at_ms,
            reset_after_secs: ceil_secs(reset_at_ms.saturating_sub(now_ms)),
            retry_after_secs: None,
        }
    }

    pub(crate) fn deny(limit: u32, now_ms: u64, reset_at_ms: u64) -> Self {
        let wait = ceil_secs(reset_at_ms.saturating_sub(now_ms));
        Self {
            allowed: false,
            limit,
            remaining: 0,
            reset_at_ms,
            reset_after_secs: wait,
            retry_after_secs: Some(wait),
        }
    }

    pub fn is_denied(&self) -> bool {
        !self.allowed
    }

    /// `reset_at_ms` as a UTC timestamp.
    pub fn reset_at(&self) -> DateTime<Utc> {
        let ms = i64::try_from(self.reset_at_ms).unwrap_or(i64::MAX);
        Utc.timestamp_millis_opt(ms)
            .single()
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Response headers describing this decision.
    ///
    /// `RateLimit-Reset` is relative (seconds), per the IETF draft.
    /// `Retry-After` is only present on denial.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            ("RateLimit-Limit", self.limit.to_string()),
            ("RateLimit-Remaining", self.remaining.to_string()),
            ("RateLimit-Reset", self.reset_after_secs.to_string()),
        ];
        if let Some(retry_after) = self.retry_after_secs {
            headers.push(("Retry-After", retry_after.to_string()));
        }
        headers
    }
}

/// A denied decision packaged for the request pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejection {
    pub status: u16,
    pub message: String,
    pub decision: Decision,
}

impl Rejection {
    /// Pair a decision with the policy's message.
    ///
    /// Returns `None` when the decision admitted the request.
    pub fn from_decision(decision: Decision, policy: &Policy) -> Option<Self> {
        if decision.allowed {
            return None;
        }
        Some(Self {
            status: TOO_MANY_REQUESTS,
            message: policy.message().unwrap_or(DEFAULT_MESSAGE).to_string(),
            decision,
        })
    }

    pub fn retry_after_secs(&self) -> u64 {
        self.decision.retry_after_secs.unwrap_or(self.decision.reset_after_secs)
    }

    pub fn headers(&self) -> Vec<(&'static str, String)> {
        self.decision.headers()
    }
}

fn ceil_secs(ms: u64) -> u64 {
    ms.div_ceil(1_000)
}
