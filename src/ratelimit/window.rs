//! Per-key sliding window record.

use std::collections::VecDeque;

use serde::Serialize;

/// Recent request timestamps for one key.
///
/// Timestamps are milliseconds on the store's clock, kept in insertion
/// order (oldest at the front). A timestamp `t` counts toward the window
/// while `now - t < window_ms`, so it stops counting exactly `window_ms`
/// after it was recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WindowRecord {
    /// The subject being throttled
    pub key: String,
    /// Admitted request instants still inside the window, oldest first
    pub timestamps: VecDeque<u64>,
    /// Window length of the policy last applied to this key
    pub window_ms: u64,
    /// Request limit of the policy last applied to this key
    pub limit: u32,
    /// Instant of the most recent check, admitted or not
    pub last_seen_ms: u64,
}

impl WindowRecord {
    /// Create an empty record for `key` under the given policy parameters.
    pub fn new(key: &str, window_ms: u64, limit: u32, now_ms: u64) -> Self {
        Self {
            key: key.to_string(),
            timestamps: VecDeque::new(),
            window_ms,
            limit,
            last_seen_ms: now_ms,
        }
    }

    /// Drop every timestamp that has aged out of the window at `now_ms`.
    ///
    /// Returns the number of entries removed.
    pub fn prune(&mut self, now_ms: u64) -> usize {
        let before = self.timestamps.len();
        while let Some(&oldest) = self.timestamps.front() {
            if now_ms.saturating_sub(oldest) >= self.window_ms {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
        before - self.timestamps.len()
    }

    /// Number of timestamps currently held (not pruned).
    pub fn count(&self) -> usize {
        self.timestamps.len()
    }

    pub fn oldest(&self) -> Option<u64> {
        self.timestamps.front().copied()
    }

    pub fn newest(&self) -> Option<u64> {
        self.timestamps.back().copied()
    }

    /// Instant at which the oldest held timestamp leaves the window.
    pub fn oldest_expiry(&self) -> Option<u64> {
        self.oldest().map(|t| t.saturating_add(self.window_ms))
    }

    /// Whether the eviction sweep may drop this record at `now_ms`.
    ///
    /// The anchor is the newest timestamp, or the last check for records
    /// that never admitted anything. The record must have been idle for its
    /// own window plus `grace_ms`.
    pub fn is_evictable(&self, now_ms: u64, grace_ms: u64) -> bool {
        let anchor = self.newest().unwrap_or(self.last_seen_ms);
        let horizon = anchor
            .saturating_add(self.window_ms)
            .saturating_add(grace_ms);
        now_ms >= horizon
    }
}
