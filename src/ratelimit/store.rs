//! Sliding-window store.
//!
//! Maps keys to [`WindowRecord`]s and makes admission decisions. The map is
//! a [`DashMap`], so checks for different keys proceed in parallel on
//! different shards while the read-prune-compare-append sequence for one key
//! runs under that key's shard write lock. The eviction sweep goes through
//! the same shard locks and can never observe a half-applied check.

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, trace};

use super::clock::{Clock, SystemClock};
use super::decision::Decision;
use super::policy::Policy;
use super::window::WindowRecord;

/// In-process sliding-window request store.
///
/// This struct is thread-safe and can be shared across multiple tasks.
pub struct WindowStore {
    /// Window records indexed by key
    records: DashMap<String, WindowRecord>,
    clock: Arc<dyn Clock>,
}

impl WindowStore {
    /// Create a store driven by the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock::new()))
    }

    /// Create a store driven by the given clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: DashMap::new(),
            clock,
        }
    }

    /// The clock this store reads.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Decide whether a request for `key` is admitted under `policy`, and
    /// record it if so.
    ///
    /// # Panics
    ///
    /// Panics if `key` is empty.
    pub fn check(&self, key: &str, policy: &Policy) -> Decision {
        assert!(!key.is_empty(), "rate limit key must not be empty");

        let now = self.clock.now_ms();
        let window_ms = policy.window_ms();
        let limit = policy.max_requests();

        trace!(key = %key, window_ms, limit, "Checking rate limit");

        let mut record = match self.records.entry(key.to_string()) {
            Entry::Occupied(entry) => entry.into_ref(),
            Entry::Vacant(entry) => {
                debug!(key = %key, window_ms, limit, "Creating new window record");
                entry.insert(WindowRecord::new(key, window_ms, limit, now))
            }
        };

        record.window_ms = window_ms;
        record.limit = limit;
        record.last_seen_ms = now;
        record.prune(now);

        let count = record.count();
        if count >= limit as usize {
            let reset_at = record
                .oldest_expiry()
                .unwrap_or_else(|| now.saturating_add(window_ms));
            let decision = Decision::deny(limit, now, reset_at);
            debug!(
                key = %key,
                count,
                limit,
                retry_after_secs = ?decision.retry_after_secs,
                "Rate limit exceeded"
            );
            return decision;
        }

        record.timestamps.push_back(now);
        let remaining = limit - (count as u32 + 1);
        Decision::allow(limit, remaining, now, now.saturating_add(window_ms))
    }

    /// Forget everything recorded for `key`.
    pub fn reset(&self, key: &str) {
        if self.records.remove(key).is_some() {
            debug!(key = %key, "Window record reset");
        }
    }

    /// Forget every key.
    pub fn reset_all(&self) {
        self.records.clear();
    }

    /// Snapshot of the record for `key`, as stored.
    ///
    /// Expired timestamps are not pruned here.
    pub fn status(&self, key: &str) -> Option<WindowRecord> {
        self.records.get(key).map(|r| r.value().clone())
    }

    /// Number of tracked keys.
    pub fn size(&self) -> usize {
        self.records.len()
    }

    /// Remove records idle for longer than their window plus `grace`.
    ///
    /// Returns how many records were removed.
    pub fn sweep(&self, grace: Duration) -> usize {
        let now = self.clock.now_ms();
        let grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX);

        // Concurrent checks may insert while this runs; count removals only.
        let mut evicted = 0;
        self.records.retain(|_, record| {
            let evict = record.is_evictable(now, grace_ms);
            if evict {
                evicted += 1;
            }
            !evict
        });

        if evicted > 0 {
            debug!(evicted, remaining = self.records.len(), "Evicted idle window records");
        }
        evicted
    }
}

impl Default for WindowStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn store_at(start_ms: u64) -> (WindowStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(start_ms));
        (WindowStore::with_clock(clock.clone()), clock)
    }

    fn policy(window_ms: u64, max_requests: u32) -> Policy {
        Policy::new(Duration::from_millis(window_ms), max_requests)
    }

    #[test]
    fn test_store_creation() {
        let store = WindowStore::new();
        assert_eq!(store.size(), 0);
        assert!(store.status("anything").is_none());
    }

    #[test]
    fn test_concrete_timeline() {
        let (store, clock) = store_at(0);
        let policy = policy(1_000, 3);

        let mut remaining = Vec::new();
        for t in [0, 10, 20] {
            clock.set(t);
            let decision = store.check("k", &policy);
            assert!(decision.allowed);
            assert_eq!(decision.reset_at_ms, t + 1_000);
            remaining.push(decision.remaining);
        }
        assert_eq!(remaining, vec![2, 1, 0]);

        clock.set(30);
        let denied = store.check("k", &policy);
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert_eq!(denied.retry_after_secs, Some(1));
        assert_eq!(denied.reset_at_ms, 1_000);

        // t=0 has aged out; 10 and 20 still count
        clock.set(1_001);
        let decision = store.check("k", &policy);
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 0);

        let record = store.status("k").unwrap();
        assert_eq!(record.timestamps, [10, 20, 1_001]);
    }

    #[test]
    fn test_sliding_not_fixed_window() {
        let (store, clock) = store_at(0);
        let policy = policy(1_000, 3);

        for _ in 0..3 {
            assert!(store.check("k", &policy).allowed);
        }

        clock.set(999);
        assert!(!store.check("k", &policy).allowed);

        clock.set(1_001);
        assert!(store.check("k", &policy).allowed);
    }

    #[test]
    fn test_retry_after_tracks_oldest_request() {
        let (store, clock) = store_at(0);
        let policy = policy(10_000, 2);

        clock.set(0);
        store.check("k", &policy);
        clock.set(4_000);
        store.check("k", &policy);

        clock.set(4_500);
        let denied = store.check("k", &policy);
        // t=0 leaves the window at t=10_000, 5.5s away
        assert_eq!(denied.retry_after_secs, Some(6));
        assert_eq!(denied.reset_at_ms, 10_000);

        clock.set(9_999);
        assert_eq!(store.check("k", &policy).retry_after_secs, Some(1));

        clock.set(10_000);
        assert!(store.check("k", &policy).allowed);
    }

    #[test]
    fn test_denied_requests_are_not_recorded() {
        let (store, clock) = store_at(0);
        let policy = policy(1_000, 1);

        assert!(store.check("k", &policy).allowed);
        for t in 1..10 {
            clock.set(t * 50);
            assert!(!store.check("k", &policy).allowed);
        }
        assert_eq!(store.status("k").unwrap().count(), 1);

        clock.set(1_000);
        assert!(store.check("k", &policy).allowed);
    }

    #[test]
    fn test_zero_limit_always_denies() {
        let (store, _clock) = store_at(5_000);
        let policy = policy(2_000, 0);

        for _ in 0..3 {
            let decision = store.check("k", &policy);
            assert!(!decision.allowed);
            assert_eq!(decision.remaining, 0);
            assert_eq!(decision.retry_after_secs, Some(2));
        }
        assert_eq!(store.status("k").unwrap().count(), 0);
    }

    #[test]
    #[should_panic(expected = "rate limit key must not be empty")]
    fn test_empty_key_panics() {
        let store = WindowStore::new();
        store.check("", &policy(1_000, 1));
    }

    #[test]
    fn test_keys_are_independent() {
        let (store, _clock) = store_at(0);
        let policy = policy(60_000, 2);

        store.check("a", &policy);
        store.check("a", &policy);
        assert!(!store.check("a", &policy).allowed);

        let b = store.check("b", &policy);
        assert!(b.allowed);
        assert_eq!(b.remaining, 1);
        assert_eq!(store.size(), 2);
    }

    #[test]
    fn test_reset_readmits_saturated_key() {
        let (store, _clock) = store_at(0);
        let policy = policy(60_000, 2);

        store.check("k", &policy);
        store.check("k", &policy);
        store.check("other", &policy);
        assert!(!store.check("k", &policy).allowed);

        store.reset("k");
        let decision = store.check("k", &policy);
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 1);

        // Resetting an unknown key is a no-op
        store.reset("never-seen");
        assert_eq!(store.size(), 2);

        store.reset_all();
        assert_eq!(store.size(), 0);
    }

    #[test]
    fn test_status_does_not_prune() {
        let (store, clock) = store_at(0);
        let policy = policy(100, 5);

        store.check("k", &policy);
        clock.set(10_000);

        let snapshot = store.status("k").unwrap();
        assert_eq!(snapshot.key, "k");
        assert_eq!(snapshot.timestamps, [0]);
        assert_eq!(snapshot.window_ms, 100);
        assert_eq!(snapshot.limit, 5);
    }

    #[test]
    fn test_record_follows_latest_policy() {
        let (store, _clock) = store_at(0);

        store.check("k", &policy(1_000, 5));
        store.check("k", &policy(5_000, 2));

        let record = store.status("k").unwrap();
        assert_eq!(record.window_ms, 5_000);
        assert_eq!(record.limit, 2);
        assert!(!store.check("k", &policy(5_000, 2)).allowed);
    }

    #[test]
    fn test_sweep_evicts_after_window_plus_grace() {
        let (store, clock) = store_at(0);
        let grace = Duration::from_secs(60);

        store.check("old", &policy(1_000, 5));
        clock.set(30_000);
        store.check("recent", &policy(1_000, 5));

        clock.set(60_999);
        assert_eq!(store.sweep(grace), 0);

        clock.set(61_000);
        assert_eq!(store.sweep(grace), 1);
        assert_eq!(store.size(), 1);
        assert!(store.status("old").is_none());
        assert!(store.status("recent").is_some());

        // A returning key starts from scratch
        let decision = store.check("old", &policy(1_000, 5));
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 4);
        assert_eq!(store.status("old").unwrap().count(), 1);
    }

    #[test]
    fn test_sweep_evicts_records_that_never_admitted() {
        let (store, clock) = store_at(1_000);

        store.check("blocked", &policy(1_000, 0));
        clock.set(2_999);
        assert_eq!(store.sweep(Duration::from_secs(1)), 0);
        clock.set(3_000);
        assert_eq!(store.sweep(Duration::from_secs(1)), 1);
        assert_eq!(store.size(), 0);
    }

    #[test]
    fn test_sweep_count_ignores_concurrent_inserts() {
        let (store, clock) = store_at(0);
        let policy = policy(1_000, 5);

        for i in 0..5_000 {
            store.check(&format!("stale-{i}"), &policy);
        }
        clock.set(100_000);

        let evicted = std::thread::scope(|scope| {
            let inserter = scope.spawn(|| {
                for i in 0..5_000 {
                    store.check(&format!("fresh-{i}"), &policy);
                }
            });
            let evicted = store.sweep(Duration::from_secs(1));
            inserter.join().unwrap();
            evicted
        });

        assert_eq!(evicted, 5_000);
        assert_eq!(store.size(), 5_000);
        assert!(store.status("stale-0").is_none());
        assert!(store.status("fresh-0").is_some());
    }

    #[test]
    fn test_bounded_admission_under_random_traffic() {
        let mut rng = StdRng::seed_from_u64(0x5eed);

        for _ in 0..20 {
            let window_ms = rng.gen_range(10..2_000);
            let max_requests = rng.gen_range(0..8);
            let policy = policy(window_ms, max_requests);
            let (store, clock) = store_at(0);

            let mut now = 0u64;
            let mut admitted = Vec::new();
            for _ in 0..500 {
                now += rng.gen_range(0..window_ms / 4 + 1);
                clock.set(now);
                if store.check("k", &policy).allowed {
                    admitted.push(now);
                }
            }

            // Every trailing window starting at an admission holds at most max_requests
            for (i, &start) in admitted.iter().enumerate() {
                let in_window = admitted[i..]
                    .iter()
                    .take_while(|&&t| t < start + window_ms)
                    .count();
                assert!(
                    in_window <= max_requests as usize,
                    "{in_window} admissions within {window_ms}ms, limit {max_requests}"
                );
            }
        }
    }

    #[test]
    fn test_concurrent_checks_respect_limit() {
        let (store, _clock) = store_at(0);
        let store = Arc::new(store);
        let policy = Arc::new(policy(60_000, 25));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                let policy = Arc::clone(&policy);
                std::thread::spawn(move || {
                    (0..50)
                        .filter(|_| store.check("shared", &policy).allowed)
                        .count()
                })
            })
            .collect();

        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 25);
        assert_eq!(store.status("shared").unwrap().count(), 25);
    }
}
