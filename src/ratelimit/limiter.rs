//! Admission layer over the window store.
//!
//! Turns `(key, policy)` pairs and per-request rules into store checks.
//! Key derivation and skip decisions live here, attached to an
//! [`AdmissionRule`], so the store never sees request types.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, trace};

use super::decision::{Decision, Rejection};
use super::policy::{Policy, PolicySet, Preset};
use super::store::WindowStore;
use super::sweeper::{SweepSettings, Sweeper};
use super::window::WindowRecord;
use crate::error::Result;

type KeyFn<R> = dyn Fn(&R) -> String + Send + Sync;
type SkipFn<R> = dyn Fn(&R) -> bool + Send + Sync;

/// A policy bound to a way of deriving keys from requests of type `R`.
///
/// The optional skip predicate runs before anything else. When it returns
/// `true` no record is touched and no decision is made.
pub struct AdmissionRule<R> {
    name: String,
    policy: Policy,
    key_fn: Arc<KeyFn<R>>,
    skip_fn: Option<Arc<SkipFn<R>>>,
}

impl<R> AdmissionRule<R> {
    pub fn new<F>(name: impl Into<String>, policy: Policy, key_fn: F) -> Self
    where
        F: Fn(&R) -> String + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            policy,
            key_fn: Arc::new(key_fn),
            skip_fn: None,
        }
    }

    /// A rule for a preset, named after it, using the preset's default policy.
    pub fn preset<F>(preset: Preset, key_fn: F) -> Self
    where
        F: Fn(&R) -> String + Send + Sync + 'static,
    {
        Self::new(preset.name(), preset.policy(), key_fn)
    }

    /// Bypass the limiter for requests matching `skip_fn`.
    pub fn with_skip<F>(mut self, skip_fn: F) -> Self
    where
        F: Fn(&R) -> bool + Send + Sync + 'static,
    {
        self.skip_fn = Some(Arc::new(skip_fn));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn should_skip(&self, request: &R) -> bool {
        self.skip_fn.as_ref().is_some_and(|skip| skip(request))
    }

    pub fn key_for(&self, request: &R) -> String {
        (self.key_fn)(request)
    }
}

impl<R> Clone for AdmissionRule<R> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            policy: self.policy.clone(),
            key_fn: Arc::clone(&self.key_fn),
            skip_fn: self.skip_fn.clone(),
        }
    }
}

impl<R> fmt::Debug for AdmissionRule<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionRule")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .field("has_skip", &self.skip_fn.is_some())
            .finish()
    }
}

/// Result of running a request through an [`AdmissionRule`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// The skip predicate matched; the limiter was not consulted
    Skipped,
    Allowed(Decision),
    Denied(Rejection),
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, Admission::Denied(_))
    }

    /// The underlying decision, if one was made.
    pub fn decision(&self) -> Option<&Decision> {
        match self {
            Admission::Skipped => None,
            Admission::Allowed(decision) => Some(decision),
            Admission::Denied(rejection) => Some(&rejection.decision),
        }
    }
}

/// Build a key scoped to one operation, e.g. `password-reset:alice@example.com`.
///
/// The value is trimmed and lower-cased so trivially different spellings of
/// the same account share a window.
pub fn composite_key(scope: &str, value: &str) -> String {
    format!("{}:{}", scope, value.trim().to_lowercase())
}

/// Entry point used by the request pipeline.
///
/// Owns the shared [`WindowStore`] and the named policies. Cheap to share
/// behind an `Arc`.
pub struct AdmissionLimiter {
    store: Arc<WindowStore>,
    policies: RwLock<PolicySet>,
}

impl AdmissionLimiter {
    /// Create a limiter with a fresh store and the default presets.
    pub fn new() -> Self {
        Self::with_store(Arc::new(WindowStore::new()), PolicySet::defaults())
    }

    pub fn with_store(store: Arc<WindowStore>, policies: PolicySet) -> Self {
        Self {
            store,
            policies: RwLock::new(policies),
        }
    }

    pub fn store(&self) -> &Arc<WindowStore> {
        &self.store
    }

    /// Replace the named policies.
    pub fn set_policies(&self, policies: PolicySet) {
        let mut current = self.policies.write();
        *current = policies;
    }

    /// Snapshot of the named policies.
    pub fn policies(&self) -> PolicySet {
        self.policies.read().clone()
    }

    /// Look up a named policy.
    pub fn policy(&self, name: &str) -> Result<Policy> {
        self.policies.read().require(name).cloned()
    }

    /// Check `key` against an explicit policy.
    pub fn check(&self, key: &str, policy: &Policy) -> Decision {
        self.store.check(key, policy)
    }

    /// Check `key` against a named policy.
    pub fn check_named(&self, key: &str, policy_name: &str) -> Result<Decision> {
        let policy = self.policy(policy_name)?;
        Ok(self.store.check(key, &policy))
    }

    /// Check `key` against the effective policy for `preset`.
    pub fn check_preset(&self, key: &str, preset: Preset) -> Decision {
        let policy = self.policies.read().preset(preset);
        self.store.check(key, &policy)
    }

    /// Run a request through a rule.
    pub fn admit<R>(&self, rule: &AdmissionRule<R>, request: &R) -> Admission {
        if rule.should_skip(request) {
            trace!(rule = %rule.name(), "Skipping rate limit");
            return Admission::Skipped;
        }

        let key = rule.key_for(request);
        let decision = self.store.check(&key, rule.policy());

        match Rejection::from_decision(decision, rule.policy()) {
            Some(rejection) => {
                debug!(
                    rule = %rule.name(),
                    key = %key,
                    retry_after_secs = rejection.retry_after_secs(),
                    "Request rejected"
                );
                Admission::Denied(rejection)
            }
            None => Admission::Allowed(decision),
        }
    }

    pub fn reset(&self, key: &str) {
        self.store.reset(key);
    }

    pub fn reset_all(&self) {
        self.store.reset_all();
    }

    pub fn status(&self, key: &str) -> Option<WindowRecord> {
        self.store.status(key)
    }

    pub fn size(&self) -> usize {
        self.store.size()
    }

    /// Start background eviction for this limiter's store.
    pub fn start_sweeper(&self, settings: SweepSettings) -> Sweeper {
        Sweeper::spawn(Arc::clone(&self.store), settings)
    }
}

impl Default for AdmissionLimiter {
    fn default() -> Self {
        Self::new()
    }
}
