//! Admission policies and the named presets.
//!
//! A [`Policy`] is an immutable `(window, max requests, message)` triple.
//! Five presets cover the sensitive operations of a typical web application;
//! any other pair can be built as a custom policy, either in code or from
//! configuration through [`PolicyConfig`].

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{GatekeeperError, Result};

/// Window length and request ceiling applied to a key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Policy {
    window_ms: u64,
    max_requests: u32,
    message: Option<String>,
}

impl Policy {
    /// Build a policy admitting `max_requests` per rolling `window`.
    ///
    /// # Panics
    ///
    /// Panics if `window` is shorter than one millisecond or does not fit in
    /// `u64` milliseconds. Such a window is a programming error, not a
    /// runtime condition.
    pub fn new(window: Duration, max_requests: u32) -> Self {
        match Self::try_new(window, max_requests) {
            Ok(policy) => policy,
            Err(e) => panic!("{e}"),
        }
    }

    /// Fallible constructor for policies coming from untrusted input.
    pub fn try_new(window: Duration, max_requests: u32) -> Result<Self> {
        let window_ms = checked_window_ms(window).map_err(GatekeeperError::InvalidPolicy)?;
        Ok(Self {
            window_ms,
            max_requests,
            message: None,
        })
    }

    /// Attach the human-readable message shown on rejection.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

/// Window length in whole milliseconds, rejecting zero and overflow.
fn checked_window_ms(window: Duration) -> std::result::Result<u64, String> {
    match u64::try_from(window.as_millis()) {
        Ok(0) => Err(format!("policy window must be at least 1ms, got {window:?}")),
        Ok(ms) => Ok(ms),
        Err(_) => Err(format!(
            "policy window {window:?} exceeds the largest representable window"
        )),
    }
}

/// The built-in policy presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Preset {
    /// Login and other credential checks
    Auth,
    /// Sign-up
    AccountCreation,
    /// Password reset requests, usually keyed by target account
    PasswordReset,
    /// File uploads
    Upload,
    /// Generic API traffic
    Api,
}

impl Preset {
    pub const ALL: [Preset; 5] = [
        Preset::Auth,
        Preset::AccountCreation,
        Preset::PasswordReset,
        Preset::Upload,
        Preset::Api,
    ];

    /// Name used in configuration and on the command line.
    pub fn name(&self) -> &'static str {
        match self {
            Preset::Auth => "auth",
            Preset::AccountCreation => "account-creation",
            Preset::PasswordReset => "password-reset",
            Preset::Upload => "upload",
            Preset::Api => "api",
        }
    }

    /// The default policy for this preset.
    pub fn policy(&self) -> Policy {
        const MINUTE: u64 = 60;
        let (minutes, max_requests, message) = match self {
            Preset::Auth => (
                15,
                5,
                "Too many authentication attempts, please try again later.",
            ),
            Preset::AccountCreation => (
                60,
                3,
                "Too many accounts created from this address, please try again later.",
            ),
            Preset::PasswordReset => (
                60,
                3,
                "Too many password reset requests, please try again later.",
            ),
            Preset::Upload => (60, 50, "Upload limit reached, please try again later."),
            Preset::Api => (15, 100, "Too many requests, please slow down."),
        };
        Policy::new(Duration::from_secs(minutes * MINUTE), max_requests).with_message(message)
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Preset {
    type Err = GatekeeperError;

    fn from_str(s: &str) -> Result<Self> {
        Preset::ALL
            .into_iter()
            .find(|p| p.name() == s)
            .ok_or_else(|| GatekeeperError::UnknownPolicy(s.to_string()))
    }
}

/// Time unit shorthand for policy windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Second,
    Minute,
    Hour,
    Day,
}

impl TimeUnit {
    pub fn duration(&self) -> Duration {
        match self {
            TimeUnit::Second => Duration::from_secs(1),
            TimeUnit::Minute => Duration::from_secs(60),
            TimeUnit::Hour => Duration::from_secs(3600),
            TimeUnit::Day => Duration::from_secs(86400),
        }
    }
}

/// Policy definition as written in configuration.
///
/// Exactly one of `window_ms`, `window_secs` or `unit` sets the window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default)]
    pub window_ms: Option<u64>,
    #[serde(default)]
    pub window_secs: Option<u64>,
    #[serde(default)]
    pub unit: Option<TimeUnit>,
    pub max_requests: u32,
    #[serde(default)]
    pub message: Option<String>,
}

impl PolicyConfig {
    /// Validate and convert into a [`Policy`].
    pub fn to_policy(&self) -> Result<Policy> {
        let window = match (self.window_ms, self.window_secs, self.unit) {
            (Some(ms), None, None) => Duration::from_millis(ms),
            (None, Some(secs), None) => Duration::from_secs(secs),
            (None, None, Some(unit)) => unit.duration(),
            (None, None, None) => {
                return Err(GatekeeperError::InvalidPolicy(
                    "one of window_ms, window_secs or unit is required".to_string(),
                ))
            }
            _ => {
                return Err(GatekeeperError::InvalidPolicy(
                    "window_ms, window_secs and unit are mutually exclusive".to_string(),
                ))
            }
        };

        let policy = Policy::try_new(window, self.max_requests)?;
        Ok(match &self.message {
            Some(message) => policy.with_message(message.clone()),
            None => policy,
        })
    }
}

/// Policies resolvable by name.
///
/// Always contains every [`Preset`]; configuration may override presets and
/// add custom names.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicySet {
    policies: BTreeMap<String, Policy>,
}

impl PolicySet {
    /// The five presets with their default values.
    pub fn defaults() -> Self {
        let policies = Preset::ALL
            .into_iter()
            .map(|p| (p.name().to_string(), p.policy()))
            .collect();
        Self { policies }
    }

    /// Defaults with the given configuration applied on top.
    pub fn from_config(overrides: &HashMap<String, PolicyConfig>) -> Result<Self> {
        let mut set = Self::defaults();
        set.apply_overrides(overrides)?;
        Ok(set)
    }

    /// Replace or add policies from configuration.
    ///
    /// Validation happens before any entry is applied, so a bad definition
    /// leaves the set untouched.
    pub fn apply_overrides(&mut self, overrides: &HashMap<String, PolicyConfig>) -> Result<()> {
        let mut parsed = Vec::with_capacity(overrides.len());
        for (name, config) in overrides {
            if name.trim().is_empty() {
                return Err(GatekeeperError::InvalidPolicy(
                    "policy name must not be empty".to_string(),
                ));
            }
            let policy = config.to_policy().map_err(|e| match e {
                GatekeeperError::InvalidPolicy(reason) => {
                    GatekeeperError::InvalidPolicy(format!("{name}: {reason}"))
                }
                other => other,
            })?;
            parsed.push((name.clone(), policy));
        }

        for (name, policy) in parsed {
            if Preset::from_str(&name).is_ok() {
                info!(
                    policy = %name,
                    window_ms = policy.window_ms(),
                    max_requests = policy.max_requests(),
                    "Overriding preset policy"
                );
            } else {
                debug!(
                    policy = %name,
                    window_ms = policy.window_ms(),
                    max_requests = policy.max_requests(),
                    "Registering custom policy"
                );
            }
            self.policies.insert(name, policy);
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Policy> {
        self.policies.get(name)
    }

    /// Like [`get`](Self::get) but reports unknown names as an error.
    pub fn require(&self, name: &str) -> Result<&Policy> {
        self.get(name)
            .ok_or_else(|| GatekeeperError::UnknownPolicy(name.to_string()))
    }

    /// The effective policy for a preset.
    pub fn preset(&self, preset: Preset) -> Policy {
        self.get(preset.name())
            .cloned()
            .unwrap_or_else(|| preset.policy())
    }

    /// All policies ordered by name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Policy)> {
        self.policies.iter().map(|(name, policy)| (name.as_str(), policy))
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

impl Default for PolicySet {
    fn default() -> Self {
        Self::defaults()
    }
}
