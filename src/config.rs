//! Configuration management for Gatekeeper.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{GatekeeperError, Result};
use crate::ratelimit::{PolicyConfig, PolicySet, SweepSettings};

/// Prefix for environment overrides, e.g. `GATEKEEPER__SWEEPER__INTERVAL_SECS`.
pub const ENV_PREFIX: &str = "GATEKEEPER";

/// Main configuration for the Gatekeeper service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatekeeperConfig {
    /// Eviction sweep configuration
    #[serde(default)]
    pub sweeper: SweeperConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Preset overrides and custom policies, by name
    #[serde(default)]
    pub policies: HashMap<String, PolicyConfig>,
}

/// Eviction sweep configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweeperConfig {
    /// Run the background sweep
    #[serde(default = "default_sweeper_enabled")]
    pub enabled: bool,

    /// Seconds between sweeps
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Seconds a record must stay idle past its window before eviction
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            enabled: default_sweeper_enabled(),
            interval_secs: default_interval_secs(),
            grace_period_secs: default_grace_period_secs(),
        }
    }
}

fn default_sweeper_enabled() -> bool {
    true
}

fn default_interval_secs() -> u64 {
    300
}

fn default_grace_period_secs() -> u64 {
    60
}

impl SweeperConfig {
    pub fn settings(&self) -> SweepSettings {
        SweepSettings {
            interval: Duration::from_secs(self.interval_secs),
            grace: Duration::from_secs(self.grace_period_secs),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl GatekeeperConfig {
    /// Load configuration from an optional YAML file, then apply
    /// `GATEKEEPER__*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            let contents = std::fs::read_to_string(path)?;
            builder = builder.add_source(::config::File::from_str(
                &contents,
                ::config::FileFormat::Yaml,
            ));
        }

        builder = builder.add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: GatekeeperConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: GatekeeperConfig = serde_yaml::from_str(yaml)
            .map_err(|e| GatekeeperError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that serde cannot.
    pub fn validate(&self) -> Result<()> {
        if self.sweeper.enabled && self.sweeper.interval_secs == 0 {
            return Err(GatekeeperError::Config(
                "sweeper.interval_secs must be greater than zero".to_string(),
            ));
        }
        self.policy_set().map(|_| ())
    }

    /// The effective named policies.
    pub fn policy_set(&self) -> Result<PolicySet> {
        PolicySet::from_config(&self.policies)
    }
}
