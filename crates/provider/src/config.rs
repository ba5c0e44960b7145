//! Provider configuration

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::retry::RetryConfig;

/// Environment variable overriding the region
pub const REGION_ENV: &str = "BLOCKSTORE_REGION";
/// Environment variable overriding the compartment
pub const COMPARTMENT_ENV: &str = "BLOCKSTORE_COMPARTMENT_OCID";
/// Fallback compartment variable shared with declarative configs
pub const TF_VAR_COMPARTMENT_ENV: &str = "TF_VAR_compartment_ocid";

/// Provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Region the provider talks to
    pub region: String,

    /// Compartment used when a configuration does not name one
    pub compartment_id: String,

    /// Per-operation wait limits
    pub timeouts: Timeouts,

    /// Delay between lifecycle polls, in milliseconds
    pub poll_interval_ms: u64,

    /// Retry policy for transient service errors
    pub retry: RetrySettings,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            region: "us-phoenix-1".to_string(),
            compartment_id: String::new(),
            timeouts: Timeouts::default(),
            poll_interval_ms: 1000,
            retry: RetrySettings::default(),
        }
    }
}

/// Wait limits in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub create_secs: u64,
    pub update_secs: u64,
    pub delete_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            create_secs: 20 * 60,
            update_secs: 20 * 60,
            delete_secs: 20 * 60,
        }
    }
}

/// Serializable form of [`RetryConfig`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_delay_ms: 200,
            max_delay_ms: 10_000,
        }
    }
}

impl ProviderConfig {
    /// Load configuration from file, falling back to defaults when absent
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply overrides from the process environment
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable lookup
    pub fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(region) = lookup(REGION_ENV).filter(|v| !v.is_empty()) {
            self.region = region;
        }
        if let Some(compartment) = lookup(COMPARTMENT_ENV)
            .filter(|v| !v.is_empty())
            .or_else(|| lookup(TF_VAR_COMPARTMENT_ENV).filter(|v| !v.is_empty()))
        {
            self.compartment_id = compartment;
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            bail!("poll_interval_ms must be greater than zero");
        }
        let t = &self.timeouts;
        if t.create_secs == 0 || t.update_secs == 0 || t.delete_secs == 0 {
            bail!("timeouts must be greater than zero");
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn create_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.create_secs)
    }

    pub fn update_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.update_secs)
    }

    pub fn delete_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.delete_secs)
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.retry.max_attempts,
            initial_delay: Duration::from_millis(self.retry.initial_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
            ..RetryConfig::default()
        }
    }
}
