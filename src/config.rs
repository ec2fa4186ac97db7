//! Synchronizer configuration.
//!
//! Loaded from an optional JSON file; every field falls back to a default.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ledger::StateResource;

/// Top-level synchronizer configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynchronizerConfig {
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub poller: PollerConfig,
    #[serde(default)]
    pub handlers: HandlerConfig,
}

impl SynchronizerConfig {
    /// Read, parse and validate a JSON configuration file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
        let config: Self =
            serde_json::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.connection.validate()?;
        self.poller.validate()
    }
}

/// Shape of the reconnect delay curve.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// `base * 2^(attempt - 1)`, capped.
    #[default]
    Exponential,
    /// `base * attempt`.
    Linear,
}

/// Subscription lifecycle configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Liveness probe period (seconds).
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    /// Delay before the first reconnect attempt (milliseconds).
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,
    /// Attempts before the manager gives up until the next start.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default)]
    pub backoff: BackoffStrategy,
    /// Upper bound for exponential delays (seconds).
    #[serde(default = "default_max_reconnect_delay_secs")]
    pub max_reconnect_delay_secs: u64,
}

fn default_heartbeat_interval_secs() -> u64 {
    300
}

fn default_reconnect_base_delay_ms() -> u64 {
    5_000
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

fn default_max_reconnect_delay_secs() -> u64 {
    300
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            backoff: BackoffStrategy::default(),
            max_reconnect_delay_secs: default_max_reconnect_delay_secs(),
        }
    }
}

impl ConnectionConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn reconnect_base_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_delay_ms)
    }

    pub fn max_reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.max_reconnect_delay_secs)
    }

    /// Delay to wait before reconnect attempt number `attempt` (1-based).
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        let base = self.reconnect_base_delay();
        let attempt = attempt.max(1);
        match self.backoff {
            BackoffStrategy::Linear => base.saturating_mul(attempt),
            BackoffStrategy::Exponential => {
                let factor = 2u32.saturating_pow(attempt - 1);
                base.saturating_mul(factor).min(self.max_reconnect_delay())
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.heartbeat_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "heartbeat_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.reconnect_base_delay_ms == 0 {
            return Err(ConfigError::Invalid(
                "reconnect_base_delay_ms must be greater than zero".to_string(),
            ));
        }
        if self.max_reconnect_attempts == 0 {
            return Err(ConfigError::Invalid(
                "max_reconnect_attempts must be greater than zero".to_string(),
            ));
        }
        if self.max_reconnect_delay() < self.reconnect_base_delay() {
            return Err(ConfigError::Invalid(format!(
                "max_reconnect_delay_secs ({}s) is below the base delay ({}ms)",
                self.max_reconnect_delay_secs, self.reconnect_base_delay_ms
            )));
        }
        Ok(())
    }
}

/// Reconciliation poller configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollerConfig {
    #[serde(default = "default_poller_enabled")]
    pub enabled: bool,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Resources re-derived on every tick.
    #[serde(default = "default_poll_resources")]
    pub resources: Vec<StateResource>,
}

fn default_poller_enabled() -> bool {
    true
}

fn default_poll_interval_secs() -> u64 {
    10
}

fn default_poll_resources() -> Vec<StateResource> {
    vec![StateResource::ActiveMissions]
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            enabled: default_poller_enabled(),
            poll_interval_secs: default_poll_interval_secs(),
            resources: default_poll_resources(),
        }
    }
}

impl PollerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled && self.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "poll_interval_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Handler behaviour switches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerConfig {
    /// Skip a cashback grant already recorded at the same ledger position.
    #[serde(default)]
    pub dedupe_cashback_grants: bool,
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load config: {0}")]
    Load(String),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}
