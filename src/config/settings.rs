//! Scheduler settings.
//!
//! Settings live under a required `scheduler` section:
//!
//! ```yaml
//! scheduler:
//!   provider: in_memory
//!   time_zone_id: Europe/Berlin
//!   tick_interval: 500ms
//!   shutdown_timeout: 30s
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use super::error::ConfigError;
use crate::core::schedule::SchedulerTimeZone;

/// Backing store used by the scheduler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingProvider {
    /// Process-local store; contents are lost on exit.
    #[default]
    InMemory,
}

/// Scheduler settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerSettings {
    pub provider: SchedulingProvider,
    /// `Local`, `Utc` or an IANA zone name, applied to every cron trigger.
    pub time_zone_id: String,
    /// How often the engine looks for due triggers.
    #[serde(with = "humantime_serde")]
    pub tick_interval: Duration,
    /// How long `stop` waits for running executions.
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            provider: SchedulingProvider::InMemory,
            time_zone_id: SchedulerTimeZone::Local.to_string(),
            tick_interval: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Deserialize)]
struct SettingsFile {
    scheduler: SchedulerSettings,
}

impl SchedulerSettings {
    /// Load settings from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileReadError {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    /// Parse settings from a YAML string.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let file: SettingsFile = serde_yaml::from_str(yaml)?;
        file.scheduler.validate()?;
        Ok(file.scheduler)
    }

    /// Set the time zone id.
    pub fn with_time_zone_id(mut self, time_zone_id: impl Into<String>) -> Self {
        self.time_zone_id = time_zone_id.into();
        self
    }

    /// Set the tick interval.
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Set the graceful shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Check the settings for values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.time_zone()?;
        if self.tick_interval.is_zero() {
            return Err(ConfigError::InvalidConfig(
                "tick_interval must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Resolve the configured time zone.
    pub fn time_zone(&self) -> Result<SchedulerTimeZone, ConfigError> {
        self.time_zone_id
            .parse()
            .map_err(ConfigError::InvalidTimeZone)
    }
}
