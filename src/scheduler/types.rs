//! Scheduler type definitions.
//!
//! This module contains error types, state enums, and the job registration spec.

use thiserror::Error;

use crate::config::ConfigError;
use crate::core::job::JobData;
use crate::core::schedule::ScheduleError;
use crate::core::types::JobKey;
use crate::storage::StorageError;

/// Errors that can occur in the scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Cron expression is invalid or never fires.
    #[error("invalid schedule: {0}")]
    InvalidSchedule(#[from] ScheduleError),

    /// Blank or otherwise unusable argument.
    #[error("invalid argument: {0}")]
    Argument(String),

    /// Job not found.
    #[error("job not found: {0}")]
    JobNotFound(String),

    /// Trigger state outside the job state taxonomy.
    #[error("unknown trigger state for job {0}")]
    UnknownState(String),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Settings could not be applied.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// State of the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Scheduler is stopped.
    Stopped,
    /// Scheduler is running.
    Running,
}

/// Registration request for [`add_job`](super::Scheduler::add_job).
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub key: JobKey,
    /// Cron expression of the job's recurring trigger, if any.
    pub cron_expression: Option<String>,
    pub data: JobData,
    pub description: Option<String>,
}

impl JobSpec {
    /// Create a spec for a job without a trigger.
    pub fn new(key: impl Into<JobKey>) -> Self {
        Self {
            key: key.into(),
            cron_expression: None,
            data: JobData::new(),
            description: None,
        }
    }

    /// Set the cron expression.
    pub fn with_cron(mut self, expression: impl Into<String>) -> Self {
        self.cron_expression = Some(expression.into());
        self
    }

    /// Set the job data.
    pub fn with_data(mut self, data: JobData) -> Self {
        self.data = data;
        self
    }

    /// Add one job data entry.
    pub fn with_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

impl From<&str> for JobSpec {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for JobSpec {
    fn from(key: String) -> Self {
        Self::new(key)
    }
}

impl From<JobKey> for JobSpec {
    fn from(key: JobKey) -> Self {
        Self::new(key)
    }
}
