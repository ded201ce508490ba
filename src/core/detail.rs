//! Queryable snapshot of a registered job and its trigger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::JobKey;

/// State of a job as reported by its cron trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobState {
    /// Trigger is armed and will fire on schedule.
    Normal,
    /// Explicitly suspended; will not fire.
    Paused,
    /// The schedule is exhausted.
    Complete,
    /// The scheduler will not fire it because of a prior failure.
    Error,
    /// Another execution of the same job is running.
    Blocked,
    /// No trigger exists for the job.
    None,
}

/// Fire times produced by the store at query time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMetadata {
    pub next_fire_time_utc: Option<DateTime<Utc>>,
    pub previous_fire_time_utc: Option<DateTime<Utc>>,
}

/// Access to the fire times shared by [`JobDetail`] and the job context.
pub trait HasJobMetadata {
    fn metadata(&self) -> &JobMetadata;

    fn next_fire_time_utc(&self) -> Option<DateTime<Utc>> {
        self.metadata().next_fire_time_utc
    }

    fn previous_fire_time_utc(&self) -> Option<DateTime<Utc>> {
        self.metadata().previous_fire_time_utc
    }
}

/// Snapshot of a registered job, refreshed on every read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDetail {
    pub key: JobKey,
    pub description: Option<String>,
    pub cron_expression: Option<String>,
    pub state: JobState,
    /// True unless the trigger has a final fire time.
    pub is_recurring: bool,
    #[serde(flatten)]
    pub metadata: JobMetadata,
}

impl HasJobMetadata for JobDetail {
    fn metadata(&self) -> &JobMetadata {
        &self.metadata
    }
}
