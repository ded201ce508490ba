//! Storage abstraction for job definitions and their triggers.
//!
//! The store owns all trigger state transitions. Every operation is an
//! atomic read-modify-write, so the scheduler facade can be called
//! concurrently without extra locking.

mod memory;

pub use memory::InMemoryStorage;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::core::detail::JobState;
use crate::core::job::JobData;
use crate::core::schedule::{CronSchedule, ScheduleError};
use crate::core::types::{JobKey, TriggerKey};
use crate::execution::JobType;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The requested item was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// A duplicate key was detected.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// Storage lock was poisoned.
    #[error("storage lock poisoned")]
    LockPoisoned,
}

/// Store-level state of a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TriggerState {
    /// Armed; fires when due.
    Waiting,
    /// Held back while another execution of the job runs.
    Blocked,
    Paused,
    /// Paused while another execution of the job runs.
    PausedBlocked,
    Complete,
    Error,
    /// Tombstone of a removed trigger. Not part of the queryable taxonomy.
    Deleted,
}

impl TriggerState {
    /// Caller-facing state, or `None` for states outside the taxonomy.
    pub fn job_state(self) -> Option<JobState> {
        match self {
            TriggerState::Waiting => Some(JobState::Normal),
            TriggerState::Blocked => Some(JobState::Blocked),
            TriggerState::Paused | TriggerState::PausedBlocked => Some(JobState::Paused),
            TriggerState::Complete => Some(JobState::Complete),
            TriggerState::Error => Some(JobState::Error),
            TriggerState::Deleted => None,
        }
    }

    pub fn is_paused(self) -> bool {
        matches!(self, TriggerState::Paused | TriggerState::PausedBlocked)
    }

    pub(crate) fn blocked(self) -> Self {
        match self {
            TriggerState::Waiting => TriggerState::Blocked,
            TriggerState::Paused => TriggerState::PausedBlocked,
            other => other,
        }
    }

    pub(crate) fn unblocked(self) -> Self {
        match self {
            TriggerState::Blocked => TriggerState::Waiting,
            TriggerState::PausedBlocked => TriggerState::Paused,
            other => other,
        }
    }

    pub(crate) fn paused(self) -> Self {
        match self {
            TriggerState::Waiting => TriggerState::Paused,
            TriggerState::Blocked => TriggerState::PausedBlocked,
            other => other,
        }
    }

    pub(crate) fn resumed(self) -> Self {
        match self {
            TriggerState::Paused => TriggerState::Waiting,
            TriggerState::PausedBlocked => TriggerState::Blocked,
            other => other,
        }
    }
}

/// What the store does with a job's triggers once an execution finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionInstruction {
    Noop,
    SetTriggerComplete,
    SetAllJobTriggersComplete,
    SetAllJobTriggersError,
}

/// Stored job definition.
#[derive(Debug, Clone)]
pub struct StoredJob {
    /// Unique job key.
    pub key: JobKey,
    /// Type resolved on every fire.
    pub job_type: JobType,
    pub description: Option<String>,
    pub data: Arc<JobData>,
    /// Durable jobs outlive their last trigger.
    pub durable: bool,
    /// When the job was added.
    pub created_at: DateTime<Utc>,
}

impl StoredJob {
    /// Create a new non-durable job definition.
    pub fn new(key: JobKey, job_type: JobType) -> Self {
        Self {
            key,
            job_type,
            description: None,
            data: Arc::new(JobData::new()),
            durable: false,
            created_at: Utc::now(),
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the job data.
    pub fn with_data(mut self, data: JobData) -> Self {
        self.data = Arc::new(data);
        self
    }

    /// Set durability.
    pub fn with_durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }
}

/// Schedule a trigger follows.
#[derive(Debug, Clone)]
pub enum TriggerKind {
    Cron(CronSchedule),
    /// Fires once at its start time.
    OneShot,
}

/// Stored trigger bound to a job.
#[derive(Debug, Clone)]
pub struct StoredTrigger {
    pub key: TriggerKey,
    pub job_key: JobKey,
    pub kind: TriggerKind,
    pub state: TriggerState,
    pub start_time: DateTime<Utc>,
    pub next_fire_time: Option<DateTime<Utc>>,
    pub previous_fire_time: Option<DateTime<Utc>>,
}

impl StoredTrigger {
    /// Cron trigger whose first fire is the first occurrence after `start`.
    pub fn cron(
        key: TriggerKey,
        job_key: JobKey,
        schedule: CronSchedule,
        start: DateTime<Utc>,
    ) -> Result<Self, ScheduleError> {
        let next = schedule.next_after(start)?;
        Ok(Self {
            key,
            job_key,
            kind: TriggerKind::Cron(schedule),
            state: TriggerState::Waiting,
            start_time: start,
            next_fire_time: Some(next),
            previous_fire_time: None,
        })
    }

    /// Trigger that fires once at `at`.
    pub fn one_shot(key: TriggerKey, job_key: JobKey, at: DateTime<Utc>) -> Self {
        Self {
            key,
            job_key,
            kind: TriggerKind::OneShot,
            state: TriggerState::Waiting,
            start_time: at,
            next_fire_time: Some(at),
            previous_fire_time: None,
        }
    }

    /// Set the initial state.
    pub fn with_state(mut self, state: TriggerState) -> Self {
        self.state = state;
        self
    }

    pub fn cron_expression(&self) -> Option<&str> {
        match &self.kind {
            TriggerKind::Cron(schedule) => Some(schedule.expression()),
            TriggerKind::OneShot => None,
        }
    }

    /// Last time the trigger will fire, if its schedule ends.
    pub fn final_fire_time(&self) -> Option<DateTime<Utc>> {
        match &self.kind {
            TriggerKind::Cron(schedule) => schedule.final_fire_time(),
            TriggerKind::OneShot => Some(self.start_time),
        }
    }

    /// Advance past a fire happening at `now`.
    ///
    /// Occurrences missed between the scheduled time and `now` are skipped;
    /// their count is returned.
    pub(crate) fn fire(&mut self, now: DateTime<Utc>) -> usize {
        let scheduled = self.next_fire_time;
        self.previous_fire_time = scheduled;

        match (&self.kind, scheduled) {
            (TriggerKind::Cron(schedule), Some(scheduled)) => {
                let (next, missed) = schedule.next_skipping_missed(scheduled, now);
                self.next_fire_time = next;
                missed
            }
            _ => {
                self.next_fire_time = None;
                0
            }
        }
    }

    /// Start a cron trigger over from `now`, dropping its fire history.
    pub(crate) fn restart(&mut self, now: DateTime<Utc>) {
        if let TriggerKind::Cron(schedule) = &self.kind {
            self.start_time = now;
            self.next_fire_time = schedule.next_after(now).ok();
            self.previous_fire_time = None;
        }
    }
}

/// A trigger acquired for execution.
#[derive(Debug, Clone)]
pub struct FiredTrigger {
    pub trigger_key: TriggerKey,
    pub job_key: JobKey,
    pub job: StoredJob,
    /// Actual fire time.
    pub fire_time: DateTime<Utc>,
    /// Time the trigger was due.
    pub scheduled_fire_time: Option<DateTime<Utc>>,
    pub next_fire_time: Option<DateTime<Utc>>,
    pub previous_fire_time: Option<DateTime<Utc>>,
}

/// Storage trait for job definitions and triggers.
#[async_trait]
pub trait Storage: Send + Sync {
    // Job operations

    /// Store a job, optionally with its first trigger, atomically.
    ///
    /// Fails with `DuplicateKey` if the job or trigger key is taken.
    async fn store_job(
        &self,
        job: StoredJob,
        trigger: Option<StoredTrigger>,
    ) -> Result<(), StorageError>;

    /// Get a job by key.
    async fn get_job(&self, key: &JobKey) -> Result<StoredJob, StorageError>;

    async fn job_exists(&self, key: &JobKey) -> Result<bool, StorageError>;

    /// List all jobs, oldest first.
    async fn list_jobs(&self) -> Result<Vec<StoredJob>, StorageError>;

    /// Remove a job and all its triggers. Returns whether anything existed.
    async fn remove_job(&self, key: &JobKey) -> Result<bool, StorageError>;

    // Trigger operations

    /// Store a new trigger for an existing job.
    async fn store_trigger(&self, trigger: StoredTrigger) -> Result<(), StorageError>;

    /// Replace the trigger with the same key, keeping its paused flag.
    ///
    /// Returns false when no such trigger exists.
    async fn replace_trigger(&self, trigger: StoredTrigger) -> Result<bool, StorageError>;

    async fn get_trigger(&self, key: &TriggerKey) -> Result<Option<StoredTrigger>, StorageError>;

    async fn triggers_for_job(&self, key: &JobKey) -> Result<Vec<StoredTrigger>, StorageError>;

    /// Pause every trigger of a job. Returns how many triggers it has.
    async fn pause_job(&self, key: &JobKey) -> Result<usize, StorageError>;

    /// Resume a job's triggers. Cron triggers start over from `now` so that
    /// occurrences missed while paused are not fired.
    async fn resume_job(&self, key: &JobKey, now: DateTime<Utc>) -> Result<usize, StorageError>;

    // Firing

    /// Acquire due triggers, at most one per job, and block their jobs.
    async fn acquire_next_triggers(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<FiredTrigger>, StorageError>;

    /// Record the end of an execution and unblock the job.
    async fn triggered_job_complete(
        &self,
        fired: &FiredTrigger,
        instruction: CompletionInstruction,
    ) -> Result<(), StorageError>;
}
