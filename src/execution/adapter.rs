//! Native job invocation contract and the adapter that runs [`Job`]s on it.
//!
//! The engine only knows how to fire a [`NativeJob`] with a [`FireContext`].
//! [`JobAdapter`] bridges user [`Job`]s onto that contract: it builds the
//! read-only [`JobContext`] and turns a [`JobError`] into the engine's
//! [`JobExecutionError`] while keeping the original error inspectable.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::services::{ResolveError, ServiceScope};
use crate::core::context::JobContext;
use crate::core::detail::JobMetadata;
use crate::core::job::{Job, JobData, SharedError};
use crate::core::types::{FireId, JobKey, TriggerKey};
use crate::storage::CompletionInstruction;

/// Everything the engine knows about one fire.
#[derive(Debug, Clone)]
pub struct FireContext {
    pub fire_id: FireId,
    pub job_key: JobKey,
    pub trigger_key: TriggerKey,
    /// Actual time of the fire.
    pub fire_time: DateTime<Utc>,
    /// Time the trigger was due, if it differs from the actual fire time.
    pub scheduled_fire_time: Option<DateTime<Utc>>,
    pub next_fire_time: Option<DateTime<Utc>>,
    pub previous_fire_time: Option<DateTime<Utc>>,
    pub cancellation: CancellationToken,
    pub data: Arc<JobData>,
}

impl FireContext {
    /// Read-only view handed to a [`Job`].
    pub fn job_context(&self) -> JobContext {
        JobContext::new(self.job_key.clone(), self.fire_time)
            .with_fire_id(self.fire_id)
            .with_metadata(JobMetadata {
                next_fire_time_utc: self.next_fire_time,
                previous_fire_time_utc: self.previous_fire_time,
            })
            .with_cancellation(self.cancellation.clone())
            .with_data(Arc::clone(&self.data))
    }
}

/// Failure signal understood by the engine.
///
/// The flags let a job ask the store to stop firing its triggers.
#[derive(Debug, Clone)]
pub struct JobExecutionError {
    cause: SharedError,
    unschedule_firing_trigger: bool,
    unschedule_all_triggers: bool,
}

impl JobExecutionError {
    pub fn new(cause: impl Error + Send + Sync + 'static) -> Self {
        Self::from_shared(Arc::new(cause))
    }

    pub fn from_shared(cause: SharedError) -> Self {
        Self {
            cause,
            unschedule_firing_trigger: false,
            unschedule_all_triggers: false,
        }
    }

    /// Stop firing the trigger that caused this execution.
    pub fn with_unschedule_firing_trigger(mut self, unschedule: bool) -> Self {
        self.unschedule_firing_trigger = unschedule;
        self
    }

    /// Stop firing every trigger of the job.
    pub fn with_unschedule_all_triggers(mut self, unschedule: bool) -> Self {
        self.unschedule_all_triggers = unschedule;
        self
    }

    /// The error the job originally raised.
    pub fn cause(&self) -> &SharedError {
        &self.cause
    }

    pub fn unschedule_firing_trigger(&self) -> bool {
        self.unschedule_firing_trigger
    }

    pub fn unschedule_all_triggers(&self) -> bool {
        self.unschedule_all_triggers
    }

    /// What the store should do with the job's triggers after this failure.
    pub fn instruction(&self) -> CompletionInstruction {
        if self.unschedule_all_triggers {
            CompletionInstruction::SetAllJobTriggersComplete
        } else if self.unschedule_firing_trigger {
            CompletionInstruction::SetTriggerComplete
        } else {
            CompletionInstruction::Noop
        }
    }
}

impl fmt::Display for JobExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job execution failed: {}", self.cause)
    }
}

impl Error for JobExecutionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(self.cause.as_ref())
    }
}

/// The engine's job invocation contract.
#[async_trait]
pub trait NativeJob: Send + Sync + 'static {
    async fn execute(&self, ctx: &FireContext) -> Result<(), JobExecutionError>;
}

/// Construction of a native job from a resolution scope.
pub trait Activate: NativeJob + Sized {
    fn activate(scope: &ServiceScope) -> Result<Self, ResolveError>;
}

/// Runs a [`Job`] through the native contract.
pub struct JobAdapter<J: Job> {
    job: Arc<J>,
}

impl<J: Job> JobAdapter<J> {
    pub fn new(job: Arc<J>) -> Self {
        Self { job }
    }
}

#[async_trait]
impl<J: Job> NativeJob for JobAdapter<J> {
    async fn execute(&self, ctx: &FireContext) -> Result<(), JobExecutionError> {
        let job_ctx = ctx.job_context();
        self.job
            .execute(&job_ctx)
            .await
            .map_err(JobExecutionError::new)
    }
}

impl<J: Job> Activate for JobAdapter<J> {
    fn activate(scope: &ServiceScope) -> Result<Self, ResolveError> {
        Ok(Self::new(scope.get::<J>()?))
    }
}
