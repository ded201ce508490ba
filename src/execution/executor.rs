//! Fire execution pipeline.
//!
//! The `JobExecutor` runs one fire end to end:
//! - Resolve the job in a fresh scope
//! - Notify the listener before and after execution
//! - Catch job failures and panics
//! - Release the resolved job and its scope on every path

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::adapter::{FireContext, JobExecutionError};
use super::factory::{JobFactory, JobType};
use super::listener::JobListener;
use crate::core::job::JobError;
use crate::storage::CompletionInstruction;

/// Result of executing one fire.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    /// What the store should do with the job's triggers.
    pub instruction: CompletionInstruction,
    /// The failure, if the job could not be resolved or did not succeed.
    pub error: Option<JobExecutionError>,
    /// Time spent resolving and running the job.
    pub duration: Duration,
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Executor for running fired jobs.
pub struct JobExecutor {
    factory: Arc<JobFactory>,
    listener: Arc<dyn JobListener>,
}

impl JobExecutor {
    pub fn new(factory: Arc<JobFactory>, listener: Arc<dyn JobListener>) -> Self {
        Self { factory, listener }
    }

    /// Execute a fire of a job of the given type.
    ///
    /// A job that cannot be resolved only gets an after-execution
    /// notification and puts all of its triggers into the error state.
    pub async fn execute(&self, job_type: &JobType, ctx: &FireContext) -> ExecutionOutcome {
        let start = Instant::now();

        let scoped = match self.factory.new_job(job_type) {
            Ok(scoped) => scoped,
            Err(e) => {
                tracing::error!(
                    job_key = %ctx.job_key,
                    fire_id = %ctx.fire_id,
                    job_type = job_type.type_name(),
                    error = %e,
                    "Failed to resolve job instance"
                );
                let error = JobExecutionError::new(e);
                self.listener.job_was_executed(ctx, Some(&error)).await;
                return ExecutionOutcome {
                    instruction: CompletionInstruction::SetAllJobTriggersError,
                    error: Some(error),
                    duration: start.elapsed(),
                };
            }
        };

        self.listener.job_to_be_executed(ctx).await;

        let error = match AssertUnwindSafe(scoped.job().execute(ctx)).catch_unwind().await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e),
            Err(payload) => Some(JobExecutionError::new(JobError::from_panic(payload.as_ref()))),
        };

        match &error {
            None => tracing::debug!(job_key = %ctx.job_key, fire_id = %ctx.fire_id, "Job executed"),
            Some(e) => tracing::warn!(
                job_key = %ctx.job_key,
                fire_id = %ctx.fire_id,
                error = %e,
                "Job execution failed"
            ),
        }

        self.listener.job_was_executed(ctx, error.as_ref()).await;
        self.factory.return_job(scoped);

        ExecutionOutcome {
            instruction: error
                .as_ref()
                .map_or(CompletionInstruction::Noop, JobExecutionError::instruction),
            error,
            duration: start.elapsed(),
        }
    }
}
