//! Job trait and error types.
//!
//! The `Job` trait is the unit of work the scheduler fires. Implement it and
//! register the type with the host's [`ServiceCollection`](crate::ServiceCollection)
//! so the scheduler can resolve a fresh instance for every fire.

use async_trait::async_trait;
use std::any::Any;
use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;
use thiserror::Error;

use super::context::JobContext;

/// Free-form string data attached to a job when it is added.
pub type JobData = HashMap<String, String>;

/// A failure shared between the execution pipeline and event subscribers.
pub type SharedError = Arc<dyn Error + Send + Sync>;

/// Errors raised by a job's `execute`.
#[derive(Debug, Error)]
pub enum JobError {
    /// Job execution failed with a message.
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// The job observed its cancellation token and stopped early.
    #[error("job was cancelled")]
    Cancelled,

    /// The job panicked while running.
    #[error("job panicked: {0}")]
    Panicked(String),

    /// Generic error wrapper.
    #[error(transparent)]
    Other(#[from] Box<dyn Error + Send + Sync>),
}

impl JobError {
    /// Convert a caught panic payload into an error.
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        JobError::Panicked(panic_message(payload))
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// The core trait for defining schedulable jobs.
///
/// # Example
///
/// ```ignore
/// use tickwork::{Job, JobContext, JobError};
/// use async_trait::async_trait;
///
/// struct PurgeSessions;
///
/// #[async_trait]
/// impl Job for PurgeSessions {
///     async fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
///         if ctx.is_cancelled() {
///             return Err(JobError::Cancelled);
///         }
///         // Do work
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Job: Send + Sync + 'static {
    /// Execute the job for one fire.
    ///
    /// # Returns
    /// * `Ok(())` - Job completed successfully
    /// * `Err(JobError)` - Job failed; the error is attached to the
    ///   `AfterExecution` event
    async fn execute(&self, ctx: &JobContext) -> Result<(), JobError>;
}
