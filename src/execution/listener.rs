//! Before/after execution notifications.

use async_trait::async_trait;
use std::sync::Arc;

use super::adapter::{FireContext, JobExecutionError};
use crate::events::{EventBus, SchedulerEvent};

/// Observer invoked around every fire.
#[async_trait]
pub trait JobListener: Send + Sync {
    /// Called right before the job executes.
    async fn job_to_be_executed(&self, ctx: &FireContext);

    /// Called after the job finished, with its failure if any.
    async fn job_was_executed(&self, ctx: &FireContext, error: Option<&JobExecutionError>);
}

/// Publishes fire notifications as [`SchedulerEvent`]s.
pub struct ExecutionListener {
    bus: Arc<EventBus>,
}

impl ExecutionListener {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl JobListener for ExecutionListener {
    async fn job_to_be_executed(&self, ctx: &FireContext) {
        self.bus
            .emit(SchedulerEvent::before_execution(
                ctx.fire_id,
                ctx.job_key.clone(),
                ctx.fire_time,
            ))
            .await;
    }

    async fn job_was_executed(&self, ctx: &FireContext, error: Option<&JobExecutionError>) {
        self.bus
            .emit(SchedulerEvent::after_execution(
                ctx.fire_id,
                ctx.job_key.clone(),
                ctx.fire_time,
                error.map(|e| Arc::clone(e.cause())),
            ))
            .await;
    }
}
