//! Execution events and event handling.
//!
//! Every fire produces two [`SchedulerEvent`]s: one before the job runs and
//! one after, the latter carrying the job's error if it failed. Handlers are
//! registered on an [`EventBus`]; a handler that panics is logged and skipped
//! so notification never affects the job outcome.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::core::job::{panic_message, SharedError};
use crate::core::types::{FireId, JobKey};

/// Point of the execution an event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionTimeline {
    BeforeExecution,
    AfterExecution,
}

/// Notification about one fire of a job.
#[derive(Debug, Clone)]
pub struct SchedulerEvent {
    pub fire_id: FireId,
    pub job_key: JobKey,
    /// Fire time of the execution.
    pub execution_time: DateTime<Utc>,
    pub timeline: ExecutionTimeline,
    /// Present only on `AfterExecution` events of failed executions.
    pub exception: Option<SharedError>,
}

impl SchedulerEvent {
    /// Create a BeforeExecution event.
    pub fn before_execution(fire_id: FireId, job_key: JobKey, execution_time: DateTime<Utc>) -> Self {
        Self {
            fire_id,
            job_key,
            execution_time,
            timeline: ExecutionTimeline::BeforeExecution,
            exception: None,
        }
    }

    /// Create an AfterExecution event.
    pub fn after_execution(
        fire_id: FireId,
        job_key: JobKey,
        execution_time: DateTime<Utc>,
        exception: Option<SharedError>,
    ) -> Self {
        Self {
            fire_id,
            job_key,
            execution_time,
            timeline: ExecutionTimeline::AfterExecution,
            exception,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.exception.is_some()
    }
}

/// Handler for receiving execution events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle an event.
    async fn handle(&self, event: &SchedulerEvent);
}

/// Adapts a plain closure into an [`EventHandler`].
pub struct FnEventHandler<F> {
    f: F,
}

impl<F> FnEventHandler<F>
where
    F: Fn(&SchedulerEvent) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> EventHandler for FnEventHandler<F>
where
    F: Fn(&SchedulerEvent) + Send + Sync,
{
    async fn handle(&self, event: &SchedulerEvent) {
        (self.f)(event)
    }
}

/// Token returned by [`EventBus::register`], used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Event bus for distributing events to registered handlers.
pub struct EventBus {
    handlers: RwLock<Vec<(SubscriptionId, Arc<dyn EventHandler>)>>,
    next_id: AtomicU64,
}

impl EventBus {
    /// Create a new event bus with no handlers.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register an event handler.
    pub async fn register(&self, handler: Arc<dyn EventHandler>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers.write().await.push((id, handler));
        id
    }

    /// Remove a handler. Returns false if it was not registered.
    pub async fn unregister(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write().await;
        let before = handlers.len();
        handlers.retain(|(handler_id, _)| *handler_id != id);
        handlers.len() != before
    }

    /// Emit an event to all registered handlers.
    ///
    /// Handlers run one after another; a panicking handler is logged and the
    /// remaining handlers still receive the event.
    pub async fn emit(&self, event: SchedulerEvent) {
        // Snapshot so handlers may (un)register without deadlocking.
        let handlers: Vec<_> = self
            .handlers
            .read()
            .await
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();

        for handler in handlers {
            if let Err(payload) = AssertUnwindSafe(handler.handle(&event)).catch_unwind().await {
                tracing::warn!(
                    job_key = %event.job_key,
                    fire_id = %event.fire_id,
                    timeline = ?event.timeline,
                    panic = %panic_message(payload.as_ref()),
                    "Event handler panicked, notification skipped"
                );
            }
        }
    }

    /// Get the number of registered handlers.
    pub async fn handler_count(&self) -> usize {
        self.handlers.read().await.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
