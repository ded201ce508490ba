//! Testing utilities for users of the tickwork library.
//!
//! This module provides helpers for testing scheduled jobs:
//!
//! - [`RecordingHandler`]: An event handler that captures execution events
//! - [`CountingJob`], [`FailingJob`], [`PanickingJob`], [`SlowJob`]: Jobs with
//!   predictable behaviour
//! - [`fire_context`]: A ready-made fire context for driving jobs directly
//! - [`wait_until`]: Polls a condition until it holds or a timeout elapses

use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::core::context::JobContext;
use crate::core::job::{Job, JobData, JobError};
use crate::core::types::{FireId, JobKey, TriggerKey};
use crate::events::{EventHandler, ExecutionTimeline, SchedulerEvent};
use crate::execution::FireContext;

/// Interval between condition checks in [`wait_until`].
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Event handler that records every event it receives.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use tickwork::events::EventBus;
/// use tickwork::testing::RecordingHandler;
///
/// # tokio_test_block(async {
/// let bus = EventBus::new();
/// let recorder = Arc::new(RecordingHandler::new());
/// bus.register(recorder.clone()).await;
/// assert!(recorder.events().await.is_empty());
/// # });
/// # fn tokio_test_block<F: std::future::Future>(f: F) {
/// #     tokio::runtime::Runtime::new().unwrap().block_on(f);
/// # }
/// ```
#[derive(Default)]
pub struct RecordingHandler {
    events: Mutex<Vec<SchedulerEvent>>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// All events received so far, in order.
    pub async fn events(&self) -> Vec<SchedulerEvent> {
        self.events.lock().await.clone()
    }

    /// Events received for one job.
    pub async fn events_for(&self, job_key: &str) -> Vec<SchedulerEvent> {
        self.events
            .lock()
            .await
            .iter()
            .filter(|e| e.job_key.as_str() == job_key)
            .cloned()
            .collect()
    }

    /// Number of `AfterExecution` events received.
    pub async fn completed(&self) -> usize {
        self.events
            .lock()
            .await
            .iter()
            .filter(|e| e.timeline == ExecutionTimeline::AfterExecution)
            .count()
    }

    /// Wait until at least `count` events arrived. Returns false on timeout.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.events.lock().await.len() >= count {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn handle(&self, event: &SchedulerEvent) {
        self.events.lock().await.push(event.clone());
    }
}

/// Poll `condition` until it returns true. Returns false on timeout.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Fire context for a manual fire of `job_key` happening now.
pub fn fire_context(job_key: &str) -> FireContext {
    FireContext {
        fire_id: FireId::new(),
        job_key: JobKey::new(job_key),
        trigger_key: TriggerKey::manual(),
        fire_time: Utc::now(),
        scheduled_fire_time: None,
        next_fire_time: None,
        previous_fire_time: None,
        cancellation: CancellationToken::new(),
        data: Arc::new(JobData::new()),
    }
}

/// Job that counts its executions.
pub struct CountingJob {
    runs: Arc<AtomicUsize>,
}

impl CountingJob {
    pub fn new(runs: Arc<AtomicUsize>) -> Self {
        Self { runs }
    }
}

#[async_trait]
impl Job for CountingJob {
    async fn execute(&self, _ctx: &JobContext) -> Result<(), JobError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Job that always fails with the given message.
pub struct FailingJob {
    message: String,
}

impl FailingJob {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl Job for FailingJob {
    async fn execute(&self, _ctx: &JobContext) -> Result<(), JobError> {
        Err(JobError::ExecutionFailed(self.message.clone()))
    }
}

/// Job that panics.
pub struct PanickingJob;

#[async_trait]
impl Job for PanickingJob {
    async fn execute(&self, _ctx: &JobContext) -> Result<(), JobError> {
        panic!("job panicked on purpose");
    }
}

#[derive(Default)]
struct SlowJobStats {
    started: AtomicUsize,
    finished: AtomicUsize,
    cancelled: AtomicUsize,
    current: AtomicUsize,
    max_concurrent: AtomicUsize,
}

/// Job that sleeps for a fixed time unless cancelled.
///
/// Clones share their counters, so a clone kept by the test observes every
/// instance the scheduler resolves.
#[derive(Clone)]
pub struct SlowJob {
    duration: Duration,
    stats: Arc<SlowJobStats>,
}

impl SlowJob {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            stats: Arc::new(SlowJobStats::default()),
        }
    }

    /// Executions that started.
    pub fn started(&self) -> usize {
        self.stats.started.load(Ordering::SeqCst)
    }

    /// Executions that slept their full duration.
    pub fn finished(&self) -> usize {
        self.stats.finished.load(Ordering::SeqCst)
    }

    /// Executions that stopped on cancellation.
    pub fn cancelled(&self) -> usize {
        self.stats.cancelled.load(Ordering::SeqCst)
    }

    /// Highest number of executions observed running at once.
    pub fn max_concurrent(&self) -> usize {
        self.stats.max_concurrent.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Job for SlowJob {
    async fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        let stats = &self.stats;
        stats.started.fetch_add(1, Ordering::SeqCst);
        let current = stats.current.fetch_add(1, Ordering::SeqCst) + 1;
        stats.max_concurrent.fetch_max(current, Ordering::SeqCst);

        let result = tokio::select! {
            _ = tokio::time::sleep(self.duration) => {
                stats.finished.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            _ = ctx.cancelled() => {
                stats.cancelled.fetch_add(1, Ordering::SeqCst);
                Err(JobError::Cancelled)
            }
        };

        stats.current.fetch_sub(1, Ordering::SeqCst);
        result
    }
}
