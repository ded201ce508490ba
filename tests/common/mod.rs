//! Common test utilities shared across integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tickwork::{
    InMemoryStorage, Job, JobContext, JobData, JobError, Scheduler, SchedulerSettings,
    ServiceCollection,
};
use tokio::sync::Mutex;

/// Default time to wait for asynchronous effects.
pub const WAIT: Duration = Duration::from_secs(5);

/// Install a test subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Settings with a fast tick, evaluated in UTC.
pub fn settings() -> SchedulerSettings {
    SchedulerSettings::default()
        .with_time_zone_id("Utc")
        .with_tick_interval(Duration::from_millis(20))
        .with_shutdown_timeout(Duration::from_secs(5))
}

/// Build a scheduler over in-memory storage.
pub fn scheduler(services: ServiceCollection) -> Scheduler<InMemoryStorage> {
    init_tracing();
    Scheduler::new(settings(), services).unwrap()
}

/// Signalled by [`SignalJob`] when it finishes.
#[derive(Default)]
pub struct Completion {
    count: AtomicUsize,
}

impl Completion {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// Wait until the job finished at least `count` times.
    pub async fn wait(&self, count: usize) -> bool {
        tickwork::testing::wait_until(WAIT, || self.count() >= count).await
    }
}

/// Job that takes a short while, records its job data and signals completion.
pub struct SignalJob {
    completion: Arc<Completion>,
    seen: Arc<Mutex<Vec<JobData>>>,
}

impl SignalJob {
    pub fn new(completion: Arc<Completion>, seen: Arc<Mutex<Vec<JobData>>>) -> Self {
        Self { completion, seen }
    }
}

#[async_trait]
impl Job for SignalJob {
    async fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.seen.lock().await.push(ctx.data().clone());
        self.completion.count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Poll an async condition until it holds.
///
/// # Panics
///
/// Panics if the timeout is reached first.
pub async fn eventually<F, Fut>(what: &str, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = tokio::time::Instant::now();
    loop {
        if condition().await {
            return;
        }
        if start.elapsed() > WAIT {
            panic!("Timeout waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
