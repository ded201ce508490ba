//! Scheduler engine implementation.
//!
//! The engine is responsible for:
//! - Acquiring due triggers from storage on every tick or wake-up
//! - Running each fire on its own task
//! - Reporting completion back to storage
//! - Waiting for running executions on shutdown

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::core::types::{FireId, JobKey};
use crate::execution::{FireContext, JobExecutor};
use crate::storage::{FiredTrigger, Storage};

/// Interval between checks while waiting for running executions to finish.
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// An execution in flight.
struct RunningJob {
    job_key: JobKey,
    handle: JoinHandle<()>,
    cancellation: CancellationToken,
}

/// Tick loop that fires due triggers.
pub(crate) struct Engine<S: Storage> {
    storage: Arc<S>,
    executor: Arc<JobExecutor>,
    running: Arc<RwLock<HashMap<FireId, RunningJob>>>,
    wakeup: Arc<Notify>,
    tick_interval: Duration,
    shutdown_timeout: Duration,
}

impl<S: Storage + 'static> Engine<S> {
    pub(crate) fn new(
        storage: Arc<S>,
        executor: Arc<JobExecutor>,
        tick_interval: Duration,
        shutdown_timeout: Duration,
    ) -> Self {
        Self {
            storage,
            executor,
            running: Arc::new(RwLock::new(HashMap::new())),
            wakeup: Arc::new(Notify::new()),
            tick_interval,
            shutdown_timeout,
        }
    }

    /// Ask the loop to look for due triggers without waiting for the next tick.
    pub(crate) fn wake(&self) {
        self.wakeup.notify_one();
    }

    /// Main engine loop. Returns once `shutdown` is cancelled and running
    /// executions finished or the shutdown timeout elapsed.
    pub(crate) async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(tick_interval = ?self.tick_interval, "Scheduler engine started");

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
                _ = self.wakeup.notified() => {}
            }

            self.fire_due_triggers(&shutdown).await;
            self.cleanup_finished_jobs().await;
        }

        self.await_running_jobs().await;
        tracing::info!("Scheduler engine stopped");
    }

    /// Acquire every due trigger and spawn its execution.
    async fn fire_due_triggers(&self, shutdown: &CancellationToken) {
        let fired = match self.storage.acquire_next_triggers(Utc::now()).await {
            Ok(fired) => fired,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to acquire due triggers");
                return;
            }
        };

        for trigger in fired {
            tracing::debug!(
                job_key = %trigger.job_key,
                trigger_key = %trigger.trigger_key,
                "Firing trigger"
            );
            self.spawn_execution(trigger, shutdown).await;
        }
    }

    async fn spawn_execution(&self, fired: FiredTrigger, shutdown: &CancellationToken) {
        let fire_id = FireId::new();
        let cancellation = shutdown.child_token();
        let ctx = FireContext {
            fire_id,
            job_key: fired.job_key.clone(),
            trigger_key: fired.trigger_key.clone(),
            fire_time: fired.fire_time,
            scheduled_fire_time: fired.scheduled_fire_time,
            next_fire_time: fired.next_fire_time,
            previous_fire_time: fired.previous_fire_time,
            cancellation: cancellation.clone(),
            data: Arc::clone(&fired.job.data),
        };
        let job_key = fired.job_key.clone();

        let storage = Arc::clone(&self.storage);
        let executor = Arc::clone(&self.executor);
        let running = Arc::clone(&self.running);
        let wakeup = Arc::clone(&self.wakeup);

        // Held across spawn so the task cannot remove its entry before it is inserted.
        let mut running_guard = self.running.write().await;

        let handle = tokio::spawn(async move {
            let outcome = executor.execute(&fired.job.job_type, &ctx).await;

            tracing::debug!(
                job_key = %fired.job_key,
                fire_id = %fire_id,
                success = outcome.is_success(),
                duration = ?outcome.duration,
                "Execution finished"
            );

            if let Err(e) = storage
                .triggered_job_complete(&fired, outcome.instruction)
                .await
            {
                tracing::warn!(
                    job_key = %fired.job_key,
                    fire_id = %fire_id,
                    error = %e,
                    "Failed to record execution completion"
                );
            }

            running.write().await.remove(&fire_id);
            // Completion may unblock triggers that are already due.
            wakeup.notify_one();
        });

        running_guard.insert(
            fire_id,
            RunningJob {
                job_key,
                handle,
                cancellation,
            },
        );
    }

    /// Cancel every running execution of a job. Returns how many were signalled.
    pub(crate) async fn interrupt(&self, job_key: &JobKey) -> usize {
        let running = self.running.read().await;
        let mut count = 0;
        for job in running.values().filter(|job| &job.job_key == job_key) {
            job.cancellation.cancel();
            count += 1;
        }
        if count > 0 {
            tracing::info!(job_key = %job_key, executions = count, "Interrupted running job");
        }
        count
    }

    /// Keys of the jobs currently executing.
    pub(crate) async fn running_keys(&self) -> Vec<JobKey> {
        self.running
            .read()
            .await
            .values()
            .filter(|job| !job.handle.is_finished())
            .map(|job| job.job_key.clone())
            .collect()
    }

    /// Clean up finished job handles.
    async fn cleanup_finished_jobs(&self) {
        let mut running = self.running.write().await;
        running.retain(|_, job| !job.handle.is_finished());
    }

    /// Wait for all running jobs to complete with a timeout.
    async fn await_running_jobs(&self) {
        let running_count = self.running.read().await.len();

        if running_count == 0 {
            tracing::info!("No running jobs to wait for during shutdown");
            return;
        }

        tracing::info!(
            "Graceful shutdown: waiting for {} running job(s) to complete (timeout: {:?})",
            running_count,
            self.shutdown_timeout
        );

        let start = tokio::time::Instant::now();
        let deadline = start + self.shutdown_timeout;

        loop {
            let mut running = self.running.write().await;
            running.retain(|_, job| !job.handle.is_finished());
            let remaining = running.len();
            drop(running);

            if remaining == 0 {
                tracing::info!("All running jobs completed gracefully in {:?}", start.elapsed());
                break;
            }

            if tokio::time::Instant::now() >= deadline {
                tracing::warn!(
                    "Graceful shutdown timeout ({:?}) exceeded with {} job(s) still running",
                    self.shutdown_timeout,
                    remaining
                );
                break;
            }

            tokio::time::sleep(SHUTDOWN_POLL_INTERVAL).await;
        }
    }
}
