//! Caller-facing scheduler.
//!
//! [`Scheduler`] is the only surface callers use: it registers jobs, shapes
//! their cron triggers, answers state queries from storage and starts or
//! stops the engine loop. Operations never wait on job execution.

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::engine::Engine;
use super::handle::EngineHandle;
use super::types::{JobSpec, SchedulerError, SchedulerState};
use crate::config::SchedulerSettings;
use crate::core::detail::{JobDetail, JobMetadata, JobState};
use crate::core::job::Job;
use crate::core::schedule::{CronSchedule, SchedulerTimeZone};
use crate::core::types::{JobKey, TriggerKey};
use crate::events::{EventBus, EventHandler, FnEventHandler, SchedulerEvent, SubscriptionId};
use crate::execution::{ExecutionListener, JobExecutor, JobFactory, JobType, ServiceCollection};
use crate::storage::{InMemoryStorage, Storage, StorageError, StoredJob, StoredTrigger, TriggerState};

/// Job scheduler.
///
/// # Example
///
/// ```no_run
/// use tickwork::{Job, JobContext, JobError, JobSpec, Scheduler, SchedulerSettings, ServiceCollection};
///
/// struct Cleanup;
///
/// #[async_trait::async_trait]
/// impl Job for Cleanup {
///     async fn execute(&self, _ctx: &JobContext) -> Result<(), JobError> {
///         Ok(())
///     }
/// }
///
/// # async fn run() -> Result<(), tickwork::SchedulerError> {
/// let services = ServiceCollection::new().add_transient(|_| Ok(Cleanup));
/// let scheduler = Scheduler::new(SchedulerSettings::default(), services)?;
///
/// scheduler
///     .add_job::<Cleanup>(JobSpec::new("cleanup").with_cron("0 0 3 * * ?"))
///     .await?;
/// scheduler.resume_job("cleanup").await?;
/// scheduler.start().await;
/// # Ok(())
/// # }
/// ```
pub struct Scheduler<S: Storage + 'static = InMemoryStorage> {
    storage: Arc<S>,
    engine: Arc<Engine<S>>,
    event_bus: Arc<EventBus>,
    time_zone: SchedulerTimeZone,
    settings: SchedulerSettings,
    handle: Mutex<Option<EngineHandle>>,
}

impl Scheduler<InMemoryStorage> {
    /// Create a scheduler backed by in-memory storage.
    pub fn new(
        settings: SchedulerSettings,
        services: ServiceCollection,
    ) -> Result<Self, SchedulerError> {
        Self::with_storage(settings, services, Arc::new(InMemoryStorage::new()))
    }
}

impl<S: Storage + 'static> Scheduler<S> {
    /// Create a scheduler over the given storage.
    pub fn with_storage(
        settings: SchedulerSettings,
        services: ServiceCollection,
        storage: Arc<S>,
    ) -> Result<Self, SchedulerError> {
        settings.validate()?;
        let time_zone = settings.time_zone()?;

        let event_bus = Arc::new(EventBus::new());
        let factory = Arc::new(JobFactory::new(services.build()));
        let listener = Arc::new(ExecutionListener::new(Arc::clone(&event_bus)));
        let executor = Arc::new(JobExecutor::new(factory, listener));
        let engine = Arc::new(Engine::new(
            Arc::clone(&storage),
            executor,
            settings.tick_interval,
            settings.shutdown_timeout,
        ));

        Ok(Self {
            storage,
            engine,
            event_bus,
            time_zone,
            settings,
            handle: Mutex::new(None),
        })
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    /// Get the storage backend.
    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    // Registration

    /// Register a job of type `J`.
    ///
    /// A cron trigger, when requested, is stored paused; call
    /// [`resume_job`](Self::resume_job) to arm it. Returns `Ok(None)` if a
    /// job with the same key already exists.
    pub async fn add_job<J: Job>(
        &self,
        spec: impl Into<JobSpec>,
    ) -> Result<Option<JobDetail>, SchedulerError> {
        self.add_job_of_type(JobType::of::<J>(), spec).await
    }

    /// Register a job by type descriptor.
    pub async fn add_job_of_type(
        &self,
        job_type: JobType,
        spec: impl Into<JobSpec>,
    ) -> Result<Option<JobDetail>, SchedulerError> {
        let spec = spec.into();
        if spec.key.is_blank() {
            return Err(SchedulerError::Argument("job key must not be blank".into()));
        }

        let cron_expression = spec.cron_expression.filter(|expr| !expr.is_empty());
        let trigger = match cron_expression.as_deref() {
            Some(expression) => Some(
                self.cron_trigger(&spec.key, expression)?
                    .with_state(TriggerState::Paused),
            ),
            None => None,
        };

        if self.storage.job_exists(&spec.key).await? {
            tracing::debug!(job_key = %spec.key, "Job already exists, not added");
            return Ok(None);
        }

        let mut job = StoredJob::new(spec.key.clone(), job_type).with_data(spec.data);
        if let Some(description) = spec.description {
            job = job.with_description(description);
        }

        match self.storage.store_job(job, trigger).await {
            Ok(()) => {}
            Err(StorageError::DuplicateKey(_)) => {
                tracing::debug!(job_key = %spec.key, "Job added concurrently, not added");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        }

        tracing::info!(
            job_key = %spec.key,
            job_type = job_type.type_name(),
            cron_expression = cron_expression.as_deref().unwrap_or("-"),
            "Job added"
        );

        self.get_job(spec.key).await
    }

    /// Delete a job and all its triggers. Running executions finish.
    pub async fn delete_job(&self, key: impl Into<JobKey>) -> Result<bool, SchedulerError> {
        let key = key.into();
        let deleted = self.storage.remove_job(&key).await?;
        if deleted {
            tracing::info!(job_key = %key, "Job deleted");
        }
        Ok(deleted)
    }

    // Queries

    /// Get a fresh snapshot of a job.
    pub async fn get_job(&self, key: impl Into<JobKey>) -> Result<Option<JobDetail>, SchedulerError> {
        let key = key.into();
        let job = match self.storage.get_job(&key).await {
            Ok(job) => job,
            Err(StorageError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        self.detail(&job).await.map(Some)
    }

    /// Snapshot of every job.
    pub async fn get_jobs(&self) -> Result<Vec<JobDetail>, SchedulerError> {
        let jobs = self.storage.list_jobs().await?;
        let mut details = Vec::with_capacity(jobs.len());
        for job in &jobs {
            details.push(self.detail(job).await?);
        }
        Ok(details)
    }

    pub async fn job_exists(&self, key: impl Into<JobKey>) -> Result<bool, SchedulerError> {
        Ok(self.storage.job_exists(&key.into()).await?)
    }

    /// Check whether an expression is a valid cron expression.
    pub fn is_valid_cron_expression(&self, expression: &str) -> bool {
        CronSchedule::is_valid(expression)
    }

    // Lifecycle of a job

    /// Pause every trigger of a job.
    pub async fn pause_job(&self, key: impl Into<JobKey>) -> Result<(), SchedulerError> {
        let key = key.into();
        let paused = self.storage.pause_job(&key).await?;
        tracing::debug!(job_key = %key, triggers = paused, "Job paused");
        Ok(())
    }

    /// Resume a job. The cron trigger starts over from now, so occurrences
    /// missed while paused are not fired.
    pub async fn resume_job(&self, key: impl Into<JobKey>) -> Result<(), SchedulerError> {
        let key = key.into();
        let resumed = self.storage.resume_job(&key, Utc::now()).await?;
        tracing::debug!(job_key = %key, triggers = resumed, "Job resumed");
        self.engine.wake();
        Ok(())
    }

    /// Fire a job once, now, whatever the state of its cron trigger.
    pub async fn trigger_job(&self, key: impl Into<JobKey>) -> Result<(), SchedulerError> {
        let key = key.into();
        let trigger = StoredTrigger::one_shot(TriggerKey::manual(), key.clone(), Utc::now());
        let trigger_key = trigger.key.clone();

        match self.storage.store_trigger(trigger).await {
            Ok(()) => {}
            Err(StorageError::NotFound(_)) => {
                return Err(SchedulerError::JobNotFound(key.to_string()));
            }
            Err(e) => return Err(e.into()),
        }

        tracing::debug!(job_key = %key, trigger_key = %trigger_key, "Job triggered");
        self.engine.wake();
        Ok(())
    }

    /// Replace the cron expression of a job, keeping its paused or active
    /// state. A job without a cron trigger gets a new, paused one.
    pub async fn update_cron_expression(
        &self,
        key: impl Into<JobKey>,
        expression: &str,
    ) -> Result<(), SchedulerError> {
        let key = key.into();
        if key.is_blank() {
            return Err(SchedulerError::Argument("job key must not be blank".into()));
        }
        if expression.trim().is_empty() {
            return Err(SchedulerError::Argument(
                "cron expression must not be blank".into(),
            ));
        }

        let trigger = self.cron_trigger(&key, expression)?;
        if !self.storage.job_exists(&key).await? {
            return Err(SchedulerError::JobNotFound(key.to_string()));
        }

        if self.storage.replace_trigger(trigger.clone()).await? {
            tracing::debug!(job_key = %key, cron_expression = expression, "Cron trigger replaced");
        } else {
            match self
                .storage
                .store_trigger(trigger.with_state(TriggerState::Paused))
                .await
            {
                Ok(()) => {}
                Err(StorageError::NotFound(_)) => {
                    return Err(SchedulerError::JobNotFound(key.to_string()));
                }
                Err(e) => return Err(e.into()),
            }
            tracing::debug!(job_key = %key, cron_expression = expression, "Cron trigger created paused");
        }

        self.engine.wake();
        Ok(())
    }

    /// Signal cancellation to every running execution of a job.
    ///
    /// Cooperative: jobs that ignore their cancellation token keep running.
    pub async fn interrupt_job(&self, key: impl Into<JobKey>) -> usize {
        self.engine.interrupt(&key.into()).await
    }

    /// Keys of the jobs currently executing.
    pub async fn running_jobs(&self) -> Vec<JobKey> {
        self.engine.running_keys().await
    }

    // Lifecycle of the scheduler

    /// Start firing triggers. Does nothing if already started.
    pub async fn start(&self) {
        let mut handle = self.handle.lock().await;
        if handle.as_ref().is_some_and(EngineHandle::is_running) {
            return;
        }
        *handle = Some(EngineHandle::spawn(Arc::clone(&self.engine)));
        tracing::info!(time_zone = %self.time_zone, "Scheduler started");
    }

    /// Stop firing triggers and wait for running executions, up to the
    /// shutdown timeout. Jobs and triggers are kept; the scheduler can be
    /// started again. Does nothing if not started.
    pub async fn stop(&self) {
        let handle = self.handle.lock().await.take();
        if let Some(handle) = handle {
            handle.shutdown().await;
            tracing::info!("Scheduler stopped");
        }
    }

    pub async fn is_started(&self) -> bool {
        self.state().await == SchedulerState::Running
    }

    /// Get the current scheduler state.
    pub async fn state(&self) -> SchedulerState {
        let running = self
            .handle
            .lock()
            .await
            .as_ref()
            .is_some_and(EngineHandle::is_running);
        if running {
            SchedulerState::Running
        } else {
            SchedulerState::Stopped
        }
    }

    // Events

    /// Subscribe to execution events.
    pub async fn subscribe(&self, handler: Arc<dyn EventHandler>) -> SubscriptionId {
        self.event_bus.register(handler).await
    }

    /// Subscribe a closure to execution events.
    pub async fn on_job_execution<F>(&self, f: F) -> SubscriptionId
    where
        F: Fn(&SchedulerEvent) + Send + Sync + 'static,
    {
        self.subscribe(Arc::new(FnEventHandler::new(f))).await
    }

    /// Remove a subscription. Returns false if it was not registered.
    pub async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.event_bus.unregister(id).await
    }

    fn cron_trigger(&self, job_key: &JobKey, expression: &str) -> Result<StoredTrigger, SchedulerError> {
        let schedule = CronSchedule::with_time_zone(expression, self.time_zone)?;
        Ok(StoredTrigger::cron(
            TriggerKey::for_job(job_key),
            job_key.clone(),
            schedule,
            Utc::now(),
        )?)
    }

    async fn detail(&self, job: &StoredJob) -> Result<JobDetail, SchedulerError> {
        let trigger = self
            .storage
            .get_trigger(&TriggerKey::for_job(&job.key))
            .await?;

        let state = match &trigger {
            None => JobState::None,
            Some(trigger) => trigger
                .state
                .job_state()
                .ok_or_else(|| SchedulerError::UnknownState(job.key.to_string()))?,
        };

        Ok(JobDetail {
            key: job.key.clone(),
            description: job.description.clone(),
            cron_expression: trigger
                .as_ref()
                .and_then(|t| t.cron_expression().map(str::to_string)),
            state,
            is_recurring: trigger.as_ref().map_or(true, |t| t.final_fire_time().is_none()),
            metadata: JobMetadata {
                next_fire_time_utc: trigger.as_ref().and_then(|t| t.next_fire_time),
                previous_fire_time_utc: trigger.as_ref().and_then(|t| t.previous_fire_time),
            },
        })
    }
}
