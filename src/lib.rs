//! Tickwork: a cron-driven job scheduler.
//!
//! Register [`Job`] implementations with a [`ServiceCollection`], add them to
//! a [`Scheduler`] under a key with an optional cron expression, and subscribe
//! to the before/after execution events each fire produces.

pub mod config;
pub mod core;
pub mod events;
pub mod execution;
pub mod scheduler;
pub mod storage;
pub mod testing;

pub use config::{ConfigError, SchedulerSettings, SchedulingProvider};
pub use crate::core::context::JobContext;
pub use crate::core::detail::{HasJobMetadata, JobDetail, JobMetadata, JobState};
pub use crate::core::job::{Job, JobData, JobError, SharedError};
pub use crate::core::schedule::{CronSchedule, ScheduleError, SchedulerTimeZone};
pub use crate::core::types::{FireId, JobKey, TriggerKey};
pub use events::{
    EventBus, EventHandler, ExecutionTimeline, FnEventHandler, SchedulerEvent, SubscriptionId,
};
pub use execution::{
    Activate, FireContext, JobExecutionError, JobType, NativeJob, ResolveError,
    ServiceCollection, ServiceProvider, ServiceScope,
};
pub use scheduler::{JobSpec, Scheduler, SchedulerError, SchedulerState};
pub use storage::{InMemoryStorage, Storage, StorageError};
