//! Job resolution and execution.
//!
//! This module turns a fired trigger into a running job: host services,
//! per-fire resolution, the adapter onto the engine's native contract, and
//! the listener that publishes execution events.

mod adapter;
mod executor;
mod factory;
mod listener;
mod services;

pub use adapter::{Activate, FireContext, JobAdapter, JobExecutionError, NativeJob};
pub use executor::{ExecutionOutcome, JobExecutor};
pub use factory::{JobFactory, JobKind, JobType, ObjectFactory, ScopedJob};
pub use listener::{ExecutionListener, JobListener};
pub use services::{Instance, ResolveError, ServiceCollection, ServiceProvider, ServiceScope};
