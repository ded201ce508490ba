//! Scheduler facade and engine.
//!
//! This module provides the caller-facing [`Scheduler`] and the engine loop
//! that fires due triggers.

mod engine;
mod facade;
mod handle;
mod types;

pub use facade::Scheduler;
pub use types::{JobSpec, SchedulerError, SchedulerState};
