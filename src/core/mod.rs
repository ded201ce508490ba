//! Core scheduling model: identifiers, cron schedules, jobs and their contexts.

pub mod context;
pub mod detail;
pub mod job;
pub mod schedule;
pub mod types;
