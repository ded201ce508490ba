//! Configuration loading and parsing.
//!
//! This module provides YAML-based scheduler settings.

mod error;
mod settings;

pub use error::ConfigError;
pub use settings::{SchedulerSettings, SchedulingProvider};
