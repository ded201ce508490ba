//! Identifier types for jobs, triggers and fire attempts.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Prefix of the generated keys used by manual (one-shot) triggers.
const MANUAL_TRIGGER_PREFIX: &str = "MT_";

/// Caller-supplied identifier of a job. Case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobKey(String);

/// Identifier of a trigger bound to a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TriggerKey(String);

/// Identifier of a single fire attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FireId(Uuid);

impl JobKey {
    /// Create a new JobKey from a string.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Get the underlying string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the key is empty or whitespace only.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl From<&str> for JobKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for JobKey {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&JobKey> for JobKey {
    fn from(key: &JobKey) -> Self {
        key.clone()
    }
}

impl TriggerKey {
    /// Create a new TriggerKey from a string.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The key of the cron trigger owned by a job. It shares the job's name.
    pub fn for_job(job_key: &JobKey) -> Self {
        Self(job_key.as_str().to_string())
    }

    /// Generate a fresh key for a one-shot manual trigger.
    pub fn manual() -> Self {
        Self(format!("{}{}", MANUAL_TRIGGER_PREFIX, Uuid::new_v4()))
    }

    /// Whether this key was generated by [`TriggerKey::manual`].
    pub fn is_manual(&self) -> bool {
        self.0.starts_with(MANUAL_TRIGGER_PREFIX)
    }

    /// Get the underlying string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TriggerKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl FireId {
    /// Generate a new random FireId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for FireId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for TriggerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for FireId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
