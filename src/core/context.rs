//! Read-only context handed to a running job.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::detail::{HasJobMetadata, JobMetadata};
use super::job::JobData;
use super::types::{FireId, JobKey};

/// Metadata of the current fire plus a cancellation signal.
///
/// The token is cancelled when the scheduler stops or the execution is
/// interrupted. Jobs that ignore it keep running; there is no preemption.
#[derive(Debug, Clone)]
pub struct JobContext {
    job_key: JobKey,
    fire_id: FireId,
    fire_time: DateTime<Utc>,
    metadata: JobMetadata,
    cancellation: CancellationToken,
    data: Arc<JobData>,
}

impl JobContext {
    /// Create a context for one fire of `job_key`.
    pub fn new(job_key: JobKey, fire_time: DateTime<Utc>) -> Self {
        Self {
            job_key,
            fire_id: FireId::new(),
            fire_time,
            metadata: JobMetadata::default(),
            cancellation: CancellationToken::new(),
            data: Arc::new(JobData::new()),
        }
    }

    pub fn with_fire_id(mut self, fire_id: FireId) -> Self {
        self.fire_id = fire_id;
        self
    }

    pub fn with_metadata(mut self, metadata: JobMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn with_data(mut self, data: Arc<JobData>) -> Self {
        self.data = data;
        self
    }

    pub fn job_key(&self) -> &JobKey {
        &self.job_key
    }

    pub fn fire_id(&self) -> FireId {
        self.fire_id
    }

    /// Actual time the fire happened.
    pub fn fire_time(&self) -> DateTime<Utc> {
        self.fire_time
    }

    /// Data supplied when the job was added.
    pub fn data(&self) -> &JobData {
        &self.data
    }

    /// Look up a single data value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.data.get(key).map(String::as_str)
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Resolves once the execution is asked to stop.
    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await
    }
}

impl HasJobMetadata for JobContext {
    fn metadata(&self) -> &JobMetadata {
        &self.metadata
    }
}
