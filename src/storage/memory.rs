//! In-memory storage implementation.
//!
//! Provides a thread-safe in-memory backend. Jobs, triggers and the set of
//! executing jobs sit behind a single lock so that every trigger state
//! transition is atomic. Data is not persisted across restarts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use super::{
    CompletionInstruction, FiredTrigger, Storage, StorageError, StoredJob, StoredTrigger,
    TriggerKind, TriggerState,
};
use crate::core::types::{JobKey, TriggerKey};

#[derive(Default)]
struct StoreState {
    jobs: HashMap<JobKey, StoredJob>,
    triggers: HashMap<TriggerKey, StoredTrigger>,
    /// Jobs with an execution in flight.
    executing: HashSet<JobKey>,
}

impl StoreState {
    fn job_triggers_mut<'a>(
        &'a mut self,
        job_key: &'a JobKey,
    ) -> impl Iterator<Item = &'a mut StoredTrigger> + 'a {
        self.triggers
            .values_mut()
            .filter(move |t| &t.job_key == job_key)
    }

    fn has_triggers(&self, job_key: &JobKey) -> bool {
        self.triggers.values().any(|t| &t.job_key == job_key)
    }

    /// Initial state of a trigger entering the store.
    fn admit(&self, trigger: &mut StoredTrigger) {
        if self.executing.contains(&trigger.job_key) {
            trigger.state = trigger.state.blocked();
        }
    }
}

/// In-memory storage backend.
pub struct InMemoryStorage {
    state: RwLock<StoreState>,
}

impl InMemoryStorage {
    /// Create a new empty in-memory storage.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
        }
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn store_job(
        &self,
        job: StoredJob,
        trigger: Option<StoredTrigger>,
    ) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| StorageError::LockPoisoned)?;
        if state.jobs.contains_key(&job.key) {
            return Err(StorageError::DuplicateKey(format!("job: {}", job.key)));
        }
        if let Some(mut trigger) = trigger {
            if state.triggers.contains_key(&trigger.key) {
                return Err(StorageError::DuplicateKey(format!("trigger: {}", trigger.key)));
            }
            state.admit(&mut trigger);
            state.triggers.insert(trigger.key.clone(), trigger);
        }
        state.jobs.insert(job.key.clone(), job);
        Ok(())
    }

    async fn get_job(&self, key: &JobKey) -> Result<StoredJob, StorageError> {
        let state = self.state.read().map_err(|_| StorageError::LockPoisoned)?;
        state
            .jobs
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("job: {}", key)))
    }

    async fn job_exists(&self, key: &JobKey) -> Result<bool, StorageError> {
        let state = self.state.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(state.jobs.contains_key(key))
    }

    async fn list_jobs(&self) -> Result<Vec<StoredJob>, StorageError> {
        let state = self.state.read().map_err(|_| StorageError::LockPoisoned)?;
        let mut result: Vec<_> = state.jobs.values().cloned().collect();
        result.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(result)
    }

    async fn remove_job(&self, key: &JobKey) -> Result<bool, StorageError> {
        let mut state = self.state.write().map_err(|_| StorageError::LockPoisoned)?;
        let existed = state.jobs.remove(key).is_some();
        let before = state.triggers.len();
        state.triggers.retain(|_, t| &t.job_key != key);
        Ok(existed || state.triggers.len() != before)
    }

    async fn store_trigger(&self, mut trigger: StoredTrigger) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| StorageError::LockPoisoned)?;
        if !state.jobs.contains_key(&trigger.job_key) {
            return Err(StorageError::NotFound(format!("job: {}", trigger.job_key)));
        }
        if state.triggers.contains_key(&trigger.key) {
            return Err(StorageError::DuplicateKey(format!("trigger: {}", trigger.key)));
        }
        state.admit(&mut trigger);
        state.triggers.insert(trigger.key.clone(), trigger);
        Ok(())
    }

    async fn replace_trigger(&self, mut trigger: StoredTrigger) -> Result<bool, StorageError> {
        let mut state = self.state.write().map_err(|_| StorageError::LockPoisoned)?;
        let Some(existing) = state.triggers.get(&trigger.key) else {
            return Ok(false);
        };
        trigger.state = if existing.state.is_paused() {
            TriggerState::Paused
        } else {
            TriggerState::Waiting
        };
        state.admit(&mut trigger);
        state.triggers.insert(trigger.key.clone(), trigger);
        Ok(true)
    }

    async fn get_trigger(&self, key: &TriggerKey) -> Result<Option<StoredTrigger>, StorageError> {
        let state = self.state.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(state.triggers.get(key).cloned())
    }

    async fn triggers_for_job(&self, key: &JobKey) -> Result<Vec<StoredTrigger>, StorageError> {
        let state = self.state.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(state
            .triggers
            .values()
            .filter(|t| &t.job_key == key)
            .cloned()
            .collect())
    }

    async fn pause_job(&self, key: &JobKey) -> Result<usize, StorageError> {
        let mut state = self.state.write().map_err(|_| StorageError::LockPoisoned)?;
        let mut count = 0;
        for trigger in state.job_triggers_mut(key) {
            trigger.state = trigger.state.paused();
            count += 1;
        }
        Ok(count)
    }

    async fn resume_job(&self, key: &JobKey, now: DateTime<Utc>) -> Result<usize, StorageError> {
        let mut state = self.state.write().map_err(|_| StorageError::LockPoisoned)?;
        let executing = state.executing.contains(key);
        let mut count = 0;
        for trigger in state.job_triggers_mut(key) {
            if matches!(trigger.kind, TriggerKind::Cron(_)) {
                // A restarted cron trigger is armed again whatever state it was in.
                trigger.restart(now);
                trigger.state = if executing {
                    TriggerState::Blocked
                } else {
                    TriggerState::Waiting
                };
            } else {
                trigger.state = trigger.state.resumed();
            }
            count += 1;
        }
        Ok(count)
    }

    async fn acquire_next_triggers(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<FiredTrigger>, StorageError> {
        let mut guard = self.state.write().map_err(|_| StorageError::LockPoisoned)?;
        let state = &mut *guard;

        for trigger in state.triggers.values_mut() {
            if trigger.state == TriggerState::Waiting && trigger.next_fire_time.is_none() {
                trigger.state = TriggerState::Complete;
            }
        }

        let mut due: Vec<(DateTime<Utc>, TriggerKey)> = state
            .triggers
            .values()
            .filter(|t| t.state == TriggerState::Waiting)
            .filter_map(|t| {
                t.next_fire_time
                    .filter(|next| *next <= now)
                    .map(|next| (next, t.key.clone()))
            })
            .collect();
        due.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.as_str().cmp(b.1.as_str())));

        let mut fired = Vec::new();
        for (_, key) in due {
            let Some(trigger) = state.triggers.get_mut(&key) else {
                continue;
            };
            // Non-concurrent: one execution per job at a time.
            if state.executing.contains(&trigger.job_key) {
                continue;
            }
            let Some(job) = state.jobs.get(&trigger.job_key) else {
                tracing::warn!(trigger_key = %key, job_key = %trigger.job_key, "Trigger has no job, skipping");
                continue;
            };

            let scheduled = trigger.next_fire_time;
            let missed = trigger.fire(now);
            if missed > 0 {
                tracing::warn!(
                    job_key = %trigger.job_key,
                    trigger_key = %key,
                    missed_occurrences = missed,
                    "Scheduled occurrences missed, firing once"
                );
            }

            let job_key = trigger.job_key.clone();
            fired.push(FiredTrigger {
                trigger_key: key,
                job_key: job_key.clone(),
                job: job.clone(),
                fire_time: now,
                scheduled_fire_time: scheduled,
                next_fire_time: trigger.next_fire_time,
                previous_fire_time: trigger.previous_fire_time,
            });

            for sibling in state.triggers.values_mut().filter(|t| t.job_key == job_key) {
                sibling.state = sibling.state.blocked();
            }
            state.executing.insert(job_key);
        }

        Ok(fired)
    }

    async fn triggered_job_complete(
        &self,
        fired: &FiredTrigger,
        instruction: CompletionInstruction,
    ) -> Result<(), StorageError> {
        let mut guard = self.state.write().map_err(|_| StorageError::LockPoisoned)?;
        let state = &mut *guard;
        let job_key = &fired.job_key;

        state.executing.remove(job_key);
        for trigger in state.job_triggers_mut(job_key) {
            trigger.state = trigger.state.unblocked();
        }

        match instruction {
            CompletionInstruction::Noop => {}
            CompletionInstruction::SetTriggerComplete => {
                if let Some(trigger) = state.triggers.get_mut(&fired.trigger_key) {
                    trigger.state = TriggerState::Complete;
                }
            }
            CompletionInstruction::SetAllJobTriggersComplete
            | CompletionInstruction::SetAllJobTriggersError => {
                let target = if instruction == CompletionInstruction::SetAllJobTriggersComplete {
                    TriggerState::Complete
                } else {
                    TriggerState::Error
                };
                // Pending manual fires are dropped rather than parked.
                state.triggers.retain(|_, t| {
                    &t.job_key != job_key || matches!(t.kind, TriggerKind::Cron(_))
                });
                for trigger in state.job_triggers_mut(job_key) {
                    trigger.state = target;
                }
            }
        }

        // A trigger with nothing left to fire is removed.
        if state
            .triggers
            .get(&fired.trigger_key)
            .is_some_and(|t| t.next_fire_time.is_none())
        {
            state.triggers.remove(&fired.trigger_key);
        }

        let orphaned = state
            .jobs
            .get(job_key)
            .is_some_and(|job| !job.durable)
            && !state.has_triggers(job_key);
        if orphaned {
            state.jobs.remove(job_key);
            tracing::debug!(job_key = %job_key, "Removed non-durable job with no remaining triggers");
        }

        Ok(())
    }
}
