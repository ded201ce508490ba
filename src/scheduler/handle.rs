//! Handle on a running engine loop.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::engine::Engine;
use crate::storage::Storage;

/// Owns the engine task of one start/stop cycle.
pub(crate) struct EngineHandle {
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl EngineHandle {
    /// Spawn the engine loop.
    pub(crate) fn spawn<S: Storage + 'static>(engine: Arc<Engine<S>>) -> Self {
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(engine.run(shutdown.clone()));
        Self { shutdown, task }
    }

    /// Whether the loop is still running.
    pub(crate) fn is_running(&self) -> bool {
        !self.shutdown.is_cancelled() && !self.task.is_finished()
    }

    /// Cancel the loop and every running execution, then wait for the loop
    /// to drain.
    pub(crate) async fn shutdown(mut self) {
        self.shutdown.cancel();
        if let Err(e) = (&mut self.task).await {
            tracing::warn!(error = %e, "Scheduler engine task ended abnormally");
        }
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
