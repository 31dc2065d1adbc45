//! Tokio implementation of TaskSpawner.

use crate::spawn::{BoxFuture, TaskSpawner};
use std::sync::Arc;
use tracing::Instrument;

/// Spawner backed by the ambient Tokio runtime.
///
/// Must be used from within a runtime context.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSpawner;

impl TokioSpawner {
    /// Creates a new TokioSpawner.
    pub fn new() -> Self {
        Self
    }

    /// Creates an Arc-wrapped spawner for sharing across worlds.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl TaskSpawner for TokioSpawner {
    fn spawn(&self, name: &str, future: BoxFuture<()>) {
        let span = tracing::debug_span!("task", name = %name);
        tokio::spawn(future.instrument(span));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_tokio_spawner_runs_task() {
        let spawner = TokioSpawner::new();
        let (tx, rx) = oneshot::channel();

        spawner.spawn("send", Box::pin(async move {
            let _ = tx.send(42);
        }));

        assert_eq!(rx.await.unwrap(), 42);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_tokio_spawner_tasks_overlap() {
        let spawner = TokioSpawner::shared();
        let start = std::time::Instant::now();
        let mut receivers = Vec::new();

        for i in 0..4 {
            let (tx, rx) = oneshot::channel();
            spawner.spawn(&format!("sleep-{i}"), Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                let _ = tx.send(());
            }));
            receivers.push(rx);
        }
        for rx in receivers {
            rx.await.unwrap();
        }

        // Four 100ms tasks in parallel, not 400ms in sequence
        assert!(start.elapsed() < Duration::from_millis(300));
    }
}
