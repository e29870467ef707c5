use std::future::Future;

use tokio_util::task::TaskTracker;
use tracing::{debug, error, warn};

/// Supervised pool for fire-and-forget work. Every task is named; failures
/// and panics are logged here instead of being silently detached.
#[derive(Clone, Default)]
pub struct BackgroundTasks {
    tracker: TaskTracker,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn<F>(&self, name: &'static str, task: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let handle = tokio::spawn(task);
        self.tracker.spawn(async move {
            match handle.await {
                Ok(Ok(())) => debug!(task = name, "Background task finished"),
                Ok(Err(e)) => error!(task = name, error = ?e, "Background task failed"),
                Err(e) if e.is_panic() => error!(task = name, "Background task panicked"),
                Err(e) => warn!(task = name, "Background task cancelled: {}", e),
            }
        });
    }

    /// Number of tasks still running.
    pub fn len(&self) -> usize {
        self.tracker.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracker.is_empty()
    }

    /// Waits until every task spawned so far has finished. New tasks can
    /// still be spawned afterwards.
    pub async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    pub async fn shutdown(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn failing_and_panicking_tasks_do_not_escape() {
        let tasks = BackgroundTasks::new();
        let done = Arc::new(AtomicUsize::new(0));

        let counter = done.clone();
        tasks.spawn("ok", async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        tasks.spawn("fails", async { anyhow::bail!("remote said no") });
        tasks.spawn("panics", async { panic!("boom") });

        tasks.wait_idle().await;
        assert_eq!(done.load(Ordering::SeqCst), 1);
        assert!(tasks.is_empty());

        // Still usable after waiting.
        let counter = done.clone();
        tasks.spawn("again", async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        tasks.shutdown().await;
        assert_eq!(done.load(Ordering::SeqCst), 2);
    }
}
