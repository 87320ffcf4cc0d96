//! Supervised background tasks.
//!
//! Fire-and-forget work (write-behind persistence, sweeps) is spawned
//! through a [`TaskSupervisor`] instead of bare `tokio::spawn`, so failures
//! are logged rather than silently swallowed and shutdown can drain
//! everything that is still running.

use std::fmt::Display;
use std::future::Future;

use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

/// Tracks and drains background tasks.
pub struct TaskSupervisor {
    tracker: TaskTracker,
}

impl TaskSupervisor {
    pub fn new() -> Self {
        Self {
            tracker: TaskTracker::new(),
        }
    }

    /// Spawn a supervised background task.
    ///
    /// The task's error, if any, is logged at WARN with the task name;
    /// success is logged at DEBUG.
    pub fn spawn<E, F>(&self, name: &'static str, future: F)
    where
        E: Display,
        F: Future<Output = Result<(), E>> + Send + 'static,
    {
        if self.tracker.is_closed() {
            warn!(task = name, "supervisor closed, dropping background task");
            return;
        }
        self.tracker.spawn(async move {
            match future.await {
                Ok(()) => debug!(task = name, "background task completed"),
                Err(error) => warn!(task = name, %error, "background task failed"),
            }
        });
    }

    /// Number of tasks still running.
    pub fn active_count(&self) -> usize {
        self.tracker.len()
    }

    /// Wait for every tracked task currently running to finish.
    pub async fn drain(&self) {
        // TaskTracker::wait requires close(); reopen afterwards so the
        // supervisor stays usable for callers that only want a barrier.
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Stop accepting new tasks and wait for the running ones.
    pub async fn shutdown(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}

impl Default for TaskSupervisor {
    fn default() -> Self {
        Self::new()
    }
}
