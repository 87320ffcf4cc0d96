//! Debounced, priority-ordered prefetch queue.
//!
//! Prefetch requests warm the cache ahead of anticipated need. The queue is
//! debounced: rapid repeated submissions within a short window coalesce into
//! the most recent request before processing begins. Requests are processed
//! strictly one at a time with a short pause in between, so queued work
//! stays bounded; high-priority requests jump to the head of the queue.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::coord::GeoBounds;
use crate::fetch::BoxFuture;
use crate::types::DataType;

/// Prefetch urgency. High-priority requests are inserted at the queue head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefetchPriority {
    Low,
    Normal,
    High,
}

/// A request to warm the cache for an area.
#[derive(Debug, Clone)]
pub struct PrefetchRequest {
    pub bounds: GeoBounds,
    pub data_types: Vec<DataType>,
    pub min_zoom: u8,
    pub max_zoom: u8,
    pub priority: PrefetchPriority,
}

/// Executes one prefetch request (implemented by the coordinator; mocked in
/// tests).
pub trait PrefetchHandler: Send + Sync {
    fn handle<'a>(&'a self, request: &'a PrefetchRequest) -> BoxFuture<'a, ()>;
}

/// Debounced prefetch queue.
pub struct PrefetchQueue {
    debounce: Duration,
    pause: Duration,
    pending: Mutex<Option<(PrefetchRequest, Instant)>>,
    queue: Mutex<VecDeque<PrefetchRequest>>,
    notify: Notify,
    processed: AtomicU64,
}

impl PrefetchQueue {
    pub fn new(debounce: Duration, pause: Duration) -> Self {
        Self {
            debounce,
            pause,
            pending: Mutex::new(None),
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            processed: AtomicU64::new(0),
        }
    }

    /// Submit a request. Submissions arriving within the debounce window
    /// replace the previously pending one.
    pub fn submit(&self, request: PrefetchRequest) {
        *self.pending.lock() = Some((request, Instant::now()));
        self.notify.notify_one();
    }

    /// Requests waiting to be processed (including a pending debounce slot).
    pub fn depth(&self) -> usize {
        let pending = usize::from(self.pending.lock().is_some());
        pending + self.queue.lock().len()
    }

    /// Requests fully processed so far.
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Run the queue until cancelled. One request at a time, inter-request
    /// pause, priority insertion at enqueue time.
    pub async fn run(&self, handler: &dyn PrefetchHandler, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = self.notify.notified() => {}
            }

            self.settle_debounce(&cancel).await;
            if cancel.is_cancelled() {
                return;
            }
            self.promote_pending();

            while let Some(request) = self.pop() {
                debug!(
                    types = request.data_types.len(),
                    min_zoom = request.min_zoom,
                    max_zoom = request.max_zoom,
                    "processing prefetch request"
                );
                handler.handle(&request).await;
                self.processed.fetch_add(1, Ordering::Relaxed);

                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(self.pause) => {}
                }
                // A submission may have landed while processing.
                self.settle_debounce(&cancel).await;
                self.promote_pending();
            }
        }
    }

    /// Wait until no new submission has arrived for a full debounce window.
    async fn settle_debounce(&self, cancel: &CancellationToken) {
        loop {
            let elapsed = match &*self.pending.lock() {
                Some((_, submitted)) => submitted.elapsed(),
                None => return,
            };
            if elapsed >= self.debounce {
                return;
            }
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(self.debounce - elapsed) => {}
            }
        }
    }

    /// Move the settled pending request into the queue.
    fn promote_pending(&self) {
        if let Some((request, _)) = self.pending.lock().take() {
            let mut queue = self.queue.lock();
            if request.priority == PrefetchPriority::High {
                queue.push_front(request);
            } else {
                queue.push_back(request);
            }
        }
    }

    fn pop(&self) -> Option<PrefetchRequest> {
        self.queue.lock().pop_front()
    }
}
