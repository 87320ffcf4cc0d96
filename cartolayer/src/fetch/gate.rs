//! Priority-ordered admission gate for network requests.
//!
//! The fetcher caps simultaneous in-flight requests. Excess requests queue
//! and are drained as slots free, ordered by priority first and enqueue age
//! second (FIFO within a priority level).

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;

/// Request priority. Higher values are admitted first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Priority(pub u8);

impl Priority {
    /// Interactive requests from the render path.
    pub const ON_DEMAND: Priority = Priority(100);
    /// Background cache warming.
    pub const PREFETCH: Priority = Priority(10);
    /// Maintenance work (probes, sweeps).
    pub const HOUSEKEEPING: Priority = Priority(1);

    pub const fn new(value: u8) -> Self {
        Priority(value)
    }
}

/// Global sequence counter for FIFO ordering within priority levels.
static SEQUENCE_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_sequence() -> u64 {
    SEQUENCE_COUNTER.fetch_add(1, AtomicOrdering::Relaxed)
}

struct Waiter {
    priority: Priority,
    sequence: u64,
    tx: oneshot::Sender<Grant>,
}

// Max-heap ordering: higher priority first, then older (lower sequence).
impl PartialEq for Waiter {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}

impl Eq for Waiter {}

impl PartialOrd for Waiter {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Waiter {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.priority.cmp(&other.priority) {
            Ordering::Equal => other.sequence.cmp(&self.sequence),
            ordering => ordering,
        }
    }
}

struct GateState {
    in_flight: usize,
    waiters: BinaryHeap<Waiter>,
}

struct GateShared {
    max_in_flight: usize,
    state: Mutex<GateState>,
}

impl GateShared {
    /// Hand the freed slot to the best waiter, or shrink `in_flight`.
    fn release(self: &Arc<Self>) {
        let mut state = self.state.lock();
        while let Some(waiter) = state.waiters.pop() {
            let grant = Grant {
                shared: Arc::clone(self),
                armed: true,
            };
            if waiter.tx.send(grant).is_ok() {
                // Slot transferred; in_flight unchanged. A grant dropped
                // unclaimed re-releases via its Drop impl.
                return;
            }
        }
        state.in_flight -= 1;
    }
}

/// A slot granted to a queued waiter. Re-releases on drop unless converted
/// into a [`GatePermit`], so a caller cancelled mid-handoff cannot leak the
/// slot.
struct Grant {
    shared: Arc<GateShared>,
    armed: bool,
}

impl Grant {
    fn into_permit(mut self) -> GatePermit {
        self.armed = false;
        GatePermit {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Drop for Grant {
    fn drop(&mut self) {
        if self.armed {
            self.shared.release();
        }
    }
}

/// RAII permit for one in-flight request.
pub struct GatePermit {
    shared: Arc<GateShared>,
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.shared.release();
    }
}

/// Bounded-concurrency gate with priority-then-age admission.
pub struct PriorityGate {
    shared: Arc<GateShared>,
}

impl PriorityGate {
    pub fn new(max_in_flight: usize) -> Self {
        Self {
            shared: Arc::new(GateShared {
                max_in_flight: max_in_flight.max(1),
                state: Mutex::new(GateState {
                    in_flight: 0,
                    waiters: BinaryHeap::new(),
                }),
            }),
        }
    }

    /// Acquire a slot, waiting behind higher-priority and older requests
    /// when the gate is full.
    pub async fn acquire(&self, priority: Priority) -> GatePermit {
        let rx = {
            let mut state = self.shared.state.lock();
            if state.in_flight < self.shared.max_in_flight {
                state.in_flight += 1;
                return GatePermit {
                    shared: Arc::clone(&self.shared),
                };
            }
            let (tx, rx) = oneshot::channel();
            state.waiters.push(Waiter {
                priority,
                sequence: next_sequence(),
                tx,
            });
            rx
        };

        match rx.await {
            Ok(grant) => grant.into_permit(),
            // The sender half only disappears if the gate itself is being
            // torn down; fall back to an unqueued permit.
            Err(_) => GatePermit {
                shared: Arc::clone(&self.shared),
            },
        }
    }

    /// Number of requests currently waiting for a slot.
    pub fn queue_depth(&self) -> usize {
        self.shared.state.lock().waiters.len()
    }

    /// Number of requests currently holding a slot.
    pub fn in_flight(&self) -> usize {
        self.shared.state.lock().in_flight
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn permits_up_to_capacity_without_waiting() {
        let gate = PriorityGate::new(2);
        let _a = gate.acquire(Priority::ON_DEMAND).await;
        let _b = gate.acquire(Priority::ON_DEMAND).await;
        assert_eq!(gate.in_flight(), 2);
        assert_eq!(gate.queue_depth(), 0);
    }

    #[tokio::test]
    async fn release_admits_next_waiter() {
        let gate = Arc::new(PriorityGate::new(1));
        let first = gate.acquire(Priority::ON_DEMAND).await;

        let gate_clone = Arc::clone(&gate);
        let waiter = tokio::spawn(async move {
            let _p = gate_clone.acquire(Priority::PREFETCH).await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(gate.queue_depth(), 1);

        drop(first);
        waiter.await.unwrap();
        assert_eq!(gate.queue_depth(), 0);
    }

    #[tokio::test]
    async fn admission_is_priority_then_age() {
        let gate = Arc::new(PriorityGate::new(1));
        let order = Arc::new(Mutex::new(Vec::new()));
        let blocker = gate.acquire(Priority::ON_DEMAND).await;

        let mut handles = Vec::new();
        for (label, priority) in [
            ("prefetch-1", Priority::PREFETCH),
            ("prefetch-2", Priority::PREFETCH),
            ("on-demand", Priority::ON_DEMAND),
            ("housekeeping", Priority::HOUSEKEEPING),
        ] {
            let gate = Arc::clone(&gate);
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                let _p = gate.acquire(priority).await;
                order.lock().push(label);
            }));
            // Ensure deterministic enqueue order.
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        drop(blocker);
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(
            *order.lock(),
            vec!["on-demand", "prefetch-1", "prefetch-2", "housekeeping"]
        );
    }

    #[tokio::test]
    async fn cancelled_waiter_does_not_leak_the_slot() {
        let gate = Arc::new(PriorityGate::new(1));
        let first = gate.acquire(Priority::ON_DEMAND).await;

        let gate_clone = Arc::clone(&gate);
        let doomed = tokio::spawn(async move {
            let _p = gate_clone.acquire(Priority::PREFETCH).await;
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        doomed.abort();
        let _ = doomed.await;

        drop(first);
        // The slot must still be acquirable.
        let _again = gate.acquire(Priority::ON_DEMAND).await;
        assert_eq!(gate.in_flight(), 1);
    }
}
