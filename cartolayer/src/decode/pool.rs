//! Parallel decode worker pool.
//!
//! CPU-bound tile decoding runs on a small pool of dedicated OS threads,
//! sized to `available cores − 1`. Each worker owns its receive channel and
//! scratch state exclusively; tile → worker assignment is
//! `(x + y) % pool_size`, so the same tile coordinate always lands on the
//! same worker and results are deterministically reproducible.
//!
//! Correctness never depends on the pool: if it was never started, has shut
//! down, or a worker died, decoding falls back to running synchronously on
//! the caller. Only latency differs.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;

use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::coord::TileCoord;

use super::style::StyleSheet;
use super::{decode_and_rasterize, DecodeError};

struct DecodeJob {
    bytes: Vec<u8>,
    style: Arc<StyleSheet>,
    reply: oneshot::Sender<Result<Vec<u8>, DecodeError>>,
}

struct Worker {
    tx: mpsc::Sender<DecodeJob>,
    handle: Option<JoinHandle<()>>,
}

/// Fixed-size pool of decode workers.
pub struct DecodePool {
    workers: Vec<Worker>,
}

impl DecodePool {
    /// Start a pool with an explicit worker count (zero means no pool; all
    /// decoding runs synchronously on the caller).
    pub fn new(size: usize) -> Self {
        let workers = (0..size)
            .map(|index| {
                let (tx, rx) = mpsc::channel::<DecodeJob>();
                let handle = std::thread::Builder::new()
                    .name(format!("decode-worker-{index}"))
                    .spawn(move || worker_loop(rx))
                    .ok();
                if handle.is_none() {
                    warn!(index, "failed to spawn decode worker");
                }
                Worker { tx, handle }
            })
            .collect();
        Self { workers }
    }

    /// Start a pool sized to `available cores − 1` (minimum one worker).
    pub fn with_default_size() -> Self {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2);
        Self::new(cores.saturating_sub(1).max(1))
    }

    /// A pool with no workers; every decode runs synchronously.
    pub fn disabled() -> Self {
        Self {
            workers: Vec::new(),
        }
    }

    /// Number of workers.
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Decode raw tile bytes and rasterize them per the style sheet.
    ///
    /// Dispatches to the worker selected by `(x + y) % pool_size`; falls
    /// back to synchronous decoding whenever the pool cannot take the job.
    pub async fn rasterize_tile(
        &self,
        coord: TileCoord,
        bytes: Vec<u8>,
        style: Arc<StyleSheet>,
    ) -> Result<Vec<u8>, DecodeError> {
        if self.workers.is_empty() {
            return decode_and_rasterize(&bytes, &style);
        }

        let index = ((coord.x as usize) + (coord.y as usize)) % self.workers.len();
        let (reply_tx, reply_rx) = oneshot::channel();
        let job = DecodeJob {
            // The caller keeps its copy so a dead worker can be papered over
            // with a synchronous decode.
            bytes: bytes.clone(),
            style: Arc::clone(&style),
            reply: reply_tx,
        };

        if self.workers[index].tx.send(job).is_err() {
            debug!(worker = index, "decode worker gone, decoding synchronously");
            return decode_and_rasterize(&bytes, &style);
        }

        match reply_rx.await {
            Ok(result) => result,
            Err(_) => {
                warn!(worker = index, "decode worker dropped a job, decoding synchronously");
                decode_and_rasterize(&bytes, &style)
            }
        }
    }

    /// Stop all workers and wait for them to exit.
    pub fn shutdown(&mut self) {
        for worker in self.workers.drain(..) {
            drop(worker.tx);
            if let Some(handle) = worker.handle {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for DecodePool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(rx: mpsc::Receiver<DecodeJob>) {
    while let Ok(job) = rx.recv() {
        let result = decode_and_rasterize(&job.bytes, &job.style);
        // Receiver may have been superseded or dropped; that is fine.
        let _ = job.reply.send(result);
    }
}
