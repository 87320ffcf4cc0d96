//! Rate-limited, bounded-concurrency network fetcher.
//!
//! All network access funnels through [`TileFetcher`]:
//!
//! - a [`PriorityGate`] caps simultaneous in-flight requests and admits
//!   queued requests priority-then-age;
//! - a [`HostPacer`] enforces per-host spacing with exponential backoff on
//!   consecutive errors;
//! - transient failures are retried with exponential backoff, then degraded
//!   to the synthesized fallback tile;
//! - repeated terminal failures flip the fetcher into offline mode, where
//!   the fallback is served without I/O and a periodic probe tests whether
//!   connectivity has returned;
//! - a second request for a tile already in flight supersedes the first
//!   pending completion instead of issuing another network call.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::coord::{GeoBounds, TileCoord};
use crate::decode::decode_geometry;
use crate::types::GeometrySet;

use super::client::AsyncHttpClient;
use super::fallback::fallback_tile;
use super::gate::{Priority, PriorityGate};
use super::pacer::HostPacer;
use super::FetchError;

/// Where a fetched tile's bytes came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileSource {
    /// Real bytes from the network.
    Network,
    /// The synthesized placeholder.
    Fallback,
}

/// Result of a tile fetch.
#[derive(Debug, Clone)]
pub struct FetchedTile {
    pub bytes: Vec<u8>,
    pub source: TileSource,
}

/// Fetcher configuration.
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Tile URL template with `{s}`, `{z}`, `{x}`, `{y}` placeholders.
    pub tile_url_template: String,
    /// Geometry URL template with `{type}`, `{zoom}`, `{bbox}` placeholders.
    pub geometry_url_template: String,
    /// Subdomains rotated into `{s}` round-robin.
    pub subdomains: Vec<String>,
    /// Base per-host spacing; doubles per consecutive error.
    pub base_interval: Duration,
    /// Transient-failure retries per request.
    pub max_retries: u32,
    /// Cap on simultaneous in-flight requests.
    pub max_concurrent: usize,
    /// Consecutive terminal failures before entering offline mode.
    pub offline_threshold: u32,
    /// How often to probe connectivity while offline.
    pub probe_interval: Duration,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            tile_url_template: "https://{s}.tile.openstreetmap.org/{z}/{x}/{y}.png".into(),
            geometry_url_template: "https://data.cartolayer.dev/{type}/{zoom}/{bbox}.json".into(),
            subdomains: vec!["a".into(), "b".into(), "c".into()],
            base_interval: Duration::from_millis(250),
            max_retries: 3,
            max_concurrent: 8,
            offline_threshold: 3,
            probe_interval: Duration::from_secs(30),
        }
    }
}

/// Pending completion slot for one in-flight tile.
///
/// `subscribe()` replaces the current waiter; the displaced receiver's
/// sender is dropped, which it observes as [`FetchError::Superseded`].
#[derive(Default)]
struct InflightSlot {
    tx: Mutex<Option<oneshot::Sender<Result<FetchedTile, FetchError>>>>,
}

impl InflightSlot {
    fn subscribe(&self) -> oneshot::Receiver<Result<FetchedTile, FetchError>> {
        let (tx, rx) = oneshot::channel();
        *self.tx.lock() = Some(tx);
        rx
    }

    fn complete(&self, result: Result<FetchedTile, FetchError>) {
        if let Some(tx) = self.tx.lock().take() {
            // The in-flight bytes are simply discarded when the last waiter
            // has gone away.
            let _ = tx.send(result);
        }
    }
}

/// Cleanup for the request that owns the network call.
///
/// If the owning future is dropped mid-fetch, any waiters subscribed to the
/// slot would otherwise hang forever; the drop path completes the slot with
/// an error and clears the in-flight entry.
struct OwnerCleanup<'a> {
    inflight: &'a DashMap<TileCoord, Arc<InflightSlot>>,
    slot: &'a InflightSlot,
    coord: TileCoord,
    completed: bool,
}

impl Drop for OwnerCleanup<'_> {
    fn drop(&mut self) {
        if !self.completed {
            self.inflight.remove(&self.coord);
            self.slot
                .complete(Err(FetchError::Transport("tile fetch cancelled".into())));
        }
    }
}

enum OfflineDecision {
    Online,
    Probe,
    ServeFallback,
}

/// Network fetcher for tiles and geometry payloads.
pub struct TileFetcher {
    client: Arc<dyn AsyncHttpClient>,
    config: FetcherConfig,
    pacer: HostPacer,
    gate: PriorityGate,
    inflight: DashMap<TileCoord, Arc<InflightSlot>>,
    rotation: AtomicUsize,
    consecutive_failures: AtomicU32,
    offline: AtomicBool,
    last_probe: Mutex<Instant>,
    network_calls: AtomicU64,
    jitter_seq: AtomicU64,
}

impl TileFetcher {
    pub fn new(client: Arc<dyn AsyncHttpClient>, config: FetcherConfig) -> Self {
        let pacer = HostPacer::new(config.base_interval);
        let gate = PriorityGate::new(config.max_concurrent);
        Self {
            client,
            config,
            pacer,
            gate,
            inflight: DashMap::new(),
            rotation: AtomicUsize::new(0),
            consecutive_failures: AtomicU32::new(0),
            offline: AtomicBool::new(false),
            last_probe: Mutex::new(Instant::now()),
            network_calls: AtomicU64::new(0),
            jitter_seq: AtomicU64::new(0),
        }
    }

    /// Fetch a tile, degrading to the fallback placeholder on failure.
    ///
    /// # Errors
    ///
    /// Only [`FetchError::Superseded`], when a newer request for the same
    /// tile replaced this pending completion.
    pub async fn fetch_tile(
        &self,
        coord: TileCoord,
        priority: Priority,
    ) -> Result<FetchedTile, FetchError> {
        match self.offline_decision() {
            OfflineDecision::ServeFallback => {
                debug!(%coord, "offline, serving fallback tile");
                return Ok(FetchedTile {
                    bytes: fallback_tile().to_vec(),
                    source: TileSource::Fallback,
                });
            }
            OfflineDecision::Probe => debug!(%coord, "offline, probing connectivity"),
            OfflineDecision::Online => {}
        }

        use dashmap::mapref::entry::Entry;
        let (slot, rx, is_owner) = match self.inflight.entry(coord) {
            Entry::Occupied(occupied) => {
                let slot = Arc::clone(occupied.get());
                let rx = slot.subscribe();
                debug!(%coord, "superseding pending completion for in-flight tile");
                (slot, rx, false)
            }
            Entry::Vacant(vacant) => {
                let slot = Arc::new(InflightSlot::default());
                let rx = slot.subscribe();
                vacant.insert(Arc::clone(&slot));
                (slot, rx, true)
            }
        };

        if is_owner {
            let mut cleanup = OwnerCleanup {
                inflight: &self.inflight,
                slot: &slot,
                coord,
                completed: false,
            };

            let outcome = {
                let _permit = self.gate.acquire(priority).await;
                self.request_with_retries(|| self.build_tile_url(&coord)).await
            };
            self.inflight.remove(&coord);

            let result = match outcome {
                Ok(bytes) => Ok(FetchedTile {
                    bytes,
                    source: TileSource::Network,
                }),
                Err(error) => {
                    warn!(%coord, %error, "tile fetch failed, serving fallback");
                    Ok(FetchedTile {
                        bytes: fallback_tile().to_vec(),
                        source: TileSource::Fallback,
                    })
                }
            };
            slot.complete(result);
            cleanup.completed = true;
        }

        rx.await.map_err(|_| FetchError::Superseded)?
    }

    /// Fetch and decode a geometry payload for `(type, bounds, zoom)`.
    ///
    /// # Errors
    ///
    /// Fails when offline (no fallback exists for geometry), when retries
    /// are exhausted, or when the payload does not decode.
    pub async fn fetch_geometry(
        &self,
        data_type: crate::types::DataType,
        bounds: &GeoBounds,
        zoom: u8,
        priority: Priority,
    ) -> Result<GeometrySet, FetchError> {
        match self.offline_decision() {
            OfflineDecision::ServeFallback => return Err(FetchError::Offline),
            OfflineDecision::Probe | OfflineDecision::Online => {}
        }

        let url = self
            .config
            .geometry_url_template
            .replace("{type}", data_type.as_str())
            .replace("{zoom}", &zoom.to_string())
            .replace(
                "{bbox}",
                &format!(
                    "{},{},{},{}",
                    bounds.min_lon, bounds.min_lat, bounds.max_lon, bounds.max_lat
                ),
            );

        let bytes = {
            let _permit = self.gate.acquire(priority).await;
            self.request_with_retries(|| url.clone()).await?
        };
        decode_geometry(&bytes).map_err(|e| FetchError::Decode(e.to_string()))
    }

    /// Number of requests waiting for an admission slot.
    pub fn queue_depth(&self) -> usize {
        self.gate.queue_depth()
    }

    /// Total network calls issued (excludes fallback serves).
    pub fn network_calls(&self) -> u64 {
        self.network_calls.load(Ordering::Relaxed)
    }

    /// Whether the fetcher is currently in offline mode.
    pub fn is_offline(&self) -> bool {
        self.offline.load(Ordering::Relaxed)
    }

    // ── internals ────────────────────────────────────────────────────────

    fn offline_decision(&self) -> OfflineDecision {
        if !self.offline.load(Ordering::Relaxed) {
            return OfflineDecision::Online;
        }
        let mut last_probe = self.last_probe.lock();
        if last_probe.elapsed() >= self.config.probe_interval {
            *last_probe = Instant::now();
            OfflineDecision::Probe
        } else {
            OfflineDecision::ServeFallback
        }
    }

    fn note_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        if self.offline.swap(false, Ordering::Relaxed) {
            info!("connectivity restored, leaving offline mode");
        }
    }

    fn note_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= self.config.offline_threshold
            && !self.offline.swap(true, Ordering::Relaxed)
        {
            *self.last_probe.lock() = Instant::now();
            warn!(failures, "entering offline mode");
        }
    }

    fn build_tile_url(&self, coord: &TileCoord) -> String {
        let subdomain = if self.config.subdomains.is_empty() {
            ""
        } else {
            let idx = self.rotation.fetch_add(1, Ordering::Relaxed) % self.config.subdomains.len();
            self.config.subdomains[idx].as_str()
        };
        self.config
            .tile_url_template
            .replace("{s}", subdomain)
            .replace("{z}", &coord.zoom.to_string())
            .replace("{x}", &coord.x.to_string())
            .replace("{y}", &coord.y.to_string())
    }

    /// Retry backoff for a given retry index: `2^attempt × 100–200 ms`.
    fn retry_backoff(&self, attempt: u32) -> Duration {
        let jitter_ms = 100 + self.jitter_seq.fetch_add(1, Ordering::Relaxed) % 101;
        Duration::from_millis((1u64 << attempt) * jitter_ms)
    }

    /// Issue one logical request with per-host pacing and transient-failure
    /// retries. `make_url` is called per attempt so subdomain rotation can
    /// pick a different host on retry.
    async fn request_with_retries(
        &self,
        make_url: impl Fn() -> String,
    ) -> Result<Vec<u8>, FetchError> {
        let mut attempt = 0u32;
        loop {
            let url = make_url();
            let host = host_of(&url)?;

            let delay = self.pacer.delay_for(&host);
            if !delay.is_zero() {
                debug!(%host, ?delay, "pacing request to host");
                tokio::time::sleep(delay).await;
            }
            self.pacer.note_request(&host);
            self.network_calls.fetch_add(1, Ordering::Relaxed);

            match self.client.get(&url).await {
                Ok(bytes) => {
                    self.pacer.record_success(&host);
                    self.note_success();
                    return Ok(bytes);
                }
                Err(error) => {
                    self.pacer.record_failure(&host);
                    if !error.is_transient() || attempt >= self.config.max_retries {
                        self.note_failure();
                        return Err(error);
                    }
                    let backoff = self.retry_backoff(attempt);
                    debug!(%url, %error, ?backoff, attempt, "transient failure, retrying");
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
            }
        }
    }
}

fn host_of(url: &str) -> Result<String, FetchError> {
    url.split("://")
        .nth(1)
        .and_then(|rest| rest.split('/').next())
        .filter(|host| !host.is_empty())
        .map(|host| host.to_string())
        .ok_or_else(|| FetchError::InvalidUrl(url.to_string()))
}
