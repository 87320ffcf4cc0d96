//! End-to-end scenarios against the engine facade, driven by a scripted
//! HTTP client and a manually advanced clock.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use cartolayer::clock::ManualClock;
use cartolayer::coord::{GeoBounds, TileCoord};
use cartolayer::coordinator::PrefetchPriority;
use cartolayer::engine::{EngineConfig, MapDataEngine};
use cartolayer::fetch::testing::ScriptedHttpClient;
use cartolayer::fetch::{fallback_tile, AsyncHttpClient, FetchError, FetcherConfig};
use cartolayer::region::{DownloadRequest, ProgressCallback, RegionArea};
use cartolayer::store::RegionStatus;
use cartolayer::types::{DataType, GeometrySet, Payload};

struct Harness {
    engine: MapDataEngine,
    client: Arc<ScriptedHttpClient>,
    clock: Arc<ManualClock>,
    _dir: tempfile::TempDir,
}

fn harness(client: ScriptedHttpClient) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::new());
    let client = Arc::new(client);

    let config = EngineConfig::new(dir.path().to_path_buf())
        .with_min_fetch_interval(Duration::ZERO)
        .with_fetcher(FetcherConfig {
            base_interval: Duration::from_millis(1),
            ..FetcherConfig::default()
        });
    let mut config = config;
    config.coordinator.prefetch_debounce = Duration::from_millis(100);
    config.coordinator.prefetch_pause = Duration::from_millis(1);
    config.decode_workers = Some(1);

    let engine = MapDataEngine::start_with(
        config,
        Arc::clone(&client) as Arc<dyn AsyncHttpClient>,
        clock.clone(),
    )
    .unwrap();

    Harness {
        engine,
        client,
        clock,
        _dir: dir,
    }
}

/// Valid both as opaque tile bytes and as a decodable geometry payload.
fn geometry_body() -> Vec<u8> {
    serde_json::to_vec(&GeometrySet::default()).unwrap()
}

fn sf_bounds() -> GeoBounds {
    GeoBounds::new(37.75, -122.45, 37.78, -122.40).unwrap()
}

const WEEK: Duration = Duration::from_secs(7 * 24 * 3600);

#[tokio::test]
async fn store_data_is_idempotent_and_round_trips() {
    let h = harness(ScriptedHttpClient::always_ok(geometry_body()));
    let payload = Payload::Bytes(vec![0xDE, 0xAD, 0xBE, 0xEF]);

    h.engine
        .store_data(DataType::Road, "road-area-1", payload.clone(), None, Some(14.0))
        .await;
    h.engine
        .store_data(DataType::Road, "road-area-1", payload.clone(), None, Some(14.0))
        .await;

    // Exactly one disk entry: the byte total equals one payload.
    let stats = h.engine.cache_stats().await;
    assert_eq!(stats.disk_size_bytes, 4);

    let read_back = h
        .engine
        .get_data(DataType::Road, "road-area-1", None, Some(14.0), false)
        .await
        .expect("stored payload must read back");
    assert_eq!(read_back, payload, "round-trip must be byte-identical");

    h.engine.shutdown().await;
}

#[tokio::test]
async fn ttl_boundary_is_absolute_from_creation() {
    let h = harness(ScriptedHttpClient::always_ok(geometry_body()));
    let bounds = sf_bounds();
    let payload = Payload::Bytes(vec![1, 2, 3]);

    h.engine
        .store_data(DataType::Tile, "", payload.clone(), Some(bounds), Some(14.0))
        .await;

    // Hit just before the TTL.
    h.clock.advance(WEEK - Duration::from_secs(1));
    assert!(h
        .engine
        .get_data(DataType::Tile, "", Some(bounds), Some(14.0), false)
        .await
        .is_some());

    // Miss just after, in every tier.
    h.clock.advance(Duration::from_secs(2));
    assert!(h
        .engine
        .get_data(DataType::Tile, "", Some(bounds), Some(14.0), false)
        .await
        .is_none());
    assert!(
        !h.engine
            .has_data(DataType::Tile, "", Some(bounds), Some(14.0))
            .await
    );

    h.engine.shutdown().await;
}

#[tokio::test]
async fn download_region_end_to_end() {
    let h = harness(ScriptedHttpClient::always_ok(geometry_body()));
    let progress = Arc::new(Mutex::new(Vec::<f64>::new()));
    let progress_sink = Arc::clone(&progress);
    let callback: ProgressCallback = Arc::new(move |f| progress_sink.lock().push(f));

    let record = h
        .engine
        .download_region(
            DownloadRequest {
                name: "sf-downtown".into(),
                area: RegionArea::Center {
                    lat: 37.7749,
                    lon: -122.4194,
                    radius_km: 2.0,
                },
                zoom_levels: vec![13, 14],
                data_types: DataType::ALL.to_vec(),
            },
            callback,
        )
        .await
        .expect("download must succeed");

    assert_eq!(record.status, RegionStatus::Downloaded);
    assert!(record.size_bytes > 0);

    let seen = progress.lock();
    assert!((seen.last().unwrap() - 1.0).abs() < 1e-9, "progress reaches 1.0");
    assert!(seen.windows(2).all(|w| w[1] >= w[0]), "progress is monotonic");
    drop(seen);

    assert!(h.engine.is_region_available(&record.bounds, 13).await);
    assert!(h.engine.is_region_available(&record.bounds, 14).await);

    let regions = h.engine.get_downloaded_regions().await;
    assert_eq!(regions.len(), 1);
    assert_eq!(regions[0].id, record.id);

    h.engine.shutdown().await;
}

#[tokio::test]
async fn deleted_region_disappears_from_listings_and_coverage() {
    let h = harness(ScriptedHttpClient::always_ok(geometry_body()));
    let callback: ProgressCallback = Arc::new(|_| {});

    let record = h
        .engine
        .download_region(
            DownloadRequest {
                name: "to-delete".into(),
                area: RegionArea::Bounds(sf_bounds()),
                zoom_levels: vec![13],
                data_types: vec![DataType::Tile, DataType::Road],
            },
            callback,
        )
        .await
        .unwrap();
    assert!(h.engine.is_region_available(&record.bounds, 13).await);

    h.engine.delete_region(&record.id).await.unwrap();

    assert!(h.engine.get_downloaded_regions().await.is_empty());
    assert!(!h.engine.is_region_available(&record.bounds, 13).await);

    h.engine.shutdown().await;
}

#[tokio::test]
async fn offline_mode_serves_fallback_with_zero_network_calls() {
    let h = harness(ScriptedHttpClient::always_err(FetchError::Transport(
        "network unreachable".into(),
    )));

    // Three terminal failures push the fetcher into offline mode.
    for x in 0..3 {
        let bytes = h.engine.tile_image(TileCoord::new(10, x, 0)).await.unwrap();
        assert_eq!(bytes, fallback_tile());
    }
    assert!(h.engine.is_offline());

    // While offline, a tile request answers with the fallback bytes and
    // records zero network calls.
    let calls_before = h.engine.network_calls();
    let bytes = h.engine.tile_image(TileCoord::new(10, 5, 5)).await.unwrap();
    assert_eq!(bytes, fallback_tile());
    assert_eq!(h.engine.network_calls(), calls_before);
    assert_eq!(h.client.request_count() as u64, calls_before);

    h.engine.shutdown().await;
}

#[tokio::test]
async fn rapid_prefetch_calls_coalesce_into_one_request() {
    let h = harness(ScriptedHttpClient::always_ok(geometry_body()));
    let bounds = sf_bounds();

    // Two overlapping prefetches within 50 ms.
    h.engine.prefetch_region(
        bounds,
        vec![DataType::Road],
        14,
        14,
        PrefetchPriority::Normal,
    );
    tokio::time::sleep(Duration::from_millis(30)).await;
    h.engine.prefetch_region(
        bounds,
        vec![DataType::Road],
        14,
        14,
        PrefetchPriority::Normal,
    );

    tokio::time::sleep(Duration::from_millis(400)).await;

    // Only one request reached the network, and the queue has drained.
    assert_eq!(h.client.request_count(), 1);
    assert_eq!(h.engine.cache_stats().await.queue_depth, 0);

    // The warmed entry is now a local hit.
    assert!(h
        .engine
        .get_data(DataType::Road, "", Some(bounds), Some(14.0), false)
        .await
        .is_some());

    h.engine.shutdown().await;
}

#[tokio::test]
async fn vector_tiles_rasterize_and_cache() {
    let h = harness(ScriptedHttpClient::always_ok(geometry_body()));
    let coord = TileCoord::new(14, 2620, 6333);

    let png = h.engine.vector_tile_image(coord).await.unwrap();
    assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");
    let fetches = h.client.request_count();

    // Cached: the second request issues no further network traffic.
    let again = h.engine.vector_tile_image(coord).await.unwrap();
    assert_eq!(again, png);
    assert_eq!(h.client.request_count(), fetches);

    h.engine.shutdown().await;
}

#[tokio::test]
async fn cache_stats_track_requests_hits_and_types() {
    let h = harness(ScriptedHttpClient::always_ok(geometry_body()));
    let bounds = sf_bounds();

    // Miss + fetch, then a hit.
    h.engine
        .get_data(DataType::Building, "", Some(bounds), Some(14.0), true)
        .await
        .unwrap();
    h.engine
        .get_data(DataType::Building, "", Some(bounds), Some(14.0), true)
        .await
        .unwrap();

    let stats = h.engine.cache_stats().await;
    assert_eq!(stats.requests, 2);
    assert_eq!(stats.hits, 1);
    assert!((stats.hit_rate - 0.5).abs() < 1e-9);
    assert_eq!(stats.by_type[&DataType::Building].requests, 2);
    assert!(stats.disk_size_bytes > 0);

    h.engine.shutdown().await;
}

#[tokio::test]
async fn clear_type_and_clear_all_scope_correctly() {
    let h = harness(ScriptedHttpClient::always_ok(geometry_body()));

    h.engine
        .store_data(DataType::Road, "r1", Payload::Bytes(vec![1]), None, Some(14.0))
        .await;
    h.engine
        .store_data(DataType::Poi, "p1", Payload::Bytes(vec![2]), None, Some(14.0))
        .await;

    h.engine.clear_type(DataType::Road).await;
    assert!(h
        .engine
        .get_data(DataType::Road, "r1", None, Some(14.0), false)
        .await
        .is_none());
    assert!(h
        .engine
        .get_data(DataType::Poi, "p1", None, Some(14.0), false)
        .await
        .is_some());

    h.engine.clear_all().await;
    assert!(h
        .engine
        .get_data(DataType::Poi, "p1", None, Some(14.0), false)
        .await
        .is_none());

    h.engine.shutdown().await;
}
