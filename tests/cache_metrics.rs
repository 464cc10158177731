use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use metrics_util::debugging::DebuggingRecorder;
use serial_test::serial;
use storefront_cache::cache::{
    CacheConfig, CacheManager, CacheOptions, METRIC_CACHE_ERROR, METRIC_CACHE_HIT,
    METRIC_CACHE_MISS, METRIC_LOCK_CONTENTION, METRIC_WARMUP_MS, SourceError, WarmupItem,
    WarmupOptions, Warmer, source_fn,
};
use storefront_cache::infra::store::MemoryStore;
use storefront_cache::infra::telemetry;

#[tokio::test(start_paused = true)]
#[serial]
async fn cache_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");
    telemetry::describe_metrics();

    let store = Arc::new(MemoryStore::new());
    let manager = Arc::new(CacheManager::new(store.clone(), CacheConfig::default()));
    let options = CacheOptions::new();

    // hit + miss
    assert!(manager.set("product:1", &"robe", &options).await);
    let _: Option<String> = manager.get("product:1", &options).await;
    let _: Option<String> = manager.get("product:2", &options).await;

    // lock contention: the second caller finds the lock taken by the first
    let slow = || async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok::<_, SourceError>("kimono".to_string())
    };
    let (first, second) = tokio::join!(
        manager.get_or_set_with_lock("product:3", slow, &options),
        manager.get_or_set_with_lock("product:3", slow, &options),
    );
    assert_eq!(first.expect("first"), "kimono");
    assert_eq!(second.expect("second"), "kimono");

    // warmup latency
    let warmer = Warmer::new(manager.clone());
    let source = source_fn(|id: String| async move { Ok::<_, SourceError>(id) });
    let report = warmer
        .warm(
            &[WarmupItem::new("4", "product:4")],
            &source,
            &WarmupOptions::default(),
            |_| {},
        )
        .await;
    assert_eq!(report.warmed_up, 1);

    // error
    store.simulate_outage(true);
    let _: Option<String> = manager.get("product:1", &options).await;

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    let expected = [
        METRIC_CACHE_HIT,
        METRIC_CACHE_MISS,
        METRIC_CACHE_ERROR,
        METRIC_LOCK_CONTENTION,
        METRIC_WARMUP_MS,
    ];

    for metric in expected {
        assert!(names.contains(metric), "missing metric: {metric}");
    }
}
