use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
    middleware,
    routing::get,
};
use serde::{Deserialize, Serialize};
use storefront_cache::cache::middleware::CACHE_STATUS_HEADER;
use storefront_cache::cache::{
    Cache, CacheAside, CacheConfig, CacheManager, CacheOptions, MultiLevel, ResponseCacheOptions,
    ResponseCacheState, SourceError, WarmupItem, WarmupOptions, Warmer, WriteThrough, sink_fn,
    source_fn, with_cache,
};
use storefront_cache::infra::store::MemoryStore;
use tower::ServiceExt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Product {
    name: String,
}

fn robe() -> Product {
    Product {
        name: "Robe".to_string(),
    }
}

fn manager() -> (Arc<MemoryStore>, Arc<CacheManager>) {
    let store = Arc::new(MemoryStore::new());
    let manager = Arc::new(CacheManager::new(store.clone(), CacheConfig::default()));
    (store, manager)
}

#[tokio::test]
async fn tag_invalidation_removes_tagged_product() {
    let (_, manager) = manager();
    let options = CacheOptions::new()
        .with_ttl(Duration::from_secs(3600))
        .with_tags(["products"]);

    assert!(manager.set("product:1", &robe(), &options).await);
    assert_eq!(manager.invalidate_tag("products").await, 1);

    let cached: Option<Product> = manager
        .get("product:1", &CacheOptions::new().with_tags(["products"]))
        .await;
    assert_eq!(cached, None);
}

#[tokio::test(start_paused = true)]
async fn warmup_of_twelve_items_runs_three_batches() {
    let (_, manager) = manager();
    let warmer = Warmer::new(manager.clone());
    let items: Vec<WarmupItem> = (1..=12)
        .map(|id| WarmupItem::new(id.to_string(), format!("product:{id}")))
        .collect();
    let source = source_fn(|id: String| async move {
        tokio::time::sleep(Duration::from_millis(5)).await;
        Ok::<_, SourceError>(Product {
            name: format!("product {id}"),
        })
    });
    let options = WarmupOptions {
        concurrency: NonZeroUsize::new(5),
        ..Default::default()
    };

    let mut completed = Vec::new();
    let report = warmer
        .warm(&items, &source, &options, |progress| {
            completed.push(progress.completed)
        })
        .await;

    assert_eq!(report.warmed_up, 12);
    assert_eq!(report.failed, 0);
    assert_eq!(completed, vec![5, 10, 12]);
    assert!(manager.exists("product:12", &[]).await);
}

#[tokio::test]
async fn strategies_share_one_manager_behind_the_trait() {
    let (_, manager) = manager();
    let loads = Arc::new(AtomicUsize::new(0));
    let counter = loads.clone();
    let source = source_fn(move |key: String| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, SourceError>(Product { name: key })
        }
    });

    let aside: Box<dyn Cache<Product>> = Box::new(CacheAside::new(
        manager.clone(),
        source.clone(),
        CacheOptions::new().with_tags(["catalog"]),
    ));
    let layered: Box<dyn Cache<Product>> = Box::new(MultiLevel::new(
        manager.clone(),
        source,
        CacheOptions::new().with_tags(["catalog"]),
    ));

    assert_eq!(aside.get("sku-1").await.expect("loaded").name, "sku-1");
    assert_eq!(layered.get("sku-1").await.expect("cached").name, "sku-1");
    assert_eq!(loads.load(Ordering::SeqCst), 1);

    assert_eq!(aside.invalidate(None).await, 1);
    assert!(!manager.exists("sku-1", &["catalog".to_string()]).await);
}

#[tokio::test]
async fn write_through_failure_leaves_no_stale_entry() {
    let (_, manager) = manager();
    let options = CacheOptions::new();
    assert!(manager.set("product:9", &robe(), &options).await);

    let cache = WriteThrough::new(
        manager.clone(),
        source_fn(|_key: String| async { Ok::<_, SourceError>(robe()) }),
        sink_fn(|_key: String, _value: Product| async {
            Err::<(), _>(SourceError::failed("catalog rejected the write"))
        }),
        options.clone(),
    );

    let error = cache
        .set(
            "product:9",
            Product {
                name: "Kimono".to_string(),
            },
        )
        .await
        .unwrap_err();

    assert!(error.to_string().contains("catalog rejected the write"));
    assert!(!manager.exists("product:9", &[]).await);
}

#[tokio::test]
async fn store_outage_degrades_to_misses() {
    let (store, manager) = manager();
    store.simulate_outage(true);

    let options = CacheOptions::new();
    assert!(!manager.set("product:1", &robe(), &options).await);
    assert_eq!(manager.get::<Product>("product:1", &options).await, None);

    let stats = manager.stats().await;
    assert_eq!(stats.keys, 0);
    assert!(stats.errors >= 2);
}

#[tokio::test]
async fn cached_responses_are_dropped_with_their_tag() {
    let (_, manager) = manager();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let state = ResponseCacheState::new(
        manager.clone(),
        ResponseCacheOptions {
            tags: vec!["pages".to_string()],
            ..Default::default()
        },
    );
    let app = Router::new()
        .route(
            "/collections/summer",
            get(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    "summer"
                }
            }),
        )
        .layer(middleware::from_fn_with_state(state, with_cache));

    let request = || {
        Request::builder()
            .uri("/collections/summer")
            .body(Body::empty())
            .expect("request")
    };

    let first = app.clone().oneshot(request()).await.expect("response");
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(first.headers()[CACHE_STATUS_HEADER], "MISS");

    let second = app.clone().oneshot(request()).await.expect("response");
    assert_eq!(second.headers()[CACHE_STATUS_HEADER], "HIT");
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    assert_eq!(manager.invalidate_tag("pages").await, 1);

    let third = app.oneshot(request()).await.expect("response");
    assert_eq!(third.headers()[CACHE_STATUS_HEADER], "MISS");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}
