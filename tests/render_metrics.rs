mod support;

use std::collections::HashSet;
use std::sync::Arc;

use bytes::Bytes;
use metrics_util::debugging::DebuggingRecorder;
use serde_json::json;
use tessera::application::queue::{BatchRenderQueue, ProjectSource, QueueConfig};
use tessera::cache::{PreviewCache, PreviewCacheConfig, PreviewCacheEntry};
use tessera::domain::params::parameters;
use tessera::domain::{Fingerprint, OutputFormat, RenderOptions, RenderStats};
use tessera::engine::GatewayConfig;

use support::ready_gateway;

#[tokio::test]
async fn render_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");

    // Preview cache hit/miss/evict
    let cache = PreviewCache::new(&PreviewCacheConfig::with_capacity(1));
    let first = Fingerprint::of(&parameters([("width", json!(1))]));
    let second = Fingerprint::of(&parameters([("width", json!(2))]));

    assert!(cache.get(&first).is_none());
    cache.insert(PreviewCacheEntry::new(
        first.clone(),
        Bytes::from_static(b"one"),
        RenderStats::default(),
    ));
    assert!(cache.get(&first).is_some());
    cache.insert(PreviewCacheEntry::new(
        second,
        Bytes::from_static(b"two"),
        RenderStats::default(),
    ));

    // Gateway render latency + memory gauge
    let (gateway, _engine) = ready_gateway(GatewayConfig::default()).await;
    gateway
        .render(
            "cube(1);".into(),
            parameters([("width", json!(1))]),
            RenderOptions::preview(),
        )
        .await
        .expect("preview render should succeed");
    assert!(gateway.memory_usage().await.available);

    // Queue job outcome counter
    let queue = BatchRenderQueue::new(Arc::new(gateway.clone()), QueueConfig::default());
    queue.set_project_source(ProjectSource::new("cube(1);"));
    queue
        .add_job(None, parameters([("width", json!(3))]), OutputFormat::Stl)
        .expect("job should be accepted");
    let summary = queue.process_queue().await.expect("queue should drain");
    assert_eq!(summary.completed, 1);

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    let expected = [
        "tessera_preview_cache_hit_total",
        "tessera_preview_cache_miss_total",
        "tessera_preview_cache_evict_total",
        "tessera_render_ms",
        "tessera_engine_memory_percent",
        "tessera_queue_job_total",
    ];

    for metric in expected {
        assert!(names.contains(metric), "missing metric: {metric}");
    }
}
