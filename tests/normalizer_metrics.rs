use std::collections::HashSet;
use std::sync::Arc;

use metrics_util::debugging::DebuggingRecorder;
use querynorm::cache::{
    MemoryQueryCache, NormalizerConfig, QueryCache, QueryCacheError, QueryKey, QueryNormalizer,
    WriteOrigin, WriteQueue,
};
use querynorm::infra::telemetry;
use serde_json::{Value, json};

struct ReadOnlyQuery {
    inner: MemoryQueryCache,
    read_only: QueryKey,
}

impl QueryCache for ReadOnlyQuery {
    fn subscribe_to_writes(&self, queue: Arc<WriteQueue>) {
        self.inner.subscribe_to_writes(queue);
    }

    fn get_query_data(&self, query_key: &QueryKey) -> Option<Value> {
        self.inner.get_query_data(query_key)
    }

    fn set_query_data(
        &self,
        query_key: &QueryKey,
        value: Value,
        origin: WriteOrigin,
    ) -> Result<(), QueryCacheError> {
        if query_key == &self.read_only && origin.is_internal() {
            return Err(QueryCacheError::rejected("read-only query"));
        }
        self.inner.set_query_data(query_key, value, origin)
    }
}

#[test]
fn normalizer_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");
    telemetry::describe_metrics();

    // Ingest, write queue and successful propagation
    let host = Arc::new(MemoryQueryCache::new());
    let normalizer = QueryNormalizer::new(
        NormalizerConfig::with_type_fields(["type_name"]),
        host.clone(),
    );
    host.write("single", json!({"id": "p1", "type_name": "project", "name": "Alpha"}));
    host.write("list", json!([{"id": "p1", "type_name": "project", "name": "Alpha"}]));
    let report = normalizer
        .set_normalized_data("project", "p1", json!({"name": "Beta"}))
        .expect("update applies");
    assert_eq!(report.rewritten.len(), 2);

    // Failed propagation
    let rejecting = Arc::new(ReadOnlyQuery {
        inner: MemoryQueryCache::new(),
        read_only: QueryKey::from("pinned"),
    });
    let isolated = QueryNormalizer::new(
        NormalizerConfig::with_type_fields(["type_name"]),
        rejecting.clone(),
    );
    rejecting
        .set_query_data(
            &QueryKey::from("pinned"),
            json!({"id": "p1", "type_name": "project", "name": "Alpha"}),
            WriteOrigin::External,
        )
        .expect("external write accepted");
    let report = isolated
        .set_normalized_data("project", "p1", json!({"name": "Beta"}))
        .expect("store update succeeds");
    assert_eq!(report.failed.len(), 1);

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    let expected = [
        "querynorm_ingest_total",
        "querynorm_propagate_total",
        "querynorm_propagate_failed_total",
        "querynorm_propagate_ms",
        "querynorm_store_entities",
        "querynorm_write_queue_len",
    ];

    for metric in expected {
        assert!(names.contains(metric), "missing metric: {metric}");
    }
}
