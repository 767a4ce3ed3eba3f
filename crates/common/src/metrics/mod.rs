//! Metrics and observability utilities
//!
//! Prometheus-style metrics for the ingestion and retrieval pipelines with
//! standardized naming. Recording is a no-op until a recorder is installed.

use metrics::{counter, describe_counter, describe_histogram, gauge, describe_gauge, histogram, Unit};

/// Metrics prefix for all KGForge metrics
pub const METRICS_PREFIX: &str = "kgforge";

/// Buckets for retrieval latency (in seconds)
pub const RETRIEVAL_BUCKETS: &[f64] = &[
    0.005,  // 5ms
    0.010,  // 10ms
    0.025,  // 25ms
    0.050,  // 50ms
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.500,  // 2.5s
    5.000,  // 5s
];

/// Buckets for extraction latency (model calls are slow)
pub const EXTRACTION_BUCKETS: &[f64] = &[
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.000,  // 2s
    5.000,  // 5s
    10.00,  // 10s
    30.00,  // 30s
    60.00,  // 60s
];

/// Register all metric descriptions
pub fn register_metrics() {
    // Ingestion metrics
    describe_counter!(
        format!("{}_chunks_processed_total", METRICS_PREFIX),
        Unit::Count,
        "Chunks run through knowledge extraction, by outcome"
    );

    describe_counter!(
        format!("{}_graph_nodes_written_total", METRICS_PREFIX),
        Unit::Count,
        "Graph nodes written by extraction"
    );

    describe_counter!(
        format!("{}_graph_relationships_written_total", METRICS_PREFIX),
        Unit::Count,
        "Graph relationships written by extraction"
    );

    describe_histogram!(
        format!("{}_extraction_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Extraction capability latency in seconds"
    );

    // Retrieval metrics
    describe_counter!(
        format!("{}_retrievals_total", METRICS_PREFIX),
        Unit::Count,
        "Total retrieval requests, by language and outcome"
    );

    describe_histogram!(
        format!("{}_retrieval_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Retrieval latency in seconds"
    );

    describe_gauge!(
        format!("{}_retrieval_entities_count", METRICS_PREFIX),
        Unit::Count,
        "Entities returned by the last retrieval"
    );

    // Embedding metrics
    describe_counter!(
        format!("{}_embedding_fallback_total", METRICS_PREFIX),
        Unit::Count,
        "Switches from the remote embedding model to the local fallback"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record one chunk's extraction outcome
pub fn record_chunk(duration_secs: f64, language: &str, nodes: usize, relationships: usize, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_chunks_processed_total", METRICS_PREFIX),
        "language" => language.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    histogram!(
        format!("{}_extraction_duration_seconds", METRICS_PREFIX)
    )
    .record(duration_secs);

    if success {
        counter!(format!("{}_graph_nodes_written_total", METRICS_PREFIX)).increment(nodes as u64);
        counter!(format!("{}_graph_relationships_written_total", METRICS_PREFIX))
            .increment(relationships as u64);
    }
}

/// Helper to record retrieval metrics
pub fn record_retrieval(duration_secs: f64, language: &str, entity_count: usize, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_retrievals_total", METRICS_PREFIX),
        "language" => language.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    histogram!(
        format!("{}_retrieval_duration_seconds", METRICS_PREFIX),
        "language" => language.to_string()
    )
    .record(duration_secs);

    gauge!(
        format!("{}_retrieval_entities_count", METRICS_PREFIX),
        "language" => language.to_string()
    )
    .set(entity_count as f64);
}

/// Helper to record a fallback switch in the embedding service
pub fn record_embedding_fallback() {
    counter!(format!("{}_embedding_fallback_total", METRICS_PREFIX)).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buckets_sorted() {
        for buckets in [RETRIEVAL_BUCKETS, EXTRACTION_BUCKETS] {
            let mut prev = 0.0;
            for &bucket in buckets {
                assert!(bucket > prev);
                prev = bucket;
            }
        }
    }

    #[test]
    fn test_recording_without_recorder() {
        record_chunk(0.5, "english", 2, 1, true);
        record_retrieval(0.01, "arabic", 0, false);
        record_embedding_fallback();
    }
}
