//! Ingestion processor
//!
//! Walks a document's chunks through the knowledge extractor. A failing chunk
//! is logged and recorded in the report; the batch carries on. Calls to the
//! extraction capability share one keyed token bucket.

use crate::errors::IngestionError;
use crate::extractor::{KnowledgeExtractor, SessionStats, SourceChunk};
use governor::{
    clock::DefaultClock,
    state::keyed::DefaultKeyedStateStore,
    Quota, RateLimiter,
};
use kgforge_common::graph::SessionId;
use kgforge_common::metrics;
use serde::{Deserialize, Serialize};
use std::io::BufRead;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Token bucket keyed by extraction capability name
pub type ExtractionRateLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Create the extraction limiter; `None` when the rate is 0
pub fn create_rate_limiter(requests_per_minute: u32) -> Option<Arc<ExtractionRateLimiter>> {
    let rate = NonZeroU32::new(requests_per_minute)?;
    let quota = Quota::per_minute(rate).allow_burst(NonZeroU32::MIN);
    Some(Arc::new(RateLimiter::keyed(quota)))
}

/// Outcome of a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestionStatus {
    /// Every chunk was extracted
    Completed,
    /// Some chunks failed extraction
    Partial,
    /// Nothing was processed, see `note`
    Skipped,
}

/// Per-chunk failure entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkFailure {
    pub chunk_index: usize,
    pub error: String,
}

/// Summary of one ingestion batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionReport {
    pub batch_id: String,
    pub session_id: SessionId,
    pub status: IngestionStatus,
    pub chunks: usize,
    pub chunks_extracted: usize,
    pub chunks_stored: usize,
    pub nodes_created: usize,
    pub relationships_created: usize,
    pub failures: Vec<ChunkFailure>,
    pub session_stats: SessionStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl IngestionReport {
    fn new(session_id: SessionId, source_name: &str, chunks: usize) -> Self {
        Self {
            batch_id: format!("ingest_sess{}_{}_{}", session_id, Uuid::new_v4(), source_name),
            session_id,
            status: IngestionStatus::Completed,
            chunks,
            chunks_extracted: 0,
            chunks_stored: 0,
            nodes_created: 0,
            relationships_created: 0,
            failures: Vec::new(),
            session_stats: SessionStats::new(),
            note: None,
        }
    }
}

/// Batch orchestrator over the knowledge extractor
pub struct IngestionProcessor {
    extractor: Arc<KnowledgeExtractor>,
    limiter: Option<Arc<ExtractionRateLimiter>>,
    store_chunks: bool,
}

impl IngestionProcessor {
    pub fn new(
        extractor: Arc<KnowledgeExtractor>,
        limiter: Option<Arc<ExtractionRateLimiter>>,
        store_chunks: bool,
    ) -> Self {
        Self {
            extractor,
            limiter,
            store_chunks,
        }
    }

    /// Process all chunks of one document into the session
    #[instrument(skip(self, chunks), fields(chunk_count = chunks.len()))]
    pub async fn process_document(
        &self,
        session_id: SessionId,
        source_name: &str,
        chunks: &[SourceChunk],
    ) -> Result<IngestionReport, IngestionError> {
        let mut report = IngestionReport::new(session_id, source_name, chunks.len());

        if let Err(e) = self.extractor.initialize().await {
            if e.is_fatal_for_batch() {
                warn!(session_id, error = %e, "Extraction capability not configured, skipping ingestion");
                report.status = IngestionStatus::Skipped;
                report.note = Some(e.to_string());
                return Ok(report);
            }
            return Err(e.into());
        }

        let capability = self.extractor.capability_name().await?;
        info!(session_id, capability = %capability, "Processing document");

        for (index, chunk) in chunks.iter().enumerate() {
            if let Some(limiter) = &self.limiter {
                limiter.until_key_ready(&capability).await;
            }

            let started = Instant::now();
            match self.extractor.extract_and_store(chunk, session_id).await {
                Ok(document) => {
                    report.chunks_extracted += 1;
                    report.nodes_created += document.node_count();
                    report.relationships_created += document.relationship_count();
                    metrics::record_chunk(
                        started.elapsed().as_secs_f64(),
                        document
                            .nodes
                            .first()
                            .map(|n| n.language.as_str())
                            .unwrap_or("unknown"),
                        document.node_count(),
                        document.relationship_count(),
                        true,
                    );
                    info!(
                        session_id,
                        chunk_index = index,
                        nodes = document.node_count(),
                        relationships = document.relationship_count(),
                        "Processed chunk {}/{}",
                        index + 1,
                        chunks.len()
                    );
                }
                Err(e) => {
                    metrics::record_chunk(started.elapsed().as_secs_f64(), "unknown", 0, 0, false);
                    warn!(
                        session_id,
                        chunk_index = index,
                        error = %e,
                        error_code = e.code().as_code(),
                        "Failed to process chunk {}/{}",
                        index + 1,
                        chunks.len()
                    );
                    report.failures.push(ChunkFailure {
                        chunk_index: index,
                        error: e.to_string(),
                    });
                }
            }

            if self.store_chunks {
                match self
                    .extractor
                    .store_document_chunk(chunk, session_id, index as i64)
                    .await
                {
                    Ok(_) => report.chunks_stored += 1,
                    Err(e) => {
                        warn!(session_id, chunk_index = index, error = %e, "Failed to store document chunk");
                    }
                }
            }
        }

        if !report.failures.is_empty() {
            report.status = IngestionStatus::Partial;
        }

        match self.extractor.get_session_stats(session_id).await {
            Ok(stats) => report.session_stats = stats,
            Err(e) => warn!(session_id, error = %e, "Failed to get session statistics"),
        }

        info!(
            session_id,
            batch_id = %report.batch_id,
            nodes = report.nodes_created,
            relationships = report.relationships_created,
            failed = report.failures.len(),
            "Document ingestion finished"
        );

        Ok(report)
    }
}

/// Read chunks from JSON Lines: one `{"content": .., "metadata": {..}}` per line
pub fn read_chunks<R: BufRead>(reader: R) -> Result<Vec<SourceChunk>, IngestionError> {
    let mut chunks = Vec::new();
    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let chunk: SourceChunk = serde_json::from_str(&line).map_err(|e| IngestionError::InputError {
            line: number + 1,
            message: e.to_string(),
        })?;
        chunks.push(chunk);
    }
    Ok(chunks)
}
