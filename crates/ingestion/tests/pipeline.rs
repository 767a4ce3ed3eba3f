//! End-to-end ingestion against the in-memory store with a scripted extraction capability

use async_trait::async_trait;
use kgforge_common::config::{ExtractionConfig, RetrievalConfig};
use kgforge_common::errors::{AppError, Result};
use kgforge_common::graph::{GraphStore, MemoryGraphStore, NodeQuery, DOCUMENT_CHUNK_LABEL};
use kgforge_common::{EmbeddingService, ExtractionClient, Language};
use kgforge_ingestion::{IngestionProcessor, IngestionStatus, KnowledgeExtractor, SourceChunk};
use kgforge_search::RetrievalEngine;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

const LEASE_RESPONSE: &str = r#"{
  "nodes": [
    {"id": "acme corp", "type": "ORGANIZATION", "properties": [{"key": "role", "value": "Lessor"}]},
    {"id": "john smith", "type": "PERSON", "properties": [{"key": "role", "value": "Lessee"}]}
  ],
  "rels": [
    {"source": {"id": "acme corp", "type": "ORGANIZATION"},
     "target": {"id": "john smith", "type": "PERSON"},
     "type": "LEASES_TO",
     "properties": []}
  ]
}"#;

const LEASE_AGREEMENT_RESPONSE: &str = r#"{
  "nodes": [
    {"id": "acme corp", "type": "ORGANIZATION", "properties": [{"key": "role", "value": "Lessor"}]},
    {"id": "john smith", "type": "PERSON", "properties": [{"key": "role", "value": "Lessee"}]},
    {"id": "lease agreement", "type": "CONTRACT", "properties": []}
  ],
  "rels": [
    {"source": {"id": "acme corp", "type": "ORGANIZATION"},
     "target": {"id": "john smith", "type": "PERSON"},
     "type": "LEASES_TO",
     "properties": []},
    {"source": {"id": "acme corp", "type": "ORGANIZATION"},
     "target": {"id": "lease agreement", "type": "CONTRACT"},
     "type": "PARTY_TO",
     "properties": []}
  ]
}"#;

/// Replays queued responses in order; an `Err` entry fails that call
struct ScriptedClient {
    responses: Mutex<VecDeque<std::result::Result<String, String>>>,
}

impl ScriptedClient {
    fn new(responses: Vec<std::result::Result<&str, &str>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(
                responses
                    .into_iter()
                    .map(|r| r.map(str::to_string).map_err(str::to_string))
                    .collect(),
            ),
        })
    }
}

#[async_trait]
impl ExtractionClient for ScriptedClient {
    async fn complete(&self, _system_prompt: &str, _document_text: &str) -> Result<String> {
        let next = self.responses.lock().unwrap().pop_front();
        match next {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => Err(AppError::Extraction { message }),
            None => Ok("{}".to_string()),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

fn setup(client: Arc<ScriptedClient>) -> (Arc<MemoryGraphStore>, Arc<KnowledgeExtractor>) {
    let store = Arc::new(MemoryGraphStore::new());
    let extractor = Arc::new(KnowledgeExtractor::with_client(
        client,
        store.clone(),
        Arc::new(EmbeddingService::local()),
    ));
    (store, extractor)
}

#[tokio::test]
async fn test_lease_scenario_stats() {
    let (_, extractor) = setup(ScriptedClient::new(vec![Ok(LEASE_RESPONSE)]));
    let chunk = SourceChunk::new("The Lessor, Acme Corp, leases the Property to John Smith.");

    let doc = extractor.extract_and_store(&chunk, 1).await.unwrap();
    assert_eq!(doc.node_count(), 2);
    assert_eq!(doc.relationship_count(), 1);
    assert!(doc.nodes.iter().all(|n| n.language == Language::English && n.session_id == 1));

    let stats = extractor.get_session_stats(1).await.unwrap();
    assert_eq!(stats.get("Organization"), Some(&1));
    assert_eq!(stats.get("Person"), Some(&1));
    assert_eq!(stats.len(), 2);
}

#[tokio::test]
async fn test_ingested_lease_is_retrievable() {
    let (store, extractor) = setup(ScriptedClient::new(vec![Ok(LEASE_AGREEMENT_RESPONSE)]));
    let chunk = SourceChunk::new("The Lessor, Acme Corp, leases the Property to John Smith.");

    extractor.extract_and_store(&chunk, 1).await.unwrap();
    extractor.store_document_chunk(&chunk, 1, 0).await.unwrap();

    let engine = RetrievalEngine::new(store, RetrievalConfig::default());
    let result = engine.retrieve("lease", 1, None, None).await;

    assert!(result.error.is_none());
    assert_eq!(result.language, Language::English);
    assert_eq!(result.search_terms, vec!["lease"]);
    assert_eq!(result.context_chunks.len(), 1);

    let lease = result
        .entities
        .iter()
        .find(|e| e.entity.name.contains("Lease"))
        .expect("lease entity retrieved");
    assert_eq!(lease.entity.name, "Lease Agreement");
    assert_eq!(lease.entity.entity_type, "Contract");
    assert!(result.render_context().contains("Lease Agreement"));

    // Other session sees nothing
    assert!(engine.retrieve("lease", 2, None, None).await.is_empty());
}

#[tokio::test]
async fn test_repeated_stats_are_identical() {
    let (_, extractor) = setup(ScriptedClient::new(vec![Ok(LEASE_RESPONSE)]));
    extractor
        .extract_and_store(&SourceChunk::new("Acme Corp leases to John Smith"), 1)
        .await
        .unwrap();

    let first = extractor.get_session_stats(1).await.unwrap();
    let second = extractor.get_session_stats(1).await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_chunk_write_is_atomic() {
    let (store, extractor) = setup(ScriptedClient::new(vec![Ok(LEASE_RESPONSE), Ok(LEASE_RESPONSE)]));
    let chunk = SourceChunk::new("Acme Corp leases to John Smith");

    store.fail_next_relationship_write();
    assert!(extractor.extract_and_store(&chunk, 4).await.is_err());
    assert!(store.count_nodes(4).await.unwrap().is_empty());
    assert!(store.count_relationships(4).await.unwrap().is_empty());

    // The same chunk succeeds once the store recovers
    extractor.extract_and_store(&chunk, 4).await.unwrap();
    assert_eq!(store.count_relationships(4).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_clear_session_zeroes_everything() {
    let (store, extractor) = setup(ScriptedClient::new(vec![Ok(LEASE_RESPONSE), Ok(LEASE_RESPONSE)]));
    let processor = IngestionProcessor::new(extractor.clone(), None, true);
    let chunks = vec![SourceChunk::new("Acme Corp leases to John Smith")];

    processor.process_document(1, "lease", &chunks).await.unwrap();
    processor.process_document(2, "lease", &chunks).await.unwrap();

    let removed = extractor.clear_session_data(1).await.unwrap();
    assert_eq!(removed, 3); // two entities and one chunk
    assert!(extractor.get_session_stats(1).await.unwrap().is_empty());

    let chunks_left = store
        .match_nodes(&NodeQuery::in_session(1).label(DOCUMENT_CHUNK_LABEL))
        .await
        .unwrap();
    assert!(chunks_left.is_empty());

    // Other sessions are untouched
    assert_eq!(extractor.get_session_stats(2).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_failing_chunk_does_not_stop_batch() {
    let (_, extractor) = setup(ScriptedClient::new(vec![
        Err("upstream exploded"),
        Ok("no json at all"),
        Ok(LEASE_RESPONSE),
    ]));
    let processor = IngestionProcessor::new(extractor, None, true);
    let chunks = vec![
        SourceChunk::new("first"),
        SourceChunk::new("second"),
        SourceChunk::new("Acme Corp leases to John Smith"),
    ];

    let report = processor.process_document(7, "contract", &chunks).await.unwrap();
    assert_eq!(report.status, IngestionStatus::Partial);
    assert_eq!(report.chunks, 3);
    assert_eq!(report.chunks_extracted, 1);
    assert_eq!(report.chunks_stored, 3);
    assert_eq!(report.nodes_created, 2);
    assert_eq!(report.relationships_created, 1);
    assert_eq!(
        report.failures.iter().map(|f| f.chunk_index).collect::<Vec<_>>(),
        vec![0, 1]
    );
    assert_eq!(report.session_stats.get(DOCUMENT_CHUNK_LABEL), Some(&3));
    assert!(report.batch_id.starts_with("ingest_sess7_"));
}

#[tokio::test]
async fn test_missing_credential_skips_batch() {
    let store = Arc::new(MemoryGraphStore::new());
    let extractor = Arc::new(KnowledgeExtractor::new(
        ExtractionConfig::default(),
        store.clone(),
        Arc::new(EmbeddingService::local()),
    ));
    let processor = IngestionProcessor::new(extractor, None, true);

    let report = processor
        .process_document(1, "lease", &[SourceChunk::new("Acme Corp leases to John Smith")])
        .await
        .unwrap();

    assert_eq!(report.status, IngestionStatus::Skipped);
    assert_eq!(report.nodes_created, 0);
    assert!(report.note.is_some());
    assert!(store.count_nodes(1).await.unwrap().is_empty());
}
