//! Knowledge extraction
//!
//! Turns one text chunk into stamped graph elements through the extraction
//! capability, and stores the chunk itself as a `DocumentChunk` node.

use crate::parser::parse_extraction;
use chrono::Utc;
use kgforge_common::config::ExtractionConfig;
use kgforge_common::errors::{AppError, Result};
use kgforge_common::extraction::{ChatCompletionClient, ExtractionClient};
use kgforge_common::graph::{DocumentChunk, GraphDocument, GraphStore, SessionId};
use kgforge_common::{EmbeddingService, LanguageDetector};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{error, info, instrument};

/// System prompt for entity and relationship extraction
pub const EXTRACTION_PROMPT: &str = r#"You are a knowledge graph extraction expert. Extract entities and relationships from the given text.

Focus on extracting:
- Legal entities (persons, organizations, contracts, cases, laws, regulations)
- Legal relationships (agreements, obligations, rights, responsibilities)
- Key legal concepts and terms
- Dates, amounts, and other important details

For each entity, provide:
- A clear, unique identifier
- Entity type (PERSON, ORGANIZATION, CONTRACT, CASE, LAW, etc.)
- Relevant properties (name, date, amount, description, etc.)

For each relationship, provide:
- Source and target entities
- Relationship type (AGREES_TO, OBLIGATED_BY, INVOLVES, etc.)
- Relevant properties

Be precise and avoid duplicates.

Return the result in JSON format matching this schema:
{
    "nodes": [
        {
            "id": "entity_id",
            "type": "ENTITY_TYPE",
            "properties": [
                {"key": "property_name", "value": "property_value"}
            ]
        }
    ],
    "rels": [
        {
            "source": {"id": "source_id", "type": "SOURCE_TYPE"},
            "target": {"id": "target_id", "type": "TARGET_TYPE"},
            "type": "RELATIONSHIP_TYPE",
            "properties": [
                {"key": "property_name", "value": "property_value"}
            ]
        }
    ]
}

The text to extract from is the user message."#;

/// A text chunk handed to ingestion
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceChunk {
    pub content: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl SourceChunk {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            metadata: serde_json::Map::new(),
        }
    }
}

/// Node counts by label for one session
pub type SessionStats = BTreeMap<String, u64>;

/// Drives extraction and persistence for single chunks
pub struct KnowledgeExtractor {
    config: ExtractionConfig,
    client: OnceCell<Arc<dyn ExtractionClient>>,
    store: Arc<dyn GraphStore>,
    embeddings: Arc<EmbeddingService>,
    detector: LanguageDetector,
}

impl KnowledgeExtractor {
    /// Extractor whose capability client is built from configuration on first use
    pub fn new(
        config: ExtractionConfig,
        store: Arc<dyn GraphStore>,
        embeddings: Arc<EmbeddingService>,
    ) -> Self {
        Self {
            config,
            client: OnceCell::new(),
            store,
            embeddings,
            detector: LanguageDetector::new(),
        }
    }

    /// Extractor around an already constructed capability client
    pub fn with_client(
        client: Arc<dyn ExtractionClient>,
        store: Arc<dyn GraphStore>,
        embeddings: Arc<EmbeddingService>,
    ) -> Self {
        Self {
            config: ExtractionConfig::default(),
            client: OnceCell::new_with(Some(client)),
            store,
            embeddings,
            detector: LanguageDetector::new(),
        }
    }

    async fn client(&self) -> Result<&Arc<dyn ExtractionClient>> {
        self.client
            .get_or_try_init(|| async {
                let client = ChatCompletionClient::from_config(&self.config)?;
                Ok::<_, AppError>(Arc::new(client) as Arc<dyn ExtractionClient>)
            })
            .await
    }

    /// Acquire the extraction capability and check the embedding model.
    /// Idempotent; fails with a configuration error when no credential is set.
    pub async fn initialize(&self) -> Result<()> {
        let client = self.client().await?;
        self.embeddings.initialize().await;
        info!(
            capability = client.name(),
            store = self.store.backend_name(),
            embedding_model = self.embeddings.model_name(),
            "Knowledge extractor initialized"
        );
        Ok(())
    }

    /// Name of the extraction capability, once initialized
    pub async fn capability_name(&self) -> Result<String> {
        Ok(self.client().await?.name().to_string())
    }

    pub fn store(&self) -> &Arc<dyn GraphStore> {
        &self.store
    }

    /// Extract a graph from the chunk and persist it in one atomic write
    #[instrument(skip(self, chunk), fields(chars = chunk.content.len()))]
    pub async fn extract_and_store(&self, chunk: &SourceChunk, session_id: SessionId) -> Result<GraphDocument> {
        let client = self.client().await?;

        let language = self.detector.detect(&chunk.content);
        let prompt = self.detector.augment_prompt(language, EXTRACTION_PROMPT);

        let raw = client.complete(&prompt, &chunk.content).await?;
        let document = parse_extraction(&raw)
            .map_err(|e| {
                error!(session_id, error = %e, "Failed to parse extraction response");
                e
            })?
            .into_document(session_id, language, Utc::now());

        self.store.write_graph_document(&document).await.map_err(|e| {
            error!(session_id, error = %e, "Failed to store extracted graph");
            e
        })?;

        info!(
            session_id,
            language = %language,
            nodes = document.node_count(),
            relationships = document.relationship_count(),
            "Extracted and stored graph"
        );

        Ok(document)
    }

    /// Store the chunk text with its embedding for context retrieval
    #[instrument(skip(self, chunk))]
    pub async fn store_document_chunk(
        &self,
        chunk: &SourceChunk,
        session_id: SessionId,
        index: i64,
    ) -> Result<DocumentChunk> {
        let language = self.detector.detect(&chunk.content);
        let embedding = self.embeddings.embed(&chunk.content).await;
        let metadata_json = serde_json::to_string(&chunk.metadata)?;

        let document_chunk = DocumentChunk::new(
            chunk.content.clone(),
            index,
            embedding,
            metadata_json,
            session_id,
            language,
        );
        self.store.create_node(&document_chunk.to_node()?).await?;

        info!(
            session_id,
            chunk_index = index,
            embedding_dimension = document_chunk.embedding_dimension,
            "Stored document chunk"
        );
        Ok(document_chunk)
    }

    /// Node counts by label
    pub async fn get_session_stats(&self, session_id: SessionId) -> Result<SessionStats> {
        let mut stats = SessionStats::new();
        for count in self.store.count_nodes(session_id).await? {
            *stats.entry(count.label).or_insert(0) += count.count;
        }
        Ok(stats)
    }

    /// Remove the session's whole subgraph; returns the number of nodes removed
    #[instrument(skip(self))]
    pub async fn clear_session_data(&self, session_id: SessionId) -> Result<u64> {
        let removed = self.store.detach_delete_session(session_id).await?;
        info!(session_id, removed, "Cleared session data");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use kgforge_common::graph::{MemoryGraphStore, NodeQuery, DOCUMENT_CHUNK_LABEL};
    use kgforge_common::Language;
    use std::sync::Mutex;

    struct CannedClient {
        response: String,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ExtractionClient for CannedClient {
        async fn complete(&self, system_prompt: &str, _document_text: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(system_prompt.to_string());
            Ok(self.response.clone())
        }

        fn name(&self) -> &str {
            "canned"
        }
    }

    fn extractor(response: &str) -> (KnowledgeExtractor, Arc<CannedClient>) {
        let client = Arc::new(CannedClient {
            response: response.to_string(),
            prompts: Mutex::new(Vec::new()),
        });
        let extractor = KnowledgeExtractor::with_client(
            client.clone(),
            Arc::new(MemoryGraphStore::new()),
            Arc::new(EmbeddingService::local()),
        );
        (extractor, client)
    }

    #[tokio::test]
    async fn test_missing_credential_fails_initialize() {
        let extractor = KnowledgeExtractor::new(
            ExtractionConfig::default(),
            Arc::new(MemoryGraphStore::new()),
            Arc::new(EmbeddingService::local()),
        );
        let err = extractor.initialize().await.unwrap_err();
        assert!(err.is_fatal_for_batch());
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let (extractor, _) = extractor("{}");
        extractor.initialize().await.unwrap();
        extractor.initialize().await.unwrap();
        assert_eq!(extractor.capability_name().await.unwrap(), "canned");
    }

    #[tokio::test]
    async fn test_arabic_chunk_gets_augmented_prompt() {
        let (extractor, client) = extractor(r#"{"nodes": [{"id": "المؤجر", "type": "person"}]}"#);
        let doc = extractor
            .extract_and_store(&SourceChunk::new("عقد إيجار بين المؤجر والمستأجر"), 3)
            .await
            .unwrap();

        assert_eq!(doc.nodes[0].language, Language::Arabic);
        let prompts = client.prompts.lock().unwrap();
        assert!(prompts[0].contains("This text is in Arabic"));
    }

    #[tokio::test]
    async fn test_parse_failure_writes_nothing() {
        let (extractor, _) = extractor("Sorry, I cannot help with that.");
        assert!(extractor
            .extract_and_store(&SourceChunk::new("The Lessor leases the Property"), 1)
            .await
            .is_err());
        assert!(extractor.get_session_stats(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_store_document_chunk() {
        let (extractor, _) = extractor("{}");
        let mut chunk = SourceChunk::new("The Lessor leases the Property");
        chunk
            .metadata
            .insert("page".to_string(), serde_json::json!(2));

        let stored = extractor.store_document_chunk(&chunk, 9, 4).await.unwrap();
        assert_eq!(stored.embedding_dimension, 100);
        assert_eq!(stored.metadata_json, r#"{"page":2}"#);

        let nodes = extractor
            .store()
            .match_nodes(&NodeQuery::in_session(9).label(DOCUMENT_CHUNK_LABEL))
            .await
            .unwrap();
        assert_eq!(nodes.len(), 1);
        let restored = DocumentChunk::from_node(&nodes[0]).unwrap();
        assert_eq!(restored.chunk_index, 4);
        assert_eq!(restored.content, chunk.content);
    }
}
