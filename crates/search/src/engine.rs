//! Session-scoped retrieval engine
//!
//! Retrieval runs in four steps against the graph store:
//! 1. Fetch the session's document chunks in chunk order
//! 2. Derive search terms from the query
//! 3. Graph traversal search: term containment over entity properties, ranked by match tier
//! 4. One-hop expansion around the matched entities
//!
//! A store failure in any step yields an empty result carrying the error.

use crate::result::{ContextChunk, ExpandedItem, RankedEntity, RetrievalResult, SessionStatistics};
use crate::terms::TermExtractor;
use kgforge_common::config::RetrievalConfig;
use kgforge_common::errors::Result;
use kgforge_common::graph::{
    first_matching_tier, props, Field, GraphStore, NodeQuery, Predicate, SessionId, SortKey,
    DOCUMENT_CHUNK_LABEL, SYSTEM_PROPERTIES,
};
use kgforge_common::{metrics, Language, LanguageDetector};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

/// Default result count for similar-entity lookups
pub const DEFAULT_SIMILAR_LIMIT: usize = 5;

/// Graph retrieval over one store
pub struct RetrievalEngine {
    store: Arc<dyn GraphStore>,
    detector: LanguageDetector,
    terms: TermExtractor,
    config: RetrievalConfig,
}

impl RetrievalEngine {
    pub fn new(store: Arc<dyn GraphStore>, config: RetrievalConfig) -> Self {
        Self {
            store,
            detector: LanguageDetector::new(),
            terms: TermExtractor::new(),
            config,
        }
    }

    /// Retrieve everything relevant to `query` within the session.
    ///
    /// `language` defaults to the detected language of the query and `limit`
    /// to `retrieval.default_limit`. Never fails: errors are logged and
    /// returned in [`RetrievalResult::error`].
    #[instrument(skip(self, language, limit))]
    pub async fn retrieve(
        &self,
        query: &str,
        session_id: SessionId,
        language: Option<Language>,
        limit: Option<usize>,
    ) -> RetrievalResult {
        let started = Instant::now();
        let language = language.unwrap_or_else(|| self.detector.detect(query));
        let limit = limit.unwrap_or(self.config.default_limit);

        match self.run(query, session_id, language, limit).await {
            Ok(result) => {
                metrics::record_retrieval(
                    started.elapsed().as_secs_f64(),
                    language.as_str(),
                    result.entities.len(),
                    true,
                );
                info!(
                    session_id,
                    language = %language,
                    entities = result.entities.len(),
                    expanded = result.expanded_context.len(),
                    chunks = result.context_chunks.len(),
                    "Retrieval complete"
                );
                result
            }
            Err(e) => {
                metrics::record_retrieval(started.elapsed().as_secs_f64(), language.as_str(), 0, false);
                error!(
                    session_id,
                    query,
                    error = %e,
                    error_code = e.code().as_code(),
                    "Retrieval failed"
                );
                RetrievalResult::failed(query, session_id, language, e.to_string())
            }
        }
    }

    async fn run(
        &self,
        query: &str,
        session_id: SessionId,
        language: Language,
        limit: usize,
    ) -> Result<RetrievalResult> {
        let mut result = RetrievalResult::new(query, session_id, language);

        result.context_chunks = self.fetch_context_chunks(session_id).await?;
        result.search_terms = self.terms.extract(query, language);

        if result.search_terms.is_empty() {
            debug!(session_id, "Blank query, skipping graph search");
            return Ok(result);
        }

        result.entities = self
            .graph_traversal_search(&result.search_terms, session_id, language, limit)
            .await?;
        result.expanded_context = self.expand_context(&result.entities, session_id, limit).await?;

        Ok(result)
    }

    /// Entities containing any term, ranked content > name > description > other
    /// property, newest first within a tier
    pub async fn graph_traversal_search(
        &self,
        terms: &[String],
        session_id: SessionId,
        language: Language,
        limit: usize,
    ) -> Result<Vec<RankedEntity>> {
        if terms.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let any_term = |key: &str| {
            Predicate::Or(
                terms
                    .iter()
                    .map(|t| Predicate::Contains(Field::property(key), t.clone()))
                    .collect(),
            )
        };
        let tiers = vec![
            any_term(props::CONTENT),
            any_term(props::NAME),
            any_term(props::DESCRIPTION),
        ];

        let exclude: Vec<String> = SYSTEM_PROPERTIES.iter().map(|p| p.to_string()).collect();
        let mut matches = tiers.clone();
        matches.extend(terms.iter().map(|t| Predicate::AnyPropertyContains {
            exclude: exclude.clone(),
            needle: t.clone(),
        }));

        let query = restrict_language(
            NodeQuery::in_session(session_id).filter(Predicate::Or(matches)),
            language,
        )
        .sort_by(SortKey::FirstMatching(tiers.clone()))
        .sort_by(SortKey::Desc(Field::CreatedAt))
        .limit(limit);

        let nodes = self.store.match_nodes(&query).await?;
        debug!(session_id, terms = ?terms, found = nodes.len(), "Graph traversal search");

        Ok(nodes
            .iter()
            .map(|node| RankedEntity::new(node, first_matching_tier(&tiers, node)))
            .collect())
    }

    /// One hop around the entities, each row as an entity item and a relationship item
    pub async fn expand_context(
        &self,
        entities: &[RankedEntity],
        session_id: SessionId,
        limit: usize,
    ) -> Result<Vec<ExpandedItem>> {
        if entities.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = entities.iter().map(|e| e.entity.id.clone()).collect();
        let rows = self.store.expand(session_id, &ids, limit).await?;

        Ok(rows.into_iter().flat_map(ExpandedItem::from_expansion).collect())
    }

    /// Stored chunks in chunk order, capped by `retrieval.max_context_chunks` when set
    pub async fn fetch_context_chunks(&self, session_id: SessionId) -> Result<Vec<ContextChunk>> {
        let mut query = NodeQuery::in_session(session_id)
            .label(DOCUMENT_CHUNK_LABEL)
            .sort_by(SortKey::AscNumeric(Field::property(props::CHUNK_INDEX)));
        if let Some(max) = self.config.max_context_chunks {
            query = query.limit(max);
        }

        let nodes = self.store.match_nodes(&query).await?;
        nodes.iter().map(ContextChunk::from_node).collect()
    }

    /// Entities whose name contains `name`: exact matches first, then prefix, then substring.
    ///
    /// Without a `language` every language tag is searched.
    #[instrument(skip(self, language, limit))]
    pub async fn search_similar_entities(
        &self,
        name: &str,
        session_id: SessionId,
        language: Option<Language>,
        limit: Option<usize>,
    ) -> Result<Vec<RankedEntity>> {
        let needle = name.trim();
        if needle.is_empty() {
            return Ok(Vec::new());
        }

        let name_field = Field::property(props::NAME);
        let tiers = vec![
            Predicate::EqualsIgnoreCase(name_field.clone(), needle.to_string()),
            Predicate::StartsWithIgnoreCase(name_field.clone(), needle.to_string()),
        ];

        let mut query =
            NodeQuery::in_session(session_id).filter(Predicate::Contains(name_field, needle.to_string()));
        if let Some(language) = language {
            query = restrict_language(query, language);
        }

        let query = query
            .sort_by(SortKey::FirstMatching(tiers.clone()))
            .sort_by(SortKey::Desc(Field::CreatedAt))
            .limit(limit.unwrap_or(DEFAULT_SIMILAR_LIMIT));

        let nodes = self.store.match_nodes(&query).await?;
        Ok(nodes
            .iter()
            .map(|node| RankedEntity::new(node, first_matching_tier(&tiers, node)))
            .collect())
    }

    /// Node and relationship counts with rollups; failures are carried in `error`
    #[instrument(skip(self))]
    pub async fn get_session_statistics(&self, session_id: SessionId) -> SessionStatistics {
        let counts = tokio::try_join!(
            self.store.count_nodes(session_id),
            self.store.count_relationships(session_id)
        );

        match counts {
            Ok((nodes, relationships)) => {
                SessionStatistics::from_counts(session_id, &nodes, &relationships)
            }
            Err(e) => {
                warn!(session_id, error = %e, "Failed to get session statistics");
                SessionStatistics::failed(session_id, e.to_string())
            }
        }
    }
}

/// Mixed searches every language tag
fn restrict_language(query: NodeQuery, language: Language) -> NodeQuery {
    if language.is_mixed() {
        query
    } else {
        query.filter(Predicate::Eq(Field::Language, language.as_str().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kgforge_common::graph::{DocumentChunk, GraphNode, MemoryGraphStore};

    async fn engine_with(nodes: Vec<GraphNode>) -> RetrievalEngine {
        let store = Arc::new(MemoryGraphStore::new());
        for node in &nodes {
            store.create_node(node).await.unwrap();
        }
        RetrievalEngine::new(store, RetrievalConfig::default())
    }

    #[tokio::test]
    async fn test_tiers_and_recency() {
        let base = chrono::Utc::now();
        let older = base - chrono::Duration::seconds(60);
        let engine = engine_with(vec![
            GraphNode::new("clause-4", "Clause", 1, Language::English)
                .with_property("role", "security deposit terms")
                .with_created_at(base),
            GraphNode::new("deposit", "Term", 1, Language::English)
                .with_property("description", "Refundable deposit")
                .with_created_at(base),
            GraphNode::new("deposit-name-old", "Term", 1, Language::English)
                .with_property("name", "Deposit")
                .with_created_at(older),
            GraphNode::new("deposit-name-new", "Term", 1, Language::English)
                .with_property("name", "Deposit amount")
                .with_created_at(base),
            GraphNode::new("chunk-text", "Clause", 1, Language::English)
                .with_property("content", "The deposit is due on signing")
                .with_created_at(older),
        ])
        .await;

        let found = engine
            .graph_traversal_search(&["deposit".to_string()], 1, Language::English, 10)
            .await
            .unwrap();
        let order: Vec<(&str, u32)> = found
            .iter()
            .map(|e| (e.entity.id.as_str(), e.relevance_tier))
            .collect();
        assert_eq!(
            order,
            vec![
                ("chunk-text", 1),
                ("deposit-name-new", 2),
                ("deposit-name-old", 2),
                ("deposit", 3),
                ("clause-4", 4),
            ]
        );
    }

    #[tokio::test]
    async fn test_system_properties_are_not_searched() {
        let engine = engine_with(vec![GraphNode::new("n1", "Term", 1, Language::English)
            .with_property("metadata", "{\"source\": \"deposit.pdf\"}")])
        .await;

        let found = engine
            .graph_traversal_search(&["deposit".to_string()], 1, Language::English, 10)
            .await
            .unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn test_limit_truncates() {
        let nodes = (0..5)
            .map(|i| {
                GraphNode::new(format!("p{}", i), "Party", 1, Language::English)
                    .with_property("name", format!("Party {}", i))
            })
            .collect();
        let engine = engine_with(nodes).await;

        let found = engine
            .graph_traversal_search(&["party".to_string()], 1, Language::English, 3)
            .await
            .unwrap();
        assert_eq!(found.len(), 3);
    }

    #[tokio::test]
    async fn test_chunks_in_order_and_capped() {
        let store = Arc::new(MemoryGraphStore::new());
        for index in [2, 0, 1] {
            let chunk = DocumentChunk::new(
                format!("chunk {}", index),
                index,
                vec![0.5, 0.5],
                "{}",
                1,
                Language::English,
            );
            store.create_node(&chunk.to_node().unwrap()).await.unwrap();
        }

        let engine = RetrievalEngine::new(store.clone(), RetrievalConfig::default());
        let chunks = engine.fetch_context_chunks(1).await.unwrap();
        assert_eq!(chunks.iter().map(|c| c.chunk_index).collect::<Vec<_>>(), vec![0, 1, 2]);

        let capped = RetrievalEngine::new(
            store,
            RetrievalConfig {
                max_context_chunks: Some(2),
                ..RetrievalConfig::default()
            },
        );
        let chunks = capped.fetch_context_chunks(1).await.unwrap();
        assert_eq!(chunks.iter().map(|c| c.chunk_index).collect::<Vec<_>>(), vec![0, 1]);
    }

    #[tokio::test]
    async fn test_similar_entities_without_language_search_all_tags() {
        let engine = engine_with(vec![GraphNode::new("acme", "Organization", 1, Language::Arabic)
            .with_property("name", "Acme")])
        .await;

        let any = engine.search_similar_entities("Acme", 1, None, None).await.unwrap();
        assert_eq!(any.len(), 1);
        assert_eq!(any[0].entity.language, Language::Arabic);

        let english = engine
            .search_similar_entities("Acme", 1, Some(Language::English), None)
            .await
            .unwrap();
        assert!(english.is_empty());

        let mixed = engine
            .search_similar_entities("Acme", 1, Some(Language::Mixed), None)
            .await
            .unwrap();
        assert_eq!(mixed.len(), 1);
    }

    #[tokio::test]
    async fn test_blank_query_skips_graph_search() {
        let engine = engine_with(vec![GraphNode::new("n1", "Term", 1, Language::English)
            .with_property("name", "anything")])
        .await;

        let result = engine.retrieve("   ", 1, None, None).await;
        assert!(result.error.is_none());
        assert!(result.search_terms.is_empty());
        assert!(result.entities.is_empty());
    }
}
