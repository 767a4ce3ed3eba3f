//! Embedded in-process graph store
//!
//! A document write stages merged copies of just its own nodes and
//! relationships, and applies them only once every element is staged.
//! A failed write leaves the state untouched.

use super::model::{
    Expansion, GraphDocument, GraphNode, GraphRelationship, NodeCount, RelationshipCount, SessionId,
};
use super::query::NodeQuery;
use super::store::GraphStore;
use crate::errors::Result;
use crate::language::Language;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
#[cfg(any(test, feature = "test-util"))]
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

type NodeKey = (SessionId, String, String);
type RelKey = (SessionId, String, String, String);

#[derive(Debug, Default)]
struct GraphState {
    nodes: BTreeMap<NodeKey, GraphNode>,
    relationships: BTreeMap<RelKey, GraphRelationship>,
}

impl GraphState {
    fn apply(&mut self, staged: Staged) {
        self.nodes.extend(staged.nodes);
        self.relationships.extend(staged.relationships);
    }

    fn merge_node(&mut self, node: &GraphNode) {
        let key = (node.session_id, node.id.clone(), node.label.clone());
        match self.nodes.get_mut(&key) {
            Some(existing) => existing.merge_from(node),
            None => {
                self.nodes.insert(key, node.clone());
            }
        }
    }
}

/// Merged copies of one document's elements, pending apply
#[derive(Default)]
struct Staged {
    nodes: BTreeMap<NodeKey, GraphNode>,
    relationships: BTreeMap<RelKey, GraphRelationship>,
}

impl Staged {
    fn stage_node(&mut self, state: &GraphState, node: &GraphNode) {
        let key = (node.session_id, node.id.clone(), node.label.clone());
        if let Some(staged) = self.nodes.get_mut(&key) {
            staged.merge_from(node);
            return;
        }
        let merged = match state.nodes.get(&key) {
            Some(existing) => {
                let mut merged = existing.clone();
                merged.merge_from(node);
                merged
            }
            None => node.clone(),
        };
        self.nodes.insert(key, merged);
    }

    fn stage_relationship(&mut self, state: &GraphState, rel: &GraphRelationship) {
        let key = rel.merge_key();
        if let Some(staged) = self.relationships.get_mut(&key) {
            staged.merge_from(rel);
            return;
        }
        let merged = match state.relationships.get(&key) {
            Some(existing) => {
                let mut merged = existing.clone();
                merged.merge_from(rel);
                merged
            }
            None => rel.clone(),
        };
        self.relationships.insert(key, merged);
    }
}

/// Graph store held in process memory
#[derive(Debug, Default)]
pub struct MemoryGraphStore {
    state: RwLock<GraphState>,
    #[cfg(any(test, feature = "test-util"))]
    fail_relationship_write: AtomicBool,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next document write fail after its nodes are staged and
    /// before its relationships are applied
    #[cfg(any(test, feature = "test-util"))]
    pub fn fail_next_relationship_write(&self) {
        self.fail_relationship_write.store(true, Ordering::SeqCst);
    }

    #[cfg(any(test, feature = "test-util"))]
    fn injected_failure(&self) -> Result<()> {
        if self.fail_relationship_write.swap(false, Ordering::SeqCst) {
            return Err(crate::errors::AppError::store("injected relationship write failure"));
        }
        Ok(())
    }

    #[cfg(not(any(test, feature = "test-util")))]
    fn injected_failure(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn write_graph_document(&self, document: &GraphDocument) -> Result<()> {
        let mut state = self.state.write().await;
        let mut staged = Staged::default();

        for node in document.nodes_with_endpoints() {
            staged.stage_node(&state, &node);
        }

        self.injected_failure()?;

        for rel in &document.relationships {
            staged.stage_relationship(&state, rel);
        }

        state.apply(staged);
        debug!(
            nodes = document.node_count(),
            relationships = document.relationship_count(),
            "Graph document written"
        );
        Ok(())
    }

    async fn create_node(&self, node: &GraphNode) -> Result<()> {
        self.state.write().await.merge_node(node);
        Ok(())
    }

    async fn match_nodes(&self, query: &NodeQuery) -> Result<Vec<GraphNode>> {
        let state = self.state.read().await;
        Ok(query.apply(state.nodes.values()))
    }

    async fn expand(&self, session_id: SessionId, ids: &[String], limit: usize) -> Result<Vec<Expansion>> {
        let state = self.state.read().await;
        let ids: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let mut seen = HashSet::new();
        let mut rows = Vec::new();

        for rel in state.relationships.values().filter(|r| r.session_id == session_id) {
            let mut far_ends = Vec::with_capacity(2);
            if ids.contains(rel.source.id.as_str()) {
                far_ends.push(&rel.target);
            }
            if ids.contains(rel.target.id.as_str()) {
                far_ends.push(&rel.source);
            }

            for far in far_ends {
                if rows.len() >= limit {
                    return Ok(rows);
                }
                let key = (session_id, far.id.clone(), far.label.clone());
                let Some(related) = state.nodes.get(&key) else {
                    continue;
                };
                if seen.insert((rel.merge_key(), key)) {
                    rows.push(Expansion {
                        relationship: rel.clone(),
                        related: related.clone(),
                    });
                }
            }
        }

        Ok(rows)
    }

    async fn count_nodes(&self, session_id: SessionId) -> Result<Vec<NodeCount>> {
        let state = self.state.read().await;
        let mut counts: BTreeMap<(String, &'static str), (Language, u64)> = BTreeMap::new();
        for node in state.nodes.values().filter(|n| n.session_id == session_id) {
            counts
                .entry((node.label.clone(), node.language.as_str()))
                .or_insert((node.language, 0))
                .1 += 1;
        }
        Ok(counts
            .into_iter()
            .map(|((label, _), (language, count))| NodeCount { label, language, count })
            .collect())
    }

    async fn count_relationships(&self, session_id: SessionId) -> Result<Vec<RelationshipCount>> {
        let state = self.state.read().await;
        let mut counts: BTreeMap<(String, &'static str), (Language, u64)> = BTreeMap::new();
        for rel in state.relationships.values().filter(|r| r.session_id == session_id) {
            counts
                .entry((rel.rel_type.clone(), rel.language.as_str()))
                .or_insert((rel.language, 0))
                .1 += 1;
        }
        Ok(counts
            .into_iter()
            .map(|((rel_type, _), (language, count))| RelationshipCount {
                rel_type,
                language,
                count,
            })
            .collect())
    }

    async fn detach_delete_session(&self, session_id: SessionId) -> Result<u64> {
        let mut state = self.state.write().await;
        state.relationships.retain(|_, r| r.session_id != session_id);
        let before = state.nodes.len();
        state.nodes.retain(|_, n| n.session_id != session_id);
        Ok((before - state.nodes.len()) as u64)
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::model::NodeRef;
    use crate::graph::query::{Field, Predicate};

    fn lease_document(session: SessionId) -> GraphDocument {
        let acme = GraphNode::new("Acme Corp", "Organization", session, Language::English)
            .with_property("name", "Acme Corp");
        let john = GraphNode::new("John Smith", "Person", session, Language::English)
            .with_property("name", "John Smith");
        let rel = GraphRelationship::new(
            acme.node_ref(),
            john.node_ref(),
            "LEASES_TO",
            session,
            Language::English,
        );
        GraphDocument::new(vec![acme, john], vec![rel])
    }

    #[tokio::test]
    async fn test_write_and_count() {
        let store = MemoryGraphStore::new();
        store.write_graph_document(&lease_document(1)).await.unwrap();

        let nodes = store.count_nodes(1).await.unwrap();
        assert_eq!(nodes.iter().map(|c| c.count).sum::<u64>(), 2);
        let rels = store.count_relationships(1).await.unwrap();
        assert_eq!(rels.len(), 1);
        assert_eq!(rels[0].rel_type, "LEASES_TO");

        assert!(store.count_nodes(2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_merge_is_idempotent() {
        let store = MemoryGraphStore::new();
        let doc = lease_document(1);
        store.write_graph_document(&doc).await.unwrap();
        store.write_graph_document(&doc).await.unwrap();

        let total: u64 = store.count_nodes(1).await.unwrap().iter().map(|c| c.count).sum();
        assert_eq!(total, 2);
        assert_eq!(store.count_relationships(1).await.unwrap()[0].count, 1);
    }

    #[tokio::test]
    async fn test_injected_failure_leaves_no_trace() {
        let store = MemoryGraphStore::new();
        store.fail_next_relationship_write();
        assert!(store.write_graph_document(&lease_document(1)).await.is_err());
        assert!(store.count_nodes(1).await.unwrap().is_empty());
        assert!(store.count_relationships(1).await.unwrap().is_empty());

        // Flag is one-shot
        store.write_graph_document(&lease_document(1)).await.unwrap();
        assert_eq!(store.count_relationships(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_write_keeps_existing_nodes_unchanged() {
        let store = MemoryGraphStore::new();
        store.write_graph_document(&lease_document(1)).await.unwrap();
        store.write_graph_document(&lease_document(2)).await.unwrap();

        let acme = GraphNode::new("Acme Corp", "Organization", 1, Language::Arabic)
            .with_property("role", "Lessor");
        store.fail_next_relationship_write();
        assert!(store
            .write_graph_document(&GraphDocument::new(vec![acme], Vec::new()))
            .await
            .is_err());

        let nodes = store
            .match_nodes(&NodeQuery::in_session(1).filter(Predicate::Eq(Field::Id, "Acme Corp".into())))
            .await
            .unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].language, Language::English);
        assert!(nodes[0].property("role").is_none());

        let other: u64 = store.count_nodes(2).await.unwrap().iter().map(|c| c.count).sum();
        assert_eq!(other, 2);
        assert_eq!(store.count_relationships(2).await.unwrap()[0].count, 1);
    }

    #[tokio::test]
    async fn test_repeated_node_in_one_document_merges() {
        let store = MemoryGraphStore::new();
        let first = GraphNode::new("Acme Corp", "Organization", 1, Language::English)
            .with_property("name", "Acme Corp");
        let second = GraphNode::new("Acme Corp", "Organization", 1, Language::English)
            .with_property("role", "Lessor");
        store
            .write_graph_document(&GraphDocument::new(vec![first, second], Vec::new()))
            .await
            .unwrap();

        let nodes = store.match_nodes(&NodeQuery::in_session(1)).await.unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].name(), Some("Acme Corp"));
        assert_eq!(nodes[0].property("role"), Some("Lessor"));
    }

    #[tokio::test]
    async fn test_expand_both_directions() {
        let store = MemoryGraphStore::new();
        store.write_graph_document(&lease_document(1)).await.unwrap();

        let from_source = store.expand(1, &["Acme Corp".to_string()], 10).await.unwrap();
        assert_eq!(from_source.len(), 1);
        assert_eq!(from_source[0].related.id, "John Smith");

        let from_target = store.expand(1, &["John Smith".to_string()], 10).await.unwrap();
        assert_eq!(from_target[0].related.id, "Acme Corp");

        assert!(store.expand(2, &["Acme Corp".to_string()], 10).await.unwrap().is_empty());
        assert!(store.expand(1, &["Acme Corp".to_string()], 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_endpoint_only_nodes_are_created() {
        let store = MemoryGraphStore::new();
        let rel = GraphRelationship::new(
            NodeRef::new("Tenant", "Person"),
            NodeRef::new("Flat", "Property"),
            "OCCUPIES",
            3,
            Language::Arabic,
        );
        store
            .write_graph_document(&GraphDocument::new(vec![], vec![rel]))
            .await
            .unwrap();

        let nodes = store.match_nodes(&NodeQuery::in_session(3)).await.unwrap();
        assert_eq!(nodes.len(), 2);
        assert!(nodes.iter().all(|n| n.language == Language::Arabic));
    }

    #[tokio::test]
    async fn test_detach_delete_is_session_scoped() {
        let store = MemoryGraphStore::new();
        store.write_graph_document(&lease_document(1)).await.unwrap();
        store.write_graph_document(&lease_document(2)).await.unwrap();

        assert_eq!(store.detach_delete_session(1).await.unwrap(), 2);
        assert!(store.count_relationships(1).await.unwrap().is_empty());
        assert_eq!(store.count_relationships(2).await.unwrap().len(), 1);

        let query = NodeQuery::in_session(2)
            .filter(Predicate::Contains(Field::property("name"), "acme".into()));
        assert_eq!(store.match_nodes(&query).await.unwrap().len(), 1);
    }
}
