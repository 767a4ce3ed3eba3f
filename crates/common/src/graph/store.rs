//! Graph store contract

use super::memory::MemoryGraphStore;
use super::model::{Expansion, GraphDocument, GraphNode, NodeCount, RelationshipCount, SessionId};
use super::postgres::PgGraphStore;
use super::query::NodeQuery;
use crate::config::{StoreBackend, StoreConfig};
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// Capability implemented by every graph backend
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Create-or-merge a document's nodes and relationships, all or nothing.
    /// Relationship endpoints missing from the node list are merged as bare nodes.
    async fn write_graph_document(&self, document: &GraphDocument) -> Result<()>;

    /// Create-or-merge a single node
    async fn create_node(&self, node: &GraphNode) -> Result<()>;

    /// Nodes matching a session-scoped query, sorted and limited by it
    async fn match_nodes(&self, query: &NodeQuery) -> Result<Vec<GraphNode>>;

    /// One hop in either direction from any node whose id is in `ids`
    async fn expand(&self, session_id: SessionId, ids: &[String], limit: usize) -> Result<Vec<Expansion>>;

    /// Node counts grouped by (label, language)
    async fn count_nodes(&self, session_id: SessionId) -> Result<Vec<NodeCount>>;

    /// Relationship counts grouped by (type, language)
    async fn count_relationships(&self, session_id: SessionId) -> Result<Vec<RelationshipCount>>;

    /// Remove every node of the session together with its relationships.
    /// Returns the number of nodes removed.
    async fn detach_delete_session(&self, session_id: SessionId) -> Result<u64>;

    /// Backend name for logs
    fn backend_name(&self) -> &'static str;
}

/// Build the store selected by configuration
pub async fn create_store(config: &StoreConfig) -> Result<Arc<dyn GraphStore>> {
    match config.backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryGraphStore::new())),
        StoreBackend::Postgres => {
            let url = config.url.as_deref().ok_or_else(|| AppError::Configuration {
                message: "store.url is required for the postgres backend (set APP__STORE__URL, or store.backend = \"memory\" for a process-local store)".to_string(),
            })?;
            let store = PgGraphStore::connect(url, config).await?;
            store.migrate().await?;
            Ok(Arc::new(store))
        }
    }
}
