//! Graph data model
//!
//! Nodes and relationships carry their session, language and creation stamp
//! as first-class fields; everything else lives in a flat string property map.

use crate::embeddings::{deserialize_embedding, serialize_embedding};
use crate::errors::{AppError, Result};
use crate::language::Language;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use uuid::Uuid;

/// Isolation boundary for every graph element
pub type SessionId = i64;

/// Node and relationship properties
pub type Properties = BTreeMap<String, String>;

/// Label of stored document chunks
pub const DOCUMENT_CHUNK_LABEL: &str = "DocumentChunk";

/// Well-known property names
pub mod props {
    pub const NAME: &str = "name";
    pub const CONTENT: &str = "content";
    pub const DESCRIPTION: &str = "description";
    pub const CHUNK_INDEX: &str = "chunkIndex";
    pub const EMBEDDING: &str = "embedding";
    pub const EMBEDDING_DIMENSION: &str = "embeddingDimension";
    pub const METADATA: &str = "metadata";
}

/// Properties never searched by the wildcard scan
pub const SYSTEM_PROPERTIES: &[&str] = &[
    "sessionId",
    "createdAt",
    "language",
    "id",
    props::EMBEDDING,
    props::EMBEDDING_DIMENSION,
    props::METADATA,
    props::CHUNK_INDEX,
];

/// Endpoint reference: a node's (id, label)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeRef {
    pub id: String,
    pub label: String,
}

impl NodeRef {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
        }
    }
}

/// A labeled node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphNode {
    pub id: String,
    pub label: String,
    pub properties: Properties,
    pub session_id: SessionId,
    pub language: Language,
    pub created_at: DateTime<Utc>,
}

impl GraphNode {
    /// New node stamped now
    pub fn new(
        id: impl Into<String>,
        label: impl Into<String>,
        session_id: SessionId,
        language: Language,
    ) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            properties: Properties::new(),
            session_id,
            language,
            created_at: Utc::now(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn name(&self) -> Option<&str> {
        self.property(props::NAME)
    }

    pub fn node_ref(&self) -> NodeRef {
        NodeRef::new(self.id.clone(), self.label.clone())
    }

    pub fn is_document_chunk(&self) -> bool {
        self.label == DOCUMENT_CHUNK_LABEL
    }

    /// Merge another write of the same node into this one
    pub(crate) fn merge_from(&mut self, other: &GraphNode) {
        self.properties
            .extend(other.properties.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.language = other.language;
        self.created_at = other.created_at;
    }
}

/// A typed, directed relationship between two nodes of one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphRelationship {
    pub source: NodeRef,
    pub target: NodeRef,
    #[serde(rename = "type")]
    pub rel_type: String,
    pub properties: Properties,
    pub session_id: SessionId,
    pub language: Language,
    pub created_at: DateTime<Utc>,
}

impl GraphRelationship {
    pub fn new(
        source: NodeRef,
        target: NodeRef,
        rel_type: impl Into<String>,
        session_id: SessionId,
        language: Language,
    ) -> Self {
        Self {
            source,
            target,
            rel_type: rel_type.into(),
            properties: Properties::new(),
            session_id,
            language,
            created_at: Utc::now(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Merge key within a session: (source id, target id, type)
    pub fn merge_key(&self) -> (SessionId, String, String, String) {
        (
            self.session_id,
            self.source.id.clone(),
            self.target.id.clone(),
            self.rel_type.clone(),
        )
    }

    pub(crate) fn merge_from(&mut self, other: &GraphRelationship) {
        self.properties
            .extend(other.properties.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.source = other.source.clone();
        self.target = other.target.clone();
        self.language = other.language;
        self.created_at = other.created_at;
    }

    /// Node standing in for an endpoint, named by its id and carrying this relationship's stamps
    fn endpoint_node(&self, endpoint: &NodeRef) -> GraphNode {
        GraphNode {
            id: endpoint.id.clone(),
            label: endpoint.label.clone(),
            properties: Properties::from([(props::NAME.to_string(), endpoint.id.clone())]),
            session_id: self.session_id,
            language: self.language,
            created_at: self.created_at,
        }
    }
}

/// Nodes and relationships extracted from one chunk
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphDocument {
    pub nodes: Vec<GraphNode>,
    pub relationships: Vec<GraphRelationship>,
}

impl GraphDocument {
    pub fn new(nodes: Vec<GraphNode>, relationships: Vec<GraphRelationship>) -> Self {
        Self {
            nodes,
            relationships,
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn relationship_count(&self) -> usize {
        self.relationships.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.relationships.is_empty()
    }

    /// Nodes to write: the document's own nodes followed by bare nodes for
    /// relationship endpoints that the node list does not contain.
    pub fn nodes_with_endpoints(&self) -> Vec<GraphNode> {
        let mut seen: HashSet<(SessionId, &str, &str)> = self
            .nodes
            .iter()
            .map(|n| (n.session_id, n.id.as_str(), n.label.as_str()))
            .collect();

        let mut out = self.nodes.clone();
        for rel in &self.relationships {
            for endpoint in [&rel.source, &rel.target] {
                if seen.insert((rel.session_id, endpoint.id.as_str(), endpoint.label.as_str())) {
                    out.push(rel.endpoint_node(endpoint));
                }
            }
        }
        out
    }
}

/// A stored text chunk with its embedding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentChunk {
    pub id: String,
    pub content: String,
    pub chunk_index: i64,
    pub embedding: Vec<f32>,
    pub embedding_dimension: usize,
    pub metadata_json: String,
    pub session_id: SessionId,
    pub language: Language,
    pub created_at: DateTime<Utc>,
}

impl DocumentChunk {
    /// New chunk with a fresh id
    pub fn new(
        content: impl Into<String>,
        chunk_index: i64,
        embedding: Vec<f32>,
        metadata_json: impl Into<String>,
        session_id: SessionId,
        language: Language,
    ) -> Self {
        let embedding_dimension = embedding.len();
        Self {
            id: Uuid::new_v4().to_string(),
            content: content.into(),
            chunk_index,
            embedding,
            embedding_dimension,
            metadata_json: metadata_json.into(),
            session_id,
            language,
            created_at: Utc::now(),
        }
    }

    pub fn to_node(&self) -> Result<GraphNode> {
        Ok(GraphNode {
            id: self.id.clone(),
            label: DOCUMENT_CHUNK_LABEL.to_string(),
            properties: Properties::from([
                (props::CONTENT.to_string(), self.content.clone()),
                (props::CHUNK_INDEX.to_string(), self.chunk_index.to_string()),
                (props::EMBEDDING.to_string(), serialize_embedding(&self.embedding)?),
                (
                    props::EMBEDDING_DIMENSION.to_string(),
                    self.embedding_dimension.to_string(),
                ),
                (props::METADATA.to_string(), self.metadata_json.clone()),
            ]),
            session_id: self.session_id,
            language: self.language,
            created_at: self.created_at,
        })
    }

    pub fn from_node(node: &GraphNode) -> Result<Self> {
        if !node.is_document_chunk() {
            return Err(AppError::InvalidInput {
                message: format!("node {} is a {}, not a {}", node.id, node.label, DOCUMENT_CHUNK_LABEL),
            });
        }

        let embedding = match node.property(props::EMBEDDING) {
            Some(text) if !text.is_empty() => deserialize_embedding(text)?,
            _ => Vec::new(),
        };
        let embedding_dimension = node
            .property(props::EMBEDDING_DIMENSION)
            .and_then(|v| v.parse().ok())
            .unwrap_or(embedding.len());

        Ok(Self {
            id: node.id.clone(),
            content: node.property(props::CONTENT).unwrap_or_default().to_string(),
            chunk_index: node
                .property(props::CHUNK_INDEX)
                .and_then(|v| v.parse().ok())
                .unwrap_or_default(),
            embedding,
            embedding_dimension,
            metadata_json: node.property(props::METADATA).unwrap_or("{}").to_string(),
            session_id: node.session_id,
            language: node.language,
            created_at: node.created_at,
        })
    }
}

/// Node count for one (label, language) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeCount {
    pub label: String,
    pub language: Language,
    pub count: u64,
}

/// Relationship count for one (type, language) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipCount {
    #[serde(rename = "type")]
    pub rel_type: String,
    pub language: Language,
    pub count: u64,
}

/// One row of a one-hop expansion: the relationship and its far endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expansion {
    pub relationship: GraphRelationship,
    pub related: GraphNode,
}
