//! Retrieval result types
//!
//! The bundle handed to a generation step: ranked entities, one-hop
//! expansion, the session's document chunks, plus helpers to list citation
//! sources and render the bundle as prompt context.

use kgforge_common::errors::Result;
use kgforge_common::graph::{
    props, DocumentChunk, Expansion, GraphNode, GraphRelationship, NodeCount, Properties,
    RelationshipCount, SessionId,
};
use kgforge_common::Language;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const CHUNK_TITLE_CHARS: usize = 50;
const CHUNK_PREVIEW_CHARS: usize = 100;

/// A node as presented to callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityView {
    pub id: String,
    pub entity_type: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub language: Language,
    pub properties: Properties,
}

impl EntityView {
    pub fn from_node(node: &GraphNode) -> Self {
        Self {
            id: node.id.clone(),
            entity_type: node.label.clone(),
            name: display_name(node),
            description: node.property(props::DESCRIPTION).map(str::to_string),
            language: node.language,
            properties: node.properties.clone(),
        }
    }
}

/// Chunks have no name: use the first line of their content
fn display_name(node: &GraphNode) -> String {
    if let Some(name) = node.name() {
        return name.to_string();
    }
    if !node.is_document_chunk() {
        return node.id.clone();
    }
    node.property(props::CONTENT)
        .and_then(|content| content.lines().map(str::trim).find(|l| !l.is_empty()))
        .map(|line| line.chars().take(CHUNK_TITLE_CHARS).collect())
        .unwrap_or_else(|| "Document Chunk".to_string())
}

/// An entity with its match tier (1 is best)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedEntity {
    #[serde(flatten)]
    pub entity: EntityView,
    pub relevance_tier: u32,
}

impl RankedEntity {
    pub fn new(node: &GraphNode, relevance_tier: u32) -> Self {
        Self {
            entity: EntityView::from_node(node),
            relevance_tier,
        }
    }
}

/// One item of the one-hop expansion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExpandedItem {
    ExpandedEntity {
        entity: EntityView,
        relationship_type: String,
        source_type: String,
        target_type: String,
    },
    ExpandedRelationship {
        relationship: GraphRelationship,
        relationship_type: String,
        source_type: String,
        target_type: String,
    },
}

impl ExpandedItem {
    /// Each expansion row yields the related entity and the relationship
    pub fn from_expansion(row: Expansion) -> [ExpandedItem; 2] {
        let Expansion {
            relationship,
            related,
        } = row;
        let relationship_type = relationship.rel_type.clone();
        let source_type = relationship.source.label.clone();
        let target_type = relationship.target.label.clone();

        [
            ExpandedItem::ExpandedEntity {
                entity: EntityView::from_node(&related),
                relationship_type: relationship_type.clone(),
                source_type: source_type.clone(),
                target_type: target_type.clone(),
            },
            ExpandedItem::ExpandedRelationship {
                relationship,
                relationship_type,
                source_type,
                target_type,
            },
        ]
    }
}

/// A stored document chunk returned as context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextChunk {
    pub id: String,
    pub chunk_index: i64,
    pub content: String,
    pub language: Language,
    pub metadata: serde_json::Value,
}

impl ContextChunk {
    pub fn from_node(node: &GraphNode) -> Result<Self> {
        let chunk = DocumentChunk::from_node(node)?;
        let metadata = serde_json::from_str(&chunk.metadata_json)
            .unwrap_or_else(|_| serde_json::Value::Object(serde_json::Map::new()));
        Ok(Self {
            id: chunk.id,
            chunk_index: chunk.chunk_index,
            content: chunk.content,
            language: chunk.language,
            metadata,
        })
    }
}

/// Citation source for an answer built from a retrieval result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Source {
    Entity {
        name: String,
        entity_type: String,
        language: Language,
        relevance_score: u32,
    },
    Relationship {
        relationship_type: String,
        language: Language,
    },
    RelatedEntity {
        name: String,
        entity_type: String,
        relationship_type: String,
        language: Language,
    },
    RelatedRelationship {
        relationship_type: String,
        connection_type: String,
        language: Language,
    },
    DocumentChunk {
        content_preview: String,
        language: Language,
        chunk_index: i64,
    },
    SearchInfo {
        search_terms: Vec<String>,
        language: Language,
    },
}

fn preview(content: &str) -> String {
    if content.chars().count() > CHUNK_PREVIEW_CHARS {
        let head: String = content.chars().take(CHUNK_PREVIEW_CHARS).collect();
        format!("{}...", head)
    } else {
        content.to_string()
    }
}

/// Everything retrieved for one query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub query: String,
    pub session_id: SessionId,
    pub language: Language,
    pub search_terms: Vec<String>,
    pub entities: Vec<RankedEntity>,
    /// Empty on the primary path; relationships arrive through expansion
    pub relationships: Vec<GraphRelationship>,
    pub context_chunks: Vec<ContextChunk>,
    pub expanded_context: Vec<ExpandedItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RetrievalResult {
    pub fn new(query: &str, session_id: SessionId, language: Language) -> Self {
        Self {
            query: query.to_string(),
            session_id,
            language,
            search_terms: Vec::new(),
            entities: Vec::new(),
            relationships: Vec::new(),
            context_chunks: Vec::new(),
            expanded_context: Vec::new(),
            error: None,
        }
    }

    /// Empty result carrying the failure
    pub fn failed(query: &str, session_id: SessionId, language: Language, error: String) -> Self {
        Self {
            error: Some(error),
            ..Self::new(query, session_id, language)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.context_chunks.is_empty() && self.expanded_context.is_empty()
    }

    /// Citation sources in presentation order
    pub fn sources(&self) -> Vec<Source> {
        let mut sources = Vec::new();

        sources.extend(self.entities.iter().map(|e| Source::Entity {
            name: e.entity.name.clone(),
            entity_type: e.entity.entity_type.clone(),
            language: e.entity.language,
            relevance_score: e.relevance_tier,
        }));

        sources.extend(self.relationships.iter().map(|r| Source::Relationship {
            relationship_type: r.rel_type.clone(),
            language: r.language,
        }));

        for item in &self.expanded_context {
            match item {
                ExpandedItem::ExpandedEntity {
                    entity,
                    relationship_type,
                    ..
                } => sources.push(Source::RelatedEntity {
                    name: entity.name.clone(),
                    entity_type: entity.entity_type.clone(),
                    relationship_type: relationship_type.clone(),
                    language: entity.language,
                }),
                ExpandedItem::ExpandedRelationship {
                    relationship,
                    relationship_type,
                    source_type,
                    target_type,
                } => sources.push(Source::RelatedRelationship {
                    relationship_type: relationship_type.clone(),
                    connection_type: format!("{} -> {}", source_type, target_type),
                    language: relationship.language,
                }),
            }
        }

        sources.extend(self.context_chunks.iter().map(|c| Source::DocumentChunk {
            content_preview: preview(&c.content),
            language: c.language,
            chunk_index: c.chunk_index,
        }));

        if !self.search_terms.is_empty() {
            sources.push(Source::SearchInfo {
                search_terms: self.search_terms.clone(),
                language: self.language,
            });
        }

        sources
    }

    /// Sectioned text block for a generation prompt
    pub fn render_context(&self) -> String {
        let mut lines: Vec<String> = Vec::new();

        if !self.entities.is_empty() {
            lines.push("=== ENTITIES FROM DOCUMENTS ===".to_string());
            for ranked in &self.entities {
                let entity = &ranked.entity;
                let mut line = format!("- {} ({})", entity.name, entity.entity_type);
                if let Some(description) = &entity.description {
                    line.push_str(&format!(": {}", description));
                }
                line.push_str(&format!(" [Language: {}]", entity.language));
                line.push_str(&format!(" [Relevance: {}]", ranked.relevance_tier));
                lines.push(line);
            }
        }

        if !self.relationships.is_empty() {
            lines.push("\n=== RELATIONSHIPS ===".to_string());
            for rel in &self.relationships {
                lines.push(format!("- {} [Language: {}]", rel.rel_type, rel.language));
            }
        }

        if !self.expanded_context.is_empty() {
            lines.push("\n=== RELATED INFORMATION ===".to_string());
            for item in &self.expanded_context {
                match item {
                    ExpandedItem::ExpandedEntity {
                        entity,
                        relationship_type,
                        ..
                    } => lines.push(format!(
                        "- Related: {} ({}) via {}",
                        entity.name, entity.entity_type, relationship_type
                    )),
                    ExpandedItem::ExpandedRelationship {
                        relationship,
                        relationship_type,
                        ..
                    } => lines.push(format!(
                        "- Relationship: {} ({} -> {})",
                        relationship_type, relationship.source.id, relationship.target.id
                    )),
                }
            }
        }

        if !self.context_chunks.is_empty() {
            lines.push("\n=== DOCUMENT CONTENT ===".to_string());
            for (i, chunk) in self.context_chunks.iter().enumerate() {
                lines.push(format!("Chunk {}: {}", i + 1, chunk.content));
            }
        }

        if !self.search_terms.is_empty() {
            lines.push("\n=== SEARCH TERMS USED ===".to_string());
            lines.push(format!("Terms: {}", self.search_terms.join(", ")));
        }

        lines.join("\n")
    }
}

/// Per-session counts with rollups
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStatistics {
    pub session_id: SessionId,
    pub entities_by_type: BTreeMap<String, u64>,
    pub entities_by_language: BTreeMap<String, u64>,
    pub relationships_by_type: BTreeMap<String, u64>,
    pub relationships_by_language: BTreeMap<String, u64>,
    pub total_entities: u64,
    pub total_relationships: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SessionStatistics {
    pub fn from_counts(
        session_id: SessionId,
        nodes: &[NodeCount],
        relationships: &[RelationshipCount],
    ) -> Self {
        let mut stats = Self {
            session_id,
            ..Self::default()
        };

        for row in nodes {
            *stats.entities_by_type.entry(row.label.clone()).or_default() += row.count;
            *stats
                .entities_by_language
                .entry(row.language.as_str().to_string())
                .or_default() += row.count;
            stats.total_entities += row.count;
        }

        for row in relationships {
            *stats.relationships_by_type.entry(row.rel_type.clone()).or_default() += row.count;
            *stats
                .relationships_by_language
                .entry(row.language.as_str().to_string())
                .or_default() += row.count;
            stats.total_relationships += row.count;
        }

        stats
    }

    pub fn failed(session_id: SessionId, error: String) -> Self {
        Self {
            session_id,
            error: Some(error),
            ..Self::default()
        }
    }
}
