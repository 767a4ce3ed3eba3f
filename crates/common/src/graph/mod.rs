//! Knowledge graph layer
//!
//! Provides:
//! - The node/relationship model with session and language stamps
//! - Session-scoped structured queries
//! - The `GraphStore` contract with in-memory and PostgreSQL adapters

mod memory;
pub mod model;
mod postgres;
pub mod query;
mod store;

pub use memory::MemoryGraphStore;
pub use model::{
    props, DocumentChunk, Expansion, GraphDocument, GraphNode, GraphRelationship, NodeCount,
    NodeRef, Properties, RelationshipCount, SessionId, DOCUMENT_CHUNK_LABEL, SYSTEM_PROPERTIES,
};
pub use postgres::PgGraphStore;
pub use query::{first_matching_tier, Field, NodeQuery, Predicate, SortKey};
pub use store::{create_store, GraphStore};
