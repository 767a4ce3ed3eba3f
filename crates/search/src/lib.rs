//! KGForge Search
//!
//! Session-scoped retrieval over the knowledge graph:
//! - Search term extraction tuned for Arabic and English legal text
//! - Graph traversal search with match-tier ranking
//! - One-hop context expansion and document chunk context
//! - Session statistics and similar-entity lookup

pub mod engine;
pub mod result;
pub mod terms;

pub use engine::{RetrievalEngine, DEFAULT_SIMILAR_LIMIT};
pub use result::{
    ContextChunk, EntityView, ExpandedItem, RankedEntity, RetrievalResult, SessionStatistics, Source,
};
pub use terms::TermExtractor;
