//! KGForge Ingestion
//!
//! Builds a session's knowledge graph from text chunks:
//! 1. Detects the chunk language and augments the extraction prompt
//! 2. Calls the extraction capability and parses its JSON answer
//! 3. Normalizes and stamps nodes and relationships
//! 4. Writes them atomically, then stores the chunk with its embedding

pub mod errors;
pub mod extractor;
pub mod parser;
pub mod processor;

pub use errors::IngestionError;
pub use extractor::{KnowledgeExtractor, SessionStats, SourceChunk, EXTRACTION_PROMPT};
pub use processor::{
    create_rate_limiter, read_chunks, IngestionProcessor, IngestionReport, IngestionStatus,
};
