//! KGForge Common Library
//!
//! Shared code for the ingestion and search pipelines including:
//! - Graph model, session-scoped queries and store adapters
//! - Language detection for Arabic/English content
//! - Embedding service with a deterministic local fallback
//! - Extraction capability client
//! - Error types and handling
//! - Configuration management
//! - Metrics and observability

pub mod config;
pub mod embeddings;
pub mod errors;
pub mod extraction;
pub mod graph;
pub mod language;
pub mod metrics;

// Re-export commonly used types
pub use config::AppConfig;
pub use embeddings::{Embedder, EmbeddingService};
pub use errors::{AppError, Result};
pub use extraction::ExtractionClient;
pub use graph::{GraphStore, SessionId};
pub use language::{Language, LanguageDetector};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
