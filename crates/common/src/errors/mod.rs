//! Error types for KGForge
//!
//! Provides a single error taxonomy shared by the ingestion and retrieval
//! pipelines:
//! - Distinct error types for each failure domain
//! - Machine-readable error codes
//! - Severity helpers used to pick a log level

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Extraction errors (1xxx)
    ExtractionParseError,
    ExtractionFailed,

    // Store errors (2xxx)
    StoreUnavailable,
    DatabaseError,

    // Embedding errors (3xxx)
    EmbeddingUnavailable,

    // Input errors (4xxx)
    InvalidInput,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,
    UpstreamError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            ErrorCode::ExtractionParseError => 1001,
            ErrorCode::ExtractionFailed => 1002,

            ErrorCode::StoreUnavailable => 2001,
            ErrorCode::DatabaseError => 2002,

            ErrorCode::EmbeddingUnavailable => 3001,

            ErrorCode::InvalidInput => 4001,

            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,
            ErrorCode::UpstreamError => 9004,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Extraction errors
    #[error("Extraction response could not be parsed: {message}")]
    ExtractionParse { message: String },

    #[error("Extraction capability failed: {message}")]
    Extraction { message: String },

    // Store errors
    #[error("Graph store unavailable: {message}")]
    StoreUnavailable { message: String },

    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    // Embedding errors
    #[error("Embedding model unavailable: {message}")]
    EmbeddingUnavailable { message: String },

    // Input errors
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AppError {
    /// Shorthand for a store failure
    pub fn store(message: impl Into<String>) -> Self {
        AppError::StoreUnavailable {
            message: message.into(),
        }
    }

    /// Shorthand for a parse failure on an extraction response
    pub fn extraction_parse(message: impl Into<String>) -> Self {
        AppError::ExtractionParse {
            message: message.into(),
        }
    }

    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::ExtractionParse { .. } => ErrorCode::ExtractionParseError,
            AppError::Extraction { .. } => ErrorCode::ExtractionFailed,
            AppError::StoreUnavailable { .. } => ErrorCode::StoreUnavailable,
            AppError::Database(_) => ErrorCode::DatabaseError,
            AppError::EmbeddingUnavailable { .. } => ErrorCode::EmbeddingUnavailable,
            AppError::InvalidInput { .. } => ErrorCode::InvalidInput,
            AppError::HttpClient(_) => ErrorCode::UpstreamError,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
        }
    }

    /// True for failures of the graph store backend
    pub fn is_store_error(&self) -> bool {
        matches!(
            self,
            AppError::StoreUnavailable { .. } | AppError::Database(_)
        )
    }

    /// True when a retry against the same upstream may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::HttpClient(e) => e.is_timeout() || e.is_connect(),
            AppError::Extraction { .. } | AppError::StoreUnavailable { .. } => true,
            _ => false,
        }
    }

    /// Failures that abort a whole batch rather than a single chunk
    pub fn is_fatal_for_batch(&self) -> bool {
        matches!(self, AppError::Configuration { .. })
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration {
            message: err.to_string(),
        }
    }
}
