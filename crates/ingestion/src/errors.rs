//! Ingestion service error types

use kgforge_common::errors::AppError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestionError {
    #[error("Invalid input at line {line}: {message}")]
    InputError { line: usize, message: String },

    #[error("Extraction error: {0}")]
    ExtractionError(String),

    #[error("Store error: {0}")]
    StoreError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<AppError> for IngestionError {
    fn from(e: AppError) -> Self {
        if e.is_store_error() {
            IngestionError::StoreError(e.to_string())
        } else if e.is_fatal_for_batch() {
            IngestionError::ConfigError(e.to_string())
        } else {
            IngestionError::ExtractionError(e.to_string())
        }
    }
}
