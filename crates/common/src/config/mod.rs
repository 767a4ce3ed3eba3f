//! Configuration management for KGForge services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default, config/{APP_ENV}, config/local)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Graph store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Extraction capability configuration
    #[serde(default)]
    pub extraction: ExtractionConfig,

    /// Embedding service configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Retrieval configuration
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Batch ingestion configuration
    #[serde(default)]
    pub ingestion: IngestionConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Which graph store adapter to use
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    /// Process-local store, lost on exit. Tests and single-process runs only.
    Memory,
    /// Relational emulation on PostgreSQL
    Postgres,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    /// Adapter selection, postgres unless set
    #[serde(default = "default_store_backend")]
    pub backend: StoreBackend,

    /// Database URL (postgres backend only)
    pub url: Option<String>,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExtractionConfig {
    /// API key for the extraction model; ingestion is skipped without it
    pub api_key: Option<String>,

    /// Chat completions endpoint (OpenAI-compatible)
    #[serde(default = "default_extraction_endpoint")]
    pub endpoint: String,

    /// Model to use
    #[serde(default = "default_extraction_model")]
    pub model: String,

    /// Sampling temperature
    #[serde(default)]
    pub temperature: f32,

    /// Request timeout in seconds
    #[serde(default = "default_extraction_timeout")]
    pub timeout_secs: u64,

    /// Maximum elapsed time for retries of one call, in seconds
    #[serde(default = "default_extraction_retry_window")]
    pub max_retry_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// Embedding provider: openai or local
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// API key for the embedding service
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,

    /// Model to use
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Request timeout in seconds
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrievalConfig {
    /// Default result limit when the caller does not pass one
    #[serde(default = "default_retrieval_limit")]
    pub default_limit: usize,

    /// Cap on context chunks per query; unset returns every chunk
    pub max_context_chunks: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IngestionConfig {
    /// Extraction calls allowed per minute (0 disables limiting)
    #[serde(default = "default_extraction_rpm")]
    pub extraction_requests_per_minute: u32,

    /// Store DocumentChunk nodes alongside extracted entities
    #[serde(default = "default_enabled")]
    pub store_chunks: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log filter directive (e.g. info, kgforge_search=debug)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub json_logging: bool,

    /// Prometheus exporter port (0 to disable)
    #[serde(default)]
    pub metrics_port: u16,

    /// Service name attached to logs
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_store_backend() -> StoreBackend { StoreBackend::Postgres }
fn default_max_connections() -> u32 { 10 }
fn default_min_connections() -> u32 { 1 }
fn default_connect_timeout() -> u64 { 10 }
fn default_extraction_endpoint() -> String { "https://api.openai.com/v1/chat/completions".to_string() }
fn default_extraction_model() -> String { "gpt-4o-mini".to_string() }
fn default_extraction_timeout() -> u64 { 60 }
fn default_extraction_retry_window() -> u64 { 30 }
fn default_embedding_provider() -> String { "local".to_string() }
fn default_embedding_model() -> String { "text-embedding-3-small".to_string() }
fn default_embedding_timeout() -> u64 { 30 }
fn default_retrieval_limit() -> usize { 10 }
fn default_extraction_rpm() -> u32 { 15 }
fn default_enabled() -> bool { true }
fn default_log_level() -> String { "info".to_string() }
fn default_service_name() -> String { "kgforge".to_string() }

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            url: None,
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: default_extraction_endpoint(),
            model: default_extraction_model(),
            temperature: 0.0,
            timeout_secs: default_extraction_timeout(),
            max_retry_secs: default_extraction_retry_window(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            api_key: None,
            api_base: None,
            model: default_embedding_model(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_limit: default_retrieval_limit(),
            max_context_chunks: None,
        }
    }
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            extraction_requests_per_minute: default_extraction_rpm(),
            store_chunks: default_enabled(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: false,
            metrics_port: 0,
            service_name: default_service_name(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__EXTRACTION__API_KEY=sk-...
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )

            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )
            .build()?;

        config.try_deserialize()
    }
}

impl ExtractionConfig {
    /// The credential, if one is configured and non-blank
    pub fn credential(&self) -> Option<&str> {
        self.api_key.as_deref().map(str::trim).filter(|k| !k.is_empty())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl EmbeddingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            extraction: ExtractionConfig::default(),
            embedding: EmbeddingConfig::default(),
            retrieval: RetrievalConfig::default(),
            ingestion: IngestionConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}
