//! KGForge Ingestion CLI
//!
//! Builds a session's knowledge graph from a JSON Lines chunk file:
//! 1. Loads configuration and connects to the graph store
//! 2. Runs every chunk through extraction and chunk storage
//! 3. Prints the ingestion report as JSON

use anyhow::Context;
use clap::{Parser, Subcommand};
use kgforge_common::{
    config::{AppConfig, StoreBackend},
    embeddings::create_remote_embedder,
    graph::{create_store, SessionId},
    metrics, EmbeddingService, VERSION,
};
use kgforge_ingestion::{create_rate_limiter, read_chunks, IngestionProcessor, KnowledgeExtractor};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ingestion", version, about = "Build a session knowledge graph from text chunks")]
struct Cli {
    /// Configuration file (defaults to config/default plus environment)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest a JSON Lines file of {"content", "metadata"} chunks
    Ingest {
        #[arg(long)]
        session: SessionId,
        /// Chunk file
        input: PathBuf,
    },
    /// Node counts by label
    Stats {
        #[arg(long)]
        session: SessionId,
    },
    /// Delete the session's whole subgraph
    Clear {
        #[arg(long)]
        session: SessionId,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Load configuration
    let config = match &cli.config {
        Some(path) => AppConfig::from_file(&path.to_string_lossy()),
        None => AppConfig::load(),
    }
    .context("Failed to load configuration")?;
    let config = Arc::new(config);

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.observability.log_level));
    if config.observability.json_logging {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    }

    info!(service = %config.observability.service_name, "Starting KGForge Ingestion v{}", VERSION);

    // Initialize metrics
    if config.observability.metrics_port > 0 {
        PrometheusBuilder::new()
            .with_http_listener(SocketAddr::from(([0, 0, 0, 0], config.observability.metrics_port)))
            .set_buckets_for_metric(
                Matcher::Full(format!("{}_extraction_duration_seconds", metrics::METRICS_PREFIX)),
                metrics::EXTRACTION_BUCKETS,
            )
            .context("Invalid histogram buckets")?
            .install()
            .context("Failed to install metrics exporter")?;
    }
    metrics::register_metrics();

    // Wire services
    if config.store.backend == StoreBackend::Memory {
        warn!("Memory store selected; the ingested graph is dropped when this process exits");
    }
    let store = create_store(&config.store).await?;
    let embeddings = Arc::new(EmbeddingService::new(create_remote_embedder(&config.embedding)));
    let extractor = Arc::new(KnowledgeExtractor::new(
        config.extraction.clone(),
        store,
        embeddings,
    ));

    match cli.command {
        Command::Ingest { session, input } => {
            let file = File::open(&input).with_context(|| format!("Cannot open {}", input.display()))?;
            let chunks = read_chunks(BufReader::new(file))?;
            let source_name = input
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "input".to_string());

            let processor = IngestionProcessor::new(
                extractor,
                create_rate_limiter(config.ingestion.extraction_requests_per_minute),
                config.ingestion.store_chunks,
            );
            let report = processor.process_document(session, &source_name, &chunks).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Stats { session } => {
            let stats = extractor.get_session_stats(session).await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Clear { session } => {
            let removed = extractor.clear_session_data(session).await?;
            println!("{}", serde_json::json!({ "session_id": session, "nodes_removed": removed }));
        }
    }

    info!("Ingestion finished");
    Ok(())
}
