//! KGForge Search CLI
//!
//! Runs retrieval against a session's knowledge graph and prints the result
//! as JSON, or as rendered prompt context with `--render`.

use anyhow::Context;
use clap::{Parser, Subcommand};
use kgforge_common::{
    config::{AppConfig, StoreBackend},
    graph::{create_store, SessionId},
    metrics, Language, VERSION,
};
use kgforge_search::RetrievalEngine;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "search", version, about = "Query a session knowledge graph")]
struct Cli {
    /// Configuration file (defaults to config/default plus environment)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Retrieve entities, expansion and chunks for a question
    Query {
        #[arg(long)]
        session: SessionId,
        /// english, arabic or mixed; detected from the query when omitted
        #[arg(long)]
        language: Option<Language>,
        #[arg(long)]
        limit: Option<usize>,
        /// Print the prompt context block instead of JSON
        #[arg(long)]
        render: bool,
        query: String,
    },
    /// Entities whose name resembles the given one
    Similar {
        #[arg(long)]
        session: SessionId,
        #[arg(long)]
        language: Option<Language>,
        #[arg(long)]
        limit: Option<usize>,
        name: String,
    },
    /// Entity and relationship counts
    Stats {
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

    info!(service = %config.observability.service_name, "Starting KGForge Search v{}", VERSION);

    // Initialize metrics
    if config.observability.metrics_port > 0 {
        PrometheusBuilder::new()
            .with_http_listener(SocketAddr::from(([0, 0, 0, 0], config.observability.metrics_port)))
            .set_buckets_for_metric(
                Matcher::Full(format!("{}_retrieval_duration_seconds", metrics::METRICS_PREFIX)),
                metrics::RETRIEVAL_BUCKETS,
            )
            .context("Invalid histogram buckets")?
            .install()
            .context("Failed to install metrics exporter")?;
    }
    metrics::register_metrics();

    if config.store.backend == StoreBackend::Memory {
        warn!("Memory store selected; only graphs built by this process are visible");
    }
    let store = create_store(&config.store).await?;
    info!(backend = store.backend_name(), "Graph store ready");
    let engine = RetrievalEngine::new(store, config.retrieval.clone());

    match cli.command {
        Command::Query {
            session,
            language,
            limit,
            render,
            query,
        } => {
            let result = engine.retrieve(&query, session, language, limit).await;
            if render {
                println!("{}", result.render_context());
            } else {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "result": result,
                        "sources": result.sources(),
                    }))?
                );
            }
        }
        Command::Similar {
            session,
            language,
            limit,
            name,
        } => {
            let entities = engine
                .search_similar_entities(&name, session, language, limit)
                .await?;
            println!("{}", serde_json::to_string_pretty(&entities)?);
        }
        Command::Stats { session } => {
            let stats = engine.get_session_statistics(session).await;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }

    Ok(())
}
