//! # Retrieval Harness CLI (`rtv`)
//!
//! The `rtv` binary is the operator interface for Retrieval Harness. It
//! provides commands for database initialization, document ingestion,
//! search, corpus status, and starting the MCP server.
//!
//! ## Usage
//!
//! ```bash
//! rtv --config ./config/rtv.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rtv init` | Create the SQLite database and run schema migrations |
//! | `rtv ingest [path]` | Parse, chunk, embed, and index documents |
//! | `rtv search "<query>"` | Search the corpus |
//! | `rtv status` | Show corpus counters (`--verify` audits index consistency) |
//! | `rtv serve` | Start the MCP server |

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use retrieval_harness::chunker::ChunkerParams;
use retrieval_harness::config::{load_config, Config};
use retrieval_harness::embedding::{EmbeddingService, HttpEmbedder};
use retrieval_harness::error::RetrievalError;
use retrieval_harness::ingest::IngestionPipeline;
use retrieval_harness::query::{QueryService, SearchMode};
use retrieval_harness::server::{run_server, RetrievalBridge};
use retrieval_harness::store::{audit_consistency, sqlite, Corpus};
use retrieval_harness::{db, fusion, migrate, sources};

/// Retrieval Harness CLI — a hybrid retrieval backend for AI agents.
#[derive(Parser)]
#[command(
    name = "rtv",
    about = "Retrieval Harness — hybrid document retrieval for AI agents",
    version,
    long_about = "Retrieval Harness ingests documents (HTML, Markdown, plain text), \
    chunks and embeds them, and serves fused vector + BM25 search to agents over MCP."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/rtv.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables. This
    /// command is idempotent — running it multiple times is safe.
    Init,

    /// Ingest documents from the configured source.
    ///
    /// Scans the source root (or the given path), then parses, chunks,
    /// embeds, and indexes each document. Documents whose content hash is
    /// unchanged are skipped; changed documents are atomically replaced.
    Ingest {
        /// Directory to scan (overrides the configured source root).
        path: Option<PathBuf>,
        /// Scan and count, but do not write anything.
        #[arg(long)]
        dry_run: bool,
    },

    /// Search the corpus.
    Search {
        /// The search query.
        query: String,
        /// Retrieval mode: hybrid, vector, or lexical.
        #[arg(long, default_value = "hybrid")]
        mode: String,
        /// Number of results to return.
        #[arg(short, long)]
        k: Option<usize>,
    },

    /// Show corpus counters.
    Status {
        /// Also audit dual-index consistency.
        #[arg(long)]
        verify: bool,
    },

    /// Start the MCP server.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config.display()))?;

    match cli.command {
        Commands::Init => run_init(&config).await,
        Commands::Ingest { path, dry_run } => run_ingest(&config, path, dry_run).await,
        Commands::Search { query, mode, k } => run_search(&config, &query, &mode, k).await,
        Commands::Status { verify } => run_status(&config, verify).await,
        Commands::Serve => run_serve(config).await,
    }
}

async fn run_init(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate::run_migrations(&pool).await?;
    pool.close().await;
    println!("initialized {}", config.db.path.display());
    Ok(())
}

/// Build the embedding service, or `None` when the provider is disabled.
fn embedding_service(config: &Config) -> Result<Option<Arc<EmbeddingService>>> {
    if !config.embedding.is_enabled() {
        return Ok(None);
    }
    let embedder = Arc::new(HttpEmbedder::new(&config.embedding)?);
    Ok(Some(Arc::new(EmbeddingService::new(
        embedder,
        &config.embedding,
    ))))
}

fn pipeline(config: &Config, corpus: &Corpus) -> Result<Option<Arc<IngestionPipeline>>> {
    let Some(embeddings) = embedding_service(config)? else {
        return Ok(None);
    };
    Ok(Some(Arc::new(IngestionPipeline::new(
        corpus.clone(),
        embeddings,
        ChunkerParams::from_config(&config.chunking),
        config.ingest.workers,
    ))))
}

async fn run_ingest(config: &Config, path: Option<PathBuf>, dry_run: bool) -> Result<()> {
    let mut source = config
        .source
        .clone()
        .ok_or_else(|| anyhow::anyhow!("no [source] configured"))?;
    if let Some(path) = path {
        source.root = path;
    }

    let docs = sources::scan(&source)?;

    if dry_run {
        println!("ingest (dry-run)");
        println!("  documents found: {}", docs.len());
        return Ok(());
    }

    let pool = db::connect(config).await?;
    migrate::run_migrations(&pool).await?;
    let corpus = sqlite::corpus(pool.clone());

    let Some(pipeline) = pipeline(config, &corpus)? else {
        bail!("Ingestion requires embeddings. Set [embedding] provider in config.");
    };

    let report = pipeline.ingest_all(docs).await;

    println!("ingest");
    println!("  documents: {}", report.documents);
    println!("  ingested: {}", report.ingested);
    println!("  skipped (unchanged): {}", report.skipped);
    println!("  failed: {}", report.failed);
    println!("  chunks written: {}", report.chunks_written);
    println!("ok");

    pool.close().await;
    Ok(())
}

async fn run_search(config: &Config, query: &str, mode: &str, k: Option<usize>) -> Result<()> {
    let mode = SearchMode::parse(mode)?;

    if matches!(mode, SearchMode::Hybrid | SearchMode::Vector) && !config.embedding.is_enabled() {
        bail!("This search mode requires embeddings. Set [embedding] provider in config, or use --mode lexical.");
    }

    let pool = db::connect(config).await?;
    let corpus = sqlite::corpus(pool.clone());

    let service = QueryService::new(
        corpus,
        embedding_service(config)?,
        fusion::from_config(&config.retrieval),
        &config.retrieval,
    );

    let k = k.unwrap_or(service.default_k());
    let hits = service.search(query, k, mode).await?;

    if hits.is_empty() {
        println!("No results.");
        pool.close().await;
        return Ok(());
    }

    for (i, hit) in hits.iter().enumerate() {
        println!(
            "{}. [{:.3}] {} (vector {:.3}, lexical {:.3})",
            i + 1,
            hit.score,
            hit.chunk_id,
            hit.vector_score,
            hit.lexical_score
        );
        println!("    excerpt: \"{}\"", hit.snippet.replace('\n', " "));
        println!();
    }

    pool.close().await;
    Ok(())
}

async fn run_status(config: &Config, verify: bool) -> Result<()> {
    let pool = db::connect(config).await?;
    let corpus = sqlite::corpus(pool.clone());

    let counts = corpus.catalog.counts().await?;
    println!("status");
    println!("  documents: {}", counts.documents);
    println!("  done: {}", counts.done);
    println!("  failed: {}", counts.failed);

    if verify {
        let report = audit_consistency(corpus.vectors.as_ref(), corpus.lexical.as_ref()).await?;
        if report.is_consistent() {
            println!("  indexes: consistent");
        } else {
            println!(
                "  indexes: INCONSISTENT ({} vector-only, {} lexical-only)",
                report.vector_only.len(),
                report.lexical_only.len()
            );
            for id in report.vector_only.iter().chain(report.lexical_only.iter()) {
                println!("    {id}");
            }
            pool.close().await;
            // Should be unreachable under correct operation; exit nonzero
            // so automation notices.
            return Err(RetrievalError::Inconsistent {
                vector_only: report.vector_only.len(),
                lexical_only: report.lexical_only.len(),
            }
            .into());
        }
    }

    pool.close().await;
    Ok(())
}

async fn run_serve(config: Config) -> Result<()> {
    let pool = db::connect(&config).await?;
    migrate::run_migrations(&pool).await?;
    let corpus = sqlite::corpus(pool);

    let query = Arc::new(QueryService::new(
        corpus.clone(),
        embedding_service(&config)?,
        fusion::from_config(&config.retrieval),
        &config.retrieval,
    ));
    let pipeline = pipeline(&config, &corpus)?;

    let config = Arc::new(config);
    let bridge = RetrievalBridge::new(config.clone(), query, pipeline);
    run_server(config, bridge).await
}
