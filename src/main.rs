//! # Balanced RAG CLI (`brag`)
//!
//! ## Usage
//!
//! ```bash
//! brag --config ./config/brag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `brag init` | Create the SQLite database and schema |
//! | `brag ingest` | Normalize, validate, embed, and store the configured datasets |
//! | `brag query "<text>"` | Print source-balanced results |
//! | `brag ask "<text>"` | Answer a question from retrieved context |
//! | `brag stats` | Stored passages per source |
//! | `brag serve` | Start the HTTP server |
//!
//! Logging goes to stderr and is controlled by `RUST_LOG` (default `info`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use balanced_rag::{ask, config, ingest, migrate, search, server, stats};

/// Balanced RAG: source-balanced retrieval over counselling datasets.
#[derive(Parser)]
#[command(
    name = "brag",
    about = "Balanced RAG: source-balanced retrieval-augmented generation",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/brag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Ingest the configured datasets up to the passage cap.
    ///
    /// Re-running is safe: passages already stored are skipped, and a run
    /// that failed midway resumes from the remaining budget.
    Ingest {
        /// Override `ingest.max_total_docs` for this run.
        #[arg(long)]
        max_docs: Option<u64>,

        /// Show per-source counts and the planned work without embedding
        /// or writing anything.
        #[arg(long)]
        dry_run: bool,
    },

    /// Retrieve source-balanced passages for a query.
    Query {
        text: String,

        /// Number of results (defaults to `retrieval.default_k`).
        #[arg(long)]
        k: Option<usize>,
    },

    /// Answer a question from retrieved context.
    Ask { text: String },

    /// Show stored passage counts per source.
    Stats,

    /// Start the HTTP server on `[server].bind`.
    Serve {
        /// Run ingestion once before binding.
        #[arg(long)]
        ingest: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { max_docs, dry_run } => {
            ingest::run_ingest(&cfg, max_docs, dry_run).await?;
        }
        Commands::Query { text, k } => {
            search::run_query(&cfg, &text, k).await?;
        }
        Commands::Ask { text } => {
            ask::run_ask(&cfg, &text).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Serve { ingest } => {
            server::run_server(&cfg, ingest).await?;
        }
    }

    Ok(())
}
