//! # kopi CLI
//!
//! The `kopi` binary ingests the coffee-shop CSV into a local vector index
//! and answers questions over it.
//!
//! ## Usage
//!
//! ```bash
//! kopi --config ./config/kopi.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kopi init` | Create the index directory and schema |
//! | `kopi ingest` | Wipe the index and ingest the CSV |
//! | `kopi stats` | Show what is indexed |
//! | `kopi search "<query>"` | Retrieve documents without calling the LLM |
//! | `kopi ask "<question>"` | Answer one question |
//! | `kopi chat` | Interactive question loop |
//!
//! `GROQ_API_KEY` must be set (environment or `.env`) for `ask` and `chat`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use kopi_rag::config::{self, DEFAULT_CONFIG_PATH};
use kopi_rag::{ingest, logging, migrate, repl, search, stats};

/// kopi: coffee-shop recommendations over a local vector index.
#[derive(Parser)]
#[command(
    name = "kopi",
    about = "Retrieval-augmented coffee-shop recommendations for Yogyakarta",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/kopi.toml`; built-in defaults are used when
    /// that file does not exist.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Debug-level logging when RUST_LOG is not set.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the index directory and schema. Safe to run repeatedly.
    Init,

    /// Ingest the CSV into the vector index.
    ///
    /// Wipes the index first so re-running yields the same documents.
    Ingest {
        /// CSV file (defaults to `paths.csv`).
        #[arg(long)]
        csv: Option<PathBuf>,

        /// Keep existing entries; ingesting the same CSV twice duplicates them.
        #[arg(long)]
        append: bool,
    },

    /// Show document count, model, and ingest time of the index.
    Stats,

    /// Retrieve documents for a query without generating an answer.
    Search {
        query: String,

        /// `mmr` (diverse) or `threshold` (distance cutoff, shows scores).
        #[arg(long)]
        strategy: Option<String>,

        /// Number of documents (defaults to `retrieval.top_k`).
        #[arg(short = 'k', long)]
        limit: Option<usize>,

        /// Print the context block sent to the LLM instead of a listing.
        #[arg(long)]
        context: bool,
    },

    /// Answer a single question.
    Ask { question: String },

    /// Interactive question loop.
    Chat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine; the variables may come from the environment.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    logging::init_logging(cli.verbose)?;

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Index initialized at {}", cfg.paths.vector_store.display());
        }
        Commands::Ingest { csv, append } => {
            ingest::run_ingest(&cfg, csv, append).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Search {
            query,
            strategy,
            limit,
            context,
        } => {
            search::run_search(&cfg, &query, strategy, limit, context).await?;
        }
        Commands::Ask { question } => {
            repl::run_ask(&cfg, &question).await?;
        }
        Commands::Chat => {
            repl::run_chat(&cfg).await?;
        }
    }

    Ok(())
}
