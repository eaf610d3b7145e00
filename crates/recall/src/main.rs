//! # Recall CLI (`rcl`)
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rcl init` | Create the SQLite database and schema |
//! | `rcl sources` | List configured sources with cursor state and chunk counts |
//! | `rcl sync <all\|name>` | Run a sync pass (incremental when a cursor exists) |
//! | `rcl search "<query>"` | Hybrid search with tag and time filters |
//!
//! ## Examples
//!
//! ```bash
//! rcl init --config ./config/recall.toml
//! rcl sync all
//! rcl sync dir:mail --full
//! rcl search "quarterly budget" --project Borealis --json
//! ```
//!
//! Logs go to stderr; set `RUST_LOG` or pass `-v` for debug output.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use recall::search::SearchOptions;
use recall::{config, migrate, search, sources, sync};

/// Recall: change-tracked ingestion, chunking, tagging and hybrid search
/// over personal context.
#[derive(Parser)]
#[command(name = "rcl", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/recall.toml")]
    config: PathBuf,

    /// Enable debug logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent: running it multiple times is safe.
    Init,

    /// List configured sources, their cursor state and chunk counts.
    Sources,

    /// Synchronize one source or all of them.
    ///
    /// A source with a valid cursor is synced incrementally; otherwise the
    /// lookback window is re-listed.
    Sync {
        /// `all`, a connector name (`chats`) or a source id (`dir:chats`).
        source: String,

        /// Ignore the stored cursor and re-list the lookback window.
        #[arg(long)]
        full: bool,
    },

    /// Search indexed chunks.
    Search {
        /// The search query string.
        query: String,

        /// Only chunks from this source (`chats` or `dir:chats`).
        #[arg(long)]
        source: Option<String>,

        /// Only chunks mentioning this person.
        #[arg(long)]
        person: Option<String>,

        /// Only chunks mentioning this project.
        #[arg(long)]
        project: Option<String>,

        /// Only chunks with this topic.
        #[arg(long)]
        topic: Option<String>,

        /// Only chunks with this sentiment (positive, negative, neutral).
        #[arg(long)]
        sentiment: Option<String>,

        /// Only chunks recording a decision.
        #[arg(long)]
        decisions: bool,

        /// Only chunks containing an action item.
        #[arg(long)]
        action_items: bool,

        /// Only chunks that occurred on or after this date (YYYY-MM-DD).
        #[arg(long)]
        since: Option<String>,

        /// Only chunks that occurred on or before this date (YYYY-MM-DD).
        #[arg(long)]
        until: Option<String>,

        /// Maximum number of results (defaults to `retrieval.final_limit`).
        #[arg(long)]
        limit: Option<usize>,

        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("recall=debug,info"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("recall=info,warn"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Sources => {
            sources::list_sources(&cfg).await?;
        }
        Commands::Sync { source, full } => {
            sync::run_sync(&cfg, &source, full).await?;
        }
        Commands::Search {
            query,
            source,
            person,
            project,
            topic,
            sentiment,
            decisions,
            action_items,
            since,
            until,
            limit,
            json,
        } => {
            let options = SearchOptions {
                source,
                person,
                project,
                topic,
                sentiment,
                decisions,
                action_items,
                since,
                until,
                limit,
            };
            search::run_search(&cfg, &query, &options, json).await?;
        }
    }

    Ok(())
}
