//! # Report Embedder CLI (`rembed`)
//!
//! ## Usage
//!
//! ```bash
//! rembed --config ./config/rembed.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rembed init` | Create the SQLite database and run schema migrations |
//! | `rembed ingest <dir>` | Load report JSON files as ordered blocks |
//! | `rembed embed` | Materialize vectors for pending blocks |
//! | `rembed stats` | Show block and embedding coverage |
//!
//! ## Examples
//!
//! ```bash
//! rembed init
//! rembed ingest ./reports
//! rembed embed --progress human
//! rembed embed --document 42 --force --json
//! ```
//!
//! Diagnostics go to stderr through `tracing`; set `RUST_LOG=debug` for detail.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use report_embedder::embed_cmd::{self, EmbedOptions};
use report_embedder::progress::ProgressMode;
use report_embedder::{config, ingest, migrate, stats};
use report_embedder_core::materializer::CancelFlag;

/// Report Embedder CLI: context-aware embeddings for report content blocks.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/rembed.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "rembed",
    about = "Report Embedder: context-aware embedding materialization for report content blocks",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/rembed.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file with the `reports` and
    /// `content_blocks` tables. Safe to run repeatedly.
    Init,

    /// Load report files (JSON) from a directory.
    ///
    /// Each file holds one report with its ordered blocks. Reports whose
    /// `source_id` is already stored are skipped.
    Ingest {
        /// Directory to scan.
        dir: PathBuf,

        /// Glob for report files, relative to `dir` (repeatable).
        #[arg(long = "include", default_value = ingest::DEFAULT_INCLUDE)]
        include: Vec<String>,
    },

    /// Embed blocks that have no vector yet.
    Embed {
        /// Only embed blocks of this report id.
        #[arg(long)]
        document: Option<i64>,

        /// Cap the number of blocks processed.
        #[arg(long)]
        limit: Option<usize>,

        /// Override `[materializer] batch_size`.
        #[arg(long)]
        batch_size: Option<usize>,

        /// Re-embed blocks that already have a vector.
        #[arg(long)]
        force: bool,

        /// Look up every predecessor in the database.
        #[arg(long)]
        no_cache: bool,

        /// Count pending blocks without loading a model.
        #[arg(long)]
        dry_run: bool,

        /// Print the run summary as one JSON object.
        #[arg(long)]
        json: bool,

        /// Progress on stderr. Defaults to `human` on a TTY, `off` otherwise.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Show database statistics.
    Stats,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { dir, include } => {
            ingest::run_ingest(&cfg, &dir, &include).await?;
        }
        Commands::Embed {
            document,
            limit,
            batch_size,
            force,
            no_cache,
            dry_run,
            json,
            progress,
        } => {
            let opts = EmbedOptions {
                document,
                limit,
                batch_size,
                force,
                no_cache,
                dry_run,
                json,
                progress: progress.unwrap_or_else(ProgressMode::default_for_tty),
            };

            let cancel = CancelFlag::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("interrupt received, stopping after the current batch");
                    on_signal.cancel();
                }
            });

            embed_cmd::run_embed(&cfg, &opts, &cancel).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
    }

    Ok(())
}
