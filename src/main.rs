//! # logsync CLI
//!
//! ```bash
//! logsync --config ./config/logsync.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `logsync init` | Create the SQLite tables |
//! | `logsync sync` | Incrementally sync eligible partitions |
//! | `logsync status` | Show horizon, checkpoints and pending partitions |
//! | `logsync populate` | Seed a local store with synthetic partitions |
//!
//! ## Examples
//!
//! ```bash
//! # Regular periodic run
//! logsync sync --config ./config/logsync.toml
//!
//! # See what would be scanned
//! logsync sync --dry-run
//!
//! # Local end-to-end check against populated test data
//! logsync populate && logsync sync --test-run
//! ```

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use logsync::config;
use logsync::ingest::{self, SyncOptions, TEST_RUN_NOW};
use logsync::logging::{self, LogFormat};
use logsync::migrate;
use logsync::populate;
use logsync::status;

/// logsync: incremental sync of hourly log indices into SQLite.
#[derive(Parser)]
#[command(
    name = "logsync",
    about = "Incrementally sync time-partitioned log indices into a relational store",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/logsync.toml")]
    config: PathBuf,

    /// Log output format on stderr.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the checkpoint and document tables.
    ///
    /// Idempotent; running it multiple times is safe.
    Init,

    /// Sync every eligible partition.
    ///
    /// A partition is eligible when it is listed by the remote store, is at
    /// or before the horizon (now minus the configured skew), and has no
    /// checkpoint yet.
    Sync {
        /// Compute and print the eligible partitions without scanning them.
        #[arg(long)]
        dry_run: bool,

        /// Override the current time (RFC 3339), e.g. to replay a past run.
        #[arg(long, conflicts_with = "test_run")]
        now: Option<String>,

        /// Pin now to 2023-01-02T09:00:00Z and refuse non-local remote stores.
        #[arg(long)]
        test_run: bool,

        /// Process at most this many eligible partitions, oldest first.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Show the horizon, checkpoint count and pending partitions.
    Status {
        /// Override the current time (RFC 3339).
        #[arg(long)]
        now: Option<String>,
    },

    /// Create synthetic partitions and documents in the remote store.
    Populate {
        /// Number of days of hourly partitions, starting 2023-01-01.
        #[arg(long, default_value_t = 2)]
        days: u32,

        /// Documents per partition.
        #[arg(long, default_value_t = 100)]
        docs: u32,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = logging::init(cli.log_format) {
        eprintln!("failed to initialize logging: {:#}", e);
    }

    if let Err(e) = run(cli).await {
        tracing::error!(error = %format!("{:#}", e), "run failed");
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Sync {
            dry_run,
            now,
            test_run,
            limit,
        } => {
            let now = if test_run {
                parse_now(TEST_RUN_NOW)?
            } else {
                now.as_deref().map(parse_now).transpose()?.unwrap_or_else(Utc::now)
            };
            let options = SyncOptions {
                now,
                dry_run,
                limit,
            };
            ingest::run_sync(&cfg, options, test_run).await?;
        }
        Commands::Status { now } => {
            let now = now.as_deref().map(parse_now).transpose()?.unwrap_or_else(Utc::now);
            status::run_status(&cfg, now).await?;
        }
        Commands::Populate { days, docs } => {
            populate::run_populate(&cfg, days, docs).await?;
        }
    }

    Ok(())
}

fn parse_now(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("invalid timestamp '{}', expected RFC 3339", s))?
        .with_timezone(&Utc))
}
