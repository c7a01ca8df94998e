//! # plansync CLI
//!
//! Keeps a relational planning store in step with a directory of markdown
//! files: Units are folders, SubUnits are nested folders, Items are leaf
//! files.
//!
//! ## Usage
//!
//! ```bash
//! plansync --config ./config/plansync.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `plansync init` | Create the SQLite database and run schema migrations |
//! | `plansync sync` | Reconcile leaf files with the store |
//! | `plansync discover` | Print the hierarchy found on disk, without writing |
//! | `plansync patterns validate` | Compile and check the configured patterns |
//! | `plansync patterns match <path>` | Show which pattern matches a path |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the database
//! plansync init
//!
//! # Preview what a sync would change
//! plansync sync --dry-run
//!
//! # Full rescan, folder layout is authoritative, delete orphaned items
//! plansync sync --full --discovery-strategy folder-authoritative --cleanup
//!
//! # Machine-readable report
//! plansync sync --json --progress off
//! ```
//!
//! Logging is controlled by `PLANSYNC_LOG` (e.g. `PLANSYNC_LOG=plansync=debug`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use plansync::commands::{self, SyncArgs};
use plansync::config;
use plansync::discovery::DiscoveryStrategy;
use plansync::progress::ProgressMode;
use plansync::resolve::ConflictStrategy;

#[derive(Parser)]
#[command(
    name = "plansync",
    about = "Synchronize a markdown planning tree with a SQLite store",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Relative paths inside the file resolve against its directory.
    #[arg(long, global = true, default_value = "./config/plansync.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent; running it multiple times is safe.
    Init,

    /// Reconcile leaf files with the store.
    ///
    /// Only files modified since the last committed sync are processed
    /// unless `--full` is given. Item status is never written.
    Sync {
        /// Conflict strategy (overrides `[sync].conflict_strategy`).
        #[arg(long, value_enum)]
        strategy: Option<ConflictStrategy>,

        /// Run discovery with the configured strategy before scanning.
        #[arg(long)]
        discovery: bool,

        /// Run discovery with this strategy.
        #[arg(long, value_enum)]
        discovery_strategy: Option<DiscoveryStrategy>,

        /// Ignore the last-sync timestamp and process every file.
        #[arg(long)]
        full: bool,

        /// Delete items whose leaf file no longer exists.
        #[arg(long)]
        cleanup: bool,

        /// Show what would change without writing.
        #[arg(long)]
        dry_run: bool,

        /// Create missing parent units and sub-units.
        #[arg(long)]
        create_missing: bool,

        /// Print the report as JSON.
        #[arg(long)]
        json: bool,

        /// Progress on stderr. Defaults to human when stderr is a terminal.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Print the discovered hierarchy and its conflicts. Never writes.
    Discover {
        #[arg(long, value_enum)]
        discovery_strategy: Option<DiscoveryStrategy>,

        #[arg(long)]
        json: bool,
    },

    /// Inspect the configured patterns.
    Patterns {
        #[command(subcommand)]
        action: PatternsAction,
    },
}

#[derive(Subcommand)]
enum PatternsAction {
    /// Compile every pattern and report warnings.
    Validate,
    /// Show which pattern matches a path (project-relative or absolute).
    Match { path: PathBuf },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("PLANSYNC_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            commands::run_init(&cfg).await?;
        }
        Commands::Sync {
            strategy,
            discovery,
            discovery_strategy,
            full,
            cleanup,
            dry_run,
            create_missing,
            json,
            progress,
        } => {
            let args = SyncArgs {
                strategy,
                discovery,
                discovery_strategy,
                full,
                cleanup,
                dry_run,
                create_missing,
                json,
                progress,
            };
            commands::run_sync(&cfg, &args).await?;
        }
        Commands::Discover {
            discovery_strategy,
            json,
        } => {
            commands::run_discover(&cfg, discovery_strategy, json)?;
        }
        Commands::Patterns { action } => match action {
            PatternsAction::Validate => commands::run_patterns_validate(&cfg)?,
            PatternsAction::Match { path } => commands::run_patterns_match(&cfg, &path)?,
        },
    }

    Ok(())
}
