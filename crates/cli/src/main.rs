//! SuiteBranch command-line tool.
//!
//! Provides subcommands for managing suite branches, capturing snapshots,
//! diffing snapshots, and driving merge requests through conflict
//! resolution, plus generating / validating configuration files.

mod commands;
mod style;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use suitebranch_core::config::AppConfig;
use suitebranch_core::db::Database;
use suitebranch_core::{BranchManager, CoreError, DiffEngine, MergeCoordinator, SnapshotEngine};

use commands::branch::BranchAction;
use commands::merge_request::MergeRequestAction;
use commands::snapshot::SnapshotAction;

/// Config file picked up from the working directory when `--config` is absent.
const DEFAULT_CONFIG_FILE: &str = "suitebranch.toml";

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// SuiteBranch command-line tool.
#[derive(Parser, Debug)]
#[command(
    name = "suitebranch",
    version,
    about = "Branch, diff and merge generated test suites"
)]
struct Cli {
    /// Path to the TOML configuration file (default: ./suitebranch.toml if present).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Print machine-readable JSON instead of tables.
    #[arg(long, global = true)]
    json: bool,

    /// Actor recorded in merge history (default: merge.default_actor).
    #[arg(long, global = true)]
    actor: Option<String>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a default configuration file.
    Init {
        /// Output path for the generated config file.
        #[arg(short, long, default_value = "./suitebranch.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file.
    Validate,

    /// Manage suite branches.
    Branch {
        #[command(subcommand)]
        action: BranchAction,
    },

    /// Capture and inspect snapshots.
    Snapshot {
        #[command(subcommand)]
        action: SnapshotAction,
    },

    /// Show the structured diff between two snapshots.
    Diff {
        /// Snapshot to diff from.
        from: String,

        /// Snapshot to diff to.
        to: String,

        /// Render code changes as unified patches.
        #[arg(long)]
        patch: bool,

        /// Abort the diff after this many seconds.
        #[arg(long)]
        timeout_secs: Option<u64>,
    },

    /// Propose, resolve and execute merges.
    MergeRequest {
        #[command(subcommand)]
        action: MergeRequestAction,
    },
}

// ---------------------------------------------------------------------------
// Shared handles
// ---------------------------------------------------------------------------

/// Engines and output settings shared by every subcommand.
pub struct App {
    pub branches: BranchManager,
    pub snapshots: SnapshotEngine,
    pub diffs: Arc<DiffEngine>,
    pub merges: MergeCoordinator,
    pub json: bool,
    pub actor: String,
}

impl App {
    fn open(config: &AppConfig, json: bool, actor: Option<String>) -> Result<Self> {
        let db = Arc::new(open_database(config)?);
        let actor = actor.unwrap_or_else(|| config.merge.default_actor.clone());
        Ok(Self {
            branches: BranchManager::new(db.clone(), &config.branching),
            snapshots: SnapshotEngine::new(db.clone()),
            diffs: Arc::new(DiffEngine::new(db.clone(), &config.diff)),
            merges: MergeCoordinator::new(db, &config.diff),
            json,
            actor,
        })
    }

    /// Print `value` as pretty JSON when `--json` was given.
    pub fn print_json<T: serde::Serialize>(&self, value: &T) -> Result<bool> {
        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(value).context("failed to encode JSON output")?
            );
        }
        Ok(self.json)
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match resolve_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            init_logging(cli.verbose, "warn");
            eprintln!("{}", style::error(&format!("{:#}", e)));
            return ExitCode::from(exit_code(&e));
        }
    };
    init_logging(cli.verbose, &config.logging.level);

    match run(cli, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", style::error(&format!("{:#}", e)));
            ExitCode::from(exit_code(&e))
        }
    }
}

async fn run(cli: Cli, config: AppConfig) -> Result<()> {
    match cli.command {
        Commands::Init { output } => cmd_init(&output),
        Commands::Validate => cmd_validate(cli.config.as_deref(), &config),
        command => {
            config.validate().context("invalid configuration")?;
            let app = App::open(&config, cli.json, cli.actor)?;
            match command {
                Commands::Branch { action } => commands::branch::run(&app, action),
                Commands::Snapshot { action } => commands::snapshot::run(&app, action),
                Commands::Diff {
                    from,
                    to,
                    patch,
                    timeout_secs,
                } => commands::diff::run(&app, &from, &to, patch, timeout_secs).await,
                Commands::MergeRequest { action } => commands::merge_request::run(&app, action),
                Commands::Init { .. } | Commands::Validate => Ok(()),
            }
        }
    }
}

/// Map an error to the process exit code of the first [`CoreError`] in its
/// chain; anything else exits with 1.
fn exit_code(err: &anyhow::Error) -> u8 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<CoreError>())
        .map(CoreError::exit_code)
        .unwrap_or(1)
}

fn init_logging(verbose: u8, configured: &str) {
    let level = match verbose {
        0 => configured,
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = if verbose == 0 {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    } else {
        EnvFilter::new(level)
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();
}

// ---------------------------------------------------------------------------
// Config helpers
// ---------------------------------------------------------------------------

/// Load the explicit config file, else `./suitebranch.toml` if it exists,
/// else built-in defaults.
fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    match path {
        Some(path) => {
            let path = expand_tilde(path);
            AppConfig::load_from_file(&path)
                .map_err(CoreError::from)
                .with_context(|| format!("failed to load configuration {}", path.display()))
        }
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
            AppConfig::load_from_file(DEFAULT_CONFIG_FILE)
                .map_err(CoreError::from)
                .context("failed to load ./suitebranch.toml")
        }
        None => Ok(AppConfig::default()),
    }
}

fn open_database(config: &AppConfig) -> Result<Database> {
    let db_path = expand_tilde(&config.storage.database_path());
    let db = Database::new(&db_path)
        .map_err(CoreError::from)
        .context("failed to open database")?;
    db.initialize()
        .map_err(CoreError::from)
        .context("failed to initialize database")?;
    Ok(db)
}

pub(crate) fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}

// ---------------------------------------------------------------------------
// Init / validate
// ---------------------------------------------------------------------------

fn cmd_init(output: &Path) -> Result<()> {
    let default_config = r#"# SuiteBranch Configuration
# Every value below is the built-in default.

[storage]
data_dir = ".suitebranch"
database_file = "suitebranch.db"

[logging]
# trace, debug, info, warn, error (RUST_LOG overrides)
level = "warn"

[branching]
default_branch = "main"

# Config object of every suite's first snapshot.
[branching.initial_config]

[diff]
# Largest LCS table per file before falling back to a block replacement.
max_lcs_cells = 16000000

[merge]
default_actor = "system"
"#;

    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }

    std::fs::write(output, default_config).context("failed to write config file")?;

    println!(
        "{}",
        style::success(&format!("Default configuration written to {}", output.display()))
    );
    println!();
    println!("Next steps:");
    println!("  1. Adjust the storage directory and branching defaults");
    println!(
        "  2. Validate with: suitebranch validate --config {}",
        output.display()
    );
    println!(
        "  3. Create a branch: suitebranch --config {} branch create --suite <suite> --name <name>",
        output.display()
    );

    Ok(())
}

fn cmd_validate(path: Option<&Path>, config: &AppConfig) -> Result<()> {
    let shown = path
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "(defaults)".to_string());
    println!("Validating configuration: {}", shown);
    println!();
    println!("  [OK] TOML structure is valid");

    match config.validate() {
        Ok(()) => println!("  [OK] All fields are valid"),
        Err(e) => {
            println!("  [FAIL] Validation error: {}", e);
            return Err(CoreError::from(e)).context("configuration validation failed");
        }
    }

    println!();
    println!("Configuration summary:");
    println!("  Database      : {}", config.storage.database_path().display());
    println!("  Log level     : {}", config.logging.level);
    println!("  Default branch: {}", config.branching.default_branch);
    println!("  LCS budget    : {} cells", config.diff.max_lcs_cells);
    println!("  Default actor : {}", config.merge.default_actor);
    println!();
    println!("{}", style::success("Configuration is valid."));

    Ok(())
}
