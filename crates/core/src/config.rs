//! TOML-based configuration for SuiteBranch.
//!
//! Every field has a default, so an empty file (or no file at all, via
//! [`AppConfig::default`]) yields a working setup that stores its database
//! under `./.suitebranch`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::ConfigError;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Where the SQLite database lives.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Log filter used by the CLI when no verbosity flag is given.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Defaults applied when a suite is initialized.
    #[serde(default)]
    pub branching: BranchingConfig,

    /// Cost bounds for the line diff.
    #[serde(default)]
    pub diff: DiffConfig,

    /// Merge workflow settings.
    #[serde(default)]
    pub merge: MergeConfig,
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for persistent data.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Database file name inside `data_dir`.
    #[serde(default = "default_database_file")]
    pub database_file: String,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".suitebranch")
}
fn default_database_file() -> String {
    "suitebranch.db".into()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            database_file: default_database_file(),
        }
    }
}

impl StorageConfig {
    /// Full path of the SQLite database file.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_file)
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "warn".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ---------------------------------------------------------------------------
// Branching
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchingConfig {
    /// Name given to a suite's auto-created default branch.
    #[serde(default = "default_branch")]
    pub default_branch: String,

    /// Config object stored in a suite's first snapshot.
    #[serde(default = "default_initial_config")]
    pub initial_config: serde_json::Value,
}

fn default_branch() -> String {
    "main".into()
}
fn default_initial_config() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl Default for BranchingConfig {
    fn default() -> Self {
        Self {
            default_branch: default_branch(),
            initial_config: default_initial_config(),
        }
    }
}

// ---------------------------------------------------------------------------
// Diff
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffConfig {
    /// Largest LCS table (old lines x new lines, after trimming the common
    /// prefix and suffix) computed per file. Larger regions are emitted as a
    /// single delete+insert block.
    #[serde(default = "default_max_lcs_cells")]
    pub max_lcs_cells: usize,
}

fn default_max_lcs_cells() -> usize {
    16_000_000
}

impl Default for DiffConfig {
    fn default() -> Self {
        Self {
            max_lcs_cells: default_max_lcs_cells(),
        }
    }
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeConfig {
    /// Actor recorded in merge history when the caller supplies none.
    #[serde(default = "default_actor")]
    pub default_actor: String,
}

fn default_actor() -> String {
    "system".into()
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            default_actor: default_actor(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading & validation
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load an [`AppConfig`] from a TOML file at the given path.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Validate that all fields are sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.database_file.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "storage.database_file".into(),
                detail: "database file name must not be empty".into(),
            });
        }
        if self.branching.default_branch.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "branching.default_branch".into(),
                detail: "default branch name must not be empty".into(),
            });
        }
        if !self.branching.initial_config.is_object() {
            return Err(ConfigError::InvalidValue {
                field: "branching.initial_config".into(),
                detail: "initial config must be a table".into(),
            });
        }
        if self.diff.max_lcs_cells == 0 {
            return Err(ConfigError::InvalidValue {
                field: "diff.max_lcs_cells".into(),
                detail: "LCS cell budget must be > 0".into(),
            });
        }
        if self.merge.default_actor.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "merge.default_actor".into(),
                detail: "default actor must not be empty".into(),
            });
        }
        Ok(())
    }

    /// Convenience: load and validate in one call.
    pub fn load_and_validate<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load_from_file(path)?;
        config.validate()?;
        Ok(config)
    }
}
