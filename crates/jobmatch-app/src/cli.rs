//! CLI argument definitions for the jobmatch binary.
//!
//! Uses `clap` with derive macros. Priority resolution:
//! CLI args > env vars > config file > defaults.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// jobmatch — embed job postings and serve similarity recommendations.
#[derive(Parser, Debug)]
#[command(name = "jobmatch", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Data directory for the database and index artifact.
    #[arg(short = 'd', long = "data-dir")]
    pub data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level")]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Import postings from a CSV file into the database.
    Import {
        /// Path to the postings CSV.
        #[arg(long)]
        csv: PathBuf,
        /// Rows per import transaction.
        #[arg(long, default_value_t = 200)]
        commit_every: usize,
    },
    /// Compute embeddings for every posting that lacks one.
    Refresh,
    /// Build the vector index from embedded postings and persist it.
    BuildIndex,
    /// Recommend postings for a document (e.g. a resume file).
    Recommend {
        /// Path to the document to match against the corpus.
        #[arg(long)]
        document: PathBuf,
        /// Number of candidates to return.
        #[arg(short, long)]
        k: Option<usize>,
    },
    /// Print posting and embedding counts.
    Stats,
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > JOBMATCH_CONFIG env var > ~/.jobmatch/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("JOBMATCH_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Resolve the log level. Returns `None` when not overridden.
    pub fn resolve_log_level(&self) -> Option<String> {
        self.log_level.clone()
    }

    /// Resolve the data directory override. Returns `None` when the config
    /// default should be used.
    pub fn resolve_data_dir(&self) -> Option<PathBuf> {
        self.data_dir.clone()
    }
}

/// Default config file path for the current platform.
fn default_config_path() -> PathBuf {
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".jobmatch").join("config.toml");
    }
    if let Ok(home) = std::env::var("USERPROFILE") {
        return PathBuf::from(home).join(".jobmatch").join("config.toml");
    }
    PathBuf::from("config.toml")
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}
