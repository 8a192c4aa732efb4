//! CLI command definitions and handlers.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use ferry_core::config::TransferConfig;
use ferry_core::remote::{LocalStore, RemoteStore};

use crate::ui;

/// Load configuration with graceful fallback to defaults.
///
/// If the config file doesn't exist or can't be parsed, it falls back to defaults.
pub fn load_config() -> ferry_core::config::Config {
    ferry_core::config::Config::load().unwrap_or_default()
}

pub mod config;
pub mod download;
pub mod upload;

/// Ferry - Chunked, concurrent file transfers
#[derive(Parser)]
#[command(name = "ferry")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand)]
pub enum Command {
    /// Upload a local file or directory into the store
    Upload(UploadArgs),

    /// Download a file or directory from the store
    Download(DownloadArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

impl Command {
    /// Whether detailed logging was requested.
    pub const fn verbose(&self) -> bool {
        match self {
            Self::Upload(args) => args.transfer.verbose,
            Self::Download(args) => args.transfer.verbose,
            Self::Config(_) => false,
        }
    }
}

/// Arguments for the upload command
#[derive(Parser)]
pub struct UploadArgs {
    /// Local file or directory to upload
    pub local: PathBuf,

    /// Destination path inside the store
    pub remote: PathBuf,

    #[command(flatten)]
    pub transfer: TransferArgs,
}

/// Arguments for the download command
#[derive(Parser)]
pub struct DownloadArgs {
    /// File or directory path inside the store
    pub remote: PathBuf,

    /// Local destination
    pub local: PathBuf,

    #[command(flatten)]
    pub transfer: TransferArgs,
}

/// Options shared by upload and download
#[derive(Parser)]
pub struct TransferArgs {
    /// Directory backing the store
    #[arg(long, env = "FERRY_STORE")]
    pub store: PathBuf,

    /// Number of worker threads
    #[arg(short = 't', long)]
    pub threads: Option<usize>,

    /// Chunk size (e.g., 64M, 1G)
    #[arg(long)]
    pub chunk_size: Option<String>,

    /// I/O buffer size per chunk (e.g., 4M)
    #[arg(long)]
    pub block_size: Option<String>,

    /// Re-attempts per chunk before giving up
    #[arg(long)]
    pub retries: Option<u32>,

    /// Stop waiting after this long (e.g., 30s, 10m, 1h)
    #[arg(long)]
    pub timeout: Option<String>,

    /// Directory for temporary chunk files
    #[arg(long)]
    pub scratch_dir: Option<PathBuf>,

    /// Replace existing destination files
    #[arg(long)]
    pub overwrite: bool,

    /// Continue a run saved with --state (paths come from the state file)
    #[arg(long, value_name = "STATE")]
    pub resume: Option<PathBuf>,

    /// Save progress here if the run does not finish
    #[arg(long, value_name = "STATE")]
    pub state: Option<PathBuf>,

    /// Minimal output
    #[arg(short, long)]
    pub quiet: bool,

    /// Detailed logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

impl TransferArgs {
    /// Overlay command-line flags on the configured transfer settings.
    pub fn apply(&self, config: &mut TransferConfig) -> Result<()> {
        if let Some(threads) = self.threads {
            config.thread_count = Some(threads);
        }
        if let Some(size) = &self.chunk_size {
            config.chunk_size =
                ui::parse_size(size).with_context(|| format!("Invalid chunk size: {size}"))?;
        }
        if let Some(size) = &self.block_size {
            config.block_size =
                ui::parse_size(size).with_context(|| format!("Invalid block size: {size}"))?;
        }
        if let Some(retries) = self.retries {
            config.retry_limit = retries;
        }
        if let Some(timeout) = &self.timeout {
            config.monitor_timeout = Some(
                ui::parse_duration(timeout)
                    .with_context(|| format!("Invalid timeout: {timeout}"))?,
            );
        }
        if let Some(dir) = &self.scratch_dir {
            config.scratch_dir = Some(dir.clone());
        }
        if self.overwrite {
            config.overwrite = true;
        }
        if let Some(state) = &self.state {
            config.persist_path = Some(state.clone());
        }

        config.validate().context("Invalid transfer settings")?;
        Ok(())
    }

    /// Open the store named by `--store`.
    pub fn open_store(&self) -> Result<Arc<dyn RemoteStore>> {
        let meta = std::fs::metadata(&self.store)
            .with_context(|| format!("Store not found: {}", self.store.display()))?;
        anyhow::ensure!(
            meta.is_dir(),
            "Store is not a directory: {}",
            self.store.display()
        );
        tracing::debug!(store = %self.store.display(), "Opening directory store");
        Ok(Arc::new(LocalStore::new(&self.store)))
    }

    /// How the final report is printed.
    pub const fn output(&self) -> ui::Output {
        if self.json {
            ui::Output::Json
        } else if self.quiet {
            ui::Output::Quiet
        } else {
            ui::Output::Text
        }
    }
}

/// Arguments for the config command
#[derive(Parser)]
pub struct ConfigArgs {
    /// Config action
    #[command(subcommand)]
    pub action: ConfigAction,
}

/// Config actions
#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,

    /// Print the configuration file location
    Path,
}
