//! Configuration management for Ferry.
//!
//! This module handles loading, saving, and managing Ferry configuration.
//!
//! ## Configuration File Locations
//!
//! | Platform | Path |
//! |----------|------|
//! | Linux | `~/.config/ferry/config.toml` |
//! | macOS | `~/Library/Application Support/com.ferry.Ferry/config.toml` |
//! | Windows | `%APPDATA%\ferry\Ferry\config\config.toml` |
//!
//! ## Example
//!
//! ```toml
//! [transfer]
//! chunk_size = 268435456
//! thread_count = 8
//! retry_limit = 3
//! scratch_dir = "/var/tmp/ferry"
//! scratch_unique = false
//! merge_cleanup = "remove"
//! monitor_timeout = "30m"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::file::{EnumerateOptions, SymlinkMode};
use crate::transfer::{MergeCleanup, TransferOptions};

/// Main configuration struct for Ferry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Transfer settings
    pub transfer: TransferConfig,
    /// Logging settings
    pub logging: LoggingConfig,
}

/// Transfer configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Bytes per chunk
    pub chunk_size: u64,
    /// I/O buffer size used while moving one chunk
    pub block_size: u64,
    /// Worker pool size (None = host parallelism)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_count: Option<usize>,
    /// Re-attempts per chunk before it is marked failed
    pub retry_limit: u32,
    /// Root for temporary chunk artifacts (None = system temp dir)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scratch_dir: Option<PathBuf>,
    /// Use a fresh subdirectory of the scratch root for every run
    pub scratch_unique: bool,
    /// What to do with chunk artifacts when a merge fails
    pub merge_cleanup: MergeCleanup,
    /// Replace existing destination files
    pub overwrite: bool,
    /// Follow symlinks while walking local directories
    pub follow_symlinks: bool,
    /// Include hidden files while walking local directories
    pub include_hidden: bool,
    /// How long orchestrators wait for a run (None = until done)
    #[serde(
        with = "humantime_serde",
        skip_serializing_if = "Option::is_none"
    )]
    pub monitor_timeout: Option<Duration>,
    /// Where orchestrators save progress after an unsuccessful run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persist_path: Option<PathBuf>,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: crate::DEFAULT_CHUNK_SIZE,
            block_size: crate::DEFAULT_BLOCK_SIZE,
            thread_count: None,
            retry_limit: crate::DEFAULT_RETRY_LIMIT,
            scratch_dir: None,
            scratch_unique: true,
            merge_cleanup: MergeCleanup::Keep,
            overwrite: false,
            follow_symlinks: true,
            include_hidden: true,
            monitor_timeout: None,
            persist_path: None,
        }
    }
}

impl TransferConfig {
    /// Check values the engine cannot work with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] naming the offending key.
    pub fn validate(&self) -> Result<()> {
        let invalid = |key: &str, reason: &str| Error::InvalidConfig {
            key: key.to_string(),
            reason: reason.to_string(),
        };

        if self.chunk_size == 0 {
            return Err(invalid("chunk_size", "must be greater than zero"));
        }
        if self.block_size == 0 {
            return Err(invalid("block_size", "must be greater than zero"));
        }
        if self.thread_count == Some(0) {
            return Err(invalid("thread_count", "must be greater than zero"));
        }
        if self
            .monitor_timeout
            .is_some_and(|t| t.subsec_nanos() % 1_000_000 != 0)
        {
            return Err(invalid("monitor_timeout", "finer than a millisecond"));
        }
        Ok(())
    }

    /// Scratch root for local chunk artifacts.
    #[must_use]
    pub fn scratch_root(&self) -> PathBuf {
        self.scratch_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("ferry"))
    }

    /// Engine options with the given artifact root.
    ///
    /// `scratch_dir = None` makes every chunk write straight into its
    /// destination.
    #[must_use]
    pub fn options(&self, scratch_dir: Option<PathBuf>) -> TransferOptions {
        TransferOptions {
            chunk_size: self.chunk_size,
            block_size: self.block_size,
            thread_count: self
                .thread_count
                .unwrap_or_else(crate::transfer::default_thread_count),
            retry_limit: self.retry_limit,
            scratch_dir,
            scratch_unique: self.scratch_unique,
            merge_cleanup: self.merge_cleanup,
        }
    }

    /// Local enumeration options.
    #[must_use]
    pub fn enumerate_options(&self) -> EnumerateOptions {
        EnumerateOptions {
            symlink_mode: if self.follow_symlinks {
                SymlinkMode::Follow
            } else {
                SymlinkMode::Skip
            },
            include_hidden: self.include_hidden,
        }
    }
}

/// Logging configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is not set
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "warn,ferry=info,ferry_core=info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// If the configuration file doesn't exist, returns the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from a specific file.
    ///
    /// A missing file yields the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigError(format!("Failed to read config: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::ConfigError(format!("Failed to parse config: {e}")))?;

        config.transfer.validate()?;
        Ok(config)
    }

    /// Save configuration to the default location.
    ///
    /// Creates the configuration directory if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be written.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    /// Save configuration to a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be written.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::ConfigError(format!("Failed to create config directory: {e}"))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| Error::ConfigError(format!("Failed to write config: {e}")))
    }

    /// Get the default configuration directory path.
    #[must_use]
    pub fn config_dir() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "ferry", "Ferry")
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the full path to the configuration file.
    #[must_use]
    pub fn config_path() -> PathBuf {
        Self::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("config.toml")
    }
}

mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[allow(clippy::ref_option)]
    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_str(&format(*d)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let Some(s) = Option::<String>::deserialize(deserializer)? else {
            return Ok(None);
        };
        parse(&s).map(Some).map_err(serde::de::Error::custom)
    }

    /// Whole seconds as `Ns`, anything finer as `Nms`.
    pub(super) fn format(d: Duration) -> String {
        if d.subsec_nanos() == 0 {
            format!("{}s", d.as_secs())
        } else {
            format!("{}ms", d.as_millis())
        }
    }

    pub(super) fn parse(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        if let Some(millis) = s.strip_suffix("ms") {
            return millis
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|e| e.to_string());
        }

        let (digits, scale) = if let Some(secs) = s.strip_suffix('s') {
            (secs, 1)
        } else if let Some(mins) = s.strip_suffix('m') {
            (mins, 60)
        } else if let Some(hours) = s.strip_suffix('h') {
            (hours, 3600)
        } else {
            return Err(format!("invalid duration format: '{s}'"));
        };
        let n = digits.parse::<u64>().map_err(|e| e.to_string())?;
        n.checked_mul(scale)
            .map(Duration::from_secs)
            .ok_or_else(|| format!("duration out of range: '{s}'"))
    }
}
