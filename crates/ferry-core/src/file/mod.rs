//! File operations for Ferry.
//!
//! This module handles:
//! - Planning the byte ranges a file is split into
//! - Local file and directory enumeration
//! - Path sanitization
//!
//! ## Chunk Plans
//!
//! A plan is the ordered list of `(offset, size)` ranges covering a file.
//! Every range except the last is exactly `chunk_size` bytes; the ranges
//! never overlap and together cover `[0, total_size)`. An empty file is
//! planned as a single zero-length chunk so it still gets a transfer record.

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A contiguous byte range of a file, transferred as one unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkRange {
    /// Byte offset within the file
    pub offset: u64,
    /// Length of the range in bytes
    pub size: u64,
}

impl ChunkRange {
    /// One past the last byte covered by this range.
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.offset + self.size
    }
}

/// Split a file of `total_size` bytes into `chunk_size` ranges.
///
/// # Errors
///
/// Returns [`Error::InvalidConfig`] if `chunk_size` is zero.
pub fn plan_chunks(total_size: u64, chunk_size: u64) -> Result<Vec<ChunkRange>> {
    if chunk_size == 0 {
        return Err(Error::InvalidConfig {
            key: "chunk_size".to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }

    if total_size == 0 {
        return Ok(vec![ChunkRange { offset: 0, size: 0 }]);
    }

    let count = usize::try_from(total_size.div_ceil(chunk_size)).unwrap_or(usize::MAX);
    let mut ranges = Vec::with_capacity(count);
    let mut offset = 0u64;
    while offset < total_size {
        let size = chunk_size.min(total_size - offset);
        ranges.push(ChunkRange { offset, size });
        offset += size;
    }

    Ok(ranges)
}

/// How to handle symlinks during enumeration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymlinkMode {
    /// Follow symlinks and transfer the target content (default)
    #[default]
    Follow,
    /// Skip symlinks entirely
    Skip,
}

/// Options for file enumeration.
#[derive(Debug, Clone)]
pub struct EnumerateOptions {
    /// How to handle symlinks during enumeration
    pub symlink_mode: SymlinkMode,
    /// Include hidden files (files starting with '.')
    pub include_hidden: bool,
}

impl Default for EnumerateOptions {
    fn default() -> Self {
        Self {
            symlink_mode: SymlinkMode::Follow,
            include_hidden: true,
        }
    }
}

impl EnumerateOptions {
    /// Set whether to include hidden files.
    #[must_use]
    pub fn with_hidden(mut self, include_hidden: bool) -> Self {
        self.include_hidden = include_hidden;
        self
    }

    fn should_follow_symlinks(&self) -> bool {
        matches!(self.symlink_mode, SymlinkMode::Follow)
    }
}

/// A local file found during enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    /// Absolute (or caller-relative) path to the file
    pub path: PathBuf,
    /// Path relative to the enumeration root; empty when the root is a file
    pub relative_path: PathBuf,
    /// File size in bytes
    pub size: u64,
}

/// Result of enumerating one entry under a root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalEntry {
    /// A regular file that can be transferred
    File(LocalFile),
    /// An entry that could not be read; the rest of the tree is still walked
    Unreadable {
        /// Path of the entry
        path: PathBuf,
        /// Path relative to the enumeration root
        relative_path: PathBuf,
        /// Why the entry was skipped
        reason: String,
    },
}

/// Enumerate the files under `root`.
///
/// A file root yields itself with an empty relative path. A directory root is
/// walked recursively in file-name order.
///
/// # Errors
///
/// Returns [`Error::FileNotFound`] if `root` does not exist.
pub fn enumerate_files(root: &Path, options: &EnumerateOptions) -> Result<Vec<LocalEntry>> {
    let metadata =
        std::fs::metadata(root).map_err(|_| Error::FileNotFound(root.display().to_string()))?;

    if metadata.is_file() {
        return Ok(vec![LocalEntry::File(LocalFile {
            path: root.to_path_buf(),
            relative_path: PathBuf::new(),
            size: metadata.len(),
        })]);
    }

    let walker = walkdir::WalkDir::new(root)
        .follow_links(options.should_follow_symlinks())
        .sort_by_file_name();

    let mut entries = Vec::new();
    let mut walk = walker.into_iter();

    while let Some(entry) = walk.next() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                let Some(path) = err.path().map(Path::to_path_buf) else {
                    tracing::warn!(error = %err, "Skipping unreadable entry");
                    continue;
                };
                entries.push(LocalEntry::Unreadable {
                    relative_path: relative_to(&path, root),
                    path,
                    reason: err.to_string(),
                });
                continue;
            }
        };

        if entry.depth() > 0 && !options.include_hidden && is_hidden(entry.path()) {
            if entry.file_type().is_dir() {
                walk.skip_current_dir();
            }
            continue;
        }

        if entry.path_is_symlink() && !options.should_follow_symlinks() {
            continue;
        }

        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path().to_path_buf();
        let relative_path = relative_to(&path, root);
        match entry.metadata() {
            Ok(meta) => entries.push(LocalEntry::File(LocalFile {
                path,
                relative_path,
                size: meta.len(),
            })),
            Err(err) => entries.push(LocalEntry::Unreadable {
                path,
                relative_path,
                reason: err.to_string(),
            }),
        }
    }

    Ok(entries)
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|name| name.starts_with('.'))
}

fn relative_to(path: &Path, root: &Path) -> PathBuf {
    path.strip_prefix(root).unwrap_or(path).to_path_buf()
}

/// Join `relative` onto `base` unless it is empty.
#[must_use]
pub fn join_relative(base: &Path, relative: &Path) -> PathBuf {
    if relative.as_os_str().is_empty() {
        base.to_path_buf()
    } else {
        base.join(relative)
    }
}

/// Sanitize a path to prevent directory traversal attacks.
///
/// # Arguments
///
/// * `base` - Base directory
/// * `relative` - Relative path from base
///
/// # Returns
///
/// The sanitized path, or None if the path would escape `base`.
#[must_use]
pub fn sanitize_path(base: &Path, relative: &Path) -> Option<PathBuf> {
    let mut clean = PathBuf::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir | Component::RootDir => {}
            Component::ParentDir | Component::Prefix(_) => return None,
        }
    }

    let full_path = base.join(clean);

    if full_path.starts_with(base) {
        Some(full_path)
    } else {
        None
    }
}

/// Format a file size for display.
#[must_use]
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}
