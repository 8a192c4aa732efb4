//! Remote storage seam.
//!
//! The uploader and downloader only need a handful of primitives from the
//! remote side: metadata lookup, recursive listing, ranged reads, ranged
//! writes and server-side concatenation. [`RemoteStore`] captures exactly
//! those; network-backed stores implement it outside this crate.
//!
//! [`LocalStore`] maps remote paths onto a directory of the local file
//! system. It backs the `ferry` CLI and the integration tests.

use std::fs::{self, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::file::sanitize_path;

/// Kind of a remote entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// Regular file
    File,
    /// Directory
    Directory,
}

/// Metadata of a remote entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    /// Remote path
    pub path: PathBuf,
    /// File or directory
    pub kind: EntryKind,
    /// Size in bytes (zero for directories)
    pub size: u64,
}

impl RemoteEntry {
    /// Whether the entry is a directory.
    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// One item of a recursive listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalkEntry {
    /// A file that can be transferred
    File(RemoteEntry),
    /// An entry that could not be listed; the rest of the tree is still walked
    Unreadable {
        /// Remote path of the entry
        path: PathBuf,
        /// Why the entry was skipped
        reason: String,
    },
}

impl WalkEntry {
    /// Remote path of the entry.
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::File(entry) => &entry.path,
            Self::Unreadable { path, .. } => path,
        }
    }
}

/// Primitives the orchestrators need from a remote store.
///
/// Calls come from several worker threads at once.
pub trait RemoteStore: Send + Sync {
    /// Look up `path`; `Ok(None)` if it does not exist.
    fn stat(&self, path: &Path) -> Result<Option<RemoteEntry>>;

    /// List every file below the directory `path`, in path order.
    ///
    /// Entries that cannot be read are reported in place instead of failing
    /// the whole listing.
    fn walk(&self, path: &Path) -> Result<Vec<WalkEntry>>;

    /// Read into `buf` starting at `offset`; returns the bytes read.
    ///
    /// Short reads only happen at end of file.
    fn read_at(&self, path: &Path, offset: u64, buf: &mut [u8]) -> Result<usize>;

    /// Write `data` at `offset`, creating the file and its parents as needed.
    fn write_at(&self, path: &Path, offset: u64, data: &[u8]) -> Result<()>;

    /// Replace `dst` with the concatenation of `parts`, then remove the parts.
    fn concat(&self, dst: &Path, parts: &[PathBuf]) -> Result<()>;

    /// Remove a file. Removing a missing file is not an error.
    fn remove(&self, path: &Path) -> Result<()>;

    /// Remove the directory `path` if it is empty.
    ///
    /// Missing and non-empty directories are left alone. Stores without real
    /// directories keep the default no-op.
    fn remove_dir(&self, _path: &Path) -> Result<()> {
        Ok(())
    }

    /// Whether [`RemoteStore::write_at`] may target arbitrary offsets of the
    /// same file from several writers.
    fn supports_range_write(&self) -> bool {
        true
    }
}

/// A [`RemoteStore`] rooted at a local directory.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
    range_write: bool,
}

impl LocalStore {
    /// Create a store whose remote `/` is `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            range_write: true,
        }
    }

    /// Report no support for ranged writes, forcing uploads through
    /// scratch artifacts and [`RemoteStore::concat`].
    #[must_use]
    pub fn without_range_write(mut self) -> Self {
        self.range_write = false;
        self
    }

    /// Directory backing the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Local path backing the remote `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPath`] if `path` would escape the root.
    pub fn resolve(&self, path: &Path) -> Result<PathBuf> {
        sanitize_path(&self.root, path).ok_or_else(|| Error::InvalidPath(path.display().to_string()))
    }
}

fn not_found(path: &Path, err: io::Error) -> Error {
    if err.kind() == io::ErrorKind::NotFound {
        Error::FileNotFound(path.display().to_string())
    } else {
        Error::Io(err)
    }
}

impl RemoteStore for LocalStore {
    fn stat(&self, path: &Path) -> Result<Option<RemoteEntry>> {
        let local = self.resolve(path)?;
        match fs::metadata(&local) {
            Ok(meta) => Ok(Some(RemoteEntry {
                path: path.to_path_buf(),
                kind: if meta.is_dir() {
                    EntryKind::Directory
                } else {
                    EntryKind::File
                },
                size: if meta.is_dir() { 0 } else { meta.len() },
            })),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(Error::Io(err)),
        }
    }

    fn walk(&self, path: &Path) -> Result<Vec<WalkEntry>> {
        let local = self.resolve(path)?;
        if !local.is_dir() {
            return Err(Error::FileNotFound(path.display().to_string()));
        }
        let remote_path = |entry: &Path| path.join(entry.strip_prefix(&local).unwrap_or(entry));

        let walker = walkdir::WalkDir::new(&local)
            .follow_links(true)
            .sort_by_file_name();

        let mut entries = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    match err.path() {
                        Some(failed) => entries.push(WalkEntry::Unreadable {
                            path: remote_path(failed),
                            reason: err.to_string(),
                        }),
                        None => tracing::warn!(error = %err, "Skipping unreadable entry"),
                    }
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let remote = remote_path(entry.path());
            match entry.metadata() {
                Ok(meta) => entries.push(WalkEntry::File(RemoteEntry {
                    path: remote,
                    kind: EntryKind::File,
                    size: meta.len(),
                })),
                Err(err) => entries.push(WalkEntry::Unreadable {
                    path: remote,
                    reason: err.to_string(),
                }),
            }
        }

        Ok(entries)
    }

    fn read_at(&self, path: &Path, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let local = self.resolve(path)?;
        let mut file = fs::File::open(&local).map_err(|e| not_found(path, e))?;
        file.seek(SeekFrom::Start(offset))?;

        let mut filled = 0;
        while filled < buf.len() {
            match file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(Error::Io(err)),
            }
        }
        Ok(filled)
    }

    fn write_at(&self, path: &Path, offset: u64, data: &[u8]) -> Result<()> {
        let local = self.resolve(path)?;
        if let Some(parent) = local.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&local)?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        Ok(())
    }

    fn concat(&self, dst: &Path, parts: &[PathBuf]) -> Result<()> {
        let target = self.resolve(dst)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        let locals = parts
            .iter()
            .map(|part| self.resolve(part))
            .collect::<Result<Vec<_>>>()?;

        let mut out = fs::File::create(&target)?;
        for (part, local) in parts.iter().zip(&locals) {
            let mut input = fs::File::open(local).map_err(|e| not_found(part, e))?;
            io::copy(&mut input, &mut out)?;
        }
        out.sync_all()?;
        drop(out);

        for local in &locals {
            fs::remove_file(local)?;
        }

        tracing::debug!(
            dst = %dst.display(),
            parts = parts.len(),
            "Concatenated remote parts"
        );

        Ok(())
    }

    fn remove(&self, path: &Path) -> Result<()> {
        let local = self.resolve(path)?;
        match fs::remove_file(&local) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(Error::Io(err)),
        }
    }

    fn remove_dir(&self, path: &Path) -> Result<()> {
        let local = self.resolve(path)?;
        match fs::read_dir(&local) {
            Ok(mut entries) => {
                if entries.next().is_some() {
                    return Ok(());
                }
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(Error::Io(err)),
        }
        match fs::remove_dir(&local) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(Error::Io(err)),
        }
    }

    fn supports_range_write(&self) -> bool {
        self.range_write
    }
}
