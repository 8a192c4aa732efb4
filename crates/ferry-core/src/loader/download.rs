//! Remote to local transfers.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::TransferConfig;
use crate::error::{Error, Result};
use crate::file::join_relative;
use crate::progress::Progress;
use crate::remote::{RemoteStore, WalkEntry};
use crate::transfer::{ChunkRequest, TransferClient, Transporter};

use super::{artifact_dirs, pump, Session};

/// Moves remote chunks into local artifact files.
struct DownloadTransporter {
    store: Arc<dyn RemoteStore>,
}

fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

impl Transporter for DownloadTransporter {
    fn transfer(&self, request: &ChunkRequest, cancel: &CancellationToken) -> Result<u64> {
        create_parent(&request.name)?;

        let direct = request.is_direct();
        let mut out = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(!direct)
            .open(&request.name)?;
        out.seek(SeekFrom::Start(request.write_offset()))?;

        let moved = pump(
            request.size,
            request.block_size,
            cancel,
            |pos, buf| self.store.read_at(&request.src, request.offset + pos, buf),
            |_, data| Ok(out.write_all(data)?),
        )?;
        out.flush()?;
        Ok(moved)
    }

    fn requires_merge(&self) -> bool {
        true
    }

    fn merge(&self, dst: &Path, artifacts: &[PathBuf], cancel: &CancellationToken) -> Result<()> {
        if let [only] = artifacts {
            if only == dst {
                return Ok(());
            }
        }

        create_parent(dst)?;
        let mut out = File::create(dst)?;
        for artifact in artifacts {
            if cancel.is_cancelled() {
                return Err(Error::TransferCancelled);
            }
            let mut input = File::open(artifact)?;
            io::copy(&mut input, &mut out)?;
        }
        out.sync_all()?;
        drop(out);

        for artifact in artifacts {
            if let Err(err) = fs::remove_file(artifact) {
                tracing::warn!(
                    artifact = %artifact.display(),
                    error = %err,
                    "Failed to remove chunk artifact"
                );
            }
        }
        Ok(())
    }

    fn discard(&self, artifacts: &[PathBuf]) -> Result<()> {
        for artifact in artifacts {
            match fs::remove_file(artifact) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => return Err(Error::Io(err)),
            }
        }
        Ok(())
    }
}

/// Downloads a remote file or directory tree.
#[derive(Debug)]
pub struct Downloader {
    session: Session,
    scratch_base: PathBuf,
}

impl Downloader {
    /// Stat `remote` and submit every file below it for download to `local`.
    ///
    /// A single file downloaded to an existing local directory lands inside
    /// it under its own name. Chunk artifacts go to the configured scratch
    /// root.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FileNotFound`] if `remote` does not exist, or
    /// [`Error::InvalidConfig`] if `config` is unusable.
    pub fn new(
        store: Arc<dyn RemoteStore>,
        remote: impl AsRef<Path>,
        local: impl AsRef<Path>,
        config: &TransferConfig,
    ) -> Result<Self> {
        config.validate()?;
        let (remote, local) = (remote.as_ref(), local.as_ref());

        let root = store
            .stat(remote)?
            .ok_or_else(|| Error::FileNotFound(remote.display().to_string()))?;

        let entries: Vec<(PathBuf, WalkEntry)> = if root.is_dir() {
            store
                .walk(remote)?
                .into_iter()
                .map(|entry| {
                    let relative = entry.path().strip_prefix(remote).unwrap_or(entry.path());
                    (join_relative(local, relative), entry)
                })
                .collect()
        } else {
            let dst = match remote.file_name() {
                Some(name) if local.is_dir() => local.join(name),
                _ => local.to_path_buf(),
            };
            vec![(dst, WalkEntry::File(root))]
        };

        let transporter = DownloadTransporter {
            store: Arc::clone(&store),
        };
        let client = TransferClient::new(
            Arc::new(transporter),
            config.options(Some(config.scratch_root())),
        );

        tracing::info!(
            remote = %remote.display(),
            local = %local.display(),
            entries = entries.len(),
            "Planning download"
        );

        for (dst, entry) in entries {
            let file = match entry {
                WalkEntry::File(file) => file,
                WalkEntry::Unreadable { path, reason } => {
                    client.reject(path, dst, reason)?;
                    continue;
                }
            };
            if dst.is_dir() {
                client.reject(file.path, &dst, format!("{} is a directory", dst.display()))?;
            } else if dst.exists() && !config.overwrite {
                client.reject(file.path, &dst, Error::DestinationExists(dst.display().to_string()).to_string())?;
            } else {
                client.submit(file.path, dst, file.size)?;
            }
        }

        Ok(Self {
            session: Session::new(client, config.monitor_timeout, config.persist_path.clone()),
            scratch_base: config.scratch_root(),
        })
    }

    /// Continue a download saved to `state`.
    ///
    /// # Errors
    ///
    /// Returns an error if the state file cannot be loaded or `config` is
    /// unusable.
    pub fn resume(store: Arc<dyn RemoteStore>, state: &Path, config: &TransferConfig) -> Result<Self> {
        config.validate()?;
        let transporter = DownloadTransporter { store };
        let client = TransferClient::resume(
            Arc::new(transporter),
            config.options(Some(config.scratch_root())),
            state,
        )?;
        Ok(Self {
            session: Session::new(client, config.monitor_timeout, config.persist_path.clone()),
            scratch_base: config.scratch_root(),
        })
    }

    /// Run the download; returns whether every file finished.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker pool cannot start or the state file
    /// cannot be written after an unsuccessful run.
    pub fn run(&self, timeout: Option<Duration>) -> Result<bool> {
        let successful = self.session.run(timeout)?;
        if successful {
            self.remove_run_dirs();
        }
        Ok(successful)
    }

    /// Remove the per-run artifact directories below the scratch root. The
    /// configured scratch directory itself stays.
    fn remove_run_dirs(&self) {
        for dir in artifact_dirs(&self.session.progress()) {
            if dir == self.scratch_base || !dir.starts_with(&self.scratch_base) {
                continue;
            }
            match fs::remove_dir(&dir) {
                Ok(()) => tracing::debug!(dir = %dir.display(), "Removed scratch directory"),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => tracing::warn!(
                    dir = %dir.display(),
                    error = %err,
                    "Failed to remove scratch directory"
                ),
            }
        }
    }

    /// Snapshot of every file and chunk.
    pub fn progress(&self) -> Progress {
        self.session.progress()
    }

    /// Cancel the download.
    pub fn shutdown(&self) {
        self.session.shutdown();
    }

    /// Persist progress to `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the state file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        self.session.save(path)
    }

    /// The underlying engine.
    pub fn client(&self) -> &TransferClient {
        &self.session.client
    }
}
