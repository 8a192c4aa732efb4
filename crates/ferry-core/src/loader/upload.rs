//! Local to remote transfers.

use std::ffi::OsStr;
use std::fmt;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::TransferConfig;
use crate::error::{Error, Result};
use crate::file::{enumerate_files, join_relative, LocalEntry};
use crate::progress::Progress;
use crate::remote::RemoteStore;
use crate::transfer::{ChunkRequest, TransferClient, Transporter};

use super::{artifact_dirs, pump, remote_scratch_root, Session, REMOTE_SCRATCH_DIR};

/// Moves local chunks into a remote store.
struct UploadTransporter {
    store: Arc<dyn RemoteStore>,
    merge: bool,
}

impl UploadTransporter {
    fn new(store: Arc<dyn RemoteStore>) -> Self {
        let merge = !store.supports_range_write();
        Self { store, merge }
    }
}

impl Transporter for UploadTransporter {
    fn transfer(&self, request: &ChunkRequest, cancel: &CancellationToken) -> Result<u64> {
        let mut file = File::open(&request.src).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::FileNotFound(request.src.display().to_string())
            } else {
                Error::Io(e)
            }
        })?;
        file.seek(SeekFrom::Start(request.offset))?;

        let base = request.write_offset();
        pump(
            request.size,
            request.block_size,
            cancel,
            |_, buf| Ok(file.read(buf)?),
            |pos, data| self.store.write_at(&request.name, base + pos, data),
        )
    }

    fn requires_merge(&self) -> bool {
        self.merge
    }

    fn merge(&self, dst: &Path, artifacts: &[PathBuf], _cancel: &CancellationToken) -> Result<()> {
        self.store.concat(dst, artifacts)
    }

    fn discard(&self, artifacts: &[PathBuf]) -> Result<()> {
        for artifact in artifacts {
            self.store.remove(artifact)?;
        }
        Ok(())
    }
}

/// Uploads a local file or directory tree.
///
/// ## Example
///
/// ```rust,ignore
/// let store = Arc::new(LocalStore::new("/srv/bucket"));
/// let uploader = Uploader::new(store, "photos", "/backup/photos", &config.transfer)?;
/// if !uploader.run(None)? {
///     eprintln!("some files failed");
/// }
/// ```
pub struct Uploader {
    session: Session,
    store: Arc<dyn RemoteStore>,
}

impl fmt::Debug for Uploader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Uploader")
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl Uploader {
    /// Enumerate `local` and submit every file for upload to `remote`.
    ///
    /// A single file uploaded to an existing remote directory lands inside
    /// it under its own name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FileNotFound`] if `local` does not exist, or
    /// [`Error::InvalidConfig`] if `config` is unusable.
    pub fn new(
        store: Arc<dyn RemoteStore>,
        local: impl AsRef<Path>,
        remote: impl AsRef<Path>,
        config: &TransferConfig,
    ) -> Result<Self> {
        config.validate()?;
        let (local, remote) = (local.as_ref(), remote.as_ref());

        let entries = enumerate_files(local, &config.enumerate_options())?;

        let remote = match store.stat(remote)? {
            Some(entry) if entry.is_dir() && local.is_file() => match local.file_name() {
                Some(name) => remote.join(name),
                None => remote.to_path_buf(),
            },
            _ => remote.to_path_buf(),
        };

        let transporter = UploadTransporter::new(Arc::clone(&store));
        let scratch = transporter.merge.then(|| remote_scratch_root(&remote));
        let client = TransferClient::new(Arc::new(transporter), config.options(scratch));

        tracing::info!(
            local = %local.display(),
            remote = %remote.display(),
            entries = entries.len(),
            "Planning upload"
        );

        for entry in entries {
            match entry {
                LocalEntry::File(file) => {
                    let dst = join_relative(&remote, &file.relative_path);
                    match check_destination(store.as_ref(), &dst, config.overwrite) {
                        Ok(()) => {
                            client.submit(file.path, dst, file.size)?;
                        }
                        Err(err) => {
                            client.reject(file.path, dst, err.to_string())?;
                        }
                    }
                }
                LocalEntry::Unreadable {
                    path,
                    relative_path,
                    reason,
                } => {
                    client.reject(path, join_relative(&remote, &relative_path), reason)?;
                }
            }
        }

        Ok(Self {
            session: Session::new(client, config.monitor_timeout, config.persist_path.clone()),
            store,
        })
    }

    /// Continue an upload saved to `state`.
    ///
    /// # Errors
    ///
    /// Returns an error if the state file cannot be loaded or `config` is
    /// unusable.
    pub fn resume(store: Arc<dyn RemoteStore>, state: &Path, config: &TransferConfig) -> Result<Self> {
        config.validate()?;
        let transporter = UploadTransporter::new(Arc::clone(&store));
        let client = TransferClient::resume(Arc::new(transporter), config.options(None), state)?;
        Ok(Self {
            session: Session::new(client, config.monitor_timeout, config.persist_path.clone()),
            store,
        })
    }

    /// Run the upload; returns whether every file finished.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker pool cannot start or the state file
    /// cannot be written after an unsuccessful run.
    pub fn run(&self, timeout: Option<Duration>) -> Result<bool> {
        let successful = self.session.run(timeout)?;
        if successful {
            self.remove_scratch_dirs();
        }
        Ok(successful)
    }

    /// Remove emptied remote artifact directories, including the shared
    /// scratch directory once no other run uses it.
    fn remove_scratch_dirs(&self) {
        for dir in artifact_dirs(&self.session.progress()) {
            self.remove_remote_dir(&dir);
            if let Some(parent) = dir
                .parent()
                .filter(|p| p.file_name() == Some(OsStr::new(REMOTE_SCRATCH_DIR)))
            {
                self.remove_remote_dir(parent);
            }
        }
    }

    fn remove_remote_dir(&self, dir: &Path) {
        if let Err(err) = self.store.remove_dir(dir) {
            tracing::warn!(
                dir = %dir.display(),
                error = %err,
                "Failed to remove remote scratch directory"
            );
        }
    }

    /// Snapshot of every file and chunk.
    pub fn progress(&self) -> Progress {
        self.session.progress()
    }

    /// Cancel the upload.
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

/// Clear the way for `dst` or explain why it is blocked.
fn check_destination(store: &dyn RemoteStore, dst: &Path, overwrite: bool) -> Result<()> {
    match store.stat(dst)? {
        None => Ok(()),
        Some(entry) if entry.is_dir() => Err(Error::InvalidPath(format!(
            "{} is a directory",
            dst.display()
        ))),
        Some(_) if !overwrite => Err(Error::DestinationExists(dst.display().to_string())),
        Some(_) => store.remove(dst),
    }
}
