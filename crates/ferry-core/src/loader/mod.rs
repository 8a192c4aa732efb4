//! Upload and download orchestration.
//!
//! An orchestrator turns a (source, destination) pair, possibly a whole
//! directory tree, into file jobs on a [`TransferClient`] and supplies the
//! [`Transporter`](crate::transfer::Transporter) that moves bytes between the
//! local file system and a [`RemoteStore`](crate::remote::RemoteStore).
//!
//! - [`Uploader`] writes chunks straight into the remote destination when
//!   the store supports ranged writes, and through remote artifacts plus
//!   `concat` otherwise.
//! - [`Downloader`] writes every chunk into a local artifact and merges them
//!   into the destination once all chunks arrived.
//!
//! Entries that cannot be transferred (unreadable, vanished, or blocked by an
//! existing destination) are recorded as failed files; enumeration carries on.

pub mod download;
pub mod upload;

pub use download::Downloader;
pub use upload::Uploader;

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::progress::Progress;
use crate::transfer::TransferClient;

/// Engine plus the run settings shared by both orchestrators.
#[derive(Debug)]
pub(crate) struct Session {
    pub(crate) client: TransferClient,
    timeout: Option<Duration>,
    persist_path: Option<PathBuf>,
}

impl Session {
    pub(crate) fn new(
        client: TransferClient,
        timeout: Option<Duration>,
        persist_path: Option<PathBuf>,
    ) -> Self {
        Self {
            client,
            timeout,
            persist_path,
        }
    }

    /// Start the pool and wait for completion.
    ///
    /// `timeout` overrides the configured monitor timeout. After an
    /// unsuccessful run the snapshot is written to the persist path, if any.
    pub(crate) fn run(&self, timeout: Option<Duration>) -> Result<bool> {
        self.client.run(false)?;
        let successful = self.client.monitor(timeout.or(self.timeout));

        let progress = self.client.progress();
        let files = progress.file_counts();
        tracing::info!(
            successful,
            finished = files.finished,
            failed = files.failed,
            pending = files.pending,
            bytes = progress.bytes_transferred(),
            "Transfer run complete"
        );

        if !successful {
            if let Some(path) = &self.persist_path {
                self.client.save(path)?;
                tracing::info!(path = %path.display(), "Saved state for resume");
            }
        }

        Ok(successful)
    }

    pub(crate) fn progress(&self) -> Progress {
        self.client.progress()
    }

    pub(crate) fn shutdown(&self) {
        self.client.shutdown();
    }

    pub(crate) fn save(&self, path: &Path) -> Result<()> {
        self.client.save(path)
    }
}

/// Copy `size` bytes in `block_size` pieces.
///
/// `read` and `write` receive the position relative to the start of the
/// chunk. Reading stops early at end of input, so the returned count may be
/// short. A zero-sized chunk still calls `write` once with an empty buffer so
/// the target gets created.
pub(crate) fn pump(
    size: u64,
    block_size: u64,
    cancel: &CancellationToken,
    mut read: impl FnMut(u64, &mut [u8]) -> Result<usize>,
    mut write: impl FnMut(u64, &[u8]) -> Result<()>,
) -> Result<u64> {
    if size == 0 {
        write(0, &[])?;
        return Ok(0);
    }

    let block = usize::try_from(block_size.clamp(1, size)).unwrap_or(usize::MAX);
    let mut buf = vec![0u8; block];
    let mut moved = 0u64;

    while moved < size {
        if cancel.is_cancelled() {
            return Err(Error::TransferCancelled);
        }

        let want = usize::try_from(size - moved).map_or(block, |left| left.min(block));
        let n = read(moved, &mut buf[..want])?;
        if n == 0 {
            break;
        }
        write(moved, &buf[..n])?;
        moved += n as u64;
    }

    Ok(moved)
}

/// Name of the remote artifact directory.
pub(crate) const REMOTE_SCRATCH_DIR: &str = ".ferry-tmp";

/// Remote artifact root used when a store cannot take ranged writes.
pub(crate) fn remote_scratch_root(remote: &Path) -> PathBuf {
    remote
        .parent()
        .unwrap_or_else(|| Path::new("/"))
        .join(REMOTE_SCRATCH_DIR)
}

/// Directories holding chunk artifacts, excluding writes straight into a
/// destination. Sorted and deduplicated.
pub(crate) fn artifact_dirs(progress: &Progress) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = progress
        .files
        .iter()
        .flat_map(|file| {
            file.chunks
                .iter()
                .filter(move |chunk| chunk.name != file.dst)
                .filter_map(|chunk| chunk.name.parent().map(Path::to_path_buf))
        })
        .collect();
    dirs.sort();
    dirs.dedup();
    dirs
}
