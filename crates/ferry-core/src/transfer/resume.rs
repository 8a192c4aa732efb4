//! Saving and resuming transfer runs.
//!
//! A run is persisted as the pretty-printed JSON of its [`Progress`]
//! snapshot, wrapped in a small versioned envelope. Writes go to a temporary
//! sibling file that is renamed over the target, so a crash never leaves a
//! half-written state file behind.
//!
//! On resume, finished chunks stay finished and every other chunk is queued
//! again with a fresh retry budget. Chunk artifact names are stored in the
//! snapshot, so artifacts from the interrupted run are reused as-is.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::progress::{FileState, Progress};

use super::{Job, TransferClient, TransferOptions, Transporter};

/// Current state file format.
pub const STATE_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct SavedRun {
    version: u32,
    progress: Progress,
}

/// Write a progress snapshot to `path`.
///
/// # Errors
///
/// Returns an error if the snapshot cannot be serialized or written.
pub fn save_progress(progress: &Progress, path: &Path) -> Result<()> {
    let saved = SavedRun {
        version: STATE_VERSION,
        progress: progress.clone(),
    };
    let json = serde_json::to_string_pretty(&saved)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let temp_path = temp_path(path);
    let mut file = fs::File::create(&temp_path)?;
    file.write_all(json.as_bytes())?;
    file.sync_all()?;
    drop(file);

    fs::rename(&temp_path, path)?;

    tracing::debug!(
        path = %path.display(),
        files = progress.files.len(),
        "Saved transfer state"
    );

    Ok(())
}

/// Sibling of `path` the snapshot is written to before the rename.
fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Read a progress snapshot written by [`save_progress`].
///
/// # Errors
///
/// Returns [`Error::FileNotFound`] if `path` does not exist, or
/// [`Error::Serialization`] if it is not a state file this version understands.
pub fn load_progress(path: &Path) -> Result<Progress> {
    let contents = fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::FileNotFound(path.display().to_string())
        } else {
            Error::Io(e)
        }
    })?;

    let saved: SavedRun = serde_json::from_str(&contents)?;
    if saved.version != STATE_VERSION {
        return Err(Error::Serialization(format!(
            "unsupported state version {} (expected {STATE_VERSION})",
            saved.version
        )));
    }

    tracing::debug!(
        path = %path.display(),
        files = saved.progress.files.len(),
        "Loaded transfer state"
    );

    Ok(saved.progress)
}

impl TransferClient {
    /// Persist the current progress snapshot to `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the state file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        save_progress(&self.progress(), path)
    }

    /// Build a client that continues a run saved with [`TransferClient::save`].
    ///
    /// Unfinished chunks are queued; files whose chunks all finished but
    /// whose merge never succeeded get a merge job. Rejected files stay
    /// failed. The client still has to be started with
    /// [`TransferClient::run`].
    ///
    /// # Errors
    ///
    /// Returns an error if the state file cannot be loaded.
    pub fn resume(
        transporter: Arc<dyn Transporter>,
        options: TransferOptions,
        path: &Path,
    ) -> Result<Self> {
        let saved = load_progress(path)?;
        let merge_required = transporter.requires_merge();
        let client = Self::new(transporter, options);

        {
            let shared = &client.shared;
            let mut state = shared.lock();
            let mut queued_chunks = 0usize;

            for mut record in saved.files {
                record.reopen(shared.options.retry_limit);

                let file = state.progress.files.len();
                let pending: Vec<usize> = record
                    .chunks
                    .iter()
                    .enumerate()
                    .filter(|(_, c)| !c.state.is_terminal())
                    .map(|(i, _)| i)
                    .collect();
                let needs_merge = merge_required
                    && record.state == FileState::Pending
                    && record.chunks_finished();
                if !merge_required {
                    record.refresh(false);
                }

                state.progress.files.push(record);
                state.merge_scheduled.push(needs_merge);

                queued_chunks += pending.len();
                for chunk in pending {
                    shared.enqueue(&mut state, Job::Chunk { file, chunk });
                }
                if needs_merge {
                    shared.enqueue(&mut state, Job::Merge { file });
                }
            }

            tracing::info!(
                path = %path.display(),
                files = state.progress.files.len(),
                chunks = queued_chunks,
                "Resuming transfer"
            );
        }

        Ok(client)
    }
}
