//! Chunked transfer engine for Ferry.
//!
//! A [`TransferClient`] owns a pool of worker threads draining a shared queue
//! of chunk jobs. Each job calls a [`Transporter`], which does the actual
//! I/O; the client only keeps the books:
//!
//! - Planning chunks for submitted files
//! - Retrying failed chunks within a per-chunk budget
//! - Running the merge step once every chunk of a file is finished
//! - Aggregating per-chunk and per-file state into a [`Progress`] snapshot
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ferry_core::transfer::{TransferClient, TransferOptions};
//!
//! let client = TransferClient::new(Arc::new(my_transporter), TransferOptions::default());
//! client.submit("local/data.bin", "remote/data.bin", 1 << 30)?;
//! client.run(true)?;
//! assert!(client.progress().successful());
//! ```

pub mod resume;
pub mod scratch;

pub use scratch::Scratch;

use std::any::Any;
use std::num::NonZeroUsize;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::file::plan_chunks;
use crate::progress::{AttemptOutcome, ChunkRecord, FileRecord, FileState, Progress};

/// Worker count used when none is configured.
#[must_use]
pub fn default_thread_count() -> usize {
    std::thread::available_parallelism().map_or(4, NonZeroUsize::get)
}

/// What happens to chunk artifacts when a merge fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeCleanup {
    /// Leave them in place for manual recovery or a resumed run
    #[default]
    Keep,
    /// Remove them through [`Transporter::discard`]
    Remove,
}

/// Engine options.
#[derive(Debug, Clone)]
pub struct TransferOptions {
    /// Bytes per chunk
    pub chunk_size: u64,
    /// I/O buffer size handed to the transporter
    pub block_size: u64,
    /// Number of worker threads
    pub thread_count: usize,
    /// Re-attempts per chunk before it is marked failed
    pub retry_limit: u32,
    /// Root for chunk artifacts (None = write into the destination)
    pub scratch_dir: Option<PathBuf>,
    /// Use a per-client subdirectory of `scratch_dir`
    pub scratch_unique: bool,
    /// Artifact handling after a failed merge
    pub merge_cleanup: MergeCleanup,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            chunk_size: crate::DEFAULT_CHUNK_SIZE,
            block_size: crate::DEFAULT_BLOCK_SIZE,
            thread_count: default_thread_count(),
            retry_limit: crate::DEFAULT_RETRY_LIMIT,
            scratch_dir: None,
            scratch_unique: true,
            merge_cleanup: MergeCleanup::Keep,
        }
    }
}

/// Everything a transporter needs to move one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRequest {
    /// Source of the whole file
    pub src: PathBuf,
    /// Final destination of the whole file
    pub dst: PathBuf,
    /// Artifact this chunk is written to
    pub name: PathBuf,
    /// Byte offset of the chunk within the file
    pub offset: u64,
    /// Length of the chunk in bytes
    pub size: u64,
    /// Configured chunk size
    pub chunk_size: u64,
    /// I/O buffer size
    pub block_size: u64,
}

impl ChunkRequest {
    /// Whether the chunk is written straight into the destination.
    ///
    /// Direct chunks are written at `offset`; artifacts start at zero.
    #[must_use]
    pub fn is_direct(&self) -> bool {
        self.name == self.dst
    }

    /// Position in the artifact that corresponds to the start of the chunk.
    #[must_use]
    pub fn write_offset(&self) -> u64 {
        if self.is_direct() {
            self.offset
        } else {
            0
        }
    }
}

/// The I/O capability the engine drives.
///
/// Implementations must be idempotent per chunk: a retried chunk is
/// transferred again from its first byte.
pub trait Transporter: Send + Sync {
    /// Move one chunk and return the number of bytes moved.
    ///
    /// Long transfers should poll `cancel` and return
    /// [`Error::TransferCancelled`] once it fires.
    fn transfer(&self, request: &ChunkRequest, cancel: &CancellationToken) -> Result<u64>;

    /// Whether finished files need a [`Transporter::merge`] call.
    fn requires_merge(&self) -> bool {
        false
    }

    /// Assemble the artifacts, given in offset order, into `dst`.
    fn merge(&self, dst: &Path, artifacts: &[PathBuf], cancel: &CancellationToken) -> Result<()> {
        let _ = (dst, artifacts, cancel);
        Ok(())
    }

    /// Remove artifacts left behind by a failed merge.
    fn discard(&self, artifacts: &[PathBuf]) -> Result<()> {
        let _ = artifacts;
        Ok(())
    }
}

enum Job {
    Chunk { file: usize, chunk: usize },
    Merge { file: usize },
    Stop,
}

struct RunState {
    progress: Progress,
    merge_scheduled: Vec<bool>,
    /// Queued plus running jobs
    outstanding: usize,
    workers: usize,
    started: bool,
    shut_down: bool,
}

struct Shared {
    transporter: Arc<dyn Transporter>,
    options: TransferOptions,
    scratch: Scratch,
    state: Mutex<RunState>,
    idle: Condvar,
    jobs: flume::Sender<Job>,
    queue: flume::Receiver<Job>,
    cancel: CancellationToken,
}

/// Concurrent chunked transfer client.
pub struct TransferClient {
    shared: Arc<Shared>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for TransferClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferClient")
            .field("options", &self.shared.options)
            .field("scratch", &self.shared.scratch)
            .finish_non_exhaustive()
    }
}

impl TransferClient {
    /// Create a client. No threads are started until [`TransferClient::run`].
    #[must_use]
    pub fn new(transporter: Arc<dyn Transporter>, options: TransferOptions) -> Self {
        let scratch = Scratch::new(options.scratch_dir.as_deref(), options.scratch_unique);
        let (jobs, queue) = flume::unbounded();

        Self {
            shared: Arc::new(Shared {
                transporter,
                options,
                scratch,
                state: Mutex::new(RunState {
                    progress: Progress::default(),
                    merge_scheduled: Vec::new(),
                    outstanding: 0,
                    workers: 0,
                    started: false,
                    shut_down: false,
                }),
                idle: Condvar::new(),
                jobs,
                queue,
                cancel: CancellationToken::new(),
            }),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Plan a file and queue its chunks.
    ///
    /// May be called before or after [`TransferClient::run`]; chunks
    /// submitted to a running client are picked up right away.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ClientShutdown`] after [`TransferClient::shutdown`],
    /// [`Error::InvalidConfig`] if the chunk size is zero, or
    /// [`Error::InvalidPath`] if `dst` was already submitted to this client.
    pub fn submit(
        &self,
        src: impl Into<PathBuf>,
        dst: impl Into<PathBuf>,
        total_size: u64,
    ) -> Result<FileRecord> {
        let (src, dst) = (src.into(), dst.into());
        let options = &self.shared.options;

        let chunks: Vec<ChunkRecord> = plan_chunks(total_size, options.chunk_size)?
            .into_iter()
            .map(|range| {
                ChunkRecord::new(
                    self.shared.scratch.artifact(&dst, range.offset),
                    range,
                    options.retry_limit,
                )
            })
            .collect();
        let record = FileRecord::new(src, dst, total_size, chunks);

        let mut state = self.shared.lock();
        if state.shut_down {
            return Err(Error::ClientShutdown);
        }
        // Chunk artifacts are named after the destination.
        if state
            .progress
            .files
            .iter()
            .any(|f| f.dst == record.dst && !f.chunks.is_empty())
        {
            return Err(Error::InvalidPath(format!(
                "{} is already a destination of this run",
                record.dst.display()
            )));
        }

        let file = state.progress.files.len();
        state.progress.files.push(record.clone());
        state.merge_scheduled.push(false);
        for chunk in 0..record.chunks.len() {
            self.shared.enqueue(&mut state, Job::Chunk { file, chunk });
        }

        tracing::debug!(
            src = %record.src.display(),
            dst = %record.dst.display(),
            size = total_size,
            chunks = record.chunks.len(),
            "Submitted file"
        );

        Ok(record)
    }

    /// Record a file that could not be submitted as failed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ClientShutdown`] after [`TransferClient::shutdown`].
    pub fn reject(
        &self,
        src: impl Into<PathBuf>,
        dst: impl Into<PathBuf>,
        reason: impl Into<String>,
    ) -> Result<FileRecord> {
        let record = FileRecord::rejected(src.into(), dst.into(), reason.into());

        let mut state = self.shared.lock();
        if state.shut_down {
            return Err(Error::ClientShutdown);
        }
        state.progress.files.push(record.clone());
        state.merge_scheduled.push(false);

        tracing::warn!(
            src = %record.src.display(),
            dst = %record.dst.display(),
            reason = record.exception.as_deref().unwrap_or_default(),
            "Rejected file"
        );

        Ok(record)
    }

    /// Start the worker pool.
    ///
    /// Starting an already running pool is a no-op. With `monitor`, blocks
    /// until all queued work is done.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ClientShutdown`] after [`TransferClient::shutdown`],
    /// or [`Error::Io`] if a worker thread cannot be spawned.
    pub fn run(&self, monitor: bool) -> Result<()> {
        {
            let mut state = self.shared.lock();
            if state.shut_down {
                return Err(Error::ClientShutdown);
            }

            if !state.started {
                let count = self.shared.options.thread_count.max(1);
                let mut handles = self
                    .handles
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);

                tracing::info!(
                    files = state.progress.files.len(),
                    chunks = state.outstanding,
                    threads = count,
                    "Starting transfer"
                );

                for index in 0..count {
                    let shared = Arc::clone(&self.shared);
                    let spawned = std::thread::Builder::new()
                        .name(format!("ferry-worker-{index}"))
                        .spawn(move || shared.work());
                    match spawned {
                        Ok(handle) => handles.push(handle),
                        Err(err) => {
                            state.workers = handles.len();
                            state.started = state.workers > 0;
                            return Err(Error::Io(err));
                        }
                    }
                }

                state.workers = count;
                state.started = true;
            }
        }

        if monitor {
            self.monitor(None);
        }
        Ok(())
    }

    /// Wait until no work is outstanding or `timeout` elapses.
    ///
    /// Returns whether every file finished. Timing out does not cancel
    /// anything. Returns immediately if the pool was never started.
    pub fn monitor(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.shared.lock();

        if !state.started {
            if state.outstanding > 0 {
                tracing::debug!(
                    outstanding = state.outstanding,
                    "Monitor called before run, not waiting"
                );
            }
            return state.progress.successful();
        }

        while state.outstanding > 0 {
            match deadline {
                None => {
                    state = self
                        .shared
                        .idle
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        tracing::debug!(
                            outstanding = state.outstanding,
                            "Monitor timed out"
                        );
                        break;
                    }
                    state = self
                        .shared
                        .idle
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
        }

        state.progress.successful()
    }

    /// Request cooperative cancellation.
    ///
    /// Fires the cancellation token, drops queued chunks without running
    /// them and stops the workers once they are idle. In-flight transfers
    /// finish or fail on their own. Further submissions are rejected.
    pub fn shutdown(&self) {
        let mut state = self.shared.lock();
        if state.shut_down {
            return;
        }
        state.shut_down = true;
        self.shared.cancel.cancel();

        for _ in 0..state.workers {
            let _ = self.shared.jobs.send(Job::Stop);
        }

        tracing::info!(outstanding = state.outstanding, "Transfer shutdown requested");
        self.shared.idle.notify_all();
    }

    /// Snapshot of every file and chunk.
    pub fn progress(&self) -> Progress {
        self.shared.lock().progress.clone()
    }

    /// Whether work is queued or running.
    pub fn active(&self) -> bool {
        let state = self.shared.lock();
        state.started && state.outstanding > 0
    }

    /// Whether [`TransferClient::shutdown`] was called.
    pub fn is_shut_down(&self) -> bool {
        self.shared.lock().shut_down
    }

    /// The token handed to every transporter call.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shared.cancel.clone()
    }

    /// Options the client was created with.
    pub fn options(&self) -> &TransferOptions {
        &self.shared.options
    }

    /// Directory chunk artifacts are written to, if any.
    pub fn scratch_root(&self) -> Option<&Path> {
        self.shared.scratch.root()
    }

    /// Wait for every worker thread to exit.
    ///
    /// Only returns after [`TransferClient::shutdown`] and once in-flight
    /// transfers have returned.
    pub fn join(&self) {
        let handles: Vec<JoinHandle<()>> = self
            .handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for handle in handles {
            if handle.join().is_err() {
                tracing::error!("Worker thread panicked");
            }
        }
    }
}

impl Drop for TransferClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enqueue(&self, state: &mut RunState, job: Job) {
        if state.shut_down {
            return;
        }
        state.outstanding += 1;
        if self.jobs.send(job).is_err() {
            state.outstanding -= 1;
            tracing::error!("Job queue closed, dropping job");
        }
    }

    fn finish_job(&self, state: &mut RunState) {
        state.outstanding = state.outstanding.saturating_sub(1);
        if state.outstanding == 0 {
            self.idle.notify_all();
        }
    }

    fn work(&self) {
        while let Ok(job) = self.queue.recv() {
            match job {
                Job::Chunk { file, chunk } => self.run_chunk(file, chunk),
                Job::Merge { file } => self.run_merge(file),
                Job::Stop => break,
            }
        }
        tracing::debug!("Worker exiting");
    }

    fn begin_chunk(&self, state: &mut RunState, file: usize, chunk: usize) -> Option<ChunkRequest> {
        if self.cancel.is_cancelled() {
            return None;
        }

        let entry = state.progress.files.get_mut(file)?;
        let (src, dst) = (entry.src.clone(), entry.dst.clone());
        let record = entry.chunks.get_mut(chunk)?;
        if !record.start() {
            return None;
        }

        Some(ChunkRequest {
            src,
            dst,
            name: record.name.clone(),
            offset: record.offset,
            size: record.size,
            chunk_size: self.options.chunk_size,
            block_size: self.options.block_size,
        })
    }

    fn run_chunk(&self, file: usize, chunk: usize) {
        let request = {
            let mut state = self.lock();
            let Some(request) = self.begin_chunk(&mut state, file, chunk) else {
                self.finish_job(&mut state);
                return;
            };
            request
        };

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.transporter.transfer(&request, &self.cancel)
        }))
        .unwrap_or_else(|payload| {
            Err(Error::Internal(format!(
                "transfer callback panicked: {}",
                panic_message(payload.as_ref())
            )))
        });
        let cancelled = self.cancel.is_cancelled();
        let merge_required = self.transporter.requires_merge();

        let mut state = self.lock();
        let entry = &mut state.progress.files[file];
        let before = entry.state;
        let record = &mut entry.chunks[chunk];
        let outcome = record.record_attempt(&result, cancelled);

        match outcome {
            AttemptOutcome::Finished => tracing::debug!(
                dst = %request.dst.display(),
                offset = request.offset,
                bytes = record.actual,
                "Chunk finished"
            ),
            AttemptOutcome::Retry => tracing::warn!(
                dst = %request.dst.display(),
                offset = request.offset,
                retries_left = record.retries_left,
                error = record.exception.as_deref().unwrap_or_default(),
                "Chunk failed, retrying"
            ),
            AttemptOutcome::Failed => tracing::error!(
                dst = %request.dst.display(),
                offset = request.offset,
                attempts = record.attempts,
                error = record.exception.as_deref().unwrap_or_default(),
                "Chunk failed"
            ),
        }

        let after = entry.refresh(merge_required);
        let ready_to_merge = merge_required && after == FileState::Pending && entry.chunks_finished();
        if after != before {
            log_file_state(entry);
        }

        if outcome == AttemptOutcome::Retry {
            self.enqueue(&mut state, Job::Chunk { file, chunk });
        }
        if ready_to_merge && !state.merge_scheduled[file] {
            state.merge_scheduled[file] = true;
            self.enqueue(&mut state, Job::Merge { file });
        }
        self.finish_job(&mut state);
    }

    fn run_merge(&self, file: usize) {
        let (dst, artifacts) = {
            let mut state = self.lock();
            let entry = &state.progress.files[file];
            if self.cancel.is_cancelled() || entry.state.is_terminal() || !entry.chunks_finished() {
                self.finish_job(&mut state);
                return;
            }
            (entry.dst.clone(), entry.artifacts())
        };

        tracing::debug!(
            dst = %dst.display(),
            artifacts = artifacts.len(),
            "Merging chunks"
        );

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.transporter.merge(&dst, &artifacts, &self.cancel)
        }))
        .unwrap_or_else(|payload| {
            Err(Error::Internal(format!(
                "merge callback panicked: {}",
                panic_message(payload.as_ref())
            )))
        })
        .map_err(|err| match err {
            err @ Error::MergeFailed { .. } => err,
            other => Error::MergeFailed {
                dst: dst.display().to_string(),
                reason: other.to_string(),
            },
        });

        if result.is_err() && self.options.merge_cleanup == MergeCleanup::Remove {
            if let Err(err) = self.transporter.discard(&artifacts) {
                tracing::warn!(
                    dst = %dst.display(),
                    error = %err,
                    "Failed to remove chunk artifacts"
                );
            }
        }

        let mut state = self.lock();
        let entry = &mut state.progress.files[file];
        entry.finish_merge(result.as_ref().map(|_| ()));
        log_file_state(entry);
        self.finish_job(&mut state);
    }
}

fn log_file_state(entry: &FileRecord) {
    match entry.state {
        FileState::Finished => tracing::info!(
            src = %entry.src.display(),
            dst = %entry.dst.display(),
            size = entry.total_size,
            "File finished"
        ),
        FileState::Failed => tracing::error!(
            src = %entry.src.display(),
            dst = %entry.dst.display(),
            error = entry.exception.as_deref().unwrap_or_default(),
            "File failed"
        ),
        FileState::Pending => {}
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
