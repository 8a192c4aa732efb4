//! Transfer progress records and their state machine.
//!
//! A [`Progress`] holds one [`FileRecord`] per submitted file, in submission
//! order, and each file holds its [`ChunkRecord`]s in offset order.
//!
//! ## Chunk States
//!
//! ```text
//! pending -> running -> finished
//!               |
//!               +-> pending   (error or short count, retry budget left)
//!               +-> failed    (budget exhausted, cancelled, unrecoverable)
//! ```
//!
//! `finished` and `failed` are terminal. The file state is derived from its
//! chunks plus the outcome of the merge step, when one is configured.
//!
//! Records are only mutated by the transfer engine; callers receive cloned
//! snapshots.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::file::ChunkRange;

/// State of a single chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkState {
    /// Queued, waiting for a worker
    Pending,
    /// A worker is running the transfer callback
    Running,
    /// Transferred and verified
    Finished,
    /// Gave up on this chunk
    Failed,
}

impl ChunkState {
    /// Whether the chunk can no longer change state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }
}

/// State of a whole file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileState {
    /// Chunks or the merge are still outstanding
    Pending,
    /// Every chunk finished and the merge (if any) succeeded
    Finished,
    /// A chunk exhausted its retries, the merge failed, or the file was rejected
    Failed,
}

impl FileState {
    /// Whether the file can no longer change state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }
}

/// What happened after recording one transfer attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// The chunk is finished
    Finished,
    /// The chunk went back to pending and must be queued again
    Retry,
    /// The chunk is terminally failed
    Failed,
}

/// Progress of one chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// Path of the chunk's artifact
    pub name: PathBuf,
    /// Byte offset within the file
    pub offset: u64,
    /// Length of the chunk in bytes
    pub size: u64,
    /// Current state
    pub state: ChunkState,
    /// Bytes the chunk must move
    pub expected: u64,
    /// Bytes moved by the last successful attempt
    pub actual: u64,
    /// Last failure, cleared when an attempt succeeds
    pub exception: Option<String>,
    /// Remaining retry budget
    pub retries_left: u32,
    /// Number of times the transfer callback ran for this chunk
    pub attempts: u32,
}

impl ChunkRecord {
    /// Create a pending chunk record.
    #[must_use]
    pub fn new(name: PathBuf, range: ChunkRange, retry_limit: u32) -> Self {
        Self {
            name,
            offset: range.offset,
            size: range.size,
            state: ChunkState::Pending,
            expected: range.size,
            actual: 0,
            exception: None,
            retries_left: retry_limit,
            attempts: 0,
        }
    }

    /// Move a pending chunk to running.
    ///
    /// Returns `false` (and changes nothing) if the chunk is not pending.
    pub fn start(&mut self) -> bool {
        if self.state != ChunkState::Pending {
            return false;
        }
        self.state = ChunkState::Running;
        self.attempts += 1;
        true
    }

    /// Record the outcome of a transfer attempt for a running chunk.
    ///
    /// A byte count different from `expected` counts as a failed attempt.
    /// When `cancelled` is set, a failed attempt is terminal regardless of
    /// the remaining budget.
    pub fn record_attempt(
        &mut self,
        result: &Result<u64, Error>,
        cancelled: bool,
    ) -> AttemptOutcome {
        if self.state != ChunkState::Running {
            return if self.state == ChunkState::Finished {
                AttemptOutcome::Finished
            } else {
                AttemptOutcome::Failed
            };
        }

        let error = match result {
            Ok(moved) if *moved == self.expected => {
                self.actual = *moved;
                self.exception = None;
                self.state = ChunkState::Finished;
                return AttemptOutcome::Finished;
            }
            Ok(moved) => {
                self.actual = *moved;
                Error::ByteCountMismatch {
                    expected: self.expected,
                    actual: *moved,
                }
            }
            Err(err) => return self.fail_attempt(err.to_string(), err.is_recoverable(), cancelled),
        };

        self.fail_attempt(error.to_string(), true, cancelled)
    }

    fn fail_attempt(&mut self, message: String, recoverable: bool, cancelled: bool) -> AttemptOutcome {
        self.exception = Some(message);
        if recoverable && !cancelled && self.retries_left > 0 {
            self.retries_left -= 1;
            self.state = ChunkState::Pending;
            AttemptOutcome::Retry
        } else {
            self.state = ChunkState::Failed;
            AttemptOutcome::Failed
        }
    }

    /// Put a non-finished chunk back to pending with a fresh budget.
    ///
    /// Used when resuming a saved run.
    pub fn reset(&mut self, retry_limit: u32) {
        if self.state == ChunkState::Finished {
            return;
        }
        self.state = ChunkState::Pending;
        self.actual = 0;
        self.retries_left = retry_limit;
    }
}

/// Progress of one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Source path
    pub src: PathBuf,
    /// Destination path
    pub dst: PathBuf,
    /// Size of the file as submitted
    pub total_size: u64,
    /// Chunks in offset order
    pub chunks: Vec<ChunkRecord>,
    /// Current state
    pub state: FileState,
    /// Reason the file failed
    pub exception: Option<String>,
}

impl FileRecord {
    /// Create a pending file record from already-built chunks.
    #[must_use]
    pub fn new(src: PathBuf, dst: PathBuf, total_size: u64, chunks: Vec<ChunkRecord>) -> Self {
        Self {
            src,
            dst,
            total_size,
            chunks,
            state: FileState::Pending,
            exception: None,
        }
    }

    /// Create a file record that failed before any chunk was planned.
    #[must_use]
    pub fn rejected(src: PathBuf, dst: PathBuf, reason: String) -> Self {
        Self {
            src,
            dst,
            total_size: 0,
            chunks: Vec::new(),
            state: FileState::Failed,
            exception: Some(reason),
        }
    }

    /// Reopen an unfinished file so its remaining chunks run again.
    ///
    /// Finished files and rejected files (no chunks) are left alone.
    pub fn reopen(&mut self, retry_limit: u32) {
        if self.chunks.is_empty() || self.state == FileState::Finished {
            return;
        }
        for chunk in &mut self.chunks {
            chunk.reset(retry_limit);
        }
        self.state = FileState::Pending;
        self.exception = None;
    }

    /// Whether every chunk is finished.
    #[must_use]
    pub fn chunks_finished(&self) -> bool {
        !self.chunks.is_empty() && self.chunks.iter().all(|c| c.state == ChunkState::Finished)
    }

    /// Number of finished chunks.
    #[must_use]
    pub fn finished_chunks(&self) -> usize {
        self.chunks
            .iter()
            .filter(|c| c.state == ChunkState::Finished)
            .count()
    }

    /// Artifact names in offset order.
    #[must_use]
    pub fn artifacts(&self) -> Vec<PathBuf> {
        let mut chunks: Vec<&ChunkRecord> = self.chunks.iter().collect();
        chunks.sort_by_key(|c| c.offset);
        chunks.into_iter().map(|c| c.name.clone()).collect()
    }

    /// Recompute the file state after a chunk changed.
    ///
    /// With `merge_required`, a file whose chunks all finished stays pending
    /// until [`FileRecord::finish_merge`] is called.
    pub fn refresh(&mut self, merge_required: bool) -> FileState {
        if self.state.is_terminal() {
            return self.state;
        }

        if let Some(chunk) = self.chunks.iter().find(|c| c.state == ChunkState::Failed) {
            self.state = FileState::Failed;
            self.exception = Some(format!(
                "chunk at offset {} failed: {}",
                chunk.offset,
                chunk.exception.as_deref().unwrap_or("unknown error")
            ));
        } else if self.chunks_finished() && !merge_required {
            self.state = FileState::Finished;
        }

        self.state
    }

    /// Apply the outcome of the merge step.
    pub fn finish_merge(&mut self, result: Result<(), &Error>) -> FileState {
        if self.state.is_terminal() {
            return self.state;
        }

        match result {
            Ok(()) if self.chunks_finished() => {
                self.state = FileState::Finished;
                self.exception = None;
            }
            Ok(()) => {
                self.state = FileState::Failed;
                self.exception = Some("merge ran before all chunks finished".to_string());
            }
            Err(err) => {
                self.state = FileState::Failed;
                self.exception = Some(err.to_string());
            }
        }

        self.state
    }
}

/// Counts of records by state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateCounts {
    /// Records not yet started (or waiting on a merge, for files)
    pub pending: usize,
    /// Chunks currently being transferred
    pub running: usize,
    /// Records finished
    pub finished: usize,
    /// Records failed
    pub failed: usize,
}

/// Snapshot of a whole run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    /// Files in submission order
    pub files: Vec<FileRecord>,
}

impl Progress {
    /// True iff every file is finished.
    #[must_use]
    pub fn successful(&self) -> bool {
        self.files.iter().all(|f| f.state == FileState::Finished)
    }

    /// Total bytes across all files.
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.total_size).sum()
    }

    /// Bytes in finished chunks.
    #[must_use]
    pub fn bytes_transferred(&self) -> u64 {
        self.files
            .iter()
            .flat_map(|f| &f.chunks)
            .filter(|c| c.state == ChunkState::Finished)
            .map(|c| c.actual)
            .sum()
    }

    /// Overall progress as a percentage (0.0 - 100.0).
    #[must_use]
    pub fn percentage(&self) -> f64 {
        let total = self.total_bytes();
        if total == 0 {
            if self.successful() {
                100.0
            } else {
                0.0
            }
        } else {
            (self.bytes_transferred() as f64 / total as f64) * 100.0
        }
    }

    /// Chunk counts by state.
    #[must_use]
    pub fn chunk_counts(&self) -> StateCounts {
        let mut counts = StateCounts::default();
        for chunk in self.files.iter().flat_map(|f| &f.chunks) {
            match chunk.state {
                ChunkState::Pending => counts.pending += 1,
                ChunkState::Running => counts.running += 1,
                ChunkState::Finished => counts.finished += 1,
                ChunkState::Failed => counts.failed += 1,
            }
        }
        counts
    }

    /// File counts by state.
    #[must_use]
    pub fn file_counts(&self) -> StateCounts {
        let mut counts = StateCounts::default();
        for file in &self.files {
            match file.state {
                FileState::Pending => counts.pending += 1,
                FileState::Finished => counts.finished += 1,
                FileState::Failed => counts.failed += 1,
            }
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(offset: u64, size: u64, retry_limit: u32) -> ChunkRecord {
        ChunkRecord::new(
            PathBuf::from(format!("tmp/out_{offset}")),
            ChunkRange { offset, size },
            retry_limit,
        )
    }

    fn file_with(chunks: Vec<ChunkRecord>) -> FileRecord {
        let total = chunks.iter().map(|c| c.size).sum();
        FileRecord::new("src".into(), "dst".into(), total, chunks)
    }

    #[test]
    fn test_new_chunk_is_pending() {
        let c = chunk(8, 8, 2);
        assert_eq!(c.state, ChunkState::Pending);
        assert_eq!(c.expected, 8);
        assert_eq!(c.actual, 0);
        assert_eq!(c.retries_left, 2);
    }

    #[test]
    fn test_successful_attempt_finishes() {
        let mut c = chunk(0, 8, 2);
        assert!(c.start());
        assert_eq!(c.state, ChunkState::Running);
        assert_eq!(c.record_attempt(&Ok(8), false), AttemptOutcome::Finished);
        assert_eq!(c.state, ChunkState::Finished);
        assert_eq!(c.actual, 8);
        assert_eq!(c.exception, None);
    }

    #[test]
    fn test_start_requires_pending() {
        let mut c = chunk(0, 8, 0);
        assert!(c.start());
        assert!(!c.start(), "running chunk must not start twice");
        c.record_attempt(&Ok(8), false);
        assert!(!c.start(), "finished chunk must not restart");
    }

    #[test]
    fn test_mismatch_retries_then_fails() {
        let mut c = chunk(0, 8, 2);
        let mut failures = 0;
        loop {
            assert!(c.start());
            match c.record_attempt(&Ok(3), false) {
                AttemptOutcome::Retry => failures += 1,
                AttemptOutcome::Failed => {
                    failures += 1;
                    break;
                }
                AttemptOutcome::Finished => panic!("mismatch must not finish"),
            }
        }
        assert_eq!(failures, 3, "retry_limit + 1 failed attempts");
        assert_eq!(c.state, ChunkState::Failed);
        assert_eq!(c.attempts, 3);
        assert!(c.exception.as_deref().unwrap().contains("expected 8"));
    }

    #[test]
    fn test_retry_clears_exception_on_success() {
        let mut c = chunk(0, 4, 1);
        c.start();
        let err = Err(Error::Io(std::io::Error::other("reset")));
        assert_eq!(c.record_attempt(&err, false), AttemptOutcome::Retry);
        assert!(c.exception.is_some());
        c.start();
        assert_eq!(c.record_attempt(&Ok(4), false), AttemptOutcome::Finished);
        assert_eq!(c.exception, None);
    }

    #[test]
    fn test_cancelled_attempt_is_terminal() {
        let mut c = chunk(0, 4, 5);
        c.start();
        assert_eq!(
            c.record_attempt(&Err(Error::TransferCancelled), true),
            AttemptOutcome::Failed
        );
        assert_eq!(c.state, ChunkState::Failed);
        assert_eq!(c.retries_left, 5);
    }

    #[test]
    fn test_terminal_states_never_change() {
        let mut c = chunk(0, 4, 0);
        c.start();
        c.record_attempt(&Ok(1), false);
        assert_eq!(c.state, ChunkState::Failed);

        assert!(!c.start());
        assert_eq!(c.record_attempt(&Ok(4), false), AttemptOutcome::Failed);
        assert_eq!(c.state, ChunkState::Failed);
    }

    #[test]
    fn test_reset_keeps_finished_chunks() {
        let mut done = chunk(0, 4, 1);
        done.start();
        done.record_attempt(&Ok(4), false);
        done.reset(3);
        assert_eq!(done.state, ChunkState::Finished);

        let mut failed = chunk(4, 4, 0);
        failed.start();
        failed.record_attempt(&Ok(0), false);
        failed.reset(3);
        assert_eq!(failed.state, ChunkState::Pending);
        assert_eq!(failed.retries_left, 3);
    }

    #[test]
    fn test_reopen_failed_file() {
        let mut f = file_with(vec![chunk(0, 8, 0), chunk(8, 8, 0)]);
        f.chunks[0].start();
        f.chunks[0].record_attempt(&Ok(8), false);
        f.chunks[1].start();
        f.chunks[1].record_attempt(&Ok(1), false);
        assert_eq!(f.refresh(false), FileState::Failed);

        f.reopen(2);
        assert_eq!(f.state, FileState::Pending);
        assert_eq!(f.exception, None);
        assert_eq!(f.chunks[0].state, ChunkState::Finished);
        assert_eq!(f.chunks[1].state, ChunkState::Pending);
        assert_eq!(f.chunks[1].retries_left, 2);

        let mut rejected = FileRecord::rejected("a".into(), "b".into(), "gone".into());
        rejected.reopen(2);
        assert_eq!(rejected.state, FileState::Failed);
    }

    #[test]
    fn test_file_finishes_without_merge() {
        let mut f = file_with(vec![chunk(0, 8, 0), chunk(8, 8, 0)]);
        f.chunks[1].start();
        f.chunks[1].record_attempt(&Ok(8), false);
        assert_eq!(f.refresh(false), FileState::Pending);

        f.chunks[0].start();
        f.chunks[0].record_attempt(&Ok(8), false);
        assert_eq!(f.refresh(false), FileState::Finished);
    }

    #[test]
    fn test_file_waits_for_merge() {
        let mut f = file_with(vec![chunk(0, 8, 0)]);
        f.chunks[0].start();
        f.chunks[0].record_attempt(&Ok(8), false);
        assert_eq!(f.refresh(true), FileState::Pending);
        assert!(f.chunks_finished());
        assert_eq!(f.finish_merge(Ok(())), FileState::Finished);
    }

    #[test]
    fn test_merge_failure_fails_file() {
        let mut f = file_with(vec![chunk(0, 8, 0)]);
        f.chunks[0].start();
        f.chunks[0].record_attempt(&Ok(8), false);
        f.refresh(true);
        let err = Error::Io(std::io::Error::other("disk full"));
        assert_eq!(f.finish_merge(Err(&err)), FileState::Failed);
        assert!(f.exception.as_deref().unwrap().contains("disk full"));
        assert_eq!(f.finish_merge(Ok(())), FileState::Failed);
    }

    #[test]
    fn test_failed_chunk_fails_file() {
        let mut f = file_with(vec![chunk(0, 8, 0), chunk(8, 8, 0)]);
        f.chunks[0].start();
        f.chunks[0].record_attempt(&Ok(2), false);
        assert_eq!(f.refresh(false), FileState::Failed);
        assert!(f.exception.as_deref().unwrap().contains("offset 0"));
    }

    #[test]
    fn test_artifacts_sorted_by_offset() {
        let f = file_with(vec![chunk(16, 8, 0), chunk(0, 8, 0), chunk(8, 8, 0)]);
        assert_eq!(
            f.artifacts(),
            vec![
                PathBuf::from("tmp/out_0"),
                PathBuf::from("tmp/out_8"),
                PathBuf::from("tmp/out_16"),
            ]
        );
    }

    #[test]
    fn test_progress_aggregates() {
        let mut done = file_with(vec![chunk(0, 8, 0), chunk(8, 8, 0)]);
        for c in &mut done.chunks {
            c.start();
            c.record_attempt(&Ok(8), false);
        }
        done.refresh(false);
        let pending = file_with(vec![chunk(0, 16, 0)]);

        let progress = Progress {
            files: vec![done, pending],
        };
        assert!(!progress.successful());
        assert_eq!(progress.total_bytes(), 32);
        assert_eq!(progress.bytes_transferred(), 16);
        assert!((progress.percentage() - 50.0).abs() < f64::EPSILON);
        assert_eq!(progress.chunk_counts().finished, 2);
        assert_eq!(progress.chunk_counts().pending, 1);
        assert_eq!(progress.file_counts().finished, 1);
        assert_eq!(progress.file_counts().pending, 1);
    }

    #[test]
    fn test_empty_progress_is_successful() {
        let progress = Progress::default();
        assert!(progress.successful());
        assert!((progress.percentage() - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_rejected_file() {
        let f = FileRecord::rejected("a".into(), "b".into(), "missing".into());
        assert_eq!(f.state, FileState::Failed);
        assert!(!f.chunks_finished());
        let progress = Progress { files: vec![f] };
        assert!(!progress.successful());
    }

    #[test]
    fn test_snapshot_serializes_states_lowercase() {
        let f = file_with(vec![chunk(0, 4, 1)]);
        let json = serde_json::to_string(&f).unwrap();
        assert!(json.contains("\"state\":\"pending\""));
        let back: FileRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, f);
    }
}
