//! Common test utilities for `Ferry` integration tests.
//!
//! Shared fixtures plus a few scripted transporters.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use ferry_core::config::TransferConfig;
use ferry_core::transfer::{ChunkRequest, TransferOptions, Transporter};
use ferry_core::{Error, Result};
use tokio_util::sync::CancellationToken;

/// Create a temporary directory for test files.
pub fn create_temp_dir() -> tempfile::TempDir {
    tempfile::tempdir().expect("Failed to create temp directory")
}

/// Create a test file with the given content.
pub fn create_test_file(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("Failed to create parent directories");
    }
    std::fs::write(&path, content).expect("Failed to write test file");
    path
}

/// Generate random bytes for testing.
pub fn random_bytes(size: usize) -> Vec<u8> {
    use rand::RngCore;
    let mut bytes = vec![0u8; size];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// Assert that two files have identical content.
pub fn assert_files_equal(path1: &Path, path2: &Path) {
    let content1 = std::fs::read(path1).expect("Failed to read first file");
    let content2 = std::fs::read(path2).expect("Failed to read second file");
    assert_eq!(content1, content2, "File contents differ");
}

/// Create a test directory structure with multiple files.
pub fn create_test_directory(base: &Path, name: &str) -> PathBuf {
    let dir = base.join(name);
    std::fs::create_dir_all(&dir).expect("Failed to create test directory");

    create_test_file(&dir, "file1.txt", b"Hello, Ferry!");
    create_test_file(&dir, "file2.bin", &random_bytes(10_000));
    create_test_file(&dir, "empty.txt", b"");
    create_test_file(&dir, "subdir/nested.txt", b"Nested file in subdirectory");

    dir
}

/// Engine options with small chunks for tests.
pub fn options(chunk_size: u64, thread_count: usize) -> TransferOptions {
    TransferOptions {
        chunk_size,
        block_size: 3,
        thread_count,
        retry_limit: 2,
        ..TransferOptions::default()
    }
}

/// Transfer config with small chunks, private scratch and no persistence.
pub fn transfer_config(chunk_size: u64, scratch: &Path) -> TransferConfig {
    TransferConfig {
        chunk_size,
        block_size: 1024,
        thread_count: Some(4),
        retry_limit: 1,
        scratch_dir: Some(scratch.to_path_buf()),
        ..TransferConfig::default()
    }
}

/// Every transferred chunk as (name, offset, size).
#[derive(Default)]
pub struct Recorder {
    pub calls: Mutex<Vec<(PathBuf, u64, u64)>>,
}

impl Recorder {
    pub fn sorted_calls(&self) -> Vec<(PathBuf, u64, u64)> {
        let mut calls = self.calls.lock().unwrap().clone();
        calls.sort();
        calls
    }
}

impl Transporter for Recorder {
    fn transfer(&self, request: &ChunkRequest, _cancel: &CancellationToken) -> Result<u64> {
        self.calls
            .lock()
            .unwrap()
            .push((request.name.clone(), request.offset, request.size));
        Ok(request.size)
    }
}

/// Always reports one byte less than requested.
#[derive(Default)]
pub struct ShortCount {
    pub attempts: AtomicUsize,
}

impl Transporter for ShortCount {
    fn transfer(&self, request: &ChunkRequest, _cancel: &CancellationToken) -> Result<u64> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Ok(request.size.saturating_sub(1))
    }
}

/// Fails the first `failures` attempts of every chunk.
pub struct Flaky {
    failures: usize,
    seen: Mutex<BTreeMap<(PathBuf, u64), usize>>,
}

impl Flaky {
    pub fn new(failures: usize) -> Self {
        Self {
            failures,
            seen: Mutex::new(BTreeMap::new()),
        }
    }
}

impl Transporter for Flaky {
    fn transfer(&self, request: &ChunkRequest, _cancel: &CancellationToken) -> Result<u64> {
        let mut seen = self.seen.lock().unwrap();
        let count = seen.entry((request.dst.clone(), request.offset)).or_insert(0);
        *count += 1;
        if *count <= self.failures {
            return Err(Error::Io(std::io::Error::other("connection reset")));
        }
        Ok(request.size)
    }
}

/// Polls the cancellation token until it fires, then gives up.
#[derive(Default)]
pub struct WaitForCancel {
    pub started: AtomicUsize,
}

impl Transporter for WaitForCancel {
    fn transfer(&self, _request: &ChunkRequest, cancel: &CancellationToken) -> Result<u64> {
        self.started.fetch_add(1, Ordering::SeqCst);
        while !cancel.is_cancelled() {
            std::thread::sleep(Duration::from_millis(5));
        }
        Err(Error::TransferCancelled)
    }
}

/// Keeps chunk payloads in memory and merges them per destination.
#[derive(Default)]
pub struct MemoryMerge {
    pub artifacts: Mutex<BTreeMap<PathBuf, Vec<u8>>>,
    pub merged: Mutex<Vec<(PathBuf, Vec<PathBuf>)>>,
    pub discarded: Mutex<Vec<PathBuf>>,
    pub fail_merge: bool,
}

impl MemoryMerge {
    pub fn failing() -> Self {
        Self {
            fail_merge: true,
            ..Self::default()
        }
    }
}

impl Transporter for MemoryMerge {
    fn transfer(&self, request: &ChunkRequest, _cancel: &CancellationToken) -> Result<u64> {
        let payload = vec![u8::try_from(request.offset % 251).unwrap(); usize::try_from(request.size).unwrap()];
        self.artifacts
            .lock()
            .unwrap()
            .insert(request.name.clone(), payload);
        Ok(request.size)
    }

    fn requires_merge(&self) -> bool {
        true
    }

    fn merge(&self, dst: &Path, artifacts: &[PathBuf], _cancel: &CancellationToken) -> Result<()> {
        self.merged
            .lock()
            .unwrap()
            .push((dst.to_path_buf(), artifacts.to_vec()));
        if self.fail_merge {
            return Err(Error::Io(std::io::Error::other("disk full")));
        }
        Ok(())
    }

    fn discard(&self, artifacts: &[PathBuf]) -> Result<()> {
        let mut store = self.artifacts.lock().unwrap();
        for artifact in artifacts {
            store.remove(artifact);
        }
        self.discarded.lock().unwrap().extend_from_slice(artifacts);
        Ok(())
    }
}

/// Panics on the chunk at `offset`.
pub struct PanicAt {
    pub offset: u64,
}

impl Transporter for PanicAt {
    fn transfer(&self, request: &ChunkRequest, _cancel: &CancellationToken) -> Result<u64> {
        assert_ne!(request.offset, self.offset, "boom at offset {}", self.offset);
        Ok(request.size)
    }
}
