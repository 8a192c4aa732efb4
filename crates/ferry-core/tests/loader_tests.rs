//! Upload and download tests against a directory-backed store.

mod common;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ferry_core::loader::{Downloader, Uploader};
use ferry_core::remote::{LocalStore, RemoteEntry, RemoteStore, WalkEntry};
use ferry_core::{Error, FileState, Result};

use common::{assert_files_equal, create_temp_dir, create_test_directory, create_test_file, transfer_config};

#[test]
fn test_directory_round_trip() {
    let local = create_temp_dir();
    let bucket = create_temp_dir();
    let scratch = create_temp_dir();
    let source = create_test_directory(local.path(), "tree");

    let store: Arc<dyn RemoteStore> = Arc::new(LocalStore::new(bucket.path()));
    let config = transfer_config(1000, scratch.path());

    let uploader = Uploader::new(Arc::clone(&store), &source, "/backup/tree", &config).expect("plan upload");
    assert!(uploader.run(None).expect("upload"));

    let progress = uploader.progress();
    assert_eq!(progress.files.len(), 4);
    assert_eq!(progress.total_bytes(), 13 + 10_000 + 27);
    for name in ["file1.txt", "file2.bin", "empty.txt", "subdir/nested.txt"] {
        assert_files_equal(&source.join(name), &bucket.path().join("backup/tree").join(name));
    }

    let target = local.path().join("restored");
    let downloader = Downloader::new(store, "/backup/tree", &target, &config).expect("plan download");
    assert!(downloader.run(None).expect("download"));

    for name in ["file1.txt", "file2.bin", "empty.txt", "subdir/nested.txt"] {
        assert_files_equal(&source.join(name), &target.join(name));
    }
    assert_eq!(std::fs::metadata(target.join("empty.txt")).expect("empty file").len(), 0);
}

#[test]
fn test_upload_through_concat() {
    let local = create_temp_dir();
    let bucket = create_temp_dir();
    let scratch = create_temp_dir();
    let source = create_test_directory(local.path(), "tree");

    let store = Arc::new(LocalStore::new(bucket.path()).without_range_write());
    let uploader = Uploader::new(store, &source, "/data/tree", &transfer_config(999, scratch.path()))
        .expect("plan upload");

    let scratch_root = uploader.client().scratch_root().expect("remote scratch").to_path_buf();
    assert!(scratch_root.starts_with("/data/.ferry-tmp"));
    let progress = uploader.progress();
    let big = progress
        .files
        .iter()
        .find(|f| f.dst.ends_with("file2.bin"))
        .expect("file2.bin planned");
    assert_eq!(big.chunks.len(), 11);
    assert!(big.chunks.iter().all(|c| c.name != big.dst));

    assert!(uploader.run(None).expect("upload"));

    for name in ["file1.txt", "file2.bin", "empty.txt", "subdir/nested.txt"] {
        assert_files_equal(&source.join(name), &bucket.path().join("data/tree").join(name));
    }
    let leftovers: Vec<_> = walkdir::WalkDir::new(bucket.path().join("data/.ferry-tmp"))
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|e| e.file_type().is_file())
        .collect();
    assert!(leftovers.is_empty(), "artifacts are removed after concat");
    assert!(
        !bucket.path().join("data/.ferry-tmp").exists(),
        "remote scratch directory is removed after a successful run"
    );
}

#[test]
fn test_existing_destination_is_rejected() {
    let local = create_temp_dir();
    let bucket = create_temp_dir();
    let scratch = create_temp_dir();
    let source = create_test_file(local.path(), "a.txt", b"new content");
    create_test_file(bucket.path(), "a.txt", b"old");

    let store = Arc::new(LocalStore::new(bucket.path()));
    let mut config = transfer_config(4, scratch.path());

    let uploader = Uploader::new(store.clone(), &source, "/a.txt", &config).expect("plan upload");
    assert!(!uploader.run(None).expect("upload"));
    let progress = uploader.progress();
    let file = &progress.files[0];
    assert_eq!(file.state, FileState::Failed);
    assert!(file.exception.as_deref().expect("reason").contains("already exists"));
    assert_eq!(std::fs::read(bucket.path().join("a.txt")).expect("read"), b"old");

    config.overwrite = true;
    let uploader = Uploader::new(store, &source, "/a.txt", &config).expect("plan upload");
    assert!(uploader.run(None).expect("upload"));
    assert_eq!(std::fs::read(bucket.path().join("a.txt")).expect("read"), b"new content");
}

#[test]
fn test_single_file_into_existing_directory() {
    let local = create_temp_dir();
    let bucket = create_temp_dir();
    let scratch = create_temp_dir();
    let source = create_test_file(local.path(), "report.csv", b"a,b,c\n1,2,3\n");
    std::fs::create_dir_all(bucket.path().join("inbox")).expect("mkdir");

    let store: Arc<dyn RemoteStore> = Arc::new(LocalStore::new(bucket.path()));
    let config = transfer_config(5, scratch.path());

    let uploader = Uploader::new(Arc::clone(&store), &source, "/inbox", &config).expect("plan upload");
    assert!(uploader.run(None).expect("upload"));
    assert_files_equal(&source, &bucket.path().join("inbox/report.csv"));

    let downloads = local.path().join("downloads");
    std::fs::create_dir_all(&downloads).expect("mkdir");
    let downloader =
        Downloader::new(store, "/inbox/report.csv", &downloads, &config).expect("plan download");
    assert!(downloader.run(None).expect("download"));
    assert_files_equal(&source, &downloads.join("report.csv"));
}

#[test]
fn test_missing_sources() {
    let local = create_temp_dir();
    let bucket = create_temp_dir();
    let scratch = create_temp_dir();
    let store: Arc<dyn RemoteStore> = Arc::new(LocalStore::new(bucket.path()));
    let config = transfer_config(8, scratch.path());

    let result = Uploader::new(Arc::clone(&store), local.path().join("nope"), "/x", &config);
    assert!(matches!(result, Err(Error::FileNotFound(_))));

    let result = Downloader::new(store, "/nope", local.path().join("x"), &config);
    assert!(matches!(result, Err(Error::FileNotFound(_))));
}

#[test]
fn test_unsuccessful_download_persists_state() {
    let local = create_temp_dir();
    let bucket = create_temp_dir();
    let scratch = create_temp_dir();
    create_test_file(bucket.path(), "remote/one.txt", b"first");
    create_test_file(bucket.path(), "remote/two.txt", b"second");

    let target = local.path().join("out");
    create_test_file(&target, "two.txt", b"keep me");

    let state = local.path().join("state.json");
    let mut config = transfer_config(2, scratch.path());
    config.persist_path = Some(state.clone());

    let store = Arc::new(LocalStore::new(bucket.path()));
    let downloader = Downloader::new(store, "/remote", &target, &config).expect("plan download");
    assert!(!downloader.run(None).expect("download"));

    assert_eq!(std::fs::read(target.join("one.txt")).expect("read"), b"first");
    assert_eq!(std::fs::read(target.join("two.txt")).expect("read"), b"keep me");
    assert!(state.exists(), "state saved after unsuccessful run");

    let saved = ferry_core::transfer::resume::load_progress(&state).expect("load state");
    assert_eq!(saved.files.len(), 2);
    assert_eq!(saved.files[0].state, FileState::Finished);
    assert_eq!(saved.files[1].state, FileState::Failed);
}

#[test]
fn test_download_leaves_no_artifacts() {
    let local = create_temp_dir();
    let bucket = create_temp_dir();
    let scratch = create_temp_dir();
    let payload = common::random_bytes(4096);
    create_test_file(bucket.path(), "blob.bin", &payload);

    let store = Arc::new(LocalStore::new(bucket.path()));
    let target = local.path().join("blob.bin");
    let downloader =
        Downloader::new(store, "/blob.bin", &target, &transfer_config(100, scratch.path()))
            .expect("plan download");

    let progress = downloader.progress();
    assert_eq!(progress.files[0].chunks.len(), 41);
    assert!(progress.files[0]
        .chunks
        .iter()
        .all(|c| c.name.starts_with(scratch.path())));

    assert!(downloader.run(None).expect("download"));
    assert_eq!(std::fs::read(&target).expect("read"), payload);
    assert!(is_empty_dir(scratch.path()));
}

#[test]
fn test_download_keeps_configured_scratch_dir() {
    let local = create_temp_dir();
    let bucket = create_temp_dir();
    create_test_file(bucket.path(), "blob.bin", &common::random_bytes(300));

    let scratch = local.path().join("mine");
    std::fs::create_dir_all(&scratch).expect("mkdir");
    let mut config = transfer_config(100, &scratch);
    config.scratch_unique = false;

    let store = Arc::new(LocalStore::new(bucket.path()));
    let downloader =
        Downloader::new(store, "/blob.bin", local.path().join("blob.bin"), &config).expect("plan download");
    assert!(downloader.run(None).expect("download"));

    assert!(scratch.is_dir(), "configured scratch directory survives the run");
    assert!(is_empty_dir(&scratch));
}

/// Directory store whose listing reports one entry as unreadable.
struct PartlyUnreadable {
    inner: LocalStore,
    unreadable: PathBuf,
}

impl RemoteStore for PartlyUnreadable {
    fn stat(&self, path: &Path) -> Result<Option<RemoteEntry>> {
        self.inner.stat(path)
    }

    fn walk(&self, path: &Path) -> Result<Vec<WalkEntry>> {
        let mut entries = self.inner.walk(path)?;
        entries.push(WalkEntry::Unreadable {
            path: self.unreadable.clone(),
            reason: "permission denied".to_string(),
        });
        entries.sort_by(|a, b| a.path().cmp(b.path()));
        Ok(entries)
    }

    fn read_at(&self, path: &Path, offset: u64, buf: &mut [u8]) -> Result<usize> {
        self.inner.read_at(path, offset, buf)
    }

    fn write_at(&self, path: &Path, offset: u64, data: &[u8]) -> Result<()> {
        self.inner.write_at(path, offset, data)
    }

    fn concat(&self, dst: &Path, parts: &[PathBuf]) -> Result<()> {
        self.inner.concat(dst, parts)
    }

    fn remove(&self, path: &Path) -> Result<()> {
        self.inner.remove(path)
    }
}

#[test]
fn test_unreadable_remote_entry_fails_only_that_file() {
    let local = create_temp_dir();
    let bucket = create_temp_dir();
    let scratch = create_temp_dir();
    create_test_file(bucket.path(), "remote/a.txt", b"alpha");
    create_test_file(bucket.path(), "remote/c.txt", b"gamma");

    let store = Arc::new(PartlyUnreadable {
        inner: LocalStore::new(bucket.path()),
        unreadable: PathBuf::from("/remote/b-locked"),
    });
    let target = local.path().join("out");
    let downloader = Downloader::new(store, "/remote", &target, &transfer_config(2, scratch.path()))
        .expect("plan download");
    assert!(!downloader.run(None).expect("download"));

    let progress = downloader.progress();
    assert_eq!(progress.files.len(), 3);
    let locked = &progress.files[1];
    assert_eq!(locked.src, PathBuf::from("/remote/b-locked"));
    assert_eq!(locked.dst, target.join("b-locked"));
    assert_eq!(locked.state, FileState::Failed);
    assert!(locked.chunks.is_empty());
    assert_eq!(locked.exception.as_deref(), Some("permission denied"));

    assert_eq!(std::fs::read(target.join("a.txt")).expect("read"), b"alpha");
    assert_eq!(std::fs::read(target.join("c.txt")).expect("read"), b"gamma");
}

fn is_empty_dir(path: &Path) -> bool {
    std::fs::read_dir(path).map_or(true, |mut entries| entries.next().is_none())
}
