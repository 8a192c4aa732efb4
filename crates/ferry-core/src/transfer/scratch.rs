//! Naming of temporary chunk artifacts.
//!
//! Without a scratch directory every chunk is written straight into its
//! destination. With one, each chunk gets its own artifact directly under
//! the scratch root:
//!
//! ```text
//! <root>/<dst file name>_<xxh3(dst)>_<offset>
//! ```
//!
//! The digest keeps two destinations with the same file name apart. When the
//! run is unique, `<root>` is a fresh UUID subdirectory of the configured
//! scratch directory; otherwise it is the scratch directory itself, so a
//! later run computes the same names and can pick up leftover artifacts.

use std::path::{Path, PathBuf};

use uuid::Uuid;
use xxhash_rust::xxh3::xxh3_64;

/// Resolves artifact names for one client.
#[derive(Debug, Clone)]
pub struct Scratch {
    root: Option<PathBuf>,
}

impl Scratch {
    /// Create the naming scheme for a run.
    #[must_use]
    pub fn new(scratch_dir: Option<&Path>, unique: bool) -> Self {
        let root = scratch_dir.map(|dir| {
            if unique {
                dir.join(Uuid::new_v4().to_string())
            } else {
                dir.to_path_buf()
            }
        });
        Self { root }
    }

    /// Directory the artifacts live in, if any.
    #[must_use]
    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Artifact path for the chunk of `dst` starting at `offset`.
    #[must_use]
    pub fn artifact(&self, dst: &Path, offset: u64) -> PathBuf {
        let Some(root) = &self.root else {
            return dst.to_path_buf();
        };

        let name = dst
            .file_name()
            .map_or_else(|| "chunk".into(), |n| n.to_string_lossy());
        let digest = xxh3_64(dst.to_string_lossy().as_bytes());
        root.join(format!("{name}_{digest:016x}_{offset}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_scratch_writes_to_destination() {
        let scratch = Scratch::new(None, true);
        assert_eq!(scratch.root(), None);
        assert_eq!(
            scratch.artifact(Path::new("bar"), 8),
            PathBuf::from("bar")
        );
    }

    #[test]
    fn test_fixed_scratch_root() {
        let scratch = Scratch::new(Some(Path::new("/tmp")), false);
        let artifact = scratch.artifact(Path::new("bar"), 0);
        assert_eq!(artifact.parent(), Some(Path::new("/tmp")));
        assert!(artifact
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("bar_"));
        assert!(artifact.to_string_lossy().ends_with("_0"));

        let again = Scratch::new(Some(Path::new("/tmp")), false);
        assert_eq!(again.artifact(Path::new("bar"), 0), artifact);
    }

    #[test]
    fn test_unique_scratch_root_differs_per_run() {
        let first = Scratch::new(Some(Path::new("/tmp")), true);
        let second = Scratch::new(Some(Path::new("/tmp")), true);
        assert_ne!(first.root(), second.root());
        assert_eq!(first.root().unwrap().parent(), Some(Path::new("/tmp")));
    }

    #[test]
    fn test_same_name_different_directories() {
        let scratch = Scratch::new(Some(Path::new("/tmp")), false);
        assert_ne!(
            scratch.artifact(Path::new("a/data.bin"), 0),
            scratch.artifact(Path::new("b/data.bin"), 0)
        );
        assert_ne!(
            scratch.artifact(Path::new("a/data.bin"), 0),
            scratch.artifact(Path::new("a/data.bin"), 8)
        );
    }
}
