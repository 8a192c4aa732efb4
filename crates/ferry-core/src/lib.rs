//! # Ferry Core Library
//!
//! `ferry-core` moves large files and directory trees between the local file
//! system and a remote store by splitting each file into fixed-size chunks
//! and transferring them concurrently.
//!
//! ## Features
//!
//! - **Chunked transfers**: Files are split into byte ranges moved in parallel
//! - **Retries**: Each chunk gets its own retry budget
//! - **Merging**: Chunk artifacts are assembled once a file is complete
//! - **Cancellation**: Runs can be stopped cooperatively at any time
//! - **Resume**: Progress snapshots can be saved and picked up later
//!
//! ## Modules
//!
//! - [`config`] - Configuration management
//! - [`mod@file`] - Chunk planning and local file enumeration
//! - [`loader`] - Upload and download orchestration
//! - [`progress`] - Per-file and per-chunk progress records
//! - [`remote`] - Remote store abstraction and a directory-backed store
//! - [`transfer`] - Concurrent chunk transfer engine
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ferry_core::{config::Config, loader::Uploader, remote::LocalStore};
//!
//! let config = Config::load()?;
//! let store = Arc::new(LocalStore::new("/srv/bucket"));
//! let uploader = Uploader::new(store, "data", "/backup/data", &config.transfer)?;
//! let successful = uploader.run(None)?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_precision_loss)]

pub mod config;
pub mod error;
pub mod file;
pub mod loader;
pub mod progress;
pub mod remote;
pub mod transfer;

pub use error::{Error, Result};
pub use progress::{ChunkRecord, ChunkState, FileRecord, FileState, Progress};
pub use transfer::{ChunkRequest, TransferClient, TransferOptions, Transporter};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default chunk size for file transfers (256 MiB)
pub const DEFAULT_CHUNK_SIZE: u64 = 256 * 1024 * 1024;

/// Default I/O buffer size inside one chunk transfer (4 MiB)
pub const DEFAULT_BLOCK_SIZE: u64 = 4 * 1024 * 1024;

/// Default number of re-attempts per chunk
pub const DEFAULT_RETRY_LIMIT: u32 = 3;
