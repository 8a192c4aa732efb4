//! Ferry CLI - Chunked, concurrent file transfers
//!
//! Ferry splits files into chunks and moves them in parallel between the
//! local file system and a store, retrying chunks that fail.
//!
//! ## Quick Start
//!
//! ```bash
//! # Upload a directory tree into a store
//! ferry upload ./photos /backup/photos --store /mnt/bucket
//!
//! # Download it again
//! ferry download /backup/photos ./restored --store /mnt/bucket
//! ```

#![allow(clippy::doc_markdown)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::struct_excessive_bools)]

use anyhow::Result;
use clap::Parser;

mod commands;
pub mod ui;

use commands::{Cli, Command};

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = commands::load_config();

    init_logging(&config.logging.filter, cli.command.verbose());

    match cli.command {
        Command::Upload(args) => commands::upload::run(args, config),
        Command::Download(args) => commands::download::run(args, config),
        Command::Config(args) => commands::config::run(&args, &config),
    }
}

fn init_logging(default_filter: &str, verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("warn,ferry=debug,ferry_core=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).without_time().with_writer(std::io::stderr))
        .with(filter)
        .init();
}
