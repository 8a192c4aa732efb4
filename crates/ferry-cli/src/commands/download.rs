//! Download command implementation.

use anyhow::{Context, Result};

use ferry_core::config::Config;
use ferry_core::file::format_size;
use ferry_core::loader::Downloader;

use super::DownloadArgs;
use crate::ui::{self, Output};

/// Run the download command.
pub fn run(args: DownloadArgs, mut config: Config) -> Result<()> {
    args.transfer.apply(&mut config.transfer)?;
    let store = args.transfer.open_store()?;

    let downloader = match &args.transfer.resume {
        Some(state) => Downloader::resume(store, state, &config.transfer)
            .with_context(|| format!("Failed to resume download from {}", state.display()))?,
        None => Downloader::new(store, &args.remote, &args.local, &config.transfer)
            .with_context(|| format!("Failed to plan download of {}", args.remote.display()))?,
    };

    let output = args.transfer.output();
    if output == Output::Text {
        let progress = downloader.progress();
        println!();
        println!("Ferry v{}", ferry_core::VERSION);
        println!("{}", "-".repeat(37));
        println!(
            "Downloading {} files ({}) to {}",
            progress.files.len(),
            format_size(progress.total_bytes()),
            args.local.display()
        );
        println!();
    }

    let successful = downloader.run(None).context("Download failed")?;
    ui::report(&downloader.progress(), output)?;

    if !successful {
        std::process::exit(1);
    }
    Ok(())
}
