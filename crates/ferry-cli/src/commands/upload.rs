//! Upload command implementation.

use anyhow::{Context, Result};

use ferry_core::config::Config;
use ferry_core::file::format_size;
use ferry_core::loader::Uploader;

use super::UploadArgs;
use crate::ui::{self, Output};

/// Run the upload command.
pub fn run(args: UploadArgs, mut config: Config) -> Result<()> {
    args.transfer.apply(&mut config.transfer)?;
    let store = args.transfer.open_store()?;

    let uploader = match &args.transfer.resume {
        Some(state) => Uploader::resume(store, state, &config.transfer)
            .with_context(|| format!("Failed to resume upload from {}", state.display()))?,
        None => Uploader::new(store, &args.local, &args.remote, &config.transfer)
            .with_context(|| format!("Failed to plan upload of {}", args.local.display()))?,
    };

    let output = args.transfer.output();
    if output == Output::Text {
        let progress = uploader.progress();
        println!();
        println!("Ferry v{}", ferry_core::VERSION);
        println!("{}", "-".repeat(37));
        println!(
            "Uploading {} files ({}) to {} in {}",
            progress.files.len(),
            format_size(progress.total_bytes()),
            args.remote.display(),
            args.transfer.store.display()
        );
        println!();
    }

    let successful = uploader.run(None).context("Upload failed")?;
    ui::report(&uploader.progress(), output)?;

    if !successful {
        std::process::exit(1);
    }
    Ok(())
}
