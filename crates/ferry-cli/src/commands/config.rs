//! Config command implementation.

use anyhow::{Context, Result};

use ferry_core::config::Config;

use super::{ConfigAction, ConfigArgs};

/// Run the config command.
pub fn run(args: &ConfigArgs, config: &Config) -> Result<()> {
    match args.action {
        ConfigAction::Show => {
            let rendered =
                toml::to_string_pretty(config).context("Failed to render configuration")?;
            print!("{rendered}");
        }
        ConfigAction::Path => {
            println!("{}", Config::config_path().display());
        }
    }
    Ok(())
}
