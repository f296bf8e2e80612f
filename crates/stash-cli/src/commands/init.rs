//! Init command - write a configuration file with default settings.
//!
//! Environment overrides (`STASH_*`) in effect when the command runs are
//! baked into the written file.
//!
//! # Examples
//!
//! ```bash
//! stash --config /etc/stash.toml init
//! STASH_STORAGE_FOLDER=/srv/stash stash init --force
//! ```

use std::path::Path;

use anyhow::{Result, bail};
use clap::Args as ClapArgs;
use tracing::{info, instrument};

use stash_core::StashConfig;

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// Overwrite an existing configuration file
    #[arg(long)]
    pub force: bool,
}

#[instrument(level = "info", name = "cmd::init", skip_all, fields(path = %config_path.display()))]
pub fn execute(config_path: &Path, args: &Args, quiet: bool) -> Result<()> {
    if config_path.exists() && !args.force {
        bail!(
            "Configuration file already exists: {} (use --force to overwrite)",
            config_path.display()
        );
    }

    let config = StashConfig::load(None)?;
    config.save(config_path)?;
    info!("Configuration written");

    if !quiet {
        println!("Wrote configuration to {}", config_path.display());
    }
    Ok(())
}
