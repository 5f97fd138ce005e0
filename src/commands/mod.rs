// src/commands/mod.rs
//! Command handlers for the rpmirror CLI

mod check;
mod list;
mod sync;

pub use check::cmd_check;
pub use list::cmd_list;
pub use sync::{cmd_plan, cmd_sync};

use anyhow::{Context, Result};
use clap::CommandFactory;
use clap_complete::Shell;
use rpmirror::config::MirrorConfig;
use rpmirror::repository::{RepositoryClient, SyncContext};
use std::path::PathBuf;

use crate::cli::Cli;

/// Settings shared by every command, after CLI overrides
pub struct Options {
    pub config: PathBuf,
    pub cache_dir: Option<PathBuf>,
    pub workers: Option<usize>,
}

impl Options {
    pub fn load(&self) -> Result<MirrorConfig> {
        let mut config = MirrorConfig::load(&self.config)
            .with_context(|| format!("Invalid mirror file {}", self.config.display()))?;
        if let Some(dir) = &self.cache_dir {
            config.cache_dir = dir.clone();
        }
        if let Some(workers) = self.workers {
            config.workers = workers.max(1);
        }
        Ok(config)
    }
}

/// Build the sync context described by a mirror file
pub fn sync_context(config: &MirrorConfig) -> Result<SyncContext> {
    let client = RepositoryClient::with_options(config.timeout, config.retries)
        .context("Failed to create HTTP client")?;
    Ok(SyncContext::new(client, &config.cache_dir).with_workers(config.workers))
}

/// Generate shell completions
pub fn cmd_completions(shell: Shell) -> Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "rpmirror", &mut std::io::stdout());
    Ok(())
}
