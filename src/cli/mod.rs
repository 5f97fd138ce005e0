// src/cli/mod.rs
//! CLI definitions for rpmirror
//!
//! This module contains the command-line interface definitions using clap.
//! The command implementations are in the `commands` module.

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rpmirror")]
#[command(author = "rpmirror Contributors")]
#[command(version)]
#[command(about = "Verified, incremental mirroring of RPM package repositories", long_about = None)]
pub struct Cli {
    /// Mirror file describing the repositories
    #[arg(short, long, global = true, default_value = rpmirror::config::DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Metadata cache root (overrides the mirror file)
    #[arg(long, global = true, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Maximum concurrent downloads per repository (overrides the mirror file)
    #[arg(short, long, global = true, value_name = "N")]
    pub workers: Option<usize>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Mirror repositories into their package directories
    Sync {
        /// Repository IDs to sync (all if omitted)
        repos: Vec<String>,

        /// Log progress instead of drawing a progress bar
        #[arg(short, long)]
        quiet: bool,

        /// Print a JSON report per repository when done
        #[arg(long)]
        json: bool,
    },

    /// Show what a sync would download and remove, without changing anything
    Plan {
        /// Repository IDs to plan (all if omitted)
        repos: Vec<String>,
    },

    /// List the packages a repository's rules select upstream
    List {
        /// Repository ID
        repo: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate the mirror file and print the configured repositories
    Check,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}
