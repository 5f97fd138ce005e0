// src/main.rs

use anyhow::Result;
use clap::{CommandFactory, Parser};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;

use cli::{Cli, Commands};
use commands::Options;

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Initialize tracing subscriber for logging; RUST_LOG wins over -v
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let opts = Options {
        config: cli.config,
        cache_dir: cli.cache_dir,
        workers: cli.workers,
    };

    let ok = match cli.command {
        Some(Commands::Sync { repos, quiet, json }) => commands::cmd_sync(&opts, &repos, quiet, json)?,
        Some(Commands::Plan { repos }) => commands::cmd_plan(&opts, &repos)?,
        Some(Commands::List { repo, json }) => {
            commands::cmd_list(&opts, &repo, json)?;
            true
        }
        Some(Commands::Check) => {
            commands::cmd_check(&opts)?;
            true
        }
        Some(Commands::Completions { shell }) => {
            commands::cmd_completions(shell)?;
            true
        }
        None => {
            Cli::command().print_help()?;
            true
        }
    };

    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
