// src/commands/sync.rs
//! Sync and plan commands

use anyhow::Result;
use rpmirror::report::{CliReporter, LogReporter, SyncReporter};
use std::sync::Arc;
use tracing::{error, info};

use super::{sync_context, Options};

/// Sync the selected repositories
///
/// Every repository is attempted even if an earlier one fails. Returns
/// `false` when any repository hit a setup error; per-package failures are
/// logged but do not count against the run.
pub fn cmd_sync(opts: &Options, repos: &[String], quiet: bool, json: bool) -> Result<bool> {
    let config = opts.load()?;
    let selected = config.select(repos)?;
    if selected.is_empty() {
        println!("No repositories defined in {}", config.path.display());
        return Ok(true);
    }

    let reporter: Arc<dyn SyncReporter> = if quiet || json {
        Arc::new(LogReporter)
    } else {
        Arc::new(CliReporter::new())
    };
    let ctx = sync_context(&config)?.with_reporter(reporter);

    let mut ok = true;
    let mut degraded = 0;
    for repo in selected {
        match repo.sync(&ctx) {
            Ok(report) => {
                if !report.is_complete() {
                    degraded += 1;
                }
                if json {
                    println!("{}", serde_json::to_string(&report)?);
                }
            }
            Err(e) => {
                error!("{}", e);
                ok = false;
            }
        }
    }

    if degraded > 0 {
        info!(
            "{} repository(ies) have packages still missing; they will be retried on the next run",
            degraded
        );
    }
    Ok(ok)
}

/// Show what a sync would do
pub fn cmd_plan(opts: &Options, repos: &[String]) -> Result<bool> {
    let config = opts.load()?;
    let ctx = sync_context(&config)?;

    let mut ok = true;
    for repo in config.select(repos)? {
        let plan = match repo.plan(&ctx) {
            Ok(plan) => plan,
            Err(e) => {
                error!("{}", e);
                ok = false;
                continue;
            }
        };

        println!("{} ({})", repo.id, repo.package_dir().display());
        println!(
            "  {} selected, {} up to date, {} to download ({:.2} MB)",
            plan.desired.len(),
            plan.present,
            plan.jobs.len(),
            plan.bytes() as f64 / 1_048_576.0
        );
        for job in &plan.jobs {
            println!("  + {}", job.label);
        }
        for path in &plan.removals {
            println!("  - {}", path.display());
        }
    }
    Ok(ok)
}
