// src/commands/list.rs
//! Package listing

use anyhow::{Context, Result};

use super::{sync_context, Options};

/// List the packages a repository selects upstream
pub fn cmd_list(opts: &Options, repo_id: &str, json: bool) -> Result<()> {
    let config = opts.load()?;
    let repo = config
        .repo(repo_id)
        .with_context(|| format!("Repository '{}' is not defined in {}", repo_id, config.path.display()))?;
    let ctx = sync_context(&config)?;
    let packages = repo.selected_packages(&ctx)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&packages)?);
        return Ok(());
    }

    if packages.is_empty() {
        println!("No packages selected from '{}'", repo.id);
        return Ok(());
    }
    for pkg in &packages {
        println!("{:<60} {:>12}", pkg.to_string(), pkg.size);
    }
    let total: u64 = packages.iter().map(|p| p.size).sum();
    println!(
        "\n{} package(s), {:.2} MB",
        packages.len(),
        total as f64 / 1_048_576.0
    );
    Ok(())
}
