// src/commands/check.rs
//! Mirror file validation

use anyhow::Result;

use super::Options;

/// Validate the mirror file and summarize each repository
pub fn cmd_check(opts: &Options) -> Result<()> {
    let config = opts.load()?;
    println!("{}: OK", config.path.display());
    println!("  Cache: {}", config.cache_dir.display());
    println!("  Workers: {}", config.workers);

    for repo in &config.repos {
        let upstream = repo
            .base_url
            .as_deref()
            .filter(|u| !u.is_empty())
            .or(repo.mirror_list_url.as_deref())
            .unwrap_or_default();
        println!("  [{}] {}", repo.id, repo.name);
        println!("      Upstream: {}", upstream);
        println!("      Path: {}", repo.package_dir().display());
        if let Some(arch) = &repo.architecture {
            println!("      Arch: {}", arch);
        }
        println!(
            "      GPG check: {}",
            if repo.gpg_check { "enabled" } else { "disabled" }
        );
    }
    Ok(())
}
