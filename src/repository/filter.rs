// src/repository/filter.rs

//! Package selection
//!
//! Reduces the full upstream package list to the set a mirror should hold.
//! Rules apply in a fixed order:
//!
//! 1. architecture (architecture-independent `noarch` always passes; source
//!    packages are left to the next rule)
//! 2. source inclusion
//! 3. name include/exclude globs
//! 4. build-time bounds
//! 5. newest-only reduction per name + architecture
//!
//! No I/O happens here; the result depends only on the inputs.

use super::descriptor::Repository;
use super::primary::PackageEntry;
use glob::Pattern;
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::{debug, warn};

const NOARCH: &str = "noarch";

fn compile(patterns: &[String]) -> Vec<Pattern> {
    patterns
        .iter()
        .filter_map(|p| match Pattern::new(p) {
            Ok(pattern) => Some(pattern),
            Err(e) => {
                warn!("Ignoring invalid package pattern '{}': {}", p, e);
                None
            }
        })
        .collect()
}

/// Select the packages `repo` should mirror
pub fn filter_packages(repo: &Repository, packages: Vec<PackageEntry>) -> Vec<PackageEntry> {
    let total = packages.len();
    let include = compile(&repo.include);
    let exclude = compile(&repo.exclude);

    let selected: Vec<PackageEntry> = packages
        .into_iter()
        // Sources have no binary arch; the `sources` flag alone decides them
        .filter(|p| match repo.architecture.as_deref() {
            Some(arch) => p.architecture == arch || p.architecture == NOARCH || p.is_source(),
            None => true,
        })
        .filter(|p| repo.include_sources || !p.is_source())
        .filter(|p| include.is_empty() || include.iter().any(|g| g.matches(&p.name)))
        .filter(|p| !exclude.iter().any(|g| g.matches(&p.name)))
        .filter(|p| within_dates(repo, p))
        .collect();

    let selected = if repo.newest_only {
        newest_only(selected)
    } else {
        selected
    };

    debug!(
        "Selected {} of {} packages for repository '{}'",
        selected.len(),
        total,
        repo.id
    );
    selected
}

/// Entries without a build time pass any date bound
fn within_dates(repo: &Repository, pkg: &PackageEntry) -> bool {
    let Some(built) = pkg.build_time else {
        return true;
    };
    if repo.min_date.is_some_and(|min| built < min) {
        return false;
    }
    if repo.max_date.is_some_and(|max| built > max) {
        return false;
    }
    true
}

/// Keep the highest version of each name + architecture, preserving the
/// upstream order of the survivors
fn newest_only(packages: Vec<PackageEntry>) -> Vec<PackageEntry> {
    let mut best: HashMap<(String, String), usize> = HashMap::new();
    for (idx, pkg) in packages.iter().enumerate() {
        let key = (pkg.name.clone(), pkg.architecture.clone());
        match best.get(&key) {
            Some(&current) if packages[current].evr().cmp(&pkg.evr()) != Ordering::Less => {}
            _ => {
                best.insert(key, idx);
            }
        }
    }

    let mut keep: Vec<usize> = best.into_values().collect();
    keep.sort_unstable();

    let mut packages: Vec<Option<PackageEntry>> = packages.into_iter().map(Some).collect();
    keep.into_iter()
        .filter_map(|idx| packages[idx].take())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{Checksum, HashAlgorithm};
    use chrono::{DateTime, TimeZone, Utc};

    fn pkg(name: &str, version: &str, release: &str, arch: &str) -> PackageEntry {
        PackageEntry {
            name: name.to_string(),
            epoch: 0,
            version: version.to_string(),
            release: release.to_string(),
            architecture: arch.to_string(),
            checksum: Checksum::new(HashAlgorithm::Sha256, "a".repeat(64)).unwrap(),
            size: 100,
            location: format!("Packages/{name}-{version}-{release}.{arch}.rpm"),
            location_base: None,
            build_time: None,
            file_time: None,
        }
    }

    fn built(mut p: PackageEntry, when: DateTime<Utc>) -> PackageEntry {
        p.build_time = Some(when);
        p
    }

    fn names(packages: &[PackageEntry]) -> Vec<String> {
        packages.iter().map(|p| p.to_string()).collect()
    }

    fn repo() -> Repository {
        Repository::new("base", "https://example.com/base")
    }

    #[test]
    fn test_no_rules_keeps_all_binaries() {
        let packages = vec![pkg("a", "1", "1", "x86_64"), pkg("b", "1", "1", "noarch")];
        assert_eq!(filter_packages(&repo(), packages).len(), 2);
    }

    #[test]
    fn test_architecture_keeps_noarch() {
        let mut r = repo();
        r.architecture = Some("x86_64".to_string());
        let packages = vec![
            pkg("a", "1", "1", "x86_64"),
            pkg("a", "1", "1", "i686"),
            pkg("b", "1", "1", "noarch"),
            pkg("a", "1", "1", "aarch64"),
        ];
        let out = filter_packages(&r, packages);
        assert_eq!(names(&out), vec!["a-1-1.x86_64", "b-1-1.noarch"]);
    }

    // src/nosrc are exempt from the arch filter; only `sources` decides them
    #[test]
    fn test_sources_exempt_from_arch_filter() {
        let mut r = repo();
        r.architecture = Some("x86_64".to_string());
        let packages = || {
            vec![
                pkg("a", "1", "1", "x86_64"),
                pkg("a", "1", "1", "src"),
                pkg("b", "1", "1", "nosrc"),
            ]
        };

        let out = filter_packages(&r, packages());
        assert!(out.iter().all(|p| !p.is_source()));

        r.include_sources = true;
        let out = filter_packages(&r, packages());
        assert_eq!(names(&out), vec!["a-1-1.x86_64", "a-1-1.src", "b-1-1.nosrc"]);
        assert!(out.iter().all(|p| p.architecture == "x86_64" || p.is_source()));
    }

    #[test]
    fn test_date_bounds() {
        let mut r = repo();
        r.min_date = Some(Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap());
        r.max_date = Some(Utc.with_ymd_and_hms(2023, 12, 31, 0, 0, 0).unwrap());

        let packages = vec![
            built(pkg("old", "1", "1", "noarch"), Utc.with_ymd_and_hms(2022, 6, 1, 0, 0, 0).unwrap()),
            built(pkg("mid", "1", "1", "noarch"), Utc.with_ymd_and_hms(2023, 6, 1, 0, 0, 0).unwrap()),
            built(pkg("new", "1", "1", "noarch"), Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()),
            pkg("undated", "1", "1", "noarch"),
        ];
        let out = filter_packages(&r, packages);
        assert_eq!(names(&out), vec!["mid-1-1.noarch", "undated-1-1.noarch"]);
    }

    #[test]
    fn test_include_exclude_globs() {
        let mut r = repo();
        r.include = vec!["kernel*".to_string(), "bash".to_string()];
        r.exclude = vec!["kernel-debug*".to_string()];

        let packages = vec![
            pkg("kernel", "6.5", "1", "x86_64"),
            pkg("kernel-debug", "6.5", "1", "x86_64"),
            pkg("bash", "5.2", "1", "x86_64"),
            pkg("zsh", "5.9", "1", "x86_64"),
        ];
        let out = filter_packages(&r, packages);
        assert_eq!(names(&out), vec!["kernel-6.5-1.x86_64", "bash-5.2-1.x86_64"]);
    }

    #[test]
    fn test_newest_only_per_name_and_arch() {
        let mut r = repo();
        r.newest_only = true;

        let packages = vec![
            pkg("a", "1.9", "1", "x86_64"),
            pkg("a", "1.10", "1", "x86_64"),
            pkg("a", "1.10~rc1", "1", "x86_64"),
            pkg("a", "1.2", "1", "i686"),
            pkg("b", "2.0", "1.fc39", "noarch"),
            pkg("b", "2.0", "10.fc39", "noarch"),
            pkg("b", "2.0", "2.fc39", "noarch"),
        ];
        let out = filter_packages(&r, packages);
        assert_eq!(
            names(&out),
            vec!["a-1.10-1.x86_64", "a-1.2-1.i686", "b-2.0-10.fc39.noarch"]
        );
    }

    #[test]
    fn test_newest_only_respects_epoch() {
        let mut r = repo();
        r.newest_only = true;

        let mut epoch_pkg = pkg("c", "0.5", "1", "noarch");
        epoch_pkg.epoch = 1;
        let packages = vec![pkg("c", "3.0", "1", "noarch"), epoch_pkg];
        let out = filter_packages(&r, packages);
        assert_eq!(names(&out), vec!["c-1:0.5-1.noarch"]);
    }

    #[test]
    fn test_filter_is_deterministic() {
        let mut r = repo();
        r.newest_only = true;
        let packages = vec![
            pkg("a", "1", "1", "noarch"),
            pkg("a", "2", "1", "noarch"),
            pkg("b", "1", "1", "noarch"),
        ];
        let first = filter_packages(&r, packages.clone());
        let second = filter_packages(&r, packages);
        assert_eq!(first, second);
    }
}
