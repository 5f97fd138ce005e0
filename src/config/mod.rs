// src/config/mod.rs
//! Mirror file parsing
//!
//! The mirror file is TOML: a few global settings followed by one `[[repo]]`
//! table per upstream repository.
//!
//! ```toml
//! cache_dir = "/var/cache/rpmirror"
//! workers = 4
//!
//! [[repo]]
//! id = "fedora-39"
//! mirrorlist = "https://mirrors.fedoraproject.org/mirrorlist?repo=fedora-39&arch=x86_64"
//! arch = "x86_64"
//! gpgcheck = true
//! gpgkey = "/etc/pki/rpm-gpg/RPM-GPG-KEY-fedora-39-x86_64"
//! newest_only = true
//! path = "/srv/mirror/fedora/39"
//! ```
//!
//! Every repository remembers the line its table starts on, so validation
//! errors point at the offending block.

use crate::error::{Error, Result};
use crate::repository::{Repository, SourceLocation, DEFAULT_CACHE_DIR, DEFAULT_RETRIES, DEFAULT_WORKERS};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use toml::Spanned;
use tracing::debug;

/// Default mirror file location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/rpmirror/mirror.toml";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct MirrorFile {
    #[serde(default = "default_cache_dir")]
    cache_dir: PathBuf,

    #[serde(default = "default_workers")]
    workers: usize,

    #[serde(default = "default_timeout_secs")]
    timeout_secs: u64,

    #[serde(default = "default_retries")]
    retries: u32,

    #[serde(default)]
    repo: Vec<Spanned<RepoSection>>,
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(DEFAULT_CACHE_DIR)
}

fn default_workers() -> usize {
    DEFAULT_WORKERS
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_retries() -> u32 {
    DEFAULT_RETRIES
}

/// One `[[repo]]` table
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RepoSection {
    #[serde(default)]
    id: String,
    name: Option<String>,
    baseurl: Option<String>,
    mirrorlist: Option<String>,
    arch: Option<String>,
    gpgkey: Option<String>,
    #[serde(default)]
    gpgcheck: bool,
    /// Include source packages
    #[serde(default)]
    sources: bool,
    #[serde(default)]
    delete_removed: bool,
    #[serde(default)]
    newest_only: bool,
    min_date: Option<String>,
    max_date: Option<String>,
    #[serde(default)]
    include: Vec<String>,
    #[serde(default)]
    exclude: Vec<String>,
    path: Option<PathBuf>,
    cache_path: Option<PathBuf>,
}

/// Parsed and validated mirror file
#[derive(Debug, Clone)]
pub struct MirrorConfig {
    /// File the configuration was read from
    pub path: PathBuf,
    pub cache_dir: PathBuf,
    pub workers: usize,
    pub timeout: Duration,
    pub retries: u32,
    pub repos: Vec<Repository>,
}

/// 1-based line of a byte offset
fn line_of(content: &str, offset: usize) -> usize {
    let offset = offset.min(content.len());
    content.as_bytes()[..offset].iter().filter(|b| **b == b'\n').count() + 1
}

/// Line of the `[[repo]]` header owning the table that starts at `offset`
fn table_line(content: &str, offset: usize) -> usize {
    let line = line_of(content, offset);
    content
        .lines()
        .take(line)
        .enumerate()
        .filter(|(_, l)| l.trim_start().starts_with("[["))
        .last()
        .map(|(i, _)| i + 1)
        .unwrap_or(line)
}

/// Parse a date bound: RFC 3339 or `YYYY-MM-DD`
///
/// A bare date means the start of that day for a lower bound and its last
/// second for an upper bound.
fn parse_date(value: &str, end_of_day: bool) -> std::result::Result<DateTime<Utc>, String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| format!("Invalid date '{}' (expected YYYY-MM-DD or RFC 3339)", value))?;
    let time = if end_of_day {
        NaiveTime::from_hms_opt(23, 59, 59)
    } else {
        NaiveTime::from_hms_opt(0, 0, 0)
    }
    .ok_or_else(|| format!("Invalid date '{}'", value))?;
    Ok(date.and_time(time).and_utc())
}

impl RepoSection {
    fn into_repository(self, source: SourceLocation) -> Result<Repository> {
        let config_error = |message: String| Error::ConfigError {
            file: source.file.clone(),
            line: source.line,
            message,
        };

        let min_date = self
            .min_date
            .as_deref()
            .map(|d| parse_date(d, false))
            .transpose()
            .map_err(config_error)?;
        let max_date = self
            .max_date
            .as_deref()
            .map(|d| parse_date(d, true))
            .transpose()
            .map_err(config_error)?;

        let mut repo = Repository {
            name: self.name.unwrap_or_default(),
            id: self.id,
            base_url: self.baseurl,
            mirror_list_url: self.mirrorlist,
            architecture: self.arch.filter(|a| !a.is_empty()),
            gpg_key: self.gpgkey,
            gpg_check: self.gpgcheck,
            include_sources: self.sources,
            delete_removed: self.delete_removed,
            newest_only: self.newest_only,
            min_date,
            max_date,
            include: self.include,
            exclude: self.exclude,
            local_path: self.path,
            cache_path: self.cache_path,
            source,
        };
        repo.validate()?;
        Ok(repo)
    }
}

impl MirrorConfig {
    /// Read and validate a mirror file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::IoError(format!("Failed to read mirror file {}: {}", path.display(), e))
        })?;
        Self::parse(&content, path)
    }

    /// Parse mirror file content; `path` is used for error attribution
    pub fn parse(content: &str, path: &Path) -> Result<Self> {
        let file: MirrorFile = toml::from_str(content).map_err(|e| Error::ConfigError {
            file: path.to_path_buf(),
            line: e.span().map(|s| line_of(content, s.start)).unwrap_or(0),
            message: e.message().trim().to_string(),
        })?;

        let mut seen = HashSet::new();
        let mut repos = Vec::with_capacity(file.repo.len());
        for section in file.repo {
            let source = SourceLocation {
                file: path.to_path_buf(),
                line: table_line(content, section.span().start),
            };
            let repo = section.into_inner().into_repository(source)?;

            if !seen.insert(repo.id.clone()) {
                return Err(Error::ConfigError {
                    file: repo.source.file.clone(),
                    line: repo.source.line,
                    message: format!("Duplicate repository ID '{}'", repo.id),
                });
            }
            debug!("Loaded repository '{}' from {}", repo.id, repo.source);
            repos.push(repo);
        }

        Ok(Self {
            path: path.to_path_buf(),
            cache_dir: file.cache_dir,
            workers: file.workers.max(1),
            timeout: Duration::from_secs(file.timeout_secs.max(1)),
            retries: file.retries,
            repos,
        })
    }

    pub fn repo(&self, id: &str) -> Option<&Repository> {
        self.repos.iter().find(|r| r.id == id)
    }

    /// Repositories named by `ids`, or all of them when `ids` is empty
    pub fn select(&self, ids: &[String]) -> Result<Vec<&Repository>> {
        if ids.is_empty() {
            return Ok(self.repos.iter().collect());
        }
        ids.iter()
            .map(|id| {
                self.repo(id).ok_or_else(|| {
                    Error::NotFoundError(format!(
                        "Repository '{}' is not defined in {}",
                        id,
                        self.path.display()
                    ))
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const SAMPLE: &str = r#"cache_dir = "/tmp/rpmirror-cache"
workers = 8

[[repo]]
id = "base"
baseurl = "https://mirror.example.com/base/x86_64"
arch = "x86_64"
gpgcheck = true
gpgkey = "/etc/pki/rpm-gpg/RPM-GPG-KEY-base"
min_date = "2023-01-01"
max_date = "2023-12-31"

[[repo]]
id = "updates"
mirrorlist = "https://mirrors.example.com/updates"
newest_only = true
delete_removed = true
exclude = ["kernel-debug*"]
path = "/srv/mirror/updates"
"#;

    fn parse(content: &str) -> Result<MirrorConfig> {
        MirrorConfig::parse(content, Path::new("mirror.toml"))
    }

    #[test]
    fn test_parse_sample() {
        let config = parse(SAMPLE).unwrap();
        assert_eq!(config.cache_dir, PathBuf::from("/tmp/rpmirror-cache"));
        assert_eq!(config.workers, 8);
        assert_eq!(config.retries, DEFAULT_RETRIES);
        assert_eq!(config.repos.len(), 2);

        let base = config.repo("base").unwrap();
        assert_eq!(base.name, "base");
        assert_eq!(base.architecture.as_deref(), Some("x86_64"));
        assert!(base.gpg_check);
        assert_eq!(base.source.line, 4);
        assert_eq!(
            base.min_date,
            Some(Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(
            base.max_date,
            Some(Utc.with_ymd_and_hms(2023, 12, 31, 23, 59, 59).unwrap())
        );

        let updates = config.repo("updates").unwrap();
        assert!(updates.newest_only && updates.delete_removed);
        assert_eq!(updates.source.line, 13);
        assert_eq!(updates.package_dir(), PathBuf::from("/srv/mirror/updates"));
    }

    #[test]
    fn test_defaults() {
        let config = parse("").unwrap();
        assert_eq!(config.cache_dir, PathBuf::from(DEFAULT_CACHE_DIR));
        assert_eq!(config.workers, DEFAULT_WORKERS);
        assert_eq!(config.timeout, Duration::from_secs(300));
        assert!(config.repos.is_empty());
    }

    #[test]
    fn test_missing_url_cites_line() {
        let content = "workers = 2\n\n[[repo]]\nid = \"broken\"\n";
        let err = parse(content).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Upstream repository for 'broken' has no mirror list or base URL (in mirror.toml:3)"
        );
    }

    #[test]
    fn test_error_in_later_block_cites_its_header() {
        let content = "[[repo]]\nid = \"base\"\nbaseurl = \"https://example.com/base\"\n\n# second block\n[[repo]]\nid = \"updates\"\narch = \"x86_64\"\n";
        let err = parse(content).unwrap_err();
        assert!(matches!(err, Error::ConfigError { line: 6, .. }));
        assert!(err.to_string().contains("'updates'"));
    }

    #[test]
    fn test_missing_id_cites_line() {
        let content = "[[repo]]\nbaseurl = \"https://example.com\"\n";
        let err = parse(content).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Upstream repository has no ID specified (in mirror.toml:1)"
        );
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let content = "[[repo]]\nid = \"a\"\nbaseurl = \"u\"\n\n[[repo]]\nid = \"a\"\nbaseurl = \"v\"\n";
        let err = parse(content).unwrap_err();
        assert!(matches!(err, Error::ConfigError { line: 5, .. }));
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = parse("[[repo]]\nid = \"a\"\nbaseurl = \"u\"\nenabled = 1\n").unwrap_err();
        assert!(matches!(err, Error::ConfigError { .. }));
    }

    #[test]
    fn test_bad_date_rejected() {
        let err = parse("[[repo]]\nid = \"a\"\nbaseurl = \"u\"\nmin_date = \"last tuesday\"\n")
            .unwrap_err();
        assert!(err.to_string().contains("Invalid date"));
    }

    #[test]
    fn test_rfc3339_date() {
        let config =
            parse("[[repo]]\nid = \"a\"\nbaseurl = \"u\"\nmax_date = \"2024-03-01T12:00:00+02:00\"\n")
                .unwrap();
        assert_eq!(
            config.repos[0].max_date,
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_select() {
        let config = parse(SAMPLE).unwrap();
        assert_eq!(config.select(&[]).unwrap().len(), 2);
        assert_eq!(config.select(&["updates".to_string()]).unwrap()[0].id, "updates");
        assert!(matches!(
            config.select(&["nope".to_string()]),
            Err(Error::NotFoundError(_))
        ));
    }
}
