// src/repository/sync.rs

//! Repository mirroring
//!
//! One sync walks a fixed sequence of states:
//!
//! ```text
//! LoadKeyring -> RefreshMetadata -> LoadPackageList -> Filter -> Diff
//!     -> ScheduleDownloads -> AwaitCompletions -> Done
//! ```
//!
//! Any error before `ScheduleDownloads` aborts the sync of that repository
//! and is returned wrapped in [`Error::SyncFailed`]. From then on every
//! package's outcome is independent: failures are recorded in the
//! [`SyncReport`] and reported, and the sync always reaches `Done`.

use crate::error::{Error, Result};
use crate::report::{LogReporter, SyncReporter};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::cache::RepoCache;
use super::client::RepositoryClient;
use super::descriptor::Repository;
use super::download::{DownloadJob, Downloader, DEFAULT_WORKERS};
use super::filter::filter_packages;
use super::gpg::Keyring;
use super::primary::PackageEntry;
use super::verify::{verify_checksum, verify_package, verify_signature};

/// Default metadata cache root
pub const DEFAULT_CACHE_DIR: &str = "/var/cache/rpmirror";

/// Sync states, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    LoadKeyring,
    RefreshMetadata,
    LoadPackageList,
    Filter,
    Diff,
    ScheduleDownloads,
    AwaitCompletions,
    Done,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::LoadKeyring => "load-keyring",
            Self::RefreshMetadata => "refresh-metadata",
            Self::LoadPackageList => "load-package-list",
            Self::Filter => "filter",
            Self::Diff => "diff",
            Self::ScheduleDownloads => "schedule-downloads",
            Self::AwaitCompletions => "await-completions",
            Self::Done => "done",
        };
        write!(f, "{}", name)
    }
}

/// Shared settings for syncing any number of repositories
#[derive(Clone)]
pub struct SyncContext {
    pub client: RepositoryClient,
    /// Default metadata cache root (a repository may override it)
    pub cache_root: PathBuf,
    /// Concurrent transfers per repository
    pub workers: usize,
    pub reporter: Arc<dyn SyncReporter>,
}

impl SyncContext {
    pub fn new(client: RepositoryClient, cache_root: impl Into<PathBuf>) -> Self {
        Self {
            client,
            cache_root: cache_root.into(),
            workers: DEFAULT_WORKERS,
            reporter: Arc::new(LogReporter),
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn SyncReporter>) -> Self {
        self.reporter = reporter;
        self
    }
}

/// A package that could not be mirrored this run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobFailure {
    pub label: String,
    pub error: String,
    /// Checksum or signature failure rather than a transport problem
    pub integrity: bool,
}

/// Outcome of one repository sync
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub repo: String,
    /// Packages selected by the filter rules
    pub desired: usize,
    /// Selected packages already present and valid
    pub present: usize,
    pub scheduled: usize,
    pub downloaded: usize,
    pub failed: usize,
    pub removed: usize,
    pub bytes_scheduled: u64,
    pub bytes_downloaded: u64,
    pub failures: Vec<JobFailure>,
}

impl SyncReport {
    /// True when every selected package is now present
    pub fn is_complete(&self) -> bool {
        self.failed == 0
    }
}

/// What a sync would do, without doing it
#[derive(Debug)]
pub struct SyncPlan {
    pub desired: Vec<PackageEntry>,
    pub present: usize,
    pub jobs: Vec<DownloadJob>,
    /// Files `delete_removed` would remove
    pub removals: Vec<PathBuf>,
}

impl SyncPlan {
    pub fn bytes(&self) -> u64 {
        self.jobs.iter().map(|j| j.size).sum()
    }
}

/// Result of the diff step
struct Diff {
    jobs: Vec<DownloadJob>,
    present: usize,
}

/// Regular files directly inside `dir`, keyed by file name
///
/// A missing directory is empty.
fn list_files(dir: &Path) -> Result<HashMap<String, PathBuf>> {
    let mut files = HashMap::new();
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(files),
        Err(e) => {
            return Err(Error::IoError(format!(
                "Failed to list package directory {}: {}",
                dir.display(),
                e
            )));
        }
    };

    for entry in entries {
        let entry = entry.map_err(|e| {
            Error::IoError(format!("Failed to list package directory {}: {}", dir.display(), e))
        })?;
        if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            files.insert(entry.file_name().to_string_lossy().into_owned(), entry.path());
        }
    }
    Ok(files)
}

/// Create the package directory (mode 0750 on unix) if it is absent
fn create_package_dir(dir: &Path) -> Result<()> {
    if dir.is_dir() {
        return Ok(());
    }

    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o750);
    }
    builder.create(dir).map_err(|e| {
        Error::IoError(format!("Failed to create package directory {}: {}", dir.display(), e))
    })
}

impl Repository {
    fn enter(&self, state: SyncState) {
        debug!("{}: {}", self.id, state);
    }

    /// Load the trusted keyring when GPG checking is enabled
    fn keyring(&self, ctx: &SyncContext) -> Result<Option<Keyring>> {
        self.enter(SyncState::LoadKeyring);
        if !self.gpg_check {
            return Ok(None);
        }
        let reference = self.gpg_key.as_deref().unwrap_or_default();
        Keyring::load(reference, &ctx.client).map(Some)
    }

    /// Refresh the metadata cache and return the selected packages
    fn select(&self, ctx: &SyncContext) -> Result<(RepoCache, Vec<PackageEntry>)> {
        self.enter(SyncState::RefreshMetadata);
        let cache_root = self.cache_root(&ctx.cache_root);
        let cache = self.cache_local(&cache_root, &ctx.client)?;

        self.enter(SyncState::LoadPackageList);
        let packages = cache.primary_db()?.packages()?;

        self.enter(SyncState::Filter);
        let selected = filter_packages(self, packages);
        Ok((cache, selected))
    }

    /// Packages this repository's rules select from upstream
    pub fn selected_packages(&self, ctx: &SyncContext) -> Result<Vec<PackageEntry>> {
        self.select(ctx)
            .map(|(_, packages)| packages)
            .map_err(|e| Error::sync_failed(&self.id, e))
    }

    /// Compare the selected packages against the package directory
    ///
    /// An existing file counts as present only if it passes the same checks a
    /// fresh download must pass: its checksum, and its signature when a
    /// keyring is given. Anything else is scheduled again but left in place;
    /// the new copy replaces it only once fully transferred.
    fn diff(
        &self,
        ctx: &SyncContext,
        cache: &RepoCache,
        desired: &[PackageEntry],
        dir: &Path,
        keyring: Option<&Keyring>,
    ) -> Result<Diff> {
        self.enter(SyncState::Diff);
        let existing = list_files(dir)?;
        let mut seen = HashSet::new();
        let mut jobs = Vec::new();
        let mut present = 0;

        for pkg in desired {
            let name = pkg.file_name();
            if !seen.insert(name) {
                warn!("{}: skipping duplicate package file {}", self.id, name);
                continue;
            }

            if let Some(path) = existing.get(name) {
                let verified = verify_checksum(path, &pkg.checksum).and_then(|()| match keyring {
                    Some(keyring) => verify_signature(path, keyring),
                    None => Ok(()),
                });
                match verified {
                    Ok(()) => {
                        present += 1;
                        continue;
                    }
                    Err(e) => ctx.reporter.invalid_local(&self.id, path, &e),
                }
            }

            jobs.push(DownloadJob::new(
                pkg.to_string(),
                cache.package_url(pkg),
                dir.join(name),
                pkg.size,
                pkg.checksum.clone(),
            ));
        }

        Ok(Diff { jobs, present })
    }

    /// Files in the package directory that no selected package accounts for
    fn removal_candidates(&self, desired: &[PackageEntry], dir: &Path) -> Result<Vec<PathBuf>> {
        let wanted: HashSet<&str> = desired.iter().map(|p| p.file_name()).collect();
        let mut stale: Vec<PathBuf> = list_files(dir)?
            .into_iter()
            .filter(|(name, _)| !wanted.contains(name.as_str()))
            .map(|(_, path)| path)
            .collect();
        stale.sort();
        Ok(stale)
    }

    /// Work out what [`sync`](Self::sync) would download, without touching
    /// the package directory
    pub fn plan(&self, ctx: &SyncContext) -> Result<SyncPlan> {
        let plan = || -> Result<SyncPlan> {
            let keyring = self.keyring(ctx)?;
            let (cache, desired) = self.select(ctx)?;
            let dir = self.package_dir();
            let diff = self.diff(ctx, &cache, &desired, &dir, keyring.as_ref())?;
            let removals = if self.delete_removed {
                self.removal_candidates(&desired, &dir)?
            } else {
                Vec::new()
            };
            Ok(SyncPlan {
                desired,
                present: diff.present,
                jobs: diff.jobs,
                removals,
            })
        };
        plan().map_err(|e| Error::sync_failed(&self.id, e))
    }

    /// Mirror this repository into its package directory
    ///
    /// Returns an error only for setup failures; per-package failures are
    /// listed in the returned report.
    pub fn sync(&self, ctx: &SyncContext) -> Result<SyncReport> {
        ctx.reporter.started(&self.id);

        let keyring = self.keyring(ctx).map_err(|e| Error::sync_failed(&self.id, e))?;

        let (cache, desired) = self.select(ctx).map_err(|e| Error::sync_failed(&self.id, e))?;

        let dir = self.package_dir();
        create_package_dir(&dir).map_err(|e| Error::sync_failed(&self.id, e))?;
        let diff = self
            .diff(ctx, &cache, &desired, &dir, keyring.as_ref())
            .map_err(|e| Error::sync_failed(&self.id, e))?;
        // Metadata is no longer needed; release the cache lock early
        drop(cache);

        let mut report = SyncReport {
            repo: self.id.clone(),
            desired: desired.len(),
            present: diff.present,
            scheduled: diff.jobs.len(),
            bytes_scheduled: diff.jobs.iter().map(|j| j.size).sum(),
            ..Default::default()
        };
        ctx.reporter
            .planned(&self.id, report.present, report.scheduled, report.bytes_scheduled);

        if !diff.jobs.is_empty() {
            self.enter(SyncState::ScheduleDownloads);
            let downloader = Downloader::new(ctx.client.clone(), ctx.workers)
                .map_err(|e| Error::sync_failed(&self.id, e))?;
            let completions = downloader.download(diff.jobs);

            self.enter(SyncState::AwaitCompletions);
            for mut job in completions {
                if job.error.is_none() {
                    if let Err(e) = verify_package(&job.path, &job.checksum, keyring.as_ref()) {
                        job.error = Some(e);
                    }
                }
                self.record(&mut report, &job);
                ctx.reporter.job_finished(&self.id, &job);
            }
        }

        if self.delete_removed {
            self.delete_removed_files(ctx, &desired, &dir, &mut report);
        }

        self.enter(SyncState::Done);
        ctx.reporter.finished(&self.id, &report);
        Ok(report)
    }

    fn record(&self, report: &mut SyncReport, job: &DownloadJob) {
        match &job.error {
            None => {
                report.downloaded += 1;
                report.bytes_downloaded += job.transferred;
            }
            Some(e) => {
                report.failed += 1;
                report.failures.push(JobFailure {
                    label: job.label.clone(),
                    error: e.to_string(),
                    integrity: e.is_integrity_failure(),
                });
            }
        }
    }

    fn delete_removed_files(
        &self,
        ctx: &SyncContext,
        desired: &[PackageEntry],
        dir: &Path,
        report: &mut SyncReport,
    ) {
        let stale = match self.removal_candidates(desired, dir) {
            Ok(stale) => stale,
            Err(e) => {
                warn!("{}: cannot look for removed packages: {}", self.id, e);
                return;
            }
        };

        for path in stale {
            match fs::remove_file(&path) {
                Ok(()) => {
                    report.removed += 1;
                    ctx.reporter.removed(&self.id, &path);
                }
                Err(e) => ctx.reporter.remove_failed(&self.id, &path, &Error::Io(e)),
            }
        }
        if report.removed > 0 {
            info!("{}: removed {} package(s) no longer selected", self.id, report.removed);
        }
    }
}
