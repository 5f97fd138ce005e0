// src/report.rs

//! Sync progress and outcome reporting
//!
//! The sync engine never prints. Everything a caller may want to show
//! (plans, per-package outcomes, removals) is delivered to a
//! [`SyncReporter`] passed in with the sync context, and the caller decides
//! how to present it. Implementations:
//! - `LogReporter`: logs through tracing
//! - `SilentReporter`: no-op for scripted use
//! - `CallbackReporter`: forwards [`SyncEvent`]s to a closure
//! - `CliReporter`: indicatif progress bar for interactive runs

use crate::error::Error;
use crate::repository::{DownloadJob, SyncReport};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::sync::Mutex;
use tracing::{error, info, warn};

/// Receiver of sync progress
///
/// All methods default to doing nothing. Implementations must be
/// thread-safe so a single reporter can serve several repositories.
pub trait SyncReporter: Send + Sync {
    /// A repository sync is starting
    fn started(&self, _repo: &str) {}

    /// The diff finished; `scheduled` packages totalling `bytes` will be fetched
    fn planned(&self, _repo: &str, _present: usize, _scheduled: usize, _bytes: u64) {}

    /// An existing local file failed its checksum and will be fetched again
    fn invalid_local(&self, _repo: &str, _path: &Path, _error: &Error) {}

    /// A download job reached its terminal state (after verification)
    fn job_finished(&self, _repo: &str, _job: &DownloadJob) {}

    /// A file no longer selected was removed from the mirror
    fn removed(&self, _repo: &str, _path: &Path) {}

    /// Removing a file failed
    fn remove_failed(&self, _repo: &str, _path: &Path, _error: &Error) {}

    /// The repository reached `Done`
    fn finished(&self, _repo: &str, _report: &SyncReport) {}
}

/// Reporter that discards everything
#[derive(Debug, Default)]
pub struct SilentReporter;

impl SyncReporter for SilentReporter {}

/// Reporter that logs to tracing
#[derive(Debug, Default)]
pub struct LogReporter;

impl SyncReporter for LogReporter {
    fn started(&self, repo: &str) {
        info!("Syncing repository '{}'", repo);
    }

    fn planned(&self, repo: &str, present: usize, scheduled: usize, bytes: u64) {
        info!(
            "{}: {} packages up to date, {} to download ({:.2} MB)",
            repo,
            present,
            scheduled,
            bytes as f64 / 1_048_576.0
        );
    }

    fn invalid_local(&self, repo: &str, path: &Path, error: &Error) {
        warn!("{}: {} is invalid and will be downloaded again: {}", repo, path.display(), error);
    }

    fn job_finished(&self, repo: &str, job: &DownloadJob) {
        match &job.error {
            None => info!("{}: downloaded {}", repo, job.label),
            Some(e) if e.is_integrity_failure() => {
                error!("{}: rejected {}: {}", repo, job.label, e)
            }
            Some(e) => warn!("{}: failed to download {}: {}", repo, job.label, e),
        }
    }

    fn removed(&self, repo: &str, path: &Path) {
        info!("{}: removed {}", repo, path.display());
    }

    fn remove_failed(&self, repo: &str, path: &Path, error: &Error) {
        warn!("{}: failed to remove {}: {}", repo, path.display(), error);
    }

    fn finished(&self, repo: &str, report: &SyncReport) {
        if report.failed > 0 {
            warn!(
                "{}: sync finished with {} failed package(s), {} downloaded",
                repo, report.failed, report.downloaded
            );
        } else {
            info!("{}: sync complete, {} downloaded", repo, report.downloaded);
        }
    }
}

/// Events emitted by [`CallbackReporter`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    Started(String),
    Planned { repo: String, present: usize, scheduled: usize, bytes: u64 },
    InvalidLocal { repo: String, file: String },
    Downloaded { repo: String, label: String },
    Failed { repo: String, label: String, integrity: bool, error: String },
    Removed { repo: String, file: String },
    RemoveFailed { repo: String, file: String, error: String },
    Finished { repo: String, failed: usize },
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Reporter that forwards events to a closure
pub struct CallbackReporter<F>
where
    F: Fn(SyncEvent) + Send + Sync,
{
    callback: F,
}

impl<F> CallbackReporter<F>
where
    F: Fn(SyncEvent) + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> SyncReporter for CallbackReporter<F>
where
    F: Fn(SyncEvent) + Send + Sync,
{
    fn started(&self, repo: &str) {
        (self.callback)(SyncEvent::Started(repo.to_string()));
    }

    fn planned(&self, repo: &str, present: usize, scheduled: usize, bytes: u64) {
        (self.callback)(SyncEvent::Planned {
            repo: repo.to_string(),
            present,
            scheduled,
            bytes,
        });
    }

    fn invalid_local(&self, repo: &str, path: &Path, _error: &Error) {
        (self.callback)(SyncEvent::InvalidLocal {
            repo: repo.to_string(),
            file: file_name(path),
        });
    }

    fn job_finished(&self, repo: &str, job: &DownloadJob) {
        let event = match &job.error {
            None => SyncEvent::Downloaded {
                repo: repo.to_string(),
                label: job.label.clone(),
            },
            Some(e) => SyncEvent::Failed {
                repo: repo.to_string(),
                label: job.label.clone(),
                integrity: e.is_integrity_failure(),
                error: e.to_string(),
            },
        };
        (self.callback)(event);
    }

    fn removed(&self, repo: &str, path: &Path) {
        (self.callback)(SyncEvent::Removed {
            repo: repo.to_string(),
            file: file_name(path),
        });
    }

    fn remove_failed(&self, repo: &str, path: &Path, error: &Error) {
        (self.callback)(SyncEvent::RemoveFailed {
            repo: repo.to_string(),
            file: file_name(path),
            error: error.to_string(),
        });
    }

    fn finished(&self, repo: &str, report: &SyncReport) {
        (self.callback)(SyncEvent::Finished {
            repo: repo.to_string(),
            failed: report.failed,
        });
    }
}

/// Interactive reporter: one byte-progress bar per repository
///
/// Failures are printed above the bar and also logged.
#[derive(Default)]
pub struct CliReporter {
    bar: Mutex<Option<ProgressBar>>,
}

impl CliReporter {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_bar(&self, f: impl FnOnce(&ProgressBar)) {
        if let Ok(guard) = self.bar.lock() {
            if let Some(bar) = guard.as_ref() {
                f(bar);
            }
        }
    }
}

impl SyncReporter for CliReporter {
    fn started(&self, repo: &str) {
        LogReporter.started(repo);
    }

    fn planned(&self, repo: &str, present: usize, scheduled: usize, bytes: u64) {
        LogReporter.planned(repo, present, scheduled, bytes);
        if scheduled == 0 {
            return;
        }

        let bar = ProgressBar::new(bytes);
        if let Ok(style) = ProgressStyle::default_bar().template(
            "{spinner:.green} [{elapsed_precise}] [{bar:30.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}) {msg}",
        ) {
            bar.set_style(style.progress_chars("#>-"));
        }
        bar.set_message(format!("{repo}: 0/{scheduled} packages"));
        if let Ok(mut guard) = self.bar.lock() {
            *guard = Some(bar);
        }
    }

    fn invalid_local(&self, repo: &str, path: &Path, error: &Error) {
        LogReporter.invalid_local(repo, path, error);
    }

    fn job_finished(&self, repo: &str, job: &DownloadJob) {
        self.with_bar(|bar| {
            bar.inc(job.size);
            if let Some(e) = &job.error {
                bar.println(format!("{}: {} [FAILED: {}]", repo, job.label, e));
            }
        });
        if job.error.is_some() {
            LogReporter.job_finished(repo, job);
        }
    }

    fn removed(&self, repo: &str, path: &Path) {
        LogReporter.removed(repo, path);
    }

    fn remove_failed(&self, repo: &str, path: &Path, error: &Error) {
        LogReporter.remove_failed(repo, path, error);
    }

    fn finished(&self, repo: &str, report: &SyncReport) {
        if let Ok(mut guard) = self.bar.lock() {
            if let Some(bar) = guard.take() {
                let mb = report.bytes_downloaded as f64 / 1_048_576.0;
                bar.finish_with_message(format!(
                    "{}: {} downloaded, {} failed ({:.2} MB)",
                    repo, report.downloaded, report.failed, mb
                ));
            }
        }
        LogReporter.finished(repo, report);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{Checksum, HashAlgorithm};
    use std::sync::Arc;

    fn job(label: &str, error: Option<Error>) -> DownloadJob {
        let mut job = DownloadJob::new(
            label,
            "file:///upstream/x.rpm",
            "/mirror/x.rpm",
            10,
            Checksum::new(HashAlgorithm::Sha256, "a".repeat(64)).unwrap(),
        );
        job.error = error;
        job
    }

    #[test]
    fn test_callback_reporter_events() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let reporter = CallbackReporter::new(move |e| sink.lock().unwrap().push(e));

        reporter.started("base");
        reporter.job_finished("base", &job("a-1.0-1.noarch", None));
        reporter.job_finished(
            "base",
            &job("b-2.0-1.noarch", Some(Error::GpgVerificationFailed("bad key".into()))),
        );
        reporter.removed("base", Path::new("/mirror/old-1.0-1.noarch.rpm"));

        let events = events.lock().unwrap();
        assert_eq!(events[0], SyncEvent::Started("base".to_string()));
        assert_eq!(
            events[1],
            SyncEvent::Downloaded {
                repo: "base".to_string(),
                label: "a-1.0-1.noarch".to_string()
            }
        );
        assert!(matches!(
            &events[2],
            SyncEvent::Failed { label, integrity: true, .. } if label == "b-2.0-1.noarch"
        ));
        assert_eq!(
            events[3],
            SyncEvent::Removed {
                repo: "base".to_string(),
                file: "old-1.0-1.noarch.rpm".to_string()
            }
        );
    }

    #[test]
    fn test_cli_reporter_without_plan() {
        // No bar exists until a plan with work arrives
        let reporter = CliReporter::new();
        reporter.job_finished("base", &job("a", None));
        reporter.finished("base", &SyncReport::default());
    }
}
