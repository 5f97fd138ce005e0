// src/repository/download.rs

//! Bounded-concurrency package download scheduler
//!
//! Jobs run on a dedicated rayon thread pool whose size is fixed
//! independently of the number of jobs. Each job is reported back on a
//! channel as soon as it finishes, in completion order. The channel closes
//! once every job has reported, so a consumer can simply iterate it.
//!
//! A job's failure is captured on the job itself and never affects its
//! siblings.

use crate::error::{Error, Result};
use crate::hash::Checksum;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::fmt;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver};
use tracing::{debug, warn};

use super::client::RepositoryClient;

/// Default number of concurrent transfers
pub const DEFAULT_WORKERS: usize = 4;

/// One package download
#[derive(Debug)]
pub struct DownloadJob {
    /// Human-readable label (package NEVRA)
    pub label: String,
    pub url: String,
    pub path: PathBuf,
    /// Declared size in bytes
    pub size: u64,
    pub checksum: Checksum,
    /// Bytes actually transferred
    pub transferred: u64,
    /// Set once the job finished with an error
    pub error: Option<Error>,
}

impl DownloadJob {
    pub fn new(
        label: impl Into<String>,
        url: impl Into<String>,
        path: impl Into<PathBuf>,
        size: u64,
        checksum: Checksum,
    ) -> Self {
        Self {
            label: label.into(),
            url: url.into(),
            path: path.into(),
            size,
            checksum,
            transferred: 0,
            error: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

impl fmt::Display for DownloadJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label)
    }
}

/// Runs download jobs on a fixed-size worker pool
pub struct Downloader {
    client: RepositoryClient,
    pool: ThreadPool,
    workers: usize,
}

impl Downloader {
    pub fn new(client: RepositoryClient, workers: usize) -> Result<Self> {
        let workers = workers.max(1);
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("rpmirror-download-{i}"))
            .build()
            .map_err(|e| Error::InitError(format!("Failed to create download pool: {e}")))?;

        Ok(Self {
            client,
            pool,
            workers,
        })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Start all jobs, returning the channel their results arrive on
    ///
    /// Each destination is written through `<path>.part` and renamed into
    /// place, so an existing file is only replaced by a complete transfer.
    pub fn download(&self, jobs: Vec<DownloadJob>) -> Receiver<DownloadJob> {
        let (tx, rx) = mpsc::channel();
        debug!("Scheduling {} downloads on {} workers", jobs.len(), self.workers);

        for mut job in jobs {
            let tx = tx.clone();
            let client = self.client.clone();
            self.pool.spawn(move || {
                match client.download_file(&job.url, &job.path) {
                    Ok(written) => job.transferred = written,
                    Err(e) => {
                        warn!("Download of {} failed: {}", job.label, e);
                        job.error = Some(e);
                    }
                }
                // The receiver may already be gone if the consumer gave up
                let _ = tx.send(job);
            });
        }

        rx
    }
}
