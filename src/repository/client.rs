// src/repository/client.rs

//! HTTP client for repository operations
//!
//! Wraps a blocking reqwest client with a per-request timeout and bounded
//! retries. `file://` URLs are served from the local filesystem through the
//! same interface so local upstreams behave exactly like remote ones.

use crate::error::{Error, Result};
use reqwest::blocking::Client;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Default timeout for HTTP requests
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Default retry attempts for failed transfers
pub const DEFAULT_RETRIES: u32 = 3;

/// Retry delay in milliseconds (multiplied by the attempt number)
const RETRY_DELAY_MS: u64 = 1000;

/// Suffix of in-flight download files
pub const PARTIAL_SUFFIX: &str = ".part";

/// Join a repository base URL with a relative location
pub fn join_url(base: &str, location: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        location.trim_start_matches('/')
    )
}

/// Path used while a download to `dest` is in flight
pub fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

/// Resolve a `file://` URL to a local path
fn local_path(url: &str) -> Result<Option<PathBuf>> {
    if !url.starts_with("file:") {
        return Ok(None);
    }
    let parsed = Url::parse(url).map_err(|e| Error::ParseError(format!("Invalid URL {url}: {e}")))?;
    parsed
        .to_file_path()
        .map(Some)
        .map_err(|_| Error::ParseError(format!("URL {url} is not a local path")))
}

/// HTTP client wrapper with retry support
#[derive(Clone)]
pub struct RepositoryClient {
    client: Client,
    max_retries: u32,
}

impl RepositoryClient {
    /// Create a client with default timeout and retries
    pub fn new() -> Result<Self> {
        Self::with_options(DEFAULT_TIMEOUT, DEFAULT_RETRIES)
    }

    pub fn with_options(timeout: Duration, max_retries: u32) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(30))
            .user_agent(concat!("rpmirror/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::InitError(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            max_retries: max_retries.max(1),
        })
    }

    /// Run `op` until it succeeds, fails permanently, or retries run out
    fn with_retries<T>(&self, url: &str, mut op: impl FnMut() -> Result<T>) -> Result<T> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if is_retryable(&e) && attempt < self.max_retries => {
                    warn!("Attempt {} for {} failed: {}, retrying...", attempt, url, e);
                    std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS * attempt as u64));
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Download a URL to bytes (for metadata indexes, mirror lists, keys)
    pub fn download_to_bytes(&self, url: &str) -> Result<Vec<u8>> {
        if let Some(path) = local_path(url)? {
            return fs::read(&path).map_err(|e| {
                Error::DownloadError(format!("Failed to read {}: {e}", path.display()))
            });
        }

        self.with_retries(url, || {
            let response = self
                .client
                .get(url)
                .send()
                .map_err(|e| Error::DownloadError(format!("Failed to fetch {url}: {e}")))?;

            check_status(&response, url)?;

            let bytes = response
                .bytes()
                .map_err(|e| Error::DownloadError(format!("Failed to read response from {url}: {e}")))?;
            Ok(bytes.to_vec())
        })
    }

    /// Download a URL to `dest`, returning the number of bytes written
    ///
    /// Data is streamed to `<dest>.part` and renamed over `dest` only once
    /// the transfer completed, so an interrupted download never replaces an
    /// existing file with a truncated one.
    pub fn download_file(&self, url: &str, dest: &Path) -> Result<u64> {
        debug!("Downloading {} to {}", url, dest.display());

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                Error::IoError(format!("Failed to create directory {}: {e}", parent.display()))
            })?;
        }

        let temp_path = partial_path(dest);
        let result = match local_path(url)? {
            Some(src) => fs::copy(&src, &temp_path).map_err(|e| {
                Error::DownloadError(format!("Failed to copy {}: {e}", src.display()))
            }),
            None => self.with_retries(url, || self.fetch_to(url, &temp_path)),
        };

        let written = match result {
            Ok(written) => written,
            Err(e) => {
                let _ = fs::remove_file(&temp_path);
                return Err(e);
            }
        };

        fs::rename(&temp_path, dest).map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            Error::IoError(format!(
                "Failed to move {} to {}: {e}",
                temp_path.display(),
                dest.display()
            ))
        })?;

        Ok(written)
    }

    fn fetch_to(&self, url: &str, temp_path: &Path) -> Result<u64> {
        let mut response = self
            .client
            .get(url)
            .send()
            .map_err(|e| Error::DownloadError(format!("Failed to fetch {url}: {e}")))?;

        check_status(&response, url)?;

        // Truncates any leftover partial file from an earlier attempt
        let mut file = File::create(temp_path).map_err(|e| {
            Error::IoError(format!("Failed to create file {}: {e}", temp_path.display()))
        })?;

        let written = io::copy(&mut response, &mut file)
            .map_err(|e| Error::DownloadError(format!("Transfer of {url} interrupted: {e}")))?;
        file.flush()?;
        Ok(written)
    }
}

fn check_status(response: &reqwest::blocking::Response, url: &str) -> Result<()> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    if status.is_server_error() {
        // 5xx is worth retrying
        return Err(Error::DownloadError(format!("HTTP {status} from {url} (server error)")));
    }
    Err(Error::NotFoundError(format!("HTTP {status} from {url}")))
}

fn is_retryable(e: &Error) -> bool {
    matches!(e, Error::DownloadError(_))
}
