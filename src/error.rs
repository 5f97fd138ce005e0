// src/error.rs

//! Error types for rpmirror
//!
//! A single error enum covers every failure class the mirror engine can hit.
//! Setup-phase errors (configuration, keyring, metadata, filesystem) abort a
//! repository's sync; per-job errors (transport, integrity) are recorded on
//! the job and reported without stopping the run.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for rpmirror operations
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Invalid repository descriptor or mirror file
    #[error("{message} (in {}:{line})", file.display())]
    ConfigError {
        file: PathBuf,
        line: usize,
        message: String,
    },

    /// Repository metadata could not be fetched, verified or decoded
    #[error("Metadata error: {0}")]
    MetadataError(String),

    /// Malformed input (XML, keys, URLs, dates)
    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("I/O error: {0}")]
    IoError(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Transport failure (connection, HTTP status, timeout)
    #[error("Download error: {0}")]
    DownloadError(String),

    /// Content does not match the declared digest
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Unsupported checksum type: {0}")]
    UnsupportedChecksum(String),

    /// Package signature missing or not made by a trusted key
    #[error("GPG verification failed: {0}")]
    GpgVerificationFailed(String),

    /// Keyring could not be loaded
    #[error("Keyring error: {0}")]
    KeyringError(String),

    #[error("Not found: {0}")]
    NotFoundError(String),

    #[error("Initialization error: {0}")]
    InitError(String),

    /// Another process holds the repository cache lock
    #[error("Lock error: {0}")]
    LockError(String),

    /// Setup-phase failure for one repository
    #[error("Sync of repository '{repo}' failed: {source}")]
    SyncFailed {
        repo: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Wrap a setup-phase error with the repository it aborted
    pub fn sync_failed(repo: impl Into<String>, source: Error) -> Self {
        Error::SyncFailed {
            repo: repo.into(),
            source: Box::new(source),
        }
    }

    /// True for failures that indicate corrupted or untrusted content rather
    /// than an infrastructure problem
    pub fn is_integrity_failure(&self) -> bool {
        match self {
            Error::ChecksumMismatch { .. } | Error::GpgVerificationFailed(_) => true,
            Error::SyncFailed { source, .. } => source.is_integrity_failure(),
            _ => false,
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::MetadataError(format!("primary database: {e}"))
    }
}

impl From<quick_xml::Error> for Error {
    fn from(e: quick_xml::Error) -> Self {
        Error::ParseError(format!("XML: {e}"))
    }
}
