// src/repository/mod.rs

//! Repository mirroring
//!
//! This module provides functionality for:
//! - Describing and validating upstream repositories
//! - Caching and refreshing repository metadata
//! - Decoding the primary package database (SQLite or XML)
//! - Selecting packages by architecture, date, name and version
//! - Downloading packages with bounded concurrency and retries
//! - Verifying package checksums and GPG signatures

mod cache;
mod client;
mod descriptor;
mod download;
mod filter;
mod primary;
mod repomd;
mod sync;

pub mod gpg;
pub mod verify;

pub use cache::RepoCache;
pub use client::{join_url, RepositoryClient, DEFAULT_RETRIES, DEFAULT_TIMEOUT};
pub use descriptor::{Repository, SourceLocation};
pub use download::{DownloadJob, Downloader, DEFAULT_WORKERS};
pub use filter::filter_packages;
pub use gpg::Keyring;
pub use primary::{PackageEntry, PrimaryDatabase, PrimaryFormat};
pub use repomd::{RepoMd, RepoMdData, REPOMD_PATH};
pub use sync::{
    JobFailure, SyncContext, SyncPlan, SyncReport, SyncState, DEFAULT_CACHE_DIR,
};
