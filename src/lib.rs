// src/lib.rs

//! rpmirror
//!
//! Verified, incremental mirroring of yum/RPM package repositories.
//!
//! # Architecture
//!
//! - Repositories are described in a TOML mirror file (`config`)
//! - Metadata is cached per repository and refreshed only when upstream
//!   publishes a new revision (`repository::RepoCache`)
//! - Filter rules select packages from the primary database, and a diff
//!   against the package directory schedules only what is missing or invalid
//! - Downloads run on a bounded worker pool; every file is checksummed, and
//!   optionally GPG-verified, before it is accepted
//! - Progress and per-package outcomes go to a pluggable `report::SyncReporter`

pub mod compression;
pub mod config;
mod error;
pub mod hash;
pub mod report;
pub mod repository;
pub mod version;

pub use config::MirrorConfig;
pub use error::{Error, Result};
pub use hash::{Checksum, HashAlgorithm};
pub use report::{SyncEvent, SyncReporter};
pub use repository::{Repository, SyncContext, SyncReport};
pub use version::RpmVersion;
