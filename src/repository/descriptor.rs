// src/repository/descriptor.rs

//! Upstream repository descriptors
//!
//! A [`Repository`] carries the identity and filter rules of one upstream
//! repository. It is validated once when loaded and never mutated during a
//! sync.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use std::fmt;
use std::path::{Path, PathBuf};

/// Where a descriptor was declared, for error attribution
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceLocation {
    pub file: PathBuf,
    pub line: usize,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file.display(), self.line)
    }
}

/// A package repository to mirror
#[derive(Debug, Clone, Default)]
pub struct Repository {
    /// Unique repository ID
    pub id: String,
    /// Display name (defaults to the ID)
    pub name: String,
    pub base_url: Option<String>,
    pub mirror_list_url: Option<String>,
    /// Only mirror this architecture (plus `noarch`)
    pub architecture: Option<String>,
    /// GPG key reference: path, URL, or inline armored key
    pub gpg_key: Option<String>,
    pub gpg_check: bool,
    pub include_sources: bool,
    pub delete_removed: bool,
    pub newest_only: bool,
    pub min_date: Option<DateTime<Utc>>,
    pub max_date: Option<DateTime<Utc>>,
    /// Package name globs to keep (empty keeps everything)
    pub include: Vec<String>,
    /// Package name globs to drop
    pub exclude: Vec<String>,
    pub local_path: Option<PathBuf>,
    pub cache_path: Option<PathBuf>,
    pub source: SourceLocation,
}

impl Repository {
    pub fn new(id: impl Into<String>, base_url: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            base_url: Some(base_url.into()),
            ..Default::default()
        }
    }

    fn config_error(&self, message: String) -> Error {
        Error::ConfigError {
            file: self.source.file.clone(),
            line: self.source.line,
            message,
        }
    }

    /// Check the descriptor and fill in defaults
    ///
    /// Returns an error on the first problem found, citing the file and line
    /// the repository was declared at.
    pub fn validate(&mut self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(self.config_error("Upstream repository has no ID specified".to_string()));
        }

        let has_base = self.base_url.as_deref().is_some_and(|u| !u.trim().is_empty());
        let has_mirror = self
            .mirror_list_url
            .as_deref()
            .is_some_and(|u| !u.trim().is_empty());
        if !has_base && !has_mirror {
            return Err(self.config_error(format!(
                "Upstream repository for '{}' has no mirror list or base URL",
                self.id
            )));
        }

        if self.gpg_check && self.gpg_key.as_deref().is_none_or(|k| k.trim().is_empty()) {
            return Err(self.config_error(format!(
                "Repository '{}' enables gpgcheck but has no gpgkey",
                self.id
            )));
        }

        if let (Some(min), Some(max)) = (self.min_date, self.max_date) {
            if min > max {
                return Err(self.config_error(format!(
                    "Repository '{}' has min_date after max_date",
                    self.id
                )));
            }
        }

        for pattern in self.include.iter().chain(self.exclude.iter()) {
            if let Err(e) = glob::Pattern::new(pattern) {
                return Err(self.config_error(format!(
                    "Repository '{}' has invalid package pattern '{}': {}",
                    self.id, pattern, e
                )));
            }
        }

        if self.name.is_empty() {
            self.name = self.id.clone();
        }

        Ok(())
    }

    /// Local package directory (defaults to `./<id>`)
    pub fn package_dir(&self) -> PathBuf {
        self.local_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(".").join(&self.id))
    }

    /// Metadata cache root, preferring the repository's own override
    pub fn cache_root(&self, default_root: &Path) -> PathBuf {
        self.cache_path
            .clone()
            .unwrap_or_else(|| default_root.to_path_buf())
    }
}

impl fmt::Display for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}
