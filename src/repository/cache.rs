// src/repository/cache.rs

//! On-disk metadata cache for one repository
//!
//! # Layout
//!
//! ```text
//! <cache_root>/<repo-id>/
//!     .lock                      exclusive lock held for the whole sync
//!     repodata/repomd.xml        cached index, written last
//!     repodata/<primary file>    primary metadata as published upstream
//!     primary.sqlite             decompressed primary_db, when used
//! ```
//!
//! A refresh fetches the upstream `repomd.xml`, compares its freshness
//! marker with the cached one, and pulls the primary metadata again when
//! the marker changed or the cached file no longer matches its declared
//! checksum. The cached index is replaced only after the primary file was
//! stored and verified, so an interrupted refresh is always redone.

use super::client::{join_url, RepositoryClient};
use super::descriptor::Repository;
use super::primary::{PackageEntry, PrimaryDatabase, PrimaryFormat};
use super::repomd::{RepoMd, RepoMdData, REPOMD_PATH};
use crate::compression;
use crate::error::{Error, Result};
use crate::hash;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

const LOCK_FILE: &str = ".lock";
const REPODATA_DIR: &str = "repodata";
const SQLITE_FILE: &str = "primary.sqlite";

/// Exclusive lock on a repository cache directory, released on drop
struct CacheLock {
    file: File,
    path: PathBuf,
}

impl CacheLock {
    fn try_acquire(path: PathBuf) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| {
                Error::IoError(format!("Failed to open lock file {}: {}", path.display(), e))
            })?;

        file.try_lock_exclusive().map_err(|_| {
            Error::LockError(format!(
                "Cache {} is in use by another sync",
                path.display()
            ))
        })?;

        debug!("Acquired cache lock at {}", path.display());
        Ok(Self { file, path })
    }
}

impl Drop for CacheLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            warn!("Failed to release cache lock {}: {}", self.path.display(), e);
        }
    }
}

/// Pick the first mirror from a mirror list that serves a repository index
///
/// Returns the mirror's base URL together with the index it served.
fn resolve_mirror(list_url: &str, client: &RepositoryClient) -> Result<(String, Vec<u8>)> {
    let body = client.download_to_bytes(list_url).map_err(|e| {
        Error::MetadataError(format!("Failed to fetch mirror list {}: {}", list_url, e))
    })?;
    let text = String::from_utf8_lossy(&body);

    for mirror in text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
    {
        match client.download_to_bytes(&join_url(mirror, REPOMD_PATH)) {
            Ok(index) => {
                info!("Using mirror {}", mirror);
                return Ok((mirror.to_string(), index));
            }
            Err(e) => debug!("Skipping mirror {}: {}", mirror, e),
        }
    }

    Err(Error::MetadataError(format!(
        "No usable mirror in mirror list {}",
        list_url
    )))
}

impl Repository {
    /// Bring this repository's metadata cache under `cache_root` up to date
    ///
    /// The returned cache is locked and holds a verified index and primary
    /// database for the current upstream revision.
    pub fn cache_local(&self, cache_root: &Path, client: &RepositoryClient) -> Result<RepoCache> {
        let mut cache = self.open_cache(cache_root, client)?;
        cache.update()?;
        Ok(cache)
    }

    /// Open (creating if needed) this repository's metadata cache under
    /// `cache_root`
    ///
    /// Resolves the effective base URL (consulting the mirror list when no
    /// base URL is set) and takes the cache lock. The metadata itself is
    /// not touched until [`RepoCache::update`].
    pub fn open_cache(&self, cache_root: &Path, client: &RepositoryClient) -> Result<RepoCache> {
        let dir = cache_root.join(&self.id);
        fs::create_dir_all(dir.join(REPODATA_DIR)).map_err(|e| {
            Error::IoError(format!("Failed to create cache directory {}: {}", dir.display(), e))
        })?;
        let lock = CacheLock::try_acquire(dir.join(LOCK_FILE))?;

        let (base_url, served_index) = match self.base_url.as_deref().map(str::trim) {
            Some(base) if !base.is_empty() => (base.to_string(), None),
            _ => {
                let list = self.mirror_list_url.as_deref().unwrap_or_default();
                let (base, index) = resolve_mirror(list, client)?;
                (base, Some(index))
            }
        };

        Ok(RepoCache {
            repo_id: self.id.clone(),
            dir,
            base_url,
            client: client.clone(),
            served_index,
            repomd: None,
            _lock: lock,
        })
    }
}

/// Metadata cache of one repository
pub struct RepoCache {
    repo_id: String,
    dir: PathBuf,
    base_url: String,
    client: RepositoryClient,
    served_index: Option<Vec<u8>>,
    repomd: Option<RepoMd>,
    _lock: CacheLock,
}

impl RepoCache {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Base URL packages and metadata are fetched from
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Download URL of a package
    pub fn package_url(&self, pkg: &PackageEntry) -> String {
        let base = pkg.location_base.as_deref().unwrap_or(&self.base_url);
        join_url(base, &pkg.location)
    }

    fn repomd_path(&self) -> PathBuf {
        self.dir.join(REPOMD_PATH)
    }

    fn stored_path(&self, data: &RepoMdData) -> Result<PathBuf> {
        let name = Path::new(&data.location).file_name().ok_or_else(|| {
            Error::MetadataError(format!("Invalid metadata location '{}'", data.location))
        })?;
        Ok(self.dir.join(REPODATA_DIR).join(name))
    }

    /// The index currently in effect, if any
    pub fn repomd(&self) -> Option<&RepoMd> {
        self.repomd.as_ref()
    }

    fn load_cached_index(&self) -> Option<RepoMd> {
        let data = fs::read(self.repomd_path()).ok()?;
        match RepoMd::parse(&data) {
            Ok(repomd) => Some(repomd),
            Err(e) => {
                warn!("Discarding corrupt cached index for '{}': {}", self.repo_id, e);
                None
            }
        }
    }

    /// Refresh the cache from upstream
    ///
    /// Returns true when new metadata was downloaded.
    pub fn update(&mut self) -> Result<bool> {
        let index_bytes = match self.served_index.take() {
            Some(bytes) => bytes,
            None => self
                .client
                .download_to_bytes(&join_url(&self.base_url, REPOMD_PATH))
                .map_err(|e| {
                    Error::MetadataError(format!(
                        "Failed to fetch repository index for '{}': {}",
                        self.repo_id, e
                    ))
                })?,
        };
        let upstream = RepoMd::parse(&index_bytes)?;
        let primary = upstream.primary().ok_or_else(|| {
            Error::MetadataError(format!(
                "Repository '{}' publishes no usable primary metadata",
                self.repo_id
            ))
        })?;

        let cached_marker = self.load_cached_index().and_then(|c| c.marker());
        let marker_current = cached_marker.is_some() && cached_marker == upstream.marker();

        let refreshed = if marker_current && self.primary_is_valid(primary)? {
            debug!(
                "Metadata for '{}' is current (revision {})",
                self.repo_id,
                cached_marker.unwrap_or_default()
            );
            false
        } else {
            info!("Refreshing metadata for '{}'", self.repo_id);
            self.fetch_primary(primary)?;
            true
        };

        // Decompressing is repeated when the cached copy cannot be vouched for
        self.prepare_database(primary)?;

        if refreshed {
            self.remove_stale_files(primary)?;
            self.store_index(&index_bytes)?;
        }

        self.repomd = Some(upstream);
        Ok(refreshed)
    }

    /// The cached primary file exists and matches its declared checksum
    fn primary_is_valid(&self, primary: &RepoMdData) -> Result<bool> {
        let path = self.stored_path(primary)?;
        if !path.is_file() {
            return Ok(false);
        }
        match hash::verify_file(&path, &primary.checksum) {
            Ok(()) => Ok(true),
            Err(e) => {
                warn!("Cached {} for '{}' is invalid: {}", primary.data_type, self.repo_id, e);
                Ok(false)
            }
        }
    }

    fn fetch_primary(&self, primary: &RepoMdData) -> Result<()> {
        let path = self.stored_path(primary)?;
        let url = join_url(&self.base_url, &primary.location);
        self.client.download_file(&url, &path).map_err(|e| {
            Error::MetadataError(format!("Failed to fetch {}: {}", url, e))
        })?;

        if let Err(e) = hash::verify_file(&path, &primary.checksum) {
            if let Err(e) = fs::remove_file(&path) {
                warn!("Failed to remove corrupt {}: {}", path.display(), e);
            }
            return Err(Error::MetadataError(format!(
                "Downloaded {} for '{}' is corrupt: {}",
                primary.data_type, self.repo_id, e
            )));
        }
        Ok(())
    }

    /// Decompress the SQLite database next to the cached file when needed
    fn prepare_database(&self, primary: &RepoMdData) -> Result<()> {
        if PrimaryFormat::from_data_type(&primary.data_type) != Some(PrimaryFormat::Sqlite) {
            return Ok(());
        }

        let db_path = self.dir.join(SQLITE_FILE);
        if let Some(open) = &primary.open_checksum {
            if db_path.is_file() && hash::verify_file(&db_path, open).is_ok() {
                return Ok(());
            }
        }

        let src = self.stored_path(primary)?;
        let tmp = NamedTempFile::new_in(&self.dir)?;
        compression::decompress_file(&src, tmp.path())?;
        if let Some(open) = &primary.open_checksum {
            hash::verify_file(tmp.path(), open).map_err(|e| {
                Error::MetadataError(format!(
                    "Decompressed primary database for '{}' is corrupt: {}",
                    self.repo_id, e
                ))
            })?;
        }
        tmp.persist(&db_path).map_err(|e| {
            Error::IoError(format!("Failed to store {}: {}", db_path.display(), e.error))
        })?;
        Ok(())
    }

    /// Drop metadata files of earlier revisions
    fn remove_stale_files(&self, primary: &RepoMdData) -> Result<()> {
        let keep = self.stored_path(primary)?;
        let repodata = self.dir.join(REPODATA_DIR);
        for entry in fs::read_dir(&repodata)? {
            let path = entry?.path();
            if path != keep && path != self.repomd_path() && path.is_file() {
                debug!("Removing stale metadata file {}", path.display());
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }

    fn store_index(&self, bytes: &[u8]) -> Result<()> {
        let path = self.repomd_path();
        let mut tmp = NamedTempFile::new_in(self.dir.join(REPODATA_DIR))?;
        tmp.write_all(bytes)?;
        tmp.persist(&path).map_err(|e| {
            Error::IoError(format!("Failed to store {}: {}", path.display(), e.error))
        })?;
        Ok(())
    }

    /// The cached primary database
    ///
    /// Uses the index from the last [`update`](Self::update), or the cached
    /// index when the cache was opened without refreshing.
    pub fn primary_db(&self) -> Result<PrimaryDatabase> {
        let cached;
        let repomd = match &self.repomd {
            Some(repomd) => repomd,
            None => {
                cached = self.load_cached_index().ok_or_else(|| {
                    Error::NotFoundError(format!("No cached metadata for '{}'", self.repo_id))
                })?;
                &cached
            }
        };

        let primary = repomd.primary().ok_or_else(|| {
            Error::MetadataError(format!(
                "Repository '{}' publishes no usable primary metadata",
                self.repo_id
            ))
        })?;

        let (path, format) = match PrimaryFormat::from_data_type(&primary.data_type) {
            Some(PrimaryFormat::Sqlite) => (self.dir.join(SQLITE_FILE), PrimaryFormat::Sqlite),
            _ => (self.stored_path(primary)?, PrimaryFormat::Xml),
        };

        if !path.is_file() {
            return Err(Error::NotFoundError(format!(
                "Primary metadata for '{}' is not cached",
                self.repo_id
            )));
        }

        Ok(PrimaryDatabase::new(path, format))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{hash_bytes, HashAlgorithm};
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use tempfile::TempDir;
    use url::Url;

    const PRIMARY: &str = r#"<?xml version="1.0"?>
<metadata xmlns="http://linux.duke.edu/metadata/common" packages="1">
<package type="rpm">
  <name>hello</name>
  <arch>noarch</arch>
  <version epoch="0" ver="1.0" rel="1"/>
  <checksum type="sha256" pkgid="YES">3333333333333333333333333333333333333333333333333333333333333333</checksum>
  <time file="1" build="1"/>
  <size package="10"/>
  <location href="Packages/hello-1.0-1.noarch.rpm"/>
</package>
</metadata>"#;

    /// Publish a repository with the given revision, returning its URL
    fn publish(root: &Path, revision: &str) -> String {
        let repodata = root.join("repodata");
        fs::create_dir_all(&repodata).unwrap();

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(PRIMARY.as_bytes()).unwrap();
        let gz = encoder.finish().unwrap();
        let sum = hash_bytes(HashAlgorithm::Sha256, &gz);
        let name = format!("{}-primary.xml.gz", &sum[..8]);
        fs::write(repodata.join(&name), &gz).unwrap();

        let index = format!(
            r#"<repomd><revision>{revision}</revision><data type="primary"><checksum type="sha256">{sum}</checksum><location href="repodata/{name}"/><timestamp>1</timestamp></data></repomd>"#
        );
        fs::write(repodata.join("repomd.xml"), index).unwrap();
        Url::from_directory_path(root).unwrap().to_string()
    }

    #[test]
    fn test_update_then_current() {
        let upstream = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();
        let repo = Repository::new("base", publish(upstream.path(), "1"));
        let client = RepositoryClient::new().unwrap();

        let mut rc = repo.open_cache(cache.path(), &client).unwrap();
        assert!(rc.update().unwrap());
        assert!(cache.path().join("base/repodata/repomd.xml").is_file());

        let packages = rc.primary_db().unwrap().packages().unwrap();
        assert_eq!(packages.len(), 1);
        assert_eq!(
            rc.package_url(&packages[0]),
            join_url(rc.base_url(), "Packages/hello-1.0-1.noarch.rpm")
        );

        assert!(!rc.update().unwrap(), "unchanged revision is not refetched");
    }

    #[test]
    fn test_cache_local_returns_refreshed_cache() {
        let upstream = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();
        let repo = Repository::new("base", publish(upstream.path(), "3"));
        let client = RepositoryClient::new().unwrap();

        let rc = repo.cache_local(cache.path(), &client).unwrap();
        assert_eq!(rc.repomd().unwrap().revision.as_deref(), Some("3"));
        assert!(cache.path().join("base/repodata/repomd.xml").is_file());
        assert_eq!(rc.primary_db().unwrap().packages().unwrap().len(), 1);
    }

    #[test]
    fn test_corrupt_cached_primary_is_refetched() {
        let upstream = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();
        let repo = Repository::new("base", publish(upstream.path(), "1"));
        let client = RepositoryClient::new().unwrap();

        let mut rc = repo.open_cache(cache.path(), &client).unwrap();
        rc.update().unwrap();

        let stored = rc.primary_db().unwrap().path().to_path_buf();
        fs::write(&stored, b"garbage").unwrap();

        assert!(rc.update().unwrap());
        assert_eq!(rc.primary_db().unwrap().packages().unwrap().len(), 1);
    }

    #[test]
    fn test_new_revision_replaces_old_files() {
        let upstream = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();
        let repo = Repository::new("base", publish(upstream.path(), "1"));
        let client = RepositoryClient::new().unwrap();

        let mut rc = repo.open_cache(cache.path(), &client).unwrap();
        rc.update().unwrap();
        fs::write(cache.path().join("base/repodata/old-primary.xml.gz"), b"old").unwrap();

        publish(upstream.path(), "2");
        assert!(rc.update().unwrap());
        assert!(!cache.path().join("base/repodata/old-primary.xml.gz").exists());
        assert_eq!(rc.repomd().unwrap().revision.as_deref(), Some("2"));
    }

    #[test]
    fn test_corrupt_upstream_primary_fails_closed() {
        let upstream = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();
        let repo = Repository::new("base", publish(upstream.path(), "1"));
        for entry in fs::read_dir(upstream.path().join("repodata")).unwrap() {
            let path = entry.unwrap().path();
            if path.to_string_lossy().ends_with("primary.xml.gz") {
                fs::write(&path, b"tampered").unwrap();
            }
        }

        let client = RepositoryClient::new().unwrap();
        let mut rc = repo.open_cache(cache.path(), &client).unwrap();
        assert!(matches!(rc.update(), Err(Error::MetadataError(_))));
        assert!(!cache.path().join("base/repodata/repomd.xml").exists());
        assert!(rc.primary_db().is_err());
        let leftovers: Vec<_> = fs::read_dir(cache.path().join("base/repodata"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert!(leftovers.is_empty(), "corrupt download kept: {leftovers:?}");
    }

    #[test]
    fn test_cache_lock_is_exclusive() {
        let upstream = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();
        let repo = Repository::new("base", publish(upstream.path(), "1"));
        let client = RepositoryClient::new().unwrap();

        let held = repo.open_cache(cache.path(), &client).unwrap();
        assert!(matches!(
            repo.open_cache(cache.path(), &client),
            Err(Error::LockError(_))
        ));
        drop(held);
        assert!(repo.open_cache(cache.path(), &client).is_ok());
    }

    #[test]
    fn test_mirror_list_skips_dead_mirrors() {
        let upstream = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();
        let good = publish(upstream.path(), "7");
        let dead = Url::from_directory_path(upstream.path().join("gone")).unwrap().to_string();

        let list = upstream.path().join("mirrorlist");
        fs::write(&list, format!("# mirrors\n\n{dead}\n{good}\n")).unwrap();

        let mut repo = Repository::new("updates", "");
        repo.base_url = None;
        repo.mirror_list_url = Some(Url::from_file_path(&list).unwrap().to_string());

        let client = RepositoryClient::new().unwrap();
        let mut rc = repo.open_cache(cache.path(), &client).unwrap();
        assert_eq!(rc.base_url(), good);
        rc.update().unwrap();
        assert_eq!(rc.repomd().unwrap().marker().as_deref(), Some("7"));
    }
}
