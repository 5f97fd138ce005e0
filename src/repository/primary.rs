// src/repository/primary.rs

//! Primary package database decoding
//!
//! Upstream repositories publish their package list in two equivalent
//! forms: a SQLite database (`primary_db`) and an XML document (`primary`).
//! Both decode to the same sequence of [`PackageEntry`] values. Decoding is
//! all-or-nothing: an entry with a missing location or an unparseable
//! checksum fails the whole database rather than being skipped.

use crate::compression;
use crate::error::{Error, Result};
use crate::hash::Checksum;
use crate::version::RpmVersion;
use chrono::{DateTime, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use rusqlite::{Connection, OpenFlags};
use serde::Serialize;
use std::fmt;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::repomd::attribute;

/// One upstream package
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageEntry {
    pub name: String,
    pub epoch: u64,
    pub version: String,
    pub release: String,
    pub architecture: String,
    pub checksum: Checksum,
    /// Package file size in bytes
    pub size: u64,
    /// Location relative to the repository base URL
    pub location: String,
    /// Alternative base URL for this package (`xml:base`)
    pub location_base: Option<String>,
    pub build_time: Option<DateTime<Utc>>,
    pub file_time: Option<DateTime<Utc>>,
}

impl PackageEntry {
    /// Epoch/version/release for ordering
    pub fn evr(&self) -> RpmVersion {
        RpmVersion::new(self.epoch, self.version.clone(), self.release.clone())
    }

    pub fn is_source(&self) -> bool {
        self.architecture == "src" || self.architecture == "nosrc"
    }

    /// File name the package is stored under locally
    pub fn file_name(&self) -> &str {
        self.location
            .rsplit('/')
            .next()
            .unwrap_or(self.location.as_str())
    }
}

impl fmt::Display for PackageEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-", self.name)?;
        if self.epoch > 0 {
            write!(f, "{}:", self.epoch)?;
        }
        write!(f, "{}-{}.{}", self.version, self.release, self.architecture)
    }
}

fn timestamp(secs: Option<i64>) -> Option<DateTime<Utc>> {
    secs.filter(|s| *s > 0)
        .and_then(|s| DateTime::from_timestamp(s, 0))
}

/// Storage format of a decoded primary database
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimaryFormat {
    Sqlite,
    Xml,
}

impl PrimaryFormat {
    /// Format for a `repomd.xml` data type
    pub fn from_data_type(data_type: &str) -> Option<Self> {
        match data_type {
            "primary_db" => Some(Self::Sqlite),
            "primary" => Some(Self::Xml),
            _ => None,
        }
    }
}

/// A cached primary database ready to be decoded
#[derive(Debug, Clone)]
pub struct PrimaryDatabase {
    path: PathBuf,
    format: PrimaryFormat,
}

impl PrimaryDatabase {
    /// `path` is an uncompressed SQLite file, or an XML file in any
    /// supported compression
    pub fn new(path: impl Into<PathBuf>, format: PrimaryFormat) -> Self {
        Self {
            path: path.into(),
            format,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> PrimaryFormat {
        self.format
    }

    /// Decode every package entry
    pub fn packages(&self) -> Result<Vec<PackageEntry>> {
        debug!("Decoding primary database {}", self.path.display());
        let packages = match self.format {
            PrimaryFormat::Sqlite => read_sqlite(&self.path)?,
            PrimaryFormat::Xml => read_xml(&self.path)?,
        };
        debug!("Decoded {} packages", packages.len());
        Ok(packages)
    }
}

fn read_sqlite(path: &Path) -> Result<Vec<PackageEntry>> {
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
    let mut stmt = conn.prepare(
        "SELECT name, arch, epoch, version, release, pkgId, checksum_type, \
                size_package, location_href, location_base, time_build, time_file \
         FROM packages",
    )?;

    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, Option<String>>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, String>(5)?,
            row.get::<_, String>(6)?,
            row.get::<_, Option<i64>>(7)?,
            row.get::<_, String>(8)?,
            row.get::<_, Option<String>>(9)?,
            row.get::<_, Option<i64>>(10)?,
            row.get::<_, Option<i64>>(11)?,
        ))
    })?;

    let mut packages = Vec::new();
    for row in rows {
        let (name, arch, epoch, version, release, pkg_id, checksum_type, size, href, base, built, filed) =
            row?;
        let checksum = Checksum::from_metadata(&checksum_type, &pkg_id).map_err(|e| {
            Error::MetadataError(format!("Package {name} has invalid checksum: {e}"))
        })?;
        check_location(&name, &href)?;
        packages.push(PackageEntry {
            epoch: parse_epoch(epoch.as_deref(), &name)?,
            name,
            version,
            release,
            architecture: arch,
            checksum,
            size: size.unwrap_or(0).max(0) as u64,
            location: href,
            location_base: base.filter(|b| !b.is_empty()),
            build_time: timestamp(built),
            file_time: timestamp(filed),
        });
    }
    Ok(packages)
}

/// Reject locations whose base name cannot be a file in the package directory
fn check_location(name: &str, href: &str) -> Result<()> {
    let file_name = href.rsplit('/').next().unwrap_or(href);
    if matches!(file_name, "" | "." | "..") || file_name.contains('\0') {
        return Err(Error::MetadataError(format!(
            "Package {name} has unusable location '{href}'"
        )));
    }
    Ok(())
}

fn parse_epoch(epoch: Option<&str>, name: &str) -> Result<u64> {
    match epoch.map(str::trim) {
        None | Some("") => Ok(0),
        Some(e) => e
            .parse()
            .map_err(|_| Error::MetadataError(format!("Package {name} has invalid epoch '{e}'"))),
    }
}

#[derive(Default)]
struct EntryBuilder {
    name: Option<String>,
    arch: Option<String>,
    epoch: Option<String>,
    version: Option<String>,
    release: Option<String>,
    checksum: Option<(String, String)>,
    size: Option<u64>,
    location: Option<String>,
    location_base: Option<String>,
    build_time: Option<i64>,
    file_time: Option<i64>,
}

impl EntryBuilder {
    fn build(self) -> Result<PackageEntry> {
        let name = self
            .name
            .ok_or_else(|| Error::MetadataError("Package entry without a name".to_string()))?;
        let missing = |field: &str| Error::MetadataError(format!("Package {name} has no {field}"));

        let architecture = self.arch.ok_or_else(|| missing("arch"))?;
        let version = self.version.ok_or_else(|| missing("version"))?;
        let location = self.location.ok_or_else(|| missing("location"))?;
        check_location(&name, &location)?;
        let (algo, value) = self.checksum.ok_or_else(|| missing("checksum"))?;
        let checksum = Checksum::from_metadata(&algo, &value).map_err(|e| {
            Error::MetadataError(format!("Package {name} has invalid checksum: {e}"))
        })?;

        Ok(PackageEntry {
            epoch: parse_epoch(self.epoch.as_deref(), &name)?,
            name,
            version,
            release: self.release.unwrap_or_default(),
            architecture,
            checksum,
            size: self.size.unwrap_or(0),
            location,
            location_base: self.location_base.filter(|b| !b.is_empty()),
            build_time: timestamp(self.build_time),
            file_time: timestamp(self.file_time),
        })
    }

    fn apply_empty(&mut self, e: &BytesStart<'_>) -> Result<()> {
        match e.name().as_ref() {
            b"version" => {
                self.epoch = attribute(e, b"epoch")?;
                self.version = attribute(e, b"ver")?;
                self.release = attribute(e, b"rel")?;
            }
            b"time" => {
                self.file_time = attribute(e, b"file")?.and_then(|t| t.parse().ok());
                self.build_time = attribute(e, b"build")?.and_then(|t| t.parse().ok());
            }
            b"size" => {
                self.size = attribute(e, b"package")?.and_then(|s| s.parse().ok());
            }
            b"location" => {
                self.location = attribute(e, b"href")?;
                self.location_base = attribute(e, b"xml:base")?;
            }
            _ => {}
        }
        Ok(())
    }
}

fn read_xml(path: &Path) -> Result<Vec<PackageEntry>> {
    let decoder = compression::open_decoded(path)?;
    let mut reader = Reader::from_reader(BufReader::new(decoder));
    reader.trim_text(true);

    let mut packages = Vec::new();
    let mut declared: Option<usize> = None;
    let mut saw_root = false;
    let mut current: Option<EntryBuilder> = None;
    let mut in_format = false;
    let mut text_target: Option<Vec<u8>> = None;
    let mut checksum_type: Option<String> = None;
    let mut buf = Vec::new();

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| Error::MetadataError(format!("Corrupt primary XML: {e}")))?;
        match event {
            Event::Start(e) => {
                let name = e.name().as_ref().to_vec();
                match name.as_slice() {
                    b"metadata" => {
                        saw_root = true;
                        declared = attribute(&e, b"packages")?.and_then(|n| n.parse().ok());
                    }
                    b"package" => current = Some(EntryBuilder::default()),
                    b"format" => in_format = true,
                    _ if in_format => {}
                    b"checksum" => checksum_type = attribute(&e, b"type")?,
                    _ => {
                        if let Some(entry) = current.as_mut() {
                            entry.apply_empty(&e)?;
                        }
                    }
                }
                text_target = Some(name);
            }
            Event::Empty(e) => {
                if e.name().as_ref() == b"metadata" {
                    saw_root = true;
                    declared = attribute(&e, b"packages")?.and_then(|n| n.parse().ok());
                } else if !in_format {
                    if let Some(entry) = current.as_mut() {
                        entry.apply_empty(&e)?;
                    }
                }
            }
            Event::Text(t) if !in_format => {
                if let Some(entry) = current.as_mut() {
                    let text = t
                        .unescape()
                        .map_err(|e| Error::MetadataError(format!("Corrupt primary XML: {e}")))?
                        .into_owned();
                    match text_target.as_deref() {
                        Some(b"name") => entry.name = Some(text),
                        Some(b"arch") => entry.arch = Some(text),
                        Some(b"checksum") => {
                            entry.checksum = Some((checksum_type.take().unwrap_or_default(), text));
                        }
                        _ => {}
                    }
                }
            }
            Event::End(e) => {
                match e.name().as_ref() {
                    b"format" => in_format = false,
                    b"package" => {
                        if let Some(entry) = current.take() {
                            packages.push(entry.build()?);
                        }
                    }
                    _ => {}
                }
                text_target = None;
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if !saw_root {
        return Err(Error::MetadataError(
            "Primary XML has no <metadata> root element".to_string(),
        ));
    }
    if let Some(expected) = declared {
        if expected != packages.len() {
            return Err(Error::MetadataError(format!(
                "Primary XML declares {} packages but contains {}",
                expected,
                packages.len()
            )));
        }
    }

    Ok(packages)
}
