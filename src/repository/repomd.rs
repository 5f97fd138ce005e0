// src/repository/repomd.rs

//! `repodata/repomd.xml` index parsing
//!
//! The index is small and cheap to fetch; it names every metadata file of a
//! repository together with its checksum, and carries the revision marker
//! used to decide whether the local metadata cache is stale.

use crate::compression::CompressionFormat;
use crate::error::{Error, Result};
use crate::hash::Checksum;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

/// Relative location of the index below a repository base URL
pub const REPOMD_PATH: &str = "repodata/repomd.xml";

/// One `<data>` entry of the index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoMdData {
    /// Metadata kind (`primary`, `primary_db`, `filelists`, ...)
    pub data_type: String,
    /// Location relative to the repository base URL
    pub location: String,
    /// Checksum of the file as stored (compressed)
    pub checksum: Checksum,
    pub open_checksum: Option<Checksum>,
    pub timestamp: Option<i64>,
    pub size: Option<u64>,
}

/// Parsed `repomd.xml`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepoMd {
    pub revision: Option<String>,
    pub data: Vec<RepoMdData>,
}

/// Read an attribute value from an element
pub(super) fn attribute(e: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>> {
    for attr in e.attributes() {
        let attr = attr.map_err(|e| Error::ParseError(format!("Malformed XML attribute: {e}")))?;
        if attr.key.as_ref() == key {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

#[derive(Default)]
struct DataBuilder {
    data_type: String,
    location: Option<String>,
    checksum: Option<(String, String)>,
    open_checksum: Option<(String, String)>,
    timestamp: Option<i64>,
    size: Option<u64>,
}

impl DataBuilder {
    fn build(self) -> Result<RepoMdData> {
        let location = self.location.ok_or_else(|| {
            Error::MetadataError(format!("repomd entry '{}' has no location", self.data_type))
        })?;
        let (algo, value) = self.checksum.ok_or_else(|| {
            Error::MetadataError(format!("repomd entry '{}' has no checksum", self.data_type))
        })?;
        let checksum = Checksum::from_metadata(&algo, &value)?;
        let open_checksum = match self.open_checksum {
            Some((algo, value)) => Some(Checksum::from_metadata(&algo, &value)?),
            None => None,
        };

        Ok(RepoMdData {
            data_type: self.data_type,
            location,
            checksum,
            open_checksum,
            timestamp: self.timestamp,
            size: self.size,
        })
    }
}

impl RepoMd {
    /// Parse a `repomd.xml` document
    pub fn parse(xml: &[u8]) -> Result<Self> {
        let mut reader = Reader::from_reader(xml);
        reader.trim_text(true);

        let mut repomd = RepoMd::default();
        let mut current: Option<DataBuilder> = None;
        let mut text_target: Option<Vec<u8>> = None;
        let mut checksum_type: Option<String> = None;
        let mut saw_root = false;
        let mut buf = Vec::new();

        loop {
            match reader.read_event_into(&mut buf)? {
                Event::Start(e) => {
                    let name = e.name().as_ref().to_vec();
                    match name.as_slice() {
                        b"repomd" => saw_root = true,
                        b"data" => {
                            current = Some(DataBuilder {
                                data_type: attribute(&e, b"type")?.unwrap_or_default(),
                                ..Default::default()
                            });
                        }
                        b"checksum" | b"open-checksum" => {
                            checksum_type = attribute(&e, b"type")?;
                        }
                        _ => {}
                    }
                    text_target = Some(name);
                }
                Event::Empty(e) => match e.name().as_ref() {
                    b"repomd" => saw_root = true,
                    b"location" => {
                        if let Some(data) = current.as_mut() {
                            data.location = attribute(&e, b"href")?;
                        }
                    }
                    _ => {}
                },
                Event::Text(t) => {
                    let text = t.unescape()?.into_owned();
                    match (text_target.as_deref(), current.as_mut()) {
                        (Some(b"revision"), None) => repomd.revision = Some(text),
                        (Some(b"checksum"), Some(data)) => {
                            data.checksum = Some((checksum_type.take().unwrap_or_default(), text));
                        }
                        (Some(b"open-checksum"), Some(data)) => {
                            data.open_checksum =
                                Some((checksum_type.take().unwrap_or_default(), text));
                        }
                        (Some(b"timestamp"), Some(data)) => data.timestamp = text.parse().ok(),
                        (Some(b"size"), Some(data)) => data.size = text.parse().ok(),
                        _ => {}
                    }
                }
                Event::End(e) => {
                    if e.name().as_ref() == b"data" {
                        if let Some(data) = current.take() {
                            repomd.data.push(data.build()?);
                        }
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
                "repomd.xml has no <repomd> root element".to_string(),
            ));
        }

        Ok(repomd)
    }

    /// Find a metadata entry by type
    pub fn find(&self, data_type: &str) -> Option<&RepoMdData> {
        self.data.iter().find(|d| d.data_type == data_type)
    }

    /// The primary package list, preferring the SQLite database
    ///
    /// Entries stored in an unsupported compression are skipped, so a
    /// repository publishing `primary.sqlite.bz2` falls back to the XML form.
    pub fn primary(&self) -> Option<&RepoMdData> {
        ["primary_db", "primary"]
            .into_iter()
            .filter_map(|t| self.find(t))
            .find(|d| CompressionFormat::from_extension(&d.location).is_ok())
    }

    /// Freshness marker: the revision, or the newest data timestamp
    pub fn marker(&self) -> Option<String> {
        self.revision.clone().or_else(|| {
            self.data
                .iter()
                .filter_map(|d| d.timestamp)
                .max()
                .map(|ts| ts.to_string())
        })
    }
}
