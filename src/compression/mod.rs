// src/compression/mod.rs
//! Decompression of repository metadata files
//!
//! `repomd.xml` points at primary metadata that is usually compressed
//! (`primary.xml.gz`, `primary.sqlite.xz`, `primary.sqlite.zst`). The format
//! is taken from the file extension and cross-checked against magic bytes,
//! so a mislabelled file fails instead of being decoded as garbage.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;
use thiserror::Error;

/// Compression-related errors
#[derive(Error, Debug)]
pub enum CompressionError {
    #[error("Failed to create {format} decoder: {source}")]
    DecoderCreation {
        format: &'static str,
        source: io::Error,
    },

    #[error("Failed to decompress {format} data: {source}")]
    Decompression {
        format: &'static str,
        source: io::Error,
    },

    #[error("Unsupported compression format: {0}")]
    UnsupportedFormat(String),

    #[error("File labelled {labelled} but content looks like {detected}")]
    FormatMismatch {
        labelled: CompressionFormat,
        detected: CompressionFormat,
    },
}

impl From<CompressionError> for crate::Error {
    fn from(e: CompressionError) -> Self {
        crate::Error::MetadataError(e.to_string())
    }
}

/// Supported compression formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionFormat {
    /// No compression (raw data)
    None,
    /// Gzip compression (.gz)
    Gzip,
    /// XZ/LZMA compression (.xz)
    Xz,
    /// Zstandard compression (.zst)
    Zstd,
}

impl CompressionFormat {
    /// Detect compression format from a file name
    ///
    /// Returns an error for compressions that appear in the wild but are not
    /// supported (`.bz2`).
    pub fn from_extension(path: &str) -> Result<Self, CompressionError> {
        if path.ends_with(".gz") || path.ends_with(".tgz") {
            Ok(Self::Gzip)
        } else if path.ends_with(".xz") {
            Ok(Self::Xz)
        } else if path.ends_with(".zst") || path.ends_with(".zstd") {
            Ok(Self::Zstd)
        } else if path.ends_with(".bz2") {
            Err(CompressionError::UnsupportedFormat("bzip2".to_string()))
        } else {
            Ok(Self::None)
        }
    }

    /// Detect compression format from magic bytes
    ///
    /// Magic bytes:
    /// - Gzip: `1f 8b`
    /// - XZ: `fd 37 7a 58 5a 00`
    /// - Zstd: `28 b5 2f fd`
    pub fn from_magic_bytes(data: &[u8]) -> Self {
        if data.starts_with(&[0x1f, 0x8b]) {
            Self::Gzip
        } else if data.starts_with(&[0xfd, 0x37, 0x7a, 0x58, 0x5a, 0x00]) {
            Self::Xz
        } else if data.starts_with(&[0x28, 0xb5, 0x2f, 0xfd]) {
            Self::Zstd
        } else {
            Self::None
        }
    }

    /// Get a human-readable name for this format
    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Gzip => "gzip",
            Self::Xz => "xz",
            Self::Zstd => "zstd",
        }
    }
}

impl std::fmt::Display for CompressionFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Create a decompressing reader for the given format
pub fn create_decoder<'a, R: Read + 'a>(
    reader: R,
    format: CompressionFormat,
) -> Result<Box<dyn Read + 'a>, CompressionError> {
    match format {
        CompressionFormat::None => Ok(Box::new(reader)),
        CompressionFormat::Gzip => Ok(Box::new(flate2::read::MultiGzDecoder::new(reader))),
        CompressionFormat::Xz => Ok(Box::new(xz2::read::XzDecoder::new(reader))),
        CompressionFormat::Zstd => {
            let decoder = zstd::Decoder::new(reader).map_err(|e| CompressionError::DecoderCreation {
                format: "zstd",
                source: e,
            })?;
            Ok(Box::new(decoder))
        }
    }
}

/// Open a metadata file as a decompressed stream
///
/// The format is chosen from the file name and must agree with the magic
/// bytes when the name claims compression.
pub fn open_decoded(path: &Path) -> Result<Box<dyn Read>, CompressionError> {
    let name = path.to_string_lossy();
    let labelled = CompressionFormat::from_extension(&name)?;

    let mut magic = [0u8; 6];
    let read = {
        let mut file = File::open(path).map_err(|e| CompressionError::DecoderCreation {
            format: labelled.name(),
            source: e,
        })?;
        read_prefix(&mut file, &mut magic).map_err(|e| CompressionError::DecoderCreation {
            format: labelled.name(),
            source: e,
        })?
    };
    let detected = CompressionFormat::from_magic_bytes(&magic[..read]);
    if labelled != CompressionFormat::None && detected != labelled {
        return Err(CompressionError::FormatMismatch { labelled, detected });
    }

    let file = File::open(path).map_err(|e| CompressionError::DecoderCreation {
        format: labelled.name(),
        source: e,
    })?;
    create_decoder(BufReader::new(file), labelled)
}

/// Decompress a metadata file into `dest`, returning the decompressed size
pub fn decompress_file(src: &Path, dest: &Path) -> Result<u64, CompressionError> {
    let mut decoder = open_decoded(src)?;
    let format = CompressionFormat::from_extension(&src.to_string_lossy())?;
    let mut out = File::create(dest).map_err(|e| CompressionError::Decompression {
        format: format.name(),
        source: e,
    })?;
    io::copy(&mut decoder, &mut out).map_err(|e| CompressionError::Decompression {
        format: format.name(),
        source: e,
    })
}

/// Decompress a byte slice using the specified format
pub fn decompress(data: &[u8], format: CompressionFormat) -> Result<Vec<u8>, CompressionError> {
    let mut decoder = create_decoder(data, format)?;
    let mut output = Vec::new();
    decoder
        .read_to_end(&mut output)
        .map_err(|e| CompressionError::Decompression {
            format: format.name(),
            source: e,
        })?;
    Ok(output)
}

fn read_prefix(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tempfile::TempDir;

    // Minimal gzip of "hello"
    const GZIP_HELLO: &[u8] = &[
        0x1f, 0x8b, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x03, 0xcb, 0x48, 0xcd, 0xc9,
        0xc9, 0x07, 0x00, 0x86, 0xa6, 0x10, 0x36, 0x05, 0x00, 0x00, 0x00,
    ];

    #[test]
    fn test_format_from_extension() {
        assert_eq!(CompressionFormat::from_extension("primary.xml.gz").unwrap(), CompressionFormat::Gzip);
        assert_eq!(CompressionFormat::from_extension("primary.sqlite.xz").unwrap(), CompressionFormat::Xz);
        assert_eq!(CompressionFormat::from_extension("primary.sqlite.zst").unwrap(), CompressionFormat::Zstd);
        assert_eq!(CompressionFormat::from_extension("primary.xml").unwrap(), CompressionFormat::None);
        assert!(matches!(
            CompressionFormat::from_extension("primary.sqlite.bz2"),
            Err(CompressionError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_format_from_magic_bytes() {
        assert_eq!(CompressionFormat::from_magic_bytes(GZIP_HELLO), CompressionFormat::Gzip);
        assert_eq!(
            CompressionFormat::from_magic_bytes(&[0xfd, 0x37, 0x7a, 0x58, 0x5a, 0x00]),
            CompressionFormat::Xz
        );
        assert_eq!(
            CompressionFormat::from_magic_bytes(&[0x28, 0xb5, 0x2f, 0xfd]),
            CompressionFormat::Zstd
        );
        assert_eq!(CompressionFormat::from_magic_bytes(b"<?xml"), CompressionFormat::None);
        assert_eq!(CompressionFormat::from_magic_bytes(&[0x1f]), CompressionFormat::None);
    }

    #[test]
    fn test_decompress_gzip() {
        assert_eq!(decompress(GZIP_HELLO, CompressionFormat::Gzip).unwrap(), b"hello");
    }

    #[test]
    fn test_decompress_file_roundtrip_gzip() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("primary.xml.gz");
        let dest = dir.path().join("primary.xml");

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"<metadata/>").unwrap();
        std::fs::write(&src, encoder.finish().unwrap()).unwrap();

        let size = decompress_file(&src, &dest).unwrap();
        assert_eq!(size, 11);
        assert_eq!(std::fs::read(&dest).unwrap(), b"<metadata/>");
    }

    #[test]
    fn test_mislabelled_file_rejected() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("primary.xml.gz");
        std::fs::write(&src, b"<metadata/>").unwrap();

        assert!(matches!(
            open_decoded(&src),
            Err(CompressionError::FormatMismatch { .. })
        ));
    }
}
