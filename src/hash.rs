// src/hash.rs

//! Checksum computation and verification for repository content
//!
//! Repository metadata declares one digest per package (and per metadata
//! file) together with the algorithm that produced it. This module maps the
//! algorithm names found in `repomd.xml` and the primary database onto
//! concrete hashers:
//!
//! | Metadata name        | Algorithm |
//! |----------------------|-----------|
//! | `md5`                | MD5       |
//! | `sha`, `sha1`        | SHA-1     |
//! | `sha224`             | SHA-224   |
//! | `sha256`             | SHA-256   |
//! | `sha384`             | SHA-384   |
//! | `sha512`             | SHA-512   |

use crate::error::{Error, Result};
use md5::Md5;
use serde::Serialize;
use sha1::Sha1;
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;

/// Checksum algorithm declared by repository metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Md5,
    Sha1,
    Sha224,
    #[default]
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    /// Get the hash output length in bytes
    #[inline]
    pub const fn output_len(&self) -> usize {
        match self {
            Self::Md5 => 16,
            Self::Sha1 => 20,
            Self::Sha224 => 28,
            Self::Sha256 => 32,
            Self::Sha384 => 48,
            Self::Sha512 => 64,
        }
    }

    /// Get the hash output length as a hex string
    #[inline]
    pub const fn hex_len(&self) -> usize {
        self.output_len() * 2
    }

    /// Canonical metadata name
    #[inline]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha1 => "sha1",
            Self::Sha224 => "sha224",
            Self::Sha256 => "sha256",
            Self::Sha384 => "sha384",
            Self::Sha512 => "sha512",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = HashError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "md5" => Ok(Self::Md5),
            // createrepo writes "sha" for SHA-1 in older repositories
            "sha" | "sha1" | "sha-1" => Ok(Self::Sha1),
            "sha224" | "sha-224" => Ok(Self::Sha224),
            "sha256" | "sha-256" => Ok(Self::Sha256),
            "sha384" | "sha-384" => Ok(Self::Sha384),
            "sha512" | "sha-512" => Ok(Self::Sha512),
            _ => Err(HashError::UnknownAlgorithm(s.to_string())),
        }
    }
}

/// Hash parsing errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HashError {
    /// Unknown hash algorithm name
    UnknownAlgorithm(String),
    /// Hash string has wrong length for algorithm
    InvalidLength { expected: usize, got: usize },
    /// Hash string contains invalid hex characters
    InvalidHex(String),
}

impl fmt::Display for HashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownAlgorithm(name) => write!(f, "unknown hash algorithm: {}", name),
            Self::InvalidLength { expected, got } => {
                write!(f, "invalid hash length: expected {}, got {}", expected, got)
            }
            Self::InvalidHex(s) => write!(f, "invalid hex in hash: {}", s),
        }
    }
}

impl std::error::Error for HashError {}

impl From<HashError> for Error {
    fn from(e: HashError) -> Self {
        match e {
            HashError::UnknownAlgorithm(name) => Error::UnsupportedChecksum(name),
            other => Error::ParseError(other.to_string()),
        }
    }
}

/// A declared digest: algorithm plus lowercase hex value
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Checksum {
    pub algorithm: HashAlgorithm,
    pub value: String,
}

impl Checksum {
    /// Create a checksum, validating length and hex characters
    pub fn new(algorithm: HashAlgorithm, value: impl Into<String>) -> std::result::Result<Self, HashError> {
        let value = value.into();
        let value = value.trim();
        let expected_len = algorithm.hex_len();

        if value.len() != expected_len {
            return Err(HashError::InvalidLength {
                expected: expected_len,
                got: value.len(),
            });
        }

        if !value.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(HashError::InvalidHex(value.to_string()));
        }

        Ok(Self {
            algorithm,
            value: value.to_lowercase(),
        })
    }

    /// Build from the `(type, value)` pair found in repository metadata
    pub fn from_metadata(algorithm: &str, value: &str) -> std::result::Result<Self, HashError> {
        Self::new(algorithm.parse()?, value)
    }

    /// Get the hash value as a hex string
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.value)
    }
}

/// Incremental hasher over any supported algorithm
pub struct Hasher {
    state: HasherState,
}

enum HasherState {
    Md5(Md5),
    Sha1(Sha1),
    Sha224(Sha224),
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
}

impl Hasher {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        let state = match algorithm {
            HashAlgorithm::Md5 => HasherState::Md5(Md5::new()),
            HashAlgorithm::Sha1 => HasherState::Sha1(Sha1::new()),
            HashAlgorithm::Sha224 => HasherState::Sha224(Sha224::new()),
            HashAlgorithm::Sha256 => HasherState::Sha256(Sha256::new()),
            HashAlgorithm::Sha384 => HasherState::Sha384(Sha384::new()),
            HashAlgorithm::Sha512 => HasherState::Sha512(Sha512::new()),
        };
        Self { state }
    }

    pub fn update(&mut self, data: &[u8]) {
        match &mut self.state {
            HasherState::Md5(h) => h.update(data),
            HasherState::Sha1(h) => h.update(data),
            HasherState::Sha224(h) => h.update(data),
            HasherState::Sha256(h) => h.update(data),
            HasherState::Sha384(h) => h.update(data),
            HasherState::Sha512(h) => h.update(data),
        }
    }

    /// Finalize and return the lowercase hex digest
    pub fn finalize(self) -> String {
        match self.state {
            HasherState::Md5(h) => format!("{:x}", h.finalize()),
            HasherState::Sha1(h) => format!("{:x}", h.finalize()),
            HasherState::Sha224(h) => format!("{:x}", h.finalize()),
            HasherState::Sha256(h) => format!("{:x}", h.finalize()),
            HasherState::Sha384(h) => format!("{:x}", h.finalize()),
            HasherState::Sha512(h) => format!("{:x}", h.finalize()),
        }
    }
}

/// Compute hash of a byte slice
pub fn hash_bytes(algorithm: HashAlgorithm, data: &[u8]) -> String {
    let mut hasher = Hasher::new(algorithm);
    hasher.update(data);
    hasher.finalize()
}

/// Compute hash of data from a reader
pub fn hash_reader<R: Read>(algorithm: HashAlgorithm, reader: &mut R) -> io::Result<String> {
    let mut hasher = Hasher::new(algorithm);
    let mut buffer = [0u8; 64 * 1024];

    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hasher.finalize())
}

/// Compute hash of a file, streaming its content
pub fn hash_file(algorithm: HashAlgorithm, path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    hash_reader(algorithm, &mut file)
}

/// Verify a file against a declared checksum
///
/// Returns [`Error::ChecksumMismatch`] when the content differs and an I/O
/// error when the file cannot be read, so callers can tell corruption apart
/// from infrastructure failures.
pub fn verify_file(path: &Path, expected: &Checksum) -> Result<()> {
    let actual = hash_file(expected.algorithm, path).map_err(|e| {
        Error::IoError(format!("Failed to read {} for checksum: {e}", path.display()))
    })?;

    if actual == expected.value {
        Ok(())
    } else {
        Err(Error::ChecksumMismatch {
            expected: expected.value.clone(),
            actual,
        })
    }
}

/// Verify bytes against a declared checksum
pub fn verify_bytes(data: &[u8], expected: &Checksum) -> Result<()> {
    let actual = hash_bytes(expected.algorithm, data);
    if actual == expected.value {
        Ok(())
    } else {
        Err(Error::ChecksumMismatch {
            expected: expected.value.clone(),
            actual,
        })
    }
}
