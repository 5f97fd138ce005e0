// src/repository/verify.rs

//! Post-download package verification
//!
//! Two independent checks run on every freshly downloaded package: the
//! declared checksum, and (when the repository enables GPG checking) the
//! OpenPGP signature embedded in the RPM signature header. Both fail closed:
//! a package that fails either check is removed from disk.
//!
//! RPM file layout, as far as signature checking is concerned:
//!
//! ```text
//! +------+------------------+-----+-------------+---------+
//! | lead | signature header | pad | main header | payload |
//! +------+------------------+-----+-------------+---------+
//!   96 B   covered by none    to 8  RSA/DSA sig   PGP sig covers
//!                                   covers this   header + payload
//! ```
//!
//! The main header records a digest of the payload, which is how a header
//! signature extends to the payload.

use super::gpg::Keyring;
use crate::error::{Error, Result};
use crate::hash::{self, Checksum, HashAlgorithm};
use rpm::{IndexSignatureTag, IndexTag};
use std::fs;
use std::io::Cursor;
use std::ops::Range;
use std::path::Path;
use tracing::{debug, warn};

const LEAD_SIZE: usize = 96;
const HEADER_MAGIC: [u8; 4] = [0x8e, 0xad, 0xe8, 0x01];
const HEADER_INTRO_SIZE: usize = 16;
const INDEX_ENTRY_SIZE: usize = 16;

/// Byte size of the header structure starting at `offset`
fn header_size(data: &[u8], offset: usize) -> Result<usize> {
    let intro = data
        .get(offset..offset + HEADER_INTRO_SIZE)
        .ok_or_else(|| Error::GpgVerificationFailed("Truncated RPM header".to_string()))?;
    if intro[..4] != HEADER_MAGIC {
        return Err(Error::GpgVerificationFailed("Bad RPM header magic".to_string()));
    }

    let nindex = u32::from_be_bytes([intro[8], intro[9], intro[10], intro[11]]) as usize;
    let hsize = u32::from_be_bytes([intro[12], intro[13], intro[14], intro[15]]) as usize;
    nindex
        .checked_mul(INDEX_ENTRY_SIZE)
        .and_then(|n| n.checked_add(HEADER_INTRO_SIZE + hsize))
        .ok_or_else(|| Error::GpgVerificationFailed("Corrupt RPM header size".to_string()))
}

/// Byte range of the main (immutable) header
fn main_header_range(data: &[u8]) -> Result<Range<usize>> {
    let sig_size = header_size(data, LEAD_SIZE)?;
    let padding = (8 - sig_size % 8) % 8;
    let start = LEAD_SIZE + sig_size + padding;
    let end = start + header_size(data, start)?;
    if end > data.len() {
        return Err(Error::GpgVerificationFailed("Truncated RPM header".to_string()));
    }
    Ok(start..end)
}

/// Verify a file against its declared checksum
pub fn verify_checksum(path: &Path, checksum: &Checksum) -> Result<()> {
    hash::verify_file(path, checksum)
}

/// Check the payload against the digest recorded in the main header
///
/// A header signature says nothing about the payload by itself; this ties the
/// two together.
fn verify_payload_digest(pkg: &rpm::Package, payload: &[u8], path: &Path) -> Result<()> {
    let header = &pkg.metadata.header;
    let expected = header
        .get_entry_data_as_string_array(IndexTag::RPMTAG_PAYLOADDIGEST)
        .ok()
        .and_then(|digests| digests.first())
        .ok_or_else(|| {
            Error::GpgVerificationFailed(format!(
                "{} has a header signature but no payload digest",
                path.display()
            ))
        })?;

    // rpm hash algorithm ids; packages without the tag use SHA-256
    let algorithm = match header.get_entry_data_as_u32(IndexTag::RPMTAG_PAYLOADDIGESTALGO) {
        Err(_) | Ok(8) => HashAlgorithm::Sha256,
        Ok(9) => HashAlgorithm::Sha384,
        Ok(10) => HashAlgorithm::Sha512,
        Ok(11) => HashAlgorithm::Sha224,
        Ok(other) => {
            return Err(Error::GpgVerificationFailed(format!(
                "{} uses unsupported payload digest algorithm {}",
                path.display(),
                other
            )))
        }
    };

    let actual = hash::hash_bytes(algorithm, payload);
    if !actual.eq_ignore_ascii_case(expected) {
        return Err(Error::GpgVerificationFailed(format!(
            "{} payload does not match its signed digest",
            path.display()
        )));
    }
    Ok(())
}

/// Verify the OpenPGP signature embedded in an RPM against `keyring`
///
/// Header signatures (RSA, DSA) cover the main header, so the payload must
/// also match the digest that header records. The legacy PGP signature covers
/// header and payload directly. Any one of them made by a trusted key is
/// sufficient. A package carrying no signature at all fails.
pub fn verify_signature(path: &Path, keyring: &Keyring) -> Result<()> {
    let data = fs::read(path)
        .map_err(|e| Error::IoError(format!("Failed to read {}: {}", path.display(), e)))?;

    let pkg = rpm::Package::parse(&mut Cursor::new(&data)).map_err(|e| {
        Error::GpgVerificationFailed(format!("{} is not a valid RPM: {}", path.display(), e))
    })?;
    let header = main_header_range(&data)?;

    let candidates = [
        (IndexSignatureTag::RPMSIGTAG_RSA, "RSA", &data[header.clone()], false),
        (IndexSignatureTag::RPMSIGTAG_DSA, "DSA", &data[header.clone()], false),
        (IndexSignatureTag::RPMSIGTAG_PGP, "PGP", &data[header.start..], true),
    ];

    let mut signed = false;
    for (tag, kind, covered, covers_payload) in candidates {
        if let Ok(sig) = pkg.metadata.signature.get_entry_data_as_binary(tag) {
            signed = true;
            if keyring.verify_detached(covered, sig).is_ok() {
                debug!("Verified {} signature of {}", kind, path.display());
                if !covers_payload {
                    verify_payload_digest(&pkg, &data[header.end..], path)?;
                }
                return Ok(());
            }
        }
    }

    if signed {
        Err(Error::GpgVerificationFailed(format!(
            "{} is not signed by a trusted key",
            path.display()
        )))
    } else {
        Err(Error::GpgVerificationFailed(format!(
            "{} is not signed",
            path.display()
        )))
    }
}

/// Remove a rejected file, keeping the rejection as the reported error
fn discard(path: &Path, err: Error) -> Error {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!("Removed rejected file {}", path.display());
            err
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => err,
        Err(e) => {
            warn!("Failed to remove rejected file {}: {}", path.display(), e);
            match err {
                Error::GpgVerificationFailed(msg) => Error::GpgVerificationFailed(format!(
                    "{msg} (removing {} failed: {e})",
                    path.display()
                )),
                Error::ChecksumMismatch { expected, actual } => Error::ChecksumMismatch {
                    expected,
                    actual: format!("{actual} (removing {} failed: {e})", path.display()),
                },
                other => other,
            }
        }
    }
}

/// Verify a freshly downloaded package, deleting it on any integrity failure
pub fn verify_package(path: &Path, checksum: &Checksum, keyring: Option<&Keyring>) -> Result<()> {
    if let Err(e) = verify_checksum(path, checksum) {
        return Err(if e.is_integrity_failure() {
            discard(path, e)
        } else {
            e
        });
    }

    if let Some(keyring) = keyring {
        if let Err(e) = verify_signature(path, keyring) {
            return Err(discard(path, e));
        }
    }

    Ok(())
}
