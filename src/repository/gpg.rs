// src/repository/gpg.rs

//! GPG keyring loading and signature verification
//!
//! This module verifies OpenPGP signatures against a repository's trusted
//! keys using the sequoia-openpgp library (pure Rust implementation).

use super::client::RepositoryClient;
use crate::error::{Error, Result};
use openpgp::cert::CertParser;
use openpgp::parse::Parse;
use openpgp::policy::StandardPolicy;
use openpgp::{Cert, Packet, PacketPile};
use sequoia_openpgp as openpgp;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

const ARMOR_HEADER: &str = "-----BEGIN PGP";

/// Trusted public keys of one repository
///
/// Read-only once loaded, so it can be shared across verification workers.
pub struct Keyring {
    certs: Vec<Cert>,
    policy: StandardPolicy<'static>,
}

impl Keyring {
    /// Parse every certificate contained in `data` (armored or binary)
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let parser = CertParser::from_bytes(data)
            .map_err(|e| Error::KeyringError(format!("Failed to parse GPG key: {}", e)))?;

        let mut certs = Vec::new();
        for cert in parser {
            let cert = cert
                .map_err(|e| Error::KeyringError(format!("Failed to parse GPG key: {}", e)))?;
            debug!("Loaded GPG key with fingerprint: {}", cert.fingerprint());
            certs.push(cert);
        }

        if certs.is_empty() {
            return Err(Error::KeyringError("No GPG keys found in key material".to_string()));
        }

        Ok(Self {
            certs,
            policy: StandardPolicy::new(),
        })
    }

    /// Load a keyring from a `gpgkey` reference
    ///
    /// The reference is inline armored key material, or a whitespace
    /// separated list of paths and `file://`/`http(s)://` URLs whose keys are
    /// all trusted.
    pub fn load(reference: &str, client: &RepositoryClient) -> Result<Self> {
        let reference = reference.trim();
        if reference.starts_with(ARMOR_HEADER) {
            return Self::from_bytes(reference.as_bytes());
        }

        let mut certs = Vec::new();
        for source in reference.split_whitespace() {
            let data = if source.contains("://") {
                client.download_to_bytes(source).map_err(|e| {
                    Error::KeyringError(format!("Failed to fetch GPG key {}: {}", source, e))
                })?
            } else {
                fs::read(Path::new(source)).map_err(|e| {
                    Error::KeyringError(format!("Failed to read GPG key file {}: {}", source, e))
                })?
            };
            certs.extend(Self::from_bytes(&data)?.certs);
        }

        if certs.is_empty() {
            return Err(Error::KeyringError("Empty GPG key reference".to_string()));
        }

        info!("Loaded {} GPG key(s)", certs.len());
        Ok(Self {
            certs,
            policy: StandardPolicy::new(),
        })
    }

    pub fn len(&self) -> usize {
        self.certs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.certs.is_empty()
    }

    /// Fingerprints of all loaded certificates
    pub fn fingerprints(&self) -> Vec<String> {
        self.certs.iter().map(|c| c.fingerprint().to_string()).collect()
    }

    /// Verify a detached signature over `data`
    ///
    /// Succeeds if any signature packet in `signature` was made by a
    /// signing-capable key of any trusted certificate.
    pub fn verify_detached(&self, data: &[u8], signature: &[u8]) -> Result<()> {
        let signature_pile = PacketPile::from_bytes(signature)
            .map_err(|e| Error::GpgVerificationFailed(format!("Failed to parse signature: {}", e)))?;

        for packet in signature_pile.descendants() {
            if let Packet::Signature(sig) = packet {
                for cert in &self.certs {
                    for key in cert.keys().with_policy(&self.policy, None) {
                        if key.for_signing() && sig.verify_message(key.key(), data).is_ok() {
                            debug!("Signature verified with key {}", key.key().fingerprint());
                            return Ok(());
                        }
                    }
                }
            }
        }

        Err(Error::GpgVerificationFailed(
            "No valid signatures found or verification failed".to_string(),
        ))
    }
}
