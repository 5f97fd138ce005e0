// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.
//!
//! An [`Upstream`] is a yum repository laid out in a temporary directory and
//! addressed by a `file://` URL, so full syncs run without network access.

#![allow(dead_code)]

use flate2::write::GzEncoder;
use flate2::Compression;
use rpmirror::hash::{hash_bytes, HashAlgorithm};
use rpmirror::repository::{Repository, RepositoryClient, SyncContext};
use rpmirror::report::SilentReporter;
use sequoia_openpgp as openpgp;
use openpgp::cert::CertBuilder;
use openpgp::packet::signature::SignatureBuilder;
use openpgp::packet::Packet;
use openpgp::policy::StandardPolicy;
use openpgp::serialize::SerializeInto;
use openpgp::types::SignatureType;
use openpgp::Cert;
use std::fmt::Write as _;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use url::Url;

const LEAD_SIZE: usize = 96;
const HEADER_MAGIC: [u8; 4] = [0x8e, 0xad, 0xe8, 0x01];
const RPMSIGTAG_RSA: u32 = 268;
const BIN_TYPE: u32 = 7;

/// A package published by an [`Upstream`]
#[derive(Clone)]
pub struct Published {
    pub name: String,
    pub version: String,
    pub data: Vec<u8>,
    /// Checksum advertised in the primary metadata (normally the real one)
    pub checksum: String,
    /// Advertised in metadata but not served
    pub missing: bool,
}

impl Published {
    pub fn file_name(&self) -> String {
        format!("{}-{}-1.noarch.rpm", self.name, self.version)
    }
}

/// A yum repository on disk
pub struct Upstream {
    pub dir: TempDir,
    pub packages: Vec<Published>,
}

impl Upstream {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
            packages: Vec::new(),
        }
    }

    pub fn url(&self) -> String {
        Url::from_directory_path(self.dir.path()).unwrap().to_string()
    }

    /// Add an unsigned package
    pub fn add(&mut self, name: &str, version: &str) -> &mut Published {
        let data = unsigned_rpm(name, version);
        self.add_data(name, version, data)
    }

    /// Add a package signed by `cert`
    pub fn add_signed(&mut self, name: &str, version: &str, cert: &Cert) -> &mut Published {
        let data = sign_rpm(&unsigned_rpm(name, version), cert);
        self.add_data(name, version, data)
    }

    fn add_data(&mut self, name: &str, version: &str, data: Vec<u8>) -> &mut Published {
        let checksum = hash_bytes(HashAlgorithm::Sha256, &data);
        self.packages.push(Published {
            name: name.to_string(),
            version: version.to_string(),
            data,
            checksum,
            missing: false,
        });
        self.packages.last_mut().unwrap()
    }

    pub fn get(&self, name: &str) -> &Published {
        self.packages.iter().find(|p| p.name == name).unwrap()
    }

    /// Write packages, `primary.xml.gz` and `repomd.xml` for `revision`
    pub fn publish(&self, revision: u64) {
        let root = self.dir.path();
        let packages_dir = root.join("Packages");
        let repodata = root.join("repodata");
        let _ = fs::remove_dir_all(&packages_dir);
        let _ = fs::remove_dir_all(&repodata);
        fs::create_dir_all(&packages_dir).unwrap();
        fs::create_dir_all(&repodata).unwrap();

        let mut xml = format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<metadata xmlns=\"http://linux.duke.edu/metadata/common\" packages=\"{}\">\n",
            self.packages.len()
        );
        for pkg in &self.packages {
            if !pkg.missing {
                fs::write(packages_dir.join(pkg.file_name()), &pkg.data).unwrap();
            }
            write!(
                xml,
                r#"<package type="rpm">
  <name>{name}</name>
  <arch>noarch</arch>
  <version epoch="0" ver="{version}" rel="1"/>
  <checksum type="sha256" pkgid="YES">{checksum}</checksum>
  <time file="1700000000" build="1700000000"/>
  <size package="{size}"/>
  <location href="Packages/{file}"/>
</package>
"#,
                name = pkg.name,
                version = pkg.version,
                checksum = pkg.checksum,
                size = pkg.data.len(),
                file = pkg.file_name(),
            )
            .unwrap();
        }
        xml.push_str("</metadata>\n");

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(xml.as_bytes()).unwrap();
        let gz = encoder.finish().unwrap();
        let sum = hash_bytes(HashAlgorithm::Sha256, &gz);
        let name = format!("{}-primary.xml.gz", sum);
        fs::write(repodata.join(&name), &gz).unwrap();

        let index = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<repomd xmlns="http://linux.duke.edu/metadata/repo">
  <revision>{revision}</revision>
  <data type="primary">
    <checksum type="sha256">{sum}</checksum>
    <location href="repodata/{name}"/>
    <timestamp>{revision}</timestamp>
    <size>{size}</size>
  </data>
</repomd>
"#,
            size = gz.len()
        );
        fs::write(repodata.join("repomd.xml"), index).unwrap();
    }
}

/// Local side of a test mirror: package directory and metadata cache
pub struct Mirror {
    pub dir: TempDir,
}

impl Mirror {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    pub fn packages(&self) -> PathBuf {
        self.dir.path().join("packages")
    }

    pub fn cache(&self) -> PathBuf {
        self.dir.path().join("cache")
    }

    pub fn package(&self, file_name: &str) -> PathBuf {
        self.packages().join(file_name)
    }

    /// Repository descriptor mirroring `upstream` into this mirror
    pub fn repository(&self, id: &str, upstream: &Upstream) -> Repository {
        let mut repo = Repository::new(id, upstream.url());
        repo.local_path = Some(self.packages());
        repo
    }

    pub fn context(&self) -> SyncContext {
        let client = RepositoryClient::with_options(Duration::from_secs(10), 1).unwrap();
        SyncContext::new(client, self.cache())
            .with_workers(3)
            .with_reporter(Arc::new(SilentReporter))
    }

    /// File names currently in the package directory, sorted
    pub fn files(&self) -> Vec<String> {
        let mut names: Vec<String> = match fs::read_dir(self.packages()) {
            Ok(entries) => entries
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect(),
            Err(_) => Vec::new(),
        };
        names.sort();
        names
    }
}

/// Build an unsigned noarch RPM
pub fn unsigned_rpm(name: &str, version: &str) -> Vec<u8> {
    let pkg = rpm::PackageBuilder::new(name, version, "MIT", "noarch", "integration test package")
        .release("1")
        .build()
        .unwrap();
    let mut out = Vec::new();
    pkg.write(&mut out).unwrap();
    out
}

/// Generate a certificate with a signing subkey
pub fn signing_cert(userid: &str) -> Cert {
    let (cert, _revocation) = CertBuilder::new()
        .add_userid(userid)
        .add_signing_subkey()
        .generate()
        .unwrap();
    cert
}

/// Write the armored public certificate to `dir` and return its path
pub fn write_public_key(dir: &Path, cert: &Cert) -> PathBuf {
    let path = dir.join("RPM-GPG-KEY-test");
    fs::write(&path, cert.armored().to_vec().unwrap()).unwrap();
    path
}

fn header_size(data: &[u8], offset: usize) -> usize {
    let intro = &data[offset..offset + 16];
    assert_eq!(intro[..4], HEADER_MAGIC);
    let nindex = u32::from_be_bytes(intro[8..12].try_into().unwrap()) as usize;
    let hsize = u32::from_be_bytes(intro[12..16].try_into().unwrap()) as usize;
    16 + nindex * 16 + hsize
}

fn detached_signature(cert: &Cert, data: &[u8]) -> Vec<u8> {
    let policy = StandardPolicy::new();
    let mut keypair = cert
        .keys()
        .with_policy(&policy, None)
        .for_signing()
        .secret()
        .next()
        .unwrap()
        .key()
        .clone()
        .into_keypair()
        .unwrap();
    let sig = SignatureBuilder::new(SignatureType::Binary)
        .sign_message(&mut keypair, data)
        .unwrap();
    Packet::from(sig).to_vec().unwrap()
}

/// Replace the signature header with one holding an RSA header signature
pub fn sign_rpm(unsigned: &[u8], cert: &Cert) -> Vec<u8> {
    let sig_size = header_size(unsigned, LEAD_SIZE);
    let start = LEAD_SIZE + sig_size + (8 - sig_size % 8) % 8;
    let end = start + header_size(unsigned, start);
    let sig = detached_signature(cert, &unsigned[start..end]);

    let mut out = unsigned[..LEAD_SIZE].to_vec();
    out.extend_from_slice(&HEADER_MAGIC);
    out.extend_from_slice(&[0; 4]);
    out.extend_from_slice(&1u32.to_be_bytes());
    out.extend_from_slice(&(sig.len() as u32).to_be_bytes());
    out.extend_from_slice(&RPMSIGTAG_RSA.to_be_bytes());
    out.extend_from_slice(&BIN_TYPE.to_be_bytes());
    out.extend_from_slice(&0u32.to_be_bytes());
    out.extend_from_slice(&(sig.len() as u32).to_be_bytes());
    out.extend_from_slice(&sig);
    while (out.len() - LEAD_SIZE) % 8 != 0 {
        out.push(0);
    }
    out.extend_from_slice(&unsigned[start..]);
    out
}
