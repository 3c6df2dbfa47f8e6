//! File descriptors.
//!
//! A descriptor is the small, versioned pointer record kept in place of a
//! large data file: one content digest, size, modified timestamp, mime type,
//! caller-supplied domain identifiers, and a derived object id. Descriptors
//! are created by `register`, mutated only by field merge, and deleted only
//! by an explicit remove.

pub mod store;

use crate::canonical;
use crate::error::Error;
use crate::types::ObjectId;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Hashing domain prefix for object ids.
const OBJECT_DOMAIN: &str = "datashed:object";

/// Supported content-digest algorithms.
///
/// Every digest is lowercase hex with a fixed per-algorithm length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Md5,
    Sha1,
    Sha256,
    Sha512,
    Blake3,
}

impl HashAlgorithm {
    /// Expected digest length in hex characters.
    pub fn digest_len(&self) -> usize {
        match self {
            HashAlgorithm::Md5 => 32,
            HashAlgorithm::Sha1 => 40,
            HashAlgorithm::Sha256 => 64,
            HashAlgorithm::Sha512 => 128,
            HashAlgorithm::Blake3 => 64,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            HashAlgorithm::Md5 => "md5",
            HashAlgorithm::Sha1 => "sha1",
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Sha512 => "sha512",
            HashAlgorithm::Blake3 => "blake3",
        }
    }

    /// Validate a digest against this algorithm's fixed pattern.
    pub fn validate_digest(&self, digest: &str) -> Result<(), Error> {
        let valid = digest.len() == self.digest_len()
            && digest
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if valid {
            Ok(())
        } else {
            Err(Error::InvalidHash {
                algorithm: self.name().to_string(),
                digest: digest.to_string(),
                expected: self.digest_len(),
            })
        }
    }
}

impl std::fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Caller-supplied domain identifiers attached to a descriptor.
///
/// The known fields are a closed set; `extra` holds genuinely unknown
/// caller-supplied keys and nothing else.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identifiers {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specimen: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observation: Option<String>,
    /// Exclude the file bytes from bucket upload (metadata-only tracking).
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub no_bucket: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl Identifiers {
    /// Merge: new non-None fields override, None retains the prior value.
    pub fn merge(&mut self, other: &Identifiers) {
        if other.patient.is_some() {
            self.patient = other.patient.clone();
        }
        if other.specimen.is_some() {
            self.specimen = other.specimen.clone();
        }
        if other.task.is_some() {
            self.task = other.task.clone();
        }
        if other.observation.is_some() {
            self.observation = other.observation.clone();
        }
        if other.no_bucket {
            self.no_bucket = true;
        }
        for (key, value) in &other.extra {
            self.extra.insert(key.clone(), value.clone());
        }
    }
}

/// Per-file tracked record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileDescriptor {
    /// Project-relative path with forward slashes.
    pub path: String,

    /// Exactly one algorithm-keyed digest.
    pub hashes: BTreeMap<HashAlgorithm, String>,

    pub size: u64,

    /// Last-known modification time, ISO-8601 with offset.
    pub modified: DateTime<FixedOffset>,

    pub mime: String,

    #[serde(default)]
    pub is_symlink: bool,

    /// Resolved target for symlinks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub real_path: Option<PathBuf>,

    /// Remote origin for files not present on disk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,

    /// Deterministic function of (project_id, path).
    pub object_id: ObjectId,

    #[serde(default)]
    pub meta: Identifiers,
}

/// Derive the object id for a tracked path.
///
/// Pure in its inputs; repeated calls across processes yield the same id.
pub fn object_id(project_id: &str, path: &str) -> ObjectId {
    canonical::hash_parts(&[OBJECT_DOMAIN, project_id, path])
}

impl FileDescriptor {
    /// The single digest algorithm set on this descriptor.
    pub fn algorithm(&self) -> Option<HashAlgorithm> {
        self.hashes.keys().next().copied()
    }

    /// The single digest value set on this descriptor.
    pub fn digest(&self) -> Option<&str> {
        self.hashes.values().next().map(String::as_str)
    }

    /// Merge another descriptor's explicit fields into this one.
    ///
    /// A supplied digest replaces the hash map wholesale (exactly-one
    /// invariant); size and modified always track the incoming record, which
    /// `register` fully populates (zero is a real size, not an omission);
    /// the optional fields follow override-or-retain. Nothing is ever erased
    /// to null.
    pub fn merge(&mut self, other: &FileDescriptor) {
        if !other.hashes.is_empty() {
            self.hashes = other.hashes.clone();
        }
        self.size = other.size;
        self.modified = other.modified;
        if !other.mime.is_empty() {
            self.mime = other.mime.clone();
        }
        self.is_symlink = other.is_symlink;
        if other.real_path.is_some() {
            self.real_path = other.real_path.clone();
        }
        if other.source_url.is_some() {
            self.source_url = other.source_url.clone();
        }
        self.meta.merge(&other.meta);
    }

    /// Post-parse validation pass.
    ///
    /// Pure function over the parsed record, composed alongside any external
    /// structural validator rather than grafted onto it.
    pub fn validate(&self, project_id: &str) -> Vec<Error> {
        let mut errors = Vec::new();

        if self.hashes.len() != 1 {
            errors.push(Error::Validation(format!(
                "descriptor {} must carry exactly one digest, found {}",
                self.path,
                self.hashes.len()
            )));
        }
        for (algorithm, digest) in &self.hashes {
            if let Err(e) = algorithm.validate_digest(digest) {
                errors.push(e);
            }
        }
        if self.path.starts_with('/') || self.path.split('/').any(|c| c == "..") {
            errors.push(Error::Validation(format!(
                "descriptor path must be project-relative and normalized: {}",
                self.path
            )));
        }
        if self.real_path.is_none() && self.source_url.is_none() {
            errors.push(Error::Validation(format!(
                "descriptor {} references neither a real path nor a source url",
                self.path
            )));
        }
        if self.object_id != object_id(project_id, &self.path) {
            errors.push(Error::Validation(format!(
                "descriptor {} carries an object id not derived from its path",
                self.path
            )));
        }

        errors
    }
}
