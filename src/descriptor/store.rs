//! Descriptor persistence and registration.
//!
//! One JSON pointer file per tracked path, mirrored under
//! `.datashed/descriptors/`. These files are small, line-oriented text kept
//! in the ordinary VCS; the data files they point at are not.

use crate::canonical;
use crate::config::ProjectConfig;
use crate::descriptor::{object_id, FileDescriptor, HashAlgorithm, Identifiers};
use crate::error::Error;
use chrono::{DateTime, FixedOffset, Local};
use sha2::Digest;
use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// Chunk size for streaming content digests.
const HASH_CHUNK_SIZE: usize = 64 * 1024;

/// Explicit fields for `register`; omitted fields default from the
/// filesystem or retain the prior descriptor value on re-registration.
#[derive(Debug, Clone, Default)]
pub struct RegisterOptions {
    pub algorithm: Option<HashAlgorithm>,
    pub digest: Option<String>,
    pub size: Option<u64>,
    pub modified: Option<DateTime<FixedOffset>>,
    pub mime: Option<String>,
    pub source_url: Option<String>,
    pub identifiers: Identifiers,
    /// Hash a canonicalized (sorted-key) serialization instead of raw bytes.
    /// Only meaningful for files that parse as JSON.
    pub canonical: bool,
}

/// Filesystem-backed descriptor store for one project checkout.
///
/// Assumed single-writer per checkout; no locking discipline beyond that.
pub struct DescriptorStore {
    root: PathBuf,
    project_id: String,
    default_algorithm: HashAlgorithm,
    dir: PathBuf,
}

impl DescriptorStore {
    /// Open (creating if needed) the store for a project.
    pub fn open(config: &ProjectConfig) -> Result<Self, Error> {
        let dir = config.descriptors_dir();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            root: config.root.clone(),
            project_id: config.project_id.clone(),
            default_algorithm: config.default_algorithm,
            dir,
        })
    }

    /// Register a file, creating or merging its descriptor.
    pub fn register(&self, path: &Path, opts: RegisterOptions) -> Result<FileDescriptor, Error> {
        let rel = self.normalize(path)?;
        let abs = self.root.join(&rel);
        let stat = fs::symlink_metadata(&abs).ok();

        if stat.is_none() && opts.source_url.is_none() {
            return Err(Error::FileNotFound(abs));
        }

        let algorithm = opts.algorithm.unwrap_or(self.default_algorithm);
        let digest = match &opts.digest {
            Some(d) => {
                algorithm.validate_digest(d)?;
                d.clone()
            }
            None => {
                if stat.is_none() {
                    return Err(Error::Validation(format!(
                        "remote-only descriptor {} requires an explicit digest",
                        rel
                    )));
                }
                if opts.canonical {
                    digest_canonical(algorithm, &abs)?
                } else {
                    digest_file(algorithm, &abs)?
                }
            }
        };

        let size = match opts.size {
            Some(s) => s,
            None => stat.as_ref().map(|m| m.len()).ok_or_else(|| {
                Error::Validation(format!(
                    "remote-only descriptor {} requires an explicit size",
                    rel
                ))
            })?,
        };

        let modified = match opts.modified {
            Some(m) => m,
            None => match &stat {
                Some(meta) => system_time_to_offset(meta.modified()?),
                None => Local::now().fixed_offset(),
            },
        };

        let mime = opts.mime.clone().unwrap_or_else(|| {
            mime_guess::from_path(&abs)
                .first_or_octet_stream()
                .essence_str()
                .to_string()
        });

        let is_symlink = stat
            .as_ref()
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false);
        let real_path = match &stat {
            Some(_) => Some(dunce::canonicalize(&abs)?),
            None => None,
        };

        let mut hashes = BTreeMap::new();
        hashes.insert(algorithm, digest);

        let incoming = FileDescriptor {
            path: rel.clone(),
            hashes,
            size,
            modified,
            mime,
            is_symlink,
            real_path,
            source_url: opts.source_url.clone(),
            object_id: object_id(&self.project_id, &rel),
            meta: opts.identifiers.clone(),
        };

        let descriptor = match self.get(&rel)? {
            Some(mut existing) => {
                existing.merge(&incoming);
                debug!(path = %rel, "merged descriptor fields");
                existing
            }
            None => incoming,
        };

        if let Some(error) = descriptor.validate(&self.project_id).into_iter().next() {
            return Err(error);
        }

        self.put(&descriptor)?;
        info!(path = %rel, object_id = %descriptor.object_id, "registered descriptor");
        Ok(descriptor)
    }

    /// Load the descriptor for a project-relative path, if tracked.
    pub fn get(&self, rel: &str) -> Result<Option<FileDescriptor>, Error> {
        let path = self.descriptor_path(rel);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    /// Persist a descriptor, overwriting its pointer file.
    pub fn put(&self, descriptor: &FileDescriptor) -> Result<(), Error> {
        let path = self.descriptor_path(&descriptor.path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut content = serde_json::to_string_pretty(descriptor)?;
        content.push('\n');
        fs::write(path, content)?;
        Ok(())
    }

    /// Explicitly delete a descriptor. Never done implicitly.
    pub fn remove(&self, rel: &str) -> Result<(), Error> {
        let path = self.descriptor_path(rel);
        if !path.exists() {
            return Err(Error::FileNotFound(path));
        }
        fs::remove_file(path)?;
        info!(path = %rel, "removed descriptor");
        Ok(())
    }

    /// All tracked descriptors, ordered by path.
    pub fn list(&self) -> Result<Vec<FileDescriptor>, Error> {
        let mut descriptors = Vec::new();
        for entry in WalkDir::new(&self.dir).sort_by_file_name() {
            let entry = entry.map_err(|e| Error::Validation(e.to_string()))?;
            if entry.file_type().is_file()
                && entry.path().extension().is_some_and(|e| e == "json")
            {
                let content = fs::read_to_string(entry.path())?;
                descriptors.push(serde_json::from_str(&content)?);
            }
        }
        descriptors.sort_by(|a: &FileDescriptor, b: &FileDescriptor| a.path.cmp(&b.path));
        Ok(descriptors)
    }

    /// Pointer file location for a project-relative path.
    pub fn descriptor_path(&self, rel: &str) -> PathBuf {
        let mut path = self.dir.clone();
        for segment in rel.split('/') {
            path.push(segment);
        }
        path.set_extension(match path.extension() {
            Some(ext) => format!("{}.json", ext.to_string_lossy()),
            None => "json".to_string(),
        });
        path
    }

    /// Normalize a caller path to project-relative forward-slash form.
    ///
    /// Normalization is lexical: symlinks are not resolved here, so a link
    /// inside the root pointing outside stays registrable (its target lands
    /// in `real_path`). A path that lexically escapes the root is rejected.
    fn normalize(&self, path: &Path) -> Result<String, Error> {
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };
        let root = dunce::canonicalize(&self.root)?;
        // Lexically resolve the parent chain against the canonical root.
        let mut normalized = PathBuf::new();
        for component in absolute.components() {
            match component {
                Component::CurDir => {}
                Component::ParentDir => {
                    if !normalized.pop() {
                        return Err(Error::AmbiguousRoot(path.to_path_buf()));
                    }
                }
                other => normalized.push(other),
            }
        }
        // The caller may have given a path relative to a canonicalized cwd.
        let rel = normalized
            .strip_prefix(&root)
            .or_else(|_| normalized.strip_prefix(&self.root))
            .map_err(|_| Error::AmbiguousRoot(path.to_path_buf()))?;
        if rel.as_os_str().is_empty() {
            return Err(Error::AmbiguousRoot(path.to_path_buf()));
        }
        let segments: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Ok(segments.join("/"))
    }
}

/// Stream a file through the given digest algorithm in fixed-size chunks.
pub fn digest_file(algorithm: HashAlgorithm, path: &Path) -> Result<String, Error> {
    let file = fs::File::open(path)?;
    digest_reader(algorithm, file)
}

/// Digest arbitrary reader contents.
pub fn digest_reader<R: Read>(algorithm: HashAlgorithm, mut reader: R) -> Result<String, Error> {
    let mut buffer = vec![0u8; HASH_CHUNK_SIZE];
    match algorithm {
        HashAlgorithm::Sha256 => {
            let mut hasher = sha2::Sha256::new();
            loop {
                let n = reader.read(&mut buffer)?;
                if n == 0 {
                    break;
                }
                hasher.update(&buffer[..n]);
            }
            Ok(hex::encode(hasher.finalize()))
        }
        HashAlgorithm::Sha512 => {
            let mut hasher = sha2::Sha512::new();
            loop {
                let n = reader.read(&mut buffer)?;
                if n == 0 {
                    break;
                }
                hasher.update(&buffer[..n]);
            }
            Ok(hex::encode(hasher.finalize()))
        }
        HashAlgorithm::Blake3 => {
            let mut hasher = blake3::Hasher::new();
            loop {
                let n = reader.read(&mut buffer)?;
                if n == 0 {
                    break;
                }
                hasher.update(&buffer[..n]);
            }
            Ok(hex::encode(hasher.finalize().as_bytes()))
        }
        HashAlgorithm::Md5 | HashAlgorithm::Sha1 => Err(Error::Validation(format!(
            "{} digests are accepted when supplied but never computed locally",
            algorithm
        ))),
    }
}

/// Digest the canonicalized serialization of a structured text file, so
/// semantically-equal key reorderings hash identically.
fn digest_canonical(algorithm: HashAlgorithm, path: &Path) -> Result<String, Error> {
    let content = fs::read_to_string(path)?;
    let value: serde_json::Value = serde_json::from_str(&content).map_err(|e| {
        Error::Validation(format!(
            "canonical hashing requires valid JSON in {}: {}",
            path.display(),
            e
        ))
    })?;
    let canonical = canonical::canonical_json(&value);
    digest_reader(algorithm, canonical.as_bytes())
}

fn system_time_to_offset(time: std::time::SystemTime) -> DateTime<FixedOffset> {
    DateTime::<Local>::from(time).fixed_offset()
}
