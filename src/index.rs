//! Local index.
//!
//! Append-only, line-delimited log of `{key, resource_type, content_hash}`
//! entries recording every node previously emitted to the metadata stream.
//! Replay is last-write-wins per key; an entry without a content hash is a
//! tombstone. The log supports idempotent rebuilds and orphan diffing.

use crate::error::Error;
use crate::types::NodeKey;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

/// One index log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub key: NodeKey,
    pub resource_type: String,
    /// None marks a deletion (tombstone).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
}

/// Append-only id -> content-hash log.
pub struct LocalIndex {
    path: PathBuf,
}

impl LocalIndex {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, Error> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self { path })
    }

    /// Replay the log into its effective state, last write winning.
    pub fn load(&self) -> Result<BTreeMap<NodeKey, IndexEntry>, Error> {
        let mut state = BTreeMap::new();
        if !self.path.exists() {
            return Ok(state);
        }
        let reader = BufReader::new(std::fs::File::open(&self.path)?);
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: IndexEntry = serde_json::from_str(&line)?;
            if entry.content_hash.is_some() {
                state.insert(entry.key.clone(), entry);
            } else {
                state.remove(&entry.key);
            }
        }
        Ok(state)
    }

    /// Effective set of live node keys.
    pub fn keys(&self) -> Result<BTreeSet<NodeKey>, Error> {
        Ok(self.load()?.into_keys().collect())
    }

    /// Append entries to the log. Never rewrites existing lines.
    pub fn append(&self, entries: &[IndexEntry]) -> Result<(), Error> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        for entry in entries {
            let line = serde_json::to_string(entry)?;
            writeln!(file, "{}", line)?;
        }
        file.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(key: &str, hash: Option<&str>) -> IndexEntry {
        IndexEntry {
            key: key.to_string(),
            resource_type: key.split('/').next().unwrap().to_string(),
            content_hash: hash.map(str::to_string),
        }
    }

    #[test]
    fn test_append_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let index = LocalIndex::open(dir.path().join("index.jsonl")).unwrap();
        index
            .append(&[entry("Patient/abc", Some("h1")), entry("Study/s", Some("h2"))])
            .unwrap();

        let state = index.load().unwrap();
        assert_eq!(state.len(), 2);
        assert_eq!(
            state.get("Patient/abc").unwrap().content_hash.as_deref(),
            Some("h1")
        );
    }

    #[test]
    fn test_last_write_wins() {
        let dir = TempDir::new().unwrap();
        let index = LocalIndex::open(dir.path().join("index.jsonl")).unwrap();
        index.append(&[entry("Patient/abc", Some("h1"))]).unwrap();
        index.append(&[entry("Patient/abc", Some("h2"))]).unwrap();

        let state = index.load().unwrap();
        assert_eq!(
            state.get("Patient/abc").unwrap().content_hash.as_deref(),
            Some("h2")
        );
    }

    #[test]
    fn test_tombstone_removes_key() {
        let dir = TempDir::new().unwrap();
        let index = LocalIndex::open(dir.path().join("index.jsonl")).unwrap();
        index.append(&[entry("Patient/abc", Some("h1"))]).unwrap();
        index.append(&[entry("Patient/abc", None)]).unwrap();

        assert!(index.keys().unwrap().is_empty());
        // The log itself retains both lines.
        let raw = std::fs::read_to_string(dir.path().join("index.jsonl")).unwrap();
        assert_eq!(raw.lines().count(), 2);
    }

    #[test]
    fn test_missing_file_is_empty_state() {
        let dir = TempDir::new().unwrap();
        let index = LocalIndex::open(dir.path().join("index.jsonl")).unwrap();
        assert!(index.load().unwrap().is_empty());
    }
}
