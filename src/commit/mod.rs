//! Commit assembly.
//!
//! A commit is an immutable, content-addressed batch of metadata: its id is
//! the hash of the canonicalized concatenation of every record in the
//! metadata file set, read in sorted file-name order, record order within
//! each file. Identity is therefore a pure function of content, and
//! resubmitting identical content fails instead of double-writing.

pub mod queue;

use crate::canonical;
use crate::config::ProjectConfig;
use crate::error::Error;
use crate::stream::StreamRecord;
use crate::types::CommitId;
use chrono::{DateTime, FixedOffset, Local};
use self::queue::{CommitQueue, QueueEntry};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use tracing::{info, instrument};
use walkdir::WalkDir;

/// Immutable commit metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Commit {
    pub commit_id: CommitId,
    pub message: String,
    /// Record counts per resource type.
    pub counts: BTreeMap<String, usize>,
    /// Packaged archive location, keyed by commit id.
    pub archive_path: PathBuf,
    pub created: DateTime<FixedOffset>,
}

/// Per-record archive index line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordIndexEntry {
    pub id: String,
    pub resource_type: String,
    pub content_hash: String,
}

/// Assemble the full current metadata file set into a pending commit.
///
/// Errors with [`Error::DuplicateCommit`] when content-identical metadata
/// was already assembled (pending or completed).
#[instrument(skip_all, fields(project = %config.project_id))]
pub fn assemble(config: &ProjectConfig, message: &str) -> Result<Commit, Error> {
    let records = read_metadata_set(config)?;
    if records.is_empty() {
        return Err(Error::Validation(
            "no metadata records to commit".to_string(),
        ));
    }

    // Canonical lines in explicit order; the concatenation is the identity.
    let mut canonical_lines = Vec::with_capacity(records.len());
    let mut index_entries = Vec::with_capacity(records.len());
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for record in &records {
        let value = serde_json::to_value(record)?;
        let line = canonical::canonical_json(&value);
        index_entries.push(record_index_entry(record, &line));
        canonical_lines.push(line);
        *counts.entry(resource_type_of(record)).or_insert(0) += 1;
    }
    let payload = canonical_lines.join("\n");
    let commit_id = canonical::content_hash(payload.as_bytes());

    let queue = CommitQueue::open(config)?;
    if queue.contains(&commit_id)? {
        return Err(Error::DuplicateCommit(commit_id));
    }

    // Package under a path keyed by the commit id.
    let commit_dir = config.commits_dir().join(&commit_id);
    fs::create_dir_all(&commit_dir)?;
    let archive_path = commit_dir.join("archive.jsonl");
    let mut archive = fs::File::create(&archive_path)?;
    archive.write_all(payload.as_bytes())?;
    archive.write_all(b"\n")?;
    archive.sync_all()?;

    let mut record_index = fs::File::create(commit_dir.join("records.jsonl"))?;
    for entry in &index_entries {
        writeln!(record_index, "{}", serde_json::to_string(entry)?)?;
    }
    record_index.sync_all()?;

    let commit = Commit {
        commit_id: commit_id.clone(),
        message: message.to_string(),
        counts,
        archive_path,
        created: Local::now().fixed_offset(),
    };
    let mut meta = serde_json::to_string_pretty(&commit)?;
    meta.push('\n');
    fs::write(commit_dir.join("commit.json"), meta)?;

    queue.append_pending(&QueueEntry {
        commit_id: commit.commit_id.clone(),
        message: commit.message.clone(),
        created: commit.created,
    })?;

    info!(commit_id = %commit.commit_id, records = records.len(), "assembled commit");
    Ok(commit)
}

/// Read every metadata record, sorted by file name then record order.
fn read_metadata_set(config: &ProjectConfig) -> Result<Vec<StreamRecord>, Error> {
    let metadata_dir = config.metadata_dir();
    let mut records = Vec::new();
    if !metadata_dir.exists() {
        return Ok(records);
    }
    for entry in WalkDir::new(&metadata_dir).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::Validation(e.to_string()))?;
        if !entry.file_type().is_file()
            || !entry.path().extension().is_some_and(|e| e == "jsonl")
        {
            continue;
        }
        let reader = BufReader::new(fs::File::open(entry.path())?);
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            records.push(serde_json::from_str(&line)?);
        }
    }
    Ok(records)
}

fn resource_type_of(record: &StreamRecord) -> String {
    match record {
        StreamRecord::Node(node) => node.resource_type.to_string(),
        StreamRecord::Deletion(_) => "DeletionTransaction".to_string(),
    }
}

fn record_index_entry(record: &StreamRecord, canonical_line: &str) -> RecordIndexEntry {
    let id = match record {
        StreamRecord::Node(node) => node.id.clone(),
        StreamRecord::Deletion(transaction) => transaction.id.clone(),
    };
    RecordIndexEntry {
        id,
        resource_type: resource_type_of(record),
        content_hash: canonical::content_hash(canonical_line.as_bytes()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skeleton::{node_id, GraphNode, ResourceType};
    use crate::stream::MetadataStream;
    use tempfile::TempDir;

    fn node(identifier: &str) -> GraphNode {
        GraphNode {
            id: node_id("datashed", "proj", ResourceType::Patient, identifier),
            resource_type: ResourceType::Patient,
            identifier: identifier.to_string(),
            subject: None,
            study: None,
            specimen: None,
            input: vec![],
            output: vec![],
        }
    }

    fn fixture() -> (TempDir, ProjectConfig) {
        let dir = TempDir::new().unwrap();
        let config = ProjectConfig::new(dir.path(), "proj");
        (dir, config)
    }

    #[test]
    fn test_commit_id_is_pure_function_of_content() {
        let (_dir_a, config_a) = fixture();
        let (_dir_b, config_b) = fixture();
        for config in [&config_a, &config_b] {
            let stream = MetadataStream::open(config.metadata_dir()).unwrap();
            stream.append_nodes(&[node("P1")]).unwrap();
        }
        let a = assemble(&config_a, "m").unwrap();
        let b = assemble(&config_b, "different message").unwrap();
        assert_eq!(a.commit_id, b.commit_id);
    }

    #[test]
    fn test_duplicate_commit_rejected() {
        let (_dir, config) = fixture();
        let stream = MetadataStream::open(config.metadata_dir()).unwrap();
        stream.append_nodes(&[node("P1")]).unwrap();

        assemble(&config, "first").unwrap();
        let second = assemble(&config, "second");
        assert!(matches!(second, Err(Error::DuplicateCommit(_))));
    }

    #[test]
    fn test_any_record_change_changes_commit_id() {
        let (_dir, config) = fixture();
        let stream = MetadataStream::open(config.metadata_dir()).unwrap();
        stream.append_nodes(&[node("P1")]).unwrap();
        let first = assemble(&config, "m").unwrap();

        stream.append_nodes(&[node("P2")]).unwrap();
        let second = assemble(&config, "m").unwrap();
        assert_ne!(first.commit_id, second.commit_id);
    }

    #[test]
    fn test_archive_and_record_index_written() {
        let (_dir, config) = fixture();
        let stream = MetadataStream::open(config.metadata_dir()).unwrap();
        stream.append_nodes(&[node("P1"), node("P2")]).unwrap();
        let commit = assemble(&config, "m").unwrap();

        assert!(commit.archive_path.exists());
        assert_eq!(commit.counts.get("Patient"), Some(&2));

        let records = std::fs::read_to_string(
            config.commits_dir().join(&commit.commit_id).join("records.jsonl"),
        )
        .unwrap();
        assert_eq!(records.lines().count(), 2);
        let first: RecordIndexEntry = serde_json::from_str(records.lines().next().unwrap()).unwrap();
        assert_eq!(first.resource_type, "Patient");
    }

    #[test]
    fn test_empty_metadata_set_rejected() {
        let (_dir, config) = fixture();
        assert!(matches!(
            assemble(&config, "m"),
            Err(Error::Validation(_))
        ));
    }
}
