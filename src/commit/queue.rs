//! Pending and completed commit queues.
//!
//! Both queues are append-only, line-delimited files. A commit is pending
//! when it appears in the pending log and not in the completed log;
//! completion appends, never rewrites.

use crate::config::ProjectConfig;
use crate::error::Error;
use crate::types::CommitId;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

/// One queue log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub commit_id: CommitId,
    pub message: String,
    pub created: DateTime<FixedOffset>,
}

/// Append-only pending/completed queue pair.
pub struct CommitQueue {
    pending_path: PathBuf,
    completed_path: PathBuf,
}

impl CommitQueue {
    pub fn open(config: &ProjectConfig) -> Result<Self, Error> {
        std::fs::create_dir_all(config.commits_dir())?;
        Ok(Self {
            pending_path: config.pending_path(),
            completed_path: config.completed_path(),
        })
    }

    /// Enqueue a freshly assembled commit.
    pub fn append_pending(&self, entry: &QueueEntry) -> Result<(), Error> {
        append_line(&self.pending_path, entry)
    }

    /// Retire a pushed commit. The pending log keeps its line.
    pub fn append_completed(&self, entry: &QueueEntry) -> Result<(), Error> {
        append_line(&self.completed_path, entry)
    }

    /// Commits awaiting push, in enqueue order.
    pub fn pending(&self) -> Result<Vec<QueueEntry>, Error> {
        let completed = self.completed_ids()?;
        Ok(read_lines(&self.pending_path)?
            .into_iter()
            .filter(|e| !completed.contains(&e.commit_id))
            .collect())
    }

    /// Ids of every commit ever completed.
    pub fn completed_ids(&self) -> Result<BTreeSet<CommitId>, Error> {
        Ok(read_lines(&self.completed_path)?
            .into_iter()
            .map(|e| e.commit_id)
            .collect())
    }

    /// Whether a commit id was ever assembled (pending or completed).
    pub fn contains(&self, commit_id: &str) -> Result<bool, Error> {
        Ok(read_lines(&self.pending_path)?
            .iter()
            .any(|e| e.commit_id == commit_id)
            || self.completed_ids()?.contains(commit_id))
    }
}

fn append_line(path: &PathBuf, entry: &QueueEntry) -> Result<(), Error> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{}", serde_json::to_string(entry)?)?;
    file.sync_all()?;
    Ok(())
}

fn read_lines(path: &PathBuf) -> Result<Vec<QueueEntry>, Error> {
    let mut entries = Vec::new();
    if !path.exists() {
        return Ok(entries);
    }
    let reader = BufReader::new(std::fs::File::open(path)?);
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        entries.push(serde_json::from_str(&line)?);
    }
    Ok(entries)
}
