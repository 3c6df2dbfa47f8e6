//! Metadata stream.
//!
//! The ordered, append-only stream of metadata records that downstream
//! consumers read: graph nodes as they are materialized, and deletion
//! transactions when a reconciliation pass orphans previously emitted
//! nodes. Records are never rewritten; a changed identifier produces an
//! explicit, auditable deletion rather than silent residue.

use crate::error::Error;
use crate::skeleton::GraphNode;
use crate::types::NodeKey;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

/// Grouped delete instructions from one reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionTransaction {
    /// Deterministic id: hash of (timestamp, project id).
    pub id: String,
    pub project_id: String,
    pub created: DateTime<FixedOffset>,
    /// Orphaned node keys, ordered.
    pub deletions: Vec<NodeKey>,
}

/// One stream record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "record")]
pub enum StreamRecord {
    Node(GraphNode),
    Deletion(DeletionTransaction),
}

/// Append-only, line-delimited metadata stream file.
pub struct MetadataStream {
    path: PathBuf,
}

/// File name of the primary stream within the metadata directory.
pub const STREAM_FILE: &str = "graph.jsonl";

impl MetadataStream {
    pub fn open(metadata_dir: impl Into<PathBuf>) -> Result<Self, Error> {
        let dir = metadata_dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            path: dir.join(STREAM_FILE),
        })
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Append newly materialized nodes, in build order.
    pub fn append_nodes(&self, nodes: &[GraphNode]) -> Result<(), Error> {
        self.append_records(nodes.iter().cloned().map(StreamRecord::Node))
    }

    /// Append one deletion transaction.
    pub fn append_deletion(&self, transaction: &DeletionTransaction) -> Result<(), Error> {
        self.append_records(std::iter::once(StreamRecord::Deletion(transaction.clone())))
    }

    fn append_records(&self, records: impl Iterator<Item = StreamRecord>) -> Result<(), Error> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut wrote = false;
        for record in records {
            let line = serde_json::to_string(&record)?;
            writeln!(file, "{}", line)?;
            wrote = true;
        }
        if wrote {
            file.sync_all()?;
        }
        Ok(())
    }

    /// Every record, in append order.
    pub fn read_all(&self) -> Result<Vec<StreamRecord>, Error> {
        let mut records = Vec::new();
        if !self.path.exists() {
            return Ok(records);
        }
        let reader = BufReader::new(std::fs::File::open(&self.path)?);
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            records.push(serde_json::from_str(&line)?);
        }
        Ok(records)
    }

    /// Replay the stream into the current node set: node records put,
    /// deletion transactions remove.
    pub fn current_nodes(&self) -> Result<BTreeMap<NodeKey, GraphNode>, Error> {
        let mut nodes = BTreeMap::new();
        for record in self.read_all()? {
            match record {
                StreamRecord::Node(node) => {
                    nodes.insert(node.key(), node);
                }
                StreamRecord::Deletion(transaction) => {
                    for key in &transaction.deletions {
                        nodes.remove(key);
                    }
                }
            }
        }
        Ok(nodes)
    }
}
