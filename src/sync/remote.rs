//! Remote collaborator contracts.
//!
//! The pipeline consumes three external services as black boxes: the index
//! service (system of record mapping object ids to storage locations), the
//! bulk-transfer client (byte movement), and the async-job service
//! (downstream ingestion). Each is a synchronous trait; in-memory
//! implementations back the test suite.

use crate::error::Error;
use crate::types::ObjectId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// One record at the remote index service. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub id: ObjectId,
    /// Algorithm-name-keyed digests.
    pub hashes: BTreeMap<String, String>,
    pub size: u64,
    /// Authorization scopes governing access.
    pub authz: Vec<String>,
    pub file_name: String,
    pub metadata: BTreeMap<String, String>,
    pub urls: Vec<String>,
}

/// Remote index service contract.
pub trait RemoteIndex {
    /// Create a record. Fails with [`Error::RemoteConflict`] if the id exists.
    fn create(&mut self, record: &RemoteRecord) -> Result<RemoteRecord, Error>;
    fn delete(&mut self, id: &str) -> Result<(), Error>;
    fn bulk_lookup(&mut self, ids: &[ObjectId]) -> Result<Vec<RemoteRecord>, Error>;
}

/// One item of a transfer manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferItem {
    pub object_id: ObjectId,
    pub path: PathBuf,
}

/// Per-item transfer result.
#[derive(Debug, Clone)]
pub struct TransferOutcome {
    pub object_id: ObjectId,
    pub success: bool,
    pub detail: Option<String>,
}

/// Bulk-transfer collaborator contract. Invoked synchronously; may
/// parallelize internally.
pub trait BulkTransfer {
    fn transfer(
        &mut self,
        manifest: &[TransferItem],
        destination: &str,
    ) -> Result<Vec<TransferOutcome>, Error>;
}

/// Handle naming one remote job.
pub type JobHandle = String;

/// Remote job lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }
}

/// Status snapshot of a remote job.
#[derive(Debug, Clone)]
pub struct JobStatus {
    pub state: JobState,
    pub detail: Option<String>,
}

/// Async-job collaborator contract.
pub trait JobService {
    fn create_job(&mut self, name: &str, args: &serde_json::Value) -> Result<JobHandle, Error>;
    fn get_status(&mut self, handle: &str) -> Result<JobStatus, Error>;
    fn get_output(&mut self, handle: &str) -> Result<serde_json::Value, Error>;
}

/// In-memory index service for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryRemoteIndex {
    records: BTreeMap<ObjectId, RemoteRecord>,
    pub create_calls: usize,
    pub delete_calls: usize,
}

impl MemoryRemoteIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &BTreeMap<ObjectId, RemoteRecord> {
        &self.records
    }
}

impl RemoteIndex for MemoryRemoteIndex {
    fn create(&mut self, record: &RemoteRecord) -> Result<RemoteRecord, Error> {
        self.create_calls += 1;
        if let Some(existing) = self.records.get(&record.id) {
            return Err(Error::RemoteConflict {
                id: record.id.clone(),
                remote: Box::new(existing.clone()),
            });
        }
        self.records.insert(record.id.clone(), record.clone());
        Ok(record.clone())
    }

    fn delete(&mut self, id: &str) -> Result<(), Error> {
        self.delete_calls += 1;
        self.records.remove(id);
        Ok(())
    }

    fn bulk_lookup(&mut self, ids: &[ObjectId]) -> Result<Vec<RemoteRecord>, Error> {
        Ok(ids
            .iter()
            .filter_map(|id| self.records.get(id).cloned())
            .collect())
    }
}

/// In-memory transfer client; ids listed in `fail` report failure.
#[derive(Debug, Default)]
pub struct MemoryTransfer {
    pub fail: std::collections::BTreeSet<ObjectId>,
    pub transferred: Vec<(String, Vec<TransferItem>)>,
}

impl MemoryTransfer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BulkTransfer for MemoryTransfer {
    fn transfer(
        &mut self,
        manifest: &[TransferItem],
        destination: &str,
    ) -> Result<Vec<TransferOutcome>, Error> {
        self.transferred
            .push((destination.to_string(), manifest.to_vec()));
        Ok(manifest
            .iter()
            .map(|item| {
                let failed = self.fail.contains(&item.object_id);
                TransferOutcome {
                    object_id: item.object_id.clone(),
                    success: !failed,
                    detail: failed.then(|| "simulated transfer failure".to_string()),
                }
            })
            .collect())
    }
}

/// In-memory job service driven by a scripted status sequence; an empty
/// script reports immediate success.
#[derive(Debug, Default)]
pub struct MemoryJobService {
    pub script: std::collections::VecDeque<JobState>,
    pub created: Vec<(String, serde_json::Value)>,
    next_handle: usize,
}

impl MemoryJobService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scripted(states: impl IntoIterator<Item = JobState>) -> Self {
        Self {
            script: states.into_iter().collect(),
            ..Self::default()
        }
    }
}

impl JobService for MemoryJobService {
    fn create_job(&mut self, name: &str, args: &serde_json::Value) -> Result<JobHandle, Error> {
        self.next_handle += 1;
        self.created.push((name.to_string(), args.clone()));
        Ok(format!("job-{}", self.next_handle))
    }

    fn get_status(&mut self, _handle: &str) -> Result<JobStatus, Error> {
        let state = self.script.pop_front().unwrap_or(JobState::Succeeded);
        Ok(JobStatus {
            state,
            detail: (state == JobState::Failed).then(|| "simulated job failure".to_string()),
        })
    }

    fn get_output(&mut self, handle: &str) -> Result<serde_json::Value, Error> {
        Ok(serde_json::json!({ "job": handle }))
    }
}
