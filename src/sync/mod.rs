//! Sync pipeline (push).
//!
//! Pushes pending commits and descriptor changes to the remote index and
//! object store, in enqueue order, three phases per commit:
//!
//! 1. index: create remote records for absent descriptors, replacing
//!    changed ones only on explicit overwrite;
//! 2. upload: hand unconfirmed file bytes to the bulk-transfer collaborator
//!    and block on per-item results;
//! 3. publish: upload the commit archive and drive the downstream
//!    ingestion job to a terminal state with bounded backoff polling.
//!
//! Phase 1/2 failures abort without completing the commit; both phases are
//! idempotent, so a later push retries them safely. Phase 3 failures are
//! surfaced but never roll back phases 1/2.

pub mod remote;

use crate::commit::queue::{CommitQueue, QueueEntry};
use crate::config::ProjectConfig;
use crate::descriptor::store::DescriptorStore;
use crate::descriptor::FileDescriptor;
use crate::error::Error;
use crate::types::{CommitId, ObjectId};
use chrono::{DateTime, Local};
use self::remote::{
    BulkTransfer, JobHandle, JobService, JobState, RemoteIndex, RemoteRecord, TransferItem,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Caller switches for one push invocation.
#[derive(Debug, Clone, Default)]
pub struct PushOptions {
    /// Resolve remote content conflicts by delete-then-recreate.
    pub overwrite: bool,
    /// Block on the publish job until it reaches a terminal state.
    pub wait: bool,
}

/// Per-commit push summary.
#[derive(Debug, Clone)]
pub struct PushReport {
    pub commit_id: CommitId,
    pub created_records: usize,
    pub replaced_records: usize,
    pub uploaded: usize,
    pub job: Option<JobHandle>,
}

/// Bounded exponential backoff with reset-after-cap.
///
/// Delays double from the initial value up to the cap; once the cap is
/// reached the next delay starts over from the initial value. The attempt
/// budget lives with the caller.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    cap: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, cap: Duration) -> Self {
        Self {
            initial,
            cap,
            current: initial,
        }
    }

    /// The delay to sleep before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = if delay >= self.cap {
            self.initial
        } else {
            std::cmp::min(delay * 2, self.cap)
        };
        delay
    }
}

/// One confirmed-upload log line: these bytes, under this digest, reached
/// the object store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadRecord {
    pub object_id: ObjectId,
    pub digest: String,
}

/// Append-only log of uploads the transfer collaborator confirmed.
///
/// Phase 2 derives its manifest from this log rather than from Phase 1
/// index writes, so an item whose transfer failed stays in the manifest
/// even after its index record exists.
pub struct UploadLog {
    path: PathBuf,
}

impl UploadLog {
    pub fn open(config: &ProjectConfig) -> Result<Self, Error> {
        let path = config.uploads_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self { path })
    }

    /// Set of (object id, digest) pairs confirmed transferred.
    pub fn confirmed(&self) -> Result<BTreeSet<(ObjectId, String)>, Error> {
        let mut confirmed = BTreeSet::new();
        if !self.path.exists() {
            return Ok(confirmed);
        }
        let reader = BufReader::new(std::fs::File::open(&self.path)?);
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record: UploadRecord = serde_json::from_str(&line)?;
            confirmed.insert((record.object_id, record.digest));
        }
        Ok(confirmed)
    }

    /// Record confirmed transfers. Appended only after the collaborator
    /// reported success for every item.
    pub fn append(&self, records: &[UploadRecord]) -> Result<(), Error> {
        if records.is_empty() {
            return Ok(());
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        for record in records {
            writeln!(file, "{}", serde_json::to_string(record)?)?;
        }
        file.sync_all()?;
        Ok(())
    }
}

/// Sequential push pipeline over the three remote collaborators.
pub struct SyncPipeline<'a, I, T, J>
where
    I: RemoteIndex,
    T: BulkTransfer,
    J: JobService,
{
    config: &'a ProjectConfig,
    remote_index: &'a mut I,
    transfer: &'a mut T,
    jobs: &'a mut J,
}

impl<'a, I, T, J> SyncPipeline<'a, I, T, J>
where
    I: RemoteIndex,
    T: BulkTransfer,
    J: JobService,
{
    pub fn new(
        config: &'a ProjectConfig,
        remote_index: &'a mut I,
        transfer: &'a mut T,
        jobs: &'a mut J,
    ) -> Self {
        Self {
            config,
            remote_index,
            transfer,
            jobs,
        }
    }

    /// Push every pending commit, in enqueue order.
    ///
    /// A commit moves pending -> completed only after all three phases
    /// succeed, so an abort at any point leaves a state from which the same
    /// invocation can simply be repeated.
    #[instrument(skip_all, fields(project = %self.config.project_id))]
    pub fn push(
        &mut self,
        store: &DescriptorStore,
        options: &PushOptions,
    ) -> Result<Vec<PushReport>, Error> {
        let queue = CommitQueue::open(self.config)?;
        let mut reports = Vec::new();
        for entry in queue.pending()? {
            let report = self.push_commit(store, &entry, options)?;
            queue.append_completed(&entry)?;
            self.refresh_timestamps(store)?;
            info!(commit_id = %entry.commit_id, "commit completed");
            reports.push(report);
        }
        Ok(reports)
    }

    fn push_commit(
        &mut self,
        store: &DescriptorStore,
        entry: &QueueEntry,
        options: &PushOptions,
    ) -> Result<PushReport, Error> {
        let descriptors = store.list()?;

        // Phase 1: reconcile the remote index with local descriptors.
        let ids: Vec<ObjectId> = descriptors.iter().map(|d| d.object_id.clone()).collect();
        let remote: BTreeMap<ObjectId, RemoteRecord> = self
            .remote_index
            .bulk_lookup(&ids)?
            .into_iter()
            .map(|r| (r.id.clone(), r))
            .collect();

        let mut created = 0usize;
        let mut replaced = 0usize;
        for descriptor in &descriptors {
            let desired = remote_record(self.config, descriptor);
            match remote.get(&descriptor.object_id) {
                None => {
                    self.remote_index.create(&desired)?;
                    created += 1;
                }
                Some(existing) if existing.hashes == desired.hashes => {}
                Some(existing) => {
                    if !options.overwrite {
                        return Err(Error::RemoteConflict {
                            id: descriptor.object_id.clone(),
                            remote: Box::new(existing.clone()),
                        });
                    }
                    // Remote records are immutable: replace is an explicit
                    // delete-then-recreate, never automatic.
                    self.remote_index.delete(&descriptor.object_id)?;
                    self.remote_index.create(&desired)?;
                    replaced += 1;
                }
            }
        }
        info!(created, replaced, "indexed descriptors");

        // Phase 2: hand unconfirmed file bytes to the transfer collaborator.
        // The manifest comes from the upload log, not from Phase 1 writes:
        // an item whose transfer failed last time already has its index
        // record, and must still be retried here.
        let uploads = UploadLog::open(self.config)?;
        let confirmed = uploads.confirmed()?;
        let mut manifest = Vec::new();
        let mut confirmations = Vec::new();
        for descriptor in &descriptors {
            if descriptor.meta.no_bucket {
                continue;
            }
            let Some(path) = &descriptor.real_path else {
                continue;
            };
            let Some(digest) = descriptor.digest() else {
                continue;
            };
            if confirmed.contains(&(descriptor.object_id.clone(), digest.to_string())) {
                continue;
            }
            manifest.push(TransferItem {
                object_id: descriptor.object_id.clone(),
                path: path.clone(),
            });
            confirmations.push(UploadRecord {
                object_id: descriptor.object_id.clone(),
                digest: digest.to_string(),
            });
        }
        let uploaded = manifest.len();
        if !manifest.is_empty() {
            let outcomes = self.transfer.transfer(&manifest, &self.config.sync.bucket)?;
            let failed: Vec<(ObjectId, String)> = outcomes
                .into_iter()
                .filter(|o| !o.success)
                .map(|o| (o.object_id, o.detail.unwrap_or_default()))
                .collect();
            if !failed.is_empty() {
                warn!(commit_id = %entry.commit_id, failures = failed.len(), "upload failed");
                return Err(Error::TransferFailure {
                    commit_id: entry.commit_id.clone(),
                    failed,
                });
            }
            uploads.append(&confirmations)?;
        }

        // Phase 3: publish the metadata archive and drive ingestion.
        let archive = self
            .config
            .commits_dir()
            .join(&entry.commit_id)
            .join("archive.jsonl");
        let archive_outcomes = self.transfer.transfer(
            &[TransferItem {
                object_id: entry.commit_id.clone(),
                path: archive.clone(),
            }],
            &self.config.sync.bucket,
        )?;
        if let Some(outcome) = archive_outcomes.iter().find(|o| !o.success) {
            return Err(Error::TransferFailure {
                commit_id: entry.commit_id.clone(),
                failed: vec![(
                    outcome.object_id.clone(),
                    outcome.detail.clone().unwrap_or_default(),
                )],
            });
        }
        let handle = self.jobs.create_job(
            "publish-metadata",
            &serde_json::json!({
                "project_id": self.config.project_id,
                "commit_id": entry.commit_id,
                "archive": archive.to_string_lossy(),
            }),
        )?;
        if options.wait {
            self.wait_for_job(&entry.commit_id, &handle)?;
        }

        Ok(PushReport {
            commit_id: entry.commit_id.clone(),
            created_records: created,
            replaced_records: replaced,
            uploaded,
            job: Some(handle),
        })
    }

    /// Poll the publish job to a terminal state with bounded backoff.
    fn wait_for_job(&mut self, commit_id: &str, handle: &str) -> Result<(), Error> {
        let sync = &self.config.sync;
        let mut backoff = Backoff::new(
            Duration::from_millis(sync.poll_initial_ms),
            Duration::from_millis(sync.poll_cap_ms),
        );
        for _attempt in 0..sync.poll_max_attempts {
            let status = self.jobs.get_status(handle)?;
            match status.state {
                JobState::Succeeded => return Ok(()),
                JobState::Failed => {
                    return Err(Error::JobFailure {
                        commit_id: commit_id.to_string(),
                        job: handle.to_string(),
                        reason: status
                            .detail
                            .unwrap_or_else(|| "job reported failure".to_string()),
                    })
                }
                JobState::Queued | JobState::Running => {
                    std::thread::sleep(backoff.next_delay());
                }
            }
        }
        Err(Error::JobFailure {
            commit_id: commit_id.to_string(),
            job: handle.to_string(),
            reason: format!(
                "no terminal state after {} poll attempts",
                sync.poll_max_attempts
            ),
        })
    }

    /// Refresh stored `modified` timestamps so the change detector stops
    /// flagging files whose state was just synchronized.
    fn refresh_timestamps(&self, store: &DescriptorStore) -> Result<(), Error> {
        for mut descriptor in store.list()? {
            let Some(real_path) = descriptor.real_path.clone() else {
                continue;
            };
            let Ok(meta) = std::fs::metadata(&real_path) else {
                continue;
            };
            let live = DateTime::<Local>::from(meta.modified()?).fixed_offset();
            if live > descriptor.modified {
                descriptor.modified = live;
                store.put(&descriptor)?;
            }
        }
        Ok(())
    }
}

/// Shape a descriptor into its remote index record.
fn remote_record(config: &ProjectConfig, descriptor: &FileDescriptor) -> RemoteRecord {
    let hashes: BTreeMap<String, String> = descriptor
        .hashes
        .iter()
        .map(|(algorithm, digest)| (algorithm.name().to_string(), digest.clone()))
        .collect();
    let file_name = descriptor
        .path
        .rsplit('/')
        .next()
        .unwrap_or(&descriptor.path)
        .to_string();
    let mut metadata = BTreeMap::new();
    metadata.insert("path".to_string(), descriptor.path.clone());
    metadata.insert("mime".to_string(), descriptor.mime.clone());
    if let Some(patient) = &descriptor.meta.patient {
        metadata.insert("patient".to_string(), patient.clone());
    }
    if let Some(specimen) = &descriptor.meta.specimen {
        metadata.insert("specimen".to_string(), specimen.clone());
    }
    if let Some(task) = &descriptor.meta.task {
        metadata.insert("task".to_string(), task.clone());
    }
    if let Some(observation) = &descriptor.meta.observation {
        metadata.insert("observation".to_string(), observation.clone());
    }
    RemoteRecord {
        id: descriptor.object_id.clone(),
        hashes,
        size: descriptor.size,
        authz: vec![config.project_id.clone()],
        file_name,
        metadata,
        urls: descriptor.source_url.iter().cloned().collect(),
    }
}
