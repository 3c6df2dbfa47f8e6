//! Error taxonomy for tracking, reconciliation, and synchronization.
//!
//! Local validation failures abort before any remote mutation. Remote
//! failures carry enough context (commit id, affected items, remote state)
//! to make a retry of just the push step safe.

use crate::sync::remote::RemoteRecord;
use crate::types::{CommitId, ObjectId};
use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed descriptor, digest, or graph precondition.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Digest does not match the fixed pattern of its algorithm.
    #[error("invalid {algorithm} digest {digest:?}: expected {expected} lowercase hex characters")]
    InvalidHash {
        algorithm: String,
        digest: String,
        expected: usize,
    },

    /// Registered path does not exist and is not a pure remote reference.
    #[error("file not found: {0}")]
    FileNotFound(PathBuf),

    /// Normalized target escapes the project root.
    #[error("path escapes project root: {0}")]
    AmbiguousRoot(PathBuf),

    /// Graph relationship precondition unmet (e.g. Specimen without Patient).
    #[error("missing dependency: {0}")]
    MissingDependency(String),

    /// Content-identical resubmission of an already assembled commit.
    #[error("duplicate commit {0}")]
    DuplicateCommit(CommitId),

    /// Remote index record exists with different content; overwrite not requested.
    #[error("remote record {id} already exists with different content")]
    RemoteConflict {
        id: ObjectId,
        remote: Box<RemoteRecord>,
    },

    /// Partial upload or download; the listed items kept their prior state.
    #[error("transfer failed for commit {commit_id}: {} item(s)", .failed.len())]
    TransferFailure {
        commit_id: CommitId,
        failed: Vec<(ObjectId, String)>,
    },

    /// Asynchronous remote job reached a non-success terminal state.
    #[error("job {job} for commit {commit_id} failed: {reason}")]
    JobFailure {
        commit_id: CommitId,
        job: String,
        reason: String,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}
