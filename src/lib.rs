//! Datashed: content-addressed tracking of large research data files.
//!
//! Keeps a small, versioned graph of domain metadata synchronized with data
//! files that live outside the text-oriented VCS: deterministic identifier
//! derivation, descriptor pointer files, skeleton graph building, orphan
//! reconciliation, and a commit/push pipeline against a remote index and
//! object store.

pub mod canonical;
pub mod commit;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod index;
pub mod logging;
pub mod skeleton;
pub mod status;
pub mod stream;
pub mod sync;
pub mod types;
