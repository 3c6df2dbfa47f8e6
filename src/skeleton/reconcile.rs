//! Orphan reconciliation.
//!
//! A full rebuild re-runs the skeleton builder over every tracked
//! descriptor. Node keys present before the rebuild but no longer produced
//! are orphans; each pass groups them into one deletion transaction with a
//! deterministic id, appended to the metadata stream and tombstoned in the
//! local index. Nothing is overwritten.

use crate::canonical;
use crate::config::ProjectConfig;
use crate::descriptor::store::DescriptorStore;
use crate::error::Error;
use crate::index::{IndexEntry, LocalIndex};
use crate::skeleton::builder::build_skeleton;
use crate::stream::{DeletionTransaction, MetadataStream};
use crate::types::NodeKey;
use chrono::Local;
use std::collections::BTreeSet;
use tracing::{info, instrument};

/// Hashing domain prefix for deletion transaction ids.
const DELETION_DOMAIN: &str = "datashed:deletion";

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone)]
pub struct ReconcileReport {
    /// Count of nodes materialized by the rebuild.
    pub new_nodes: usize,
    /// Node keys orphaned by the rebuild, ordered.
    pub orphaned: Vec<NodeKey>,
    /// The deletion transaction appended, when any key was orphaned.
    pub transaction: Option<DeletionTransaction>,
}

/// Rebuild the skeleton over every tracked descriptor and reconcile the
/// local index against the result.
///
/// Idempotent: a second pass over unchanged descriptors and index produces
/// zero new nodes and no deletion transaction.
#[instrument(skip_all, fields(project = %config.project_id))]
pub fn reconcile(
    config: &ProjectConfig,
    store: &DescriptorStore,
    index: &LocalIndex,
    stream: &MetadataStream,
) -> Result<ReconcileReport, Error> {
    let before = index.keys()?;
    let mut known = before.clone();
    let mut after: BTreeSet<NodeKey> = BTreeSet::new();
    let mut new_nodes = Vec::new();
    let mut index_entries = Vec::new();

    for descriptor in store.list()? {
        let output = build_skeleton(config, &descriptor, &known)?;
        for node in &output.new_nodes {
            index_entries.push(IndexEntry {
                key: node.key(),
                resource_type: node.resource_type.to_string(),
                content_hash: Some(node.content_hash()?),
            });
        }
        known.extend(output.keys.iter().cloned());
        after.extend(output.keys);
        new_nodes.extend(output.new_nodes);
    }

    stream.append_nodes(&new_nodes)?;
    index.append(&index_entries)?;

    let orphaned: Vec<NodeKey> = before.difference(&after).cloned().collect();
    let transaction = if orphaned.is_empty() {
        None
    } else {
        let created = Local::now().fixed_offset();
        let id = canonical::hash_parts(&[
            DELETION_DOMAIN,
            &created.to_rfc3339(),
            &config.project_id,
        ]);
        let transaction = DeletionTransaction {
            id,
            project_id: config.project_id.clone(),
            created,
            deletions: orphaned.clone(),
        };
        stream.append_deletion(&transaction)?;
        let tombstones: Vec<IndexEntry> = orphaned
            .iter()
            .map(|key| IndexEntry {
                key: key.clone(),
                resource_type: key.split('/').next().unwrap_or_default().to_string(),
                content_hash: None,
            })
            .collect();
        index.append(&tombstones)?;
        info!(
            transaction = %transaction.id,
            orphans = orphaned.len(),
            "appended deletion transaction"
        );
        Some(transaction)
    };

    info!(new_nodes = new_nodes.len(), orphans = orphaned.len(), "reconciled skeleton");
    Ok(ReconcileReport {
        new_nodes: new_nodes.len(),
        orphaned,
        transaction,
    })
}
