//! Metadata skeleton graph.
//!
//! The skeleton is the minimal linked set of domain entities needed to
//! contextualize one tracked file: a DAG rooted at the per-project Study,
//! with Patient, ResearchSubject, Specimen, Observation, Task, and
//! DocumentReference nodes. Node identity is deterministic, so the graph can
//! be rebuilt from descriptors alone.

pub mod builder;
pub mod reconcile;

use crate::canonical;
use crate::error::Error;
use crate::types::{NodeId, NodeKey};
use serde::{Deserialize, Serialize};

/// Hashing domain prefix for node ids.
const NODE_DOMAIN: &str = "datashed:node";

/// Graph node resource types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceType {
    Study,
    Patient,
    ResearchSubject,
    Specimen,
    Observation,
    Task,
    DocumentReference,
}

impl ResourceType {
    pub fn name(&self) -> &'static str {
        match self {
            ResourceType::Study => "Study",
            ResourceType::Patient => "Patient",
            ResourceType::ResearchSubject => "ResearchSubject",
            ResourceType::Specimen => "Specimen",
            ResourceType::Observation => "Observation",
            ResourceType::Task => "Task",
            ResourceType::DocumentReference => "DocumentReference",
        }
    }
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Typed reference to another graph node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub resource_type: ResourceType,
    pub id: NodeId,
}

impl Reference {
    pub fn new(resource_type: ResourceType, id: impl Into<NodeId>) -> Self {
        Self {
            resource_type,
            id: id.into(),
        }
    }

    pub fn key(&self) -> NodeKey {
        node_key(self.resource_type, &self.id)
    }
}

/// One node of the skeleton graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: NodeId,
    pub resource_type: ResourceType,

    /// Official identifier supplied by the caller (or derived for
    /// DocumentReference, where it is the tracked path).
    pub identifier: String,

    /// Subject reference (Patient for Specimen/Observation; precedence
    /// winner for DocumentReference; Patient for ResearchSubject).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<Reference>,

    /// Study reference (ResearchSubject only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub study: Option<Reference>,

    /// Specimen reference (Observation only, when present).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specimen: Option<Reference>,

    /// Task inputs, in [Specimen?, Patient?] order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub input: Vec<Reference>,

    /// Task outputs: the produced DocumentReference.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub output: Vec<Reference>,
}

/// Derive the deterministic node id for a resource identifier.
///
/// Reproducible from the identifier alone, given the namespace and project
/// context. Not used for DocumentReference, whose id is the owning file's
/// object id.
pub fn node_id(
    namespace: &str,
    project_id: &str,
    resource_type: ResourceType,
    identifier: &str,
) -> NodeId {
    canonical::hash_parts(&[
        NODE_DOMAIN,
        namespace,
        project_id,
        resource_type.name(),
        identifier,
    ])
}

/// Index key of a node: `"Type/id"`.
pub fn node_key(resource_type: ResourceType, id: &str) -> NodeKey {
    format!("{}/{}", resource_type, id)
}

impl GraphNode {
    pub fn key(&self) -> NodeKey {
        node_key(self.resource_type, &self.id)
    }

    /// Canonical content hash of this node.
    pub fn content_hash(&self) -> Result<String, Error> {
        let value = serde_json::to_value(self)?;
        Ok(canonical::record_hash(&value))
    }
}
