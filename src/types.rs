//! Core identifier types for the datashed tracking system.

/// ObjectId: deterministic identifier of one tracked file,
/// derived from (project_id, project-relative path).
pub type ObjectId = String;

/// NodeId: deterministic identifier of one metadata graph node,
/// derived from (project_id, resource type, official identifier).
pub type NodeId = String;

/// NodeKey: "ResourceType/NodeId" pair naming a graph node in the local index.
pub type NodeKey = String;

/// CommitId: content hash of a canonicalized metadata batch.
pub type CommitId = String;
