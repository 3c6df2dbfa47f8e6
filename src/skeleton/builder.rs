//! Skeleton derivation for one descriptor.
//!
//! Derives the minimal set of graph nodes contextualizing a tracked file,
//! reusing any node whose key is already known. Output contains only newly
//! materialized nodes, so repeated builds over unchanged input are no-ops.

use crate::config::ProjectConfig;
use crate::descriptor::FileDescriptor;
use crate::error::Error;
use crate::skeleton::{node_id, GraphNode, Reference, ResourceType};
use crate::types::NodeKey;
use std::collections::BTreeSet;
use tracing::debug;

/// Result of one skeleton build.
#[derive(Debug, Clone, Default)]
pub struct SkeletonOutput {
    /// Nodes materialized by this build (absent from the known-key set).
    pub new_nodes: Vec<GraphNode>,
    /// Every node key this descriptor implies, new or reused.
    pub keys: BTreeSet<NodeKey>,
}

impl SkeletonOutput {
    fn emit(&mut self, known: &BTreeSet<NodeKey>, node: GraphNode) {
        let key = node.key();
        if self.keys.insert(key.clone()) && !known.contains(&key) {
            debug!(key = %key, "materialized node");
            self.new_nodes.push(node);
        }
    }
}

/// Build the skeleton graph for one descriptor.
///
/// `known` holds node keys already present in the local index; nodes with a
/// known key are wired to but not re-emitted. Errors with
/// [`Error::MissingDependency`] when a Specimen or Observation identifier is
/// supplied without a Patient.
pub fn build_skeleton(
    config: &ProjectConfig,
    descriptor: &FileDescriptor,
    known: &BTreeSet<NodeKey>,
) -> Result<SkeletonOutput, Error> {
    let namespace = config.namespace.as_str();
    let project = config.project_id.as_str();
    let meta = &descriptor.meta;
    let mut out = SkeletonOutput::default();

    // Study is a per-project constant: always resolvable, emitted at most once.
    let study_ref = Reference::new(
        ResourceType::Study,
        node_id(namespace, project, ResourceType::Study, project),
    );
    out.emit(
        known,
        GraphNode {
            id: study_ref.id.clone(),
            resource_type: ResourceType::Study,
            identifier: project.to_string(),
            subject: None,
            study: None,
            specimen: None,
            input: vec![],
            output: vec![],
        },
    );

    let patient_ref = meta.patient.as_ref().map(|p| {
        Reference::new(
            ResourceType::Patient,
            node_id(namespace, project, ResourceType::Patient, p),
        )
    });

    if let (Some(patient), Some(patient_ref)) = (&meta.patient, &patient_ref) {
        out.emit(
            known,
            GraphNode {
                id: patient_ref.id.clone(),
                resource_type: ResourceType::Patient,
                identifier: patient.clone(),
                subject: None,
                study: None,
                specimen: None,
                input: vec![],
                output: vec![],
            },
        );
        // Enrollment link between the patient and the study.
        out.emit(
            known,
            GraphNode {
                id: node_id(namespace, project, ResourceType::ResearchSubject, patient),
                resource_type: ResourceType::ResearchSubject,
                identifier: patient.clone(),
                subject: Some(patient_ref.clone()),
                study: Some(study_ref.clone()),
                specimen: None,
                input: vec![],
                output: vec![],
            },
        );
    }

    let specimen_ref = match &meta.specimen {
        Some(specimen) => {
            let patient_ref = patient_ref.clone().ok_or_else(|| {
                Error::MissingDependency(format!(
                    "specimen {} requires a patient identifier",
                    specimen
                ))
            })?;
            let reference = Reference::new(
                ResourceType::Specimen,
                node_id(namespace, project, ResourceType::Specimen, specimen),
            );
            out.emit(
                known,
                GraphNode {
                    id: reference.id.clone(),
                    resource_type: ResourceType::Specimen,
                    identifier: specimen.clone(),
                    subject: Some(patient_ref),
                    study: None,
                    specimen: None,
                    input: vec![],
                    output: vec![],
                },
            );
            Some(reference)
        }
        None => None,
    };

    let observation_ref = match &meta.observation {
        Some(observation) => {
            let patient_ref = patient_ref.clone().ok_or_else(|| {
                Error::MissingDependency(format!(
                    "observation {} requires a patient identifier",
                    observation
                ))
            })?;
            let reference = Reference::new(
                ResourceType::Observation,
                node_id(namespace, project, ResourceType::Observation, observation),
            );
            out.emit(
                known,
                GraphNode {
                    id: reference.id.clone(),
                    resource_type: ResourceType::Observation,
                    identifier: observation.clone(),
                    subject: Some(patient_ref),
                    study: None,
                    specimen: specimen_ref.clone(),
                    input: vec![],
                    output: vec![],
                },
            );
            Some(reference)
        }
        None => None,
    };

    let document_ref = Reference::new(ResourceType::DocumentReference, descriptor.object_id.clone());

    if let Some(task) = &meta.task {
        let mut input = Vec::new();
        if let Some(specimen_ref) = &specimen_ref {
            input.push(specimen_ref.clone());
        }
        if let Some(patient_ref) = &patient_ref {
            input.push(patient_ref.clone());
        }
        out.emit(
            known,
            GraphNode {
                id: node_id(namespace, project, ResourceType::Task, task),
                resource_type: ResourceType::Task,
                identifier: task.clone(),
                subject: None,
                study: None,
                specimen: None,
                input,
                output: vec![document_ref.clone()],
            },
        );
    }

    // Subject precedence: Observation > Specimen > Patient > Study.
    // Policy choice; change here and in the pinning test together.
    let subject = observation_ref
        .or(specimen_ref)
        .or(patient_ref)
        .unwrap_or(study_ref);

    out.emit(
        known,
        GraphNode {
            id: descriptor.object_id.clone(),
            resource_type: ResourceType::DocumentReference,
            identifier: descriptor.path.clone(),
            subject: Some(subject),
            study: None,
            specimen: None,
            input: vec![],
            output: vec![],
        },
    );

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{object_id, HashAlgorithm, Identifiers};
    use chrono::TimeZone;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn config() -> ProjectConfig {
        ProjectConfig::new("/data/proj", "proj")
    }

    fn descriptor(path: &str, meta: Identifiers) -> FileDescriptor {
        let mut hashes = BTreeMap::new();
        hashes.insert(HashAlgorithm::Sha256, "a".repeat(64));
        FileDescriptor {
            path: path.to_string(),
            hashes,
            size: 1,
            modified: chrono::FixedOffset::east_opt(0)
                .unwrap()
                .with_ymd_and_hms(2024, 5, 1, 12, 0, 0)
                .unwrap(),
            mime: "application/octet-stream".to_string(),
            is_symlink: false,
            real_path: Some(PathBuf::from("/data/proj").join(path)),
            source_url: None,
            object_id: object_id("proj", path),
            meta,
        }
    }

    fn types_of(nodes: &[GraphNode]) -> Vec<ResourceType> {
        nodes.iter().map(|n| n.resource_type).collect()
    }

    #[test]
    fn test_bare_descriptor_yields_study_and_document() {
        let out = build_skeleton(
            &config(),
            &descriptor("a.txt", Identifiers::default()),
            &BTreeSet::new(),
        )
        .unwrap();
        assert_eq!(
            types_of(&out.new_nodes),
            vec![ResourceType::Study, ResourceType::DocumentReference]
        );
        let doc = out.new_nodes.last().unwrap();
        assert_eq!(doc.id, object_id("proj", "a.txt"));
        assert_eq!(
            doc.subject.as_ref().unwrap().resource_type,
            ResourceType::Study
        );
    }

    #[test]
    fn test_patient_creates_research_subject() {
        let meta = Identifiers {
            patient: Some("P1".to_string()),
            ..Identifiers::default()
        };
        let out = build_skeleton(&config(), &descriptor("a.txt", meta), &BTreeSet::new()).unwrap();
        assert_eq!(
            types_of(&out.new_nodes),
            vec![
                ResourceType::Study,
                ResourceType::Patient,
                ResourceType::ResearchSubject,
                ResourceType::DocumentReference,
            ]
        );
        let subject = &out.new_nodes[2];
        assert_eq!(
            subject.subject.as_ref().unwrap().id,
            node_id("datashed", "proj", ResourceType::Patient, "P1")
        );
        assert_eq!(
            subject.study.as_ref().unwrap().id,
            node_id("datashed", "proj", ResourceType::Study, "proj")
        );
    }

    #[test]
    fn test_specimen_without_patient_is_rejected() {
        let meta = Identifiers {
            specimen: Some("S1".to_string()),
            ..Identifiers::default()
        };
        let result = build_skeleton(&config(), &descriptor("a.txt", meta), &BTreeSet::new());
        assert!(matches!(result, Err(Error::MissingDependency(_))));
    }

    #[test]
    fn test_observation_without_patient_is_rejected() {
        let meta = Identifiers {
            observation: Some("O1".to_string()),
            ..Identifiers::default()
        };
        let result = build_skeleton(&config(), &descriptor("a.txt", meta), &BTreeSet::new());
        assert!(matches!(result, Err(Error::MissingDependency(_))));
    }

    #[test]
    fn test_observation_links_specimen_when_present() {
        let meta = Identifiers {
            patient: Some("P1".to_string()),
            specimen: Some("S1".to_string()),
            observation: Some("O1".to_string()),
            ..Identifiers::default()
        };
        let out = build_skeleton(&config(), &descriptor("a.txt", meta), &BTreeSet::new()).unwrap();
        let observation = out
            .new_nodes
            .iter()
            .find(|n| n.resource_type == ResourceType::Observation)
            .unwrap();
        assert_eq!(
            observation.specimen.as_ref().unwrap().id,
            node_id("datashed", "proj", ResourceType::Specimen, "S1")
        );
    }

    #[test]
    fn test_task_wires_inputs_and_document_output() {
        let meta = Identifiers {
            patient: Some("P1".to_string()),
            specimen: Some("S1".to_string()),
            task: Some("T1".to_string()),
            ..Identifiers::default()
        };
        let out = build_skeleton(&config(), &descriptor("a.txt", meta), &BTreeSet::new()).unwrap();
        let task = out
            .new_nodes
            .iter()
            .find(|n| n.resource_type == ResourceType::Task)
            .unwrap();
        let input_types: Vec<ResourceType> = task.input.iter().map(|r| r.resource_type).collect();
        assert_eq!(
            input_types,
            vec![ResourceType::Specimen, ResourceType::Patient]
        );
        assert_eq!(task.output.len(), 1);
        assert_eq!(task.output[0].id, object_id("proj", "a.txt"));
    }

    #[test]
    fn test_document_subject_precedence() {
        // Observation outranks Specimen outranks Patient outranks Study.
        let all = Identifiers {
            patient: Some("P1".to_string()),
            specimen: Some("S1".to_string()),
            observation: Some("O1".to_string()),
            ..Identifiers::default()
        };
        let out = build_skeleton(&config(), &descriptor("a.txt", all), &BTreeSet::new()).unwrap();
        let doc = out.new_nodes.last().unwrap();
        assert_eq!(
            doc.subject.as_ref().unwrap().resource_type,
            ResourceType::Observation
        );

        let no_observation = Identifiers {
            patient: Some("P1".to_string()),
            specimen: Some("S1".to_string()),
            ..Identifiers::default()
        };
        let out =
            build_skeleton(&config(), &descriptor("a.txt", no_observation), &BTreeSet::new())
                .unwrap();
        assert_eq!(
            out.new_nodes.last().unwrap().subject.as_ref().unwrap().resource_type,
            ResourceType::Specimen
        );

        let patient_only = Identifiers {
            patient: Some("P1".to_string()),
            ..Identifiers::default()
        };
        let out =
            build_skeleton(&config(), &descriptor("a.txt", patient_only), &BTreeSet::new())
                .unwrap();
        assert_eq!(
            out.new_nodes.last().unwrap().subject.as_ref().unwrap().resource_type,
            ResourceType::Patient
        );
    }

    #[test]
    fn test_known_nodes_are_reused_not_reemitted() {
        let meta = Identifiers {
            patient: Some("P1".to_string()),
            ..Identifiers::default()
        };
        let first =
            build_skeleton(&config(), &descriptor("a.txt", meta.clone()), &BTreeSet::new())
                .unwrap();
        let known: BTreeSet<NodeKey> = first.keys.clone();

        let second = build_skeleton(&config(), &descriptor("a.txt", meta), &known).unwrap();
        assert!(second.new_nodes.is_empty());
        assert_eq!(second.keys, first.keys);
    }
}
