//! Identifier derivation properties.

use datashed::canonical;
use datashed::descriptor::object_id;
use datashed::skeleton::{node_id, ResourceType};
use proptest::prelude::*;

proptest! {
    #[test]
    fn object_id_is_stable(project in "[a-z0-9-]{1,16}", path in "[a-zA-Z0-9_./-]{1,64}") {
        prop_assert_eq!(object_id(&project, &path), object_id(&project, &path));
    }

    #[test]
    fn object_id_is_hex_of_fixed_length(project in ".*", path in ".*") {
        let id = object_id(&project, &path);
        prop_assert_eq!(id.len(), 64);
        prop_assert!(id.bytes().all(|b| b.is_ascii_hexdigit()));
    }

    #[test]
    fn part_boundaries_are_unambiguous(a in "[a-z]{1,8}", b in "[a-z]{1,8}") {
        // Moving a character across the project/path boundary changes the id.
        prop_assume!(!b.is_empty());
        let moved_project = format!("{}{}", a, &b[..1]);
        let moved_path = &b[1..];
        prop_assert_ne!(object_id(&a, &b), object_id(&moved_project, moved_path));
    }

    #[test]
    fn node_id_is_stable(identifier in "[a-zA-Z0-9-]{1,32}") {
        prop_assert_eq!(
            node_id("datashed", "proj", ResourceType::Patient, &identifier),
            node_id("datashed", "proj", ResourceType::Patient, &identifier)
        );
    }

    #[test]
    fn node_id_separates_namespaces(identifier in "[a-zA-Z0-9-]{1,32}") {
        prop_assert_ne!(
            node_id("datashed", "proj", ResourceType::Patient, &identifier),
            node_id("other", "proj", ResourceType::Patient, &identifier)
        );
    }

    #[test]
    fn canonical_hash_ignores_key_order(
        keys in proptest::collection::btree_set("[a-z]{1,6}", 1..6),
    ) {
        let forward: serde_json::Map<String, serde_json::Value> = keys
            .iter()
            .enumerate()
            .map(|(i, k)| (k.clone(), serde_json::json!(i)))
            .collect();
        let reverse: serde_json::Map<String, serde_json::Value> = keys
            .iter()
            .rev()
            .collect::<Vec<_>>()
            .into_iter()
            .map(|k| (k.clone(), forward[k].clone()))
            .collect();
        prop_assert_eq!(
            canonical::record_hash(&serde_json::Value::Object(forward)),
            canonical::record_hash(&serde_json::Value::Object(reverse))
        );
    }
}

#[test]
fn resource_type_separates_id_spaces() {
    let patient = node_id("datashed", "proj", ResourceType::Patient, "X1");
    let specimen = node_id("datashed", "proj", ResourceType::Specimen, "X1");
    assert_ne!(patient, specimen);
}
