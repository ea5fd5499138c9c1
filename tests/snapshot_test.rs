//! Local-state snapshot integration tests
//!
//! Round-trips the whole registry through the JSON snapshot format:
//! - field values, relations, references, and sync baselines survive
//! - pending deletion records survive
//! - loading replaces the previous registry wholesale
//! - a snapshot against the wrong vocabulary fails without clobbering

use serde_json::json;

use contexture::{InstanceHeader, MemoryStore, RelationValue, Schema, SemanticsManager};
use tempfile::TempDir;

const SCHEMA: &str = r#"
datatypes:
  - name: celsius
    kind: number
    decimals: true
classes:
  - name: Building
    fields:
      - name: hasRoom
        kind: relation
        inverse_of: [inBuilding]
  - name: Room
    fields:
      - name: temperature
        kind: data
        datatype: celsius
      - name: inBuilding
        kind: relation
        inverse_of: [hasRoom]
"#;

fn schema() -> Schema {
    Schema::from_yaml(SCHEMA).unwrap()
}

fn manager(store: &MemoryStore) -> SemanticsManager<&MemoryStore> {
    SemanticsManager::new(schema(), store, InstanceHeader::default())
}

/// A manager with a building, a linked room with a value and a synced
/// baseline, and one pending deletion.
fn populated(store: &MemoryStore) -> SemanticsManager<&MemoryStore> {
    let mut mgr = manager(store);
    let building = mgr.get_or_create("Building", "b-1").unwrap();
    let room = mgr.get_or_create("Room", "room-1").unwrap();
    mgr.instance_mut(&room)
        .unwrap()
        .data_field_mut("temperature")
        .unwrap()
        .add(json!(21.0));
    mgr.registry_mut()
        .add_relation(&building, "hasRoom", RelationValue::Instance(room.clone()))
        .unwrap();
    mgr.save_state(true).unwrap();

    let doomed = mgr.get_or_create("Room", "room-2").unwrap();
    mgr.save_state(true).unwrap();
    mgr.delete_instance(&doomed, false).unwrap();
    mgr
}

#[test]
fn test_json_round_trip_preserves_everything() {
    let store = MemoryStore::new();
    let mgr = populated(&store);
    let json = mgr.save_local_state_as_json().unwrap();

    let other_store = MemoryStore::new();
    let mut restored = manager(&other_store);
    restored.load_local_state_from_json(&json).unwrap();

    assert_eq!(restored.registry().len(), mgr.registry().len());
    for ident in mgr.registry().identifiers() {
        assert_eq!(
            restored.registry().get(ident).unwrap(),
            mgr.registry().get(ident).unwrap()
        );
    }
    // the pending deletion travels too
    let deleted: Vec<_> = restored.registry().deleted().collect();
    assert_eq!(deleted.len(), 1);
    assert_eq!(deleted[0].id, "room-2");
}

#[test]
fn test_restored_state_keeps_merging_correctly() {
    let store = MemoryStore::new();
    let mgr = populated(&store);
    let json = mgr.save_local_state_as_json().unwrap();
    drop(mgr);

    // restore against the same remote and continue working
    let mut restored = manager(&store);
    restored.load_local_state_from_json(&json).unwrap();
    let room = restored.get_or_create("Room", "room-1").unwrap();
    restored
        .instance_mut(&room)
        .unwrap()
        .data_field_mut("temperature")
        .unwrap()
        .add(json!(22.0));
    restored.save_state(true).unwrap();

    let values = store
        .entity(&InstanceHeader::default(), "room-1", "Room")
        .unwrap()
        .attribute("temperature")
        .unwrap()
        .value
        .clone();
    assert_eq!(values, json!([21.0, 22.0]));
    // the reconciled deletion removed room-2 remotely
    assert!(store
        .entity(&InstanceHeader::default(), "room-2", "Room")
        .is_none());
}

#[test]
fn test_load_replaces_previous_registry() {
    let store = MemoryStore::new();
    let mgr = populated(&store);
    let json = mgr.save_local_state_as_json().unwrap();

    let other_store = MemoryStore::new();
    let mut other = manager(&other_store);
    other.get_or_create("Room", "stray").unwrap();
    other.load_local_state_from_json(&json).unwrap();

    assert!(!other
        .registry()
        .identifiers()
        .any(|ident| ident.id == "stray"));
}

#[test]
fn test_foreign_snapshot_fails_without_clobbering() {
    let store = MemoryStore::new();
    let mgr = populated(&store);
    let json = mgr.save_local_state_as_json().unwrap();

    // a vocabulary that knows none of the snapshot's classes
    let other_store = MemoryStore::new();
    let mut other = SemanticsManager::new(
        Schema::from_yaml("classes:\n  - name: Vat\n").unwrap(),
        &other_store,
        InstanceHeader::default(),
    );
    other.get_or_create("Vat", "vat-1").unwrap();

    assert!(other.load_local_state_from_json(&json).is_err());
    // the failed load touched nothing
    assert_eq!(other.registry().len(), 1);
}

#[test]
fn test_file_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("state.json");

    let store = MemoryStore::new();
    let mgr = populated(&store);
    mgr.save_local_state_to_file(&path).unwrap();

    let other_store = MemoryStore::new();
    let mut restored = manager(&other_store);
    restored.load_local_state_from_file(&path).unwrap();
    assert_eq!(restored.registry().len(), mgr.registry().len());
}

#[test]
fn test_malformed_snapshot_is_rejected() {
    let store = MemoryStore::new();
    let mut mgr = manager(&store);
    assert!(mgr.load_local_state_from_json("{ not json").is_err());
}
