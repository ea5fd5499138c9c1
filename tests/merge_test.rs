//! Save-path integration tests
//!
//! Exercises the three-way merge against a shared in-memory store:
//! - concurrent writers converge without losing each other's values
//! - removals delete remotely without resurrecting on later saves
//! - the validity gate rejects before any side effect
//! - a failed write leaves local state and baselines untouched
//! - attributes unknown to the local model survive a save

use serde_json::json;

use contexture::{
    ContextureError, EntityAttribute, InstanceHeader, MemoryStore, Schema, SemanticsManager,
    StoreError,
};

const SCHEMA: &str = r#"
datatypes:
  - name: celsius
    kind: number
    decimals: true
classes:
  - name: Room
    fields:
      - name: temperature
        kind: data
        datatype: celsius
  - name: Metered
    fields:
      - name: reading
        kind: data
        datatype: celsius
        rules:
          - kind: some
            targets: [[celsius]]
"#;

fn schema() -> Schema {
    Schema::from_yaml(SCHEMA).unwrap()
}

fn header() -> InstanceHeader {
    InstanceHeader::default()
}

fn manager(store: &MemoryStore) -> SemanticsManager<&MemoryStore> {
    SemanticsManager::new(schema(), store, header())
}

fn temperature_values(store: &MemoryStore) -> Vec<serde_json::Value> {
    store
        .entity(&header(), "room-1", "Room")
        .unwrap()
        .attribute("temperature")
        .unwrap()
        .value
        .as_array()
        .unwrap()
        .clone()
}

// =============================================================================
// Convergence across writers
// =============================================================================

#[test]
fn test_concurrent_additions_both_survive() {
    let store = MemoryStore::new();

    let mut alice = manager(&store);
    let room = alice.get_or_create("Room", "room-1").unwrap();
    alice
        .instance_mut(&room)
        .unwrap()
        .data_field_mut("temperature")
        .unwrap()
        .add(json!(1.0));
    alice.save_state(true).unwrap();

    // bob syncs, then both add a value independently
    let mut bob = manager(&store);
    let room_b = bob.get_or_create("Room", "room-1").unwrap();
    bob.instance_mut(&room_b)
        .unwrap()
        .data_field_mut("temperature")
        .unwrap()
        .add(json!(2.0));
    bob.save_state(true).unwrap();

    alice
        .instance_mut(&room)
        .unwrap()
        .data_field_mut("temperature")
        .unwrap()
        .add(json!(3.0));
    alice.save_state(true).unwrap();

    assert_eq!(
        temperature_values(&store),
        vec![json!(1.0), json!(2.0), json!(3.0)]
    );
    // alice's local view converged to the merged set too
    assert_eq!(
        alice
            .instance(&room)
            .unwrap()
            .data_field("temperature")
            .unwrap()
            .len(),
        3
    );
}

#[test]
fn test_stale_writer_does_not_resurrect_removal() {
    let store = MemoryStore::new();

    let mut alice = manager(&store);
    let room = alice.get_or_create("Room", "room-1").unwrap();
    alice
        .instance_mut(&room)
        .unwrap()
        .data_field_mut("temperature")
        .unwrap()
        .update([json!(1.0), json!(2.0)]);
    alice.save_state(true).unwrap();

    // bob removes a value and saves
    let mut bob = manager(&store);
    let room_b = bob.get_or_create("Room", "room-1").unwrap();
    bob.instance_mut(&room_b)
        .unwrap()
        .data_field_mut("temperature")
        .unwrap()
        .remove(&json!(2.0))
        .unwrap();
    bob.save_state(true).unwrap();

    // alice still holds both values locally but changed neither, so her
    // save must not bring the removed one back
    alice.save_state(true).unwrap();
    assert_eq!(temperature_values(&store), vec![json!(1.0)]);
}

#[test]
fn test_repeated_save_converges() {
    let store = MemoryStore::new();
    let mut mgr = manager(&store);

    let room = mgr.get_or_create("Room", "room-1").unwrap();
    mgr.instance_mut(&room)
        .unwrap()
        .data_field_mut("temperature")
        .unwrap()
        .add(json!(21.0));
    mgr.save_state(true).unwrap();
    let first = store.entity(&header(), "room-1", "Room").unwrap();

    mgr.save_state(true).unwrap();
    let second = store.entity(&header(), "room-1", "Room").unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_unknown_remote_attribute_survives_save() {
    let store = MemoryStore::new();
    let mut mgr = manager(&store);

    let room = mgr.get_or_create("Room", "room-1").unwrap();
    mgr.save_state(true).unwrap();

    // another system decorated the entity with an attribute this model
    // does not declare
    let mut entity = store.entity(&header(), "room-1", "Room").unwrap();
    entity.set_attribute(
        "legacyTag",
        EntityAttribute::new("StructuredValue", json!("keep-me")),
    );
    store.seed_entity(&header(), entity);

    mgr.instance_mut(&room)
        .unwrap()
        .data_field_mut("temperature")
        .unwrap()
        .add(json!(22.0));
    mgr.save_state(true).unwrap();

    let entity = store.entity(&header(), "room-1", "Room").unwrap();
    assert_eq!(entity.attribute("legacyTag").unwrap().value, json!("keep-me"));
    assert_eq!(temperature_values(&store), vec![json!(22.0)]);
}

// =============================================================================
// Validity gate
// =============================================================================

#[test]
fn test_invalid_state_blocks_save_before_side_effects() {
    let store = MemoryStore::new();
    let mut mgr = manager(&store);

    let ident = mgr.get_or_create("Metered", "m-1").unwrap();
    let err = mgr.save_state(true).unwrap_err();
    match err {
        ContextureError::InvalidState { report } => {
            assert!(report.contains("m-1"));
            assert!(report.contains("Metered"));
            assert!(report.contains("reading"));
        }
        other => panic!("expected InvalidState, got {other}"),
    }
    assert_eq!(store.write_count(), 0);
    assert!(mgr.instance(&ident).unwrap().old_state().is_none());
}

#[test]
fn test_rule_violations_can_be_overridden() {
    let store = MemoryStore::new();
    let mut mgr = manager(&store);

    mgr.get_or_create("Metered", "m-1").unwrap();
    mgr.save_state(false).unwrap();
    assert!(store.entity(&header(), "m-1", "Metered").is_some());
}

// =============================================================================
// Commit discipline
// =============================================================================

#[test]
fn test_failed_write_leaves_state_uncommitted() {
    let store = MemoryStore::new();
    let mut mgr = manager(&store);

    let room = mgr.get_or_create("Room", "room-1").unwrap();
    mgr.instance_mut(&room)
        .unwrap()
        .data_field_mut("temperature")
        .unwrap()
        .add(json!(21.0));

    store.fail_next_write();
    let err = mgr.save_state(true).unwrap_err();
    assert!(matches!(
        err,
        ContextureError::Store(StoreError::Network(_))
    ));
    // nothing committed: no baseline, nothing remote
    assert!(mgr.instance(&room).unwrap().old_state().is_none());
    assert!(store.entity(&header(), "room-1", "Room").is_none());

    // the retry proceeds from the same local state
    mgr.save_state(true).unwrap();
    assert!(mgr.instance(&room).unwrap().old_state().is_some());
    assert_eq!(temperature_values(&store), vec![json!(21.0)]);
}

#[test]
fn test_save_anchors_baseline_for_next_merge() {
    let store = MemoryStore::new();
    let mut mgr = manager(&store);

    let room = mgr.get_or_create("Room", "room-1").unwrap();
    mgr.instance_mut(&room)
        .unwrap()
        .data_field_mut("temperature")
        .unwrap()
        .add(json!(1.0));
    mgr.save_state(true).unwrap();

    // the committed baseline equals what was written
    let baseline = mgr.instance(&room).unwrap().old_state().unwrap().clone();
    assert_eq!(baseline, store.entity(&header(), "room-1", "Room").unwrap());

    // a later removal is a delta against that baseline
    mgr.instance_mut(&room)
        .unwrap()
        .data_field_mut("temperature")
        .unwrap()
        .remove(&json!(1.0))
        .unwrap();
    mgr.save_state(true).unwrap();
    assert!(temperature_values(&store).is_empty());
}
