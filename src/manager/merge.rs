//! Three-way merge of instance state, executed per instance right
//! before the write phase of a save.
//!
//! The baseline is always the instance's own remembered snapshot, not
//! the live one: `added = local − old` and `removed = old − local`
//! isolate exactly what this process changed since it last synced, and
//! those deltas are applied onto the live value set. A concurrent
//! writer's untouched values survive; our own additions and removals
//! still take effect.
//!
//! The merge is computed into a [`StagedInstance`] and only committed to
//! the live registry entry after the write phase succeeds, so a failed
//! save leaves local fields exactly as they were.

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::Result;
use crate::manager::translate;
use crate::model::header::InstanceIdentifier;
use crate::model::instance::Instance;
use crate::schema::Schema;
use crate::store::{
    RemoteDevice, RemoteEntity, DEVICE_SETTINGS_ATTRIBUTE, METADATA_ATTRIBUTE,
    REFERENCES_ATTRIBUTE,
};

/// The merged result of one instance, ready to write and to commit.
#[derive(Debug)]
pub(crate) struct StagedInstance {
    pub ident: InstanceIdentifier,
    /// Merged remote representation; written to the store and installed
    /// as the new `old_state` after a successful save.
    pub entity: RemoteEntity,
    /// Merged local model, parsed back from `entity`; replaces the
    /// registry entry at commit.
    pub merged: Instance,
    /// Device representation derived from the merged state.
    pub device: Option<RemoteDevice>,
}

/// Apply this process's add/remove deltas onto the live value set.
pub(crate) fn merge_value_sets(old: &[Value], local: &[Value], live: &[Value]) -> Vec<Value> {
    let removed: Vec<&Value> = old.iter().filter(|v| !local.contains(v)).collect();
    let mut merged: Vec<Value> = live
        .iter()
        .filter(|v| !removed.contains(v))
        .cloned()
        .collect();
    for value in local {
        // added = local − old; plus anything live happens to miss
        if !old.contains(value) && !merged.contains(value) {
            merged.push(value.clone());
        }
    }
    merged
}

fn as_object(value: Option<&Value>) -> Map<String, Value> {
    value
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default()
}

fn as_string_list(value: Option<&Value>) -> Vec<Value> {
    value.and_then(Value::as_array).cloned().unwrap_or_default()
}

/// Key-wise merge of the references map; keys whose merged field list
/// becomes empty are pruned entirely.
pub(crate) fn merge_reference_maps(
    old: Option<&Value>,
    local: Option<&Value>,
    live: Option<&Value>,
) -> Value {
    let old = as_object(old);
    let local = as_object(local);
    let live = as_object(live);

    let mut keys: Vec<&String> = local.keys().chain(live.keys()).chain(old.keys()).collect();
    keys.sort();
    keys.dedup();

    let mut merged = Map::new();
    for key in keys {
        let fields = merge_value_sets(
            &as_string_list(old.get(key)),
            &as_string_list(local.get(key)),
            &as_string_list(live.get(key)),
        );
        if !fields.is_empty() {
            merged.insert(key.clone(), Value::Array(fields));
        }
    }
    Value::Object(merged)
}

/// Key-wise last-writer-wins object merge: a key this process changed
/// since its snapshot overrides the live value, every other key keeps
/// what is live. Used for device settings and instance metadata.
///
/// Carried over as-is from the source behavior; stricter conflict
/// detection (versioning, ETags) is an open stakeholder question.
pub(crate) fn merge_settings_objects(
    old: Option<&Value>,
    local: Option<&Value>,
    live: Option<&Value>,
) -> Value {
    let old = as_object(old);
    let local = as_object(local);
    let live = as_object(live);

    let mut keys: Vec<&String> = local.keys().chain(live.keys()).collect();
    keys.sort();
    keys.dedup();

    let mut merged = Map::new();
    for key in keys {
        let value = if local.get(key) != old.get(key) {
            local.get(key)
        } else {
            live.get(key).or_else(|| local.get(key))
        };
        if let Some(value) = value {
            merged.insert(key.clone(), value.clone());
        }
    }
    Value::Object(merged)
}

fn attribute_value<'a>(entity: Option<&'a RemoteEntity>, name: &str) -> Option<&'a Value> {
    entity.and_then(|e| e.attribute(name)).map(|a| &a.value)
}

/// Compute the staged merge of one instance against the live remote
/// representation. With no live entity (pure create) the local
/// representation passes through unchanged.
///
/// Relation add/re-add races across processes are decided by save
/// ordering, not by conflict resolution.
pub(crate) fn stage(
    schema: &Schema,
    instance: &Instance,
    live: Option<&RemoteEntity>,
) -> Result<StagedInstance> {
    let local_entity = translate::build_entity(instance);
    let ident = instance.identifier().clone();

    let entity = match live {
        None => local_entity,
        Some(live) => {
            let old = instance.old_state();
            // start from live so attributes unknown to this model survive
            let mut merged = live.clone();
            merged.id = local_entity.id.clone();
            merged.entity_type = local_entity.entity_type.clone();
            for (name, local_attribute) in &local_entity.attributes {
                let old_value = attribute_value(old, name);
                let live_value = attribute_value(Some(live), name);
                let mut attribute = local_attribute.clone();
                attribute.value = match name.as_str() {
                    REFERENCES_ATTRIBUTE => merge_reference_maps(
                        old_value,
                        Some(&local_attribute.value),
                        live_value,
                    ),
                    METADATA_ATTRIBUTE | DEVICE_SETTINGS_ATTRIBUTE => merge_settings_objects(
                        old_value,
                        Some(&local_attribute.value),
                        live_value,
                    ),
                    _ => Value::Array(merge_value_sets(
                        old_value.and_then(Value::as_array).map_or(&[][..], Vec::as_slice),
                        local_attribute.value.as_array().map_or(&[][..], Vec::as_slice),
                        live_value.and_then(Value::as_array).map_or(&[][..], Vec::as_slice),
                    )),
                };
                merged.attributes.insert(name.clone(), attribute);
            }
            merged
        }
    };

    let mut merged = translate::parse_entity(&entity, instance.header(), schema)?;
    merged.old_state = instance.old_state().cloned();
    let device = merged.is_device().then(|| translate::build_device(&merged));
    debug!(ident = %ident, live = live.is_some(), "staged instance merge");

    Ok(StagedInstance {
        ident,
        entity,
        merged,
        device,
    })
}
