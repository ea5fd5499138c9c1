//! Local-state snapshots: serialize the whole registry to JSON and
//! restore it later, sync baselines and deletion records included.
//!
//! Instances travel in their remote representation, which already
//! carries fields, references, metadata, and device settings; restoring
//! is the same parse path a hot-load uses.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ContextureError, Result};
use crate::manager::{translate, SemanticsManager};
use crate::model::header::{InstanceHeader, InstanceIdentifier};
use crate::store::{EntityStore, RemoteEntity};

#[derive(Debug, Serialize, Deserialize)]
struct SavedInstance {
    entity: RemoteEntity,
    header: InstanceHeader,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    old_state: Option<RemoteEntity>,
}

#[derive(Debug, Serialize, Deserialize)]
struct LocalState {
    instances: Vec<SavedInstance>,
    #[serde(default)]
    deleted_identifiers: Vec<InstanceIdentifier>,
}

impl<S: EntityStore> SemanticsManager<S> {
    /// Serialize the registry, including per-instance sync baselines and
    /// pending deletion records.
    pub fn save_local_state_as_json(&self) -> Result<String> {
        let state = LocalState {
            instances: self
                .registry()
                .instances()
                .map(|instance| SavedInstance {
                    entity: translate::build_entity(instance),
                    header: instance.header().clone(),
                    old_state: instance.old_state().cloned(),
                })
                .collect(),
            deleted_identifiers: self.registry().deleted().cloned().collect(),
        };
        serde_json::to_string_pretty(&state)
            .map_err(|e| ContextureError::Store(crate::error::StoreError::Serialization(e)))
    }

    /// Replace the registry with a previously serialized state.
    ///
    /// All-or-nothing: the document is fully parsed against the current
    /// schema before anything is touched, so a stale or foreign snapshot
    /// fails without clobbering the live state.
    pub fn load_local_state_from_json(&mut self, json: &str) -> Result<()> {
        let state: LocalState = serde_json::from_str(json)
            .map_err(|e| ContextureError::Store(crate::error::StoreError::Serialization(e)))?;

        let mut instances = Vec::with_capacity(state.instances.len());
        for saved in state.instances {
            let mut instance =
                translate::parse_entity(&saved.entity, &saved.header, self.schema())?;
            instance.old_state = saved.old_state;
            instances.push(instance);
        }

        let registry = self.registry_mut();
        registry.reset();
        for instance in instances {
            registry.register(instance);
        }
        for ident in state.deleted_identifiers {
            registry.mark_deleted(ident);
        }
        info!(instances = self.registry().len(), "restored local state");
        Ok(())
    }

    pub fn save_local_state_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = self.save_local_state_as_json()?;
        fs::write(path.as_ref(), json)?;
        Ok(())
    }

    pub fn load_local_state_from_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let json = fs::read_to_string(path.as_ref())?;
        self.load_local_state_from_json(&json)
    }
}
