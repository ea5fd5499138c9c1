//! The narrow seam between the core and the remote context store.
//!
//! The manager consumes exactly the [`EntityStore`] capability surface;
//! any transport implementing it is substitutable. Wire-level protocol
//! details live entirely inside the implementations ([`HttpStore`],
//! [`MemoryStore`]).

pub mod http;
pub mod memory;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StoreError;
use crate::model::device::{DeviceSettings, RetrievalMode};
use crate::model::header::InstanceHeader;

pub use http::HttpStore;
pub use memory::MemoryStore;

/// Reserved attribute carrying the inbound-reference map.
pub const REFERENCES_ATTRIBUTE: &str = "referencedBy";
/// Reserved attribute carrying name/comment metadata.
pub const METADATA_ATTRIBUTE: &str = "metadata";
/// Reserved attribute carrying device transport settings.
pub const DEVICE_SETTINGS_ATTRIBUTE: &str = "deviceSettings";

/// Names a modeled field (or synthesized device entry) must never take.
pub const RESERVED_ATTRIBUTE_NAMES: &[&str] = &[
    REFERENCES_ATTRIBUTE,
    METADATA_ATTRIBUTE,
    DEVICE_SETTINGS_ATTRIBUTE,
    "id",
    "type",
];

/// One attribute of a remote entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityAttribute {
    #[serde(rename = "type")]
    pub attribute_type: String,
    pub value: Value,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, Value>,
}

impl EntityAttribute {
    pub fn new(attribute_type: impl Into<String>, value: Value) -> Self {
        Self {
            attribute_type: attribute_type.into(),
            value,
            metadata: serde_json::Map::new(),
        }
    }
}

/// Flat remote representation of one entity, as exchanged with the
/// context store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteEntity {
    pub id: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    #[serde(flatten)]
    pub attributes: BTreeMap<String, EntityAttribute>,
}

impl RemoteEntity {
    pub fn new(id: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            entity_type: entity_type.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&EntityAttribute> {
        self.attributes.get(name)
    }

    pub fn set_attribute(&mut self, name: impl Into<String>, attribute: EntityAttribute) {
        self.attributes.insert(name.into(), attribute);
    }
}

/// One entry of a remote device representation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteDeviceAttribute {
    pub name: String,
    pub mode: RetrievalMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteDeviceCommand {
    pub name: String,
}

/// Remote representation of a device, as exchanged with the IoT layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteDevice {
    pub device_id: String,
    pub entity_name: String,
    pub entity_type: String,
    #[serde(flatten)]
    pub settings: DeviceSettings,
    #[serde(default)]
    pub attributes: Vec<RemoteDeviceAttribute>,
    #[serde(default)]
    pub commands: Vec<RemoteDeviceCommand>,
}

/// Selection criteria for batch entity listing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityFilter {
    pub ids: Vec<String>,
    pub types: Vec<String>,
    pub id_pattern: Option<String>,
    pub type_pattern: Option<String>,
    pub query: Option<String>,
    pub limit: Option<usize>,
}

impl EntityFilter {
    /// Select all entities of the given types.
    pub fn types(types: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            types: types.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }
}

/// Minimal capability surface of the remote context store.
///
/// All calls are blocking; timeout and retry policy belong to the
/// implementation, not the core. An existence check answering "no" is a
/// normal negative result, never an error.
pub trait EntityStore {
    fn entity_exists(
        &self,
        header: &InstanceHeader,
        id: &str,
        entity_type: &str,
    ) -> Result<bool, StoreError>;

    /// Fails with [`StoreError::NotFound`] if absent.
    fn fetch_entity(
        &self,
        header: &InstanceHeader,
        id: &str,
        entity_type: &str,
    ) -> Result<RemoteEntity, StoreError>;

    /// Create or patch; `previous` is the last known snapshot and lets
    /// the implementation minimize the diff it sends.
    fn write_entity(
        &self,
        header: &InstanceHeader,
        entity: &RemoteEntity,
        previous: Option<&RemoteEntity>,
    ) -> Result<(), StoreError>;

    fn delete_entity(
        &self,
        header: &InstanceHeader,
        id: &str,
        entity_type: &str,
        cascade_devices: bool,
    ) -> Result<(), StoreError>;

    fn list_entities(
        &self,
        header: &InstanceHeader,
        filter: &EntityFilter,
    ) -> Result<Vec<RemoteEntity>, StoreError>;

    fn fetch_device(&self, header: &InstanceHeader, id: &str) -> Result<RemoteDevice, StoreError>;

    /// Write a device; with `patch_entity` the implementation also
    /// refreshes the paired context entity.
    fn write_device(
        &self,
        header: &InstanceHeader,
        device: &RemoteDevice,
        patch_entity: bool,
    ) -> Result<(), StoreError>;

    fn delete_device(&self, header: &InstanceHeader, id: &str) -> Result<(), StoreError>;
}

/// A shared reference to a store is itself a store; lets a caller keep
/// inspecting the store it handed to the manager.
impl<S: EntityStore + ?Sized> EntityStore for &S {
    fn entity_exists(
        &self,
        header: &InstanceHeader,
        id: &str,
        entity_type: &str,
    ) -> Result<bool, StoreError> {
        (**self).entity_exists(header, id, entity_type)
    }

    fn fetch_entity(
        &self,
        header: &InstanceHeader,
        id: &str,
        entity_type: &str,
    ) -> Result<RemoteEntity, StoreError> {
        (**self).fetch_entity(header, id, entity_type)
    }

    fn write_entity(
        &self,
        header: &InstanceHeader,
        entity: &RemoteEntity,
        previous: Option<&RemoteEntity>,
    ) -> Result<(), StoreError> {
        (**self).write_entity(header, entity, previous)
    }

    fn delete_entity(
        &self,
        header: &InstanceHeader,
        id: &str,
        entity_type: &str,
        cascade_devices: bool,
    ) -> Result<(), StoreError> {
        (**self).delete_entity(header, id, entity_type, cascade_devices)
    }

    fn list_entities(
        &self,
        header: &InstanceHeader,
        filter: &EntityFilter,
    ) -> Result<Vec<RemoteEntity>, StoreError> {
        (**self).list_entities(header, filter)
    }

    fn fetch_device(&self, header: &InstanceHeader, id: &str) -> Result<RemoteDevice, StoreError> {
        (**self).fetch_device(header, id)
    }

    fn write_device(
        &self,
        header: &InstanceHeader,
        device: &RemoteDevice,
        patch_entity: bool,
    ) -> Result<(), StoreError> {
        (**self).write_device(header, device, patch_entity)
    }

    fn delete_device(&self, header: &InstanceHeader, id: &str) -> Result<(), StoreError> {
        (**self).delete_device(header, id)
    }
}
