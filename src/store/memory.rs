//! In-memory [`EntityStore`]: the test double for every integration
//! suite, also usable as a purely local mode.
//!
//! Tenancy-aware: entities are keyed by `(service, service_path, id,
//! type)`, so two headers with different scopes never see each other's
//! entities. Interior mutability keeps the trait surface `&self`, like a
//! remote store would be.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;

use crate::error::StoreError;
use crate::model::header::InstanceHeader;
use crate::store::{EntityFilter, EntityStore, RemoteDevice, RemoteEntity};

type EntityKey = (String, String, String, String);
type DeviceKey = (String, String, String);

#[derive(Debug, Default)]
pub struct MemoryStore {
    entities: RefCell<BTreeMap<EntityKey, RemoteEntity>>,
    devices: RefCell<BTreeMap<DeviceKey, RemoteDevice>>,
    write_count: Cell<usize>,
    delete_count: Cell<usize>,
    /// When set, the next entity write fails once. Lets tests exercise
    /// the all-or-nothing commit of the save path.
    fail_next_write: Cell<bool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entity_key(header: &InstanceHeader, id: &str, entity_type: &str) -> EntityKey {
        (
            header.service.clone(),
            header.service_path.clone(),
            id.to_string(),
            entity_type.to_string(),
        )
    }

    fn device_key(header: &InstanceHeader, id: &str) -> DeviceKey {
        (
            header.service.clone(),
            header.service_path.clone(),
            id.to_string(),
        )
    }

    /// Number of entity writes performed so far.
    pub fn write_count(&self) -> usize {
        self.write_count.get()
    }

    /// Number of entity deletes performed so far.
    pub fn delete_count(&self) -> usize {
        self.delete_count.get()
    }

    /// Make the next `write_entity` call fail with a network error.
    pub fn fail_next_write(&self) {
        self.fail_next_write.set(true);
    }

    /// Direct lookup for assertions and for seeding "remote" state.
    pub fn entity(
        &self,
        header: &InstanceHeader,
        id: &str,
        entity_type: &str,
    ) -> Option<RemoteEntity> {
        self.entities
            .borrow()
            .get(&Self::entity_key(header, id, entity_type))
            .cloned()
    }

    /// Seed an entity as if another writer had put it there.
    pub fn seed_entity(&self, header: &InstanceHeader, entity: RemoteEntity) {
        let key = Self::entity_key(header, &entity.id, &entity.entity_type);
        self.entities.borrow_mut().insert(key, entity);
    }

    pub fn device(&self, header: &InstanceHeader, id: &str) -> Option<RemoteDevice> {
        self.devices
            .borrow()
            .get(&Self::device_key(header, id))
            .cloned()
    }
}

impl EntityStore for MemoryStore {
    fn entity_exists(
        &self,
        header: &InstanceHeader,
        id: &str,
        entity_type: &str,
    ) -> Result<bool, StoreError> {
        Ok(self
            .entities
            .borrow()
            .contains_key(&Self::entity_key(header, id, entity_type)))
    }

    fn fetch_entity(
        &self,
        header: &InstanceHeader,
        id: &str,
        entity_type: &str,
    ) -> Result<RemoteEntity, StoreError> {
        self.entity(header, id, entity_type)
            .ok_or_else(|| StoreError::NotFound(format!("{id}:{entity_type}")))
    }

    fn write_entity(
        &self,
        header: &InstanceHeader,
        entity: &RemoteEntity,
        _previous: Option<&RemoteEntity>,
    ) -> Result<(), StoreError> {
        if self.fail_next_write.replace(false) {
            return Err(StoreError::Network("injected write failure".to_string()));
        }
        self.write_count.set(self.write_count.get() + 1);
        self.seed_entity(header, entity.clone());
        Ok(())
    }

    fn delete_entity(
        &self,
        header: &InstanceHeader,
        id: &str,
        entity_type: &str,
        cascade_devices: bool,
    ) -> Result<(), StoreError> {
        let key = Self::entity_key(header, id, entity_type);
        if self.entities.borrow_mut().remove(&key).is_none() {
            return Err(StoreError::NotFound(format!("{id}:{entity_type}")));
        }
        self.delete_count.set(self.delete_count.get() + 1);
        if cascade_devices {
            self.devices
                .borrow_mut()
                .remove(&Self::device_key(header, id));
        }
        Ok(())
    }

    fn list_entities(
        &self,
        header: &InstanceHeader,
        filter: &EntityFilter,
    ) -> Result<Vec<RemoteEntity>, StoreError> {
        let entities = self.entities.borrow();
        let mut result: Vec<RemoteEntity> = entities
            .iter()
            .filter(|((service, path, id, ty), _)| {
                service == &header.service
                    && path == &header.service_path
                    && (filter.ids.is_empty() || filter.ids.iter().any(|i| i == id))
                    && (filter.types.is_empty() || filter.types.iter().any(|t| t == ty))
                    && filter.id_pattern.as_deref().map_or(true, |p| id.contains(p))
                    && filter
                        .type_pattern
                        .as_deref()
                        .map_or(true, |p| ty.contains(p))
            })
            .map(|(_, entity)| entity.clone())
            .collect();
        if let Some(limit) = filter.limit {
            result.truncate(limit);
        }
        Ok(result)
    }

    fn fetch_device(&self, header: &InstanceHeader, id: &str) -> Result<RemoteDevice, StoreError> {
        self.device(header, id)
            .ok_or_else(|| StoreError::NotFound(format!("device {id}")))
    }

    fn write_device(
        &self,
        header: &InstanceHeader,
        device: &RemoteDevice,
        patch_entity: bool,
    ) -> Result<(), StoreError> {
        self.devices
            .borrow_mut()
            .insert(Self::device_key(header, &device.device_id), device.clone());
        if patch_entity {
            // refresh the paired entity skeleton if nothing wrote it yet
            let key = Self::entity_key(header, &device.entity_name, &device.entity_type);
            self.entities
                .borrow_mut()
                .entry(key)
                .or_insert_with(|| RemoteEntity::new(&device.entity_name, &device.entity_type));
        }
        Ok(())
    }

    fn delete_device(&self, header: &InstanceHeader, id: &str) -> Result<(), StoreError> {
        if self
            .devices
            .borrow_mut()
            .remove(&Self::device_key(header, id))
            .is_none()
        {
            return Err(StoreError::NotFound(format!("device {id}")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::EntityAttribute;
    use serde_json::json;

    fn header() -> InstanceHeader {
        InstanceHeader::default()
    }

    #[test]
    fn test_exists_is_negative_not_error() {
        let store = MemoryStore::new();
        assert!(!store.entity_exists(&header(), "x", "Room").unwrap());
    }

    #[test]
    fn test_tenancy_isolation() {
        let store = MemoryStore::new();
        store.seed_entity(&header(), RemoteEntity::new("r1", "Room"));
        let mut other = header();
        other.service = "factory".to_string();
        assert!(!store.entity_exists(&other, "r1", "Room").unwrap());
    }

    #[test]
    fn test_list_filters() {
        let store = MemoryStore::new();
        store.seed_entity(&header(), RemoteEntity::new("room-1", "Room"));
        store.seed_entity(&header(), RemoteEntity::new("room-2", "Room"));
        store.seed_entity(&header(), RemoteEntity::new("sensor-1", "Sensor"));

        let rooms = store
            .list_entities(&header(), &EntityFilter::types(["Room"]))
            .unwrap();
        assert_eq!(rooms.len(), 2);

        let by_pattern = store
            .list_entities(
                &header(),
                &EntityFilter {
                    id_pattern: Some("room-".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(by_pattern.len(), 2);

        let limited = store
            .list_entities(
                &header(),
                &EntityFilter {
                    limit: Some(1),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn test_injected_write_failure_fires_once() {
        let store = MemoryStore::new();
        let mut entity = RemoteEntity::new("r1", "Room");
        entity.set_attribute("temp", EntityAttribute::new("StructuredValue", json!([21])));
        store.fail_next_write();
        assert!(store.write_entity(&header(), &entity, None).is_err());
        assert!(store.write_entity(&header(), &entity, None).is_ok());
        assert_eq!(store.write_count(), 1);
    }

    #[test]
    fn test_delete_cascades_device() {
        let store = MemoryStore::new();
        store.seed_entity(&header(), RemoteEntity::new("valve-1", "Valve"));
        store
            .write_device(
                &header(),
                &RemoteDevice {
                    device_id: "valve-1".to_string(),
                    entity_name: "valve-1".to_string(),
                    entity_type: "Valve".to_string(),
                    settings: Default::default(),
                    attributes: vec![],
                    commands: vec![],
                },
                false,
            )
            .unwrap();
        store
            .delete_entity(&header(), "valve-1", "Valve", true)
            .unwrap();
        assert!(store.device(&header(), "valve-1").is_none());
    }
}
