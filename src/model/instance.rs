//! One addressable domain object: identity, field set, metadata,
//! inbound references, and the remembered remote snapshot.

use std::collections::BTreeMap;

use crate::error::{ContextureError, Result};
use crate::model::device::{
    is_well_formed_name, Command, DeviceAttribute, DeviceSettings,
};
use crate::model::field::{
    AttributeField, CommandField, DataField, Field, RelationField,
};
use crate::model::header::{InstanceHeader, InstanceIdentifier, InstanceMetadata};
use crate::schema::{ClassDef, FieldSpecKind, Schema};
use crate::store::{RemoteEntity, RESERVED_ATTRIBUTE_NAMES};

/// One modeled domain object. The identifier is immutable after
/// construction; at most one live instance exists per identifier within
/// a process (enforced by the registry together with the manager's
/// identity-resolution protocol).
#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    identifier: InstanceIdentifier,
    pub metadata: InstanceMetadata,
    fields: BTreeMap<String, Field>,
    /// Who points at this instance, and through which of their fields.
    pub(crate) references: BTreeMap<InstanceIdentifier, Vec<String>>,
    /// Remote representation as last fetched or written by this process;
    /// `None` if never synced. Baseline for merge-delta computation.
    pub(crate) old_state: Option<RemoteEntity>,
    /// Present iff the class is a device class.
    pub(crate) device_settings: Option<DeviceSettings>,
}

impl Instance {
    /// Build a fresh instance with empty fields according to the class
    /// definition.
    pub(crate) fn from_class(identifier: InstanceIdentifier, class: &ClassDef) -> Self {
        let mut fields = BTreeMap::new();
        for spec in &class.fields {
            let field = match &spec.kind {
                FieldSpecKind::Data { datatype, rules } => {
                    Field::Data(DataField::new(&spec.name, datatype, rules.clone()))
                }
                FieldSpecKind::Relation { rules, inverse_of } => Field::Relation(
                    RelationField::new(&spec.name, rules.clone(), inverse_of.clone()),
                ),
                FieldSpecKind::Command => Field::Command(CommandField::new(&spec.name)),
                FieldSpecKind::DeviceAttribute => {
                    Field::Attribute(AttributeField::new(&spec.name))
                }
            };
            fields.insert(spec.name.clone(), field);
        }
        Self {
            identifier,
            metadata: InstanceMetadata::default(),
            fields,
            references: BTreeMap::new(),
            old_state: None,
            device_settings: class.device.then(DeviceSettings::default),
        }
    }

    pub fn identifier(&self) -> &InstanceIdentifier {
        &self.identifier
    }

    pub fn id(&self) -> &str {
        &self.identifier.id
    }

    pub fn class(&self) -> &str {
        &self.identifier.class
    }

    pub fn header(&self) -> &InstanceHeader {
        &self.identifier.header
    }

    pub fn is_device(&self) -> bool {
        self.device_settings.is_some()
    }

    /// Inbound references: referencing identifier to the list of field
    /// names pointing here.
    pub fn references(&self) -> &BTreeMap<InstanceIdentifier, Vec<String>> {
        &self.references
    }

    /// Remote snapshot as last synced, if any.
    pub fn old_state(&self) -> Option<&RemoteEntity> {
        self.old_state.as_ref()
    }

    pub fn device_settings(&self) -> Option<&DeviceSettings> {
        self.device_settings.as_ref()
    }

    /// Mutate device settings; errors on non-device instances.
    pub fn device_settings_mut(&mut self) -> Result<&mut DeviceSettings> {
        self.device_settings
            .as_mut()
            .ok_or_else(|| ContextureError::FieldKindMismatch {
                field: "deviceSettings".to_string(),
                expected: "device",
            })
    }

    // -------------------------------------------------------------------------
    // Field access
    // -------------------------------------------------------------------------

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.values()
    }

    pub fn field(&self, name: &str) -> Result<&Field> {
        self.fields
            .get(name)
            .ok_or_else(|| ContextureError::UnknownField {
                class: self.identifier.class.clone(),
                field: name.to_string(),
            })
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub(crate) fn field_mut(&mut self, name: &str) -> Result<&mut Field> {
        let class = self.identifier.class.clone();
        self.fields
            .get_mut(name)
            .ok_or(ContextureError::UnknownField {
                class,
                field: name.to_string(),
            })
    }

    /// Data fields have no cross-instance effects, so mutation is open.
    pub fn data_field_mut(&mut self, name: &str) -> Result<&mut DataField> {
        match self.field_mut(name)? {
            Field::Data(f) => Ok(f),
            _ => Err(ContextureError::FieldKindMismatch {
                field: name.to_string(),
                expected: "data",
            }),
        }
    }

    pub fn data_field(&self, name: &str) -> Result<&DataField> {
        match self.field(name)? {
            Field::Data(f) => Ok(f),
            _ => Err(ContextureError::FieldKindMismatch {
                field: name.to_string(),
                expected: "data",
            }),
        }
    }

    pub fn relation_field(&self, name: &str) -> Result<&RelationField> {
        match self.field(name)? {
            Field::Relation(f) => Ok(f),
            _ => Err(ContextureError::FieldKindMismatch {
                field: name.to_string(),
                expected: "relation",
            }),
        }
    }

    pub(crate) fn relation_field_mut(&mut self, name: &str) -> Result<&mut RelationField> {
        match self.field_mut(name)? {
            Field::Relation(f) => Ok(f),
            _ => Err(ContextureError::FieldKindMismatch {
                field: name.to_string(),
                expected: "relation",
            }),
        }
    }

    pub fn command_field(&self, name: &str) -> Result<&CommandField> {
        match self.field(name)? {
            Field::Command(f) => Ok(f),
            _ => Err(ContextureError::FieldKindMismatch {
                field: name.to_string(),
                expected: "command",
            }),
        }
    }

    pub fn attribute_field(&self, name: &str) -> Result<&AttributeField> {
        match self.field(name)? {
            Field::Attribute(f) => Ok(f),
            _ => Err(ContextureError::FieldKindMismatch {
                field: name.to_string(),
                expected: "device attribute",
            }),
        }
    }

    // -------------------------------------------------------------------------
    // Device properties
    // -------------------------------------------------------------------------

    /// Every remote name currently taken on this instance: field names
    /// plus the names synthesized by already-owned device properties.
    fn taken_remote_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.fields.keys().cloned().collect();
        for field in self.fields.values() {
            match field {
                Field::Command(f) => {
                    for command in f.values() {
                        names.extend(command.remote_names());
                    }
                }
                Field::Attribute(f) => {
                    for attribute in f.values() {
                        names.push(attribute.remote_name(&f.name));
                    }
                }
                _ => {}
            }
        }
        names
    }

    fn check_new_names(&self, new_names: &[String]) -> Result<()> {
        let taken = self.taken_remote_names();
        for name in new_names {
            if !is_well_formed_name(name) {
                return Err(ContextureError::NameConflict {
                    name: name.clone(),
                    reason: "uses characters outside [A-Za-z0-9_]".to_string(),
                });
            }
            if RESERVED_ATTRIBUTE_NAMES.contains(&name.as_str()) {
                return Err(ContextureError::NameConflict {
                    name: name.clone(),
                    reason: "is a reserved attribute name".to_string(),
                });
            }
            if taken.contains(name) {
                return Err(ContextureError::NameConflict {
                    name: name.clone(),
                    reason: "already taken on this instance".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Add a command to a command field. Rejected before any mutation if
    /// a synthesized remote name would collide.
    pub fn add_command(&mut self, field_name: &str, command: Command) -> Result<bool> {
        if self.command_field(field_name)?.contains(&command) {
            return Ok(false);
        }
        self.check_new_names(&command.remote_names())?;
        match self.field_mut(field_name)? {
            Field::Command(f) => Ok(f.insert_raw(command)),
            _ => unreachable!("checked above"),
        }
    }

    pub fn remove_command(&mut self, field_name: &str, command: &Command) -> Result<()> {
        match self.field_mut(field_name)? {
            Field::Command(f) => f.remove_raw(command),
            _ => Err(ContextureError::FieldKindMismatch {
                field: field_name.to_string(),
                expected: "command",
            }),
        }
    }

    /// Add a device attribute to an attribute field; same naming rules as
    /// [`Instance::add_command`].
    pub fn add_device_attribute(
        &mut self,
        field_name: &str,
        attribute: DeviceAttribute,
    ) -> Result<bool> {
        if self.attribute_field(field_name)?.contains(&attribute) {
            return Ok(false);
        }
        self.check_new_names(&[attribute.remote_name(field_name)])?;
        match self.field_mut(field_name)? {
            Field::Attribute(f) => Ok(f.insert_raw(attribute)),
            _ => unreachable!("checked above"),
        }
    }

    pub fn remove_device_attribute(
        &mut self,
        field_name: &str,
        attribute: &DeviceAttribute,
    ) -> Result<()> {
        match self.field_mut(field_name)? {
            Field::Attribute(f) => f.remove_raw(attribute),
            _ => Err(ContextureError::FieldKindMismatch {
                field: field_name.to_string(),
                expected: "device attribute",
            }),
        }
    }

    // -------------------------------------------------------------------------
    // Reference bookkeeping (registry-internal)
    // -------------------------------------------------------------------------

    pub(crate) fn add_reference(&mut self, from: InstanceIdentifier, field_name: &str) {
        let fields = self.references.entry(from).or_default();
        if !fields.iter().any(|f| f == field_name) {
            fields.push(field_name.to_string());
        }
    }

    pub(crate) fn remove_reference(&mut self, from: &InstanceIdentifier, field_name: &str) {
        if let Some(fields) = self.references.get_mut(from) {
            fields.retain(|f| f != field_name);
            if fields.is_empty() {
                self.references.remove(from);
            }
        }
    }

    // -------------------------------------------------------------------------
    // Validity
    // -------------------------------------------------------------------------

    /// Names of fields whose rules are currently unsatisfied.
    pub fn unfulfilled_fields(&self, schema: &Schema) -> Vec<String> {
        self.fields
            .values()
            .filter(|field| !field.is_valid(schema))
            .map(|field| field.name().to_string())
            .collect()
    }

    pub fn is_valid(&self, schema: &Schema) -> bool {
        self.unfulfilled_fields(schema).is_empty()
    }
}
