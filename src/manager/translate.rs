//! Translation between the field-based instance representation and the
//! flat remote-entity representation.
//!
//! Building always emits every declared field plus the reserved
//! attributes, so a parse may fail closed on any missing attribute: a
//! hole means the remote entity and the modeled class disagree, never a
//! value to default.

use serde_json::{json, Value};

use crate::error::{ContextureError, Result};
use crate::model::field::{Field, RelationValue};
use crate::model::header::{InstanceHeader, InstanceIdentifier, InstanceMetadata};
use crate::model::instance::Instance;
use crate::schema::{FieldSpecKind, Schema};
use crate::store::{
    EntityAttribute, RemoteDevice, RemoteDeviceAttribute, RemoteDeviceCommand, RemoteEntity,
    DEVICE_SETTINGS_ATTRIBUTE, METADATA_ATTRIBUTE, REFERENCES_ATTRIBUTE,
};

/// Attribute type for relation fields.
const RELATIONSHIP_TYPE: &str = "Relationship";
/// Attribute type for everything else.
const STRUCTURED_TYPE: &str = "StructuredValue";

/// Emit the remote representation of an instance.
pub(crate) fn build_entity(instance: &Instance) -> RemoteEntity {
    let mut entity = RemoteEntity::new(instance.id(), instance.class());

    for field in instance.fields() {
        let (attribute_type, value) = match field {
            Field::Data(f) => (STRUCTURED_TYPE, Value::Array(f.values().to_vec())),
            Field::Relation(f) => (
                RELATIONSHIP_TYPE,
                Value::Array(
                    f.values()
                        .iter()
                        .map(|v| serde_json::to_value(v).unwrap_or(Value::Null))
                        .collect(),
                ),
            ),
            Field::Command(f) => (
                STRUCTURED_TYPE,
                Value::Array(
                    f.values()
                        .iter()
                        .map(|v| serde_json::to_value(v).unwrap_or(Value::Null))
                        .collect(),
                ),
            ),
            Field::Attribute(f) => (
                STRUCTURED_TYPE,
                Value::Array(
                    f.values()
                        .iter()
                        .map(|v| serde_json::to_value(v).unwrap_or(Value::Null))
                        .collect(),
                ),
            ),
        };
        entity.set_attribute(field.name(), EntityAttribute::new(attribute_type, value));
    }

    let references: serde_json::Map<String, Value> = instance
        .references()
        .iter()
        .map(|(ident, fields)| (ident.canonical_json(), json!(fields)))
        .collect();
    entity.set_attribute(
        REFERENCES_ATTRIBUTE,
        EntityAttribute::new(STRUCTURED_TYPE, Value::Object(references)),
    );

    entity.set_attribute(
        METADATA_ATTRIBUTE,
        EntityAttribute::new(
            STRUCTURED_TYPE,
            serde_json::to_value(&instance.metadata).unwrap_or(Value::Null),
        ),
    );

    if let Some(settings) = instance.device_settings() {
        entity.set_attribute(
            DEVICE_SETTINGS_ATTRIBUTE,
            EntityAttribute::new(
                STRUCTURED_TYPE,
                serde_json::to_value(settings).unwrap_or(Value::Null),
            ),
        );
    }

    entity
}

/// Emit the remote device representation of a device instance, with one
/// synthesized entry per owned property.
pub(crate) fn build_device(instance: &Instance) -> RemoteDevice {
    let mut attributes = Vec::new();
    let mut commands = Vec::new();
    for field in instance.fields() {
        match field {
            Field::Attribute(f) => {
                for attribute in f.values() {
                    attributes.push(RemoteDeviceAttribute {
                        name: attribute.remote_name(&f.name),
                        mode: attribute.mode,
                    });
                }
            }
            Field::Command(f) => {
                for command in f.values() {
                    commands.push(RemoteDeviceCommand {
                        name: command.name.clone(),
                    });
                }
            }
            _ => {}
        }
    }
    RemoteDevice {
        device_id: instance.id().to_string(),
        entity_name: instance.id().to_string(),
        entity_type: instance.class().to_string(),
        settings: instance.device_settings().cloned().unwrap_or_default(),
        attributes,
        commands,
    }
}

fn incompatible(ident: &InstanceIdentifier, attribute: &str) -> ContextureError {
    ContextureError::SchemaIncompatibility {
        ident: ident.clone(),
        attribute: attribute.to_string(),
    }
}

fn required_array<'a>(
    entity: &'a RemoteEntity,
    ident: &InstanceIdentifier,
    name: &str,
) -> Result<&'a Vec<Value>> {
    entity
        .attribute(name)
        .and_then(|a| a.value.as_array())
        .ok_or_else(|| incompatible(ident, name))
}

/// Materialize an instance from its remote representation.
///
/// Relation values stay identifiers; the referenced instances are
/// hot-loaded lazily by the manager when actually dereferenced. The
/// caller is responsible for setting `old_state` and registering the
/// result.
pub(crate) fn parse_entity(
    entity: &RemoteEntity,
    header: &InstanceHeader,
    schema: &Schema,
) -> Result<Instance> {
    let class = schema.class(&entity.entity_type)?;
    let ident = InstanceIdentifier::new(&entity.id, &entity.entity_type, header.clone());
    let mut instance = Instance::from_class(ident.clone(), class);

    for spec in &class.fields {
        let values = required_array(entity, &ident, &spec.name)?;
        match &spec.kind {
            FieldSpecKind::Data { .. } => {
                instance.data_field_mut(&spec.name)?.set_raw(values.clone());
            }
            FieldSpecKind::Relation { .. } => {
                let parsed: Vec<RelationValue> =
                    serde_json::from_value(Value::Array(values.clone()))
                        .map_err(|_| incompatible(&ident, &spec.name))?;
                instance.relation_field_mut(&spec.name)?.set_raw(parsed);
            }
            FieldSpecKind::Command => {
                let parsed: Vec<crate::model::device::Command> =
                    serde_json::from_value(Value::Array(values.clone()))
                        .map_err(|_| incompatible(&ident, &spec.name))?;
                match instance.field_mut(&spec.name)? {
                    Field::Command(f) => {
                        for command in parsed {
                            f.insert_raw(command);
                        }
                    }
                    _ => return Err(incompatible(&ident, &spec.name)),
                }
            }
            FieldSpecKind::DeviceAttribute => {
                let parsed: Vec<crate::model::device::DeviceAttribute> =
                    serde_json::from_value(Value::Array(values.clone()))
                        .map_err(|_| incompatible(&ident, &spec.name))?;
                match instance.field_mut(&spec.name)? {
                    Field::Attribute(f) => {
                        for attribute in parsed {
                            f.insert_raw(attribute);
                        }
                    }
                    _ => return Err(incompatible(&ident, &spec.name)),
                }
            }
        }
    }

    let references = entity
        .attribute(REFERENCES_ATTRIBUTE)
        .and_then(|a| a.value.as_object())
        .ok_or_else(|| incompatible(&ident, REFERENCES_ATTRIBUTE))?;
    for (key, fields) in references {
        let from = InstanceIdentifier::from_canonical_json(key)
            .map_err(|_| incompatible(&ident, REFERENCES_ATTRIBUTE))?;
        let fields: Vec<String> = serde_json::from_value(fields.clone())
            .map_err(|_| incompatible(&ident, REFERENCES_ATTRIBUTE))?;
        for field in fields {
            instance.add_reference(from.clone(), &field);
        }
    }

    let metadata = entity
        .attribute(METADATA_ATTRIBUTE)
        .ok_or_else(|| incompatible(&ident, METADATA_ATTRIBUTE))?;
    instance.metadata = serde_json::from_value::<InstanceMetadata>(metadata.value.clone())
        .map_err(|_| incompatible(&ident, METADATA_ATTRIBUTE))?;

    if class.device {
        let settings = entity
            .attribute(DEVICE_SETTINGS_ATTRIBUTE)
            .ok_or_else(|| incompatible(&ident, DEVICE_SETTINGS_ATTRIBUTE))?;
        instance.device_settings = Some(
            serde_json::from_value(settings.value.clone())
                .map_err(|_| incompatible(&ident, DEVICE_SETTINGS_ATTRIBUTE))?,
        );
    }

    Ok(instance)
}
