//! Field containers: named, unordered, duplicate-free value sets scoped
//! to one instance.
//!
//! Values are stored in insertion order for deterministic output, but
//! order is never meaningful; adding a present value is a silent no-op
//! and removal of an absent value is an error. Relation mutation goes
//! through [`Registry`](crate::registry::Registry) because it touches a
//! second instance (back-references, inverse propagation); the raw
//! mutators here are crate-internal.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ContextureError, Result};
use crate::model::device::{Command, DeviceAttribute};
use crate::model::header::InstanceIdentifier;
use crate::model::rule::Rule;
use crate::schema::Schema;

/// A value held by a relation field: either a reference to another
/// instance or the name of a fixed individual. Individuals are immutable
/// singletons and are never reference-counted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RelationValue {
    Instance(InstanceIdentifier),
    Individual(String),
}

impl RelationValue {
    pub fn describe(&self) -> String {
        match self {
            RelationValue::Instance(ident) => ident.to_string(),
            RelationValue::Individual(name) => name.clone(),
        }
    }
}

/// Insert with set semantics; returns whether the value was new.
fn insert_unique<T: PartialEq>(values: &mut Vec<T>, value: T) -> bool {
    if values.contains(&value) {
        false
    } else {
        values.push(value);
        true
    }
}

fn remove_value<T: PartialEq>(
    values: &mut Vec<T>,
    value: &T,
    field: &str,
    shown: String,
) -> Result<()> {
    match values.iter().position(|v| v == value) {
        Some(index) => {
            values.remove(index);
            Ok(())
        }
        None => Err(ContextureError::ValueNotFound {
            field: field.to_string(),
            value: shown,
        }),
    }
}

// =============================================================================
// DataField
// =============================================================================

/// Holds literal values validated by a declared datatype.
#[derive(Debug, Clone, PartialEq)]
pub struct DataField {
    pub name: String,
    /// Name of the datatype every stored value must satisfy.
    pub datatype: String,
    pub rules: Vec<Rule>,
    values: Vec<Value>,
}

impl DataField {
    pub fn new(name: impl Into<String>, datatype: impl Into<String>, rules: Vec<Rule>) -> Self {
        Self {
            name: name.into(),
            datatype: datatype.into(),
            rules,
            values: Vec::new(),
        }
    }

    /// Add a literal; adding a present value is a silent no-op.
    pub fn add(&mut self, value: Value) -> bool {
        insert_unique(&mut self.values, value)
    }

    /// Bulk add.
    pub fn update(&mut self, values: impl IntoIterator<Item = Value>) {
        for value in values {
            self.add(value);
        }
    }

    /// Clear then add.
    pub fn set(&mut self, values: impl IntoIterator<Item = Value>) {
        self.values.clear();
        self.update(values);
    }

    pub fn remove(&mut self, value: &Value) -> Result<()> {
        remove_value(&mut self.values, value, &self.name, value.to_string())
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn contains(&self, value: &Value) -> bool {
        self.values.contains(value)
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub(crate) fn set_raw(&mut self, values: Vec<Value>) {
        self.values = values;
    }

    /// Evaluate every rule; targets name datatypes.
    pub fn are_rules_fulfilled(&self, schema: &Schema) -> Vec<(String, bool)> {
        self.rules
            .iter()
            .map(|rule| {
                let satisfied = rule.count_satisfying(self.values.iter(), |value, target| {
                    schema
                        .datatype(target)
                        .map_or(false, |dt| dt.is_valid(value))
                });
                (rule.to_string(), rule.is_fulfilled(satisfied, self.values.len()))
            })
            .collect()
    }

    /// Valid iff every rule passes and every value satisfies the declared
    /// datatype.
    pub fn is_valid(&self, schema: &Schema) -> bool {
        let typed = match schema.datatype(&self.datatype) {
            Some(dt) => self.values.iter().all(|v| dt.is_valid(v)),
            None => false,
        };
        typed && self.are_rules_fulfilled(schema).iter().all(|(_, ok)| *ok)
    }
}

// =============================================================================
// RelationField
// =============================================================================

/// Holds references to other instances or to fixed individuals; carries
/// cardinality rules and optional inverse-field names.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationField {
    pub name: String,
    pub rules: Vec<Rule>,
    /// Adding instance B here additionally adds the owner to each of
    /// these fields on B, when B declares them.
    pub inverse_of: Vec<String>,
    values: Vec<RelationValue>,
}

impl RelationField {
    pub fn new(name: impl Into<String>, rules: Vec<Rule>, inverse_of: Vec<String>) -> Self {
        Self {
            name: name.into(),
            rules,
            inverse_of,
            values: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn contains(&self, value: &RelationValue) -> bool {
        self.values.contains(value)
    }

    pub fn contains_instance(&self, ident: &InstanceIdentifier) -> bool {
        self.values
            .iter()
            .any(|v| matches!(v, RelationValue::Instance(i) if i == ident))
    }

    pub fn values(&self) -> &[RelationValue] {
        &self.values
    }

    /// Identifiers of all referenced instances (individuals skipped).
    pub fn instances(&self) -> impl Iterator<Item = &InstanceIdentifier> {
        self.values.iter().filter_map(|v| match v {
            RelationValue::Instance(ident) => Some(ident),
            RelationValue::Individual(_) => None,
        })
    }

    pub(crate) fn insert_raw(&mut self, value: RelationValue) -> bool {
        insert_unique(&mut self.values, value)
    }

    pub(crate) fn remove_raw(&mut self, value: &RelationValue) -> Result<()> {
        remove_value(&mut self.values, value, &self.name, value.describe())
    }

    pub(crate) fn set_raw(&mut self, values: Vec<RelationValue>) {
        self.values = values;
    }

    /// Evaluate every rule; targets name classes or individuals.
    pub fn are_rules_fulfilled(&self, schema: &Schema) -> Vec<(String, bool)> {
        self.rules
            .iter()
            .map(|rule| {
                let satisfied = rule.count_satisfying(self.values.iter(), |value, target| {
                    relation_matches(schema, value, target)
                });
                (rule.to_string(), rule.is_fulfilled(satisfied, self.values.len()))
            })
            .collect()
    }

    pub fn is_valid(&self, schema: &Schema) -> bool {
        self.are_rules_fulfilled(schema).iter().all(|(_, ok)| *ok)
    }
}

/// Whether a relation value matches a rule target. Instances match by
/// class (including schema ancestors); individuals match by their own
/// name or by any class they belong to.
fn relation_matches(schema: &Schema, value: &RelationValue, target: &str) -> bool {
    match value {
        RelationValue::Instance(ident) => schema.is_subclass_of(&ident.class, target),
        RelationValue::Individual(name) => {
            name == target
                || schema.individual(name).map_or(false, |def| {
                    def.classes.iter().any(|c| schema.is_subclass_of(c, target))
                })
        }
    }
}

// =============================================================================
// Device fields
// =============================================================================

/// Holds commands of a device instance. Additions go through
/// [`Instance::add_command`](crate::model::Instance::add_command), which
/// enforces remote-name uniqueness.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandField {
    pub name: String,
    values: Vec<Command>,
}

impl CommandField {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn contains(&self, command: &Command) -> bool {
        self.values.contains(command)
    }

    pub fn values(&self) -> &[Command] {
        &self.values
    }

    pub(crate) fn insert_raw(&mut self, command: Command) -> bool {
        insert_unique(&mut self.values, command)
    }

    pub(crate) fn remove_raw(&mut self, command: &Command) -> Result<()> {
        let shown = command.name.clone();
        remove_value(&mut self.values, command, &self.name, shown)
    }

    pub(crate) fn clear(&mut self) {
        self.values.clear();
    }
}

/// Holds read-attributes of a device instance; same ownership rules as
/// [`CommandField`].
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeField {
    pub name: String,
    values: Vec<DeviceAttribute>,
}

impl AttributeField {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn contains(&self, attribute: &DeviceAttribute) -> bool {
        self.values.contains(attribute)
    }

    pub fn values(&self) -> &[DeviceAttribute] {
        &self.values
    }

    pub(crate) fn insert_raw(&mut self, attribute: DeviceAttribute) -> bool {
        insert_unique(&mut self.values, attribute)
    }

    pub(crate) fn remove_raw(&mut self, attribute: &DeviceAttribute) -> Result<()> {
        let shown = attribute.name.clone();
        remove_value(&mut self.values, attribute, &self.name, shown)
    }

    pub(crate) fn clear(&mut self) {
        self.values.clear();
    }
}

// =============================================================================
// Field
// =============================================================================

/// One named field of an instance.
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    Data(DataField),
    Relation(RelationField),
    Command(CommandField),
    Attribute(AttributeField),
}

impl Field {
    pub fn name(&self) -> &str {
        match self {
            Field::Data(f) => &f.name,
            Field::Relation(f) => &f.name,
            Field::Command(f) => &f.name,
            Field::Attribute(f) => &f.name,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Field::Data(f) => f.len(),
            Field::Relation(f) => f.len(),
            Field::Command(f) => f.len(),
            Field::Attribute(f) => f.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rule evaluation report; device fields carry no rules and report
    /// empty.
    pub fn are_rules_fulfilled(&self, schema: &Schema) -> Vec<(String, bool)> {
        match self {
            Field::Data(f) => f.are_rules_fulfilled(schema),
            Field::Relation(f) => f.are_rules_fulfilled(schema),
            Field::Command(_) | Field::Attribute(_) => Vec::new(),
        }
    }

    pub fn is_valid(&self, schema: &Schema) -> bool {
        match self {
            Field::Data(f) => f.is_valid(schema),
            Field::Relation(f) => f.is_valid(schema),
            Field::Command(_) | Field::Attribute(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::header::InstanceHeader;
    use crate::model::rule::Rule;
    use crate::schema::{ClassDef, IndividualDef};
    use serde_json::json;

    fn schema() -> Schema {
        let mut schema = Schema::default();
        schema.add_datatype(crate::model::datatype::Datatype {
            name: "count".to_string(),
            kind: crate::model::datatype::DatatypeKind::Number {
                decimals: false,
                min: Some(0.0),
                max: None,
            },
        });
        for name in ["Thing", "Room", "Sensor"] {
            schema.add_class(ClassDef {
                name: name.to_string(),
                parents: if name == "Thing" {
                    vec![]
                } else {
                    vec!["Thing".to_string()]
                },
                device: false,
                fields: vec![],
            });
        }
        schema.add_individual(IndividualDef {
            name: "DefaultMode".to_string(),
            classes: vec!["Thing".to_string()],
        });
        schema.validate().unwrap();
        schema
    }

    fn ident(id: &str, class: &str) -> InstanceIdentifier {
        InstanceIdentifier::new(id, class, InstanceHeader::default())
    }

    #[test]
    fn test_data_field_set_semantics() {
        let mut field = DataField::new("hits", "count", vec![]);
        assert!(field.add(json!(1)));
        assert!(!field.add(json!(1)));
        assert_eq!(field.len(), 1);
        field.remove(&json!(1)).unwrap();
        assert!(field.is_empty());
        assert!(matches!(
            field.remove(&json!(1)),
            Err(ContextureError::ValueNotFound { .. })
        ));
    }

    #[test]
    fn test_data_field_set_replaces() {
        let mut field = DataField::new("hits", "count", vec![]);
        field.update([json!(1), json!(2)]);
        field.set([json!(3)]);
        assert_eq!(field.values(), &[json!(3)]);
    }

    #[test]
    fn test_data_field_datatype_gate() {
        let schema = schema();
        let mut field = DataField::new("hits", "count", vec![]);
        field.add(json!(3));
        assert!(field.is_valid(&schema));
        field.add(json!(-2));
        assert!(!field.is_valid(&schema));
    }

    #[test]
    fn test_relation_min_two() {
        let schema = schema();
        let mut field =
            RelationField::new("hasRoom", vec![Rule::min(2, vec![vec!["Room".to_string()]])], vec![]);
        field.insert_raw(RelationValue::Instance(ident("r1", "Room")));
        assert!(!field.is_valid(&schema));
        field.insert_raw(RelationValue::Instance(ident("r2", "Room")));
        assert!(field.is_valid(&schema));
        field.insert_raw(RelationValue::Instance(ident("r3", "Room")));
        assert!(field.is_valid(&schema));
    }

    #[test]
    fn test_relation_only_mixed_types() {
        let schema = schema();
        let mut field =
            RelationField::new("observes", vec![Rule::only(vec![vec!["Sensor".to_string()]])], vec![]);
        field.insert_raw(RelationValue::Instance(ident("s1", "Sensor")));
        field.insert_raw(RelationValue::Instance(ident("r1", "Room")));
        assert!(!field.is_valid(&schema));
        field
            .remove_raw(&RelationValue::Instance(ident("r1", "Room")))
            .unwrap();
        assert!(field.is_valid(&schema));
    }

    #[test]
    fn test_individual_matches_by_name_and_class() {
        let schema = schema();
        let mut by_name =
            RelationField::new("mode", vec![Rule::some(vec![vec!["DefaultMode".to_string()]])], vec![]);
        by_name.insert_raw(RelationValue::Individual("DefaultMode".to_string()));
        assert!(by_name.is_valid(&schema));

        let mut by_class =
            RelationField::new("mode", vec![Rule::some(vec![vec!["Thing".to_string()]])], vec![]);
        by_class.insert_raw(RelationValue::Individual("DefaultMode".to_string()));
        assert!(by_class.is_valid(&schema));
    }

    #[test]
    fn test_relation_value_wire_shape() {
        let instance = RelationValue::Instance(ident("r1", "Room"));
        let individual = RelationValue::Individual("DefaultMode".to_string());
        assert!(serde_json::to_value(&instance).unwrap().is_object());
        assert_eq!(
            serde_json::to_value(&individual).unwrap(),
            json!("DefaultMode")
        );
    }
}
