//! Declarative vocabulary schema.
//!
//! Each modeled class has a fixed, declared set of named fields; rather
//! than generating one Rust type per vocabulary class, a generic
//! [`Instance`](crate::model::Instance) consults this schema. Schemas are
//! loadable from YAML or JSON documents and validated once at load.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ContextureError, Result};
use crate::model::datatype::Datatype;
use crate::model::rule::Rule;
use crate::store::RESERVED_ATTRIBUTE_NAMES;

/// Declaration of one field on a class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(flatten)]
    pub kind: FieldSpecKind,
}

/// What kind of field a spec declares.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldSpecKind {
    /// Literal values validated by a named datatype.
    Data {
        datatype: String,
        #[serde(default)]
        rules: Vec<Rule>,
    },
    /// References to instances or individuals.
    Relation {
        #[serde(default)]
        rules: Vec<Rule>,
        #[serde(default)]
        inverse_of: Vec<String>,
    },
    /// Device commands.
    Command,
    /// Device read-attributes.
    DeviceAttribute,
}

/// One modeled class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassDef {
    pub name: String,
    /// Parent class names; used for subclass matching in rule targets.
    #[serde(default)]
    pub parents: Vec<String>,
    /// Device classes carry device settings and may declare command /
    /// device-attribute fields.
    #[serde(default)]
    pub device: bool,
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
}

/// A fixed, enum-like singleton usable inside relation fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndividualDef {
    pub name: String,
    /// Classes this individual belongs to, for rule-target matching.
    #[serde(default)]
    pub classes: Vec<String>,
}

/// The complete vocabulary: classes, datatypes, and individuals.
/// Read-only once loaded.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(try_from = "SchemaDocument", into = "SchemaDocument")]
pub struct Schema {
    classes: BTreeMap<String, ClassDef>,
    datatypes: BTreeMap<String, Datatype>,
    individuals: BTreeMap<String, IndividualDef>,
}

/// On-disk shape of a schema (lists rather than maps, names inline).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SchemaDocument {
    #[serde(default)]
    classes: Vec<ClassDef>,
    #[serde(default)]
    datatypes: Vec<Datatype>,
    #[serde(default)]
    individuals: Vec<IndividualDef>,
}

impl TryFrom<SchemaDocument> for Schema {
    type Error = ContextureError;

    fn try_from(doc: SchemaDocument) -> Result<Self> {
        let mut schema = Schema::default();
        for datatype in doc.datatypes {
            schema.datatypes.insert(datatype.name.clone(), datatype);
        }
        for individual in doc.individuals {
            schema.individuals.insert(individual.name.clone(), individual);
        }
        for class in doc.classes {
            schema.classes.insert(class.name.clone(), class);
        }
        schema.validate()?;
        Ok(schema)
    }
}

impl From<Schema> for SchemaDocument {
    fn from(schema: Schema) -> Self {
        SchemaDocument {
            classes: schema.classes.into_values().collect(),
            datatypes: schema.datatypes.into_values().collect(),
            individuals: schema.individuals.into_values().collect(),
        }
    }
}

impl Schema {
    /// Load a schema from a YAML document.
    pub fn from_yaml(text: &str) -> Result<Self> {
        let doc: SchemaDocument = serde_yaml::from_str(text)
            .map_err(|e| ContextureError::InvalidSchema(e.to_string()))?;
        Schema::try_from(doc)
    }

    /// Load a schema from a JSON document.
    pub fn from_json(text: &str) -> Result<Self> {
        let doc: SchemaDocument = serde_json::from_str(text)
            .map_err(|e| ContextureError::InvalidSchema(e.to_string()))?;
        Schema::try_from(doc)
    }

    /// Programmatic construction; call [`Schema::validate`] after the
    /// last insertion.
    pub fn add_class(&mut self, class: ClassDef) {
        self.classes.insert(class.name.clone(), class);
    }

    pub fn add_datatype(&mut self, datatype: Datatype) {
        self.datatypes.insert(datatype.name.clone(), datatype);
    }

    pub fn add_individual(&mut self, individual: IndividualDef) {
        self.individuals.insert(individual.name.clone(), individual);
    }

    /// Check cross-references and naming constraints of the vocabulary.
    pub fn validate(&self) -> Result<()> {
        for class in self.classes.values() {
            for parent in &class.parents {
                if !self.classes.contains_key(parent) {
                    return Err(ContextureError::InvalidSchema(format!(
                        "class '{}' names unknown parent '{}'",
                        class.name, parent
                    )));
                }
            }
            let mut seen = Vec::new();
            for field in &class.fields {
                if !crate::model::device::is_well_formed_name(&field.name) {
                    return Err(ContextureError::InvalidSchema(format!(
                        "field '{}' on class '{}' uses characters outside [A-Za-z0-9_]",
                        field.name, class.name
                    )));
                }
                if RESERVED_ATTRIBUTE_NAMES.contains(&field.name.as_str()) {
                    return Err(ContextureError::InvalidSchema(format!(
                        "field '{}' on class '{}' collides with a reserved attribute",
                        field.name, class.name
                    )));
                }
                if seen.contains(&&field.name) {
                    return Err(ContextureError::InvalidSchema(format!(
                        "class '{}' declares field '{}' twice",
                        class.name, field.name
                    )));
                }
                seen.push(&field.name);
                match &field.kind {
                    FieldSpecKind::Data { datatype, .. } => {
                        if !self.datatypes.contains_key(datatype) {
                            return Err(ContextureError::InvalidSchema(format!(
                                "field '{}' on class '{}' names unknown datatype '{}'",
                                field.name, class.name, datatype
                            )));
                        }
                    }
                    FieldSpecKind::Command | FieldSpecKind::DeviceAttribute => {
                        if !class.device {
                            return Err(ContextureError::InvalidSchema(format!(
                                "non-device class '{}' declares device field '{}'",
                                class.name, field.name
                            )));
                        }
                    }
                    FieldSpecKind::Relation { .. } => {}
                }
            }
        }
        debug!(
            classes = self.classes.len(),
            datatypes = self.datatypes.len(),
            individuals = self.individuals.len(),
            "schema validated"
        );
        Ok(())
    }

    pub fn class(&self, name: &str) -> Result<&ClassDef> {
        self.classes
            .get(name)
            .ok_or_else(|| ContextureError::UnknownClass(name.to_string()))
    }

    pub fn datatype(&self, name: &str) -> Option<&Datatype> {
        self.datatypes.get(name)
    }

    pub fn individual(&self, name: &str) -> Option<&IndividualDef> {
        self.individuals.get(name)
    }

    pub fn classes(&self) -> impl Iterator<Item = &ClassDef> {
        self.classes.values()
    }

    /// Whether `class` is `ancestor` or transitively declares it as a
    /// parent.
    pub fn is_subclass_of(&self, class: &str, ancestor: &str) -> bool {
        if class == ancestor {
            return true;
        }
        let mut queue: Vec<&str> = match self.classes.get(class) {
            Some(def) => def.parents.iter().map(String::as_str).collect(),
            None => return false,
        };
        let mut visited = vec![class];
        while let Some(current) = queue.pop() {
            if current == ancestor {
                return true;
            }
            if visited.contains(&current) {
                continue;
            }
            visited.push(current);
            if let Some(def) = self.classes.get(current) {
                queue.extend(def.parents.iter().map(String::as_str));
            }
        }
        false
    }

    /// Whether the named class exists and is a device class.
    pub fn is_device_class(&self, name: &str) -> bool {
        self.classes.get(name).map_or(false, |c| c.device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
datatypes:
  - name: label
    kind: string
    forbidden: ";"
classes:
  - name: Thing
  - name: Room
    parents: [Thing]
    fields:
      - name: roomName
        kind: data
        datatype: label
  - name: Actuator
    device: true
    fields:
      - name: commands
        kind: command
individuals:
  - name: ExampleMode
    classes: [Thing]
"#;

    #[test]
    fn test_yaml_load_and_lookup() {
        let schema = Schema::from_yaml(SAMPLE).unwrap();
        assert!(schema.class("Room").is_ok());
        assert!(schema.datatype("label").is_some());
        assert!(schema.individual("ExampleMode").is_some());
        assert!(matches!(
            schema.class("Void"),
            Err(ContextureError::UnknownClass(_))
        ));
    }

    #[test]
    fn test_subclass_transitive_and_cyclic_safe() {
        let mut schema = Schema::from_yaml(SAMPLE).unwrap();
        schema.add_class(ClassDef {
            name: "Office".to_string(),
            parents: vec!["Room".to_string()],
            device: false,
            fields: vec![],
        });
        assert!(schema.is_subclass_of("Office", "Thing"));
        assert!(schema.is_subclass_of("Room", "Room"));
        assert!(!schema.is_subclass_of("Thing", "Room"));
    }

    #[test]
    fn test_unknown_datatype_rejected() {
        let bad = r#"
classes:
  - name: Room
    fields:
      - name: roomName
        kind: data
        datatype: missing
"#;
        assert!(matches!(
            Schema::from_yaml(bad),
            Err(ContextureError::InvalidSchema(_))
        ));
    }

    #[test]
    fn test_reserved_field_name_rejected() {
        let bad = r#"
classes:
  - name: Room
    fields:
      - name: referencedBy
        kind: relation
"#;
        assert!(Schema::from_yaml(bad).is_err());
    }

    #[test]
    fn test_device_field_on_plain_class_rejected() {
        let bad = r#"
classes:
  - name: Room
    fields:
      - name: commands
        kind: command
"#;
        assert!(Schema::from_yaml(bad).is_err());
    }
}
