//! Data model: identities, datatypes, rules, fields, devices, instances.

pub mod datatype;
pub mod device;
pub mod field;
pub mod header;
pub mod instance;
pub mod rule;

pub use datatype::{Datatype, DatatypeKind};
pub use device::{
    Command, DeviceAttribute, DeviceSettings, ExpressionLanguage, PayloadProtocol,
    RetrievalMode, Transport,
};
pub use field::{AttributeField, CommandField, DataField, Field, RelationField, RelationValue};
pub use header::{InstanceHeader, InstanceIdentifier, InstanceMetadata};
pub use instance::Instance;
pub use rule::{Rule, RuleKind};
