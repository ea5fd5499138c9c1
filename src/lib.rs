//! contexture: semantic local/remote state management
//!
//! Model a domain as typed instances with rule-constrained fields, work
//! on them in a local in-memory registry, and reconcile against a
//! remote context store through a narrow entity interface:
//! - Vocabulary: classes, datatypes, rules, and individuals ([`schema`])
//! - Instances with data, relation, command, and device-attribute
//!   fields ([`model`])
//! - The registry as arena and relation engine ([`registry`])
//! - Three-way merge save, hot-loading, local snapshots ([`manager`])
//! - Store backends: blocking HTTP and an in-memory test double
//!   ([`store`])
//!
//! See DESIGN.md for the architecture notes.

pub mod config;
pub mod error;
pub mod manager;
pub mod model;
pub mod registry;
pub mod schema;
pub mod store;

pub use config::Config;
pub use error::{ContextureError, Result, StoreError};
pub use manager::{SemanticsManager, ValidityReport};
pub use model::{
    Command, DataField, Datatype, DeviceAttribute, DeviceSettings, Field, Instance,
    InstanceHeader, InstanceIdentifier, InstanceMetadata, RelationField, RelationValue,
    RetrievalMode, Rule, RuleKind, Transport,
};
pub use registry::Registry;
pub use schema::{ClassDef, FieldSpec, FieldSpecKind, IndividualDef, Schema};
pub use store::{
    EntityAttribute, EntityFilter, EntityStore, HttpStore, MemoryStore, RemoteDevice,
    RemoteEntity,
};
