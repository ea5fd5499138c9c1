//! Error taxonomy for the semantic state manager.
//!
//! Two layers: [`StoreError`] covers remote I/O through the
//! [`EntityStore`](crate::store::EntityStore) seam, [`ContextureError`]
//! covers everything the core itself can reject. Remote failures are
//! propagated uncaught; the manager never retries.

use crate::model::InstanceIdentifier;

/// Errors surfaced by an [`EntityStore`](crate::store::EntityStore)
/// implementation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Entity or device does not exist at the remote location
    #[error("not found: {0}")]
    NotFound(String),

    /// Remote rejected the write as conflicting
    #[error("conflict: {0}")]
    Conflict(String),

    /// Remote answered with a non-success status
    #[error("remote returned {status}: {body}")]
    Http { status: u16, body: String },

    /// Transport-level failure (DNS, TLS, connection)
    #[error("network error: {0}")]
    Network(String),

    /// Payload could not be (de)serialized
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised by the registry, model, and manager.
#[derive(Debug, thiserror::Error)]
pub enum ContextureError {
    /// Hot-loaded remote entity is missing an attribute the modeled class
    /// requires. Fails closed, never silently defaulted.
    #[error("remote entity for {ident} is incompatible with its class: missing attribute '{attribute}'")]
    SchemaIncompatibility {
        ident: InstanceIdentifier,
        attribute: String,
    },

    /// A device property would create a remote field name that collides
    /// with an existing, reserved, or ill-formed name.
    #[error("name conflict on '{name}': {reason}")]
    NameConflict { name: String, reason: String },

    /// Save-time escalation of rule violations. The message names every
    /// offending instance, its class, and the unsatisfied fields.
    #[error("local state is not valid: {report}")]
    InvalidState { report: String },

    /// A device instance has no transport configured. Checked regardless
    /// of the rule-validation override.
    #[error("device instance {ident} has no transport setting")]
    MissingTransport { ident: InstanceIdentifier },

    /// `remove` was called for a value the field does not hold
    #[error("field '{field}' does not contain value {value}")]
    ValueNotFound { field: String, value: String },

    /// Deletion was asserted reference-free but inbound references exist
    #[error("instance {ident} is still referenced by {count} instance(s)")]
    ReferencesExist {
        ident: InstanceIdentifier,
        count: usize,
    },

    /// Class name is not part of the loaded vocabulary
    #[error("unknown class '{0}'")]
    UnknownClass(String),

    /// Field name is not declared on the class
    #[error("class '{class}' has no field '{field}'")]
    UnknownField { class: String, field: String },

    /// Field exists but has a different kind than the operation expects
    #[error("field '{field}' is not a {expected} field")]
    FieldKindMismatch {
        field: String,
        expected: &'static str,
    },

    /// Datatype name is not part of the loaded vocabulary
    #[error("unknown datatype '{0}'")]
    UnknownDatatype(String),

    /// Operation needs the instance in the local registry
    #[error("instance {0} is not registered locally")]
    InstanceNotRegistered(InstanceIdentifier),

    /// Vocabulary document failed validation
    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    /// Configuration file could not be read or parsed
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Local filesystem failure (snapshots, config files)
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Remote I/O failure, propagated from the store
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Crate-wide result alias.
pub type Result<T, E = ContextureError> = std::result::Result<T, E>;
