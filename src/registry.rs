//! Process-wide instance registry: the single source of truth for what
//! is loaded locally.
//!
//! Instances reference each other by identifier, never by live object;
//! the registry is the arena resolving those identifiers (which is also
//! what makes cyclic and self references unremarkable). Relation
//! mutation lives here because one add touches two instances: the
//! owning field and the target's inbound-reference map, plus optional
//! inverse-field propagation.
//!
//! Single-writer by design: no internal locking, callers provide any
//! surrounding synchronization (see the concurrency notes on
//! [`SemanticsManager`](crate::manager::SemanticsManager)).

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::error::{ContextureError, Result};
use crate::model::field::{Field, RelationValue};
use crate::model::header::InstanceIdentifier;
use crate::model::instance::Instance;

#[derive(Debug, Default)]
pub struct Registry {
    instances: BTreeMap<InstanceIdentifier, Instance>,
    /// Identifiers explicitly deleted by the user this session. Keeps a
    /// "deleted-then-asked-for" identifier from silently re-hot-loading
    /// until a save reconciles the deletion remotely.
    deleted: BTreeSet<InstanceIdentifier>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn contains(&self, ident: &InstanceIdentifier) -> bool {
        self.instances.contains_key(ident)
    }

    pub fn get(&self, ident: &InstanceIdentifier) -> Option<&Instance> {
        self.instances.get(ident)
    }

    pub fn get_mut(&mut self, ident: &InstanceIdentifier) -> Option<&mut Instance> {
        self.instances.get_mut(ident)
    }

    pub fn instances(&self) -> impl Iterator<Item = &Instance> {
        self.instances.values()
    }

    pub fn identifiers(&self) -> impl Iterator<Item = &InstanceIdentifier> {
        self.instances.keys()
    }

    /// Identifiers marked user-deleted this session.
    pub fn deleted(&self) -> impl Iterator<Item = &InstanceIdentifier> {
        self.deleted.iter()
    }

    pub fn is_deleted(&self, ident: &InstanceIdentifier) -> bool {
        self.deleted.contains(ident)
    }

    pub(crate) fn register(&mut self, instance: Instance) {
        debug!(ident = %instance.identifier(), "registered instance");
        self.instances
            .insert(instance.identifier().clone(), instance);
    }

    pub(crate) fn remove(&mut self, ident: &InstanceIdentifier) -> Option<Instance> {
        self.instances.remove(ident)
    }

    pub(crate) fn mark_deleted(&mut self, ident: InstanceIdentifier) {
        self.deleted.insert(ident);
    }

    /// Close out a deletion record once the remote delete completed.
    pub(crate) fn clear_deleted_mark(&mut self, ident: &InstanceIdentifier) {
        self.deleted.remove(ident);
    }

    /// Drop all local state, including deletion records.
    pub fn reset(&mut self) {
        self.instances.clear();
        self.deleted.clear();
    }

    // -------------------------------------------------------------------------
    // Relation mutation
    // -------------------------------------------------------------------------

    /// Add a value to a relation field.
    ///
    /// For instance targets this also records the back-reference on the
    /// target and propagates along the field's `inverse_of` declarations
    /// (one level; re-propagation terminates because adding a present
    /// value is a no-op). The target must be registered: back-reference
    /// bookkeeping needs it, and callers hold instances they relate.
    pub fn add_relation(
        &mut self,
        owner: &InstanceIdentifier,
        field_name: &str,
        value: RelationValue,
    ) -> Result<()> {
        if let RelationValue::Instance(target) = &value {
            if !self.instances.contains_key(target) {
                return Err(ContextureError::InstanceNotRegistered(target.clone()));
            }
        }
        let (inserted, inverse_of) = {
            let instance = self
                .instances
                .get_mut(owner)
                .ok_or_else(|| ContextureError::InstanceNotRegistered(owner.clone()))?;
            let field = instance.relation_field_mut(field_name)?;
            let inserted = field.insert_raw(value.clone());
            (inserted, field.inverse_of.clone())
        };
        if !inserted {
            // set semantics: the value was already present
            return Ok(());
        }
        if let RelationValue::Instance(target) = &value {
            if let Some(target_instance) = self.instances.get_mut(target) {
                target_instance.add_reference(owner.clone(), field_name);
            }
            for inverse in &inverse_of {
                // propagate only where the target actually declares the field
                let declares = self.instances.get(target).map_or(false, |t| {
                    matches!(t.field(inverse), Ok(Field::Relation(_)))
                });
                if declares {
                    self.add_relation(
                        target,
                        inverse,
                        RelationValue::Instance(owner.clone()),
                    )?;
                }
            }
        }
        Ok(())
    }

    /// Remove a value from a relation field; errors if absent.
    ///
    /// Symmetric cleanup: drops the back-reference on the target (unless
    /// the target was already marked deleted) and performs the inverse
    /// removal on declared inverse fields.
    pub fn remove_relation(
        &mut self,
        owner: &InstanceIdentifier,
        field_name: &str,
        value: &RelationValue,
    ) -> Result<()> {
        let inverse_of = {
            let instance = self
                .instances
                .get_mut(owner)
                .ok_or_else(|| ContextureError::InstanceNotRegistered(owner.clone()))?;
            let field = instance.relation_field_mut(field_name)?;
            field.remove_raw(value)?;
            field.inverse_of.clone()
        };
        if let RelationValue::Instance(target) = value {
            // a deleted target's fields no longer conceptually exist
            if self.deleted.contains(target) {
                return Ok(());
            }
            if let Some(target_instance) = self.instances.get_mut(target) {
                target_instance.remove_reference(owner, field_name);
            }
            for inverse in &inverse_of {
                let holds = self.instances.get(target).map_or(false, |t| {
                    t.relation_field(inverse)
                        .map_or(false, |f| f.contains_instance(owner))
                });
                if holds {
                    self.remove_relation(
                        target,
                        inverse,
                        &RelationValue::Instance(owner.clone()),
                    )?;
                }
            }
        }
        Ok(())
    }

    /// Bulk add.
    pub fn update_relation(
        &mut self,
        owner: &InstanceIdentifier,
        field_name: &str,
        values: impl IntoIterator<Item = RelationValue>,
    ) -> Result<()> {
        for value in values {
            self.add_relation(owner, field_name, value)?;
        }
        Ok(())
    }

    /// Clear then add.
    pub fn set_relation(
        &mut self,
        owner: &InstanceIdentifier,
        field_name: &str,
        values: impl IntoIterator<Item = RelationValue>,
    ) -> Result<()> {
        self.clear_relation(owner, field_name)?;
        self.update_relation(owner, field_name, values)
    }

    /// Remove every value of a relation field, firing the full cleanup
    /// for each.
    pub fn clear_relation(
        &mut self,
        owner: &InstanceIdentifier,
        field_name: &str,
    ) -> Result<()> {
        let values: Vec<RelationValue> = {
            let instance = self
                .instances
                .get(owner)
                .ok_or_else(|| ContextureError::InstanceNotRegistered(owner.clone()))?;
            instance.relation_field(field_name)?.values().to_vec()
        };
        for value in &values {
            self.remove_relation(owner, field_name, value)?;
        }
        Ok(())
    }

    /// Clear every field of an instance (relation fields with cleanup,
    /// the rest in place). First step of the delete cascade.
    pub(crate) fn clear_all_fields(&mut self, owner: &InstanceIdentifier) -> Result<()> {
        let fields: Vec<(String, bool)> = {
            let instance = self
                .instances
                .get(owner)
                .ok_or_else(|| ContextureError::InstanceNotRegistered(owner.clone()))?;
            instance
                .fields()
                .map(|f| (f.name().to_string(), matches!(f, Field::Relation(_))))
                .collect()
        };
        for (name, is_relation) in fields {
            if is_relation {
                self.clear_relation(owner, &name)?;
            } else if let Some(instance) = self.instances.get_mut(owner) {
                match instance.field_mut(&name)? {
                    Field::Data(f) => f.clear(),
                    Field::Command(f) => f.clear(),
                    Field::Attribute(f) => f.clear(),
                    Field::Relation(_) => unreachable!("handled above"),
                }
            }
        }
        Ok(())
    }
}
