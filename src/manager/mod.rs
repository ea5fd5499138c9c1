//! The semantics manager: identity resolution, batch loading, validity
//! checking, and the merge-and-save algorithm.
//!
//! Single-process, synchronous, single-writer: all remote I/O blocks,
//! and nothing here locks the registry. Cross-process concurrency is
//! handled by the merge algorithm instead, reconciling this process's
//! deltas against whatever another writer most recently saved.

pub(crate) mod merge;
mod snapshot;
pub(crate) mod translate;

use std::fmt;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{ContextureError, Result};
use crate::model::header::{InstanceHeader, InstanceIdentifier};
use crate::model::instance::Instance;
use crate::registry::Registry;
use crate::schema::Schema;
use crate::store::{EntityFilter, EntityStore};

/// Structured result of the save-eligibility check.
#[derive(Debug, Default)]
pub struct ValidityReport {
    /// Instances with unsatisfied field rules.
    pub rule_violations: Vec<(InstanceIdentifier, Vec<String>)>,
    /// Device instances without a transport setting.
    pub missing_transport: Vec<InstanceIdentifier>,
}

impl ValidityReport {
    pub fn is_ok(&self) -> bool {
        self.rule_violations.is_empty() && self.missing_transport.is_empty()
    }
}

impl fmt::Display for ValidityReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = self
            .rule_violations
            .iter()
            .map(|(ident, fields)| {
                format!(
                    "instance '{}' of class '{}' has unsatisfied fields [{}]",
                    ident.id,
                    ident.class,
                    fields.join(", ")
                )
            })
            .collect();
        parts.extend(self.missing_transport.iter().map(|ident| {
            format!(
                "device instance '{}' of class '{}' has no transport",
                ident.id, ident.class
            )
        }));
        write!(f, "{}", parts.join("; "))
    }
}

/// Orchestrates local instances against the remote context store.
pub struct SemanticsManager<S: EntityStore> {
    schema: Schema,
    registry: Registry,
    store: S,
    default_header: InstanceHeader,
}

impl<S: EntityStore> SemanticsManager<S> {
    pub fn new(schema: Schema, store: S, default_header: InstanceHeader) -> Self {
        Self {
            schema,
            registry: Registry::new(),
            store,
            default_header,
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn default_header(&self) -> &InstanceHeader {
        &self.default_header
    }

    /// Look up a registered instance.
    pub fn instance(&self, ident: &InstanceIdentifier) -> Result<&Instance> {
        self.registry
            .get(ident)
            .ok_or_else(|| ContextureError::InstanceNotRegistered(ident.clone()))
    }

    pub fn instance_mut(&mut self, ident: &InstanceIdentifier) -> Result<&mut Instance> {
        self.registry
            .get_mut(ident)
            .ok_or_else(|| ContextureError::InstanceNotRegistered(ident.clone()))
    }

    // -------------------------------------------------------------------------
    // Identity resolution
    // -------------------------------------------------------------------------

    /// Resolve an identity under the default header: return the
    /// registered instance, hot-load it if it exists remotely, or
    /// construct it fresh. Identifiers deleted this session are never
    /// re-fetched; they resolve to a fresh instance.
    pub fn get_or_create(&mut self, class: &str, id: &str) -> Result<InstanceIdentifier> {
        let header = self.default_header.clone();
        self.get_or_create_with_header(class, id, header)
    }

    pub fn get_or_create_with_header(
        &mut self,
        class: &str,
        id: &str,
        header: InstanceHeader,
    ) -> Result<InstanceIdentifier> {
        let ident = InstanceIdentifier::new(id, class, header);
        if self.registry.contains(&ident) {
            return Ok(ident);
        }
        // deletion intent takes precedence until a save reconciles it:
        // never re-hot-load what the user deleted this session
        if !self.registry.is_deleted(&ident)
            && self
                .store
                .entity_exists(&ident.header, &ident.id, &ident.class)?
        {
            self.hot_load(&ident)?;
            return Ok(ident);
        }
        self.construct_fresh(ident)
    }

    /// Construct a fresh instance, skipping the remote existence check.
    /// Idempotent against the registry like every construction path.
    pub fn create_new(&mut self, class: &str, id: &str) -> Result<InstanceIdentifier> {
        let ident = InstanceIdentifier::new(id, class, self.default_header.clone());
        if self.registry.contains(&ident) {
            return Ok(ident);
        }
        self.construct_fresh(ident)
    }

    /// Construct a fresh instance under a generated unique id.
    pub fn create_with_generated_id(&mut self, class: &str) -> Result<InstanceIdentifier> {
        let id = format!("{}:{}", class, Uuid::new_v4());
        self.create_new(class, &id)
    }

    fn construct_fresh(&mut self, ident: InstanceIdentifier) -> Result<InstanceIdentifier> {
        let class = self.schema.class(&ident.class)?;
        let instance = Instance::from_class(ident.clone(), class);
        self.registry.register(instance);
        Ok(ident)
    }

    /// Fetch and materialize a remote entity into the registry.
    fn hot_load(&mut self, ident: &InstanceIdentifier) -> Result<()> {
        let entity = self
            .store
            .fetch_entity(&ident.header, &ident.id, &ident.class)?;
        let mut instance = translate::parse_entity(&entity, &ident.header, &self.schema)?;
        instance.old_state = Some(entity);
        info!(ident = %ident, "hot-loaded instance");
        self.registry.register(instance);
        Ok(())
    }

    /// Dereference an identifier, hot-loading it on first use. This is
    /// how relation values fetched lazily become instances.
    pub fn resolve(&mut self, ident: &InstanceIdentifier) -> Result<&Instance> {
        if self.registry.is_deleted(ident) {
            return Err(ContextureError::InstanceNotRegistered(ident.clone()));
        }
        if !self.registry.contains(ident) {
            self.hot_load(ident)?;
        }
        self.instance(ident)
    }

    /// Batch-load matching remote entities under the default header.
    ///
    /// Not transactional: registrations performed before a mid-batch
    /// failure stay in place. Already-registered and session-deleted
    /// identities are left untouched.
    pub fn load_instances(&mut self, filter: &EntityFilter) -> Result<Vec<InstanceIdentifier>> {
        let entities = self.store.list_entities(&self.default_header, filter)?;
        let mut loaded = Vec::new();
        for entity in entities {
            let ident = InstanceIdentifier::new(
                &entity.id,
                &entity.entity_type,
                self.default_header.clone(),
            );
            if self.registry.is_deleted(&ident) {
                continue;
            }
            if !self.registry.contains(&ident) {
                let mut instance = translate::parse_entity(
                    &entity,
                    &self.default_header,
                    &self.schema,
                )?;
                instance.old_state = Some(entity);
                self.registry.register(instance);
            }
            loaded.push(ident);
        }
        info!(count = loaded.len(), "batch-loaded instances");
        Ok(loaded)
    }

    // -------------------------------------------------------------------------
    // Validity
    // -------------------------------------------------------------------------

    /// Check save-eligibility of the whole local state. Rule violations
    /// can be ignored for partial saves; the transport requirement on
    /// device instances cannot.
    pub fn validity_report(&self, ignore_rules: bool) -> ValidityReport {
        let mut report = ValidityReport::default();
        for instance in self.registry.instances() {
            if !ignore_rules {
                let unfulfilled = instance.unfulfilled_fields(&self.schema);
                if !unfulfilled.is_empty() {
                    report
                        .rule_violations
                        .push((instance.identifier().clone(), unfulfilled));
                }
            }
            if let Some(settings) = instance.device_settings() {
                if settings.transport.is_none() {
                    report.missing_transport.push(instance.identifier().clone());
                }
            }
        }
        report
    }

    pub fn is_local_state_valid(&self, ignore_rules: bool) -> bool {
        self.validity_report(ignore_rules).is_ok()
    }

    // -------------------------------------------------------------------------
    // Deletion
    // -------------------------------------------------------------------------

    /// Delete an instance locally, cascading reference cleanup on both
    /// directions. The remote delete is deferred to the next save.
    pub fn delete_instance(
        &mut self,
        ident: &InstanceIdentifier,
        assert_no_references: bool,
    ) -> Result<()> {
        let known_remotely = {
            let instance = self.instance(ident)?;
            if assert_no_references && !instance.references().is_empty() {
                return Err(ContextureError::ReferencesExist {
                    ident: ident.clone(),
                    count: instance.references().len(),
                });
            }
            instance.old_state().is_some()
        };

        // outbound: clearing relation fields un-links everything this
        // instance points to. Inverse propagation may already prune some
        // inbound references here, so the referrer list is read after.
        self.registry.clear_all_fields(ident)?;
        let references = self.instance(ident)?.references().clone();

        // inbound: reach out to every recorded referrer and un-link
        for (referrer, field_names) in references {
            if self.registry.is_deleted(&referrer) {
                continue;
            }
            if !self.registry.contains(&referrer) {
                self.hot_load(&referrer)?;
            }
            for field_name in field_names {
                self.registry.remove_relation(
                    &referrer,
                    &field_name,
                    &crate::model::field::RelationValue::Instance(ident.clone()),
                )?;
            }
        }

        self.registry.remove(ident);
        if known_remotely {
            self.registry.mark_deleted(ident.clone());
        }
        info!(ident = %ident, known_remotely, "deleted instance locally");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Save
    // -------------------------------------------------------------------------

    /// Persist the local state: remote deletes first, then a three-way
    /// merge per instance, then the writes, and only after every write
    /// succeeded the merged state is committed locally and each
    /// instance's remembered snapshot is re-anchored.
    ///
    /// With `assert_validity` any rule violation aborts before side
    /// effects; a device instance without transport always does.
    pub fn save_state(&mut self, assert_validity: bool) -> Result<()> {
        let report = self.validity_report(!assert_validity);
        if let Some(ident) = report.missing_transport.first() {
            return Err(ContextureError::MissingTransport {
                ident: ident.clone(),
            });
        }
        if !report.is_ok() {
            return Err(ContextureError::InvalidState {
                report: report.to_string(),
            });
        }

        // phase 1: reconcile session deletions; each record is closed
        // out only after its remote delete completed
        let deleted: Vec<InstanceIdentifier> = self.registry.deleted().cloned().collect();
        for ident in deleted {
            let cascade = self.schema.is_device_class(&ident.class);
            match self
                .store
                .delete_entity(&ident.header, &ident.id, &ident.class, cascade)
            {
                Ok(()) => {}
                Err(crate::error::StoreError::NotFound(_)) => {
                    // already gone remotely; the intent is fulfilled
                    warn!(ident = %ident, "deleted instance was already gone remotely");
                }
                Err(e) => return Err(e.into()),
            }
            self.registry.clear_deleted_mark(&ident);
            debug!(ident = %ident, "reconciled remote deletion");
        }

        // phase 2: stage the three-way merge of every instance
        let idents: Vec<InstanceIdentifier> = self.registry.identifiers().cloned().collect();
        let mut staged = Vec::with_capacity(idents.len());
        for ident in &idents {
            let live = if self
                .store
                .entity_exists(&ident.header, &ident.id, &ident.class)?
            {
                Some(
                    self.store
                        .fetch_entity(&ident.header, &ident.id, &ident.class)?,
                )
            } else {
                None
            };
            let instance = self.instance(ident)?;
            staged.push(merge::stage(&self.schema, instance, live.as_ref())?);
        }

        // phase 3: write everything; any failure aborts before commit
        for stage in &staged {
            let previous = self
                .registry
                .get(&stage.ident)
                .and_then(|instance| instance.old_state());
            self.store
                .write_entity(&stage.ident.header, &stage.entity, previous)?;
            if let Some(device) = &stage.device {
                self.store
                    .write_device(&stage.ident.header, device, true)?;
            }
        }

        // phase 4: commit merged state and re-anchor the baselines
        let count = staged.len();
        for stage in staged {
            let mut merged = stage.merged;
            merged.old_state = Some(stage.entity);
            self.registry.register(merged);
        }
        info!(instances = count, "saved local state");
        Ok(())
    }
}
