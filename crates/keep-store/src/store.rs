use std::path::Path;

use keep_schema::{Cardinality, SchemaDescriptor, SchemaModel, StoreLocation};
use keep_types::{EntityId, SchemaFingerprint, Value};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::backing::BackingFile;
use crate::config::StoreConfig;
use crate::entity::{Entity, EntityStatus};
use crate::error::{StoreError, StoreResult};
use crate::migrate;
use crate::validate::{self, TargetState};
use crate::working_set::WorkingSet;

/// What happened to the backing file when the store was opened.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum OpenOutcome {
    /// No file existed; a new one was laid out for the current schema.
    Created,
    /// The file was written with the current schema.
    Opened,
    /// The file was written with another schema and has been migrated.
    Migrated { from: SchemaFingerprint },
}

/// Counts of entities written by a [`Store::save`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SaveSummary {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
}

impl SaveSummary {
    pub fn is_empty(&self) -> bool {
        self.inserted + self.updated + self.deleted == 0
    }
}

/// A single-file entity store.
///
/// Holds the exclusive handle to its backing file for as long as it lives,
/// plus a working set of every entity touched since the last save.
/// Persisted entities are faulted in on first access. Edits stay in memory
/// until [`save`](Store::save), which validates them against the schema and
/// writes them in one transaction.
///
/// ```no_run
/// # use keep_schema::SchemaCatalog;
/// # use keep_store::Store;
/// let catalog = SchemaCatalog::new("schemas");
/// let schema = catalog.load("MyModel")?;
/// let location = catalog.resolve_store_location("MyModel")?;
/// let mut store = Store::open(&schema, &location)?;
/// let id = store.create_entity("Person");
/// store.set_attribute(id, "name", "Ada")?;
/// store.save()?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug)]
pub struct Store {
    backing: BackingFile,
    model: SchemaModel,
    fingerprint: SchemaFingerprint,
    outcome: OpenOutcome,
    working_set: WorkingSet,
    next_id: EntityId,
}

impl Store {
    /// Open the store at `location` for `schema` with default configuration.
    pub fn open(schema: &SchemaDescriptor, location: &StoreLocation) -> StoreResult<Self> {
        Self::open_with_config(schema, location, StoreConfig::default())
    }

    /// Open the store at `location`, creating or migrating the backing file
    /// as needed.
    pub fn open_with_config(
        schema: &SchemaDescriptor,
        location: &StoreLocation,
        config: StoreConfig,
    ) -> StoreResult<Self> {
        let model = SchemaModel::load(schema)?;
        let fingerprint = model.fingerprint();
        let (mut backing, fresh) = BackingFile::open(location.path(), &config)?;

        let (outcome, next_id) = if fresh {
            backing.initialize(&model)?;
            (OpenOutcome::Created, EntityId::FIRST)
        } else {
            let meta = backing.read_metadata()?;
            if meta.fingerprint == fingerprint {
                (OpenOutcome::Opened, meta.next_entity_id)
            } else {
                migrate::migrate(&mut backing, &meta.schema, &model, &config.migration)?;
                (
                    OpenOutcome::Migrated {
                        from: meta.fingerprint,
                    },
                    meta.next_entity_id,
                )
            }
        };

        info!(
            schema = %model.name,
            path = %location.path().display(),
            fingerprint = %fingerprint.short_hex(),
            ?outcome,
            "store opened"
        );
        Ok(Self {
            backing,
            model,
            fingerprint,
            outcome,
            working_set: WorkingSet::new(),
            next_id,
        })
    }

    pub fn outcome(&self) -> OpenOutcome {
        self.outcome
    }

    /// Fingerprint of the schema the store was opened with.
    pub fn fingerprint(&self) -> SchemaFingerprint {
        self.fingerprint
    }

    pub fn path(&self) -> &Path {
        self.backing.path()
    }

    pub fn model(&self) -> &SchemaModel {
        &self.model
    }

    /// Returns `true` if there are edits not yet saved.
    pub fn has_changes(&self) -> bool {
        self.working_set.is_dirty()
    }

    /// Returns `true` if the entity has edits not yet saved.
    pub fn is_dirty(&self, id: EntityId) -> bool {
        self.working_set
            .get(id)
            .is_some_and(|t| t.status.is_pending())
    }

    /// Create a new entity of `kind` with its declared defaults.
    ///
    /// Unknown kinds are accepted here and rejected by `save`.
    pub fn create_entity(&mut self, kind: &str) -> EntityId {
        let id = self.next_id;
        self.next_id = id.next();
        let attributes = self
            .model
            .kind(kind)
            .map(|k| k.initial_values())
            .unwrap_or_default();
        self.working_set
            .insert_new(Entity::new(id, kind, attributes, Default::default()));
        debug!(%id, kind, "entity created");
        id
    }

    /// Look up a live entity, faulting it in from the backing file.
    pub fn entity(&mut self, id: EntityId) -> StoreResult<Option<&Entity>> {
        self.fault_in(id)?;
        Ok(self.working_set.live(id))
    }

    /// Ids of every live entity of `kind`, ascending.
    pub fn entity_ids(&self, kind: &str) -> StoreResult<Vec<EntityId>> {
        let mut ids: Vec<EntityId> = self
            .backing
            .ids_of_kind(kind)?
            .into_iter()
            .filter(|id| {
                self.working_set
                    .get(*id)
                    .map_or(true, |t| t.status != EntityStatus::Deleted)
            })
            .collect();
        ids.extend(
            self.working_set
                .live_entities()
                .filter(|e| e.kind() == kind)
                .map(Entity::id),
        );
        ids.sort_unstable();
        ids.dedup();
        Ok(ids)
    }

    /// Set an attribute. [`Value::Null`] unsets it.
    pub fn set_attribute(
        &mut self,
        id: EntityId,
        attribute: &str,
        value: impl Into<Value>,
    ) -> StoreResult<()> {
        self.entity_mut(id)?.set(attribute, value.into());
        Ok(())
    }

    /// Add `target` to a relationship. A to-one relationship drops its
    /// current target first.
    pub fn link(&mut self, id: EntityId, relationship: &str, target: EntityId) -> StoreResult<()> {
        let replace = self.is_to_one(id, relationship)?;
        self.entity_mut(id)?.link(relationship, target, replace);
        Ok(())
    }

    /// Remove `target` from a relationship. Returns `true` if it was there.
    pub fn unlink(
        &mut self,
        id: EntityId,
        relationship: &str,
        target: EntityId,
    ) -> StoreResult<bool> {
        let linked = self
            .entity(id)?
            .ok_or(StoreError::EntityNotFound(id))?
            .related(relationship)
            .contains(&target);
        if !linked {
            return Ok(false);
        }
        Ok(self.entity_mut(id)?.unlink(relationship, target))
    }

    /// Schedule an entity for deletion and remove every link pointing at it.
    ///
    /// Entities that linked to it are faulted in and marked updated, so the
    /// next save re-validates their relationship counts.
    pub fn delete_entity(&mut self, id: EntityId) -> StoreResult<()> {
        if self.entity(id)?.is_none() {
            return Err(StoreError::EntityNotFound(id));
        }

        let mut sources = self.backing.sources_linking_to(id)?;
        sources.extend(
            self.working_set
                .live_entities()
                .filter(|e| e.links_to(id))
                .map(Entity::id),
        );
        sources.sort_unstable();
        sources.dedup();

        for source in sources.into_iter().filter(|s| *s != id) {
            let links = self.entity(source)?.is_some_and(|e| e.links_to(id));
            if links {
                if let Some(entity) = self.working_set.entity_mut(source) {
                    entity.unlink_everywhere(id);
                }
            }
        }
        self.working_set.mark_deleted(id);
        debug!(%id, "entity deleted");
        Ok(())
    }

    /// Drop every unsaved edit. Persisted entities fault back in on next
    /// access. Ids handed out since the last save are not reused.
    pub fn discard_changes(&mut self) {
        debug!(tracked = self.working_set.len(), "changes discarded");
        self.working_set.discard();
    }

    /// Validate and persist every pending change.
    ///
    /// Does nothing (and does not touch the file) if there are no changes.
    /// On failure nothing is written and every edit stays pending, so the
    /// save can be retried.
    pub fn save(&mut self) -> StoreResult<SaveSummary> {
        if !self.working_set.is_dirty() {
            return Ok(SaveSummary::default());
        }

        let mut summary = SaveSummary::default();
        for tracked in self.working_set.pending() {
            match tracked.status {
                EntityStatus::Inserted => summary.inserted += 1,
                EntityStatus::Updated => summary.updated += 1,
                EntityStatus::Deleted => summary.deleted += 1,
                EntityStatus::Clean => {}
            }
        }
        if summary.is_empty() {
            self.working_set.mark_saved();
            return Ok(summary);
        }

        let working_set = &self.working_set;
        let backing = &self.backing;
        validate::validate(&self.model, working_set.pending(), |target| {
            Ok(match working_set.get(target) {
                Some(t) if t.status == EntityStatus::Deleted => TargetState::Deleted,
                Some(t) => TargetState::Live(t.entity.kind().to_string()),
                None => backing
                    .kind_of(target)?
                    .map_or(TargetState::Missing, TargetState::Live),
            })
        })?;

        if let Err(err) =
            self.backing
                .commit(&self.model, self.working_set.pending(), self.next_id)
        {
            warn!(path = %self.path().display(), error = %err, "save rolled back");
            return Err(err);
        }
        self.working_set.mark_saved();
        info!(
            path = %self.path().display(),
            inserted = summary.inserted,
            updated = summary.updated,
            deleted = summary.deleted,
            "store saved"
        );
        Ok(summary)
    }

    fn fault_in(&mut self, id: EntityId) -> StoreResult<()> {
        if self.working_set.contains(id) {
            return Ok(());
        }
        if let Some(entity) = self.backing.load_entity(&self.model, id)? {
            self.working_set.insert_clean(entity);
        }
        Ok(())
    }

    fn entity_mut(&mut self, id: EntityId) -> StoreResult<&mut Entity> {
        self.fault_in(id)?;
        self.working_set
            .entity_mut(id)
            .ok_or(StoreError::EntityNotFound(id))
    }

    fn is_to_one(&mut self, id: EntityId, relationship: &str) -> StoreResult<bool> {
        let kind = self
            .entity(id)?
            .ok_or(StoreError::EntityNotFound(id))?
            .kind()
            .to_string();
        let cardinality = self
            .model
            .kind(&kind)
            .and_then(|k| k.relationship(relationship))
            .map(|r| r.cardinality);
        Ok(cardinality == Some(Cardinality::ToOne))
    }
}
