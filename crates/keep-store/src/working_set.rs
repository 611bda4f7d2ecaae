//! The in-memory working set: every entity the store has touched.
//!
//! The [`WorkingSet`] is a `BTreeMap<EntityId, TrackedEntity>` plus a
//! store-level dirty flag. Every mutation sets the flag; only a successful
//! save clears it. Entries faulted in from the backing file start
//! [`EntityStatus::Clean`].

use std::collections::BTreeMap;

use keep_types::EntityId;

use crate::entity::{Entity, EntityStatus};

/// An entity plus its status relative to the backing file.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct TrackedEntity {
    pub entity: Entity,
    pub status: EntityStatus,
}

#[derive(Debug, Default)]
pub(crate) struct WorkingSet {
    entries: BTreeMap<EntityId, TrackedEntity>,
    dirty: bool,
}

impl WorkingSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn get(&self, id: EntityId) -> Option<&TrackedEntity> {
        self.entries.get(&id)
    }

    /// The entity, unless it is unknown or scheduled for deletion.
    pub fn live(&self, id: EntityId) -> Option<&Entity> {
        self.entries
            .get(&id)
            .filter(|t| t.status != EntityStatus::Deleted)
            .map(|t| &t.entity)
    }

    /// Track an entity that was just faulted in from the backing file.
    pub fn insert_clean(&mut self, entity: Entity) {
        self.entries.insert(
            entity.id(),
            TrackedEntity {
                entity,
                status: EntityStatus::Clean,
            },
        );
    }

    /// Track a newly created entity.
    pub fn insert_new(&mut self, entity: Entity) {
        self.entries.insert(
            entity.id(),
            TrackedEntity {
                entity,
                status: EntityStatus::Inserted,
            },
        );
        self.dirty = true;
    }

    /// Mutable access to a live entity. Marks it updated and the set dirty.
    pub fn entity_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        let tracked = self.entries.get_mut(&id)?;
        match tracked.status {
            EntityStatus::Deleted => return None,
            EntityStatus::Clean => tracked.status = EntityStatus::Updated,
            EntityStatus::Inserted | EntityStatus::Updated => {}
        }
        self.dirty = true;
        Some(&mut tracked.entity)
    }

    /// Schedule a live entity for deletion. Returns `false` if it is not
    /// live. An entity that was never saved is simply forgotten.
    pub fn mark_deleted(&mut self, id: EntityId) -> bool {
        let Some(tracked) = self.entries.get_mut(&id) else {
            return false;
        };
        match tracked.status {
            EntityStatus::Deleted => return false,
            EntityStatus::Inserted => {
                self.entries.remove(&id);
            }
            EntityStatus::Clean | EntityStatus::Updated => {
                tracked.status = EntityStatus::Deleted;
            }
        }
        self.dirty = true;
        true
    }

    /// Entries that differ from the backing file, in id order.
    pub fn pending(&self) -> impl Iterator<Item = &TrackedEntity> {
        self.entries.values().filter(|t| t.status.is_pending())
    }

    /// Live entities, in id order.
    pub fn live_entities(&self) -> impl Iterator<Item = &Entity> {
        self.entries
            .values()
            .filter(|t| t.status != EntityStatus::Deleted)
            .map(|t| &t.entity)
    }

    /// Everything pending is now durable.
    pub fn mark_saved(&mut self) {
        self.entries
            .retain(|_, t| t.status != EntityStatus::Deleted);
        for tracked in self.entries.values_mut() {
            tracked.status = EntityStatus::Clean;
        }
        self.dirty = false;
    }

    /// Forget every entry. Persisted entities fault back in on next access.
    pub fn discard(&mut self) {
        self.entries.clear();
        self.dirty = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(id: u64) -> Entity {
        Entity::new(EntityId::new(id), "Note", BTreeMap::new(), BTreeMap::new())
    }

    #[test]
    fn new_set_is_clean() {
        let ws = WorkingSet::new();
        assert!(!ws.is_dirty());
        assert_eq!(ws.pending().count(), 0);
    }

    #[test]
    fn faulting_in_does_not_dirty() {
        let mut ws = WorkingSet::new();
        ws.insert_clean(entity(1));
        assert!(!ws.is_dirty());
        assert!(ws.live(EntityId::new(1)).is_some());
    }

    #[test]
    fn edits_mark_entity_updated() {
        let mut ws = WorkingSet::new();
        ws.insert_clean(entity(1));
        ws.entity_mut(EntityId::new(1)).unwrap();
        assert!(ws.is_dirty());
        assert_eq!(ws.get(EntityId::new(1)).unwrap().status, EntityStatus::Updated);
    }

    #[test]
    fn edits_keep_inserted_status() {
        let mut ws = WorkingSet::new();
        ws.insert_new(entity(1));
        ws.entity_mut(EntityId::new(1)).unwrap();
        assert_eq!(ws.get(EntityId::new(1)).unwrap().status, EntityStatus::Inserted);
    }

    #[test]
    fn deleting_unsaved_entity_forgets_it() {
        let mut ws = WorkingSet::new();
        ws.insert_new(entity(1));
        assert!(ws.mark_deleted(EntityId::new(1)));
        assert!(!ws.contains(EntityId::new(1)));
        assert!(ws.is_dirty());
    }

    #[test]
    fn deleted_entities_are_not_live() {
        let mut ws = WorkingSet::new();
        ws.insert_clean(entity(1));
        assert!(ws.mark_deleted(EntityId::new(1)));
        assert!(ws.live(EntityId::new(1)).is_none());
        assert!(ws.entity_mut(EntityId::new(1)).is_none());
        assert!(!ws.mark_deleted(EntityId::new(1)));
        assert_eq!(ws.pending().count(), 1);
    }

    #[test]
    fn mark_saved_cleans_and_drops_deleted() {
        let mut ws = WorkingSet::new();
        ws.insert_clean(entity(1));
        ws.insert_new(entity(2));
        ws.mark_deleted(EntityId::new(1));
        ws.mark_saved();
        assert!(!ws.is_dirty());
        assert_eq!(ws.len(), 1);
        assert_eq!(ws.get(EntityId::new(2)).unwrap().status, EntityStatus::Clean);
    }

    #[test]
    fn discard_forgets_everything() {
        let mut ws = WorkingSet::new();
        ws.insert_new(entity(1));
        ws.discard();
        assert!(!ws.is_dirty());
        assert_eq!(ws.len(), 0);
    }
}
