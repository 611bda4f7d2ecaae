use std::collections::BTreeMap;

use keep_types::{EntityId, Value};
use serde::Serialize;

/// An entity as held in the working set.
///
/// Absent and null attributes are the same thing: setting an attribute to
/// [`Value::Null`] removes it, and attributes stored as NULL are not loaded.
/// Likewise a relationship with no targets has no entry.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Entity {
    id: EntityId,
    kind: String,
    attributes: BTreeMap<String, Value>,
    relationships: BTreeMap<String, Vec<EntityId>>,
}

impl Entity {
    pub(crate) fn new(
        id: EntityId,
        kind: impl Into<String>,
        attributes: BTreeMap<String, Value>,
        relationships: BTreeMap<String, Vec<EntityId>>,
    ) -> Self {
        Self {
            id,
            kind: kind.into(),
            attributes,
            relationships,
        }
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Value of an attribute, or `None` if unset.
    pub fn get(&self, attribute: &str) -> Option<&Value> {
        self.attributes.get(attribute)
    }

    pub fn attributes(&self) -> &BTreeMap<String, Value> {
        &self.attributes
    }

    /// Targets of a relationship, in insertion order.
    pub fn related(&self, relationship: &str) -> &[EntityId] {
        self.relationships
            .get(relationship)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn relationships(&self) -> &BTreeMap<String, Vec<EntityId>> {
        &self.relationships
    }

    pub(crate) fn set(&mut self, attribute: &str, value: Value) {
        if value.is_null() {
            self.attributes.remove(attribute);
        } else {
            self.attributes.insert(attribute.to_string(), value);
        }
    }

    /// Add `target` unless already present. With `replace`, existing
    /// targets are dropped first (to-one semantics).
    pub(crate) fn link(&mut self, relationship: &str, target: EntityId, replace: bool) {
        let targets = self.relationships.entry(relationship.to_string()).or_default();
        if replace {
            targets.clear();
        }
        if !targets.contains(&target) {
            targets.push(target);
        }
    }

    /// Returns `true` if the link existed.
    pub(crate) fn unlink(&mut self, relationship: &str, target: EntityId) -> bool {
        let Some(targets) = self.relationships.get_mut(relationship) else {
            return false;
        };
        let before = targets.len();
        targets.retain(|t| *t != target);
        let removed = targets.len() != before;
        if targets.is_empty() {
            self.relationships.remove(relationship);
        }
        removed
    }

    /// Remove `target` from every relationship. Returns `true` if any link
    /// was removed.
    pub(crate) fn unlink_everywhere(&mut self, target: EntityId) -> bool {
        let names: Vec<String> = self
            .relationships
            .iter()
            .filter(|(_, targets)| targets.contains(&target))
            .map(|(name, _)| name.clone())
            .collect();
        for name in &names {
            self.unlink(name, target);
        }
        !names.is_empty()
    }

    pub(crate) fn links_to(&self, target: EntityId) -> bool {
        self.relationships.values().any(|t| t.contains(&target))
    }
}

/// Where an entity stands relative to the backing file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum EntityStatus {
    /// Matches the backing file.
    Clean,
    /// Created in memory; not yet in the backing file.
    Inserted,
    /// In the backing file with unsaved edits.
    Updated,
    /// In the backing file and scheduled for removal.
    Deleted,
}

impl EntityStatus {
    pub fn is_pending(&self) -> bool {
        !matches!(self, Self::Clean)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank() -> Entity {
        Entity::new(EntityId::new(1), "Person", BTreeMap::new(), BTreeMap::new())
    }

    #[test]
    fn setting_null_unsets() {
        let mut e = blank();
        e.set("name", Value::from("Ada"));
        assert_eq!(e.get("name"), Some(&Value::from("Ada")));
        e.set("name", Value::Null);
        assert_eq!(e.get("name"), None);
        assert!(e.attributes().is_empty());
    }

    #[test]
    fn link_is_idempotent_and_ordered() {
        let mut e = blank();
        e.link("pets", EntityId::new(3), false);
        e.link("pets", EntityId::new(2), false);
        e.link("pets", EntityId::new(3), false);
        assert_eq!(e.related("pets"), &[EntityId::new(3), EntityId::new(2)]);
    }

    #[test]
    fn replace_keeps_a_single_target() {
        let mut e = blank();
        e.link("spouse", EntityId::new(2), true);
        e.link("spouse", EntityId::new(5), true);
        assert_eq!(e.related("spouse"), &[EntityId::new(5)]);
    }

    #[test]
    fn unlinking_last_target_removes_the_entry() {
        let mut e = blank();
        e.link("pets", EntityId::new(2), false);
        assert!(e.unlink("pets", EntityId::new(2)));
        assert!(!e.unlink("pets", EntityId::new(2)));
        assert!(e.relationships().is_empty());
        assert!(e.related("pets").is_empty());
    }

    #[test]
    fn unlink_everywhere_touches_all_relationships() {
        let mut e = blank();
        e.link("pets", EntityId::new(2), false);
        e.link("friends", EntityId::new(2), false);
        e.link("friends", EntityId::new(4), false);
        assert!(e.links_to(EntityId::new(2)));
        assert!(e.unlink_everywhere(EntityId::new(2)));
        assert!(!e.links_to(EntityId::new(2)));
        assert_eq!(e.related("friends"), &[EntityId::new(4)]);
    }
}
