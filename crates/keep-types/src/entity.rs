use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Store-wide identity of an entity.
///
/// Ids are allocated from a counter persisted in the backing file, so an id
/// handed out by `create_entity` stays valid after the entity is saved and
/// is never reused, even if the allocating save fails.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(u64);

impl EntityId {
    /// The first id handed out by a fresh store.
    pub const FIRST: Self = Self(1);

    /// Wrap a raw id.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw numeric id.
    pub const fn get(&self) -> u64 {
        self.0
    }

    /// The id that follows this one.
    pub const fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({})", self.0)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl FromStr for EntityId {
    type Err = TypeError;

    /// Accepts both `42` and the display form `#42`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix('#').unwrap_or(s);
        digits
            .parse::<u64>()
            .map(Self)
            .map_err(|_| TypeError::InvalidEntityId(s.to_string()))
    }
}

impl From<u64> for EntityId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl From<EntityId> for u64 {
    fn from(id: EntityId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_increments() {
        assert_eq!(EntityId::FIRST.next(), EntityId::new(2));
    }

    #[test]
    fn display_and_parse_agree() {
        let id = EntityId::new(42);
        assert_eq!(id.to_string(), "#42");
        assert_eq!("#42".parse::<EntityId>().unwrap(), id);
        assert_eq!("42".parse::<EntityId>().unwrap(), id);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert_eq!(
            "abc".parse::<EntityId>(),
            Err(TypeError::InvalidEntityId("abc".into()))
        );
        assert!("#".parse::<EntityId>().is_err());
        assert!("-1".parse::<EntityId>().is_err());
    }

    #[test]
    fn serializes_as_plain_number() {
        let json = serde_json::to_string(&EntityId::new(7)).unwrap();
        assert_eq!(json, "7");
    }

    #[test]
    fn ordering_follows_raw_value() {
        assert!(EntityId::new(1) < EntityId::new(2));
    }
}
