//! Structural mapping inference between two schema versions.
//!
//! Members are matched by exact name only:
//! - same name and shape ⇒ carried over
//! - new attribute ⇒ declared default, else null if optional, else the
//!   type's zero value, else underivable
//! - removed member ⇒ dropped
//! - same name, different type or relationship shape ⇒ error
//!
//! Renames are never inferred. Under [`RenamePolicy::Fail`] a removed member
//! paired with a structurally identical added one is reported as an
//! ambiguous rename instead of being silently treated as drop-and-add.

use std::collections::BTreeSet;

use keep_types::{AttributeType, SchemaFingerprint, Value};
use serde::{Deserialize, Serialize};

use crate::error::MappingError;
use crate::model::{Attribute, EntityKind, Relationship, SchemaModel};

/// What to do when a change looks like a rename.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RenamePolicy {
    /// Refuse to migrate.
    #[default]
    Fail,
    /// Drop the old member and add the new one; old data is lost.
    DropAndAdd,
}

/// Options governing open-time migration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationPolicy {
    /// Migrate a store written with a different schema instead of failing.
    pub migrate_automatically: bool,
    /// Infer the mapping from the two schemas. There is no other source of
    /// mappings, so turning this off makes every schema change fail.
    pub infer_mapping: bool,
    pub rename_policy: RenamePolicy,
}

impl Default for MigrationPolicy {
    fn default() -> Self {
        Self {
            migrate_automatically: true,
            infer_mapping: true,
            rename_policy: RenamePolicy::Fail,
        }
    }
}

/// Where a new attribute's value comes from.
#[derive(Clone, Debug, PartialEq)]
pub enum AttributeSource {
    /// Copy the stored value unchanged.
    Carry,
    /// Copy the stored value, replacing nulls. `None` means nulls cannot be
    /// replaced, so the migration fails if any exist.
    CarryFilled(Option<Value>),
    /// Every existing row receives this value.
    Fill(Value),
    /// Every existing row receives null.
    Null,
    /// Required, with no default and no zero value. Fails if rows exist.
    Underivable,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AttributeMapping {
    pub name: String,
    pub ty: AttributeType,
    pub source: AttributeSource,
}

/// Where a relationship's links come from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RelationshipSource {
    /// Keep existing links; every source must still satisfy the bounds.
    Carry { min: u32, max: Option<u32> },
    /// Start empty. Fails if `required` and the kind has rows.
    Empty { required: bool },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelationshipMapping {
    pub name: String,
    pub source: RelationshipSource,
}

/// How one entity kind moves from the old schema to the new one.
#[derive(Clone, Debug, PartialEq)]
pub enum KindMapping {
    /// Kind is new; start with no rows.
    Create { kind: String },
    /// Kind was removed; its rows and links go with it.
    Drop { kind: String },
    /// Kind exists in both schemas.
    Transform {
        kind: String,
        attributes: Vec<AttributeMapping>,
        dropped_attributes: Vec<String>,
        relationships: Vec<RelationshipMapping>,
        dropped_relationships: Vec<String>,
    },
}

impl KindMapping {
    pub fn kind(&self) -> &str {
        match self {
            Self::Create { kind } | Self::Drop { kind } | Self::Transform { kind, .. } => kind,
        }
    }

    /// Returns `true` if applying this mapping changes nothing on disk.
    pub fn is_identity(&self) -> bool {
        match self {
            Self::Transform {
                attributes,
                dropped_attributes,
                relationships,
                dropped_relationships,
                ..
            } => {
                dropped_attributes.is_empty()
                    && dropped_relationships.is_empty()
                    && attributes.iter().all(|a| a.source == AttributeSource::Carry)
                    && relationships
                        .iter()
                        .all(|r| matches!(r.source, RelationshipSource::Carry { .. }))
            }
            _ => false,
        }
    }
}

/// A complete mapping from one schema version to another.
#[derive(Clone, Debug, PartialEq)]
pub struct MappingModel {
    pub from: SchemaFingerprint,
    pub to: SchemaFingerprint,
    pub kinds: Vec<KindMapping>,
}

impl MappingModel {
    /// Infer the mapping from `old` to `new`.
    pub fn infer(
        old: &SchemaModel,
        new: &SchemaModel,
        policy: &MigrationPolicy,
    ) -> Result<Self, MappingError> {
        let from = old.fingerprint();
        if !policy.migrate_automatically {
            return Err(MappingError::MigrationDisabled {
                recorded: from.short_hex(),
            });
        }
        if !policy.infer_mapping {
            return Err(MappingError::InferenceDisabled {
                recorded: from.short_hex(),
            });
        }

        let old_names: BTreeSet<&String> = old.kinds.keys().collect();
        let new_names: BTreeSet<&String> = new.kinds.keys().collect();
        let dropped: Vec<&String> = old_names.difference(&new_names).copied().collect();
        let created: Vec<&String> = new_names.difference(&old_names).copied().collect();

        if policy.rename_policy == RenamePolicy::Fail {
            for d in &dropped {
                for c in &created {
                    if same_shape(&old.kinds[*d], &new.kinds[*c]) {
                        return Err(MappingError::AmbiguousRename {
                            from: (*d).clone(),
                            to: (*c).clone(),
                        });
                    }
                }
            }
        }

        let mut kinds = Vec::new();
        kinds.extend(dropped.iter().map(|k| KindMapping::Drop {
            kind: (*k).clone(),
        }));
        for name in old_names.intersection(&new_names) {
            kinds.push(transform(&old.kinds[*name], &new.kinds[*name], policy)?);
        }
        kinds.extend(created.iter().map(|k| KindMapping::Create {
            kind: (*k).clone(),
        }));

        Ok(Self {
            from,
            to: new.fingerprint(),
            kinds,
        })
    }
}

fn transform(
    old: &EntityKind,
    new: &EntityKind,
    policy: &MigrationPolicy,
) -> Result<KindMapping, MappingError> {
    let kind = &new.name;

    let dropped_attributes: Vec<String> = old
        .attributes
        .keys()
        .filter(|name| !new.attributes.contains_key(*name))
        .cloned()
        .collect();
    let dropped_relationships: Vec<String> = old
        .relationships
        .keys()
        .filter(|name| !new.relationships.contains_key(*name))
        .cloned()
        .collect();

    if policy.rename_policy == RenamePolicy::Fail {
        for d in &dropped_attributes {
            let gone = &old.attributes[d];
            let twin = new.attributes.values().find(|a| {
                !old.attributes.contains_key(&a.name)
                    && a.ty == gone.ty
                    && a.optional == gone.optional
            });
            if let Some(twin) = twin {
                return Err(MappingError::AmbiguousRename {
                    from: format!("{kind}.{d}"),
                    to: format!("{kind}.{}", twin.name),
                });
            }
        }
        for d in &dropped_relationships {
            let gone = &old.relationships[d];
            let twin = new.relationships.values().find(|r| {
                !old.relationships.contains_key(&r.name)
                    && r.target == gone.target
                    && r.cardinality == gone.cardinality
            });
            if let Some(twin) = twin {
                return Err(MappingError::AmbiguousRename {
                    from: format!("{kind}.{d}"),
                    to: format!("{kind}.{}", twin.name),
                });
            }
        }
    }

    let mut attributes = Vec::new();
    for attr in new.attributes.values() {
        let source = match old.attribute(&attr.name) {
            Some(prev) if prev.ty != attr.ty => {
                return Err(MappingError::AttributeTypeChanged {
                    kind: kind.clone(),
                    attribute: attr.name.clone(),
                    from: prev.ty.to_string(),
                    to: attr.ty.to_string(),
                })
            }
            Some(prev) if prev.optional && !attr.optional => {
                AttributeSource::CarryFilled(fill_value(attr))
            }
            Some(_) => AttributeSource::Carry,
            None => match fill_value(attr) {
                Some(value) => AttributeSource::Fill(value),
                None if attr.optional => AttributeSource::Null,
                None => AttributeSource::Underivable,
            },
        };
        attributes.push(AttributeMapping {
            name: attr.name.clone(),
            ty: attr.ty,
            source,
        });
    }

    let mut relationships = Vec::new();
    for rel in new.relationships.values() {
        let source = match old.relationship(&rel.name) {
            Some(prev) => {
                check_relationship_shape(kind, prev, rel)?;
                let (min, max) = rel.bounds();
                RelationshipSource::Carry { min, max }
            }
            None => RelationshipSource::Empty {
                required: rel.is_required(),
            },
        };
        relationships.push(RelationshipMapping {
            name: rel.name.clone(),
            source,
        });
    }

    Ok(KindMapping::Transform {
        kind: kind.clone(),
        attributes,
        dropped_attributes,
        relationships,
        dropped_relationships,
    })
}

/// Declared default, else the type's zero value for required attributes.
fn fill_value(attr: &Attribute) -> Option<Value> {
    match &attr.default {
        Some(value) => Some(value.clone()),
        None if attr.optional => None,
        None => attr.ty.zero_value(),
    }
}

fn check_relationship_shape(
    kind: &str,
    old: &Relationship,
    new: &Relationship,
) -> Result<(), MappingError> {
    let changed = |reason: String| MappingError::RelationshipChanged {
        kind: kind.to_string(),
        relationship: new.name.clone(),
        reason,
    };
    if old.target != new.target {
        return Err(changed(format!(
            "target {} became {}",
            old.target, new.target
        )));
    }
    if old.cardinality != new.cardinality {
        return Err(changed(format!(
            "cardinality {} became {}",
            old.cardinality, new.cardinality
        )));
    }
    Ok(())
}

/// Two kinds have the same shape if their members match exactly.
fn same_shape(a: &EntityKind, b: &EntityKind) -> bool {
    a.attributes == b.attributes && a.relationships == b.relationships
}
