//! Schema checks run over pending entities before a save.

use keep_schema::SchemaModel;
use keep_types::EntityId;

use crate::codec;
use crate::entity::{Entity, EntityStatus};
use crate::error::{StoreError, StoreResult};
use crate::working_set::TrackedEntity;

/// What a relationship target resolves to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum TargetState {
    Live(String),
    Deleted,
    Missing,
}

/// Check every inserted or updated entity against `model`.
///
/// `resolve` looks up the state of a relationship target. The first
/// violation found is returned.
pub(crate) fn validate<'a>(
    model: &SchemaModel,
    pending: impl IntoIterator<Item = &'a TrackedEntity>,
    mut resolve: impl FnMut(EntityId) -> StoreResult<TargetState>,
) -> StoreResult<()> {
    for tracked in pending {
        if matches!(tracked.status, EntityStatus::Inserted | EntityStatus::Updated) {
            check_entity(model, &tracked.entity, &mut resolve)?;
        }
    }
    Ok(())
}

fn check_entity(
    model: &SchemaModel,
    entity: &Entity,
    resolve: &mut impl FnMut(EntityId) -> StoreResult<TargetState>,
) -> StoreResult<()> {
    let fail = |reason: String| StoreError::ValidationFailed {
        entity: entity.id(),
        reason,
    };
    let kind = model
        .kind(entity.kind())
        .ok_or_else(|| fail(format!("unknown entity kind {:?}", entity.kind())))?;

    for (name, value) in entity.attributes() {
        let attr = kind
            .attribute(name)
            .ok_or_else(|| fail(format!("{} has no attribute {name:?}", kind.name)))?;
        if !attr.ty.accepts(value) {
            return Err(fail(format!(
                "attribute {name:?} expects {} but holds {value}",
                attr.ty
            )));
        }
        codec::storable(value).map_err(|reason| fail(format!("attribute {name:?}: {reason}")))?;
    }
    for attr in kind.attributes.values() {
        if !attr.optional && entity.get(&attr.name).is_none() {
            return Err(fail(format!("required attribute {:?} is not set", attr.name)));
        }
    }

    for name in entity.relationships().keys() {
        if kind.relationship(name).is_none() {
            return Err(fail(format!("{} has no relationship {name:?}", kind.name)));
        }
    }
    for rel in kind.relationships.values() {
        let targets = entity.related(&rel.name);
        let count = targets.len() as u32;
        let (min, max) = rel.bounds();
        if count < min || max.is_some_and(|max| count > max) {
            let bound = match max {
                Some(max) if max == min => format!("exactly {min}"),
                Some(max) => format!("{min}..={max}"),
                None => format!("at least {min}"),
            };
            return Err(fail(format!(
                "relationship {:?} has {count} targets, expected {bound}",
                rel.name
            )));
        }
        for target in targets {
            match resolve(*target)? {
                TargetState::Live(kind) if kind == rel.target => {}
                TargetState::Live(kind) => {
                    return Err(fail(format!(
                        "relationship {:?} targets {target}, a {kind}, not a {}",
                        rel.name, rel.target
                    )))
                }
                TargetState::Deleted => {
                    return Err(fail(format!(
                        "relationship {:?} targets deleted entity {target}",
                        rel.name
                    )))
                }
                TargetState::Missing => {
                    return Err(fail(format!(
                        "relationship {:?} targets unknown entity {target}",
                        rel.name
                    )))
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use keep_types::Value;

    use super::*;

    const SCHEMA: &str = r#"
[entities.Person.attributes]
name = { type = "string" }
age = { type = "integer", optional = true }
height = { type = "double", optional = true }

[entities.Person.relationships]
pets = { target = "Pet", cardinality = "to-many", max = 2 }

[entities.Pet.attributes]
name = { type = "string" }
"#;

    fn model() -> SchemaModel {
        SchemaModel::parse("People", SCHEMA).unwrap()
    }

    fn person(attrs: &[(&str, Value)], pets: &[u64]) -> TrackedEntity {
        let attributes = attrs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        let mut relationships = BTreeMap::new();
        if !pets.is_empty() {
            relationships.insert(
                "pets".to_string(),
                pets.iter().copied().map(EntityId::new).collect(),
            );
        }
        TrackedEntity {
            entity: Entity::new(EntityId::new(1), "Person", attributes, relationships),
            status: EntityStatus::Inserted,
        }
    }

    fn pets_live(_: EntityId) -> StoreResult<TargetState> {
        Ok(TargetState::Live("Pet".into()))
    }

    fn reason(result: StoreResult<()>) -> String {
        match result {
            Err(StoreError::ValidationFailed { reason, .. }) => reason,
            other => panic!("expected validation failure, got {other:?}"),
        }
    }

    #[test]
    fn valid_entity_passes() {
        let p = person(&[("name", Value::from("Ada"))], &[2]);
        validate(&model(), [&p], pets_live).unwrap();
    }

    #[test]
    fn missing_required_attribute() {
        let p = person(&[("age", Value::Integer(3))], &[]);
        assert!(reason(validate(&model(), [&p], pets_live)).contains("\"name\""));
    }

    #[test]
    fn wrong_value_type() {
        let p = person(&[("name", Value::Integer(3))], &[]);
        assert!(reason(validate(&model(), [&p], pets_live)).contains("expects string"));
    }

    #[test]
    fn non_finite_double() {
        for v in [f64::NAN, f64::INFINITY] {
            let p = person(
                &[("name", Value::from("Ada")), ("height", Value::Double(v))],
                &[],
            );
            let why = reason(validate(&model(), [&p], pets_live));
            assert!(why.contains("\"height\"") && why.contains("non-finite"), "{why}");
        }
        let p = person(
            &[("name", Value::from("Ada")), ("height", Value::Double(1.7))],
            &[],
        );
        validate(&model(), [&p], pets_live).unwrap();
    }

    #[test]
    fn unknown_attribute() {
        let p = person(
            &[("name", Value::from("Ada")), ("shoe", Value::Integer(9))],
            &[],
        );
        assert!(reason(validate(&model(), [&p], pets_live)).contains("no attribute"));
    }

    #[test]
    fn too_many_targets() {
        let p = person(&[("name", Value::from("Ada"))], &[2, 3, 4]);
        assert!(reason(validate(&model(), [&p], pets_live)).contains("0..=2"));
    }

    #[test]
    fn dangling_and_mistyped_targets() {
        let p = person(&[("name", Value::from("Ada"))], &[2]);
        let missing = validate(&model(), [&p], |_| Ok(TargetState::Missing));
        assert!(reason(missing).contains("unknown entity"));
        let deleted = validate(&model(), [&p], |_| Ok(TargetState::Deleted));
        assert!(reason(deleted).contains("deleted entity"));
        let wrong = validate(&model(), [&p], |_| Ok(TargetState::Live("Person".into())));
        assert!(reason(wrong).contains("not a Pet"));
    }

    #[test]
    fn clean_and_deleted_entries_are_skipped() {
        let mut p = person(&[], &[]);
        p.status = EntityStatus::Deleted;
        validate(&model(), [&p], pets_live).unwrap();
    }
}
