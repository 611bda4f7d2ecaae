//! In-memory schema model parsed from a TOML resource.
//!
//! ```toml
//! version = "2"
//!
//! [entities.Person.attributes]
//! name = { type = "string" }
//! age  = { type = "integer", optional = true, default = 0 }
//!
//! [entities.Person.relationships]
//! pets = { target = "Pet", cardinality = "to-many" }
//!
//! [entities.Pet.attributes]
//! name = { type = "string" }
//! ```

use std::collections::BTreeMap;
use std::fs;

use keep_types::{AttributeType, SchemaFingerprint, Value};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::catalog::SchemaDescriptor;
use crate::error::{SchemaError, SchemaResult};
use crate::names::validate_identifier;

/// How many targets a relationship may hold.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Cardinality {
    #[default]
    ToOne,
    ToMany,
}

impl std::fmt::Display for Cardinality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ToOne => write!(f, "to-one"),
            Self::ToMany => write!(f, "to-many"),
        }
    }
}

/// A declared attribute of an entity kind.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: AttributeType,
    pub optional: bool,
    pub default: Option<Value>,
}

/// A declared relationship from one entity kind to another.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub name: String,
    pub target: String,
    pub cardinality: Cardinality,
    pub optional: bool,
    pub min_count: u32,
    pub max_count: Option<u32>,
}

impl Relationship {
    /// Inclusive bounds on the number of targets an entity may hold.
    pub fn bounds(&self) -> (u32, Option<u32>) {
        match self.cardinality {
            Cardinality::ToOne => (u32::from(!self.optional), Some(1)),
            Cardinality::ToMany => {
                let min = if self.optional {
                    self.min_count
                } else {
                    self.min_count.max(1)
                };
                (min, self.max_count)
            }
        }
    }

    /// Returns `true` if an entity with no targets violates this relationship.
    pub fn is_required(&self) -> bool {
        self.bounds().0 > 0
    }
}

/// One entity kind: a named set of attributes and relationships.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntityKind {
    pub name: String,
    pub attributes: BTreeMap<String, Attribute>,
    pub relationships: BTreeMap<String, Relationship>,
}

impl EntityKind {
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.get(name)
    }

    pub fn relationship(&self, name: &str) -> Option<&Relationship> {
        self.relationships.get(name)
    }

    /// The values a freshly created entity of this kind starts with.
    pub fn initial_values(&self) -> BTreeMap<String, Value> {
        self.attributes
            .values()
            .filter_map(|attr| Some((attr.name.clone(), attr.default.clone()?)))
            .collect()
    }
}

/// A validated schema: every entity kind the store may hold.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SchemaModel {
    pub name: String,
    /// Informational label; does not take part in the fingerprint.
    pub version: Option<String>,
    pub kinds: BTreeMap<String, EntityKind>,
}

impl SchemaModel {
    /// Read and parse the resource behind a descriptor.
    pub fn load(descriptor: &SchemaDescriptor) -> SchemaResult<Self> {
        let text = fs::read_to_string(descriptor.location()).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SchemaError::NotFound {
                    name: descriptor.name().to_string(),
                    path: descriptor.location().to_path_buf(),
                }
            } else {
                SchemaError::Io(e)
            }
        })?;
        let model = Self::parse(descriptor.name(), &text)?;
        debug!(
            schema = descriptor.name(),
            kinds = model.kinds.len(),
            fingerprint = %model.fingerprint().short_hex(),
            "schema loaded"
        );
        Ok(model)
    }

    /// Parse and validate a TOML schema description.
    pub fn parse(name: &str, text: &str) -> SchemaResult<Self> {
        let raw: RawSchema =
            toml::from_str(text).map_err(|e| SchemaError::invalid(name, e.to_string()))?;

        let mut kinds = BTreeMap::new();
        for (kind_name, raw_kind) in raw.entities {
            validate_identifier(&kind_name)
                .map_err(|reason| SchemaError::invalid(name, reason))?;
            let kind = raw_kind
                .into_kind(&kind_name)
                .map_err(|reason| SchemaError::invalid(name, reason))?;
            kinds.insert(kind_name, kind);
        }

        let model = Self {
            name: name.to_string(),
            version: raw.version,
            kinds,
        };
        model
            .check_targets()
            .map_err(|reason| SchemaError::invalid(name, reason))?;
        Ok(model)
    }

    pub fn kind(&self, name: &str) -> Option<&EntityKind> {
        self.kinds.get(name)
    }

    /// Fingerprint of the structural content of this schema.
    pub fn fingerprint(&self) -> SchemaFingerprint {
        SchemaFingerprint::compute(&self.canonical_bytes())
    }

    /// Canonical encoding: the kinds map as JSON. `BTreeMap` ordering makes
    /// it independent of declaration order in the resource.
    fn canonical_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(&self.kinds).expect("schema kinds always serialize to JSON")
    }

    fn check_targets(&self) -> Result<(), String> {
        for kind in self.kinds.values() {
            for rel in kind.relationships.values() {
                if !self.kinds.contains_key(&rel.target) {
                    return Err(format!(
                        "{}.{} targets unknown kind {:?}",
                        kind.name, rel.name, rel.target
                    ));
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// On-disk form
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSchema {
    version: Option<String>,
    #[serde(default)]
    entities: BTreeMap<String, RawEntity>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawEntity {
    #[serde(default)]
    attributes: BTreeMap<String, RawAttribute>,
    #[serde(default)]
    relationships: BTreeMap<String, RawRelationship>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawAttribute {
    #[serde(rename = "type")]
    ty: AttributeType,
    #[serde(default)]
    optional: bool,
    default: Option<toml::Value>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRelationship {
    target: String,
    #[serde(default)]
    cardinality: Cardinality,
    optional: Option<bool>,
    min: Option<u32>,
    max: Option<u32>,
}

impl RawEntity {
    fn into_kind(self, kind: &str) -> Result<EntityKind, String> {
        let mut attributes = BTreeMap::new();
        for (name, raw) in self.attributes {
            validate_identifier(&name)?;
            let default = raw
                .default
                .as_ref()
                .map(|v| default_value(raw.ty, v))
                .transpose()
                .map_err(|reason| format!("{kind}.{name}: {reason}"))?;
            attributes.insert(
                name.clone(),
                Attribute {
                    name,
                    ty: raw.ty,
                    optional: raw.optional,
                    default,
                },
            );
        }

        let mut relationships = BTreeMap::new();
        for (name, raw) in self.relationships {
            validate_identifier(&name)?;
            if attributes.contains_key(&name) {
                return Err(format!(
                    "{kind}.{name} is declared as both attribute and relationship"
                ));
            }
            let rel = raw
                .into_relationship(&name)
                .map_err(|reason| format!("{kind}.{name}: {reason}"))?;
            relationships.insert(name, rel);
        }

        Ok(EntityKind {
            name: kind.to_string(),
            attributes,
            relationships,
        })
    }
}

impl RawRelationship {
    fn into_relationship(self, name: &str) -> Result<Relationship, String> {
        if self.cardinality == Cardinality::ToOne && (self.min.is_some() || self.max.is_some()) {
            return Err("min/max apply to to-many relationships only".into());
        }
        let min_count = self.min.unwrap_or(0);
        if let Some(max) = self.max {
            if max == 0 || min_count > max {
                return Err(format!("invalid bounds min={min_count} max={max}"));
            }
        }
        Ok(Relationship {
            name: name.to_string(),
            target: self.target,
            cardinality: self.cardinality,
            optional: self.optional.unwrap_or(true),
            min_count,
            max_count: self.max,
        })
    }
}

fn default_value(ty: AttributeType, raw: &toml::Value) -> Result<Value, String> {
    let mismatch = || format!("default {raw} is not a valid {ty}");
    match (ty, raw) {
        (AttributeType::Integer, toml::Value::Integer(i)) => Ok(Value::Integer(*i)),
        (AttributeType::Double, toml::Value::Float(f)) if f.is_finite() => Ok(Value::Double(*f)),
        (AttributeType::Double, toml::Value::Integer(i)) => Ok(Value::Double(*i as f64)),
        (AttributeType::Boolean, toml::Value::Boolean(b)) => Ok(Value::Boolean(*b)),
        (AttributeType::String, toml::Value::String(s)) => Ok(Value::String(s.clone())),
        (AttributeType::Date, toml::Value::Datetime(dt)) => ty
            .parse_literal(&dt.to_string())
            .map_err(|_| mismatch())
            .and_then(storable_date),
        (AttributeType::Date | AttributeType::Binary | AttributeType::Uuid, toml::Value::String(s)) => {
            ty.parse_literal(s).map_err(|_| mismatch()).and_then(storable_date)
        }
        _ => Err(mismatch()),
    }
}

/// Dates are stored as nanoseconds since the epoch.
fn storable_date(value: Value) -> Result<Value, String> {
    match &value {
        Value::Date(d) if d.timestamp_nanos_opt().is_none() => {
            Err(format!("default {d} is outside the storable date range"))
        }
        _ => Ok(value),
    }
}
