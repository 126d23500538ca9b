//! Entity type registry.
//!
//! The registry is a fixed adjacency table: every entity type lists its
//! properties and its outgoing relations, and each relation records the
//! storage join it needs. Cycles between types (Location ↔ HistoricalLocation)
//! are fine here because nothing walks the table recursively; callers follow
//! exactly the relation chain they were given.

use crate::value::{Value, ValueKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

// ============================================================================
// Properties
// ============================================================================

/// How a synthetic (non-stored) property evaluates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ComputedRule {
    /// Always equal to a fixed value; comparisons fold to true/false.
    Constant(Value),
    /// A MIME-type field synthesized for feature-like entities. Any
    /// comparison degenerates to "does the literal name one of the accepted
    /// spellings", regardless of operator.
    AcceptedMime { accepted: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyStrategy {
    /// Stored attribute. Temporal intervals map to two columns (start, end);
    /// comparisons use the first.
    Direct { columns: Vec<String> },
    Computed(ComputedRule),
    /// The property names a relation; evaluated as existence of a related
    /// entity whose key satisfies the comparison.
    RelationFlag { relation: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDescriptor {
    pub name: String,
    pub kind: ValueKind,
    pub strategy: PropertyStrategy,
}

impl PropertyDescriptor {
    pub fn direct(name: &str, kind: ValueKind, columns: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            kind,
            strategy: PropertyStrategy::Direct {
                columns: columns.iter().map(|c| c.to_string()).collect(),
            },
        }
    }

    pub fn computed(name: &str, kind: ValueKind, rule: ComputedRule) -> Self {
        Self {
            name: name.to_string(),
            kind,
            strategy: PropertyStrategy::Computed(rule),
        }
    }

    pub fn is_relation_flag(&self) -> bool {
        matches!(self.strategy, PropertyStrategy::RelationFlag { .. })
    }
}

// ============================================================================
// Relations
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cardinality {
    One,
    Many,
}

/// Where the key linking two rows lives for a direct relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ForeignKey {
    /// The source row holds the target's key.
    Local { column: String },
    /// The target row holds the source's key.
    Remote { column: String },
    /// A link table holds (source key, target key) pairs.
    Link {
        table: String,
        source_column: String,
        target_column: String,
    },
}

/// One side of a hub-routed relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HubLink {
    /// The hub row holds this entity's key in the named column.
    HubColumn(String),
    /// This entity's row holds the hub key in the named column.
    EntityColumn(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinStrategy {
    Direct(ForeignKey),
    ViaHub { source: HubLink, target: HubLink },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationDescriptor {
    pub name: String,
    pub target: String,
    pub cardinality: Cardinality,
    pub join: JoinStrategy,
}

/// Storage location of the hub (linking) entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubDescriptor {
    pub table: String,
    pub key_column: String,
}

// ============================================================================
// Entity types
// ============================================================================

/// Which field clients use to address an entity in topics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdentifierField {
    Key,
    /// Externally visible identifier stored apart from the key.
    External { column: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityType {
    pub name: String,
    /// Collection name used in topics and related-collection snapshots.
    pub set_name: String,
    pub table: String,
    pub key_column: String,
    pub identifier: IdentifierField,
    properties: Vec<PropertyDescriptor>,
    relations: Vec<RelationDescriptor>,
}

impl EntityType {
    pub fn new(name: &str, set_name: &str, table: &str) -> Self {
        Self {
            name: name.to_string(),
            set_name: set_name.to_string(),
            table: table.to_string(),
            key_column: "id".to_string(),
            identifier: IdentifierField::Key,
            properties: Vec::new(),
            relations: Vec::new(),
        }
    }

    pub fn with_identifier(mut self, identifier: IdentifierField) -> Self {
        self.identifier = identifier;
        self
    }

    pub fn with_property(mut self, property: PropertyDescriptor) -> Self {
        self.properties.push(property);
        self
    }

    /// Add a relation together with its relation-flag property.
    pub fn with_relation(
        mut self,
        name: &str,
        target: &str,
        cardinality: Cardinality,
        join: JoinStrategy,
    ) -> Self {
        self.relations.push(RelationDescriptor {
            name: name.to_string(),
            target: target.to_string(),
            cardinality,
            join,
        });
        self.properties.push(PropertyDescriptor {
            name: name.to_string(),
            kind: ValueKind::Number,
            strategy: PropertyStrategy::RelationFlag {
                relation: name.to_string(),
            },
        });
        self
    }

    pub fn properties(&self) -> &[PropertyDescriptor] {
        &self.properties
    }

    pub fn relations(&self) -> &[RelationDescriptor] {
        &self.relations
    }

    /// Preferred descriptor for `name`: stored/computed properties win over
    /// relation flags of the same name.
    pub fn property(&self, name: &str) -> Option<&PropertyDescriptor> {
        let mut matches = self.properties.iter().filter(|p| p.name == name);
        let first = matches.next()?;
        if first.is_relation_flag() {
            Some(matches.next().unwrap_or(first))
        } else {
            Some(first)
        }
    }

    /// Non-relation property named `name`, if any.
    pub fn attribute(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.properties
            .iter()
            .find(|p| p.name == name && !p.is_relation_flag())
    }

    pub fn relation(&self, name: &str) -> Option<&RelationDescriptor> {
        self.relations.iter().find(|r| r.name == name)
    }
}

// ============================================================================
// Registry
// ============================================================================

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("entity type `{0}` is declared twice")]
    DuplicateType(String),
    #[error("entity set `{0}` is declared twice")]
    DuplicateSet(String),
    #[error("relation `{entity_type}.{relation}` targets undeclared type `{target}`")]
    UnknownTarget {
        entity_type: String,
        relation: String,
        target: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registry {
    hub: HubDescriptor,
    types: BTreeMap<String, EntityType>,
    /// Types clients may address in topics (the hub type is internal).
    addressable: Vec<String>,
}

impl Registry {
    /// Build and validate a registry.
    pub fn new(
        hub: HubDescriptor,
        types: Vec<EntityType>,
        internal: &[&str],
    ) -> Result<Self, RegistryError> {
        let mut map = BTreeMap::new();
        let mut sets = std::collections::BTreeSet::new();
        for ty in types {
            if !sets.insert(ty.set_name.clone()) {
                return Err(RegistryError::DuplicateSet(ty.set_name));
            }
            if map.contains_key(&ty.name) {
                return Err(RegistryError::DuplicateType(ty.name));
            }
            map.insert(ty.name.clone(), ty);
        }
        let registry = Self::assemble(hub, map, internal);
        registry.validate()?;
        Ok(registry)
    }

    pub(crate) fn assemble(
        hub: HubDescriptor,
        types: BTreeMap<String, EntityType>,
        internal: &[&str],
    ) -> Self {
        let addressable = types
            .keys()
            .filter(|name| !internal.contains(&name.as_str()))
            .cloned()
            .collect();
        Self {
            hub,
            types,
            addressable,
        }
    }

    /// Check that every relation targets a declared type.
    pub fn validate(&self) -> Result<(), RegistryError> {
        for ty in self.types.values() {
            for rel in &ty.relations {
                if !self.types.contains_key(&rel.target) {
                    return Err(RegistryError::UnknownTarget {
                        entity_type: ty.name.clone(),
                        relation: rel.name.clone(),
                        target: rel.target.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn hub(&self) -> &HubDescriptor {
        &self.hub
    }

    pub fn entity(&self, name: &str) -> Option<&EntityType> {
        self.types.get(name)
    }

    /// Look up an addressable type by its entity-set name (`Things`).
    pub fn by_set(&self, set_name: &str) -> Option<&EntityType> {
        self.addressable
            .iter()
            .filter_map(|name| self.types.get(name))
            .find(|ty| ty.set_name == set_name)
    }

    pub fn is_addressable(&self, name: &str) -> bool {
        self.addressable.iter().any(|n| n == name)
    }

    pub fn types(&self) -> impl Iterator<Item = &EntityType> {
        self.types.values()
    }

    /// The relation on `relation`'s target that leads back to `source`.
    pub fn inverse(
        &self,
        source: &EntityType,
        relation: &RelationDescriptor,
    ) -> Option<&RelationDescriptor> {
        self.types
            .get(&relation.target)?
            .relations
            .iter()
            .find(|r| r.target == source.name)
    }
}
