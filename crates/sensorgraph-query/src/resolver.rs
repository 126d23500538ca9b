//! Property name → evaluation strategy.

use crate::error::CompileError;
use sensorgraph_schema::{
    ComputedRule, EntityType, ForeignKey, HubLink, JoinStrategy, PropertyStrategy, Registry,
    RelationDescriptor, ValueKind,
};

/// How one property of one entity type is evaluated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Resolution<'a> {
    /// Stored attribute; comparisons use the first column.
    Direct {
        columns: &'a [String],
        kind: ValueKind,
    },
    Computed {
        rule: &'a ComputedRule,
        kind: ValueKind,
    },
    RelationFlag(&'a RelationDescriptor),
}

impl<'a> Resolution<'a> {
    pub fn kind(&self) -> ValueKind {
        match self {
            Resolution::Direct { kind, .. } | Resolution::Computed { kind, .. } => *kind,
            Resolution::RelationFlag(_) => ValueKind::Number,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PropertyResolver<'a> {
    registry: &'a Registry,
}

impl<'a> PropertyResolver<'a> {
    pub fn new(registry: &'a Registry) -> Self {
        Self { registry }
    }

    pub fn entity(&self, name: &str) -> Result<&'a EntityType, CompileError> {
        self.registry
            .entity(name)
            .ok_or_else(|| CompileError::UnknownEntityType {
                name: name.to_string(),
            })
    }

    pub fn resolve(
        &self,
        entity_type: &'a EntityType,
        property: &str,
    ) -> Result<Resolution<'a>, CompileError> {
        let descriptor =
            entity_type
                .property(property)
                .ok_or_else(|| CompileError::UnknownProperty {
                    entity_type: entity_type.name.clone(),
                    property: property.to_string(),
                })?;
        match &descriptor.strategy {
            PropertyStrategy::Direct { columns } => Ok(Resolution::Direct {
                columns,
                kind: descriptor.kind,
            }),
            PropertyStrategy::Computed(rule) => Ok(Resolution::Computed {
                rule,
                kind: descriptor.kind,
            }),
            PropertyStrategy::RelationFlag { relation } => entity_type
                .relation(relation)
                .map(Resolution::RelationFlag)
                .ok_or_else(|| CompileError::UnknownRelation {
                    entity_type: entity_type.name.clone(),
                    relation: relation.clone(),
                }),
        }
    }

    /// Storage columns a change to `property` is reported under. Synthetic
    /// properties have no column and are reported under their own name; a
    /// relation is reported under the foreign-key column when the source row
    /// holds one.
    pub fn storage_columns(
        &self,
        entity_type: &'a EntityType,
        property: &str,
    ) -> Result<Vec<String>, CompileError> {
        Ok(match self.resolve(entity_type, property)? {
            Resolution::Direct { columns, .. } => columns.to_vec(),
            Resolution::Computed { .. } => vec![property.to_string()],
            Resolution::RelationFlag(relation) => match &relation.join {
                JoinStrategy::Direct(ForeignKey::Local { column })
                | JoinStrategy::ViaHub {
                    source: HubLink::EntityColumn(column),
                    ..
                } => vec![column.clone()],
                _ => vec![property.to_string()],
            },
        })
    }
}
