//! Relation chains → existence predicates.
//!
//! A chain `r1/r2/.../rn` from a root type is resolved by first walking the
//! relation table forward (to find every intermediate type and fail early on
//! undeclared relations), then folding the leaf condition backwards, one hop
//! at a time, innermost first. Each hop wraps the condition built so far in
//! an `IN` subquery keyed by primary or foreign key columns.
//!
//! Hub hops expand into two nested subqueries:
//!
//! ```text
//! root.key IN (SELECT hub.<root col> FROM hub
//!              WHERE hub.<leaf col> IN (SELECT leaf.key FROM leaf WHERE <cond>))
//! ```
//!
//! with the columns swapped around depending on which side of the hub holds
//! the reference (`HubLink`).

use crate::error::CompileError;
use crate::predicate::Predicate;
use sensorgraph_schema::{
    EntityType, ForeignKey, HubLink, JoinStrategy, Registry, RelationDescriptor,
};

/// One resolved step of a relation chain.
#[derive(Debug, Clone, Copy)]
pub struct Hop<'a> {
    pub source: &'a EntityType,
    pub relation: &'a RelationDescriptor,
    pub target: &'a EntityType,
}

#[derive(Debug, Clone, Copy)]
pub struct NavigationResolver<'a> {
    registry: &'a Registry,
    max_depth: usize,
}

impl<'a> NavigationResolver<'a> {
    pub fn new(registry: &'a Registry, max_depth: usize) -> Self {
        Self {
            registry,
            max_depth,
        }
    }

    /// Resolve every hop of `chain` starting at `root`.
    pub fn walk(
        &self,
        root: &'a EntityType,
        chain: &[String],
    ) -> Result<Vec<Hop<'a>>, CompileError> {
        if chain.len() > self.max_depth {
            return Err(CompileError::NavigationTooDeep {
                depth: chain.len(),
                max: self.max_depth,
            });
        }
        let mut hops = Vec::with_capacity(chain.len());
        let mut current = root;
        for name in chain {
            let relation =
                current
                    .relation(name)
                    .ok_or_else(|| CompileError::UnknownRelation {
                        entity_type: current.name.clone(),
                        relation: name.clone(),
                    })?;
            let target = self.registry.entity(&relation.target).ok_or_else(|| {
                CompileError::UnknownEntityType {
                    name: relation.target.clone(),
                }
            })?;
            hops.push(Hop {
                source: current,
                relation,
                target,
            });
            current = target;
        }
        Ok(hops)
    }

    /// Entity type at the end of `chain`.
    pub fn target(
        &self,
        root: &'a EntityType,
        chain: &[String],
    ) -> Result<&'a EntityType, CompileError> {
        Ok(self
            .walk(root, chain)?
            .last()
            .map(|hop| hop.target)
            .unwrap_or(root))
    }

    /// Predicate over `root` that holds when some entity reached through
    /// `chain` satisfies `leaf` (a predicate over the chain's final type).
    pub fn resolve_existence(
        &self,
        root: &'a EntityType,
        chain: &[String],
        leaf: Predicate,
    ) -> Result<Predicate, CompileError> {
        let hops = self.walk(root, chain)?;
        Ok(hops
            .iter()
            .rev()
            .fold(leaf, |condition, hop| self.hop(hop, condition)))
    }

    /// Wrap `condition` (over `hop.target`) into a predicate over `hop.source`.
    pub fn hop(&self, hop: &Hop<'_>, condition: Predicate) -> Predicate {
        let source = hop.source;
        let target = hop.target;
        match &hop.relation.join {
            JoinStrategy::Direct(ForeignKey::Local { column }) => Predicate::in_subquery(
                column.as_str(),
                target.table.as_str(),
                target.key_column.as_str(),
                condition,
            ),
            JoinStrategy::Direct(ForeignKey::Remote { column }) => Predicate::in_subquery(
                source.key_column.as_str(),
                target.table.as_str(),
                column.as_str(),
                condition,
            ),
            JoinStrategy::Direct(ForeignKey::Link {
                table,
                source_column,
                target_column,
            }) => {
                let targets = Predicate::in_subquery(
                    target_column.as_str(),
                    target.table.as_str(),
                    target.key_column.as_str(),
                    condition,
                );
                Predicate::in_subquery(
                    source.key_column.as_str(),
                    table.as_str(),
                    source_column.as_str(),
                    targets,
                )
            }
            JoinStrategy::ViaHub {
                source: source_link,
                target: target_link,
            } => {
                let hub = self.registry.hub();
                // Hub rows linked to some target row satisfying the condition.
                let hub_rows = match target_link {
                    HubLink::EntityColumn(column) => Predicate::in_subquery(
                        hub.key_column.as_str(),
                        target.table.as_str(),
                        column.as_str(),
                        condition,
                    ),
                    HubLink::HubColumn(column) => Predicate::in_subquery(
                        column.as_str(),
                        target.table.as_str(),
                        target.key_column.as_str(),
                        condition,
                    ),
                };
                match source_link {
                    HubLink::HubColumn(column) => Predicate::in_subquery(
                        source.key_column.as_str(),
                        hub.table.as_str(),
                        column.as_str(),
                        hub_rows,
                    ),
                    HubLink::EntityColumn(column) => Predicate::in_subquery(
                        column.as_str(),
                        hub.table.as_str(),
                        hub.key_column.as_str(),
                        hub_rows,
                    ),
                }
            }
        }
    }
}
