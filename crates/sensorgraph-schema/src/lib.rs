//! Sensorgraph schema: the static entity catalog and the vocabulary shared by
//! the query and subscription layers.
//!
//! This crate owns three things:
//! - `registry`: entity types, their properties and relations, and how each
//!   relation is joined in storage (direct foreign key or through the hub).
//! - `value`: the literal/value model and the coercions filters rely on.
//! - `filter`: the filter-expression tree handed to us by the request parser.
//!
//! Nothing here executes queries; the registry is built once at start-up and
//! is read-only afterwards.

pub mod catalog;
pub mod filter;
pub mod registry;
pub mod value;

pub use catalog::sensor_things;
pub use filter::{ComparisonOp, FilterNode, FunctionArg, FunctionCall, LogicalOp, PropertyPath};
pub use registry::{
    Cardinality, ComputedRule, EntityType, ForeignKey, HubDescriptor, HubLink, IdentifierField,
    JoinStrategy, PropertyDescriptor, PropertyStrategy, Registry, RegistryError,
    RelationDescriptor,
};
pub use value::{Value, ValueKind};
