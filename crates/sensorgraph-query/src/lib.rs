//! Sensorgraph query layer.
//!
//! Turns filter trees into executable predicates:
//!
//! 1. **Property resolution** (`resolver`): a property name on an entity type
//!    becomes a stored column, a computed rule, or a relation flag.
//! 2. **Navigation** (`navigation`): a relation chain becomes nested `IN`
//!    subqueries, with hub-routed relations expanded into two levels.
//! 3. **Compilation** (`compiler`): recursive descent over the filter tree,
//!    normalizing operand order and coercing literals.
//!
//! `store` is an in-memory evaluator for compiled predicates, used as the
//! reference in tests and by the CLI.

pub mod compiler;
pub mod error;
pub mod functions;
pub mod navigation;
pub mod predicate;
pub mod resolver;
pub mod store;

pub use compiler::{CompilerConfig, PredicateCompiler};
pub use error::{CompileError, StoreError};
pub use functions::{BoolFunction, Function, Transform};
pub use navigation::{Hop, NavigationResolver};
pub use predicate::{CompiledPredicate, Operand, Predicate, Subquery};
pub use resolver::{PropertyResolver, Resolution};
pub use store::{
    MemoryStore, OrderBy, QueryExecutor, QueryOptions, RelatedCollections, Row, SortDirection,
    Table,
};
