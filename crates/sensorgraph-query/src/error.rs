use thiserror::Error;

/// Filter or navigation expression that does not fit the schema.
///
/// Every variant names the entity type and the offending property, relation,
/// or function so the caller can correct the request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("unknown entity type `{name}`")]
    UnknownEntityType { name: String },

    #[error("`{entity_type}` has no property `{property}`")]
    UnknownProperty {
        entity_type: String,
        property: String,
    },

    #[error("`{entity_type}` has no relation `{relation}`")]
    UnknownRelation {
        entity_type: String,
        relation: String,
    },

    #[error("unsupported function `{name}`")]
    UnsupportedFunction { name: String },

    #[error("function `{name}` takes {expected} argument(s), got {found}")]
    FunctionArity {
        name: String,
        expected: usize,
        found: usize,
    },

    #[error("invalid arguments to `{name}`: {reason}")]
    InvalidFunctionArguments { name: String, reason: String },

    #[error("cannot compare `{entity_type}.{property}` ({expected}) with {found}")]
    IncompatibleLiteral {
        entity_type: String,
        property: String,
        expected: String,
        found: String,
    },

    #[error("`{op}` expects {expected} operand(s), got {found}")]
    LogicalArity {
        op: String,
        expected: String,
        found: usize,
    },

    #[error("navigation chain of {depth} relations exceeds the limit of {max}")]
    NavigationTooDeep { depth: usize, max: usize },

    #[error("empty property path")]
    EmptyPath,
}

/// Failure inside the in-memory reference store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unknown table `{0}`")]
    UnknownTable(String),

    #[error("unsupported operand: {0}")]
    UnsupportedOperand(String),

    #[error("expected at most one row in `{table}`, found {count}")]
    NotUnique { table: String, count: u64 },

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error("failed to decode store: {0}")]
    Decode(#[from] serde_json::Error),
}
