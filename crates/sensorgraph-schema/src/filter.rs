//! Filter-expression tree.
//!
//! The request parser (out of tree) produces a `FilterNode` per request; the
//! query compiler consumes it read-only. The JSON form (`serde`) is what the
//! CLI and test fixtures use.

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Operators
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl ComparisonOp {
    /// The operator that keeps the comparison's meaning when its operands
    /// swap sides: `5 < x` is `x > 5`. Equality operators are symmetric.
    pub const fn mirrored(self) -> Self {
        match self {
            ComparisonOp::Lt => ComparisonOp::Gt,
            ComparisonOp::Gt => ComparisonOp::Lt,
            ComparisonOp::Le => ComparisonOp::Ge,
            ComparisonOp::Ge => ComparisonOp::Le,
            ComparisonOp::Eq => ComparisonOp::Eq,
            ComparisonOp::Ne => ComparisonOp::Ne,
        }
    }

    pub const fn is_ordering(self) -> bool {
        !matches!(self, ComparisonOp::Eq | ComparisonOp::Ne)
    }

    pub const fn symbol(self) -> &'static str {
        match self {
            ComparisonOp::Eq => "=",
            ComparisonOp::Ne => "<>",
            ComparisonOp::Lt => "<",
            ComparisonOp::Le => "<=",
            ComparisonOp::Gt => ">",
            ComparisonOp::Ge => ">=",
        }
    }

    /// Apply the operator to an ordering result.
    pub fn holds(self, ordering: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;
        match self {
            ComparisonOp::Eq => ordering == Equal,
            ComparisonOp::Ne => ordering != Equal,
            ComparisonOp::Lt => ordering == Less,
            ComparisonOp::Le => ordering != Greater,
            ComparisonOp::Gt => ordering == Greater,
            ComparisonOp::Ge => ordering != Less,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicalOp {
    And,
    Or,
    Not,
}

// ============================================================================
// Property paths
// ============================================================================

/// A `/`-separated property path: zero or more relation names followed by
/// the property itself, e.g. `Datastream/Thing/name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct PropertyPath(Vec<String>);

impl PropertyPath {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Split into `(relation chain, property)`.
    pub fn split_last(&self) -> Option<(&[String], &str)> {
        let (last, chain) = self.0.split_last()?;
        Some((chain, last.as_str()))
    }

    /// Whether the path crosses at least one relation.
    pub fn is_navigation(&self) -> bool {
        self.0.len() > 1
    }
}

impl From<&str> for PropertyPath {
    fn from(s: &str) -> Self {
        Self(
            s.split('/')
                .filter(|seg| !seg.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }
}

impl From<String> for PropertyPath {
    fn from(s: String) -> Self {
        PropertyPath::from(s.as_str())
    }
}

impl From<PropertyPath> for String {
    fn from(p: PropertyPath) -> Self {
        p.0.join("/")
    }
}

impl fmt::Display for PropertyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}

// ============================================================================
// Filter tree
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "arg", rename_all = "snake_case")]
pub enum FunctionArg {
    Property { path: PropertyPath },
    Literal { value: Value },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub args: Vec<FunctionArg>,
}

impl FunctionCall {
    pub fn new(name: impl Into<String>, args: Vec<FunctionArg>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum FilterNode {
    /// `path op literal`, or `literal op path` when `switched` is set.
    Comparison {
        path: PropertyPath,
        op: ComparisonOp,
        literal: Value,
        #[serde(default)]
        switched: bool,
    },
    Logical {
        op: LogicalOp,
        children: Vec<FilterNode>,
    },
    /// Boolean-valued function, e.g. `startswith(name, 'T')`.
    FunctionCall(FunctionCall),
    /// Comparison whose property side goes through a transform, e.g.
    /// `year(phenomenonTime) eq 2020`.
    FunctionComparison {
        call: FunctionCall,
        op: ComparisonOp,
        literal: Value,
        #[serde(default)]
        switched: bool,
    },
    /// Inner filter evaluated on the entity reached through `relations`.
    RelatedEntityRef {
        relations: Vec<String>,
        filter: Box<FilterNode>,
    },
}

impl FilterNode {
    pub fn compare(path: impl Into<PropertyPath>, op: ComparisonOp, literal: Value) -> Self {
        FilterNode::Comparison {
            path: path.into(),
            op,
            literal,
            switched: false,
        }
    }

    /// `literal op path` as written by the client.
    pub fn compare_switched(
        literal: Value,
        op: ComparisonOp,
        path: impl Into<PropertyPath>,
    ) -> Self {
        FilterNode::Comparison {
            path: path.into(),
            op,
            literal,
            switched: true,
        }
    }

    pub fn and(children: Vec<FilterNode>) -> Self {
        FilterNode::Logical {
            op: LogicalOp::And,
            children,
        }
    }

    pub fn or(children: Vec<FilterNode>) -> Self {
        FilterNode::Logical {
            op: LogicalOp::Or,
            children,
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(child: FilterNode) -> Self {
        FilterNode::Logical {
            op: LogicalOp::Not,
            children: vec![child],
        }
    }

    pub fn call(name: impl Into<String>, args: Vec<FunctionArg>) -> Self {
        FilterNode::FunctionCall(FunctionCall::new(name, args))
    }

    pub fn related<I, S>(relations: I, filter: FilterNode) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FilterNode::RelatedEntityRef {
            relations: relations.into_iter().map(Into::into).collect(),
            filter: Box::new(filter),
        }
    }
}

impl FunctionArg {
    pub fn property(path: impl Into<PropertyPath>) -> Self {
        FunctionArg::Property { path: path.into() }
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        FunctionArg::Literal {
            value: value.into(),
        }
    }
}
