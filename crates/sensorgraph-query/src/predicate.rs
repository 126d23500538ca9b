//! Compiled predicates.
//!
//! A `Predicate` is a boolean condition over the columns of one table. Cross
//! table conditions are expressed only as `column IN (SELECT ... FROM ...)`
//! subqueries keyed by primary or foreign key columns, so a predicate never
//! refers to a row outside the table it is evaluated against.

use crate::functions::{BoolFunction, Transform};
use sensorgraph_schema::{ComparisonOp, Value};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operand {
    Column(String),
    Literal(Value),
    Transform {
        function: Transform,
        operand: Box<Operand>,
    },
}

impl Operand {
    pub fn column(name: impl Into<String>) -> Self {
        Operand::Column(name.into())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subquery {
    pub table: String,
    pub select: String,
    pub filter: Predicate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Predicate {
    True,
    False,
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
    Compare {
        left: Operand,
        op: ComparisonOp,
        right: Operand,
    },
    IsNull(Operand),
    IsNotNull(Operand),
    Function {
        function: BoolFunction,
        args: Vec<Operand>,
    },
    /// `column` relates to some row of the subquery. Never unknown: null
    /// keys on either side relate to nothing.
    In {
        column: String,
        subquery: Box<Subquery>,
    },
}

impl Predicate {
    pub fn compare(left: Operand, op: ComparisonOp, right: Operand) -> Self {
        Predicate::Compare { left, op, right }
    }

    /// `column IN (SELECT select FROM table WHERE filter)`.
    pub fn in_subquery(
        column: impl Into<String>,
        table: impl Into<String>,
        select: impl Into<String>,
        filter: Predicate,
    ) -> Self {
        Predicate::In {
            column: column.into(),
            subquery: Box::new(Subquery {
                table: table.into(),
                select: select.into(),
                filter,
            }),
        }
    }

    /// Conjunction with constant folding and flattening.
    pub fn all(parts: Vec<Predicate>) -> Self {
        let mut out = Vec::with_capacity(parts.len());
        for part in parts {
            match part {
                Predicate::True => {}
                Predicate::False => return Predicate::False,
                Predicate::And(inner) => out.extend(inner),
                other => out.push(other),
            }
        }
        match out.len() {
            0 => Predicate::True,
            1 => out.pop().unwrap_or(Predicate::True),
            _ => Predicate::And(out),
        }
    }

    /// Disjunction with constant folding and flattening.
    pub fn any(parts: Vec<Predicate>) -> Self {
        let mut out = Vec::with_capacity(parts.len());
        for part in parts {
            match part {
                Predicate::False => {}
                Predicate::True => return Predicate::True,
                Predicate::Or(inner) => out.extend(inner),
                other => out.push(other),
            }
        }
        match out.len() {
            0 => Predicate::False,
            1 => out.pop().unwrap_or(Predicate::False),
            _ => Predicate::Or(out),
        }
    }

    pub fn negate(self) -> Self {
        match self {
            Predicate::True => Predicate::False,
            Predicate::False => Predicate::True,
            Predicate::Not(inner) => *inner,
            other => Predicate::Not(Box::new(other)),
        }
    }

    /// Number of `IN` subqueries, nested ones included.
    pub fn subquery_count(&self) -> usize {
        match self {
            Predicate::And(parts) | Predicate::Or(parts) => {
                parts.iter().map(Predicate::subquery_count).sum()
            }
            Predicate::Not(inner) => inner.subquery_count(),
            Predicate::In { subquery, .. } => 1 + subquery.filter.subquery_count(),
            _ => 0,
        }
    }
}

/// A predicate bound to the entity type (and table) it filters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledPredicate {
    pub entity_type: String,
    pub table: String,
    pub predicate: Predicate,
}

impl CompiledPredicate {
    pub fn new(
        entity_type: impl Into<String>,
        table: impl Into<String>,
        predicate: Predicate,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            table: table.into(),
            predicate,
        }
    }

    /// Both sides must filter the same entity type.
    pub fn and(self, other: CompiledPredicate) -> Self {
        debug_assert_eq!(self.entity_type, other.entity_type);
        let predicate = Predicate::all(vec![self.predicate, other.predicate]);
        Self::new(self.entity_type, self.table, predicate)
    }

    pub fn or(self, other: CompiledPredicate) -> Self {
        debug_assert_eq!(self.entity_type, other.entity_type);
        let predicate = Predicate::any(vec![self.predicate, other.predicate]);
        Self::new(self.entity_type, self.table, predicate)
    }

    pub fn not(self) -> Self {
        Self::new(self.entity_type, self.table, self.predicate.negate())
    }
}

// ============================================================================
// Display (SQL-like, for logs and the CLI)
// ============================================================================

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Column(c) => f.write_str(c),
            Operand::Literal(v) => write!(f, "{v}"),
            Operand::Transform { function, operand } => write!(f, "{function}({operand})"),
        }
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, parts: &[Predicate], sep: &str) -> fmt::Result {
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            f.write_str(sep)?;
        }
        match part {
            Predicate::And(_) | Predicate::Or(_) => write!(f, "({part})")?,
            _ => write!(f, "{part}")?,
        }
    }
    Ok(())
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::True => f.write_str("TRUE"),
            Predicate::False => f.write_str("FALSE"),
            Predicate::And(parts) => write_joined(f, parts, " AND "),
            Predicate::Or(parts) => write_joined(f, parts, " OR "),
            Predicate::Not(inner) => write!(f, "NOT ({inner})"),
            Predicate::Compare { left, op, right } => {
                write!(f, "{left} {} {right}", op.symbol())
            }
            Predicate::IsNull(op) => write!(f, "{op} IS NULL"),
            Predicate::IsNotNull(op) => write!(f, "{op} IS NOT NULL"),
            Predicate::Function { function, args } => {
                write!(f, "{function}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_str(")")
            }
            Predicate::In { column, subquery } => write!(
                f,
                "{column} IN (SELECT {} FROM {} WHERE {})",
                subquery.select, subquery.table, subquery.filter
            ),
        }
    }
}

impl fmt::Display for CompiledPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.table, self.predicate)
    }
}
