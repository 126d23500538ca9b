//! In-memory reference store.
//!
//! Evaluates compiled predicates over plain rows with SQL three-valued logic
//! (`Some(true)`, `Some(false)`, `None` for unknown). Relation subqueries
//! (`IN`) are existence tests and always decide. It stands in for the
//! persistence layer in tests and in the CLI, and is the reference the
//! compiler's output is checked against.

use crate::compiler::PredicateCompiler;
use crate::error::{CompileError, StoreError};
use crate::predicate::{CompiledPredicate, Operand, Predicate, Subquery};
use roaring::RoaringBitmap;
use sensorgraph_schema::{
    ComparisonOp, EntityType, ForeignKey, IdentifierField, JoinStrategy, Registry, Value,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

pub type Row = BTreeMap<String, Value>;
pub type Table = BTreeMap<u32, Row>;

/// Related-collection snapshot: entity-set name → addressable ids.
pub type RelatedCollections = BTreeMap<String, BTreeSet<String>>;

// ============================================================================
// Query execution seam
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub column: String,
    #[serde(default)]
    pub direction: SortDirection,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryOptions {
    pub top: Option<usize>,
    pub skip: usize,
    pub order_by: Vec<OrderBy>,
}

/// What the persistence layer provides for compiled predicates.
pub trait QueryExecutor {
    fn find_all(
        &self,
        predicate: &CompiledPredicate,
        options: &QueryOptions,
    ) -> Result<Vec<(u32, Row)>, StoreError>;

    fn count(&self, predicate: &CompiledPredicate) -> Result<u64, StoreError>;

    fn exists(&self, predicate: &CompiledPredicate) -> Result<bool, StoreError> {
        Ok(self.count(predicate)? > 0)
    }

    /// The single matching row; more than one match is an error.
    fn find_one(&self, predicate: &CompiledPredicate) -> Result<Option<(u32, Row)>, StoreError>;
}

// ============================================================================
// Store
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryStore {
    tables: BTreeMap<String, Table>,
}

impl MemoryStore {
    /// Empty store with one table per entity type, link table, and the hub.
    pub fn for_registry(registry: &Registry) -> Self {
        let mut store = Self::default();
        store.ensure_tables(registry);
        store
    }

    /// Decode a JSON snapshot (`{"tables": {"thing": {"1": {"name": "x"}}}}`)
    /// and add any tables the registry declares but the file omits. Row
    /// values are plain JSON: RFC 3339 strings become timestamps, nested
    /// arrays and objects are kept as their JSON text.
    pub fn from_json(json: &str, registry: &Registry) -> Result<Self, StoreError> {
        #[derive(Deserialize)]
        struct Snapshot {
            #[serde(default)]
            tables: BTreeMap<String, BTreeMap<u32, serde_json::Map<String, Json>>>,
        }

        let snapshot: Snapshot = serde_json::from_str(json)?;
        let mut store = Self::default();
        for (name, rows) in snapshot.tables {
            let table = store.tables.entry(name).or_default();
            for (id, fields) in rows {
                let mut row: Row = fields
                    .into_iter()
                    .map(|(column, value)| (column, plain_value(value)))
                    .collect();
                row.insert("id".to_string(), Value::Number(f64::from(id)));
                table.insert(id, row);
            }
        }
        store.ensure_tables(registry);
        for (name, table) in &store.tables {
            debug!(table = %name, rows = table.len(), "loaded table");
        }
        Ok(store)
    }

    pub fn ensure_tables(&mut self, registry: &Registry) {
        self.tables.entry(registry.hub().table.clone()).or_default();
        for ty in registry.types() {
            self.tables.entry(ty.table.clone()).or_default();
            for relation in ty.relations() {
                if let JoinStrategy::Direct(ForeignKey::Link { table, .. }) = &relation.join {
                    self.tables.entry(table.clone()).or_default();
                }
            }
        }
    }

    /// Insert or replace a row. The key is mirrored into the `id` column.
    pub fn insert(&mut self, table: &str, id: u32, mut row: Row) -> Option<Row> {
        row.insert("id".to_string(), Value::Number(f64::from(id)));
        self.tables.entry(table.to_string()).or_default().insert(id, row)
    }

    /// Append a row under the next free key (link tables).
    pub fn append(&mut self, table: &str, row: Row) -> u32 {
        let id = self
            .tables
            .get(table)
            .and_then(|t| t.keys().next_back())
            .map_or(1, |last| last + 1);
        self.insert(table, id, row);
        id
    }

    pub fn remove(&mut self, table: &str, id: u32) -> Option<Row> {
        self.tables.get_mut(table)?.remove(&id)
    }

    pub fn row(&self, table: &str, id: u32) -> Option<&Row> {
        self.tables.get(table)?.get(&id)
    }

    pub fn table(&self, name: &str) -> Result<&Table, StoreError> {
        self.tables
            .get(name)
            .ok_or_else(|| StoreError::UnknownTable(name.to_string()))
    }

    /// Keys of every row of `table` for which `predicate` is true.
    pub fn select(&self, table: &str, predicate: &Predicate) -> Result<RoaringBitmap, StoreError> {
        let mut ids = RoaringBitmap::new();
        for (id, row) in self.table(table)? {
            if self.truth(row, predicate)? == Some(true) {
                ids.insert(*id);
            }
        }
        Ok(ids)
    }

    /// Whether row `id` exists and satisfies `predicate`.
    pub fn matches(&self, predicate: &CompiledPredicate, id: u32) -> Result<bool, StoreError> {
        match self.table(&predicate.table)?.get(&id) {
            Some(row) => Ok(self.truth(row, &predicate.predicate)? == Some(true)),
            None => Ok(false),
        }
    }

    /// Identifier clients use for row `key` of `ty`.
    pub fn addressable_id(&self, ty: &EntityType, key: u32) -> String {
        match &ty.identifier {
            IdentifierField::Key => key.to_string(),
            IdentifierField::External { column } => self
                .row(&ty.table, key)
                .and_then(|row| row.get(column))
                .and_then(value_key)
                .unwrap_or_else(|| key.to_string()),
        }
    }

    /// Snapshot of everything related to row `id` of `entity_type`, keyed by
    /// the related type's set name.
    pub fn related_collections(
        &self,
        registry: &Registry,
        entity_type: &str,
        id: u32,
    ) -> Result<RelatedCollections, StoreError> {
        let ty = registry
            .entity(entity_type)
            .ok_or_else(|| CompileError::UnknownEntityType {
                name: entity_type.to_string(),
            })?;
        let compiler = PredicateCompiler::new(registry);
        let mut out = RelatedCollections::new();
        for relation in ty.relations() {
            let target = registry.entity(&relation.target).ok_or_else(|| {
                CompileError::UnknownEntityType {
                    name: relation.target.clone(),
                }
            })?;
            let predicate = compiler.related_to(&ty.name, id, &relation.name)?;
            let keys = self.select(&predicate.table, &predicate.predicate)?;
            out.entry(target.set_name.clone())
                .or_default()
                .extend(keys.iter().map(|k| self.addressable_id(target, k)));
        }
        Ok(out)
    }

    // ------------------------------------------------------------------------
    // Evaluation
    // ------------------------------------------------------------------------

    fn operand(&self, row: &Row, operand: &Operand) -> Value {
        match operand {
            Operand::Column(column) => row.get(column).cloned().unwrap_or(Value::Null),
            Operand::Literal(value) => value.clone(),
            Operand::Transform { function, operand } => function.apply(&self.operand(row, operand)),
        }
    }

    fn truth(&self, row: &Row, predicate: &Predicate) -> Result<Option<bool>, StoreError> {
        Ok(match predicate {
            Predicate::True => Some(true),
            Predicate::False => Some(false),
            Predicate::And(parts) => {
                let mut unknown = false;
                for part in parts {
                    match self.truth(row, part)? {
                        Some(false) => return Ok(Some(false)),
                        None => unknown = true,
                        Some(true) => {}
                    }
                }
                if unknown {
                    None
                } else {
                    Some(true)
                }
            }
            Predicate::Or(parts) => {
                let mut unknown = false;
                for part in parts {
                    match self.truth(row, part)? {
                        Some(true) => return Ok(Some(true)),
                        None => unknown = true,
                        Some(false) => {}
                    }
                }
                if unknown {
                    None
                } else {
                    Some(false)
                }
            }
            Predicate::Not(inner) => self.truth(row, inner)?.map(|b| !b),
            Predicate::Compare { left, op, right } => {
                compare(&self.operand(row, left), *op, &self.operand(row, right))
            }
            Predicate::IsNull(operand) => Some(self.operand(row, operand).is_null()),
            Predicate::IsNotNull(operand) => Some(!self.operand(row, operand).is_null()),
            Predicate::Function { function, args } => {
                let [haystack, needle] = args.as_slice() else {
                    return Err(StoreError::UnsupportedOperand(format!(
                        "{function} with {} arguments",
                        args.len()
                    )));
                };
                function.apply(&self.operand(row, haystack), &self.operand(row, needle))
            }
            // Existence test: two-valued, a null key relates to nothing.
            Predicate::In { column, subquery } => {
                let value = row.get(column).cloned().unwrap_or(Value::Null);
                if value.is_null() {
                    return Ok(Some(false));
                }
                let candidates = self.subquery(subquery)?;
                Some(
                    candidates
                        .iter()
                        .any(|c| value.compare(c) == Some(Ordering::Equal)),
                )
            }
        })
    }

    /// Non-null `select` values of the rows satisfying the subquery filter.
    fn subquery(&self, subquery: &Subquery) -> Result<Vec<Value>, StoreError> {
        let mut out = Vec::new();
        for row in self.table(&subquery.table)?.values() {
            if self.truth(row, &subquery.filter)? == Some(true) {
                match row.get(&subquery.select) {
                    Some(value) if !value.is_null() => out.push(value.clone()),
                    _ => {}
                }
            }
        }
        Ok(out)
    }

    fn rows(&self, predicate: &CompiledPredicate) -> Result<Vec<(u32, Row)>, StoreError> {
        let table = self.table(&predicate.table)?;
        let ids = self.select(&predicate.table, &predicate.predicate)?;
        Ok(ids
            .iter()
            .filter_map(|id| table.get(&id).map(|row| (id, row.clone())))
            .collect())
    }
}

fn compare(left: &Value, op: ComparisonOp, right: &Value) -> Option<bool> {
    if left.is_null() || right.is_null() {
        return None;
    }
    match left.compare(right) {
        Some(ordering) => Some(op.holds(ordering)),
        // Incomparable non-null values are simply unequal.
        None => Some(op == ComparisonOp::Ne),
    }
}

fn plain_value(value: Json) -> Value {
    match value {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(b),
        Json::Number(n) => n.as_f64().map_or(Value::Null, Value::Number),
        Json::String(s) => match DateTime::parse_from_rfc3339(&s) {
            Ok(t) => Value::DateTime(t.with_timezone(&Utc)),
            Err(_) => Value::Text(s),
        },
        other => Value::Text(other.to_string()),
    }
}

fn value_key(value: &Value) -> Option<String> {
    match value {
        Value::Text(s) => Some(s.clone()),
        Value::Number(_) => value.as_key().map(|k| k.to_string()),
        _ => None,
    }
}

fn order_rows(rows: &mut [(u32, Row)], order_by: &[OrderBy]) {
    rows.sort_by(|(_, a), (_, b)| {
        for key in order_by {
            let left = a.get(&key.column).unwrap_or(&Value::Null);
            let right = b.get(&key.column).unwrap_or(&Value::Null);
            let ordering = match (left.is_null(), right.is_null()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Less,
                (false, true) => Ordering::Greater,
                (false, false) => left.compare(right).unwrap_or(Ordering::Equal),
            };
            let ordering = match key.direction {
                SortDirection::Asc => ordering,
                SortDirection::Desc => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

impl QueryExecutor for MemoryStore {
    fn find_all(
        &self,
        predicate: &CompiledPredicate,
        options: &QueryOptions,
    ) -> Result<Vec<(u32, Row)>, StoreError> {
        let mut rows = self.rows(predicate)?;
        order_rows(&mut rows, &options.order_by);
        let rows = rows.into_iter().skip(options.skip);
        Ok(match options.top {
            Some(top) => rows.take(top).collect(),
            None => rows.collect(),
        })
    }

    fn count(&self, predicate: &CompiledPredicate) -> Result<u64, StoreError> {
        Ok(self.select(&predicate.table, &predicate.predicate)?.len())
    }

    fn find_one(&self, predicate: &CompiledPredicate) -> Result<Option<(u32, Row)>, StoreError> {
        let mut rows = self.rows(predicate)?;
        if rows.len() > 1 {
            return Err(StoreError::NotUnique {
                table: predicate.table.clone(),
                count: rows.len() as u64,
            });
        }
        Ok(rows.pop())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sensorgraph_schema::{sensor_things, FilterNode};

    fn row(fields: &[(&str, Value)]) -> Row {
        fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn fixture(registry: &Registry) -> MemoryStore {
        let mut store = MemoryStore::for_registry(registry);
        store.insert("thing", 1, row(&[("name", Value::text("kitchen"))]));
        store.insert("thing", 2, row(&[("name", Value::text("garage"))]));
        store.insert("thing", 3, row(&[("name", Value::Null)]));
        store.insert("location", 10, row(&[("name", Value::text("north"))]));
        store.append(
            "thing_location",
            row(&[("thing_id", Value::number(1)), ("location_id", Value::number(10))]),
        );
        store.append(
            "thing_location",
            row(&[("thing_id", Value::number(2)), ("location_id", Value::number(10))]),
        );
        store
    }

    #[test]
    fn null_comparisons_are_unknown_not_false() {
        let registry = sensor_things();
        let store = fixture(&registry);
        let compiler = PredicateCompiler::new(&registry);
        let ne = compiler
            .compile(
                "Thing",
                &FilterNode::compare("name", ComparisonOp::Ne, Value::text("garage")),
            )
            .unwrap();
        let ids: Vec<u32> = store.select("thing", &ne.predicate).unwrap().iter().collect();
        assert_eq!(ids, vec![1]);
        // NOT of an unknown stays unknown.
        let not_ne = ne.not();
        let ids: Vec<u32> = store.select("thing", &not_ne.predicate).unwrap().iter().collect();
        assert_eq!(ids, vec![2]);
    }

    #[test]
    fn related_collections_follow_link_tables() {
        let registry = sensor_things();
        let store = fixture(&registry);
        let related = store.related_collections(&registry, "Location", 10).unwrap();
        let things: Vec<&str> = related["Things"].iter().map(String::as_str).collect();
        assert_eq!(things, vec!["1", "2"]);
        assert!(related["HistoricalLocations"].is_empty());
    }

    #[test]
    fn executor_pages_and_orders() {
        let registry = sensor_things();
        let store = fixture(&registry);
        let compiler = PredicateCompiler::new(&registry);
        let all = compiler
            .compile("Thing", &FilterNode::compare("id", ComparisonOp::Gt, Value::number(0)))
            .unwrap();
        let options = QueryOptions {
            top: Some(1),
            skip: 1,
            order_by: vec![OrderBy {
                column: "name".to_string(),
                direction: SortDirection::Desc,
            }],
        };
        let rows = store.find_all(&all, &options).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].0, 2);
        assert_eq!(store.count(&all).unwrap(), 3);
        assert!(store.exists(&all).unwrap());
        assert!(matches!(
            store.find_one(&all),
            Err(StoreError::NotUnique { count: 3, .. })
        ));
        let one = compiler.with_id("Thing", 2).unwrap();
        assert_eq!(store.find_one(&one).unwrap().map(|(id, _)| id), Some(2));
    }

    #[test]
    fn related_to_selects_through_the_link_table() {
        let registry = sensor_things();
        let store = fixture(&registry);
        let compiler = PredicateCompiler::new(&registry);
        let p = compiler.related_to("Location", 10, "Things").unwrap();
        assert_eq!(store.count(&p).unwrap(), 2);
        let p = p.and(compiler.with_id("Thing", 2).unwrap());
        assert_eq!(store.count(&p).unwrap(), 1);
    }

    #[test]
    fn null_foreign_keys_do_not_poison_negated_navigation() {
        let registry = sensor_things();
        let compiler = PredicateCompiler::new(&registry);
        let mut store = MemoryStore::for_registry(&registry);
        store.insert("datastream", 1, Row::new());
        store.insert("dataset", 1, row(&[("datastream_id", Value::number(1))]));
        store.insert("dataset", 2, row(&[("datastream_id", Value::Null)]));
        store.insert(
            "observation",
            1,
            row(&[("dataset_id", Value::number(1)), ("value", Value::number(5))]),
        );
        store.insert(
            "observation",
            2,
            row(&[("dataset_id", Value::number(2)), ("value", Value::number(15))]),
        );
        let none_large = compiler
            .compile(
                "Datastream",
                &FilterNode::not(FilterNode::compare(
                    "Observations/result",
                    ComparisonOp::Gt,
                    Value::number(10),
                )),
            )
            .unwrap();
        let ids: Vec<u32> = store
            .select("datastream", &none_large.predicate)
            .unwrap()
            .iter()
            .collect();
        assert_eq!(ids, vec![1]);

        store.insert("thing", 1, Row::new());
        store.insert("thing", 2, Row::new());
        store.insert("datastream", 1, row(&[("thing_id", Value::number(1))]));
        store.insert("datastream", 2, row(&[("thing_id", Value::Null)]));
        let without_datastreams = compiler
            .compile(
                "Thing",
                &FilterNode::compare("Datastreams", ComparisonOp::Eq, Value::Null),
            )
            .unwrap();
        let ids: Vec<u32> = store
            .select("thing", &without_datastreams.predicate)
            .unwrap()
            .iter()
            .collect();
        assert_eq!(ids, vec![2]);
    }

    #[test]
    fn json_snapshots_decode_plain_values() {
        let registry = sensor_things();
        let json = r#"{"tables": {
            "observation": {"7": {"value": 12.5, "result_time": "2024-03-01T10:00:00Z",
                                  "parameters": {"depth": 3}, "result_quality": null}}
        }}"#;
        let store = MemoryStore::from_json(json, &registry).unwrap();
        let row = store.row("observation", 7).unwrap();
        assert_eq!(row["id"], Value::number(7));
        assert_eq!(row["value"], Value::number(12.5));
        assert!(matches!(row["result_time"], Value::DateTime(_)));
        assert_eq!(row["parameters"], Value::text(r#"{"depth":3}"#));
        assert!(row["result_quality"].is_null());
        assert!(store.table("thing").unwrap().is_empty());
    }

    #[test]
    fn unknown_tables_are_errors() {
        let store = MemoryStore::default();
        assert!(matches!(
            store.select("nowhere", &Predicate::True),
            Err(StoreError::UnknownTable(_))
        ));
    }
}
