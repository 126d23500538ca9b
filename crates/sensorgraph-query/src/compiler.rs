//! Filter tree → compiled predicate.
//!
//! Compilation is a pure function of the filter tree and the registry: no
//! I/O, no shared mutable state, so one compiler can serve any number of
//! threads.

use crate::error::CompileError;
use crate::functions::{BoolFunction, Function, Transform};
use crate::navigation::NavigationResolver;
use crate::predicate::{CompiledPredicate, Operand, Predicate};
use crate::resolver::{PropertyResolver, Resolution};
use sensorgraph_schema::{
    ComparisonOp, ComputedRule, EntityType, FilterNode, FunctionArg, FunctionCall, LogicalOp,
    Registry, RelationDescriptor, Value, ValueKind,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// Longest relation chain accepted in a single path.
    pub max_navigation_depth: usize,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            max_navigation_depth: 8,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PredicateCompiler<'a> {
    registry: &'a Registry,
    resolver: PropertyResolver<'a>,
    navigation: NavigationResolver<'a>,
}

impl<'a> PredicateCompiler<'a> {
    pub fn new(registry: &'a Registry) -> Self {
        Self::with_config(registry, &CompilerConfig::default())
    }

    pub fn with_config(registry: &'a Registry, config: &CompilerConfig) -> Self {
        Self {
            registry,
            resolver: PropertyResolver::new(registry),
            navigation: NavigationResolver::new(registry, config.max_navigation_depth),
        }
    }

    pub fn registry(&self) -> &'a Registry {
        self.registry
    }

    pub fn resolver(&self) -> &PropertyResolver<'a> {
        &self.resolver
    }

    pub fn navigation(&self) -> &NavigationResolver<'a> {
        &self.navigation
    }

    /// Compile `filter` into a predicate over `root`.
    pub fn compile(
        &self,
        root: &str,
        filter: &FilterNode,
    ) -> Result<CompiledPredicate, CompileError> {
        let entity_type = self.resolver.entity(root)?;
        let predicate = self.node(entity_type, filter)?;
        debug!(root, predicate = %predicate, "compiled filter");
        Ok(CompiledPredicate::new(
            root,
            entity_type.table.as_str(),
            predicate,
        ))
    }

    /// Entities of `relation`'s target type reachable from the `source_type`
    /// entity with key `source_id` (`Things(52)/Locations`).
    pub fn related_to(
        &self,
        source_type: &str,
        source_id: u32,
        relation: &str,
    ) -> Result<CompiledPredicate, CompileError> {
        let source = self.resolver.entity(source_type)?;
        let forward =
            source
                .relation(relation)
                .ok_or_else(|| CompileError::UnknownRelation {
                    entity_type: source.name.clone(),
                    relation: relation.to_string(),
                })?;
        let target = self.resolver.entity(&forward.target)?;
        let inverse =
            self.registry
                .inverse(source, forward)
                .ok_or_else(|| CompileError::UnknownRelation {
                    entity_type: target.name.clone(),
                    relation: source.set_name.clone(),
                })?;
        let predicate = self.navigation.resolve_existence(
            target,
            std::slice::from_ref(&inverse.name),
            key_equals(source, source_id),
        )?;
        Ok(CompiledPredicate::new(
            target.name.as_str(),
            target.table.as_str(),
            predicate,
        ))
    }

    /// The single entity of `entity_type` with key `id`.
    pub fn with_id(&self, entity_type: &str, id: u32) -> Result<CompiledPredicate, CompileError> {
        let ty = self.resolver.entity(entity_type)?;
        Ok(CompiledPredicate::new(
            ty.name.as_str(),
            ty.table.as_str(),
            key_equals(ty, id),
        ))
    }

    // ------------------------------------------------------------------------
    // Recursive descent
    // ------------------------------------------------------------------------

    fn node(&self, ty: &'a EntityType, node: &FilterNode) -> Result<Predicate, CompileError> {
        match node {
            FilterNode::Comparison {
                path,
                op,
                literal,
                switched,
            } => {
                let op = if *switched { op.mirrored() } else { *op };
                let (chain, property) = path.split_last().ok_or(CompileError::EmptyPath)?;
                let target = self.navigation.target(ty, chain)?;
                let leaf = self.comparison(target, property, op, literal)?;
                self.navigation.resolve_existence(ty, chain, leaf)
            }
            FilterNode::Logical { op, children } => self.logical(ty, *op, children),
            FilterNode::FunctionCall(call) => self.function_call(ty, call),
            FilterNode::FunctionComparison {
                call,
                op,
                literal,
                switched,
            } => {
                let op = if *switched { op.mirrored() } else { *op };
                self.function_comparison(ty, call, op, literal)
            }
            FilterNode::RelatedEntityRef { relations, filter } => {
                if relations.is_empty() {
                    return Err(CompileError::EmptyPath);
                }
                let target = self.navigation.target(ty, relations)?;
                let inner = self.node(target, filter)?;
                self.navigation.resolve_existence(ty, relations, inner)
            }
        }
    }

    fn logical(
        &self,
        ty: &'a EntityType,
        op: LogicalOp,
        children: &[FilterNode],
    ) -> Result<Predicate, CompileError> {
        match op {
            LogicalOp::Not => {
                let [child] = children else {
                    return Err(CompileError::LogicalArity {
                        op: "not".to_string(),
                        expected: "1".to_string(),
                        found: children.len(),
                    });
                };
                Ok(self.node(ty, child)?.negate())
            }
            LogicalOp::And | LogicalOp::Or => {
                if children.is_empty() {
                    return Err(CompileError::LogicalArity {
                        op: if op == LogicalOp::And { "and" } else { "or" }.to_string(),
                        expected: "at least 1".to_string(),
                        found: 0,
                    });
                }
                let parts = children
                    .iter()
                    .map(|child| self.node(ty, child))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(if op == LogicalOp::And {
                    Predicate::all(parts)
                } else {
                    Predicate::any(parts)
                })
            }
        }
    }

    /// `property op literal` on `ty` itself; `op` is already normalized so the
    /// property is on the left.
    fn comparison(
        &self,
        ty: &'a EntityType,
        property: &str,
        op: ComparisonOp,
        literal: &Value,
    ) -> Result<Predicate, CompileError> {
        match self.resolver.resolve(ty, property)? {
            Resolution::Direct { columns, kind } => {
                let column = columns.first().ok_or_else(|| CompileError::UnknownProperty {
                    entity_type: ty.name.clone(),
                    property: property.to_string(),
                })?;
                compare_operand(ty, property, Operand::column(column.as_str()), kind, op, literal)
            }
            Resolution::Computed { rule, kind } => Ok(computed(ty, rule, kind, op, literal)),
            Resolution::RelationFlag(relation) => self.relation_flag(ty, relation, op, literal),
        }
    }

    /// Comparing a relation name against a literal compares the related
    /// entity's key. `Thing eq null` asks for entities with no related thing.
    fn relation_flag(
        &self,
        ty: &'a EntityType,
        relation: &RelationDescriptor,
        op: ComparisonOp,
        literal: &Value,
    ) -> Result<Predicate, CompileError> {
        let chain = std::slice::from_ref(&relation.name);
        let target = self.navigation.target(ty, chain)?;
        if literal.is_null() {
            let exists = self
                .navigation
                .resolve_existence(ty, chain, Predicate::True)?;
            return match op {
                ComparisonOp::Eq => Ok(exists.negate()),
                ComparisonOp::Ne => Ok(exists),
                _ => Err(incompatible(ty, &relation.name, ValueKind::Number, "null")),
            };
        }
        let leaf = compare_operand(
            target,
            &target.key_column,
            Operand::column(target.key_column.as_str()),
            ValueKind::Number,
            op,
            literal,
        )?;
        self.navigation.resolve_existence(ty, chain, leaf)
    }

    fn function_call(
        &self,
        ty: &'a EntityType,
        call: &FunctionCall,
    ) -> Result<Predicate, CompileError> {
        match lookup(call)? {
            Function::Bool { function, swapped } => self.bool_function(ty, call, function, swapped),
            Function::Transform(_) => Err(CompileError::InvalidFunctionArguments {
                name: call.name.clone(),
                reason: "returns a value and must be compared".to_string(),
            }),
        }
    }

    fn bool_function(
        &self,
        ty: &'a EntityType,
        call: &FunctionCall,
        function: BoolFunction,
        swapped: bool,
    ) -> Result<Predicate, CompileError> {
        let mut args: Vec<&FunctionArg> = call.args.iter().collect();
        if swapped {
            args.reverse();
        }
        let chain = shared_chain(call, &args)?;
        let target = self.navigation.target(ty, chain)?;
        let operands = args
            .iter()
            .map(|arg| self.string_operand(target, call, arg))
            .collect::<Result<Vec<_>, _>>()?;
        let leaf = Predicate::Function {
            function,
            args: operands,
        };
        self.navigation.resolve_existence(ty, chain, leaf)
    }

    fn string_operand(
        &self,
        ty: &'a EntityType,
        call: &FunctionCall,
        arg: &FunctionArg,
    ) -> Result<Operand, CompileError> {
        match arg {
            FunctionArg::Literal { value } => value
                .coerce(ValueKind::String)
                .map(Operand::Literal)
                .ok_or_else(|| CompileError::InvalidFunctionArguments {
                    name: call.name.clone(),
                    reason: format!("expected a string literal, got {value}"),
                }),
            FunctionArg::Property { path } => {
                let (_, property) = path.split_last().ok_or(CompileError::EmptyPath)?;
                self.column_operand(ty, call, property, ValueKind::String)
            }
        }
    }

    /// Column backing `property`, which must be a stored attribute of `kind`.
    fn column_operand(
        &self,
        ty: &'a EntityType,
        call: &FunctionCall,
        property: &str,
        kind: ValueKind,
    ) -> Result<Operand, CompileError> {
        match self.resolver.resolve(ty, property)? {
            Resolution::Direct {
                columns,
                kind: found,
            } if found == kind => columns
                .first()
                .map(|c| Operand::column(c.as_str()))
                .ok_or_else(|| CompileError::UnknownProperty {
                    entity_type: ty.name.clone(),
                    property: property.to_string(),
                }),
            other => Err(CompileError::InvalidFunctionArguments {
                name: call.name.clone(),
                reason: format!(
                    "`{}.{property}` is {}, expected a stored {kind} property",
                    ty.name,
                    other.kind()
                ),
            }),
        }
    }

    fn function_comparison(
        &self,
        ty: &'a EntityType,
        call: &FunctionCall,
        op: ComparisonOp,
        literal: &Value,
    ) -> Result<Predicate, CompileError> {
        match lookup(call)? {
            Function::Bool { .. } => {
                // `startswith(name, 'T') eq true`
                let condition = self.function_call(ty, call)?;
                let expected = literal.coerce(ValueKind::Boolean);
                match (op, expected) {
                    (ComparisonOp::Eq, Some(Value::Bool(b)))
                    | (ComparisonOp::Ne, Some(Value::Bool(b)))
                        if b == (op == ComparisonOp::Eq) =>
                    {
                        Ok(condition)
                    }
                    (ComparisonOp::Eq | ComparisonOp::Ne, Some(Value::Bool(_))) => {
                        Ok(condition.negate())
                    }
                    _ => Err(CompileError::InvalidFunctionArguments {
                        name: call.name.clone(),
                        reason: format!("cannot compare a condition {} {literal}", op.symbol()),
                    }),
                }
            }
            Function::Transform(transform) => {
                let [FunctionArg::Property { path }] = call.args.as_slice() else {
                    return Err(CompileError::InvalidFunctionArguments {
                        name: call.name.clone(),
                        reason: "expected a single property argument".to_string(),
                    });
                };
                let (chain, property) = path.split_last().ok_or(CompileError::EmptyPath)?;
                let target = self.navigation.target(ty, chain)?;
                let leaf = self.transform_comparison(target, call, transform, property, op, literal)?;
                self.navigation.resolve_existence(ty, chain, leaf)
            }
        }
    }

    fn transform_comparison(
        &self,
        ty: &'a EntityType,
        call: &FunctionCall,
        transform: Transform,
        property: &str,
        op: ComparisonOp,
        literal: &Value,
    ) -> Result<Predicate, CompileError> {
        let column = self.column_operand(ty, call, property, transform.input_kind())?;
        let operand = Operand::Transform {
            function: transform,
            operand: Box::new(column),
        };
        let label = format!("{}({property})", transform.name());
        compare_operand(ty, &label, operand, transform.output_kind(), op, literal)
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn lookup(call: &FunctionCall) -> Result<Function, CompileError> {
    let function = Function::lookup(&call.name).ok_or_else(|| CompileError::UnsupportedFunction {
        name: call.name.clone(),
    })?;
    if call.args.len() != function.arity() {
        return Err(CompileError::FunctionArity {
            name: call.name.clone(),
            expected: function.arity(),
            found: call.args.len(),
        });
    }
    Ok(function)
}

/// Relation chain shared by every property argument of a function call.
fn shared_chain<'n>(
    call: &FunctionCall,
    args: &[&'n FunctionArg],
) -> Result<&'n [String], CompileError> {
    let mut chain: Option<&'n [String]> = None;
    for &arg in args {
        if let FunctionArg::Property { path } = arg {
            let (prefix, _) = path.split_last().ok_or(CompileError::EmptyPath)?;
            match chain {
                None => chain = Some(prefix),
                Some(existing) if existing == prefix => {}
                Some(_) => {
                    return Err(CompileError::InvalidFunctionArguments {
                        name: call.name.clone(),
                        reason: "arguments navigate different relations".to_string(),
                    })
                }
            }
        }
    }
    Ok(chain.unwrap_or(&[]))
}

fn key_equals(ty: &EntityType, id: u32) -> Predicate {
    Predicate::compare(
        Operand::column(ty.key_column.as_str()),
        ComparisonOp::Eq,
        Operand::Literal(Value::Number(f64::from(id))),
    )
}

fn incompatible(ty: &EntityType, property: &str, expected: ValueKind, found: &str) -> CompileError {
    CompileError::IncompatibleLiteral {
        entity_type: ty.name.clone(),
        property: property.to_string(),
        expected: expected.to_string(),
        found: found.to_string(),
    }
}

/// `operand op literal`, with `literal` coerced to `kind`. Null literals
/// become `IS [NOT] NULL`.
fn compare_operand(
    ty: &EntityType,
    property: &str,
    operand: Operand,
    kind: ValueKind,
    op: ComparisonOp,
    literal: &Value,
) -> Result<Predicate, CompileError> {
    if literal.is_null() {
        return match op {
            ComparisonOp::Eq => Ok(Predicate::IsNull(operand)),
            ComparisonOp::Ne => Ok(Predicate::IsNotNull(operand)),
            _ => Err(incompatible(ty, property, kind, "null")),
        };
    }
    let coerced = literal.coerce(kind).ok_or_else(|| {
        let found = literal
            .kind()
            .map(|k| k.to_string())
            .unwrap_or_else(|| "null".to_string());
        incompatible(ty, property, kind, &found)
    })?;
    Ok(Predicate::compare(operand, op, Operand::Literal(coerced)))
}

/// Synthetic properties never reach storage.
fn computed(
    ty: &EntityType,
    rule: &ComputedRule,
    kind: ValueKind,
    op: ComparisonOp,
    literal: &Value,
) -> Predicate {
    match rule {
        // The operator is ignored: any comparison asks whether the literal is
        // one of the accepted spellings.
        ComputedRule::AcceptedMime { accepted } => {
            let key = Operand::column(ty.key_column.as_str());
            let hit = literal
                .as_text()
                .is_some_and(|text| accepted.iter().any(|a| a == text));
            if hit {
                Predicate::IsNotNull(key)
            } else {
                Predicate::IsNull(key)
            }
        }
        ComputedRule::Constant(value) => {
            let holds = match literal.coerce(kind) {
                Some(Value::Null) | None => op == ComparisonOp::Ne,
                Some(lit) => value.compare(&lit).is_some_and(|o| op.holds(o)),
            };
            if holds {
                Predicate::True
            } else {
                Predicate::False
            }
        }
    }
}
