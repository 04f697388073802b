//! Type annotation for contract expressions and statements.
//!
//! Walks every function body together with its attached specifications and
//! records a concrete type for each expression node in a [`TypeTable`]
//! keyed by node identity. The IR itself is never mutated.

use std::collections::HashMap;

use num_bigint::BigInt;
use num_traits::ToPrimitive;
use thiserror::Error;

use crate::verifier::ast::*;
use crate::verifier::names;
use crate::verifier::types::{StructType, Type, TypeBuilder};

#[derive(Debug, Error)]
pub enum TypeAnnotationError {
    #[error("type mismatch at line {line}: expected {expected}, got {actual}")]
    Mismatch {
        expected: String,
        actual: String,
        line: usize,
    },
    #[error("undefined name '{name}' at line {line}")]
    UndefinedName { name: String, line: usize },
    #[error("unknown field '{field}' on type '{ty}' at line {line}")]
    UnknownField {
        field: String,
        ty: String,
        line: usize,
    },
    #[error("type '{ty}' is not subscriptable at line {line}")]
    NotSubscriptable { ty: String, line: usize },
    #[error("unknown function '{name}' at line {line}")]
    UnknownFunction { name: String, line: usize },
    #[error("wrong number of arguments to '{name}' at line {line}: expected {expected}, got {actual}")]
    ArgCount {
        name: String,
        expected: usize,
        actual: usize,
        line: usize,
    },
    #[error("'{name}' requires a constant bound at line {line}")]
    ConstantRequired { name: String, line: usize },
    #[error("unknown type annotation at line {line}")]
    UnknownType { line: usize },
    #[error("'result' outside a function with a return type at line {line}")]
    ResultOutsideFunction { line: usize },
    #[error("operator not defined on type '{ty}' at line {line}")]
    BadOperand { ty: String, line: usize },
}

// ── Type table ──────────────────────────────────────────────────────

/// The side table produced by annotation: one concrete type per reachable
/// expression node.
#[derive(Debug, Default)]
pub struct TypeTable {
    map: HashMap<NodeId, Type>,
}

impl TypeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: NodeId, ty: Type) {
        self.map.insert(id, ty);
    }

    pub fn get(&self, id: NodeId) -> Option<&Type> {
        self.map.get(&id)
    }

    /// The type of an annotated expression. `None` means annotation never
    /// reached the node, which is a bug in the caller's pass ordering.
    pub fn type_of(&self, expr: &Expr) -> Option<&Type> {
        self.map.get(&expr.id)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

// ── Annotator ───────────────────────────────────────────────────────

pub struct TypeAnnotator<'a> {
    program: &'a Program,
    current_func: Option<&'a Function>,
    /// Innermost scope last: quantifier binders shadow locals and args.
    quantified: Vec<HashMap<String, Type>>,
    locals: HashMap<String, Type>,
    table: TypeTable,
}

/// Annotate the whole program: every function with its specifications, the
/// contract invariants, the general specifications, and the lemmas.
pub fn annotate_program(program: &Program) -> Result<TypeTable, TypeAnnotationError> {
    let mut annotator = TypeAnnotator::new(program);
    annotator.run()?;
    Ok(annotator.table)
}

impl<'a> TypeAnnotator<'a> {
    pub fn new(program: &'a Program) -> Self {
        Self {
            program,
            current_func: None,
            quantified: Vec::new(),
            locals: HashMap::new(),
            table: TypeTable::new(),
        }
    }

    fn run(&mut self) -> Result<(), TypeAnnotationError> {
        let functions: Vec<&Function> = self.program.functions.values().collect();
        for function in functions {
            self.current_func = Some(function);
            self.locals.clear();
            for arg in &function.args {
                if let Some(default) = &arg.default {
                    self.annotate(default, Some(&arg.ty))?;
                }
            }
            self.annotate_stmts(&function.body)?;
            for spec in function
                .preconditions
                .iter()
                .chain(&function.postconditions)
                .chain(&function.checks)
            {
                self.annotate(spec, Some(&Type::Bool))?;
            }
            for performs in &function.performs {
                self.annotate(performs, None)?;
            }
            self.current_func = None;
            self.locals.clear();
        }

        for inv in self
            .program
            .invariants
            .iter()
            .chain(&self.program.inter_contract_invariants)
            .chain(&self.program.general_postconditions)
            .chain(&self.program.transitive_postconditions)
            .chain(&self.program.general_checks)
        {
            self.annotate(inv, Some(&Type::Bool))?;
        }

        let lemmas: Vec<&Lemma> = self.program.lemmas.values().collect();
        for lemma in lemmas {
            let mut binders = HashMap::new();
            for arg in &lemma.args {
                binders.insert(arg.name.clone(), arg.ty.clone());
            }
            self.quantified.push(binders);
            for expr in lemma.preconditions.iter().chain(&lemma.body) {
                self.annotate(expr, Some(&Type::Bool))?;
            }
            self.quantified.pop();
        }

        Ok(())
    }

    // ── Statements ──────────────────────────────────────────────────

    fn annotate_stmts(&mut self, stmts: &[Stmt]) -> Result<(), TypeAnnotationError> {
        for stmt in stmts {
            self.annotate_stmt(stmt)?;
        }
        Ok(())
    }

    fn annotate_stmt(&mut self, stmt: &Stmt) -> Result<(), TypeAnnotationError> {
        match &stmt.kind {
            StmtKind::LocalDecl { name, ty, value } => {
                self.locals.insert(name.clone(), ty.clone());
                if let Some(value) = value {
                    self.annotate(value, Some(ty))?;
                }
                Ok(())
            }
            StmtKind::Assign { target, value } => {
                let target_ty = self.annotate(target, None)?;
                self.annotate(value, Some(&target_ty))?;
                Ok(())
            }
            // The operation is checked against the lhs declared type; the
            // rhs is converted, never the other way around.
            StmtKind::AugAssign { target, value, .. } => {
                let target_ty = self.annotate(target, None)?;
                self.annotate(value, Some(&target_ty))?;
                Ok(())
            }
            StmtKind::ExprStmt { value } => {
                self.annotate(value, None)?;
                Ok(())
            }
            StmtKind::Log { event, args } => {
                let event_decl = self.program.events.get(event).ok_or_else(|| {
                    TypeAnnotationError::UndefinedName { name: event.clone(), line: stmt.span.line }
                })?;
                if event_decl.arg_types.len() != args.len() {
                    return Err(TypeAnnotationError::ArgCount {
                        name: event.clone(),
                        expected: event_decl.arg_types.len(),
                        actual: args.len(),
                        line: stmt.span.line,
                    });
                }
                let arg_types = event_decl.arg_types.clone();
                for (arg, ty) in args.iter().zip(&arg_types) {
                    self.annotate(arg, Some(ty))?;
                }
                Ok(())
            }
            StmtKind::If { test, body, orelse } => {
                self.annotate(test, Some(&Type::Bool))?;
                self.annotate_stmts(body)?;
                self.annotate_stmts(orelse)
            }
            StmtKind::For { target, iter, invariants, body, .. } => {
                let iter_ty = self.annotate(iter, None)?;
                let elem_ty = match &iter_ty {
                    Type::Array(elem, _) => (**elem).clone(),
                    other => {
                        return Err(TypeAnnotationError::Mismatch {
                            expected: "an array".to_string(),
                            actual: other.to_string(),
                            line: stmt.span.line,
                        })
                    }
                };
                self.locals.insert(target.clone(), elem_ty);
                for inv in invariants {
                    self.annotate(inv, Some(&Type::Bool))?;
                }
                self.annotate_stmts(body)
            }
            StmtKind::Raise { msg } => {
                if let Some(msg) = msg {
                    if !msg.is_unreachable_marker() {
                        self.annotate(msg, None)?;
                    }
                }
                Ok(())
            }
            StmtKind::Assert { test, msg, .. } => {
                self.annotate(test, Some(&Type::Bool))?;
                if let Some(msg) = msg {
                    if !msg.is_unreachable_marker() {
                        self.annotate(msg, None)?;
                    }
                }
                Ok(())
            }
            StmtKind::Return { value } => {
                if let Some(value) = value {
                    let ret = self.current_func.and_then(|f| f.ret.clone());
                    self.annotate(value, ret.as_ref())?;
                }
                Ok(())
            }
            StmtKind::Break | StmtKind::Continue | StmtKind::Pass => Ok(()),
            StmtKind::Try { body, handlers, finally } => {
                self.annotate_stmts(body)?;
                for handler in handlers {
                    if let (Some(name), Some(ty)) = (&handler.name, &handler.exc_type) {
                        self.locals.insert(name.clone(), ty.clone());
                    }
                    self.annotate_stmts(&handler.body)?;
                }
                self.annotate_stmts(finally)
            }
        }
    }

    // ── Expressions ─────────────────────────────────────────────────

    /// Annotate `expr` under an optional expected type and return the type
    /// recorded for it.
    fn annotate(
        &mut self,
        expr: &Expr,
        expected: Option<&Type>,
    ) -> Result<Type, TypeAnnotationError> {
        let ty = self.annotate_kind(expr, expected)?;
        self.table.insert(expr.id, ty.clone());
        Ok(ty)
    }

    fn annotate_kind(
        &mut self,
        expr: &Expr,
        expected: Option<&Type>,
    ) -> Result<Type, TypeAnnotationError> {
        let line = expr.span.line;
        match &expr.kind {
            // Literals take their type from context where the context is
            // integer-sorted.
            ExprKind::Int(_) => match expected {
                Some(ty) if ty.is_integer() => Ok(ty.clone()),
                _ => Ok(Type::int128()),
            },
            ExprKind::Bool(_) => Ok(Type::Bool),
            ExprKind::Str(s) => Ok(Type::Bytes(s.len())),
            ExprKind::Name(name) => self.resolve_name(name, line),
            ExprKind::Attribute { value, attr } => self.annotate_attribute(value, attr, line),
            ExprKind::Subscript { value, index } => {
                let value_ty = self.annotate(value, None)?;
                match value_ty {
                    Type::Map(key, val) => {
                        self.annotate(index, Some(&key))?;
                        Ok(*val)
                    }
                    Type::Array(elem, _) => {
                        self.annotate(index, Some(&Type::uint256()))?;
                        Ok(*elem)
                    }
                    other => Err(TypeAnnotationError::NotSubscriptable {
                        ty: other.to_string(),
                        line,
                    }),
                }
            }
            ExprKind::Binary { left, right, .. } => {
                let lt = self.annotate(left, expected)?;
                let rt = self.annotate(right, expected)?;
                if !lt.is_integer() {
                    return Err(TypeAnnotationError::BadOperand { ty: lt.to_string(), line });
                }
                if !rt.is_integer() {
                    return Err(TypeAnnotationError::BadOperand { ty: rt.to_string(), line });
                }
                // The wider compatible width wins; re-annotate the narrower
                // side so literals adopt the common type.
                let joined = lt.join_arith(&rt).unwrap_or(lt);
                self.annotate(left, Some(&joined))?;
                self.annotate(right, Some(&joined))?;
                Ok(joined)
            }
            ExprKind::Unary { op, operand } => match op {
                UnOp::Neg => {
                    let ty = self.annotate(operand, expected)?;
                    if !ty.is_integer() {
                        return Err(TypeAnnotationError::BadOperand { ty: ty.to_string(), line });
                    }
                    Ok(ty)
                }
                UnOp::Not => {
                    self.annotate(operand, Some(&Type::Bool))?;
                    Ok(Type::Bool)
                }
            },
            ExprKind::BoolExpr { left, right, .. } => {
                self.annotate(left, Some(&Type::Bool))?;
                self.annotate(right, Some(&Type::Bool))?;
                Ok(Type::Bool)
            }
            ExprKind::Compare { left, right, .. } => {
                // Comparators share a common type, directed by the left.
                let lt = self.annotate(left, None)?;
                self.annotate(right, Some(&lt))?;
                Ok(Type::Bool)
            }
            ExprKind::IfExpr { test, then, orelse } => {
                self.annotate(test, Some(&Type::Bool))?;
                let ty = self.annotate(then, expected)?;
                self.annotate(orelse, Some(&ty))?;
                Ok(ty)
            }
            ExprKind::Call { name, args, keywords, resource } => {
                self.annotate_call(expr, name, args, keywords, resource.as_deref(), expected, line)
            }
            ExprKind::ReceiverCall { receiver, name, args } => {
                self.annotate_receiver_call(receiver, name, args, line)
            }
            ExprKind::StructInit { name, fields } => {
                let st = self.program.structs.get(name).cloned().ok_or_else(|| {
                    TypeAnnotationError::UndefinedName { name: name.clone(), line }
                })?;
                for (field, value) in fields {
                    let field_ty = st.field_type(field).cloned().ok_or_else(|| {
                        TypeAnnotationError::UnknownField {
                            field: field.clone(),
                            ty: name.clone(),
                            line,
                        }
                    })?;
                    self.annotate(value, Some(&field_ty))?;
                }
                Ok(Type::Struct(st))
            }
            ExprKind::Forall { vars, triggers, body } => {
                let mut binders = HashMap::new();
                {
                    let structs = |name: &str| self.program.structs.get(name).cloned();
                    let interfaces = |name: &str| self.program.interfaces.contains_key(name);
                    let builder = TypeBuilder::new(&structs, &interfaces);
                    for (name, ann) in vars {
                        let ty = builder
                            .build(ann)
                            .ok_or(TypeAnnotationError::UnknownType { line })?;
                        binders.insert(name.clone(), ty);
                    }
                }
                self.quantified.push(binders);
                let result = (|| {
                    for trigger in triggers {
                        for part in trigger {
                            self.annotate(part, None)?;
                        }
                    }
                    self.annotate(body, Some(&Type::Bool))
                })();
                self.quantified.pop();
                result?;
                Ok(Type::Bool)
            }
            ExprKind::Old(inner) | ExprKind::PublicOld(inner) => self.annotate(inner, expected),
        }
    }

    fn resolve_name(&self, name: &str, line: usize) -> Result<Type, TypeAnnotationError> {
        for scope in self.quantified.iter().rev() {
            if let Some(ty) = scope.get(name) {
                return Ok(ty.clone());
            }
        }
        if let Some(func) = self.current_func {
            if let Some(arg) = func.args.iter().find(|a| a.name == name) {
                return Ok(arg.ty.clone());
            }
        }
        if let Some(ty) = self.locals.get(name) {
            return Ok(ty.clone());
        }
        if self.program.contracts.contains_key(name) {
            return Ok(Type::Contract(name.to_string()));
        }
        if self.program.interfaces.contains_key(name) {
            return Ok(Type::Interface(name.to_string()));
        }
        Err(TypeAnnotationError::UndefinedName { name: name.to_string(), line })
    }

    fn annotate_attribute(
        &mut self,
        value: &Expr,
        attr: &str,
        line: usize,
    ) -> Result<Type, TypeAnnotationError> {
        // `self`, `msg` and `block` are not expressions of their own; the
        // attribute is resolved directly against the environment.
        if let ExprKind::Name(name) = &value.kind {
            match name.as_str() {
                names::SELF => {
                    if attr == names::SELF_BALANCE {
                        return Ok(Type::wei());
                    }
                    return self
                        .program
                        .state_type(attr)
                        .cloned()
                        .ok_or_else(|| TypeAnnotationError::UnknownField {
                            field: attr.to_string(),
                            ty: names::SELF.to_string(),
                            line,
                        });
                }
                names::MSG => {
                    return match attr {
                        names::MSG_SENDER => Ok(Type::Address),
                        names::MSG_VALUE => Ok(Type::wei()),
                        _ => Err(TypeAnnotationError::UnknownField {
                            field: attr.to_string(),
                            ty: names::MSG.to_string(),
                            line,
                        }),
                    };
                }
                names::BLOCK => {
                    return match attr {
                        names::BLOCK_TIMESTAMP => Ok(Type::uint256()),
                        _ => Err(TypeAnnotationError::UnknownField {
                            field: attr.to_string(),
                            ty: names::BLOCK.to_string(),
                            line,
                        }),
                    };
                }
                _ => {}
            }
        }

        let value_ty = self.annotate(value, None)?;
        match &value_ty {
            Type::Struct(st) | Type::Resource(st) => {
                st.field_type(attr).cloned().ok_or_else(|| TypeAnnotationError::UnknownField {
                    field: attr.to_string(),
                    ty: st.name.clone(),
                    line,
                })
            }
            // `Interface.resource` in specification contexts.
            Type::Interface(iface) => {
                let decl = self
                    .program
                    .interfaces
                    .get(iface)
                    .and_then(|i| i.own_resources.get(attr))
                    .or_else(|| self.program.resources.get(attr).and_then(|rs| rs.first()));
                decl.map(|d| Type::Resource(d.instance_type())).ok_or_else(|| {
                    TypeAnnotationError::UnknownField {
                        field: attr.to_string(),
                        ty: iface.clone(),
                        line,
                    }
                })
            }
            other => Err(TypeAnnotationError::UnknownField {
                field: attr.to_string(),
                ty: other.to_string(),
                line,
            }),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn annotate_call(
        &mut self,
        call: &Expr,
        name: &str,
        args: &[Expr],
        keywords: &[(String, Expr)],
        resource: Option<&Expr>,
        expected: Option<&Type>,
        line: usize,
    ) -> Result<Type, TypeAnnotationError> {
        if let Some(resource) = resource {
            self.annotate_resource_expr(resource, line)?;
        }
        match name {
            names::MIN | names::MAX => {
                self.expect_args(name, args, 2, line)?;
                let a = self.annotate(&args[0], expected)?;
                let b = self.annotate(&args[1], expected)?;
                let joined = a.join_arith(&b).unwrap_or(a);
                self.annotate(&args[0], Some(&joined))?;
                self.annotate(&args[1], Some(&joined))?;
                Ok(joined)
            }
            names::RANGE => {
                let size = self.constant_range_size(name, args, line)?;
                for arg in args {
                    self.annotate(arg, Some(&Type::int128()))?;
                }
                Ok(Type::Array(Box::new(Type::int128()), size))
            }
            names::SUM => {
                self.expect_args(name, args, 1, line)?;
                let arg_ty = self.annotate(&args[0], None)?;
                match arg_ty {
                    Type::Map(_, value) => Ok(*value),
                    Type::Array(elem, _) => Ok(*elem),
                    other => Err(TypeAnnotationError::Mismatch {
                        expected: "a map or array".to_string(),
                        actual: other.to_string(),
                        line,
                    }),
                }
            }
            names::LEN => {
                self.expect_args(name, args, 1, line)?;
                self.annotate(&args[0], None)?;
                Ok(Type::int128())
            }
            names::IMPLIES => {
                self.expect_args(name, args, 2, line)?;
                self.annotate(&args[0], Some(&Type::Bool))?;
                self.annotate(&args[1], Some(&Type::Bool))?;
                Ok(Type::Bool)
            }
            names::SUCCESS => {
                for (_, value) in keywords {
                    self.annotate(value, Some(&Type::Bool))?;
                }
                for arg in args {
                    self.annotate(arg, None)?;
                }
                Ok(Type::Bool)
            }
            names::RESULT => self
                .current_func
                .and_then(|f| f.ret.clone())
                .ok_or(TypeAnnotationError::ResultOutsideFunction { line }),
            names::CLEAR => {
                self.expect_args(name, args, 1, line)?;
                self.annotate(&args[0], None)
            }
            names::ALLOCATED | names::OFFERED => {
                for arg in args {
                    self.annotate_resource_or_value(arg, line)?;
                }
                for (_, value) in keywords {
                    self.annotate(value, None)?;
                }
                Ok(Type::wei())
            }
            names::TRUSTED | names::ACCESSIBLE => {
                for arg in args {
                    self.annotate(arg, None)?;
                }
                for (_, value) in keywords {
                    self.annotate(value, None)?;
                }
                Ok(Type::Bool)
            }
            names::ALLOCATE | names::REALLOCATE | names::EXCHANGE | names::OFFER | names::TRUST => {
                for arg in args {
                    self.annotate_resource_or_value(arg, line)?;
                }
                for (_, value) in keywords {
                    self.annotate(value, None)?;
                }
                Ok(Type::Bool)
            }
            names::CREATOR => {
                self.expect_args(name, args, 1, line)?;
                let inner = self.annotate_resource_expr(&args[0], line)?;
                Ok(Type::Creator(Box::new(inner)))
            }
            _ => {
                // A bare resource constructor in a specification context.
                if let Some(decl) = self.program.resource(name) {
                    let arg_types: Vec<Type> = decl.args.iter().map(|(_, t)| t.clone()).collect();
                    self.expect_args(name, args, arg_types.len(), line)?;
                    let instance = decl.instance_type();
                    for (arg, ty) in args.iter().zip(&arg_types) {
                        self.annotate(arg, Some(ty))?;
                    }
                    let _ = call;
                    return Ok(Type::Resource(instance));
                }
                Err(TypeAnnotationError::UnknownFunction { name: name.to_string(), line })
            }
        }
    }

    fn annotate_receiver_call(
        &mut self,
        receiver: &Expr,
        name: &str,
        args: &[Expr],
        line: usize,
    ) -> Result<Type, TypeAnnotationError> {
        self.annotate(receiver, None)?;
        let ghost = self
            .program
            .ghost_functions
            .get(name)
            .and_then(|gs| gs.first())
            .cloned()
            .ok_or_else(|| TypeAnnotationError::UnknownFunction { name: name.to_string(), line })?;
        self.expect_args(name, args, ghost.args.len(), line)?;
        for (arg, (_, ty)) in args.iter().zip(&ghost.args) {
            self.annotate(arg, Some(ty))?;
        }
        Ok(ghost.ret)
    }

    /// Resources appear as names (`token`), constructor calls
    /// (`token(id)`), or interface attributes (`Iface.token`).
    fn annotate_resource_expr(&mut self, expr: &Expr, line: usize) -> Result<Type, TypeAnnotationError> {
        match &expr.kind {
            ExprKind::Name(name) if name == names::WEI => {
                let ty = Type::Resource(StructType {
                    name: names::WEI.to_string(),
                    fields: vec![("$address".to_string(), Type::Address)],
                });
                self.table.insert(expr.id, ty.clone());
                Ok(ty)
            }
            ExprKind::Name(name) => {
                let decl = self.program.resource(name).ok_or_else(|| {
                    TypeAnnotationError::UndefinedName { name: name.clone(), line }
                })?;
                let ty = Type::Resource(decl.instance_type());
                self.table.insert(expr.id, ty.clone());
                Ok(ty)
            }
            _ => self.annotate(expr, None),
        }
    }

    /// Ghost built-in arguments are either resource expressions or plain
    /// values; resources cannot be annotated as ordinary names.
    fn annotate_resource_or_value(
        &mut self,
        expr: &Expr,
        line: usize,
    ) -> Result<Type, TypeAnnotationError> {
        let is_resource_name = match &expr.kind {
            ExprKind::Name(name) => {
                name == names::WEI || self.program.resource(name).is_some()
            }
            ExprKind::Call { name, .. } => self.program.resource(name).is_some(),
            _ => false,
        };
        if is_resource_name {
            self.annotate_resource_expr(expr, line)
        } else {
            self.annotate(expr, None)
        }
    }

    fn expect_args(
        &self,
        name: &str,
        args: &[Expr],
        expected: usize,
        line: usize,
    ) -> Result<(), TypeAnnotationError> {
        if args.len() != expected {
            return Err(TypeAnnotationError::ArgCount {
                name: name.to_string(),
                expected,
                actual: args.len(),
                line,
            });
        }
        Ok(())
    }

    fn constant_range_size(
        &self,
        name: &str,
        args: &[Expr],
        line: usize,
    ) -> Result<usize, TypeAnnotationError> {
        let as_const = |e: &Expr| -> Option<BigInt> {
            match &e.kind {
                ExprKind::Int(v) => Some(v.clone()),
                _ => None,
            }
        };
        let size = match args {
            [stop] => as_const(stop),
            [start, stop] => match (as_const(start), as_const(stop)) {
                (Some(a), Some(b)) => Some(b - a),
                _ => None,
            },
            _ => {
                return Err(TypeAnnotationError::ArgCount {
                    name: name.to_string(),
                    expected: 1,
                    actual: args.len(),
                    line,
                })
            }
        };
        size.and_then(|s| s.to_usize())
            .ok_or(TypeAnnotationError::ConstantRequired { name: name.to_string(), line })
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verifier::types::TypeAnnotation;
    use covenant_core::span::Span;

    fn expr(gen: &mut NodeIdGen, kind: ExprKind) -> Expr {
        Expr::new(gen.next_id(), Span::new(1, 1, 1, 5), kind)
    }

    fn program_with_state() -> Program {
        let mut program = Program::empty("test.cov");
        program.state.push(StateVar {
            name: "x".to_string(),
            ty: Type::int128(),
            span: Span::dummy(),
        });
        program
    }

    #[test]
    fn literal_adopts_expected_integer_type() {
        let program = program_with_state();
        let mut gen = NodeIdGen::new();
        let lit = expr(&mut gen, ExprKind::Int(BigInt::from(1)));
        let mut annotator = TypeAnnotator::new(&program);
        let ty = annotator.annotate(&lit, Some(&Type::uint256())).unwrap();
        assert_eq!(ty, Type::uint256());
    }

    #[test]
    fn self_attribute_resolves_state_field() {
        let program = program_with_state();
        let mut gen = NodeIdGen::new();
        let receiver = expr(&mut gen, ExprKind::Name(names::SELF.to_string()));
        let attr = expr(
            &mut gen,
            ExprKind::Attribute { value: Box::new(receiver), attr: "x".to_string() },
        );
        let mut annotator = TypeAnnotator::new(&program);
        assert_eq!(annotator.annotate(&attr, None).unwrap(), Type::int128());
    }

    #[test]
    fn msg_sender_is_address() {
        let program = program_with_state();
        let mut gen = NodeIdGen::new();
        let receiver = expr(&mut gen, ExprKind::Name(names::MSG.to_string()));
        let attr = expr(
            &mut gen,
            ExprKind::Attribute {
                value: Box::new(receiver),
                attr: names::MSG_SENDER.to_string(),
            },
        );
        let mut annotator = TypeAnnotator::new(&program);
        assert_eq!(annotator.annotate(&attr, None).unwrap(), Type::Address);
    }

    #[test]
    fn comparison_is_bool_and_shares_type() {
        let program = program_with_state();
        let mut gen = NodeIdGen::new();
        let receiver = expr(&mut gen, ExprKind::Name(names::SELF.to_string()));
        let lhs = expr(
            &mut gen,
            ExprKind::Attribute { value: Box::new(receiver), attr: "x".to_string() },
        );
        let rhs = expr(&mut gen, ExprKind::Int(BigInt::from(0)));
        let rhs_id = rhs.id;
        let cmp = expr(
            &mut gen,
            ExprKind::Compare { op: CmpOp::Ge, left: Box::new(lhs), right: Box::new(rhs) },
        );
        let mut annotator = TypeAnnotator::new(&program);
        assert_eq!(annotator.annotate(&cmp, Some(&Type::Bool)).unwrap(), Type::Bool);
        assert_eq!(annotator.table.get(rhs_id), Some(&Type::int128()));
    }

    #[test]
    fn undefined_name_is_an_error() {
        let program = program_with_state();
        let mut gen = NodeIdGen::new();
        let name = expr(&mut gen, ExprKind::Name("nope".to_string()));
        let mut annotator = TypeAnnotator::new(&program);
        assert!(matches!(
            annotator.annotate(&name, None),
            Err(TypeAnnotationError::UndefinedName { .. })
        ));
    }

    #[test]
    fn range_requires_constant_bounds() {
        let program = program_with_state();
        let mut gen = NodeIdGen::new();
        let n = expr(&mut gen, ExprKind::Name("nope".to_string()));
        let call = expr(
            &mut gen,
            ExprKind::Call {
                name: names::RANGE.to_string(),
                args: vec![n],
                keywords: vec![],
                resource: None,
            },
        );
        let mut annotator = TypeAnnotator::new(&program);
        assert!(matches!(
            annotator.annotate(&call, None),
            Err(TypeAnnotationError::ConstantRequired { .. })
        ));
    }

    #[test]
    fn range_is_an_int_array() {
        let program = program_with_state();
        let mut gen = NodeIdGen::new();
        let n = expr(&mut gen, ExprKind::Int(BigInt::from(3)));
        let call = expr(
            &mut gen,
            ExprKind::Call {
                name: names::RANGE.to_string(),
                args: vec![n],
                keywords: vec![],
                resource: None,
            },
        );
        let mut annotator = TypeAnnotator::new(&program);
        let ty = annotator.annotate(&call, None).unwrap();
        assert_eq!(ty, Type::Array(Box::new(Type::int128()), 3));
    }

    #[test]
    fn forall_binds_quantified_vars() {
        let program = program_with_state();
        let mut gen = NodeIdGen::new();
        let body_name = expr(&mut gen, ExprKind::Name("a".to_string()));
        let zero = expr(&mut gen, ExprKind::Int(BigInt::from(0)));
        let body = expr(
            &mut gen,
            ExprKind::Compare { op: CmpOp::Ge, left: Box::new(body_name), right: Box::new(zero) },
        );
        let forall = expr(
            &mut gen,
            ExprKind::Forall {
                vars: vec![("a".to_string(), TypeAnnotation::Named("uint256".to_string()))],
                triggers: vec![],
                body: Box::new(body),
            },
        );
        let mut annotator = TypeAnnotator::new(&program);
        assert_eq!(annotator.annotate(&forall, Some(&Type::Bool)).unwrap(), Type::Bool);
        // The binder is out of scope again afterwards.
        let stray = expr(&mut gen, ExprKind::Name("a".to_string()));
        assert!(annotator.annotate(&stray, None).is_err());
    }
}
