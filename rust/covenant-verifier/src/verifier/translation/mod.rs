//! The translators from contract IR to IVL, and the context object they
//! thread through every call.
//!
//! The context owns all mutable translation state: the IVL builder with its
//! declared sorts, the position registry, per-function local bindings, the
//! label stacks for `break`/`continue`, the old-state stack, and the
//! program scope used to resolve interface members. Scoped state is pushed
//! and popped through closure helpers so frames unwind on error returns.

pub mod expression;
pub mod function;
pub mod program;
pub mod resource;
pub mod specification;
pub mod state;
pub mod statement;
pub mod types;

use std::collections::HashMap;

use thiserror::Error;

use covenant_core::span::Span;

use crate::verifier::annotate::TypeTable;
use crate::verifier::ast::{Expr as AstExpr, Function, Interface, Program};
use crate::verifier::ivl::{Expr, Ivl, LocalVarDecl, Sort};
use crate::verifier::positions::{ErrorInfo, ModelTransform, Position, PositionRegistry, Via};
use crate::verifier::rules::{Rules, NO_RULES};
use crate::verifier::types::Type;

use self::state::StateBundle;

#[derive(Debug, Error)]
pub enum TranslationError {
    #[error("invalid program ({code}) at line {}: {message}", .span.line)]
    InvalidProgram {
        code: &'static str,
        message: String,
        span: Span,
    },
    #[error("unsupported at line {}: {message}", .span.line)]
    Unsupported { message: String, span: Span },
    #[error("impure construct in specification at line {}", .span.line)]
    PurityViolation { span: Span },
    #[error("internal translation error: {0}")]
    Internal(String),
}

impl TranslationError {
    pub fn unsupported(message: &str, span: Span) -> Self {
        Self::Unsupported { message: message.to_string(), span }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

/// Virtual state of one `try` statement: where its `finally` dispatch
/// lives and the synthetic variables it switches on.
#[derive(Debug, Clone)]
pub struct TryFrame {
    pub finally_label: String,
    pub post_label: String,
    /// 0 = fallthrough, 1 = return, 2 = exception.
    pub mode_var: String,
    pub error_var: String,
}

/// A source variable bound to a mangled IVL local.
#[derive(Debug, Clone)]
pub struct TranslatedVar {
    pub name: String,
    pub ivl_name: String,
    pub ty: Type,
    pub sort: Sort,
}

impl TranslatedVar {
    pub fn decl(&self) -> LocalVarDecl {
        LocalVarDecl::new(&self.ivl_name, self.sort.clone())
    }

    pub fn local_var(&self, ivl: &Ivl, pos: Position) -> Expr {
        ivl.local_var(&self.ivl_name, self.sort.clone(), pos)
    }
}

/// Mutable state of one translation run. One context per contract; node
/// identifiers are allocated from its registry and nowhere else.
pub struct Context<'a> {
    pub program: &'a Program,
    pub types: &'a TypeTable,
    pub ivl: Ivl,
    pub registry: PositionRegistry,

    /// The function currently being encoded. Owned, because synthesized
    /// functions (the default constructor) are not part of the program map.
    pub function: Option<Function>,
    pub args: HashMap<String, TranslatedVar>,
    pub locals: HashMap<String, TranslatedVar>,
    pub quantified: HashMap<String, TranslatedVar>,
    /// Declarations accumulated for the current method.
    pub new_local_vars: Vec<LocalVarDecl>,
    pub result_var: Option<TranslatedVar>,
    pub success_var: Option<TranslatedVar>,

    pub return_label: String,
    pub revert_label: String,
    break_labels: Vec<String>,
    continue_labels: Vec<String>,

    /// Current state bundle; `old`/`public_old` snapshots behind it.
    pub current_state: Option<StateBundle>,
    old_states: Vec<StateBundle>,
    pub public_old_state: Option<StateBundle>,

    /// Loop bookkeeping, keyed by loop variable name.
    pub loop_arrays: HashMap<String, Expr>,
    pub loop_indices: HashMap<String, TranslatedVar>,

    /// Interface scope stack for resolving resources and ghost functions.
    program_scopes: Vec<&'a Interface>,

    /// Enclosing `try` blocks, innermost last.
    try_frames: Vec<TryFrame>,

    /// True while translating a specification-only construct.
    pub in_spec: bool,

    counter: u64,
}

impl<'a> Context<'a> {
    pub fn new(program: &'a Program, types: &'a TypeTable) -> Self {
        Self {
            program,
            types,
            ivl: Ivl::new(),
            registry: PositionRegistry::new(),
            function: None,
            args: HashMap::new(),
            locals: HashMap::new(),
            quantified: HashMap::new(),
            new_local_vars: Vec::new(),
            result_var: None,
            success_var: None,
            return_label: "return".to_string(),
            revert_label: "revert".to_string(),
            break_labels: Vec::new(),
            continue_labels: Vec::new(),
            current_state: None,
            old_states: Vec::new(),
            public_old_state: None,
            loop_arrays: HashMap::new(),
            loop_indices: HashMap::new(),
            program_scopes: Vec::new(),
            try_frames: Vec::new(),
            in_spec: false,
            counter: 0,
        }
    }

    // ── Fresh names ─────────────────────────────────────────────────

    fn fresh(&mut self) -> u64 {
        self.counter += 1;
        self.counter
    }

    pub fn new_local_var_name(&mut self, name: &str) -> String {
        let k = self.fresh();
        format!("l${}${}", name, k)
    }

    pub fn fresh_label(&mut self, prefix: &str) -> String {
        let k = self.fresh();
        format!("{}_{}", prefix, k)
    }

    /// Declare a fresh, unconstrained variable; reading it is a havoc.
    pub fn havoc_var(&mut self, sort: Sort) -> Expr {
        let name = format!("$havoc${}", self.fresh());
        self.new_local_vars.push(LocalVarDecl::new(&name, sort.clone()));
        self.ivl.local_var(&name, sort, Position::None)
    }

    // ── Positions ───────────────────────────────────────────────────

    pub fn to_position(&mut self, node: &AstExpr) -> Position {
        let function = self.function.as_ref().map(|f| f.name.clone());
        self.registry
            .to_position(node.span, node.to_string(), function.as_deref())
    }

    pub fn to_position_with_rules(&mut self, node: &AstExpr, rules: Rules) -> Position {
        let function = self.function.as_ref().map(|f| f.name.clone());
        self.registry
            .to_position_with_rules(node.span, node.to_string(), function.as_deref(), rules)
    }

    pub fn span_position(&mut self, span: Span, text: &str, rules: Rules) -> Position {
        self.registry.register(ErrorInfo {
            function: self.function.as_ref().map(|f| f.name.clone()),
            span,
            text: text.to_string(),
            resource: None,
            vias: Vec::new(),
            rules,
            model: None,
        })
    }

    pub fn position_with_vias(&mut self, node: &AstExpr, rules: Rules, vias: Vec<Via>) -> Position {
        self.registry.register(ErrorInfo {
            function: self.function.as_ref().map(|f| f.name.clone()),
            span: node.span,
            text: node.to_string(),
            resource: None,
            vias,
            rules,
            model: None,
        })
    }

    pub fn position_with_model(&mut self, node: &AstExpr, modelt: ModelTransform) -> Position {
        self.registry.register(ErrorInfo {
            function: self.function.as_ref().map(|f| f.name.clone()),
            span: node.span,
            text: node.to_string(),
            resource: None,
            vias: Vec::new(),
            rules: NO_RULES,
            model: Some(modelt),
        })
    }

    pub fn no_position(&self) -> Position {
        Position::None
    }

    // ── Types ───────────────────────────────────────────────────────

    /// The annotated type of a node. Absence is a bug in pass ordering.
    pub fn type_of(&self, expr: &AstExpr) -> Result<Type, TranslationError> {
        self.types
            .type_of(expr)
            .cloned()
            .ok_or_else(|| TranslationError::internal(format!("untyped node: {}", expr)))
    }

    // ── Variable lookup ─────────────────────────────────────────────

    pub fn lookup_var(&self, name: &str) -> Option<&TranslatedVar> {
        self.quantified
            .get(name)
            .or_else(|| self.locals.get(name))
            .or_else(|| self.args.get(name))
    }

    // ── State bundle stack ──────────────────────────────────────────

    pub fn state(&self) -> Result<&StateBundle, TranslationError> {
        self.current_state
            .as_ref()
            .ok_or_else(|| TranslationError::internal("no current state bundle"))
    }

    pub fn old_state(&self) -> Option<&StateBundle> {
        self.old_states.last()
    }

    /// Translate `f` with `snapshot` as the current state. Used for
    /// `old(…)` bodies and havoc re-framing.
    pub fn with_state<R>(
        &mut self,
        snapshot: StateBundle,
        f: impl FnOnce(&mut Self) -> R,
    ) -> R {
        let saved = self.current_state.replace(snapshot);
        let out = f(self);
        self.current_state = saved;
        out
    }

    /// Push a fresh old-state snapshot for the dynamic extent of `f`.
    pub fn with_old_state<R>(
        &mut self,
        snapshot: StateBundle,
        f: impl FnOnce(&mut Self) -> R,
    ) -> R {
        self.old_states.push(snapshot);
        let out = f(self);
        self.old_states.pop();
        out
    }

    // ── Label scopes ────────────────────────────────────────────────

    pub fn break_label(&self) -> Result<&str, TranslationError> {
        self.break_labels
            .last()
            .map(String::as_str)
            .ok_or_else(|| TranslationError::internal("break outside of loop"))
    }

    pub fn continue_label(&self) -> Result<&str, TranslationError> {
        self.continue_labels
            .last()
            .map(String::as_str)
            .ok_or_else(|| TranslationError::internal("continue outside of loop"))
    }

    pub fn with_break_scope<R>(&mut self, f: impl FnOnce(&mut Self, String) -> R) -> R {
        let label = self.fresh_label("loop_end");
        self.break_labels.push(label.clone());
        let out = f(self, label);
        self.break_labels.pop();
        out
    }

    pub fn with_continue_scope<R>(&mut self, f: impl FnOnce(&mut Self, String) -> R) -> R {
        let label = self.fresh_label("loop_continue");
        self.continue_labels.push(label.clone());
        let out = f(self, label);
        self.continue_labels.pop();
        out
    }

    // ── Try frames ──────────────────────────────────────────────────

    pub fn innermost_try(&self) -> Option<&TryFrame> {
        self.try_frames.last()
    }

    /// The frame enclosing `frame`, if any.
    pub fn enclosing_try(&self, frame: &TryFrame) -> Option<&TryFrame> {
        let idx = self
            .try_frames
            .iter()
            .position(|f| f.finally_label == frame.finally_label)?;
        idx.checked_sub(1).map(|i| &self.try_frames[i])
    }

    pub fn with_try_frame<R>(
        &mut self,
        frame: TryFrame,
        f: impl FnOnce(&mut Self) -> R,
    ) -> R {
        self.try_frames.push(frame);
        let out = f(self);
        self.try_frames.pop();
        out
    }

    // ── Program scope ───────────────────────────────────────────────

    /// Resolve names inside `interface` for the dynamic extent of `f`.
    pub fn with_program_scope<R>(
        &mut self,
        interface: &'a Interface,
        f: impl FnOnce(&mut Self) -> R,
    ) -> R {
        self.program_scopes.push(interface);
        let out = f(self);
        self.program_scopes.pop();
        out
    }

    pub fn current_scope(&self) -> Option<&'a Interface> {
        self.program_scopes.last().copied()
    }

    /// The resource `name` as seen from the current scope: the innermost
    /// interface scope first, then the contract itself.
    pub fn scoped_resource(&self, name: &str) -> Option<crate::verifier::ast::ResourceDecl> {
        if let Some(interface) = self.current_scope() {
            if let Some(decl) = interface.own_resources.get(name) {
                return Some(decl.clone());
            }
        }
        self.program.resource(name).cloned()
    }

    // ── Spec mode ───────────────────────────────────────────────────

    pub fn with_spec_mode<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        let saved = self.in_spec;
        self.in_spec = true;
        let out = f(self);
        self.in_spec = saved;
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verifier::annotate::TypeTable;

    #[test]
    fn scoped_labels_unwind() {
        let program = Program::empty("t.cov");
        let types = TypeTable::new();
        let mut ctx = Context::new(&program, &types);
        assert!(ctx.break_label().is_err());
        ctx.with_break_scope(|ctx, label| {
            assert_eq!(ctx.break_label().unwrap(), label);
        });
        assert!(ctx.break_label().is_err());
    }

    #[test]
    fn fresh_names_do_not_collide() {
        let program = Program::empty("t.cov");
        let types = TypeTable::new();
        let mut ctx = Context::new(&program, &types);
        let a = ctx.new_local_var_name("x");
        let b = ctx.new_local_var_name("x");
        assert_ne!(a, b);
    }

    #[test]
    fn havoc_vars_are_declared() {
        let program = Program::empty("t.cov");
        let types = TypeTable::new();
        let mut ctx = Context::new(&program, &types);
        let h = ctx.havoc_var(Sort::Int);
        assert_eq!(h.sort, Sort::Int);
        assert_eq!(ctx.new_local_vars.len(), 1);
    }
}
