//! The contract IR: the typed representation of a parsed contract that the
//! external frontend delivers and the verifier consumes.
//!
//! Nodes are immutable after parse. Expression types are not stored on the
//! nodes; the annotator builds a side table keyed by [`NodeId`] instead, so
//! shared subtrees never require interior mutability.

use std::collections::BTreeMap;

use num_bigint::BigInt;
use serde::{Deserialize, Serialize};

use covenant_core::span::Span;

use crate::verifier::types::{StructType, Type, TypeAnnotation};

/// Identity of an expression node, unique within one program.
pub type NodeId = u64;

/// Hands out fresh node ids; used by frontends and by tests that build IR
/// programmatically.
#[derive(Debug, Default)]
pub struct NodeIdGen(NodeId);

impl NodeIdGen {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&mut self) -> NodeId {
        self.0 += 1;
        self.0
    }
}

// ── Expressions ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Expr {
    pub id: NodeId,
    pub span: Span,
    pub kind: ExprKind,
}

impl Expr {
    pub fn new(id: NodeId, span: Span, kind: ExprKind) -> Self {
        Self { id, span, kind }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    /// Floor division.
    Div,
    Mod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoolOp {
    And,
    Or,
    Implies,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExprKind {
    /// Integer literal; typed by context.
    Int(BigInt),
    Bool(bool),
    /// String literal, typed as `bytes[len]`.
    Str(String),
    /// A name resolved through quantifier binders, arguments, locals, and
    /// state fields, plus the special names `self`, `msg`, `block`.
    Name(String),
    Attribute {
        value: Box<Expr>,
        attr: String,
    },
    Subscript {
        value: Box<Expr>,
        index: Box<Expr>,
    },
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnOp,
        operand: Box<Expr>,
    },
    BoolExpr {
        op: BoolOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Compare {
        op: CmpOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// Conditional expression `a if cond else b`.
    IfExpr {
        test: Box<Expr>,
        then: Box<Expr>,
        orelse: Box<Expr>,
    },
    /// A call to a built-in or ghost function. `resource` is the optional
    /// `[resource <- address]` qualifier of allocation built-ins.
    Call {
        name: String,
        args: Vec<Expr>,
        keywords: Vec<(String, Expr)>,
        resource: Option<Box<Expr>>,
    },
    /// A call through an interface receiver.
    ReceiverCall {
        receiver: Box<Expr>,
        name: String,
        args: Vec<Expr>,
    },
    StructInit {
        name: String,
        fields: Vec<(String, Expr)>,
    },
    /// `forall({x: T, ...}, trigger*, body)`.
    Forall {
        vars: Vec<(String, TypeAnnotation)>,
        triggers: Vec<Vec<Expr>>,
        body: Box<Expr>,
    },
    /// Pre-state of the current scope.
    Old(Box<Expr>),
    /// State at the last public entry point.
    PublicOld(Box<Expr>),
}

impl std::fmt::Display for BinOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
        };
        write!(f, "{}", s)
    }
}

impl std::fmt::Display for CmpOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        };
        write!(f, "{}", s)
    }
}

impl std::fmt::Display for BoolOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BoolOp::And => "and",
            BoolOp::Or => "or",
            BoolOp::Implies => "==>",
        };
        write!(f, "{}", s)
    }
}

/// Renders an expression back to (approximate) source form, for use in
/// diagnostic messages.
impl std::fmt::Display for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            ExprKind::Int(v) => write!(f, "{}", v),
            ExprKind::Bool(b) => write!(f, "{}", if *b { "True" } else { "False" }),
            ExprKind::Str(s) => write!(f, "\"{}\"", s),
            ExprKind::Name(n) => write!(f, "{}", n),
            ExprKind::Attribute { value, attr } => write!(f, "{}.{}", value, attr),
            ExprKind::Subscript { value, index } => write!(f, "{}[{}]", value, index),
            ExprKind::Binary { op, left, right } => write!(f, "{} {} {}", left, op, right),
            ExprKind::Unary { op, operand } => match op {
                UnOp::Neg => write!(f, "-{}", operand),
                UnOp::Not => write!(f, "not {}", operand),
            },
            ExprKind::BoolExpr { op, left, right } => write!(f, "{} {} {}", left, op, right),
            ExprKind::Compare { op, left, right } => write!(f, "{} {} {}", left, op, right),
            ExprKind::IfExpr { test, then, orelse } => {
                write!(f, "{} if {} else {}", then, test, orelse)
            }
            ExprKind::Call { name, args, .. } => {
                let parts: Vec<_> = args.iter().map(|a| a.to_string()).collect();
                write!(f, "{}({})", name, parts.join(", "))
            }
            ExprKind::ReceiverCall { receiver, name, args } => {
                let parts: Vec<_> = args.iter().map(|a| a.to_string()).collect();
                write!(f, "{}.{}({})", receiver, name, parts.join(", "))
            }
            ExprKind::StructInit { name, fields } => {
                let parts: Vec<_> =
                    fields.iter().map(|(n, v)| format!("{}: {}", n, v)).collect();
                write!(f, "{}({{{}}})", name, parts.join(", "))
            }
            ExprKind::Forall { vars, body, .. } => {
                let parts: Vec<_> = vars.iter().map(|(n, _)| n.clone()).collect();
                write!(f, "forall({{{}}}, {})", parts.join(", "), body)
            }
            ExprKind::Old(inner) => write!(f, "old({})", inner),
            ExprKind::PublicOld(inner) => write!(f, "public_old({})", inner),
        }
    }
}

// ── Statements ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stmt {
    pub span: Span,
    pub kind: StmtKind,
}

impl Stmt {
    pub fn new(span: Span, kind: StmtKind) -> Self {
        Self { span, kind }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StmtKind {
    /// `name: ty = value` — declares a local.
    LocalDecl {
        name: String,
        ty: Type,
        value: Option<Expr>,
    },
    Assign {
        target: Expr,
        value: Expr,
    },
    AugAssign {
        target: Expr,
        op: BinOp,
        value: Expr,
    },
    ExprStmt {
        value: Expr,
    },
    /// `log.Event(args…)`.
    Log {
        event: String,
        args: Vec<Expr>,
    },
    If {
        test: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    /// Bounded iteration. `invariants` selects the havoc encoding; without
    /// them the loop is unrolled.
    For {
        target: String,
        target_span: Span,
        iter: Expr,
        invariants: Vec<Expr>,
        body: Vec<Stmt>,
    },
    Raise {
        msg: Option<Expr>,
    },
    Assert {
        test: Expr,
        msg: Option<Expr>,
        is_ghost: bool,
    },
    Return {
        value: Option<Expr>,
    },
    Break,
    Continue,
    Pass,
    Try {
        body: Vec<Stmt>,
        handlers: Vec<Handler>,
        finally: Vec<Stmt>,
    },
}

/// An exception handler; `exc_type` of `None` catches everything.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Handler {
    pub exc_type: Option<Type>,
    pub name: Option<String>,
    pub body: Vec<Stmt>,
    pub span: Span,
}

/// The sentinel message name marking asserts/raises that must be proven
/// unreachable.
pub const UNREACHABLE: &str = "UNREACHABLE";

impl Expr {
    /// True for `assert …, UNREACHABLE` / `raise UNREACHABLE` messages.
    pub fn is_unreachable_marker(&self) -> bool {
        matches!(&self.kind, ExprKind::Name(n) if n == UNREACHABLE)
    }
}

// ── Declarations ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Visibility {
    Public,
    Private,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decorator {
    Public,
    Private,
    Payable,
    Constant,
    Pure,
    Nonreentrant(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionArg {
    pub name: String,
    pub ty: Type,
    pub default: Option<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub args: Vec<FunctionArg>,
    pub ret: Option<Type>,
    pub decorators: Vec<Decorator>,
    pub preconditions: Vec<Expr>,
    pub postconditions: Vec<Expr>,
    pub checks: Vec<Expr>,
    /// `performs` allocation clauses, e.g. `performs: reallocate(token, 1)`.
    pub performs: Vec<Expr>,
    pub body: Vec<Stmt>,
    pub span: Span,
}

impl Function {
    fn has(&self, d: &Decorator) -> bool {
        self.decorators.contains(d)
    }

    pub fn is_public(&self) -> bool {
        self.has(&Decorator::Public)
    }

    pub fn is_private(&self) -> bool {
        self.has(&Decorator::Private)
    }

    pub fn is_payable(&self) -> bool {
        self.has(&Decorator::Payable)
    }

    pub fn is_constant(&self) -> bool {
        self.has(&Decorator::Constant)
    }

    pub fn is_pure(&self) -> bool {
        self.has(&Decorator::Pure)
    }

    pub fn nonreentrant_keys(&self) -> impl Iterator<Item = &str> {
        self.decorators.iter().filter_map(|d| match d {
            Decorator::Nonreentrant(key) => Some(key.as_str()),
            _ => None,
        })
    }

    /// Resource names a `performs` clause mentions; these are exempt from
    /// the leak check.
    pub fn performed_resources(&self) -> Vec<&str> {
        self.performs
            .iter()
            .filter_map(|e| match &e.kind {
                ExprKind::Call { args, .. } => args.first().and_then(|a| match &a.kind {
                    ExprKind::Name(n) => Some(n.as_str()),
                    ExprKind::Call { name, .. } => Some(name.as_str()),
                    _ => None,
                }),
                _ => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateVar {
    pub name: String,
    pub ty: Type,
    pub span: Span,
}

/// A declared resource. Resources are identified up to
/// `(declaring file, declaring interface)` to detect duplicate or
/// unimported versions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDecl {
    pub name: String,
    pub args: Vec<(String, Type)>,
    pub file: String,
    pub interface: Option<String>,
    pub span: Span,
}

impl ResourceDecl {
    /// The record type of an instance: declared parameters plus the
    /// implicit declaring-contract address.
    pub fn instance_type(&self) -> StructType {
        let mut fields = self.args.clone();
        fields.push(("$address".to_string(), Type::Address));
        StructType { name: self.name.clone(), fields }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GhostFunction {
    pub name: String,
    pub args: Vec<(String, Type)>,
    pub ret: Type,
    pub file: String,
    pub interface: Option<String>,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub name: String,
    pub arg_types: Vec<Type>,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractDecl {
    pub name: String,
    pub span: Span,
}

/// A proof-only function, encoded as an IVL function.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lemma {
    pub name: String,
    pub args: Vec<FunctionArg>,
    pub preconditions: Vec<Expr>,
    /// Conjuncts of the lemma statement.
    pub body: Vec<Expr>,
    pub span: Span,
}

/// An imported interface as seen by the importing contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interface {
    pub name: String,
    pub file: String,
    pub resources: BTreeMap<String, Vec<ResourceDecl>>,
    pub own_resources: BTreeMap<String, ResourceDecl>,
    pub ghost_functions: BTreeMap<String, Vec<GhostFunction>>,
    pub own_ghost_functions: BTreeMap<String, GhostFunction>,
    pub span: Span,
}

// ── Program ─────────────────────────────────────────────────────────

/// One contract, annotated once and then read-only for the rest of the run.
///
/// Maps are ordered so that translating the same program twice yields the
/// same IVL text modulo identifier allocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Program {
    pub file: String,
    pub span: Span,
    pub state: Vec<StateVar>,
    pub functions: BTreeMap<String, Function>,
    pub structs: BTreeMap<String, StructType>,
    pub interfaces: BTreeMap<String, Interface>,
    pub contracts: BTreeMap<String, ContractDecl>,
    pub events: BTreeMap<String, Event>,
    /// All resource versions in scope, keyed by name.
    pub resources: BTreeMap<String, Vec<ResourceDecl>>,
    /// Resources declared by this contract itself.
    pub own_resources: BTreeMap<String, ResourceDecl>,
    pub ghost_functions: BTreeMap<String, Vec<GhostFunction>>,
    pub ghost_implementations: BTreeMap<String, GhostFunction>,
    /// Names of implemented interfaces.
    pub implements: Vec<String>,
    /// Local-state invariants.
    pub invariants: Vec<Expr>,
    /// Inter-contract invariants.
    pub inter_contract_invariants: Vec<Expr>,
    pub general_postconditions: Vec<Expr>,
    pub transitive_postconditions: Vec<Expr>,
    pub general_checks: Vec<Expr>,
    pub lemmas: BTreeMap<String, Lemma>,
}

impl Program {
    /// An empty contract in `file`, for tests and synthesized programs.
    pub fn empty(file: &str) -> Self {
        Self {
            file: file.to_string(),
            span: Span::dummy(),
            state: Vec::new(),
            functions: BTreeMap::new(),
            structs: BTreeMap::new(),
            interfaces: BTreeMap::new(),
            contracts: BTreeMap::new(),
            events: BTreeMap::new(),
            resources: BTreeMap::new(),
            own_resources: BTreeMap::new(),
            ghost_functions: BTreeMap::new(),
            ghost_implementations: BTreeMap::new(),
            implements: Vec::new(),
            invariants: Vec::new(),
            inter_contract_invariants: Vec::new(),
            general_postconditions: Vec::new(),
            transitive_postconditions: Vec::new(),
            general_checks: Vec::new(),
            lemmas: BTreeMap::new(),
        }
    }

    pub fn state_type(&self, name: &str) -> Option<&Type> {
        self.state.iter().find(|v| v.name == name).map(|v| &v.ty)
    }

    /// The resource named `name` as seen from this program: the contract's
    /// own declaration first, otherwise the first imported version.
    pub fn resource(&self, name: &str) -> Option<&ResourceDecl> {
        self.own_resources
            .get(name)
            .or_else(|| self.resources.get(name).and_then(|rs| rs.first()))
    }
}
