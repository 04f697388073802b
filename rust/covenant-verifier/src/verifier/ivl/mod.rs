//! The intermediate verification language (IVL) AST and its builder.
//!
//! The builder is the only way translators create IVL nodes. Every
//! constructor takes a [`Position`]; sort discipline is enforced at
//! construction time, so a malformed node is a bug in the calling
//! translator, not something the backend gets to see.

pub mod pretty;

use std::collections::HashMap;

use num_bigint::BigInt;

use crate::verifier::positions::Position;

// ── Sorts ───────────────────────────────────────────────────────────

/// Sort of an IVL expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Sort {
    Int,
    Bool,
    /// Permission amounts.
    Perm,
    /// Sequences model fixed-capacity arrays.
    Seq(Box<Sort>),
    /// Total maps with a default element.
    Map(Box<Sort>, Box<Sort>),
    /// A declared record sort (struct, resource, or event payload).
    Struct(String),
}

impl Sort {
    pub fn seq(elem: Sort) -> Sort {
        Sort::Seq(Box::new(elem))
    }

    pub fn map(key: Sort, value: Sort) -> Sort {
        Sort::Map(Box::new(key), Box::new(value))
    }
}

// ── Expressions ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum BinOpKind {
    // Arithmetic (Int × Int → Int).
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    // Comparison (Int × Int → Bool).
    LtCmp,
    LeCmp,
    GtCmp,
    GeCmp,
    // Equality (any sort, both sides equal).
    EqCmp,
    NeCmp,
    // Logical (Bool × Bool → Bool).
    And,
    Or,
    Implies,
}

/// Permission amount of a predicate access. There is no default; callers
/// must always choose.
#[derive(Debug, Clone, PartialEq)]
pub enum PermAmount {
    Full,
    Fractional(u64, u64),
    Read,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub pos: Position,
    pub sort: Sort,
    pub kind: ExprKind,
}

impl Expr {
    /// The same expression re-anchored at `pos`.
    pub fn clone_with_pos(&self, pos: Position) -> Expr {
        let mut out = self.clone();
        out.pos = pos;
        out
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Trigger {
    pub parts: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    IntLit(BigInt),
    BoolLit(bool),
    LocalVar(String),
    /// The method result variable in function postconditions.
    Result,
    FieldAccess {
        receiver: Box<Expr>,
        field: String,
    },
    /// Application of a (domain) function.
    FuncApp {
        name: String,
        args: Vec<Expr>,
    },
    BinaryOp {
        op: BinOpKind,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Not(Box<Expr>),
    Neg(Box<Expr>),
    CondExp {
        cond: Box<Expr>,
        then: Box<Expr>,
        orelse: Box<Expr>,
    },
    Old(Box<Expr>),
    Let {
        var: LocalVarDecl,
        value: Box<Expr>,
        body: Box<Expr>,
    },
    Forall {
        vars: Vec<LocalVarDecl>,
        triggers: Vec<Trigger>,
        body: Box<Expr>,
    },
    SeqIndex {
        seq: Box<Expr>,
        index: Box<Expr>,
    },
    SeqLength(Box<Expr>),
    ExplicitSeq(Vec<Expr>),
    PredicateAccess {
        name: String,
        args: Vec<Expr>,
        perm: PermAmount,
    },
}

// ── Statements ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub pos: Position,
    pub kind: StmtKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    LocalAssign {
        name: String,
        value: Expr,
    },
    FieldAssign {
        receiver: Expr,
        field: String,
        value: Expr,
    },
    Inhale(Expr),
    Exhale(Expr),
    Assert(Expr),
    Fold(Expr),
    Unfold(Expr),
    If {
        cond: Expr,
        then: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    While {
        cond: Expr,
        invariants: Vec<Expr>,
        body: Vec<Stmt>,
    },
    Label(String),
    Goto(String),
    MethodCall {
        method: String,
        args: Vec<Expr>,
        targets: Vec<String>,
    },
    /// A flattened block, optionally titled for readability of the emitted
    /// program text.
    Seqn {
        stmts: Vec<Stmt>,
        info: Option<String>,
    },
}

// ── Declarations ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct LocalVarDecl {
    pub name: String,
    pub sort: Sort,
}

impl LocalVarDecl {
    pub fn new(name: &str, sort: Sort) -> Self {
        Self { name: name.to_string(), sort }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDecl {
    pub name: String,
    pub sort: Sort,
    pub pos: Position,
}

#[derive(Debug, Clone)]
pub struct Method {
    pub name: String,
    pub args: Vec<LocalVarDecl>,
    pub returns: Vec<LocalVarDecl>,
    pub pres: Vec<Expr>,
    pub posts: Vec<Expr>,
    pub locals: Vec<LocalVarDecl>,
    pub body: Vec<Stmt>,
    pub pos: Position,
}

/// A pure IVL function: single expression body, no statements.
#[derive(Debug, Clone)]
pub struct IvlFunction {
    pub name: String,
    pub args: Vec<LocalVarDecl>,
    pub sort: Sort,
    pub pres: Vec<Expr>,
    pub posts: Vec<Expr>,
    pub body: Option<Expr>,
    pub pos: Position,
}

#[derive(Debug, Clone)]
pub struct Predicate {
    pub name: String,
    pub args: Vec<LocalVarDecl>,
    pub body: Option<Expr>,
    pub pos: Position,
}

#[derive(Debug, Clone)]
pub struct DomainFunc {
    pub name: String,
    pub args: Vec<Sort>,
    pub sort: Sort,
}

#[derive(Debug, Clone)]
pub struct DomainAxiom {
    pub name: String,
    pub expr: Expr,
}

#[derive(Debug, Clone)]
pub struct Domain {
    pub name: String,
    pub functions: Vec<DomainFunc>,
    pub axioms: Vec<DomainAxiom>,
}

#[derive(Debug, Clone)]
pub struct IvlProgram {
    pub domains: Vec<Domain>,
    pub fields: Vec<FieldDecl>,
    pub functions: Vec<IvlFunction>,
    pub predicates: Vec<Predicate>,
    pub methods: Vec<Method>,
}

// ── Builder ─────────────────────────────────────────────────────────

/// Constructs well-sorted IVL nodes.
///
/// Record sorts and heap fields must be declared before they are accessed;
/// violating a sort rule panics, because only buggy translator code can
/// reach that state.
#[derive(Debug, Default)]
pub struct Ivl {
    /// Declared record sorts: name → ordered fields.
    structs: HashMap<String, Vec<(String, Sort)>>,
    /// Declared heap fields: name → sort.
    fields: HashMap<String, Sort>,
}

impl Ivl {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Declarations ────────────────────────────────────────────────

    pub fn declare_struct(&mut self, name: &str, fields: Vec<(String, Sort)>) {
        self.structs.insert(name.to_string(), fields);
    }

    pub fn declare_field(&mut self, name: &str, sort: Sort) {
        self.fields.insert(name.to_string(), sort);
    }

    pub fn struct_fields(&self, name: &str) -> Option<&[(String, Sort)]> {
        self.structs.get(name).map(|v| v.as_slice())
    }

    // ── Literals and variables ──────────────────────────────────────

    pub fn int_lit(&self, value: BigInt, pos: Position) -> Expr {
        Expr { pos, sort: Sort::Int, kind: ExprKind::IntLit(value) }
    }

    pub fn int(&self, value: i64, pos: Position) -> Expr {
        self.int_lit(BigInt::from(value), pos)
    }

    pub fn true_lit(&self, pos: Position) -> Expr {
        Expr { pos, sort: Sort::Bool, kind: ExprKind::BoolLit(true) }
    }

    pub fn false_lit(&self, pos: Position) -> Expr {
        Expr { pos, sort: Sort::Bool, kind: ExprKind::BoolLit(false) }
    }

    pub fn local_var(&self, name: &str, sort: Sort, pos: Position) -> Expr {
        Expr { pos, sort, kind: ExprKind::LocalVar(name.to_string()) }
    }

    pub fn result(&self, sort: Sort, pos: Position) -> Expr {
        Expr { pos, sort, kind: ExprKind::Result }
    }

    // ── Arithmetic ──────────────────────────────────────────────────

    fn arith(&self, op: BinOpKind, left: Expr, right: Expr, pos: Position) -> Expr {
        assert!(
            left.sort == Sort::Int && right.sort == Sort::Int,
            "arithmetic on non-integer sorts: {:?} and {:?}",
            left.sort,
            right.sort
        );
        Expr {
            pos,
            sort: Sort::Int,
            kind: ExprKind::BinaryOp { op, left: Box::new(left), right: Box::new(right) },
        }
    }

    pub fn add(&self, left: Expr, right: Expr, pos: Position) -> Expr {
        self.arith(BinOpKind::Add, left, right, pos)
    }

    pub fn sub(&self, left: Expr, right: Expr, pos: Position) -> Expr {
        self.arith(BinOpKind::Sub, left, right, pos)
    }

    pub fn mul(&self, left: Expr, right: Expr, pos: Position) -> Expr {
        self.arith(BinOpKind::Mul, left, right, pos)
    }

    pub fn div(&self, left: Expr, right: Expr, pos: Position) -> Expr {
        self.arith(BinOpKind::Div, left, right, pos)
    }

    pub fn modulo(&self, left: Expr, right: Expr, pos: Position) -> Expr {
        self.arith(BinOpKind::Mod, left, right, pos)
    }

    pub fn neg(&self, operand: Expr, pos: Position) -> Expr {
        assert!(operand.sort == Sort::Int, "negation on non-integer sort {:?}", operand.sort);
        Expr { pos, sort: Sort::Int, kind: ExprKind::Neg(Box::new(operand)) }
    }

    // ── Comparisons ─────────────────────────────────────────────────

    fn cmp(&self, op: BinOpKind, left: Expr, right: Expr, pos: Position) -> Expr {
        assert!(
            left.sort == Sort::Int && right.sort == Sort::Int,
            "ordering on non-integer sorts: {:?} and {:?}",
            left.sort,
            right.sort
        );
        Expr {
            pos,
            sort: Sort::Bool,
            kind: ExprKind::BinaryOp { op, left: Box::new(left), right: Box::new(right) },
        }
    }

    pub fn lt(&self, left: Expr, right: Expr, pos: Position) -> Expr {
        self.cmp(BinOpKind::LtCmp, left, right, pos)
    }

    pub fn le(&self, left: Expr, right: Expr, pos: Position) -> Expr {
        self.cmp(BinOpKind::LeCmp, left, right, pos)
    }

    pub fn gt(&self, left: Expr, right: Expr, pos: Position) -> Expr {
        self.cmp(BinOpKind::GtCmp, left, right, pos)
    }

    pub fn ge(&self, left: Expr, right: Expr, pos: Position) -> Expr {
        self.cmp(BinOpKind::GeCmp, left, right, pos)
    }

    pub fn eq(&self, left: Expr, right: Expr, pos: Position) -> Expr {
        assert!(left.sort == right.sort, "equality between {:?} and {:?}", left.sort, right.sort);
        Expr {
            pos,
            sort: Sort::Bool,
            kind: ExprKind::BinaryOp {
                op: BinOpKind::EqCmp,
                left: Box::new(left),
                right: Box::new(right),
            },
        }
    }

    pub fn ne(&self, left: Expr, right: Expr, pos: Position) -> Expr {
        assert!(left.sort == right.sort, "equality between {:?} and {:?}", left.sort, right.sort);
        Expr {
            pos,
            sort: Sort::Bool,
            kind: ExprKind::BinaryOp {
                op: BinOpKind::NeCmp,
                left: Box::new(left),
                right: Box::new(right),
            },
        }
    }

    // ── Logical operators ───────────────────────────────────────────

    fn logical(&self, op: BinOpKind, left: Expr, right: Expr, pos: Position) -> Expr {
        assert!(
            left.sort == Sort::Bool && right.sort == Sort::Bool,
            "logical operator on non-boolean sorts: {:?} and {:?}",
            left.sort,
            right.sort
        );
        Expr {
            pos,
            sort: Sort::Bool,
            kind: ExprKind::BinaryOp { op, left: Box::new(left), right: Box::new(right) },
        }
    }

    pub fn and(&self, left: Expr, right: Expr, pos: Position) -> Expr {
        self.logical(BinOpKind::And, left, right, pos)
    }

    pub fn or(&self, left: Expr, right: Expr, pos: Position) -> Expr {
        self.logical(BinOpKind::Or, left, right, pos)
    }

    pub fn implies(&self, left: Expr, right: Expr, pos: Position) -> Expr {
        self.logical(BinOpKind::Implies, left, right, pos)
    }

    pub fn not(&self, operand: Expr, pos: Position) -> Expr {
        assert!(operand.sort == Sort::Bool, "negation on non-boolean sort {:?}", operand.sort);
        Expr { pos, sort: Sort::Bool, kind: ExprKind::Not(Box::new(operand)) }
    }

    /// Conjunction of many expressions; `true` when empty.
    pub fn conjoin(&self, exprs: Vec<Expr>, pos: Position) -> Expr {
        let mut iter = exprs.into_iter();
        match iter.next() {
            None => self.true_lit(pos),
            Some(first) => iter.fold(first, |acc, e| self.and(acc, e, pos)),
        }
    }

    // ── Compound expressions ────────────────────────────────────────

    pub fn cond_exp(&self, cond: Expr, then: Expr, orelse: Expr, pos: Position) -> Expr {
        assert!(cond.sort == Sort::Bool, "condition must be boolean, got {:?}", cond.sort);
        assert!(
            then.sort == orelse.sort,
            "conditional branches disagree: {:?} vs {:?}",
            then.sort,
            orelse.sort
        );
        Expr {
            pos,
            sort: then.sort.clone(),
            kind: ExprKind::CondExp {
                cond: Box::new(cond),
                then: Box::new(then),
                orelse: Box::new(orelse),
            },
        }
    }

    pub fn old(&self, inner: Expr, pos: Position) -> Expr {
        Expr { pos, sort: inner.sort.clone(), kind: ExprKind::Old(Box::new(inner)) }
    }

    pub fn let_expr(&self, var: LocalVarDecl, value: Expr, body: Expr, pos: Position) -> Expr {
        assert!(var.sort == value.sort, "let binding sort mismatch");
        Expr {
            pos,
            sort: body.sort.clone(),
            kind: ExprKind::Let { var, value: Box::new(value), body: Box::new(body) },
        }
    }

    pub fn forall(
        &self,
        vars: Vec<LocalVarDecl>,
        triggers: Vec<Trigger>,
        body: Expr,
        pos: Position,
    ) -> Expr {
        assert!(body.sort == Sort::Bool, "quantifier body must be boolean");
        Expr {
            pos,
            sort: Sort::Bool,
            kind: ExprKind::Forall { vars, triggers, body: Box::new(body) },
        }
    }

    pub fn field_access(&self, receiver: Expr, field: &str, pos: Position) -> Expr {
        let sort = self
            .fields
            .get(field)
            .unwrap_or_else(|| panic!("access to undeclared field '{}'", field))
            .clone();
        Expr { pos, sort, kind: ExprKind::FieldAccess { receiver: Box::new(receiver), field: field.to_string() } }
    }

    pub fn func_app(&self, name: &str, args: Vec<Expr>, sort: Sort, pos: Position) -> Expr {
        Expr { pos, sort, kind: ExprKind::FuncApp { name: name.to_string(), args } }
    }

    /// Predicate access; the permission amount is mandatory.
    pub fn predicate_access(
        &self,
        name: &str,
        args: Vec<Expr>,
        perm: PermAmount,
        pos: Position,
    ) -> Expr {
        Expr {
            pos,
            sort: Sort::Bool,
            kind: ExprKind::PredicateAccess { name: name.to_string(), args, perm },
        }
    }

    // ── Sequences ───────────────────────────────────────────────────

    pub fn seq_index(&self, seq: Expr, index: Expr, pos: Position) -> Expr {
        let elem = match &seq.sort {
            Sort::Seq(elem) => (**elem).clone(),
            other => panic!("indexing into non-sequence sort {:?}", other),
        };
        assert!(index.sort == Sort::Int, "sequence index must be integer");
        Expr { pos, sort: elem, kind: ExprKind::SeqIndex { seq: Box::new(seq), index: Box::new(index) } }
    }

    pub fn seq_length(&self, seq: Expr, pos: Position) -> Expr {
        assert!(matches!(seq.sort, Sort::Seq(_)), "length of non-sequence sort {:?}", seq.sort);
        Expr { pos, sort: Sort::Int, kind: ExprKind::SeqLength(Box::new(seq)) }
    }

    pub fn explicit_seq(&self, elems: Vec<Expr>, pos: Position) -> Expr {
        assert!(!elems.is_empty(), "explicit sequence must not be empty");
        let elem_sort = elems[0].sort.clone();
        assert!(elems.iter().all(|e| e.sort == elem_sort), "mixed element sorts in sequence");
        Expr { pos, sort: Sort::seq(elem_sort), kind: ExprKind::ExplicitSeq(elems) }
    }

    // ── Map and struct helpers (domain functions) ───────────────────

    pub fn map_get(&self, map: Expr, key: Expr, pos: Position) -> Expr {
        let value_sort = match &map.sort {
            Sort::Map(k, v) => {
                assert!(key.sort == **k, "map key sort mismatch");
                (**v).clone()
            }
            other => panic!("map_get on non-map sort {:?}", other),
        };
        self.func_app("$map_get", vec![map, key], value_sort, pos)
    }

    pub fn map_set(&self, map: Expr, key: Expr, value: Expr, pos: Position) -> Expr {
        let map_sort = map.sort.clone();
        match &map_sort {
            Sort::Map(k, v) => {
                assert!(key.sort == **k, "map key sort mismatch");
                assert!(value.sort == **v, "map value sort mismatch");
            }
            other => panic!("map_set on non-map sort {:?}", other),
        }
        self.func_app("$map_set", vec![map, key, value], map_sort, pos)
    }

    pub fn map_sum(&self, map: Expr, pos: Position) -> Expr {
        assert!(matches!(map.sort, Sort::Map(_, _)), "map_sum on non-map sort {:?}", map.sort);
        self.func_app("$map_sum", vec![map], Sort::Int, pos)
    }

    /// Construct a record value from ordered field values.
    pub fn struct_init(&self, name: &str, args: Vec<Expr>, pos: Position) -> Expr {
        let fields = self
            .structs
            .get(name)
            .unwrap_or_else(|| panic!("init of undeclared struct '{}'", name));
        assert!(fields.len() == args.len(), "struct '{}' arity mismatch", name);
        let ctor = format!("${}$init", name);
        self.func_app(&ctor, args, Sort::Struct(name.to_string()), pos)
    }

    /// Read one member of a record value.
    pub fn struct_get(&self, receiver: Expr, member: &str, pos: Position) -> Expr {
        let name = match &receiver.sort {
            Sort::Struct(name) => name.clone(),
            other => panic!("struct_get on non-record sort {:?}", other),
        };
        let sort = self
            .structs
            .get(&name)
            .and_then(|fs| fs.iter().find(|(f, _)| f == member))
            .map(|(_, s)| s.clone())
            .unwrap_or_else(|| panic!("record '{}' has no member '{}'", name, member));
        let getter = format!("${}${}", name, member);
        self.func_app(&getter, vec![receiver], sort, pos)
    }

    /// Functional update of one member of a record value.
    pub fn struct_set(&self, receiver: Expr, member: &str, value: Expr, pos: Position) -> Expr {
        let name = match &receiver.sort {
            Sort::Struct(name) => name.clone(),
            other => panic!("struct_set on non-record sort {:?}", other),
        };
        let fields = self
            .structs
            .get(&name)
            .unwrap_or_else(|| panic!("set on undeclared struct '{}'", name));
        let member_sort = fields
            .iter()
            .find(|(f, _)| f == member)
            .map(|(_, s)| s.clone())
            .unwrap_or_else(|| panic!("record '{}' has no member '{}'", name, member));
        assert!(value.sort == member_sort, "record member sort mismatch for '{}'", member);
        let setter = format!("${}$set${}", name, member);
        self.func_app(&setter, vec![receiver, value], Sort::Struct(name), pos)
    }

    // ── Statements ──────────────────────────────────────────────────

    pub fn local_assign(&self, name: &str, value: Expr, pos: Position) -> Stmt {
        Stmt { pos, kind: StmtKind::LocalAssign { name: name.to_string(), value } }
    }

    pub fn field_assign(&self, receiver: Expr, field: &str, value: Expr, pos: Position) -> Stmt {
        let field_sort = self
            .fields
            .get(field)
            .unwrap_or_else(|| panic!("assignment to undeclared field '{}'", field));
        assert!(value.sort == *field_sort, "field assignment sort mismatch for '{}'", field);
        Stmt {
            pos,
            kind: StmtKind::FieldAssign { receiver, field: field.to_string(), value },
        }
    }

    pub fn inhale(&self, expr: Expr, pos: Position) -> Stmt {
        assert!(expr.sort == Sort::Bool, "inhale of non-boolean sort {:?}", expr.sort);
        Stmt { pos, kind: StmtKind::Inhale(expr) }
    }

    pub fn exhale(&self, expr: Expr, pos: Position) -> Stmt {
        assert!(expr.sort == Sort::Bool, "exhale of non-boolean sort {:?}", expr.sort);
        Stmt { pos, kind: StmtKind::Exhale(expr) }
    }

    pub fn assert_stmt(&self, expr: Expr, pos: Position) -> Stmt {
        assert!(expr.sort == Sort::Bool, "assert of non-boolean sort {:?}", expr.sort);
        Stmt { pos, kind: StmtKind::Assert(expr) }
    }

    pub fn fold(&self, access: Expr, pos: Position) -> Stmt {
        assert!(matches!(access.kind, ExprKind::PredicateAccess { .. }), "fold of non-predicate");
        Stmt { pos, kind: StmtKind::Fold(access) }
    }

    pub fn unfold(&self, access: Expr, pos: Position) -> Stmt {
        assert!(matches!(access.kind, ExprKind::PredicateAccess { .. }), "unfold of non-predicate");
        Stmt { pos, kind: StmtKind::Unfold(access) }
    }

    pub fn if_stmt(&self, cond: Expr, then: Vec<Stmt>, orelse: Vec<Stmt>, pos: Position) -> Stmt {
        assert!(cond.sort == Sort::Bool, "if condition must be boolean");
        Stmt { pos, kind: StmtKind::If { cond, then, orelse } }
    }

    pub fn while_stmt(
        &self,
        cond: Expr,
        invariants: Vec<Expr>,
        body: Vec<Stmt>,
        pos: Position,
    ) -> Stmt {
        assert!(cond.sort == Sort::Bool, "while condition must be boolean");
        Stmt { pos, kind: StmtKind::While { cond, invariants, body } }
    }

    pub fn label(&self, name: &str, pos: Position) -> Stmt {
        Stmt { pos, kind: StmtKind::Label(name.to_string()) }
    }

    pub fn goto(&self, name: &str, pos: Position) -> Stmt {
        Stmt { pos, kind: StmtKind::Goto(name.to_string()) }
    }

    pub fn method_call(
        &self,
        method: &str,
        args: Vec<Expr>,
        targets: Vec<String>,
        pos: Position,
    ) -> Stmt {
        Stmt { pos, kind: StmtKind::MethodCall { method: method.to_string(), args, targets } }
    }

    /// A sequence block. Nested sequences are flattened.
    pub fn seqn(&self, stmts: Vec<Stmt>, pos: Position) -> Stmt {
        Stmt { pos, kind: StmtKind::Seqn { stmts: flatten(stmts), info: None } }
    }

    /// A titled sequence block, used to keep the emitted text readable.
    pub fn seqn_with_info(&self, stmts: Vec<Stmt>, info: &str, pos: Position) -> Stmt {
        Stmt {
            pos,
            kind: StmtKind::Seqn { stmts: flatten(stmts), info: Some(info.to_string()) },
        }
    }
}

fn flatten(stmts: Vec<Stmt>) -> Vec<Stmt> {
    let mut out = Vec::with_capacity(stmts.len());
    for stmt in stmts {
        match stmt.kind {
            StmtKind::Seqn { stmts: inner, info: None } => out.extend(flatten(inner)),
            _ => out.push(stmt),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b() -> Ivl {
        Ivl::new()
    }

    #[test]
    fn add_produces_int_sort() {
        let b = b();
        let e = b.add(b.int(1, Position::None), b.int(2, Position::None), Position::None);
        assert_eq!(e.sort, Sort::Int);
    }

    #[test]
    #[should_panic(expected = "arithmetic on non-integer sorts")]
    fn add_rejects_booleans() {
        let b = b();
        b.add(b.true_lit(Position::None), b.int(2, Position::None), Position::None);
    }

    #[test]
    #[should_panic(expected = "logical operator on non-boolean sorts")]
    fn and_rejects_integers() {
        let b = b();
        b.and(b.int(1, Position::None), b.int(2, Position::None), Position::None);
    }

    #[test]
    fn comparison_produces_bool_sort() {
        let b = b();
        let e = b.le(b.int(0, Position::None), b.int(1, Position::None), Position::None);
        assert_eq!(e.sort, Sort::Bool);
    }

    #[test]
    fn struct_get_knows_member_sorts() {
        let mut b = b();
        b.declare_struct("Pair", vec![("fst".to_string(), Sort::Int), ("snd".to_string(), Sort::Bool)]);
        let value = b.func_app("$Pair$init", vec![], Sort::Struct("Pair".to_string()), Position::None);
        let fst = b.struct_get(value.clone(), "fst", Position::None);
        let snd = b.struct_get(value, "snd", Position::None);
        assert_eq!(fst.sort, Sort::Int);
        assert_eq!(snd.sort, Sort::Bool);
    }

    #[test]
    #[should_panic(expected = "has no member")]
    fn struct_get_rejects_unknown_member() {
        let mut b = b();
        b.declare_struct("Pair", vec![("fst".to_string(), Sort::Int)]);
        let value = b.func_app("$Pair$init", vec![], Sort::Struct("Pair".to_string()), Position::None);
        b.struct_get(value, "nope", Position::None);
    }

    #[test]
    #[should_panic(expected = "undeclared field")]
    fn field_access_requires_declaration() {
        let b = b();
        let recv = b.local_var("self", Sort::Struct("$Self".to_string()), Position::None);
        b.field_access(recv, "balance", Position::None);
    }

    #[test]
    fn seqn_flattens_nested_sequences() {
        let b = b();
        let inner = b.seqn(
            vec![b.label("a", Position::None), b.label("b", Position::None)],
            Position::None,
        );
        let outer = b.seqn(vec![inner, b.label("c", Position::None)], Position::None);
        match outer.kind {
            StmtKind::Seqn { stmts, .. } => {
                assert_eq!(stmts.len(), 3);
                assert!(stmts.iter().all(|s| matches!(s.kind, StmtKind::Label(_))));
            }
            _ => panic!("expected seqn"),
        }
    }

    #[test]
    fn titled_seqn_is_not_flattened_away() {
        let b = b();
        let inner = b.seqn_with_info(vec![b.label("a", Position::None)], "base case", Position::None);
        let outer = b.seqn(vec![inner], Position::None);
        match outer.kind {
            StmtKind::Seqn { stmts, .. } => {
                assert_eq!(stmts.len(), 1);
                assert!(matches!(&stmts[0].kind, StmtKind::Seqn { info: Some(_), .. }));
            }
            _ => panic!("expected seqn"),
        }
    }

    #[test]
    fn map_get_types_from_map_sort() {
        let b = b();
        let map = b.local_var("m", Sort::map(Sort::Int, Sort::Bool), Position::None);
        let got = b.map_get(map, b.int(0, Position::None), Position::None);
        assert_eq!(got.sort, Sort::Bool);
    }

    #[test]
    fn conjoin_empty_is_true() {
        let b = b();
        let e = b.conjoin(vec![], Position::None);
        assert_eq!(e.kind, ExprKind::BoolLit(true));
    }
}
