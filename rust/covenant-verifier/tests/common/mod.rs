//! Shared IR builders for the integration suites.
#![allow(dead_code)]

use covenant_core::span::Span;
use covenant_verifier::verifier::ast::*;
use covenant_verifier::verifier::names;
use covenant_verifier::verifier::types::Type;
use num_bigint::BigInt;

pub struct IrBuilder {
    gen: NodeIdGen,
    line: usize,
}

impl IrBuilder {
    pub fn new() -> Self {
        Self { gen: NodeIdGen::new(), line: 1 }
    }

    pub fn at_line(&mut self, line: usize) -> &mut Self {
        self.line = line;
        self
    }

    fn span(&self) -> Span {
        Span::new(self.line, 1, self.line, 30)
    }

    pub fn expr(&mut self, kind: ExprKind) -> Expr {
        Expr::new(self.gen.next_id(), self.span(), kind)
    }

    pub fn int(&mut self, value: i64) -> Expr {
        self.expr(ExprKind::Int(BigInt::from(value)))
    }

    pub fn name(&mut self, name: &str) -> Expr {
        self.expr(ExprKind::Name(name.to_string()))
    }

    pub fn self_field(&mut self, field: &str) -> Expr {
        let receiver = self.name(names::SELF);
        self.expr(ExprKind::Attribute { value: Box::new(receiver), attr: field.to_string() })
    }

    pub fn cmp(&mut self, op: CmpOp, left: Expr, right: Expr) -> Expr {
        self.expr(ExprKind::Compare { op, left: Box::new(left), right: Box::new(right) })
    }

    pub fn binary(&mut self, op: BinOp, left: Expr, right: Expr) -> Expr {
        self.expr(ExprKind::Binary { op, left: Box::new(left), right: Box::new(right) })
    }

    pub fn call(&mut self, name: &str, args: Vec<Expr>) -> Expr {
        self.expr(ExprKind::Call {
            name: name.to_string(),
            args,
            keywords: vec![],
            resource: None,
        })
    }

    pub fn stmt(&mut self, kind: StmtKind) -> Stmt {
        Stmt::new(self.span(), kind)
    }

    pub fn assign(&mut self, target: Expr, value: Expr) -> Stmt {
        self.stmt(StmtKind::Assign { target, value })
    }
}

pub fn program(file: &str) -> Program {
    Program::empty(file)
}

pub fn state_var(name: &str, ty: Type) -> StateVar {
    StateVar { name: name.to_string(), ty, span: Span::new(1, 1, 1, 20) }
}

pub fn public_function(name: &str, body: Vec<Stmt>) -> Function {
    Function {
        name: name.to_string(),
        args: vec![],
        ret: None,
        decorators: vec![Decorator::Public],
        preconditions: vec![],
        postconditions: vec![],
        checks: vec![],
        performs: vec![],
        body,
        span: Span::new(4, 1, 9, 2),
    }
}

pub fn resource_decl(name: &str, file: &str) -> ResourceDecl {
    ResourceDecl {
        name: name.to_string(),
        args: vec![],
        file: file.to_string(),
        interface: None,
        span: Span::new(2, 1, 2, 20),
    }
}
