//! Serialization of IVL programs to the external verifier's textual AST.
//!
//! Statements and specification expressions carry their registered position
//! as an `@id` marker; the backend echoes the marker of a failing node in
//! its `position` field, which is what the back-mapper looks up.

use std::fmt::Write;

use super::*;

pub fn print_program(program: &IvlProgram) -> String {
    let mut out = String::new();
    for domain in &program.domains {
        print_domain(&mut out, domain);
        out.push('\n');
    }
    for field in &program.fields {
        let _ = writeln!(out, "field {}: {}", field.name, sort(&field.sort));
    }
    if !program.fields.is_empty() {
        out.push('\n');
    }
    for function in &program.functions {
        print_function(&mut out, function);
        out.push('\n');
    }
    for predicate in &program.predicates {
        print_predicate(&mut out, predicate);
        out.push('\n');
    }
    for method in &program.methods {
        print_method(&mut out, method);
        out.push('\n');
    }
    out
}

pub fn sort(s: &Sort) -> String {
    match s {
        Sort::Int => "Int".to_string(),
        Sort::Bool => "Bool".to_string(),
        Sort::Perm => "Perm".to_string(),
        Sort::Seq(elem) => format!("Seq[{}]", sort(elem)),
        Sort::Map(k, v) => format!("$Map[{}, {}]", sort(k), sort(v)),
        Sort::Struct(name) => format!("${}", name),
    }
}

fn pos_marker(pos: Position) -> String {
    match pos.id() {
        Some(id) => format!(" @{}", id),
        None => String::new(),
    }
}

fn decl(d: &LocalVarDecl) -> String {
    format!("{}: {}", d.name, sort(&d.sort))
}

fn decls(ds: &[LocalVarDecl]) -> String {
    ds.iter().map(decl).collect::<Vec<_>>().join(", ")
}

pub fn expr(e: &Expr) -> String {
    match &e.kind {
        ExprKind::IntLit(v) => v.to_string(),
        ExprKind::BoolLit(b) => b.to_string(),
        ExprKind::LocalVar(name) => name.clone(),
        ExprKind::Result => "result".to_string(),
        ExprKind::FieldAccess { receiver, field } => format!("{}.{}", expr(receiver), field),
        ExprKind::FuncApp { name, args } => {
            let parts: Vec<_> = args.iter().map(expr).collect();
            format!("{}({})", name, parts.join(", "))
        }
        ExprKind::BinaryOp { op, left, right } => {
            format!("({} {} {})", expr(left), binop(op), expr(right))
        }
        ExprKind::Not(inner) => format!("!({})", expr(inner)),
        ExprKind::Neg(inner) => format!("-({})", expr(inner)),
        ExprKind::CondExp { cond, then, orelse } => {
            format!("({} ? {} : {})", expr(cond), expr(then), expr(orelse))
        }
        ExprKind::Old(inner) => format!("old({})", expr(inner)),
        ExprKind::Let { var, value, body } => {
            format!("(let {} == ({}) in {})", decl(var), expr(value), expr(body))
        }
        ExprKind::Forall { vars, triggers, body } => {
            let ts: Vec<_> = triggers
                .iter()
                .map(|t| {
                    let parts: Vec<_> = t.parts.iter().map(expr).collect();
                    format!("{{{}}}", parts.join(", "))
                })
                .collect();
            let sep = if ts.is_empty() { String::new() } else { format!(" {}", ts.join(" ")) };
            format!("(forall {} ::{} {})", decls(vars), sep, expr(body))
        }
        ExprKind::SeqIndex { seq, index } => format!("{}[{}]", expr(seq), expr(index)),
        ExprKind::SeqLength(seq) => format!("|{}|", expr(seq)),
        ExprKind::ExplicitSeq(elems) => {
            let parts: Vec<_> = elems.iter().map(expr).collect();
            format!("Seq({})", parts.join(", "))
        }
        ExprKind::PredicateAccess { name, args, perm } => {
            let parts: Vec<_> = args.iter().map(expr).collect();
            format!("acc({}({}), {})", name, parts.join(", "), perm_amount(perm))
        }
    }
}

fn binop(op: &BinOpKind) -> &'static str {
    match op {
        BinOpKind::Add => "+",
        BinOpKind::Sub => "-",
        BinOpKind::Mul => "*",
        BinOpKind::Div => "\\",
        BinOpKind::Mod => "%",
        BinOpKind::LtCmp => "<",
        BinOpKind::LeCmp => "<=",
        BinOpKind::GtCmp => ">",
        BinOpKind::GeCmp => ">=",
        BinOpKind::EqCmp => "==",
        BinOpKind::NeCmp => "!=",
        BinOpKind::And => "&&",
        BinOpKind::Or => "||",
        BinOpKind::Implies => "==>",
    }
}

fn perm_amount(perm: &PermAmount) -> String {
    match perm {
        PermAmount::Full => "write".to_string(),
        PermAmount::Fractional(n, d) => format!("{}/{}", n, d),
        PermAmount::Read => "wildcard".to_string(),
    }
}

fn print_domain(out: &mut String, domain: &Domain) {
    let _ = writeln!(out, "domain {} {{", domain.name);
    for function in &domain.functions {
        let args: Vec<_> = function.args.iter().map(sort).collect();
        let _ = writeln!(
            out,
            "  function {}({}): {}",
            function.name,
            args.join(", "),
            sort(&function.sort)
        );
    }
    for axiom in &domain.axioms {
        let _ = writeln!(out, "  axiom {} {{ {} }}", axiom.name, expr(&axiom.expr));
    }
    let _ = writeln!(out, "}}");
}

fn print_function(out: &mut String, function: &IvlFunction) {
    let _ = writeln!(
        out,
        "function {}({}): {}{}",
        function.name,
        decls(&function.args),
        sort(&function.sort),
        pos_marker(function.pos)
    );
    for pre in &function.pres {
        let _ = writeln!(out, "  requires {}{}", expr(pre), pos_marker(pre.pos));
    }
    for post in &function.posts {
        let _ = writeln!(out, "  ensures {}{}", expr(post), pos_marker(post.pos));
    }
    if let Some(body) = &function.body {
        let _ = writeln!(out, "{{ {} }}", expr(body));
    }
}

fn print_predicate(out: &mut String, predicate: &Predicate) {
    match &predicate.body {
        Some(body) => {
            let _ = writeln!(
                out,
                "predicate {}({}) {{ {} }}",
                predicate.name,
                decls(&predicate.args),
                expr(body)
            );
        }
        None => {
            let _ = writeln!(out, "predicate {}({})", predicate.name, decls(&predicate.args));
        }
    }
}

fn print_method(out: &mut String, method: &Method) {
    let _ = writeln!(
        out,
        "method {}({}) returns ({}){}",
        method.name,
        decls(&method.args),
        decls(&method.returns),
        pos_marker(method.pos)
    );
    for pre in &method.pres {
        let _ = writeln!(out, "  requires {}{}", expr(pre), pos_marker(pre.pos));
    }
    for post in &method.posts {
        let _ = writeln!(out, "  ensures {}{}", expr(post), pos_marker(post.pos));
    }
    let _ = writeln!(out, "{{");
    for local in &method.locals {
        let _ = writeln!(out, "  var {}", decl(local));
    }
    for s in &method.body {
        print_stmt(out, s, 1);
    }
    let _ = writeln!(out, "}}");
}

fn indent(out: &mut String, level: usize) {
    for _ in 0..level {
        out.push_str("  ");
    }
}

pub fn print_stmt(out: &mut String, stmt: &Stmt, level: usize) {
    let marker = pos_marker(stmt.pos);
    match &stmt.kind {
        StmtKind::LocalAssign { name, value } => {
            indent(out, level);
            let _ = writeln!(out, "{} := {}{}", name, expr(value), marker);
        }
        StmtKind::FieldAssign { receiver, field, value } => {
            indent(out, level);
            let _ = writeln!(out, "{}.{} := {}{}", expr(receiver), field, expr(value), marker);
        }
        StmtKind::Inhale(e) => {
            indent(out, level);
            let _ = writeln!(out, "inhale {}{}", expr(e), marker);
        }
        StmtKind::Exhale(e) => {
            indent(out, level);
            let _ = writeln!(out, "exhale {}{}", expr(e), marker);
        }
        StmtKind::Assert(e) => {
            indent(out, level);
            let _ = writeln!(out, "assert {}{}", expr(e), marker);
        }
        StmtKind::Fold(e) => {
            indent(out, level);
            let _ = writeln!(out, "fold {}{}", expr(e), marker);
        }
        StmtKind::Unfold(e) => {
            indent(out, level);
            let _ = writeln!(out, "unfold {}{}", expr(e), marker);
        }
        StmtKind::If { cond, then, orelse } => {
            indent(out, level);
            let _ = writeln!(out, "if ({}){} {{", expr(cond), marker);
            for s in then {
                print_stmt(out, s, level + 1);
            }
            if orelse.is_empty() {
                indent(out, level);
                let _ = writeln!(out, "}}");
            } else {
                indent(out, level);
                let _ = writeln!(out, "}} else {{");
                for s in orelse {
                    print_stmt(out, s, level + 1);
                }
                indent(out, level);
                let _ = writeln!(out, "}}");
            }
        }
        StmtKind::While { cond, invariants, body } => {
            indent(out, level);
            let _ = writeln!(out, "while ({}){}", expr(cond), marker);
            for inv in invariants {
                indent(out, level + 1);
                let _ = writeln!(out, "invariant {}{}", expr(inv), pos_marker(inv.pos));
            }
            indent(out, level);
            let _ = writeln!(out, "{{");
            for s in body {
                print_stmt(out, s, level + 1);
            }
            indent(out, level);
            let _ = writeln!(out, "}}");
        }
        StmtKind::Label(name) => {
            indent(out, level);
            let _ = writeln!(out, "label {}{}", name, marker);
        }
        StmtKind::Goto(name) => {
            indent(out, level);
            let _ = writeln!(out, "goto {}{}", name, marker);
        }
        StmtKind::MethodCall { method, args, targets } => {
            indent(out, level);
            let parts: Vec<_> = args.iter().map(expr).collect();
            if targets.is_empty() {
                let _ = writeln!(out, "{}({}){}", method, parts.join(", "), marker);
            } else {
                let _ = writeln!(
                    out,
                    "{} := {}({}){}",
                    targets.join(", "),
                    method,
                    parts.join(", "),
                    marker
                );
            }
        }
        StmtKind::Seqn { stmts, info } => {
            if let Some(info) = info {
                indent(out, level);
                let _ = writeln!(out, "// {}", info);
            }
            for s in stmts {
                print_stmt(out, s, level);
            }
        }
    }
}
