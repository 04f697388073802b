//! Lowering of contract expressions to IVL.
//!
//! Every expression lowers to a pure IVL expression plus a possibly-empty
//! prefix of IVL statements that must run first: arithmetic bounds
//! assertions, divisor checks, array bounds checks, and the control flow of
//! short-circuit operators with impure operands. In specification contexts
//! no statements may be produced; bounds there are modeled by invariants.

use num_bigint::BigInt;

use crate::verifier::ast::{BinOp, BoolOp, CmpOp, Expr as AstExpr, ExprKind, UnOp};
use crate::verifier::ivl::{Expr, LocalVarDecl, Sort, Stmt};
use crate::verifier::names;
use crate::verifier::positions::Position;
use crate::verifier::rules;
use crate::verifier::types::Type;

use super::state;
use super::types::translate_type;
use super::{Context, TranslationError};

/// Translate `expr`, appending any required side statements to `stmts`.
pub fn translate_expr(
    ctx: &mut Context,
    expr: &AstExpr,
    stmts: &mut Vec<Stmt>,
) -> Result<Expr, TranslationError> {
    if ctx.in_spec {
        // Side statements are illegal here; hand the node a sealed sink so
        // any attempt to emit one is caught at the violation site.
        let mut probe = Vec::new();
        let out = translate_impl(ctx, expr, &mut probe)?;
        if !probe.is_empty() {
            return Err(TranslationError::PurityViolation { span: expr.span });
        }
        return Ok(out);
    }
    translate_impl(ctx, expr, stmts)
}

fn translate_impl(
    ctx: &mut Context,
    expr: &AstExpr,
    stmts: &mut Vec<Stmt>,
) -> Result<Expr, TranslationError> {
    let pos = ctx.to_position(expr);
    match &expr.kind {
        ExprKind::Int(value) => Ok(ctx.ivl.int_lit(value.clone(), pos)),
        ExprKind::Bool(value) => Ok(if *value {
            ctx.ivl.true_lit(pos)
        } else {
            ctx.ivl.false_lit(pos)
        }),
        ExprKind::Str(text) => {
            let bytes: Vec<Expr> = text
                .bytes()
                .map(|b| ctx.ivl.int(b as i64, pos))
                .collect();
            if bytes.is_empty() {
                Ok(ctx.ivl.func_app("$seq_empty", vec![], Sort::seq(Sort::Int), pos))
            } else {
                Ok(ctx.ivl.explicit_seq(bytes, pos))
            }
        }
        ExprKind::Name(name) => translate_name(ctx, expr, name, pos),
        ExprKind::Attribute { value, attr } => translate_attribute(ctx, expr, value, attr, stmts),
        ExprKind::Subscript { value, index } => {
            translate_subscript(ctx, value, index, stmts, pos)
        }
        ExprKind::Binary { op, left, right } => {
            let lhs = translate_impl(ctx, left, stmts)?;
            let rhs = translate_impl(ctx, right, stmts)?;
            let result_ty = ctx.type_of(expr)?;
            arithmetic_op(ctx, lhs, *op, rhs, &result_ty, expr, stmts)
        }
        ExprKind::Unary { op, operand } => match op {
            UnOp::Not => {
                let inner = translate_impl(ctx, operand, stmts)?;
                Ok(ctx.ivl.not(inner, pos))
            }
            UnOp::Neg => {
                let inner = translate_impl(ctx, operand, stmts)?;
                let result = ctx.ivl.neg(inner, pos);
                if !ctx.in_spec {
                    let result_ty = ctx.type_of(expr)?;
                    check_bounds(ctx, &result, &result_ty, expr, stmts);
                }
                Ok(result)
            }
        },
        ExprKind::BoolExpr { op, left, right } => {
            translate_bool_expr(ctx, *op, left, right, stmts, pos)
        }
        ExprKind::Compare { op, left, right } => {
            let lhs = translate_impl(ctx, left, stmts)?;
            let rhs = translate_impl(ctx, right, stmts)?;
            Ok(match op {
                CmpOp::Eq => ctx.ivl.eq(lhs, rhs, pos),
                CmpOp::Ne => ctx.ivl.ne(lhs, rhs, pos),
                CmpOp::Lt => ctx.ivl.lt(lhs, rhs, pos),
                CmpOp::Le => ctx.ivl.le(lhs, rhs, pos),
                CmpOp::Gt => ctx.ivl.gt(lhs, rhs, pos),
                CmpOp::Ge => ctx.ivl.ge(lhs, rhs, pos),
            })
        }
        ExprKind::IfExpr { test, then, orelse } => {
            let cond = translate_impl(ctx, test, stmts)?;
            let mut then_stmts = Vec::new();
            let then_expr = translate_impl(ctx, then, &mut then_stmts)?;
            let mut else_stmts = Vec::new();
            let else_expr = translate_impl(ctx, orelse, &mut else_stmts)?;
            if then_stmts.is_empty() && else_stmts.is_empty() {
                Ok(ctx.ivl.cond_exp(cond, then_expr, else_expr, pos))
            } else {
                let sort = then_expr.sort.clone();
                let tmp = ctx.new_local_var_name("$cond");
                ctx.new_local_vars.push(LocalVarDecl::new(&tmp, sort.clone()));
                then_stmts.push(ctx.ivl.local_assign(&tmp, then_expr, pos));
                else_stmts.push(ctx.ivl.local_assign(&tmp, else_expr, pos));
                stmts.push(ctx.ivl.if_stmt(cond, then_stmts, else_stmts, pos));
                Ok(ctx.ivl.local_var(&tmp, sort, pos))
            }
        }
        ExprKind::Call { name, args, keywords, .. } => {
            translate_call(ctx, expr, name, args, keywords, stmts, pos)
        }
        ExprKind::ReceiverCall { receiver, name, args } => {
            translate_receiver_call(ctx, expr, receiver, name, args, stmts, pos)
        }
        ExprKind::StructInit { name, fields } => {
            translate_struct_init(ctx, expr, name, fields, stmts, pos)
        }
        ExprKind::Old(inner) => {
            let old = ctx
                .old_state()
                .cloned()
                .ok_or_else(|| TranslationError::internal("old(…) outside an old-state scope"))?;
            ctx.with_state(old, |ctx| translate_impl(ctx, inner, stmts))
        }
        ExprKind::PublicOld(inner) => {
            let old = ctx.public_old_state.clone().ok_or_else(|| {
                TranslationError::internal("public_old(…) without a public-entry snapshot")
            })?;
            ctx.with_state(old, |ctx| translate_impl(ctx, inner, stmts))
        }
        ExprKind::Forall { vars, triggers, body } => {
            if ctx.in_spec {
                super::specification::translate_forall(ctx, expr, vars, triggers, body)
            } else {
                Err(TranslationError::PurityViolation { span: expr.span })
            }
        }
    }
}

fn translate_name(
    ctx: &mut Context,
    expr: &AstExpr,
    name: &str,
    pos: Position,
) -> Result<Expr, TranslationError> {
    if let Some(var) = ctx.lookup_var(name) {
        let var = var.clone();
        return Ok(var.local_var(&ctx.ivl, pos));
    }
    Err(TranslationError::internal(format!(
        "unbound name '{}' at line {}",
        name, expr.span.line
    )))
}

fn translate_attribute(
    ctx: &mut Context,
    expr: &AstExpr,
    value: &AstExpr,
    attr: &str,
    stmts: &mut Vec<Stmt>,
) -> Result<Expr, TranslationError> {
    let pos = ctx.to_position(expr);
    if let ExprKind::Name(name) = &value.kind {
        match name.as_str() {
            names::SELF => {
                let bundle = ctx.state()?.clone();
                return bundle.read_field(ctx, attr);
            }
            names::MSG => {
                let receiver = state::msg_ref(ctx);
                let field = format!("msg${}", attr);
                return Ok(ctx.ivl.field_access(receiver, &field, pos));
            }
            names::BLOCK => {
                let receiver = state::block_ref(ctx);
                let field = format!("block${}", attr);
                return Ok(ctx.ivl.field_access(receiver, &field, pos));
            }
            _ => {}
        }
    }
    let receiver = translate_impl(ctx, value, stmts)?;
    Ok(ctx.ivl.struct_get(receiver, attr, pos))
}

fn translate_subscript(
    ctx: &mut Context,
    value: &AstExpr,
    index: &AstExpr,
    stmts: &mut Vec<Stmt>,
    pos: Position,
) -> Result<Expr, TranslationError> {
    let receiver = translate_impl(ctx, value, stmts)?;
    let idx = translate_impl(ctx, index, stmts)?;
    let receiver_ty = ctx.type_of(value)?;
    match receiver_ty {
        Type::Map(_, _) => Ok(ctx.ivl.map_get(receiver, idx, pos)),
        Type::Array(_, _) | Type::Bytes(_) => {
            if !ctx.in_spec {
                array_bounds_check(ctx, &receiver, &idx, index, stmts);
            }
            Ok(ctx.ivl.seq_index(receiver, idx, pos))
        }
        other => Err(TranslationError::unsupported(
            &format!("subscript on type {}", other),
            value.span,
        )),
    }
}

/// Assert `0 <= idx` and `idx < |seq|` before an array access.
pub fn array_bounds_check(
    ctx: &mut Context,
    receiver: &Expr,
    idx: &Expr,
    index_node: &AstExpr,
    stmts: &mut Vec<Stmt>,
) {
    let neg_pos = ctx.to_position_with_rules(index_node, rules::INDEX_NEGATIVE_FAIL);
    let zero = ctx.ivl.int(0, Position::None);
    let non_negative = ctx.ivl.le(zero, idx.clone(), neg_pos);
    stmts.push(ctx.ivl.assert_stmt(non_negative, neg_pos));

    let len_pos = ctx.to_position_with_rules(index_node, rules::INDEX_LENGTH_FAIL);
    let len = ctx.ivl.seq_length(receiver.clone(), Position::None);
    let in_range = ctx.ivl.lt(idx.clone(), len, len_pos);
    stmts.push(ctx.ivl.assert_stmt(in_range, len_pos));
}

/// Emit an arithmetic operation together with its divisor and bounds
/// assertions. Also used by augmented assignment, which must check against
/// the left-hand side's declared type.
pub fn arithmetic_op(
    ctx: &mut Context,
    lhs: Expr,
    op: BinOp,
    rhs: Expr,
    result_ty: &Type,
    node: &AstExpr,
    stmts: &mut Vec<Stmt>,
) -> Result<Expr, TranslationError> {
    let pos = ctx.to_position(node);
    if matches!(op, BinOp::Div | BinOp::Mod) && !ctx.in_spec {
        let div_pos = ctx.to_position_with_rules(node, rules::DIVISION_BY_ZERO_FAIL);
        let zero = ctx.ivl.int(0, Position::None);
        let non_zero = ctx.ivl.ne(rhs.clone(), zero, div_pos);
        stmts.push(ctx.ivl.assert_stmt(non_zero, div_pos));
    }
    let result = match op {
        BinOp::Add => ctx.ivl.add(lhs, rhs, pos),
        BinOp::Sub => ctx.ivl.sub(lhs, rhs, pos),
        BinOp::Mul => ctx.ivl.mul(lhs, rhs, pos),
        BinOp::Div => ctx.ivl.div(lhs, rhs, pos),
        BinOp::Mod => ctx.ivl.modulo(lhs, rhs, pos),
    };
    if !ctx.in_spec {
        check_bounds(ctx, &result, result_ty, node, stmts);
    }
    Ok(result)
}

/// Assert `lo(T) <= e` (underflow) and `e <= hi(T)` (overflow) immediately
/// before the result is used.
fn check_bounds(ctx: &mut Context, result: &Expr, ty: &Type, node: &AstExpr, stmts: &mut Vec<Stmt>) {
    let Some((lo, hi)) = ty.bounds() else { return };
    let under_pos = ctx.to_position_with_rules(node, rules::UNDERFLOW_FAIL);
    let lo_lit = ctx.ivl.int_lit(lo, Position::None);
    let not_under = ctx.ivl.le(lo_lit, result.clone(), under_pos);
    stmts.push(ctx.ivl.assert_stmt(not_under, under_pos));

    let over_pos = ctx.to_position_with_rules(node, rules::OVERFLOW_FAIL);
    let hi_lit = ctx.ivl.int_lit(hi, Position::None);
    let not_over = ctx.ivl.le(result.clone(), hi_lit, over_pos);
    stmts.push(ctx.ivl.assert_stmt(not_over, over_pos));
}

fn translate_bool_expr(
    ctx: &mut Context,
    op: BoolOp,
    left: &AstExpr,
    right: &AstExpr,
    stmts: &mut Vec<Stmt>,
    pos: Position,
) -> Result<Expr, TranslationError> {
    let lhs = translate_impl(ctx, left, stmts)?;
    let mut right_stmts = Vec::new();
    let rhs = translate_impl(ctx, right, &mut right_stmts)?;

    if right_stmts.is_empty() {
        return Ok(match op {
            BoolOp::And => ctx.ivl.and(lhs, rhs, pos),
            BoolOp::Or => ctx.ivl.or(lhs, rhs, pos),
            BoolOp::Implies => ctx.ivl.implies(lhs, rhs, pos),
        });
    }

    // The right operand has side statements; only evaluate them when the
    // left operand does not already decide the result.
    let tmp = ctx.new_local_var_name("$shortcirc");
    ctx.new_local_vars.push(LocalVarDecl::new(&tmp, Sort::Bool));
    right_stmts.push(ctx.ivl.local_assign(&tmp, rhs, pos));
    let skip_value = match op {
        BoolOp::And => ctx.ivl.false_lit(pos),
        BoolOp::Or => ctx.ivl.true_lit(pos),
        BoolOp::Implies => ctx.ivl.true_lit(pos),
    };
    let skip = vec![ctx.ivl.local_assign(&tmp, skip_value, pos)];
    let stmt = match op {
        BoolOp::And | BoolOp::Implies => ctx.ivl.if_stmt(lhs, right_stmts, skip, pos),
        BoolOp::Or => ctx.ivl.if_stmt(lhs, skip, right_stmts, pos),
    };
    stmts.push(stmt);
    Ok(ctx.ivl.local_var(&tmp, Sort::Bool, pos))
}

fn translate_call(
    ctx: &mut Context,
    expr: &AstExpr,
    name: &str,
    args: &[AstExpr],
    keywords: &[(String, AstExpr)],
    stmts: &mut Vec<Stmt>,
    pos: Position,
) -> Result<Expr, TranslationError> {
    match name {
        names::MIN | names::MAX => {
            let a = translate_impl(ctx, &args[0], stmts)?;
            let b = translate_impl(ctx, &args[1], stmts)?;
            let cmp = ctx.ivl.le(a.clone(), b.clone(), pos);
            Ok(if name == names::MIN {
                ctx.ivl.cond_exp(cmp, a, b, pos)
            } else {
                ctx.ivl.cond_exp(cmp, b, a, pos)
            })
        }
        names::LEN => {
            let seq = translate_impl(ctx, &args[0], stmts)?;
            Ok(ctx.ivl.seq_length(seq, pos))
        }
        names::RANGE => {
            let ty = ctx.type_of(expr)?;
            let Type::Array(_, size) = ty else {
                return Err(TranslationError::internal("range not typed as array"));
            };
            let start = match args {
                [_stop] => BigInt::from(0),
                [start, _stop] => match &start.kind {
                    ExprKind::Int(v) => v.clone(),
                    _ => return Err(TranslationError::internal("non-constant range start")),
                },
                _ => return Err(TranslationError::internal("malformed range call")),
            };
            let elems: Vec<Expr> = (0..size)
                .map(|i| ctx.ivl.int_lit(start.clone() + BigInt::from(i), pos))
                .collect();
            if elems.is_empty() {
                Ok(ctx.ivl.func_app("$seq_empty", vec![], Sort::seq(Sort::Int), pos))
            } else {
                Ok(ctx.ivl.explicit_seq(elems, pos))
            }
        }
        names::SUM => {
            let arg = translate_impl(ctx, &args[0], stmts)?;
            match &arg.sort {
                Sort::Map(_, _) => Ok(ctx.ivl.map_sum(arg, pos)),
                Sort::Seq(_) => Ok(ctx.ivl.func_app("$seq_sum", vec![arg], Sort::Int, pos)),
                other => Err(TranslationError::internal(format!("sum over sort {:?}", other))),
            }
        }
        names::IMPLIES => {
            let a = translate_impl(ctx, &args[0], stmts)?;
            let b = translate_impl(ctx, &args[1], stmts)?;
            Ok(ctx.ivl.implies(a, b, pos))
        }
        names::RESULT => {
            let var = ctx
                .result_var
                .clone()
                .ok_or_else(|| TranslationError::internal("result() without a result variable"))?;
            Ok(var.local_var(&ctx.ivl, pos))
        }
        names::SUCCESS => {
            let var = ctx
                .success_var
                .clone()
                .ok_or_else(|| TranslationError::internal("success() without a success variable"))?;
            Ok(var.local_var(&ctx.ivl, pos))
        }
        names::CLEAR => Err(TranslationError::internal(
            "clear(…) is a statement and is handled by the statement translator",
        )),
        _ if names::is_ghost_builtin(name) => {
            if ctx.in_spec {
                super::specification::translate_ghost_call(ctx, expr, name, args, keywords)
            } else {
                Err(TranslationError::unsupported(
                    &format!("'{}' is only allowed in specifications", name),
                    expr.span,
                ))
            }
        }
        _ => Err(TranslationError::unsupported(
            &format!("call to unknown function '{}'", name),
            expr.span,
        )),
    }
}

/// An external call through an interface handle: the contract invariants
/// are checked at the call boundary, the state is havocked, and the
/// invariants are assumed again afterwards.
fn translate_receiver_call(
    ctx: &mut Context,
    expr: &AstExpr,
    receiver: &AstExpr,
    name: &str,
    args: &[AstExpr],
    stmts: &mut Vec<Stmt>,
    pos: Position,
) -> Result<Expr, TranslationError> {
    if ctx.in_spec {
        // Ghost function applications are the one pure receiver call.
        if ctx.program.ghost_functions.contains_key(name) {
            return super::specification::translate_ghost_function_call(
                ctx, expr, receiver, name, args,
            );
        }
        return Err(TranslationError::PurityViolation { span: expr.span });
    }
    for arg in args {
        let translated = translate_impl(ctx, arg, stmts)?;
        // Argument evaluation may emit checks; the value itself is not
        // constrained further here.
        let _ = translated;
    }

    // Invariants must hold when control leaves this contract.
    let invariants = ctx.program.invariants.clone();
    for inv in &invariants {
        let inv_pos = ctx.to_position_with_rules(inv, rules::CALL_INVARIANT_FAIL);
        let translated = super::specification::translate_spec(ctx, inv)?;
        stmts.push(ctx.ivl.assert_stmt(translated, inv_pos));
    }
    // Checks must hold as well.
    let checks = ctx.program.general_checks.clone();
    for check in &checks {
        let check_pos = ctx.to_position_with_rules(check, rules::CALL_CHECK_FAIL);
        let translated = super::specification::translate_spec(ctx, check)?;
        stmts.push(ctx.ivl.assert_stmt(translated, check_pos));
    }

    // The callee may reenter and change everything we do not control.
    state::havoc_current(ctx, stmts)?;
    state::assume_framed(ctx, &invariants, stmts)?;

    // The call result is unconstrained.
    let result_ty = ctx.type_of(expr)?;
    let sort = translate_type(&result_ty);
    Ok(ctx.havoc_var(sort).clone_with_pos(pos))
}

fn translate_struct_init(
    ctx: &mut Context,
    expr: &AstExpr,
    name: &str,
    fields: &[(String, AstExpr)],
    stmts: &mut Vec<Stmt>,
    pos: Position,
) -> Result<Expr, TranslationError> {
    let st = ctx
        .program
        .structs
        .get(name)
        .cloned()
        .ok_or_else(|| TranslationError::internal(format!("unknown struct '{}'", name)))?;
    let mut args = Vec::with_capacity(st.fields.len());
    for (field_name, field_ty) in &st.fields {
        match fields.iter().find(|(n, _)| n == field_name) {
            Some((_, value)) => args.push(translate_impl(ctx, value, stmts)?),
            None => args.push(super::types::default_value(ctx, field_ty, pos)?),
        }
    }
    let _ = expr;
    Ok(ctx.ivl.struct_init(name, args, pos))
}
