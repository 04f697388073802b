//! Lowering of statements: assignments with deep structural update,
//! bounded loops with and without invariants, revert control flow, and the
//! try/finally emulation.

use crate::verifier::ast::{
    Expr as AstExpr, ExprKind, Handler, Stmt as AstStmt, StmtKind,
};
use crate::verifier::ivl::{Expr, LocalVarDecl, Sort, Stmt};
use crate::verifier::names;
use crate::verifier::positions::{ModelTransform, Position, Via};
use crate::verifier::rules;
use crate::verifier::types::Type;

use super::expression::{self, translate_expr};
use super::resource;
use super::specification;
use super::state;
use super::types::{default_value, translate_type};
use super::{Context, TranslatedVar, TranslationError, TryFrame};

pub fn translate_stmts(
    ctx: &mut Context,
    stmts: &[AstStmt],
    res: &mut Vec<Stmt>,
) -> Result<(), TranslationError> {
    for stmt in stmts {
        translate_stmt(ctx, stmt, res)?;
    }
    Ok(())
}

pub fn translate_stmt(
    ctx: &mut Context,
    stmt: &AstStmt,
    res: &mut Vec<Stmt>,
) -> Result<(), TranslationError> {
    match &stmt.kind {
        StmtKind::LocalDecl { name, ty, value } => {
            let var = add_local_var(ctx, name, ty);
            let rhs = match value {
                Some(value) => translate_expr(ctx, value, res)?,
                None => default_value(ctx, ty, Position::None)?,
            };
            let pos = ctx.span_position(stmt.span, name, rules::NO_RULES);
            res.push(ctx.ivl.local_assign(&var.ivl_name, rhs, pos));
            Ok(())
        }
        StmtKind::Assign { target, value } => {
            let rhs = translate_expr(ctx, value, res)?;
            assign_to(ctx, target, rhs, res)
        }
        StmtKind::AugAssign { target, op, value } => {
            let lhs = translate_expr(ctx, target, res)?;
            let rhs = translate_expr(ctx, value, res)?;
            // The bounds check always uses the left-hand side's declared
            // type; a wider right-hand side never widens the operation.
            let target_ty = ctx.type_of(target)?;
            let result = expression::arithmetic_op(ctx, lhs, *op, rhs, &target_ty, value, res)?;
            assign_to(ctx, target, result, res)
        }
        StmtKind::ExprStmt { value } => translate_expr_stmt(ctx, value, res),
        StmtKind::Log { event, args } => translate_log(ctx, stmt, event, args, res),
        StmtKind::If { test, body, orelse } => {
            let pos = ctx.to_position(test);
            let cond = translate_expr(ctx, test, res)?;
            let mut then_body = Vec::new();
            translate_stmts(ctx, body, &mut then_body)?;
            let mut else_body = Vec::new();
            translate_stmts(ctx, orelse, &mut else_body)?;
            res.push(ctx.ivl.if_stmt(cond, then_body, else_body, pos));
            Ok(())
        }
        StmtKind::For { target, target_span, iter, invariants, body } => {
            translate_for(ctx, stmt, target, *target_span, iter, invariants, body, res)
        }
        StmtKind::Raise { msg } => {
            match msg {
                Some(msg) if msg.is_unreachable_marker() => {
                    // Prove the raise unreachable; keep the model so a
                    // counterexample can name source variables.
                    let modelt = save_model(ctx);
                    let mpos = ctx.position_with_model(msg, modelt);
                    let f = ctx.ivl.false_lit(mpos);
                    res.push(ctx.ivl.assert_stmt(f, mpos));
                    Ok(())
                }
                _ => {
                    let pos = ctx.span_position(stmt.span, "raise", rules::NO_RULES);
                    raise_to(ctx, msg.as_ref(), pos, res)
                }
            }
        }
        StmtKind::Assert { test, msg, is_ghost } => {
            let expr = if *is_ghost {
                specification::translate_spec(ctx, test)?
            } else {
                translate_expr(ctx, test, res)?
            };
            match msg {
                Some(msg) if msg.is_unreachable_marker() => {
                    let modelt = save_model(ctx);
                    let mpos = ctx.position_with_model(test, modelt);
                    res.push(ctx.ivl.assert_stmt(expr, mpos));
                    Ok(())
                }
                _ => {
                    let pos = ctx.to_position(test);
                    let cond = ctx.ivl.not(expr, pos);
                    fail_if(ctx, cond, pos, res)
                }
            }
        }
        StmtKind::Return { value } => {
            let pos = ctx.span_position(stmt.span, "return", rules::NO_RULES);
            if let Some(value) = value {
                let expr = translate_expr(ctx, value, res)?;
                let result_var = ctx
                    .result_var
                    .clone()
                    .ok_or_else(|| TranslationError::internal("return without a result variable"))?;
                res.push(ctx.ivl.local_assign(&result_var.ivl_name, expr, pos));
            }
            // Inside a try the finally block runs first and re-dispatches.
            if let Some(frame) = ctx.innermost_try().cloned() {
                let one = ctx.ivl.int(1, pos);
                res.push(ctx.ivl.local_assign(&frame.mode_var, one, pos));
                res.push(ctx.ivl.goto(&frame.finally_label, pos));
            } else {
                let label = ctx.return_label.clone();
                res.push(ctx.ivl.goto(&label, pos));
            }
            Ok(())
        }
        StmtKind::Break => {
            let pos = ctx.span_position(stmt.span, "break", rules::NO_RULES);
            let label = ctx.break_label()?.to_string();
            res.push(ctx.ivl.goto(&label, pos));
            Ok(())
        }
        StmtKind::Continue => {
            let pos = ctx.span_position(stmt.span, "continue", rules::NO_RULES);
            let label = ctx.continue_label()?.to_string();
            res.push(ctx.ivl.goto(&label, pos));
            Ok(())
        }
        StmtKind::Pass => Ok(()),
        StmtKind::Try { body, handlers, finally } => {
            translate_try(ctx, stmt, body, handlers, finally, res)
        }
    }
}

/// `if cond: goto revert`.
pub fn fail_if(
    ctx: &mut Context,
    cond: Expr,
    pos: Position,
    res: &mut Vec<Stmt>,
) -> Result<(), TranslationError> {
    let goto = vec![goto_revert(ctx, pos)];
    res.push(ctx.ivl.if_stmt(cond, goto, vec![], pos));
    Ok(())
}

/// Jump to the revert sink, or to the innermost finally dispatch in
/// exception mode when inside a `try`.
fn goto_revert(ctx: &mut Context, pos: Position) -> Stmt {
    match ctx.innermost_try().cloned() {
        Some(frame) => {
            let two = ctx.ivl.int(2, pos);
            let set_mode = ctx.ivl.local_assign(&frame.mode_var, two, pos);
            let goto = ctx.ivl.goto(&frame.finally_label, pos);
            ctx.ivl.seqn(vec![set_mode, goto], pos)
        }
        None => {
            let label = ctx.revert_label.clone();
            ctx.ivl.goto(&label, pos)
        }
    }
}

fn raise_to(
    ctx: &mut Context,
    msg: Option<&AstExpr>,
    pos: Position,
    res: &mut Vec<Stmt>,
) -> Result<(), TranslationError> {
    if let Some(frame) = ctx.innermost_try().cloned() {
        let error = match msg {
            Some(msg) => translate_expr(ctx, msg, res)?,
            None => ctx.ivl.int(0, pos),
        };
        if error.sort == Sort::Int {
            res.push(ctx.ivl.local_assign(&frame.error_var, error, pos));
        }
        let two = ctx.ivl.int(2, pos);
        res.push(ctx.ivl.local_assign(&frame.mode_var, two, pos));
        res.push(ctx.ivl.goto(&frame.finally_label, pos));
    } else {
        let label = ctx.revert_label.clone();
        res.push(ctx.ivl.goto(&label, pos));
    }
    Ok(())
}

fn translate_expr_stmt(
    ctx: &mut Context,
    value: &AstExpr,
    res: &mut Vec<Stmt>,
) -> Result<(), TranslationError> {
    if let ExprKind::Call { name, args, keywords, .. } = &value.kind {
        match name.as_str() {
            // `clear(x)` is an assignment of the default value.
            names::CLEAR => {
                let arg = args
                    .first()
                    .ok_or_else(|| TranslationError::internal("clear expects an argument"))?;
                let ty = ctx.type_of(arg)?;
                let default = default_value(ctx, &ty, Position::None)?;
                return assign_to(ctx, arg, default, res);
            }
            names::ALLOCATE => {
                let resource_value = resource::translate_resource(ctx, args.first(), res)?;
                let amount = translate_expr(
                    ctx,
                    args.get(1).ok_or_else(|| {
                        TranslationError::internal("allocate expects an amount")
                    })?,
                    res,
                )?;
                let owner = match keyword(keywords, names::KW_TO) {
                    Some(owner) => translate_expr(ctx, owner, res)?,
                    None => specification::msg_sender(ctx),
                };
                return resource::encode_allocate(ctx, value, resource_value, amount, owner, res);
            }
            names::REALLOCATE => {
                let resource_value = resource::translate_resource(ctx, args.first(), res)?;
                let amount = translate_expr(
                    ctx,
                    args.get(1).ok_or_else(|| {
                        TranslationError::internal("reallocate expects an amount")
                    })?,
                    res,
                )?;
                let to = match keyword(keywords, names::KW_TO) {
                    Some(to) => translate_expr(ctx, to, res)?,
                    None => {
                        return Err(TranslationError::internal(
                            "reallocate requires a 'to' keyword",
                        ))
                    }
                };
                let from = specification::msg_sender(ctx);
                return resource::encode_reallocate(
                    ctx,
                    value,
                    resource_value,
                    amount,
                    from,
                    to,
                    res,
                );
            }
            names::OFFER => {
                let [_, _, left_amount_node, right_amount_node] = args.as_slice() else {
                    return Err(TranslationError::internal(
                        "offer expects (left, right, left amount, right amount)",
                    ));
                };
                let left = resource::translate_resource(ctx, args.first(), res)?;
                let right = resource::translate_resource(ctx, args.get(1), res)?;
                let left_amount = translate_expr(ctx, left_amount_node, res)?;
                let right_amount = translate_expr(ctx, right_amount_node, res)?;
                let to = match keyword(keywords, names::KW_TO) {
                    Some(to) => translate_expr(ctx, to, res)?,
                    None => {
                        return Err(TranslationError::internal("offer requires a 'to' keyword"))
                    }
                };
                let from = specification::msg_sender(ctx);
                return resource::encode_offer(
                    ctx,
                    value,
                    left,
                    right,
                    left_amount,
                    right_amount,
                    from,
                    to,
                    res,
                );
            }
            names::EXCHANGE => {
                let [_, _, ln, rn, an, bn] = args.as_slice() else {
                    return Err(TranslationError::internal(
                        "exchange expects (left, right, amounts, parties)",
                    ));
                };
                let left = resource::translate_resource(ctx, args.first(), res)?;
                let right = resource::translate_resource(ctx, args.get(1), res)?;
                let left_amount = translate_expr(ctx, ln, res)?;
                let right_amount = translate_expr(ctx, rn, res)?;
                let party_a = translate_expr(ctx, an, res)?;
                let party_b = translate_expr(ctx, bn, res)?;
                return resource::encode_exchange(
                    ctx,
                    value,
                    left,
                    right,
                    left_amount,
                    right_amount,
                    party_a,
                    party_b,
                    res,
                );
            }
            names::TRUST => {
                let address_node = args
                    .first()
                    .ok_or_else(|| TranslationError::internal("trust expects an address"))?;
                let address = translate_expr(ctx, address_node, res)?;
                let by = match keyword(keywords, names::KW_BY) {
                    Some(by) => translate_expr(ctx, by, res)?,
                    None => specification::msg_sender(ctx),
                };
                return resource::encode_trust(ctx, value, address, by, res);
            }
            _ => {}
        }
    }
    // Evaluate for its checks, discard the value.
    let _ = translate_expr(ctx, value, res)?;
    Ok(())
}

fn keyword<'e>(keywords: &'e [(String, AstExpr)], name: &str) -> Option<&'e AstExpr> {
    keywords.iter().find(|(k, _)| k == name).map(|(_, v)| v)
}

fn translate_log(
    ctx: &mut Context,
    stmt: &AstStmt,
    event: &str,
    args: &[AstExpr],
    res: &mut Vec<Stmt>,
) -> Result<(), TranslationError> {
    let pos = ctx.span_position(stmt.span, event, rules::NO_RULES);
    let mut translated = Vec::with_capacity(args.len());
    for arg in args {
        translated.push(translate_expr(ctx, arg, res)?);
    }
    let instance = ctx.ivl.func_app(
        &format!("$event${}", event),
        translated,
        Sort::Struct(super::types::EVENT_SORT_NAME.to_string()),
        pos,
    );
    let bundle = ctx.state()?.clone();
    let events = bundle.read(ctx, state::EVENTS)?;
    let current = ctx.ivl.map_get(events.clone(), instance.clone(), pos);
    let one = ctx.ivl.int(1, pos);
    let incremented = ctx.ivl.add(current, one, pos);
    let updated = ctx.ivl.map_set(events, instance, incremented, pos);
    res.push(ctx.ivl.local_assign(state::EVENTS, updated, pos));
    Ok(())
}

// ── Assignment targets ──────────────────────────────────────────────

/// Assign `value` to an l-value, walking nested struct/map/array targets
/// from the outside in and rebuilding the aggregate.
pub fn assign_to(
    ctx: &mut Context,
    target: &AstExpr,
    value: Expr,
    res: &mut Vec<Stmt>,
) -> Result<(), TranslationError> {
    let pos = ctx.to_position(target);
    match &target.kind {
        ExprKind::Name(name) => {
            let var = ctx
                .lookup_var(name)
                .cloned()
                .ok_or_else(|| TranslationError::internal(format!("unbound target '{}'", name)))?;
            res.push(ctx.ivl.local_assign(&var.ivl_name, value, pos));
            Ok(())
        }
        ExprKind::Attribute { value: receiver, attr } => {
            if matches!(&receiver.kind, ExprKind::Name(n) if n == names::SELF) {
                let self_ref = state::self_ref(ctx);
                res.push(ctx.ivl.field_assign(self_ref, attr, value, pos));
                return Ok(());
            }
            // Struct member: rebuild the record and assign it upwards.
            let receiver_value = translate_expr(ctx, receiver, res)?;
            let updated = ctx.ivl.struct_set(receiver_value, attr, value, pos);
            assign_to(ctx, receiver, updated, res)
        }
        ExprKind::Subscript { value: receiver, index } => {
            let receiver_value = translate_expr(ctx, receiver, res)?;
            let idx = translate_expr(ctx, index, res)?;
            let receiver_ty = ctx.type_of(receiver)?;
            let updated = match receiver_ty {
                Type::Map(_, _) => ctx.ivl.map_set(receiver_value, idx, value, pos),
                Type::Array(_, _) | Type::Bytes(_) => {
                    expression::array_bounds_check(ctx, &receiver_value, &idx, index, res);
                    let sort = receiver_value.sort.clone();
                    ctx.ivl
                        .func_app("$seq_update", vec![receiver_value, idx, value], sort, pos)
                }
                other => {
                    return Err(TranslationError::unsupported(
                        &format!("assignment into type {}", other),
                        target.span,
                    ))
                }
            };
            assign_to(ctx, receiver, updated, res)
        }
        _ => Err(TranslationError::unsupported(
            "assignment target",
            target.span,
        )),
    }
}

// ── Local variables and models ──────────────────────────────────────

pub fn add_local_var(ctx: &mut Context, name: &str, ty: &Type) -> TranslatedVar {
    let mangled = ctx.new_local_var_name(name);
    let sort = translate_type(ty);
    let var = TranslatedVar {
        name: name.to_string(),
        ivl_name: mangled,
        ty: ty.clone(),
        sort: sort.clone(),
    };
    ctx.new_local_vars.push(var.decl());
    ctx.locals.insert(name.to_string(), var.clone());
    var
}

/// Record the mapping from mangled IVL names back to source names, so a
/// counterexample model can be rendered in the user's vocabulary.
pub fn save_model(ctx: &Context) -> ModelTransform {
    let mut bindings: Vec<(String, String)> = Vec::new();
    for var in ctx.args.values().chain(ctx.locals.values()) {
        bindings.push((var.ivl_name.clone(), var.name.clone()));
    }
    bindings.sort();
    ModelTransform { bindings }
}

// ── Loops ───────────────────────────────────────────────────────────

#[allow(clippy::too_many_arguments)]
fn translate_for(
    ctx: &mut Context,
    stmt: &AstStmt,
    target: &str,
    target_span: covenant_core::span::Span,
    iter: &AstExpr,
    invariants: &[AstExpr],
    body: &[AstStmt],
    res: &mut Vec<Stmt>,
) -> Result<(), TranslationError> {
    let iter_ty = ctx.type_of(iter)?;
    let Type::Array(elem_ty, times) = iter_ty else {
        return Err(TranslationError::internal("loop iterable not typed as array"));
    };
    // An empty iteration domain makes the body unreachable.
    if times == 0 {
        return Ok(());
    }

    let pos = ctx.span_position(stmt.span, "for", rules::NO_RULES);
    let lpos = ctx.span_position(target_span, target, rules::NO_RULES);
    let rpos = ctx.to_position(iter);

    let loop_var = add_local_var(ctx, target, &elem_ty);

    // The encoding choice depends only on the presence of loop invariants.
    if invariants.is_empty() {
        translate_unrolled_for(ctx, target, iter, body, times, loop_var, pos, lpos, rpos, res)
    } else {
        translate_havoc_for(
            ctx, target, iter, invariants, body, times, loop_var, pos, lpos, rpos, res,
        )
    }
}

#[allow(clippy::too_many_arguments)]
fn translate_unrolled_for(
    ctx: &mut Context,
    _target: &str,
    iter: &AstExpr,
    body: &[AstStmt],
    times: usize,
    loop_var: TranslatedVar,
    pos: Position,
    lpos: Position,
    rpos: Position,
    res: &mut Vec<Stmt>,
) -> Result<(), TranslationError> {
    ctx.with_break_scope(|ctx, break_label| -> Result<(), TranslationError> {
        let array = translate_expr(ctx, iter, res)?;
        for i in 0..times {
            let iteration_result: Result<(), TranslationError> =
                ctx.with_continue_scope(|ctx, continue_label| {
                    let idx = ctx.ivl.int(i as i64, lpos);
                    let at = ctx.ivl.seq_index(array.clone(), idx, rpos);
                    let var_set = ctx.ivl.local_assign(&loop_var.ivl_name, at, lpos);
                    let mut iteration = vec![var_set];
                    translate_stmts(ctx, body, &mut iteration)?;
                    iteration.push(ctx.ivl.label(&continue_label, pos));
                    res.push(ctx.ivl.seqn_with_info(iteration, "Loop iteration", pos));
                    Ok(())
                });
            iteration_result?;
        }
        res.push(ctx.ivl.label(&break_label, pos));
        Ok(())
    })
}

/// The havoc-and-assume protocol for loops that carry invariants.
#[allow(clippy::too_many_arguments)]
fn translate_havoc_for(
    ctx: &mut Context,
    target: &str,
    iter: &AstExpr,
    invariants: &[AstExpr],
    body: &[AstStmt],
    times: usize,
    loop_var: TranslatedVar,
    pos: Position,
    lpos: Position,
    rpos: Position,
    res: &mut Vec<Stmt>,
) -> Result<(), TranslationError> {
    // The iterable is evaluated exactly once.
    let array = translate_expr(ctx, iter, res)?;
    ctx.loop_arrays.insert(target.to_string(), array.clone());

    // $idx of uint256, with a breadcrumb back to the iterable.
    let idx_pos = ctx.position_with_vias(
        iter,
        rules::NO_RULES,
        vec![Via::new("index of array", iter.span)],
    );
    let idx_mangled = ctx.new_local_var_name("$idx");
    let idx_var = TranslatedVar {
        name: "$idx".to_string(),
        ivl_name: idx_mangled,
        ty: Type::uint256(),
        sort: Sort::Int,
    };
    ctx.new_local_vars.push(idx_var.decl());
    ctx.loop_indices.insert(target.to_string(), idx_var.clone());
    let idx = idx_var.local_var(&ctx.ivl, idx_pos);

    // Base case: iteration zero.
    let zero = ctx.ivl.int(0, rpos);
    let idx_is_zero = ctx.ivl.eq(idx.clone(), zero, rpos);
    let assume_base = ctx.ivl.inhale(idx_is_zero, rpos);
    let at = ctx.ivl.seq_index(array.clone(), idx.clone(), rpos);
    let set_loop_var = ctx.ivl.local_assign(&loop_var.ivl_name, at, lpos);
    res.push(ctx.ivl.seqn_with_info(
        vec![assume_base, set_loop_var],
        "Base case: Known property about loop variable",
        pos,
    ));

    // Materialize the invariant translations once, before any snapshot
    // they depend on can be replaced.
    let mut translated_invariants = Vec::with_capacity(invariants.len());
    for inv in invariants {
        translated_invariants.push((inv, specification::translate_spec(ctx, inv)?));
    }

    let mut base_checks = Vec::with_capacity(translated_invariants.len());
    for (inv, cond) in &translated_invariants {
        let cond_pos = ctx.to_position_with_rules(*inv, rules::LOOP_INVARIANT_BASE_FAIL);
        base_checks.push(ctx.ivl.assert_stmt(cond.clone_with_pos(cond_pos), cond_pos));
    }
    res.push(ctx.ivl.seqn_with_info(base_checks, "Check loop invariants before iteration 0", pos));

    // Step case: havoc everything the loop can change.
    let mut havoc_stmts = Vec::new();
    let idx_havoc = ctx.havoc_var(Sort::Int);
    havoc_stmts.push(ctx.ivl.local_assign(&idx_var.ivl_name, idx_havoc, Position::None));
    let var_havoc = ctx.havoc_var(loop_var.sort.clone());
    havoc_stmts.push(ctx.ivl.local_assign(&loop_var.ivl_name, var_havoc, Position::None));
    state::havoc_old_and_current(ctx, &mut havoc_stmts)?;
    for name in assigned_locals(body) {
        if let Some(var) = ctx.locals.get(&name).cloned() {
            let fresh = ctx.havoc_var(var.sort.clone());
            havoc_stmts.push(ctx.ivl.local_assign(&var.ivl_name, fresh, Position::None));
        }
    }
    res.push(ctx.ivl.seqn_with_info(havoc_stmts, "Havoc state", pos));

    // Assume the index range and rebind the loop variable.
    let zero = ctx.ivl.int(0, rpos);
    let ge_zero = ctx.ivl.ge(idx.clone(), zero, rpos);
    let times_lit = ctx.ivl.int(times as i64, rpos);
    let lt_times = ctx.ivl.lt(idx.clone(), times_lit.clone(), rpos);
    let in_range = ctx.ivl.and(ge_zero, lt_times, rpos);
    let assume_step = ctx.ivl.inhale(in_range, rpos);
    let at = ctx.ivl.seq_index(array.clone(), idx.clone(), rpos);
    let set_loop_var = ctx.ivl.local_assign(&loop_var.ivl_name, at, lpos);
    res.push(ctx.ivl.seqn_with_info(
        vec![assume_step, set_loop_var],
        "Step case: Known property about loop variable",
        pos,
    ));

    let mut assumed = Vec::with_capacity(translated_invariants.len());
    for (inv, cond) in &translated_invariants {
        let cond_pos = ctx.to_position(*inv);
        assumed.push(ctx.ivl.inhale(cond.clone_with_pos(cond_pos), cond_pos));
    }
    res.push(ctx.ivl.seqn_with_info(assumed, "Assume loop invariants", pos));

    let step_checks: Vec<(Position, Expr)> = translated_invariants
        .iter()
        .map(|(inv, cond)| {
            let cond_pos = ctx.to_position_with_rules(*inv, rules::LOOP_INVARIANT_STEP_FAIL);
            (cond_pos, cond.clone_with_pos(cond_pos))
        })
        .collect();

    let loop_result: Result<(), TranslationError> = ctx.with_break_scope(|ctx, break_label| {
        let step_result: Result<(), TranslationError> =
            ctx.with_continue_scope(|ctx, continue_label| {
            let mut loop_body = Vec::new();
            translate_stmts(ctx, body, &mut loop_body)?;
            res.push(ctx.ivl.seqn_with_info(loop_body, "Loop body", pos));
            res.push(ctx.ivl.label(&continue_label, pos));

            // After the body: advance, terminate, or prove the next step.
            let one = ctx.ivl.int(1, pos);
            let incremented = ctx.ivl.add(idx.clone(), one, pos);
            res.push(ctx.ivl.local_assign(&idx_var.ivl_name, incremented, pos));
            let done = ctx.ivl.eq(idx.clone(), times_lit.clone(), pos);
            let goto_break = ctx.ivl.goto(&break_label, pos);
            res.push(ctx.ivl.if_stmt(done, vec![goto_break], vec![], pos));
            let at = ctx.ivl.seq_index(array.clone(), idx.clone(), rpos);
            res.push(ctx.ivl.local_assign(&loop_var.ivl_name, at, lpos));

            let mut checks = Vec::with_capacity(step_checks.len());
            for (cond_pos, cond) in &step_checks {
                checks.push(ctx.ivl.assert_stmt(cond.clone(), *cond_pos));
            }
            res.push(ctx.ivl.seqn_with_info(
                checks,
                "Check loop invariants for iteration idx + 1",
                pos,
            ));

            // Prune the step-case branch; its obligations are discharged.
            let f = ctx.ivl.false_lit(pos);
            res.push(ctx.ivl.inhale(f, pos));
            Ok(())
        });
        step_result?;
        res.push(ctx.ivl.label(&break_label, pos));
        Ok(())
    });
    loop_result
}

/// Names of locals the loop body writes; the step case havocs them.
fn assigned_locals(body: &[AstStmt]) -> Vec<String> {
    fn target_root(expr: &AstExpr) -> Option<String> {
        match &expr.kind {
            ExprKind::Name(name) => Some(name.clone()),
            ExprKind::Attribute { value, .. } | ExprKind::Subscript { value, .. } => {
                target_root(value)
            }
            _ => None,
        }
    }
    fn walk(stmts: &[AstStmt], out: &mut Vec<String>) {
        for stmt in stmts {
            match &stmt.kind {
                StmtKind::Assign { target, .. } | StmtKind::AugAssign { target, .. } => {
                    if let Some(name) = target_root(target) {
                        if name != names::SELF && !out.contains(&name) {
                            out.push(name);
                        }
                    }
                }
                StmtKind::LocalDecl { name, .. } => {
                    if !out.contains(name) {
                        out.push(name.clone());
                    }
                }
                StmtKind::If { body, orelse, .. } => {
                    walk(body, out);
                    walk(orelse, out);
                }
                StmtKind::For { body, .. } => walk(body, out),
                StmtKind::Try { body, handlers, finally } => {
                    walk(body, out);
                    for handler in handlers {
                        walk(&handler.body, out);
                    }
                    walk(finally, out);
                }
                _ => {}
            }
        }
    }
    let mut out = Vec::new();
    walk(body, &mut out);
    out
}

// ── Try/finally ─────────────────────────────────────────────────────

/// Emulate exception control flow: bodies jump to the finally dispatch,
/// which switches on the mode variable to re-raise, propagate a return, or
/// fall through.
fn translate_try(
    ctx: &mut Context,
    stmt: &AstStmt,
    body: &[AstStmt],
    handlers: &[Handler],
    finally: &[AstStmt],
    res: &mut Vec<Stmt>,
) -> Result<(), TranslationError> {
    let pos = ctx.span_position(stmt.span, "try", rules::NO_RULES);

    let finally_label = ctx.fresh_label("finally");
    let post_label = ctx.fresh_label("post_try");
    let mode_name = ctx.new_local_var_name("$finally_mode");
    ctx.new_local_vars.push(LocalVarDecl::new(&mode_name, Sort::Int));
    let error_name = ctx.new_local_var_name("$error");
    ctx.new_local_vars.push(LocalVarDecl::new(&error_name, Sort::Int));

    let frame = TryFrame {
        finally_label: finally_label.clone(),
        post_label: post_label.clone(),
        mode_var: mode_name.clone(),
        error_var: error_name.clone(),
    };

    // Body runs under the frame; every exit goes through the dispatch.
    let body_result: Result<(), TranslationError> =
        ctx.with_try_frame(frame.clone(), |ctx| {
            let zero = ctx.ivl.int(0, pos);
            res.push(ctx.ivl.local_assign(&mode_name, zero, pos));
            translate_stmts(ctx, body, res)?;
            let zero = ctx.ivl.int(0, pos);
            res.push(ctx.ivl.local_assign(&mode_name, zero, pos));
            res.push(ctx.ivl.goto(&finally_label, pos));
            Ok(())
        });
    body_result?;

    res.push(ctx.ivl.label(&finally_label, pos));
    translate_stmts(ctx, finally, res)?;

    let mode = ctx.ivl.local_var(&mode_name, Sort::Int, pos);
    let error = ctx.ivl.local_var(&error_name, Sort::Int, pos);

    // mode == 1: propagate the return.
    let one = ctx.ivl.int(1, pos);
    let is_return = ctx.ivl.eq(mode.clone(), one, pos);
    let return_target = match ctx.enclosing_try(&frame).cloned() {
        Some(outer) => {
            let one = ctx.ivl.int(1, pos);
            let set = ctx.ivl.local_assign(&outer.mode_var, one, pos);
            let goto = ctx.ivl.goto(&outer.finally_label, pos);
            vec![set, goto]
        }
        None => {
            let label = ctx.return_label.clone();
            vec![ctx.ivl.goto(&label, pos)]
        }
    };
    res.push(ctx.ivl.if_stmt(is_return, return_target, vec![], pos));

    // mode == 2: dispatch to a handler or re-raise.
    let two = ctx.ivl.int(2, pos);
    let is_exception = ctx.ivl.eq(mode, two, pos);
    let mut exception_body = Vec::new();
    let mut dispatch: Vec<Stmt> = vec![reraise(ctx, &frame, pos)];
    for handler in handlers.iter().rev() {
        let mut handler_body = Vec::new();
        if let (Some(name), Some(ty)) = (&handler.name, &handler.exc_type) {
            let var = add_local_var(ctx, name, ty);
            handler_body.push(ctx.ivl.local_assign(&var.ivl_name, error.clone(), pos));
        }
        translate_stmts(ctx, &handler.body, &mut handler_body)?;
        handler_body.push(ctx.ivl.goto(&post_label, pos));
        match &handler.exc_type {
            Some(ty) => {
                let matches = super::types::type_check(ctx, &error, ty, pos);
                let else_branch = dispatch;
                dispatch = vec![ctx.ivl.if_stmt(matches, handler_body, else_branch, pos)];
            }
            None => {
                dispatch = handler_body;
            }
        }
    }
    exception_body.extend(dispatch);
    res.push(ctx.ivl.if_stmt(is_exception, exception_body, vec![], pos));

    res.push(ctx.ivl.label(&post_label, pos));
    Ok(())
}

/// Propagate an exception out of a finally dispatch: to the enclosing
/// frame, or to the method's revert sink.
fn reraise(ctx: &mut Context, frame: &TryFrame, pos: Position) -> Stmt {
    match ctx.enclosing_try(frame).cloned() {
        Some(outer) => {
            let error = ctx.ivl.local_var(&frame.error_var, Sort::Int, pos);
            let set_error = ctx.ivl.local_assign(&outer.error_var, error, pos);
            let two = ctx.ivl.int(2, pos);
            let set_mode = ctx.ivl.local_assign(&outer.mode_var, two, pos);
            let goto = ctx.ivl.goto(&outer.finally_label, pos);
            ctx.ivl.seqn(vec![set_error, set_mode, goto], pos)
        }
        None => {
            let label = ctx.revert_label.clone();
            ctx.ivl.goto(&label, pos)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verifier::annotate::annotate_program;
    use crate::verifier::ast::{CmpOp, Function, NodeIdGen, Program, StateVar};
    use crate::verifier::ivl::pretty;
    use covenant_core::span::Span;
    use num_bigint::BigInt;

    fn e(gen: &mut NodeIdGen, kind: ExprKind) -> AstExpr {
        AstExpr::new(gen.next_id(), Span::new(4, 1, 4, 12), kind)
    }

    fn s(kind: StmtKind) -> AstStmt {
        AstStmt::new(Span::new(4, 1, 4, 12), kind)
    }

    fn program_with_function(body: Vec<AstStmt>) -> Program {
        let mut p = Program::empty("t.cov");
        p.state.push(StateVar {
            name: "x".to_string(),
            ty: Type::int128(),
            span: Span::dummy(),
        });
        p.functions.insert(
            "f".to_string(),
            Function {
                name: "f".to_string(),
                args: vec![],
                ret: None,
                decorators: vec![],
                preconditions: vec![],
                postconditions: vec![],
                checks: vec![],
                performs: vec![],
                body,
                span: Span::new(1, 1, 9, 1),
            },
        );
        p
    }

    fn prepare(ctx: &mut Context) {
        ctx.ivl.declare_field("x", Sort::Int);
        ctx.ivl.declare_field(names::SELF_BALANCE, Sort::Int);
        ctx.ivl.declare_field("msg$sender", Sort::Int);
        ctx.current_state = Some(state::current_bundle(ctx));
    }

    fn render(stmts: &[Stmt]) -> String {
        let mut out = String::new();
        for stmt in stmts {
            pretty::print_stmt(&mut out, stmt, 0);
        }
        out
    }

    /// `for i in range(3): pass` with invariant `i >= 0`.
    fn loop_program(gen: &mut NodeIdGen, with_invariant: bool) -> Program {
        let three = e(gen, ExprKind::Int(BigInt::from(3)));
        let range = e(
            gen,
            ExprKind::Call {
                name: names::RANGE.to_string(),
                args: vec![three],
                keywords: vec![],
                resource: None,
            },
        );
        let invariants = if with_invariant {
            let i = e(gen, ExprKind::Name("i".to_string()));
            let zero = e(gen, ExprKind::Int(BigInt::from(0)));
            vec![e(
                gen,
                ExprKind::Compare { op: CmpOp::Ge, left: Box::new(i), right: Box::new(zero) },
            )]
        } else {
            vec![]
        };
        let body = vec![s(StmtKind::Pass)];
        program_with_function(vec![s(StmtKind::For {
            target: "i".to_string(),
            target_span: Span::new(4, 5, 4, 6),
            iter: range,
            invariants,
            body,
        })])
    }

    #[test]
    fn unrolled_loop_repeats_body_times() {
        let mut gen = NodeIdGen::new();
        let program = loop_program(&mut gen, false);
        let types = annotate_program(&program).unwrap();
        let mut ctx = Context::new(&program, &types);
        prepare(&mut ctx);
        let function = program.functions.get("f").unwrap();
        ctx.function = Some(function.clone());
        let mut res = Vec::new();
        translate_stmts(&mut ctx, &function.body, &mut res).unwrap();
        let text = render(&res);
        // Three iterations bind the loop variable three times.
        assert_eq!(text.matches("[0]").count(), 1);
        assert_eq!(text.matches("[1]").count(), 1);
        assert_eq!(text.matches("[2]").count(), 1);
    }

    #[test]
    fn zero_iteration_loop_produces_nothing() {
        let mut gen = NodeIdGen::new();
        let zero = e(&mut gen, ExprKind::Int(BigInt::from(0)));
        let range = e(
            &mut gen,
            ExprKind::Call {
                name: names::RANGE.to_string(),
                args: vec![zero],
                keywords: vec![],
                resource: None,
            },
        );
        let program = program_with_function(vec![s(StmtKind::For {
            target: "i".to_string(),
            target_span: Span::dummy(),
            iter: range,
            invariants: vec![],
            body: vec![s(StmtKind::Pass)],
        })]);
        let types = annotate_program(&program).unwrap();
        let mut ctx = Context::new(&program, &types);
        prepare(&mut ctx);
        let function = program.functions.get("f").unwrap();
        ctx.function = Some(function.clone());
        let mut res = Vec::new();
        translate_stmts(&mut ctx, &function.body, &mut res).unwrap();
        assert!(res.is_empty());
    }

    #[test]
    fn havoc_loop_contains_protocol_blocks() {
        let mut gen = NodeIdGen::new();
        let program = loop_program(&mut gen, true);
        let types = annotate_program(&program).unwrap();
        let mut ctx = Context::new(&program, &types);
        prepare(&mut ctx);
        let function = program.functions.get("f").unwrap();
        ctx.function = Some(function.clone());
        let mut res = Vec::new();
        translate_stmts(&mut ctx, &function.body, &mut res).unwrap();
        let text = render(&res);
        assert!(text.contains("Base case: Known property about loop variable"));
        assert!(text.contains("Check loop invariants before iteration 0"));
        assert!(text.contains("Havoc state"));
        assert!(text.contains("Assume loop invariants"));
        assert!(text.contains("Check loop invariants for iteration idx + 1"));
        // The step-case branch is pruned.
        assert!(text.contains("inhale false"));
    }

    #[test]
    fn loop_invariant_positions_carry_base_and_step_rules() {
        let mut gen = NodeIdGen::new();
        let program = loop_program(&mut gen, true);
        let types = annotate_program(&program).unwrap();
        let mut ctx = Context::new(&program, &types);
        prepare(&mut ctx);
        let function = program.functions.get("f").unwrap();
        ctx.function = Some(function.clone());
        let mut res = Vec::new();
        translate_stmts(&mut ctx, &function.body, &mut res).unwrap();
        let mut base = 0;
        let mut step = 0;
        for id in ctx.registry.ids().collect::<Vec<_>>() {
            let info = ctx.registry.lookup(id).unwrap();
            let (code, _) = rules::apply(info.rules, "assert.failed", "assertion.false");
            if code == "invariant.not.established" {
                base += 1;
            }
            if code == "invariant.not.preserved" {
                step += 1;
            }
        }
        assert_eq!(base, 1);
        assert_eq!(step, 1);
    }

    #[test]
    fn raise_reverts_and_unreachable_raise_asserts_false() {
        let mut gen = NodeIdGen::new();
        let program = program_with_function(vec![s(StmtKind::Raise { msg: None })]);
        let types = annotate_program(&program).unwrap();
        let mut ctx = Context::new(&program, &types);
        prepare(&mut ctx);
        let function = program.functions.get("f").unwrap();
        ctx.function = Some(function.clone());
        let mut res = Vec::new();
        translate_stmts(&mut ctx, &function.body, &mut res).unwrap();
        assert!(render(&res).contains("goto revert"));

        let marker = e(&mut gen, ExprKind::Name(crate::verifier::ast::UNREACHABLE.to_string()));
        let program2 = program_with_function(vec![s(StmtKind::Raise { msg: Some(marker) })]);
        let types2 = annotate_program(&program2).unwrap();
        let mut ctx2 = Context::new(&program2, &types2);
        prepare(&mut ctx2);
        let function2 = program2.functions.get("f").unwrap();
        ctx2.function = Some(function2.clone());
        let mut res2 = Vec::new();
        translate_stmts(&mut ctx2, &function2.body, &mut res2).unwrap();
        assert!(render(&res2).contains("assert false"));
    }

    #[test]
    fn assert_without_marker_reverts_on_failure() {
        let mut gen = NodeIdGen::new();
        let t = e(&mut gen, ExprKind::Bool(true));
        let program = program_with_function(vec![s(StmtKind::Assert {
            test: t,
            msg: None,
            is_ghost: false,
        })]);
        let types = annotate_program(&program).unwrap();
        let mut ctx = Context::new(&program, &types);
        prepare(&mut ctx);
        let function = program.functions.get("f").unwrap();
        ctx.function = Some(function.clone());
        let mut res = Vec::new();
        translate_stmts(&mut ctx, &function.body, &mut res).unwrap();
        let text = render(&res);
        assert!(text.contains("if (!(true))"));
        assert!(text.contains("goto revert"));
    }

    #[test]
    fn nested_assignment_rebuilds_the_aggregate() {
        let mut gen = NodeIdGen::new();
        // m: map(address, uint256); m[7] = 1  — as a local to keep the
        // target chain pure.
        let m_ty = Type::Map(Box::new(Type::Address), Box::new(Type::uint256()));
        let m_name = e(&mut gen, ExprKind::Name("m".to_string()));
        let seven = e(&mut gen, ExprKind::Int(BigInt::from(7)));
        let target = e(
            &mut gen,
            ExprKind::Subscript { value: Box::new(m_name), index: Box::new(seven) },
        );
        let one = e(&mut gen, ExprKind::Int(BigInt::from(1)));
        let program = program_with_function(vec![
            s(StmtKind::LocalDecl { name: "m".to_string(), ty: m_ty, value: None }),
            s(StmtKind::Assign { target, value: one }),
        ]);
        let types = annotate_program(&program).unwrap();
        let mut ctx = Context::new(&program, &types);
        prepare(&mut ctx);
        let function = program.functions.get("f").unwrap();
        ctx.function = Some(function.clone());
        let mut res = Vec::new();
        translate_stmts(&mut ctx, &function.body, &mut res).unwrap();
        let text = render(&res);
        assert!(text.contains("$map_set"));
    }

    #[test]
    fn try_finally_dispatch_modes() {
        let mut gen = NodeIdGen::new();
        let program = program_with_function(vec![s(StmtKind::Try {
            body: vec![s(StmtKind::Raise { msg: None })],
            handlers: vec![Handler {
                exc_type: None,
                name: None,
                body: vec![s(StmtKind::Pass)],
                span: Span::dummy(),
            }],
            finally: vec![s(StmtKind::Pass)],
        })]);
        let _ = &mut gen;
        let types = annotate_program(&program).unwrap();
        let mut ctx = Context::new(&program, &types);
        prepare(&mut ctx);
        let function = program.functions.get("f").unwrap();
        ctx.function = Some(function.clone());
        let mut res = Vec::new();
        translate_stmts(&mut ctx, &function.body, &mut res).unwrap();
        let text = render(&res);
        assert!(text.contains("label finally_"));
        assert!(text.contains("label post_try_"));
        // The raise inside the try sets exception mode instead of
        // reverting directly.
        assert!(text.contains(":= 2"));
    }
}
