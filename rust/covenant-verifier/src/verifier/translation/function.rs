//! Assembly of one IVL method per contract function.
//!
//! The method body is framed by the full state bundle: bounds and message
//! constraints are inhaled on entry, the pre-state is snapshotted, the
//! translated body runs, and the `revert` sink restores the entry state
//! before control merges at the `return` sink, where invariants,
//! postconditions, checks, and the leak check are exhaled.

use crate::verifier::ast::{Function, Lemma, StmtKind};
use crate::verifier::ivl::{
    Expr, IvlFunction, LocalVarDecl, Method, PermAmount, Sort, Stmt,
};
use crate::verifier::names;
use crate::verifier::positions::Position;
use crate::verifier::rules;

use super::specification::translate_spec;
use super::state::{self, ref_sort};
use super::statement::translate_stmts;
use super::types::translate_type;
use super::{Context, TranslatedVar, TranslationError};

/// Encode a (non-pure) contract function as an IVL method.
pub fn translate_function(
    ctx: &mut Context,
    function: &Function,
) -> Result<Method, TranslationError> {
    enter_function_scope(ctx, function);
    let pos = ctx.span_position(function.span, &function.name, rules::NO_RULES);

    // Parameter declarations: the environment references first, then the
    // declared arguments.
    let mut args = vec![
        LocalVarDecl::new("$self", ref_sort()),
        LocalVarDecl::new("$msg", ref_sort()),
        LocalVarDecl::new("$block", ref_sort()),
    ];
    let mut arg_vars = Vec::with_capacity(function.args.len());
    for arg in &function.args {
        let var = TranslatedVar {
            name: arg.name.clone(),
            ivl_name: format!("a${}", arg.name),
            ty: arg.ty.clone(),
            sort: translate_type(&arg.ty),
        };
        args.push(var.decl());
        ctx.args.insert(arg.name.clone(), var.clone());
        arg_vars.push(var);
    }

    // Result declarations: the success flag plus the declared return.
    let success_var = TranslatedVar {
        name: "$succ".to_string(),
        ivl_name: "$succ".to_string(),
        ty: crate::verifier::types::Type::Bool,
        sort: Sort::Bool,
    };
    let mut returns = vec![success_var.decl()];
    ctx.success_var = Some(success_var.clone());
    if let Some(ret) = &function.ret {
        let result_var = TranslatedVar {
            name: "$res".to_string(),
            ivl_name: "$res".to_string(),
            ty: ret.clone(),
            sort: translate_type(ret),
        };
        returns.push(result_var.decl());
        ctx.result_var = Some(result_var);
    }

    ctx.current_state = Some(state::current_bundle(ctx));

    // Preconditions: permissions over the whole state frame, argument
    // bounds, and the user's declared preconditions.
    let mut pres = state_permissions(ctx);
    for var in &arg_vars {
        let read = var.local_var(&ctx.ivl, Position::None);
        pres.extend(super::types::non_negative(ctx, &read, &var.ty));
        pres.extend(super::types::array_length(ctx, &read, &var.ty));
    }
    for pre in &function.preconditions {
        let pre_pos = ctx.to_position(pre);
        let translated = translate_spec(ctx, pre)?;
        pres.push(translated.clone_with_pos(pre_pos));
    }

    // Body.
    let mut body: Vec<Stmt> = Vec::new();
    body.push(ctx.ivl.label("$entry", Position::None));

    // Environment constraints hold on entry.
    let mut entry = Vec::new();
    let sender = super::specification::msg_sender(ctx);
    let zero = ctx.ivl.int(0, Position::None);
    let sender_ok = ctx.ivl.ne(sender, zero, Position::None);
    entry.push(ctx.ivl.inhale(sender_ok, Position::None));
    let value = msg_value(ctx);
    let zero = ctx.ivl.int(0, Position::None);
    let value_ok = ctx.ivl.ge(value, zero, Position::None);
    entry.push(ctx.ivl.inhale(value_ok, Position::None));
    let timestamp = block_timestamp(ctx);
    let zero = ctx.ivl.int(0, Position::None);
    let timestamp_ok = ctx.ivl.ge(timestamp, zero, Position::None);
    entry.push(ctx.ivl.inhale(timestamp_ok, Position::None));
    if !function.is_payable() {
        let value = msg_value(ctx);
        let zero = ctx.ivl.int(0, Position::None);
        let no_value = ctx.ivl.eq(value, zero, Position::None);
        entry.push(ctx.ivl.inhale(no_value, Position::None));
    }
    body.push(ctx.ivl.seqn_with_info(entry, "Assume message and block constraints", Position::None));

    // Contract invariants are assumed for everything but the constructor.
    let mut framed = Vec::new();
    let assumed_invariants = if function.name == names::INIT {
        Vec::new()
    } else {
        let mut invs = ctx.program.invariants.clone();
        invs.extend(ctx.program.inter_contract_invariants.clone());
        invs
    };
    state::assume_framed(ctx, &assumed_invariants, &mut framed)?;
    body.push(ctx.ivl.seqn_with_info(framed, "Assume invariants", Position::None));

    // The constructor starts from zeroed state.
    if function.name == names::INIT {
        let mut zeroed = Vec::new();
        for var in &ctx.program.state.clone() {
            let default = super::types::default_value(ctx, &var.ty, Position::None)?;
            let receiver = state::self_ref(ctx);
            zeroed.push(ctx.ivl.field_assign(receiver, &var.name, default, Position::None));
        }
        body.push(ctx.ivl.seqn_with_info(zeroed, "Zero the contract state", Position::None));
    }

    // A payable call credits the sent value before the body runs.
    if function.is_payable() {
        let bundle = ctx.state()?.clone();
        let balance = bundle.read_field(ctx, names::SELF_BALANCE)?;
        let value = msg_value(ctx);
        let credited = ctx.ivl.add(balance, value, Position::None);
        let receiver = state::self_ref(ctx);
        body.push(ctx.ivl.field_assign(receiver, names::SELF_BALANCE, credited, Position::None));
    }

    // Snapshot the pre-state; `old(…)` and the revert path read it.
    let mut snapshot_stmts = Vec::new();
    let old_bundle = state::snapshot(ctx, "old", &mut snapshot_stmts)?;
    body.push(ctx.ivl.seqn_with_info(snapshot_stmts, "Snapshot the pre-state", Position::None));
    if function.is_public() {
        ctx.public_old_state = Some(old_bundle.clone());
    }

    let t = ctx.ivl.true_lit(Position::None);
    body.push(ctx.ivl.local_assign("$succ", t, Position::None));

    let old_for_body = old_bundle.clone();
    let body_result: Result<Vec<Stmt>, TranslationError> =
        ctx.with_old_state(old_for_body, |ctx| {
            let mut translated = Vec::new();
            translate_stmts(ctx, &function.body, &mut translated)?;
            Ok(translated)
        });
    body.extend(body_result?);
    let return_label = ctx.return_label.clone();
    body.push(ctx.ivl.goto(&return_label, Position::None));

    // Revert sink: no state change survives, no success.
    let revert_label = ctx.revert_label.clone();
    body.push(ctx.ivl.label(&revert_label, Position::None));
    let f = ctx.ivl.false_lit(Position::None);
    body.push(ctx.ivl.local_assign("$succ", f, Position::None));
    let mut restore = Vec::new();
    let current = ctx.state()?.clone();
    state::restore_bundle(ctx, &current, &old_bundle, &mut restore);
    body.push(ctx.ivl.seqn_with_info(restore, "Revert the state to the pre-state", Position::None));
    body.push(ctx.ivl.goto(&return_label, Position::None));

    // Return sink: every obligation is exhaled here, under the old-state
    // snapshot so `old(…)` in specifications resolves.
    body.push(ctx.ivl.label(&return_label, Position::None));
    let obligations = ctx.with_old_state(old_bundle.clone(), |ctx| {
        exit_obligations(ctx, function, &old_bundle)
    })?;
    body.extend(obligations);

    let locals = std::mem::take(&mut ctx.new_local_vars);
    let mut all_locals = state::ghost_component_decls();
    all_locals.extend(locals);

    let method = Method {
        name: format!("f${}", function.name),
        args,
        returns,
        pres,
        posts: Vec::new(),
        locals: all_locals,
        body,
        pos,
    };
    leave_function_scope(ctx);
    Ok(method)
}

/// The exhaled obligations at the `return` sink: invariants, transitive
/// and declared postconditions, checks, and the leak check.
fn exit_obligations(
    ctx: &mut Context,
    function: &Function,
    old_bundle: &state::StateBundle,
) -> Result<Vec<Stmt>, TranslationError> {
    let mut out = Vec::new();

    // The constructor establishes the invariants; everything else must
    // preserve them.
    for inv in ctx
        .program
        .invariants
        .clone()
        .iter()
        .chain(&ctx.program.inter_contract_invariants.clone())
    {
        let inv_pos = ctx.to_position_with_rules(inv, rules::INVARIANT_FAIL);
        let translated = translate_spec(ctx, inv)?;
        out.push(ctx.ivl.exhale(translated.clone_with_pos(inv_pos), inv_pos));
    }
    for post in &ctx.program.transitive_postconditions.clone() {
        let post_pos = ctx.to_position_with_rules(post, rules::INVARIANT_TRANSITIVITY_FAIL);
        let translated = translate_spec(ctx, post)?;
        out.push(ctx.ivl.exhale(translated.clone_with_pos(post_pos), post_pos));
    }
    for post in ctx
        .program
        .general_postconditions
        .clone()
        .iter()
        .chain(&function.postconditions)
    {
        let post_pos = ctx.to_position_with_rules(post, rules::POSTCONDITION_FAIL);
        let translated = translate_spec(ctx, post)?;
        out.push(ctx.ivl.exhale(translated.clone_with_pos(post_pos), post_pos));
    }
    for check in ctx.program.general_checks.clone().iter().chain(&function.checks) {
        let check_pos = ctx.to_position_with_rules(check, rules::CHECK_FAIL);
        let translated = translate_spec(ctx, check)?;
        out.push(ctx.ivl.exhale(translated.clone_with_pos(check_pos), check_pos));
    }
    if function.is_public() {
        for leak in super::resource::leak_check(ctx, function, old_bundle)? {
            let pos = leak.pos;
            out.push(ctx.ivl.exhale(leak, pos));
        }
    }
    Ok(out)
}

/// Permissions over the state frame: full access to every state field,
/// read access to the message and block environment.
fn state_permissions(ctx: &mut Context) -> Vec<Expr> {
    let mut out = Vec::new();
    let self_ref = state::self_ref(ctx);
    let mut fields: Vec<String> = ctx.program.state.iter().map(|v| v.name.clone()).collect();
    fields.push(names::SELF_BALANCE.to_string());
    for field in fields {
        out.push(ctx.ivl.predicate_access(
            &field,
            vec![self_ref.clone()],
            PermAmount::Full,
            Position::None,
        ));
    }
    let msg_ref = state::msg_ref(ctx);
    out.push(ctx.ivl.predicate_access(
        "msg$sender",
        vec![msg_ref.clone()],
        PermAmount::Read,
        Position::None,
    ));
    out.push(ctx.ivl.predicate_access(
        "msg$value",
        vec![msg_ref],
        PermAmount::Read,
        Position::None,
    ));
    let block_ref = state::block_ref(ctx);
    out.push(ctx.ivl.predicate_access(
        "block$timestamp",
        vec![block_ref],
        PermAmount::Read,
        Position::None,
    ));
    out
}

fn msg_value(ctx: &mut Context) -> Expr {
    let receiver = state::msg_ref(ctx);
    ctx.ivl.field_access(receiver, "msg$value", Position::None)
}

fn block_timestamp(ctx: &mut Context) -> Expr {
    let receiver = state::block_ref(ctx);
    ctx.ivl.field_access(receiver, "block$timestamp", Position::None)
}

fn enter_function_scope(ctx: &mut Context, function: &Function) {
    ctx.args.clear();
    ctx.locals.clear();
    ctx.quantified.clear();
    ctx.new_local_vars.clear();
    ctx.result_var = None;
    ctx.success_var = None;
    ctx.loop_arrays.clear();
    ctx.loop_indices.clear();
    ctx.public_old_state = None;
    ctx.function = Some(function.clone());
}

fn leave_function_scope(ctx: &mut Context) {
    ctx.function = None;
    ctx.args.clear();
    ctx.locals.clear();
    ctx.result_var = None;
    ctx.success_var = None;
    ctx.current_state = None;
    ctx.public_old_state = None;
}

/// Encode a `pure` function as an IVL function: a single expression body,
/// no statements allowed.
pub fn translate_pure_function(
    ctx: &mut Context,
    function: &Function,
) -> Result<IvlFunction, TranslationError> {
    enter_function_scope(ctx, function);
    let pos = ctx.span_position(function.span, &function.name, rules::NO_RULES);

    let ret = function.ret.clone().ok_or_else(|| TranslationError::InvalidProgram {
        code: "invalid.pure",
        message: "A pure function must declare a return type.".to_string(),
        span: function.span,
    })?;

    let mut args = Vec::with_capacity(function.args.len());
    for arg in &function.args {
        let var = TranslatedVar {
            name: arg.name.clone(),
            ivl_name: format!("a${}", arg.name),
            ty: arg.ty.clone(),
            sort: translate_type(&arg.ty),
        };
        args.push(var.decl());
        ctx.args.insert(arg.name.clone(), var);
    }

    let mut pres = Vec::new();
    for pre in &function.preconditions {
        let pre_pos = ctx.to_position(pre);
        let translated = translate_spec(ctx, pre)?;
        pres.push(translated.clone_with_pos(pre_pos));
    }

    // The body must be a single `return expression`.
    let body = match function.body.as_slice() {
        [stmt] => match &stmt.kind {
            StmtKind::Return { value: Some(value) } => translate_spec(ctx, value)?,
            _ => {
                return Err(TranslationError::InvalidProgram {
                    code: "invalid.pure",
                    message: "A pure function body must be a single return.".to_string(),
                    span: stmt.span,
                })
            }
        },
        _ => {
            return Err(TranslationError::InvalidProgram {
                code: "invalid.pure",
                message: "A pure function body must be a single return.".to_string(),
                span: function.span,
            })
        }
    };

    let out = IvlFunction {
        name: format!("f${}", function.name),
        args,
        sort: translate_type(&ret),
        pres,
        posts: Vec::new(),
        body: Some(body),
        pos,
    };
    leave_function_scope(ctx);
    Ok(out)
}

/// Encode a lemma as an IVL function whose body is the conjunction of its
/// statements.
pub fn translate_lemma(ctx: &mut Context, lemma: &Lemma) -> Result<IvlFunction, TranslationError> {
    ctx.args.clear();
    ctx.quantified.clear();
    let pos = ctx.span_position(lemma.span, &lemma.name, rules::NO_RULES);

    let mut args = Vec::with_capacity(lemma.args.len());
    for arg in &lemma.args {
        let var = TranslatedVar {
            name: arg.name.clone(),
            ivl_name: format!("a${}", arg.name),
            ty: arg.ty.clone(),
            sort: translate_type(&arg.ty),
        };
        args.push(var.decl());
        ctx.args.insert(arg.name.clone(), var);
    }

    let mut pres = Vec::new();
    for pre in &lemma.preconditions {
        let pre_pos = ctx.to_position(pre);
        let translated = translate_spec(ctx, pre)?;
        pres.push(translated.clone_with_pos(pre_pos));
    }

    let mut conjuncts = Vec::with_capacity(lemma.body.len());
    for part in &lemma.body {
        let part_pos = ctx.to_position(part);
        let translated = translate_spec(ctx, part)?;
        conjuncts.push(translated.clone_with_pos(part_pos));
    }
    let body = ctx.ivl.conjoin(conjuncts, pos);

    ctx.args.clear();
    Ok(IvlFunction {
        name: format!("lemma${}", lemma.name),
        args,
        sort: Sort::Bool,
        pres,
        posts: Vec::new(),
        body: Some(body),
        pos,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verifier::annotate::annotate_program;
    use crate::verifier::ast::{
        CmpOp, Decorator, Expr as AstExpr, ExprKind, NodeIdGen, Program, StateVar,
        Stmt as AstStmt,
    };
    use crate::verifier::ivl::pretty;
    use crate::verifier::types::Type;
    use covenant_core::span::Span;
    use num_bigint::BigInt;

    fn e(gen: &mut NodeIdGen, kind: ExprKind) -> AstExpr {
        AstExpr::new(gen.next_id(), Span::new(5, 1, 5, 10), kind)
    }

    fn program_with_inc() -> (Program, NodeIdGen) {
        let mut gen = NodeIdGen::new();
        let mut p = Program::empty("t.cov");
        p.state.push(StateVar {
            name: "x".to_string(),
            ty: Type::int128(),
            span: Span::dummy(),
        });
        // invariant: self.x >= 0
        let recv = e(&mut gen, ExprKind::Name(names::SELF.to_string()));
        let field = e(
            &mut gen,
            ExprKind::Attribute { value: Box::new(recv), attr: "x".to_string() },
        );
        let zero = e(&mut gen, ExprKind::Int(BigInt::from(0)));
        let inv = e(
            &mut gen,
            ExprKind::Compare { op: CmpOp::Ge, left: Box::new(field), right: Box::new(zero) },
        );
        p.invariants.push(inv);
        // def inc(): self.x = self.x + 1
        let recv = e(&mut gen, ExprKind::Name(names::SELF.to_string()));
        let lhs = e(
            &mut gen,
            ExprKind::Attribute { value: Box::new(recv), attr: "x".to_string() },
        );
        let one = e(&mut gen, ExprKind::Int(BigInt::from(1)));
        let sum = e(
            &mut gen,
            ExprKind::Binary {
                op: crate::verifier::ast::BinOp::Add,
                left: Box::new(lhs.clone()),
                right: Box::new(one),
            },
        );
        let target_recv = e(&mut gen, ExprKind::Name(names::SELF.to_string()));
        let target = e(
            &mut gen,
            ExprKind::Attribute { value: Box::new(target_recv), attr: "x".to_string() },
        );
        p.functions.insert(
            "inc".to_string(),
            Function {
                name: "inc".to_string(),
                args: vec![],
                ret: None,
                decorators: vec![Decorator::Public],
                preconditions: vec![],
                postconditions: vec![],
                checks: vec![],
                performs: vec![],
                body: vec![AstStmt::new(
                    Span::new(6, 1, 6, 20),
                    crate::verifier::ast::StmtKind::Assign { target, value: sum },
                )],
                span: Span::new(5, 1, 8, 1),
            },
        );
        (p, gen)
    }

    fn declare_env(ctx: &mut Context) {
        ctx.ivl.declare_field("x", Sort::Int);
        ctx.ivl.declare_field(names::SELF_BALANCE, Sort::Int);
        ctx.ivl.declare_field("msg$sender", Sort::Int);
        ctx.ivl.declare_field("msg$value", Sort::Int);
        ctx.ivl.declare_field("block$timestamp", Sort::Int);
    }

    #[test]
    fn method_has_entry_and_sink_labels() {
        let (program, _) = program_with_inc();
        let types = annotate_program(&program).unwrap();
        let mut ctx = Context::new(&program, &types);
        declare_env(&mut ctx);
        let function = program.functions.get("inc").unwrap().clone();
        let method = translate_function(&mut ctx, &function).unwrap();
        let mut text = String::new();
        for stmt in &method.body {
            pretty::print_stmt(&mut text, stmt, 0);
        }
        assert!(text.contains("label $entry"));
        assert_eq!(text.matches("label return").count(), 1);
        assert_eq!(text.matches("label revert").count(), 1);
    }

    #[test]
    fn invariants_are_exhaled_with_invariant_rules() {
        let (program, _) = program_with_inc();
        let types = annotate_program(&program).unwrap();
        let mut ctx = Context::new(&program, &types);
        declare_env(&mut ctx);
        let function = program.functions.get("inc").unwrap().clone();
        let _method = translate_function(&mut ctx, &function).unwrap();
        let violated: Vec<_> = ctx
            .registry
            .ids()
            .filter_map(|id| ctx.registry.lookup(id))
            .filter(|info| {
                rules::apply(info.rules, "exhale.failed", "assertion.false").0
                    == "invariant.violated"
            })
            .collect();
        assert_eq!(violated.len(), 1);
        assert_eq!(violated[0].function.as_deref(), Some("inc"));
    }

    #[test]
    fn revert_path_restores_the_pre_state() {
        let (program, _) = program_with_inc();
        let types = annotate_program(&program).unwrap();
        let mut ctx = Context::new(&program, &types);
        declare_env(&mut ctx);
        let function = program.functions.get("inc").unwrap().clone();
        let method = translate_function(&mut ctx, &function).unwrap();
        let mut text = String::new();
        for stmt in &method.body {
            pretty::print_stmt(&mut text, stmt, 0);
        }
        assert!(text.contains("Revert the state to the pre-state"));
        assert!(text.contains("$succ := false"));
    }

    #[test]
    fn public_function_gets_a_leak_check() {
        let (program, _) = program_with_inc();
        let types = annotate_program(&program).unwrap();
        let mut ctx = Context::new(&program, &types);
        declare_env(&mut ctx);
        let function = program.functions.get("inc").unwrap().clone();
        let _method = translate_function(&mut ctx, &function).unwrap();
        let leaks: Vec<_> = ctx
            .registry
            .ids()
            .filter_map(|id| ctx.registry.lookup(id))
            .filter(|info| {
                rules::apply(info.rules, "exhale.failed", "assertion.false").0
                    == "leakcheck.failed"
            })
            .collect();
        // Only wei is in scope.
        assert_eq!(leaks.len(), 1);
    }

    #[test]
    fn pure_function_becomes_an_ivl_function() {
        let mut gen = NodeIdGen::new();
        let mut program = Program::empty("t.cov");
        let a = e(&mut gen, ExprKind::Name("a".to_string()));
        let one = e(&mut gen, ExprKind::Int(BigInt::from(1)));
        let sum = e(
            &mut gen,
            ExprKind::Binary {
                op: crate::verifier::ast::BinOp::Add,
                left: Box::new(a),
                right: Box::new(one),
            },
        );
        program.functions.insert(
            "inc1".to_string(),
            Function {
                name: "inc1".to_string(),
                args: vec![crate::verifier::ast::FunctionArg {
                    name: "a".to_string(),
                    ty: Type::int128(),
                    default: None,
                    span: Span::dummy(),
                }],
                ret: Some(Type::int128()),
                decorators: vec![Decorator::Pure],
                preconditions: vec![],
                postconditions: vec![],
                checks: vec![],
                performs: vec![],
                body: vec![AstStmt::new(
                    Span::dummy(),
                    crate::verifier::ast::StmtKind::Return { value: Some(sum) },
                )],
                span: Span::dummy(),
            },
        );
        let types = annotate_program(&program).unwrap();
        let mut ctx = Context::new(&program, &types);
        let function = program.functions.get("inc1").unwrap().clone();
        let f = translate_pure_function(&mut ctx, &function).unwrap();
        assert_eq!(f.name, "f$inc1");
        assert_eq!(f.sort, Sort::Int);
        assert!(f.body.is_some());
    }
}
