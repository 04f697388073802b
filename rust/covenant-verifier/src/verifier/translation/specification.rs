//! Lowering of assertion-only constructs: quantifiers, allocation ghost
//! predicates, and trust/offer/accessibility reads. Everything here
//! produces pure IVL expressions; side statements are a
//! [`TranslationError::PurityViolation`].

use crate::verifier::ast::{Expr as AstExpr, ExprKind};
use crate::verifier::ivl::{Expr, LocalVarDecl, PermAmount, Trigger};
use crate::verifier::names;
use crate::verifier::positions::Position;
use crate::verifier::types::{Type, TypeAnnotation, TypeBuilder};

use super::expression::translate_expr;
use super::state;
use super::types::translate_type;
use super::{Context, TranslatedVar, TranslationError};

/// Translate a specification expression (invariant, pre/postcondition,
/// check, loop invariant) to a pure IVL expression.
pub fn translate_spec(ctx: &mut Context, expr: &AstExpr) -> Result<Expr, TranslationError> {
    ctx.with_spec_mode(|ctx| {
        let mut sink = Vec::new();
        let out = translate_expr(ctx, expr, &mut sink)?;
        debug_assert!(sink.is_empty(), "spec translation produced statements");
        Ok(out)
    })
}

/// `forall({x: T, …}, trigger*, body)`.
pub fn translate_forall(
    ctx: &mut Context,
    expr: &AstExpr,
    vars: &[(String, TypeAnnotation)],
    triggers: &[Vec<AstExpr>],
    body: &AstExpr,
) -> Result<Expr, TranslationError> {
    let pos = ctx.to_position(expr);

    let structs = |name: &str| ctx.program.structs.get(name).cloned();
    let interfaces = |name: &str| ctx.program.interfaces.contains_key(name);
    let builder = TypeBuilder::new(&structs, &interfaces);
    let mut bound: Vec<(String, Type)> = Vec::with_capacity(vars.len());
    for (name, ann) in vars {
        let ty = builder.build(ann).ok_or_else(|| {
            TranslationError::internal(format!("unresolvable quantifier type for '{}'", name))
        })?;
        bound.push((name.clone(), ty));
    }

    let mut decls = Vec::with_capacity(bound.len());
    let mut shadowed = Vec::with_capacity(bound.len());
    for (name, ty) in &bound {
        let sort = translate_type(ty);
        let mangled = ctx.new_local_var_name(name);
        decls.push(LocalVarDecl::new(&mangled, sort.clone()));
        let var = TranslatedVar {
            name: name.clone(),
            ivl_name: mangled,
            ty: ty.clone(),
            sort,
        };
        shadowed.push((name.clone(), ctx.quantified.insert(name.clone(), var)));
    }

    // Binders are popped again on every exit path, including errors.
    let result: Result<(Vec<Trigger>, Expr), TranslationError> = (|| {
        let mut ivl_triggers = Vec::with_capacity(triggers.len());
        for trigger in triggers {
            let mut parts = Vec::with_capacity(trigger.len());
            for part in trigger {
                let mut sink = Vec::new();
                parts.push(translate_expr(ctx, part, &mut sink)?);
            }
            ivl_triggers.push(Trigger { parts });
        }
        let mut sink = Vec::new();
        let translated_body = translate_expr(ctx, body, &mut sink)?;
        Ok((ivl_triggers, translated_body))
    })();

    for (name, previous) in shadowed {
        match previous {
            Some(var) => {
                ctx.quantified.insert(name, var);
            }
            None => {
                ctx.quantified.remove(&name);
            }
        }
    }

    let (ivl_triggers, translated_body) = result?;
    Ok(ctx.ivl.forall(decls, ivl_triggers, translated_body, pos))
}

/// Ghost built-ins allowed only in specifications.
pub fn translate_ghost_call(
    ctx: &mut Context,
    expr: &AstExpr,
    name: &str,
    args: &[AstExpr],
    keywords: &[(String, AstExpr)],
) -> Result<Expr, TranslationError> {
    let pos = ctx.to_position(expr);
    let mut sink = Vec::new();
    match name {
        names::ALLOCATED => {
            let resource = super::resource::translate_resource(ctx, args.first(), &mut sink)?;
            let owner = match args.get(1) {
                Some(owner) => translate_expr(ctx, owner, &mut sink)?,
                None => msg_sender(ctx),
            };
            let bundle = ctx.state()?.clone();
            super::resource::allocated_read(ctx, &bundle, resource, owner, pos)
        }
        names::OFFERED => {
            if args.len() != 6 {
                return Err(TranslationError::internal(
                    "offered expects (left, right, left amount, right amount, from, to)",
                ));
            }
            let left = super::resource::translate_resource(ctx, Some(&args[0]), &mut sink)?;
            let right = super::resource::translate_resource(ctx, Some(&args[1]), &mut sink)?;
            let left_amount = translate_expr(ctx, &args[2], &mut sink)?;
            let right_amount = translate_expr(ctx, &args[3], &mut sink)?;
            let from = translate_expr(ctx, &args[4], &mut sink)?;
            let to = translate_expr(ctx, &args[5], &mut sink)?;
            let key = super::resource::offer_key(
                ctx,
                left,
                right,
                left_amount,
                right_amount,
                from,
                to,
                pos,
            );
            let bundle = ctx.state()?.clone();
            let offered = bundle.read(ctx, state::OFFERED)?;
            Ok(ctx.ivl.map_get(offered, key, pos))
        }
        names::TRUSTED => {
            let address = translate_expr(
                ctx,
                args.first().ok_or_else(|| {
                    TranslationError::internal("trusted expects an address argument")
                })?,
                &mut sink,
            )?;
            let by = match keyword(keywords, names::KW_BY) {
                Some(by) => translate_expr(ctx, by, &mut sink)?,
                None => msg_sender(ctx),
            };
            let key = super::resource::trust_key(ctx, address, by, pos);
            let bundle = ctx.state()?.clone();
            let trusted = bundle.read(ctx, state::TRUSTED)?;
            Ok(ctx.ivl.map_get(trusted, key, pos))
        }
        names::ACCESSIBLE => {
            let target = translate_expr(
                ctx,
                args.first().ok_or_else(|| {
                    TranslationError::internal("accessible expects a target argument")
                })?,
                &mut sink,
            )?;
            let mut pred_args = vec![target];
            if let Some(amount) = args.get(1) {
                pred_args.push(translate_expr(ctx, amount, &mut sink)?);
            }
            let function = ctx
                .function
                .as_ref()
                .map(|f| f.name.clone())
                .unwrap_or_else(|| "$program".to_string());
            let predicate = format!("$accessible${}", function);
            Ok(ctx.ivl.predicate_access(&predicate, pred_args, PermAmount::Read, pos))
        }
        other => Err(TranslationError::unsupported(
            &format!("ghost built-in '{}'", other),
            expr.span,
        )),
    }
}

/// Application of an interface ghost function in a specification: a pure
/// IVL function application over the translated arguments plus the
/// receiver's address.
pub fn translate_ghost_function_call(
    ctx: &mut Context,
    expr: &AstExpr,
    receiver: &AstExpr,
    name: &str,
    args: &[AstExpr],
) -> Result<Expr, TranslationError> {
    let pos = ctx.to_position(expr);
    let ghost = ctx
        .program
        .ghost_functions
        .get(name)
        .and_then(|gs| gs.first())
        .cloned()
        .ok_or_else(|| TranslationError::internal(format!("unknown ghost function '{}'", name)))?;

    let mut sink = Vec::new();
    let address = match &receiver.kind {
        // A bare interface name refers to this contract's implementation.
        ExprKind::Name(n) if ctx.program.interfaces.contains_key(n) => {
            super::resource::self_address(ctx)
        }
        _ => translate_expr(ctx, receiver, &mut sink)?,
    };

    let mut translated = Vec::with_capacity(args.len() + 1);
    for arg in args {
        translated.push(translate_expr(ctx, arg, &mut sink)?);
    }
    translated.push(address);
    Ok(ctx.ivl.func_app(
        &format!("$ghost${}", name),
        translated,
        translate_type(&ghost.ret),
        pos,
    ))
}

fn keyword<'e>(keywords: &'e [(String, AstExpr)], name: &str) -> Option<&'e AstExpr> {
    keywords.iter().find(|(k, _)| k == name).map(|(_, v)| v)
}

pub fn msg_sender(ctx: &mut Context) -> Expr {
    let receiver = state::msg_ref(ctx);
    ctx.ivl.field_access(receiver, "msg$sender", Position::None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verifier::annotate::annotate_program;
    use crate::verifier::ast::{CmpOp, NodeIdGen, Program, ResourceDecl};
    use crate::verifier::ivl::{ExprKind as IvlExprKind, Sort};
    use covenant_core::span::Span;
    use num_bigint::BigInt;

    fn e(gen: &mut NodeIdGen, kind: ExprKind) -> AstExpr {
        AstExpr::new(gen.next_id(), Span::new(3, 1, 3, 20), kind)
    }

    fn prepare(ctx: &mut Context) {
        ctx.ivl.declare_field(names::SELF_BALANCE, Sort::Int);
        ctx.ivl.declare_field("msg$sender", Sort::Int);
        ctx.current_state = Some(state::current_bundle(ctx));
    }

    #[test]
    fn forall_produces_quantifier() {
        let mut gen = NodeIdGen::new();
        let mut program = Program::empty("t.cov");
        let var = e(&mut gen, ExprKind::Name("a".to_string()));
        let zero = e(&mut gen, ExprKind::Int(BigInt::from(0)));
        let body = e(
            &mut gen,
            ExprKind::Compare { op: CmpOp::Ge, left: Box::new(var), right: Box::new(zero) },
        );
        let forall = e(
            &mut gen,
            ExprKind::Forall {
                vars: vec![("a".to_string(), TypeAnnotation::Named("uint256".to_string()))],
                triggers: vec![],
                body: Box::new(body),
            },
        );
        program.invariants.push(forall.clone());
        let types = annotate_program(&program).unwrap();
        let mut ctx = Context::new(&program, &types);
        prepare(&mut ctx);
        let out = translate_spec(&mut ctx, &forall).unwrap();
        assert!(matches!(out.kind, IvlExprKind::Forall { .. }));
        assert!(ctx.quantified.is_empty());
    }

    #[test]
    fn allocated_reads_the_allocation_map() {
        let mut gen = NodeIdGen::new();
        let mut program = Program::empty("t.cov");
        program.own_resources.insert(
            "token".to_string(),
            ResourceDecl {
                name: "token".to_string(),
                args: vec![],
                file: "t.cov".to_string(),
                interface: None,
                span: Span::dummy(),
            },
        );
        let token = e(&mut gen, ExprKind::Name("token".to_string()));
        let allocated = e(
            &mut gen,
            ExprKind::Call {
                name: names::ALLOCATED.to_string(),
                args: vec![token],
                keywords: vec![],
                resource: None,
            },
        );
        let zero = e(&mut gen, ExprKind::Int(BigInt::from(0)));
        let spec = e(
            &mut gen,
            ExprKind::Compare {
                op: CmpOp::Ge,
                left: Box::new(allocated.clone()),
                right: Box::new(zero),
            },
        );
        program.invariants.push(spec.clone());
        let types = annotate_program(&program).unwrap();
        let mut ctx = Context::new(&program, &types);
        prepare(&mut ctx);
        let out = translate_spec(&mut ctx, &spec).unwrap();
        assert_eq!(out.sort, Sort::Bool);
        // The left side is a nested map read.
        let rendered = crate::verifier::ivl::pretty::expr(&out);
        assert!(rendered.contains("$map_get"));
        assert!(rendered.contains("$resource$token"));
    }

    #[test]
    fn trusted_defaults_to_msg_sender() {
        let mut gen = NodeIdGen::new();
        let mut program = Program::empty("t.cov");
        let addr = e(&mut gen, ExprKind::Int(BigInt::from(5)));
        let trusted = e(
            &mut gen,
            ExprKind::Call {
                name: names::TRUSTED.to_string(),
                args: vec![addr],
                keywords: vec![],
                resource: None,
            },
        );
        program.invariants.push(trusted.clone());
        let types = annotate_program(&program).unwrap();
        let mut ctx = Context::new(&program, &types);
        prepare(&mut ctx);
        let out = translate_spec(&mut ctx, &trusted).unwrap();
        let rendered = crate::verifier::ivl::pretty::expr(&out);
        assert!(rendered.contains("$trust$init"));
        assert!(rendered.contains("msg$sender"));
    }
}
