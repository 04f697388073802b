//! Encoding of resources and allocation ghost state.
//!
//! A resource instance `R(a1, …, ak)` is an opaque record value built by a
//! per-resource constructor function and tagged with the declaring
//! contract's address. Allocations, offers, and trust relations live in the
//! ghost maps of the state bundle; every mutation keeps allocation counts
//! non-negative, and public functions get a leak check over every resource
//! their `performs` clauses do not mention.

use crate::verifier::ast::{Expr as AstExpr, ExprKind, Function};
use crate::verifier::ivl::{Expr, LocalVarDecl, Sort, Stmt, Trigger};
use crate::verifier::names;
use crate::verifier::positions::{ErrorInfo, Position};
use crate::verifier::rules;

use super::state::{self, StateBundle};
use super::types::RESOURCE_SORT_NAME;
use super::{Context, TranslationError};

pub fn resource_sort() -> Sort {
    Sort::Struct(RESOURCE_SORT_NAME.to_string())
}

/// The verified contract's own address.
pub fn self_address(ctx: &Context) -> Expr {
    ctx.ivl.func_app("$self_address", vec![], Sort::Int, Position::None)
}

/// Constructor function name for a resource.
pub fn constructor_name(resource: &str) -> String {
    format!("$resource${}", resource)
}

/// The stable tag of each resource, used by the leak check to quantify
/// over all instances of one resource. Tag 0 is wei.
pub fn resource_tag(ctx: &Context, resource: &str) -> i64 {
    if resource == names::WEI {
        return 0;
    }
    let mut tag = 1;
    for name in ctx.program.own_resources.keys() {
        if name == resource {
            return tag;
        }
        tag += 1;
    }
    for name in ctx.program.resources.keys() {
        if !ctx.program.own_resources.contains_key(name) {
            if name == resource {
                return tag;
            }
            tag += 1;
        }
    }
    tag
}

/// All resource names visible to the program, wei first.
pub fn all_resource_names(ctx: &Context) -> Vec<String> {
    let mut out = vec![names::WEI.to_string()];
    out.extend(ctx.program.own_resources.keys().cloned());
    for name in ctx.program.resources.keys() {
        if !ctx.program.own_resources.contains_key(name) {
            out.push(name.clone());
        }
    }
    out
}

/// Build the wei resource value for an address.
pub fn wei_resource(ctx: &mut Context, address: Expr, pos: Position) -> Expr {
    ctx.ivl
        .func_app(&constructor_name(names::WEI), vec![address], resource_sort(), pos)
}

/// Translate a resource expression to its record value. `None` stands for
/// wei at the contract's own address.
pub fn translate_resource(
    ctx: &mut Context,
    resource: Option<&AstExpr>,
    stmts: &mut Vec<Stmt>,
) -> Result<Expr, TranslationError> {
    let Some(resource) = resource else {
        let address = self_address(ctx);
        return Ok(wei_resource(ctx, address, Position::None));
    };
    let pos = ctx.to_position(resource);
    match &resource.kind {
        ExprKind::Name(name) if name == names::WEI => {
            let address = self_address(ctx);
            Ok(wei_resource(ctx, address, pos))
        }
        ExprKind::Name(name) => {
            let decl = ctx.scoped_resource(name).ok_or_else(|| {
                TranslationError::internal(format!("unknown resource '{}'", name))
            })?;
            if !decl.args.is_empty() {
                return Err(TranslationError::unsupported(
                    "resource with parameters used without arguments",
                    resource.span,
                ));
            }
            let address = self_address(ctx);
            Ok(ctx
                .ivl
                .func_app(&constructor_name(name), vec![address], resource_sort(), pos))
        }
        ExprKind::Call { name, args, .. } => {
            let decl = ctx.scoped_resource(name).ok_or_else(|| {
                TranslationError::internal(format!("unknown resource '{}'", name))
            })?;
            if decl.args.len() != args.len() {
                return Err(TranslationError::internal(format!(
                    "resource '{}' expects {} arguments",
                    name,
                    decl.args.len()
                )));
            }
            let mut translated = Vec::with_capacity(args.len() + 1);
            for arg in args {
                translated.push(super::expression::translate_expr(ctx, arg, stmts)?);
            }
            translated.push(self_address(ctx));
            Ok(ctx
                .ivl
                .func_app(&constructor_name(name), translated, resource_sort(), pos))
        }
        // `Interface.resource` resolves against the interface's scope.
        ExprKind::Attribute { value, attr } => {
            if let ExprKind::Name(interface_name) = &value.kind {
                let interface =
                    ctx.program.interfaces.get(interface_name).ok_or_else(|| {
                        TranslationError::internal(format!(
                            "unknown interface '{}'",
                            interface_name
                        ))
                    })?;
                return ctx.with_program_scope(interface, |ctx| {
                    let address = self_address(ctx);
                    Ok(ctx.ivl.func_app(
                        &constructor_name(attr),
                        vec![address],
                        resource_sort(),
                        pos,
                    ))
                });
            }
            Err(TranslationError::unsupported("resource receiver", resource.span))
        }
        _ => Err(TranslationError::unsupported("resource expression", resource.span)),
    }
}

/// `allocated[resource][owner]`.
pub fn allocated_read(
    ctx: &mut Context,
    bundle: &StateBundle,
    resource: Expr,
    owner: Expr,
    pos: Position,
) -> Result<Expr, TranslationError> {
    let allocated = bundle.read(ctx, state::ALLOCATED)?;
    let per_owner = ctx.ivl.map_get(allocated, resource, pos);
    Ok(ctx.ivl.map_get(per_owner, owner, pos))
}

/// Update `allocated[resource][owner]` by `delta` (already signed).
fn allocated_update(
    ctx: &mut Context,
    resource: Expr,
    owner: Expr,
    delta: Expr,
    stmts: &mut Vec<Stmt>,
    pos: Position,
) -> Result<(), TranslationError> {
    let bundle = ctx.state()?.clone();
    let allocated = bundle.read(ctx, state::ALLOCATED)?;
    let per_owner = ctx.ivl.map_get(allocated.clone(), resource.clone(), pos);
    let current = ctx.ivl.map_get(per_owner.clone(), owner.clone(), pos);
    let updated = ctx.ivl.add(current, delta, pos);
    let new_per_owner = ctx.ivl.map_set(per_owner, owner, updated, pos);
    let new_allocated = ctx.ivl.map_set(allocated, resource, new_per_owner, pos);
    stmts.push(ctx.ivl.local_assign(state::ALLOCATED, new_allocated, pos));
    Ok(())
}

/// `allocate(R, amount[, to=owner])`: create `amount` units owned by
/// `owner` (the message sender by default).
pub fn encode_allocate(
    ctx: &mut Context,
    node: &AstExpr,
    resource: Expr,
    amount: Expr,
    owner: Expr,
    stmts: &mut Vec<Stmt>,
) -> Result<(), TranslationError> {
    let pos = ctx.to_position(node);
    allocated_update(ctx, resource, owner, amount, stmts, pos)
}

/// `reallocate(R, amount, to=receiver[, frm=sender])`: move units between
/// owners, asserting the source owns enough.
pub fn encode_reallocate(
    ctx: &mut Context,
    node: &AstExpr,
    resource: Expr,
    amount: Expr,
    from: Expr,
    to: Expr,
    stmts: &mut Vec<Stmt>,
) -> Result<(), TranslationError> {
    let pos = ctx.to_position_with_rules(node, rules::REALLOCATE_FAIL);
    let bundle = ctx.state()?.clone();
    let available = allocated_read(ctx, &bundle, resource.clone(), from.clone(), pos)?;
    let sufficient = ctx.ivl.le(amount.clone(), available, pos);
    stmts.push(ctx.ivl.assert_stmt(sufficient, pos));

    let negated = ctx.ivl.neg(amount.clone(), pos);
    allocated_update(ctx, resource.clone(), from, negated, stmts, pos)?;
    allocated_update(ctx, resource, to, amount, stmts, pos)
}

/// Offer map key.
pub fn offer_key(
    ctx: &mut Context,
    left: Expr,
    right: Expr,
    left_amount: Expr,
    right_amount: Expr,
    from: Expr,
    to: Expr,
    pos: Position,
) -> Expr {
    ctx.ivl.func_app(
        "$offer$init",
        vec![left, right, left_amount, right_amount, from, to],
        Sort::Struct(super::types::OFFER_SORT_NAME.to_string()),
        pos,
    )
}

/// Trust map key.
pub fn trust_key(ctx: &mut Context, address: Expr, by: Expr, pos: Position) -> Expr {
    ctx.ivl.func_app(
        "$trust$init",
        vec![address, by],
        Sort::Struct(super::types::TRUST_SORT_NAME.to_string()),
        pos,
    )
}

/// `offer(R1, R2, n1, n2, to=counterparty)`: record an open offer by the
/// message sender.
#[allow(clippy::too_many_arguments)]
pub fn encode_offer(
    ctx: &mut Context,
    node: &AstExpr,
    left: Expr,
    right: Expr,
    left_amount: Expr,
    right_amount: Expr,
    from: Expr,
    to: Expr,
    stmts: &mut Vec<Stmt>,
) -> Result<(), TranslationError> {
    let pos = ctx.to_position(node);
    let key = offer_key(ctx, left, right, left_amount, right_amount, from, to, pos);
    let bundle = ctx.state()?.clone();
    let offered = bundle.read(ctx, state::OFFERED)?;
    let current = ctx.ivl.map_get(offered.clone(), key.clone(), pos);
    let one = ctx.ivl.int(1, pos);
    let incremented = ctx.ivl.add(current, one, pos);
    let updated = ctx.ivl.map_set(offered, key, incremented, pos);
    stmts.push(ctx.ivl.local_assign(state::OFFERED, updated, pos));
    Ok(())
}

/// `trust(address, by=truster)`: record a trust relation.
pub fn encode_trust(
    ctx: &mut Context,
    node: &AstExpr,
    address: Expr,
    by: Expr,
    stmts: &mut Vec<Stmt>,
) -> Result<(), TranslationError> {
    let pos = ctx.to_position(node);
    let key = trust_key(ctx, address, by, pos);
    let bundle = ctx.state()?.clone();
    let trusted = bundle.read(ctx, state::TRUSTED)?;
    let t = ctx.ivl.true_lit(pos);
    let updated = ctx.ivl.map_set(trusted, key, t, pos);
    stmts.push(ctx.ivl.local_assign(state::TRUSTED, updated, pos));
    Ok(())
}

/// `exchange(R1, R2, n1, n2, a, b)`: atomically swap `n1` of `R1` owned by
/// `a` against `n2` of `R2` owned by `b`, consuming a matching offer.
#[allow(clippy::too_many_arguments)]
pub fn encode_exchange(
    ctx: &mut Context,
    node: &AstExpr,
    left: Expr,
    right: Expr,
    left_amount: Expr,
    right_amount: Expr,
    party_a: Expr,
    party_b: Expr,
    stmts: &mut Vec<Stmt>,
) -> Result<(), TranslationError> {
    // A matching open offer from `b` is required.
    let offer_pos = ctx.to_position_with_rules(node, rules::EXCHANGE_FAIL_NO_OFFER);
    let key = offer_key(
        ctx,
        left.clone(),
        right.clone(),
        left_amount.clone(),
        right_amount.clone(),
        party_b.clone(),
        party_a.clone(),
        offer_pos,
    );
    let bundle = ctx.state()?.clone();
    let offered = bundle.read(ctx, state::OFFERED)?;
    let count = ctx.ivl.map_get(offered.clone(), key.clone(), offer_pos);
    let zero = ctx.ivl.int(0, offer_pos);
    let has_offer = ctx.ivl.gt(count.clone(), zero, offer_pos);
    stmts.push(ctx.ivl.assert_stmt(has_offer, offer_pos));

    // Consume the offer.
    let one = ctx.ivl.int(1, offer_pos);
    let decremented = ctx.ivl.sub(count, one, offer_pos);
    let updated = ctx.ivl.map_set(offered, key, decremented, offer_pos);
    stmts.push(ctx.ivl.local_assign(state::OFFERED, updated, offer_pos));

    // Both parties must own what they give away.
    let funds_pos = ctx.to_position_with_rules(node, rules::EXCHANGE_FAIL_INSUFFICIENT_FUNDS);
    let a_has = allocated_read(ctx, &bundle, left.clone(), party_a.clone(), funds_pos)?;
    let a_enough = ctx.ivl.le(left_amount.clone(), a_has, funds_pos);
    stmts.push(ctx.ivl.assert_stmt(a_enough, funds_pos));
    let b_has = allocated_read(ctx, &bundle, right.clone(), party_b.clone(), funds_pos)?;
    let b_enough = ctx.ivl.le(right_amount.clone(), b_has, funds_pos);
    stmts.push(ctx.ivl.assert_stmt(b_enough, funds_pos));

    // The swap itself.
    let neg_left = ctx.ivl.neg(left_amount.clone(), funds_pos);
    allocated_update(ctx, left.clone(), party_a.clone(), neg_left, stmts, funds_pos)?;
    allocated_update(ctx, left, party_b.clone(), left_amount, stmts, funds_pos)?;
    let neg_right = ctx.ivl.neg(right_amount.clone(), funds_pos);
    allocated_update(ctx, right.clone(), party_b, neg_right, stmts, funds_pos)?;
    allocated_update(ctx, right, party_a, right_amount, stmts, funds_pos)
}

/// The leak-check postconditions of a function: for every resource not
/// mentioned in a `performs` clause, the allocation total of each of its
/// instances is unchanged between `old_bundle` and the current state.
pub fn leak_check(
    ctx: &mut Context,
    function: &Function,
    old_bundle: &StateBundle,
) -> Result<Vec<Expr>, TranslationError> {
    let performed = function.performed_resources();
    let mut out = Vec::new();
    for resource in all_resource_names(ctx) {
        if performed.contains(&resource.as_str()) {
            continue;
        }
        let pos = ctx.registry.register(ErrorInfo {
            function: Some(function.name.clone()),
            span: covenant_core::span::Span::new(
                function.span.end_line,
                function.span.end_col,
                function.span.end_line,
                function.span.end_col,
            ),
            text: function.name.clone(),
            resource: Some(resource.clone()),
            vias: Vec::new(),
            rules: rules::LEAK_CHECK_FAIL,
            model: None,
        });

        let tag = resource_tag(ctx, &resource);
        let var_name = ctx.new_local_var_name("$r");
        let decl = LocalVarDecl::new(&var_name, resource_sort());
        let var = ctx.ivl.local_var(&var_name, resource_sort(), pos);

        let tag_of = ctx.ivl.func_app("$resource$tag", vec![var.clone()], Sort::Int, pos);
        let tag_lit = ctx.ivl.int(tag, pos);
        let is_this_resource = ctx.ivl.eq(tag_of, tag_lit, pos);

        let bundle = ctx.state()?.clone();
        let cur_allocated = bundle.read(ctx, state::ALLOCATED)?;
        let cur_per_owner = ctx.ivl.map_get(cur_allocated, var.clone(), pos);
        let cur_sum = ctx.ivl.map_sum(cur_per_owner.clone(), pos);

        let old_allocated = old_bundle.read(ctx, state::ALLOCATED)?;
        let old_per_owner = ctx.ivl.map_get(old_allocated, var.clone(), pos);
        let old_sum = ctx.ivl.map_sum(old_per_owner, pos);

        let preserved = ctx.ivl.eq(cur_sum, old_sum, pos);
        let body = ctx.ivl.implies(is_this_resource, preserved, pos);
        let trigger = Trigger { parts: vec![cur_per_owner] };
        out.push(ctx.ivl.forall(vec![decl], vec![trigger], body, pos));
    }
    Ok(out)
}
