//! The state bundle: contract fields plus the ghost allocation maps, with
//! the snapshot and havoc operations the encoding protocols are built on.
//!
//! Contract state lives in heap fields on the `$self` reference; the ghost
//! components (allocation, offer, trust, event maps) are struct-valued
//! locals. A snapshot rebinds every component to a fresh local, so `old(…)`
//! translation is just evaluation against the snapshot bundle.

use std::collections::BTreeMap;

use crate::verifier::ivl::{Expr, LocalVarDecl, Sort, Stmt};
use crate::verifier::names;
use crate::verifier::positions::Position;

use super::types::{EVENT_SORT_NAME, OFFER_SORT_NAME, RESOURCE_SORT_NAME, TRUST_SORT_NAME};
use super::{Context, TranslationError};

/// Sort of the `$self`, `$msg`, and `$block` references.
pub const REF_SORT_NAME: &str = "Ref";

pub fn ref_sort() -> Sort {
    Sort::Struct(REF_SORT_NAME.to_string())
}

pub fn allocated_sort() -> Sort {
    Sort::map(
        Sort::Struct(RESOURCE_SORT_NAME.to_string()),
        Sort::map(Sort::Int, Sort::Int),
    )
}

pub fn offered_sort() -> Sort {
    Sort::map(Sort::Struct(OFFER_SORT_NAME.to_string()), Sort::Int)
}

pub fn trusted_sort() -> Sort {
    Sort::map(Sort::Struct(TRUST_SORT_NAME.to_string()), Sort::Bool)
}

pub fn events_sort() -> Sort {
    Sort::map(Sort::Struct(EVENT_SORT_NAME.to_string()), Sort::Int)
}

/// Bundle keys for the ghost components.
pub const ALLOCATED: &str = "$allocated";
pub const OFFERED: &str = "$offered";
pub const TRUSTED: &str = "$trusted";
pub const EVENTS: &str = "$events";

/// One component of the state bundle.
#[derive(Debug, Clone)]
pub enum StateSlot {
    /// A heap field on the `$self` reference.
    Field { field: String },
    /// A struct- or map-valued local variable.
    Local { ivl_name: String, sort: Sort },
}

/// A named binding of the full contract state. At most one bundle is
/// "current" at a time; snapshots shadow but never alias it.
#[derive(Debug, Clone, Default)]
pub struct StateBundle {
    slots: BTreeMap<String, StateSlot>,
}

impl StateBundle {
    pub fn slot(&self, key: &str) -> Option<&StateSlot> {
        self.slots.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.slots.keys().map(String::as_str)
    }

    /// The read expression for one component.
    pub fn read(&self, ctx: &Context, key: &str) -> Result<Expr, TranslationError> {
        let slot = self
            .slots
            .get(key)
            .ok_or_else(|| TranslationError::internal(format!("unknown state slot '{}'", key)))?;
        Ok(read_slot(ctx, slot))
    }

    /// The read expression for a contract state field (including
    /// `balance`).
    pub fn read_field(&self, ctx: &Context, field: &str) -> Result<Expr, TranslationError> {
        self.read(ctx, &field_key(field))
    }
}

pub fn field_key(field: &str) -> String {
    format!("self${}", field)
}

pub fn self_ref(ctx: &Context) -> Expr {
    ctx.ivl.local_var("$self", ref_sort(), Position::None)
}

pub fn msg_ref(ctx: &Context) -> Expr {
    ctx.ivl.local_var("$msg", ref_sort(), Position::None)
}

pub fn block_ref(ctx: &Context) -> Expr {
    ctx.ivl.local_var("$block", ref_sort(), Position::None)
}

fn read_slot(ctx: &Context, slot: &StateSlot) -> Expr {
    match slot {
        StateSlot::Field { field } => ctx.ivl.field_access(self_ref(ctx), field, Position::None),
        StateSlot::Local { ivl_name, sort } => {
            ctx.ivl.local_var(ivl_name, sort.clone(), Position::None)
        }
    }
}

/// The bundle reading the live contract state.
pub fn current_bundle(ctx: &Context) -> StateBundle {
    let mut slots = BTreeMap::new();
    for var in &ctx.program.state {
        slots.insert(field_key(&var.name), StateSlot::Field { field: var.name.clone() });
    }
    slots.insert(
        field_key(names::SELF_BALANCE),
        StateSlot::Field { field: names::SELF_BALANCE.to_string() },
    );
    slots.insert(
        ALLOCATED.to_string(),
        StateSlot::Local { ivl_name: ALLOCATED.to_string(), sort: allocated_sort() },
    );
    slots.insert(
        OFFERED.to_string(),
        StateSlot::Local { ivl_name: OFFERED.to_string(), sort: offered_sort() },
    );
    slots.insert(
        TRUSTED.to_string(),
        StateSlot::Local { ivl_name: TRUSTED.to_string(), sort: trusted_sort() },
    );
    slots.insert(
        EVENTS.to_string(),
        StateSlot::Local { ivl_name: EVENTS.to_string(), sort: events_sort() },
    );
    StateBundle { slots }
}

/// Declarations for the ghost components of the current bundle.
pub fn ghost_component_decls() -> Vec<LocalVarDecl> {
    vec![
        LocalVarDecl::new(ALLOCATED, allocated_sort()),
        LocalVarDecl::new(OFFERED, offered_sort()),
        LocalVarDecl::new(TRUSTED, trusted_sort()),
        LocalVarDecl::new(EVENTS, events_sort()),
    ]
}

/// Snapshot the current state into fresh locals named after `prefix` and
/// append the copy assignments to `stmts`. Returns the snapshot bundle.
pub fn snapshot(
    ctx: &mut Context,
    prefix: &str,
    stmts: &mut Vec<Stmt>,
) -> Result<StateBundle, TranslationError> {
    let source = ctx.state()?.clone();
    let mut slots = BTreeMap::new();
    for (key, slot) in &source.slots {
        let value = read_slot(ctx, slot);
        let snap_name = ctx.new_local_var_name(&format!("{}${}", prefix, key.replace('$', "_")));
        ctx.new_local_vars.push(LocalVarDecl::new(&snap_name, value.sort.clone()));
        stmts.push(ctx.ivl.local_assign(&snap_name, value.clone(), Position::None));
        slots.insert(
            key.clone(),
            StateSlot::Local { ivl_name: snap_name, sort: value.sort.clone() },
        );
    }
    Ok(StateBundle { slots })
}

/// Assign fresh unconstrained values to every component of `bundle`.
pub fn havoc_bundle(ctx: &mut Context, bundle: &StateBundle, stmts: &mut Vec<Stmt>) {
    for slot in bundle.slots.values().cloned().collect::<Vec<_>>() {
        match slot {
            StateSlot::Field { field } => {
                let sort = read_slot(ctx, &StateSlot::Field { field: field.clone() }).sort;
                let fresh = ctx.havoc_var(sort);
                let receiver = self_ref(ctx);
                stmts.push(ctx.ivl.field_assign(receiver, &field, fresh, Position::None));
            }
            StateSlot::Local { ivl_name, sort } => {
                let fresh = ctx.havoc_var(sort);
                stmts.push(ctx.ivl.local_assign(&ivl_name, fresh, Position::None));
            }
        }
    }
}

/// Havoc the current state.
pub fn havoc_current(ctx: &mut Context, stmts: &mut Vec<Stmt>) -> Result<(), TranslationError> {
    let bundle = ctx.state()?.clone();
    havoc_bundle(ctx, &bundle, stmts);
    Ok(())
}

/// Havoc the current state and the innermost old-state snapshot, as the
/// loop step case requires.
pub fn havoc_old_and_current(
    ctx: &mut Context,
    stmts: &mut Vec<Stmt>,
) -> Result<(), TranslationError> {
    havoc_current(ctx, stmts)?;
    if let Some(old) = ctx.old_state().cloned() {
        havoc_bundle(ctx, &old, stmts);
    }
    Ok(())
}

/// Copy every component of `source` back into `target`, used by the revert
/// path to restore the entry state.
pub fn restore_bundle(
    ctx: &mut Context,
    target: &StateBundle,
    source: &StateBundle,
    stmts: &mut Vec<Stmt>,
) {
    for (key, slot) in target.slots.clone() {
        let Some(source_slot) = source.slots.get(&key) else { continue };
        let value = read_slot(ctx, source_slot);
        match slot {
            StateSlot::Field { field } => {
                let receiver = self_ref(ctx);
                stmts.push(ctx.ivl.field_assign(receiver, &field, value, Position::None));
            }
            StateSlot::Local { ivl_name, .. } => {
                stmts.push(ctx.ivl.local_assign(&ivl_name, value, Position::None));
            }
        }
    }
}

/// Inhale the field bounds and length invariants plus every given contract
/// invariant, all read against the current state.
pub fn assume_framed(
    ctx: &mut Context,
    invariants: &[crate::verifier::ast::Expr],
    stmts: &mut Vec<Stmt>,
) -> Result<(), TranslationError> {
    for inv in unchecked_invariants(ctx)? {
        stmts.push(ctx.ivl.inhale(inv, Position::None));
    }
    for inv in invariants {
        let pos = ctx.to_position(inv);
        let translated = super::specification::translate_spec(ctx, inv)?;
        stmts.push(ctx.ivl.inhale(translated, pos));
    }
    Ok(())
}

/// The invariants that hold without being declared: bounds of every
/// integer-typed state field and lengths of every fixed-capacity array.
pub fn unchecked_invariants(ctx: &mut Context) -> Result<Vec<Expr>, TranslationError> {
    let mut out = Vec::new();
    let state_vars = ctx.program.state.clone();
    let bundle = ctx.state()?.clone();
    for var in &state_vars {
        let read = bundle.read_field(ctx, &var.name)?;
        out.extend(super::types::non_negative(ctx, &read, &var.ty));
        out.extend(super::types::array_length(ctx, &read, &var.ty));
    }
    let balance = bundle.read_field(ctx, names::SELF_BALANCE)?;
    out.extend(super::types::non_negative(ctx, &balance, &crate::verifier::types::Type::wei()));
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verifier::annotate::TypeTable;
    use crate::verifier::ast::{Program, StateVar};
    use crate::verifier::types::Type;
    use covenant_core::span::Span;

    fn program() -> Program {
        let mut p = Program::empty("t.cov");
        p.state.push(StateVar { name: "x".to_string(), ty: Type::int128(), span: Span::dummy() });
        p
    }

    fn declare_fields(ctx: &mut Context) {
        ctx.ivl.declare_field("x", Sort::Int);
        ctx.ivl.declare_field(names::SELF_BALANCE, Sort::Int);
    }

    #[test]
    fn current_bundle_has_fields_and_ghost_maps() {
        let program = program();
        let types = TypeTable::new();
        let ctx = Context::new(&program, &types);
        let bundle = current_bundle(&ctx);
        assert!(bundle.slot(&field_key("x")).is_some());
        assert!(bundle.slot(&field_key(names::SELF_BALANCE)).is_some());
        assert!(bundle.slot(ALLOCATED).is_some());
        assert!(bundle.slot(EVENTS).is_some());
    }

    #[test]
    fn snapshot_rebinds_every_component_to_locals() {
        let program = program();
        let types = TypeTable::new();
        let mut ctx = Context::new(&program, &types);
        declare_fields(&mut ctx);
        ctx.current_state = Some(current_bundle(&ctx));
        let mut stmts = Vec::new();
        let snap = snapshot(&mut ctx, "old", &mut stmts).unwrap();
        assert_eq!(stmts.len(), snap.keys().count());
        for key in snap.keys().map(str::to_string).collect::<Vec<_>>() {
            assert!(matches!(snap.slot(&key), Some(StateSlot::Local { .. })));
        }
    }

    #[test]
    fn havoc_assigns_every_component() {
        let program = program();
        let types = TypeTable::new();
        let mut ctx = Context::new(&program, &types);
        declare_fields(&mut ctx);
        ctx.current_state = Some(current_bundle(&ctx));
        let mut stmts = Vec::new();
        havoc_current(&mut ctx, &mut stmts).unwrap();
        // One assignment per slot: two fields plus four ghost maps.
        assert_eq!(stmts.len(), 6);
    }
}
