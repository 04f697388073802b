//! Lowering of contract types to IVL sorts, default values, bounds
//! invariants, and length constraints.

use num_bigint::BigInt;

use crate::verifier::ivl::{Expr, LocalVarDecl, Sort, Trigger};
use crate::verifier::positions::Position;
use crate::verifier::types::Type;

use super::{Context, TranslationError};

/// The shared IVL sort of all resource instance values.
pub const RESOURCE_SORT_NAME: &str = "Resource";
/// The shared IVL sort of all event payload values.
pub const EVENT_SORT_NAME: &str = "Event";
/// Two-party offers, keys of the offer map.
pub const OFFER_SORT_NAME: &str = "Offer";
/// Trust relations, keys of the trust map.
pub const TRUST_SORT_NAME: &str = "Trust";

/// Map a contract type to its IVL sort.
pub fn translate_type(ty: &Type) -> Sort {
    match ty {
        Type::Int(_) | Type::Address | Type::Contract(_) | Type::Interface(_) => Sort::Int,
        Type::Bool => Sort::Bool,
        Type::Bytes(_) => Sort::seq(Sort::Int),
        Type::Array(elem, _) => Sort::seq(translate_type(elem)),
        Type::Map(key, value) => Sort::map(translate_type(key), translate_type(value)),
        Type::Struct(st) => Sort::Struct(st.name.clone()),
        Type::Resource(_) | Type::Creator(_) => Sort::Struct(RESOURCE_SORT_NAME.to_string()),
        Type::Event(_, _) => Sort::Struct(EVENT_SORT_NAME.to_string()),
        // A union's representation is that of its first alternative; the
        // alternatives of a well-formed union share one sort.
        Type::Union(alts) => alts.first().map(translate_type).unwrap_or(Sort::Int),
    }
}

/// The zero element of a type.
pub fn default_value(ctx: &mut Context, ty: &Type, pos: Position) -> Result<Expr, TranslationError> {
    match ty {
        Type::Int(_) | Type::Address | Type::Contract(_) | Type::Interface(_) => {
            Ok(ctx.ivl.int(0, pos))
        }
        Type::Bool => Ok(ctx.ivl.false_lit(pos)),
        Type::Bytes(n) | Type::Array(_, n) if *n == 0 => Err(TranslationError::internal(
            "zero-capacity array has no default value",
        )),
        Type::Bytes(n) => {
            let zero = ctx.ivl.int(0, pos);
            Ok(ctx.ivl.explicit_seq(vec![zero; *n], pos))
        }
        Type::Array(elem, n) => {
            let elem_default = default_value(ctx, elem, pos)?;
            Ok(ctx.ivl.explicit_seq(vec![elem_default; *n], pos))
        }
        Type::Map(key, value) => {
            let value_default = default_value(ctx, value, pos)?;
            let sort = Sort::map(translate_type(key), translate_type(value));
            Ok(ctx.ivl.func_app("$map_init", vec![value_default], sort, pos))
        }
        Type::Struct(st) => {
            let st = st.clone();
            let mut args = Vec::with_capacity(st.fields.len());
            for (_, field_ty) in &st.fields {
                args.push(default_value(ctx, field_ty, pos)?);
            }
            Ok(ctx.ivl.struct_init(&st.name, args, pos))
        }
        Type::Resource(_) | Type::Creator(_) | Type::Event(_, _) | Type::Union(_) => Err(
            TranslationError::internal(format!("type {} has no default value", ty)),
        ),
    }
}

/// Bounds invariants for integer-typed state: `lo(T) <= e <= hi(T)`, with
/// quantified forms for maps and arrays and recursion into struct fields.
pub fn non_negative(ctx: &mut Context, expr: &Expr, ty: &Type) -> Vec<Expr> {
    let pos = Position::None;
    match ty {
        Type::Int(_) | Type::Address => {
            let Some((lo, hi)) = ty.bounds() else { return Vec::new() };
            vec![range_check(ctx, expr.clone(), &lo, &hi, pos)]
        }
        Type::Map(key, value) if value.is_integer() => {
            let Some((lo, hi)) = value.bounds() else { return Vec::new() };
            let key_name = ctx.new_local_var_name("$k");
            let key_decl = LocalVarDecl::new(&key_name, translate_type(key));
            let key_var = ctx.ivl.local_var(&key_name, translate_type(key), pos);
            let read = ctx.ivl.map_get(expr.clone(), key_var, pos);
            let trigger = Trigger { parts: vec![read.clone()] };
            let body = range_check(ctx, read, &lo, &hi, pos);
            vec![ctx.ivl.forall(vec![key_decl], vec![trigger], body, pos)]
        }
        Type::Array(elem, _) if elem.is_integer() => {
            let Some((lo, hi)) = elem.bounds() else { return Vec::new() };
            let idx_name = ctx.new_local_var_name("$i");
            let idx_decl = LocalVarDecl::new(&idx_name, Sort::Int);
            let idx_var = ctx.ivl.local_var(&idx_name, Sort::Int, pos);
            let zero = ctx.ivl.int(0, pos);
            let len = ctx.ivl.seq_length(expr.clone(), pos);
            let lo_guard = ctx.ivl.le(zero, idx_var.clone(), pos);
            let hi_guard = ctx.ivl.lt(idx_var.clone(), len, pos);
            let guard = ctx.ivl.and(lo_guard, hi_guard, pos);
            let read = ctx.ivl.seq_index(expr.clone(), idx_var, pos);
            let body = range_check(ctx, read, &lo, &hi, pos);
            let implication = ctx.ivl.implies(guard, body, pos);
            vec![ctx.ivl.forall(vec![idx_decl], vec![], implication, pos)]
        }
        Type::Struct(st) => {
            let st = st.clone();
            let mut out = Vec::new();
            for (field, field_ty) in &st.fields {
                let read = ctx.ivl.struct_get(expr.clone(), field, pos);
                out.extend(non_negative(ctx, &read, field_ty));
            }
            out
        }
        _ => Vec::new(),
    }
}

/// Length constraints for fixed-capacity arrays, recursing into structs.
pub fn array_length(ctx: &mut Context, expr: &Expr, ty: &Type) -> Vec<Expr> {
    let pos = Position::None;
    match ty {
        Type::Bytes(n) | Type::Array(_, n) => {
            let len = ctx.ivl.seq_length(expr.clone(), pos);
            let expected = ctx.ivl.int(*n as i64, pos);
            vec![ctx.ivl.eq(len, expected, pos)]
        }
        Type::Struct(st) => {
            let st = st.clone();
            let mut out = Vec::new();
            for (field, field_ty) in &st.fields {
                let read = ctx.ivl.struct_get(expr.clone(), field, pos);
                out.extend(array_length(ctx, &read, field_ty));
            }
            out
        }
        _ => Vec::new(),
    }
}

/// A predicate asserting that `expr` inhabits `ty`. Unions produce the
/// disjunction of their alternatives; generic types recurse per argument.
pub fn type_check(ctx: &mut Context, expr: &Expr, ty: &Type, pos: Position) -> Expr {
    match ty {
        Type::Int(_) | Type::Address => match ty.bounds() {
            Some((lo, hi)) => range_check(ctx, expr.clone(), &lo, &hi, pos),
            None => ctx.ivl.true_lit(pos),
        },
        Type::Bool => ctx.ivl.true_lit(pos),
        Type::Bytes(n) | Type::Array(_, n) => {
            let len = ctx.ivl.seq_length(expr.clone(), pos);
            let expected = ctx.ivl.int(*n as i64, pos);
            let mut check = ctx.ivl.eq(len, expected, pos);
            if let Type::Array(elem, _) = ty {
                if elem.is_integer() {
                    for part in non_negative(ctx, expr, ty) {
                        check = ctx.ivl.and(check, part, pos);
                    }
                }
            }
            check
        }
        Type::Struct(st) => {
            let st = st.clone();
            let mut parts = Vec::new();
            for (field, field_ty) in &st.fields {
                let read = ctx.ivl.struct_get(expr.clone(), field, pos);
                parts.push(type_check(ctx, &read, field_ty, pos));
            }
            ctx.ivl.conjoin(parts, pos)
        }
        Type::Union(alts) => {
            let mut parts = alts.iter().map(|alt| type_check(ctx, expr, alt, pos));
            match parts.next() {
                None => ctx.ivl.true_lit(pos),
                Some(first) => {
                    let rest: Vec<_> = parts.collect();
                    rest.into_iter().fold(first, |acc, p| ctx.ivl.or(acc, p, pos))
                }
            }
        }
        Type::Map(_, value) if value.is_integer() => {
            let parts = non_negative(ctx, expr, ty);
            ctx.ivl.conjoin(parts, pos)
        }
        _ => ctx.ivl.true_lit(pos),
    }
}

/// `lo <= e && e <= hi`.
pub fn range_check(ctx: &mut Context, expr: Expr, lo: &BigInt, hi: &BigInt, pos: Position) -> Expr {
    let lo_lit = ctx.ivl.int_lit(lo.clone(), pos);
    let hi_lit = ctx.ivl.int_lit(hi.clone(), pos);
    let lower = ctx.ivl.le(lo_lit, expr.clone(), pos);
    let upper = ctx.ivl.le(expr, hi_lit, pos);
    ctx.ivl.and(lower, upper, pos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verifier::annotate::TypeTable;
    use crate::verifier::ast::Program;
    use crate::verifier::ivl::ExprKind;
    use crate::verifier::types::StructType;

    #[test]
    fn sorts_for_primitives() {
        assert_eq!(translate_type(&Type::int128()), Sort::Int);
        assert_eq!(translate_type(&Type::Bool), Sort::Bool);
        assert_eq!(translate_type(&Type::Address), Sort::Int);
        assert_eq!(
            translate_type(&Type::Array(Box::new(Type::Bool), 4)),
            Sort::seq(Sort::Bool)
        );
        assert_eq!(
            translate_type(&Type::Map(Box::new(Type::Address), Box::new(Type::wei()))),
            Sort::map(Sort::Int, Sort::Int)
        );
    }

    #[test]
    fn resource_types_share_one_sort() {
        let st = StructType { name: "token".to_string(), fields: vec![] };
        assert_eq!(
            translate_type(&Type::Resource(st)),
            Sort::Struct(RESOURCE_SORT_NAME.to_string())
        );
    }

    #[test]
    fn default_values() {
        let program = Program::empty("t.cov");
        let types = TypeTable::new();
        let mut ctx = Context::new(&program, &types);
        let zero = default_value(&mut ctx, &Type::int128(), Position::None).unwrap();
        assert!(matches!(zero.kind, ExprKind::IntLit(_)));
        let f = default_value(&mut ctx, &Type::Bool, Position::None).unwrap();
        assert_eq!(f.kind, ExprKind::BoolLit(false));
        let m = default_value(
            &mut ctx,
            &Type::Map(Box::new(Type::Address), Box::new(Type::wei())),
            Position::None,
        )
        .unwrap();
        assert!(matches!(m.kind, ExprKind::FuncApp { ref name, .. } if name == "$map_init"));
    }

    #[test]
    fn non_negative_for_unsigned_state() {
        let program = Program::empty("t.cov");
        let types = TypeTable::new();
        let mut ctx = Context::new(&program, &types);
        let v = ctx.ivl.local_var("x", Sort::Int, Position::None);
        let invs = non_negative(&mut ctx, &v, &Type::uint256());
        assert_eq!(invs.len(), 1);
        assert_eq!(invs[0].sort, Sort::Bool);
    }

    #[test]
    fn map_bounds_are_quantified() {
        let program = Program::empty("t.cov");
        let types = TypeTable::new();
        let mut ctx = Context::new(&program, &types);
        let m = ctx
            .ivl
            .local_var("m", Sort::map(Sort::Int, Sort::Int), Position::None);
        let ty = Type::Map(Box::new(Type::Address), Box::new(Type::wei()));
        let invs = non_negative(&mut ctx, &m, &ty);
        assert_eq!(invs.len(), 1);
        assert!(matches!(invs[0].kind, ExprKind::Forall { .. }));
    }

    #[test]
    fn array_length_constraint() {
        let program = Program::empty("t.cov");
        let types = TypeTable::new();
        let mut ctx = Context::new(&program, &types);
        let a = ctx.ivl.local_var("a", Sort::seq(Sort::Int), Position::None);
        let ty = Type::Array(Box::new(Type::int128()), 5);
        let lens = array_length(&mut ctx, &a, &ty);
        assert_eq!(lens.len(), 1);
    }

    #[test]
    fn union_check_is_disjunction() {
        let program = Program::empty("t.cov");
        let types = TypeTable::new();
        let mut ctx = Context::new(&program, &types);
        let v = ctx.ivl.local_var("x", Sort::Int, Position::None);
        let ty = Type::Union(vec![Type::int128(), Type::uint256()]);
        let check = type_check(&mut ctx, &v, &ty, Position::None);
        assert!(matches!(
            check.kind,
            ExprKind::BinaryOp { op: crate::verifier::ivl::BinOpKind::Or, .. }
        ));
    }
}
