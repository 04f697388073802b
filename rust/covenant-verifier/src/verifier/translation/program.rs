//! Top-level program encoding: prelude domains, state fields, one method
//! per contract function, one function per lemma.

use num_bigint::BigInt;
use num_traits::One;

use crate::verifier::annotate::TypeTable;
use crate::verifier::ast::{Function, Program};
use crate::verifier::ivl::{
    Domain, DomainAxiom, DomainFunc, Expr, FieldDecl, IvlProgram, LocalVarDecl, Predicate, Sort,
    Trigger,
};
use crate::verifier::names;
use crate::verifier::positions::{Position, PositionRegistry};
use crate::verifier::types::ADDRESS_BITS;

use super::function::{translate_function, translate_lemma, translate_pure_function};
use super::resource::{constructor_name, resource_sort};
use super::state;
use super::types::{
    translate_type, EVENT_SORT_NAME, OFFER_SORT_NAME, RESOURCE_SORT_NAME, TRUST_SORT_NAME,
};
use super::{Context, TranslationError};

/// Translate a whole annotated contract into one IVL program. Returns the
/// program together with the position registry needed to map verifier
/// failures back to source.
pub fn translate_program(
    program: &Program,
    types: &TypeTable,
) -> Result<(IvlProgram, PositionRegistry), TranslationError> {
    let mut ctx = Context::new(program, types);
    declare_sorts(&mut ctx);
    declare_fields(&mut ctx);

    let domains = prelude_domains(&mut ctx);
    let fields = field_decls(&ctx);

    let mut functions = Vec::new();
    let mut methods = Vec::new();

    let synthesized_init = synthesize_init(&ctx);
    if let Some(init) = &synthesized_init {
        methods.push(translate_function(&mut ctx, init)?);
    }

    let declared: Vec<Function> = ctx.program.functions.values().cloned().collect();
    for function in &declared {
        if function.is_pure() {
            functions.push(translate_pure_function(&mut ctx, function)?);
        } else {
            methods.push(translate_function(&mut ctx, function)?);
        }
    }

    let lemmas: Vec<_> = ctx.program.lemmas.values().cloned().collect();
    for lemma in &lemmas {
        functions.push(translate_lemma(&mut ctx, lemma)?);
    }

    let predicates = accessibility_predicates(&ctx);

    let ivl_program = IvlProgram { domains, fields, functions, predicates, methods };
    Ok((ivl_program, ctx.registry))
}

/// An empty public constructor when the contract declares none, so that
/// invariant establishment is always checked.
fn synthesize_init(ctx: &Context) -> Option<Function> {
    if ctx.program.functions.contains_key(names::INIT) {
        return None;
    }
    Some(Function {
        name: names::INIT.to_string(),
        args: vec![],
        ret: None,
        decorators: vec![crate::verifier::ast::Decorator::Public],
        preconditions: vec![],
        postconditions: vec![],
        checks: vec![],
        performs: vec![],
        body: vec![],
        span: ctx.program.span,
    })
}

fn declare_sorts(ctx: &mut Context) {
    for st in ctx.program.structs.clone().values() {
        let fields = st
            .fields
            .iter()
            .map(|(name, ty)| (name.clone(), translate_type(ty)))
            .collect();
        ctx.ivl.declare_struct(&st.name, fields);
    }
    // Opaque carrier sorts for ghost values.
    ctx.ivl.declare_struct(RESOURCE_SORT_NAME, vec![]);
    ctx.ivl.declare_struct(OFFER_SORT_NAME, vec![]);
    ctx.ivl.declare_struct(TRUST_SORT_NAME, vec![]);
    ctx.ivl.declare_struct(EVENT_SORT_NAME, vec![]);
    ctx.ivl.declare_struct(state::REF_SORT_NAME, vec![]);
}

fn declare_fields(ctx: &mut Context) {
    for var in ctx.program.state.clone() {
        ctx.ivl.declare_field(&var.name, translate_type(&var.ty));
    }
    ctx.ivl.declare_field(names::SELF_BALANCE, Sort::Int);
    ctx.ivl.declare_field("msg$sender", Sort::Int);
    ctx.ivl.declare_field("msg$value", Sort::Int);
    ctx.ivl.declare_field("block$timestamp", Sort::Int);
}

fn field_decls(ctx: &Context) -> Vec<FieldDecl> {
    let mut out = Vec::new();
    for var in &ctx.program.state {
        out.push(FieldDecl {
            name: var.name.clone(),
            sort: translate_type(&var.ty),
            pos: Position::None,
        });
    }
    out.push(FieldDecl {
        name: names::SELF_BALANCE.to_string(),
        sort: Sort::Int,
        pos: Position::None,
    });
    for immutable in ["msg$sender", "msg$value", "block$timestamp"] {
        out.push(FieldDecl { name: immutable.to_string(), sort: Sort::Int, pos: Position::None });
    }
    out
}

/// One abstract reachability predicate per contract function.
fn accessibility_predicates(ctx: &Context) -> Vec<Predicate> {
    ctx.program
        .functions
        .values()
        .map(|f| Predicate {
            name: format!("$accessible${}", f.name),
            args: vec![
                LocalVarDecl::new("$target", Sort::Int),
                LocalVarDecl::new("$amount", Sort::Int),
            ],
            body: None,
            pos: Position::None,
        })
        .collect()
}

// ── Prelude ─────────────────────────────────────────────────────────

fn prelude_domains(ctx: &mut Context) -> Vec<Domain> {
    let mut out = vec![map_domain(ctx), seq_domain(ctx), contract_domain(ctx)];
    out.push(resource_domain(ctx));
    out.push(ghost_key_domain(ctx));
    out.extend(struct_domains(ctx));
    out
}

/// Total maps with a default element and a summation function.
fn map_domain(ctx: &mut Context) -> Domain {
    let b = &ctx.ivl;
    let none = Position::None;
    let map_sort = Sort::map(Sort::Int, Sort::Int);

    let m = b.local_var("m", map_sort.clone(), none);
    let k1 = b.local_var("k1", Sort::Int, none);
    let k2 = b.local_var("k2", Sort::Int, none);
    let v = b.local_var("v", Sort::Int, none);

    let m_decl = LocalVarDecl::new("m", map_sort.clone());
    let k1_decl = LocalVarDecl::new("k1", Sort::Int);
    let k2_decl = LocalVarDecl::new("k2", Sort::Int);
    let v_decl = LocalVarDecl::new("v", Sort::Int);

    // get(set(m, k, v), k) == v
    let set1 = b.map_set(m.clone(), k1.clone(), v.clone(), none);
    let get1 = b.map_get(set1.clone(), k1.clone(), none);
    let ax_get_set = b.eq(get1, v.clone(), none);
    let ax_get_set = b.forall(
        vec![m_decl.clone(), k1_decl.clone(), v_decl.clone()],
        vec![Trigger { parts: vec![b.map_get(set1.clone(), k1.clone(), none)] }],
        ax_get_set,
        none,
    );

    // k1 != k2 ==> get(set(m, k1, v), k2) == get(m, k2)
    let distinct = b.ne(k1.clone(), k2.clone(), none);
    let get_other = b.map_get(set1.clone(), k2.clone(), none);
    let get_orig = b.map_get(m.clone(), k2.clone(), none);
    let frame = b.eq(get_other.clone(), get_orig, none);
    let ax_frame = b.implies(distinct, frame, none);
    let ax_frame = b.forall(
        vec![m_decl.clone(), k1_decl, k2_decl, v_decl.clone()],
        vec![Trigger { parts: vec![get_other] }],
        ax_frame,
        none,
    );

    // sum(init(0)) == 0
    let zero = b.int(0, none);
    let init = b.func_app("$map_init", vec![zero.clone()], map_sort.clone(), none);
    let sum_init = b.map_sum(init, none);
    let ax_sum_init = b.eq(sum_init, zero.clone(), none);

    // sum(set(m, k, v)) == sum(m) - get(m, k) + v
    let k = b.local_var("k1", Sort::Int, none);
    let set = b.map_set(m.clone(), k.clone(), v.clone(), none);
    let sum_set = b.map_sum(set, none);
    let sum_m = b.map_sum(m.clone(), none);
    let get_m_k = b.map_get(m.clone(), k, none);
    let minus = b.sub(sum_m, get_m_k, none);
    let plus = b.add(minus, v, none);
    let ax_sum_set = b.eq(sum_set.clone(), plus, none);
    let ax_sum_set = b.forall(
        vec![m_decl, LocalVarDecl::new("k1", Sort::Int), LocalVarDecl::new("v", Sort::Int)],
        vec![Trigger { parts: vec![sum_set] }],
        ax_sum_set,
        none,
    );

    Domain {
        name: "$Map".to_string(),
        functions: vec![
            DomainFunc {
                name: "$map_init".to_string(),
                args: vec![Sort::Int],
                sort: map_sort.clone(),
            },
            DomainFunc {
                name: "$map_get".to_string(),
                args: vec![map_sort.clone(), Sort::Int],
                sort: Sort::Int,
            },
            DomainFunc {
                name: "$map_set".to_string(),
                args: vec![map_sort.clone(), Sort::Int, Sort::Int],
                sort: map_sort.clone(),
            },
            DomainFunc { name: "$map_sum".to_string(), args: vec![map_sort], sort: Sort::Int },
        ],
        axioms: vec![
            DomainAxiom { name: "$map_get_set".to_string(), expr: ax_get_set },
            DomainAxiom { name: "$map_get_set_frame".to_string(), expr: ax_frame },
            DomainAxiom { name: "$map_sum_init".to_string(), expr: ax_sum_init },
            DomainAxiom { name: "$map_sum_set".to_string(), expr: ax_sum_set },
        ],
    }
}

/// Sequence update and summation helpers beyond the builtin theory.
fn seq_domain(ctx: &mut Context) -> Domain {
    let b = &ctx.ivl;
    let none = Position::None;
    let seq_sort = Sort::seq(Sort::Int);

    let s = b.local_var("s", seq_sort.clone(), none);
    let s_decl = LocalVarDecl::new("s", seq_sort.clone());

    // |empty| == 0
    let empty = b.func_app("$seq_empty", vec![], seq_sort.clone(), none);
    let len_empty = b.seq_length(empty.clone(), none);
    let zero = b.int(0, none);
    let ax_empty_len = b.eq(len_empty, zero.clone(), none);

    // sum(empty) == 0
    let sum_empty = b.func_app("$seq_sum", vec![empty], Sort::Int, none);
    let ax_sum_empty = b.eq(sum_empty, zero, none);

    // |update(s, i, v)| == |s|
    let i = b.local_var("i", Sort::Int, none);
    let v = b.local_var("v", Sort::Int, none);
    let updated = b.func_app(
        "$seq_update",
        vec![s.clone(), i.clone(), v.clone()],
        seq_sort.clone(),
        none,
    );
    let len_updated = b.seq_length(updated.clone(), none);
    let len_s = b.seq_length(s, none);
    let ax_update_len = b.eq(len_updated, len_s, none);
    let ax_update_len = b.forall(
        vec![s_decl, LocalVarDecl::new("i", Sort::Int), LocalVarDecl::new("v", Sort::Int)],
        vec![Trigger { parts: vec![updated] }],
        ax_update_len,
        none,
    );

    Domain {
        name: "$Seq".to_string(),
        functions: vec![
            DomainFunc { name: "$seq_empty".to_string(), args: vec![], sort: seq_sort.clone() },
            DomainFunc {
                name: "$seq_update".to_string(),
                args: vec![seq_sort.clone(), Sort::Int, Sort::Int],
                sort: seq_sort.clone(),
            },
            DomainFunc { name: "$seq_sum".to_string(), args: vec![seq_sort], sort: Sort::Int },
        ],
        axioms: vec![
            DomainAxiom { name: "$seq_empty_len".to_string(), expr: ax_empty_len },
            DomainAxiom { name: "$seq_sum_empty".to_string(), expr: ax_sum_empty },
            DomainAxiom { name: "$seq_update_len".to_string(), expr: ax_update_len },
        ],
    }
}

/// The contract's own address: an opaque constant inside address bounds.
fn contract_domain(ctx: &mut Context) -> Domain {
    let b = &ctx.ivl;
    let none = Position::None;
    let addr = b.func_app("$self_address", vec![], Sort::Int, none);
    let zero = b.int(0, none);
    let lower = b.lt(zero, addr.clone(), none);
    let bound = (BigInt::one() << ADDRESS_BITS) - 1;
    let hi = b.int_lit(bound, none);
    let upper = b.le(addr, hi, none);
    let ax = b.and(lower, upper, none);
    Domain {
        name: "$Contract".to_string(),
        functions: vec![DomainFunc {
            name: "$self_address".to_string(),
            args: vec![],
            sort: Sort::Int,
        }],
        axioms: vec![DomainAxiom { name: "$self_address_bounds".to_string(), expr: ax }],
    }
}

/// Per-resource constructors and the tag function the leak check
/// quantifies with.
fn resource_domain(ctx: &mut Context) -> Domain {
    let none = Position::None;
    let mut functions = vec![DomainFunc {
        name: "$resource$tag".to_string(),
        args: vec![resource_sort()],
        sort: Sort::Int,
    }];
    let mut axioms = Vec::new();

    let mut resources: Vec<(String, Vec<Sort>)> =
        vec![(names::WEI.to_string(), vec![Sort::Int])];
    for (name, decl) in ctx.program.own_resources.clone() {
        let mut args: Vec<Sort> = decl.args.iter().map(|(_, ty)| translate_type(ty)).collect();
        args.push(Sort::Int);
        resources.push((name, args));
    }
    for (name, decls) in ctx.program.resources.clone() {
        if ctx.program.own_resources.contains_key(&name) {
            continue;
        }
        let Some(decl) = decls.first() else { continue };
        let mut args: Vec<Sort> = decl.args.iter().map(|(_, ty)| translate_type(ty)).collect();
        args.push(Sort::Int);
        resources.push((name, args));
    }

    for (name, arg_sorts) in resources {
        let ctor = constructor_name(&name);
        functions.push(DomainFunc {
            name: ctor.clone(),
            args: arg_sorts.clone(),
            sort: resource_sort(),
        });

        // tag(ctor(args…)) == tag(R)
        let tag = super::resource::resource_tag(ctx, &name);
        let decls: Vec<LocalVarDecl> = arg_sorts
            .iter()
            .enumerate()
            .map(|(i, sort)| LocalVarDecl::new(&format!("a{}", i), sort.clone()))
            .collect();
        let args: Vec<Expr> = decls
            .iter()
            .map(|d| ctx.ivl.local_var(&d.name, d.sort.clone(), none))
            .collect();
        let instance = ctx.ivl.func_app(&ctor, args, resource_sort(), none);
        let tag_of = ctx
            .ivl
            .func_app("$resource$tag", vec![instance.clone()], Sort::Int, none);
        let tag_lit = ctx.ivl.int(tag, none);
        let body = ctx.ivl.eq(tag_of, tag_lit, none);
        let ax = if decls.is_empty() {
            body
        } else {
            ctx.ivl
                .forall(decls, vec![Trigger { parts: vec![instance] }], body, none)
        };
        axioms.push(DomainAxiom { name: format!("{}$tag", ctor), expr: ax });
    }

    Domain { name: format!("${}", RESOURCE_SORT_NAME), functions, axioms }
}

/// Constructors for offer keys, trust keys, and event instances.
fn ghost_key_domain(ctx: &mut Context) -> Domain {
    let mut functions = vec![
        DomainFunc {
            name: "$offer$init".to_string(),
            args: vec![
                resource_sort(),
                resource_sort(),
                Sort::Int,
                Sort::Int,
                Sort::Int,
                Sort::Int,
            ],
            sort: Sort::Struct(OFFER_SORT_NAME.to_string()),
        },
        DomainFunc {
            name: "$trust$init".to_string(),
            args: vec![Sort::Int, Sort::Int],
            sort: Sort::Struct(TRUST_SORT_NAME.to_string()),
        },
    ];
    for event in ctx.program.events.clone().values() {
        functions.push(DomainFunc {
            name: format!("$event${}", event.name),
            args: event.arg_types.iter().map(translate_type).collect(),
            sort: Sort::Struct(EVENT_SORT_NAME.to_string()),
        });
    }
    // Declared ghost functions, applied in specifications.
    for (name, ghosts) in ctx.program.ghost_functions.clone() {
        let Some(ghost) = ghosts.first() else { continue };
        let mut args: Vec<Sort> = ghost.args.iter().map(|(_, ty)| translate_type(ty)).collect();
        args.push(Sort::Int);
        functions.push(DomainFunc {
            name: format!("$ghost${}", name),
            args,
            sort: translate_type(&ghost.ret),
        });
    }
    Domain { name: "$Ghost".to_string(), functions, axioms: Vec::new() }
}

/// One domain per declared struct: constructor, getters, setters, and the
/// evaluation axioms relating them.
fn struct_domains(ctx: &mut Context) -> Vec<Domain> {
    let none = Position::None;
    let mut out = Vec::new();
    for st in ctx.program.structs.clone().values() {
        let sort = Sort::Struct(st.name.clone());
        let field_sorts: Vec<(String, Sort)> = st
            .fields
            .iter()
            .map(|(name, ty)| (name.clone(), translate_type(ty)))
            .collect();

        let mut functions = vec![DomainFunc {
            name: format!("${}$init", st.name),
            args: field_sorts.iter().map(|(_, s)| s.clone()).collect(),
            sort: sort.clone(),
        }];
        for (field, field_sort) in &field_sorts {
            functions.push(DomainFunc {
                name: format!("${}${}", st.name, field),
                args: vec![sort.clone()],
                sort: field_sort.clone(),
            });
            functions.push(DomainFunc {
                name: format!("${}$set${}", st.name, field),
                args: vec![sort.clone(), field_sort.clone()],
                sort: sort.clone(),
            });
        }

        let mut axioms = Vec::new();
        // getter(init(a0, …, an)) == ai
        let decls: Vec<LocalVarDecl> = field_sorts
            .iter()
            .enumerate()
            .map(|(i, (_, s))| LocalVarDecl::new(&format!("a{}", i), s.clone()))
            .collect();
        let ctor_args: Vec<Expr> = decls
            .iter()
            .map(|d| ctx.ivl.local_var(&d.name, d.sort.clone(), none))
            .collect();
        let instance = ctx.ivl.struct_init(&st.name, ctor_args.clone(), none);
        for (i, (field, _)) in field_sorts.iter().enumerate() {
            let read = ctx.ivl.struct_get(instance.clone(), field, none);
            let body = ctx.ivl.eq(read.clone(), ctor_args[i].clone(), none);
            let ax = if decls.is_empty() {
                body
            } else {
                ctx.ivl
                    .forall(decls.clone(), vec![Trigger { parts: vec![read] }], body, none)
            };
            axioms.push(DomainAxiom { name: format!("${}${}$init", st.name, field), expr: ax });
        }
        // getter(set(s, v)) == v and the other fields are framed
        for (field, field_sort) in &field_sorts {
            let s_decl = LocalVarDecl::new("s", sort.clone());
            let v_decl = LocalVarDecl::new("v", field_sort.clone());
            let s_var = ctx.ivl.local_var("s", sort.clone(), none);
            let v_var = ctx.ivl.local_var("v", field_sort.clone(), none);
            let updated = ctx.ivl.struct_set(s_var.clone(), field, v_var.clone(), none);
            let read = ctx.ivl.struct_get(updated.clone(), field, none);
            let body = ctx.ivl.eq(read, v_var, none);
            let ax = ctx.ivl.forall(
                vec![s_decl.clone(), v_decl.clone()],
                vec![Trigger { parts: vec![updated.clone()] }],
                body,
                none,
            );
            axioms.push(DomainAxiom { name: format!("${}$set${}$get", st.name, field), expr: ax });

            let mut frames = Vec::new();
            for (other, _) in &field_sorts {
                if other == field {
                    continue;
                }
                let read_other = ctx.ivl.struct_get(updated.clone(), other, none);
                let read_orig = ctx.ivl.struct_get(s_var.clone(), other, none);
                frames.push(ctx.ivl.eq(read_other, read_orig, none));
            }
            if !frames.is_empty() {
                let body = ctx.ivl.conjoin(frames, none);
                let ax = ctx.ivl.forall(
                    vec![s_decl, v_decl],
                    vec![Trigger { parts: vec![updated] }],
                    body,
                    none,
                );
                axioms.push(DomainAxiom {
                    name: format!("${}$set${}$frame", st.name, field),
                    expr: ax,
                });
            }
        }

        out.push(Domain { name: format!("${}", st.name), functions, axioms });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verifier::annotate::annotate_program;
    use crate::verifier::ast::{CmpOp, Expr as AstExpr, ExprKind, NodeIdGen, StateVar};
    use crate::verifier::ivl::pretty::print_program;
    use crate::verifier::types::Type;
    use covenant_core::span::Span;
    use num_bigint::BigInt;

    fn sanity_program() -> Program {
        // Contract with `self.x: int128`, no functions, invariant
        // `self.x >= 0`.
        let mut gen = NodeIdGen::new();
        let mut p = Program::empty("sanity.cov");
        p.state.push(StateVar {
            name: "x".to_string(),
            ty: Type::int128(),
            span: Span::new(1, 1, 1, 10),
        });
        let recv = AstExpr::new(
            gen.next_id(),
            Span::new(2, 1, 2, 5),
            ExprKind::Name(names::SELF.to_string()),
        );
        let field = AstExpr::new(
            gen.next_id(),
            Span::new(2, 1, 2, 7),
            ExprKind::Attribute { value: Box::new(recv), attr: "x".to_string() },
        );
        let zero = AstExpr::new(gen.next_id(), Span::new(2, 10, 2, 11), ExprKind::Int(BigInt::from(0)));
        let inv = AstExpr::new(
            gen.next_id(),
            Span::new(2, 1, 2, 11),
            ExprKind::Compare { op: CmpOp::Ge, left: Box::new(field), right: Box::new(zero) },
        );
        p.invariants.push(inv);
        p
    }

    #[test]
    fn sanity_contract_translates() {
        let program = sanity_program();
        let types = annotate_program(&program).unwrap();
        let (ivl, registry) = translate_program(&program, &types).unwrap();
        // A synthesized constructor is the only method.
        assert_eq!(ivl.methods.len(), 1);
        assert_eq!(ivl.methods[0].name, format!("f${}", names::INIT));
        assert!(!registry.is_empty());
        let text = print_program(&ivl);
        assert!(text.contains("domain $Map"));
        assert!(text.contains("field x: Int"));
        assert!(text.contains("label revert"));
    }

    #[test]
    fn every_registered_position_has_a_source_span() {
        let program = sanity_program();
        let types = annotate_program(&program).unwrap();
        let (_ivl, registry) = translate_program(&program, &types).unwrap();
        for id in registry.ids() {
            let info = registry.lookup(id).unwrap();
            // Synthesized nodes carry the program span; everything else
            // points into the file.
            assert!(info.span.line > 0 || info.text == names::INIT);
        }
    }

    #[test]
    fn prelude_contains_sum_axioms() {
        let program = sanity_program();
        let types = annotate_program(&program).unwrap();
        let (ivl, _) = translate_program(&program, &types).unwrap();
        let map_domain = ivl.domains.iter().find(|d| d.name == "$Map").unwrap();
        let names: Vec<_> = map_domain.axioms.iter().map(|a| a.name.as_str()).collect();
        assert!(names.contains(&"$map_sum_init"));
        assert!(names.contains(&"$map_sum_set"));
    }

    #[test]
    fn translation_is_deterministic_modulo_ids() {
        let program = sanity_program();
        let types = annotate_program(&program).unwrap();
        let (a, _) = translate_program(&program, &types).unwrap();
        let (b, _) = translate_program(&program, &types).unwrap();
        assert_eq!(print_program(&a), print_program(&b));
    }
}
