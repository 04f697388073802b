//! Resource and allocation scenarios: allocation without a `performs`
//! clause leaks, exchanges demand offers, and ghost predicates stay pure.

mod common;

use common::*;

use covenant_verifier::verifier::ast::{CmpOp, ExprKind, StmtKind};
use covenant_verifier::verifier::backend::BackendFailure;
use covenant_verifier::verifier::backend::{Backend, BackendError, BackendResponse};
use covenant_verifier::verifier::ivl::{pretty, IvlProgram};
use covenant_verifier::verifier::names;
use covenant_verifier::verifier::rules;
use covenant_verifier::{translate, verify_with_backend, VerificationResult};

struct CannedBackend(Vec<BackendFailure>);

impl Backend for CannedBackend {
    fn verify(&self, _program: &IvlProgram) -> Result<BackendResponse, BackendError> {
        if self.0.is_empty() {
            Ok(BackendResponse::Success)
        } else {
            Ok(BackendResponse::Failure { failures: self.0.clone() })
        }
    }
}

/// Scenario 5: `def f(): allocate(token, 1)` with no `performs` clause.
fn leaking_contract() -> covenant_verifier::verifier::ast::Program {
    let mut b = IrBuilder::new();
    let mut p = program("leak.cov");
    p.own_resources.insert("token".to_string(), resource_decl("token", "leak.cov"));
    p.resources
        .insert("token".to_string(), vec![resource_decl("token", "leak.cov")]);
    b.at_line(5);
    let token = b.name("token");
    let one = b.int(1);
    let call = b.expr(ExprKind::Call {
        name: names::ALLOCATE.to_string(),
        args: vec![token, one],
        keywords: vec![],
        resource: None,
    });
    let body = vec![b.stmt(StmtKind::ExprStmt { value: call })];
    p.functions.insert("f".to_string(), public_function("f", body));
    p
}

#[test]
fn allocation_without_performs_registers_a_leak_check() {
    let p = leaking_contract();
    let (_ivl, registry) = translate(&p).unwrap();

    let token_leaks: Vec<_> = registry
        .ids()
        .filter_map(|id| registry.lookup(id))
        .filter(|info| {
            info.resource.as_deref() == Some("token")
                && rules::apply(info.rules, "exhale.failed", "assertion.false").0
                    == "leakcheck.failed"
        })
        .collect();
    assert!(!token_leaks.is_empty());
    // The leak check points at the function's closing position.
    let in_f = token_leaks
        .iter()
        .find(|info| info.function.as_deref() == Some("f"))
        .expect("a leak check for f");
    assert_eq!(in_f.span.line, 9);
}

#[test]
fn leak_failure_names_the_resource_and_function() {
    let p = leaking_contract();
    let (_ivl, registry) = translate(&p).unwrap();
    let leak_id = registry
        .ids()
        .find(|id| {
            let info = registry.lookup(*id).unwrap();
            info.resource.as_deref() == Some("token")
                && info.function.as_deref() == Some("f")
        })
        .unwrap();

    let failure = BackendFailure {
        code: "exhale.failed".to_string(),
        reason: Some("assertion.false".to_string()),
        position: leak_id.to_string(),
        model: None,
    };
    let result = verify_with_backend(&p, &CannedBackend(vec![failure])).unwrap();
    let VerificationResult::Failure(errors) = result else { panic!("expected failure") };
    assert_eq!(errors[0].code, "leakcheck.failed");
    assert_eq!(errors[0].reason_code, "allocation.leaked");
    assert_eq!(errors[0].message, "Leak check for resource token might fail in f.");
}

#[test]
fn performs_clause_exempts_the_resource() {
    let mut p = leaking_contract();
    let mut b = IrBuilder::new();
    b.at_line(4);
    let token = b.name("token");
    let one = b.int(1);
    let performs = b.expr(ExprKind::Call {
        name: names::REALLOCATE.to_string(),
        args: vec![token, one],
        keywords: vec![],
        resource: None,
    });
    p.functions.get_mut("f").unwrap().performs.push(performs);

    let (_ivl, registry) = translate(&p).unwrap();
    let token_leak_in_f = registry.ids().any(|id| {
        let info = registry.lookup(id).unwrap();
        info.resource.as_deref() == Some("token") && info.function.as_deref() == Some("f")
    });
    assert!(!token_leak_in_f);
}

#[test]
fn allocate_updates_the_allocation_map() {
    let p = leaking_contract();
    let (ivl, _) = translate(&p).unwrap();
    let text = pretty::print_program(&ivl);
    assert!(text.contains("$allocated := $map_set($allocated"));
    assert!(text.contains("$resource$token"));
}

#[test]
fn exchange_asserts_an_offer_first() {
    let mut b = IrBuilder::new();
    let mut p = program("swap.cov");
    p.own_resources.insert("gold".to_string(), resource_decl("gold", "swap.cov"));
    p.own_resources
        .insert("silver".to_string(), resource_decl("silver", "swap.cov"));
    b.at_line(6);
    let gold = b.name("gold");
    let silver = b.name("silver");
    let one = b.int(1);
    let two = b.int(2);
    let party_a = b.int(10);
    let party_b = b.int(11);
    let call = b.expr(ExprKind::Call {
        name: names::EXCHANGE.to_string(),
        args: vec![gold, silver, one, two, party_a, party_b],
        keywords: vec![],
        resource: None,
    });
    let body = vec![b.stmt(StmtKind::ExprStmt { value: call })];
    let mut f = public_function("swap", body);
    // Both sides are reallocated by the exchange.
    b.at_line(4);
    let gold2 = b.name("gold");
    let silver2 = b.name("silver");
    let amount = b.int(1);
    let amount2 = b.int(2);
    f.performs.push(b.expr(ExprKind::Call {
        name: names::EXCHANGE.to_string(),
        args: vec![gold2, amount],
        keywords: vec![],
        resource: None,
    }));
    f.performs.push(b.expr(ExprKind::Call {
        name: names::EXCHANGE.to_string(),
        args: vec![silver2, amount2],
        keywords: vec![],
        resource: None,
    }));
    p.functions.insert("swap".to_string(), f);

    let (ivl, registry) = translate(&p).unwrap();
    let text = pretty::print_program(&ivl);
    assert!(text.contains("$offer$init"));

    let has_no_offer_check = registry.ids().any(|id| {
        let info = registry.lookup(id).unwrap();
        rules::apply(info.rules, "assert.failed", "assertion.false").1 == "no.offer"
    });
    let has_funds_check = registry.ids().any(|id| {
        let info = registry.lookup(id).unwrap();
        rules::apply(info.rules, "assert.failed", "assertion.false").1 == "insufficient.funds"
    });
    assert!(has_no_offer_check);
    assert!(has_funds_check);
}

#[test]
fn allocated_predicate_is_usable_in_invariants() {
    let mut b = IrBuilder::new();
    let mut p = program("alloc_inv.cov");
    p.own_resources.insert("token".to_string(), resource_decl("token", "alloc_inv.cov"));
    b.at_line(3);
    let token = b.name("token");
    let allocated = b.call(names::ALLOCATED, vec![token]);
    let zero = b.int(0);
    let inv = b.cmp(CmpOp::Ge, allocated, zero);
    p.invariants.push(inv);

    let (ivl, _) = translate(&p).unwrap();
    let text = pretty::print_program(&ivl);
    assert!(text.contains("$map_get"));
    assert!(text.contains("$resource$token"));
}
