//! Loop encoding scenarios: the havoc protocol for loops with invariants
//! and full unrolling without them.

mod common;

use common::*;

use covenant_verifier::verifier::ast::{CmpOp, StmtKind};
use covenant_verifier::verifier::backend::{Backend, BackendError, BackendFailure, BackendResponse};
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

/// `for i in range(3): invariant i >= lo; pass`.
fn loop_contract(lo: i64) -> covenant_verifier::verifier::ast::Program {
    let mut b = IrBuilder::new();
    let mut p = program("loop.cov");
    b.at_line(5);
    let three = b.int(3);
    let range = b.call(names::RANGE, vec![three]);
    b.at_line(6);
    let i = b.name("i");
    let bound = b.int(lo);
    let inv = b.cmp(CmpOp::Ge, i, bound);
    let body = vec![b.stmt(StmtKind::Pass)];
    b.at_line(5);
    let for_stmt = b.stmt(StmtKind::For {
        target: "i".to_string(),
        target_span: covenant_core::span::Span::new(5, 5, 5, 6),
        iter: range,
        invariants: vec![inv],
        body,
    });
    p.functions.insert("walk".to_string(), public_function("walk", vec![for_stmt]));
    p
}

#[test]
fn base_case_failure_maps_to_invariant_not_established() {
    // Scenario 4: invariant `i >= 1` cannot hold at iteration zero.
    let p = loop_contract(1);
    let (_ivl, registry) = translate(&p).unwrap();

    let base_id = registry
        .ids()
        .find(|id| {
            let info = registry.lookup(*id).unwrap();
            rules::apply(info.rules, "assert.failed", "assertion.false").0
                == "invariant.not.established"
        })
        .expect("a base-case check was registered");

    // The registered position is the invariant itself.
    let info = registry.lookup(base_id).unwrap();
    assert_eq!(info.span.line, 6);
    assert_eq!(info.text, "i >= 1");

    let failure = BackendFailure {
        code: "assert.failed".to_string(),
        reason: Some("assertion.false".to_string()),
        position: base_id.to_string(),
        model: None,
    };
    let result = verify_with_backend(&p, &CannedBackend(vec![failure])).unwrap();
    let VerificationResult::Failure(errors) = result else { panic!("expected failure") };
    assert_eq!(errors[0].code, "invariant.not.established");
    assert_eq!(errors[0].message, "Loop invariant might not hold on entry.");
    assert_eq!(errors[0].span.line, 6);
}

#[test]
fn step_case_check_is_registered_separately() {
    let p = loop_contract(0);
    let (_ivl, registry) = translate(&p).unwrap();
    let step_entries = registry
        .ids()
        .filter(|id| {
            let info = registry.lookup(*id).unwrap();
            rules::apply(info.rules, "assert.failed", "assertion.false").0
                == "invariant.not.preserved"
        })
        .count();
    assert_eq!(step_entries, 1);
}

#[test]
fn havoc_protocol_emits_index_vias() {
    let p = loop_contract(0);
    let (_ivl, registry) = translate(&p).unwrap();
    let has_via = registry.ids().any(|id| {
        registry
            .lookup(id)
            .unwrap()
            .vias
            .iter()
            .any(|via| via.label == "index of array")
    });
    assert!(has_via);
}

#[test]
fn loop_without_invariants_unrolls_exactly() {
    let mut b = IrBuilder::new();
    let mut p = program("unroll.cov");
    p.state
        .push(state_var("total", covenant_verifier::verifier::types::Type::uint256()));
    b.at_line(5);
    let three = b.int(3);
    let range = b.call(names::RANGE, vec![three]);
    b.at_line(6);
    let target = b.self_field("total");
    let i = b.name("i");
    let aug = b.stmt(StmtKind::AugAssign {
        target,
        op: covenant_verifier::verifier::ast::BinOp::Add,
        value: i,
    });
    b.at_line(5);
    let for_stmt = b.stmt(StmtKind::For {
        target: "i".to_string(),
        target_span: covenant_core::span::Span::new(5, 5, 5, 6),
        iter: range,
        invariants: vec![],
        body: vec![aug],
    });
    p.functions.insert("sum3".to_string(), public_function("sum3", vec![for_stmt]));

    let (ivl, _) = translate(&p).unwrap();
    let text = pretty::print_program(&ivl);
    // Three iterations, no havoc blocks.
    assert_eq!(text.matches("// Loop iteration").count(), 3);
    assert!(!text.contains("Havoc state"));
}

#[test]
fn havoc_loop_prunes_the_step_branch() {
    let p = loop_contract(0);
    let (ivl, _) = translate(&p).unwrap();
    let text = pretty::print_program(&ivl);
    assert!(text.contains("inhale false"));
    assert!(text.contains("Check loop invariants for iteration idx + 1"));
}
