//! Rule tables rewriting backend failure codes into diagnostic codes.
//!
//! The external verifier only knows about generic failures such as
//! `assert.failed` with reason `assertion.false`. Which diagnostic that
//! corresponds to depends on what the failing node encodes: an invariant
//! check, a loop base case, a leak check. Each registered position may
//! carry one of these tables; the back-mapper applies it before rendering.

use strum_macros::{Display, EnumString};

/// A backend failure identity: the error code plus its reason code.
pub type CodePair = (&'static str, &'static str);

/// An ordered remap table. Lookup is first-match.
pub type Rules = &'static [(CodePair, CodePair)];

/// Diagnostic codes the verifier itself introduces on top of the backend's
/// vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum DiagnosticCode {
    #[strum(serialize = "invariant.violated")]
    InvariantViolated,
    #[strum(serialize = "invariant.not.established")]
    InvariantNotEstablished,
    #[strum(serialize = "invariant.not.preserved")]
    InvariantNotPreserved,
    #[strum(serialize = "postcondition.violated")]
    PostconditionViolated,
    #[strum(serialize = "check.violated")]
    CheckViolated,
    #[strum(serialize = "leakcheck.failed")]
    LeakcheckFailed,
    #[strum(serialize = "arithmetic.overflow")]
    ArithmeticOverflow,
    #[strum(serialize = "arithmetic.underflow")]
    ArithmeticUnderflow,
    #[strum(serialize = "division.by.zero")]
    DivisionByZero,
}

pub const NO_RULES: Rules = &[];

/// Contract invariant exhaled at a function boundary.
pub const INVARIANT_FAIL: Rules = &[
    (("exhale.failed", "assertion.false"), ("invariant.violated", "assertion.false")),
    (("assert.failed", "assertion.false"), ("invariant.violated", "assertion.false")),
];

/// Invariant transitivity obligation.
pub const INVARIANT_TRANSITIVITY_FAIL: Rules = &[
    (("assert.failed", "assertion.false"), ("invariant.violated", "transitivity.violated")),
];

/// Loop invariant asserted before iteration zero.
pub const LOOP_INVARIANT_BASE_FAIL: Rules = &[
    (("assert.failed", "assertion.false"), ("invariant.not.established", "assertion.false")),
];

/// Loop invariant asserted for iteration `idx + 1`.
pub const LOOP_INVARIANT_STEP_FAIL: Rules = &[
    (("assert.failed", "assertion.false"), ("invariant.not.preserved", "assertion.false")),
];

/// Declared postcondition exhaled at exit.
pub const POSTCONDITION_FAIL: Rules = &[
    (("exhale.failed", "assertion.false"), ("postcondition.violated", "assertion.false")),
    (("assert.failed", "assertion.false"), ("postcondition.violated", "assertion.false")),
];

/// A general or function check exhaled at exit.
pub const CHECK_FAIL: Rules = &[
    (("exhale.failed", "assertion.false"), ("check.violated", "assertion.false")),
    (("assert.failed", "assertion.false"), ("check.violated", "assertion.false")),
];

/// Allocation totals must be preserved unless `performs` says otherwise.
pub const LEAK_CHECK_FAIL: Rules = &[
    (("exhale.failed", "assertion.false"), ("leakcheck.failed", "allocation.leaked")),
    (("assert.failed", "assertion.false"), ("leakcheck.failed", "allocation.leaked")),
];

/// Result-bound assertion emitted before an arithmetic result is used.
pub const OVERFLOW_FAIL: Rules = &[
    (("assert.failed", "assertion.false"), ("assignment.failed", "arithmetic.overflow")),
];

/// Lower-bound counterpart of [`OVERFLOW_FAIL`].
pub const UNDERFLOW_FAIL: Rules = &[
    (("assert.failed", "assertion.false"), ("assignment.failed", "arithmetic.underflow")),
];

/// Divisor-nonzero assertion for `/` and `%`.
pub const DIVISION_BY_ZERO_FAIL: Rules = &[
    (("assert.failed", "assertion.false"), ("assignment.failed", "division.by.zero")),
];

/// Lower array index bound assertion.
pub const INDEX_NEGATIVE_FAIL: Rules = &[
    (("assert.failed", "seq.index.negative"), ("assignment.failed", "seq.index.negative")),
    (("assert.failed", "assertion.false"), ("assignment.failed", "seq.index.negative")),
];

/// Upper array index bound assertion.
pub const INDEX_LENGTH_FAIL: Rules = &[
    (("assert.failed", "seq.index.length"), ("assignment.failed", "seq.index.length")),
    (("assert.failed", "assertion.false"), ("assignment.failed", "seq.index.length")),
];

/// Reallocation needs sufficient allocated funds.
pub const REALLOCATE_FAIL: Rules = &[
    (("assert.failed", "assertion.false"), ("reallocate.failed", "insufficient.funds")),
];

/// Exchange needs a matching offer before the swap.
pub const EXCHANGE_FAIL_NO_OFFER: Rules = &[
    (("assert.failed", "assertion.false"), ("exchange.failed", "no.offer")),
];

/// Exchange needs funds on both sides.
pub const EXCHANGE_FAIL_INSUFFICIENT_FUNDS: Rules = &[
    (("assert.failed", "assertion.false"), ("exchange.failed", "insufficient.funds")),
];

/// Precondition of a called function.
pub const CALL_PRECONDITION_FAIL: Rules = &[
    (("exhale.failed", "assertion.false"), ("call.precondition", "assertion.false")),
    (("assert.failed", "assertion.false"), ("call.precondition", "assertion.false")),
    (("application.precondition", "assertion.false"), ("call.precondition", "assertion.false")),
];

/// Contract invariant re-asserted around an external call.
pub const CALL_INVARIANT_FAIL: Rules = &[
    (("assert.failed", "assertion.false"), ("call.invariant", "assertion.false")),
];

/// Check re-asserted around an external call.
pub const CALL_CHECK_FAIL: Rules = &[
    (("assert.failed", "assertion.false"), ("call.check", "assertion.false")),
];

/// Apply `rules` to a failure identity. Unmatched pairs pass through.
pub fn apply(rules: Rules, error_code: &str, reason_code: &str) -> (String, String) {
    for ((from_err, from_reason), (to_err, to_reason)) in rules {
        if *from_err == error_code && *from_reason == reason_code {
            return (to_err.to_string(), to_reason.to_string());
        }
    }
    (error_code.to_string(), reason_code.to_string())
}
