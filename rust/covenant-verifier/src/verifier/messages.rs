//! Conversion of backend failures to human readable messages.
//!
//! Every failure carries the `@id` position of its failing IVL node; the
//! registry entry behind that id supplies the source span, the rendered
//! source text, the rule table, and any model transformation. The result
//! is a list of de-duplicated, source-located errors.

use covenant_core::span::Span;
use covenant_core::strings::pprint;

use crate::verifier::backend::{BackendFailure, ModelEntry};
use crate::verifier::positions::{ErrorInfo, PositionRegistry, Via};
use crate::verifier::rules;

/// A backend failure mapped back to source.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedError {
    pub code: String,
    pub reason_code: String,
    pub message: String,
    pub reason: String,
    pub file: String,
    pub span: Span,
    pub function: Option<String>,
    pub vias: Vec<Via>,
    pub model: Vec<ModelEntry>,
}

impl MappedError {
    /// Render for output. IDE mode is one machine-friendly line; normal
    /// mode is prose with the position appended.
    pub fn string(&self, ide_mode: bool, show_verifier_errors: bool) -> String {
        let mut out = if ide_mode {
            format!(
                "{}:{}:{}: {} {}",
                self.file, self.span.line, self.span.col, self.message, self.reason
            )
        } else {
            format!(
                "{} {} ({}@{}.{})",
                self.message, self.reason, self.file, self.span.line, self.span.col
            )
        };
        if show_verifier_errors {
            out.push_str(&format!(" [{}:{}]", self.code, self.reason_code));
        }
        for via in &self.vias {
            out.push_str(&format!("\n  via {} at {}.{}", via.label, via.span.line, via.span.col));
        }
        if !self.model.is_empty() {
            out.push_str("\n  counterexample:");
            for entry in &self.model {
                out.push_str(&format!("\n    {} = {}", entry.name, entry.value));
            }
        }
        out
    }
}

/// Map raw backend failures to source-level errors, de-duplicating
/// identical renderings.
pub fn back_map(
    file: &str,
    failures: &[BackendFailure],
    registry: &PositionRegistry,
) -> Vec<MappedError> {
    let mut out: Vec<MappedError> = Vec::new();
    for failure in failures {
        let mapped = map_failure(file, failure, registry);
        let already_there = out
            .iter()
            .any(|e| e.string(false, false) == mapped.string(false, false));
        if !already_there {
            out.push(mapped);
        }
    }
    out
}

fn map_failure(file: &str, failure: &BackendFailure, registry: &PositionRegistry) -> MappedError {
    let reason_code = failure.reason.clone().unwrap_or_else(|| "assertion.false".to_string());
    let info = failure
        .position
        .trim_start_matches('@')
        .parse::<u64>()
        .ok()
        .and_then(|id| registry.lookup(id));

    let (code, reason_code) = match info {
        Some(info) => rules::apply(info.rules, &failure.code, &reason_code),
        None => (failure.code.clone(), reason_code),
    };

    let placeholder;
    let info = match info {
        Some(info) => info,
        None => {
            placeholder = ErrorInfo {
                function: None,
                span: Span::dummy(),
                text: String::new(),
                resource: None,
                vias: Vec::new(),
                rules: rules::NO_RULES,
                model: None,
            };
            &placeholder
        }
    };

    let model = match (&info.model, &failure.model) {
        (Some(transform), Some(entries)) => entries
            .iter()
            .map(|e| ModelEntry {
                name: transform
                    .source_name(&e.name)
                    .map(str::to_string)
                    .unwrap_or_else(|| e.name.clone()),
                value: e.value.clone(),
            })
            .collect(),
        _ => Vec::new(),
    };

    MappedError {
        message: error_message(&code, info),
        reason: reason_message(&reason_code, info),
        code,
        reason_code,
        file: file.to_string(),
        span: info.span,
        function: info.function.clone(),
        vias: info.vias.clone(),
        model,
    }
}

/// The error part of a diagnostic, keyed by (possibly remapped) code.
pub fn error_message(code: &str, info: &ErrorInfo) -> String {
    let function = info.function.as_deref().unwrap_or("<unknown>");
    match code {
        "assignment.failed" => "Assignment might fail.".to_string(),
        "call.failed" => "Method call might fail.".to_string(),
        "not.wellformed" => format!("Function {} might not be well-formed.", function),
        "call.invariant" => {
            format!("An invariant might not hold before the call {}.", pprint(&info.text))
        }
        "call.check" => {
            format!("A check might not hold before the call {}.", pprint(&info.text))
        }
        "call.precondition" | "application.precondition" => {
            format!("The precondition of function {} might not hold.", pprint(&info.text))
        }
        "call.leakcheck" => {
            format!("The leak check for call {} might not hold.", pprint(&info.text))
        }
        "exhale.failed" => "Exhale might fail.".to_string(),
        "inhale.failed" => "Inhale might fail.".to_string(),
        "if.failed" => "Conditional statement might fail.".to_string(),
        "while.failed" => "While statement might fail.".to_string(),
        "assert.failed" => "Assert might fail.".to_string(),
        "postcondition.violated" => {
            format!("Postcondition of {} might not hold.", function)
        }
        "postcondition.not.implemented" => {
            format!("Function {} might not correctly implement an interface.", function)
        }
        "invariant.violated" => format!("Invariant not preserved by {}.", function),
        "check.violated" => {
            format!("A check might not hold after the body of {}.", function)
        }
        "invariant.not.wellformed" => {
            format!("Invariant {} might not be well-formed.", pprint(&info.text))
        }
        "reallocate.failed" => "Reallocate might fail.".to_string(),
        "exchange.failed" => format!("Exchange {} might fail.", pprint(&info.text)),
        "leakcheck.failed" => format!(
            "Leak check for resource {} might fail in {}.",
            info.resource.as_deref().unwrap_or("wei"),
            function
        ),
        "fold.failed" => "Fold might fail.".to_string(),
        "unfold.failed" => "Unfold might fail.".to_string(),
        "invariant.not.preserved" => "Loop invariant might not be preserved.".to_string(),
        "invariant.not.established" => "Loop invariant might not hold on entry.".to_string(),
        "function.not.wellformed" => "Function might not be well-formed.".to_string(),
        "predicate.not.wellformed" => "Predicate might not be well-formed.".to_string(),
        _ => "Verification failed.".to_string(),
    }
}

/// The reason part of a diagnostic.
pub fn reason_message(reason_code: &str, info: &ErrorInfo) -> String {
    let text = pprint(&info.text);
    match reason_code {
        "assertion.false" => format!("Assertion {} might not hold.", text),
        "transitivity.violated" => "It might not be transitive.".to_string(),
        "constant.balance" => "It might assume constant balance.".to_string(),
        "division.by.zero" => format!("Divisor {} might be zero.", text),
        "seq.index.length" => format!("Index {} might exceed array length.", text),
        "seq.index.negative" => format!("Index {} might be negative.", text),
        "not.implements.interface" => "Receiver might not implement the interface.".to_string(),
        "insufficient.funds" => "There might be insufficient allocated funds.".to_string(),
        "no.offer" => "There might not be an appropriate offer.".to_string(),
        "allocation.leaked" => "Some allocation might be leaked.".to_string(),
        "receiver.not.injective" => format!("Receiver of {} might not be injective.", text),
        "receiver.null" => format!("Receiver of {} might be null.", text),
        "negative.permission" => format!("Fraction {} might be negative.", text),
        "insufficient.permission" => {
            format!("There might be insufficient permission to access {}.", text)
        }
        "arithmetic.overflow" => format!("It might overflow at {}.", text),
        "arithmetic.underflow" => format!("It might underflow at {}.", text),
        _ => format!("Assertion {} might not hold.", text),
    }
}
