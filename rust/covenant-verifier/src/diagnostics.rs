//! Terminal rendering of verification results.

use crate::verifier::messages::MappedError;
use crate::VerificationResult;

fn red(s: &str) -> String {
    format!("\x1b[31m{}\x1b[0m", s)
}

fn green(s: &str) -> String {
    format!("\x1b[32m{}\x1b[0m", s)
}

fn gray(s: &str) -> String {
    format!("\x1b[90m{}\x1b[0m", s)
}

fn bold(s: &str) -> String {
    format!("\x1b[1m{}\x1b[0m", s)
}

/// Render one mapped error for a human terminal.
pub fn render_error(error: &MappedError, show_verifier_errors: bool) -> String {
    let mut out = String::new();
    out.push_str(&format!("  {} {}", red("•"), bold(&error.message)));
    out.push_str(&format!(" {}", error.reason));
    out.push_str(&gray(&format!(
        " ({}:{}:{})",
        error.file, error.span.line, error.span.col
    )));
    if show_verifier_errors {
        out.push_str(&gray(&format!(" [{}:{}]", error.code, error.reason_code)));
    }
    for via in &error.vias {
        out.push_str(&format!(
            "\n      via {} at {}:{}",
            via.label, via.span.line, via.span.col
        ));
    }
    if !error.model.is_empty() {
        out.push_str("\n      counterexample:");
        for entry in &error.model {
            out.push_str(&format!("\n        {} = {}", entry.name, entry.value));
        }
    }
    out
}

/// Render the whole result. IDE mode is stripped of color and uses one
/// `file:line:col:` line per failure; normal mode is colored prose.
pub fn render_result(
    result: &VerificationResult,
    ide_mode: bool,
    show_verifier_errors: bool,
) -> String {
    if ide_mode {
        return result.to_string(true, show_verifier_errors);
    }
    match result {
        VerificationResult::Success => green("Verification successful"),
        VerificationResult::Failure(errors) => {
            let mut out = format!("{}\n{}:", red("Verification failed"), bold("Errors"));
            for error in errors {
                out.push('\n');
                out.push_str(&render_error(error, show_verifier_errors));
            }
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verifier::positions::Via;
    use covenant_core::span::Span;

    fn sample_error() -> MappedError {
        MappedError {
            code: "assignment.failed".to_string(),
            reason_code: "arithmetic.overflow".to_string(),
            message: "Assignment might fail.".to_string(),
            reason: "It might overflow at self.x + 1.".to_string(),
            file: "token.cov".to_string(),
            span: Span::new(6, 5, 6, 19),
            function: Some("inc".to_string()),
            vias: vec![Via::new("inlined call", Span::new(3, 1, 3, 9))],
            model: vec![],
        }
    }

    #[test]
    fn ide_mode_has_no_ansi_codes() {
        let result = VerificationResult::Failure(vec![sample_error()]);
        let text = render_result(&result, true, false);
        assert!(!text.contains('\x1b'));
        assert!(text.contains("token.cov:6:5:"));
    }

    #[test]
    fn normal_mode_lists_errors_with_vias() {
        let result = VerificationResult::Failure(vec![sample_error()]);
        let text = render_result(&result, false, false);
        assert!(text.contains("Verification failed"));
        assert!(text.contains("via inlined call at 3:1"));
    }

    #[test]
    fn success_is_green() {
        let text = render_result(&VerificationResult::Success, false, false);
        assert!(text.contains("Verification successful"));
    }
}
