//! Covenant Verifier
//!
//! Translates an annotated, typed contract IR into an intermediate
//! verification language (IVL) program, hands it to an external SMT-backed
//! verifier, and maps failures back to source-level diagnostics.
//!
//! ```text
//!   Contract IR
//!       │  annotate            (verifier/annotate.rs)
//!       │  check symbols       (verifier/symbols.rs)
//!       ▼
//!   Typed IR + TypeTable
//!       │  translate           (verifier/translation/*)
//!       ▼
//!   IVL program + position registry
//!       │  verify              (verifier/backend.rs, external process)
//!       ▼
//!   Success / failures
//!       │  back-map            (verifier/messages.rs)
//!       ▼
//!   VerificationResult
//! ```

pub mod diagnostics;
pub mod verifier;

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use verifier::annotate::{annotate_program, TypeAnnotationError};
use verifier::ast::Program;
use verifier::backend::{
    Backend, BackendError, BackendKind, BackendResponse, ProcessBackend,
};
use verifier::ivl::IvlProgram;
use verifier::messages::{back_map, MappedError};
use verifier::positions::PositionRegistry;
use verifier::symbols::{check_symbols, SymbolError};
use verifier::translation::{program::translate_program, TranslationError};

// ── Options ─────────────────────────────────────────────────────────

/// Options of one verification run.
#[derive(Debug, Clone)]
pub struct VerifyOptions {
    pub backend: BackendKind,
    pub ide_mode: bool,
    pub show_verifier_errors: bool,
    pub timeout: Duration,
    pub smt_path: Option<PathBuf>,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            backend: BackendKind::Default,
            ide_mode: false,
            show_verifier_errors: false,
            timeout: Duration::from_secs(100),
            smt_path: None,
        }
    }
}

// ── Errors ──────────────────────────────────────────────────────────

/// Fatal errors of a run. Verification failures are not errors; they are
/// the `Failure` variant of [`VerificationResult`].
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("invalid program: {0}")]
    Annotation(#[from] TypeAnnotationError),
    #[error("invalid program: {0}")]
    Symbols(#[from] SymbolError),
    #[error(transparent)]
    Translation(#[from] TranslationError),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

// ── Results ─────────────────────────────────────────────────────────

/// Outcome of a verification run that reached the backend.
#[derive(Debug, Clone)]
pub enum VerificationResult {
    Success,
    Failure(Vec<MappedError>),
}

impl VerificationResult {
    pub fn is_success(&self) -> bool {
        matches!(self, VerificationResult::Success)
    }

    pub fn to_string(&self, ide_mode: bool, show_verifier_errors: bool) -> String {
        match self {
            VerificationResult::Success => "Verification successful".to_string(),
            VerificationResult::Failure(errors) => {
                let rendered: Vec<String> = errors
                    .iter()
                    .map(|e| e.string(ide_mode, show_verifier_errors))
                    .collect();
                if ide_mode {
                    rendered.join("\n")
                } else {
                    format!("Verification failed\nErrors:\n{}", rendered.join("\n"))
                }
            }
        }
    }
}

// ── Pipeline ────────────────────────────────────────────────────────

/// Run the front half of the pipeline: annotate, check symbols, and
/// translate to IVL. No backend involved.
pub fn translate(program: &Program) -> Result<(IvlProgram, PositionRegistry), VerifyError> {
    let types = annotate_program(program)?;
    check_symbols(program)?;
    let (ivl, registry) = translate_program(program, &types)?;
    Ok((ivl, registry))
}

/// Translate and discharge with the given backend; map failures back to
/// source.
pub fn verify_with_backend(
    program: &Program,
    backend: &dyn Backend,
) -> Result<VerificationResult, VerifyError> {
    let (ivl, registry) = translate(program)?;
    match backend.verify(&ivl)? {
        BackendResponse::Success => Ok(VerificationResult::Success),
        BackendResponse::Failure { failures } => {
            let errors = back_map(&program.file, &failures, &registry);
            Ok(VerificationResult::Failure(errors))
        }
    }
}

/// Translate and discharge with the process backend configured from the
/// environment and `options`.
pub fn verify(program: &Program, options: &VerifyOptions) -> Result<VerificationResult, VerifyError> {
    let backend = ProcessBackend::from_env(
        options.backend,
        options.timeout,
        options.smt_path.as_deref(),
    )?;
    verify_with_backend(program, &backend)
}

#[cfg(test)]
mod tests {
    use super::*;
    use verifier::backend::BackendFailure;

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

    #[test]
    fn empty_contract_verifies() {
        let program = Program::empty("empty.cov");
        let backend = CannedBackend(vec![]);
        let result = verify_with_backend(&program, &backend).unwrap();
        assert!(result.is_success());
        assert_eq!(result.to_string(false, false), "Verification successful");
    }

    #[test]
    fn failures_render_as_a_bullet_list() {
        let program = Program::empty("empty.cov");
        let backend = CannedBackend(vec![BackendFailure {
            code: "assert.failed".to_string(),
            reason: Some("assertion.false".to_string()),
            position: "1".to_string(),
            model: None,
        }]);
        let result = verify_with_backend(&program, &backend).unwrap();
        assert!(!result.is_success());
        let text = result.to_string(false, false);
        assert!(text.starts_with("Verification failed\nErrors:\n"));
    }
}
