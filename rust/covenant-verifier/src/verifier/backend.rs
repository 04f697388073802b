//! The external verifier boundary.
//!
//! The IVL program is serialized to text, handed to an external SMT-backed
//! verifier process, and the process answers with JSON: either success or
//! a list of failures keyed by `@id` position markers. Two named backends
//! are supported; both need the solver and verifier executables resolved
//! at startup from the environment.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::verifier::ivl::{pretty, IvlProgram};

/// Environment variable naming the SMT solver executable.
pub const SMT_SOLVER_PATH: &str = "SMT_SOLVER_PATH";
/// Environment variable naming the verifier executable.
pub const AUX_VERIFIER_PATH: &str = "AUX_VERIFIER_PATH";

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("verifier unavailable: {0}")]
    Unavailable(String),
    #[error("verifier crashed ({status}): {stderr}")]
    Crashed { status: String, stderr: String },
    #[error("verifier produced unreadable output: {0}")]
    InvalidOutput(#[from] serde_json::Error),
    #[error("verifier i/o failed: {0}")]
    Io(#[from] std::io::Error),
}

/// The two supported external verifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    #[default]
    Default,
    Alt,
}

impl BackendKind {
    pub fn flag(&self) -> &'static str {
        match self {
            BackendKind::Default => "default",
            BackendKind::Alt => "alt",
        }
    }
}

/// One counterexample binding reported by the verifier.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ModelEntry {
    pub name: String,
    pub value: String,
}

/// One failure object from the verifier's JSON output.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendFailure {
    pub code: String,
    #[serde(default)]
    pub reason: Option<String>,
    pub position: String,
    #[serde(default)]
    pub model: Option<Vec<ModelEntry>>,
}

/// The verifier's whole answer.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "result", rename_all = "lowercase")]
pub enum BackendResponse {
    Success,
    Failure {
        #[serde(default)]
        failures: Vec<BackendFailure>,
    },
}

/// Anything that can discharge an IVL program. The process-backed
/// implementation is the production one; tests substitute their own.
pub trait Backend {
    fn verify(&self, program: &IvlProgram) -> Result<BackendResponse, BackendError>;
}

/// Blocking process invocation of the external verifier.
#[derive(Debug)]
pub struct ProcessBackend {
    kind: BackendKind,
    verifier_path: PathBuf,
    smt_path: PathBuf,
    timeout: Duration,
}

impl ProcessBackend {
    /// Resolve executables from the environment. A missing path is a
    /// startup failure with a clear diagnostic, not something discovered
    /// mid-run.
    pub fn from_env(
        kind: BackendKind,
        timeout: Duration,
        smt_override: Option<&Path>,
    ) -> Result<Self, BackendError> {
        let verifier_path = std::env::var_os(AUX_VERIFIER_PATH)
            .map(PathBuf::from)
            .ok_or_else(|| {
                BackendError::Unavailable(format!(
                    "no verifier executable configured; set {}",
                    AUX_VERIFIER_PATH
                ))
            })?;
        let smt_path = match smt_override {
            Some(path) => path.to_path_buf(),
            None => std::env::var_os(SMT_SOLVER_PATH).map(PathBuf::from).ok_or_else(|| {
                BackendError::Unavailable(format!(
                    "no SMT solver configured; set {} or pass --smt-path",
                    SMT_SOLVER_PATH
                ))
            })?,
        };
        for (label, path) in [("verifier", &verifier_path), ("SMT solver", &smt_path)] {
            if !path.exists() {
                return Err(BackendError::Unavailable(format!(
                    "{} executable not found at {}",
                    label,
                    path.display()
                )));
            }
        }
        Ok(Self { kind, verifier_path, smt_path, timeout })
    }

    pub fn new(kind: BackendKind, verifier_path: PathBuf, smt_path: PathBuf, timeout: Duration) -> Self {
        Self { kind, verifier_path, smt_path, timeout }
    }
}

impl Backend for ProcessBackend {
    fn verify(&self, program: &IvlProgram) -> Result<BackendResponse, BackendError> {
        let text = pretty::print_program(program);

        let mut child = Command::new(&self.verifier_path)
            .arg(format!("--backend={}", self.kind.flag()))
            .arg(format!("--smt={}", self.smt_path.display()))
            .arg(format!("--timeout={}", self.timeout.as_secs()))
            .arg("--format=json")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                BackendError::Unavailable(format!(
                    "could not start {}: {}",
                    self.verifier_path.display(),
                    e
                ))
            })?;

        child
            .stdin
            .as_mut()
            .ok_or_else(|| BackendError::Unavailable("verifier stdin closed".to_string()))?
            .write_all(text.as_bytes())?;

        let output = child.wait_with_output()?;
        if !output.status.success() {
            return Err(BackendError::Crashed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        let response: BackendResponse = serde_json::from_slice(&output.stdout)?;
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_response_parses() {
        let response: BackendResponse = serde_json::from_str(r#"{"result": "success"}"#).unwrap();
        assert!(matches!(response, BackendResponse::Success));
    }

    #[test]
    fn failure_response_parses_with_model() {
        let json = r#"{
            "result": "failure",
            "failures": [
                {
                    "code": "assert.failed",
                    "reason": "assertion.false",
                    "position": "42",
                    "model": [{"name": "l$x$1", "value": "-1"}]
                }
            ]
        }"#;
        let response: BackendResponse = serde_json::from_str(json).unwrap();
        match response {
            BackendResponse::Failure { failures } => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].code, "assert.failed");
                assert_eq!(failures[0].position, "42");
                let model = failures[0].model.as_ref().unwrap();
                assert_eq!(model[0].name, "l$x$1");
            }
            _ => panic!("expected failure"),
        }
    }

    #[test]
    fn reason_and_model_are_optional() {
        let json = r#"{
            "result": "failure",
            "failures": [{"code": "exhale.failed", "position": "7"}]
        }"#;
        let response: BackendResponse = serde_json::from_str(json).unwrap();
        match response {
            BackendResponse::Failure { failures } => {
                assert!(failures[0].reason.is_none());
                assert!(failures[0].model.is_none());
            }
            _ => panic!("expected failure"),
        }
    }

    #[test]
    fn from_env_requires_configured_paths() {
        // Run with a variable name that cannot be set by accident.
        std::env::remove_var(AUX_VERIFIER_PATH);
        let err =
            ProcessBackend::from_env(BackendKind::Default, Duration::from_secs(10), None)
                .unwrap_err();
        assert!(matches!(err, BackendError::Unavailable(_)));
    }
}
