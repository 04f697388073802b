//! Covenant CLI — drives one verification run per invocation.
//!
//! The external frontend parses contract source and hands the driver a
//! serialized contract IR; everything from type annotation to diagnostics
//! happens in `covenant-verifier`. The tool is stateless across runs.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser as ClapParser, Subcommand, ValueEnum};

use covenant_verifier::diagnostics::render_result;
use covenant_verifier::verifier::ast::Program;
use covenant_verifier::verifier::backend::BackendKind;
use covenant_verifier::{verify, VerifyError, VerifyOptions};

fn red(s: &str) -> String {
    format!("\x1b[31m{}\x1b[0m", s)
}

#[derive(ClapParser)]
#[command(
    name = "covenant",
    version,
    about = "Static verifier for annotated smart contracts",
    long_about = "Covenant checks contract specifications (invariants, pre- and \n\
                  postconditions, resource allocations) against an SMT-backed verifier."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BackendArg {
    Default,
    Alt,
}

impl From<BackendArg> for BackendKind {
    fn from(value: BackendArg) -> Self {
        match value {
            BackendArg::Default => BackendKind::Default,
            BackendArg::Alt => BackendKind::Alt,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Verify a contract IR file produced by the frontend
    Verify {
        /// Path to the contract IR (JSON)
        #[arg()]
        file: PathBuf,
        /// Verification backend to use
        #[arg(long, value_enum, default_value_t = BackendArg::Default)]
        backend: BackendArg,
        /// One machine-readable `file:line:col:` line per failure
        #[arg(long)]
        ide_mode: bool,
        /// Append the raw verifier failure codes to each diagnostic
        #[arg(long)]
        show_verifier_errors: bool,
        /// Verifier timeout in seconds
        #[arg(long, default_value_t = 100)]
        timeout: u64,
        /// SMT solver executable (overrides SMT_SOLVER_PATH)
        #[arg(long)]
        smt_path: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match cli.command {
        Commands::Verify { file, backend, ide_mode, show_verifier_errors, timeout, smt_path } => {
            run_verify(file, backend, ide_mode, show_verifier_errors, timeout, smt_path)
        }
    }
}

fn run_verify(
    file: PathBuf,
    backend: BackendArg,
    ide_mode: bool,
    show_verifier_errors: bool,
    timeout: u64,
    smt_path: Option<PathBuf>,
) -> ExitCode {
    let program = match load_program(&file) {
        Ok(program) => program,
        Err(message) => {
            eprintln!("{} {}", red("error:"), message);
            return ExitCode::from(1);
        }
    };

    let options = VerifyOptions {
        backend: backend.into(),
        ide_mode,
        show_verifier_errors,
        timeout: Duration::from_secs(timeout),
        smt_path,
    };

    match verify(&program, &options) {
        Ok(result) => {
            println!("{}", render_result(&result, ide_mode, show_verifier_errors));
            if result.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(2)
            }
        }
        Err(VerifyError::Backend(err)) => {
            eprintln!("{} {}", red("error:"), err);
            ExitCode::from(1)
        }
        Err(err) => {
            eprintln!("{} {}", red("error:"), err);
            ExitCode::from(1)
        }
    }
}

fn load_program(file: &PathBuf) -> Result<Program, String> {
    let text = std::fs::read_to_string(file)
        .map_err(|e| format!("cannot read {}: {}", file.display(), e))?;
    serde_json::from_str(&text).map_err(|e| format!("malformed contract IR: {}", e))
}
