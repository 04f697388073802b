//! Cross-module symbol checks: ghost-function implementations and resource
//! imports must agree across the interfaces a contract implements.

use thiserror::Error;

use covenant_core::span::Span;
use covenant_core::strings::strip_common_prefix;

use crate::verifier::ast::Program;

/// A violated cross-module obligation. The `code` matches the rule codes
/// surfaced to the user (`missing.resource`, `duplicate.ghost`, …).
#[derive(Debug, Error)]
#[error("{code}: {message}")]
pub struct SymbolError {
    pub code: &'static str,
    pub message: String,
    pub span: Span,
}

impl SymbolError {
    fn new(code: &'static str, message: String, span: Span) -> Self {
        Self { code, message, span }
    }
}

/// Run all symbol checks for one contract program.
pub fn check_symbols(program: &Program) -> Result<(), SymbolError> {
    check_ghost_functions(program)?;
    check_ghost_implements(program)?;
    check_resources(program)
}

fn check_resources(program: &Program) -> Result<(), SymbolError> {
    for interface in program.interfaces.values() {
        for (resource_name, resource_list) in &interface.resources {
            for resource in resource_list {
                let imported: Vec<_> = program
                    .resources
                    .get(resource_name)
                    .map(|rs| rs.iter().filter(|r| r.file == resource.file).collect())
                    .unwrap_or_default();
                if imported.is_empty() {
                    let shown = strip_common_prefix(&resource.file, &program.file);
                    return Err(SymbolError::new(
                        "missing.resource",
                        format!(
                            "The interface \"{}\" needs a resource \"{}\" from \"{}\" but it \
                             was not imported for this contract.",
                            interface.name, resource_name, shown
                        ),
                        program.span,
                    ));
                }
                let same_interface = program
                    .resources
                    .get(resource_name)
                    .into_iter()
                    .flatten()
                    .filter(|r| r.interface == resource.interface);
                for other in same_interface {
                    if other.file != resource.file {
                        let a = strip_common_prefix(&other.file, &resource.file);
                        let b = strip_common_prefix(&resource.file, &other.file);
                        return Err(SymbolError::new(
                            "duplicate.resource",
                            format!(
                                "There are two versions of the resource \"{}\" defined in an \
                                 interface \"{}\", one from \"{}\" the other from \"{}\".",
                                resource_name,
                                resource.interface.as_deref().unwrap_or(&interface.name),
                                a,
                                b
                            ),
                            other.span,
                        ));
                    }
                }
            }
        }
    }

    // A contract may not redeclare a resource it already obtains from an
    // implemented interface.
    for implemented in &program.implements {
        let Some(interface) = program.interfaces.get(implemented) else { continue };
        for (name, resource) in &program.own_resources {
            if name == crate::verifier::names::WEI {
                continue;
            }
            if interface.own_resources.contains_key(name) {
                return Err(SymbolError::new(
                    "duplicate.resource",
                    format!(
                        "A contract cannot redeclare a resource it already imports. The \
                         resource \"{}\" got already declared in the interface {}.",
                        name, interface.name
                    ),
                    resource.span,
                ));
            }
        }
    }

    Ok(())
}

fn check_ghost_functions(program: &Program) -> Result<(), SymbolError> {
    for implemented in program.ghost_implementations.values() {
        if !program.ghost_functions.contains_key(&implemented.name) {
            return Err(SymbolError::new(
                "missing.ghost",
                format!(
                    "This contract is implementing an unknown ghost function. None of the \
                     interfaces this contract implements declares a ghost function \"{}\".",
                    implemented.name
                ),
                implemented.span,
            ));
        }
    }

    for interface in program.interfaces.values() {
        for ghost_list in interface.ghost_functions.values() {
            for ghost in ghost_list {
                let imported: Vec<_> = program
                    .ghost_functions
                    .get(&ghost.name)
                    .map(|gs| gs.iter().filter(|g| g.file == ghost.file).collect())
                    .unwrap_or_default();
                if imported.is_empty() {
                    let shown = strip_common_prefix(&ghost.file, &program.file);
                    return Err(SymbolError::new(
                        "missing.ghost",
                        format!(
                            "The interface \"{}\" needs a ghost function \"{}\" from \"{}\" \
                             but it was not imported for this contract.",
                            interface.name, ghost.name, shown
                        ),
                        program.span,
                    ));
                }
                let same_interface = program
                    .ghost_functions
                    .get(&ghost.name)
                    .into_iter()
                    .flatten()
                    .filter(|g| g.interface == ghost.interface);
                for other in same_interface {
                    if other.file != ghost.file {
                        let a = strip_common_prefix(&other.file, &ghost.file);
                        let b = strip_common_prefix(&ghost.file, &other.file);
                        return Err(SymbolError::new(
                            "duplicate.ghost",
                            format!(
                                "There are two versions of the ghost function \"{}\" defined \
                                 in an interface \"{}\", one from \"{}\" the other from \"{}\".",
                                ghost.name,
                                ghost.interface.as_deref().unwrap_or(&interface.name),
                                a,
                                b
                            ),
                            other.span,
                        ));
                    }
                }
            }
        }
    }

    Ok(())
}

fn check_ghost_implements(program: &Program) -> Result<(), SymbolError> {
    let fail = |span: Span| {
        SymbolError::new(
            "ghost.not.implemented",
            "A ghost function has not been implemented correctly.".to_string(),
            span,
        )
    };

    for implemented in &program.implements {
        let Some(interface) = program.interfaces.get(implemented) else { continue };
        for ghost in interface.own_ghost_functions.values() {
            let implementation = program
                .ghost_implementations
                .get(&ghost.name)
                .ok_or_else(|| fail(program.span))?;
            if implementation.name != ghost.name
                || implementation.args.len() != ghost.args.len()
                || implementation
                    .args
                    .iter()
                    .zip(&ghost.args)
                    .any(|((_, a), (_, b))| a != b)
                || implementation.ret != ghost.ret
            {
                return Err(fail(implementation.span));
            }
        }
    }

    Ok(())
}
