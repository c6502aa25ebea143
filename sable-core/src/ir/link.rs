//! Module linking.
//!
//! Merges the generated module of an imported file into the importing
//! module. Declarations of the same symbol collapse; two competing
//! definitions are a link failure.

use crate::diagnostic::Diagnostic;
use crate::error::CoreError;
use crate::span::Span;

use super::module::Module;

/// Merge `src` into `dst`.
///
/// - a declaration meeting a definition keeps the definition;
/// - two declarations of one symbol collapse into one;
/// - two definitions of one symbol fail the link.
pub fn link(dst: &mut Module, src: Module) -> Result<(), CoreError> {
    for function in src.functions {
        match dst.functions.iter_mut().find(|f| f.name == function.name) {
            None => dst.functions.push(function),
            Some(existing) => {
                if existing.is_declaration() {
                    *existing = function;
                } else if !function.is_declaration() {
                    return Err(CoreError::Link(Diagnostic::error(
                        format!("duplicate symbol `{}` while linking modules", function.name),
                        Span::dummy(),
                    )));
                }
            }
        }
    }
    Ok(())
}
