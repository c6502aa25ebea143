//! Compiler core for the Sable language.
//!
//! The pipeline runs in three stages over each compilation unit:
//!
//! 1. [`lexer`] turns raw text into a token stream, resolving
//!    indentation into explicit `Indent`/`Dedent` tokens;
//! 2. [`parser`] builds the [`ast`] by recursive descent;
//! 3. [`codegen`] walks the tree once, resolving names through the
//!    [`symbol`] table and emitting [`ir`] through a block builder.
//!
//! A [`compiler::Session`] drives the stages, owns the [`source`] map,
//! and compiles each imported path at most once; imported modules are
//! linked into the entry module at the end. The resulting [`ir::Module`]
//! can be printed or evaluated directly.

pub mod ast;
pub mod builtins;
pub mod codegen;
pub mod compiler;
pub mod diagnostic;
pub mod error;
pub mod ir;
pub mod lexer;
pub mod parser;
pub mod source;
pub mod span;
pub mod stdlib;
pub mod symbol;
pub mod token;
pub mod types;

pub use compiler::Session;
pub use diagnostic::{Diagnostic, Severity};
pub use error::CoreError;
