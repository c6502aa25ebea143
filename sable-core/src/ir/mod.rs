//! The generated-code layer.
//!
//! The code generator treats this module purely as an abstract emission
//! target: allocate typed storage, load/store, build basic blocks and
//! branches, call by symbol name, declare/define functions with a linkage.
//!
//! - [`module`] — the in-memory representation: modules, functions,
//!   blocks, instructions, types;
//! - [`builder`] — the instruction-builder collaborator the generator
//!   drives;
//! - [`link`] — merging of generated modules (used for imports);
//! - [`interp`] — a small evaluator for compiled modules, used by the CLI
//!   `--run` path and by tests;
//! - [`display`] — the textual form emitted by `--emit ir`.

pub mod builder;
pub mod display;
pub mod interp;
pub mod link;
pub mod module;

pub use builder::Builder;
pub use interp::{run, Outcome, RuntimeError};
pub use link::link;
pub use module::{
    BinOp, BlockId, FuncId, Function, HostFunc, Inst, IrType, Linkage, Module, UnOp, ValueId,
};
