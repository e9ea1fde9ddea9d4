//! Code generation for the scc compiler
//!
//! Two backends share the typed AST as their contract and nothing below
//! it. The native x86-64 backend lowers each function into three-address
//! IR over virtual registers, runs linear-scan register allocation, and
//! emits System-V assembly text. The WebAssembly backend lowers the AST
//! directly into stack-machine bytecode and assembles a binary module.

pub mod builder;
pub mod ir;
pub mod regalloc;
pub mod wasm;
pub mod x86;

use scc_common::SccResult;
use scc_parser::Program;

pub use builder::IrBuilder;
pub use ir::*;
pub use wasm::WasmBackend;
pub use x86::X86Backend;

/// The capability a target backend exposes to the driver: lower one
/// function at a time, then produce the finished module bytes.
pub trait Backend {
    /// Lower the named defined function into the module under
    /// construction.
    fn lower_function(&mut self, program: &Program, name: &str) -> SccResult<()>;

    /// Finish the module: globals, string pools, section assembly.
    fn finalize(self: Box<Self>, program: &Program) -> SccResult<Vec<u8>>;
}
