//! Type system for the scc compiler
//!
//! Types are immutable reference-counted trees. Struct, union and enum
//! identity is nominal (two handles are the same type iff they point at the
//! same definition); function signatures compare structurally, which is what
//! backs signature deduplication in the WebAssembly emitter.

pub mod layout;
pub mod ty;

pub use layout::*;
pub use ty::*;
