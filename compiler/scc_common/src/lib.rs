//! Shared utilities and error types for the scc compiler
//!
//! This crate provides the functionality used across all compiler phases:
//! - Error types and the `SccResult` alias
//! - Source location tracking (positions, spans, the source map)
//! - Diagnostic collection and rendering

pub mod diagnostics;
pub mod error;
pub mod source;
pub mod span;

pub use diagnostics::*;
pub use error::*;
pub use source::*;
pub use span::*;
