//! Error handling utilities for the scc compiler

use thiserror::Error;

/// The main error type for scc compiler operations
#[derive(Error, Debug, Clone)]
pub enum SccError {
    #[error("lexical error: {message}")]
    LexError { message: String },

    #[error("parse error: {message}")]
    ParseError { message: String },

    #[error("semantic error: {message}")]
    SemaError { message: String },

    #[error("code generation error: {message}")]
    CodegenError { message: String },

    #[error("linkage error: {message}")]
    LinkError { message: String },

    #[error("I/O error: {message}")]
    IoError { message: String },

    /// A broken compiler invariant, not a user error.
    #[error("internal error: {message}")]
    InternalError { message: String },
}

/// Result type alias for scc compiler operations
pub type SccResult<T> = Result<T, SccError>;

impl SccError {
    pub fn lex_error(message: impl Into<String>) -> Self {
        Self::LexError { message: message.into() }
    }

    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::ParseError { message: message.into() }
    }

    pub fn sema_error(message: impl Into<String>) -> Self {
        Self::SemaError { message: message.into() }
    }

    pub fn codegen_error(message: impl Into<String>) -> Self {
        Self::CodegenError { message: message.into() }
    }

    pub fn link_error(message: impl Into<String>) -> Self {
        Self::LinkError { message: message.into() }
    }

    pub fn io_error(message: impl Into<String>) -> Self {
        Self::IoError { message: message.into() }
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError { message: message.into() }
    }
}
