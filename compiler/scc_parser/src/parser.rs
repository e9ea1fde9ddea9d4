//! Parser driver and token-stream helpers
//!
//! One `Parser` owns all per-translation-unit state: the retained token
//! vector, the scope arena, the string pool and the accumulated
//! diagnostics. Declaration, expression and statement grammars live in
//! sibling modules as `impl` blocks on this struct.

use crate::ast::{Function, Program};
use crate::scope::{ScopeId, Scopes, GLOBAL_SCOPE};
use hashbrown::HashSet;
use log::debug;
use scc_common::{Diagnostics, SccError, SccResult, Span, Spanned};
use scc_lexer::{Token, TokenKind};
use scc_types::{TargetLayout, TypeRef};

/// Per-switch context collecting case labels during statement parsing
pub(crate) struct SwitchCtx {
    pub cases: Vec<i64>,
    pub has_default: bool,
}

/// Recursive-descent parser and semantic analyzer
pub struct Parser {
    tokens: Vec<Token>,
    current: usize,
    pub(crate) scopes: Scopes,
    pub(crate) scope: ScopeId,
    pub(crate) layout: TargetLayout,
    pub(crate) diagnostics: Diagnostics,
    pub(crate) strings: Vec<String>,
    pub(crate) functions: Vec<Function>,
    /// Return type of the function body being parsed.
    pub(crate) ret_type: Option<TypeRef>,
    /// Name of the function being parsed, for static-local label mangling.
    pub(crate) func_name: Option<String>,
    pub(crate) switch_stack: Vec<SwitchCtx>,
    /// Loop nesting depth, for break/continue placement checks.
    pub(crate) loop_depth: u32,
    /// Labels defined in the current function body.
    pub(crate) labels: HashSet<String>,
    /// Goto targets referenced in the current function body.
    pub(crate) gotos: Vec<Spanned<String>>,
    pub(crate) anon_counter: u32,
}

impl Parser {
    pub fn new(tokens: Vec<Token>, layout: TargetLayout) -> Self {
        Self {
            tokens,
            current: 0,
            scopes: Scopes::new(),
            scope: GLOBAL_SCOPE,
            layout,
            diagnostics: Diagnostics::new(),
            strings: Vec::new(),
            functions: Vec::new(),
            ret_type: None,
            func_name: None,
            switch_stack: Vec::new(),
            loop_depth: 0,
            labels: HashSet::new(),
            gotos: Vec::new(),
            anon_counter: 0,
        }
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Parse the whole token stream into a program.
    ///
    /// Syntax errors abort the enclosing declaration and resynchronize;
    /// semantic errors accumulate without aborting. The caller decides
    /// whether to proceed to code generation based on `diagnostics()`.
    pub fn parse_program(mut self) -> SccResult<(Program, Diagnostics)> {
        while !self.at_eof() {
            if let Err(err) = self.parse_top_level() {
                debug!("recovering from syntax error: {}", err);
                self.resynchronize();
            }
        }
        let program =
            Program { scopes: self.scopes, functions: self.functions, strings: self.strings };
        Ok((program, self.diagnostics))
    }

    /// Skip to a plausible declaration boundary after a syntax error.
    fn resynchronize(&mut self) {
        let mut depth = 0i32;
        while !self.at_eof() {
            match self.peek_kind() {
                TokenKind::LBrace => depth += 1,
                TokenKind::RBrace => {
                    self.advance();
                    if depth <= 1 {
                        return;
                    }
                    depth -= 1;
                    continue;
                }
                TokenKind::Semicolon if depth == 0 => {
                    self.advance();
                    return;
                }
                kind if depth == 0 && (kind.starts_type() || kind.is_storage_class()) => {
                    return;
                }
                _ => {}
            }
            self.advance();
        }
    }

    // Token-stream helpers

    pub(crate) fn at_eof(&self) -> bool {
        matches!(self.peek_kind(), TokenKind::Eof)
    }

    pub(crate) fn peek(&self) -> &Token {
        &self.tokens[self.current.min(self.tokens.len() - 1)]
    }

    pub(crate) fn peek_kind(&self) -> &TokenKind {
        &self.peek().value
    }

    /// Lookahead beyond the current token; the stream is fully retained, so
    /// any distance is valid.
    pub(crate) fn peek_at(&self, n: usize) -> &TokenKind {
        let idx = (self.current + n).min(self.tokens.len() - 1);
        &self.tokens[idx].value
    }

    pub(crate) fn cur_span(&self) -> Span {
        self.peek().span
    }

    pub(crate) fn prev_span(&self) -> Span {
        self.tokens[self.current.saturating_sub(1)].span
    }

    /// Raw cursor position, for save/rewind in declarator parsing.
    pub(crate) fn token_pos(&self) -> usize {
        self.current
    }

    pub(crate) fn set_token_pos(&mut self, pos: usize) {
        self.current = pos;
    }

    pub(crate) fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.current < self.tokens.len() - 1 {
            self.current += 1;
        }
        token
    }

    pub(crate) fn check(&self, kind: &TokenKind) -> bool {
        self.peek_kind() == kind
    }

    pub(crate) fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    pub(crate) fn expect(&mut self, kind: TokenKind) -> SccResult<Token> {
        if self.check(&kind) {
            Ok(self.advance())
        } else {
            Err(self.syntax_error(format!("expected '{}', found '{}'", kind, self.peek_kind())))
        }
    }

    pub(crate) fn expect_ident(&mut self) -> SccResult<Spanned<String>> {
        match self.peek_kind().clone() {
            TokenKind::Ident(name) => {
                let span = self.cur_span();
                self.advance();
                Ok(Spanned::new(name, span))
            }
            other => Err(self.syntax_error(format!("expected identifier, found '{}'", other))),
        }
    }

    /// Record a syntax diagnostic at the current token and build the error
    /// that unwinds to the recovery point.
    pub(crate) fn syntax_error(&mut self, message: impl Into<String>) -> SccError {
        let message = message.into();
        self.diagnostics.error(message.clone(), self.cur_span());
        SccError::parse_error(message)
    }

    /// Record a semantic diagnostic; parsing continues.
    pub(crate) fn sema_error(&mut self, message: impl Into<String>, span: Span) {
        self.diagnostics.error(message, span);
    }

    // Scope helpers

    pub(crate) fn enter_scope(&mut self, kind: crate::scope::ScopeKind) -> ScopeId {
        self.scope = self.scopes.push(self.scope, kind);
        self.scope
    }

    pub(crate) fn leave_scope(&mut self) {
        self.scope = self.scopes.get(self.scope).parent.unwrap_or(GLOBAL_SCOPE);
    }

    /// Intern a string literal, concatenating adjacent literal tokens.
    pub(crate) fn intern_string(&mut self, text: String) -> usize {
        self.strings.push(text);
        self.strings.len() - 1
    }

    pub(crate) fn fresh_anon_name(&mut self, what: &str) -> String {
        self.anon_counter += 1;
        format!("{}.{}", what, self.anon_counter)
    }

    /// True when the current token can begin a type name in this scope
    /// (keyword specifiers or a typedef name).
    pub(crate) fn at_type_name(&self) -> bool {
        if self.peek_kind().starts_type() {
            return true;
        }
        match self.peek_kind() {
            TokenKind::Ident(name) => self.scopes.lookup_typedef(self.scope, name).is_some(),
            _ => false,
        }
    }

    /// True when a declaration starts here (storage class, type specifier,
    /// or typedef name followed by a declarator).
    pub(crate) fn at_declaration(&self) -> bool {
        self.peek_kind().is_storage_class() || self.at_type_name()
    }
}
