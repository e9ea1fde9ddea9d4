//! Lexer implementation
//!
//! Byte-wise scanner over a stack of source buffers. Operators are matched
//! longest-first, literals follow the C grammar, and every token carries the
//! span it was scanned from. Lexical errors are fatal: the offending byte is
//! reported with its location and scanning stops.

use crate::{keyword_lookup, IntSuffix, Token, TokenKind};
use scc_common::{Diagnostic, Diagnostics, Position, SccError, SccResult, Span, Spanned};

/// One entry of the logical source stack
struct SourceFrame {
    bytes: Vec<u8>,
    file_id: u32,
    pos: usize,
    loc: Position,
    at_line_start: bool,
}

/// Restartable lexer over a stack of source buffers.
///
/// `push_source` makes the most recently pushed buffer the active one; when
/// it is exhausted the lexer resumes the buffer below, which is how included
/// files splice into one token stream.
pub struct Lexer {
    stack: Vec<SourceFrame>,
    /// Location the final EOF token is pinned to.
    last_loc: (Position, u32),
    diagnostics: Diagnostics,
}

impl Lexer {
    pub fn new() -> Self {
        Self {
            stack: Vec::new(),
            last_loc: (Position::start(), 0),
            diagnostics: Diagnostics::new(),
        }
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Push a source buffer; it becomes the active input.
    pub fn push_source(&mut self, text: impl Into<String>, file_id: u32) {
        self.stack.push(SourceFrame {
            bytes: text.into().into_bytes(),
            file_id,
            pos: 0,
            loc: Position::start(),
            at_line_start: true,
        });
    }

    /// Tokenize everything on the source stack, ending with an EOF token.
    pub fn tokenize(&mut self) -> SccResult<Vec<Token>> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let done = token.value == TokenKind::Eof;
            tokens.push(token);
            if done {
                return Ok(tokens);
            }
        }
    }

    /// Get the next token, popping exhausted source frames.
    pub fn next_token(&mut self) -> SccResult<Token> {
        loop {
            let Some(frame) = self.stack.last_mut() else {
                let (pos, file_id) = self.last_loc;
                return Ok(Spanned::new(TokenKind::Eof, Span::single(pos, file_id)));
            };

            frame.skip_trivia();
            if frame.at_end() {
                self.last_loc = (frame.loc, frame.file_id);
                self.stack.pop();
                continue;
            }

            return match frame.scan_token() {
                Ok(token) => Ok(token),
                Err(diag) => {
                    let message = diag.message.clone();
                    self.diagnostics.add(diag);
                    Err(SccError::lex_error(message))
                }
            };
        }
    }
}

impl Default for Lexer {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceFrame {
    fn at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn cur(&self) -> u8 {
        self.bytes[self.pos]
    }

    fn peek(&self, n: usize) -> Option<u8> {
        self.bytes.get(self.pos + n).copied()
    }

    fn advance(&mut self) {
        if self.cur() == b'\n' {
            self.loc.line += 1;
            self.loc.column = 1;
            self.at_line_start = true;
        } else {
            self.loc.column += 1;
        }
        self.loc.offset += 1;
        self.pos += 1;
    }

    fn span_from(&self, start: Position) -> Span {
        Span::new(start, self.loc, self.file_id)
    }

    /// Skip whitespace, comments, and preprocessor-output lines (a `#` as
    /// the first non-blank byte of a line).
    fn skip_trivia(&mut self) {
        while !self.at_end() {
            match self.cur() {
                b' ' | b'\t' | b'\r' | b'\n' => self.advance(),
                b'#' if self.at_line_start => {
                    while !self.at_end() && self.cur() != b'\n' {
                        self.pos += 1;
                        self.loc.column += 1;
                        self.loc.offset += 1;
                    }
                }
                b'/' if self.peek(1) == Some(b'/') => {
                    while !self.at_end() && self.cur() != b'\n' {
                        self.advance();
                    }
                }
                b'/' if self.peek(1) == Some(b'*') => {
                    self.advance();
                    self.advance();
                    // C block comments do not nest.
                    while !self.at_end() {
                        if self.cur() == b'*' && self.peek(1) == Some(b'/') {
                            self.advance();
                            self.advance();
                            break;
                        }
                        self.advance();
                    }
                }
                _ => break,
            }
        }
    }

    fn scan_token(&mut self) -> Result<Token, Diagnostic> {
        let start = self.loc;
        self.at_line_start = false;

        let kind = match self.cur() {
            b'A'..=b'Z' | b'a'..=b'z' | b'_' => self.scan_ident_or_keyword(),
            b'0'..=b'9' => self.scan_number(start)?,
            b'.' if self.peek(1).is_some_and(|b| b.is_ascii_digit()) => self.scan_float(start)?,
            b'"' => self.scan_string(start)?,
            b'\'' => self.scan_char(start)?,
            _ => self.scan_punctuator(start)?,
        };

        Ok(Spanned::new(kind, self.span_from(start)))
    }

    fn scan_ident_or_keyword(&mut self) -> TokenKind {
        let start = self.pos;
        while !self.at_end() && (self.cur().is_ascii_alphanumeric() || self.cur() == b'_') {
            self.advance();
        }
        let text = std::str::from_utf8(&self.bytes[start..self.pos]).unwrap_or_default();
        keyword_lookup(text).unwrap_or_else(|| TokenKind::Ident(text.to_string()))
    }

    fn scan_number(&mut self, start: Position) -> Result<TokenKind, Diagnostic> {
        let begin = self.pos;

        if self.cur() == b'0' && matches!(self.peek(1), Some(b'x') | Some(b'X')) {
            self.advance();
            self.advance();
            let digits = self.pos;
            while !self.at_end() && self.cur().is_ascii_hexdigit() {
                self.advance();
            }
            if self.pos == digits {
                return Err(self.error("hexadecimal literal with no digits", start));
            }
            let text = std::str::from_utf8(&self.bytes[digits..self.pos]).unwrap_or_default();
            let value = u64::from_str_radix(text, 16)
                .map_err(|_| self.error("integer literal out of range", start))?;
            return self.finish_int(value, start);
        }

        // Decimal digits first; a '.', exponent or float suffix reroutes to
        // the float grammar. A leading 0 with no such rerouting is octal.
        while !self.at_end() && self.cur().is_ascii_digit() {
            self.advance();
        }
        if !self.at_end() && matches!(self.cur(), b'.' | b'e' | b'E') {
            self.pos = begin;
            self.loc = start;
            return self.scan_float(start);
        }

        let text = std::str::from_utf8(&self.bytes[begin..self.pos]).unwrap_or_default();
        let value = if text.len() > 1 && text.starts_with('0') {
            u64::from_str_radix(&text[1..], 8)
                .map_err(|_| self.error("invalid octal literal", start))?
        } else {
            text.parse::<u64>()
                .map_err(|_| self.error("integer literal out of range", start))?
        };
        self.finish_int(value, start)
    }

    /// Consume `u`/`l` suffix runs and build the literal token.
    fn finish_int(&mut self, value: u64, start: Position) -> Result<TokenKind, Diagnostic> {
        let mut unsigned = false;
        let mut longs = 0u32;
        loop {
            match self.peek(0) {
                Some(b'u') | Some(b'U') if !unsigned => {
                    unsigned = true;
                    self.advance();
                }
                Some(b'l') | Some(b'L') if longs < 2 => {
                    longs += 1;
                    self.advance();
                    // 'll' must use the same letter case-insensitively; both
                    // cases are accepted here as a single class.
                    if matches!(self.peek(0), Some(b'l') | Some(b'L')) && longs == 1 {
                        longs = 2;
                        self.advance();
                    }
                }
                Some(b) if b.is_ascii_alphanumeric() || b == b'_' => {
                    return Err(self.error("invalid suffix on integer literal", start));
                }
                _ => break,
            }
        }
        let suffix = match longs {
            0 => IntSuffix::None,
            1 => IntSuffix::Long,
            _ => IntSuffix::LongLong,
        };
        Ok(TokenKind::IntLiteral { value: value as i64, suffix, unsigned })
    }

    fn scan_float(&mut self, start: Position) -> Result<TokenKind, Diagnostic> {
        let begin = self.pos;
        while !self.at_end() && self.cur().is_ascii_digit() {
            self.advance();
        }
        if !self.at_end() && self.cur() == b'.' {
            self.advance();
            while !self.at_end() && self.cur().is_ascii_digit() {
                self.advance();
            }
        }
        if !self.at_end() && matches!(self.cur(), b'e' | b'E') {
            self.advance();
            if !self.at_end() && matches!(self.cur(), b'+' | b'-') {
                self.advance();
            }
            let digits = self.pos;
            while !self.at_end() && self.cur().is_ascii_digit() {
                self.advance();
            }
            if self.pos == digits {
                return Err(self.error("exponent has no digits", start));
            }
        }

        let text = std::str::from_utf8(&self.bytes[begin..self.pos]).unwrap_or_default();
        let value: f64 =
            text.parse().map_err(|_| self.error("malformed floating literal", start))?;

        let mut single = false;
        match self.peek(0) {
            Some(b'f') | Some(b'F') => {
                single = true;
                self.advance();
            }
            Some(b'l') | Some(b'L') => {
                // long double collapses to double in this subset.
                self.advance();
            }
            _ => {}
        }
        Ok(TokenKind::FloatLiteral { value, single })
    }

    fn scan_string(&mut self, start: Position) -> Result<TokenKind, Diagnostic> {
        self.advance(); // opening quote
        let mut bytes = Vec::new();
        loop {
            if self.at_end() || self.cur() == b'\n' {
                return Err(self.error("unterminated string literal", start));
            }
            match self.cur() {
                b'"' => {
                    self.advance();
                    break;
                }
                b'\\' => bytes.push(self.scan_escape(start)?),
                b => {
                    bytes.push(b);
                    self.advance();
                }
            }
        }
        Ok(TokenKind::StrLiteral(String::from_utf8_lossy(&bytes).into_owned()))
    }

    fn scan_char(&mut self, start: Position) -> Result<TokenKind, Diagnostic> {
        self.advance(); // opening quote
        if self.at_end() || self.cur() == b'\n' {
            return Err(self.error("unterminated character literal", start));
        }
        let value = if self.cur() == b'\\' {
            self.scan_escape(start)? as i64
        } else {
            let b = self.cur() as i64;
            self.advance();
            b
        };
        if self.at_end() || self.cur() != b'\'' {
            return Err(self.error("unterminated character literal", start));
        }
        self.advance();
        Ok(TokenKind::CharLiteral(value))
    }

    /// Decode one escape sequence (cursor on the backslash).
    fn scan_escape(&mut self, start: Position) -> Result<u8, Diagnostic> {
        self.advance(); // backslash
        if self.at_end() {
            return Err(self.error("unterminated escape sequence", start));
        }
        let b = self.cur();
        self.advance();
        let value = match b {
            b'n' => b'\n',
            b't' => b'\t',
            b'r' => b'\r',
            b'a' => 0x07,
            b'b' => 0x08,
            b'f' => 0x0c,
            b'v' => 0x0b,
            b'0'..=b'7' => {
                let mut v = (b - b'0') as u32;
                let mut count = 1;
                while count < 3 && self.peek(0).is_some_and(|c| (b'0'..=b'7').contains(&c)) {
                    v = v * 8 + (self.cur() - b'0') as u32;
                    self.advance();
                    count += 1;
                }
                v as u8
            }
            b'x' => {
                let mut v = 0u32;
                let mut any = false;
                while self.peek(0).is_some_and(|c| c.is_ascii_hexdigit()) {
                    v = v * 16 + (self.cur() as char).to_digit(16).unwrap_or(0);
                    self.advance();
                    any = true;
                }
                if !any {
                    return Err(self.error("hex escape with no digits", start));
                }
                v as u8
            }
            other => other,
        };
        Ok(value)
    }

    fn scan_punctuator(&mut self, start: Position) -> Result<TokenKind, Diagnostic> {
        let b = self.cur();
        self.advance();
        let one = |frame: &mut Self, with: u8, yes: TokenKind, no: TokenKind| {
            if frame.peek(0) == Some(with) {
                frame.advance();
                yes
            } else {
                no
            }
        };

        let kind = match b {
            b'(' => TokenKind::LParen,
            b')' => TokenKind::RParen,
            b'{' => TokenKind::LBrace,
            b'}' => TokenKind::RBrace,
            b'[' => TokenKind::LBracket,
            b']' => TokenKind::RBracket,
            b';' => TokenKind::Semicolon,
            b',' => TokenKind::Comma,
            b':' => TokenKind::Colon,
            b'?' => TokenKind::Question,
            b'~' => TokenKind::Tilde,
            b'.' => {
                if self.peek(0) == Some(b'.') && self.peek(1) == Some(b'.') {
                    self.advance();
                    self.advance();
                    TokenKind::Ellipsis
                } else {
                    TokenKind::Dot
                }
            }
            b'+' => match self.peek(0) {
                Some(b'+') => {
                    self.advance();
                    TokenKind::Inc
                }
                Some(b'=') => {
                    self.advance();
                    TokenKind::PlusAssign
                }
                _ => TokenKind::Plus,
            },
            b'-' => match self.peek(0) {
                Some(b'-') => {
                    self.advance();
                    TokenKind::Dec
                }
                Some(b'=') => {
                    self.advance();
                    TokenKind::MinusAssign
                }
                Some(b'>') => {
                    self.advance();
                    TokenKind::Arrow
                }
                _ => TokenKind::Minus,
            },
            b'*' => one(self, b'=', TokenKind::StarAssign, TokenKind::Star),
            b'/' => one(self, b'=', TokenKind::SlashAssign, TokenKind::Slash),
            b'%' => one(self, b'=', TokenKind::PercentAssign, TokenKind::Percent),
            b'=' => one(self, b'=', TokenKind::Eq, TokenKind::Assign),
            b'!' => one(self, b'=', TokenKind::Ne, TokenKind::Bang),
            b'^' => one(self, b'=', TokenKind::CaretAssign, TokenKind::Caret),
            b'<' => match self.peek(0) {
                Some(b'<') => {
                    self.advance();
                    one(self, b'=', TokenKind::ShlAssign, TokenKind::Shl)
                }
                Some(b'=') => {
                    self.advance();
                    TokenKind::Le
                }
                _ => TokenKind::Lt,
            },
            b'>' => match self.peek(0) {
                Some(b'>') => {
                    self.advance();
                    one(self, b'=', TokenKind::ShrAssign, TokenKind::Shr)
                }
                Some(b'=') => {
                    self.advance();
                    TokenKind::Ge
                }
                _ => TokenKind::Gt,
            },
            b'&' => match self.peek(0) {
                Some(b'&') => {
                    self.advance();
                    TokenKind::AndAnd
                }
                Some(b'=') => {
                    self.advance();
                    TokenKind::AmpAssign
                }
                _ => TokenKind::Amp,
            },
            b'|' => match self.peek(0) {
                Some(b'|') => {
                    self.advance();
                    TokenKind::OrOr
                }
                Some(b'=') => {
                    self.advance();
                    TokenKind::PipeAssign
                }
                _ => TokenKind::Pipe,
            },
            other => {
                return Err(self.error(
                    format!("unrecognized character '{}' (0x{:02x})", other as char, other),
                    start,
                ));
            }
        };
        Ok(kind)
    }

    fn error(&self, message: impl Into<String>, start: Position) -> Diagnostic {
        Diagnostic::error(message, Span::new(start, self.loc, self.file_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(src: &str) -> Vec<TokenKind> {
        let mut lexer = Lexer::new();
        lexer.push_source(src, 0);
        lexer
            .tokenize()
            .expect("tokenization should succeed")
            .into_iter()
            .map(|t| t.value)
            .collect()
    }

    #[test]
    fn longest_match_operators() {
        assert_eq!(
            lex("<<= << <= <"),
            vec![
                TokenKind::ShlAssign,
                TokenKind::Shl,
                TokenKind::Le,
                TokenKind::Lt,
                TokenKind::Eof
            ]
        );
        assert_eq!(lex("== ="), vec![TokenKind::Eq, TokenKind::Assign, TokenKind::Eof]);
    }

    #[test]
    fn integer_literal_bases_and_suffixes() {
        assert_eq!(
            lex("10 0x1f 010 42u 7l 7ll"),
            vec![
                TokenKind::IntLiteral { value: 10, suffix: IntSuffix::None, unsigned: false },
                TokenKind::IntLiteral { value: 31, suffix: IntSuffix::None, unsigned: false },
                TokenKind::IntLiteral { value: 8, suffix: IntSuffix::None, unsigned: false },
                TokenKind::IntLiteral { value: 42, suffix: IntSuffix::None, unsigned: true },
                TokenKind::IntLiteral { value: 7, suffix: IntSuffix::Long, unsigned: false },
                TokenKind::IntLiteral { value: 7, suffix: IntSuffix::LongLong, unsigned: false },
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn float_literal_forms() {
        assert_eq!(
            lex("1.5 2e3 .25 1.0f"),
            vec![
                TokenKind::FloatLiteral { value: 1.5, single: false },
                TokenKind::FloatLiteral { value: 2000.0, single: false },
                TokenKind::FloatLiteral { value: 0.25, single: false },
                TokenKind::FloatLiteral { value: 1.0, single: true },
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn string_escapes() {
        assert_eq!(
            lex(r#""a\n\t\x41\101""#),
            vec![TokenKind::StrLiteral("a\n\tAA".to_string()), TokenKind::Eof]
        );
    }

    #[test]
    fn char_literals_are_integers() {
        assert_eq!(
            lex(r"'a' '\n'"),
            vec![TokenKind::CharLiteral(97), TokenKind::CharLiteral(10), TokenKind::Eof]
        );
    }

    #[test]
    fn keywords_resolve_after_scanning() {
        assert_eq!(
            lex("int intx"),
            vec![TokenKind::KwInt, TokenKind::Ident("intx".to_string()), TokenKind::Eof]
        );
    }

    #[test]
    fn preprocessor_lines_are_skipped() {
        assert_eq!(
            lex("#include <stdio.h>\nint x;"),
            vec![
                TokenKind::KwInt,
                TokenKind::Ident("x".to_string()),
                TokenKind::Semicolon,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn source_stack_resumes_outer_file() {
        let mut lexer = Lexer::new();
        lexer.push_source("int a;", 0);
        lexer.push_source("int b;", 1);
        let tokens = lexer.tokenize().expect("tokenization should succeed");
        // The inner (last pushed) file drains first.
        assert_eq!(tokens[1].value, TokenKind::Ident("b".to_string()));
        assert_eq!(tokens[1].span.file_id, 1);
        assert_eq!(tokens[4].value, TokenKind::Ident("a".to_string()));
        assert_eq!(tokens[4].span.file_id, 0);
    }

    #[test]
    fn unrecognized_byte_is_fatal() {
        let mut lexer = Lexer::new();
        lexer.push_source("int $x;", 0);
        let err = lexer.tokenize().expect_err("lexing should fail");
        assert!(matches!(err, SccError::LexError { .. }));
        assert!(lexer.diagnostics().has_errors());
        let diag = &lexer.diagnostics().messages[0];
        assert_eq!((diag.span.start.line, diag.span.start.column), (1, 5));
    }

    #[test]
    fn unterminated_string_is_fatal() {
        let mut lexer = Lexer::new();
        lexer.push_source("char *s = \"abc;\n", 0);
        assert!(lexer.tokenize().is_err());
    }
}
