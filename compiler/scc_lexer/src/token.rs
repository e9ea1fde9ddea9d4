//! Token definitions for the C subset

use scc_common::Spanned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Width suffix on an integer literal (`l`, `ll`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntSuffix {
    None,
    Long,
    LongLong,
}

/// Token types produced by the lexer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TokenKind {
    // Literals
    IntLiteral { value: i64, suffix: IntSuffix, unsigned: bool },
    FloatLiteral { value: f64, single: bool },
    CharLiteral(i64),
    StrLiteral(String),

    // Identifiers
    Ident(String),

    // Type and storage keywords
    KwVoid,
    KwChar,
    KwShort,
    KwInt,
    KwLong,
    KwFloat,
    KwDouble,
    KwSigned,
    KwUnsigned,
    KwStruct,
    KwUnion,
    KwEnum,
    KwTypedef,
    KwStatic,
    KwExtern,
    KwConst,

    // Statement keywords
    KwIf,
    KwElse,
    KwSwitch,
    KwCase,
    KwDefault,
    KwWhile,
    KwDo,
    KwFor,
    KwBreak,
    KwContinue,
    KwReturn,
    KwGoto,
    KwSizeof,
    KwAsm,

    // Punctuators
    LParen,        // (
    RParen,        // )
    LBrace,        // {
    RBrace,        // }
    LBracket,      // [
    RBracket,      // ]
    Semicolon,     // ;
    Comma,         // ,
    Colon,         // :
    Question,      // ?
    Tilde,         // ~
    Dot,           // .
    Ellipsis,      // ...
    Arrow,         // ->
    Inc,           // ++
    Dec,           // --
    Plus,          // +
    Minus,         // -
    Star,          // *
    Slash,         // /
    Percent,       // %
    Amp,           // &
    Pipe,          // |
    Caret,         // ^
    Bang,          // !
    Assign,        // =
    Eq,            // ==
    Ne,            // !=
    Lt,            // <
    Gt,            // >
    Le,            // <=
    Ge,            // >=
    Shl,           // <<
    Shr,           // >>
    AndAnd,        // &&
    OrOr,          // ||
    PlusAssign,    // +=
    MinusAssign,   // -=
    StarAssign,    // *=
    SlashAssign,   // /=
    PercentAssign, // %=
    AmpAssign,     // &=
    PipeAssign,    // |=
    CaretAssign,   // ^=
    ShlAssign,     // <<=
    ShrAssign,     // >>=

    // End of input
    Eof,
}

/// Reserved-word table, consulted after an identifier has been scanned.
pub fn keyword_lookup(ident: &str) -> Option<TokenKind> {
    let kind = match ident {
        "void" => TokenKind::KwVoid,
        "char" => TokenKind::KwChar,
        "short" => TokenKind::KwShort,
        "int" => TokenKind::KwInt,
        "long" => TokenKind::KwLong,
        "float" => TokenKind::KwFloat,
        "double" => TokenKind::KwDouble,
        "signed" => TokenKind::KwSigned,
        "unsigned" => TokenKind::KwUnsigned,
        "struct" => TokenKind::KwStruct,
        "union" => TokenKind::KwUnion,
        "enum" => TokenKind::KwEnum,
        "typedef" => TokenKind::KwTypedef,
        "static" => TokenKind::KwStatic,
        "extern" => TokenKind::KwExtern,
        "const" => TokenKind::KwConst,
        "if" => TokenKind::KwIf,
        "else" => TokenKind::KwElse,
        "switch" => TokenKind::KwSwitch,
        "case" => TokenKind::KwCase,
        "default" => TokenKind::KwDefault,
        "while" => TokenKind::KwWhile,
        "do" => TokenKind::KwDo,
        "for" => TokenKind::KwFor,
        "break" => TokenKind::KwBreak,
        "continue" => TokenKind::KwContinue,
        "return" => TokenKind::KwReturn,
        "goto" => TokenKind::KwGoto,
        "sizeof" => TokenKind::KwSizeof,
        "__asm" => TokenKind::KwAsm,
        _ => return None,
    };
    Some(kind)
}

impl TokenKind {
    pub fn is_literal(&self) -> bool {
        matches!(
            self,
            TokenKind::IntLiteral { .. }
                | TokenKind::FloatLiteral { .. }
                | TokenKind::CharLiteral(_)
                | TokenKind::StrLiteral(_)
        )
    }

    /// Keywords that can begin a declaration; the parser also treats typedef
    /// names this way once they are in scope.
    pub fn starts_type(&self) -> bool {
        matches!(
            self,
            TokenKind::KwVoid
                | TokenKind::KwChar
                | TokenKind::KwShort
                | TokenKind::KwInt
                | TokenKind::KwLong
                | TokenKind::KwFloat
                | TokenKind::KwDouble
                | TokenKind::KwSigned
                | TokenKind::KwUnsigned
                | TokenKind::KwStruct
                | TokenKind::KwUnion
                | TokenKind::KwEnum
                | TokenKind::KwConst
        )
    }

    pub fn is_storage_class(&self) -> bool {
        matches!(self, TokenKind::KwTypedef | TokenKind::KwStatic | TokenKind::KwExtern)
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TokenKind::IntLiteral { value, .. } => return write!(f, "{}", value),
            TokenKind::FloatLiteral { value, .. } => return write!(f, "{}", value),
            TokenKind::CharLiteral(c) => return write!(f, "'\\x{:02x}'", c),
            TokenKind::StrLiteral(s) => return write!(f, "{:?}", s),
            TokenKind::Ident(name) => return write!(f, "{}", name),
            TokenKind::KwVoid => "void",
            TokenKind::KwChar => "char",
            TokenKind::KwShort => "short",
            TokenKind::KwInt => "int",
            TokenKind::KwLong => "long",
            TokenKind::KwFloat => "float",
            TokenKind::KwDouble => "double",
            TokenKind::KwSigned => "signed",
            TokenKind::KwUnsigned => "unsigned",
            TokenKind::KwStruct => "struct",
            TokenKind::KwUnion => "union",
            TokenKind::KwEnum => "enum",
            TokenKind::KwTypedef => "typedef",
            TokenKind::KwStatic => "static",
            TokenKind::KwExtern => "extern",
            TokenKind::KwConst => "const",
            TokenKind::KwIf => "if",
            TokenKind::KwElse => "else",
            TokenKind::KwSwitch => "switch",
            TokenKind::KwCase => "case",
            TokenKind::KwDefault => "default",
            TokenKind::KwWhile => "while",
            TokenKind::KwDo => "do",
            TokenKind::KwFor => "for",
            TokenKind::KwBreak => "break",
            TokenKind::KwContinue => "continue",
            TokenKind::KwReturn => "return",
            TokenKind::KwGoto => "goto",
            TokenKind::KwSizeof => "sizeof",
            TokenKind::KwAsm => "__asm",
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
            TokenKind::LBrace => "{",
            TokenKind::RBrace => "}",
            TokenKind::LBracket => "[",
            TokenKind::RBracket => "]",
            TokenKind::Semicolon => ";",
            TokenKind::Comma => ",",
            TokenKind::Colon => ":",
            TokenKind::Question => "?",
            TokenKind::Tilde => "~",
            TokenKind::Dot => ".",
            TokenKind::Ellipsis => "...",
            TokenKind::Arrow => "->",
            TokenKind::Inc => "++",
            TokenKind::Dec => "--",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Star => "*",
            TokenKind::Slash => "/",
            TokenKind::Percent => "%",
            TokenKind::Amp => "&",
            TokenKind::Pipe => "|",
            TokenKind::Caret => "^",
            TokenKind::Bang => "!",
            TokenKind::Assign => "=",
            TokenKind::Eq => "==",
            TokenKind::Ne => "!=",
            TokenKind::Lt => "<",
            TokenKind::Gt => ">",
            TokenKind::Le => "<=",
            TokenKind::Ge => ">=",
            TokenKind::Shl => "<<",
            TokenKind::Shr => ">>",
            TokenKind::AndAnd => "&&",
            TokenKind::OrOr => "||",
            TokenKind::PlusAssign => "+=",
            TokenKind::MinusAssign => "-=",
            TokenKind::StarAssign => "*=",
            TokenKind::SlashAssign => "/=",
            TokenKind::PercentAssign => "%=",
            TokenKind::AmpAssign => "&=",
            TokenKind::PipeAssign => "|=",
            TokenKind::CaretAssign => "^=",
            TokenKind::ShlAssign => "<<=",
            TokenKind::ShrAssign => ">>=",
            TokenKind::Eof => "end of input",
        };
        write!(f, "{}", text)
    }
}

/// A token with source location information
pub type Token = Spanned<TokenKind>;
