//! Binary operator precedence table

use crate::ast::{BinOp, LogicalOp};
use scc_lexer::TokenKind;

/// An infix operator recognized by the precedence climber
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfixOp {
    Bin(BinOp),
    Logical(LogicalOp),
}

/// Binding power and operator for an infix token, or `None` if the token is
/// not an infix operator. Higher binds tighter; all listed operators are
/// left-associative.
pub fn infix_op(kind: &TokenKind) -> Option<(u8, InfixOp)> {
    use TokenKind::*;
    let entry = match kind {
        OrOr => (1, InfixOp::Logical(LogicalOp::Or)),
        AndAnd => (2, InfixOp::Logical(LogicalOp::And)),
        Pipe => (3, InfixOp::Bin(BinOp::BitOr)),
        Caret => (4, InfixOp::Bin(BinOp::BitXor)),
        Amp => (5, InfixOp::Bin(BinOp::BitAnd)),
        Eq => (6, InfixOp::Bin(BinOp::Eq)),
        Ne => (6, InfixOp::Bin(BinOp::Ne)),
        Lt => (7, InfixOp::Bin(BinOp::Lt)),
        Le => (7, InfixOp::Bin(BinOp::Le)),
        Gt => (7, InfixOp::Bin(BinOp::Gt)),
        Ge => (7, InfixOp::Bin(BinOp::Ge)),
        Shl => (8, InfixOp::Bin(BinOp::Shl)),
        Shr => (8, InfixOp::Bin(BinOp::Shr)),
        Plus => (9, InfixOp::Bin(BinOp::Add)),
        Minus => (9, InfixOp::Bin(BinOp::Sub)),
        Star => (10, InfixOp::Bin(BinOp::Mul)),
        Slash => (10, InfixOp::Bin(BinOp::Div)),
        Percent => (10, InfixOp::Bin(BinOp::Mod)),
        _ => return None,
    };
    Some(entry)
}

/// Compound-assignment tokens and the operation they apply.
pub fn compound_assign_op(kind: &TokenKind) -> Option<BinOp> {
    use TokenKind::*;
    let op = match kind {
        PlusAssign => BinOp::Add,
        MinusAssign => BinOp::Sub,
        StarAssign => BinOp::Mul,
        SlashAssign => BinOp::Div,
        PercentAssign => BinOp::Mod,
        AmpAssign => BinOp::BitAnd,
        PipeAssign => BinOp::BitOr,
        CaretAssign => BinOp::BitXor,
        ShlAssign => BinOp::Shl,
        ShrAssign => BinOp::Shr,
        _ => return None,
    };
    Some(op)
}
