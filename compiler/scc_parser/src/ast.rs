//! Typed abstract syntax tree
//!
//! Invariants established by the parser:
//! - every expression's `ty` is non-null and fully resolved;
//! - every implicit conversion is a materialized [`ExprKind::Cast`] node;
//! - the non-pointer operand of pointer arithmetic has already been scaled
//!   by the pointee size;
//! - array and function values outside `&`/`sizeof` contexts have decayed
//!   to pointers.

use crate::scope::{ScopeId, Scopes};
use scc_common::Span;
use scc_types::{Member, TypeRef};
use smallvec::SmallVec;

/// Resolved reference to a declared variable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarRef {
    pub name: String,
    pub scope: ScopeId,
    pub index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinOp {
    pub fn is_comparison(&self) -> bool {
        matches!(self, BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    /// Arithmetic negation.
    Neg,
    /// Bitwise complement.
    BitNot,
    /// Logical not; yields 0 or 1 as `int`.
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncDecOp {
    PreInc,
    PreDec,
    PostInc,
    PostDec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

/// An expression with its resolved type
#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub ty: TypeRef,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    IntLit(i64),
    FloatLit(f64),
    /// Index into [`Program::strings`].
    StrLit(usize),
    Var(VarRef),
    /// Member access on a struct/union lvalue; `p->m` has been normalized
    /// to `(*p).m`.
    Member { base: Box<Expr>, member: Member },
    Deref(Box<Expr>),
    Addr(Box<Expr>),
    Unary { op: UnOp, operand: Box<Expr> },
    Binary { op: BinOp, lhs: Box<Expr>, rhs: Box<Expr> },
    /// Short-circuit `&&`/`||`; always of type `int`.
    Logical { op: LogicalOp, lhs: Box<Expr>, rhs: Box<Expr> },
    Assign { lhs: Box<Expr>, rhs: Box<Expr> },
    /// `lhs op= rhs`; `rhs` has been converted to the operation type.
    CompoundAssign { op: BinOp, lhs: Box<Expr>, rhs: Box<Expr> },
    IncDec { op: IncDecOp, target: Box<Expr> },
    Call { callee: Box<Expr>, args: SmallVec<[Box<Expr>; 4]> },
    /// Conversion to `self.ty`; `explicit` distinguishes source casts from
    /// compiler-inserted ones.
    Cast { inner: Box<Expr>, explicit: bool },
    Ternary { cond: Box<Expr>, then_expr: Box<Expr>, else_expr: Box<Expr> },
    Comma { lhs: Box<Expr>, rhs: Box<Expr> },
    /// A compound literal; the payload is the hidden anonymous variable the
    /// initializer was spilled into.
    CompoundLit { var: VarRef, init: Box<Initializer> },
}

impl Expr {
    pub fn new(kind: ExprKind, ty: TypeRef, span: Span) -> Self {
        Self { kind, ty, span }
    }

    pub fn int_const(&self) -> Option<i64> {
        match self.kind {
            ExprKind::IntLit(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_lvalue(&self) -> bool {
        matches!(
            self.kind,
            ExprKind::Var(_) | ExprKind::Deref(_) | ExprKind::Member { .. } | ExprKind::CompoundLit { .. }
        )
    }
}

/// A variable initializer
#[derive(Debug, Clone)]
pub enum Initializer {
    Single(Expr),
    List(Vec<Initializer>),
}

/// A statement
#[derive(Debug, Clone)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum StmtKind {
    Expr(Expr),
    Block { scope: ScopeId, stmts: Vec<Stmt> },
    If { cond: Expr, then_branch: Box<Stmt>, else_branch: Option<Box<Stmt>> },
    /// Case values and the default flag are collected during parsing.
    Switch { value: Expr, body: Box<Stmt>, cases: Vec<i64>, has_default: bool },
    While { cond: Expr, body: Box<Stmt> },
    DoWhile { body: Box<Stmt>, cond: Expr },
    For {
        scope: ScopeId,
        pre: Option<Box<Stmt>>,
        cond: Option<Expr>,
        post: Option<Expr>,
        body: Box<Stmt>,
    },
    Break,
    Continue,
    Return(Option<Expr>),
    Case { value: i64, body: Box<Stmt> },
    Default { body: Box<Stmt> },
    Goto(String),
    Label { name: String, body: Box<Stmt> },
    /// One declaration statement; a group of declarators becomes a group of
    /// items.
    VarDecl(Vec<VarDeclItem>),
    /// Opaque inline assembly passed through to the native emitter.
    Asm(String),
    Empty,
}

/// One declared local and its optional initializer
#[derive(Debug, Clone)]
pub struct VarDeclItem {
    pub var: VarRef,
    pub init: Option<Initializer>,
}

/// A function declaration or definition
#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub ty: TypeRef,
    pub param_scope: ScopeId,
    pub params: Vec<VarRef>,
    /// `None` for a declaration without a body.
    pub body: Option<Stmt>,
    /// Internal linkage (`static`).
    pub is_static: bool,
    pub span: Span,
}

impl Function {
    pub fn is_defined(&self) -> bool {
        self.body.is_some()
    }
}

/// A fully parsed and analyzed translation unit
#[derive(Debug)]
pub struct Program {
    pub scopes: Scopes,
    pub functions: Vec<Function>,
    /// Interned string literals, in first-encounter order.
    pub strings: Vec<String>,
}

impl Program {
    pub fn find_function(&self, name: &str) -> Option<&Function> {
        // A definition wins over earlier declarations of the same name.
        self.functions.iter().filter(|f| f.name == name).max_by_key(|f| f.is_defined())
    }
}
