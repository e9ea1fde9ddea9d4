//! Expression parsing and semantic construction
//!
//! Precedence climbing over the C operator table. Every constructor
//! finishes the node semantically as it is built: usual arithmetic
//! conversions, pointer-arithmetic scaling, lvalue and type checks, cast
//! insertion, and constant folding. Nothing downstream has to infer a
//! conversion.

use crate::ast::{BinOp, Expr, ExprKind, IncDecOp, LogicalOp, UnOp, VarRef};
use crate::prec::{compound_assign_op, infix_op, InfixOp};
use crate::scope::{StorageClass, VarInfo, GLOBAL_SCOPE};
use crate::Parser;
use scc_common::{SccError, SccResult, Span, Spanned};
use scc_lexer::{IntSuffix, TokenKind};
use scc_types::{FloatKind, IntKind, Qualifiers, Type, TypeRef};
use smallvec::SmallVec;

impl Parser {
    /// Full expression, including the comma operator.
    pub(crate) fn parse_expr(&mut self) -> SccResult<Expr> {
        let mut lhs = self.parse_assign_expr()?;
        while self.eat(&TokenKind::Comma) {
            let rhs = self.parse_assign_expr()?;
            let ty = rhs.ty.clone();
            let span = lhs.span.combine(rhs.span);
            lhs = Expr::new(ExprKind::Comma { lhs: Box::new(lhs), rhs: Box::new(rhs) }, ty, span);
        }
        Ok(lhs)
    }

    pub(crate) fn parse_assign_expr(&mut self) -> SccResult<Expr> {
        let lhs = self.parse_ternary()?;
        if self.eat(&TokenKind::Assign) {
            let rhs = self.parse_assign_expr()?;
            return Ok(self.make_assign(lhs, rhs));
        }
        if let Some(op) = compound_assign_op(self.peek_kind()) {
            let span = self.cur_span();
            self.advance();
            let rhs = self.parse_assign_expr()?;
            return Ok(self.make_compound_assign(op, lhs, rhs, span));
        }
        Ok(lhs)
    }

    pub(crate) fn parse_ternary(&mut self) -> SccResult<Expr> {
        let cond = self.parse_binary(1)?;
        if !self.eat(&TokenKind::Question) {
            return Ok(cond);
        }
        let cond = self.make_condition(cond);
        let then_expr = self.parse_expr()?;
        self.expect(TokenKind::Colon)?;
        let else_expr = self.parse_assign_expr()?;
        Ok(self.make_ternary(cond, then_expr, else_expr))
    }

    fn parse_binary(&mut self, min_prec: u8) -> SccResult<Expr> {
        let mut lhs = self.parse_cast_expr()?;
        while let Some((prec, op)) = infix_op(self.peek_kind()) {
            if prec < min_prec {
                break;
            }
            let op_span = self.cur_span();
            self.advance();
            let rhs = self.parse_binary(prec + 1)?;
            lhs = match op {
                InfixOp::Bin(op) => self.make_binary(op, lhs, rhs, op_span),
                InfixOp::Logical(op) => self.make_logical(op, lhs, rhs, op_span),
            };
        }
        Ok(lhs)
    }

    fn parse_cast_expr(&mut self) -> SccResult<Expr> {
        if self.check(&TokenKind::LParen) && self.type_name_ahead() {
            let start = self.cur_span();
            self.advance();
            let ty = self.parse_type_name()?;
            self.expect(TokenKind::RParen)?;
            if self.check(&TokenKind::LBrace) {
                return self.parse_compound_literal(ty, start);
            }
            let operand = self.parse_cast_expr()?;
            let operand = self.decay(operand);
            return Ok(self.make_cast(ty, operand, true, start));
        }
        self.parse_unary()
    }

    /// Whether `(` at the cursor opens a type name (cast or compound
    /// literal) rather than a parenthesized expression.
    fn type_name_ahead(&self) -> bool {
        match self.peek_at(1) {
            kind if kind.starts_type() => true,
            TokenKind::Ident(name) => self.scopes.lookup_typedef(self.scope, name).is_some(),
            _ => false,
        }
    }

    fn parse_unary(&mut self) -> SccResult<Expr> {
        let span = self.cur_span();
        match self.peek_kind().clone() {
            TokenKind::Inc => {
                self.advance();
                let target = self.parse_unary()?;
                Ok(self.make_incdec(IncDecOp::PreInc, target, span))
            }
            TokenKind::Dec => {
                self.advance();
                let target = self.parse_unary()?;
                Ok(self.make_incdec(IncDecOp::PreDec, target, span))
            }
            TokenKind::Amp => {
                self.advance();
                // No decay: `&arr` takes the address of the whole array.
                let operand = self.parse_cast_expr()?;
                Ok(self.make_addr(operand, span))
            }
            TokenKind::Star => {
                self.advance();
                let operand = self.parse_cast_expr()?;
                let operand = self.decay(operand);
                Ok(self.make_deref(operand, span))
            }
            TokenKind::Plus => {
                self.advance();
                let operand = self.parse_cast_expr()?;
                let operand = self.decay(operand);
                if !operand.ty.is_arith() {
                    self.sema_error("unary '+' requires an arithmetic operand", span);
                }
                Ok(self.promote(operand))
            }
            TokenKind::Minus => {
                self.advance();
                let operand = self.parse_cast_expr()?;
                let operand = self.decay(operand);
                if !operand.ty.is_arith() {
                    self.sema_error("unary '-' requires an arithmetic operand", span);
                }
                let operand = self.promote(operand);
                let ty = operand.ty.clone();
                let folded = match operand.kind {
                    ExprKind::IntLit(v) => Some(ExprKind::IntLit(self.truncate(v.wrapping_neg(), &ty))),
                    ExprKind::FloatLit(v) => Some(ExprKind::FloatLit(-v)),
                    _ => None,
                };
                let kind = folded.unwrap_or(ExprKind::Unary {
                    op: UnOp::Neg,
                    operand: Box::new(operand),
                });
                Ok(Expr::new(kind, ty, span))
            }
            TokenKind::Tilde => {
                self.advance();
                let operand = self.parse_cast_expr()?;
                let operand = self.decay(operand);
                if !operand.ty.is_integer() {
                    self.sema_error("'~' requires an integer operand", span);
                }
                let operand = self.promote(operand);
                let ty = operand.ty.clone();
                let folded = match operand.kind {
                    ExprKind::IntLit(v) => Some(ExprKind::IntLit(self.truncate(!v, &ty))),
                    _ => None,
                };
                let kind = folded.unwrap_or(ExprKind::Unary {
                    op: UnOp::BitNot,
                    operand: Box::new(operand),
                });
                Ok(Expr::new(kind, ty, span))
            }
            TokenKind::Bang => {
                self.advance();
                let operand = self.parse_cast_expr()?;
                let operand = self.make_condition(operand);
                let kind = match operand.kind {
                    ExprKind::IntLit(v) => ExprKind::IntLit((v == 0) as i64),
                    _ => ExprKind::Unary { op: UnOp::Not, operand: Box::new(operand) },
                };
                Ok(Expr::new(kind, Type::plain_int(), span))
            }
            TokenKind::KwSizeof => {
                self.advance();
                let ty = if self.check(&TokenKind::LParen) && self.type_name_ahead() {
                    self.advance();
                    let ty = self.parse_type_name()?;
                    self.expect(TokenKind::RParen)?;
                    ty
                } else {
                    // No decay: sizeof an array is the whole array.
                    self.parse_unary()?.ty
                };
                let size = self.layout.size_of(&ty);
                if size == 0 {
                    self.sema_error(format!("sizeof incomplete type '{}'", ty), span);
                }
                Ok(Expr::new(
                    ExprKind::IntLit(size as i64),
                    Type::int(IntKind::Long, false),
                    span,
                ))
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> SccResult<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            let span = self.cur_span();
            match self.peek_kind().clone() {
                TokenKind::LBracket => {
                    self.advance();
                    let index = self.parse_expr()?;
                    self.expect(TokenKind::RBracket)?;
                    let sum = self.make_binary(BinOp::Add, expr, index, span);
                    expr = self.make_deref(sum, span);
                }
                TokenKind::LParen => {
                    self.advance();
                    let mut args: SmallVec<[Box<Expr>; 4]> = SmallVec::new();
                    if !self.check(&TokenKind::RParen) {
                        loop {
                            args.push(Box::new(self.parse_assign_expr()?));
                            if !self.eat(&TokenKind::Comma) {
                                break;
                            }
                        }
                    }
                    self.expect(TokenKind::RParen)?;
                    expr = self.make_call(expr, args, span);
                }
                TokenKind::Dot => {
                    self.advance();
                    let name = self.expect_ident()?;
                    expr = self.make_member(expr, &name, false);
                }
                TokenKind::Arrow => {
                    self.advance();
                    let name = self.expect_ident()?;
                    expr = self.make_member(expr, &name, true);
                }
                TokenKind::Inc => {
                    self.advance();
                    expr = self.make_incdec(IncDecOp::PostInc, expr, span);
                }
                TokenKind::Dec => {
                    self.advance();
                    expr = self.make_incdec(IncDecOp::PostDec, expr, span);
                }
                _ => return Ok(expr),
            }
        }
    }

    fn parse_primary(&mut self) -> SccResult<Expr> {
        let span = self.cur_span();
        match self.peek_kind().clone() {
            TokenKind::IntLiteral { value, suffix, unsigned } => {
                self.advance();
                let kind = match suffix {
                    IntSuffix::None => IntKind::Int,
                    IntSuffix::Long => IntKind::Long,
                    IntSuffix::LongLong => IntKind::LongLong,
                };
                Ok(Expr::new(ExprKind::IntLit(value), Type::int(kind, !unsigned), span))
            }
            TokenKind::FloatLiteral { value, single } => {
                self.advance();
                let kind = if single { FloatKind::F32 } else { FloatKind::F64 };
                Ok(Expr::new(ExprKind::FloatLit(value), Type::float(kind), span))
            }
            TokenKind::CharLiteral(value) => {
                self.advance();
                // A character constant has type int.
                Ok(Expr::new(ExprKind::IntLit(value), Type::plain_int(), span))
            }
            TokenKind::StrLiteral(text) => {
                self.advance();
                let mut text = text;
                // Adjacent string literals concatenate.
                while let TokenKind::StrLiteral(next) = self.peek_kind().clone() {
                    text.push_str(&next);
                    self.advance();
                }
                let len = text.len() + 1;
                let index = self.intern_string(text);
                let ty = Type::array_of(Type::char_type(), Some(len));
                Ok(Expr::new(ExprKind::StrLit(index), ty, span))
            }
            TokenKind::Ident(name) => {
                self.advance();
                self.resolve_name(name, span)
            }
            TokenKind::LParen => {
                self.advance();
                let expr = self.parse_expr()?;
                self.expect(TokenKind::RParen)?;
                Ok(expr)
            }
            other => Err(self.syntax_error(format!("expected expression, found '{}'", other))),
        }
    }

    fn resolve_name(&mut self, name: String, span: Span) -> SccResult<Expr> {
        if let Some((scope, index)) = self.scopes.lookup(self.scope, &name) {
            let var = self.scopes.var(scope, index);
            if let StorageClass::EnumConst(value) = var.storage {
                return Ok(Expr::new(ExprKind::IntLit(value), Type::plain_int(), span));
            }
            let ty = var.ty.clone();
            return Ok(Expr::new(ExprKind::Var(VarRef { name, scope, index }), ty, span));
        }

        if self.check(&TokenKind::LParen) {
            // Implicitly declare `int name()`; the reachability pass reports
            // it if the call never resolves to a definition or import.
            self.diagnostics.warning(
                format!("implicit declaration of function '{}'", name),
                span,
            );
            let ty = Type::func(Type::plain_int(), Vec::new(), true);
            self.declare_function(&Spanned::new(name.clone(), span), ty, false, None);
            let Some((scope, index)) = self.scopes.lookup(GLOBAL_SCOPE, &name) else {
                return Err(SccError::internal_error(
                    "implicit declaration was not registered",
                ));
            };
            let ty = self.scopes.var(scope, index).ty.clone();
            return Ok(Expr::new(ExprKind::Var(VarRef { name, scope, index }), ty, span));
        }

        self.sema_error(format!("use of undeclared identifier '{}'", name), span);
        Ok(Expr::new(ExprKind::IntLit(0), Type::plain_int(), span))
    }

    fn parse_compound_literal(&mut self, ty: TypeRef, span: Span) -> SccResult<Expr> {
        let init = self.parse_initializer()?;
        let name = self.fresh_anon_name(".cl");
        let index = self.scopes.add_var(
            self.scope,
            VarInfo {
                name: name.clone(),
                ty: ty.clone(),
                quals: Qualifiers::empty(),
                storage: StorageClass::Auto,
                label: None,
                init: None,
                param_index: None,
                internal: false,
                defined: true,
                span,
            },
        );
        let var = VarRef { name, scope: self.scope, index };
        Ok(Expr::new(ExprKind::CompoundLit { var, init: Box::new(init) }, ty, span))
    }

    // Conversions

    /// Array-to-pointer and function-to-pointer decay, materialized as a
    /// cast node.
    pub(crate) fn decay(&mut self, expr: Expr) -> Expr {
        match expr.ty.as_ref() {
            Type::Array { elem, .. } => {
                let ty = Type::ptr_to(elem.clone());
                let span = expr.span;
                Expr::new(ExprKind::Cast { inner: Box::new(expr), explicit: false }, ty, span)
            }
            Type::Func(_) => {
                let ty = Type::ptr_to(expr.ty.clone());
                let span = expr.span;
                Expr::new(ExprKind::Cast { inner: Box::new(expr), explicit: false }, ty, span)
            }
            _ => expr,
        }
    }

    /// Integer promotion: anything of rank below `int` promotes to `int`.
    pub(crate) fn promote(&mut self, expr: Expr) -> Expr {
        let promoted = match expr.ty.as_ref() {
            Type::Int { kind, .. } if *kind < IntKind::Int => Some(Type::plain_int()),
            Type::Enum(_) => Some(Type::plain_int()),
            _ => None,
        };
        match promoted {
            Some(ty) => {
                let span = expr.span;
                self.make_cast(ty, expr, false, span)
            }
            None => expr,
        }
    }

    /// Insert a conversion to `ty` unless the expression already has it.
    pub(crate) fn make_cast(&mut self, ty: TypeRef, expr: Expr, explicit: bool, span: Span) -> Expr {
        if expr.ty == ty && !explicit {
            return expr;
        }
        // Fold literal conversions immediately.
        let folded = match (&expr.kind, ty.as_ref()) {
            (ExprKind::IntLit(v), Type::Int { .. }) => Some(ExprKind::IntLit(self.truncate(*v, &ty))),
            (ExprKind::IntLit(v), Type::Float(_)) => Some(ExprKind::FloatLit(*v as f64)),
            (ExprKind::FloatLit(v), Type::Float(FloatKind::F32)) => {
                Some(ExprKind::FloatLit(*v as f32 as f64))
            }
            (ExprKind::FloatLit(_), Type::Float(FloatKind::F64)) => None,
            (ExprKind::FloatLit(v), Type::Int { .. }) => {
                Some(ExprKind::IntLit(self.truncate(*v as i64, &ty)))
            }
            _ => None,
        };
        match folded {
            Some(kind) => Expr::new(kind, ty, span),
            None => Expr::new(ExprKind::Cast { inner: Box::new(expr), explicit }, ty, span),
        }
    }

    /// Truncate a constant to the width and signedness of `ty`.
    pub(crate) fn truncate(&self, value: i64, ty: &TypeRef) -> i64 {
        let size = self.layout.size_of(ty);
        if size >= 8 {
            return value;
        }
        let bits = (size * 8) as u32;
        let mask = (1i64 << bits) - 1;
        let masked = value & mask;
        if !ty.is_unsigned() && (masked >> (bits - 1)) & 1 == 1 {
            masked | !mask
        } else {
            masked
        }
    }

    /// Usual arithmetic conversions: promote both sides to their common
    /// type and return the converted operands.
    fn arith_convert(&mut self, lhs: Expr, rhs: Expr) -> (Expr, Expr, TypeRef) {
        let lhs = self.promote(lhs);
        let rhs = self.promote(rhs);
        let ty = self.common_type(&lhs.ty, &rhs.ty);
        let lhs_span = lhs.span;
        let rhs_span = rhs.span;
        let lhs = self.make_cast(ty.clone(), lhs, false, lhs_span);
        let rhs = self.make_cast(ty.clone(), rhs, false, rhs_span);
        (lhs, rhs, ty)
    }

    fn common_type(&self, a: &TypeRef, b: &TypeRef) -> TypeRef {
        match (a.as_ref(), b.as_ref()) {
            (Type::Float(FloatKind::F64), _) | (_, Type::Float(FloatKind::F64)) => {
                Type::float(FloatKind::F64)
            }
            (Type::Float(FloatKind::F32), _) | (_, Type::Float(FloatKind::F32)) => {
                Type::float(FloatKind::F32)
            }
            _ => {
                let sa = self.layout.size_of(a);
                let sb = self.layout.size_of(b);
                if sa > sb {
                    a.clone()
                } else if sb > sa {
                    b.clone()
                } else if a.is_unsigned() {
                    a.clone()
                } else {
                    b.clone()
                }
            }
        }
    }

    // Node constructors

    pub(crate) fn make_binary(&mut self, op: BinOp, lhs: Expr, rhs: Expr, span: Span) -> Expr {
        let lhs = self.decay(lhs);
        let rhs = self.decay(rhs);

        // Pointer arithmetic gets its own construction path.
        if matches!(op, BinOp::Add | BinOp::Sub) && (lhs.ty.is_ptr() || rhs.ty.is_ptr()) {
            return self.make_pointer_arith(op, lhs, rhs, span);
        }
        if op.is_comparison() && lhs.ty.is_ptr() && rhs.ty.is_ptr() {
            let kind = ExprKind::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
            return Expr::new(kind, Type::plain_int(), span);
        }
        if op.is_comparison() && (lhs.ty.is_ptr() || rhs.ty.is_ptr()) {
            // Pointer against integer; the integer side converts.
            let (lhs, rhs) = if lhs.ty.is_ptr() {
                let ty = lhs.ty.clone();
                let rhs_span = rhs.span;
                (lhs, self.make_cast(ty, rhs, false, rhs_span))
            } else {
                let ty = rhs.ty.clone();
                let lhs_span = lhs.span;
                (self.make_cast(ty, lhs, false, lhs_span), rhs)
            };
            let kind = ExprKind::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
            return Expr::new(kind, Type::plain_int(), span);
        }

        let integer_only = matches!(
            op,
            BinOp::Mod | BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor | BinOp::Shl | BinOp::Shr
        );
        if integer_only && !(lhs.ty.is_integer() && rhs.ty.is_integer()) {
            self.sema_error("operator requires integer operands", span);
        } else if !lhs.ty.is_arith() || !rhs.ty.is_arith() {
            self.sema_error("invalid operands to binary expression", span);
        }

        // Shift counts promote independently; the result keeps the left
        // operand's promoted type.
        if matches!(op, BinOp::Shl | BinOp::Shr) {
            let lhs = self.promote(lhs);
            let rhs = self.promote(rhs);
            let ty = lhs.ty.clone();
            if let Some(kind) = self.fold_binary(op, &lhs, &rhs, &ty) {
                return Expr::new(kind, ty, span);
            }
            let kind = ExprKind::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
            return Expr::new(kind, ty, span);
        }

        let (lhs, rhs, common) = self.arith_convert(lhs, rhs);
        let ty = if op.is_comparison() { Type::plain_int() } else { common };
        if let Some(kind) = self.fold_binary(op, &lhs, &rhs, &ty) {
            return Expr::new(kind, ty, span);
        }
        let kind = ExprKind::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        Expr::new(kind, ty, span)
    }

    /// Pointer +- integer (scaled by the pointee size) and pointer -
    /// pointer (byte difference divided by the pointee size).
    fn make_pointer_arith(&mut self, op: BinOp, lhs: Expr, rhs: Expr, span: Span) -> Expr {
        let ptrdiff = Type::int(IntKind::Long, true);

        if lhs.ty.is_ptr() && rhs.ty.is_ptr() {
            if op != BinOp::Sub {
                self.sema_error("invalid operands to pointer addition", span);
            }
            if lhs.ty != rhs.ty {
                self.sema_error("subtracting pointers to incompatible types", span);
            }
            let elem_size = lhs.ty.pointee().map(|t| self.layout.size_of(t)).unwrap_or(1).max(1);
            let diff = Expr::new(
                ExprKind::Binary { op: BinOp::Sub, lhs: Box::new(lhs), rhs: Box::new(rhs) },
                ptrdiff.clone(),
                span,
            );
            if elem_size == 1 {
                return diff;
            }
            let size = Expr::new(ExprKind::IntLit(elem_size as i64), ptrdiff.clone(), span);
            return Expr::new(
                ExprKind::Binary { op: BinOp::Div, lhs: Box::new(diff), rhs: Box::new(size) },
                ptrdiff,
                span,
            );
        }

        let (ptr, int, ptr_first) =
            if lhs.ty.is_ptr() { (lhs, rhs, true) } else { (rhs, lhs, false) };
        if !ptr_first && op == BinOp::Sub {
            self.sema_error("cannot subtract a pointer from an integer", span);
        }
        if !int.ty.is_integer() {
            self.sema_error("pointer arithmetic requires an integer operand", span);
        }

        let elem_size = ptr.ty.pointee().map(|t| self.layout.size_of(t)).unwrap_or(1).max(1);
        let int_span = int.span;
        let int = self.make_cast(ptrdiff.clone(), int, false, int_span);
        let scaled = if elem_size == 1 {
            int
        } else {
            let size = Expr::new(ExprKind::IntLit(elem_size as i64), ptrdiff.clone(), span);
            let kind = match self.fold_binary(BinOp::Mul, &int, &size, &ptrdiff) {
                Some(kind) => kind,
                None => ExprKind::Binary {
                    op: BinOp::Mul,
                    lhs: Box::new(int),
                    rhs: Box::new(size),
                },
            };
            Expr::new(kind, ptrdiff, span)
        };

        let ty = ptr.ty.clone();
        Expr::new(
            ExprKind::Binary { op, lhs: Box::new(ptr), rhs: Box::new(scaled) },
            ty,
            span,
        )
    }

    fn fold_binary(&self, op: BinOp, lhs: &Expr, rhs: &Expr, ty: &TypeRef) -> Option<ExprKind> {
        use BinOp::*;
        match (&lhs.kind, &rhs.kind) {
            (ExprKind::IntLit(a), ExprKind::IntLit(b)) => {
                let (a, b) = (*a, *b);
                let unsigned = lhs.ty.is_unsigned();
                let value = match op {
                    Add => a.wrapping_add(b),
                    Sub => a.wrapping_sub(b),
                    Mul => a.wrapping_mul(b),
                    Div | Mod if b == 0 => return None,
                    Div if unsigned => ((a as u64) / (b as u64)) as i64,
                    Div => a.wrapping_div(b),
                    Mod if unsigned => ((a as u64) % (b as u64)) as i64,
                    Mod => a.wrapping_rem(b),
                    BitAnd => a & b,
                    BitOr => a | b,
                    BitXor => a ^ b,
                    Shl => a.wrapping_shl(b as u32 & 63),
                    Shr if unsigned => ((a as u64).wrapping_shr(b as u32 & 63)) as i64,
                    Shr => a.wrapping_shr(b as u32 & 63),
                    Eq => (a == b) as i64,
                    Ne => (a != b) as i64,
                    Lt if unsigned => ((a as u64) < (b as u64)) as i64,
                    Le if unsigned => ((a as u64) <= (b as u64)) as i64,
                    Gt if unsigned => ((a as u64) > (b as u64)) as i64,
                    Ge if unsigned => ((a as u64) >= (b as u64)) as i64,
                    Lt => (a < b) as i64,
                    Le => (a <= b) as i64,
                    Gt => (a > b) as i64,
                    Ge => (a >= b) as i64,
                };
                Some(ExprKind::IntLit(self.truncate(value, ty)))
            }
            (ExprKind::FloatLit(a), ExprKind::FloatLit(b)) => {
                let (a, b) = (*a, *b);
                let kind = match op {
                    Add => ExprKind::FloatLit(a + b),
                    Sub => ExprKind::FloatLit(a - b),
                    Mul => ExprKind::FloatLit(a * b),
                    Div => ExprKind::FloatLit(a / b),
                    Eq => ExprKind::IntLit((a == b) as i64),
                    Ne => ExprKind::IntLit((a != b) as i64),
                    Lt => ExprKind::IntLit((a < b) as i64),
                    Le => ExprKind::IntLit((a <= b) as i64),
                    Gt => ExprKind::IntLit((a > b) as i64),
                    Ge => ExprKind::IntLit((a >= b) as i64),
                    _ => return None,
                };
                Some(kind)
            }
            _ => None,
        }
    }

    fn make_logical(&mut self, op: LogicalOp, lhs: Expr, rhs: Expr, span: Span) -> Expr {
        let lhs = self.make_condition(lhs);
        let rhs = self.make_condition(rhs);
        if let (ExprKind::IntLit(a), ExprKind::IntLit(b)) = (&lhs.kind, &rhs.kind) {
            let value = match op {
                LogicalOp::And => (*a != 0 && *b != 0) as i64,
                LogicalOp::Or => (*a != 0 || *b != 0) as i64,
            };
            return Expr::new(ExprKind::IntLit(value), Type::plain_int(), span);
        }
        Expr::new(
            ExprKind::Logical { op, lhs: Box::new(lhs), rhs: Box::new(rhs) },
            Type::plain_int(),
            span,
        )
    }

    /// Decay and require a scalar, for use as a branch condition.
    pub(crate) fn make_condition(&mut self, expr: Expr) -> Expr {
        let expr = self.decay(expr);
        if !expr.ty.is_scalar() {
            self.sema_error(
                format!("expression of type '{}' is not a valid condition", expr.ty),
                expr.span,
            );
        }
        expr
    }

    fn make_addr(&mut self, operand: Expr, span: Span) -> Expr {
        if operand.ty.is_func() {
            let ty = Type::ptr_to(operand.ty.clone());
            return Expr::new(ExprKind::Addr(Box::new(operand)), ty, span);
        }
        if !operand.is_lvalue() {
            self.sema_error("cannot take the address of an rvalue", span);
        }
        let ty = Type::ptr_to(operand.ty.clone());
        Expr::new(ExprKind::Addr(Box::new(operand)), ty, span)
    }

    fn make_deref(&mut self, operand: Expr, span: Span) -> Expr {
        let pointee = match operand.ty.as_ref() {
            Type::Ptr(inner) => inner.clone(),
            _ => {
                self.sema_error(
                    format!("cannot dereference expression of type '{}'", operand.ty),
                    span,
                );
                Type::plain_int()
            }
        };
        Expr::new(ExprKind::Deref(Box::new(operand)), pointee, span)
    }

    pub(crate) fn make_assign(&mut self, lhs: Expr, rhs: Expr) -> Expr {
        let span = lhs.span.combine(rhs.span);
        self.check_assign_target(&lhs);
        let rhs = self.decay(rhs);
        let rhs = self.convert_for_assign(lhs.ty.clone(), rhs);
        let ty = lhs.ty.clone();
        Expr::new(ExprKind::Assign { lhs: Box::new(lhs), rhs: Box::new(rhs) }, ty, span)
    }

    fn make_compound_assign(&mut self, op: BinOp, lhs: Expr, rhs: Expr, span: Span) -> Expr {
        self.check_assign_target(&lhs);
        let rhs = self.decay(rhs);

        if lhs.ty.is_ptr() && matches!(op, BinOp::Add | BinOp::Sub) {
            // Scale the step like ordinary pointer arithmetic.
            let elem_size =
                lhs.ty.pointee().map(|t| self.layout.size_of(t)).unwrap_or(1).max(1);
            let ptrdiff = Type::int(IntKind::Long, true);
            let rhs = self.make_cast(ptrdiff.clone(), rhs, false, span);
            let rhs = if elem_size == 1 {
                rhs
            } else {
                let size = Expr::new(ExprKind::IntLit(elem_size as i64), ptrdiff.clone(), span);
                Expr::new(
                    ExprKind::Binary { op: BinOp::Mul, lhs: Box::new(rhs), rhs: Box::new(size) },
                    ptrdiff,
                    span,
                )
            };
            let ty = lhs.ty.clone();
            return Expr::new(
                ExprKind::CompoundAssign { op, lhs: Box::new(lhs), rhs: Box::new(rhs) },
                ty,
                span,
            );
        }

        if !lhs.ty.is_arith() || !rhs.ty.is_arith() {
            self.sema_error("invalid operands to compound assignment", span);
        }
        // The operation runs in the target's type; the right side converts.
        let rhs = self.make_cast(lhs.ty.clone(), rhs, false, span);
        let ty = lhs.ty.clone();
        Expr::new(
            ExprKind::CompoundAssign { op, lhs: Box::new(lhs), rhs: Box::new(rhs) },
            ty,
            span,
        )
    }

    fn check_assign_target(&mut self, lhs: &Expr) {
        if !lhs.is_lvalue() {
            self.sema_error("expression is not assignable", lhs.span);
            return;
        }
        if lhs.ty.is_array() {
            self.sema_error("array type is not assignable", lhs.span);
        }
        if let ExprKind::Var(var) = &lhs.kind {
            let info = self.scopes.var(var.scope, var.index);
            if info.quals.contains(Qualifiers::CONST) {
                let name = var.name.clone();
                let span = lhs.span;
                self.sema_error(format!("cannot assign to const variable '{}'", name), span);
            }
        }
        if let ExprKind::Member { member, .. } = &lhs.kind {
            if member.quals.contains(Qualifiers::CONST) {
                let span = lhs.span;
                self.sema_error("cannot assign to const member", span);
            }
        }
    }

    /// Conversion-with-checking for assignment, initialization, argument
    /// passing and return values.
    pub(crate) fn convert_for_assign(&mut self, target: TypeRef, expr: Expr) -> Expr {
        let span = expr.span;
        if expr.ty == target {
            return expr;
        }
        match (target.as_ref(), expr.ty.as_ref()) {
            (t, e) if t.is_arith() && e.is_arith() => self.make_cast(target, expr, false, span),
            (Type::Ptr(a), Type::Ptr(b)) => {
                if a != b && !a.is_void() && !b.is_void() {
                    self.diagnostics.warning(
                        format!("incompatible pointer types ('{}' from '{}')", target, expr.ty),
                        span,
                    );
                }
                self.make_cast(target, expr, false, span)
            }
            (Type::Ptr(_), e) if e.is_integer() => {
                if expr.int_const() != Some(0) {
                    self.diagnostics.warning(
                        "initializing a pointer from an integer without a cast".to_string(),
                        span,
                    );
                }
                self.make_cast(target, expr, false, span)
            }
            (t, Type::Ptr(_)) if t.is_integer() => {
                self.diagnostics.warning(
                    "initializing an integer from a pointer without a cast".to_string(),
                    span,
                );
                self.make_cast(target, expr, false, span)
            }
            (Type::Struct(a), Type::Struct(b)) if std::rc::Rc::ptr_eq(a, b) => expr,
            _ => {
                self.sema_error(
                    format!("cannot convert '{}' to '{}'", expr.ty, target),
                    span,
                );
                expr
            }
        }
    }

    fn make_incdec(&mut self, op: IncDecOp, target: Expr, span: Span) -> Expr {
        if !target.is_lvalue() {
            self.sema_error("increment/decrement target is not an lvalue", span);
        }
        if !target.ty.is_scalar() {
            self.sema_error("increment/decrement requires a scalar operand", span);
        }
        let ty = target.ty.clone();
        Expr::new(ExprKind::IncDec { op, target: Box::new(target) }, ty, span)
    }

    fn make_ternary(&mut self, cond: Expr, then_expr: Expr, else_expr: Expr) -> Expr {
        let span = cond.span.combine(else_expr.span);
        let then_expr = self.decay(then_expr);
        let else_expr = self.decay(else_expr);

        let (then_expr, else_expr, ty) = if then_expr.ty.is_arith() && else_expr.ty.is_arith() {
            self.arith_convert(then_expr, else_expr)
        } else if then_expr.ty == else_expr.ty {
            let ty = then_expr.ty.clone();
            (then_expr, else_expr, ty)
        } else if then_expr.ty.is_ptr() && else_expr.ty.is_ptr() {
            // One side may be void*; the other's type wins.
            let ty = if then_expr.ty.pointee().map(|t| t.is_void()).unwrap_or(false) {
                else_expr.ty.clone()
            } else {
                then_expr.ty.clone()
            };
            let e1 = self.make_cast(ty.clone(), then_expr, false, span);
            let e2 = self.make_cast(ty.clone(), else_expr, false, span);
            (e1, e2, ty)
        } else {
            self.sema_error("incompatible operand types in conditional expression", span);
            let ty = then_expr.ty.clone();
            (then_expr, else_expr, ty)
        };

        if let ExprKind::IntLit(c) = cond.kind {
            return if c != 0 { then_expr } else { else_expr };
        }
        Expr::new(
            ExprKind::Ternary {
                cond: Box::new(cond),
                then_expr: Box::new(then_expr),
                else_expr: Box::new(else_expr),
            },
            ty,
            span,
        )
    }

    fn make_call(&mut self, callee: Expr, args: SmallVec<[Box<Expr>; 4]>, span: Span) -> Expr {
        let callee = self.decay(callee);
        let Some(sig) = callee.ty.callee_sig().cloned() else {
            self.sema_error("called object is not a function or function pointer", span);
            return Expr::new(ExprKind::IntLit(0), Type::plain_int(), span);
        };

        let mut converted: SmallVec<[Box<Expr>; 4]> = SmallVec::new();
        for (i, arg) in args.into_iter().enumerate() {
            let arg = self.decay(*arg);
            let arg = if let Some(param_ty) = sig.params.get(i) {
                self.convert_for_assign(param_ty.clone(), arg)
            } else if sig.varargs {
                // Default argument promotions in the variadic tail.
                match arg.ty.as_ref() {
                    Type::Float(FloatKind::F32) => {
                        self.make_cast(Type::float(FloatKind::F64), arg, false, span)
                    }
                    _ => self.promote(arg),
                }
            } else {
                self.sema_error(
                    format!("too many arguments to function call (expected {})", sig.params.len()),
                    span,
                );
                arg
            };
            converted.push(Box::new(arg));
        }
        if converted.len() < sig.params.len() {
            self.sema_error(
                format!(
                    "too few arguments to function call (expected {}, have {})",
                    sig.params.len(),
                    converted.len()
                ),
                span,
            );
        }

        let ty = sig.ret.clone();
        Expr::new(ExprKind::Call { callee: Box::new(callee), args: converted }, ty, span)
    }

    fn make_member(&mut self, base: Expr, name: &Spanned<String>, arrow: bool) -> Expr {
        let span = base.span.combine(name.span);
        let base = if arrow {
            let base = self.decay(base);
            self.make_deref(base, span)
        } else {
            base
        };

        let Some(def) = base.ty.as_struct().cloned() else {
            self.sema_error(
                format!("member access on non-struct type '{}'", base.ty),
                span,
            );
            return Expr::new(ExprKind::IntLit(0), Type::plain_int(), span);
        };
        let Some(member) = def.find_member(&name.value) else {
            self.sema_error(
                format!("no member named '{}' in '{}'", name.value, base.ty),
                name.span,
            );
            return Expr::new(ExprKind::IntLit(0), Type::plain_int(), span);
        };

        let ty = member.ty.clone();
        Expr::new(ExprKind::Member { base: Box::new(base), member }, ty, span)
    }

    /// An integer constant expression: parse and require a folded literal.
    pub(crate) fn const_int_expr(&mut self) -> SccResult<i64> {
        let expr = self.parse_ternary()?;
        match expr.kind {
            ExprKind::IntLit(value) => Ok(value),
            _ => {
                self.sema_error("expected an integer constant expression", expr.span);
                Ok(0)
            }
        }
    }
}
