//! Statement parsing

use crate::ast::{Expr, Stmt, StmtKind};
use crate::parser::SwitchCtx;
use crate::scope::ScopeKind;
use crate::Parser;
use scc_common::{SccError, SccResult, Span};
use scc_lexer::TokenKind;

impl Parser {
    /// A brace-enclosed block with its own scope.
    pub(crate) fn parse_block(&mut self) -> SccResult<Stmt> {
        let start = self.cur_span();
        self.expect(TokenKind::LBrace)?;
        let scope = self.enter_scope(ScopeKind::Block);

        let mut stmts = Vec::new();
        while !self.check(&TokenKind::RBrace) && !self.at_eof() {
            match self.parse_block_item() {
                Ok(stmt) => stmts.push(stmt),
                Err(_) => self.recover_in_block(),
            }
        }

        let result = self.expect(TokenKind::RBrace);
        self.leave_scope();
        result?;

        let span = start.combine(self.prev_span());
        Ok(Stmt { kind: StmtKind::Block { scope, stmts }, span })
    }

    fn parse_block_item(&mut self) -> SccResult<Stmt> {
        if self.at_declaration() {
            self.parse_declaration_stmt()
        } else {
            self.parse_statement()
        }
    }

    /// Skip to the end of the broken statement: past the next `;`, or up to
    /// the enclosing `}`.
    fn recover_in_block(&mut self) {
        while !self.at_eof() {
            match self.peek_kind() {
                TokenKind::Semicolon => {
                    self.advance();
                    return;
                }
                TokenKind::RBrace => return,
                TokenKind::LBrace => {
                    // Skip a nested block wholesale.
                    let mut depth = 0i32;
                    while !self.at_eof() {
                        match self.peek_kind() {
                            TokenKind::LBrace => depth += 1,
                            TokenKind::RBrace => {
                                depth -= 1;
                                if depth == 0 {
                                    self.advance();
                                    return;
                                }
                            }
                            _ => {}
                        }
                        self.advance();
                    }
                }
                _ => {
                    self.advance();
                }
            }
        }
    }

    pub(crate) fn parse_statement(&mut self) -> SccResult<Stmt> {
        let start = self.cur_span();
        match self.peek_kind().clone() {
            TokenKind::LBrace => self.parse_block(),
            TokenKind::Semicolon => {
                self.advance();
                Ok(Stmt { kind: StmtKind::Empty, span: start })
            }
            TokenKind::KwIf => self.parse_if(start),
            TokenKind::KwWhile => self.parse_while(start),
            TokenKind::KwDo => self.parse_do_while(start),
            TokenKind::KwFor => self.parse_for(start),
            TokenKind::KwSwitch => self.parse_switch(start),
            TokenKind::KwCase => self.parse_case(start),
            TokenKind::KwDefault => self.parse_default(start),
            TokenKind::KwBreak => {
                self.advance();
                self.expect(TokenKind::Semicolon)?;
                if self.loop_depth == 0 && self.switch_stack.is_empty() {
                    self.sema_error("'break' outside of a loop or switch", start);
                }
                Ok(Stmt { kind: StmtKind::Break, span: start })
            }
            TokenKind::KwContinue => {
                self.advance();
                self.expect(TokenKind::Semicolon)?;
                if self.loop_depth == 0 {
                    self.sema_error("'continue' outside of a loop", start);
                }
                Ok(Stmt { kind: StmtKind::Continue, span: start })
            }
            TokenKind::KwReturn => self.parse_return(start),
            TokenKind::KwGoto => {
                self.advance();
                let name = self.expect_ident()?;
                self.expect(TokenKind::Semicolon)?;
                self.gotos.push(name.clone());
                Ok(Stmt { kind: StmtKind::Goto(name.value), span: start })
            }
            TokenKind::KwAsm => {
                self.advance();
                self.expect(TokenKind::LParen)?;
                let text = match self.peek_kind().clone() {
                    TokenKind::StrLiteral(text) => {
                        self.advance();
                        text
                    }
                    other => {
                        return Err(self.syntax_error(format!(
                            "expected string literal in __asm, found '{}'",
                            other
                        )));
                    }
                };
                self.expect(TokenKind::RParen)?;
                self.expect(TokenKind::Semicolon)?;
                Ok(Stmt { kind: StmtKind::Asm(text), span: start })
            }
            TokenKind::Ident(name) if self.peek_at(1) == &TokenKind::Colon => {
                self.advance();
                self.advance();
                if !self.labels.insert(name.clone()) {
                    self.sema_error(format!("redefinition of label '{}'", name), start);
                }
                let body = self.parse_statement()?;
                Ok(Stmt {
                    kind: StmtKind::Label { name, body: Box::new(body) },
                    span: start,
                })
            }
            _ => {
                let expr = self.parse_expr()?;
                self.expect(TokenKind::Semicolon)?;
                let span = start.combine(self.prev_span());
                Ok(Stmt { kind: StmtKind::Expr(expr), span })
            }
        }
    }

    fn parse_paren_condition(&mut self) -> SccResult<Expr> {
        self.expect(TokenKind::LParen)?;
        let cond = self.parse_expr()?;
        self.expect(TokenKind::RParen)?;
        Ok(self.make_condition(cond))
    }

    fn parse_if(&mut self, start: Span) -> SccResult<Stmt> {
        self.advance();
        let cond = self.parse_paren_condition()?;
        let then_branch = Box::new(self.parse_statement()?);
        let else_branch = if self.eat(&TokenKind::KwElse) {
            Some(Box::new(self.parse_statement()?))
        } else {
            None
        };
        let span = start.combine(self.prev_span());
        Ok(Stmt { kind: StmtKind::If { cond, then_branch, else_branch }, span })
    }

    fn parse_while(&mut self, start: Span) -> SccResult<Stmt> {
        self.advance();
        let cond = self.parse_paren_condition()?;
        let body = Box::new(self.parse_loop_body()?);
        let span = start.combine(self.prev_span());
        Ok(Stmt { kind: StmtKind::While { cond, body }, span })
    }

    fn parse_do_while(&mut self, start: Span) -> SccResult<Stmt> {
        self.advance();
        let body = Box::new(self.parse_loop_body()?);
        self.expect(TokenKind::KwWhile)?;
        let cond = self.parse_paren_condition()?;
        self.expect(TokenKind::Semicolon)?;
        let span = start.combine(self.prev_span());
        Ok(Stmt { kind: StmtKind::DoWhile { body, cond }, span })
    }

    fn parse_for(&mut self, start: Span) -> SccResult<Stmt> {
        self.advance();
        self.expect(TokenKind::LParen)?;
        // The whole statement gets a scope so a declaration in the
        // pre-clause is visible in the condition, step and body.
        let scope = self.enter_scope(ScopeKind::Block);

        let result = (|| {
            let pre = if self.eat(&TokenKind::Semicolon) {
                None
            } else if self.at_declaration() {
                Some(Box::new(self.parse_declaration_stmt()?))
            } else {
                let expr = self.parse_expr()?;
                let span = expr.span;
                self.expect(TokenKind::Semicolon)?;
                Some(Box::new(Stmt { kind: StmtKind::Expr(expr), span }))
            };

            let cond = if self.check(&TokenKind::Semicolon) {
                None
            } else {
                let cond = self.parse_expr()?;
                Some(self.make_condition(cond))
            };
            self.expect(TokenKind::Semicolon)?;

            let post = if self.check(&TokenKind::RParen) {
                None
            } else {
                Some(self.parse_expr()?)
            };
            self.expect(TokenKind::RParen)?;

            let body = Box::new(self.parse_loop_body()?);
            Ok((pre, cond, post, body))
        })();

        self.leave_scope();
        let (pre, cond, post, body) = result?;
        let span = start.combine(self.prev_span());
        Ok(Stmt { kind: StmtKind::For { scope, pre, cond, post, body }, span })
    }

    fn parse_loop_body(&mut self) -> SccResult<Stmt> {
        self.loop_depth += 1;
        let body = self.parse_statement();
        self.loop_depth -= 1;
        body
    }

    fn parse_switch(&mut self, start: Span) -> SccResult<Stmt> {
        self.advance();
        self.expect(TokenKind::LParen)?;
        let value = self.parse_expr()?;
        let value = self.decay(value);
        if !value.ty.is_integer() {
            self.sema_error("switch condition must have integer type", value.span);
        }
        let value = self.promote(value);
        self.expect(TokenKind::RParen)?;

        self.switch_stack.push(SwitchCtx { cases: Vec::new(), has_default: false });
        let body = self.parse_statement();
        let ctx = self
            .switch_stack
            .pop()
            .ok_or_else(|| SccError::internal_error("switch context disappeared"))?;
        let body = Box::new(body?);

        let span = start.combine(self.prev_span());
        Ok(Stmt {
            kind: StmtKind::Switch { value, body, cases: ctx.cases, has_default: ctx.has_default },
            span,
        })
    }

    fn parse_case(&mut self, start: Span) -> SccResult<Stmt> {
        self.advance();
        let value = self.const_int_expr()?;
        self.expect(TokenKind::Colon)?;

        let mut duplicate = false;
        let mut outside = false;
        match self.switch_stack.last_mut() {
            Some(ctx) if ctx.cases.contains(&value) => duplicate = true,
            Some(ctx) => ctx.cases.push(value),
            None => outside = true,
        }
        if duplicate {
            self.sema_error(format!("duplicate case value {}", value), start);
        } else if outside {
            self.sema_error("'case' outside of a switch", start);
        }

        let body = self.parse_statement()?;
        Ok(Stmt { kind: StmtKind::Case { value, body: Box::new(body) }, span: start })
    }

    fn parse_default(&mut self, start: Span) -> SccResult<Stmt> {
        self.advance();
        self.expect(TokenKind::Colon)?;

        let mut duplicate = false;
        let mut outside = false;
        match self.switch_stack.last_mut() {
            Some(ctx) if ctx.has_default => duplicate = true,
            Some(ctx) => ctx.has_default = true,
            None => outside = true,
        }
        if duplicate {
            self.sema_error("multiple default labels in one switch", start);
        } else if outside {
            self.sema_error("'default' outside of a switch", start);
        }

        let body = self.parse_statement()?;
        Ok(Stmt { kind: StmtKind::Default { body: Box::new(body) }, span: start })
    }

    fn parse_return(&mut self, start: Span) -> SccResult<Stmt> {
        self.advance();
        let ret_type = self.ret_type.clone();
        let value = if self.check(&TokenKind::Semicolon) {
            if let Some(ret) = &ret_type {
                if !ret.is_void() {
                    self.diagnostics.warning(
                        "non-void function should return a value".to_string(),
                        start,
                    );
                }
            }
            None
        } else {
            let expr = self.parse_expr()?;
            match ret_type {
                Some(ret) if ret.is_void() => {
                    self.sema_error("void function should not return a value", expr.span);
                    Some(expr)
                }
                Some(ret) => {
                    let expr = self.decay(expr);
                    Some(self.convert_for_assign(ret, expr))
                }
                None => Some(expr),
            }
        };
        self.expect(TokenKind::Semicolon)?;
        let span = start.combine(self.prev_span());
        Ok(Stmt { kind: StmtKind::Return(value), span })
    }
}
