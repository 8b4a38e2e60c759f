//! 语句解析

use super::{ParseResult, Parser, ParserErrorKind};
use crate::compiler::ast::{
    Decl, DeclKind, ExprId, ExprKind, ForBinder, JumpKind, LabelKind, StmtId, StmtKind,
};
use crate::compiler::lexer::TokenKind;
use crate::kit::SourcePosition;

impl Parser {
    /// `{ ... }`，块内错误就地恢复
    pub(crate) fn parse_block(&mut self) -> ParseResult<StmtId> {
        let start = self.current_range().start;
        self.expect(TokenKind::LeftBrace)?;
        let mut stmts = Vec::new();
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            let before = self.pos;
            match self.parse_statement() {
                Ok(id) => stmts.push(id),
                Err(err) => {
                    self.report(err);
                    self.synchronize(false);
                    if self.peek_kind().starts_declaration() && !self.check(TokenKind::Fn) {
                        break;
                    }
                }
            }
            if self.pos == before {
                self.advance();
            }
        }
        self.expect(TokenKind::RightBrace)?;
        Ok(self.ast.add_stmt(StmtKind::Block(stmts), self.range_from(start)))
    }

    pub(crate) fn parse_statement(&mut self) -> ParseResult<StmtId> {
        let start = self.current_range().start;
        let kind = match self.peek_kind() {
            TokenKind::LeftBrace => return self.parse_block(),
            TokenKind::Var | TokenKind::Const => {
                let var = self.parse_var_decl()?;
                let decl = self.ast.add_decl(Decl {
                    range: self.range_from(start),
                    annotations: Vec::new(),
                    kind: DeclKind::Var(var),
                });
                StmtKind::Decl(decl)
            }
            TokenKind::If => {
                self.advance();
                return self.parse_if_tail(start);
            }
            TokenKind::For => {
                self.advance();
                return self.parse_for(start);
            }
            TokenKind::Switch => {
                self.advance();
                return self.parse_switch(start);
            }
            TokenKind::Break => {
                self.advance();
                self.expect(TokenKind::Semicolon)?;
                StmtKind::Jump(JumpKind::Break)
            }
            TokenKind::Continue => {
                self.advance();
                self.expect(TokenKind::Semicolon)?;
                StmtKind::Jump(JumpKind::Continue)
            }
            TokenKind::Return => {
                self.advance();
                let mut values = Vec::new();
                if !self.check(TokenKind::Semicolon) {
                    values.push(self.parse_expression()?);
                    while self.match_token(TokenKind::Comma) {
                        values.push(self.parse_expression()?);
                    }
                }
                self.expect(TokenKind::Semicolon)?;
                StmtKind::Jump(JumpKind::Return(values))
            }
            TokenKind::Semicolon => {
                self.advance();
                StmtKind::Empty
            }
            _ => {
                let expr = self.parse_expression_statement()?;
                self.expect(TokenKind::Semicolon)?;
                StmtKind::Expr(expr)
            }
        };
        Ok(self.ast.add_stmt(kind, self.range_from(start)))
    }

    /// 支持 `a, b = b, a` 形式的多目标赋值
    fn parse_expression_statement(&mut self) -> ParseResult<ExprId> {
        let start = self.current_range().start;
        let first = self.parse_expression()?;
        if !self.check(TokenKind::Comma) {
            return Ok(first);
        }
        let mut targets = vec![first];
        while self.match_token(TokenKind::Comma) {
            targets.push(self.parse_ternary()?);
        }
        let target = self.make_tuple(targets, start);
        self.check_assign_target(target)?;
        self.expect(TokenKind::Equal)?;
        let value_start = self.current_range().start;
        let mut values = vec![self.parse_expression()?];
        while self.match_token(TokenKind::Comma) {
            values.push(self.parse_expression()?);
        }
        let value = if values.len() == 1 {
            values[0]
        } else {
            self.make_tuple(values, value_start)
        };
        Ok(self.ast.add_expr(
            ExprKind::Assign {
                op: None,
                target,
                value,
            },
            self.range_from(start),
        ))
    }

    /// `if` 已消费；`elif` 链展开为嵌套 if
    fn parse_if_tail(&mut self, start: SourcePosition) -> ParseResult<StmtId> {
        self.expect(TokenKind::LeftParen)?;
        let cond = self.parse_expression()?;
        self.expect(TokenKind::RightParen)?;
        let then = self.parse_statement()?;
        let otherwise = if self.check(TokenKind::Elif) {
            let elif_start = self.current_range().start;
            self.advance();
            Some(self.parse_if_tail(elif_start)?)
        } else if self.match_token(TokenKind::Else) {
            Some(self.parse_statement()?)
        } else {
            None
        };
        Ok(self.ast.add_stmt(
            StmtKind::If {
                cond,
                then,
                otherwise,
            },
            self.range_from(start),
        ))
    }

    fn parse_for(&mut self, start: SourcePosition) -> ParseResult<StmtId> {
        if self.check(TokenKind::LeftBrace) {
            let body = self.parse_block()?;
            return Ok(self.ast.add_stmt(
                StmtKind::For {
                    init: None,
                    cond: None,
                    step: None,
                    body,
                },
                self.range_from(start),
            ));
        }
        self.expect(TokenKind::LeftParen)?;

        let is_foreach = self.check(TokenKind::Identifier)
            && matches!(
                self.peek_nth(1),
                TokenKind::In | TokenKind::Colon | TokenKind::Comma
            );
        if is_foreach {
            let first = self.parse_for_binder()?;
            let second = if self.match_token(TokenKind::Comma) {
                Some(self.parse_for_binder()?)
            } else {
                None
            };
            self.expect(TokenKind::In)?;
            let iterable = self.parse_expression()?;
            self.expect(TokenKind::RightParen)?;
            let body = self.parse_statement()?;
            return Ok(self.ast.add_stmt(
                StmtKind::ForEach {
                    first,
                    second,
                    iterable,
                    body,
                },
                self.range_from(start),
            ));
        }

        let init_start = self.current_range().start;
        let init = match self.peek_kind() {
            TokenKind::Var | TokenKind::Const => Some(self.parse_statement()?),
            TokenKind::Semicolon => {
                self.advance();
                None
            }
            _ => {
                let expr = self.parse_expression()?;
                if self.match_token(TokenKind::RightParen) {
                    // while 风格
                    let body = self.parse_statement()?;
                    return Ok(self.ast.add_stmt(
                        StmtKind::For {
                            init: None,
                            cond: Some(expr),
                            step: None,
                            body,
                        },
                        self.range_from(start),
                    ));
                }
                self.expect(TokenKind::Semicolon)?;
                Some(self.ast.add_stmt(StmtKind::Expr(expr), self.range_from(init_start)))
            }
        };
        let cond = if self.check(TokenKind::Semicolon) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect(TokenKind::Semicolon)?;
        let step = if self.check(TokenKind::RightParen) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect(TokenKind::RightParen)?;
        let body = self.parse_statement()?;
        Ok(self.ast.add_stmt(
            StmtKind::For {
                init,
                cond,
                step,
                body,
            },
            self.range_from(start),
        ))
    }

    fn parse_for_binder(&mut self) -> ParseResult<ForBinder> {
        let name = self.expect_identifier()?;
        let ty = if self.match_token(TokenKind::Colon) {
            Some(self.parse_type()?)
        } else {
            None
        };
        Ok(ForBinder { name, ty })
    }

    fn parse_switch(&mut self, start: SourcePosition) -> ParseResult<StmtId> {
        self.expect(TokenKind::LeftParen)?;
        let scrutinee = self.parse_expression()?;
        self.expect(TokenKind::RightParen)?;
        self.expect(TokenKind::LeftBrace)?;
        let mut cases = Vec::new();
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            cases.push(self.parse_label()?);
        }
        self.expect(TokenKind::RightBrace)?;
        Ok(self.ast.add_stmt(
            StmtKind::Switch { scrutinee, cases },
            self.range_from(start),
        ))
    }

    fn parse_label(&mut self) -> ParseResult<StmtId> {
        let start = self.current_range().start;
        let kind = if self.match_token(TokenKind::Default) {
            LabelKind::Default
        } else if self.match_token(TokenKind::Case) {
            let expr = self.parse_label_expression()?;
            self.label_kind(expr)
        } else {
            return Err(self.error_here(ParserErrorKind::UnexpectedToken {
                found: self.current_text(),
                expected: "'case' or 'default'".into(),
            }));
        };
        let guard = if self.match_token(TokenKind::If) {
            Some(self.parse_expression()?)
        } else {
            None
        };
        self.expect(TokenKind::Colon)?;
        let mut body = Vec::new();
        while !matches!(
            self.peek_kind(),
            TokenKind::Case | TokenKind::Default | TokenKind::RightBrace | TokenKind::Eof
        ) {
            let before = self.pos;
            match self.parse_statement() {
                Ok(id) => body.push(id),
                Err(err) => {
                    self.report(err);
                    self.synchronize(false);
                }
            }
            if self.pos == before {
                self.advance();
            }
        }
        Ok(self.ast.add_stmt(
            StmtKind::Label { kind, guard, body },
            self.range_from(start),
        ))
    }

    /// `Ctor(a, b)` 且实参全是标识符时视为模式，其余为等值标签
    fn label_kind(&self, expr: ExprId) -> LabelKind {
        if let ExprKind::Call { callee, args } = &self.ast.expr(expr).kind {
            let ctor_ok = matches!(
                self.ast.expr(*callee).kind,
                ExprKind::Identifier(_) | ExprKind::Path { .. }
            );
            let bindings: Option<Vec<_>> = args.iter().map(|a| self.ident_of(*a)).collect();
            if let (true, Some(bindings)) = (ctor_ok, bindings) {
                return LabelKind::Pattern {
                    ctor: *callee,
                    bindings,
                    expr,
                };
            }
        }
        LabelKind::Value(expr)
    }
}
