//! 类型表达式解析

use super::{ParseResult, Parser, ParserErrorKind};
use crate::compiler::ast::{TypeExpr, TypeExprKind};
use crate::compiler::lexer::TokenKind;

impl Parser {
    /// 解析类型表达式，含 `T[N]` / `T[]` 后缀
    pub(crate) fn parse_type(&mut self) -> ParseResult<TypeExpr> {
        let start = self.current_range().start;
        let mut ty = self.parse_type_atom()?;
        while self.check(TokenKind::LeftBracket) {
            self.advance();
            if self.match_token(TokenKind::RightBracket) {
                ty = TypeExpr {
                    range: self.range_from(start),
                    kind: TypeExprKind::DynArray(Box::new(ty)),
                };
            } else {
                let size = self.parse_expression()?;
                self.expect(TokenKind::RightBracket)?;
                ty = TypeExpr {
                    range: self.range_from(start),
                    kind: TypeExprKind::FixedArray {
                        elem: Box::new(ty),
                        size,
                    },
                };
            }
        }
        Ok(ty)
    }

    fn parse_type_atom(&mut self) -> ParseResult<TypeExpr> {
        let start = self.current_range().start;
        match self.peek_kind() {
            TokenKind::Dollar => {
                self.advance();
                let name = self.expect_identifier()?;
                Ok(TypeExpr {
                    range: self.range_from(start),
                    kind: TypeExprKind::Param(name.name),
                })
            }
            TokenKind::LeftParen => {
                self.advance();
                let mut items = vec![self.parse_type()?];
                let mut trailing = false;
                while self.match_token(TokenKind::Comma) {
                    if self.check(TokenKind::RightParen) {
                        trailing = true;
                        break;
                    }
                    items.push(self.parse_type()?);
                }
                self.expect(TokenKind::RightParen)?;
                if items.len() == 1 && !trailing {
                    return Ok(items.remove(0));
                }
                Ok(TypeExpr {
                    range: self.range_from(start),
                    kind: TypeExprKind::Tuple(items),
                })
            }
            TokenKind::Fn => {
                self.advance();
                self.expect(TokenKind::LeftParen)?;
                let params = self.parse_type_list(TokenKind::RightParen)?;
                let ret = if self.match_token(TokenKind::Colon) || self.match_token(TokenKind::Arrow) {
                    Some(Box::new(self.parse_type()?))
                } else {
                    None
                };
                Ok(TypeExpr {
                    range: self.range_from(start),
                    kind: TypeExprKind::Function { params, ret },
                })
            }
            TokenKind::Identifier => {
                let path = self.parse_module_path()?;
                let params = if self.check(TokenKind::Bang) && self.peek_nth(1) == TokenKind::LeftParen {
                    self.advance();
                    self.advance();
                    self.parse_type_list(TokenKind::RightParen)?
                } else {
                    Vec::new()
                };
                Ok(TypeExpr {
                    range: self.range_from(start),
                    kind: TypeExprKind::Named { path, params },
                })
            }
            _ => Err(self.error_here(ParserErrorKind::ExpectedType {
                found: self.current_text(),
            })),
        }
    }

    /// 逗号分隔的类型列表，消费结束符
    pub(crate) fn parse_type_list(&mut self, close: TokenKind) -> ParseResult<Vec<TypeExpr>> {
        let mut items = Vec::new();
        while !self.check(close) {
            items.push(self.parse_type()?);
            if !self.match_token(TokenKind::Comma) {
                break;
            }
        }
        self.expect(close)?;
        Ok(items)
    }

    /// `!($T, $U)` 形式的泛型形参声明
    pub(crate) fn parse_generic_param_decl(&mut self) -> ParseResult<Vec<String>> {
        let mut names = Vec::new();
        if !(self.check(TokenKind::Bang) && self.peek_nth(1) == TokenKind::LeftParen) {
            return Ok(names);
        }
        self.advance();
        self.advance();
        while !self.check(TokenKind::RightParen) {
            self.expect(TokenKind::Dollar)?;
            names.push(self.expect_identifier()?.name);
            if !self.match_token(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RightParen)?;
        Ok(names)
    }
}
