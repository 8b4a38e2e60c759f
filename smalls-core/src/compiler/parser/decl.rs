//! 声明解析：函数、变量、类型、导入

use super::{ParseResult, Parser, ParserError, ParserErrorKind};
use crate::compiler::ast::{
    Annotation, AnnotationArg, Decl, DeclId, DeclKind, DeclList, FnId, FunctionDefinition, Ident,
    Param, StructDecl, SumDecl, TypeExpr, VarDecl, VariantDecl,
};
use crate::compiler::lexer::{parse_integer_literal, TokenKind};
use crate::kit::{SourcePosition, SourceRange};

impl Parser {
    pub(crate) fn parse_top_level(&mut self) -> ParseResult<DeclId> {
        let start = self.current_range().start;
        let annotations = self.parse_annotations()?;
        let kind = match self.peek_kind() {
            TokenKind::Fn => {
                self.advance();
                DeclKind::Function(self.parse_function(annotations.clone(), false, start)?)
            }
            TokenKind::Extern => {
                self.advance();
                self.expect(TokenKind::Fn)?;
                let id = self.parse_function(annotations.clone(), false, start)?;
                if self.ast.function(id).body.is_some() {
                    return Err(ParserError::new(
                        ParserErrorKind::MalformedDeclaration(
                            "extern function cannot have a body".into(),
                        ),
                        self.range_from(start),
                    ));
                }
                DeclKind::Function(id)
            }
            TokenKind::Var | TokenKind::Const => DeclKind::Var(self.parse_var_decl()?),
            TokenKind::Type => self.parse_type_decl()?,
            TokenKind::Import => self.parse_import()?,
            TokenKind::From => self.parse_from_import()?,
            _ => {
                return Err(self.error_here(ParserErrorKind::UnexpectedToken {
                    found: self.current_text(),
                    expected: "declaration".into(),
                }))
            }
        };
        Ok(self.ast.add_decl(Decl {
            range: self.range_from(start),
            annotations,
            kind,
        }))
    }

    /// `[[name(args), other]]`，可以连续出现多组
    pub(crate) fn parse_annotations(&mut self) -> ParseResult<Vec<Annotation>> {
        let mut out = Vec::new();
        while self.check(TokenKind::AnnotationOpen) {
            self.advance();
            loop {
                let start = self.current_range().start;
                let name = self.expect_identifier()?;
                let mut args = Vec::new();
                if self.match_token(TokenKind::LeftParen) {
                    while !self.check(TokenKind::RightParen) {
                        let tok = self.advance();
                        let arg = match tok.kind {
                            TokenKind::Identifier => AnnotationArg::Ident(tok.text),
                            TokenKind::String | TokenKind::RawString => AnnotationArg::Str(tok.text),
                            TokenKind::Integer => match parse_integer_literal(&tok.text) {
                                Some(v) => AnnotationArg::Int(v),
                                None => {
                                    return Err(ParserError::new(
                                        ParserErrorKind::InvalidNumberFormat(tok.text),
                                        tok.range,
                                    ))
                                }
                            },
                            _ => {
                                return Err(ParserError::new(
                                    ParserErrorKind::UnexpectedToken {
                                        found: tok.text,
                                        expected: "annotation argument".into(),
                                    },
                                    tok.range,
                                ))
                            }
                        };
                        args.push(arg);
                        if !self.match_token(TokenKind::Comma) {
                            break;
                        }
                    }
                    self.expect(TokenKind::RightParen)?;
                }
                out.push(Annotation {
                    name: name.name,
                    args,
                    range: self.range_from(start),
                });
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
            self.expect(TokenKind::RightBracket)?;
            self.expect(TokenKind::RightBracket)?;
        }
        Ok(out)
    }

    /// `fn` 之后的部分。闭包没有名字且必须有函数体。
    pub(crate) fn parse_function(
        &mut self,
        annotations: Vec<Annotation>,
        is_closure: bool,
        start: SourcePosition,
    ) -> ParseResult<FnId> {
        let name = if is_closure {
            Ident {
                name: "<closure>".into(),
                range: SourceRange::at(start),
            }
        } else {
            self.expect_identifier()?
        };
        // 允许显式写出 `fn max!($T)(...)`，参数仍以签名为准
        let declared = self.parse_generic_param_decl()?;
        self.expect(TokenKind::LeftParen)?;
        let params = self.parse_params()?;
        let ret = if self.match_token(TokenKind::Colon) || self.match_token(TokenKind::Arrow) {
            Some(self.parse_type()?)
        } else {
            None
        };

        let mut generic_params = declared;
        for p in &params {
            p.ty.collect_params(&mut generic_params);
        }
        if let Some(ret) = &ret {
            ret.collect_params(&mut generic_params);
        }

        let body = if !is_closure && self.match_token(TokenKind::Semicolon) {
            None
        } else {
            self.function_names.push(name.name.clone());
            let body = self.parse_block();
            self.function_names.pop();
            Some(body?)
        };

        Ok(self.ast.add_function(FunctionDefinition {
            name,
            params,
            ret,
            body,
            annotations,
            range: self.range_from(start),
            generic_params,
            is_closure,
        }))
    }

    /// 形参列表，`(` 已消费。`a, b: int` 中的 a、b 共享类型。
    fn parse_params(&mut self) -> ParseResult<Vec<Param>> {
        let mut params = Vec::new();
        let mut pending: Vec<Ident> = Vec::new();
        while !self.check(TokenKind::RightParen) {
            pending.push(self.expect_identifier()?);
            if self.match_token(TokenKind::Colon) {
                let ty = self.parse_type()?;
                for name in pending.drain(..) {
                    params.push(Param {
                        name,
                        ty: ty.clone(),
                    });
                }
            }
            if !self.match_token(TokenKind::Comma) {
                break;
            }
        }
        if let Some(name) = pending.first() {
            return Err(ParserError::new(
                ParserErrorKind::MalformedDeclaration(format!(
                    "parameter '{}' has no type",
                    name.name
                )),
                name.range,
            ));
        }
        self.expect(TokenKind::RightParen)?;
        Ok(params)
    }

    /// `var a, b: T = x, y;`，消费结尾分号
    pub(crate) fn parse_var_decl(&mut self) -> ParseResult<VarDecl> {
        let is_const = self.advance().kind == TokenKind::Const;
        let mut names = vec![self.expect_identifier()?];
        while self.match_token(TokenKind::Comma) {
            names.push(self.expect_identifier()?);
        }
        let ty = if self.match_token(TokenKind::Colon) {
            Some(self.parse_type()?)
        } else {
            None
        };
        let mut inits = Vec::new();
        if self.match_token(TokenKind::Equal) {
            inits.push(self.parse_expression()?);
            while self.match_token(TokenKind::Comma) {
                inits.push(self.parse_expression()?);
            }
        }
        self.expect(TokenKind::Semicolon)?;
        Ok(VarDecl {
            is_const,
            names,
            ty,
            inits,
        })
    }

    fn parse_type_decl(&mut self) -> ParseResult<DeclKind> {
        self.expect(TokenKind::Type)?;
        let name = self.expect_identifier()?;
        let generic_params = self.parse_generic_param_decl()?;

        let kind = match self.peek_kind() {
            TokenKind::LeftBrace => {
                self.advance();
                let fields = self.parse_struct_fields()?;
                self.match_token(TokenKind::Semicolon);
                return Ok(DeclKind::Struct(StructDecl {
                    name,
                    generic_params,
                    fields,
                }));
            }
            TokenKind::LeftParen => {
                self.advance();
                let wrapped = self.parse_type()?;
                self.expect(TokenKind::RightParen)?;
                DeclKind::Newtype {
                    name,
                    generic_params,
                    wrapped,
                }
            }
            TokenKind::Equal => {
                self.advance();
                let is_sum = self.check(TokenKind::Identifier)
                    && matches!(self.peek_nth(1), TokenKind::LeftParen | TokenKind::Pipe);
                if is_sum {
                    DeclKind::Sum(SumDecl {
                        name,
                        generic_params,
                        variants: self.parse_variants()?,
                    })
                } else {
                    DeclKind::Alias {
                        name,
                        generic_params,
                        target: self.parse_type()?,
                    }
                }
            }
            TokenKind::Semicolon => DeclKind::Opaque { name },
            _ => {
                return Err(self.error_here(ParserErrorKind::MalformedDeclaration(format!(
                    "unexpected '{}' in type declaration",
                    self.current_text()
                ))))
            }
        };
        self.expect(TokenKind::Semicolon)?;
        Ok(kind)
    }

    fn parse_struct_fields(&mut self) -> ParseResult<Vec<DeclList>> {
        let mut fields = Vec::new();
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            let annotations = self.parse_annotations()?;
            let mut names = vec![self.expect_identifier()?];
            while self.match_token(TokenKind::Comma) {
                names.push(self.expect_identifier()?);
            }
            self.expect(TokenKind::Colon)?;
            let ty = self.parse_type()?;
            self.expect(TokenKind::Semicolon)?;
            fields.push(DeclList {
                names,
                ty,
                annotations,
            });
        }
        self.expect(TokenKind::RightBrace)?;
        Ok(fields)
    }

    fn parse_variants(&mut self) -> ParseResult<Vec<VariantDecl>> {
        let mut variants = Vec::new();
        loop {
            let name = self.expect_identifier()?;
            let payload: Vec<TypeExpr> = if self.match_token(TokenKind::LeftParen) {
                self.parse_type_list(TokenKind::RightParen)?
            } else {
                Vec::new()
            };
            variants.push(VariantDecl { name, payload });
            if !self.match_token(TokenKind::Pipe) {
                break;
            }
        }
        Ok(variants)
    }

    /// `import a.b as x;`，省略 alias 时取路径最后一段
    fn parse_import(&mut self) -> ParseResult<DeclKind> {
        self.expect(TokenKind::Import)?;
        let start = self.current_range();
        let path = self.parse_module_path()?;
        let alias = if self.match_token(TokenKind::As) {
            self.expect_identifier()?
        } else {
            Ident {
                name: path.last().cloned().unwrap_or_default(),
                range: start.merge(&SourceRange::at(self.prev_end())),
            }
        };
        self.expect(TokenKind::Semicolon)?;
        Ok(DeclKind::AliasedImport { path, alias })
    }

    /// `from a.b import { x, y, };`
    fn parse_from_import(&mut self) -> ParseResult<DeclKind> {
        self.expect(TokenKind::From)?;
        let path = self.parse_module_path()?;
        self.expect(TokenKind::Import)?;
        let braced = self.match_token(TokenKind::LeftBrace);
        let mut names = Vec::new();
        loop {
            if braced && self.check(TokenKind::RightBrace) {
                break;
            }
            names.push(self.expect_identifier()?);
            if !self.match_token(TokenKind::Comma) {
                break;
            }
        }
        if braced {
            self.expect(TokenKind::RightBrace)?;
        }
        self.expect(TokenKind::Semicolon)?;
        Ok(DeclKind::SelectiveImport { path, names })
    }
}
