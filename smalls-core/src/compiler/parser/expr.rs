//! 表达式解析（Pratt）
//!
//! 优先级从低到高：赋值 < 三元 < `||` < `&&` < 相等 < 关系 < `|` < `^`
//! < `&` < 移位 < 加减 < 乘除 < `as`/`is` < 前缀 < 后缀。

use super::{ParseResult, Parser, ParserError, ParserErrorKind};
use crate::compiler::ast::{
    BinaryOp, BraceInitKind, BraceItem, BraceKey, CompareOp, ExprId, ExprKind, FStringPart, Ident,
    Literal, LogicalOp, TypeExpr, TypeExprKind, UnaryOp,
};
use crate::compiler::lexer::{parse_float_literal, parse_integer_literal, TokenKind};
use crate::kit::{SourcePosition, SourceRange};

const PREC_OR: u8 = 3;
const PREC_CAST: u8 = 13;

#[derive(Clone, Copy)]
enum InfixOp {
    Arith(BinaryOp),
    Compare(CompareOp),
    Logical(LogicalOp),
    Cast,
    Check,
}

fn infix_info(kind: TokenKind) -> Option<(u8, InfixOp)> {
    let info = match kind {
        TokenKind::OrOr => (3, InfixOp::Logical(LogicalOp::Or)),
        TokenKind::AndAnd => (4, InfixOp::Logical(LogicalOp::And)),
        TokenKind::EqualEqual => (5, InfixOp::Compare(CompareOp::Eq)),
        TokenKind::NotEqual => (5, InfixOp::Compare(CompareOp::Ne)),
        TokenKind::Less => (6, InfixOp::Compare(CompareOp::Lt)),
        TokenKind::LessEqual => (6, InfixOp::Compare(CompareOp::Le)),
        TokenKind::Greater => (6, InfixOp::Compare(CompareOp::Gt)),
        TokenKind::GreaterEqual => (6, InfixOp::Compare(CompareOp::Ge)),
        TokenKind::Pipe => (7, InfixOp::Arith(BinaryOp::BitOr)),
        TokenKind::Caret => (8, InfixOp::Arith(BinaryOp::BitXor)),
        TokenKind::Amp => (9, InfixOp::Arith(BinaryOp::BitAnd)),
        TokenKind::ShiftLeft => (10, InfixOp::Arith(BinaryOp::Shl)),
        TokenKind::ShiftRight => (10, InfixOp::Arith(BinaryOp::Shr)),
        TokenKind::Plus => (11, InfixOp::Arith(BinaryOp::Add)),
        TokenKind::Minus => (11, InfixOp::Arith(BinaryOp::Sub)),
        TokenKind::Star => (12, InfixOp::Arith(BinaryOp::Mul)),
        TokenKind::Slash => (12, InfixOp::Arith(BinaryOp::Div)),
        TokenKind::Percent => (12, InfixOp::Arith(BinaryOp::Mod)),
        TokenKind::As => (PREC_CAST, InfixOp::Cast),
        TokenKind::Is => (PREC_CAST, InfixOp::Check),
        _ => return None,
    };
    Some(info)
}

fn compound_op(kind: TokenKind) -> Option<BinaryOp> {
    let op = match kind {
        TokenKind::PlusEqual => BinaryOp::Add,
        TokenKind::MinusEqual => BinaryOp::Sub,
        TokenKind::StarEqual => BinaryOp::Mul,
        TokenKind::SlashEqual => BinaryOp::Div,
        TokenKind::PercentEqual => BinaryOp::Mod,
        TokenKind::AmpEqual => BinaryOp::BitAnd,
        TokenKind::PipeEqual => BinaryOp::BitOr,
        TokenKind::CaretEqual => BinaryOp::BitXor,
        TokenKind::ShiftLeftEqual => BinaryOp::Shl,
        TokenKind::ShiftRightEqual => BinaryOp::Shr,
        _ => return None,
    };
    Some(op)
}

impl Parser {
    pub(crate) fn parse_expression(&mut self) -> ParseResult<ExprId> {
        let start = self.current_range().start;
        let target = self.parse_ternary()?;
        if !self.peek_kind().is_assignment() {
            return Ok(target);
        }
        let op = compound_op(self.advance().kind);
        self.check_assign_target(target)?;
        let value = self.parse_expression()?;
        Ok(self.ast.add_expr(
            ExprKind::Assign { op, target, value },
            self.range_from(start),
        ))
    }

    pub(crate) fn check_assign_target(&self, target: ExprId) -> ParseResult<()> {
        let expr = self.ast.expr(target);
        let ok = match &expr.kind {
            ExprKind::Identifier(_) | ExprKind::Path { .. } | ExprKind::Index { .. } => true,
            ExprKind::Tuple(items) => items.iter().all(|i| self.check_assign_target(*i).is_ok()),
            ExprKind::Grouping(inner) => self.check_assign_target(*inner).is_ok(),
            _ => false,
        };
        if ok {
            Ok(())
        } else {
            Err(ParserError::new(
                ParserErrorKind::InvalidAssignmentTarget,
                expr.range,
            ))
        }
    }

    pub(crate) fn parse_ternary(&mut self) -> ParseResult<ExprId> {
        let start = self.current_range().start;
        let cond = self.parse_binary(PREC_OR)?;
        if !self.match_token(TokenKind::Question) {
            return Ok(cond);
        }
        let then = self.parse_expression()?;
        self.expect(TokenKind::Colon)?;
        let otherwise = self.parse_ternary()?;
        Ok(self.ast.add_expr(
            ExprKind::Conditional {
                cond,
                then,
                otherwise,
            },
            self.range_from(start),
        ))
    }

    /// case 标签：不含三元与赋值，避免吞掉 `:`
    pub(crate) fn parse_label_expression(&mut self) -> ParseResult<ExprId> {
        self.parse_binary(PREC_OR)
    }

    fn parse_binary(&mut self, min_prec: u8) -> ParseResult<ExprId> {
        let start = self.current_range().start;
        let mut lhs = self.parse_unary()?;
        while let Some((prec, op)) = infix_info(self.peek_kind()) {
            if prec < min_prec {
                break;
            }
            self.advance();
            let kind = match op {
                InfixOp::Cast => ExprKind::Cast {
                    expr: lhs,
                    ty: self.parse_type()?,
                },
                InfixOp::Check => ExprKind::TypeCheck {
                    expr: lhs,
                    ty: self.parse_type()?,
                },
                InfixOp::Arith(op) => {
                    let rhs = self.parse_binary(prec + 1)?;
                    ExprKind::Binary { op, lhs, rhs }
                }
                InfixOp::Compare(op) => {
                    let rhs = self.parse_binary(prec + 1)?;
                    ExprKind::Comparison { op, lhs, rhs }
                }
                InfixOp::Logical(op) => {
                    let rhs = self.parse_binary(prec + 1)?;
                    ExprKind::Logical { op, lhs, rhs }
                }
            };
            lhs = self.ast.add_expr(kind, self.range_from(start));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> ParseResult<ExprId> {
        let start = self.current_range().start;
        let op = match self.peek_kind() {
            TokenKind::Minus => UnaryOp::Neg,
            TokenKind::Bang => UnaryOp::Not,
            TokenKind::Tilde => UnaryOp::BitNot,
            _ => {
                let primary = self.parse_primary()?;
                return self.parse_postfix(primary, start);
            }
        };
        self.advance();
        // `-<整数字面量>` 直接折叠，使 -2147483648 可以表示
        if op == UnaryOp::Neg && self.check(TokenKind::Integer) {
            let tok = self.advance();
            let value = self.integer_value(&tok.text, tok.range, true)?;
            let lit = self
                .ast
                .add_expr(ExprKind::Literal(Literal::Int(value)), self.range_from(start));
            return self.parse_postfix(lit, start);
        }
        let operand = self.parse_unary()?;
        Ok(self
            .ast
            .add_expr(ExprKind::Unary { op, operand }, self.range_from(start)))
    }

    fn integer_value(
        &self,
        text: &str,
        range: SourceRange,
        negated: bool,
    ) -> ParseResult<i32> {
        let raw = parse_integer_literal(text).ok_or_else(|| {
            ParserError::new(ParserErrorKind::InvalidNumberFormat(text.to_string()), range)
        })?;
        let radix_prefixed = text.len() > 2 && text.as_bytes()[0] == b'0' && text.as_bytes()[1].is_ascii_alphabetic();
        let value = if negated { -raw } else { raw };
        if value >= i32::MIN as i64 && value <= i32::MAX as i64 {
            return Ok(value as i32);
        }
        // 0xFFFFFFFF 这类位掩码按 32 位补码解释
        if radix_prefixed && !negated && raw <= u32::MAX as i64 {
            return Ok(raw as u32 as i32);
        }
        let shown = if negated {
            format!("-{}", text)
        } else {
            text.to_string()
        };
        Err(ParserError::new(ParserErrorKind::IntegerOutOfRange(shown), range))
    }

    fn parse_postfix(&mut self, mut expr: ExprId, start: SourcePosition) -> ParseResult<ExprId> {
        loop {
            let kind = match self.peek_kind() {
                TokenKind::LeftParen => {
                    self.advance();
                    let args = self.parse_arguments()?;
                    ExprKind::Call { callee: expr, args }
                }
                TokenKind::LeftBracket => {
                    self.advance();
                    let index = self.parse_expression()?;
                    self.expect(TokenKind::RightBracket)?;
                    ExprKind::Index {
                        target: expr,
                        index,
                    }
                }
                TokenKind::Dot => {
                    self.advance();
                    let member = self.expect_identifier()?;
                    ExprKind::Path { base: expr, member }
                }
                TokenKind::Bang if self.peek_nth(1) == TokenKind::LeftParen && self.is_name_expr(expr) => {
                    self.advance();
                    self.advance();
                    let args = self.parse_type_list(TokenKind::RightParen)?;
                    ExprKind::GenericInst { base: expr, args }
                }
                TokenKind::LeftBrace if self.allows_typed_brace(expr) => {
                    let ty = self.expr_to_type(expr);
                    self.advance();
                    return self.parse_brace_body(Some(ty), start);
                }
                _ => return Ok(expr),
            };
            expr = self.ast.add_expr(kind, self.range_from(start));
        }
    }

    fn parse_arguments(&mut self) -> ParseResult<Vec<ExprId>> {
        let mut args = Vec::new();
        while !self.check(TokenKind::RightParen) {
            args.push(self.parse_expression()?);
            if !self.match_token(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RightParen)?;
        Ok(args)
    }

    fn is_name_expr(&self, id: ExprId) -> bool {
        match &self.ast.expr(id).kind {
            ExprKind::Identifier(_) => true,
            ExprKind::Path { base, .. } => self.is_name_expr(*base),
            _ => false,
        }
    }

    /// `Point {`、`geo.Point {`、`Box!(int) {` 是带类型的花括号初始化；
    /// 非泛型名字要求首字母大写，以免与语句块混淆
    fn allows_typed_brace(&self, id: ExprId) -> bool {
        match &self.ast.expr(id).kind {
            ExprKind::GenericInst { base, .. } => self.is_name_expr(*base),
            ExprKind::Identifier(name) => name.starts_with(|c: char| c.is_ascii_uppercase()),
            ExprKind::Path { member, .. } => {
                self.is_name_expr(id) && member.name.starts_with(|c: char| c.is_ascii_uppercase())
            }
            _ => false,
        }
    }

    fn name_path(&self, id: ExprId, out: &mut Vec<String>) {
        match &self.ast.expr(id).kind {
            ExprKind::Identifier(name) => out.push(name.clone()),
            ExprKind::Path { base, member } => {
                self.name_path(*base, out);
                out.push(member.name.clone());
            }
            _ => {}
        }
    }

    fn expr_to_type(&self, id: ExprId) -> TypeExpr {
        let expr = self.ast.expr(id);
        let (base, params) = match &expr.kind {
            ExprKind::GenericInst { base, args } => (*base, args.clone()),
            _ => (id, Vec::new()),
        };
        let mut path = Vec::new();
        self.name_path(base, &mut path);
        TypeExpr {
            range: expr.range,
            kind: TypeExprKind::Named { path, params },
        }
    }

    /// `{` 已消费
    fn parse_brace_body(&mut self, ty: Option<TypeExpr>, start: SourcePosition) -> ParseResult<ExprId> {
        let mut items = Vec::new();
        let mut kind = BraceInitKind::List;
        if self.check(TokenKind::Identifier) && self.peek_nth(1) == TokenKind::Equal {
            kind = BraceInitKind::Field;
        }
        let mut first = true;
        while !self.check(TokenKind::RightBrace) {
            match kind {
                BraceInitKind::Field => {
                    let name = self.expect_identifier()?;
                    self.expect(TokenKind::Equal)?;
                    let value = self.parse_expression()?;
                    items.push(BraceItem {
                        key: Some(BraceKey::Field(name)),
                        value,
                    });
                }
                _ => {
                    let value = self.parse_expression()?;
                    if first && self.check(TokenKind::Colon) {
                        kind = BraceInitKind::KeyValue;
                    }
                    if kind == BraceInitKind::KeyValue {
                        self.expect(TokenKind::Colon)?;
                        let v = self.parse_expression()?;
                        items.push(BraceItem {
                            key: Some(BraceKey::Expr(value)),
                            value: v,
                        });
                    } else {
                        items.push(BraceItem { key: None, value });
                    }
                }
            }
            first = false;
            if !self.match_token(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RightBrace)?;
        Ok(self
            .ast
            .add_expr(ExprKind::BraceInit { ty, kind, items }, self.range_from(start)))
    }

    fn parse_primary(&mut self) -> ParseResult<ExprId> {
        let start = self.current_range().start;
        let tok = self.advance();
        let kind = match tok.kind {
            TokenKind::Integer => {
                ExprKind::Literal(Literal::Int(self.integer_value(&tok.text, tok.range, false)?))
            }
            TokenKind::Float => match parse_float_literal(&tok.text) {
                Some(v) => ExprKind::Literal(Literal::Float(v)),
                None => {
                    return Err(ParserError::new(
                        ParserErrorKind::InvalidNumberFormat(tok.text),
                        tok.range,
                    ))
                }
            },
            TokenKind::True => ExprKind::Literal(Literal::Bool(true)),
            TokenKind::False => ExprKind::Literal(Literal::Bool(false)),
            TokenKind::String | TokenKind::RawString => ExprKind::Literal(Literal::String(tok.text)),
            TokenKind::FStringOpen => ExprKind::FString(self.parse_fstring_parts()?),
            TokenKind::Identifier => ExprKind::Identifier(tok.text),
            TokenKind::MacroFile => ExprKind::Literal(Literal::String(self.file.clone())),
            TokenKind::MacroLine => ExprKind::Literal(Literal::Int(tok.range.start.line as i32)),
            TokenKind::MacroFunction => ExprKind::Literal(Literal::String(
                self.function_names.last().cloned().unwrap_or_default(),
            )),
            TokenKind::MacroDate => ExprKind::Literal(Literal::String(build_stamp().0)),
            TokenKind::MacroTime => ExprKind::Literal(Literal::String(build_stamp().1)),
            TokenKind::LeftParen => {
                let first = self.parse_expression()?;
                if self.check(TokenKind::Comma) {
                    let mut items = vec![first];
                    while self.match_token(TokenKind::Comma) {
                        if self.check(TokenKind::RightParen) {
                            break;
                        }
                        items.push(self.parse_expression()?);
                    }
                    self.expect(TokenKind::RightParen)?;
                    ExprKind::Tuple(items)
                } else {
                    self.expect(TokenKind::RightParen)?;
                    ExprKind::Grouping(first)
                }
            }
            TokenKind::LeftBrace => return self.parse_brace_body(None, start),
            TokenKind::Fn => {
                let id = self.parse_function(Vec::new(), true, start)?;
                ExprKind::Closure(id)
            }
            _ => {
                let found = if tok.kind == TokenKind::Eof {
                    "end of file".to_string()
                } else {
                    tok.text.clone()
                };
                return Err(ParserError::new(
                    ParserErrorKind::ExpectedExpression { found },
                    tok.range,
                ));
            }
        };
        Ok(self.ast.add_expr(kind, self.range_from(start)))
    }

    /// f-string 片段，`f"` 已消费
    fn parse_fstring_parts(&mut self) -> ParseResult<Vec<FStringPart>> {
        let mut parts = Vec::new();
        loop {
            match self.peek_kind() {
                TokenKind::FStringText => {
                    let tok = self.advance();
                    parts.push(FStringPart::Text(tok.text));
                }
                TokenKind::FStringExprStart => {
                    self.advance();
                    let expr = self.parse_expression()?;
                    self.expect(TokenKind::FStringExprEnd)?;
                    parts.push(FStringPart::Expr(expr));
                }
                TokenKind::FStringClose => {
                    self.advance();
                    return Ok(parts);
                }
                _ => {
                    return Err(self.error_here(ParserErrorKind::UnexpectedToken {
                        found: self.current_text(),
                        expected: "end of f-string".into(),
                    }))
                }
            }
        }
    }

    /// 逗号分隔的表达式列表（用于多目标赋值左侧）
    pub(crate) fn make_tuple(&mut self, items: Vec<ExprId>, start: SourcePosition) -> ExprId {
        self.ast.add_expr(ExprKind::Tuple(items), self.range_from(start))
    }

    pub(crate) fn ident_of(&self, id: ExprId) -> Option<Ident> {
        match &self.ast.expr(id).kind {
            ExprKind::Identifier(name) => Some(Ident {
                name: name.clone(),
                range: self.ast.expr(id).range,
            }),
            _ => None,
        }
    }
}

/// `__DATE__` / `__TIME__`：编译时刻（UTC），格式为 "Mmm dd yyyy" 与 "hh:mm:ss"
fn build_stamp() -> (String, String) {
    const MONTHS: [&str; 12] = [
        "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
    ];
    let secs = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    let days = secs.div_euclid(86_400);
    let rem = secs.rem_euclid(86_400);
    // 公历换算
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe + era * 400 + i64::from(month <= 2);
    let date = format!("{} {:2} {}", MONTHS[(month - 1) as usize], day, year);
    let time = format!("{:02}:{:02}:{:02}", rem / 3600, rem % 3600 / 60, rem % 60);
    (date, time)
}

#[cfg(test)]
mod tests {
    use super::build_stamp;

    #[test]
    fn test_build_stamp_shape() {
        let (date, time) = build_stamp();
        assert_eq!(date.len(), 11);
        assert_eq!(time.len(), 8);
        assert_eq!(&time[2..3], ":");
    }
}
