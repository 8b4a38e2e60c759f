//! 递归下降 + Pratt 语法分析器
//!
//! 输入 token 流，输出 arena 形式的 [`Ast`]。遇到语法错误时记录一条
//! 诊断，跳到下一个 `;`、`}` 或顶层声明关键字后继续。

mod decl;
pub mod error;
mod expr;
mod stmt;
mod types;

pub use error::{ParseResult, ParserError, ParserErrorKind};

use crate::compiler::ast::{Ast, Ident};
use crate::compiler::lexer::{Lexer, LexerError, Token, TokenKind};
use crate::kit::{SourcePosition, SourceRange};

/// 一次解析的全部产出
#[derive(Debug, Clone, Default)]
pub struct ParseOutput {
    pub ast: Ast,
    pub lexer_errors: Vec<LexerError>,
    pub parser_errors: Vec<ParserError>,
}

impl ParseOutput {
    pub fn has_errors(&self) -> bool {
        !self.lexer_errors.is_empty() || !self.parser_errors.is_empty()
    }
}

/// 解析整个源文件
pub fn parse(source: &str, file: &str) -> ParseOutput {
    let (tokens, lexer_errors) = Lexer::new(source).tokenize();
    let mut parser = Parser::new(tokens, file);
    parser.parse_program();
    tracing::debug!(
        target: "smalls::parser",
        file,
        decls = parser.ast.items.len(),
        errors = parser.errors.len(),
        "parsed module"
    );
    ParseOutput {
        ast: parser.ast,
        lexer_errors,
        parser_errors: parser.errors,
    }
}

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    pub(crate) ast: Ast,
    pub(crate) errors: Vec<ParserError>,
    file: String,
    /// 当前所在函数名，用于 `__FUNCTION__`
    function_names: Vec<String>,
}

impl Parser {
    pub fn new(tokens: Vec<Token>, file: &str) -> Self {
        let mut tokens: Vec<Token> = tokens
            .into_iter()
            .filter(|t| t.kind != TokenKind::Comment)
            .collect();
        if tokens.last().map(|t| t.kind) != Some(TokenKind::Eof) {
            let end = tokens.last().map(|t| t.range.end).unwrap_or_default();
            tokens.push(Token::new(TokenKind::Eof, SourceRange::at(end), ""));
        }
        Self {
            tokens,
            pos: 0,
            ast: Ast::default(),
            errors: Vec::new(),
            file: file.to_string(),
            function_names: Vec::new(),
        }
    }

    /// 解析整个模块
    pub fn parse_program(&mut self) {
        while !self.check(TokenKind::Eof) {
            if self.match_token(TokenKind::Semicolon) {
                continue;
            }
            let before = self.pos;
            match self.parse_top_level() {
                Ok(id) => self.ast.items.push(id),
                Err(err) => {
                    self.report(err);
                    self.synchronize(true);
                }
            }
            if self.pos == before {
                self.advance();
            }
        }
    }

    pub fn into_ast(self) -> (Ast, Vec<ParserError>) {
        (self.ast, self.errors)
    }

    // ===== token 游标 =====

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> TokenKind {
        self.peek().kind
    }

    fn peek_nth(&self, n: usize) -> TokenKind {
        self.tokens
            .get(self.pos + n)
            .map(|t| t.kind)
            .unwrap_or(TokenKind::Eof)
    }

    fn advance(&mut self) -> Token {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    /// 检查当前token是否为指定类型
    fn check(&self, kind: TokenKind) -> bool {
        self.peek_kind() == kind
    }

    /// 匹配并消费指定类型的token
    fn match_token(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn current_text(&self) -> String {
        let tok = self.peek();
        if tok.kind == TokenKind::Eof {
            "end of file".to_string()
        } else if tok.text.is_empty() {
            format!("{:?}", tok.kind)
        } else {
            tok.text.clone()
        }
    }

    fn current_range(&self) -> SourceRange {
        self.peek().range
    }

    /// 上一个 token 的结束位置
    fn prev_end(&self) -> SourcePosition {
        if self.pos == 0 {
            return self.peek().range.start;
        }
        self.tokens[self.pos - 1].range.end
    }

    fn range_from(&self, start: SourcePosition) -> SourceRange {
        SourceRange::new(start, self.prev_end().max(start))
    }

    /// 创建带有当前位置的错误
    fn error_here(&self, kind: ParserErrorKind) -> ParserError {
        ParserError::new(kind, self.current_range())
    }

    /// 期望并消费指定类型的token，否则返回错误
    fn expect(&mut self, kind: TokenKind) -> ParseResult<Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.error_here(ParserErrorKind::UnexpectedToken {
                found: self.current_text(),
                expected: kind.describe().to_string(),
            }))
        }
    }

    /// 期望一个标识符
    fn expect_identifier(&mut self) -> ParseResult<Ident> {
        if self.check(TokenKind::Identifier) {
            let tok = self.advance();
            Ok(Ident {
                name: tok.text,
                range: tok.range,
            })
        } else {
            Err(self.error_here(ParserErrorKind::ExpectedIdentifier {
                found: self.current_text(),
            }))
        }
    }

    /// 解析模块路径（如 core.string）
    fn parse_module_path(&mut self) -> ParseResult<Vec<String>> {
        let mut path = vec![self.expect_identifier()?.name];
        while self.match_token(TokenKind::Dot) {
            path.push(self.expect_identifier()?.name);
        }
        Ok(path)
    }

    pub(crate) fn report(&mut self, err: ParserError) {
        tracing::debug!(target: "smalls::parser", "{}", err);
        self.errors.push(err);
    }

    /// 错误恢复：跳到下一个 `;`、`}` 或顶层声明关键字
    fn synchronize(&mut self, top_level: bool) {
        loop {
            match self.peek_kind() {
                TokenKind::Eof => return,
                TokenKind::Semicolon => {
                    self.advance();
                    return;
                }
                TokenKind::RightBrace => {
                    if top_level {
                        self.advance();
                    }
                    return;
                }
                kind if kind.starts_declaration() => return,
                _ => {
                    self.advance();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ast::*;

    fn parse_ok(src: &str) -> Ast {
        let out = parse(src, "test");
        assert!(
            !out.has_errors(),
            "unexpected errors: {:?} {:?}",
            out.lexer_errors,
            out.parser_errors
        );
        out.ast
    }

    fn first_function(ast: &Ast) -> &FunctionDefinition {
        ast.items
            .iter()
            .find_map(|id| match &ast.decl(*id).kind {
                DeclKind::Function(f) => Some(ast.function(*f)),
                _ => None,
            })
            .unwrap()
    }

    #[test]
    fn test_parse_function() {
        let ast = parse_ok("fn add(x: int, y: int): int { return x + y; }");
        let f = first_function(&ast);
        assert_eq!(f.name.name, "add");
        assert_eq!(f.params.len(), 2);
        assert!(f.body.is_some());
        assert!(f.ret.is_some());
    }

    #[test]
    fn test_grouped_params_and_extern() {
        let ast = parse_ok("[[native]] fn lerp(a, b: float, t: float): float;");
        let f = first_function(&ast);
        assert_eq!(f.params.len(), 3);
        assert!(f.body.is_none());
        assert_eq!(f.annotations[0].name, "native");
    }

    #[test]
    fn test_generic_params_collected() {
        let ast = parse_ok("fn pick(a: $T, b: array!($U)): $T { return a; }");
        let f = first_function(&ast);
        assert_eq!(f.generic_params, vec!["T".to_string(), "U".to_string()]);
    }

    #[test]
    fn test_type_declarations() {
        let ast = parse_ok(
            r#"
            type Point { x, y: float; name: string; };
            type Feat(int);
            type Gold = int;
            type Handle;
            type Shape = Circle(float) | Rect(float, float) | Empty;
            type Box!($T) { value: $T; };
            type Option!($T) = Some($T) | None;
            "#,
        );
        let kinds: Vec<&DeclKind> = ast.items.iter().map(|id| &ast.decl(*id).kind).collect();
        assert!(matches!(kinds[0], DeclKind::Struct(s) if s.fields.len() == 2));
        assert!(matches!(kinds[1], DeclKind::Newtype { .. }));
        assert!(matches!(kinds[2], DeclKind::Alias { .. }));
        assert!(matches!(kinds[3], DeclKind::Opaque { .. }));
        assert!(matches!(kinds[4], DeclKind::Sum(s) if s.variants.len() == 3 && s.variants[1].payload.len() == 2));
        assert!(matches!(kinds[5], DeclKind::Struct(s) if s.generic_params == vec!["T".to_string()]));
        assert!(matches!(kinds[6], DeclKind::Sum(s) if s.generic_params.len() == 1));
    }

    #[test]
    fn test_imports() {
        let ast = parse_ok("import core.string as S;\nfrom a.b import { x, y, };");
        assert!(matches!(
            &ast.decl(ast.items[0]).kind,
            DeclKind::AliasedImport { path, alias } if path.len() == 2 && alias.name == "S"
        ));
        assert!(matches!(
            &ast.decl(ast.items[1]).kind,
            DeclKind::SelectiveImport { names, .. } if names.len() == 2
        ));
    }

    #[test]
    fn test_type_forms() {
        let ast = parse_ok(
            "var a: map!(string, array!(int)); var b: int[4]; var c: (int, float); var d: fn(int): bool; var e: float[];",
        );
        assert_eq!(ast.items.len(), 5);
        let ty = |i: usize| match &ast.decl(ast.items[i]).kind {
            DeclKind::Var(v) => v.ty.clone().unwrap(),
            _ => panic!(),
        };
        assert!(matches!(ty(0).kind, TypeExprKind::Named { ref params, .. } if params.len() == 2));
        assert!(matches!(ty(1).kind, TypeExprKind::FixedArray { .. }));
        assert!(matches!(ty(2).kind, TypeExprKind::Tuple(ref items) if items.len() == 2));
        assert!(matches!(ty(3).kind, TypeExprKind::Function { .. }));
        assert!(matches!(ty(4).kind, TypeExprKind::DynArray(_)));
    }

    #[test]
    fn test_precedence() {
        let ast = parse_ok("var x = 1 + 2 * 3 << 1 == 14 && true;");
        let init = match &ast.decl(ast.items[0]).kind {
            DeclKind::Var(v) => v.inits[0],
            _ => panic!(),
        };
        // && 在最外层
        assert!(matches!(ast.expr(init).kind, ExprKind::Logical { op: LogicalOp::And, .. }));
    }

    #[test]
    fn test_cast_binds_tighter_than_multiply() {
        let ast = parse_ok("var x = a * b as float;");
        let init = match &ast.decl(ast.items[0]).kind {
            DeclKind::Var(v) => v.inits[0],
            _ => panic!(),
        };
        match &ast.expr(init).kind {
            ExprKind::Binary { op: BinaryOp::Mul, rhs, .. } => {
                assert!(matches!(ast.expr(*rhs).kind, ExprKind::Cast { .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_negative_literal_folding() {
        let ast = parse_ok("var x = -2147483648; var y = -z;");
        let init = |i: usize| match &ast.decl(ast.items[i]).kind {
            DeclKind::Var(v) => v.inits[0],
            _ => panic!(),
        };
        assert_eq!(ast.expr(init(0)).kind, ExprKind::Literal(Literal::Int(i32::MIN)));
        assert!(matches!(ast.expr(init(1)).kind, ExprKind::Unary { op: UnaryOp::Neg, .. }));
    }

    #[test]
    fn test_integer_out_of_range() {
        let out = parse("var x = 2147483648;", "test");
        assert_eq!(out.parser_errors.len(), 1);
        assert!(matches!(out.parser_errors[0].kind, ParserErrorKind::IntegerOutOfRange(_)));
    }

    #[test]
    fn test_statements() {
        let ast = parse_ok(
            r#"
            fn f(n: int): int {
                var t = 0;
                for (var i = 0; i < n; i += 1) { t += i; }
                for (t < 100) { t = t * 2; }
                for { break; }
                for (x in xs) { continue; }
                for (k, v: int in m) { }
                if (t > 1) { return 1; } elif (t < 0) { return 2; } else { return 3; }
            }
            "#,
        );
        let f = first_function(&ast);
        let body = match &ast.stmt(f.body.unwrap()).kind {
            StmtKind::Block(stmts) => stmts.clone(),
            _ => panic!(),
        };
        assert_eq!(body.len(), 7);
        assert!(matches!(ast.stmt(body[1]).kind, StmtKind::For { init: Some(_), .. }));
        assert!(matches!(ast.stmt(body[2]).kind, StmtKind::For { init: None, cond: Some(_), .. }));
        assert!(matches!(ast.stmt(body[3]).kind, StmtKind::For { cond: None, .. }));
        assert!(matches!(ast.stmt(body[4]).kind, StmtKind::ForEach { second: None, .. }));
        assert!(matches!(ast.stmt(body[5]).kind, StmtKind::ForEach { second: Some(_), .. }));
    }

    #[test]
    fn test_switch_patterns() {
        let ast = parse_ok(
            r#"
            fn f(r: Result): int {
                switch (r) {
                    case Ok(v) if v > 0: return v;
                    case Ok(v): return 0;
                    case Err: return -1;
                    default: return -2;
                }
            }
            "#,
        );
        let labels: Vec<&Stmt> = ast
            .stmts
            .iter()
            .filter(|s| matches!(s.kind, StmtKind::Label { .. }))
            .collect();
        assert_eq!(labels.len(), 4);
        assert!(matches!(
            &labels[0].kind,
            StmtKind::Label { kind: LabelKind::Pattern { bindings, .. }, guard: Some(_), .. } if bindings.len() == 1
        ));
        assert!(matches!(&labels[2].kind, StmtKind::Label { kind: LabelKind::Value(_), .. }));
        assert!(matches!(&labels[3].kind, StmtKind::Label { kind: LabelKind::Default, .. }));
    }

    #[test]
    fn test_brace_init_forms() {
        let ast = parse_ok(
            r#"var a = Point { x = 1, y = 2 }; var b = { "a": 1 }; var c = {1, 2, 3}; var d = Box!(int) { value = 1 };"#,
        );
        let kinds: Vec<BraceInitKind> = ast
            .exprs
            .iter()
            .filter_map(|e| match &e.kind {
                ExprKind::BraceInit { kind, .. } => Some(*kind),
                _ => None,
            })
            .collect();
        assert_eq!(
            kinds,
            vec![
                BraceInitKind::Field,
                BraceInitKind::KeyValue,
                BraceInitKind::List,
                BraceInitKind::Field
            ]
        );
    }

    #[test]
    fn test_fstring_and_closure() {
        let ast = parse_ok(r#"var s = f"v={x + 1}!"; var g = fn(a: int): int { return a; };"#);
        assert!(ast.exprs.iter().any(|e| matches!(&e.kind, ExprKind::FString(parts) if parts.len() == 3)));
        assert!(ast.functions.iter().any(|f| f.is_closure));
    }

    #[test]
    fn test_tuple_assignment_and_return() {
        let ast = parse_ok("fn swap(a: int, b: int): (int, int) { a, b = b, a; return a, b; }");
        assert!(ast.exprs.iter().any(|e| matches!(
            &e.kind,
            ExprKind::Assign { op: None, target, .. } if matches!(ast.expr(*target).kind, ExprKind::Tuple(_))
        )));
        assert!(ast
            .stmts
            .iter()
            .any(|s| matches!(&s.kind, StmtKind::Jump(JumpKind::Return(v)) if v.len() == 2)));
    }

    #[test]
    fn test_macros_expand() {
        let ast = parse_ok("fn f(): int {\n return __LINE__; }\nvar n = __FILE__;");
        assert!(ast
            .exprs
            .iter()
            .any(|e| e.kind == ExprKind::Literal(Literal::Int(2))));
        assert!(ast
            .exprs
            .iter()
            .any(|e| e.kind == ExprKind::Literal(Literal::String("test".into()))));
    }

    #[test]
    fn test_recovery_reports_each_error() {
        let out = parse(
            r#"
            fn a() { var x = ; }
            fn b() { return 1 }
            fn c(): int { return 3; }
            "#,
            "test",
        );
        assert_eq!(out.parser_errors.len(), 2);
        // 恢复后仍然解析出 c
        assert!(out.ast.functions.iter().any(|f| f.name.name == "c"));
    }
}
