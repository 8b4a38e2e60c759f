//! Smalls 词法分析器
//!
//! 惰性产生 token 序列。f-string 被拆分为
//! `FStringOpen, FStringText, (FStringExprStart, ..., FStringExprEnd, FStringText)*, FStringClose`，
//! 内嵌表达式的 token 走普通语法。

pub mod error;
pub mod token;

pub use error::{LexErrorKind, LexerError};
pub use token::{Token, TokenKind};

use crate::kit::{SourcePosition, SourceRange};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Mode {
    /// f-string 文本区；`text_pending` 表示下一个 token 必须是文本片段
    FString { text_pending: bool },
    /// f-string 内嵌表达式，`depth` 为未闭合的 `{` 数量
    FStringExpr { depth: u32 },
}

/// 词法分析器
#[derive(Debug, Clone)]
pub struct Lexer<'a> {
    source: &'a str,
    pos: SourcePosition,
    modes: Vec<Mode>,
    pending: VecDeque<Token>,
    errors: Vec<LexerError>,
    finished: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            pos: SourcePosition::start(),
            modes: Vec::new(),
            pending: VecDeque::new(),
            errors: Vec::new(),
            finished: false,
        }
    }

    /// 从头重新扫描
    pub fn reset(&mut self) {
        self.pos = SourcePosition::start();
        self.modes.clear();
        self.pending.clear();
        self.errors.clear();
        self.finished = false;
    }

    /// 扫描过程中累积的词法错误
    pub fn errors(&self) -> &[LexerError] {
        &self.errors
    }

    pub fn take_errors(&mut self) -> Vec<LexerError> {
        std::mem::take(&mut self.errors)
    }

    /// 扫描全部 token（包含末尾的 Eof）
    pub fn tokenize(mut self) -> (Vec<Token>, Vec<LexerError>) {
        let tokens: Vec<Token> = self.by_ref().collect();
        (tokens, self.errors)
    }

    // ===== 字符流 =====

    fn rest(&self) -> &'a str {
        &self.source[self.pos.byte_offset as usize..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn peek_at(&self, n: usize) -> Option<char> {
        self.rest().chars().nth(n)
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos.advance(c);
        Some(c)
    }

    fn matches(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn range_from(&self, start: SourcePosition) -> SourceRange {
        SourceRange::new(start, self.pos)
    }

    fn error(&mut self, kind: LexErrorKind, start: SourcePosition) {
        let err = LexerError::at(kind, self.range_from(start));
        tracing::debug!(target: "smalls::lexer", "{}", err);
        self.errors.push(err);
    }

    fn make(&self, kind: TokenKind, start: SourcePosition) -> Token {
        let range = self.range_from(start);
        Token::new(kind, range, range.slice(self.source))
    }

    // ===== 扫描 =====

    fn scan(&mut self) -> Token {
        if let Some(Mode::FString { text_pending }) = self.modes.last().copied() {
            return self.scan_fstring_part(text_pending);
        }

        loop {
            self.skip_whitespace();
            let start = self.pos;
            let Some(c) = self.advance() else {
                if let Some(Mode::FStringExpr { .. }) = self.modes.last() {
                    // 表达式未闭合即到达文件尾
                    self.error(LexErrorKind::UnterminatedString, start);
                    self.modes.clear();
                }
                return self.make(TokenKind::Eof, start);
            };

            let kind = match c {
                '/' if self.matches('/') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.advance();
                    }
                    TokenKind::Comment
                }
                '/' if self.matches('*') => {
                    if self.skip_block_comment() {
                        TokenKind::Comment
                    } else {
                        self.error(LexErrorKind::UnterminatedComment, start);
                        TokenKind::Comment
                    }
                }
                '*' if self.peek() == Some('/') => {
                    self.advance();
                    self.error(LexErrorKind::StrayCommentClose, start);
                    continue;
                }
                '"' => return self.scan_string(start),
                'r' | 'R' if self.peek() == Some('"') => {
                    self.advance();
                    return self.scan_raw_string(start);
                }
                'f' if self.peek() == Some('"') => {
                    self.advance();
                    self.modes.push(Mode::FString { text_pending: true });
                    TokenKind::FStringOpen
                }
                c if c.is_ascii_digit() => return self.scan_number(start, c),
                c if c == '_' || c.is_alphabetic() => {
                    while let Some(c) = self.peek() {
                        if c == '_' || c.is_alphanumeric() {
                            self.advance();
                        } else {
                            break;
                        }
                    }
                    let text = self.range_from(start).slice(self.source);
                    TokenKind::keyword(text).unwrap_or(TokenKind::Identifier)
                }
                '{' => {
                    if let Some(Mode::FStringExpr { depth }) = self.modes.last_mut() {
                        *depth += 1;
                    }
                    TokenKind::LeftBrace
                }
                '}' => {
                    if let Some(Mode::FStringExpr { depth }) = self.modes.last_mut() {
                        if *depth == 0 {
                            self.modes.pop();
                            if let Some(Mode::FString { text_pending }) = self.modes.last_mut() {
                                *text_pending = true;
                            }
                            return self.make(TokenKind::FStringExprEnd, start);
                        }
                        *depth -= 1;
                    }
                    TokenKind::RightBrace
                }
                '(' => TokenKind::LeftParen,
                ')' => TokenKind::RightParen,
                '[' if self.matches('[') => TokenKind::AnnotationOpen,
                '[' => TokenKind::LeftBracket,
                ']' => TokenKind::RightBracket,
                ',' => TokenKind::Comma,
                ';' => TokenKind::Semicolon,
                ':' => TokenKind::Colon,
                '.' => TokenKind::Dot,
                '?' => TokenKind::Question,
                '$' => TokenKind::Dollar,
                '~' => TokenKind::Tilde,
                '!' if self.matches('=') => TokenKind::NotEqual,
                '!' => TokenKind::Bang,
                '=' if self.matches('=') => TokenKind::EqualEqual,
                '=' => TokenKind::Equal,
                '+' if self.matches('=') => TokenKind::PlusEqual,
                '+' => TokenKind::Plus,
                '-' if self.matches('>') => TokenKind::Arrow,
                '-' if self.matches('=') => TokenKind::MinusEqual,
                '-' => TokenKind::Minus,
                '*' if self.matches('=') => TokenKind::StarEqual,
                '*' => TokenKind::Star,
                '/' if self.matches('=') => TokenKind::SlashEqual,
                '/' => TokenKind::Slash,
                '%' if self.matches('=') => TokenKind::PercentEqual,
                '%' => TokenKind::Percent,
                '^' if self.matches('=') => TokenKind::CaretEqual,
                '^' => TokenKind::Caret,
                '&' if self.matches('&') => TokenKind::AndAnd,
                '&' if self.matches('=') => TokenKind::AmpEqual,
                '&' => TokenKind::Amp,
                '|' if self.matches('|') => TokenKind::OrOr,
                '|' if self.matches('=') => TokenKind::PipeEqual,
                '|' => TokenKind::Pipe,
                '<' if self.matches('<') => {
                    if self.matches('=') {
                        TokenKind::ShiftLeftEqual
                    } else {
                        TokenKind::ShiftLeft
                    }
                }
                '<' if self.matches('=') => TokenKind::LessEqual,
                '<' => TokenKind::Less,
                '>' if self.matches('>') => {
                    if self.matches('=') {
                        TokenKind::ShiftRightEqual
                    } else {
                        TokenKind::ShiftRight
                    }
                }
                '>' if self.matches('=') => TokenKind::GreaterEqual,
                '>' => TokenKind::Greater,
                other => {
                    self.error(LexErrorKind::InvalidChar(other), start);
                    continue;
                }
            };
            return self.make(kind, start);
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    /// 跳过块注释（不支持嵌套），返回是否正常闭合
    fn skip_block_comment(&mut self) -> bool {
        while let Some(c) = self.advance() {
            if c == '*' && self.peek() == Some('/') {
                self.advance();
                return true;
            }
        }
        false
    }

    fn scan_escape(&mut self, out: &mut String) {
        let esc_start = self.pos;
        // 反斜杠已被消费
        match self.advance() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some('{') => out.push('{'),
            Some('}') => out.push('}'),
            Some('x') => {
                let hi = self.advance();
                let lo = self.advance();
                let value = match (hi, lo) {
                    (Some(h), Some(l)) => {
                        let digits: String = [h, l].iter().collect();
                        u8::from_str_radix(&digits, 16).ok()
                    }
                    _ => None,
                };
                match value {
                    Some(byte) => out.push(byte as char),
                    None => {
                        let seq = format!("\\{}", self.range_from(esc_start).slice(self.source));
                        self.error(LexErrorKind::InvalidEscape(seq), esc_start);
                    }
                }
            }
            Some(other) => {
                self.error(LexErrorKind::InvalidEscape(format!("\\{}", other)), esc_start);
                out.push(other);
            }
            None => {}
        }
    }

    fn scan_string(&mut self, start: SourcePosition) -> Token {
        let mut value = String::new();
        loop {
            match self.peek() {
                None | Some('\n') => {
                    self.error(LexErrorKind::UnterminatedString, start);
                    break;
                }
                Some('"') => {
                    self.advance();
                    break;
                }
                Some('\\') => {
                    self.advance();
                    self.scan_escape(&mut value);
                }
                Some(c) => {
                    self.advance();
                    value.push(c);
                }
            }
        }
        Token::new(TokenKind::String, self.range_from(start), value)
    }

    /// `r"..."`：不处理转义，`""` 表示一个引号
    fn scan_raw_string(&mut self, start: SourcePosition) -> Token {
        let mut value = String::new();
        loop {
            match self.advance() {
                None => {
                    self.error(LexErrorKind::UnterminatedString, start);
                    break;
                }
                Some('"') => {
                    if self.peek() == Some('"') {
                        self.advance();
                        value.push('"');
                    } else {
                        break;
                    }
                }
                Some(c) => value.push(c),
            }
        }
        Token::new(TokenKind::RawString, self.range_from(start), value)
    }

    fn scan_fstring_part(&mut self, text_pending: bool) -> Token {
        let start = self.pos;
        if text_pending {
            let mut value = String::new();
            loop {
                match self.peek() {
                    None | Some('"') => break,
                    Some('{') if self.peek_at(1) == Some('{') => {
                        self.advance();
                        self.advance();
                        value.push('{');
                    }
                    Some('}') if self.peek_at(1) == Some('}') => {
                        self.advance();
                        self.advance();
                        value.push('}');
                    }
                    Some('{') => break,
                    Some('\\') => {
                        self.advance();
                        self.scan_escape(&mut value);
                    }
                    Some(c) => {
                        self.advance();
                        value.push(c);
                    }
                }
            }
            if let Some(Mode::FString { text_pending }) = self.modes.last_mut() {
                *text_pending = false;
            }
            return Token::new(TokenKind::FStringText, self.range_from(start), value);
        }

        match self.advance() {
            Some('{') => {
                self.modes.push(Mode::FStringExpr { depth: 0 });
                self.make(TokenKind::FStringExprStart, start)
            }
            Some('"') => {
                self.modes.pop();
                self.make(TokenKind::FStringClose, start)
            }
            _ => {
                self.error(LexErrorKind::UnterminatedString, start);
                self.modes.pop();
                self.make(TokenKind::FStringClose, start)
            }
        }
    }

    fn scan_number(&mut self, start: SourcePosition, first: char) -> Token {
        if first == '0' {
            let radix = match self.peek() {
                Some('x') | Some('X') => Some(16),
                Some('o') | Some('O') => Some(8),
                Some('b') | Some('B') => Some(2),
                _ => None,
            };
            if let Some(radix) = radix {
                self.advance();
                let mut digits = 0;
                let mut valid = true;
                while let Some(c) = self.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        self.advance();
                        if c != '_' {
                            digits += 1;
                            valid &= c.is_digit(radix);
                        }
                    } else {
                        break;
                    }
                }
                if digits == 0 || !valid {
                    let text = self.range_from(start).slice(self.source).to_string();
                    self.error(LexErrorKind::InvalidNumber(text), start);
                }
                return self.make(TokenKind::Integer, start);
            }
        }

        self.consume_digits();
        let mut kind = TokenKind::Integer;
        if self.peek() == Some('.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
            self.consume_digits();
            kind = TokenKind::Float;
        }
        if matches!(self.peek(), Some('e') | Some('E')) {
            let sign = matches!(self.peek_at(1), Some('+') | Some('-'));
            let digit_at = if sign { 2 } else { 1 };
            if self.peek_at(digit_at).is_some_and(|c| c.is_ascii_digit()) {
                self.advance();
                if sign {
                    self.advance();
                }
                self.consume_digits();
                kind = TokenKind::Float;
            }
        }
        if kind == TokenKind::Float && matches!(self.peek(), Some('f') | Some('F')) {
            self.advance();
        }
        if self.peek().is_some_and(|c| c.is_alphabetic() || c == '_') {
            while self.peek().is_some_and(|c| c.is_alphanumeric() || c == '_') {
                self.advance();
            }
            let text = self.range_from(start).slice(self.source).to_string();
            self.error(LexErrorKind::InvalidNumber(text), start);
        }
        self.make(kind, start)
    }

    fn consume_digits(&mut self) {
        while self.peek().is_some_and(|c| c.is_ascii_digit() || c == '_') {
            self.advance();
        }
    }
}

impl Iterator for Lexer<'_> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        if let Some(tok) = self.pending.pop_front() {
            return Some(tok);
        }
        if self.finished {
            return None;
        }
        let tok = self.scan();
        if tok.kind == TokenKind::Eof {
            self.finished = true;
        }
        Some(tok)
    }
}

/// 把源文件字节解码为文本
///
/// 每段连续的非法 UTF-8 字节替换为一个空格并记一条 [`LexErrorKind::Utf8Error`]，
/// 其余部分照常扫描。
pub fn decode_source(bytes: &[u8]) -> (String, Vec<LexerError>) {
    let mut text = String::with_capacity(bytes.len());
    let mut errors = Vec::new();
    let mut pos = SourcePosition::start();
    let mut rest = bytes;
    let mut in_bad_run = false;
    loop {
        match std::str::from_utf8(rest) {
            Ok(valid) => {
                text.push_str(valid);
                break;
            }
            Err(e) => {
                let (valid, after) = rest.split_at(e.valid_up_to());
                let valid = String::from_utf8_lossy(valid);
                valid.chars().for_each(|c| pos.advance(c));
                text.push_str(&valid);

                // 连续的非法字节合并为一段
                if !valid.is_empty() || !in_bad_run {
                    let start = pos;
                    pos.advance(' ');
                    text.push(' ');
                    let err = LexerError::at(LexErrorKind::Utf8Error, SourceRange::new(start, pos));
                    tracing::debug!(target: "smalls::lexer", "{}", err);
                    errors.push(err);
                }
                in_bad_run = true;

                let bad = e.error_len().unwrap_or(after.len());
                rest = &after[bad..];
            }
        }
    }
    (text, errors)
}

/// 去掉数字中的 `_` 并解析为 i64（保留符号位检查给调用方）
pub fn parse_integer_literal(text: &str) -> Option<i64> {
    let cleaned: String = text.chars().filter(|c| *c != '_').collect();
    let lower = cleaned.to_ascii_lowercase();
    if let Some(hex) = lower.strip_prefix("0x") {
        i64::from_str_radix(hex, 16).ok()
    } else if let Some(oct) = lower.strip_prefix("0o") {
        i64::from_str_radix(oct, 8).ok()
    } else if let Some(bin) = lower.strip_prefix("0b") {
        i64::from_str_radix(bin, 2).ok()
    } else {
        lower.parse::<i64>().ok()
    }
}

pub fn parse_float_literal(text: &str) -> Option<f32> {
    let cleaned: String = text
        .chars()
        .filter(|c| *c != '_' && *c != 'f' && *c != 'F')
        .collect();
    cleaned.parse::<f32>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Lexer::new(src)
            .filter(|t| t.kind != TokenKind::Comment)
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_keywords_and_identifiers() {
        assert_eq!(
            kinds("fn var x elif"),
            vec![
                TokenKind::Fn,
                TokenKind::Var,
                TokenKind::Identifier,
                TokenKind::Elif,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_integer_radixes() {
        let (tokens, errors) = Lexer::new("42 0x1F 0o17 0b101").tokenize();
        assert!(errors.is_empty());
        let values: Vec<i64> = tokens
            .iter()
            .filter(|t| t.kind == TokenKind::Integer)
            .map(|t| parse_integer_literal(&t.text).unwrap())
            .collect();
        assert_eq!(values, vec![42, 31, 15, 5]);
    }

    #[test]
    fn test_invalid_radix_digit() {
        let (_, errors) = Lexer::new("0b102").tokenize();
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0].kind, LexErrorKind::InvalidNumber(_)));
    }

    #[test]
    fn test_float_literals() {
        let (tokens, _) = Lexer::new("1.5 2e3 3.25f").tokenize();
        assert_eq!(tokens[0].kind, TokenKind::Float);
        assert_eq!(parse_float_literal(&tokens[1].text), Some(2000.0));
        assert_eq!(parse_float_literal(&tokens[2].text), Some(3.25));
    }

    #[test]
    fn test_string_escapes() {
        let (tokens, errors) = Lexer::new(r#""a\n\t\"\\\x41""#).tokenize();
        assert!(errors.is_empty());
        assert_eq!(tokens[0].text, "a\n\t\"\\A");
    }

    #[test]
    fn test_raw_string_doubled_quote() {
        let (tokens, errors) = Lexer::new(r#"r"say ""hi"" \n""#).tokenize();
        assert!(errors.is_empty());
        assert_eq!(tokens[0].kind, TokenKind::RawString);
        assert_eq!(tokens[0].text, "say \"hi\" \\n");
    }

    #[test]
    fn test_fstring_sequence() {
        assert_eq!(
            kinds(r#"f"The answer is {x + 1}!""#),
            vec![
                TokenKind::FStringOpen,
                TokenKind::FStringText,
                TokenKind::FStringExprStart,
                TokenKind::Identifier,
                TokenKind::Plus,
                TokenKind::Integer,
                TokenKind::FStringExprEnd,
                TokenKind::FStringText,
                TokenKind::FStringClose,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_fstring_nested_braces_and_escapes() {
        let (tokens, errors) = Lexer::new(r#"f"{{{ {1}[0] }}}""#).tokenize();
        assert!(errors.is_empty());
        assert_eq!(tokens[1].text, "{");
        assert_eq!(tokens[1].kind, TokenKind::FStringText);
        let last_text = tokens
            .iter()
            .rev()
            .find(|t| t.kind == TokenKind::FStringText)
            .unwrap();
        assert_eq!(last_text.text, "}");
    }

    #[test]
    fn test_comments_are_tokens() {
        let all: Vec<TokenKind> = Lexer::new("a // c\n /* b */ b").map(|t| t.kind).collect();
        assert_eq!(all.iter().filter(|k| **k == TokenKind::Comment).count(), 2);
    }

    #[test]
    fn test_decode_source_reports_bad_utf8() {
        let (text, errors) = decode_source(b"var a = 1;\nvar \xff\xfeb = 2;");
        assert_eq!(text, "var a = 1;\nvar  b = 2;");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, LexErrorKind::Utf8Error);
        assert_eq!((errors[0].line(), errors[0].column()), (2, 5));

        let (tokens, lex_errors) = Lexer::new(&text).tokenize();
        assert!(lex_errors.is_empty());
        assert!(tokens.iter().any(|t| t.kind == TokenKind::Identifier && t.text == "b"));
    }

    #[test]
    fn test_decode_source_truncated_sequence() {
        let (text, errors) = decode_source("é".as_bytes().split_at(1).0);
        assert_eq!(text, " ");
        assert_eq!(errors.len(), 1);
        let (text, errors) = decode_source("fn é()".as_bytes());
        assert_eq!(text, "fn é()");
        assert!(errors.is_empty());
    }

    #[test]
    fn test_errors_continue_scanning() {
        let (tokens, errors) = Lexer::new("var @ x = \"abc\nvar y */").tokenize();
        assert_eq!(errors.len(), 3);
        assert!(matches!(errors[0].kind, LexErrorKind::InvalidChar('@')));
        assert!(matches!(errors[1].kind, LexErrorKind::UnterminatedString));
        assert!(matches!(errors[2].kind, LexErrorKind::StrayCommentClose));
        assert!(tokens.iter().any(|t| t.text == "y"));
    }

    #[test]
    fn test_unterminated_block_comment() {
        let (_, errors) = Lexer::new("/* never closed").tokenize();
        assert_eq!(errors[0].kind, LexErrorKind::UnterminatedComment);
    }

    #[test]
    fn test_annotation_and_macros() {
        assert_eq!(
            kinds("[[native]] __LINE__"),
            vec![
                TokenKind::AnnotationOpen,
                TokenKind::Identifier,
                TokenKind::RightBracket,
                TokenKind::RightBracket,
                TokenKind::MacroLine,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_reset_restarts() {
        let mut lexer = Lexer::new("a b");
        assert_eq!(lexer.next().unwrap().text, "a");
        lexer.reset();
        assert_eq!(lexer.next().unwrap().text, "a");
    }
}
