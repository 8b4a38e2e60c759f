//! Lexer 错误类型

use crate::kit::SourceRange;

#[derive(Debug, Clone, PartialEq)]
pub enum LexErrorKind {
    InvalidChar(char),
    UnterminatedString,
    UnterminatedComment,
    StrayCommentClose,
    InvalidEscape(String),
    InvalidNumber(String),
    Utf8Error,
}

/// 词法错误，包含结构化信息
#[derive(Debug, Clone, PartialEq)]
pub struct LexerError {
    pub kind: LexErrorKind,
    pub range: SourceRange,
}

impl LexerError {
    pub fn at(kind: LexErrorKind, range: SourceRange) -> Self {
        Self { kind, range }
    }

    pub fn line(&self) -> u32 {
        self.range.start.line
    }

    pub fn column(&self) -> u32 {
        self.range.start.column
    }

    /// 不带位置前缀的消息
    pub fn message(&self) -> String {
        match &self.kind {
            LexErrorKind::InvalidChar(ch) => format!("unrecognized character '{}'", ch),
            LexErrorKind::UnterminatedString => "unterminated string literal".to_string(),
            LexErrorKind::UnterminatedComment => "unterminated block comment".to_string(),
            LexErrorKind::StrayCommentClose => "stray '*/' outside of a comment".to_string(),
            LexErrorKind::InvalidEscape(seq) => format!("invalid escape sequence '{}'", seq),
            LexErrorKind::InvalidNumber(num) => format!("invalid number literal '{}'", num),
            LexErrorKind::Utf8Error => "invalid UTF-8 in source".to_string(),
        }
    }
}

impl std::fmt::Display for LexerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.range, self.message())
    }
}

impl std::error::Error for LexerError {}
