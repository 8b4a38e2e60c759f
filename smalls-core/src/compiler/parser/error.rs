use crate::kit::SourceRange;

pub type ParseResult<T> = Result<T, ParserError>;

/// 语法错误，包含位置信息
#[derive(Debug, Clone, PartialEq)]
pub struct ParserError {
    pub kind: ParserErrorKind,
    pub range: SourceRange,
}

/// 语法错误类型
#[derive(Debug, Clone, PartialEq)]
pub enum ParserErrorKind {
    /// 意外的token
    UnexpectedToken { found: String, expected: String },
    /// 期望表达式
    ExpectedExpression { found: String },
    /// 期望类型
    ExpectedType { found: String },
    /// 期望标识符
    ExpectedIdentifier { found: String },
    /// 整数超出 32 位范围
    IntegerOutOfRange(String),
    InvalidNumberFormat(String),
    /// 无效的赋值目标
    InvalidAssignmentTarget,
    /// 声明格式错误
    MalformedDeclaration(String),
    Custom(String),
}

impl ParserError {
    pub fn new(kind: ParserErrorKind, range: SourceRange) -> Self {
        Self { kind, range }
    }

    pub fn line(&self) -> u32 {
        self.range.start.line
    }

    pub fn column(&self) -> u32 {
        self.range.start.column
    }

    pub fn message(&self) -> String {
        match &self.kind {
            ParserErrorKind::UnexpectedToken { found, expected } => {
                format!("unexpected token '{}', expected {}", found, expected)
            }
            ParserErrorKind::ExpectedExpression { found } => {
                format!("expected expression, found '{}'", found)
            }
            ParserErrorKind::ExpectedType { found } => format!("expected type, found '{}'", found),
            ParserErrorKind::ExpectedIdentifier { found } => {
                format!("expected identifier, found '{}'", found)
            }
            ParserErrorKind::IntegerOutOfRange(s) => {
                format!("integer literal '{}' does not fit in 32 bits", s)
            }
            ParserErrorKind::InvalidNumberFormat(s) => format!("invalid number format '{}'", s),
            ParserErrorKind::InvalidAssignmentTarget => "invalid assignment target".to_string(),
            ParserErrorKind::MalformedDeclaration(msg) => format!("malformed declaration: {}", msg),
            ParserErrorKind::Custom(msg) => msg.clone(),
        }
    }
}

impl std::fmt::Display for ParserError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.range, self.message())
    }
}

impl std::error::Error for ParserError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kit::SourcePosition;

    #[test]
    fn test_error_display_has_location() {
        let err = ParserError::new(
            ParserErrorKind::UnexpectedToken {
                found: "}".into(),
                expected: "';'".into(),
            },
            SourceRange::at(SourcePosition::new(4, 9, 30)),
        );
        let text = err.to_string();
        assert!(text.starts_with("[4:9]"));
        assert!(text.contains("expected ';'"));
        assert_eq!(err.line(), 4);
    }
}
