//! Smalls Token 类型定义

use crate::kit::SourceRange;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TokenKind {
    // 关键字
    Fn,
    Var,
    Const,
    Type,
    Extern,
    From,
    Import,
    As,
    Is,
    If,
    Elif,
    Else,
    Switch,
    Case,
    Default,
    For,
    In,
    Break,
    Continue,
    Return,
    True,
    False,

    // 字面量
    Integer,
    Float,
    String,
    RawString,
    /// f-string 起始 `f"`
    FStringOpen,
    /// f-string 文本片段（已处理转义）
    FStringText,
    /// f-string 内嵌表达式开始 `{`
    FStringExprStart,
    /// f-string 内嵌表达式结束 `}`
    FStringExprEnd,
    /// f-string 结束 `"`
    FStringClose,

    Identifier,

    // 编译期宏
    MacroFile,
    MacroLine,
    MacroFunction,
    MacroDate,
    MacroTime,

    // 双字符符号
    /// `[[`
    AnnotationOpen,
    Arrow,
    EqualEqual,
    NotEqual,
    LessEqual,
    GreaterEqual,
    AndAnd,
    OrOr,
    ShiftLeft,
    ShiftRight,
    PlusEqual,
    MinusEqual,
    StarEqual,
    SlashEqual,
    PercentEqual,
    AmpEqual,
    PipeEqual,
    CaretEqual,
    ShiftLeftEqual,
    ShiftRightEqual,

    // 单字符符号
    LeftParen,
    RightParen,
    LeftBrace,
    RightBrace,
    LeftBracket,
    RightBracket,
    Comma,
    Semicolon,
    Colon,
    Dot,
    Question,
    Bang,
    Dollar,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Equal,
    Less,
    Greater,
    Amp,
    Pipe,
    Caret,
    Tilde,

    Comment,
    Eof,
    /// 无法识别的输入，已报告词法错误
    #[default]
    Invalid,
}

impl TokenKind {
    pub fn keyword(ident: &str) -> Option<TokenKind> {
        let kind = match ident {
            "fn" => TokenKind::Fn,
            "var" => TokenKind::Var,
            "const" => TokenKind::Const,
            "type" => TokenKind::Type,
            "extern" => TokenKind::Extern,
            "from" => TokenKind::From,
            "import" => TokenKind::Import,
            "as" => TokenKind::As,
            "is" => TokenKind::Is,
            "if" => TokenKind::If,
            "elif" => TokenKind::Elif,
            "else" => TokenKind::Else,
            "switch" => TokenKind::Switch,
            "case" => TokenKind::Case,
            "default" => TokenKind::Default,
            "for" => TokenKind::For,
            "in" => TokenKind::In,
            "break" => TokenKind::Break,
            "continue" => TokenKind::Continue,
            "return" => TokenKind::Return,
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "__FILE__" => TokenKind::MacroFile,
            "__LINE__" => TokenKind::MacroLine,
            "__FUNCTION__" => TokenKind::MacroFunction,
            "__DATE__" => TokenKind::MacroDate,
            "__TIME__" => TokenKind::MacroTime,
            _ => return None,
        };
        Some(kind)
    }

    /// 复合赋值运算符
    pub fn is_assignment(&self) -> bool {
        matches!(
            self,
            TokenKind::Equal
                | TokenKind::PlusEqual
                | TokenKind::MinusEqual
                | TokenKind::StarEqual
                | TokenKind::SlashEqual
                | TokenKind::PercentEqual
                | TokenKind::AmpEqual
                | TokenKind::PipeEqual
                | TokenKind::CaretEqual
                | TokenKind::ShiftLeftEqual
                | TokenKind::ShiftRightEqual
        )
    }

    /// 顶层声明起始关键字，用于错误恢复
    pub fn starts_declaration(&self) -> bool {
        matches!(
            self,
            TokenKind::Fn
                | TokenKind::Type
                | TokenKind::Import
                | TokenKind::From
                | TokenKind::Extern
                | TokenKind::AnnotationOpen
        )
    }

    pub fn describe(&self) -> &'static str {
        match self {
            TokenKind::Identifier => "identifier",
            TokenKind::Integer => "integer literal",
            TokenKind::Float => "float literal",
            TokenKind::String | TokenKind::RawString => "string literal",
            TokenKind::FStringOpen => "f-string",
            TokenKind::LeftParen => "'('",
            TokenKind::RightParen => "')'",
            TokenKind::LeftBrace => "'{'",
            TokenKind::RightBrace => "'}'",
            TokenKind::LeftBracket => "'['",
            TokenKind::RightBracket => "']'",
            TokenKind::Comma => "','",
            TokenKind::Semicolon => "';'",
            TokenKind::Colon => "':'",
            TokenKind::Equal => "'='",
            TokenKind::Eof => "end of file",
            _ => "token",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub range: SourceRange,
    /// 标识符/数字为原始文本；字符串为转义处理后的内容
    pub text: String,
}

impl Token {
    pub fn new(kind: TokenKind, range: SourceRange, text: impl Into<String>) -> Self {
        Self {
            kind,
            range,
            text: text.into(),
        }
    }
}
