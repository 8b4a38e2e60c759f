//! 源代码位置追踪
//!
//! - line/column: 人类可读的错误显示（1-based）
//! - byte_offset: 源码切片与跳转（0-based）

use serde::Serialize;

/// 源代码位置
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct SourcePosition {
    /// 行号，1-based
    pub line: u32,
    /// 列号，1-based，Unicode码点计数
    pub column: u32,
    /// 字节偏移，0-based
    pub byte_offset: u32,
}

impl Default for SourcePosition {
    fn default() -> Self {
        Self::start()
    }
}

impl SourcePosition {
    pub fn new(line: u32, column: u32, byte_offset: u32) -> Self {
        Self {
            line,
            column,
            byte_offset,
        }
    }

    /// 文件起始位置
    pub fn start() -> Self {
        Self {
            line: 1,
            column: 1,
            byte_offset: 0,
        }
    }

    /// 前进一个字符
    pub fn advance(&mut self, c: char) {
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        self.byte_offset += c.len_utf8() as u32;
    }
}

/// 源代码区间，附着在每个 token 和 AST 节点上
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct SourceRange {
    pub start: SourcePosition,
    pub end: SourcePosition,
}

impl SourceRange {
    pub fn new(start: SourcePosition, end: SourcePosition) -> Self {
        Self { start, end }
    }

    /// 从单个位置创建区间
    pub fn at(pos: SourcePosition) -> Self {
        Self {
            start: pos,
            end: pos,
        }
    }

    /// 合并两个区间
    pub fn merge(&self, other: &SourceRange) -> Self {
        Self {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    pub fn line(&self) -> u32 {
        self.start.line
    }

    pub fn column(&self) -> u32 {
        self.start.column
    }

    /// 取出区间覆盖的源码
    pub fn slice<'a>(&self, source: &'a str) -> &'a str {
        let start = self.start.byte_offset as usize;
        let end = (self.end.byte_offset as usize).min(source.len());
        source.get(start..end).unwrap_or("")
    }
}

impl std::fmt::Display for SourceRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.start.line, self.start.column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_advance_ascii() {
        let mut pos = SourcePosition::start();
        pos.advance('a');
        pos.advance('b');
        assert_eq!(pos.column, 3);
        assert_eq!(pos.byte_offset, 2);
    }

    #[test]
    fn test_position_advance_newline() {
        let mut pos = SourcePosition::start();
        pos.advance('a');
        pos.advance('\n');
        assert_eq!(pos.line, 2);
        assert_eq!(pos.column, 1);
        assert_eq!(pos.byte_offset, 2);
    }

    #[test]
    fn test_position_advance_cjk() {
        let mut pos = SourcePosition::start();
        // CJK字符：3字节UTF-8
        pos.advance('中');
        assert_eq!(pos.column, 2);
        assert_eq!(pos.byte_offset, 3);
    }

    #[test]
    fn test_range_merge_and_slice() {
        let src = "var x = 1;";
        let a = SourceRange::new(SourcePosition::new(1, 1, 0), SourcePosition::new(1, 4, 3));
        let b = SourceRange::new(SourcePosition::new(1, 5, 4), SourcePosition::new(1, 6, 5));
        let m = a.merge(&b);
        assert_eq!(m.slice(src), "var x");
        assert_eq!(m.to_string(), "1:1");
    }
}
