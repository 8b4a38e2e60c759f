//! CLI 格式化输出
//!
//! 提供命令行友好的错误显示和源码上下文打印。

use smalls_api::{Diagnostic, Severity, SmallsError};

/// 打印错误并显示源代码上下文
///
/// `module` 是 `source` 对应的模块路径；其他模块中的错误不打印上下文
pub fn print_error_with_source(e: &SmallsError, module: &str, source: &str) {
    match e {
        SmallsError::Compile { diagnostics, .. } => {
            for d in diagnostics {
                print_diagnostic(d, source);
            }
        }
        SmallsError::Runtime {
            message,
            stack_trace,
            module: fault_module,
            line,
            snippet,
        } => {
            eprintln!("error: {}", message);
            match (fault_module.as_deref(), line) {
                (Some(m), Some(line)) if m == module => {
                    print_source_context(source, *line as usize, None);
                }
                (Some(m), Some(line)) => {
                    eprintln!("  --> {}:{}", m, line);
                    if let Some(text) = snippet {
                        eprintln!("   | {}", text);
                    }
                }
                _ => {}
            }
            if !stack_trace.is_empty() {
                eprintln!("stack trace:");
                for frame in stack_trace {
                    eprintln!("    at {}", frame);
                }
            }
        }
        other => eprintln!("error: {}", other),
    }
}

/// 打印一条诊断及其源码位置
pub fn print_diagnostic(d: &Diagnostic, source: &str) {
    let label = match d.severity {
        Severity::Error => "error",
        Severity::Warning => "warning",
        Severity::Note => "note",
    };
    let start = d.range.start;
    eprintln!("{}[{}]: {}", label, d.kind.as_str(), d.message);
    eprintln!("  --> {}:{}", start.line, start.column);
    print_source_context(source, start.line as usize, Some(start.column as usize));
    for note in &d.notes {
        eprintln!("  = note: {}", note);
    }
}

/// 打印出错行及前后各两行；没有列号时箭头指向首个非空白字符
pub fn print_source_context(source: &str, error_line: usize, error_col: Option<usize>) {
    const CONTEXT_LINES: usize = 2;

    let lines: Vec<&str> = source.lines().collect();
    let total_lines = lines.len();

    if error_line == 0 || error_line > total_lines {
        return;
    }

    let start_line = error_line.saturating_sub(CONTEXT_LINES).max(1);
    let end_line = (error_line + CONTEXT_LINES).min(total_lines);
    let width = end_line.to_string().len();

    for line_idx in start_line..=end_line {
        let content = lines[line_idx - 1];
        eprintln!("{:>width$} | {}", line_idx, content, width = width);
        if line_idx == error_line {
            let col = error_col.unwrap_or_else(|| {
                content.chars().take_while(|c| c.is_whitespace()).count() + 1
            });
            let marker: String = content
                .chars()
                .take(col.saturating_sub(1))
                .map(|c| if c == '\t' { '\t' } else { ' ' })
                .collect();
            eprintln!("{:>width$} | {}^", "", marker, width = width);
        }
    }
}
