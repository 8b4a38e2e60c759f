//! 终端相关的输出

mod cli;

pub use cli::{print_diagnostic, print_error_with_source};
