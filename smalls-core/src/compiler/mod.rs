//! 前端：词法、语法、名称与类型解析

pub mod ast;
pub mod lexer;
pub mod parser;
pub mod resolver;
pub mod types;
