//! WGSL front end for reflection: a lexer and a declaration-level parser.
//!
//! Only what reflection needs is parsed: structs, aliases, constants, global
//! variables and function signatures. Function bodies are skipped by brace
//! matching and never interpreted.

pub mod ast;
pub mod lexer;
mod parser;

pub use lexer::Span;

/// A syntax error with its source position.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{span}: {message}")]
pub struct ParseError {
    pub message: String,
    pub span: Span,
}

impl ParseError {
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
        }
    }
}

/// Parses WGSL source into a declaration-level [`ast::Module`].
pub fn parse(source: &str) -> Result<ast::Module, ParseError> {
    let tokens = lexer::Lexer::new(source).tokenize()?;
    parser::Parser::new(tokens).module()
}
