//! The binding expression language.
//!
//! Bindings are template strings mixing static text with `{{ }}`
//! expressions written in a small, side-effect-free JavaScript subset:
//!
//! - [`lexer`] tokenizes expression source into [`lexer::Token`]s with
//!   byte spans into the full property text.
//! - [`parser`] builds an [`ast::Expr`] by recursive descent.
//! - [`template`] splits property text into static and expression parts.
//! - [`reserved`] lists global names that are never entity references.
//! - [`rewrite`] renames entity references in place, for entity renames.
//!
//! Nothing here executes code; the interpreter lives downstream.

pub mod ast;
pub mod lexer;
pub mod parser;
pub mod reserved;
pub mod rewrite;
pub mod template;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use ast::{BinaryOp, Expr, ExprKind, LogicalOp, UnaryOp};
pub use lexer::Span;
pub use parser::{parse_expression, parse_program};
pub use template::{parse_template, parse_trigger, split_template, Part, Template, TemplatePart};

/// Malformed expression or template text.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message} at {}..{}", .span.start, .span.end)]
pub struct SyntaxError {
    pub message: String,
    pub span: Span,
}
