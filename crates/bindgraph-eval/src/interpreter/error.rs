//! Runtime error types for the expression interpreter.
//!
//! Every variant except `Syntax` carries the [`Span`] of the sub-expression
//! that failed so the diagnostic can point into the binding text.

use serde::{Deserialize, Serialize};

use bindgraph_core::{Span, SyntaxError};

/// Errors raised while executing a binding or trigger expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
pub enum InterpreterError {
    #[error(transparent)]
    Syntax(#[from] SyntaxError),

    #[error("{name} is not defined")]
    UndefinedReference { name: String, span: Span },

    #[error("type error: {message}")]
    TypeMismatch { message: String, span: Span },

    #[error("division by zero")]
    DivideByZero { span: Span },

    #[error("{name} is not a function")]
    NotCallable { name: String, span: Span },

    #[error("invalid arguments to {function}: {message}")]
    InvalidArguments {
        function: String,
        message: String,
        span: Span,
    },

    #[error("{helper}() has side effects and can only run from a trigger property")]
    SideEffectInData { helper: String, span: Span },

    #[error("{what} limit ({limit}) exceeded")]
    LimitExceeded {
        what: String,
        limit: usize,
        span: Span,
    },
}

impl InterpreterError {
    pub fn span(&self) -> Option<Span> {
        match self {
            InterpreterError::Syntax(e) => Some(e.span),
            InterpreterError::UndefinedReference { span, .. }
            | InterpreterError::TypeMismatch { span, .. }
            | InterpreterError::DivideByZero { span }
            | InterpreterError::NotCallable { span, .. }
            | InterpreterError::InvalidArguments { span, .. }
            | InterpreterError::SideEffectInData { span, .. }
            | InterpreterError::LimitExceeded { span, .. } => Some(*span),
        }
    }

    pub(crate) fn type_mismatch(message: impl Into<String>, span: Span) -> Self {
        InterpreterError::TypeMismatch {
            message: message.into(),
            span,
        }
    }

    pub(crate) fn invalid_args(function: &str, message: impl Into<String>, span: Span) -> Self {
        InterpreterError::InvalidArguments {
            function: function.to_string(),
            message: message.into(),
            span,
        }
    }
}
