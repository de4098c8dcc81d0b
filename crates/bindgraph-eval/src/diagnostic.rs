//! Per-path error records.
//!
//! None of these errors ever escape a pass. Each one is attached to the
//! path that produced it and committed alongside the path's last-good value.

use std::fmt;

use serde::{Deserialize, Serialize};

use bindgraph_core::{Cycle, PropertyPath, Span, SyntaxError};

use crate::interpreter::InterpreterError;

/// Error taxonomy of the evaluation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// Malformed binding text. The path has no dependency edges until fixed.
    ParseError,
    /// The path is a member of a dependency cycle.
    CyclicDependency,
    /// An upstream path is errored; the expression was not run.
    DependencyError,
    /// The expression failed while executing.
    EvalError,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DiagnosticKind::ParseError => "parse error",
            DiagnosticKind::CyclicDependency => "cyclic dependency",
            DiagnosticKind::DependencyError => "dependency error",
            DiagnosticKind::EvalError => "evaluation error",
        })
    }
}

/// One error attached to one path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
    /// The path the error originated at. For `DependencyError` this is the
    /// root cause upstream, not the path carrying the diagnostic.
    pub source: PropertyPath,
    /// Byte range inside the binding text, where known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<Span>,
}

impl Diagnostic {
    pub fn parse(path: &PropertyPath, error: &SyntaxError) -> Self {
        Diagnostic {
            kind: DiagnosticKind::ParseError,
            message: error.message.clone(),
            source: path.clone(),
            span: Some(error.span),
        }
    }

    pub fn cyclic(path: &PropertyPath, cycle: &Cycle) -> Self {
        Diagnostic {
            kind: DiagnosticKind::CyclicDependency,
            message: cycle.to_string(),
            source: path.clone(),
            span: None,
        }
    }

    /// `upstream` is the errored dependency; its own root cause is
    /// propagated rather than re-derived.
    pub fn dependency(upstream: &PropertyPath, upstream_errors: &[Diagnostic]) -> Self {
        let source = upstream_errors
            .iter()
            .find(|d| d.kind == DiagnosticKind::DependencyError)
            .map(|d| d.source.clone())
            .unwrap_or_else(|| upstream.clone());
        Diagnostic {
            kind: DiagnosticKind::DependencyError,
            message: format!("depends on errored path {source}"),
            source,
            span: None,
        }
    }

    pub fn eval(path: &PropertyPath, error: &InterpreterError) -> Self {
        match error {
            InterpreterError::Syntax(syntax) => Self::parse(path, syntax),
            other => Diagnostic {
                kind: DiagnosticKind::EvalError,
                message: other.to_string(),
                source: path.clone(),
                span: other.span(),
            },
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}: {}", self.kind, self.source, self.message)
    }
}
