//! Binding evaluation for bindgraph.
//!
//! Modules:
//! - `reference`: static property chains inside expressions
//! - `extract`: dependency extraction from binding text
//! - `invalidate`: snapshot diffs to the set of paths to recompute
//! - `interpreter`: the restricted expression interpreter
//! - `context`: the value layer the interpreter reads
//! - `diagnostic`: per-path error records
//! - `evaluator`: staged passes and committed results
//! - `error`: pass commit errors

pub mod context;
pub mod diagnostic;
pub mod error;
pub mod evaluator;
pub mod extract;
pub mod interpreter;
pub mod invalidate;
pub mod reference;

pub use context::SnapshotContext;
pub use diagnostic::{Diagnostic, DiagnosticKind};
pub use error::PassError;
pub use evaluator::{EvaluationResult, Evaluator, Pass, PassReport};
pub use extract::{extract, extract_dependencies, Extraction, ParsedBinding, PathIndex};
pub use interpreter::{
    evaluate, run_trigger, EvalContext, Interpreter, InterpreterConfig, InterpreterError, Mode,
    TriggerEffect, TriggerOutcome,
};
pub use invalidate::{invalidate, AffectedSet, BindingState, BindingTable, InvalidationPolicy};
