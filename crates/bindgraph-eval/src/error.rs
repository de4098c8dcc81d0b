use thiserror::Error;

/// Reasons a finished pass cannot be committed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PassError {
    #[error("pass was started at generation {base} but the evaluator is at generation {current}")]
    Stale { base: u64, current: u64 },

    #[error("pass still has {remaining} paths to evaluate")]
    Incomplete { remaining: usize },
}
