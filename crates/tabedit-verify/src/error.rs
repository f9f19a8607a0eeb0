//! Internal verification errors
//!
//! These never escape [`crate::verify`]; each becomes a failing check.

use tabedit_ops::{EvalError, OperationErrorKind};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub(crate) enum VerifyError {
    /// The batch could not be replayed
    #[error("replay failed: {0}")]
    Replay(#[from] OperationErrorKind),

    /// A symbolic effect was declared on an operation that has no
    /// parameters to resolve it
    #[error("{effect} cannot be resolved for this operation")]
    Unresolvable { effect: &'static str },

    /// Column named by the effect is absent
    #[error("column '{0}' not found")]
    MissingColumn(String),

    /// Predicate used for resolution failed
    #[error("condition failed: {0}")]
    Eval(#[from] EvalError),
}
