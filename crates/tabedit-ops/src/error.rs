//! Error types for formulas and operation execution

use tabedit_table::{TableError, Value};

/// Formula syntax errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExprError {
    /// Character outside the formula alphabet
    #[error("unexpected character '{found}' at position {position}")]
    UnexpectedChar { found: char, position: usize },

    /// Token in the wrong place
    #[error("unexpected {found} at position {position}")]
    UnexpectedToken { found: String, position: usize },

    /// Input ended mid-expression
    #[error("unexpected end of formula")]
    UnexpectedEnd,

    /// Quote or bracket never closed
    #[error("unterminated literal starting at position {position}")]
    Unterminated { position: usize },

    /// Digits that do not form a number
    #[error("invalid number '{text}' at position {position}")]
    InvalidNumber { text: String, position: usize },

    /// Parentheses or prefix operators nested past the limit
    #[error("formula nests deeper than {limit} levels at position {position}")]
    TooDeep { limit: usize, position: usize },

    /// More tokens than a row formula may hold
    #[error("formula has more than {limit} tokens")]
    TooLong { limit: usize },
}

/// Formula evaluation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EvalError {
    /// Column referenced by the formula does not exist
    #[error("unknown column: {0}")]
    UnknownColumn(String),

    /// Operator applied to incompatible values
    #[error("cannot apply '{op}' to {left} and {right}")]
    TypeMismatch {
        op: String,
        left: &'static str,
        right: &'static str,
    },

    /// Division by zero
    #[error("division by zero")]
    DivisionByZero,

    /// Predicate produced a non-boolean
    #[error("condition must be true or false, got {0}")]
    NotBoolean(&'static str),
}

impl EvalError {
    pub(crate) fn type_mismatch(op: &str, left: &Value, right: &Value) -> Self {
        Self::TypeMismatch {
            op: op.to_string(),
            left: left.type_name(),
            right: right.type_name(),
        }
    }
}

/// Why a single operation could not be applied
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OperationErrorKind {
    /// Underlying table mutation failed
    #[error(transparent)]
    Table(#[from] TableError),

    /// Formula or predicate failed
    #[error(transparent)]
    Eval(#[from] EvalError),

    /// The same row index appears more than once
    #[error("row {0} listed more than once")]
    DuplicateRow(usize),

    /// Aggregation over values of the wrong type
    #[error("cannot {func} column '{column}': {reason}")]
    Aggregation {
        func: &'static str,
        column: String,
        reason: String,
    },

    /// Two output columns share a name
    #[error("output column '{0}' produced twice")]
    DuplicateOutput(String),

    /// Operation is missing required parameters
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),
}

/// A failed step inside a batch
///
/// Steps are numbered from 1 in messages.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("operation #{} ({op}): {kind}", .step + 1)]
pub struct OperationError {
    /// Zero-based position in the batch
    pub step: usize,
    /// Operation name
    pub op: &'static str,
    /// Underlying reason
    pub kind: OperationErrorKind,
}

impl OperationError {
    /// Create an error for step `step`
    #[must_use]
    pub fn new(step: usize, op: &'static str, kind: impl Into<OperationErrorKind>) -> Self {
        Self {
            step,
            op,
            kind: kind.into(),
        }
    }
}

/// Result alias for single-operation application
pub type ApplyResult<T> = std::result::Result<T, OperationErrorKind>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_error_numbers_from_one() {
        let err = OperationError::new(
            0,
            "delete_row",
            TableError::RowOutOfRange { index: 7, len: 3 },
        );
        assert_eq!(
            err.to_string(),
            "operation #1 (delete_row): row 7 out of range (table has 3 rows)"
        );
    }

    #[test]
    fn type_mismatch_names_types() {
        let err = EvalError::type_mismatch(">", &Value::text("a"), &Value::Number(1.0));
        assert_eq!(err.to_string(), "cannot apply '>' to text and number");
    }
}
