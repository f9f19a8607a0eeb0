//! Request interpretation
//!
//! The [`Interpreter`] trait is the only seam where non-deterministic
//! behaviour may enter the supervisor. Two implementations ship here:
//! [`RuleInterpreter`], a keyword grammar, and [`ModelInterpreter`], which
//! delegates to a completion backend and parses its JSON reply.

mod model;
mod rule;

pub use model::{ClientError, CompletionClient, ModelInterpreter};
pub use rule::RuleInterpreter;

use crate::error::InterpretError;
use crate::state::PendingClarification;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tabedit_ops::Batch;
use tabedit_table::Table;

/// Question back to the user when a request is ambiguous
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClarificationRequest {
    pub question: String,
    /// Whatever the interpreter already understood
    #[serde(default)]
    pub partial: serde_json::Value,
}

impl ClarificationRequest {
    /// Create a request with no partial understanding
    #[must_use]
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            partial: serde_json::Value::Null,
        }
    }

    /// Attach partial understanding
    #[inline]
    #[must_use]
    pub fn with_partial(mut self, partial: serde_json::Value) -> Self {
        self.partial = partial;
        self
    }
}

/// Successful interpretation
#[derive(Debug, Clone, PartialEq)]
pub enum Interpretation {
    /// Operations to execute
    Batch(Batch),
    /// The user must answer first
    Clarify(ClarificationRequest),
}

/// Context handed to the interpreter on every attempt
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThreadContext {
    /// Question this message answers, if any
    pub pending: Option<PendingClarification>,
    /// Verification mismatches from earlier attempts this turn
    pub diagnostics: Vec<String>,
    /// One-based attempt number
    pub attempt: u32,
}

impl ThreadContext {
    /// Context for the first attempt
    #[must_use]
    pub fn first(pending: Option<PendingClarification>) -> Self {
        Self {
            pending,
            diagnostics: Vec::new(),
            attempt: 1,
        }
    }

    /// Check if this is a retry
    #[inline]
    #[must_use]
    pub fn is_retry(&self) -> bool {
        !self.diagnostics.is_empty()
    }
}

/// Converts a request into operations or a question
#[async_trait]
pub trait Interpreter: Send + Sync {
    /// Interpret `request` against the committed `table`
    ///
    /// # Errors
    /// Returns `InterpretError::Parse` when the request cannot be grounded
    /// and `InterpretError::Backend` when the capability itself fails
    async fn interpret(
        &self,
        request: &str,
        table: &Table,
        ctx: &ThreadContext,
    ) -> Result<Interpretation, InterpretError>;
}

#[async_trait]
impl<T: Interpreter + ?Sized> Interpreter for std::sync::Arc<T> {
    async fn interpret(
        &self,
        request: &str,
        table: &Table,
        ctx: &ThreadContext,
    ) -> Result<Interpretation, InterpretError> {
        (**self).interpret(request, table, ctx).await
    }
}
