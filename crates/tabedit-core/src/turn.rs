//! Turn request and response
//!
//! Both sides are plain serde types so the CLI and any embedding service
//! can pass them as JSON; `state` round-trips opaquely between turns.

use crate::state::ConversationState;
use serde::{Deserialize, Serialize};
use tabedit_table::Table;
use tabedit_verify::VerificationResult;

/// One user message against a table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnRequest {
    pub message: String,
    pub table: Table,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prior_state: Option<ConversationState>,
}

impl TurnRequest {
    /// Request on a new thread
    #[must_use]
    pub fn new(message: impl Into<String>, table: Table) -> Self {
        Self {
            message: message.into(),
            table,
            thread_id: None,
            prior_state: None,
        }
    }

    /// Continue an existing thread
    #[inline]
    #[must_use]
    pub fn with_thread(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    /// Carry the state returned by the previous turn
    #[inline]
    #[must_use]
    pub fn with_prior_state(mut self, state: ConversationState) -> Self {
        self.prior_state = Some(state);
        self
    }
}

/// How a turn ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    /// Batch executed and verified
    Applied {
        operations: String,
        version: u64,
        attempts: u32,
    },
    /// The user has to answer a question first
    Clarification { question: String },
    /// Request could not be interpreted or executed
    Rejected { reason: String },
    /// Every attempt failed verification
    Exhausted { attempts: u32, diagnostic: String },
    /// An undo restored an earlier version
    RolledBack { version: u64 },
}

impl Outcome {
    /// Check if the committed table changed
    #[inline]
    #[must_use]
    pub fn changed_table(&self) -> bool {
        matches!(self, Self::Applied { .. } | Self::RolledBack { .. })
    }
}

/// Reply to a [`TurnRequest`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnResponse {
    pub response_text: String,
    /// Committed table, present once execution was reached
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<Table>,
    pub table_changed: bool,
    pub awaiting_clarification: bool,
    pub state: ConversationState,
    pub outcome: Outcome,
    /// Verdict of the last attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationResult>,
}

impl TurnResponse {
    pub(crate) fn new(outcome: Outcome, state: ConversationState, table: Option<Table>) -> Self {
        let response_text = match &outcome {
            Outcome::Applied {
                operations,
                version,
                ..
            } => match &table {
                Some(t) => format!(
                    "Applied {operations}. The table now has {} rows and {} columns (version {version}).",
                    t.row_count(),
                    t.column_count()
                ),
                None => format!("Applied {operations} (version {version})."),
            },
            Outcome::Clarification { question } => question.clone(),
            Outcome::Rejected { reason } => format!("I couldn't make that change: {reason}"),
            Outcome::Exhausted {
                attempts,
                diagnostic,
            } => format!(
                "I couldn't make that change correctly after {attempts} attempts; \
                 the table is unchanged. Last problem: {diagnostic}"
            ),
            Outcome::RolledBack { version } => format!("Restored table version {version}."),
        };
        Self {
            response_text,
            table_changed: outcome.changed_table(),
            awaiting_clarification: matches!(outcome, Outcome::Clarification { .. }),
            table,
            state,
            outcome,
            verification: None,
        }
    }

    #[inline]
    #[must_use]
    pub(crate) fn with_verification(mut self, verification: VerificationResult) -> Self {
        self.verification = Some(verification);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn outcome_is_tagged() {
        let json = serde_json::to_value(Outcome::RolledBack { version: 2 }).unwrap();
        assert_eq!(json, serde_json::json!({"status": "rolled_back", "version": 2}));
    }

    #[test]
    fn exhausted_text_keeps_diagnostic() {
        let table = Table::new(["A"]).unwrap();
        let response = TurnResponse::new(
            Outcome::Exhausted {
                attempts: 3,
                diagnostic: "operation #1 (add_row): expected 1 row added, observed 0".to_string(),
            },
            ConversationState::new("t", &table),
            Some(table),
        );
        assert!(!response.table_changed);
        assert!(response
            .response_text
            .ends_with("operation #1 (add_row): expected 1 row added, observed 0"));
    }

    #[test]
    fn request_parses_wire_table() {
        let request: TurnRequest = serde_json::from_str(
            r#"{"message": "sort by A", "table": {"headers": ["A"], "data": [{"A": 2}, {"A": 1}]}}"#,
        )
        .unwrap();
        assert_eq!(request.table.row_count(), 2);
        assert!(request.thread_id.is_none());
    }
}
