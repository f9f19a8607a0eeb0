//! Conversation state machine
//!
//! A turn moves a thread through
//! `Idle → Interpreting → {AwaitingClarification | Executing} → Verifying →
//! {Done | Retrying → Interpreting | Exhausted}`. `Rejected` ends a turn
//! whose request could not be interpreted or executed. Terminal stages
//! return to `Idle` when the next turn starts, except
//! `AwaitingClarification`, whose answer goes straight to `Interpreting`.

use crate::error::StateMachineError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tabedit_table::{Table, TableFingerprint};
use tracing::{debug, warn};

/// Conversation stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    #[default]
    Idle,
    Interpreting,
    AwaitingClarification,
    Executing,
    Verifying,
    Done,
    Retrying,
    Exhausted,
    Rejected,
}

impl Stage {
    /// Check if a turn ends in this stage
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::AwaitingClarification | Self::Done | Self::Exhausted | Self::Rejected
        )
    }
}

/// Validates a stage transition
///
/// # Errors
/// Returns `StateMachineError` if `to` is not reachable from `from`
pub fn validate_transition(from: Stage, to: Stage) -> Result<(), StateMachineError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(StateMachineError { from, to })
    }
}

/// Stages reachable from `from` in one step
#[must_use]
pub fn allowed_transitions(from: Stage) -> Vec<Stage> {
    use Stage::{
        AwaitingClarification, Done, Executing, Exhausted, Idle, Interpreting, Rejected, Retrying,
        Verifying,
    };
    match from {
        Idle => vec![Interpreting],
        Interpreting => vec![AwaitingClarification, Executing, Rejected],
        AwaitingClarification => vec![Interpreting, Idle],
        Executing => vec![Verifying, Rejected],
        Verifying => vec![Done, Retrying, Exhausted],
        Retrying => vec![Interpreting],
        Done | Exhausted | Rejected => vec![Idle],
    }
}

/// Clarification the thread is waiting on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingClarification {
    /// Question put to the user
    pub question: String,
    /// Request that triggered the question
    pub original_request: String,
    /// Interpreter's partial understanding, opaque to the supervisor
    #[serde(default)]
    pub partial: serde_json::Value,
}

/// Per-thread conversation state
///
/// Serialisable so callers can hand it back on the next turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    pub thread_id: String,
    pub table_version: u64,
    pub table_fingerprint: TableFingerprint,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending: Option<PendingClarification>,
    pub attempt_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_diagnostic: Option<String>,
    pub stage: Stage,
    pub updated_at: DateTime<Utc>,
}

impl ConversationState {
    /// Fresh state for a thread at version 0
    #[must_use]
    pub fn new(thread_id: impl Into<String>, table: &Table) -> Self {
        Self {
            thread_id: thread_id.into(),
            table_version: 0,
            table_fingerprint: TableFingerprint::of(table),
            pending: None,
            attempt_count: 0,
            last_diagnostic: None,
            stage: Stage::Idle,
            updated_at: Utc::now(),
        }
    }

    /// Fresh state with a generated thread id
    #[must_use]
    pub fn start(table: &Table) -> Self {
        Self::new(ulid::Ulid::new().to_string(), table)
    }

    /// Move to `to`
    ///
    /// # Errors
    /// Returns `StateMachineError` for an illegal transition
    pub fn transition(&mut self, to: Stage) -> Result<(), StateMachineError> {
        validate_transition(self.stage, to)?;
        debug!(thread = %self.thread_id, from = ?self.stage, to = ?to, "stage transition");
        self.stage = to;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Return a finished turn to `Idle`
    ///
    /// # Errors
    /// Returns `StateMachineError` if a turn is still in progress
    pub fn reset(&mut self) -> Result<(), StateMachineError> {
        if self.stage != Stage::Idle {
            self.transition(Stage::Idle)?;
        }
        Ok(())
    }

    /// Force `Idle` after a turn that was cut off mid-stage
    ///
    /// Returns whether the stage had to be forced.
    pub fn recover(&mut self) -> bool {
        if self.stage == Stage::Idle || self.stage.is_terminal() {
            return false;
        }
        warn!(thread = %self.thread_id, stage = ?self.stage, "recovering interrupted turn");
        self.stage = Stage::Idle;
        self.pending = None;
        self.updated_at = Utc::now();
        true
    }

    /// Record a committed table version
    pub fn commit(&mut self, version: u64, table: &Table) {
        self.table_version = version;
        self.table_fingerprint = TableFingerprint::of(table);
        self.attempt_count = 0;
        self.pending = None;
        self.updated_at = Utc::now();
    }

    /// Check if the next message answers a question
    #[inline]
    #[must_use]
    pub fn awaiting_clarification(&self) -> bool {
        self.stage == Stage::AwaitingClarification && self.pending.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn table() -> Table {
        Table::new(["A"]).unwrap()
    }

    #[test]
    fn happy_path_is_legal() {
        let path = [
            Stage::Idle,
            Stage::Interpreting,
            Stage::Executing,
            Stage::Verifying,
            Stage::Retrying,
            Stage::Interpreting,
            Stage::Executing,
            Stage::Verifying,
            Stage::Done,
            Stage::Idle,
        ];
        for pair in path.windows(2) {
            assert!(validate_transition(pair[0], pair[1]).is_ok(), "{pair:?}");
        }
    }

    #[test]
    fn illegal_transitions() {
        assert!(validate_transition(Stage::Idle, Stage::Done).is_err());
        assert!(validate_transition(Stage::Exhausted, Stage::Retrying).is_err());
        assert!(validate_transition(Stage::Verifying, Stage::Executing).is_err());
    }

    #[test]
    fn terminal_stages() {
        for stage in [Stage::Done, Stage::Exhausted, Stage::Rejected, Stage::AwaitingClarification] {
            assert!(stage.is_terminal());
        }
        assert!(!Stage::Verifying.is_terminal());
    }

    #[test]
    fn transition_updates_stage() {
        let mut state = ConversationState::new("t1", &table());
        state.transition(Stage::Interpreting).unwrap();
        assert_eq!(state.stage, Stage::Interpreting);
        let err = state.transition(Stage::Done).unwrap_err();
        assert_eq!(err, StateMachineError { from: Stage::Interpreting, to: Stage::Done });
        assert!(state.reset().is_err());
    }

    #[test]
    fn recover_forces_idle() {
        let mut state = ConversationState::new("t1", &table());
        assert!(!state.recover());
        state.transition(Stage::Interpreting).unwrap();
        state.transition(Stage::Executing).unwrap();
        assert!(state.recover());
        assert_eq!(state.stage, Stage::Idle);
    }

    #[test]
    fn state_round_trips_as_json() {
        let mut state = ConversationState::start(&table());
        state.pending = Some(PendingClarification {
            question: "Which row?".to_string(),
            original_request: "delete the row".to_string(),
            partial: serde_json::json!({"op": "delete_row"}),
        });
        let json = serde_json::to_string(&state).unwrap();
        let back: ConversationState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
        assert_eq!(state.thread_id.len(), 26);
    }
}
