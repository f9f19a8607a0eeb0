//! Retry controller
//!
//! Drives one turn through interpretation, execution and verification.
//! Every attempt starts from the committed table; a verification failure
//! feeds its mismatch back to the interpreter until `max_attempts` is
//! reached.

use crate::error::{InterpretError, SupervisorError};
use crate::interpreter::{ClarificationRequest, Interpretation, Interpreter, ThreadContext};
use crate::state::{ConversationState, PendingClarification, Stage};
use tabedit_ops::{Batch, Executor};
use tabedit_table::Table;
use tabedit_verify::{verify, VerificationResult};
use tracing::{debug, warn};

/// How the attempts ended
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// A batch executed and verified
    Applied {
        table: Table,
        batch: Batch,
        verification: VerificationResult,
        attempts: u32,
    },
    /// The interpreter needs an answer
    Clarify(ClarificationRequest),
    /// Unparseable request or failed execution
    Rejected(String),
    /// Verification failed on every attempt
    Exhausted {
        attempts: u32,
        diagnostic: String,
        verification: VerificationResult,
    },
}

/// Bounded interpret → execute → verify loop
#[derive(Debug)]
pub struct RetryController<'a, I: ?Sized> {
    interpreter: &'a I,
    executor: Executor,
    max_attempts: u32,
}

impl<'a, I: Interpreter + ?Sized> RetryController<'a, I> {
    /// Controller allowing `max_attempts` attempts (at least one)
    #[must_use]
    pub fn new(interpreter: &'a I, max_attempts: u32) -> Self {
        Self {
            interpreter,
            executor: Executor::new(),
            max_attempts: max_attempts.max(1),
        }
    }

    /// Run attempts for `request` against the committed `table`
    ///
    /// `state` must be `Idle` or `AwaitingClarification`; it ends in a
    /// terminal stage. The committed table is never modified here.
    ///
    /// # Errors
    /// Returns `SupervisorError::Interpreter` when the interpreter backend
    /// fails, and `SupervisorError::StateMachine` on an illegal transition
    pub async fn run(
        &self,
        request: &str,
        table: &Table,
        state: &mut ConversationState,
    ) -> Result<Resolution, SupervisorError> {
        let mut ctx = ThreadContext::first(state.pending.clone());
        state.attempt_count = 0;

        loop {
            state.attempt_count += 1;
            ctx.attempt = state.attempt_count;
            state.transition(Stage::Interpreting)?;

            let interpretation = match self.interpreter.interpret(request, table, &ctx).await {
                Ok(interpretation) => interpretation,
                Err(InterpretError::Parse(reason)) => {
                    state.transition(Stage::Rejected)?;
                    state.pending = None;
                    return Ok(Resolution::Rejected(reason));
                }
                Err(err) => {
                    state.transition(Stage::Rejected)?;
                    state.pending = None;
                    return Err(err.into());
                }
            };

            let batch = match interpretation {
                Interpretation::Batch(batch) => batch,
                Interpretation::Clarify(clarification) => {
                    state.transition(Stage::AwaitingClarification)?;
                    let original_request = ctx
                        .pending
                        .as_ref()
                        .map_or(request, |p| p.original_request.as_str())
                        .to_string();
                    state.pending = Some(PendingClarification {
                        question: clarification.question.clone(),
                        original_request,
                        partial: clarification.partial.clone(),
                    });
                    return Ok(Resolution::Clarify(clarification));
                }
            };
            state.pending = None;
            debug!(attempt = ctx.attempt, operations = %batch.summary(), "executing batch");

            state.transition(Stage::Executing)?;
            let post = match self.executor.execute(table, &batch) {
                Ok(post) => post,
                Err(err) => {
                    state.transition(Stage::Rejected)?;
                    return Ok(Resolution::Rejected(err.to_string()));
                }
            };

            state.transition(Stage::Verifying)?;
            let verification = verify(table, &post, &batch);
            if verification.pass {
                state.transition(Stage::Done)?;
                state.last_diagnostic = None;
                return Ok(Resolution::Applied {
                    table: post,
                    batch,
                    verification,
                    attempts: state.attempt_count,
                });
            }

            let diagnostic = verification
                .mismatch
                .clone()
                .unwrap_or_else(|| "verification failed".to_string());
            warn!(
                thread = %state.thread_id,
                attempt = state.attempt_count,
                max_attempts = self.max_attempts,
                "verification failed: {}",
                diagnostic
            );
            state.last_diagnostic = Some(diagnostic.clone());

            if state.attempt_count >= self.max_attempts {
                state.transition(Stage::Exhausted)?;
                return Ok(Resolution::Exhausted {
                    attempts: state.attempt_count,
                    diagnostic,
                    verification,
                });
            }
            state.transition(Stage::Retrying)?;
            ctx.diagnostics.push(diagnostic);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::RuleInterpreter;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;
    use tabedit_ops::{DeclaredEffect, OpKind, Operation, RowEffect};
    use tabedit_table::{row, Value};

    fn table() -> Table {
        Table::from_rows(
            ["Name", "Age"],
            [
                row([("Name", "Ann".into()), ("Age", 31.0.into())]),
                row([("Name", "Bob".into()), ("Age", 45.0.into())]),
            ],
        )
        .unwrap()
    }

    /// Claims a row is added while only adding a column
    #[derive(Default)]
    struct Overclaiming {
        seen: Mutex<Vec<ThreadContext>>,
    }

    #[async_trait]
    impl Interpreter for Overclaiming {
        async fn interpret(
            &self,
            _request: &str,
            _table: &Table,
            ctx: &ThreadContext,
        ) -> Result<Interpretation, InterpretError> {
            self.seen.lock().unwrap().push(ctx.clone());
            let op = Operation::new(OpKind::AddColumn {
                column: "City".to_string(),
                default: Value::Null,
                position: None,
            })
            .with_effect(DeclaredEffect::default().rows(RowEffect::Added(1)));
            Ok(Interpretation::Batch(Batch::new().with(op)))
        }
    }

    #[tokio::test]
    async fn applied_on_first_attempt() {
        let interpreter = RuleInterpreter::new();
        let mut state = ConversationState::new("t", &table());
        let resolution = RetryController::new(&interpreter, 3)
            .run("add row Name=Cy, Age=27", &table(), &mut state)
            .await
            .unwrap();
        let Resolution::Applied { table: post, attempts, .. } = resolution else {
            panic!("expected applied");
        };
        assert_eq!(post.row_count(), 3);
        assert_eq!(attempts, 1);
        assert_eq!(state.stage, Stage::Done);
    }

    #[tokio::test]
    async fn exhausts_after_max_attempts() {
        let interpreter = Overclaiming::default();
        let mut state = ConversationState::new("t", &table());
        let resolution = RetryController::new(&interpreter, 3)
            .run("add a city", &table(), &mut state)
            .await
            .unwrap();

        let expected = "operation #1 (add_column): expected 1 row added, observed 0";
        let Resolution::Exhausted { attempts, diagnostic, .. } = resolution else {
            panic!("expected exhausted");
        };
        assert_eq!(attempts, 3);
        assert_eq!(diagnostic, expected);
        assert_eq!(state.stage, Stage::Exhausted);
        assert_eq!(state.last_diagnostic.as_deref(), Some(expected));

        let seen = interpreter.seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert!(!seen[0].is_retry());
        assert_eq!(seen[2].diagnostics, vec![expected.to_string(), expected.to_string()]);
        assert_eq!(seen[2].attempt, 3);
    }

    #[tokio::test]
    async fn parse_failure_rejects_without_retry() {
        let interpreter = RuleInterpreter::new();
        let mut state = ConversationState::new("t", &table());
        let resolution = RetryController::new(&interpreter, 3)
            .run("paint it blue", &table(), &mut state)
            .await
            .unwrap();
        assert!(matches!(resolution, Resolution::Rejected(_)));
        assert_eq!(state.attempt_count, 1);
        assert_eq!(state.stage, Stage::Rejected);
    }

    #[tokio::test]
    async fn clarification_records_pending() {
        let interpreter = RuleInterpreter::new();
        let mut state = ConversationState::new("t", &table());
        let resolution = RetryController::new(&interpreter, 3)
            .run("delete the row", &table(), &mut state)
            .await
            .unwrap();
        assert!(matches!(resolution, Resolution::Clarify(_)));
        assert!(state.awaiting_clarification());
        let pending = state.pending.as_ref().unwrap();
        assert_eq!(pending.original_request, "delete the row");

        let resolution = RetryController::new(&interpreter, 3)
            .run("2", &table(), &mut state)
            .await
            .unwrap();
        let Resolution::Applied { table: post, .. } = resolution else {
            panic!("expected applied");
        };
        assert_eq!(post.row_count(), 1);
        assert_eq!(post.cell(0, "Name"), &Value::text("Ann"));
        assert!(state.pending.is_none());
    }
}
