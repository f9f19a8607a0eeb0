//! Turn supervisor
//!
//! Entry point for callers: resolves the thread, serialises turns per
//! thread, reconciles the caller's table with the committed version, runs
//! the retry controller and commits verified results.

use crate::config::{BusyPolicy, SupervisorConfig};
use crate::error::SupervisorError;
use crate::interpreter::Interpreter;
use crate::retry::{Resolution, RetryController};
use crate::session::{Session, SessionStore};
use crate::state::ConversationState;
use crate::turn::{Outcome, TurnRequest, TurnResponse};
use tabedit_table::{Table, TableFingerprint};
use tracing::{debug, info, warn};

/// Runs turns for many threads over one interpreter
pub struct Supervisor<I> {
    interpreter: I,
    config: SupervisorConfig,
    sessions: SessionStore,
}

impl<I: Interpreter> Supervisor<I> {
    /// Create a supervisor
    #[must_use]
    pub fn new(interpreter: I, config: SupervisorConfig) -> Self {
        let sessions = SessionStore::from_config(&config);
        Self {
            interpreter,
            config,
            sessions,
        }
    }

    /// Active configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Live sessions
    #[inline]
    #[must_use]
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Handle one turn, applying the configured turn timeout
    ///
    /// # Errors
    /// Returns `SupervisorError` for busy or mismatched threads, timeouts
    /// and interpreter backend failures. Unparseable requests, questions
    /// and exhausted retries are reported in the response, not as errors.
    pub async fn handle_turn(&self, request: TurnRequest) -> Result<TurnResponse, SupervisorError> {
        match self.config.turn_timeout() {
            Some(limit) => tokio::time::timeout(limit, self.turn(request))
                .await
                .map_err(|_| {
                    warn!(timeout_secs = limit.as_secs(), "turn timed out");
                    SupervisorError::Timeout {
                        duration_secs: limit.as_secs(),
                    }
                })?,
            None => self.turn(request).await,
        }
    }

    async fn turn(&self, request: TurnRequest) -> Result<TurnResponse, SupervisorError> {
        let TurnRequest {
            message,
            table,
            thread_id,
            prior_state,
        } = request;
        let thread_id = resolve_thread(thread_id, prior_state.as_ref())?;
        let limit = self.config.snapshot_limit;
        let handle = self
            .sessions
            .get_or_insert_with(&thread_id, || restore_session(&thread_id, prior_state, &table, limit))
            .await;

        let mut guard = match handle.try_lock() {
            Ok(guard) => guard,
            Err(_) if self.config.busy_policy == BusyPolicy::Reject => {
                warn!(thread = %thread_id, "thread busy, rejecting turn");
                return Err(SupervisorError::ThreadBusy(thread_id));
            }
            Err(_) => {
                warn!(thread = %thread_id, "thread busy, queueing turn");
                handle.lock().await
            }
        };
        let session = &mut *guard;

        session.state.recover();
        let version = session.snapshots.sync(&table);
        if version != session.state.table_version {
            info!(thread = %thread_id, version, "caller table differs from committed table");
            session.state.commit(version, &table);
        }
        if !session.state.awaiting_clarification() {
            session.state.reset()?;
        }

        if is_undo(&message) {
            return Ok(undo(session));
        }

        let committed = session.table().clone();
        let resolution = RetryController::new(&self.interpreter, self.config.max_attempts)
            .run(&message, &committed, &mut session.state)
            .await?;

        let response = match resolution {
            Resolution::Applied {
                table,
                batch,
                verification,
                attempts,
            } => {
                let operations = batch.summary();
                let version = session.snapshots.commit(table.clone(), operations.clone());
                session.state.commit(version, &table);
                info!(thread = %thread_id, version, attempts, "applied {}", operations);
                TurnResponse::new(
                    Outcome::Applied {
                        operations,
                        version,
                        attempts,
                    },
                    session.state.clone(),
                    Some(table),
                )
                .with_verification(verification)
            }
            Resolution::Clarify(clarification) => {
                info!(thread = %thread_id, "awaiting clarification");
                TurnResponse::new(
                    Outcome::Clarification {
                        question: clarification.question,
                    },
                    session.state.clone(),
                    None,
                )
            }
            Resolution::Rejected(reason) => {
                info!(thread = %thread_id, "rejected: {}", reason);
                TurnResponse::new(Outcome::Rejected { reason }, session.state.clone(), None)
            }
            Resolution::Exhausted {
                attempts,
                diagnostic,
                verification,
            } => {
                info!(thread = %thread_id, attempts, "retries exhausted");
                TurnResponse::new(
                    Outcome::Exhausted {
                        attempts,
                        diagnostic,
                    },
                    session.state.clone(),
                    Some(committed),
                )
                .with_verification(verification)
            }
        };
        Ok(response)
    }

    /// Roll a thread back to a retained table version
    ///
    /// # Errors
    /// Returns `UnknownThread` when no session is live and
    /// `UnknownVersion` when the version is no longer retained
    pub async fn rollback(&self, thread_id: &str, version: u64) -> Result<TurnResponse, SupervisorError> {
        let handle = self
            .sessions
            .get(thread_id)
            .await
            .ok_or_else(|| SupervisorError::UnknownThread(thread_id.to_string()))?;
        let mut guard = handle.lock().await;
        let session = &mut *guard;
        session.state.recover();
        session.state.reset()?;

        let snapshot = session
            .snapshots
            .rollback(version)
            .map_err(|_| SupervisorError::UnknownVersion {
                thread: thread_id.to_string(),
                version,
            })?
            .clone();
        session.state.commit(snapshot.version, &snapshot.table);
        info!(thread = %thread_id, version, "rolled back");
        Ok(TurnResponse::new(
            Outcome::RolledBack { version },
            session.state.clone(),
            Some(snapshot.table),
        ))
    }

    /// Current state of a live thread
    pub async fn state(&self, thread_id: &str) -> Option<ConversationState> {
        let handle = self.sessions.get(thread_id).await?;
        let session = handle.lock().await;
        Some(session.state.clone())
    }

    /// Committed table of a live thread
    pub async fn table(&self, thread_id: &str) -> Option<Table> {
        let handle = self.sessions.get(thread_id).await?;
        let session = handle.lock().await;
        Some(session.table().clone())
    }

    /// End a thread, returning whether it was live
    pub async fn close_thread(&self, thread_id: &str) -> bool {
        let closed = self.sessions.remove(thread_id).await.is_some();
        info!(thread = %thread_id, closed, "thread closed");
        closed
    }
}

fn resolve_thread(
    requested: Option<String>,
    prior: Option<&ConversationState>,
) -> Result<String, SupervisorError> {
    match (requested, prior) {
        (Some(requested), Some(state)) if requested != state.thread_id => {
            Err(SupervisorError::ThreadMismatch {
                requested,
                state: state.thread_id.clone(),
            })
        }
        (Some(requested), _) => Ok(requested),
        (None, Some(state)) => Ok(state.thread_id.clone()),
        (None, None) => Ok(ulid::Ulid::new().to_string()),
    }
}

/// Session for a thread with no live entry
///
/// A returned prior state is trusted for version and pending question; a
/// table that no longer matches its fingerprint becomes the next version.
fn restore_session(
    thread_id: &str,
    prior: Option<ConversationState>,
    table: &Table,
    snapshot_limit: usize,
) -> Session {
    let Some(mut state) = prior else {
        debug!(thread = %thread_id, "new thread");
        return Session::new(ConversationState::new(thread_id, table), table.clone(), snapshot_limit);
    };
    if TableFingerprint::of(table) != state.table_fingerprint {
        debug!(thread = %thread_id, "restored state predates caller edits");
        state.commit(state.table_version + 1, table);
    }
    state.recover();
    debug!(thread = %thread_id, version = state.table_version, "restored thread from prior state");
    Session::new(state, table.clone(), snapshot_limit)
}

fn is_undo(message: &str) -> bool {
    matches!(
        message.trim().trim_end_matches(['.', '!']).to_ascii_lowercase().as_str(),
        "undo" | "undo that" | "undo last change" | "undo the last change" | "revert" | "revert that"
    )
}

fn undo(session: &mut Session) -> TurnResponse {
    match session.snapshots.undo() {
        Ok(snapshot) => {
            let (version, table) = (snapshot.version, snapshot.table.clone());
            session.state.commit(version, &table);
            info!(thread = %session.state.thread_id, version, "undo");
            TurnResponse::new(Outcome::RolledBack { version }, session.state.clone(), Some(table))
        }
        Err(err) => TurnResponse::new(
            Outcome::Rejected {
                reason: err.to_string(),
            },
            session.state.clone(),
            None,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_resolution() {
        let table = Table::new(["A"]).unwrap();
        let state = ConversationState::new("t1", &table);
        assert_eq!(resolve_thread(None, Some(&state)).unwrap(), "t1");
        assert_eq!(resolve_thread(Some("t1".to_string()), Some(&state)).unwrap(), "t1");
        assert!(matches!(
            resolve_thread(Some("t2".to_string()), Some(&state)),
            Err(SupervisorError::ThreadMismatch { .. })
        ));
        assert_eq!(resolve_thread(None, None).unwrap().len(), 26);
    }

    #[test]
    fn undo_phrases() {
        assert!(is_undo("Undo"));
        assert!(is_undo("undo that!"));
        assert!(!is_undo("undo row 2"));
    }

    #[test]
    fn restored_state_with_edited_table_bumps_version() {
        let original = Table::new(["A"]).unwrap();
        let mut state = ConversationState::new("t1", &original);
        state.table_version = 4;
        let edited = Table::new(["A", "B"]).unwrap();
        let session = restore_session("t1", Some(state), &edited, 5);
        assert_eq!(session.state.table_version, 5);
        assert_eq!(session.snapshots.version(), 5);
        assert_eq!(session.state.table_fingerprint, TableFingerprint::of(&edited));
    }
}
