//! Error types for the supervisor
//!
//! Covers:
//! - Interpreter failures (unparseable requests, unreachable backends)
//! - Thread concurrency and identity conflicts
//! - Configuration loading
//! - Illegal conversation stage transitions

use crate::state::Stage;

/// Interpreter failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InterpretError {
    /// The request could not be turned into operations
    #[error("could not understand request: {0}")]
    Parse(String),

    /// The interpretation capability itself failed
    #[error("interpreter backend failed: {0}")]
    Backend(String),
}

impl InterpretError {
    /// Parse error from any displayable reason
    #[inline]
    pub fn parse(reason: impl std::fmt::Display) -> Self {
        Self::Parse(reason.to_string())
    }
}

/// Illegal stage transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal stage transition: {from:?} -> {to:?}")]
pub struct StateMachineError {
    pub from: Stage,
    pub to: Stage,
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// TOML did not parse
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// Values parsed but are not usable
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Main supervisor error type
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    /// Another turn holds the thread and the busy policy is `Reject`
    #[error("thread {0} is busy with another turn")]
    ThreadBusy(String),

    /// Request names one thread but carries another thread's state
    #[error("thread id {requested} does not match prior state for {state}")]
    ThreadMismatch { requested: String, state: String },

    /// Whole-turn timeout elapsed
    #[error("turn timed out after {duration_secs}s")]
    Timeout { duration_secs: u64 },

    /// No live session for the thread
    #[error("unknown thread: {0}")]
    UnknownThread(String),

    /// Rollback target not retained
    #[error("thread {thread} has no table version {version}")]
    UnknownVersion { thread: String, version: u64 },

    /// Interpreter backend failure
    #[error(transparent)]
    Interpreter(#[from] InterpretError),

    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Stage machine violated
    #[error(transparent)]
    StateMachine(#[from] StateMachineError),
}

impl SupervisorError {
    /// Check if the caller may simply try again
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ThreadBusy(_) | Self::Timeout { .. } | Self::Interpreter(InterpretError::Backend(_))
        )
    }

    /// Check if a person has to fix something first
    #[inline]
    #[must_use]
    pub fn requires_human(&self) -> bool {
        matches!(
            self,
            Self::ThreadMismatch { .. } | Self::Config(_) | Self::UnknownVersion { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(SupervisorError::ThreadBusy("t".to_string()).is_retryable());
        assert!(SupervisorError::Timeout { duration_secs: 5 }.is_retryable());
        assert!(!SupervisorError::UnknownThread("t".to_string()).is_retryable());
        let mismatch = SupervisorError::ThreadMismatch {
            requested: "a".to_string(),
            state: "b".to_string(),
        };
        assert!(mismatch.requires_human());
    }

    #[test]
    fn interpreter_errors_pass_through() {
        let err = SupervisorError::from(InterpretError::Backend("offline".to_string()));
        assert_eq!(err.to_string(), "interpreter backend failed: offline");
        assert!(err.is_retryable());
    }
}
