//! tabedit Core
//!
//! Supervises conversational table edits: a message is interpreted into
//! an operation batch, executed on a copy of the committed table, verified
//! against the batch's declared effects and retried with the mismatch fed
//! back until it verifies or the attempt limit is reached.
//!
//! # Core Concepts
//!
//! - [`Supervisor`]: per-thread turns, busy policy, undo and rollback
//! - [`Interpreter`]: the only non-deterministic seam
//! - [`RetryController`]: bounded interpret → execute → verify loop
//! - [`ConversationState`]: serialisable per-thread stage machine
//! - [`SupervisorConfig`]: TOML configuration
//!
//! # Example
//!
//! ```rust,ignore
//! use tabedit_core::{RuleInterpreter, Supervisor, SupervisorConfig, TurnRequest};
//!
//! let supervisor = Supervisor::new(RuleInterpreter::new(), SupervisorConfig::default());
//! let response = supervisor
//!     .handle_turn(TurnRequest::new("delete row 2", table))
//!     .await?;
//! println!("{}", response.response_text);
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod config;
mod error;
mod interpreter;
mod retry;
mod session;
mod state;
mod supervisor;
mod turn;

pub use config::{BusyPolicy, OutlierDefaults, SupervisorConfig};
pub use error::{ConfigError, InterpretError, StateMachineError, SupervisorError};
pub use interpreter::{
    ClarificationRequest, ClientError, CompletionClient, Interpretation, Interpreter,
    ModelInterpreter, RuleInterpreter, ThreadContext,
};
pub use retry::{Resolution, RetryController};
pub use session::{Session, SessionHandle, SessionStore};
pub use state::{
    allowed_transitions, validate_transition, ConversationState, PendingClarification, Stage,
};
pub use supervisor::Supervisor;
pub use turn::{Outcome, TurnRequest, TurnResponse};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
