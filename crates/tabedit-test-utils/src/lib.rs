//! Testing utilities for the tabedit workspace
//!
//! Shared table fixtures and scripted interpreters.

#![allow(missing_docs)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tabedit_core::{InterpretError, Interpretation, Interpreter, ThreadContext};
use tabedit_ops::{Batch, Operation};
use tabedit_table::{row, Table, Value};
use tokio::sync::Notify;

/// Name / Age / City, three rows
pub fn people() -> Table {
    Table::from_rows(
        ["Name", "Age", "City"],
        [
            row([("Name", "Ann".into()), ("Age", 31.0.into()), ("City", "Oslo".into())]),
            row([("Name", "Bob".into()), ("Age", 45.0.into()), ("City", "Rome".into())]),
            row([("Name", "Cy".into()), ("Age", 27.0.into()), ("City", "Oslo".into())]),
        ],
    )
    .unwrap()
}

/// Dept / Amount, where department A totals 30 and B totals 5
pub fn sales() -> Table {
    Table::from_rows(
        ["Dept", "Amount"],
        [
            row([("Dept", "A".into()), ("Amount", 10.0.into())]),
            row([("Dept", "B".into()), ("Amount", 5.0.into())]),
            row([("Dept", "A".into()), ("Amount", 20.0.into())]),
        ],
    )
    .unwrap()
}

/// Values of one column, top to bottom
pub fn column(table: &Table, name: &str) -> Vec<Value> {
    table.column_values(name).cloned().collect()
}

/// Single-operation batch
pub fn batch(op: impl Into<Operation>) -> Interpretation {
    Interpretation::Batch(Batch::new().with(op))
}

/// Plays back queued interpretations in order
///
/// Every call is recorded; an empty script yields a parse error.
#[derive(Debug, Default)]
pub struct ScriptedInterpreter {
    script: Mutex<VecDeque<Result<Interpretation, InterpretError>>>,
    calls: Mutex<Vec<(String, ThreadContext)>>,
}

impl ScriptedInterpreter {
    pub fn new(script: impl IntoIterator<Item = Result<Interpretation, InterpretError>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Same interpretation `times` times
    pub fn repeat(interpretation: Interpretation, times: usize) -> Self {
        Self::new(std::iter::repeat(Ok(interpretation)).take(times))
    }

    /// Requests and contexts seen so far
    pub fn calls(&self) -> Vec<(String, ThreadContext)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Interpreter for ScriptedInterpreter {
    async fn interpret(
        &self,
        request: &str,
        _table: &Table,
        ctx: &ThreadContext,
    ) -> Result<Interpretation, InterpretError> {
        self.calls
            .lock()
            .unwrap()
            .push((request.to_string(), ctx.clone()));
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(InterpretError::Parse("script exhausted".to_string())))
    }
}

/// Holds its first call until released
///
/// Lets a test keep one turn in flight while it sends another.
#[derive(Debug)]
pub struct GatedInterpreter<I> {
    inner: I,
    gated: AtomicBool,
    entered: Notify,
    release: Notify,
}

impl<I> GatedInterpreter<I> {
    pub fn new(inner: I) -> Self {
        Self {
            inner,
            gated: AtomicBool::new(true),
            entered: Notify::new(),
            release: Notify::new(),
        }
    }

    /// Wait until the first call is being held
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    /// Let the held call continue
    pub fn release(&self) {
        self.release.notify_one();
    }
}

#[async_trait]
impl<I: Interpreter> Interpreter for GatedInterpreter<I> {
    async fn interpret(
        &self,
        request: &str,
        table: &Table,
        ctx: &ThreadContext,
    ) -> Result<Interpretation, InterpretError> {
        if self.gated.swap(false, Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        self.inner.interpret(request, table, ctx).await
    }
}
