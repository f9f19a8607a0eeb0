//! Completion-backed interpreter
//!
//! Sends the request, the table's shape, any pending question and earlier
//! verification diagnostics to a [`CompletionClient`], then parses one of
//! two JSON replies:
//!
//! ```json
//! {"operations": [{"op": "delete_row", "rows": [2]}]}
//! {"clarification": {"question": "Which row?", "partial": {}}}
//! ```
//!
//! Effects are always derived from the operation kinds, so a reply cannot
//! declare effects of its own.

use super::{ClarificationRequest, Interpretation, Interpreter, ThreadContext};
use crate::error::InterpretError;
use async_trait::async_trait;
use serde::Deserialize;
use tabedit_ops::{ground_batch, Batch, OpKind};
use tabedit_table::Table;
use tracing::{debug, warn};

/// Rows shown to the backend by default
const DEFAULT_SAMPLE_ROWS: usize = 5;

const OPERATION_TAGS: &[&str] = &[
    "add_row",
    "update_row",
    "delete_row",
    "add_column",
    "update_column",
    "delete_column",
    "deduplicate",
    "remove_outliers",
    "aggregate",
    "sort",
    "filter",
    "pivot_summary",
    "compute",
];

/// Completion backend failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    #[error("completion request failed: {0}")]
    Request(String),

    #[error("completion backend unavailable: {0}")]
    Unavailable(String),
}

/// Text completion capability
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Complete `prompt`
    async fn complete(&self, prompt: &str) -> Result<String, ClientError>;
}

#[derive(Debug, Deserialize)]
struct Reply {
    #[serde(default)]
    operations: Option<Vec<OpKind>>,
    #[serde(default)]
    clarification: Option<ClarificationRequest>,
}

/// Interpreter delegating to a completion backend
#[derive(Debug, Clone)]
pub struct ModelInterpreter<C> {
    client: C,
    sample_rows: usize,
}

impl<C: CompletionClient> ModelInterpreter<C> {
    /// Wrap `client`
    #[must_use]
    pub fn new(client: C) -> Self {
        Self {
            client,
            sample_rows: DEFAULT_SAMPLE_ROWS,
        }
    }

    /// Show at most `rows` rows in the prompt
    #[inline]
    #[must_use]
    pub fn with_sample_rows(mut self, rows: usize) -> Self {
        self.sample_rows = rows;
        self
    }

    /// Build the prompt for one attempt
    #[must_use]
    pub fn prompt(&self, request: &str, table: &Table, ctx: &ThreadContext) -> String {
        let mut prompt = String::from(
            "You edit a table by replying with JSON only.\n\
             Reply {\"operations\": [...]} to make changes, or \
             {\"clarification\": {\"question\": \"...\"}} if the request is ambiguous.\n",
        );
        let mut lines = vec![
            format!("Operation tags: {}", OPERATION_TAGS.join(", ")),
            "Row indices in operations are zero-based.".to_string(),
            format!("Columns: {}", serde_json::to_string(table.columns()).unwrap_or_default()),
            format!("Rows: {}", table.row_count()),
        ];
        lines.extend((0..table.row_count().min(self.sample_rows)).map(|index| {
            let values = serde_json::to_string(&table.dense_row(index)).unwrap_or_default();
            format!("Row {index}: {values}")
        }));
        if let Some(pending) = &ctx.pending {
            lines.push(format!("You asked: {}", pending.question));
            lines.push(format!("Original request: {}", pending.original_request));
            if !pending.partial.is_null() {
                lines.push(format!("Understood so far: {}", pending.partial));
            }
        }
        lines.extend(
            ctx.diagnostics
                .iter()
                .map(|diagnostic| format!("A previous attempt failed verification: {diagnostic}")),
        );
        lines.push(format!("Request: {request}"));
        prompt.push_str(&lines.join("\n"));
        prompt
    }
}

#[async_trait]
impl<C: CompletionClient> Interpreter for ModelInterpreter<C> {
    async fn interpret(
        &self,
        request: &str,
        table: &Table,
        ctx: &ThreadContext,
    ) -> Result<Interpretation, InterpretError> {
        let prompt = self.prompt(request, table, ctx);
        debug!(attempt = ctx.attempt, prompt_bytes = prompt.len(), "requesting completion");
        let reply = self
            .client
            .complete(&prompt)
            .await
            .map_err(|e| InterpretError::Backend(e.to_string()))?;
        parse_reply(&reply, table).map_err(|e| {
            warn!(error = %e, "unusable completion");
            e
        })
    }
}

/// Outermost JSON object in `reply`, ignoring code fences and prose
fn json_body(reply: &str) -> Option<&str> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    (start < end).then(|| &reply[start..=end])
}

fn parse_reply(reply: &str, table: &Table) -> Result<Interpretation, InterpretError> {
    let body = json_body(reply).ok_or_else(|| InterpretError::parse("reply contains no JSON object"))?;
    let reply: Reply = serde_json::from_str(body)
        .map_err(|e| InterpretError::Parse(format!("malformed reply: {e}")))?;
    match (reply.operations, reply.clarification) {
        (_, Some(clarification)) => Ok(Interpretation::Clarify(clarification)),
        (Some(operations), None) if !operations.is_empty() => {
            let batch: Batch = operations.into_iter().collect();
            ground_batch(table, &batch).map_err(InterpretError::parse)?;
            Ok(Interpretation::Batch(batch))
        }
        _ => Err(InterpretError::parse(
            "reply has neither operations nor a clarification",
        )),
    }
}
