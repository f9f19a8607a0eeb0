//! Keyword grammar interpreter
//!
//! Understands a fixed set of phrasings, one clause per operation. Clauses
//! are separated by `;` or `then`; row numbers are 1-based. Conditions and
//! formulas use the `tabedit_ops` formula language, so text values need
//! quotes: `delete rows where City = 'Oslo'`.
//!
//! ```text
//! add row Name=Ann, Age=31
//! update row 2 set Age=32
//! update the total row set Amount=100
//! delete row 3 | delete rows 1, 4 | delete rows where Age > 60
//! delete the row [where <condition>]
//! add column City [= <formula>] | add column City with default 'Oslo'
//! delete column City
//! set Bonus = Salary * 0.1 [where Dept = 'Ops']
//! compute Total = Price * Qty
//! remove duplicates [by Name, City] [keep last]
//! remove outliers in Salary [using stddev 3 | iqr 1.5] [drop | cap]
//! sort by Age desc, Name
//! filter where Age >= 18 | keep rows where Active
//! aggregate sum of Amount, count by Region
//! summarize sum of Amount by Region
//! ```
//!
//! Singular targets that match several rows, and outlier requests without
//! an explicit rule and policy, produce a question instead of a batch.

use super::{ClarificationRequest, Interpretation, Interpreter, ThreadContext};
use crate::config::{OutlierDefaults, SupervisorConfig};
use crate::error::InterpretError;
use crate::state::PendingClarification;
use async_trait::async_trait;
use serde_json::{json, Value as Json};
use tabedit_ops::{
    ground_batch, AggFunc, Assignment, Batch, Executor, Expr, Formula, Keep, Measure, OpKind,
    OutlierPolicy, OutlierRule, SortKey,
};
use tabedit_table::{Row, Table, Value};
use tracing::debug;

type ParseResult<T> = Result<T, InterpretError>;

/// One clause's reading
enum Clause {
    Ops(Vec<OpKind>),
    Ask { question: String, partial: Json },
}

/// Deterministic keyword interpreter
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleInterpreter {
    outliers: Option<OutlierDefaults>,
}

impl RuleInterpreter {
    /// Interpreter with no outlier defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `defaults` when an outlier request names no rule or policy
    #[inline]
    #[must_use]
    pub fn with_outlier_defaults(mut self, defaults: OutlierDefaults) -> Self {
        self.outliers = Some(defaults);
        self
    }

    /// Interpreter configured from supervisor settings
    #[must_use]
    pub fn from_config(config: &SupervisorConfig) -> Self {
        Self {
            outliers: config.outliers,
        }
    }

    /// Interpret a complete request against `table`
    ///
    /// # Errors
    /// Returns `InterpretError::Parse` for unrecognised clauses and for
    /// batches whose selectors do not ground
    pub fn parse(&self, request: &str, table: &Table) -> ParseResult<Interpretation> {
        let clauses = split_clauses(request);
        if clauses.is_empty() {
            return Err(InterpretError::parse("the request is empty"));
        }

        let executor = Executor::new();
        let mut scratch = table.clone();
        let mut batch = Batch::new();
        for (index, text) in clauses.iter().enumerate() {
            match self.clause(text, &scratch)? {
                Clause::Ops(kinds) => {
                    for kind in kinds {
                        // later clauses number rows against the edited table
                        if let Ok(next) = executor.apply(&scratch, &kind) {
                            scratch = next;
                        }
                        batch.push(kind);
                    }
                }
                Clause::Ask {
                    question,
                    mut partial,
                } => {
                    if let Json::Object(map) = &mut partial {
                        map.insert("clause".to_string(), json!(index));
                        map.insert("clauses".to_string(), json!(clauses));
                    }
                    debug!(clause = %text, "clarification needed");
                    return Ok(Interpretation::Clarify(
                        ClarificationRequest::new(question).with_partial(partial),
                    ));
                }
            }
        }

        ground_batch(table, &batch).map_err(InterpretError::parse)?;
        debug!(operations = batch.len(), summary = %batch.summary(), "request interpreted");
        Ok(Interpretation::Batch(batch))
    }

    fn clause(&self, text: &str, table: &Table) -> ParseResult<Clause> {
        if let Some(rest) = strip_any(
            text,
            &["add a row", "add row", "insert a row", "insert row", "append a row", "append row"],
        ) {
            let rest = strip_keyword(rest, "with").unwrap_or(rest);
            return Ok(Clause::Ops(vec![OpKind::AddRow {
                values: assignments(rest, table)?,
            }]));
        }
        if let Some(rest) = strip_any(
            text,
            &["add a new column", "add new column", "add a column", "add column", "insert column"],
        ) {
            return add_column(rest);
        }
        if let Some(rest) = strip_any(text, &["update", "change", "edit"]) {
            if let Some(rest) = strip_keyword(rest, "row") {
                return update_row(rest, table);
            }
            if let Some(rest) = strip_any(rest, &["the column", "column"]) {
                return set_column(rest, table);
            }
            if let Some(rest) = strip_keyword(rest, "the") {
                return update_labelled_row(rest, table);
            }
            return set_column(rest, table);
        }
        if let Some(rest) = strip_any(text, &["delete", "remove", "drop"]) {
            return self.delete(rest, table);
        }
        if let Some(rest) = strip_any(text, &["deduplicate", "dedupe", "dedup"]) {
            return dedupe(rest, table);
        }
        if let Some(rest) = strip_any(text, &["cap the outliers", "cap outliers", "clip outliers"]) {
            return self.outlier_clause(rest, table, Some(OutlierPolicy::Cap));
        }
        if let Some(rest) = strip_keyword(text, "set") {
            return set_column(rest, table);
        }
        if let Some(rest) = strip_any(text, &["compute", "calculate", "derive"]) {
            return compute(rest, table);
        }
        if let Some(rest) = strip_any(
            text,
            &["sort the table by", "sort rows by", "sort by", "order by", "sort"],
        ) {
            return sort(rest, table);
        }
        if let Some(rest) = strip_any(
            text,
            &[
                "keep only rows where",
                "keep rows where",
                "only keep rows where",
                "filter rows where",
                "filter to rows where",
                "filter where",
                "filter rows",
                "filter",
            ],
        ) {
            return filter(rest, table);
        }
        if let Some(rest) = strip_any(
            text,
            &["summarize", "summarise", "add a summary of", "add summary of"],
        ) {
            return aggregate(rest, table, true);
        }
        if let Some(rest) = strip_any(text, &["aggregate", "group rows", "group"]) {
            return aggregate(rest, table, false);
        }
        Err(InterpretError::Parse(format!("I don't know how to '{text}'")))
    }

    fn delete(&self, rest: &str, table: &Table) -> ParseResult<Clause> {
        if let Some(rest) = strip_any(
            rest,
            &["the duplicate rows", "duplicate rows", "the duplicates", "duplicates"],
        ) {
            return dedupe(rest, table);
        }
        if let Some(rest) = strip_any(rest, &["the outliers", "outliers"]) {
            return self.outlier_clause(rest, table, None);
        }
        if let Some(rest) = strip_any(rest, &["the column", "column"]) {
            let name = clean_name(rest);
            if name.is_empty() {
                return Err(InterpretError::parse("say which column to delete"));
            }
            return Ok(Clause::Ops(vec![OpKind::DeleteColumn {
                column: column_name(name, table),
            }]));
        }
        if let Some(rest) = strip_any(rest, &["all rows", "every row", "the rows", "rows"]) {
            return match strip_any(rest, &["where", "with", "whose"]) {
                Some(condition_text) => {
                    let predicate = condition(condition_text, table)?;
                    let rows = matching_rows(&predicate, table)?;
                    if rows.is_empty() {
                        return Err(no_match(condition_text));
                    }
                    Ok(Clause::Ops(vec![OpKind::DeleteRow { rows }]))
                }
                None => Ok(Clause::Ops(vec![OpKind::DeleteRow {
                    rows: row_numbers(rest, table)?,
                }])),
            };
        }
        if let Some(rest) = strip_any(rest, &["the only row", "the row", "a row", "row"]) {
            if let Some(condition_text) = strip_any(rest, &["where", "with", "whose"]) {
                let predicate = condition(condition_text, table)?;
                let candidates = matching_rows(&predicate, table)?;
                return delete_one(candidates, Some(condition_text));
            }
            if rest.is_empty() {
                return delete_one((0..table.row_count()).collect(), None);
            }
            return Ok(Clause::Ops(vec![OpKind::DeleteRow {
                rows: row_numbers(rest, table)?,
            }]));
        }
        if let Some(label) = strip_keyword(rest, "the").and_then(|r| strip_suffix_word(r, "row")) {
            let label = clean_name(label);
            let candidates = labelled_rows(table, label);
            if candidates.is_empty() {
                return Err(InterpretError::Parse(format!("no row is labelled '{label}'")));
            }
            return delete_one(candidates, Some(label));
        }
        Err(InterpretError::Parse(format!("I don't know how to delete '{rest}'")))
    }

    fn outlier_clause(
        &self,
        rest: &str,
        table: &Table,
        preset: Option<OutlierPolicy>,
    ) -> ParseResult<Clause> {
        let rest = strip_any(rest, &["in", "from", "of", "for"]).unwrap_or(rest);
        let cut = [
            "using", "with", "via", "and", "drop", "dropping", "cap", "capping", "clip", "remove",
        ]
        .iter()
        .filter_map(|w| find_word(rest, w))
        .min()
        .unwrap_or(rest.len());
        let name = clean_name(&rest[..cut]);
        if name.is_empty() {
            return Err(InterpretError::parse("say which column to check for outliers"));
        }
        let column = column_name(name, table);
        let options = &rest[cut..];

        let rule = parse_rule(options).or(self.outliers.map(|d| d.rule));
        let policy = parse_policy(options)
            .or(preset)
            .or(self.outliers.map(|d| d.policy));
        match (rule, policy) {
            (Some(rule), Some(policy)) => Ok(Clause::Ops(vec![OpKind::RemoveOutliers {
                column,
                rule,
                policy,
            }])),
            (rule, policy) => Ok(Clause::Ask {
                question: outlier_question(&column, rule.is_none(), policy.is_none()),
                partial: json!({
                    "kind": "outliers",
                    "column": column,
                    "rule": rule,
                    "policy": policy,
                }),
            }),
        }
    }
}

#[async_trait]
impl Interpreter for RuleInterpreter {
    async fn interpret(
        &self,
        request: &str,
        table: &Table,
        ctx: &ThreadContext,
    ) -> Result<Interpretation, InterpretError> {
        if ctx.is_retry() {
            debug!(
                attempt = ctx.attempt,
                diagnostic = ?ctx.diagnostics.last(),
                "reinterpreting after verification failure"
            );
        }
        let merged = match ctx.pending.as_ref() {
            Some(pending) => match merge_answer(pending, request) {
                Some(Answer::Merged(merged)) => Some(merged),
                Some(Answer::OutsideChoices) => {
                    return Ok(Interpretation::Clarify(ask_again(pending)));
                }
                None => None,
            },
            None => None,
        };
        self.parse(merged.as_deref().unwrap_or(request), table)
    }
}

// Clause readers

fn add_column(rest: &str) -> ParseResult<Clause> {
    let rest = strip_any(rest, &["named", "called"]).unwrap_or(rest);
    let (name, source) = if let Some((name, src)) = split_assignment(rest) {
        (name, Some((src, true)))
    } else if let Some((name, raw)) =
        split_keyword(rest, "with default").or_else(|| split_keyword(rest, "with value"))
    {
        (name, Some((raw, false)))
    } else {
        (rest, None)
    };
    let column = clean_name(name).to_string();
    if column.is_empty() {
        return Err(InterpretError::parse("name the new column"));
    }
    let add = |default| OpKind::AddColumn {
        column: column.clone(),
        default,
        position: None,
    };
    let kinds = match source {
        None => vec![add(Value::Null)],
        Some((raw, false)) => vec![add(Value::parse_literal(raw))],
        Some((src, true)) => {
            let formula = parse_formula(src)?;
            match formula.expr() {
                Expr::Literal(value) => vec![add(value.clone())],
                _ => vec![
                    add(Value::Null),
                    OpKind::Compute {
                        column: column.clone(),
                        formula,
                    },
                ],
            }
        }
    };
    Ok(Clause::Ops(kinds))
}

fn update_row(rest: &str, table: &Table) -> ParseResult<Clause> {
    let (number, values) = split_keyword(rest, "set")
        .or_else(|| split_keyword(rest, "with"))
        .or_else(|| rest.split_once(':').map(|(a, b)| (a.trim(), b.trim())))
        .ok_or_else(|| InterpretError::parse("expected 'update row N set column = value'"))?;
    let row = single_row(number, table)?;
    Ok(Clause::Ops(vec![OpKind::UpdateRow {
        row,
        values: assignments(values, table)?,
    }]))
}

fn update_labelled_row(rest: &str, table: &Table) -> ParseResult<Clause> {
    let (target, values) = split_keyword(rest, "set")
        .or_else(|| split_keyword(rest, "with"))
        .ok_or_else(|| InterpretError::parse("expected 'update the <label> row set column = value'"))?;
    let label = strip_suffix_word(target, "row")
        .map(clean_name)
        .ok_or_else(|| InterpretError::Parse(format!("I don't know how to update '{target}'")))?;
    let parsed = assignments(values, table)?;
    let candidates = labelled_rows(table, label);
    if let [row] = candidates.as_slice() {
        return Ok(Clause::Ops(vec![OpKind::UpdateRow {
            row: *row,
            values: parsed,
        }]));
    }
    let question = if candidates.is_empty() {
        format!("No row is labelled '{label}'. Which row number should I update?")
    } else {
        format!(
            "{} rows are labelled '{label}' (rows {}). Which one should I update?",
            candidates.len(),
            join_numbers(&one_based(&candidates))
        )
    };
    Ok(Clause::Ask {
        question,
        partial: json!({
            "kind": "update_row",
            "assignments": values,
            "candidates": one_based(&candidates),
        }),
    })
}

fn set_column(rest: &str, table: &Table) -> ParseResult<Clause> {
    let (target, filter) = match split_keyword(rest, "where") {
        Some((target, condition_text)) => (target, Some(condition(condition_text, table)?)),
        None => (rest, None),
    };
    let assign = if let Some((name, src)) = split_assignment(target) {
        (name, assignment(src, table)?)
    } else if let Some((name, raw)) = split_keyword(target, "to") {
        (name, Assignment::Value(Value::parse_literal(raw)))
    } else {
        return Err(InterpretError::Parse(format!(
            "expected 'set column = value', got '{target}'"
        )));
    };
    Ok(Clause::Ops(vec![OpKind::UpdateColumn {
        column: column_name(assign.0, table),
        assign: assign.1,
        filter,
    }]))
}

fn compute(rest: &str, table: &Table) -> ParseResult<Clause> {
    let (name, src) = split_assignment(rest)
        .or_else(|| split_keyword(rest, "as"))
        .ok_or_else(|| InterpretError::parse("expected 'compute column = formula'"))?;
    Ok(Clause::Ops(vec![OpKind::Compute {
        column: column_name(name, table),
        formula: parse_formula(src)?,
    }]))
}

fn dedupe(rest: &str, table: &Table) -> ParseResult<Clause> {
    let (main, keep) = match split_keyword(rest, "keeping").or_else(|| split_keyword(rest, "keep")) {
        Some((main, which)) if find_word(which, "last").is_some() => (main, Keep::Last),
        Some((main, _)) => (main, Keep::First),
        None => (rest, Keep::First),
    };
    let main = strip_any(main, &["the rows", "rows"]).unwrap_or(main);
    let keys = match strip_any(main, &["based on", "by", "on", "using", "in", "across"]) {
        Some(list) => split_list(list)
            .into_iter()
            .map(|c| column_name(c, table))
            .collect(),
        None if main.trim_matches(',').trim().is_empty() => Vec::new(),
        None => {
            return Err(InterpretError::Parse(format!(
                "expected 'remove duplicates by column', got '{main}'"
            )))
        }
    };
    Ok(Clause::Ops(vec![OpKind::Deduplicate { keys, keep }]))
}

fn sort(rest: &str, table: &Table) -> ParseResult<Clause> {
    let mut keys = Vec::new();
    for part in split_list(rest) {
        let (name, descending) = if let Some(name) = strip_suffix_any(part, &["descending", "desc"]) {
            (name, true)
        } else if let Some(name) = strip_suffix_any(part, &["ascending", "asc"]) {
            (name, false)
        } else {
            (part, false)
        };
        let column = column_name(name, table);
        keys.push(if descending {
            SortKey::desc(column)
        } else {
            SortKey::asc(column)
        });
    }
    if keys.is_empty() {
        return Err(InterpretError::parse("say which columns to sort by"));
    }
    Ok(Clause::Ops(vec![OpKind::Sort { keys }]))
}

fn filter(rest: &str, table: &Table) -> ParseResult<Clause> {
    let rest = strip_any(rest, &["rows where", "where", "to"]).unwrap_or(rest);
    Ok(Clause::Ops(vec![OpKind::Filter {
        predicate: condition(rest, table)?,
    }]))
}

fn aggregate(rest: &str, table: &Table, pivot: bool) -> ParseResult<Clause> {
    let rest = strip_any(rest, &["the table", "rows"]).unwrap_or(rest);
    let (measures, keys) = if let Some(after) = strip_keyword(rest, "by") {
        let (keys, measures) = split_keyword(after, "with")
            .or_else(|| split_keyword(after, "computing"))
            .or_else(|| after.split_once(':').map(|(a, b)| (a.trim(), b.trim())))
            .ok_or_else(|| InterpretError::parse("expected 'group by column with sum of column'"))?;
        (measures, keys)
    } else {
        split_keyword(rest, "by").unwrap_or((rest, ""))
    };

    let keys: Vec<String> = split_list(keys)
        .into_iter()
        .map(|k| column_name(k, table))
        .collect();
    let measures = split_list(measures)
        .into_iter()
        .map(|m| measure(m, table, &keys))
        .collect::<ParseResult<Vec<_>>>()?;
    if measures.is_empty() {
        return Err(InterpretError::parse("say which values to aggregate"));
    }
    let kind = if pivot {
        OpKind::PivotSummary {
            group_by: keys,
            measures,
        }
    } else {
        OpKind::Aggregate {
            group_by: keys,
            measures,
        }
    };
    Ok(Clause::Ops(vec![kind]))
}

/// `sum of Amount as Total`; a bare column sums
fn measure(text: &str, table: &Table, keys: &[String]) -> ParseResult<Measure> {
    let (body, alias) = match split_keyword(text, "as") {
        Some((body, alias)) => (body, Some(clean_name(alias))),
        None => (text, None),
    };
    let body = strip_keyword(body, "the").unwrap_or(body);
    let (word, rest) = body
        .split_once(char::is_whitespace)
        .map_or((body, ""), |(w, r)| (w, r.trim()));
    let (func, column) = match AggFunc::parse(word) {
        Some(func) => (func, strip_keyword(rest, "of").unwrap_or(rest)),
        None => (AggFunc::Sum, body),
    };
    let column = clean_name(column);

    if column.is_empty() || column.eq_ignore_ascii_case("rows") {
        if func != AggFunc::Count {
            return Err(InterpretError::Parse(format!(
                "say which column to {}",
                func.name()
            )));
        }
        let target = keys
            .first()
            .or_else(|| table.columns().first())
            .cloned()
            .ok_or_else(|| InterpretError::parse("the table has no columns to count"))?;
        return Ok(Measure::new(AggFunc::Count, target).with_alias(alias.unwrap_or("count")));
    }
    let measure = Measure::new(func, column_name(column, table));
    Ok(match alias {
        Some(alias) => measure.with_alias(alias),
        None => measure,
    })
}

fn delete_one(candidates: Vec<usize>, described: Option<&str>) -> ParseResult<Clause> {
    match candidates.len() {
        0 => Err(match described {
            Some(text) => no_match(text),
            None => InterpretError::parse("the table has no rows"),
        }),
        1 => Ok(Clause::Ops(vec![OpKind::DeleteRow { rows: candidates }])),
        n => {
            let numbers = one_based(&candidates);
            let question = match described {
                Some(text) => format!(
                    "{n} rows match '{text}' (rows {}). Which one should I delete? \
                     Reply with a row number, or 'all'.",
                    join_numbers(&numbers)
                ),
                None => format!(
                    "The table has {n} rows. Which row should I delete? Reply with a row number."
                ),
            };
            Ok(Clause::Ask {
                question,
                partial: json!({ "kind": "delete_row", "candidates": numbers }),
            })
        }
    }
}

fn outlier_question(column: &str, need_rule: bool, need_policy: bool) -> String {
    match (need_rule, need_policy) {
        (true, true) => format!(
            "How should I find outliers in '{column}' and what should happen to them? \
             Reply with a rule (stddev K or iqr K) and either drop or cap."
        ),
        (true, false) => format!(
            "Which rule should I use to find outliers in '{column}'? Reply with stddev K or iqr K."
        ),
        _ => format!("Should outliers in '{column}' be dropped or capped?"),
    }
}

// Clarification answers

const ASK_AGAIN: &str = "That row is not one of the choices. ";

#[derive(Debug, PartialEq)]
enum Answer {
    /// The pending request with the answer folded in
    Merged(String),
    /// Named only rows the question did not offer
    OutsideChoices,
}

/// Rebuild the pending request with the user's answer folded in
///
/// Returns `None` when the answer does not address the question, in which
/// case it is read as a fresh request.
fn merge_answer(pending: &PendingClarification, answer: &str) -> Option<Answer> {
    let partial = &pending.partial;
    let mut clauses: Vec<String> = partial
        .get("clauses")
        .and_then(Json::as_array)
        .map(|all| all.iter().filter_map(Json::as_str).map(str::to_string).collect())
        .unwrap_or_default();
    if clauses.is_empty() {
        clauses.push(pending.original_request.clone());
    }
    let index = partial
        .get("clause")
        .and_then(Json::as_u64)
        .and_then(|i| usize::try_from(i).ok())
        .filter(|&i| i < clauses.len())
        .unwrap_or(0);
    match resolve_clause(partial, answer.trim())? {
        Answer::Merged(clause) => {
            clauses[index] = clause;
            Some(Answer::Merged(clauses.join("; ")))
        }
        Answer::OutsideChoices => Some(Answer::OutsideChoices),
    }
}

/// Same question and partial, prefixed once with a reminder
fn ask_again(pending: &PendingClarification) -> ClarificationRequest {
    let question = pending
        .question
        .strip_prefix(ASK_AGAIN)
        .unwrap_or(&pending.question);
    ClarificationRequest::new(format!("{ASK_AGAIN}{question}"))
        .with_partial(pending.partial.clone())
}

fn resolve_clause(partial: &Json, answer: &str) -> Option<Answer> {
    let candidates: Vec<usize> = partial
        .get("candidates")
        .and_then(Json::as_array)
        .map(|all| {
            all.iter()
                .filter_map(Json::as_u64)
                .filter_map(|n| usize::try_from(n).ok())
                .collect()
        })
        .unwrap_or_default();

    match partial.get("kind").and_then(Json::as_str)? {
        "delete_row" => {
            let rows = if ["all", "both", "every"].iter().any(|w| find_word(answer, w).is_some()) {
                candidates.clone()
            } else {
                chosen_rows(answer, &candidates)
            };
            let rows = offered(rows, &candidates)?;
            if rows.is_empty() {
                return Some(Answer::OutsideChoices);
            }
            Some(Answer::Merged(format!("delete rows {}", join_numbers(&rows))))
        }
        "update_row" => {
            let values = partial.get("assignments").and_then(Json::as_str)?;
            let rows = offered(chosen_rows(answer, &candidates), &candidates)?;
            match rows.first() {
                Some(row) => Some(Answer::Merged(format!("update row {row} set {values}"))),
                None => Some(Answer::OutsideChoices),
            }
        }
        "outliers" => {
            let column = partial.get("column").and_then(Json::as_str)?;
            let answered_rule = parse_rule(answer);
            let answered_policy = parse_policy(answer);
            if answered_rule.is_none() && answered_policy.is_none() {
                return None;
            }
            let rule = answered_rule.or_else(|| {
                partial
                    .get("rule")
                    .and_then(|r| serde_json::from_value::<OutlierRule>(r.clone()).ok())
            });
            let policy = answered_policy.or_else(|| {
                partial
                    .get("policy")
                    .and_then(|p| serde_json::from_value::<OutlierPolicy>(p.clone()).ok())
            });
            let mut text = format!("remove outliers in [{column}]");
            if let Some(rule) = rule {
                text.push_str(&format!(" using {}", rule_text(rule)));
            }
            match policy {
                Some(OutlierPolicy::Drop) => text.push_str(" drop"),
                Some(OutlierPolicy::Cap) => text.push_str(" cap"),
                None => {}
            }
            Some(Answer::Merged(text))
        }
        _ => None,
    }
}

/// Chosen rows kept to the offered candidates
///
/// `None` when nothing was chosen; empty when every chosen row falls
/// outside a non-empty candidate list.
fn offered(rows: Vec<usize>, candidates: &[usize]) -> Option<Vec<usize>> {
    if rows.is_empty() {
        return None;
    }
    if candidates.is_empty() {
        return Some(rows);
    }
    Some(rows.into_iter().filter(|row| candidates.contains(row)).collect())
}

/// Row numbers in an answer, or ordinal picks among the candidates
fn chosen_rows(answer: &str, candidates: &[usize]) -> Vec<usize> {
    let digits = numbers_in(answer);
    if !digits.is_empty() {
        return digits;
    }
    let ordinals = [("first", 0), ("second", 1), ("third", 2), ("fourth", 3), ("fifth", 4)];
    if find_word(answer, "last").is_some() {
        return candidates.last().copied().into_iter().collect();
    }
    ordinals
        .iter()
        .find(|(word, _)| find_word(answer, word).is_some())
        .and_then(|(_, i)| candidates.get(*i).copied())
        .into_iter()
        .collect()
}

fn numbers_in(text: &str) -> Vec<usize> {
    text.split(|c: char| !c.is_ascii_digit())
        .filter_map(|digits| digits.parse().ok())
        .collect()
}

fn rule_text(rule: OutlierRule) -> String {
    match rule {
        OutlierRule::StdDev { k } => format!("stddev {k}"),
        OutlierRule::Iqr { k } => format!("iqr {k}"),
    }
}

fn words(text: &str) -> Vec<String> {
    text.to_ascii_lowercase()
        .split(|c: char| c.is_whitespace() || matches!(c, ',' | '=' | '(' | ')' | ':'))
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_rule(text: &str) -> Option<OutlierRule> {
    let words = words(text);
    let k = words.iter().find_map(|w| w.parse::<f64>().ok())?;
    if words.iter().any(|w| w.starts_with("iqr") || w == "interquartile") {
        Some(OutlierRule::Iqr { k })
    } else if words.iter().any(|w| {
        matches!(
            w.as_str(),
            "stddev" | "stdev" | "std" | "sd" | "sigma" | "standard" | "deviations" | "zscore"
        )
    }) {
        Some(OutlierRule::StdDev { k })
    } else {
        None
    }
}

fn parse_policy(text: &str) -> Option<OutlierPolicy> {
    words(text).iter().find_map(|w| match w.as_str() {
        "drop" | "dropping" | "dropped" | "remove" | "removing" | "delete" | "deleting" => {
            Some(OutlierPolicy::Drop)
        }
        "cap" | "capping" | "capped" | "clip" | "clipping" | "clamp" | "winsorize" => {
            Some(OutlierPolicy::Cap)
        }
        _ => None,
    })
}

// Selectors

fn parse_formula(src: &str) -> ParseResult<Formula> {
    Formula::parse(src.trim())
        .map_err(|e| InterpretError::Parse(format!("invalid formula '{}': {e}", src.trim())))
}

/// Parse a condition whose columns all exist
fn condition(src: &str, table: &Table) -> ParseResult<Formula> {
    let formula = parse_formula(src)?;
    if let Some(missing) = formula
        .columns()
        .into_iter()
        .find(|c| table.resolve_column(c).is_none())
    {
        return Err(InterpretError::Parse(format!("no column named '{missing}'")));
    }
    Ok(formula)
}

/// Literal values stay literal; a lone unknown word is read as text
fn assignment(src: &str, table: &Table) -> ParseResult<Assignment> {
    let formula = parse_formula(src)?;
    Ok(match formula.expr() {
        Expr::Literal(value) => Assignment::Value(value.clone()),
        Expr::Column(name) if table.resolve_column(name).is_none() => {
            Assignment::Value(Value::parse_literal(src))
        }
        _ => Assignment::Formula(formula),
    })
}

fn matching_rows(predicate: &Formula, table: &Table) -> ParseResult<Vec<usize>> {
    let mut rows = Vec::new();
    for index in 0..table.row_count() {
        let hit = predicate.matches(table, index).map_err(|e| {
            InterpretError::Parse(format!("cannot evaluate '{}': {e}", predicate.source()))
        })?;
        if hit {
            rows.push(index);
        }
    }
    Ok(rows)
}

/// Rows with a text cell equal to `label`
fn labelled_rows(table: &Table, label: &str) -> Vec<usize> {
    table
        .rows()
        .iter()
        .enumerate()
        .filter(|(_, row)| {
            row.values()
                .any(|v| v.as_str().is_some_and(|s| s.trim().eq_ignore_ascii_case(label)))
        })
        .map(|(index, _)| index)
        .collect()
}

fn assignments(text: &str, table: &Table) -> ParseResult<Row> {
    let text = text.trim().trim_start_matches(':').trim();
    let mut values = Row::default();
    for part in split_commas(text) {
        let (name, raw) = split_assignment(part).ok_or_else(|| {
            InterpretError::Parse(format!("expected column = value, got '{part}'"))
        })?;
        values.insert(column_name(name, table), Value::parse_literal(raw));
    }
    if values.is_empty() {
        return Err(InterpretError::parse("no values given"));
    }
    Ok(values)
}

/// Zero-based indices from 1-based numbers, lists and ranges
fn row_numbers(text: &str, table: &Table) -> ParseResult<Vec<usize>> {
    let len = table.row_count();
    let mut rows = Vec::new();
    for part in split_list(text) {
        let part = strip_any(part, &["rows", "row"]).unwrap_or(part);
        let (lo, hi) = match part.split_once('-').or_else(|| split_keyword(part, "to")) {
            Some((lo, hi)) => (row_number(lo)?, row_number(hi)?),
            None => {
                let n = row_number(part)?;
                (n, n)
            }
        };
        for n in lo..=hi {
            if n > len {
                return Err(InterpretError::Parse(format!(
                    "row {n} does not exist (table has {len} rows)"
                )));
            }
            if !rows.contains(&(n - 1)) {
                rows.push(n - 1);
            }
        }
    }
    if rows.is_empty() {
        return Err(InterpretError::parse("say which rows"));
    }
    Ok(rows)
}

fn single_row(text: &str, table: &Table) -> ParseResult<usize> {
    match row_numbers(text, table)?.as_slice() {
        [row] => Ok(*row),
        _ => Err(InterpretError::Parse(format!("expected one row number, got '{text}'"))),
    }
}

fn row_number(text: &str) -> ParseResult<usize> {
    let trimmed = text.trim();
    let digits = trimmed
        .trim_start_matches('#')
        .trim_end_matches(|c: char| c.is_ascii_alphabetic());
    match digits.parse::<usize>() {
        Ok(0) => Err(InterpretError::parse("rows are numbered from 1")),
        Ok(n) => Ok(n),
        Err(_) => Err(InterpretError::Parse(format!("'{trimmed}' is not a row number"))),
    }
}

fn no_match(condition_text: &str) -> InterpretError {
    InterpretError::Parse(format!("no rows match '{condition_text}'"))
}

fn one_based(rows: &[usize]) -> Vec<usize> {
    rows.iter().map(|r| r + 1).collect()
}

fn join_numbers(numbers: &[usize]) -> String {
    numbers
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn column_name(raw: &str, table: &Table) -> String {
    let name = clean_name(raw);
    table
        .resolve_column(name)
        .map_or_else(|| name.to_string(), str::to_string)
}

/// Strip whitespace and one layer of quotes or brackets
fn clean_name(raw: &str) -> &str {
    let trimmed = raw.trim().trim_matches(',').trim();
    for (open, close) in [('"', '"'), ('\'', '\''), ('[', ']'), ('`', '`')] {
        if let Some(inner) = trimmed.strip_prefix(open).and_then(|s| s.strip_suffix(close)) {
            return inner.trim();
        }
    }
    trimmed
}

// Text scanning

fn split_clauses(request: &str) -> Vec<String> {
    let mut clauses = Vec::new();
    for part in split_outside(request, |c| c == ';') {
        let mut rest = part;
        while let Some(pos) = find_word(rest, "then") {
            clauses.push(&rest[..pos]);
            rest = &rest[pos + "then".len()..];
        }
        clauses.push(rest);
    }
    clauses
        .into_iter()
        .map(|c| c.trim().trim_end_matches('.').trim())
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}

/// Split on commas outside quotes and brackets
fn split_commas(text: &str) -> Vec<&str> {
    split_outside(text, |c| c == ',')
        .into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Split on commas and the word `and`
fn split_list(text: &str) -> Vec<&str> {
    let mut items = Vec::new();
    for part in split_commas(text) {
        let mut rest = part;
        while let Some(pos) = find_word(rest, "and") {
            items.push(rest[..pos].trim());
            rest = &rest[pos + "and".len()..];
        }
        items.push(rest.trim());
    }
    items.retain(|s| !s.is_empty());
    items
}

fn split_outside(text: &str, is_sep: impl Fn(char) -> bool) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut quote: Option<char> = None;
    for (pos, c) in text.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '\'' || c == '"' => quote = Some(c),
            None if c == '[' => quote = Some(']'),
            None if is_sep(c) => {
                parts.push(&text[start..pos]);
                start = pos + c.len_utf8();
            }
            None => {}
        }
    }
    parts.push(&text[start..]);
    parts
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Whether byte offset `pos` falls inside quotes or brackets
fn quoted_at(text: &str, pos: usize) -> bool {
    let mut quote: Option<char> = None;
    for (i, c) in text.char_indices() {
        if i >= pos {
            break;
        }
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '\'' || c == '"' => quote = Some(c),
            None if c == '[' => quote = Some(']'),
            None => {}
        }
    }
    quote.is_some()
}

/// Byte offset of `word` as a whole word, case-insensitive, unquoted
fn find_word(text: &str, word: &str) -> Option<usize> {
    let lower = text.to_ascii_lowercase();
    let mut from = 0;
    while let Some(rel) = lower.get(from..)?.find(word) {
        let start = from + rel;
        let end = start + word.len();
        let before = lower[..start].chars().next_back();
        let after = lower[end..].chars().next();
        if !before.is_some_and(is_word_char)
            && !after.is_some_and(is_word_char)
            && !quoted_at(text, start)
        {
            return Some(start);
        }
        from = end;
    }
    None
}

/// Split around the first unquoted `word`, trimming both sides
fn split_keyword<'a>(text: &'a str, word: &str) -> Option<(&'a str, &'a str)> {
    let pos = find_word(text, word)?;
    Some((text[..pos].trim(), text[pos + word.len()..].trim()))
}

/// Text after a leading `keyword`, which must end at a word boundary
fn strip_keyword<'a>(text: &'a str, keyword: &str) -> Option<&'a str> {
    let text = text.trim_start();
    let head = text.get(..keyword.len())?;
    if !head.eq_ignore_ascii_case(keyword) {
        return None;
    }
    let rest = &text[keyword.len()..];
    if rest.chars().next().is_some_and(is_word_char) {
        return None;
    }
    Some(rest.trim_start())
}

fn strip_any<'a>(text: &'a str, keywords: &[&str]) -> Option<&'a str> {
    keywords.iter().find_map(|k| strip_keyword(text, k))
}

/// Text before a trailing `word`
fn strip_suffix_word<'a>(text: &'a str, word: &str) -> Option<&'a str> {
    let text = text.trim_end();
    let cut = text.len().checked_sub(word.len())?;
    let tail = text.get(cut..)?;
    if !tail.eq_ignore_ascii_case(word) {
        return None;
    }
    let head = &text[..cut];
    if head.chars().next_back().is_some_and(is_word_char) {
        return None;
    }
    Some(head.trim_end())
}

fn strip_suffix_any<'a>(text: &'a str, words: &[&str]) -> Option<&'a str> {
    words.iter().find_map(|w| strip_suffix_word(text, w))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tabedit_table::row;

    fn people() -> Table {
        Table::from_rows(
            ["Name", "City", "Age"],
            [
                row([("Name", "Ann".into()), ("City", "Oslo".into()), ("Age", 31.0.into())]),
                row([("Name", "Bob".into()), ("City", "Rome".into()), ("Age", 45.0.into())]),
                row([("Name", "Cy".into()), ("City", "Oslo".into()), ("Age", 27.0.into())]),
            ],
        )
        .unwrap()
    }

    fn kinds(interpretation: Interpretation) -> Vec<OpKind> {
        match interpretation {
            Interpretation::Batch(batch) => batch.iter().map(|op| op.kind().clone()).collect(),
            Interpretation::Clarify(c) => panic!("unexpected question: {}", c.question),
        }
    }

    fn question(interpretation: Interpretation) -> ClarificationRequest {
        match interpretation {
            Interpretation::Clarify(c) => c,
            Interpretation::Batch(b) => panic!("unexpected batch: {}", b.summary()),
        }
    }

    fn parse(request: &str) -> Interpretation {
        RuleInterpreter::new().parse(request, &people()).unwrap()
    }

    #[test]
    fn add_row_with_values() {
        let ops = kinds(parse("add row Name=Dee, city='New York', Age=50"));
        assert_eq!(
            ops,
            vec![OpKind::AddRow {
                values: row([
                    ("Name", Value::text("Dee")),
                    ("City", Value::text("New York")),
                    ("Age", Value::Number(50.0)),
                ]),
            }]
        );
    }

    #[test]
    fn delete_rows_by_number_are_one_based() {
        let ops = kinds(parse("delete rows 1 and 3"));
        assert_eq!(ops, vec![OpKind::DeleteRow { rows: vec![0, 2] }]);
    }

    #[test]
    fn out_of_range_row_is_parse_error() {
        let err = RuleInterpreter::new().parse("delete row 9", &people()).unwrap_err();
        assert_eq!(
            err,
            InterpretError::Parse("row 9 does not exist (table has 3 rows)".to_string())
        );
    }

    #[test]
    fn delete_rows_where_selects_matches() {
        let ops = kinds(parse("delete rows where City = 'Oslo'"));
        assert_eq!(ops, vec![OpKind::DeleteRow { rows: vec![0, 2] }]);
    }

    #[test]
    fn ambiguous_singular_delete_asks() {
        let c = question(parse("delete the row where City = 'Oslo'"));
        assert!(c.question.contains("rows 1, 3"), "{}", c.question);
        assert_eq!(c.partial["kind"], "delete_row");
        assert_eq!(c.partial["candidates"], json!([1, 3]));
    }

    #[test]
    fn unique_singular_delete_proceeds() {
        let ops = kinds(parse("delete the row where Name = 'Bob'"));
        assert_eq!(ops, vec![OpKind::DeleteRow { rows: vec![1] }]);
    }

    #[test]
    fn set_with_filter_and_formula() {
        let ops = kinds(parse("set Age = Age + 1 where City = 'Oslo'"));
        let OpKind::UpdateColumn { column, assign, filter } = &ops[0] else {
            panic!("expected update_column");
        };
        assert_eq!(column, "Age");
        assert!(matches!(assign, Assignment::Formula(f) if f.source() == "Age + 1"));
        assert_eq!(filter.as_ref().map(Formula::source), Some("City = 'Oslo'"));
    }

    #[test]
    fn bare_word_assignment_is_text() {
        let ops = kinds(parse("set City = Paris"));
        assert!(matches!(
            &ops[0],
            OpKind::UpdateColumn { assign: Assignment::Value(v), .. } if *v == Value::text("Paris")
        ));
    }

    #[test]
    fn clauses_chain() {
        let ops = kinds(parse("remove duplicates by City keep last; then sort by Age desc"));
        assert_eq!(
            ops,
            vec![
                OpKind::Deduplicate {
                    keys: vec!["City".to_string()],
                    keep: Keep::Last,
                },
                OpKind::Sort {
                    keys: vec![SortKey::desc("Age")],
                },
            ]
        );
    }

    #[test]
    fn add_column_with_formula_computes() {
        let ops = kinds(parse("add column Decade = Age / 10"));
        assert_eq!(ops.len(), 2);
        assert!(matches!(&ops[0], OpKind::AddColumn { column, .. } if column == "Decade"));
        assert!(matches!(&ops[1], OpKind::Compute { column, .. } if column == "Decade"));
    }

    #[test]
    fn aggregate_measures_and_keys() {
        let ops = kinds(parse("aggregate avg of Age as MeanAge, count by City"));
        assert_eq!(
            ops,
            vec![OpKind::Aggregate {
                group_by: vec!["City".to_string()],
                measures: vec![
                    Measure::new(AggFunc::Avg, "Age").with_alias("MeanAge"),
                    Measure::new(AggFunc::Count, "City").with_alias("count"),
                ],
            }]
        );
    }

    #[test]
    fn outliers_without_policy_ask() {
        let c = question(parse("remove outliers in Age using iqr 1.5"));
        assert_eq!(c.question, "Should outliers in 'Age' be dropped or capped?");
        assert_eq!(c.partial["rule"], json!({"method": "iqr", "k": 1.5}));
    }

    #[test]
    fn outlier_defaults_fill_gaps() {
        let interpreter = RuleInterpreter::new().with_outlier_defaults(OutlierDefaults {
            rule: OutlierRule::StdDev { k: 2.0 },
            policy: OutlierPolicy::Drop,
        });
        let ops = kinds(interpreter.parse("cap outliers in Age", &people()).unwrap());
        assert_eq!(
            ops,
            vec![OpKind::RemoveOutliers {
                column: "Age".to_string(),
                rule: OutlierRule::StdDev { k: 2.0 },
                policy: OutlierPolicy::Cap,
            }]
        );
    }

    #[test]
    fn unknown_column_fails_grounding() {
        let err = RuleInterpreter::new().parse("delete column Salary", &people()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "could not understand request: operation #1 (delete_column): no column named 'Salary'"
        );
    }

    #[test]
    fn unrecognised_request() {
        assert!(RuleInterpreter::new().parse("make it nicer", &people()).is_err());
        assert!(RuleInterpreter::new().parse("  ", &people()).is_err());
    }

    #[test]
    fn answers_resolve_pending_clauses() {
        let pending = PendingClarification {
            question: "Which one?".to_string(),
            original_request: "delete the row where City = 'Oslo'; sort by Age".to_string(),
            partial: json!({
                "kind": "delete_row",
                "candidates": [1, 3],
                "clause": 0,
                "clauses": ["delete the row where City = 'Oslo'", "sort by Age"],
            }),
        };
        let merged = |text: &str| Some(Answer::Merged(text.to_string()));
        assert_eq!(merge_answer(&pending, "row 3"), merged("delete rows 3; sort by Age"));
        assert_eq!(merge_answer(&pending, "the first one"), merged("delete rows 1; sort by Age"));
        assert_eq!(merge_answer(&pending, "all of them"), merged("delete rows 1, 3; sort by Age"));
        assert_eq!(merge_answer(&pending, "rows 2 and 3"), merged("delete rows 3; sort by Age"));
        assert_eq!(merge_answer(&pending, "2"), Some(Answer::OutsideChoices));
        assert_eq!(merge_answer(&pending, "never mind"), None);
    }

    #[tokio::test]
    async fn row_outside_candidates_asks_again() {
        let interpreter = RuleInterpreter::new();
        let table = people();
        let first = interpreter
            .interpret("delete the row where City = 'Oslo'", &table, &ThreadContext::first(None))
            .await
            .unwrap();
        let asked = question(first);
        let pending = PendingClarification {
            question: asked.question.clone(),
            original_request: "delete the row where City = 'Oslo'".to_string(),
            partial: asked.partial.clone(),
        };

        let again = question(
            interpreter
                .interpret("2", &table, &ThreadContext::first(Some(pending.clone())))
                .await
                .unwrap(),
        );
        assert_eq!(again.question, format!("{ASK_AGAIN}{}", asked.question));
        assert_eq!(again.partial, asked.partial);

        let repeated = PendingClarification {
            question: again.question.clone(),
            ..pending
        };
        assert_eq!(ask_again(&repeated).question, again.question);
    }

    #[tokio::test]
    async fn outlier_answer_completes_request() {
        let interpreter = RuleInterpreter::new();
        let table = people();
        let first = interpreter
            .interpret("remove outliers in Age", &table, &ThreadContext::first(None))
            .await
            .unwrap();
        let c = question(first);
        let pending = PendingClarification {
            question: c.question,
            original_request: "remove outliers in Age".to_string(),
            partial: c.partial,
        };
        let second = interpreter
            .interpret("iqr 1.5, and cap them", &table, &ThreadContext::first(Some(pending)))
            .await
            .unwrap();
        assert_eq!(
            kinds(second),
            vec![OpKind::RemoveOutliers {
                column: "Age".to_string(),
                rule: OutlierRule::Iqr { k: 1.5 },
                policy: OutlierPolicy::Cap,
            }]
        );
    }

    #[test]
    fn scanning_respects_quotes() {
        assert_eq!(find_word("Name = 'then' then x", "then"), Some(14));
        assert_eq!(split_commas("A='x, y', B=2"), vec!["A='x, y'", "B=2"]);
        assert_eq!(strip_keyword("Sorted", "sort"), None);
        assert_eq!(strip_suffix_word("Age desc", "desc"), Some("Age"));
    }
}
