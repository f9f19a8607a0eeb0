//! Atomic batch execution
//!
//! [`Executor::execute`] applies a batch to a copy of the input table.
//! Either every operation succeeds and the new table is returned, or the
//! first failure is reported and the input is untouched.

use crate::error::{ApplyResult, OperationError, OperationErrorKind};
use crate::expr::Formula;
use crate::group::{aggregate, group_rows};
use crate::grounding::require_column;
use crate::operation::{
    Assignment, Batch, Direction, Keep, Measure, OpKind, OutlierPolicy, OutlierRule, SortKey,
};
use crate::stats::{is_outlier, outlier_bounds};
use im::Vector;
use std::cmp::Ordering;
use std::collections::HashSet;
use tabedit_table::{Row, Table, Value, ValueKey};
use tracing::debug;

/// Applies operation batches
#[derive(Debug, Clone, Copy, Default)]
pub struct Executor;

impl Executor {
    /// Create an executor
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Apply every operation in order
    ///
    /// # Errors
    /// Returns `OperationError` naming the first step that failed
    pub fn execute(&self, table: &Table, batch: &Batch) -> Result<Table, OperationError> {
        let mut working = table.clone();
        for (step, op) in batch.iter().enumerate() {
            working = self
                .apply(&working, op.kind())
                .map_err(|kind| OperationError::new(step, op.name(), kind))?;
            debug!(
                step,
                op = op.name(),
                rows = working.row_count(),
                columns = working.column_count(),
                "applied operation"
            );
        }
        Ok(working)
    }

    /// Apply a single operation, returning the resulting table
    ///
    /// # Errors
    /// Returns the reason the operation could not be applied
    pub fn apply(&self, table: &Table, kind: &OpKind) -> ApplyResult<Table> {
        match kind {
            OpKind::AddRow { values } => add_row(table, values),
            OpKind::UpdateRow { row, values } => update_row(table, *row, values),
            OpKind::DeleteRow { rows } => delete_rows(table, rows),
            OpKind::AddColumn {
                column,
                default,
                position,
            } => {
                let mut out = table.clone();
                out.insert_column(column.trim(), *position, default)?;
                Ok(out)
            }
            OpKind::UpdateColumn {
                column,
                assign,
                filter,
            } => {
                let column = require_column(table, column)?;
                assign_column(table, table.clone(), column, assign, filter.as_ref())
            }
            OpKind::DeleteColumn { column } => {
                let mut out = table.clone();
                out.remove_column(require_column(table, column)?)?;
                Ok(out)
            }
            OpKind::Deduplicate { keys, keep } => deduplicate(table, keys, *keep),
            OpKind::RemoveOutliers {
                column,
                rule,
                policy,
            } => remove_outliers(table, column, rule, *policy),
            OpKind::Aggregate { group_by, measures } => aggregate_table(table, group_by, measures),
            OpKind::Sort { keys } => sort(table, keys),
            OpKind::Filter { predicate } => {
                let mut keep = Vec::with_capacity(table.row_count());
                for index in 0..table.row_count() {
                    keep.push(predicate.matches(table, index)?);
                }
                let mut out = table.clone();
                out.retain_rows(|i, _| keep[i]);
                Ok(out)
            }
            OpKind::PivotSummary { group_by, measures } => pivot_summary(table, group_by, measures),
            OpKind::Compute { column, formula } => {
                let mut out = table.clone();
                let name = match table.resolve_column(column) {
                    Some(existing) => existing.to_string(),
                    None => {
                        let name = column.trim().to_string();
                        out.insert_column(name.clone(), None, &Value::Null)?;
                        name
                    }
                };
                let assign = Assignment::Formula(formula.clone());
                assign_column(table, out, &name, &assign, None)
            }
        }
    }
}

/// Map payload keys onto the table's spelling of each column
fn resolve_row(table: &Table, values: &Row) -> ApplyResult<Row> {
    values
        .iter()
        .map(|(k, v)| Ok((require_column(table, k)?.to_string(), v.clone())))
        .collect()
}

fn add_row(table: &Table, values: &Row) -> ApplyResult<Table> {
    let mut out = table.clone();
    out.push_row(resolve_row(table, values)?)?;
    Ok(out)
}

fn update_row(table: &Table, row: usize, values: &Row) -> ApplyResult<Table> {
    let mut out = table.clone();
    for (column, value) in resolve_row(table, values)? {
        out.set_cell(row, &column, value)?;
    }
    Ok(out)
}

fn delete_rows(table: &Table, rows: &[usize]) -> ApplyResult<Table> {
    if rows.is_empty() {
        return Err(OperationErrorKind::InvalidParameters("no rows to delete".to_string()));
    }
    let mut seen = HashSet::new();
    for &row in rows {
        if !seen.insert(row) {
            return Err(OperationErrorKind::DuplicateRow(row));
        }
    }
    let mut descending = rows.to_vec();
    descending.sort_unstable_by(|a, b| b.cmp(a));
    let mut out = table.clone();
    for row in descending {
        out.remove_row(row)?;
    }
    Ok(out)
}

/// Write `assign` into `column` of `out`, evaluating against `source`
///
/// A formula that fails on a row leaves that cell as it was. A failing
/// filter fails the operation.
fn assign_column(
    source: &Table,
    mut out: Table,
    column: &str,
    assign: &Assignment,
    filter: Option<&Formula>,
) -> ApplyResult<Table> {
    for index in 0..source.row_count() {
        if let Some(predicate) = filter {
            if !predicate.matches(source, index)? {
                continue;
            }
        }
        let value = match assign {
            Assignment::Value(v) => v.clone(),
            Assignment::Formula(f) => match f.eval(source, index) {
                Ok(v) => v,
                Err(err) => {
                    debug!(row = index, column, formula = f.source(), %err, "formula skipped row");
                    continue;
                }
            },
        };
        out.set_cell(index, column, value)?;
    }
    Ok(out)
}

fn resolve_keys(table: &Table, keys: &[String]) -> ApplyResult<Vec<String>> {
    if keys.is_empty() {
        return Ok(table.columns().to_vec());
    }
    keys.iter()
        .map(|k| Ok(require_column(table, k)?.to_string()))
        .collect()
}

fn row_key(table: &Table, index: usize, keys: &[String]) -> Vec<ValueKey> {
    keys.iter().map(|k| table.cell(index, k).key()).collect()
}

fn deduplicate(table: &Table, keys: &[String], keep: Keep) -> ApplyResult<Table> {
    let keys = resolve_keys(table, keys)?;
    let mut seen = HashSet::new();
    let mut kept = vec![false; table.row_count()];
    let order: Box<dyn Iterator<Item = usize>> = match keep {
        Keep::First => Box::new(0..table.row_count()),
        Keep::Last => Box::new((0..table.row_count()).rev()),
    };
    for index in order {
        if seen.insert(row_key(table, index, &keys)) {
            kept[index] = true;
        }
    }
    let mut out = table.clone();
    out.retain_rows(|i, _| kept[i]);
    Ok(out)
}

fn remove_outliers(
    table: &Table,
    column: &str,
    rule: &OutlierRule,
    policy: OutlierPolicy,
) -> ApplyResult<Table> {
    let column = require_column(table, column)?;
    if !rule.k().is_finite() || rule.k() < 0.0 {
        return Err(OperationErrorKind::InvalidParameters(format!(
            "outlier threshold must be a non-negative number, got {}",
            rule.k()
        )));
    }
    let numbers: Vec<f64> = table.column_values(column).filter_map(Value::as_f64).collect();
    let Some(bounds) = outlier_bounds(rule, &numbers) else {
        return Ok(table.clone());
    };
    let outlier = |index: usize| {
        table
            .cell(index, column)
            .as_f64()
            .filter(|n| is_outlier(*n, bounds))
    };
    let mut out = table.clone();
    match policy {
        OutlierPolicy::Drop => out.retain_rows(|i, _| outlier(i).is_none()),
        OutlierPolicy::Cap => {
            for index in 0..table.row_count() {
                if let Some(n) = outlier(index) {
                    out.set_cell(index, column, Value::Number(n.clamp(bounds.0, bounds.1)))?;
                }
            }
        }
    }
    Ok(out)
}

fn check_measures(measures: &[Measure]) -> ApplyResult<()> {
    if measures.is_empty() {
        return Err(OperationErrorKind::InvalidParameters("no measures given".to_string()));
    }
    Ok(())
}

fn aggregate_table(table: &Table, group_by: &[String], measures: &[Measure]) -> ApplyResult<Table> {
    check_measures(measures)?;
    let keys = group_by
        .iter()
        .map(|k| Ok(require_column(table, k)?.to_string()))
        .collect::<ApplyResult<Vec<_>>>()?;
    let measures = measures
        .iter()
        .map(|m| {
            let column = require_column(table, &m.column)?.to_string();
            Ok(Measure { column, ..m.clone() })
        })
        .collect::<ApplyResult<Vec<_>>>()?;

    let mut columns = keys.clone();
    for m in &measures {
        let name = m.output_name().to_string();
        if columns.contains(&name) {
            return Err(OperationErrorKind::DuplicateOutput(name));
        }
        columns.push(name);
    }

    let mut out = Table::new(columns)?;
    for group in group_rows(table, &keys) {
        let mut row: Row = keys.iter().cloned().zip(group.key).filter(|(_, v)| !v.is_null()).collect();
        for m in &measures {
            row.insert(m.output_name().to_string(), aggregate(table, m, &group.rows)?);
        }
        out.push_row(row)?;
    }
    Ok(out)
}

fn pivot_summary(table: &Table, group_by: &[String], measures: &[Measure]) -> ApplyResult<Table> {
    check_measures(measures)?;
    let keys = group_by
        .iter()
        .map(|k| Ok(require_column(table, k)?.to_string()))
        .collect::<ApplyResult<Vec<_>>>()?;
    let mut resolved = Vec::with_capacity(measures.len());
    let mut outputs: Vec<String> = Vec::new();
    for m in measures {
        let column = require_column(table, &m.column)?.to_string();
        let output = require_column(table, m.output_name())?.to_string();
        if outputs.contains(&output) || keys.contains(&output) {
            return Err(OperationErrorKind::DuplicateOutput(output));
        }
        outputs.push(output);
        resolved.push(Measure {
            column,
            func: m.func,
            alias: None,
        });
    }

    let mut out = table.clone();
    for group in group_rows(table, &keys) {
        let mut row: Row = keys.iter().cloned().zip(group.key).filter(|(_, v)| !v.is_null()).collect();
        for (m, output) in resolved.iter().zip(&outputs) {
            row.insert(output.clone(), aggregate(table, m, &group.rows)?);
        }
        out.push_row(row)?;
    }
    Ok(out)
}

fn compare_rows(table: &Table, a: usize, b: usize, keys: &[(String, Direction)]) -> Ordering {
    for (column, direction) in keys {
        let left = table.cell(a, column);
        let right = table.cell(b, column);
        let ord = match direction {
            Direction::Asc => left.total_cmp(right),
            Direction::Desc => right.total_cmp(left),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn sort(table: &Table, keys: &[SortKey]) -> ApplyResult<Table> {
    if keys.is_empty() {
        return Err(OperationErrorKind::InvalidParameters("no sort keys given".to_string()));
    }
    let keys = keys
        .iter()
        .map(|k| Ok((require_column(table, &k.column)?.to_string(), k.direction)))
        .collect::<ApplyResult<Vec<_>>>()?;
    let mut order: Vec<usize> = (0..table.row_count()).collect();
    // Vec::sort_by is stable
    order.sort_by(|&a, &b| compare_rows(table, a, b, &keys));
    let rows: Vector<Row> = order.into_iter().map(|i| table.rows()[i].clone()).collect();
    let mut out = table.clone();
    out.replace_rows(rows)?;
    Ok(out)
}
