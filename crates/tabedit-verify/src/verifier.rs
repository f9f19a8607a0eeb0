//! Batch verification
//!
//! The batch is replayed one step at a time. For every step the observed
//! difference between its input and output is compared with the declared
//! effect, with symbolic counts (duplicates, outliers, matching rows,
//! groups) recomputed from the step's input table. Kind-specific content
//! checks then confirm the result has the property the request asked for.

use crate::error::VerifyError;
use crate::result::{Aspect, Check, VerificationResult};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use tabedit_ops::{
    is_outlier, outlier_bounds, Assignment, Batch, CellEffect, ChangedRows, ColumnEffect,
    Direction, Executor, Formula, OpKind, Operation, OutlierPolicy, OutlierRule, RowEffect,
};
use tabedit_table::{Row, Table, Value, ValueKey};
use tracing::debug;

/// Verify that `post` is what `batch` should have produced from `pre`
#[must_use]
pub fn verify(pre: &Table, post: &Table, batch: &Batch) -> VerificationResult {
    let executor = Executor::new();
    let mut checks = Vec::new();
    let mut working = pre.clone();

    for (step, op) in batch.iter().enumerate() {
        let mut ctx = StepCtx {
            step,
            op,
            before: &working,
            checks: Vec::new(),
        };
        let Ok(after) = executor.apply(&working, op.kind()).map_err(|err| {
            ctx.fail(Aspect::Replay, "a replayable operation", VerifyError::from(err));
        }) else {
            checks.append(&mut ctx.checks);
            return VerificationResult::from_checks(checks);
        };
        ctx.run(&after);
        debug!(
            step,
            op = op.name(),
            checks = ctx.checks.len(),
            failed = ctx.checks.iter().filter(|c| !c.pass).count(),
            "verified step"
        );
        checks.append(&mut ctx.checks);
        drop(ctx);
        working = after;
    }

    let matches = working == *post;
    checks.push(Check {
        step: None,
        op: "batch".to_string(),
        aspect: Aspect::Replay,
        expected: format!("result of replaying {} operation(s)", batch.len()),
        observed: if matches {
            "identical table".to_string()
        } else {
            describe_difference(&working, post)
        },
        pass: matches,
    });
    VerificationResult::from_checks(checks)
}

fn describe_difference(expected: &Table, actual: &Table) -> String {
    if expected.columns() != actual.columns() {
        return columns_phrase(actual.columns());
    }
    if expected.row_count() != actual.row_count() {
        return format!("{} row(s)", actual.row_count());
    }
    let differing = (0..expected.row_count())
        .filter(|&i| expected.row(i) != actual.row(i))
        .count();
    format!("{differing} differing row(s)")
}

struct StepCtx<'a> {
    step: usize,
    op: &'a Operation,
    before: &'a Table,
    checks: Vec<Check>,
}

impl StepCtx<'_> {
    fn check(&mut self, aspect: Aspect, expected: impl Into<String>, observed: impl Into<String>, pass: bool) {
        self.checks.push(Check {
            step: Some(self.step),
            op: self.op.name().to_string(),
            aspect,
            expected: expected.into(),
            observed: observed.into(),
            pass,
        });
    }

    fn fail(&mut self, aspect: Aspect, expected: &str, err: VerifyError) {
        self.check(aspect, expected, err.to_string(), false);
    }

    fn run(&mut self, after: &Table) {
        if let Err(err) = self.check_rows(after) {
            self.fail(Aspect::Rows, "a resolvable row effect", err);
        }
        self.check_columns(after);
        if let Err(err) = self.check_cells(after) {
            self.fail(Aspect::Cells, "a resolvable cell effect", err);
        }
        if let Err(err) = self.check_content(after) {
            self.fail(Aspect::Content, "a verifiable result", err);
        }
    }

    fn kind(&self) -> &OpKind {
        self.op.kind()
    }

    // ------------------------------------------------------------------
    // rows
    // ------------------------------------------------------------------

    #[allow(clippy::cast_possible_wrap)]
    fn check_rows(&mut self, after: &Table) -> Result<(), VerifyError> {
        let before = self.before.row_count();
        let now = after.row_count();
        let added = now as i64 - before as i64;
        let op = self.op;
        match &op.effect.rows {
            RowEffect::Unchanged => {
                self.check(Aspect::Rows, format!("row count unchanged at {before}"), now.to_string(), now == before);
            }
            RowEffect::Added(n) => {
                self.check(Aspect::Rows, rows_phrase(*n, "added"), added.to_string(), added == *n as i64);
            }
            RowEffect::Removed(n) => {
                self.check(Aspect::Rows, rows_phrase(*n, "removed"), (-added).to_string(), -added == *n as i64);
            }
            RowEffect::DuplicatesRemoved => {
                let keys = self.dedupe_keys()?;
                let distinct = distinct_keys(self.before, &keys);
                let n = before - distinct;
                self.check(Aspect::Rows, rows_phrase(n, "removed"), (-added).to_string(), -added == n as i64);
            }
            RowEffect::OutliersRemoved => {
                let (column, rule) = self.outlier_params()?;
                let n = outlier_rows(self.before, &column, &rule).len();
                self.check(Aspect::Rows, rows_phrase(n, "removed"), (-added).to_string(), -added == n as i64);
            }
            RowEffect::MatchingRetained => {
                let predicate = self.predicate()?;
                let n = matching_rows(self.before, predicate)?.len();
                self.check(Aspect::Rows, rows_phrase(n, "retained"), now.to_string(), now == n);
            }
            RowEffect::Grouped => {
                let n = self.group_count()?;
                self.check(Aspect::Rows, format!("{} (one per group)", rows_phrase(n, "in total")), now.to_string(), now == n);
            }
            RowEffect::GroupsAppended => {
                let n = self.group_count()?;
                self.check(Aspect::Rows, rows_phrase(n, "added"), added.to_string(), added == n as i64);
            }
        }
        Ok(())
    }

    fn dedupe_keys(&self) -> Result<Vec<String>, VerifyError> {
        match self.kind() {
            OpKind::Deduplicate { keys, .. } if keys.is_empty() => Ok(self.before.columns().to_vec()),
            OpKind::Deduplicate { keys, .. } => resolve_all(self.before, keys),
            _ => Err(VerifyError::Unresolvable {
                effect: "duplicates_removed",
            }),
        }
    }

    fn outlier_params(&self) -> Result<(String, OutlierRule), VerifyError> {
        match self.kind() {
            OpKind::RemoveOutliers { column, rule, .. } => Ok((resolve(self.before, column)?, *rule)),
            _ => Err(VerifyError::Unresolvable {
                effect: "outliers_removed",
            }),
        }
    }

    fn predicate(&self) -> Result<&Formula, VerifyError> {
        match self.kind() {
            OpKind::Filter { predicate } => Ok(predicate),
            _ => Err(VerifyError::Unresolvable {
                effect: "matching_retained",
            }),
        }
    }

    fn group_count(&self) -> Result<usize, VerifyError> {
        match self.kind() {
            OpKind::Aggregate { group_by, .. } | OpKind::PivotSummary { group_by, .. } => {
                if group_by.is_empty() {
                    return Ok(1);
                }
                let keys = resolve_all(self.before, group_by)?;
                Ok(distinct_keys(self.before, &keys))
            }
            _ => Err(VerifyError::Unresolvable { effect: "grouped" }),
        }
    }

    // ------------------------------------------------------------------
    // columns
    // ------------------------------------------------------------------

    fn check_columns(&mut self, after: &Table) {
        let before = self.before.columns();
        let expected: Vec<String> = match &self.op.effect.columns {
            ColumnEffect::Unchanged => before.to_vec(),
            ColumnEffect::Added(name) => {
                let position = match self.kind() {
                    OpKind::AddColumn { position, .. } => position.unwrap_or(before.len()),
                    _ => before.len(),
                };
                let mut cols = before.to_vec();
                cols.insert(position.min(cols.len()), name.trim().to_string());
                cols
            }
            ColumnEffect::Removed(name) => before
                .iter()
                .filter(|c| !same_name(c, name))
                .cloned()
                .collect(),
            ColumnEffect::Reshaped(names) => names.clone(),
            ColumnEffect::Extended(names) => {
                let mut cols = before.to_vec();
                for name in names {
                    if !cols.iter().any(|c| same_name(c, name)) {
                        cols.push(name.trim().to_string());
                    }
                }
                cols
            }
        };
        let pass = expected.len() == after.column_count()
            && expected.iter().zip(after.columns()).all(|(e, a)| same_name(e, a));
        self.check(Aspect::Columns, columns_phrase(&expected), columns_phrase(after.columns()), pass);
    }

    // ------------------------------------------------------------------
    // cells
    // ------------------------------------------------------------------

    fn check_cells(&mut self, after: &Table) -> Result<(), VerifyError> {
        match self.op.effect.cells.clone() {
            CellEffect::None => self.check_untouched(after, |_, _| false),
            CellEffect::RowValues { row, columns } => {
                let payload = match self.kind() {
                    OpKind::UpdateRow { values, .. } => Some(values.clone()),
                    _ => None,
                };
                let columns = resolve_all(after, &columns)?;
                let updated = columns
                    .iter()
                    .filter(|c| {
                        let observed = after.cell(row, c);
                        match &payload {
                            Some(values) => payload_value(values, c) == Some(observed),
                            None => observed != self.before.cell(row, c),
                        }
                    })
                    .count();
                self.check(
                    Aspect::Cells,
                    format!("{} updated in row {}", cells_phrase(columns.len()), row + 1),
                    updated.to_string(),
                    updated == columns.len(),
                );
                self.check_untouched(after, |i, c| i == row && columns.iter().any(|t| t == c));
            }
            CellEffect::ColumnValues { column, changed } => {
                let column = after
                    .resolve_column(&column)
                    .map(str::to_string)
                    .ok_or(VerifyError::MissingColumn(column))?;
                let (assign, filter) = match self.kind() {
                    OpKind::UpdateColumn { assign, filter, .. } => (assign.clone(), filter.clone()),
                    OpKind::Compute { formula, .. } => (Assignment::Formula(formula.clone()), None),
                    _ => {
                        return Err(VerifyError::Unresolvable {
                            effect: "column_values",
                        })
                    }
                };
                let targets: Vec<usize> = match (changed, &filter) {
                    (ChangedRows::AllRows, _) | (_, None) => (0..self.before.row_count()).collect(),
                    (_, Some(predicate)) => matching_rows(self.before, predicate)?,
                };
                let updated = targets
                    .iter()
                    .filter(|&&i| {
                        let expected = match &assign {
                            Assignment::Value(v) => Some(v.clone()),
                            Assignment::Formula(f) => f.eval(self.before, i).ok(),
                        };
                        expected.as_ref() == Some(after.cell(i, &column))
                    })
                    .count();
                let expected = match changed {
                    ChangedRows::Exactly(n) => n,
                    _ => targets.len(),
                };
                self.check(
                    Aspect::Cells,
                    format!("{} updated in column '{column}'", cells_phrase(expected)),
                    updated.to_string(),
                    updated == expected,
                );
                let targets: HashSet<usize> = targets.into_iter().collect();
                self.check_untouched(after, |i, c| c == column && targets.contains(&i));
            }
            CellEffect::Capped { column } => {
                let OpKind::RemoveOutliers { rule, .. } = self.kind() else {
                    return Err(VerifyError::Unresolvable { effect: "capped" });
                };
                let rule = *rule;
                let resolved = resolve(self.before, &column)?;
                let bounds = numeric_bounds(self.before, &resolved, &rule);
                let qualifying = outlier_rows(self.before, &resolved, &rule);
                let capped = qualifying
                    .iter()
                    .filter(|&&i| {
                        let value = self.before.cell(i, &resolved).as_f64();
                        match (value, bounds) {
                            (Some(n), Some((lo, hi))) => after.cell(i, &resolved) == &Value::Number(n.clamp(lo, hi)),
                            _ => false,
                        }
                    })
                    .count();
                self.check(
                    Aspect::Cells,
                    format!("{} capped in column '{resolved}'", cells_phrase(qualifying.len())),
                    capped.to_string(),
                    capped == qualifying.len(),
                );
                let qualifying: HashSet<usize> = qualifying.into_iter().collect();
                self.check_untouched(after, |i, c| c == resolved && qualifying.contains(&i));
            }
            CellEffect::Reordered => self.check_permutation(after),
        }
        Ok(())
    }

    /// Cells outside `touched` must be carried over unchanged
    fn check_untouched(&mut self, after: &Table, touched: impl Fn(usize, &str) -> bool) {
        let shared: Vec<&String> = self
            .before
            .columns()
            .iter()
            .filter(|c| after.has_column(c))
            .collect();
        let before = self.before;
        match self.op.effect.rows {
            RowEffect::Grouped => {}
            RowEffect::Unchanged | RowEffect::Added(_) | RowEffect::GroupsAppended => {
                let n = before.row_count().min(after.row_count());
                let changed = (0..n)
                    .flat_map(|i| shared.iter().map(move |c| (i, c.as_str())))
                    .filter(|&(i, c)| !touched(i, c) && before.cell(i, c) != after.cell(i, c))
                    .count();
                self.check(
                    Aspect::Cells,
                    "no other cells changed",
                    format!("{} changed", cells_phrase(changed)),
                    changed == 0,
                );
            }
            _ => {
                // survivors must appear in their original order, unmodified
                let same = |i: usize, j: usize| shared.iter().all(|c| before.cell(j, c) == after.cell(i, c));
                let mut cursor = 0;
                let mut broken = None;
                for i in 0..after.row_count() {
                    match (cursor..before.row_count()).find(|&j| same(i, j)) {
                        Some(j) => cursor = j + 1,
                        None => {
                            broken = Some(i);
                            break;
                        }
                    }
                }
                self.check(
                    Aspect::Cells,
                    "remaining rows unchanged and in original order",
                    broken.map_or_else(|| "as expected".to_string(), |i| format!("row {} differs", i + 1)),
                    broken.is_none(),
                );
            }
        }
    }

    fn check_permutation(&mut self, after: &Table) {
        let mut counts: HashMap<Vec<ValueKey>, i64> = HashMap::new();
        for i in 0..self.before.row_count() {
            *counts.entry(dense_key(self.before, i)).or_default() += 1;
        }
        for i in 0..after.row_count() {
            *counts.entry(dense_key(after, i)).or_default() -= 1;
        }
        let differing: i64 = counts.values().map(|v| v.abs()).sum();
        self.check(
            Aspect::Cells,
            "the same rows in a new order",
            format!("{differing} row(s) differ"),
            differing == 0 && self.before.columns() == after.columns(),
        );
    }

    // ------------------------------------------------------------------
    // content
    // ------------------------------------------------------------------

    fn check_content(&mut self, after: &Table) -> Result<(), VerifyError> {
        match self.kind().clone() {
            OpKind::AddRow { values } => {
                let Some(last) = after.row_count().checked_sub(1) else {
                    self.check(Aspect::Content, "an appended row", "empty table", false);
                    return Ok(());
                };
                let wrong: Vec<&String> = after
                    .columns()
                    .iter()
                    .filter(|c| payload_value(&values, c).unwrap_or(&Value::Null) != after.cell(last, c))
                    .collect();
                self.check(
                    Aspect::Content,
                    "appended row to match the request",
                    mismatch_phrase(&wrong),
                    wrong.is_empty(),
                );
            }
            OpKind::Deduplicate { .. } => {
                let keys = self.dedupe_keys()?;
                // keys resolved against the input exist in the output too
                let remaining = after.row_count() - distinct_keys(after, &keys);
                self.check(
                    Aspect::Content,
                    "no duplicate keys",
                    format!("{remaining} duplicate(s) remain"),
                    remaining == 0,
                );
            }
            OpKind::RemoveOutliers {
                policy: OutlierPolicy::Drop,
                ..
            } => {
                let (column, rule) = self.outlier_params()?;
                let remaining = match numeric_bounds(self.before, &column, &rule) {
                    Some(bounds) => after
                        .column_values(&column)
                        .filter_map(Value::as_f64)
                        .filter(|n| is_outlier(*n, bounds))
                        .count(),
                    None => 0,
                };
                self.check(
                    Aspect::Content,
                    format!("no values outside the bounds in '{column}'"),
                    format!("{remaining} remain"),
                    remaining == 0,
                );
            }
            OpKind::Filter { predicate } => {
                let matching = matching_rows(after, &predicate)?.len();
                let failing = after.row_count() - matching;
                self.check(
                    Aspect::Content,
                    format!("every row to satisfy {predicate}"),
                    format!("{failing} row(s) do not"),
                    failing == 0,
                );
            }
            OpKind::Sort { keys } => {
                let keys = keys
                    .iter()
                    .map(|k| Ok((resolve(self.before, &k.column)?, k.direction)))
                    .collect::<Result<Vec<_>, VerifyError>>()?;
                let out_of_order = (1..after.row_count())
                    .filter(|&i| compare(after, i - 1, i, &keys) == Ordering::Greater)
                    .count();
                self.check(
                    Aspect::Content,
                    "rows in sort order",
                    format!("{out_of_order} row(s) out of order"),
                    out_of_order == 0,
                );
            }
            OpKind::Aggregate { group_by, .. } => {
                let keys: Vec<String> = group_by
                    .iter()
                    .filter_map(|k| after.resolve_column(k).map(str::to_string))
                    .collect();
                let distinct = distinct_keys(after, &keys);
                let expected = if keys.is_empty() { after.row_count().min(1) } else { after.row_count() };
                self.check(
                    Aspect::Content,
                    "one row per group",
                    format!("{distinct} distinct group(s) in {} row(s)", after.row_count()),
                    distinct == expected,
                );
            }
            _ => {}
        }
        Ok(())
    }
}

fn same_name(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

fn resolve(table: &Table, name: &str) -> Result<String, VerifyError> {
    table
        .resolve_column(name)
        .map(str::to_string)
        .ok_or_else(|| VerifyError::MissingColumn(name.to_string()))
}

fn resolve_all(table: &Table, names: &[String]) -> Result<Vec<String>, VerifyError> {
    names.iter().map(|n| resolve(table, n)).collect()
}

fn payload_value<'a>(values: &'a Row, column: &str) -> Option<&'a Value> {
    values
        .iter()
        .find(|(k, _)| same_name(k, column))
        .map(|(_, v)| v)
}

fn distinct_keys(table: &Table, keys: &[String]) -> usize {
    (0..table.row_count())
        .map(|i| keys.iter().map(|k| table.cell(i, k).key()).collect::<Vec<_>>())
        .collect::<HashSet<_>>()
        .len()
}

fn dense_key(table: &Table, row: usize) -> Vec<ValueKey> {
    table.dense_row(row).iter().map(Value::key).collect()
}

fn matching_rows(table: &Table, predicate: &Formula) -> Result<Vec<usize>, VerifyError> {
    let mut rows = Vec::new();
    for i in 0..table.row_count() {
        if predicate.matches(table, i)? {
            rows.push(i);
        }
    }
    Ok(rows)
}

fn numeric_bounds(table: &Table, column: &str, rule: &OutlierRule) -> Option<(f64, f64)> {
    let numbers: Vec<f64> = table.column_values(column).filter_map(Value::as_f64).collect();
    outlier_bounds(rule, &numbers)
}

fn outlier_rows(table: &Table, column: &str, rule: &OutlierRule) -> Vec<usize> {
    let Some(bounds) = numeric_bounds(table, column, rule) else {
        return Vec::new();
    };
    (0..table.row_count())
        .filter(|&i| table.cell(i, column).as_f64().is_some_and(|n| is_outlier(n, bounds)))
        .collect()
}

fn compare(table: &Table, a: usize, b: usize, keys: &[(String, Direction)]) -> Ordering {
    keys.iter()
        .map(|(column, direction)| {
            let ord = table.cell(a, column).total_cmp(table.cell(b, column));
            match direction {
                Direction::Asc => ord,
                Direction::Desc => ord.reverse(),
            }
        })
        .find(|ord| *ord != Ordering::Equal)
        .unwrap_or(Ordering::Equal)
}

fn rows_phrase(n: usize, verb: &str) -> String {
    format!("{n} {} {verb}", if n == 1 { "row" } else { "rows" })
}

fn cells_phrase(n: usize) -> String {
    format!("{n} {}", if n == 1 { "cell" } else { "cells" })
}

fn columns_phrase(columns: &[String]) -> String {
    format!("columns [{}]", columns.join(", "))
}

fn mismatch_phrase(columns: &[&String]) -> String {
    if columns.is_empty() {
        "matching row".to_string()
    } else {
        let names: Vec<&str> = columns.iter().map(|c| c.as_str()).collect();
        format!("different values in {}", names.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tabedit_ops::{DeclaredEffect, Keep, SortKey};
    use tabedit_table::row;

    fn people() -> Table {
        Table::from_rows(
            ["Name", "Age"],
            [
                row([("Name", "A".into()), ("Age", 30.0.into())]),
                row([("Name", "B".into()), ("Age", 25.0.into())]),
                row([("Name", "A".into()), ("Age", 30.0.into())]),
            ],
        )
        .unwrap()
    }

    fn run(table: &Table, batch: &Batch) -> VerificationResult {
        let post = Executor::new().execute(table, batch).unwrap();
        verify(table, &post, batch)
    }

    #[test]
    fn honest_batch_passes() {
        let batch = Batch::new()
            .with(OpKind::Deduplicate {
                keys: Vec::new(),
                keep: Keep::First,
            })
            .with(OpKind::Sort {
                keys: vec![SortKey::asc("Age")],
            });
        let result = run(&people(), &batch);
        assert!(result.pass, "{:?}", result.mismatch);
    }

    #[test]
    fn wrong_declared_count_fails() {
        let op = Operation::new(OpKind::DeleteRow { rows: vec![0] })
            .with_effect(DeclaredEffect::default().rows(RowEffect::Removed(2)));
        let result = run(&people(), &Batch::new().with(op));
        assert!(!result.pass);
        assert_eq!(
            result.mismatch.as_deref(),
            Some("operation #1 (delete_row): expected 2 rows removed, observed 1")
        );
    }

    #[test]
    fn skipped_formula_rows_are_caught() {
        let batch = Batch::new().with(OpKind::Compute {
            column: "Age".to_string(),
            formula: Formula::parse("Years + 1").unwrap(),
        });
        let result = run(&people(), &batch);
        assert!(!result.pass);
        assert_eq!(
            result.mismatch.as_deref(),
            Some("operation #1 (compute): expected 3 cells updated in column 'Age', observed 0")
        );
    }

    #[test]
    fn tampered_post_table_fails_replay_check() {
        let batch = Batch::new().with(OpKind::AddRow {
            values: row([("Name", "C".into())]),
        });
        let mut post = Executor::new().execute(&people(), &batch).unwrap();
        post.set_cell(0, "Age", 99.0.into()).unwrap();
        let result = verify(&people(), &post, &batch);
        assert!(!result.pass);
        assert_eq!(result.failures().last().map(|c| c.aspect), Some(Aspect::Replay));
    }

    #[test]
    fn replay_failure_reported() {
        let batch = Batch::new().with(OpKind::DeleteRow { rows: vec![7] });
        let result = verify(&people(), &people(), &batch);
        assert!(!result.pass);
        assert!(result.mismatch.unwrap().contains("replay failed"));
    }

    #[test]
    fn filter_with_wrong_effect_fails() {
        let op = Operation::new(OpKind::Filter {
            predicate: Formula::parse("Age > 26").unwrap(),
        })
        .with_effect(DeclaredEffect::default());
        let result = run(&people(), &Batch::new().with(op));
        assert_eq!(
            result.mismatch.as_deref(),
            Some("operation #1 (filter): expected row count unchanged at 3, observed 2")
        );
    }

    #[test]
    fn update_row_checks_payload() {
        let batch = Batch::new().with(OpKind::UpdateRow {
            row: 1,
            values: row([("Age", 26.0.into())]),
        });
        let result = run(&people(), &batch);
        assert!(result.pass, "{:?}", result.mismatch);
        assert!(result.checks.iter().any(|c| c.expected == "1 cell updated in row 2"));
    }

    #[test]
    fn symbolic_effect_on_wrong_kind_fails() {
        let op = Operation::new(OpKind::DeleteRow { rows: vec![0] })
            .with_effect(DeclaredEffect::default().rows(RowEffect::DuplicatesRemoved));
        let result = run(&people(), &Batch::new().with(op));
        assert!(!result.pass);
        assert!(result
            .mismatch
            .unwrap()
            .contains("duplicates_removed cannot be resolved"));
    }
}
