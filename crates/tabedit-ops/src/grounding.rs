//! Selector grounding
//!
//! Checks every column name, row index and formula reference in a batch
//! against the table it will run on, tracking how earlier steps change the
//! column list and row count. Interpreters call [`ground_batch`] before
//! handing a batch to the executor.

use crate::expr::Formula;
use crate::operation::{Assignment, Batch, OpKind, OutlierPolicy};
use tabedit_table::{Table, TableError};

/// Grounding failure within one step
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GroundingIssue {
    #[error("no column named '{0}'")]
    UnknownColumn(String),

    #[error("column '{0}' already exists")]
    ColumnExists(String),

    /// `row` is zero-based; messages number rows from 1
    #[error("row {} does not exist (table has {len} rows)", .row + 1)]
    RowOutOfRange { row: usize, len: usize },

    #[error("{0}")]
    Incomplete(String),
}

/// Grounding failure, numbered from 1 like execution errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("operation #{} ({op}): {issue}", .step + 1)]
pub struct GroundingError {
    pub step: usize,
    pub op: &'static str,
    pub issue: GroundingIssue,
}

/// Resolve a column name against a table, case-insensitively
///
/// # Errors
/// Returns `TableError::UnknownColumn` if nothing matches
pub fn require_column<'a>(table: &'a Table, name: &str) -> Result<&'a str, TableError> {
    table
        .resolve_column(name)
        .ok_or_else(|| TableError::UnknownColumn(name.to_string()))
}

/// Column list and row count as the batch proceeds
struct Shape {
    columns: Vec<String>,
    rows: Option<usize>,
}

impl Shape {
    fn has(&self, name: &str) -> bool {
        let name = name.trim();
        self.columns.iter().any(|c| c.eq_ignore_ascii_case(name))
    }

    fn column(&self, name: &str) -> Result<(), GroundingIssue> {
        if self.has(name) {
            Ok(())
        } else {
            Err(GroundingIssue::UnknownColumn(name.to_string()))
        }
    }

    fn row(&self, row: usize) -> Result<(), GroundingIssue> {
        match self.rows {
            Some(len) if row >= len => Err(GroundingIssue::RowOutOfRange { row, len }),
            _ => Ok(()),
        }
    }

    fn formula(&self, formula: &Formula) -> Result<(), GroundingIssue> {
        formula.columns().into_iter().try_for_each(|c| self.column(c))
    }

    fn remove(&mut self, name: &str) {
        let name = name.trim();
        self.columns.retain(|c| !c.eq_ignore_ascii_case(name));
    }

    fn apply(&mut self, kind: &OpKind) -> Result<(), GroundingIssue> {
        match kind {
            OpKind::AddRow { values } => {
                values.keys().try_for_each(|c| self.column(c))?;
                self.rows = self.rows.map(|n| n + 1);
            }
            OpKind::UpdateRow { row, values } => {
                self.row(*row)?;
                values.keys().try_for_each(|c| self.column(c))?;
            }
            OpKind::DeleteRow { rows } => {
                if rows.is_empty() {
                    return Err(GroundingIssue::Incomplete("no rows selected".to_string()));
                }
                rows.iter().try_for_each(|r| self.row(*r))?;
                self.rows = self.rows.map(|n| n.saturating_sub(rows.len()));
            }
            OpKind::AddColumn { column, position, .. } => {
                if self.has(column) {
                    return Err(GroundingIssue::ColumnExists(column.clone()));
                }
                if position.is_some_and(|p| p > self.columns.len()) {
                    return Err(GroundingIssue::Incomplete(format!(
                        "position {} is past the last column",
                        position.unwrap_or_default()
                    )));
                }
                self.columns
                    .insert(position.unwrap_or(self.columns.len()), column.clone());
            }
            OpKind::UpdateColumn { column, assign, filter } => {
                self.column(column)?;
                if let Assignment::Formula(f) = assign {
                    self.formula(f)?;
                }
                if let Some(f) = filter {
                    self.formula(f)?;
                }
            }
            OpKind::DeleteColumn { column } => {
                self.column(column)?;
                self.remove(column);
            }
            OpKind::Deduplicate { keys, .. } => {
                keys.iter().try_for_each(|c| self.column(c))?;
                self.rows = None;
            }
            OpKind::RemoveOutliers { column, rule, policy } => {
                self.column(column)?;
                if !rule.k().is_finite() || rule.k() < 0.0 {
                    return Err(GroundingIssue::Incomplete(format!(
                        "threshold {} must be a non-negative number",
                        rule.k()
                    )));
                }
                if *policy == OutlierPolicy::Drop {
                    self.rows = None;
                }
            }
            OpKind::Aggregate { group_by, measures } => {
                if measures.is_empty() {
                    return Err(GroundingIssue::Incomplete("no measures given".to_string()));
                }
                group_by.iter().try_for_each(|c| self.column(c))?;
                measures.iter().try_for_each(|m| self.column(&m.column))?;
                self.columns = group_by
                    .iter()
                    .cloned()
                    .chain(measures.iter().map(|m| m.output_name().to_string()))
                    .collect();
                self.rows = None;
            }
            OpKind::Sort { keys } => {
                if keys.is_empty() {
                    return Err(GroundingIssue::Incomplete("no sort keys given".to_string()));
                }
                keys.iter().try_for_each(|k| self.column(&k.column))?;
            }
            OpKind::Filter { predicate } => {
                self.formula(predicate)?;
                self.rows = None;
            }
            OpKind::PivotSummary { group_by, measures } => {
                if measures.is_empty() {
                    return Err(GroundingIssue::Incomplete("no measures given".to_string()));
                }
                group_by.iter().try_for_each(|c| self.column(c))?;
                for m in measures {
                    self.column(&m.column)?;
                    self.column(m.output_name())?;
                }
                self.rows = None;
            }
            OpKind::Compute { column, formula } => {
                self.formula(formula)?;
                if !self.has(column) {
                    self.columns.push(column.clone());
                }
            }
        }
        Ok(())
    }
}

/// Check a batch's selectors against `table`
///
/// # Errors
/// Returns the first step whose column, row or formula reference does
/// not resolve
pub fn ground_batch(table: &Table, batch: &Batch) -> Result<(), GroundingError> {
    let mut shape = Shape {
        columns: table.columns().to_vec(),
        rows: Some(table.row_count()),
    };
    for (step, op) in batch.iter().enumerate() {
        shape.apply(op.kind()).map_err(|issue| GroundingError {
            step,
            op: op.name(),
            issue,
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::Operation;
    use tabedit_table::{row, Value};

    fn table() -> Table {
        Table::from_rows(
            ["Name", "Age"],
            [
                row([("Name", "A".into()), ("Age", 30.0.into())]),
                row([("Name", "B".into()), ("Age", 25.0.into())]),
            ],
        )
        .unwrap()
    }

    #[test]
    fn out_of_range_row_rejected() {
        let batch = Batch::new().with(OpKind::DeleteRow { rows: vec![2] });
        let err = ground_batch(&table(), &batch).unwrap_err();
        assert_eq!(err.to_string(), "operation #1 (delete_row): row 3 does not exist (table has 2 rows)");
    }

    #[test]
    fn later_steps_see_new_columns() {
        let batch = Batch::new()
            .with(OpKind::AddColumn {
                column: "City".to_string(),
                default: Value::Null,
                position: None,
            })
            .with(OpKind::UpdateColumn {
                column: "city".to_string(),
                assign: Assignment::Value(Value::text("Paris")),
                filter: Some(Formula::parse("Age > 26").unwrap()),
            });
        assert!(ground_batch(&table(), &batch).is_ok());
    }

    #[test]
    fn formula_references_checked() {
        let batch = Batch::new().with(Operation::new(OpKind::Compute {
            column: "Total".to_string(),
            formula: Formula::parse("Price * Qty").unwrap(),
        }));
        let err = ground_batch(&table(), &batch).unwrap_err();
        assert_eq!(err.issue, GroundingIssue::UnknownColumn("Price".to_string()));
    }

    #[test]
    fn deleted_columns_unavailable() {
        let batch = Batch::new()
            .with(OpKind::DeleteColumn {
                column: "Age".to_string(),
            })
            .with(OpKind::Sort {
                keys: vec![crate::operation::SortKey::asc("Age")],
            });
        let err = ground_batch(&table(), &batch).unwrap_err();
        assert_eq!(err.step, 1);
    }

    #[test]
    fn require_column_resolves_case() {
        assert_eq!(require_column(&table(), "age").unwrap(), "Age");
        assert!(require_column(&table(), "City").is_err());
    }
}
