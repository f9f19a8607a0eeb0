//! The closed operation catalog
//!
//! Every edit the supervisor can make is one [`OpKind`]. An [`Operation`]
//! pairs the kind with the [`DeclaredEffect`] its author expects, which the
//! verifier later checks against what actually happened.

use crate::expr::Formula;
use serde::{Deserialize, Serialize};
use tabedit_table::{Row, Value};

/// Which duplicate survives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Keep {
    #[default]
    First,
    Last,
}

/// Outlier qualification rule
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum OutlierRule {
    /// Outside `mean ± k·σ` (sample standard deviation)
    StdDev { k: f64 },
    /// Outside `[Q1 − k·IQR, Q3 + k·IQR]`
    Iqr { k: f64 },
}

impl OutlierRule {
    /// Threshold multiplier
    #[inline]
    #[must_use]
    pub fn k(&self) -> f64 {
        match self {
            Self::StdDev { k } | Self::Iqr { k } => *k,
        }
    }
}

/// What happens to qualifying outliers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutlierPolicy {
    /// Remove the row
    Drop,
    /// Clamp the value to the nearest bound
    Cap,
}

/// Aggregation function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggFunc {
    Sum,
    Avg,
    Count,
    Min,
    Max,
}

impl AggFunc {
    /// Lowercase name
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Avg => "avg",
            Self::Count => "count",
            Self::Min => "min",
            Self::Max => "max",
        }
    }

    /// Parse a user-facing function name
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "sum" | "total" => Some(Self::Sum),
            "avg" | "average" | "mean" => Some(Self::Avg),
            "count" => Some(Self::Count),
            "min" | "minimum" => Some(Self::Min),
            "max" | "maximum" => Some(Self::Max),
            _ => None,
        }
    }
}

/// One aggregate output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Measure {
    pub column: String,
    pub func: AggFunc,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl Measure {
    /// Create a measure without an alias
    #[must_use]
    pub fn new(func: AggFunc, column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            func,
            alias: None,
        }
    }

    /// Set the output column name
    #[inline]
    #[must_use]
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Output column name
    #[must_use]
    pub fn output_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.column)
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

/// One sort key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub column: String,
    #[serde(default)]
    pub direction: Direction,
}

impl SortKey {
    /// Ascending key
    #[must_use]
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: Direction::Asc,
        }
    }

    /// Descending key
    #[must_use]
    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: Direction::Desc,
        }
    }
}

/// Column assignment payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Assignment {
    /// Same literal in every targeted cell
    Value(Value),
    /// Per-row formula
    Formula(Formula),
}

/// Operation kind and parameters
///
/// Row indices are zero-based.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum OpKind {
    AddRow {
        values: Row,
    },
    UpdateRow {
        row: usize,
        values: Row,
    },
    DeleteRow {
        rows: Vec<usize>,
    },
    AddColumn {
        column: String,
        #[serde(default)]
        default: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        position: Option<usize>,
    },
    UpdateColumn {
        column: String,
        assign: Assignment,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filter: Option<Formula>,
    },
    DeleteColumn {
        column: String,
    },
    Deduplicate {
        /// Empty means every column
        #[serde(default)]
        keys: Vec<String>,
        #[serde(default)]
        keep: Keep,
    },
    RemoveOutliers {
        column: String,
        rule: OutlierRule,
        policy: OutlierPolicy,
    },
    Aggregate {
        #[serde(default)]
        group_by: Vec<String>,
        measures: Vec<Measure>,
    },
    Sort {
        keys: Vec<SortKey>,
    },
    Filter {
        predicate: Formula,
    },
    PivotSummary {
        #[serde(default)]
        group_by: Vec<String>,
        measures: Vec<Measure>,
    },
    Compute {
        column: String,
        formula: Formula,
    },
}

impl OpKind {
    /// Snake-case operation name
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::AddRow { .. } => "add_row",
            Self::UpdateRow { .. } => "update_row",
            Self::DeleteRow { .. } => "delete_row",
            Self::AddColumn { .. } => "add_column",
            Self::UpdateColumn { .. } => "update_column",
            Self::DeleteColumn { .. } => "delete_column",
            Self::Deduplicate { .. } => "deduplicate",
            Self::RemoveOutliers { .. } => "remove_outliers",
            Self::Aggregate { .. } => "aggregate",
            Self::Sort { .. } => "sort",
            Self::Filter { .. } => "filter",
            Self::PivotSummary { .. } => "pivot_summary",
            Self::Compute { .. } => "compute",
        }
    }

    /// Effect this kind has when it behaves as documented
    #[must_use]
    pub fn declared_effect(&self) -> DeclaredEffect {
        let effect = DeclaredEffect::default();
        match self {
            Self::AddRow { .. } => effect.rows(RowEffect::Added(1)),
            Self::UpdateRow { row, values } => effect.cells(CellEffect::RowValues {
                row: *row,
                columns: values.keys().cloned().collect(),
            }),
            Self::DeleteRow { rows } => effect.rows(RowEffect::Removed(rows.len())),
            Self::AddColumn { column, .. } => effect.columns(ColumnEffect::Added(column.clone())),
            Self::UpdateColumn { column, filter, .. } => effect.cells(CellEffect::ColumnValues {
                column: column.clone(),
                changed: if filter.is_some() {
                    ChangedRows::Matching
                } else {
                    ChangedRows::AllRows
                },
            }),
            Self::DeleteColumn { column } => effect.columns(ColumnEffect::Removed(column.clone())),
            Self::Deduplicate { .. } => effect.rows(RowEffect::DuplicatesRemoved),
            Self::RemoveOutliers { column, policy, .. } => match policy {
                OutlierPolicy::Drop => effect.rows(RowEffect::OutliersRemoved),
                OutlierPolicy::Cap => effect.cells(CellEffect::Capped {
                    column: column.clone(),
                }),
            },
            Self::Aggregate { group_by, measures } => effect
                .rows(RowEffect::Grouped)
                .columns(ColumnEffect::Reshaped(
                    group_by
                        .iter()
                        .cloned()
                        .chain(measures.iter().map(|m| m.output_name().to_string()))
                        .collect(),
                )),
            Self::Sort { .. } => effect.cells(CellEffect::Reordered),
            Self::Filter { .. } => effect.rows(RowEffect::MatchingRetained),
            Self::PivotSummary { .. } => effect.rows(RowEffect::GroupsAppended),
            Self::Compute { column, .. } => effect
                .columns(ColumnEffect::Extended(vec![column.clone()]))
                .cells(CellEffect::ColumnValues {
                    column: column.clone(),
                    changed: ChangedRows::AllRows,
                }),
        }
    }
}

/// Expected change in row count
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowEffect {
    #[default]
    Unchanged,
    Added(usize),
    Removed(usize),
    DuplicatesRemoved,
    OutliersRemoved,
    MatchingRetained,
    Grouped,
    GroupsAppended,
}

/// Expected change in the column list
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnEffect {
    #[default]
    Unchanged,
    Added(String),
    Removed(String),
    /// Column list replaced by exactly these names
    Reshaped(Vec<String>),
    /// These columns exist afterwards, appended if missing
    Extended(Vec<String>),
}

/// Which existing rows a column assignment touches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangedRows {
    AllRows,
    /// Rows selected by the operation's filter
    Matching,
    Exactly(usize),
}

/// Expected change to existing cell values
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellEffect {
    #[default]
    None,
    RowValues {
        row: usize,
        columns: Vec<String>,
    },
    ColumnValues {
        column: String,
        changed: ChangedRows,
    },
    Capped {
        column: String,
    },
    Reordered,
}

/// Declared effect descriptor
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeclaredEffect {
    #[serde(default)]
    pub rows: RowEffect,
    #[serde(default)]
    pub columns: ColumnEffect,
    #[serde(default)]
    pub cells: CellEffect,
}

impl DeclaredEffect {
    /// Set the row effect
    #[inline]
    #[must_use]
    pub fn rows(mut self, rows: RowEffect) -> Self {
        self.rows = rows;
        self
    }

    /// Set the column effect
    #[inline]
    #[must_use]
    pub fn columns(mut self, columns: ColumnEffect) -> Self {
        self.columns = columns;
        self
    }

    /// Set the cell effect
    #[inline]
    #[must_use]
    pub fn cells(mut self, cells: CellEffect) -> Self {
        self.cells = cells;
        self
    }
}

/// An operation with its declared effect
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub kind: OpKind,
    pub effect: DeclaredEffect,
}

impl Operation {
    /// Operation declaring the catalog effect of `kind`
    #[must_use]
    pub fn new(kind: OpKind) -> Self {
        let effect = kind.declared_effect();
        Self { kind, effect }
    }

    /// Replace the declared effect
    #[inline]
    #[must_use]
    pub fn with_effect(mut self, effect: DeclaredEffect) -> Self {
        self.effect = effect;
        self
    }

    /// Operation kind
    #[inline]
    #[must_use]
    pub fn kind(&self) -> &OpKind {
        &self.kind
    }

    /// Snake-case operation name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.kind.name()
    }
}

impl From<OpKind> for Operation {
    fn from(kind: OpKind) -> Self {
        Self::new(kind)
    }
}

/// Ordered operations applied as one unit
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Batch {
    operations: Vec<Operation>,
}

impl Batch {
    /// Empty batch
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an operation
    pub fn push(&mut self, op: impl Into<Operation>) {
        self.operations.push(op.into());
    }

    /// Builder-style append
    #[inline]
    #[must_use]
    pub fn with(mut self, op: impl Into<Operation>) -> Self {
        self.push(op);
        self
    }

    /// Operations in order
    #[inline]
    #[must_use]
    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    /// Iterate in order
    pub fn iter(&self) -> std::slice::Iter<'_, Operation> {
        self.operations.iter()
    }

    /// Number of operations
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Check for no operations
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Comma-separated operation names
    #[must_use]
    pub fn summary(&self) -> String {
        self.operations
            .iter()
            .map(Operation::name)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl FromIterator<Operation> for Batch {
    fn from_iter<I: IntoIterator<Item = Operation>>(iter: I) -> Self {
        Self {
            operations: iter.into_iter().collect(),
        }
    }
}

impl FromIterator<OpKind> for Batch {
    fn from_iter<I: IntoIterator<Item = OpKind>>(iter: I) -> Self {
        iter.into_iter().map(Operation::new).collect()
    }
}

impl IntoIterator for Batch {
    type Item = Operation;
    type IntoIter = std::vec::IntoIter<Operation>;

    fn into_iter(self) -> Self::IntoIter {
        self.operations.into_iter()
    }
}

impl<'a> IntoIterator for &'a Batch {
    type Item = &'a Operation;
    type IntoIter = std::slice::Iter<'a, Operation>;

    fn into_iter(self) -> Self::IntoIter {
        self.operations.iter()
    }
}
