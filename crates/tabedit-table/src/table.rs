//! Tabular values
//!
//! [`Table`] is an ordered set of unique column names plus an ordered
//! sequence of sparse rows. Rows live in a persistent [`im::Vector`], so
//! cloning a table is O(1) and mutating the clone leaves the original
//! untouched.
//!
//! # Invariants
//! - Column names are unique and keep insertion order
//! - Every row's keys are a subset of the column list

use crate::error::TableError;
use crate::value::{Value, NULL};
use crate::wire::WireTable;
use im::Vector;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// One sparse row: column name to value
///
/// A missing key reads as null.
pub type Row = IndexMap<String, Value>;

/// Versioned tabular value being edited
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(into = "WireTable", try_from = "WireTable")]
pub struct Table {
    columns: Vec<String>,
    rows: Vector<Row>,
}

impl Table {
    /// Create an empty table with the given columns
    ///
    /// # Errors
    /// Returns `TableError::DuplicateColumn` if a name repeats
    pub fn new<I, S>(columns: I) -> Result<Self, TableError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut names: Vec<String> = Vec::new();
        for column in columns {
            let column = column.into();
            if names.contains(&column) {
                return Err(TableError::DuplicateColumn(column));
            }
            names.push(column);
        }
        Ok(Self {
            columns: names,
            rows: Vector::new(),
        })
    }

    /// Create a table with columns and rows
    ///
    /// # Errors
    /// Returns error if a column repeats or a row names an unknown column
    pub fn from_rows<I, S>(columns: I, rows: impl IntoIterator<Item = Row>) -> Result<Self, TableError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut table = Self::new(columns)?;
        for row in rows {
            table.push_row(row)?;
        }
        Ok(table)
    }

    /// Column names in order
    #[inline]
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Rows in order
    #[inline]
    #[must_use]
    pub fn rows(&self) -> &Vector<Row> {
        &self.rows
    }

    /// Number of rows
    #[inline]
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Number of columns
    #[inline]
    #[must_use]
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Check for a column
    #[inline]
    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    /// Position of a column
    #[inline]
    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Resolve a column name case-insensitively to its exact spelling
    #[must_use]
    pub fn resolve_column(&self, name: &str) -> Option<&str> {
        let name = name.trim();
        self.columns
            .iter()
            .find(|c| c.as_str() == name)
            .or_else(|| self.columns.iter().find(|c| c.eq_ignore_ascii_case(name)))
            .map(String::as_str)
    }

    /// Row at index
    #[inline]
    #[must_use]
    pub fn row(&self, index: usize) -> Option<&Row> {
        self.rows.get(index)
    }

    /// Cell value; missing rows or keys read as null
    #[must_use]
    pub fn cell(&self, row: usize, column: &str) -> &Value {
        self.rows
            .get(row)
            .and_then(|r| r.get(column))
            .unwrap_or(&NULL)
    }

    /// Values of one column, nulls included
    pub fn column_values<'a>(&'a self, column: &'a str) -> impl Iterator<Item = &'a Value> + 'a {
        self.rows.iter().map(move |r| r.get(column).unwrap_or(&NULL))
    }

    /// Check a row only names known columns
    ///
    /// # Errors
    /// Returns `TableError::UnknownColumn` for the first unknown key
    pub fn check_row(&self, row: &Row) -> Result<(), TableError> {
        match row.keys().find(|k| !self.has_column(k)) {
            Some(unknown) => Err(TableError::UnknownColumn(unknown.clone())),
            None => Ok(()),
        }
    }

    fn check_row_index(&self, index: usize) -> Result<(), TableError> {
        if index < self.rows.len() {
            Ok(())
        } else {
            Err(TableError::RowOutOfRange {
                index,
                len: self.rows.len(),
            })
        }
    }

    /// Append a row
    ///
    /// # Errors
    /// Returns `TableError::UnknownColumn` if the row names an unknown column
    pub fn push_row(&mut self, row: Row) -> Result<(), TableError> {
        self.check_row(&row)?;
        self.rows.push_back(row);
        Ok(())
    }

    /// Set one cell
    ///
    /// # Errors
    /// Returns error if the row or column does not exist
    pub fn set_cell(&mut self, row: usize, column: &str, value: Value) -> Result<(), TableError> {
        if !self.has_column(column) {
            return Err(TableError::UnknownColumn(column.to_string()));
        }
        self.check_row_index(row)?;
        if let Some(target) = self.rows.get_mut(row) {
            target.insert(column.to_string(), value);
        }
        Ok(())
    }

    /// Remove a row, shifting later rows up
    ///
    /// # Errors
    /// Returns `TableError::RowOutOfRange`
    pub fn remove_row(&mut self, index: usize) -> Result<Row, TableError> {
        self.check_row_index(index)?;
        Ok(self.rows.remove(index))
    }

    /// Keep only rows for which `keep` returns true
    pub fn retain_rows<F>(&mut self, mut keep: F)
    where
        F: FnMut(usize, &Row) -> bool,
    {
        self.rows = self
            .rows
            .iter()
            .enumerate()
            .filter(|(i, r)| keep(*i, r))
            .map(|(_, r)| r.clone())
            .collect();
    }

    /// Replace all rows
    ///
    /// # Errors
    /// Returns `TableError::UnknownColumn` if any row names an unknown column
    pub fn replace_rows(&mut self, rows: Vector<Row>) -> Result<(), TableError> {
        for row in &rows {
            self.check_row(row)?;
        }
        self.rows = rows;
        Ok(())
    }

    /// Insert a column filled with `default`
    ///
    /// `position` of `None` appends at the end. Null defaults are stored
    /// sparsely.
    ///
    /// # Errors
    /// Returns error if the name exists or the position is out of range
    pub fn insert_column(
        &mut self,
        name: impl Into<String>,
        position: Option<usize>,
        default: &Value,
    ) -> Result<(), TableError> {
        let name = name.into();
        if self.has_column(&name) {
            return Err(TableError::DuplicateColumn(name));
        }
        let position = position.unwrap_or(self.columns.len());
        if position > self.columns.len() {
            return Err(TableError::ColumnPositionOutOfRange {
                position,
                len: self.columns.len(),
            });
        }
        self.columns.insert(position, name.clone());
        if !default.is_null() {
            for row in self.rows.iter_mut() {
                row.insert(name.clone(), default.clone());
            }
        }
        Ok(())
    }

    /// Remove a column and its values
    ///
    /// # Errors
    /// Returns `TableError::UnknownColumn`
    pub fn remove_column(&mut self, name: &str) -> Result<(), TableError> {
        let index = self
            .column_index(name)
            .ok_or_else(|| TableError::UnknownColumn(name.to_string()))?;
        self.columns.remove(index);
        for row in self.rows.iter_mut() {
            row.shift_remove(name);
        }
        Ok(())
    }

    /// Project a row onto the column order, filling nulls for missing keys
    #[must_use]
    pub fn dense_row(&self, index: usize) -> Vec<Value> {
        self.columns
            .iter()
            .map(|c| self.cell(index, c).clone())
            .collect()
    }
}

/// Build a [`Row`] from pairs
///
/// ```rust,ignore
/// let r = row([("Name", "A".into()), ("Age", 30.into())]);
/// ```
pub fn row<I, K>(pairs: I) -> Row
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn people() -> Table {
        Table::from_rows(
            ["Name", "Age"],
            [
                row([("Name", "A".into()), ("Age", 30.0.into())]),
                row([("Name", "B".into())]),
            ],
        )
        .unwrap()
    }

    #[test]
    fn duplicate_columns_rejected() {
        let result = Table::new(["A", "A"]);
        assert_eq!(result, Err(TableError::DuplicateColumn("A".to_string())));
    }

    #[test]
    fn unknown_row_key_rejected() {
        let mut table = Table::new(["A"]).unwrap();
        let result = table.push_row(row([("B", Value::Null)]));
        assert_eq!(result, Err(TableError::UnknownColumn("B".to_string())));
    }

    #[test]
    fn sparse_cells_read_as_null() {
        let table = people();
        assert_eq!(table.cell(1, "Age"), &Value::Null);
        assert_eq!(table.cell(9, "Age"), &Value::Null);
    }

    #[test]
    fn clone_is_independent() {
        let original = people();
        let mut copy = original.clone();
        copy.set_cell(0, "Age", 99.0.into()).unwrap();
        assert_eq!(original.cell(0, "Age"), &Value::Number(30.0));
        assert_eq!(copy.cell(0, "Age"), &Value::Number(99.0));
    }

    #[test]
    fn remove_column_drops_values() {
        let mut table = people();
        table.remove_column("Age").unwrap();
        assert_eq!(table.columns(), &["Name".to_string()]);
        assert!(table.rows().iter().all(|r| !r.contains_key("Age")));
    }

    #[test]
    fn insert_column_at_position() {
        let mut table = people();
        table.insert_column("Id", Some(0), &Value::Number(0.0)).unwrap();
        assert_eq!(table.columns()[0], "Id");
        assert_eq!(table.cell(1, "Id"), &Value::Number(0.0));
        assert!(table.insert_column("Id", None, &Value::Null).is_err());
        assert!(table.insert_column("X", Some(9), &Value::Null).is_err());
    }

    #[test]
    fn resolve_column_ignores_case() {
        let table = people();
        assert_eq!(table.resolve_column("age"), Some("Age"));
        assert_eq!(table.resolve_column("missing"), None);
    }

    #[test]
    fn remove_row_shifts() {
        let mut table = people();
        table.remove_row(0).unwrap();
        assert_eq!(table.cell(0, "Name"), &Value::text("B"));
        assert!(table.remove_row(5).is_err());
    }
}
