//! Wire format: `{ "headers": [...], "data": [{column: value}] }`
//!
//! Export keeps header order, row order and explicit nulls; keys absent
//! from a row stay absent.

use crate::error::TableError;
use crate::table::{Row, Table};
use crate::value::Value;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Serialised form of a [`Table`]
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WireTable {
    /// Column names in order
    pub headers: Vec<String>,
    /// Row records
    #[serde(default)]
    pub data: Vec<IndexMap<String, Value>>,
}

impl From<&Table> for WireTable {
    fn from(table: &Table) -> Self {
        let data = table
            .rows()
            .iter()
            .map(|row| {
                table
                    .columns()
                    .iter()
                    .filter_map(|c| row.get(c).map(|v| (c.clone(), v.clone())))
                    .collect()
            })
            .collect();
        Self {
            headers: table.columns().to_vec(),
            data,
        }
    }
}

impl From<Table> for WireTable {
    fn from(table: Table) -> Self {
        Self::from(&table)
    }
}

impl TryFrom<WireTable> for Table {
    type Error = TableError;

    fn try_from(wire: WireTable) -> Result<Self, Self::Error> {
        let rows = wire.data.into_iter().map(|r| r.into_iter().collect::<Row>());
        Table::from_rows(wire.headers, rows)
    }
}

/// Encode a table as a JSON value
#[must_use]
pub fn to_json(table: &Table) -> serde_json::Value {
    // WireTable only holds strings and scalars
    serde_json::to_value(WireTable::from(table)).unwrap_or(serde_json::Value::Null)
}

/// Decode a table from JSON text
///
/// # Errors
/// Returns `TableError::InvalidPayload` for malformed JSON or non-scalar
/// cells, and the usual table errors for duplicate or unknown columns
pub fn from_json_str(json: &str) -> Result<Table, TableError> {
    let wire: WireTable = serde_json::from_str(json)?;
    Table::try_from(wire)
}

/// Encode a table as JSON text
///
/// # Errors
/// Returns `TableError::InvalidPayload` if serialisation fails
pub fn to_json_string(table: &Table) -> Result<String, TableError> {
    Ok(serde_json::to_string(&WireTable::from(table))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn decode_sparse_rows() {
        let table = from_json_str(
            r#"{"headers":["Name","Age"],"data":[{"Name":"A","Age":30},{"Name":"B"}]}"#,
        )
        .unwrap();
        assert_eq!(table.row_count(), 2);
        assert_eq!(table.cell(0, "Age"), &Value::Number(30.0));
        assert!(!table.row(1).unwrap().contains_key("Age"));
    }

    #[test]
    fn explicit_nulls_survive() {
        let json = r#"{"headers":["A","B"],"data":[{"A":null,"B":1}]}"#;
        let table = from_json_str(json).unwrap();
        assert!(table.row(0).unwrap().contains_key("A"));
        assert_eq!(to_json_string(&table).unwrap(), json);
    }

    #[test]
    fn export_follows_header_order() {
        let json = r#"{"headers":["A","B"],"data":[{"B":2,"A":1}]}"#;
        let table = from_json_str(json).unwrap();
        assert_eq!(
            to_json_string(&table).unwrap(),
            r#"{"headers":["A","B"],"data":[{"A":1,"B":2}]}"#
        );
    }

    #[test]
    fn unknown_keys_rejected() {
        let result = from_json_str(r#"{"headers":["A"],"data":[{"Z":1}]}"#);
        assert!(matches!(result, Err(TableError::UnknownColumn(_))));
    }

    #[test]
    fn nested_cells_rejected() {
        let result = from_json_str(r#"{"headers":["A"],"data":[{"A":{"x":1}}]}"#);
        assert!(matches!(result, Err(TableError::InvalidPayload(_))));
    }

    #[test]
    fn table_serde_uses_wire_shape() {
        let table = from_json_str(r#"{"headers":["A"],"data":[{"A":"x"}]}"#).unwrap();
        let value = serde_json::to_value(&table).unwrap();
        assert_eq!(value["headers"][0], "A");
        let back: Table = serde_json::from_value(value).unwrap();
        assert_eq!(back, table);
    }
}
