//! Grouping and aggregation
//!
//! Groups keep first-seen order. An empty key list forms a single group
//! covering every row, even when the table has none.

use crate::error::{ApplyResult, OperationErrorKind};
use crate::operation::{AggFunc, Measure};
use indexmap::IndexMap;
use std::cmp::Ordering;
use tabedit_table::{Table, Value, ValueKey};

/// Rows sharing one key
#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    /// Key values in key-column order
    pub key: Vec<Value>,
    /// Member row indices, ascending
    pub rows: Vec<usize>,
}

/// Partition rows by `keys`
#[must_use]
pub fn group_rows(table: &Table, keys: &[String]) -> Vec<Group> {
    if keys.is_empty() {
        return vec![Group {
            key: Vec::new(),
            rows: (0..table.row_count()).collect(),
        }];
    }
    let mut groups: IndexMap<Vec<ValueKey>, Group> = IndexMap::new();
    for index in 0..table.row_count() {
        let key: Vec<Value> = keys.iter().map(|k| table.cell(index, k).clone()).collect();
        let hashed = key.iter().map(Value::key).collect();
        groups
            .entry(hashed)
            .or_insert_with(|| Group {
                key,
                rows: Vec::new(),
            })
            .rows
            .push(index);
    }
    groups.into_values().collect()
}

/// Compute one measure over a group's rows
///
/// # Errors
/// Returns `OperationErrorKind::Aggregation` for values the function
/// cannot combine
pub fn aggregate(table: &Table, measure: &Measure, rows: &[usize]) -> ApplyResult<Value> {
    let values = rows
        .iter()
        .map(|&r| table.cell(r, &measure.column))
        .filter(|v| !v.is_null());
    let fail = |reason: String| OperationErrorKind::Aggregation {
        func: measure.func.name(),
        column: measure.column.clone(),
        reason,
    };
    match measure.func {
        AggFunc::Count => Ok(Value::from(i64::try_from(values.count()).unwrap_or(i64::MAX))),
        AggFunc::Sum | AggFunc::Avg => {
            let mut numbers = Vec::new();
            for value in values {
                match value.as_f64() {
                    Some(n) => numbers.push(n),
                    None => return Err(fail(format!("{} value {value} is not numeric", value.type_name()))),
                }
            }
            if measure.func == AggFunc::Sum {
                Ok(Value::Number(numbers.iter().sum()))
            } else {
                Ok(crate::stats::mean(&numbers).map_or(Value::Null, Value::Number))
            }
        }
        AggFunc::Min | AggFunc::Max => {
            let mut best: Option<&Value> = None;
            for value in values {
                if let Some(current) = best {
                    if current.type_name() != value.type_name() {
                        return Err(fail(format!(
                            "mixes {} and {} values",
                            current.type_name(),
                            value.type_name()
                        )));
                    }
                    let ord = value.total_cmp(current);
                    let better = if measure.func == AggFunc::Min {
                        ord == Ordering::Less
                    } else {
                        ord == Ordering::Greater
                    };
                    if better {
                        best = Some(value);
                    }
                } else {
                    best = Some(value);
                }
            }
            Ok(best.cloned().unwrap_or_default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabedit_table::row;

    fn sales() -> Table {
        Table::from_rows(
            ["Dept", "Amount"],
            [
                row([("Dept", "A".into()), ("Amount", 10.0.into())]),
                row([("Dept", "B".into()), ("Amount", 5.0.into())]),
                row([("Dept", "A".into()), ("Amount", 20.0.into())]),
                row([("Dept", "B".into())]),
            ],
        )
        .unwrap()
    }

    #[test]
    fn groups_in_first_seen_order() {
        let groups = group_rows(&sales(), &["Dept".to_string()]);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].key, vec![Value::text("A")]);
        assert_eq!(groups[0].rows, vec![0, 2]);
        assert_eq!(groups[1].rows, vec![1, 3]);
    }

    #[test]
    fn empty_keys_single_group() {
        let empty = Table::new(["Dept"]).unwrap();
        assert_eq!(group_rows(&empty, &[]).len(), 1);
    }

    #[test]
    fn measures_skip_nulls() {
        let table = sales();
        let rows = [1, 3];
        let sum = aggregate(&table, &Measure::new(AggFunc::Sum, "Amount"), &rows).unwrap();
        let count = aggregate(&table, &Measure::new(AggFunc::Count, "Amount"), &rows).unwrap();
        let avg = aggregate(&table, &Measure::new(AggFunc::Avg, "Amount"), &[3]).unwrap();
        assert_eq!(sum, Value::Number(5.0));
        assert_eq!(count, Value::Number(1.0));
        assert_eq!(avg, Value::Null);
    }

    #[test]
    fn min_max() {
        let table = sales();
        let all = [0, 1, 2, 3];
        assert_eq!(
            aggregate(&table, &Measure::new(AggFunc::Max, "Amount"), &all).unwrap(),
            Value::Number(20.0)
        );
        assert_eq!(
            aggregate(&table, &Measure::new(AggFunc::Min, "Dept"), &all).unwrap(),
            Value::text("A")
        );
    }

    #[test]
    fn sum_of_text_fails() {
        let result = aggregate(&sales(), &Measure::new(AggFunc::Sum, "Dept"), &[0]);
        assert!(matches!(result, Err(OperationErrorKind::Aggregation { func: "sum", .. })));
    }
}
