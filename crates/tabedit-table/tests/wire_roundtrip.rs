//! Wire export followed by import yields an equal table.

use proptest::prelude::*;
use tabedit_table::{from_json_str, to_json_string, Row, Table, Value};

fn value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        (-1_000_000i64..1_000_000).prop_map(Value::from),
        (-1.0e6f64..1.0e6).prop_map(Value::Number),
        "[a-zA-Z0-9 ]{0,12}".prop_map(Value::Text),
    ]
}

fn table_strategy() -> impl Strategy<Value = Table> {
    prop::collection::btree_set("[A-Z][a-z]{0,6}", 1..5).prop_flat_map(|names| {
        let columns: Vec<String> = names.into_iter().collect();
        let width = columns.len();
        // None marks a key left out of the row entirely
        let cells = prop::collection::vec(prop::option::of(value_strategy()), width);
        prop::collection::vec(cells, 0..8).prop_map(move |rows| {
            let rows = rows.into_iter().map(|cells| {
                columns
                    .iter()
                    .zip(cells)
                    .filter_map(|(c, v)| v.map(|v| (c.clone(), v)))
                    .collect::<Row>()
            });
            Table::from_rows(columns.clone(), rows).unwrap()
        })
    })
}

proptest! {
    #[test]
    fn export_import_roundtrip(table in table_strategy()) {
        let json = to_json_string(&table).unwrap();
        let back = from_json_str(&json).unwrap();
        prop_assert_eq!(back.columns(), table.columns());
        prop_assert_eq!(back.row_count(), table.row_count());
        for (a, b) in back.rows().iter().zip(table.rows().iter()) {
            prop_assert_eq!(a, b);
        }
    }
}

#[test]
fn scenario_headers_and_nulls_preserved() {
    let json = r#"{"headers":["Name","Age","City"],"data":[{"Name":"A","Age":30,"City":null},{"Name":"B","Age":25}]}"#;
    let table = from_json_str(json).unwrap();
    assert_eq!(to_json_string(&table).unwrap(), json);
}
