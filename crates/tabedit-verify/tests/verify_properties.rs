//! Verification of honest and dishonest batches.

use proptest::prelude::*;
use tabedit_ops::{
    Batch, DeclaredEffect, Executor, Formula, Keep, OpKind, Operation, OutlierPolicy, OutlierRule,
    RowEffect,
};
use tabedit_table::{row, Table, Value};
use tabedit_verify::verify;

fn table() -> impl Strategy<Value = Table> {
    prop::collection::vec((0i64..5, -100i64..100), 0..15).prop_map(|rows| {
        Table::from_rows(
            ["K", "N"],
            rows.into_iter()
                .map(|(k, n)| row([("K", Value::from(k)), ("N", Value::from(n))])),
        )
        .unwrap()
    })
}

fn honest(pre: &Table, kind: OpKind) -> bool {
    let batch = Batch::new().with(kind);
    let post = Executor::new().execute(pre, &batch).unwrap();
    verify(pre, &post, &batch).pass
}

proptest! {
    #[test]
    fn add_row_verifies(pre in table(), n in -5i64..5) {
        let kind = OpKind::AddRow { values: row([("N", Value::from(n))]) };
        prop_assert!(honest(&pre, kind));
    }

    #[test]
    fn deduplicate_verifies(pre in table()) {
        let kind = OpKind::Deduplicate { keys: vec!["K".to_string()], keep: Keep::Last };
        prop_assert!(honest(&pre, kind));
    }

    #[test]
    fn filter_verifies(pre in table(), t in -100i64..100) {
        let predicate = Formula::parse(&format!("N < {t}")).unwrap();
        let kind = OpKind::Filter { predicate };
        prop_assert!(honest(&pre, kind));
    }

    #[test]
    fn outlier_drop_verifies(pre in table()) {
        let kind = OpKind::RemoveOutliers {
            column: "N".to_string(),
            rule: OutlierRule::StdDev { k: 1.0 },
            policy: OutlierPolicy::Drop,
        };
        prop_assert!(honest(&pre, kind));
    }

    #[test]
    fn outlier_cap_verifies(pre in table()) {
        let kind = OpKind::RemoveOutliers {
            column: "N".to_string(),
            rule: OutlierRule::Iqr { k: 0.5 },
            policy: OutlierPolicy::Cap,
        };
        prop_assert!(honest(&pre, kind));
    }
}

#[test]
fn scenario_unchanged_table_fails_delete() {
    let pre = Table::from_rows(
        ["Name"],
        [row([("Name", "A".into())]), row([("Name", "B".into())])],
    )
    .unwrap();
    let batch = Batch::new().with(OpKind::DeleteRow { rows: vec![1] });
    // post never received the deletion
    let result = verify(&pre, &pre, &batch);
    assert!(!result.pass);
    assert!(result.mismatch.unwrap().starts_with("batch: expected result of replaying 1 operation(s)"));
}

#[test]
fn scenario_overclaimed_effect() {
    let pre = Table::from_rows(["Name"], [row([("Name", "A".into())])]).unwrap();
    let op = Operation::new(OpKind::AddColumn {
        column: "City".to_string(),
        default: Value::Null,
        position: None,
    })
    .with_effect(DeclaredEffect::default().rows(RowEffect::Added(1)));
    let batch = Batch::new().with(op);
    let post = Executor::new().execute(&pre, &batch).unwrap();
    let result = verify(&pre, &post, &batch);
    assert_eq!(
        result.mismatch.as_deref(),
        Some("operation #1 (add_column): expected 1 row added, observed 0")
    );
}
