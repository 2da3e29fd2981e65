use crate::alerts::domain::{BudgetId, RecipientId};
use crate::alerts::import::{read_snapshots, SnapshotImportError};

const HEADER: &str =
    "budget_id,category_name,monthly_limit,consumption,thresholds,reference_month,recipient_id,recipient_address\n";

#[test]
fn reads_snapshots_with_threshold_lists() {
    let csv = format!(
        "{HEADER}42,Groceries,1000,950.5,500;900,2025-03,7,owner@example.com\n\
         43, Travel ,2500,100,,2025-03,8,travel@example.com\n"
    );

    let snapshots = read_snapshots(csv.as_bytes()).expect("import");

    assert_eq!(snapshots.len(), 2);
    assert_eq!(snapshots[0].budget_id, BudgetId(42));
    assert_eq!(snapshots[0].thresholds, vec![500.0, 900.0]);
    assert_eq!(snapshots[0].consumption, 950.5);
    assert_eq!(snapshots[0].recipient_id, RecipientId(7));
    assert_eq!(snapshots[1].category_name, "Travel");
    assert!(snapshots[1].thresholds.is_empty());
}

#[test]
fn rejects_invalid_reference_month_with_line_number() {
    let csv = format!(
        "{HEADER}42,Groceries,1000,950,,2025-03,7,owner@example.com\n\
         43,Travel,1000,950,,March,7,owner@example.com\n"
    );

    match read_snapshots(csv.as_bytes()) {
        Err(SnapshotImportError::InvalidRow { line, reason }) => {
            assert_eq!(line, 3);
            assert!(reason.contains("March"));
        }
        other => panic!("expected invalid row, got {other:?}"),
    }
}

#[test]
fn rejects_missing_recipient_address() {
    let csv = format!("{HEADER}42,Groceries,1000,950,,2025-03,7,\n");

    assert!(matches!(
        read_snapshots(csv.as_bytes()),
        Err(SnapshotImportError::InvalidRow { line: 2, .. })
    ));
}

#[test]
fn rejects_unparseable_thresholds() {
    let csv = format!("{HEADER}42,Groceries,1000,950,500;lots,2025-03,7,owner@example.com\n");

    let err = read_snapshots(csv.as_bytes()).expect_err("invalid threshold");
    assert!(matches!(err, SnapshotImportError::Csv(_)));
    assert!(err.to_string().contains("invalid budget CSV data"));
}
