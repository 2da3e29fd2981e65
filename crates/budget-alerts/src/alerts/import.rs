use std::fs::File;
use std::io::Read;
use std::path::Path;

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer};

use super::domain::{BudgetId, BudgetSnapshot, RecipientId};

#[derive(Debug)]
pub enum SnapshotImportError {
    Io(std::io::Error),
    Csv(csv::Error),
    InvalidRow { line: u64, reason: String },
}

impl std::fmt::Display for SnapshotImportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SnapshotImportError::Io(err) => write!(f, "failed to read budget export: {}", err),
            SnapshotImportError::Csv(err) => write!(f, "invalid budget CSV data: {}", err),
            SnapshotImportError::InvalidRow { line, reason } => {
                write!(f, "invalid budget snapshot on line {}: {}", line, reason)
            }
        }
    }
}

impl std::error::Error for SnapshotImportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SnapshotImportError::Io(err) => Some(err),
            SnapshotImportError::Csv(err) => Some(err),
            SnapshotImportError::InvalidRow { .. } => None,
        }
    }
}

impl From<std::io::Error> for SnapshotImportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<csv::Error> for SnapshotImportError {
    fn from(err: csv::Error) -> Self {
        Self::Csv(err)
    }
}

/// Reads budget snapshots from a CSV export of the reporting layer.
///
/// Expected headers: `budget_id, category_name, monthly_limit, consumption,
/// thresholds, reference_month, recipient_id, recipient_address`, where
/// `thresholds` is a `;`-separated list of amounts.
pub fn read_snapshots<R: Read>(reader: R) -> Result<Vec<BudgetSnapshot>, SnapshotImportError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    let mut snapshots = Vec::new();

    for (index, record) in csv_reader.deserialize::<SnapshotRow>().enumerate() {
        let row = record?;
        // Header occupies line 1.
        let line = index as u64 + 2;

        if !valid_reference_month(&row.reference_month) {
            return Err(SnapshotImportError::InvalidRow {
                line,
                reason: format!("reference_month '{}' is not YYYY-MM", row.reference_month),
            });
        }
        if row.recipient_address.is_empty() {
            return Err(SnapshotImportError::InvalidRow {
                line,
                reason: "recipient_address is empty".to_string(),
            });
        }

        snapshots.push(BudgetSnapshot {
            budget_id: BudgetId(row.budget_id),
            category_name: row.category_name,
            monthly_limit: row.monthly_limit,
            consumption: row.consumption,
            thresholds: row.thresholds,
            reference_month: row.reference_month,
            recipient_id: RecipientId(row.recipient_id),
            recipient_address: row.recipient_address,
        });
    }

    Ok(snapshots)
}

pub fn read_snapshots_from_path(
    path: impl AsRef<Path>,
) -> Result<Vec<BudgetSnapshot>, SnapshotImportError> {
    let file = File::open(path)?;
    read_snapshots(file)
}

#[derive(Debug, Deserialize)]
struct SnapshotRow {
    budget_id: i64,
    category_name: String,
    monthly_limit: f64,
    consumption: f64,
    #[serde(default, deserialize_with = "threshold_list")]
    thresholds: Vec<f64>,
    reference_month: String,
    recipient_id: i64,
    recipient_address: String,
}

fn threshold_list<'de, D>(deserializer: D) -> Result<Vec<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
    raw.split(';')
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| {
            value
                .parse::<f64>()
                .map_err(|_| serde::de::Error::custom(format!("invalid threshold '{value}'")))
        })
        .collect()
}

fn valid_reference_month(value: &str) -> bool {
    value.len() == 7 && NaiveDate::parse_from_str(&format!("{value}-01"), "%Y-%m-%d").is_ok()
}
