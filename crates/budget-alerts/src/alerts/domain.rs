use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier wrapper for monitored budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BudgetId(pub i64);

impl fmt::Display for BudgetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier wrapper for the user receiving budget alerts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecipientId(pub i64);

impl fmt::Display for RecipientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Point-in-time view of a budget's consumption, produced by the reporting layer.
///
/// Amounts share the budget's currency. Thresholds are absolute amounts, not
/// fractions of the limit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetSnapshot {
    pub budget_id: BudgetId,
    pub category_name: String,
    pub monthly_limit: f64,
    pub consumption: f64,
    #[serde(default)]
    pub thresholds: Vec<f64>,
    pub reference_month: String,
    pub recipient_id: RecipientId,
    pub recipient_address: String,
}

impl BudgetSnapshot {
    /// Ledger event identity shared by every alert about this budget.
    pub fn event_id(&self) -> String {
        format!("budget:{}", self.budget_id)
    }
}
