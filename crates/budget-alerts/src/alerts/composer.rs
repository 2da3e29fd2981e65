use serde::Serialize;

use super::domain::{BudgetId, BudgetSnapshot};
use super::fingerprint::{amount_cents, format_amount, CanonicalPayload, CanonicalValue};
use super::threshold::{sanitize_amount, ThresholdStatus, ThresholdTier};
use super::token::MintedToken;

pub const DEFAULT_ROUTE_PATH: &str = "/finance/budgets";

/// Configuration errors for the composer.
#[derive(Debug, thiserror::Error)]
pub enum ComposeError {
    #[error("route path must start with '/', found '{0}'")]
    InvalidRoutePath(String),
}

/// Link and display settings used when composing alerts.
#[derive(Debug, Clone)]
pub struct ComposerConfig {
    base_url: Option<String>,
    route_path: String,
    currency_symbol: String,
}

impl ComposerConfig {
    pub fn new(
        base_url: Option<String>,
        route_path: impl Into<String>,
        currency_symbol: impl Into<String>,
    ) -> Result<Self, ComposeError> {
        let route_path = route_path.into();
        if !route_path.starts_with('/') {
            return Err(ComposeError::InvalidRoutePath(route_path));
        }

        let base_url = base_url
            .map(|url| url.trim().trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty());

        Ok(Self {
            base_url,
            route_path,
            currency_symbol: currency_symbol.into(),
        })
    }

    pub fn route_path(&self) -> &str {
        &self.route_path
    }
}

impl Default for ComposerConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            route_path: DEFAULT_ROUTE_PATH.to_string(),
            currency_symbol: "$".to_string(),
        }
    }
}

/// Fixed presentation attributes for a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TierPresentation {
    pub label: &'static str,
    pub description: &'static str,
    pub color: &'static str,
}

pub fn tier_presentation(tier: ThresholdTier) -> TierPresentation {
    match tier {
        ThresholdTier::Healthy => TierPresentation {
            label: "Healthy",
            description: "Spending is comfortably within the monthly limit.",
            color: "#2e7d32",
        },
        ThresholdTier::Caution => TierPresentation {
            label: "Caution",
            description: "More than 60% of the monthly limit has been used.",
            color: "#f9a825",
        },
        ThresholdTier::Warning => TierPresentation {
            label: "Warning",
            description: "Spending is close to the monthly limit or past its highest alert threshold.",
            color: "#ef6c00",
        },
        ThresholdTier::Critical => TierPresentation {
            label: "Critical",
            description: "The monthly limit has been reached or exceeded.",
            color: "#c62828",
        },
    }
}

/// Everything a renderer needs to produce the alert, with display values pre-formatted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderContext {
    pub budget_id: i64,
    pub category_name: String,
    pub reference_month: String,
    pub recipient_address: String,
    pub tier: ThresholdTier,
    pub tier_label: &'static str,
    pub tier_description: &'static str,
    pub tier_color: &'static str,
    pub limit_display: String,
    pub consumption_display: String,
    pub remaining_display: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage_percent_display: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub triggered_threshold_display: Option<String>,
    pub access_link: String,
    pub link_expires_at: String,
}

/// Composer output: the render context plus the content identity it was built from.
#[derive(Debug, Clone, PartialEq)]
pub struct ComposedAlert {
    pub context: RenderContext,
    /// Token-independent description of the content, hashed for deduplication.
    pub canonical_payload: CanonicalPayload,
    pub cycle_key: String,
}

/// Assembles alert contexts without performing any I/O.
#[derive(Debug, Clone, Default)]
pub struct AlertComposer {
    config: ComposerConfig,
}

impl AlertComposer {
    pub fn new(config: ComposerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ComposerConfig {
        &self.config
    }

    pub fn compose(
        &self,
        snapshot: &BudgetSnapshot,
        status: &ThresholdStatus,
        token: &MintedToken,
    ) -> ComposedAlert {
        let presentation = tier_presentation(status.tier);
        let limit = sanitize_amount(snapshot.monthly_limit);
        let consumption = sanitize_amount(snapshot.consumption);

        let context = RenderContext {
            budget_id: snapshot.budget_id.0,
            category_name: snapshot.category_name.clone(),
            reference_month: snapshot.reference_month.clone(),
            recipient_address: snapshot.recipient_address.clone(),
            tier: status.tier,
            tier_label: presentation.label,
            tier_description: presentation.description,
            tier_color: presentation.color,
            limit_display: self.format_currency(limit),
            consumption_display: self.format_currency(consumption),
            remaining_display: self.format_currency(limit - consumption),
            usage_percent_display: status.usage_ratio.map(format_percentage),
            triggered_threshold_display: status
                .triggered_threshold
                .map(|value| self.format_currency(value)),
            access_link: self.access_link(snapshot.budget_id, &token.token),
            link_expires_at: token.expires_at.to_rfc3339(),
        };

        let canonical_payload = CanonicalPayload::new()
            .with("budgetId", snapshot.budget_id.0)
            .with("recipientId", snapshot.recipient_id.0)
            .with("categoryName", snapshot.category_name.as_str())
            .with("referenceMonth", snapshot.reference_month.as_str())
            .with_amount("monthlyLimit", limit)
            .with_amount("consumption", consumption)
            .with("tier", status.tier.as_str())
            .with(
                "triggeredThreshold",
                status
                    .triggered_threshold
                    .map(CanonicalValue::Amount)
                    .unwrap_or(CanonicalValue::Null),
            );

        ComposedAlert {
            context,
            canonical_payload,
            cycle_key: cycle_key(snapshot, status),
        }
    }

    /// `{base_url}{route_path}?budgetId={id}&budgetToken={token}`; relative when no base URL.
    pub fn access_link(&self, budget_id: BudgetId, token: &str) -> String {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("budgetId", &budget_id.to_string())
            .append_pair("budgetToken", token)
            .finish();

        format!(
            "{}{}?{}",
            self.config.base_url.as_deref().unwrap_or_default(),
            self.config.route_path,
            query
        )
    }

    pub fn format_currency(&self, amount: f64) -> String {
        let cents = amount_cents(amount);
        let magnitude = cents.unsigned_abs();
        let sign = if cents < 0 { "-" } else { "" };
        format!(
            "{sign}{}{}.{:02}",
            self.config.currency_symbol,
            group_thousands(magnitude / 100),
            magnitude % 100
        )
    }
}

/// Coarse cooldown bucket: one alert per tier and crossed threshold per month.
pub fn cycle_key(snapshot: &BudgetSnapshot, status: &ThresholdStatus) -> String {
    let threshold = status
        .triggered_threshold
        .map(format_amount)
        .unwrap_or_else(|| "none".to_string());
    format!("{}:{}:{}", status.tier, threshold, snapshot.reference_month)
}

fn format_percentage(ratio: f64) -> String {
    format!("{:.1}%", ratio * 100.0)
}

fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (index, digit) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }
    grouped
}
