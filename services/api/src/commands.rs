use crate::infra::build_alert_service;
use budget_alerts::alerts::{
    read_snapshots_from_path, AlertComponents, BudgetId, RecipientId, TokenClaims,
    TokenRejection, TokenVerification,
};
use budget_alerts::config::{AlertConfig, AppConfig};
use budget_alerts::error::AppError;
use budget_alerts::telemetry;
use chrono::{DateTime, Utc};
use clap::Args;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub(crate) struct DispatchArgs {
    /// CSV export of budget snapshots
    #[arg(long)]
    pub(crate) snapshots: PathBuf,
    /// Override the configured SQLite ledger file
    #[arg(long)]
    pub(crate) ledger: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub(crate) struct MintArgs {
    #[arg(long)]
    pub(crate) budget_id: i64,
    #[arg(long)]
    pub(crate) recipient_id: i64,
    /// Token lifetime; values below the minimum are raised to it
    #[arg(long)]
    pub(crate) ttl_seconds: Option<i64>,
}

#[derive(Args, Debug)]
pub(crate) struct VerifyArgs {
    /// Token taken from the `budgetToken` query parameter
    pub(crate) token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MintedLink {
    pub(crate) link: String,
    pub(crate) token: String,
    pub(crate) expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct VerificationOutput {
    pub(crate) valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) reason: Option<TokenRejection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) claims: Option<TokenClaims>,
}

pub(crate) async fn run_dispatch(args: DispatchArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;
    telemetry::init(&config.telemetry)?;
    if let Some(ledger) = args.ledger {
        config.alerts.ledger_path = Some(ledger);
    }

    let snapshots = read_snapshots_from_path(&args.snapshots)?;
    let service = build_alert_service(&config.alerts)?;
    let report = service.run(snapshots, Utc::now()).await;

    print_json(&report.summary())
}

pub(crate) fn run_link_mint(args: MintArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry)?;

    let minted = mint_link(&config.alerts, &args, Utc::now())?;
    print_json(&minted)
}

pub(crate) fn run_link_verify(args: VerifyArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry)?;

    let output = verify_token(&config.alerts, &args.token, Utc::now())?;
    print_json(&output)
}

pub(crate) fn mint_link(
    config: &AlertConfig,
    args: &MintArgs,
    now: DateTime<Utc>,
) -> Result<MintedLink, AppError> {
    let components = AlertComponents::from_config(config)?;
    let budget_id = BudgetId(args.budget_id);
    let minted = components
        .codec
        .mint(budget_id, RecipientId(args.recipient_id), args.ttl_seconds, now)
        .map_err(|err| AppError::Alerts(err.into()))?;

    Ok(MintedLink {
        link: components.composer.access_link(budget_id, &minted.token),
        token: minted.token,
        expires_at: minted.expires_at,
    })
}

pub(crate) fn verify_token(
    config: &AlertConfig,
    token: &str,
    now: DateTime<Utc>,
) -> Result<VerificationOutput, AppError> {
    let components = AlertComponents::from_config(config)?;
    let output = match components.codec.verify(token, now) {
        TokenVerification::Valid(claims) => VerificationOutput {
            valid: true,
            reason: None,
            claims: Some(claims),
        },
        TokenVerification::Rejected(reason) => VerificationOutput {
            valid: false,
            reason: Some(reason),
            claims: None,
        },
    };
    Ok(output)
}

fn print_json<T: Serialize>(value: &T) -> Result<(), AppError> {
    let rendered = serde_json::to_string_pretty(value).map_err(std::io::Error::from)?;
    println!("{rendered}");
    Ok(())
}
