//! End-to-end scenarios for the budget alert pipeline.
//!
//! Snapshots enter through the CSV importer, alerts are deduplicated by a
//! file-backed SQLite ledger, and access links are checked through the public
//! codec, so each test exercises only the crate's public surface.

mod common {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};

    use budget_alerts::alerts::{AlertSender, RenderedMessage, SendError};
    use budget_alerts::config::AppConfig;

    pub(super) const EXPORT: &str = "\
budget_id,category_name,monthly_limit,consumption,thresholds,reference_month,recipient_id,recipient_address
10,Groceries,800,780,400;700,2025-06,1,ana@example.com
11,Dining,300,120,,2025-06,1,ana@example.com
12,Utilities,500,525,450,2025-06,2,ben@example.com
";

    pub(super) fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 20, 8, 0, 0)
            .single()
            .expect("valid timestamp")
    }

    pub(super) fn config() -> AppConfig {
        AppConfig::from_lookup(|key| match key {
            "ALERT_LINK_SECRET" => Some("integration-secret".to_string()),
            "ALERT_BASE_URL" => Some("https://budgets.example.com".to_string()),
            "ALERT_RATE_LIMIT_MAX" => Some("50".to_string()),
            "ALERT_RATE_LIMIT_INTERVAL_MS" => Some("10".to_string()),
            _ => None,
        })
        .expect("config")
    }

    #[derive(Default)]
    pub(super) struct Outbox {
        delivered: Mutex<Vec<(String, RenderedMessage)>>,
    }

    impl Outbox {
        pub(super) fn delivered(&self) -> Vec<(String, RenderedMessage)> {
            self.delivered.lock().expect("outbox mutex poisoned").clone()
        }
    }

    #[async_trait]
    impl AlertSender for Outbox {
        async fn send(&self, recipient: &str, message: &RenderedMessage) -> Result<(), SendError> {
            self.delivered
                .lock()
                .expect("outbox mutex poisoned")
                .push((recipient.to_string(), message.clone()));
            Ok(())
        }
    }

    pub(super) fn link_token(link: &str) -> String {
        let (_, query) = link.split_once('?').expect("query string");
        url_param(query, "budgetToken")
    }

    fn url_param(query: &str, name: &str) -> String {
        query
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.to_string())
            .expect("query parameter")
    }
}

use std::sync::Arc;

use budget_alerts::alerts::{
    read_snapshots, AlertComponents, AlertDispatchService, DispatchLedger, DispatchStore,
    SqliteDispatchStore, StandardRenderer, TokenVerification,
};
use chrono::Duration;

use common::*;

fn build_pipeline(
    store: Arc<SqliteDispatchStore>,
    outbox: Arc<Outbox>,
) -> AlertDispatchService<SqliteDispatchStore, StandardRenderer, Outbox> {
    let components = AlertComponents::from_config(&config().alerts).expect("components");
    AlertDispatchService::new(
        DispatchLedger::new(store),
        Arc::new(StandardRenderer),
        outbox,
        components,
    )
}

#[tokio::test]
async fn imported_snapshots_alert_once_across_restarts() {
    let dir = tempfile::tempdir().expect("tempdir");
    let ledger_path = dir.path().join("dispatch.sqlite3");
    let snapshots = read_snapshots(EXPORT.as_bytes()).expect("import");

    let outbox = Arc::new(Outbox::default());
    let first = build_pipeline(
        Arc::new(SqliteDispatchStore::open(&ledger_path).expect("ledger")),
        outbox.clone(),
    );
    let report = first.run(snapshots.clone(), now()).await;

    assert_eq!(report.evaluated, 3);
    assert_eq!(report.alertable, 2);
    assert!(report.dispatch.is_complete());
    let mut recipients: Vec<String> = outbox
        .delivered()
        .into_iter()
        .map(|(recipient, _)| recipient)
        .collect();
    recipients.sort();
    assert_eq!(recipients, vec!["ana@example.com", "ben@example.com"]);

    drop(first);
    let restarted = build_pipeline(
        Arc::new(SqliteDispatchStore::open(&ledger_path).expect("ledger")),
        outbox.clone(),
    );
    let rerun = restarted.run(snapshots, now() + Duration::hours(6)).await;

    assert_eq!(rerun.dispatch.total, 0);
    assert_eq!(rerun.suppressed_cooldown, 2);
    assert_eq!(outbox.delivered().len(), 2);
    assert_eq!(restarted.ledger().store().count().expect("count"), 2);
}

#[tokio::test]
async fn delivered_links_verify_until_they_expire() {
    let outbox = Arc::new(Outbox::default());
    let service = build_pipeline(
        Arc::new(SqliteDispatchStore::open_in_memory().expect("ledger")),
        outbox.clone(),
    );
    let snapshots = read_snapshots(EXPORT.as_bytes()).expect("import");

    service.run(snapshots, now()).await;

    let (_, message) = outbox
        .delivered()
        .into_iter()
        .find(|(recipient, _)| recipient == "ana@example.com")
        .expect("groceries alert");
    assert!(message.subject.starts_with("[Warning] Groceries"));
    assert!(message
        .text
        .contains("https://budgets.example.com/finance/budgets?budgetId=10&budgetToken="));

    let start = message.text.find("https://").expect("link");
    let link = message.text[start..]
        .split_whitespace()
        .next()
        .expect("link text");
    let token = link_token(link);

    match service.codec().verify(&token, now() + Duration::hours(1)) {
        TokenVerification::Valid(claims) => assert_eq!(claims.budget_id.0, 10),
        other => panic!("expected valid token, got {other:?}"),
    }
    assert!(!service
        .codec()
        .verify(&token, now() + Duration::days(2))
        .is_valid());
}
