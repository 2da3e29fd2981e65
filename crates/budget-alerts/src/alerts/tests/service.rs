use std::sync::Arc;

use chrono::Duration;

use super::common::{build_service, components, now, snapshot, BrokenRenderer, RecordingSender};
use crate::alerts::dispatcher::{BulkDispatcher, DispatchConfig};
use crate::alerts::domain::{BudgetId, BudgetSnapshot, RecipientId};
use crate::alerts::ledger::{DispatchLedger, DispatchStore, MemoryDispatchStore};
use crate::alerts::render::StandardRenderer;
use crate::alerts::service::{AlertDispatchService, AlertPolicy};
use crate::alerts::threshold::{evaluate, ThresholdTier};

fn without_cooldown() -> AlertPolicy {
    AlertPolicy {
        cycle_cooldown: false,
        ..AlertPolicy::default()
    }
}

#[tokio::test]
async fn healthy_budgets_are_not_alerted() {
    let sender = Arc::new(RecordingSender::default());
    let (service, store) = build_service(sender.clone(), AlertPolicy::default());

    let report = service
        .run(vec![snapshot(1, 100.0), snapshot(2, 950.0)], now())
        .await;

    assert_eq!(report.evaluated, 2);
    assert_eq!(report.alertable, 1);
    assert_eq!(report.dispatch.sent, 1);
    assert_eq!(sender.recipients(), vec!["owner2@example.com".to_string()]);
    assert_eq!(store.count().expect("count"), 1);
}

#[tokio::test]
async fn identical_content_is_sent_once_across_runs() {
    let sender = Arc::new(RecordingSender::default());
    let (service, _) = build_service(sender.clone(), without_cooldown());

    let first = service.run(vec![snapshot(42, 950.0)], now()).await;
    // A later run mints a different token; the content is still the same.
    let second = service
        .run(vec![snapshot(42, 950.0)], now() + Duration::hours(2))
        .await;

    assert_eq!(first.dispatch.sent, 1);
    assert_eq!(second.suppressed_duplicates, 1);
    assert_eq!(second.dispatch.total, 0);
    assert_eq!(sender.recipients().len(), 1);
}

#[tokio::test]
async fn changed_content_is_sent_again_without_cooldown() {
    let sender = Arc::new(RecordingSender::default());
    let (service, _) = build_service(sender.clone(), without_cooldown());

    service.run(vec![snapshot(42, 950.0)], now()).await;
    let second = service.run(vec![snapshot(42, 960.0)], now()).await;

    assert_eq!(second.dispatch.sent, 1);
    assert_eq!(sender.recipients().len(), 2);
}

#[tokio::test]
async fn cooldown_suppresses_repeats_within_the_same_bucket() {
    let sender = Arc::new(RecordingSender::default());
    let (service, _) = build_service(sender.clone(), AlertPolicy::default());

    service.run(vec![snapshot(42, 950.0)], now()).await;
    let repeat = service.run(vec![snapshot(42, 960.0)], now()).await;

    assert_eq!(repeat.suppressed_cooldown, 1);
    assert_eq!(repeat.dispatch.sent, 0);
    assert_eq!(sender.recipients().len(), 1);
}

#[tokio::test]
async fn every_recipient_of_a_budget_gets_its_own_cooldown() {
    let sender = Arc::new(RecordingSender::default());
    let (service, _) = build_service(sender.clone(), AlertPolicy::default());
    let owner = snapshot(42, 950.0);
    let partner = BudgetSnapshot {
        recipient_id: RecipientId(8),
        recipient_address: "partner@example.com".to_string(),
        ..owner.clone()
    };

    let first = service.run(vec![owner.clone(), partner.clone()], now()).await;
    let second = service.run(vec![owner, partner], now()).await;

    assert_eq!(first.dispatch.sent, 2);
    assert_eq!(first.suppressed_cooldown, 0);
    assert_eq!(second.dispatch.sent, 0);
    assert_eq!(second.suppressed_cooldown, 2);
    let mut delivered = sender.recipients();
    delivered.sort();
    assert_eq!(
        delivered,
        vec![
            "owner42@example.com".to_string(),
            "partner@example.com".to_string()
        ]
    );
}

#[tokio::test]
async fn escalation_to_a_higher_tier_alerts_again() {
    let sender = Arc::new(RecordingSender::default());
    let (service, _) = build_service(sender.clone(), AlertPolicy::default());

    service.run(vec![snapshot(42, 950.0)], now()).await;
    let escalated = service.run(vec![snapshot(42, 1_000.0)], now()).await;

    assert_eq!(escalated.dispatch.sent, 1);
    let subjects: Vec<String> = sender
        .messages()
        .into_iter()
        .map(|message| message.subject)
        .collect();
    assert_eq!(
        subjects,
        vec![
            "[Warning] Groceries budget for 2025-03".to_string(),
            "[Critical] Groceries budget for 2025-03".to_string(),
        ]
    );
}

#[tokio::test]
async fn new_month_starts_a_new_cycle() {
    let sender = Arc::new(RecordingSender::default());
    let (service, _) = build_service(sender.clone(), AlertPolicy::default());

    service.run(vec![snapshot(42, 950.0)], now()).await;
    let mut april = snapshot(42, 950.0);
    april.reference_month = "2025-04".to_string();
    let next = service.run(vec![april], now()).await;

    assert_eq!(next.dispatch.sent, 1);
}

#[tokio::test]
async fn failed_send_keeps_reservation_by_default() {
    let failing = Arc::new(RecordingSender::failing_for(&["owner42@example.com"]));
    let (service, store) = build_service(failing, AlertPolicy::default());

    let report = service.run(vec![snapshot(42, 950.0)], now()).await;

    assert_eq!(report.dispatch.errors.len(), 1);
    assert_eq!(report.released, 0);
    assert_eq!(store.count().expect("count"), 1);

    let summary = report.summary();
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.failures[0].recipient, "owner42@example.com");
    assert_eq!(
        summary.failures[0].subject,
        "[Warning] Groceries budget for 2025-03"
    );
}

#[tokio::test]
async fn skipped_jobs_are_released_and_delivered_on_the_next_run() {
    let store = Arc::new(MemoryDispatchStore::default());
    let mut stopping = components(AlertPolicy::default());
    stopping.dispatcher = BulkDispatcher::new(DispatchConfig {
        concurrency: 1,
        stop_on_error: true,
    });
    let batch = || vec![snapshot(41, 950.0), snapshot(42, 950.0), snapshot(43, 950.0)];

    let aborted = AlertDispatchService::new(
        DispatchLedger::new(store.clone()),
        Arc::new(StandardRenderer),
        Arc::new(RecordingSender::failing_for(&["owner41@example.com"])),
        stopping,
    );
    let report = aborted.run(batch(), now()).await;

    assert_eq!(report.dispatch.errors.len(), 1);
    assert_eq!(report.dispatch.skipped.len(), 2);
    assert_eq!(report.released, 2);
    assert_eq!(store.count().expect("count"), 1);

    let sender = Arc::new(RecordingSender::default());
    let next = AlertDispatchService::new(
        DispatchLedger::new(store.clone()),
        Arc::new(StandardRenderer),
        sender.clone(),
        components(AlertPolicy::default()),
    );
    let rerun = next.run(batch(), now()).await;

    assert_eq!(rerun.suppressed_cooldown, 1);
    assert_eq!(rerun.dispatch.sent, 2);
    let mut delivered = sender.recipients();
    delivered.sort();
    assert_eq!(
        delivered,
        vec![
            "owner42@example.com".to_string(),
            "owner43@example.com".to_string()
        ]
    );
}

#[tokio::test]
async fn release_on_failure_allows_a_later_retry() {
    let store = Arc::new(MemoryDispatchStore::default());
    let policy = AlertPolicy {
        release_on_failure: true,
        ..AlertPolicy::default()
    };
    let failing = AlertDispatchService::new(
        DispatchLedger::new(store.clone()),
        Arc::new(StandardRenderer),
        Arc::new(RecordingSender::failing_for(&["owner42@example.com"])),
        components(policy),
    );

    let report = failing.run(vec![snapshot(42, 950.0)], now()).await;
    assert_eq!(report.released, 1);
    assert_eq!(store.count().expect("count"), 0);

    let sender = Arc::new(RecordingSender::default());
    let retry = AlertDispatchService::new(
        DispatchLedger::new(store.clone()),
        Arc::new(StandardRenderer),
        sender.clone(),
        components(policy),
    );
    let retried = retry.run(vec![snapshot(42, 950.0)], now()).await;

    assert_eq!(retried.dispatch.sent, 1);
    assert_eq!(sender.recipients(), vec!["owner42@example.com".to_string()]);
}

#[tokio::test]
async fn render_failure_is_reported_and_releases_reservation() {
    let store = Arc::new(MemoryDispatchStore::default());
    let service = AlertDispatchService::new(
        DispatchLedger::new(store.clone()),
        Arc::new(BrokenRenderer),
        Arc::new(RecordingSender::default()),
        components(AlertPolicy::default()),
    );

    let report = service.run(vec![snapshot(42, 950.0)], now()).await;

    assert_eq!(report.planning_failures.len(), 1);
    assert_eq!(report.planning_failures[0].budget_id, BudgetId(42));
    assert!(report.planning_failures[0].error.contains("missing partial"));
    assert_eq!(store.count().expect("count"), 0);
}

#[tokio::test]
async fn concurrent_runs_sharing_a_ledger_send_once() {
    let store = Arc::new(MemoryDispatchStore::default());
    let sender = Arc::new(RecordingSender::default());
    let build = || {
        AlertDispatchService::new(
            DispatchLedger::new(store.clone()),
            Arc::new(StandardRenderer),
            sender.clone(),
            components(without_cooldown()),
        )
    };
    let first = build();
    let second = build();

    let (left, right) = tokio::join!(
        first.run(vec![snapshot(42, 950.0)], now()),
        second.run(vec![snapshot(42, 950.0)], now())
    );

    assert_eq!(left.dispatch.sent + right.dispatch.sent, 1);
    assert_eq!(left.suppressed_duplicates + right.suppressed_duplicates, 1);
    assert_eq!(sender.recipients().len(), 1);
}

#[test]
fn policy_alerts_on_minimum_tier_or_crossed_threshold() {
    let policy = AlertPolicy::default();

    assert!(!policy.is_alertable(&evaluate(1000.0, 100.0, &[])));
    assert!(!policy.is_alertable(&evaluate(1000.0, 650.0, &[])));
    assert!(policy.is_alertable(&evaluate(1000.0, 650.0, &[500.0, 900.0])));
    assert!(policy.is_alertable(&evaluate(1000.0, 900.0, &[])));

    let caution = AlertPolicy {
        minimum_tier: ThresholdTier::Caution,
        ..AlertPolicy::default()
    };
    assert!(caution.is_alertable(&evaluate(1000.0, 650.0, &[])));
    assert!(!caution.is_alertable(&evaluate(1000.0, 100.0, &[])));
}
