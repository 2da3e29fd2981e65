use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::response::Response;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use crate::alerts::composer::{AlertComposer, ComposerConfig, RenderContext};
use crate::alerts::dispatcher::{
    AlertSender, BulkDispatcher, DispatchConfig, SendError, WindowRateLimiter,
};
use crate::alerts::domain::{BudgetId, BudgetSnapshot, RecipientId};
use crate::alerts::ledger::{DispatchLedger, MemoryDispatchStore};
use crate::alerts::render::{MessageRenderer, RenderError, RenderedMessage, StandardRenderer};
use crate::alerts::service::{AlertComponents, AlertDispatchService, AlertPolicy};
use crate::alerts::token::{AccessTokenCodec, LinkSecret, DEFAULT_TOKEN_TTL_SECONDS};

pub(super) const SECRET: &str = "unit-test-link-secret";

pub(super) fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 14, 9, 30, 0)
        .single()
        .expect("valid timestamp")
}

pub(super) fn snapshot(budget_id: i64, consumption: f64) -> BudgetSnapshot {
    BudgetSnapshot {
        budget_id: BudgetId(budget_id),
        category_name: "Groceries".to_string(),
        monthly_limit: 1000.0,
        consumption,
        thresholds: vec![500.0, 900.0],
        reference_month: "2025-03".to_string(),
        recipient_id: RecipientId(7),
        recipient_address: format!("owner{budget_id}@example.com"),
    }
}

pub(super) fn codec() -> AccessTokenCodec {
    AccessTokenCodec::new(
        LinkSecret::new(SECRET).expect("secret"),
        DEFAULT_TOKEN_TTL_SECONDS,
    )
}

pub(super) fn composer() -> AlertComposer {
    AlertComposer::new(
        ComposerConfig::new(
            Some("https://app.example.com/".to_string()),
            "/finance/budgets",
            "$",
        )
        .expect("composer config"),
    )
}

pub(super) fn components(policy: AlertPolicy) -> AlertComponents {
    AlertComponents {
        codec: codec(),
        composer: composer(),
        dispatcher: BulkDispatcher::new(DispatchConfig {
            concurrency: 2,
            stop_on_error: false,
        }),
        limiter: Arc::new(WindowRateLimiter::new(100, Duration::from_millis(10))),
        policy,
    }
}

pub(super) type TestService<T> = AlertDispatchService<MemoryDispatchStore, StandardRenderer, T>;

pub(super) fn build_service<T: AlertSender + 'static>(
    sender: Arc<T>,
    policy: AlertPolicy,
) -> (Arc<TestService<T>>, Arc<MemoryDispatchStore>) {
    let store = Arc::new(MemoryDispatchStore::default());
    let service = AlertDispatchService::new(
        DispatchLedger::new(store.clone()),
        Arc::new(StandardRenderer),
        sender,
        components(policy),
    );
    (Arc::new(service), store)
}

pub(super) fn message(subject: &str) -> RenderedMessage {
    RenderedMessage {
        subject: subject.to_string(),
        html: format!("<p>{subject}</p>"),
        text: subject.to_string(),
    }
}

/// Records every delivery; optionally fails for selected recipients.
#[derive(Default)]
pub(super) struct RecordingSender {
    deliveries: Mutex<Vec<(String, RenderedMessage)>>,
    failing: HashSet<String>,
    delay: Option<Duration>,
}

impl RecordingSender {
    pub(super) fn failing_for(recipients: &[&str]) -> Self {
        Self {
            failing: recipients.iter().map(|value| value.to_string()).collect(),
            ..Self::default()
        }
    }

    pub(super) fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub(super) fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(super) fn recipients(&self) -> Vec<String> {
        self.deliveries
            .lock()
            .expect("sender mutex poisoned")
            .iter()
            .map(|(recipient, _)| recipient.clone())
            .collect()
    }

    pub(super) fn messages(&self) -> Vec<RenderedMessage> {
        self.deliveries
            .lock()
            .expect("sender mutex poisoned")
            .iter()
            .map(|(_, message)| message.clone())
            .collect()
    }
}

#[async_trait]
impl AlertSender for RecordingSender {
    async fn send(&self, recipient: &str, message: &RenderedMessage) -> Result<(), SendError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.contains(recipient) {
            return Err(SendError::Transport("smtp connection reset".to_string()));
        }
        self.deliveries
            .lock()
            .expect("sender mutex poisoned")
            .push((recipient.to_string(), message.clone()));
        Ok(())
    }
}

/// Timestamps each send against the tokio clock.
#[derive(Default)]
pub(super) struct TimedSender {
    sent_at: Mutex<Vec<tokio::time::Instant>>,
}

impl TimedSender {
    pub(super) fn instants(&self) -> Vec<tokio::time::Instant> {
        self.sent_at.lock().expect("sender mutex poisoned").clone()
    }
}

#[async_trait]
impl AlertSender for TimedSender {
    async fn send(&self, _recipient: &str, _message: &RenderedMessage) -> Result<(), SendError> {
        self.sent_at
            .lock()
            .expect("sender mutex poisoned")
            .push(tokio::time::Instant::now());
        Ok(())
    }
}

pub(super) struct BrokenRenderer;

impl MessageRenderer for BrokenRenderer {
    fn render(&self, _context: &RenderContext) -> Result<RenderedMessage, RenderError> {
        Err(RenderError::Template {
            template: "budget-alert".to_string(),
            reason: "missing partial".to_string(),
        })
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
