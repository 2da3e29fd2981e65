use async_trait::async_trait;
use budget_alerts::alerts::{
    AlertComponents, AlertDispatchService, AlertSender, DispatchLedger, DispatchRecord,
    DispatchStore, MemoryDispatchStore, RenderedMessage, ReservationKey, SendError,
    SqliteDispatchStore, StandardRenderer, StoreError,
};
use budget_alerts::config::AlertConfig;
use budget_alerts::error::AppError;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Ledger backend picked from `ALERT_LEDGER_PATH`.
pub(crate) enum LedgerStore {
    Memory(MemoryDispatchStore),
    Sqlite(SqliteDispatchStore),
}

impl LedgerStore {
    pub(crate) fn from_config(config: &AlertConfig) -> Result<Self, StoreError> {
        match &config.ledger_path {
            Some(path) => {
                info!(path = %path.display(), "using sqlite dispatch ledger");
                Ok(Self::Sqlite(SqliteDispatchStore::open(path)?))
            }
            None => {
                info!("using in-memory dispatch ledger; duplicates are only suppressed until restart");
                Ok(Self::Memory(MemoryDispatchStore::default()))
            }
        }
    }
}

impl DispatchStore for LedgerStore {
    fn insert(&self, record: &DispatchRecord) -> Result<(), StoreError> {
        match self {
            LedgerStore::Memory(store) => store.insert(record),
            LedgerStore::Sqlite(store) => store.insert(record),
        }
    }

    fn exists_in_cycle(
        &self,
        event_id: &str,
        recipient: &str,
        cycle_key: &str,
    ) -> Result<bool, StoreError> {
        match self {
            LedgerStore::Memory(store) => store.exists_in_cycle(event_id, recipient, cycle_key),
            LedgerStore::Sqlite(store) => store.exists_in_cycle(event_id, recipient, cycle_key),
        }
    }

    fn delete(&self, key: &ReservationKey) -> Result<bool, StoreError> {
        match self {
            LedgerStore::Memory(store) => store.delete(key),
            LedgerStore::Sqlite(store) => store.delete(key),
        }
    }

    fn count(&self) -> Result<usize, StoreError> {
        match self {
            LedgerStore::Memory(store) => store.count(),
            LedgerStore::Sqlite(store) => store.count(),
        }
    }
}

/// Sender that writes each alert to the structured log instead of a mail relay.
#[derive(Debug, Default, Clone)]
pub(crate) struct LogSender;

#[async_trait]
impl AlertSender for LogSender {
    async fn send(&self, recipient: &str, message: &RenderedMessage) -> Result<(), SendError> {
        if recipient.trim().is_empty() {
            return Err(SendError::Rejected("empty recipient address".to_string()));
        }
        info!(recipient, subject = %message.subject, "budget alert delivered");
        Ok(())
    }
}

pub(crate) type AlertService = AlertDispatchService<LedgerStore, StandardRenderer, LogSender>;

pub(crate) fn build_alert_service(config: &AlertConfig) -> Result<Arc<AlertService>, AppError> {
    let store = LedgerStore::from_config(config)?;
    let components = AlertComponents::from_config(config)?;

    Ok(Arc::new(AlertDispatchService::new(
        DispatchLedger::new(Arc::new(store)),
        Arc::new(StandardRenderer),
        Arc::new(LogSender),
        components,
    )))
}
