//! Durable record of alerts already dispatched.
//!
//! At-most-once delivery rests on the storage-level uniqueness of
//! `(event_id, recipient, content_hash)`: a reservation is an insert, and a
//! rejected insert means another worker already owns the alert. Reservations
//! are taken before sending; releasing one after a failed send is an explicit
//! caller decision.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OpenFlags};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error};

use super::fingerprint::DispatchFingerprint;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Unique identity of a reservation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReservationKey {
    pub event_id: String,
    pub recipient: String,
    pub content_hash: DispatchFingerprint,
}

/// Persisted row describing one reserved (and subsequently sent) alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchRecord {
    pub event_id: String,
    pub recipient: String,
    pub cycle_key: String,
    pub content_hash: DispatchFingerprint,
    pub context_snapshot: Value,
    pub sent_at: DateTime<Utc>,
}

impl DispatchRecord {
    pub fn key(&self) -> ReservationKey {
        ReservationKey {
            event_id: self.event_id.clone(),
            recipient: self.recipient.clone(),
            content_hash: self.content_hash.clone(),
        }
    }
}

/// Storage-level failures. Uniqueness conflicts get their own variant so callers
/// never inspect driver messages.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("unique constraint violated")]
    UniqueViolation,
    #[error("record rejected by storage: {0}")]
    Invalid(String),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Backing table for the ledger. `insert` must enforce the uniqueness constraint itself.
pub trait DispatchStore: Send + Sync {
    fn insert(&self, record: &DispatchRecord) -> Result<(), StoreError>;
    /// Whether `recipient` already holds a record for `event_id` under `cycle_key`.
    fn exists_in_cycle(
        &self,
        event_id: &str,
        recipient: &str,
        cycle_key: &str,
    ) -> Result<bool, StoreError>;
    fn delete(&self, key: &ReservationKey) -> Result<bool, StoreError>;
    fn count(&self) -> Result<usize, StoreError>;
}

/// Outcome of [`DispatchLedger::try_reserve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub reserved: bool,
    pub key: ReservationKey,
}

/// Ledger failures that are not duplicate suppressions.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("dispatch ledger unavailable: {0}")]
    Unavailable(String),
    #[error("dispatch ledger rejected record: {0}")]
    Invalid(String),
}

impl From<StoreError> for LedgerError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Invalid(reason) => Self::Invalid(reason),
            StoreError::Unavailable(reason) => Self::Unavailable(reason),
            StoreError::UniqueViolation => Self::Invalid("unexpected duplicate".to_string()),
        }
    }
}

/// Reserve-then-send gate over a [`DispatchStore`].
pub struct DispatchLedger<S> {
    store: Arc<S>,
}

impl<S> Clone for DispatchLedger<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<S: DispatchStore> DispatchLedger<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Atomically claims `(event_id, recipient, content_hash)`.
    ///
    /// A duplicate is reported as `reserved = false`, never as an error.
    pub fn try_reserve(
        &self,
        event_id: &str,
        recipient: &str,
        content_hash: &DispatchFingerprint,
        cycle_key: &str,
        context_snapshot: Value,
        sent_at: DateTime<Utc>,
    ) -> Result<Reservation, LedgerError> {
        let record = DispatchRecord {
            event_id: event_id.to_string(),
            recipient: recipient.to_string(),
            cycle_key: cycle_key.to_string(),
            content_hash: content_hash.clone(),
            context_snapshot,
            sent_at,
        };
        let key = record.key();

        match self.store.insert(&record) {
            Ok(()) => Ok(Reservation {
                reserved: true,
                key,
            }),
            Err(StoreError::UniqueViolation) => {
                debug!(event_id, recipient, content_hash = %content_hash, "duplicate alert suppressed");
                Ok(Reservation {
                    reserved: false,
                    key,
                })
            }
            Err(err) => {
                error!(event_id, recipient, error = %err, "dispatch ledger reservation failed");
                Err(err.into())
            }
        }
    }

    /// Whether `recipient` was already alerted for `event_id` under `cycle_key`.
    ///
    /// Cooldown buckets are per recipient; one recipient's alert never
    /// suppresses another's.
    pub fn has_fired_in_cycle(
        &self,
        event_id: &str,
        recipient: &str,
        cycle_key: &str,
    ) -> Result<bool, LedgerError> {
        Ok(self.store.exists_in_cycle(event_id, recipient, cycle_key)?)
    }

    /// Compensating delete so a failed send can be retried later.
    pub fn release(&self, key: &ReservationKey) -> Result<bool, LedgerError> {
        Ok(self.store.delete(key)?)
    }
}

/// In-process store; the map insert under the lock is the uniqueness constraint.
#[derive(Debug, Default)]
pub struct MemoryDispatchStore {
    records: Mutex<HashMap<ReservationKey, DispatchRecord>>,
}

impl MemoryDispatchStore {
    pub fn records(&self) -> Result<Vec<DispatchRecord>, StoreError> {
        let guard = self.lock()?;
        Ok(guard.values().cloned().collect())
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<ReservationKey, DispatchRecord>>, StoreError>
    {
        self.records
            .lock()
            .map_err(|_| StoreError::Unavailable("ledger mutex poisoned".to_string()))
    }
}

impl DispatchStore for MemoryDispatchStore {
    fn insert(&self, record: &DispatchRecord) -> Result<(), StoreError> {
        let mut guard = self.lock()?;
        let key = record.key();
        if guard.contains_key(&key) {
            return Err(StoreError::UniqueViolation);
        }
        guard.insert(key, record.clone());
        Ok(())
    }

    fn exists_in_cycle(
        &self,
        event_id: &str,
        recipient: &str,
        cycle_key: &str,
    ) -> Result<bool, StoreError> {
        let guard = self.lock()?;
        Ok(guard.values().any(|record| {
            record.event_id == event_id
                && record.recipient == recipient
                && record.cycle_key == cycle_key
        }))
    }

    fn delete(&self, key: &ReservationKey) -> Result<bool, StoreError> {
        let mut guard = self.lock()?;
        Ok(guard.remove(key).is_some())
    }

    fn count(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.len())
    }
}

/// SQLite-backed store; uniqueness is a table constraint, so separate
/// connections (or processes) sharing the file cannot double-reserve.
#[derive(Debug)]
pub struct SqliteDispatchStore {
    connection: Mutex<Connection>,
}

impl SqliteDispatchStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
        let connection = Connection::open_with_flags(path, flags).map_err(unavailable)?;
        connection
            .execute_batch("PRAGMA journal_mode = WAL;")
            .map_err(unavailable)?;
        Self::initialize(connection)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let connection = Connection::open_in_memory().map_err(unavailable)?;
        Self::initialize(connection)
    }

    fn initialize(connection: Connection) -> Result<Self, StoreError> {
        connection.busy_timeout(BUSY_TIMEOUT).map_err(unavailable)?;
        connection
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS dispatch_records (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    event_id TEXT NOT NULL,
                    recipient TEXT NOT NULL,
                    cycle_key TEXT NOT NULL,
                    content_hash TEXT NOT NULL CHECK (length(content_hash) = 64),
                    context_snapshot TEXT NOT NULL,
                    sent_at TEXT NOT NULL,
                    UNIQUE (event_id, recipient, content_hash)
                );
                CREATE INDEX IF NOT EXISTS idx_dispatch_records_recipient_cycle
                    ON dispatch_records (event_id, recipient, cycle_key);",
            )
            .map_err(unavailable)?;

        Ok(Self {
            connection: Mutex::new(connection),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.connection
            .lock()
            .map_err(|_| StoreError::Unavailable("sqlite connection mutex poisoned".to_string()))
    }
}

impl DispatchStore for SqliteDispatchStore {
    fn insert(&self, record: &DispatchRecord) -> Result<(), StoreError> {
        let snapshot = serde_json::to_string(&record.context_snapshot)
            .map_err(|err| StoreError::Invalid(err.to_string()))?;
        let connection = self.lock()?;
        let result = connection.execute(
            "INSERT INTO dispatch_records
                (event_id, recipient, cycle_key, content_hash, context_snapshot, sent_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.event_id,
                record.recipient,
                record.cycle_key,
                record.content_hash.as_str(),
                snapshot,
                record.sent_at.to_rfc3339(),
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, message))
                if err.code == ErrorCode::ConstraintViolation =>
            {
                if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE {
                    Err(StoreError::UniqueViolation)
                } else {
                    Err(StoreError::Invalid(
                        message.unwrap_or_else(|| "constraint violation".to_string()),
                    ))
                }
            }
            Err(err) => Err(unavailable(err)),
        }
    }

    fn exists_in_cycle(
        &self,
        event_id: &str,
        recipient: &str,
        cycle_key: &str,
    ) -> Result<bool, StoreError> {
        let connection = self.lock()?;
        connection
            .query_row(
                "SELECT EXISTS (
                    SELECT 1 FROM dispatch_records
                    WHERE event_id = ?1 AND recipient = ?2 AND cycle_key = ?3
                )",
                params![event_id, recipient, cycle_key],
                |row| row.get::<_, bool>(0),
            )
            .map_err(unavailable)
    }

    fn delete(&self, key: &ReservationKey) -> Result<bool, StoreError> {
        let connection = self.lock()?;
        let removed = connection
            .execute(
                "DELETE FROM dispatch_records
                 WHERE event_id = ?1 AND recipient = ?2 AND content_hash = ?3",
                params![key.event_id, key.recipient, key.content_hash.as_str()],
            )
            .map_err(unavailable)?;
        Ok(removed > 0)
    }

    fn count(&self) -> Result<usize, StoreError> {
        let connection = self.lock()?;
        let count: i64 = connection
            .query_row("SELECT COUNT(*) FROM dispatch_records", [], |row| row.get(0))
            .map_err(unavailable)?;
        Ok(usize::try_from(count).unwrap_or_default())
    }
}

fn unavailable(err: rusqlite::Error) -> StoreError {
    StoreError::Unavailable(err.to_string())
}
