//! Budget alert pipeline: threshold evaluation, content fingerprinting, the
//! dispatch ledger, signed access links, message composition, and the
//! rate-limited bulk dispatcher that fans messages out to a sender.

pub mod composer;
pub mod dispatcher;
pub mod domain;
pub mod fingerprint;
pub mod import;
pub mod ledger;
pub mod render;
pub mod router;
pub mod service;
pub mod threshold;
pub mod token;

#[cfg(test)]
mod tests;

pub use composer::{
    cycle_key, tier_presentation, AlertComposer, ComposeError, ComposedAlert, ComposerConfig,
    RenderContext, TierPresentation, DEFAULT_ROUTE_PATH,
};
pub use dispatcher::{
    AlertSender, BulkDispatcher, DispatchConfig, DispatchFailure, DispatchJob, DispatchReport,
    SendError, WindowRateLimiter, DEFAULT_CONCURRENCY,
};
pub use domain::{BudgetId, BudgetSnapshot, RecipientId};
pub use fingerprint::{
    fingerprint, CanonicalPayload, CanonicalValue, DispatchFingerprint, FingerprintError,
};
pub use import::{read_snapshots, read_snapshots_from_path, SnapshotImportError};
pub use ledger::{
    DispatchLedger, DispatchRecord, DispatchStore, LedgerError, MemoryDispatchStore, Reservation,
    ReservationKey, SqliteDispatchStore, StoreError,
};
pub use render::{MessageRenderer, RenderError, RenderedMessage, StandardRenderer};
pub use router::{alert_router, AccessGrant, ACCESS_DENIED_MESSAGE};
pub use service::{
    AlertComponents, AlertDispatchService, AlertPolicy, AlertRunReport, AlertRunSummary,
    AlertServiceError, FailureSummary, PlanningFailure,
};
pub use threshold::{evaluate, ThresholdStatus, ThresholdTier};
pub use token::{
    placeholder_warning_emitted, AccessTokenCodec, LinkSecret, MintedToken, TokenClaims,
    TokenError, TokenRejection, TokenVerification, DEFAULT_TOKEN_TTL_SECONDS,
    MIN_TOKEN_TTL_SECONDS,
};
