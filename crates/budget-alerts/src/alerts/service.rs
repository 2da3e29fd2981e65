use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info};

use super::composer::{cycle_key, AlertComposer, ComposerConfig};
use super::dispatcher::{
    AlertSender, BulkDispatcher, DispatchConfig, DispatchJob, DispatchReport, WindowRateLimiter,
};
use super::domain::{BudgetId, BudgetSnapshot};
use super::fingerprint::{fingerprint, FingerprintError};
use super::ledger::{DispatchLedger, DispatchStore, LedgerError, ReservationKey};
use super::render::{MessageRenderer, RenderError};
use super::threshold::{evaluate, ThresholdStatus, ThresholdTier};
use super::token::{AccessTokenCodec, LinkSecret, TokenError};
use crate::config::AlertConfig;

/// Rules deciding which evaluations turn into alerts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertPolicy {
    pub minimum_tier: ThresholdTier,
    /// Suppress repeats within the same tier/threshold/month bucket.
    pub cycle_cooldown: bool,
    /// Delete the reservation of a failed send so a later run can retry it.
    /// Jobs skipped by an aborted batch were never sent and are always released.
    pub release_on_failure: bool,
    pub token_ttl_seconds: Option<i64>,
}

impl Default for AlertPolicy {
    fn default() -> Self {
        Self {
            minimum_tier: ThresholdTier::Warning,
            cycle_cooldown: true,
            release_on_failure: false,
            token_ttl_seconds: None,
        }
    }
}

impl AlertPolicy {
    /// Healthy budgets never alert; otherwise the tier must reach the minimum or a
    /// configured threshold must have been crossed.
    pub fn is_alertable(&self, status: &ThresholdStatus) -> bool {
        match status.tier {
            ThresholdTier::Healthy => false,
            ThresholdTier::Caution | ThresholdTier::Warning | ThresholdTier::Critical => {
                status.tier >= self.minimum_tier || status.triggered_threshold.is_some()
            }
        }
    }
}

/// Stateless collaborators shared by every run.
#[derive(Debug, Clone)]
pub struct AlertComponents {
    pub codec: AccessTokenCodec,
    pub composer: AlertComposer,
    pub dispatcher: BulkDispatcher,
    pub limiter: Arc<WindowRateLimiter>,
    pub policy: AlertPolicy,
}

impl AlertComponents {
    pub fn from_config(config: &AlertConfig) -> Result<Self, AlertServiceError> {
        let secret = LinkSecret::resolve(config.link_secret.as_deref());
        let codec = AccessTokenCodec::new(secret, config.default_token_ttl_seconds);
        let composer = AlertComposer::new(
            ComposerConfig::new(config.base_url.clone(), config.route_path.clone(), "$")
                .map_err(|err| AlertServiceError::Configuration(err.to_string()))?,
        );
        let dispatcher = BulkDispatcher::new(DispatchConfig {
            concurrency: config.concurrency,
            stop_on_error: config.stop_on_error,
        });
        let limiter = Arc::new(WindowRateLimiter::new(
            config.rate_limit.max_per_interval,
            Duration::from_millis(config.rate_limit.interval_ms),
        ));
        let policy = AlertPolicy {
            minimum_tier: config.minimum_tier,
            cycle_cooldown: config.cycle_cooldown,
            release_on_failure: config.release_on_failure,
            token_ttl_seconds: None,
        };

        Ok(Self {
            codec,
            composer,
            dispatcher,
            limiter,
            policy,
        })
    }
}

/// Errors that stop a single snapshot from being planned.
#[derive(Debug, thiserror::Error)]
pub enum AlertServiceError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error(transparent)]
    Fingerprint(#[from] FingerprintError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error("invalid alert configuration: {0}")]
    Configuration(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanningFailure {
    pub budget_id: BudgetId,
    pub error: String,
}

/// Outcome of one pipeline run over a batch of snapshots.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlertRunReport {
    pub evaluated: usize,
    pub alertable: usize,
    pub suppressed_duplicates: usize,
    pub suppressed_cooldown: usize,
    pub planning_failures: Vec<PlanningFailure>,
    pub released: usize,
    pub dispatch: DispatchReport,
}

/// Serializable counts for operational tooling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRunSummary {
    pub evaluated: usize,
    pub alertable: usize,
    pub suppressed_duplicates: usize,
    pub suppressed_cooldown: usize,
    pub planning_failures: Vec<PlanningFailure>,
    pub sent: usize,
    pub total: usize,
    pub failed: usize,
    pub skipped: usize,
    pub released: usize,
    pub failures: Vec<FailureSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureSummary {
    pub recipient: String,
    pub subject: String,
    pub error: String,
}

impl AlertRunReport {
    pub fn summary(&self) -> AlertRunSummary {
        AlertRunSummary {
            evaluated: self.evaluated,
            alertable: self.alertable,
            suppressed_duplicates: self.suppressed_duplicates,
            suppressed_cooldown: self.suppressed_cooldown,
            planning_failures: self.planning_failures.clone(),
            sent: self.dispatch.sent,
            total: self.dispatch.total,
            failed: self.dispatch.errors.len(),
            skipped: self.dispatch.skipped.len(),
            released: self.released,
            failures: self
                .dispatch
                .errors
                .iter()
                .map(|failure| FailureSummary {
                    recipient: failure.job.recipient.clone(),
                    subject: failure.job.message.subject.clone(),
                    error: failure.error.to_string(),
                })
                .collect(),
        }
    }
}

enum PlannedAlert {
    Job(DispatchJob),
    Duplicate,
    Cooldown,
}

/// Runs snapshots through evaluation, deduplication, composition and dispatch.
///
/// Ledger access is synchronous, so planning and releases run on the blocking
/// pool rather than on the caller's executor thread.
pub struct AlertDispatchService<S, R, T: ?Sized> {
    planner: Arc<AlertPlanner<S, R>>,
    sender: Arc<T>,
}

impl<S, R, T> AlertDispatchService<S, R, T>
where
    S: DispatchStore + 'static,
    R: MessageRenderer + 'static,
    T: AlertSender + ?Sized + 'static,
{
    pub fn new(
        ledger: DispatchLedger<S>,
        renderer: Arc<R>,
        sender: Arc<T>,
        components: AlertComponents,
    ) -> Self {
        Self {
            planner: Arc::new(AlertPlanner {
                ledger,
                renderer,
                components,
            }),
            sender,
        }
    }

    pub fn ledger(&self) -> &DispatchLedger<S> {
        &self.planner.ledger
    }

    pub fn codec(&self) -> &AccessTokenCodec {
        &self.planner.components.codec
    }

    pub fn composer(&self) -> &AlertComposer {
        &self.planner.components.composer
    }

    /// Evaluates every snapshot and dispatches the alerts that survive deduplication.
    pub async fn run(&self, snapshots: Vec<BudgetSnapshot>, now: DateTime<Utc>) -> AlertRunReport {
        let budget_ids: Vec<BudgetId> = snapshots
            .iter()
            .map(|snapshot| snapshot.budget_id)
            .collect();
        let planner = self.planner.clone();
        let planned =
            tokio::task::spawn_blocking(move || planner.plan_batch(&snapshots, now)).await;
        let (mut report, jobs) = match planned {
            Ok(planned) => planned,
            Err(err) => {
                error!(error = %err, "alert planning terminated unexpectedly");
                return AlertRunReport {
                    evaluated: budget_ids.len(),
                    planning_failures: budget_ids
                        .into_iter()
                        .map(|budget_id| PlanningFailure {
                            budget_id,
                            error: format!("planning terminated: {err}"),
                        })
                        .collect(),
                    ..AlertRunReport::default()
                };
            }
        };

        let components = &self.planner.components;
        report.dispatch = components
            .dispatcher
            .dispatch(jobs, components.limiter.clone(), self.sender.clone())
            .await;

        let undelivered = undelivered_reservations(&report.dispatch, components.policy);
        if !undelivered.is_empty() {
            let planner = self.planner.clone();
            report.released =
                match tokio::task::spawn_blocking(move || planner.release_all(&undelivered)).await {
                    Ok(released) => released,
                    Err(err) => {
                        error!(error = %err, "reservation release terminated unexpectedly");
                        0
                    }
                };
        }

        info!(
            evaluated = report.evaluated,
            alertable = report.alertable,
            duplicates = report.suppressed_duplicates,
            cooldown = report.suppressed_cooldown,
            sent = report.dispatch.sent,
            failed = report.dispatch.errors.len(),
            skipped = report.dispatch.skipped.len(),
            released = report.released,
            "budget alert run finished"
        );
        report
    }
}

/// Reservations to hand back: skipped jobs always, failed sends only when the
/// policy asks for retries.
fn undelivered_reservations(dispatch: &DispatchReport, policy: AlertPolicy) -> Vec<ReservationKey> {
    let mut keys: Vec<ReservationKey> = dispatch
        .skipped
        .iter()
        .filter_map(|job| job.reservation.clone())
        .collect();
    if policy.release_on_failure {
        keys.extend(
            dispatch
                .errors
                .iter()
                .filter_map(|failure| failure.job.reservation.clone()),
        );
    }
    keys
}

/// Ledger-bound half of a run: evaluation, reservation and rendering.
struct AlertPlanner<S, R> {
    ledger: DispatchLedger<S>,
    renderer: Arc<R>,
    components: AlertComponents,
}

impl<S, R> AlertPlanner<S, R>
where
    S: DispatchStore,
    R: MessageRenderer,
{
    fn plan_batch(
        &self,
        snapshots: &[BudgetSnapshot],
        now: DateTime<Utc>,
    ) -> (AlertRunReport, Vec<DispatchJob>) {
        let mut report = AlertRunReport::default();
        let mut jobs = Vec::new();

        for snapshot in snapshots {
            report.evaluated += 1;
            let status = evaluate(
                snapshot.monthly_limit,
                snapshot.consumption,
                &snapshot.thresholds,
            );
            if !self.components.policy.is_alertable(&status) {
                continue;
            }
            report.alertable += 1;

            match self.plan(snapshot, &status, now) {
                Ok(PlannedAlert::Job(job)) => jobs.push(job),
                Ok(PlannedAlert::Duplicate) => report.suppressed_duplicates += 1,
                Ok(PlannedAlert::Cooldown) => report.suppressed_cooldown += 1,
                Err(err) => {
                    error!(budget_id = %snapshot.budget_id, error = %err, "failed to plan budget alert");
                    report.planning_failures.push(PlanningFailure {
                        budget_id: snapshot.budget_id,
                        error: err.to_string(),
                    });
                }
            }
        }

        (report, jobs)
    }

    fn plan(
        &self,
        snapshot: &BudgetSnapshot,
        status: &ThresholdStatus,
        now: DateTime<Utc>,
    ) -> Result<PlannedAlert, AlertServiceError> {
        let event_id = snapshot.event_id();
        let recipient = snapshot.recipient_address.as_str();
        let cycle = cycle_key(snapshot, status);

        if self.components.policy.cycle_cooldown
            && self.ledger.has_fired_in_cycle(&event_id, recipient, &cycle)?
        {
            debug!(event_id = %event_id, recipient, cycle_key = %cycle, "alert suppressed by cycle cooldown");
            return Ok(PlannedAlert::Cooldown);
        }

        let token = self.components.codec.mint(
            snapshot.budget_id,
            snapshot.recipient_id,
            self.components.policy.token_ttl_seconds,
            now,
        )?;
        let composed = self.components.composer.compose(snapshot, status, &token);
        let content_hash = fingerprint(&event_id, recipient, &composed.canonical_payload)?;

        let reservation = self.ledger.try_reserve(
            &event_id,
            recipient,
            &content_hash,
            &composed.cycle_key,
            composed.canonical_payload.to_json(),
            now,
        )?;
        if !reservation.reserved {
            return Ok(PlannedAlert::Duplicate);
        }

        let message = match self.renderer.render(&composed.context) {
            Ok(message) => message,
            Err(err) => {
                self.ledger.release(&reservation.key)?;
                return Err(err.into());
            }
        };

        Ok(PlannedAlert::Job(DispatchJob {
            recipient: recipient.to_string(),
            message,
            reservation: Some(reservation.key),
        }))
    }

    fn release_all(&self, keys: &[ReservationKey]) -> usize {
        let mut released = 0;
        for key in keys {
            match self.ledger.release(key) {
                Ok(true) => released += 1,
                Ok(false) => {}
                Err(err) => {
                    error!(event_id = %key.event_id, error = %err, "failed to release reservation")
                }
            }
        }
        released
    }
}
