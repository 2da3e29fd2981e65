use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use super::dispatcher::AlertSender;
use super::domain::BudgetSnapshot;
use super::ledger::DispatchStore;
use super::render::MessageRenderer;
use super::service::AlertDispatchService;
use super::threshold::evaluate;
use super::token::{TokenRejection, TokenVerification};

pub const ACCESS_DENIED_MESSAGE: &str = "link expired or invalid";

/// Router exposing dispatch, evaluation, and deep-link verification endpoints.
pub fn alert_router<S, R, T>(service: Arc<AlertDispatchService<S, R, T>>) -> Router
where
    S: DispatchStore + 'static,
    R: MessageRenderer + 'static,
    T: AlertSender + ?Sized + 'static,
{
    let link_path = service.composer().config().route_path().to_string();

    Router::new()
        .route("/api/v1/alerts/dispatch", post(dispatch_handler::<S, R, T>))
        .route("/api/v1/alerts/evaluate", post(evaluate_handler))
        .route(&link_path, get(access_link_handler::<S, R, T>))
        .with_state(service)
}

#[derive(Debug, Deserialize)]
pub struct DispatchRequest {
    pub snapshots: Vec<BudgetSnapshot>,
}

#[derive(Debug, Deserialize)]
pub struct EvaluateRequest {
    pub limit: f64,
    pub consumption: f64,
    #[serde(default)]
    pub thresholds: Vec<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessLinkQuery {
    pub budget_id: Option<String>,
    pub budget_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessGrant {
    pub budget_id: i64,
    pub recipient_id: i64,
    pub expires_at: i64,
}

pub(crate) async fn dispatch_handler<S, R, T>(
    State(service): State<Arc<AlertDispatchService<S, R, T>>>,
    Json(request): Json<DispatchRequest>,
) -> Response
where
    S: DispatchStore + 'static,
    R: MessageRenderer + 'static,
    T: AlertSender + ?Sized + 'static,
{
    let report = service.run(request.snapshots, Utc::now()).await;
    (StatusCode::OK, Json(report.summary())).into_response()
}

pub(crate) async fn evaluate_handler(Json(request): Json<EvaluateRequest>) -> Response {
    let status = evaluate(request.limit, request.consumption, &request.thresholds);
    (StatusCode::OK, Json(status)).into_response()
}

pub(crate) async fn access_link_handler<S, R, T>(
    State(service): State<Arc<AlertDispatchService<S, R, T>>>,
    Query(query): Query<AccessLinkQuery>,
) -> Response
where
    S: DispatchStore + 'static,
    R: MessageRenderer + 'static,
    T: AlertSender + ?Sized + 'static,
{
    let Some(token) = query.budget_token.as_deref() else {
        return access_denied(TokenRejection::Malformed);
    };

    match service.codec().verify(token, Utc::now()) {
        TokenVerification::Valid(claims) => {
            let requested = query
                .budget_id
                .as_deref()
                .map(|raw| raw.trim().parse::<i64>().ok());
            if matches!(requested, Some(id) if id != Some(claims.budget_id.0)) {
                return access_denied(TokenRejection::Malformed);
            }

            let grant = AccessGrant {
                budget_id: claims.budget_id.0,
                recipient_id: claims.recipient_id.0,
                expires_at: claims.exp,
            };
            (StatusCode::OK, Json(grant)).into_response()
        }
        TokenVerification::Rejected(reason) => access_denied(reason),
    }
}

fn access_denied(reason: TokenRejection) -> Response {
    debug!(reason = reason.as_str(), "budget access link rejected");
    let payload = json!({ "error": ACCESS_DENIED_MESSAGE });
    (StatusCode::FORBIDDEN, Json(payload)).into_response()
}
