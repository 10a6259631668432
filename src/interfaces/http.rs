// =============================================================================
// HTTP surface — Axum 0.7
// =============================================================================
//
// Routes:
//   POST /tradingview-to-webhook-order          legacy v1 webhook
//   POST /v2[/<token>]/tradingview-to-webhook-order   v2 webhook
//   POST /worker/kick                           X-Worker-Token authenticated
//   GET  /health                                liveness + env diagnostics
//   GET  /run-worker?key=<secret>               operator-triggered drain
//
// Accepted-but-ignored outcomes (duplicate, policy paused) are 2xx by
// design: the sender did nothing wrong and must not retry.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::application::ingress::{IngressHandler, IngressOutcome};
use crate::application::worker::Worker;
use crate::config::{Config, DEFAULT_ALIAS};
use crate::domain::errors::IngressError;
use crate::domain::ports::{BrokerClient, BrokerProvider};
use crate::domain::repositories::QueueStore;

const BROKER_PING_TIMEOUT: Duration = Duration::from_secs(2);

const HEALTH_ENV_VARS: [&str; 7] = [
    "WEBHOOK_PASSPHRASE_V2",
    "WORKER_URL",
    "WORKER_SECRET",
    "ALPACA_KEY_ID",
    "ALPACA_SECRET_KEY",
    "ALPACA_BASE_URL",
    "DATABASE_URL",
];

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn QueueStore>,
    pub ingress: Arc<IngressHandler>,
    pub worker: Arc<Worker>,
    pub brokers: Arc<dyn BrokerProvider>,
}

/// Build the full router. The v2 path gains a token segment when
/// `WEBHOOK_PATH_TOKEN` is configured.
pub fn router(state: AppState) -> Router {
    let v2_path = match &state.config.webhook.path_token {
        Some(token) => format!("/v2/{}/tradingview-to-webhook-order", token),
        None => "/v2/tradingview-to-webhook-order".to_string(),
    };

    Router::new()
        .route("/", get(root))
        .route("/tradingview-to-webhook-order", post(webhook_v1))
        .route(&v2_path, post(webhook_v2))
        .route("/worker/kick", post(worker_kick))
        .route("/health", get(health))
        .route("/run-worker", get(run_worker))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn root() -> Html<&'static str> {
    Html("<p>Hello young trader!</p>")
}

async fn webhook_v1(State(state): State<AppState>, body: Bytes) -> Response {
    ingress_response(state.ingress.handle_v1(&body).await)
}

async fn webhook_v2(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let header_token = headers
        .get("X-Auth")
        .or_else(|| headers.get("X-Webhook-Token"))
        .and_then(|v| v.to_str().ok());

    ingress_response(state.ingress.handle_v2(&body, header_token).await)
}

fn ingress_response(result: Result<IngressOutcome, IngressError>) -> Response {
    match result {
        Ok(IngressOutcome::Queued { id }) => {
            (StatusCode::OK, Json(json!({ "status": "queued", "id": id }))).into_response()
        }
        Ok(IngressOutcome::DupIgnored { dedup_key }) => (
            StatusCode::OK,
            Json(json!({ "status": "dup_ignored", "dedup_key": dedup_key })),
        )
            .into_response(),
        Ok(IngressOutcome::TradingDisabled) => (
            StatusCode::OK,
            Json(json!({ "status": "trading_disabled" })),
        )
            .into_response(),
        Ok(IngressOutcome::StrategyPaused) => {
            (StatusCode::OK, Json(json!({ "status": "strategy_paused" }))).into_response()
        }
        Err(err) => {
            let code = match &err {
                IngressError::InvalidJson
                | IngressError::MissingField(_)
                | IngressError::InvalidSchema(_) => StatusCode::BAD_REQUEST,
                IngressError::BadPassphrase | IngressError::BadHeaderToken => {
                    StatusCode::UNAUTHORIZED
                }
                IngressError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            };
            if code == StatusCode::INTERNAL_SERVER_ERROR {
                warn!(error = %err, "webhook failed on store error");
            }
            (code, Json(json!({ "error": err.to_string() }))).into_response()
        }
    }
}

async fn worker_kick(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let provided = headers
        .get("X-Worker-Token")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let authorized = state
        .config
        .worker
        .secret
        .as_deref()
        .is_some_and(|secret| secret == provided);
    if !authorized {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "success": false, "message": "unauthorized" })),
        )
            .into_response();
    }

    let id = serde_json::from_slice::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("id").and_then(|id| id.as_str().map(str::to_string)))
        .and_then(|s| Uuid::parse_str(&s).ok());
    let Some(id) = id else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "success": false, "message": "missing id" })),
        )
            .into_response();
    };

    match state.worker.process_one(id).await {
        Ok(outcome) => {
            let code = if outcome.is_success() {
                StatusCode::OK
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            };
            (
                code,
                Json(json!({ "success": outcome.is_success(), "message": outcome.message() })),
            )
                .into_response()
        }
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "success": false, "message": err.to_string() })),
        )
            .into_response(),
    }
}

async fn health(State(state): State<AppState>) -> Response {
    let (db_ok, queue_ready_cnt) = match state.store.queue_ready_count().await {
        Ok(count) => (true, count),
        Err(_) => (false, 0),
    };

    let broker_ping = match state.brokers.broker_for(DEFAULT_ALIAS).await {
        Ok(broker) => {
            match tokio::time::timeout(BROKER_PING_TIMEOUT, broker.get_account()).await {
                Ok(Ok(_)) => Some(200u16),
                _ => None,
            }
        }
        Err(_) => None,
    };

    let env_missing_hint: Vec<&str> = HEALTH_ENV_VARS
        .iter()
        .copied()
        .filter(|var| std::env::var(var).map_or(true, |v| v.trim().is_empty()))
        .collect();

    Json(json!({
        "ts": chrono::Utc::now().to_rfc3339(),
        "db_ok": db_ok,
        "queue_ready_cnt": queue_ready_cnt,
        "broker_ping": broker_ping,
        "worker_url_set": state.config.worker.url.is_some(),
        "env_missing_hint": env_missing_hint,
    }))
    .into_response()
}

async fn run_worker(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let authorized = state
        .config
        .worker
        .secret
        .as_deref()
        .is_some_and(|secret| params.get("key").map(String::as_str) == Some(secret));
    if !authorized {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({ "success": false, "message": "Unauthorized" })),
        )
            .into_response();
    }

    match state.worker.run_all().await {
        Ok(processed) => {
            if state.config.enable_daily_report {
                // Report formatting and shipping live outside this service.
                info!("daily report hook fired");
            }
            Json(json!({
                "success": true,
                "message": "Worker run complete",
                "processed": processed,
            }))
            .into_response()
        }
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "success": false, "message": err.to_string() })),
        )
            .into_response(),
    }
}
