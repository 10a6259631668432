//! Webhook ingress: authenticate, normalize, deduplicate, persist, enqueue.
//!
//! The handler is transport-agnostic; the HTTP layer parses nothing and
//! maps the typed outcome/error to response codes. Everything up to the
//! signal insert is a pure validation pipeline with no partial state; the
//! signal row is the single source of record for receipt, so a 500 lets
//! the sender retry the whole webhook and the dedup key absorbs it.

use crate::config::WebhookConfig;
use crate::domain::clock::Clock;
use crate::domain::errors::IngressError;
use crate::domain::normalize;
use crate::domain::repositories::{QueueStore, SignalInsert};
use crate::domain::types::{
    Action, JobStatus, QueueJob, Signal, StrategyStatus, dedup_key,
};
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

const KICK_TIMEOUT: Duration = Duration::from_millis(1500);

const V2_REQUIRED_FIELDS: [&str; 5] = ["strategy", "ticker", "timeframe", "action", "bar_time"];

/// Accepted-webhook outcomes; all map to 200 responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngressOutcome {
    Queued { id: Uuid },
    DupIgnored { dedup_key: String },
    TradingDisabled,
    StrategyPaused,
}

pub struct IngressHandler {
    store: Arc<dyn QueueStore>,
    clock: Arc<dyn Clock>,
    webhook: WebhookConfig,
    kicker: Option<WorkerKicker>,
}

impl IngressHandler {
    pub fn new(
        store: Arc<dyn QueueStore>,
        clock: Arc<dyn Clock>,
        webhook: WebhookConfig,
        kicker: Option<WorkerKicker>,
    ) -> Self {
        Self {
            store,
            clock,
            webhook,
            kicker,
        }
    }

    /// v2 entry point. `header_token` carries X-Auth / X-Webhook-Token when
    /// present on the request.
    pub async fn handle_v2(
        &self,
        body: &[u8],
        header_token: Option<&str>,
    ) -> Result<IngressOutcome, IngressError> {
        let data: Value = serde_json::from_slice(body).map_err(|_| IngressError::InvalidJson)?;

        if data.get("passphrase").and_then(Value::as_str) != Some(self.webhook.passphrase_v2.as_str())
        {
            return Err(IngressError::BadPassphrase);
        }
        if let Some(expected) = &self.webhook.header_token_v2 {
            if header_token != Some(expected.as_str()) {
                return Err(IngressError::BadHeaderToken);
            }
        }

        for field in V2_REQUIRED_FIELDS {
            if data.get(field).is_none() {
                return Err(IngressError::MissingField(field));
            }
        }

        let strategy = required_string(&data, "strategy")?;
        let ticker = required_string(&data, "ticker")?;
        let timeframe = required_string(&data, "timeframe")?;
        let action = Action::from_str(&required_string(&data, "action")?)
            .map_err(IngressError::InvalidSchema)?;
        let (bar_time_ms, bar_time) =
            normalize::coerce_bar_time(&data["bar_time"]).map_err(IngressError::InvalidSchema)?;
        let subaccount = data
            .get("subaccount")
            .and_then(normalize::string_field)
            .unwrap_or_else(|| "default".to_string());

        let key = dedup_key(&strategy, &ticker, &timeframe, bar_time_ms, action);
        if self
            .store
            .signal_exists(&key)
            .await
            .map_err(IngressError::Store)?
        {
            debug!(dedup_key = %key, "duplicate signal ignored");
            return Ok(IngressOutcome::DupIgnored { dedup_key: key });
        }

        let now = self.clock.now_utc();
        let signal = Signal {
            strategy: strategy.clone(),
            ticker: ticker.clone(),
            timeframe: timeframe.clone(),
            action,
            price: data.get("price").and_then(normalize::decimal_field),
            atr: data.get("atr").and_then(normalize::decimal_field),
            risk_pct: data.get("risk_pct").and_then(normalize::decimal_field),
            trail_atr_mult: data.get("trail_atr_mult").and_then(normalize::decimal_field),
            bar_time,
            dedup_key: key.clone(),
            source: "tv-v2".to_string(),
            raw: data.clone(),
            created_at: now,
        };
        // The insert races with concurrent deliveries of the same alert;
        // the store's uniqueness constraint settles it.
        match self
            .store
            .signal_insert_unique(&signal)
            .await
            .map_err(IngressError::Store)?
        {
            SignalInsert::Duplicate => {
                return Ok(IngressOutcome::DupIgnored { dedup_key: key });
            }
            SignalInsert::Inserted => {}
        }

        if let Some(state) = self
            .store
            .account_state_load()
            .await
            .map_err(IngressError::Store)?
        {
            if !state.trading_enabled {
                info!(%strategy, %ticker, "signal accepted but trading is disabled");
                return Ok(IngressOutcome::TradingDisabled);
            }
        }

        let strategy_row = self
            .store
            .strategy_load(&strategy)
            .await
            .map_err(IngressError::Store)?;
        let Some(strategy_row) = strategy_row.filter(|s| s.status == StrategyStatus::Active) else {
            info!(%strategy, "strategy missing or paused, signal not enqueued");
            return Ok(IngressOutcome::StrategyPaused);
        };

        let job = QueueJob {
            id: Uuid::new_v4(),
            status: JobStatus::Ready,
            reason: None,
            strategy,
            ticker,
            timeframe,
            action,
            price: signal.price,
            atr: signal.atr,
            // Payload hints win over the strategy row's defaults.
            risk_pct: signal.risk_pct.or(Some(strategy_row.default_risk_pct)),
            trail_atr_mult: signal.trail_atr_mult.or(Some(strategy_row.trail_atr_mult)),
            r_multiple_tp: data
                .get("r_multiple_tp")
                .and_then(normalize::decimal_field)
                .or(Some(strategy_row.r_multiple_tp)),
            max_slots: data.get("max_slots").and_then(normalize::u32_field),
            buffer_ratio: data.get("buffer_ratio").and_then(normalize::decimal_field),
            subaccount,
            bar_time,
            raw: data,
            retry_count: 0,
            next_attempt_at: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        };

        let id = self
            .store
            .job_insert_ready(&job)
            .await
            .map_err(IngressError::Store)?;
        info!(%id, strategy = %job.strategy, ticker = %job.ticker, action = %job.action, "job enqueued");

        if let Some(kicker) = &self.kicker {
            kicker.kick(id);
        }

        Ok(IngressOutcome::Queued { id })
    }

    /// Legacy v1 entry point: `{passphrase, ticker, action, qty?,
    /// percentage?, strategy?, subaccount?}`. No bar-time identity, so no
    /// dedup; the job goes straight onto the durable queue.
    pub async fn handle_v1(&self, body: &[u8]) -> Result<IngressOutcome, IngressError> {
        let mut data: Value =
            serde_json::from_slice(body).map_err(|_| IngressError::InvalidJson)?;

        let Some(passphrase_v1) = &self.webhook.passphrase_v1 else {
            return Err(IngressError::BadPassphrase);
        };
        if data.get("passphrase").and_then(Value::as_str) != Some(passphrase_v1.as_str()) {
            return Err(IngressError::BadPassphrase);
        }

        for field in ["ticker", "action"] {
            if data.get(field).is_none() {
                return Err(IngressError::MissingField(field));
            }
        }

        let ticker = required_string(&data, "ticker")?;
        let action = Action::from_str(&required_string(&data, "action")?)
            .map_err(IngressError::InvalidSchema)?;
        let strategy = data
            .get("strategy")
            .and_then(normalize::string_field)
            .unwrap_or_else(|| "v1".to_string());
        let subaccount = data
            .get("subaccount")
            .and_then(normalize::string_field)
            .unwrap_or_else(|| "default".to_string());

        if let Some(obj) = data.as_object_mut() {
            obj.remove("passphrase");
            // Legacy SELL alerts always flatten the whole position.
            if action == Action::Sell {
                obj.remove("percentage");
            }
        }

        let now = self.clock.now_utc();
        let job = QueueJob {
            id: Uuid::new_v4(),
            status: JobStatus::Ready,
            reason: None,
            strategy,
            ticker,
            timeframe: String::new(),
            action,
            price: data.get("price").and_then(normalize::decimal_field),
            atr: None,
            risk_pct: None,
            trail_atr_mult: None,
            r_multiple_tp: None,
            max_slots: None,
            buffer_ratio: None,
            subaccount,
            bar_time: now,
            raw: data,
            retry_count: 0,
            next_attempt_at: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        };

        let id = self
            .store
            .job_insert_ready(&job)
            .await
            .map_err(IngressError::Store)?;
        info!(%id, ticker = %job.ticker, action = %job.action, "legacy job enqueued");

        if let Some(kicker) = &self.kicker {
            kicker.kick(id);
        }

        Ok(IngressOutcome::Queued { id })
    }
}

fn required_string(data: &Value, field: &'static str) -> Result<String, IngressError> {
    data.get(field)
        .and_then(normalize::string_field)
        .ok_or_else(|| IngressError::InvalidSchema(format!("{} must be a non-empty string", field)))
}

/// Best-effort notification to the worker that a job is ready. Strictly a
/// latency optimization: the polling loop guarantees progress when every
/// kick fails, so errors are logged and dropped.
pub struct WorkerKicker {
    client: reqwest::Client,
    url: String,
    secret: String,
}

impl WorkerKicker {
    pub fn new(worker_url: &str, secret: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(KICK_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            url: format!("{}/worker/kick", worker_url.trim_end_matches('/')),
            secret: secret.to_string(),
        }
    }

    /// Fire-and-forget; never blocks the ingress response.
    pub fn kick(&self, id: Uuid) {
        let client = self.client.clone();
        let url = self.url.clone();
        let secret = self.secret.clone();

        tokio::spawn(async move {
            let result = client
                .post(&url)
                .header("X-Worker-Token", secret)
                .json(&serde_json::json!({ "id": id }))
                .send()
                .await;

            match result {
                Ok(resp) => debug!(%id, status = %resp.status(), "worker kicked"),
                Err(err) => debug!(%id, error = %err, "worker kick failed"),
            }
        });
    }
}
