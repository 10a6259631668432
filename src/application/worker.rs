//! Queue worker: claims ready jobs and drives them to a terminal state.
//!
//! Two driving modes share `process_one`: a polling loop (progress guarantee)
//! and the synchronous kick endpoint (latency). Exactly-once claiming is
//! the store's conditional update; exactly-once execution is the
//! deterministic client_order_id plus the broker's duplicate rejection.

use crate::application::order_builder::{self, OrderSpec};
use crate::application::risk_guard::{RiskGate, RiskGuard};
use crate::application::sizer::{self, SizeOutcome};
use crate::config::TradingMode;
use crate::domain::clock::{self, Clock};
use crate::domain::errors::{BrokerError, ExecError};
use crate::domain::normalize;
use crate::domain::ports::{BrokerClient, BrokerProvider};
use crate::domain::repositories::QueueStore;
use crate::domain::types::{Action, JobStatus, OrderType, QueueJob};
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Transient failures are retried this many times before the job is copied
/// to the dead-letter table.
const MAX_RETRIES: u32 = 3;
const RETRY_BACKOFF_SECS: i64 = 30;

/// Terminal report of one `process_one` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    Done { reason: Option<String> },
    AlreadyTaken,
    Deferred,
    Failed { reason: String },
    Retried { retry_count: u32 },
    DeadLettered { reason: String },
}

impl ProcessOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ProcessOutcome::Done { .. })
    }

    pub fn message(&self) -> String {
        match self {
            ProcessOutcome::Done { reason: Some(r) } => format!("done ({})", r),
            ProcessOutcome::Done { reason: None } => "done".to_string(),
            ProcessOutcome::AlreadyTaken => "already_taken".to_string(),
            ProcessOutcome::Deferred => "deferred".to_string(),
            ProcessOutcome::Failed { reason } => reason.clone(),
            ProcessOutcome::Retried { retry_count } => format!("retry scheduled (rc={})", retry_count),
            ProcessOutcome::DeadLettered { reason } => format!("dead lettered: {}", reason),
        }
    }
}

pub struct Worker {
    store: Arc<dyn QueueStore>,
    brokers: Arc<dyn BrokerProvider>,
    risk_guard: Arc<RiskGuard>,
    clock: Arc<dyn Clock>,
    trading_mode: TradingMode,
    poll_interval: Duration,
    batch_limit: u32,
}

impl Worker {
    pub fn new(
        store: Arc<dyn QueueStore>,
        brokers: Arc<dyn BrokerProvider>,
        risk_guard: Arc<RiskGuard>,
        clock: Arc<dyn Clock>,
        trading_mode: TradingMode,
        poll_interval: Duration,
        batch_limit: u32,
    ) -> Self {
        Self {
            store,
            brokers,
            risk_guard,
            clock,
            trading_mode,
            poll_interval,
            batch_limit,
        }
    }

    /// Polling loop; runs until the task is dropped at shutdown.
    pub async fn run(self: Arc<Self>) {
        info!(interval = ?self.poll_interval, "worker polling started");
        loop {
            if let Err(err) = self.poll_once(self.batch_limit).await {
                error!(error = %err, "worker poll pass failed");
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// One operator-triggered drain of the ready queue. Returns the number
    /// of jobs processed.
    pub async fn run_all(&self) -> Result<u32> {
        self.poll_once(1000).await
    }

    async fn poll_once(&self, limit: u32) -> Result<u32> {
        let now = self.clock.now_utc();
        let jobs = self.store.job_list_ready(limit).await?;

        let mut processed = 0;
        for job in jobs {
            if job.next_attempt_at.is_some_and(|naa| naa > now) {
                continue;
            }
            match self.process_one(job.id).await {
                Ok(outcome) => {
                    processed += 1;
                    info!(id = %job.id, outcome = %outcome.message(), "job processed");
                }
                Err(err) => error!(id = %job.id, error = %err, "job processing error"),
            }
        }
        Ok(processed)
    }

    /// Claim and execute a single job. Errors here are store failures while
    /// bookkeeping; execution failures are folded into the outcome.
    pub async fn process_one(&self, id: Uuid) -> Result<ProcessOutcome> {
        let Some(job) = self.store.job_claim(id).await? else {
            return Ok(ProcessOutcome::AlreadyTaken);
        };

        let now = self.clock.now_utc();
        if let Some(naa) = job.next_attempt_at {
            if naa > now {
                self.store.job_defer(id, naa).await?;
                return Ok(ProcessOutcome::Deferred);
            }
        }

        match self.execute(&job, now).await {
            Ok(reason) => {
                self.store
                    .job_complete(id, JobStatus::Done, reason.as_deref())
                    .await?;
                Ok(ProcessOutcome::Done { reason })
            }
            Err(err) if err.is_fatal() => {
                let reason = err.to_string();
                warn!(id = %id, %reason, "job failed, no retry");
                self.store
                    .job_complete(id, JobStatus::Failed, Some(&reason))
                    .await?;
                Ok(ProcessOutcome::Failed { reason })
            }
            Err(err) => {
                let message = err.to_string();
                let retry_count = job.retry_count + 1;
                if retry_count <= MAX_RETRIES {
                    let next_attempt = now + chrono::Duration::seconds(RETRY_BACKOFF_SECS);
                    warn!(id = %id, retry_count, %message, "transient failure, retry scheduled");
                    self.store
                        .job_retry(id, retry_count, &message, next_attempt)
                        .await?;
                    Ok(ProcessOutcome::Retried { retry_count })
                } else {
                    error!(id = %id, %message, "retry budget exhausted, dead lettering");
                    self.store.job_dead_letter(&job, &message).await?;
                    self.store
                        .job_complete(id, JobStatus::Failed, Some(&message))
                        .await?;
                    Ok(ProcessOutcome::DeadLettered { reason: message })
                }
            }
        }
    }

    /// The ordered execution pipeline for one claimed job. `Ok` carries an
    /// optional success reason (e.g. a skip that counts as handled).
    async fn execute(&self, job: &QueueJob, now: DateTime<Utc>) -> Result<Option<String>, ExecError> {
        let broker = self
            .brokers
            .broker_for(&job.subaccount)
            .await
            .map_err(|e| ExecError::Transient(format!("broker init: {}", e)))?;

        if !self.trading_mode.matches_base_url(broker.base_url()) {
            return Err(ExecError::ModeMismatch(format!(
                "{} expected for {}",
                self.trading_mode.as_str(),
                broker.base_url()
            )));
        }

        let crypto = normalize::is_crypto_symbol(&job.ticker);
        if !crypto && !clock::is_market_open(now) && job.after_hours_mode().is_none() {
            return Err(ExecError::MarketClosed);
        }

        let gate = match job.action {
            Action::Buy => RiskGate::Entry,
            Action::Sell => RiskGate::Exit,
        };
        self.risk_guard
            .check(&job.subaccount, broker.as_ref(), gate)
            .await?;

        let (qty, take_profit, stop_loss) = match sizer::size(job, broker.as_ref()).await? {
            SizeOutcome::Skipped { reason } => {
                info!(id = %job.id, reason, "sizing skipped, treated as handled");
                return Ok(Some(reason.to_string()));
            }
            SizeOutcome::Sized {
                qty,
                take_profit,
                stop_loss,
            } => (qty, take_profit, stop_loss),
        };

        let strategy_row = self
            .store
            .strategy_load(&job.strategy)
            .await
            .map_err(|e| ExecError::Transient(format!("store: {}", e)))?;

        let symbol = normalize::normalize_trade_symbol(&job.ticker);
        let request = order_builder::build(OrderSpec {
            symbol: symbol.clone(),
            side: job.action,
            qty,
            order_type: job.order_type_override().unwrap_or(OrderType::Market),
            tif: job
                .tif_override()
                .or(strategy_row.map(|s| s.time_in_force)),
            limit_price: job.limit_price(),
            stop_price: job.stop_price(),
            take_profit,
            stop_loss,
            after_hours: job.after_hours_mode(),
            crypto,
            client_order_id: Some(order_builder::client_order_id(job.id)),
        });

        // Clear resting SELL legs (stale bracket TP/SL) before an exit so
        // the broker does not reject the flatten for over-selling.
        if job.action == Action::Sell {
            match broker.list_open_orders(&symbol, Some(Action::Sell)).await {
                Ok(stale) => {
                    for order in stale {
                        if let Err(err) = broker.cancel_order(&order.id).await {
                            warn!(order_id = %order.id, error = %err, "stale order cancel failed");
                        }
                    }
                }
                Err(err) => warn!(error = %err, "listing stale orders failed"),
            }
        }

        match broker.submit_order(&request).await {
            Ok(ack) => {
                info!(
                    id = %job.id,
                    broker_order = %ack.id,
                    %symbol,
                    side = %job.action,
                    qty = %request.qty,
                    bracket = request.is_bracket(),
                    "order submitted"
                );
                Ok(None)
            }
            Err(BrokerError::AlreadyExists) => {
                info!(id = %job.id, "duplicate client_order_id, treating replay as success");
                Ok(Some("already_exists".to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }
}
