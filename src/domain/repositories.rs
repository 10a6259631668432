//! Repository abstraction over the durable queue and state tables.
//!
//! The store is assumed to serialize per-row updates (standard transactional
//! semantics); no multi-row transactions are required. Correctness of the
//! pipeline rests on two store-enforced properties:
//!
//! - `signals_raw.dedup_key` is unique (idempotent signal acceptance), and
//! - `job_claim` flips `ready -> processing` conditionally, so at most one
//!   worker ever owns a job.

use crate::domain::types::{
    AccountState, AccountStateUpdate, DailyMetrics, JobStatus, QueueJob, Signal, StrategyConfig,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

/// Result of a unique signal insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalInsert {
    Inserted,
    /// The dedup key was already present; the signal is discarded.
    Duplicate,
}

#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Cheap existence probe on the dedup key.
    async fn signal_exists(&self, dedup_key: &str) -> Result<bool>;

    /// Insert a raw signal; a uniqueness violation on the dedup key reports
    /// `Duplicate` rather than an error.
    async fn signal_insert_unique(&self, signal: &Signal) -> Result<SignalInsert>;

    /// Insert a job with `status=ready`, returning its id.
    async fn job_insert_ready(&self, job: &QueueJob) -> Result<Uuid>;

    /// Atomically claim a job (`ready -> processing`). Returns the claimed
    /// row, or `None` when the job was not claimable.
    async fn job_claim(&self, id: Uuid) -> Result<Option<QueueJob>>;

    /// Terminal transition to `done` or `failed`.
    async fn job_complete(&self, id: Uuid, status: JobStatus, reason: Option<&str>)
        -> Result<()>;

    /// Release a job back to `ready` for a later attempt.
    async fn job_defer(&self, id: Uuid, next_attempt_at: DateTime<Utc>) -> Result<()>;

    /// Record a failed attempt and schedule the next one.
    async fn job_retry(
        &self,
        id: Uuid,
        retry_count: u32,
        last_error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Copy a job into the dead-letter table. The caller then marks the
    /// original `failed`.
    async fn job_dead_letter(&self, job: &QueueJob, last_error: &str) -> Result<()>;

    async fn job_load(&self, id: Uuid) -> Result<Option<QueueJob>>;

    async fn job_list_ready(&self, limit: u32) -> Result<Vec<QueueJob>>;

    async fn queue_ready_count(&self) -> Result<u64>;

    /// `Ok(None)` when no account-state row has been configured.
    async fn account_state_load(&self) -> Result<Option<AccountState>>;

    async fn account_state_update(&self, update: &AccountStateUpdate) -> Result<()>;

    /// Fetch the metrics row for `(day, alias)`, inserting an empty one if
    /// absent.
    async fn daily_metrics_get_or_create(
        &self,
        day: NaiveDate,
        alias: &str,
    ) -> Result<DailyMetrics>;

    async fn daily_metrics_set_equity(
        &self,
        day: NaiveDate,
        alias: &str,
        equity: Decimal,
    ) -> Result<()>;

    /// `Ok(None)` when the strategy has no row; callers treat that as paused.
    async fn strategy_load(&self, name: &str) -> Result<Option<StrategyConfig>>;
}
