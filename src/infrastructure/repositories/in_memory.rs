//! In-memory queue store.
//!
//! Thread-safe via `RwLock`; implements the same conditional-claim and
//! dedup-uniqueness semantics as the SQLite store. Suitable for tests and
//! single-instance development runs; data does not survive a restart.

use crate::domain::repositories::{QueueStore, SignalInsert};
use crate::domain::types::{
    AccountState, AccountStateUpdate, DailyMetrics, JobStatus, QueueJob, Signal, StrategyConfig,
};
use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
pub struct InMemoryQueueStore {
    signals: RwLock<Vec<Signal>>,
    jobs: RwLock<HashMap<Uuid, QueueJob>>,
    dlq: RwLock<Vec<QueueJob>>,
    account_state: RwLock<Option<AccountState>>,
    daily_metrics: RwLock<HashMap<(NaiveDate, String), DailyMetrics>>,
    strategies: RwLock<HashMap<String, StrategyConfig>>,
}

impl InMemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_account_state(&self, state: AccountState) {
        *self.account_state.write().await = Some(state);
    }

    pub async fn put_strategy(&self, strategy: StrategyConfig) {
        self.strategies
            .write()
            .await
            .insert(strategy.name.clone(), strategy);
    }

    pub async fn signals(&self) -> Vec<Signal> {
        self.signals.read().await.clone()
    }

    pub async fn jobs(&self) -> Vec<QueueJob> {
        self.jobs.read().await.values().cloned().collect()
    }

    pub async fn dead_letters(&self) -> Vec<QueueJob> {
        self.dlq.read().await.clone()
    }
}

#[async_trait]
impl QueueStore for InMemoryQueueStore {
    async fn signal_exists(&self, dedup_key: &str) -> Result<bool> {
        Ok(self
            .signals
            .read()
            .await
            .iter()
            .any(|s| s.dedup_key == dedup_key))
    }

    async fn signal_insert_unique(&self, signal: &Signal) -> Result<SignalInsert> {
        let mut signals = self.signals.write().await;
        if signals.iter().any(|s| s.dedup_key == signal.dedup_key) {
            return Ok(SignalInsert::Duplicate);
        }
        signals.push(signal.clone());
        Ok(SignalInsert::Inserted)
    }

    async fn job_insert_ready(&self, job: &QueueJob) -> Result<Uuid> {
        let mut stored = job.clone();
        stored.status = JobStatus::Ready;
        self.jobs.write().await.insert(stored.id, stored);
        Ok(job.id)
    }

    async fn job_claim(&self, id: Uuid) -> Result<Option<QueueJob>> {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(&id) {
            Some(job) if job.status == JobStatus::Ready => {
                job.status = JobStatus::Processing;
                job.updated_at = Utc::now();
                Ok(Some(job.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn job_complete(
        &self,
        id: Uuid,
        status: JobStatus,
        reason: Option<&str>,
    ) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        let Some(job) = jobs.get_mut(&id) else {
            bail!("job {} not found", id);
        };
        job.status = status;
        job.reason = reason.map(str::to_string);
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn job_defer(&self, id: Uuid, next_attempt_at: DateTime<Utc>) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        let Some(job) = jobs.get_mut(&id) else {
            bail!("job {} not found", id);
        };
        job.status = JobStatus::Ready;
        job.next_attempt_at = Some(next_attempt_at);
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn job_retry(
        &self,
        id: Uuid,
        retry_count: u32,
        last_error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        let Some(job) = jobs.get_mut(&id) else {
            bail!("job {} not found", id);
        };
        job.status = JobStatus::Ready;
        job.retry_count = retry_count;
        job.last_error = Some(last_error.to_string());
        job.next_attempt_at = Some(next_attempt_at);
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn job_dead_letter(&self, job: &QueueJob, last_error: &str) -> Result<()> {
        let mut copy = job.clone();
        copy.status = JobStatus::Failed;
        copy.last_error = Some(last_error.to_string());
        copy.updated_at = Utc::now();
        self.dlq.write().await.push(copy);
        Ok(())
    }

    async fn job_load(&self, id: Uuid) -> Result<Option<QueueJob>> {
        Ok(self.jobs.read().await.get(&id).cloned())
    }

    async fn job_list_ready(&self, limit: u32) -> Result<Vec<QueueJob>> {
        let jobs = self.jobs.read().await;
        let mut ready: Vec<QueueJob> = jobs
            .values()
            .filter(|j| j.status == JobStatus::Ready)
            .cloned()
            .collect();
        ready.sort_by_key(|j| j.created_at);
        ready.truncate(limit as usize);
        Ok(ready)
    }

    async fn queue_ready_count(&self) -> Result<u64> {
        Ok(self
            .jobs
            .read()
            .await
            .values()
            .filter(|j| j.status == JobStatus::Ready)
            .count() as u64)
    }

    async fn account_state_load(&self) -> Result<Option<AccountState>> {
        Ok(self.account_state.read().await.clone())
    }

    async fn account_state_update(&self, update: &AccountStateUpdate) -> Result<()> {
        let mut guard = self.account_state.write().await;
        // No singleton row configured: nothing to update, as in SQLite.
        let Some(state) = guard.as_mut() else {
            return Ok(());
        };
        if let Some(enabled) = update.trading_enabled {
            state.trading_enabled = enabled;
        }
        if let Some(triggered) = update.daily_dd_triggered {
            state.daily_dd_triggered = triggered;
        }
        if let Some(hwm) = update.daily_high_watermark {
            state.daily_high_watermark = Some(hwm);
        }
        if let Some(reason) = &update.pause_reason {
            state.pause_reason = Some(reason.clone());
        }
        Ok(())
    }

    async fn daily_metrics_get_or_create(
        &self,
        day: NaiveDate,
        alias: &str,
    ) -> Result<DailyMetrics> {
        let mut metrics = self.daily_metrics.write().await;
        let row = metrics
            .entry((day, alias.to_string()))
            .or_insert_with(|| DailyMetrics {
                day,
                alias: alias.to_string(),
                equity_at_open: None,
                high_watermark: None,
            });
        Ok(row.clone())
    }

    async fn daily_metrics_set_equity(
        &self,
        day: NaiveDate,
        alias: &str,
        equity: Decimal,
    ) -> Result<()> {
        let mut metrics = self.daily_metrics.write().await;
        if let Some(row) = metrics.get_mut(&(day, alias.to_string())) {
            row.equity_at_open = Some(equity);
        }
        Ok(())
    }

    async fn strategy_load(&self, name: &str) -> Result<Option<StrategyConfig>> {
        Ok(self.strategies.read().await.get(name).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::Action;
    use serde_json::json;

    fn job() -> QueueJob {
        let now = Utc::now();
        QueueJob {
            id: Uuid::new_v4(),
            status: JobStatus::Ready,
            reason: None,
            strategy: "momo".into(),
            ticker: "AAPL".into(),
            timeframe: "5".into(),
            action: Action::Buy,
            price: None,
            atr: None,
            risk_pct: None,
            trail_atr_mult: None,
            r_multiple_tp: None,
            max_slots: None,
            buffer_ratio: None,
            subaccount: "default".into(),
            bar_time: now,
            raw: json!({}),
            retry_count: 0,
            next_attempt_at: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_claim_succeeds_exactly_once() {
        let store = InMemoryQueueStore::new();
        let j = job();
        store.job_insert_ready(&j).await.unwrap();

        let first = store.job_claim(j.id).await.unwrap();
        let second = store.job_claim(j.id).await.unwrap();

        assert!(first.is_some());
        assert!(second.is_none());
        assert_eq!(
            store.job_load(j.id).await.unwrap().unwrap().status,
            JobStatus::Processing
        );
    }

    #[tokio::test]
    async fn test_defer_releases_back_to_ready() {
        let store = InMemoryQueueStore::new();
        let j = job();
        store.job_insert_ready(&j).await.unwrap();
        store.job_claim(j.id).await.unwrap();

        let naa = Utc::now() + chrono::Duration::seconds(30);
        store.job_defer(j.id, naa).await.unwrap();

        let reloaded = store.job_load(j.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, JobStatus::Ready);
        assert_eq!(reloaded.next_attempt_at, Some(naa));
        // Claimable again after the release.
        assert!(store.job_claim(j.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_ready_listing_respects_limit_and_order() {
        let store = InMemoryQueueStore::new();
        let mut first = job();
        first.created_at = Utc::now() - chrono::Duration::seconds(10);
        let second = job();
        store.job_insert_ready(&second).await.unwrap();
        store.job_insert_ready(&first).await.unwrap();

        let listed = store.job_list_ready(1).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, first.id);
        assert_eq!(store.queue_ready_count().await.unwrap(), 2);
    }
}
