//! SQLite-backed queue store.
//!
//! Scalars follow the schema conventions of the rest of the persistence
//! layer: decimals and JSON as TEXT, instants as RFC3339 TEXT, booleans as
//! INTEGER. The claim is a conditional UPDATE matching `status='ready'`;
//! the row count decides who won.

use crate::domain::repositories::{QueueStore, SignalInsert};
use crate::domain::types::{
    AccountState, AccountStateUpdate, Action, DailyMetrics, JobStatus, QueueJob, Signal,
    StrategyConfig, StrategyStatus, TimeInForce,
};
use crate::infrastructure::persistence::database::Database;
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use std::str::FromStr;
use uuid::Uuid;

pub struct SqliteQueueStore {
    database: Database,
}

impl SqliteQueueStore {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

#[async_trait]
impl QueueStore for SqliteQueueStore {
    async fn signal_exists(&self, dedup_key: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM signals_raw WHERE dedup_key = $1 LIMIT 1")
            .bind(dedup_key)
            .fetch_optional(&self.database.pool)
            .await
            .context("Failed to probe dedup key")?;
        Ok(row.is_some())
    }

    async fn signal_insert_unique(&self, signal: &Signal) -> Result<SignalInsert> {
        let result = sqlx::query(
            r#"
            INSERT INTO signals_raw (
                id, strategy, ticker, timeframe, action, price, atr,
                risk_pct, trail_atr_mult, bar_time, dedup_key, source, raw, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&signal.strategy)
        .bind(&signal.ticker)
        .bind(&signal.timeframe)
        .bind(signal.action.as_str())
        .bind(signal.price.map(|d| d.to_string()))
        .bind(signal.atr.map(|d| d.to_string()))
        .bind(signal.risk_pct.map(|d| d.to_string()))
        .bind(signal.trail_atr_mult.map(|d| d.to_string()))
        .bind(signal.bar_time.to_rfc3339())
        .bind(&signal.dedup_key)
        .bind(&signal.source)
        .bind(signal.raw.to_string())
        .bind(signal.created_at.to_rfc3339())
        .execute(&self.database.pool)
        .await;

        match result {
            Ok(_) => Ok(SignalInsert::Inserted),
            Err(sqlx::Error::Database(db))
                if matches!(db.kind(), sqlx::error::ErrorKind::UniqueViolation) =>
            {
                Ok(SignalInsert::Duplicate)
            }
            Err(err) => Err(err).context("Failed to insert signal"),
        }
    }

    async fn job_insert_ready(&self, job: &QueueJob) -> Result<Uuid> {
        sqlx::query(
            r#"
            INSERT INTO order_queue (
                id, status, reason, strategy, ticker, timeframe, action,
                price, atr, risk_pct, trail_atr_mult, r_multiple_tp,
                max_slots, buffer_ratio, bar_time, subaccount, raw,
                retry_count, next_attempt_at, last_error, created_at, updated_at
            )
            VALUES ($1, 'ready', $2, $3, $4, $5, $6, $7, $8, $9, $10, $11,
                    $12, $13, $14, $15, $16, $17, $18, $19, $20, $21)
            "#,
        )
        .bind(job.id.to_string())
        .bind(&job.reason)
        .bind(&job.strategy)
        .bind(&job.ticker)
        .bind(&job.timeframe)
        .bind(job.action.as_str())
        .bind(job.price.map(|d| d.to_string()))
        .bind(job.atr.map(|d| d.to_string()))
        .bind(job.risk_pct.map(|d| d.to_string()))
        .bind(job.trail_atr_mult.map(|d| d.to_string()))
        .bind(job.r_multiple_tp.map(|d| d.to_string()))
        .bind(job.max_slots.map(|v| v as i64))
        .bind(job.buffer_ratio.map(|d| d.to_string()))
        .bind(job.bar_time.to_rfc3339())
        .bind(&job.subaccount)
        .bind(job.raw.to_string())
        .bind(job.retry_count as i64)
        .bind(job.next_attempt_at.map(|t| t.to_rfc3339()))
        .bind(&job.last_error)
        .bind(job.created_at.to_rfc3339())
        .bind(job.updated_at.to_rfc3339())
        .execute(&self.database.pool)
        .await
        .context("Failed to insert queue job")?;

        Ok(job.id)
    }

    async fn job_claim(&self, id: Uuid) -> Result<Option<QueueJob>> {
        let result = sqlx::query(
            r#"
            UPDATE order_queue
            SET status = 'processing', updated_at = $1
            WHERE id = $2 AND status = 'ready'
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(&self.database.pool)
        .await
        .context("Failed to claim job")?;

        if result.rows_affected() != 1 {
            return Ok(None);
        }
        self.job_load(id).await
    }

    async fn job_complete(
        &self,
        id: Uuid,
        status: JobStatus,
        reason: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE order_queue
            SET status = $1, reason = $2, updated_at = $3
            WHERE id = $4
            "#,
        )
        .bind(status.as_str())
        .bind(reason)
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(&self.database.pool)
        .await
        .context("Failed to complete job")?;
        Ok(())
    }

    async fn job_defer(&self, id: Uuid, next_attempt_at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE order_queue
            SET status = 'ready', next_attempt_at = $1, updated_at = $2
            WHERE id = $3
            "#,
        )
        .bind(next_attempt_at.to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(&self.database.pool)
        .await
        .context("Failed to defer job")?;
        Ok(())
    }

    async fn job_retry(
        &self,
        id: Uuid,
        retry_count: u32,
        last_error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE order_queue
            SET status = 'ready', retry_count = $1, last_error = $2,
                next_attempt_at = $3, updated_at = $4
            WHERE id = $5
            "#,
        )
        .bind(retry_count as i64)
        .bind(last_error)
        .bind(next_attempt_at.to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(&self.database.pool)
        .await
        .context("Failed to schedule retry")?;
        Ok(())
    }

    async fn job_dead_letter(&self, job: &QueueJob, last_error: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO order_queue_dlq (
                id, status, reason, strategy, ticker, timeframe, action,
                price, atr, risk_pct, trail_atr_mult, r_multiple_tp,
                max_slots, buffer_ratio, bar_time, subaccount, raw,
                retry_count, next_attempt_at, last_error, created_at, updated_at
            )
            VALUES ($1, 'failed', $2, $3, $4, $5, $6, $7, $8, $9, $10, $11,
                    $12, $13, $14, $15, $16, $17, $18, $19, $20, $21)
            "#,
        )
        .bind(job.id.to_string())
        .bind(&job.reason)
        .bind(&job.strategy)
        .bind(&job.ticker)
        .bind(&job.timeframe)
        .bind(job.action.as_str())
        .bind(job.price.map(|d| d.to_string()))
        .bind(job.atr.map(|d| d.to_string()))
        .bind(job.risk_pct.map(|d| d.to_string()))
        .bind(job.trail_atr_mult.map(|d| d.to_string()))
        .bind(job.r_multiple_tp.map(|d| d.to_string()))
        .bind(job.max_slots.map(|v| v as i64))
        .bind(job.buffer_ratio.map(|d| d.to_string()))
        .bind(job.bar_time.to_rfc3339())
        .bind(&job.subaccount)
        .bind(job.raw.to_string())
        .bind(job.retry_count as i64)
        .bind(job.next_attempt_at.map(|t| t.to_rfc3339()))
        .bind(last_error)
        .bind(job.created_at.to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.database.pool)
        .await
        .context("Failed to dead letter job")?;
        Ok(())
    }

    async fn job_load(&self, id: Uuid) -> Result<Option<QueueJob>> {
        let row = sqlx::query("SELECT * FROM order_queue WHERE id = $1")
            .bind(id.to_string())
            .fetch_optional(&self.database.pool)
            .await
            .context("Failed to load job")?;

        row.map(|r| job_from_row(&r)).transpose()
    }

    async fn job_list_ready(&self, limit: u32) -> Result<Vec<QueueJob>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM order_queue
            WHERE status = 'ready'
            ORDER BY created_at
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to list ready jobs")?;

        rows.iter().map(job_from_row).collect()
    }

    async fn queue_ready_count(&self) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM order_queue WHERE status = 'ready'")
            .fetch_one(&self.database.pool)
            .await
            .context("Failed to count ready jobs")?;
        let count: i64 = row.try_get("cnt")?;
        Ok(count as u64)
    }

    async fn account_state_load(&self) -> Result<Option<AccountState>> {
        let row = sqlx::query("SELECT * FROM account_state WHERE id = 1")
            .fetch_optional(&self.database.pool)
            .await
            .context("Failed to load account state")?;

        let Some(row) = row else {
            return Ok(None);
        };

        let reset_raw: String = row.try_get("reset_time_utc")?;
        Ok(Some(AccountState {
            trading_enabled: row.try_get::<i64, _>("trading_enabled")? != 0,
            daily_dd_limit_pct: opt_decimal(&row, "daily_dd_limit_pct")?,
            daily_dd_triggered: row.try_get::<i64, _>("daily_dd_triggered")? != 0,
            daily_high_watermark: opt_decimal(&row, "daily_high_watermark")?,
            daily_loss_cap_usd: opt_decimal(&row, "daily_loss_cap_usd")?,
            reset_time_utc: NaiveTime::parse_from_str(&reset_raw, "%H:%M:%S")
                .with_context(|| format!("bad reset_time_utc '{}'", reset_raw))?,
            pause_reason: row.try_get("pause_reason")?,
            max_positions_total: row
                .try_get::<Option<i64>, _>("max_positions_total")?
                .map(|v| v as u32),
        }))
    }

    async fn account_state_update(&self, update: &AccountStateUpdate) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE account_state
            SET trading_enabled = COALESCE($1, trading_enabled),
                daily_dd_triggered = COALESCE($2, daily_dd_triggered),
                daily_high_watermark = COALESCE($3, daily_high_watermark),
                pause_reason = COALESCE($4, pause_reason)
            WHERE id = 1
            "#,
        )
        .bind(update.trading_enabled.map(i64::from))
        .bind(update.daily_dd_triggered.map(i64::from))
        .bind(update.daily_high_watermark.map(|d| d.to_string()))
        .bind(&update.pause_reason)
        .execute(&self.database.pool)
        .await
        .context("Failed to update account state")?;
        Ok(())
    }

    async fn daily_metrics_get_or_create(
        &self,
        day: NaiveDate,
        alias: &str,
    ) -> Result<DailyMetrics> {
        let day_str = day.format("%Y-%m-%d").to_string();

        sqlx::query("INSERT OR IGNORE INTO daily_metrics (d, alias) VALUES ($1, $2)")
            .bind(&day_str)
            .bind(alias)
            .execute(&self.database.pool)
            .await
            .context("Failed to create daily metrics row")?;

        let row = sqlx::query("SELECT * FROM daily_metrics WHERE d = $1 AND alias = $2")
            .bind(&day_str)
            .bind(alias)
            .fetch_one(&self.database.pool)
            .await
            .context("Failed to load daily metrics row")?;

        Ok(DailyMetrics {
            day,
            alias: alias.to_string(),
            equity_at_open: opt_decimal(&row, "equity")?,
            high_watermark: opt_decimal(&row, "high_watermark")?,
        })
    }

    async fn daily_metrics_set_equity(
        &self,
        day: NaiveDate,
        alias: &str,
        equity: Decimal,
    ) -> Result<()> {
        sqlx::query("UPDATE daily_metrics SET equity = $1 WHERE d = $2 AND alias = $3")
            .bind(equity.to_string())
            .bind(day.format("%Y-%m-%d").to_string())
            .bind(alias)
            .execute(&self.database.pool)
            .await
            .context("Failed to set day-open equity")?;
        Ok(())
    }

    async fn strategy_load(&self, name: &str) -> Result<Option<StrategyConfig>> {
        let row = sqlx::query("SELECT * FROM strategies WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.database.pool)
            .await
            .context("Failed to load strategy")?;

        let Some(row) = row else {
            return Ok(None);
        };

        let status_raw: String = row.try_get("status")?;
        let tif_raw: String = row.try_get("time_in_force")?;
        Ok(Some(StrategyConfig {
            name: row.try_get("name")?,
            status: StrategyStatus::from_str(&status_raw).map_err(|e| anyhow!(e))?,
            default_risk_pct: req_decimal(&row, "default_risk_pct")?,
            trail_atr_mult: req_decimal(&row, "trail_atr_mult")?,
            r_multiple_tp: req_decimal(&row, "r_multiple_tp")?,
            max_positions: row.try_get::<i64, _>("max_positions")? as u32,
            allow_short: row.try_get::<i64, _>("allow_short")? != 0,
            time_in_force: TimeInForce::from_str(&tif_raw).map_err(|e| anyhow!(e))?,
        }))
    }
}

fn job_from_row(row: &SqliteRow) -> Result<QueueJob> {
    let id_raw: String = row.try_get("id")?;
    let status_raw: String = row.try_get("status")?;
    let action_raw: String = row.try_get("action")?;
    let raw_json: String = row.try_get("raw")?;

    Ok(QueueJob {
        id: Uuid::parse_str(&id_raw).with_context(|| format!("bad job id '{}'", id_raw))?,
        status: JobStatus::from_str(&status_raw).map_err(|e| anyhow!(e))?,
        reason: row.try_get("reason")?,
        strategy: row.try_get("strategy")?,
        ticker: row.try_get("ticker")?,
        timeframe: row.try_get("timeframe")?,
        action: Action::from_str(&action_raw).map_err(|e| anyhow!(e))?,
        price: opt_decimal(row, "price")?,
        atr: opt_decimal(row, "atr")?,
        risk_pct: opt_decimal(row, "risk_pct")?,
        trail_atr_mult: opt_decimal(row, "trail_atr_mult")?,
        r_multiple_tp: opt_decimal(row, "r_multiple_tp")?,
        max_slots: row.try_get::<Option<i64>, _>("max_slots")?.map(|v| v as u32),
        buffer_ratio: opt_decimal(row, "buffer_ratio")?,
        subaccount: row.try_get("subaccount")?,
        bar_time: req_datetime(row, "bar_time")?,
        raw: serde_json::from_str(&raw_json).context("bad raw payload json")?,
        retry_count: row.try_get::<i64, _>("retry_count")? as u32,
        next_attempt_at: opt_datetime(row, "next_attempt_at")?,
        last_error: row.try_get("last_error")?,
        created_at: req_datetime(row, "created_at")?,
        updated_at: req_datetime(row, "updated_at")?,
    })
}

fn opt_decimal(row: &SqliteRow, column: &str) -> Result<Option<Decimal>> {
    let raw: Option<String> = row.try_get(column)?;
    raw.map(|s| {
        Decimal::from_str(&s).with_context(|| format!("bad decimal in {}: '{}'", column, s))
    })
    .transpose()
}

fn req_decimal(row: &SqliteRow, column: &str) -> Result<Decimal> {
    let raw: String = row.try_get(column)?;
    Decimal::from_str(&raw).with_context(|| format!("bad decimal in {}: '{}'", column, raw))
}

fn req_datetime(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>> {
    let raw: String = row.try_get(column)?;
    parse_datetime(&raw).with_context(|| format!("bad timestamp in {}: '{}'", column, raw))
}

fn opt_datetime(row: &SqliteRow, column: &str) -> Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.try_get(column)?;
    raw.map(|s| parse_datetime(&s).with_context(|| format!("bad timestamp in {}: '{}'", column, s)))
        .transpose()
}

fn parse_datetime(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)?.with_timezone(&Utc))
}
