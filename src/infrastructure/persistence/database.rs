use anyhow::{Context, Result};

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tokio::fs;
use tracing::info;

/// Singleton database wrapper
#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn new(db_url: &str) -> Result<Self> {
        // Ensure the directory exists if it's a file path
        if let Some(path_part) = db_url.strip_prefix("sqlite://") {
            let path = Path::new(path_part);
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    fs::create_dir_all(parent)
                        .await
                        .context("Failed to create database directory")?;
                }
            }
        }

        let options = SqliteConnectOptions::from_str(db_url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal); // Better for concurrency

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("Failed to connect to SQLite database")?;

        info!("Connected to database: {}", db_url);

        let db = Self { pool };
        db.init().await?;

        Ok(db)
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS signals_raw (
                id TEXT PRIMARY KEY,
                strategy TEXT NOT NULL,
                ticker TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                action TEXT NOT NULL,
                price TEXT,
                atr TEXT,
                risk_pct TEXT,
                trail_atr_mult TEXT,
                bar_time TEXT NOT NULL,
                dedup_key TEXT NOT NULL UNIQUE,
                source TEXT NOT NULL,
                raw TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create signals_raw table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS order_queue (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                reason TEXT,
                strategy TEXT NOT NULL,
                ticker TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                action TEXT NOT NULL,
                price TEXT,
                atr TEXT,
                risk_pct TEXT,
                trail_atr_mult TEXT,
                r_multiple_tp TEXT,
                max_slots INTEGER,
                buffer_ratio TEXT,
                bar_time TEXT NOT NULL,
                subaccount TEXT NOT NULL DEFAULT 'default',
                raw TEXT NOT NULL,
                retry_count INTEGER NOT NULL DEFAULT 0,
                next_attempt_at TEXT,
                last_error TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create order_queue table")?;

        // Index for the worker's ready-poll
        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_order_queue_status
            ON order_queue (status, next_attempt_at);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create order_queue index")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS order_queue_dlq (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                reason TEXT,
                strategy TEXT NOT NULL,
                ticker TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                action TEXT NOT NULL,
                price TEXT,
                atr TEXT,
                risk_pct TEXT,
                trail_atr_mult TEXT,
                r_multiple_tp TEXT,
                max_slots INTEGER,
                buffer_ratio TEXT,
                bar_time TEXT NOT NULL,
                subaccount TEXT NOT NULL DEFAULT 'default',
                raw TEXT NOT NULL,
                retry_count INTEGER NOT NULL DEFAULT 0,
                next_attempt_at TEXT,
                last_error TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create order_queue_dlq table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS account_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                trading_enabled INTEGER NOT NULL DEFAULT 1,
                daily_dd_limit_pct TEXT,
                daily_dd_triggered INTEGER NOT NULL DEFAULT 0,
                daily_high_watermark TEXT,
                daily_loss_cap_usd TEXT,
                reset_time_utc TEXT NOT NULL DEFAULT '13:30:00',
                pause_reason TEXT,
                max_positions_total INTEGER
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create account_state table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS daily_metrics (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                d TEXT NOT NULL,
                alias TEXT NOT NULL,
                equity TEXT,
                high_watermark TEXT,
                UNIQUE (d, alias)
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create daily_metrics table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS strategies (
                name TEXT PRIMARY KEY,
                status TEXT NOT NULL DEFAULT 'paused',
                default_risk_pct TEXT NOT NULL DEFAULT '0.005',
                trail_atr_mult TEXT NOT NULL DEFAULT '2.5',
                r_multiple_tp TEXT NOT NULL DEFAULT '2.0',
                max_positions INTEGER NOT NULL DEFAULT 5,
                allow_short INTEGER NOT NULL DEFAULT 0,
                time_in_force TEXT NOT NULL DEFAULT 'day'
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create strategies table")?;

        info!("Database schema initialized.");
        Ok(())
    }
}
