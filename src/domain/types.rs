//! Core data model: signals, queue jobs, account risk state, and the order
//! request handed to the broker client.
//!
//! Monetary values and quantities are `Decimal` throughout; instants are
//! `DateTime<Utc>`; day keys are `NaiveDate`.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::normalize;

/// Trade direction. BUY opens or adds, SELL exits an existing long.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    Buy,
    Sell,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Buy => "BUY",
            Action::Sell => "SELL",
        }
    }

    /// Lowercase wire form used by the broker API.
    pub fn as_side(&self) -> &'static str {
        match self {
            Action::Buy => "buy",
            Action::Sell => "sell",
        }
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "BUY" => Ok(Action::Buy),
            "SELL" => Ok(Action::Sell),
            other => Err(format!("action must be BUY or SELL, got '{}'", other)),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Queue job lifecycle. Transitions out of `Ready` happen only via the
/// store's conditional claim, so at most one worker owns a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Ready,
    Processing,
    Done,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Ready => "ready",
            JobStatus::Processing => "processing",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
        }
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ready" => Ok(JobStatus::Ready),
            "processing" => Ok(JobStatus::Processing),
            "done" => Ok(JobStatus::Done),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status '{}'", other)),
        }
    }
}

/// Time-in-force accepted by the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeInForce {
    Day,
    Gtc,
    Ioc,
    Fok,
    Opg,
    Cls,
}

impl TimeInForce {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeInForce::Day => "day",
            TimeInForce::Gtc => "gtc",
            TimeInForce::Ioc => "ioc",
            TimeInForce::Fok => "fok",
            TimeInForce::Opg => "opg",
            TimeInForce::Cls => "cls",
        }
    }
}

impl FromStr for TimeInForce {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "day" => Ok(TimeInForce::Day),
            "gtc" => Ok(TimeInForce::Gtc),
            "ioc" => Ok(TimeInForce::Ioc),
            "fok" => Ok(TimeInForce::Fok),
            "opg" => Ok(TimeInForce::Opg),
            "cls" => Ok(TimeInForce::Cls),
            other => Err(format!("unknown time in force '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderType {
    Market,
    Limit,
    Stop,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Market => "market",
            OrderType::Limit => "limit",
            OrderType::Stop => "stop",
        }
    }
}

/// Extended-hours handling requested by the signal payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfterHoursMode {
    Opg,
    OpgMarket,
}

impl FromStr for AfterHoursMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "opg" => Ok(AfterHoursMode::Opg),
            "opg_market" => Ok(AfterHoursMode::OpgMarket),
            other => Err(format!("unknown after_hours_mode '{}'", other)),
        }
    }
}

/// Canonical signal identity: `strategy|ticker|timeframe|bar_time_ms|action`.
/// Uniqueness of this string in the signal store is the dedup invariant.
pub fn dedup_key(
    strategy: &str,
    ticker: &str,
    timeframe: &str,
    bar_time_ms: i64,
    action: Action,
) -> String {
    format!(
        "{}|{}|{}|{}|{}",
        strategy,
        ticker,
        timeframe,
        bar_time_ms,
        action.as_str()
    )
}

/// A raw webhook signal, immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub strategy: String,
    pub ticker: String,
    pub timeframe: String,
    pub action: Action,
    pub price: Option<Decimal>,
    pub atr: Option<Decimal>,
    pub risk_pct: Option<Decimal>,
    pub trail_atr_mult: Option<Decimal>,
    pub bar_time: DateTime<Utc>,
    pub dedup_key: String,
    pub source: String,
    pub raw: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// A durable queue row carrying everything the worker needs to size and
/// submit one order. Sizing hints are merged from the payload and the
/// strategy row at enqueue time; less common overrides stay in `raw`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueJob {
    pub id: Uuid,
    pub status: JobStatus,
    pub reason: Option<String>,
    pub strategy: String,
    pub ticker: String,
    pub timeframe: String,
    pub action: Action,
    pub price: Option<Decimal>,
    pub atr: Option<Decimal>,
    pub risk_pct: Option<Decimal>,
    pub trail_atr_mult: Option<Decimal>,
    pub r_multiple_tp: Option<Decimal>,
    pub max_slots: Option<u32>,
    pub buffer_ratio: Option<Decimal>,
    pub subaccount: String,
    pub bar_time: DateTime<Utc>,
    pub raw: serde_json::Value,
    pub retry_count: u32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QueueJob {
    /// Explicit quantity override from the payload.
    pub fn qty_override(&self) -> Option<Decimal> {
        self.raw.get("qty").and_then(normalize::decimal_field)
    }

    /// Fraction of cash (BUY) or held quantity (SELL) from the payload.
    pub fn percentage_override(&self) -> Option<Decimal> {
        self.raw.get("percentage").and_then(normalize::decimal_field)
    }

    /// Forces a full flatten on SELL even when a percentage is present.
    pub fn flat_exit(&self) -> bool {
        self.raw
            .get("flat_exit")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }

    pub fn after_hours_mode(&self) -> Option<AfterHoursMode> {
        self.raw
            .get("after_hours_mode")
            .and_then(serde_json::Value::as_str)
            .and_then(|s| s.parse().ok())
    }

    /// Time-in-force requested by the payload, if any.
    pub fn tif_override(&self) -> Option<TimeInForce> {
        self.raw
            .get("time_in_force")
            .or_else(|| self.raw.get("tif"))
            .and_then(serde_json::Value::as_str)
            .and_then(|s| s.parse().ok())
    }

    /// Payload override for the order type (e.g. limit entries).
    pub fn order_type_override(&self) -> Option<OrderType> {
        match self
            .raw
            .get("order_type")
            .and_then(serde_json::Value::as_str)
        {
            Some("limit") => Some(OrderType::Limit),
            Some("stop") => Some(OrderType::Stop),
            Some("market") => Some(OrderType::Market),
            _ => None,
        }
    }

    pub fn limit_price(&self) -> Option<Decimal> {
        self.raw.get("limit_price").and_then(normalize::decimal_field)
    }

    pub fn stop_price(&self) -> Option<Decimal> {
        self.raw.get("stop_price").and_then(normalize::decimal_field)
    }
}

/// Per-deployment risk switchboard (singleton row).
///
/// A tripped breaker is sticky: nothing in the pipeline flips
/// `trading_enabled` back on. Operators restore it out of band.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountState {
    pub trading_enabled: bool,
    pub daily_dd_limit_pct: Option<Decimal>,
    pub daily_dd_triggered: bool,
    pub daily_high_watermark: Option<Decimal>,
    pub daily_loss_cap_usd: Option<Decimal>,
    pub reset_time_utc: NaiveTime,
    pub pause_reason: Option<String>,
    pub max_positions_total: Option<u32>,
}

impl Default for AccountState {
    fn default() -> Self {
        Self {
            trading_enabled: true,
            daily_dd_limit_pct: None,
            daily_dd_triggered: false,
            daily_high_watermark: None,
            daily_loss_cap_usd: None,
            reset_time_utc: NaiveTime::from_hms_opt(13, 30, 0).unwrap(),
            pause_reason: None,
            max_positions_total: None,
        }
    }
}

/// Partial update applied to the account-state singleton. Unset fields are
/// left untouched.
#[derive(Debug, Clone, Default)]
pub struct AccountStateUpdate {
    pub trading_enabled: Option<bool>,
    pub daily_dd_triggered: Option<bool>,
    pub daily_high_watermark: Option<Decimal>,
    pub pause_reason: Option<String>,
}

impl AccountStateUpdate {
    /// The update written when a daily breaker trips.
    pub fn breaker_tripped(reason: &str) -> Self {
        Self {
            trading_enabled: Some(false),
            daily_dd_triggered: Some(true),
            pause_reason: Some(reason.to_string()),
            ..Self::default()
        }
    }
}

/// Lazily-created per-day, per-alias metrics row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyMetrics {
    pub day: NaiveDate,
    pub alias: String,
    pub equity_at_open: Option<Decimal>,
    pub high_watermark: Option<Decimal>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrategyStatus {
    Active,
    Paused,
}

impl FromStr for StrategyStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(StrategyStatus::Active),
            "paused" => Ok(StrategyStatus::Paused),
            other => Err(format!("unknown strategy status '{}'", other)),
        }
    }
}

impl StrategyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyStatus::Active => "active",
            StrategyStatus::Paused => "paused",
        }
    }
}

/// Per-strategy configuration row. A missing row is treated as paused.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub name: String,
    pub status: StrategyStatus,
    pub default_risk_pct: Decimal,
    pub trail_atr_mult: Decimal,
    pub r_multiple_tp: Decimal,
    pub max_positions: u32,
    pub allow_short: bool,
    pub time_in_force: TimeInForce,
}

/// Order request in broker terms, fully resolved by the order builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: Action,
    pub qty: String,
    pub order_type: OrderType,
    pub time_in_force: TimeInForce,
    pub limit_price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    /// Take-profit limit leg; present only on bracket orders.
    pub take_profit: Option<Decimal>,
    /// Stop-loss leg; present only on bracket orders.
    pub stop_loss: Option<Decimal>,
    pub client_order_id: Option<String>,
}

impl OrderRequest {
    pub fn is_bracket(&self) -> bool {
        self.take_profit.is_some() && self.stop_loss.is_some()
    }
}
