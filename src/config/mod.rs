//! Configuration loading from environment variables.
//!
//! Organized by concern: webhook authentication, worker coordination, and
//! broker credentials (see `broker_config` for per-alias resolution).

mod broker_config;

pub use broker_config::{AlpacaCredentials, CredentialResolver, DEFAULT_ALIAS};

use anyhow::{Context, Result, bail};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Paper/live execution mode. Checked against the broker base URL before
/// every submission so a misconfigured deployment cannot trade the wrong
/// account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradingMode {
    Paper,
    Live,
}

impl TradingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradingMode::Paper => "paper",
            TradingMode::Live => "live",
        }
    }

    /// A paper base URL is recognized by its `paper-api` host.
    pub fn matches_base_url(&self, base_url: &str) -> bool {
        let paper_host = base_url.contains("paper-api");
        match self {
            TradingMode::Paper => paper_host,
            TradingMode::Live => !paper_host,
        }
    }
}

impl FromStr for TradingMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "paper" => Ok(TradingMode::Paper),
            "live" => Ok(TradingMode::Live),
            other => bail!("Invalid TRADING_MODE: {}. Must be 'paper' or 'live'", other),
        }
    }
}

/// Webhook authentication settings.
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// v2 passphrase; required, minimum 16 characters.
    pub passphrase_v2: String,
    /// v1 (legacy route) passphrase; the route rejects everything when unset.
    pub passphrase_v1: Option<String>,
    /// Optional second factor checked against X-Auth / X-Webhook-Token.
    pub header_token_v2: Option<String>,
    /// Optional path segment prefixed to the v2 route.
    pub path_token: Option<String>,
}

/// Worker coordination settings.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Base URL the ingress kicks after enqueueing; kicks are skipped when
    /// unset and the polling loop alone drives the queue.
    pub url: Option<String>,
    /// Shared secret for /worker/kick and /run-worker.
    pub secret: Option<String>,
    pub poll_interval: Duration,
    /// Jobs listed per polling pass.
    pub batch_limit: u32,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_address: String,
    pub database_url: String,
    pub trading_mode: TradingMode,
    pub webhook: WebhookConfig,
    pub worker: WorkerConfig,
    pub risk_guard_disabled: bool,
    pub enable_daily_report: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let passphrase_v2 =
            env::var("WEBHOOK_PASSPHRASE_V2").context("WEBHOOK_PASSPHRASE_V2 is required")?;
        if passphrase_v2.len() < 16 {
            bail!("WEBHOOK_PASSPHRASE_V2 must be at least 16 characters");
        }

        let trading_mode = match env::var("TRADING_MODE") {
            Ok(s) => s.parse()?,
            Err(_) => TradingMode::Paper,
        };

        let poll_interval_secs = env::var("WORKER_POLL_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(2);

        Ok(Self {
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://data/tradegate.db".to_string()),
            trading_mode,
            webhook: WebhookConfig {
                passphrase_v2,
                passphrase_v1: non_empty_var("WEBHOOK_PASSPHRASE"),
                header_token_v2: non_empty_var("WEBHOOK_HEADER_TOKEN_V2"),
                path_token: non_empty_var("WEBHOOK_PATH_TOKEN"),
            },
            worker: WorkerConfig {
                url: non_empty_var("WORKER_URL"),
                secret: non_empty_var("WORKER_SECRET"),
                poll_interval: Duration::from_secs(poll_interval_secs),
                batch_limit: 20,
            },
            risk_guard_disabled: bool_var("RISK_GUARD_DISABLED"),
            enable_daily_report: bool_var("ENABLE_DAILY_REPORT"),
        })
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn bool_var(name: &str) -> bool {
    matches!(
        env::var(name)
            .unwrap_or_default()
            .trim()
            .to_lowercase()
            .as_str(),
        "1" | "true" | "yes"
    )
}
