//! Per-account daily risk policy, evaluated before every order.
//!
//! The guard reads three independent sources (account state, the day's
//! metrics row, live broker equity) and writes back only to the account
//! state singleton. A tripped breaker is sticky: nothing here re-enables
//! trading, that is an operator gesture.
//!
//! Day rollover is implicit. A new UTC day produces a fresh metrics row,
//! and the day-open equity is bound on the first evaluation at or after
//! `reset_time_utc`.

use crate::domain::clock::{self, Clock};
use crate::domain::errors::{ExecError, RiskBlock};
use crate::domain::ports::BrokerClient;
use crate::domain::repositories::QueueStore;
use crate::domain::types::AccountStateUpdate;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{info, warn};

const DEFAULT_EQUITY_TTL: Duration = Duration::from_secs(60);

/// Whether the evaluation gates a new entry or merely observes state before
/// an exit. Exits are never blocked; they still refresh the high watermark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskGate {
    Entry,
    Exit,
}

pub struct RiskGuard {
    store: Arc<dyn QueueStore>,
    clock: Arc<dyn Clock>,
    disabled: bool,
    equity_ttl: Duration,
    equity_cache: Mutex<HashMap<String, (Instant, Decimal)>>,
}

impl RiskGuard {
    pub fn new(store: Arc<dyn QueueStore>, clock: Arc<dyn Clock>, disabled: bool) -> Self {
        Self::with_ttl(store, clock, disabled, DEFAULT_EQUITY_TTL)
    }

    pub fn with_ttl(
        store: Arc<dyn QueueStore>,
        clock: Arc<dyn Clock>,
        disabled: bool,
        equity_ttl: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            disabled,
            equity_ttl,
            equity_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Evaluate the policy for one subaccount. Blocks surface as fatal
    /// `ExecError::Risk`; store and broker hiccups surface as transient.
    pub async fn check(
        &self,
        alias: &str,
        broker: &dyn BrokerClient,
        gate: RiskGate,
    ) -> Result<(), ExecError> {
        if self.disabled {
            return Ok(());
        }

        let Some(state) = self
            .store
            .account_state_load()
            .await
            .map_err(store_transient)?
        else {
            // No policy configured.
            return Ok(());
        };

        let entry = gate == RiskGate::Entry;
        if entry && !state.trading_enabled {
            return Err(RiskBlock::TradingDisabled.into());
        }

        let now = self.clock.now_utc();
        let day = clock::day_key(now);
        let metrics = self
            .store
            .daily_metrics_get_or_create(day, alias)
            .await
            .map_err(store_transient)?;

        let equity = self.cached_equity(alias, broker).await?;

        // Bind the day-open equity on the first look after the reset time.
        let mut equity_at_open = metrics.equity_at_open;
        if equity_at_open.is_none() && now.time() >= state.reset_time_utc {
            self.store
                .daily_metrics_set_equity(day, alias, equity)
                .await
                .map_err(store_transient)?;
            equity_at_open = Some(equity);
        }

        let mut hwm = state.daily_high_watermark.unwrap_or(Decimal::ZERO);
        if equity > hwm {
            self.store
                .account_state_update(&AccountStateUpdate {
                    daily_high_watermark: Some(equity),
                    ..AccountStateUpdate::default()
                })
                .await
                .map_err(store_transient)?;
            hwm = equity;
        }

        if !entry {
            return Ok(());
        }

        if let Some(limit) = state.daily_dd_limit_pct {
            if hwm > Decimal::ZERO {
                let drawdown = (hwm - equity) / hwm;
                if drawdown >= limit {
                    warn!(
                        alias,
                        %drawdown,
                        %limit,
                        "daily drawdown limit reached, disabling trading"
                    );
                    self.store
                        .account_state_update(&AccountStateUpdate::breaker_tripped("daily_dd"))
                        .await
                        .map_err(store_transient)?;
                    return Err(RiskBlock::DailyDrawdownLimitReached.into());
                }
            }
        }

        if let (Some(cap), Some(open)) = (state.daily_loss_cap_usd, equity_at_open) {
            if equity - open <= -cap {
                warn!(alias, %equity, %open, %cap, "daily loss cap reached, disabling trading");
                self.store
                    .account_state_update(&AccountStateUpdate::breaker_tripped("daily_loss_cap"))
                    .await
                    .map_err(store_transient)?;
                return Err(RiskBlock::DailyLossCapReached.into());
            }
        }

        if let Some(limit) = state.max_positions_total {
            let open_positions = broker
                .get_all_positions()
                .await
                .map_err(ExecError::from)?
                .iter()
                .filter(|p| !p.qty.is_zero())
                .count() as u32;
            if open_positions >= limit {
                info!(alias, open_positions, limit, "max total positions reached");
                return Err(RiskBlock::MaxPositionsTotalReached.into());
            }
        }

        Ok(())
    }

    /// Broker equity with a short process-local TTL cache. Stale reads
    /// within the TTL are acceptable; a fetch failure is transient.
    async fn cached_equity(
        &self,
        alias: &str,
        broker: &dyn BrokerClient,
    ) -> Result<Decimal, ExecError> {
        {
            let cache = self.equity_cache.lock().await;
            if let Some((at, value)) = cache.get(alias) {
                if at.elapsed() <= self.equity_ttl {
                    return Ok(*value);
                }
            }
        }

        let account = broker
            .get_account()
            .await
            .map_err(|e| ExecError::Transient(format!("equity fetch failed: {}", e)))?;

        self.equity_cache
            .lock()
            .await
            .insert(alias.to_string(), (Instant::now(), account.equity));

        Ok(account.equity)
    }
}

fn store_transient(err: anyhow::Error) -> ExecError {
    ExecError::Transient(format!("store: {}", err))
}
