//! Position sizing: translate a queue job's sizing hints into an order
//! quantity plus optional bracket levels.
//!
//! BUY quantity resolution, first match wins: explicit `qty` override, cash
//! percentage, equity-slot sizing (`max_slots`), risk-notional sizing
//! (`risk_pct`), then a literal quantity of one. SELL is always an exit of
//! an existing long; there is no opening-short path.

use crate::domain::errors::{BrokerError, ExecError};
use crate::domain::normalize;
use crate::domain::ports::BrokerClient;
use crate::domain::types::{Action, QueueJob};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

const DEFAULT_R_MULTIPLE: Decimal = dec!(2.0);
const DEFAULT_BUFFER_RATIO: Decimal = dec!(0.05);
const MAX_BUFFER_RATIO: Decimal = dec!(0.95);
const MIN_RISK_PER_UNIT: Decimal = dec!(0.01);

/// Result of sizing one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SizeOutcome {
    Sized {
        qty: Decimal,
        take_profit: Option<Decimal>,
        stop_loss: Option<Decimal>,
    },
    /// No order should be placed, but the job counts as handled (e.g. all
    /// equity slots are occupied).
    Skipped { reason: &'static str },
}

pub async fn size(job: &QueueJob, broker: &dyn BrokerClient) -> Result<SizeOutcome, ExecError> {
    let symbol = normalize::normalize_trade_symbol(&job.ticker);
    let crypto = normalize::is_crypto_symbol(&job.ticker);

    match job.action {
        Action::Buy => size_buy(job, &symbol, crypto, broker).await,
        Action::Sell => size_sell(job, &symbol, crypto, broker).await,
    }
}

async fn size_buy(
    job: &QueueJob,
    symbol: &str,
    crypto: bool,
    broker: &dyn BrokerClient,
) -> Result<SizeOutcome, ExecError> {
    let raw_qty = if let Some(qty) = job.qty_override() {
        qty
    } else if let Some(pct) = job.percentage_override() {
        let account = broker.get_account().await?;
        let price = entry_price(job, symbol, crypto, broker).await?;
        account.cash * pct / price
    } else if let Some(max_slots) = job.max_slots {
        if max_slots == 0 {
            return Err(ExecError::InvalidOrder("max_slots must be positive".into()));
        }
        let account = broker.get_account().await?;
        let buffer = job
            .buffer_ratio
            .unwrap_or(DEFAULT_BUFFER_RATIO)
            .clamp(Decimal::ZERO, MAX_BUFFER_RATIO);
        let available = account.equity * (Decimal::ONE - buffer);
        if available <= Decimal::ZERO {
            return Err(ExecError::InvalidOrder(
                "no equity available after buffer".into(),
            ));
        }

        let open_slots = broker
            .get_all_positions()
            .await?
            .iter()
            .filter(|p| !p.qty.is_zero())
            .count() as u32;
        if open_slots >= max_slots {
            return Ok(SizeOutcome::Skipped {
                reason: "max_slots_full",
            });
        }

        let target_value = available / Decimal::from(max_slots);
        let price = entry_price(job, symbol, crypto, broker).await?;
        target_value / price
    } else if let Some(risk_pct) = job.risk_pct {
        let account = broker.get_account().await?;
        let price = entry_price(job, symbol, crypto, broker).await?;
        account.equity * risk_pct / price
    } else {
        Decimal::ONE
    };

    let (take_profit, stop_loss) = bracket_levels(job);

    Ok(SizeOutcome::Sized {
        qty: normalize::quantize_qty(raw_qty, crypto),
        take_profit,
        stop_loss,
    })
}

async fn size_sell(
    job: &QueueJob,
    symbol: &str,
    crypto: bool,
    broker: &dyn BrokerClient,
) -> Result<SizeOutcome, ExecError> {
    let position = broker.get_open_position(symbol).await?;
    let held = match position {
        Some(p) if p.qty > Decimal::ZERO => p.qty,
        _ => {
            return Err(ExecError::NotHolding {
                symbol: symbol.to_string(),
            });
        }
    };

    let raw_qty = if job.flat_exit() {
        held
    } else if let Some(qty) = job.qty_override() {
        qty.min(held)
    } else if let Some(pct) = job.percentage_override() {
        held * pct
    } else {
        held
    };

    // SELL is an exit, never a new bracket.
    Ok(SizeOutcome::Sized {
        qty: normalize::quantize_qty(raw_qty, crypto),
        take_profit: None,
        stop_loss: None,
    })
}

/// Stop and take-profit levels for a BUY, when entry, ATR, and trail
/// multiplier are all known: `sl = entry - atr * mult`, risk floored at one
/// cent, `tp = entry + r * risk`.
fn bracket_levels(job: &QueueJob) -> (Option<Decimal>, Option<Decimal>) {
    let (Some(entry), Some(atr), Some(mult)) = (job.price, job.atr, job.trail_atr_mult) else {
        return (None, None);
    };

    let sl = (entry - atr * mult).round_dp(4);
    let risk = (entry - sl).max(MIN_RISK_PER_UNIT);
    let r_mult = job.r_multiple_tp.unwrap_or(DEFAULT_R_MULTIPLE);
    let tp = (entry + r_mult * risk).round_dp(4);

    (Some(tp), Some(sl))
}

/// Price basis for notional sizing: the signal's entry price when present,
/// otherwise the latest trade (equity) or quote midpoint (crypto).
async fn entry_price(
    job: &QueueJob,
    symbol: &str,
    crypto: bool,
    broker: &dyn BrokerClient,
) -> Result<Decimal, ExecError> {
    if let Some(price) = job.price {
        if price > Decimal::ZERO {
            return Ok(price);
        }
    }

    let fetched = if crypto {
        let pair = normalize::to_data_pair(symbol).map_err(|_| ExecError::NoPriceData {
            symbol: symbol.to_string(),
        })?;
        broker.get_latest_crypto_quote(&pair).await.map(|q| q.mid())
    } else {
        broker.get_latest_trade(symbol).await
    };

    match fetched {
        Ok(price) if price > Decimal::ZERO => Ok(price),
        Ok(_) => Err(ExecError::NoPriceData {
            symbol: symbol.to_string(),
        }),
        Err(BrokerError::Transport(msg)) => Err(ExecError::Transient(msg)),
        Err(_) => Err(ExecError::NoPriceData {
            symbol: symbol.to_string(),
        }),
    }
}
