//! Payload normalization: bar-time coercion, symbol canonicalization, and
//! quantity quantization.
//!
//! Webhook payloads arrive with mixed representations (numbers as strings,
//! epoch seconds vs milliseconds, exchange-prefixed tickers). Everything is
//! normalized once at ingress; downstream consumers only see typed values.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde_json::Value;
use std::str::FromStr;

const EPOCH_MS_THRESHOLD: f64 = 1e11;
const EPOCH_SECS_THRESHOLD: f64 = 1e9;

/// Smallest order quantity accepted for crypto symbols.
pub const MIN_CRYPTO_QTY: Decimal = dec!(0.000001);

/// Coerce a payload bar time into epoch milliseconds and a UTC instant.
///
/// Accepts numeric epoch seconds, epoch milliseconds, or an ISO-8601 string
/// (naive strings are read as UTC). Numeric rule: values at or above 1e11
/// are already milliseconds, values at or above 1e9 are seconds, anything
/// smaller passes through as milliseconds.
pub fn coerce_bar_time(value: &Value) -> Result<(i64, DateTime<Utc>), String> {
    let ms = match value {
        Value::Number(n) => numeric_to_ms(
            n.as_f64()
                .ok_or_else(|| format!("bar_time not representable: {}", n))?,
        ),
        Value::String(s) => {
            let trimmed = s.trim();
            if let Ok(n) = trimmed.parse::<f64>() {
                numeric_to_ms(n)
            } else {
                parse_iso_utc(trimmed)?.timestamp_millis()
            }
        }
        other => return Err(format!("bar_time must be a number or string, got {}", other)),
    };

    let ts = Utc
        .timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| format!("bar_time out of range: {}", ms))?;
    Ok((ms, ts))
}

fn numeric_to_ms(n: f64) -> i64 {
    if n >= EPOCH_MS_THRESHOLD {
        n.round() as i64
    } else if n >= EPOCH_SECS_THRESHOLD {
        (n * 1000.0).round() as i64
    } else {
        n.round() as i64
    }
}

fn parse_iso_utc(s: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    // Naive timestamps are interpreted as UTC.
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }
    Err(format!("unparseable bar_time '{}'", s))
}

/// Drop an exchange prefix like `BINANCE:` or `COINBASE:`.
pub fn strip_exchange_prefix(symbol: &str) -> &str {
    match symbol.rsplit_once(':') {
        Some((_, rest)) => rest,
        None => symbol,
    }
}

/// A symbol is crypto iff it contains `/` or ends in USD/USDT after
/// stripping any exchange prefix.
pub fn is_crypto_symbol(symbol: &str) -> bool {
    let s = strip_exchange_prefix(symbol.trim()).to_uppercase();
    s.contains('/') || s.ends_with("USDT") || s.ends_with("USD")
}

/// Canonical trading symbol: prefix stripped, `/` and `:` removed, USDT
/// quote folded into USD. Equities pass through unchanged (upcased).
pub fn normalize_trade_symbol(symbol: &str) -> String {
    let stripped = strip_exchange_prefix(symbol.trim()).to_uppercase();
    let mut s: String = stripped.chars().filter(|c| *c != '/' && *c != ':').collect();
    if let Some(base) = s.strip_suffix("USDT") {
        s = format!("{}USD", base);
    }
    s
}

/// Data-API pair form for a normalized crypto symbol: `ETHUSD -> ETH/USD`.
pub fn to_data_pair(symbol: &str) -> Result<String, String> {
    if symbol.contains('/') {
        return Ok(symbol.to_string());
    }
    match symbol.strip_suffix("USD") {
        Some(base) if !base.is_empty() => Ok(format!("{}/USD", base)),
        _ => Err(format!("cannot derive data pair for '{}'", symbol)),
    }
}

/// Quantize an order quantity: crypto rounds down to 6 fractional digits
/// with a floor of 0.000001; equities round down to a whole number with a
/// floor of 1.
pub fn quantize_qty(qty: Decimal, crypto: bool) -> Decimal {
    if crypto {
        let q = qty.round_dp_with_strategy(6, RoundingStrategy::ToZero);
        if q < MIN_CRYPTO_QTY { MIN_CRYPTO_QTY } else { q }
    } else {
        let q = qty.trunc();
        if q < Decimal::ONE { Decimal::ONE } else { q }
    }
}

/// Read a decimal from a JSON field that may be a number or a string.
pub fn decimal_field(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => Decimal::from_str(&n.to_string())
            .ok()
            .or_else(|| n.as_f64().and_then(Decimal::from_f64)),
        Value::String(s) => {
            let t = s.trim();
            if t.is_empty() { None } else { Decimal::from_str(t).ok() }
        }
        _ => None,
    }
}

/// Read an unsigned integer from a JSON field that may be a number or string.
pub fn u32_field(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|v| u32::try_from(v).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Read a string from a JSON field, stringifying bare numbers (TradingView
/// sends `"timeframe": 5` as often as `"5"`).
pub fn string_field(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let t = s.trim();
            if t.is_empty() { None } else { Some(t.to_string()) }
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
