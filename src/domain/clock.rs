//! Wall-clock abstraction and market-hours helpers.

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc, Weekday};

/// Source of UTC wall time. Swapped for a fixed clock in tests.
pub trait Clock: Send + Sync {
    fn now_utc(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// UTC day key used for daily metrics rows.
pub fn day_key(ts: DateTime<Utc>) -> NaiveDate {
    ts.date_naive()
}

/// US regular trading hours: Mon-Fri 13:30-20:00 UTC, bounds inclusive.
pub fn is_market_open(ts: DateTime<Utc>) -> bool {
    match ts.weekday() {
        Weekday::Sat | Weekday::Sun => return false,
        _ => {}
    }
    let t = ts.time();
    let open = NaiveTime::from_hms_opt(13, 30, 0).unwrap();
    let close = NaiveTime::from_hms_opt(20, 0, 0).unwrap();
    t >= open && t <= close
}
