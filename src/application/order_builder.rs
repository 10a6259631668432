//! Assembles the broker order request for a sized job.
//!
//! Brackets are attached only to BUY entries with both legs computable.
//! Time-in-force falls back per asset class (`day` for equities, `gtc` for
//! crypto), crypto never rests a `day` order, and an after-hours mode forces
//! `opg` on equities.

use crate::domain::types::{
    Action, AfterHoursMode, OrderRequest, OrderType, TimeInForce,
};
use rust_decimal::Decimal;
use uuid::Uuid;

const CLIENT_ORDER_ID_MAX: usize = 30;

/// Everything the builder needs, already resolved by the worker.
#[derive(Debug, Clone)]
pub struct OrderSpec {
    pub symbol: String,
    pub side: Action,
    pub qty: Decimal,
    pub order_type: OrderType,
    /// Payload or strategy TIF hint; `None` falls back per asset class.
    pub tif: Option<TimeInForce>,
    pub limit_price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
    pub after_hours: Option<AfterHoursMode>,
    pub crypto: bool,
    pub client_order_id: Option<String>,
}

/// Deterministic idempotency key for a queue job: `q_` plus the dashless
/// job id, truncated to the broker's 30-character limit. Replaying the same
/// job always produces the same key, so the broker rejects the duplicate
/// and the worker treats that as success.
pub fn client_order_id(job_id: Uuid) -> String {
    let mut id = format!("q_{}", job_id.simple());
    id.truncate(CLIENT_ORDER_ID_MAX);
    id
}

pub fn build(spec: OrderSpec) -> OrderRequest {
    let tif = resolve_tif(&spec);

    let bracket =
        spec.side == Action::Buy && spec.take_profit.is_some() && spec.stop_loss.is_some();
    let (take_profit, stop_loss) = if bracket {
        (spec.take_profit, spec.stop_loss)
    } else {
        (None, None)
    };

    let (limit_price, stop_price) = match spec.order_type {
        OrderType::Market => (None, None),
        OrderType::Limit => (spec.limit_price, None),
        OrderType::Stop => (None, spec.stop_price),
    };

    OrderRequest {
        symbol: spec.symbol,
        side: spec.side,
        qty: spec.qty.normalize().to_string(),
        order_type: spec.order_type,
        time_in_force: tif,
        limit_price,
        stop_price,
        take_profit,
        stop_loss,
        client_order_id: spec.client_order_id,
    }
}

fn resolve_tif(spec: &OrderSpec) -> TimeInForce {
    if !spec.crypto && spec.after_hours.is_some() {
        return TimeInForce::Opg;
    }

    let tif = spec.tif.unwrap_or(if spec.crypto {
        TimeInForce::Gtc
    } else {
        TimeInForce::Day
    });

    if spec.crypto && tif == TimeInForce::Day {
        TimeInForce::Gtc
    } else {
        tif
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn spec(side: Action, crypto: bool) -> OrderSpec {
        OrderSpec {
            symbol: if crypto { "ETHUSD" } else { "AAPL" }.into(),
            side,
            qty: dec!(1),
            order_type: OrderType::Market,
            tif: None,
            limit_price: None,
            stop_price: None,
            take_profit: None,
            stop_loss: None,
            after_hours: None,
            crypto,
            client_order_id: None,
        }
    }

    #[test]
    fn test_client_order_id_is_deterministic_and_bounded() {
        let id = Uuid::parse_str("6d9adec1-5a97-4943-bd36-51fc35b8c1b5").unwrap();
        let a = client_order_id(id);
        let b = client_order_id(id);

        assert_eq!(a, b);
        assert_eq!(a.len(), 30);
        assert!(a.starts_with("q_6d9adec1"));
        assert!(!a.contains('-'));
    }

    #[test]
    fn test_distinct_jobs_get_distinct_ids() {
        assert_ne!(client_order_id(Uuid::new_v4()), client_order_id(Uuid::new_v4()));
    }

    #[test]
    fn test_bracket_requires_buy_and_both_legs() {
        let mut s = spec(Action::Buy, false);
        s.take_profit = Some(dec!(186));
        s.stop_loss = Some(dec!(177));
        assert!(build(s).is_bracket());

        let mut s = spec(Action::Sell, false);
        s.take_profit = Some(dec!(186));
        s.stop_loss = Some(dec!(177));
        assert!(!build(s).is_bracket());

        let mut s = spec(Action::Buy, false);
        s.take_profit = Some(dec!(186));
        assert!(!build(s).is_bracket());
    }

    #[test]
    fn test_tif_defaults_by_asset_class() {
        assert_eq!(build(spec(Action::Buy, false)).time_in_force, TimeInForce::Day);
        assert_eq!(build(spec(Action::Buy, true)).time_in_force, TimeInForce::Gtc);
    }

    #[test]
    fn test_crypto_rejects_day_tif() {
        let mut s = spec(Action::Buy, true);
        s.tif = Some(TimeInForce::Day);
        assert_eq!(build(s).time_in_force, TimeInForce::Gtc);
    }

    #[test]
    fn test_after_hours_forces_opg_on_equities() {
        let mut s = spec(Action::Buy, false);
        s.tif = Some(TimeInForce::Gtc);
        s.after_hours = Some(AfterHoursMode::Opg);
        assert_eq!(build(s).time_in_force, TimeInForce::Opg);
    }

    #[test]
    fn test_limit_price_only_on_limit_orders() {
        let mut s = spec(Action::Buy, false);
        s.order_type = OrderType::Limit;
        s.limit_price = Some(dec!(179.5));
        let req = build(s);
        assert_eq!(req.limit_price, Some(dec!(179.5)));
        assert_eq!(req.stop_price, None);

        let mut s = spec(Action::Buy, false);
        s.limit_price = Some(dec!(179.5));
        assert_eq!(build(s).limit_price, None);
    }

    #[test]
    fn test_qty_rendered_without_trailing_zeros() {
        let mut s = spec(Action::Buy, true);
        s.qty = dec!(0.033000);
        assert_eq!(build(s).qty, "0.033");

        let mut s = spec(Action::Buy, false);
        s.qty = dec!(23);
        assert_eq!(build(s).qty, "23");
    }
}
