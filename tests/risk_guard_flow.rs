//! Risk-guard behavior through the worker: breaker trips, loss caps,
//! position limits, high-watermark maintenance, and day rollover.

mod common;

use common::{active_strategy, buy_webhook_body, harness, insert_job, market_open_instant};
use rust_decimal_macros::dec;
use serde_json::json;
use tradegate::application::ingress::IngressOutcome;
use tradegate::application::worker::ProcessOutcome;
use tradegate::domain::clock::Clock;
use tradegate::domain::repositories::QueueStore;
use tradegate::domain::types::{AccountState, Action, JobStatus};

#[tokio::test]
async fn test_drawdown_breaker_trips_and_sticks() {
    let h = harness();
    h.store.put_strategy(active_strategy("momo")).await;
    h.store
        .set_account_state(AccountState {
            trading_enabled: true,
            daily_dd_limit_pct: Some(dec!(0.03)),
            daily_high_watermark: Some(dec!(10000)),
            ..AccountState::default()
        })
        .await;
    // Equity off the watermark by 3.1%, past the 3% limit.
    h.broker.set_equity(dec!(9690));

    let job = insert_job(&h.store, Action::Buy, "AAPL", json!({"qty": 1})).await;
    let outcome = h.worker.process_one(job.id).await.unwrap();
    assert_eq!(
        outcome,
        ProcessOutcome::Failed {
            reason: "daily_drawdown_limit_reached".to_string()
        }
    );
    // The breaker fired before any broker call.
    assert!(h.broker.submissions().is_empty());

    let state = h.store.account_state_load().await.unwrap().unwrap();
    assert!(!state.trading_enabled);
    assert!(state.daily_dd_triggered);
    assert_eq!(state.pause_reason.as_deref(), Some("daily_dd"));

    // Sticky: later webhooks are policy-paused at the door, even after the
    // day rolls over and equity recovers.
    h.clock.advance(chrono::Duration::days(1));
    h.broker.set_equity(dec!(10500));
    let outcome = h.ingress.handle_v2(&buy_webhook_body(), None).await.unwrap();
    assert_eq!(outcome, IngressOutcome::TradingDisabled);

    let job = insert_job(&h.store, Action::Buy, "MSFT", json!({"qty": 1})).await;
    let outcome = h.worker.process_one(job.id).await.unwrap();
    assert_eq!(
        outcome,
        ProcessOutcome::Failed {
            reason: "trading_disabled".to_string()
        }
    );
}

#[tokio::test]
async fn test_daily_loss_cap_trips_against_day_open_equity() {
    let h = harness();
    h.store
        .set_account_state(AccountState {
            daily_loss_cap_usd: Some(dec!(500)),
            ..AccountState::default()
        })
        .await;

    // First evaluation after the reset time binds the day-open equity.
    let job = insert_job(&h.store, Action::Buy, "AAPL", json!({"qty": 1})).await;
    assert!(h.worker.process_one(job.id).await.unwrap().is_success());

    // Down $600 on the day: past the $500 cap.
    h.broker.set_equity(dec!(9400));
    let job = insert_job(&h.store, Action::Buy, "AAPL", json!({"qty": 1})).await;
    let outcome = h.worker.process_one(job.id).await.unwrap();
    assert_eq!(
        outcome,
        ProcessOutcome::Failed {
            reason: "daily_loss_cap_reached".to_string()
        }
    );

    let state = h.store.account_state_load().await.unwrap().unwrap();
    assert!(!state.trading_enabled);
    assert_eq!(state.pause_reason.as_deref(), Some("daily_loss_cap"));
}

#[tokio::test]
async fn test_max_positions_blocks_without_mutating_state() {
    let h = harness();
    h.store
        .set_account_state(AccountState {
            max_positions_total: Some(2),
            ..AccountState::default()
        })
        .await;
    h.broker.add_position("SPY", dec!(10));
    h.broker.add_position("QQQ", dec!(5));

    let job = insert_job(&h.store, Action::Buy, "AAPL", json!({"qty": 1})).await;
    let outcome = h.worker.process_one(job.id).await.unwrap();
    assert_eq!(
        outcome,
        ProcessOutcome::Failed {
            reason: "max_positions_total_reached".to_string()
        }
    );

    // Unlike the breakers, this limit leaves the switchboard untouched.
    let state = h.store.account_state_load().await.unwrap().unwrap();
    assert!(state.trading_enabled);
    assert!(!state.daily_dd_triggered);
}

#[tokio::test]
async fn test_high_watermark_is_monotonic_within_a_day() {
    let h = harness();
    h.store.set_account_state(AccountState::default()).await;

    for (equity, expected_hwm) in [
        (dec!(10000), dec!(10000)),
        (dec!(10100), dec!(10100)),
        (dec!(9900), dec!(10100)), // a dip never lowers the mark
        (dec!(10200), dec!(10200)),
    ] {
        h.broker.set_equity(equity);
        let job = insert_job(&h.store, Action::Buy, "AAPL", json!({"qty": 1})).await;
        assert!(h.worker.process_one(job.id).await.unwrap().is_success());

        let state = h.store.account_state_load().await.unwrap().unwrap();
        assert_eq!(state.daily_high_watermark, Some(expected_hwm));
    }
}

#[tokio::test]
async fn test_sells_exit_even_when_trading_is_disabled() {
    let h = harness();
    h.store
        .set_account_state(AccountState {
            trading_enabled: false,
            pause_reason: Some("daily_dd".to_string()),
            daily_dd_triggered: true,
            ..AccountState::default()
        })
        .await;
    h.broker.add_position("SPY", dec!(8));

    let job = insert_job(&h.store, Action::Sell, "SPY", json!({})).await;
    let outcome = h.worker.process_one(job.id).await.unwrap();
    assert!(outcome.is_success(), "outcome: {:?}", outcome);

    let submissions = h.broker.submissions();
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].side, Action::Sell);

    // The exit pass still refreshed the high watermark.
    let state = h.store.account_state_load().await.unwrap().unwrap();
    assert_eq!(state.daily_high_watermark, Some(dec!(10000)));
}

#[tokio::test]
async fn test_day_rollover_binds_fresh_open_equity() {
    let h = harness();
    h.store.set_account_state(AccountState::default()).await;

    let job = insert_job(&h.store, Action::Buy, "AAPL", json!({"qty": 1})).await;
    assert!(h.worker.process_one(job.id).await.unwrap().is_success());

    let day1 = h.clock.now_utc().date_naive();
    let metrics = h
        .store
        .daily_metrics_get_or_create(day1, "default")
        .await
        .unwrap();
    assert_eq!(metrics.equity_at_open, Some(dec!(10000)));

    // Next UTC day: a fresh row binds the new open without any reset job.
    h.clock.advance(chrono::Duration::days(1));
    h.broker.set_equity(dec!(10050));

    let job = insert_job(&h.store, Action::Buy, "AAPL", json!({"qty": 1})).await;
    assert!(h.worker.process_one(job.id).await.unwrap().is_success());

    let day2 = h.clock.now_utc().date_naive();
    let metrics = h
        .store
        .daily_metrics_get_or_create(day2, "default")
        .await
        .unwrap();
    assert_eq!(metrics.equity_at_open, Some(dec!(10050)));
}

#[tokio::test]
async fn test_open_equity_not_bound_before_reset_time() {
    let h = harness();
    let mut state = AccountState::default();
    state.reset_time_utc = chrono::NaiveTime::from_hms_opt(15, 0, 0).unwrap();
    h.store.set_account_state(state).await;

    // 14:00 UTC is before the 15:00 reset; the open stays unbound.
    assert_eq!(h.clock.now_utc(), market_open_instant());
    let job = insert_job(&h.store, Action::Buy, "AAPL", json!({"qty": 1})).await;
    assert!(h.worker.process_one(job.id).await.unwrap().is_success());

    let metrics = h
        .store
        .daily_metrics_get_or_create(h.clock.now_utc().date_naive(), "default")
        .await
        .unwrap();
    assert_eq!(metrics.equity_at_open, None);
}

#[tokio::test]
async fn test_no_account_state_means_no_policy() {
    let h = harness();

    let job = insert_job(&h.store, Action::Buy, "AAPL", json!({"qty": 1})).await;
    let outcome = h.worker.process_one(job.id).await.unwrap();
    assert!(outcome.is_success());
    assert_eq!(
        h.store.job_load(job.id).await.unwrap().unwrap().status,
        JobStatus::Done
    );
}
