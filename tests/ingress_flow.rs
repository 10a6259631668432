//! Webhook ingress behavior: authentication, validation, idempotent
//! acceptance, and policy gating.

mod common;

use common::{PASSPHRASE_V1, active_strategy, buy_webhook_body, harness};
use rust_decimal_macros::dec;
use serde_json::json;
use tradegate::application::ingress::IngressOutcome;
use tradegate::domain::errors::IngressError;
use tradegate::domain::types::{AccountState, Action, JobStatus, StrategyStatus};

#[tokio::test]
async fn test_happy_buy_is_queued_with_merged_hints() {
    let h = harness();
    h.store.put_strategy(active_strategy("momo")).await;

    let outcome = h.ingress.handle_v2(&buy_webhook_body(), None).await.unwrap();
    let IngressOutcome::Queued { id } = outcome else {
        panic!("expected queued, got {:?}", outcome);
    };

    let jobs = h.store.jobs().await;
    assert_eq!(jobs.len(), 1);
    let job = &jobs[0];
    assert_eq!(job.id, id);
    assert_eq!(job.status, JobStatus::Ready);
    assert_eq!(job.action, Action::Buy);
    assert_eq!(job.ticker, "AAPL");
    assert_eq!(job.subaccount, "default");
    assert_eq!(job.price, Some(dec!(180.0)));
    assert_eq!(job.atr, Some(dec!(1.5)));
    // Payload hints beat strategy defaults; absent hints fall back.
    assert_eq!(job.risk_pct, Some(dec!(0.01)));
    assert_eq!(job.trail_atr_mult, Some(dec!(2.0)));
    assert_eq!(job.r_multiple_tp, Some(dec!(2.0)));

    let signals = h.store.signals().await;
    assert_eq!(signals.len(), 1);
    assert_eq!(signals[0].dedup_key, "momo|AAPL|5|1727357550000|BUY");
    assert_eq!(signals[0].source, "tv-v2");
}

#[tokio::test]
async fn test_duplicate_replay_is_ignored() {
    let h = harness();
    h.store.put_strategy(active_strategy("momo")).await;

    let first = h.ingress.handle_v2(&buy_webhook_body(), None).await.unwrap();
    assert!(matches!(first, IngressOutcome::Queued { .. }));

    let second = h.ingress.handle_v2(&buy_webhook_body(), None).await.unwrap();
    assert!(matches!(second, IngressOutcome::DupIgnored { .. }));

    // Exactly one signal row and one queue row survive the replay.
    assert_eq!(h.store.signals().await.len(), 1);
    assert_eq!(h.store.jobs().await.len(), 1);
}

#[tokio::test]
async fn test_bad_passphrase_is_unauthorized() {
    let h = harness();
    let body = serde_json::to_vec(&json!({
        "passphrase": "wrong",
        "strategy": "momo",
        "ticker": "AAPL",
        "timeframe": "5",
        "action": "buy",
        "bar_time": 1727357550000i64
    }))
    .unwrap();

    let err = h.ingress.handle_v2(&body, None).await.unwrap_err();
    assert!(matches!(err, IngressError::BadPassphrase));
    assert!(h.store.signals().await.is_empty());
}

#[tokio::test]
async fn test_header_token_policy() {
    let mut h = harness();
    // Rebuild the ingress with a header token configured.
    h.ingress = tradegate::application::ingress::IngressHandler::new(
        h.store.clone(),
        h.clock.clone(),
        tradegate::config::WebhookConfig {
            passphrase_v2: common::PASSPHRASE_V2.to_string(),
            passphrase_v1: None,
            header_token_v2: Some("hdr-secret".to_string()),
            path_token: None,
        },
        None,
    );
    h.store.put_strategy(active_strategy("momo")).await;

    let err = h
        .ingress
        .handle_v2(&buy_webhook_body(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, IngressError::BadHeaderToken));

    let err = h
        .ingress
        .handle_v2(&buy_webhook_body(), Some("nope"))
        .await
        .unwrap_err();
    assert!(matches!(err, IngressError::BadHeaderToken));

    let ok = h
        .ingress
        .handle_v2(&buy_webhook_body(), Some("hdr-secret"))
        .await
        .unwrap();
    assert!(matches!(ok, IngressOutcome::Queued { .. }));
}

#[tokio::test]
async fn test_missing_fields_are_rejected() {
    let h = harness();
    let body = serde_json::to_vec(&json!({
        "passphrase": common::PASSPHRASE_V2,
        "strategy": "momo",
        "ticker": "AAPL",
        "timeframe": "5",
        "action": "buy"
    }))
    .unwrap();

    match h.ingress.handle_v2(&body, None).await.unwrap_err() {
        IngressError::MissingField(field) => assert_eq!(field, "bar_time"),
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn test_invalid_json_and_bad_action() {
    let h = harness();

    let err = h.ingress.handle_v2(b"{not json", None).await.unwrap_err();
    assert!(matches!(err, IngressError::InvalidJson));

    let body = serde_json::to_vec(&json!({
        "passphrase": common::PASSPHRASE_V2,
        "strategy": "momo",
        "ticker": "AAPL",
        "timeframe": "5",
        "action": "hold",
        "bar_time": 1727357550000i64
    }))
    .unwrap();
    let err = h.ingress.handle_v2(&body, None).await.unwrap_err();
    assert!(matches!(err, IngressError::InvalidSchema(_)));
}

#[tokio::test]
async fn test_trading_disabled_records_signal_but_not_job() {
    let h = harness();
    h.store.put_strategy(active_strategy("momo")).await;
    h.store
        .set_account_state(AccountState {
            trading_enabled: false,
            ..AccountState::default()
        })
        .await;

    let outcome = h.ingress.handle_v2(&buy_webhook_body(), None).await.unwrap();
    assert_eq!(outcome, IngressOutcome::TradingDisabled);

    // The raw signal is still the source of record for receipt.
    assert_eq!(h.store.signals().await.len(), 1);
    assert!(h.store.jobs().await.is_empty());
}

#[tokio::test]
async fn test_missing_or_paused_strategy_pauses_signal() {
    let h = harness();

    let outcome = h.ingress.handle_v2(&buy_webhook_body(), None).await.unwrap();
    assert_eq!(outcome, IngressOutcome::StrategyPaused);

    let mut paused = active_strategy("momo");
    paused.status = StrategyStatus::Paused;
    h.store.put_strategy(paused).await;

    // Same strategy, different bar: a fresh dedup key.
    let mut body: serde_json::Value = serde_json::from_slice(&buy_webhook_body()).unwrap();
    body["bar_time"] = json!(1727357850000i64);
    let outcome = h
        .ingress
        .handle_v2(&serde_json::to_vec(&body).unwrap(), None)
        .await
        .unwrap();
    assert_eq!(outcome, IngressOutcome::StrategyPaused);

    assert!(h.store.jobs().await.is_empty());
}

#[tokio::test]
async fn test_v1_buy_carries_qty_override() {
    let h = harness();
    let body = serde_json::to_vec(&json!({
        "passphrase": PASSPHRASE_V1,
        "ticker": "SPY",
        "action": "buy",
        "qty": 3,
        "subaccount": "swing"
    }))
    .unwrap();

    let outcome = h.ingress.handle_v1(&body).await.unwrap();
    assert!(matches!(outcome, IngressOutcome::Queued { .. }));

    let jobs = h.store.jobs().await;
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].subaccount, "swing");
    assert_eq!(jobs[0].qty_override(), Some(dec!(3)));
    // The stored payload must not retain the shared secret.
    assert!(jobs[0].raw.get("passphrase").is_none());
}

#[tokio::test]
async fn test_v1_sell_drops_percentage_for_full_flatten() {
    let h = harness();
    let body = serde_json::to_vec(&json!({
        "passphrase": PASSPHRASE_V1,
        "ticker": "SPY",
        "action": "sell",
        "percentage": 0.5
    }))
    .unwrap();

    h.ingress.handle_v1(&body).await.unwrap();

    let jobs = h.store.jobs().await;
    assert_eq!(jobs[0].action, Action::Sell);
    assert_eq!(jobs[0].percentage_override(), None);
}

#[tokio::test]
async fn test_v1_requires_its_own_passphrase() {
    let h = harness();
    let body = serde_json::to_vec(&json!({
        "passphrase": common::PASSPHRASE_V2,
        "ticker": "SPY",
        "action": "buy"
    }))
    .unwrap();

    let err = h.ingress.handle_v1(&body).await.unwrap_err();
    assert!(matches!(err, IngressError::BadPassphrase));
}

#[tokio::test]
async fn test_bar_time_seconds_and_millis_dedup_to_same_key() {
    let h = harness();
    h.store.put_strategy(active_strategy("momo")).await;

    let mut body: serde_json::Value = serde_json::from_slice(&buy_webhook_body()).unwrap();
    body["bar_time"] = json!(1727357550i64); // seconds form of the same bar
    let first = h
        .ingress
        .handle_v2(&serde_json::to_vec(&body).unwrap(), None)
        .await
        .unwrap();
    assert!(matches!(first, IngressOutcome::Queued { .. }));

    // Millisecond form arrives next; coercion makes the keys collide.
    let second = h.ingress.handle_v2(&buy_webhook_body(), None).await.unwrap();
    assert!(matches!(second, IngressOutcome::DupIgnored { .. }));
}
