//! Shared test fixtures: a scripted mock broker, a fixed clock, and a
//! fully-wired pipeline harness over the in-memory store.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use tradegate::application::ingress::IngressHandler;
use tradegate::application::risk_guard::RiskGuard;
use tradegate::application::worker::Worker;
use tradegate::config::{TradingMode, WebhookConfig};
use tradegate::domain::clock::Clock;
use tradegate::domain::errors::BrokerError;
use tradegate::domain::ports::{
    BrokerAccount, BrokerClient, BrokerPosition, BrokerProvider, CryptoQuote, OpenOrder, OrderAck,
};
use tradegate::domain::repositories::QueueStore;
use tradegate::domain::types::{
    Action, JobStatus, OrderRequest, QueueJob, StrategyConfig, StrategyStatus, TimeInForce,
};
use tradegate::infrastructure::InMemoryQueueStore;

pub const PASSPHRASE_V2: &str = "A_16_char_pass!!";
pub const PASSPHRASE_V1: &str = "legacy-secret";

/// Thursday 2024-09-26 14:00 UTC; inside US regular trading hours.
pub fn market_open_instant() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 9, 26, 14, 0, 0).unwrap()
}

/// Saturday 2024-09-28 02:00 UTC; market closed.
pub fn weekend_instant() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 9, 28, 2, 0, 0).unwrap()
}

pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn at(now: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(now),
        })
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap() = now;
    }

    pub fn advance(&self, duration: chrono::Duration) {
        let mut guard = self.now.lock().unwrap();
        *guard += duration;
    }
}

impl Clock for FixedClock {
    fn now_utc(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

#[derive(Default)]
struct MockBrokerState {
    equity: Decimal,
    cash: Decimal,
    positions: Vec<BrokerPosition>,
    open_orders: Vec<OpenOrder>,
    submit_results: VecDeque<Result<OrderAck, BrokerError>>,
    submissions: Vec<OrderRequest>,
    cancelled: Vec<String>,
    last_trade: Option<Decimal>,
}

/// Scripted broker double. Submissions succeed with a generated ack unless
/// results were queued with `push_submit_result`.
pub struct MockBroker {
    base_url: String,
    state: Mutex<MockBrokerState>,
}

impl MockBroker {
    pub fn paper() -> Arc<Self> {
        Self::with_base_url("https://paper-api.alpaca.markets")
    }

    pub fn with_base_url(base_url: &str) -> Arc<Self> {
        Arc::new(Self {
            base_url: base_url.to_string(),
            state: Mutex::new(MockBrokerState {
                equity: dec!(10000),
                cash: dec!(10000),
                ..MockBrokerState::default()
            }),
        })
    }

    pub fn set_equity(&self, equity: Decimal) {
        self.state.lock().unwrap().equity = equity;
    }

    pub fn set_cash(&self, cash: Decimal) {
        self.state.lock().unwrap().cash = cash;
    }

    pub fn add_position(&self, symbol: &str, qty: Decimal) {
        self.state.lock().unwrap().positions.push(BrokerPosition {
            symbol: symbol.to_string(),
            qty,
            avg_entry_price: None,
        });
    }

    pub fn add_open_order(&self, id: &str, symbol: &str, side: Action, qty: Decimal) {
        self.state.lock().unwrap().open_orders.push(OpenOrder {
            id: id.to_string(),
            symbol: symbol.to_string(),
            side,
            qty,
        });
    }

    pub fn push_submit_result(&self, result: Result<OrderAck, BrokerError>) {
        self.state.lock().unwrap().submit_results.push_back(result);
    }

    pub fn push_transport_errors(&self, count: usize) {
        let mut state = self.state.lock().unwrap();
        for _ in 0..count {
            state
                .submit_results
                .push_back(Err(BrokerError::Transport("503 service unavailable".into())));
        }
    }

    pub fn submissions(&self) -> Vec<OrderRequest> {
        self.state.lock().unwrap().submissions.clone()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.state.lock().unwrap().cancelled.clone()
    }
}

#[async_trait]
impl BrokerClient for MockBroker {
    async fn get_account(&self) -> Result<BrokerAccount, BrokerError> {
        let state = self.state.lock().unwrap();
        Ok(BrokerAccount {
            equity: state.equity,
            cash: state.cash,
            last_equity: state.equity,
        })
    }

    async fn get_open_position(
        &self,
        symbol: &str,
    ) -> Result<Option<BrokerPosition>, BrokerError> {
        let state = self.state.lock().unwrap();
        Ok(state.positions.iter().find(|p| p.symbol == symbol).cloned())
    }

    async fn get_all_positions(&self) -> Result<Vec<BrokerPosition>, BrokerError> {
        Ok(self.state.lock().unwrap().positions.clone())
    }

    async fn get_latest_trade(&self, _symbol: &str) -> Result<Decimal, BrokerError> {
        self.state
            .lock()
            .unwrap()
            .last_trade
            .ok_or_else(|| BrokerError::Rejected {
                status: 404,
                message: "no trade data".into(),
            })
    }

    async fn get_latest_crypto_quote(&self, _pair: &str) -> Result<CryptoQuote, BrokerError> {
        Ok(CryptoQuote {
            bid: dec!(2999),
            ask: dec!(3001),
        })
    }

    async fn list_open_orders(
        &self,
        symbol: &str,
        side: Option<Action>,
    ) -> Result<Vec<OpenOrder>, BrokerError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .open_orders
            .iter()
            .filter(|o| o.symbol == symbol && side.map_or(true, |s| s == o.side))
            .cloned()
            .collect())
    }

    async fn cancel_order(&self, order_id: &str) -> Result<(), BrokerError> {
        let mut state = self.state.lock().unwrap();
        state.cancelled.push(order_id.to_string());
        state.open_orders.retain(|o| o.id != order_id);
        Ok(())
    }

    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderAck, BrokerError> {
        let mut state = self.state.lock().unwrap();
        state.submissions.push(request.clone());
        match state.submit_results.pop_front() {
            Some(result) => result,
            None => Ok(OrderAck {
                id: Uuid::new_v4().to_string(),
                status: "accepted".to_string(),
            }),
        }
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }
}

pub struct MockBrokerProvider {
    broker: Arc<MockBroker>,
}

impl MockBrokerProvider {
    pub fn new(broker: Arc<MockBroker>) -> Arc<Self> {
        Arc::new(Self { broker })
    }
}

#[async_trait]
impl BrokerProvider for MockBrokerProvider {
    async fn broker_for(&self, _alias: &str) -> anyhow::Result<Arc<dyn BrokerClient>> {
        Ok(self.broker.clone())
    }
}

/// Fully wired pipeline over the in-memory store. The risk guard runs with
/// a zero equity-cache TTL so tests observe equity changes immediately.
pub struct Harness {
    pub store: Arc<InMemoryQueueStore>,
    pub broker: Arc<MockBroker>,
    pub clock: Arc<FixedClock>,
    pub ingress: IngressHandler,
    pub worker: Worker,
}

pub fn harness() -> Harness {
    harness_with_mode(TradingMode::Paper)
}

pub fn harness_with_mode(trading_mode: TradingMode) -> Harness {
    let store = Arc::new(InMemoryQueueStore::new());
    let broker = MockBroker::paper();
    let clock = FixedClock::at(market_open_instant());

    let risk_guard = Arc::new(RiskGuard::with_ttl(
        store.clone(),
        clock.clone(),
        false,
        Duration::ZERO,
    ));

    let worker = Worker::new(
        store.clone(),
        MockBrokerProvider::new(broker.clone()),
        risk_guard,
        clock.clone(),
        trading_mode,
        Duration::from_secs(2),
        20,
    );

    let ingress = IngressHandler::new(
        store.clone(),
        clock.clone(),
        WebhookConfig {
            passphrase_v2: PASSPHRASE_V2.to_string(),
            passphrase_v1: Some(PASSPHRASE_V1.to_string()),
            header_token_v2: None,
            path_token: None,
        },
        None,
    );

    Harness {
        store,
        broker,
        clock,
        ingress,
        worker,
    }
}

/// An active strategy row matching the momentum fixture payloads.
pub fn active_strategy(name: &str) -> StrategyConfig {
    StrategyConfig {
        name: name.to_string(),
        status: StrategyStatus::Active,
        default_risk_pct: dec!(0.005),
        trail_atr_mult: dec!(2.5),
        r_multiple_tp: dec!(2.0),
        max_positions: 5,
        allow_short: false,
        time_in_force: TimeInForce::Day,
    }
}

/// The literal happy-path BUY payload from the webhook contract.
pub fn buy_webhook_body() -> Vec<u8> {
    serde_json::to_vec(&json!({
        "passphrase": PASSPHRASE_V2,
        "strategy": "momo",
        "ticker": "AAPL",
        "timeframe": "5",
        "action": "buy",
        "bar_time": 1727357550000i64,
        "price": 180.0,
        "atr": 1.5,
        "trail_atr_mult": 2.0,
        "risk_pct": 0.01
    }))
    .unwrap()
}

/// Insert a ready job directly, bypassing ingress.
pub async fn insert_job(
    store: &InMemoryQueueStore,
    action: Action,
    ticker: &str,
    raw: serde_json::Value,
) -> QueueJob {
    let now = market_open_instant();
    let job = QueueJob {
        id: Uuid::new_v4(),
        status: JobStatus::Ready,
        reason: None,
        strategy: "momo".to_string(),
        ticker: ticker.to_string(),
        timeframe: "5".to_string(),
        action,
        price: None,
        atr: None,
        risk_pct: None,
        trail_atr_mult: None,
        r_multiple_tp: None,
        max_slots: None,
        buffer_ratio: None,
        subaccount: "default".to_string(),
        bar_time: now,
        raw,
        retry_count: 0,
        next_attempt_at: None,
        last_error: None,
        created_at: now,
        updated_at: now,
    };
    store.job_insert_ready(&job).await.unwrap();
    job
}
