//! Outbound ports: the broker contract the pipeline consumes.

use crate::domain::errors::BrokerError;
use crate::domain::types::{Action, OrderRequest};
use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;

/// Account snapshot from the broker.
#[derive(Debug, Clone)]
pub struct BrokerAccount {
    pub equity: Decimal,
    pub cash: Decimal,
    pub last_equity: Decimal,
}

/// An open position; `qty` is negative for shorts.
#[derive(Debug, Clone)]
pub struct BrokerPosition {
    pub symbol: String,
    pub qty: Decimal,
    pub avg_entry_price: Option<Decimal>,
}

/// A resting order as listed by the broker.
#[derive(Debug, Clone)]
pub struct OpenOrder {
    pub id: String,
    pub symbol: String,
    pub side: Action,
    pub qty: Decimal,
}

#[derive(Debug, Clone, Copy)]
pub struct CryptoQuote {
    pub bid: Decimal,
    pub ask: Decimal,
}

impl CryptoQuote {
    pub fn mid(&self) -> Decimal {
        (self.bid + self.ask) / Decimal::TWO
    }
}

/// Broker acknowledgement of a submitted order.
#[derive(Debug, Clone)]
pub struct OrderAck {
    pub id: String,
    pub status: String,
}

/// Narrow broker contract: account state, positions, quotes, and order
/// submission/cancellation. One instance per subaccount alias.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    async fn get_account(&self) -> Result<BrokerAccount, BrokerError>;

    /// `Ok(None)` when no position exists for the symbol.
    async fn get_open_position(&self, symbol: &str)
        -> Result<Option<BrokerPosition>, BrokerError>;

    async fn get_all_positions(&self) -> Result<Vec<BrokerPosition>, BrokerError>;

    /// Latest trade price for an equity symbol.
    async fn get_latest_trade(&self, symbol: &str) -> Result<Decimal, BrokerError>;

    /// Latest quote for a crypto data pair (e.g. `ETH/USD`).
    async fn get_latest_crypto_quote(&self, pair: &str) -> Result<CryptoQuote, BrokerError>;

    async fn list_open_orders(
        &self,
        symbol: &str,
        side: Option<Action>,
    ) -> Result<Vec<OpenOrder>, BrokerError>;

    async fn cancel_order(&self, order_id: &str) -> Result<(), BrokerError>;

    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderAck, BrokerError>;

    /// Trading API base URL, used by the paper/live mode guard.
    fn base_url(&self) -> &str;
}

/// Resolves and caches one broker client per subaccount alias.
#[async_trait]
pub trait BrokerProvider: Send + Sync {
    async fn broker_for(&self, alias: &str) -> Result<Arc<dyn BrokerClient>>;
}
