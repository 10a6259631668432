//! Alpaca wire types. Monetary fields arrive as strings; data-API prices
//! arrive as JSON numbers.

use crate::domain::types::OrderRequest;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Deserialize)]
pub struct AccountWire {
    pub equity: String,
    pub cash: String,
    pub last_equity: String,
}

#[derive(Debug, Deserialize)]
pub struct PositionWire {
    pub symbol: String,
    pub qty: String,
    #[serde(default)]
    pub avg_entry_price: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OrderWire {
    pub id: String,
    pub symbol: String,
    pub side: String,
    #[serde(default)]
    pub qty: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OrderAckWire {
    pub id: String,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct TakeProfitWire {
    pub limit_price: String,
}

#[derive(Debug, Serialize)]
pub struct StopLossWire {
    pub stop_price: String,
}

#[derive(Debug, Serialize)]
pub struct OrderRequestWire {
    pub symbol: String,
    pub qty: String,
    pub side: String,
    #[serde(rename = "type")]
    pub order_type: String,
    pub time_in_force: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_order_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub take_profit: Option<TakeProfitWire>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_loss: Option<StopLossWire>,
}

impl From<&OrderRequest> for OrderRequestWire {
    fn from(req: &OrderRequest) -> Self {
        let bracket = req.is_bracket();
        Self {
            symbol: req.symbol.clone(),
            qty: req.qty.clone(),
            side: req.side.as_side().to_string(),
            order_type: req.order_type.as_str().to_string(),
            time_in_force: req.time_in_force.as_str().to_string(),
            limit_price: req.limit_price.map(|p| p.to_string()),
            stop_price: req.stop_price.map(|p| p.to_string()),
            client_order_id: req.client_order_id.clone(),
            order_class: bracket.then(|| "bracket".to_string()),
            take_profit: req.take_profit.filter(|_| bracket).map(|p| TakeProfitWire {
                limit_price: p.to_string(),
            }),
            stop_loss: req.stop_loss.filter(|_| bracket).map(|p| StopLossWire {
                stop_price: p.to_string(),
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LatestTradeWire {
    pub trade: TradePriceWire,
}

#[derive(Debug, Deserialize)]
pub struct TradePriceWire {
    #[serde(rename = "p")]
    pub price: f64,
}

#[derive(Debug, Deserialize)]
pub struct CryptoQuotesWire {
    pub quotes: HashMap<String, CryptoQuoteWire>,
}

#[derive(Debug, Deserialize)]
pub struct CryptoQuoteWire {
    #[serde(rename = "bp")]
    pub bid: f64,
    #[serde(rename = "ap")]
    pub ask: f64,
}
