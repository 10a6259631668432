//! Alpaca REST implementation of the broker contract.

use super::wire::{
    AccountWire, CryptoQuotesWire, LatestTradeWire, OrderAckWire, OrderRequestWire, OrderWire,
    PositionWire,
};
use crate::config::AlpacaCredentials;
use crate::domain::errors::BrokerError;
use crate::domain::ports::{
    BrokerAccount, BrokerClient, BrokerPosition, CryptoQuote, OpenOrder, OrderAck,
};
use crate::domain::types::{Action, OrderRequest};
use crate::infrastructure::core::http_client_factory::{HttpClientFactory, build_url_with_query};
use async_trait::async_trait;
use reqwest_middleware::ClientWithMiddleware;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use std::str::FromStr;
use tracing::info;

const KEY_HEADER: &str = "APCA-API-KEY-ID";
const SECRET_HEADER: &str = "APCA-API-SECRET-KEY";

pub struct AlpacaBrokerClient {
    read_client: ClientWithMiddleware,
    submit_client: ClientWithMiddleware,
    key_id: String,
    secret_key: String,
    base_url: String,
    data_url: String,
}

impl AlpacaBrokerClient {
    pub fn new(creds: AlpacaCredentials) -> Self {
        Self {
            read_client: HttpClientFactory::create_client(),
            submit_client: HttpClientFactory::create_submit_client(),
            key_id: creds.key_id,
            secret_key: creds.secret_key,
            base_url: creds.base_url,
            data_url: creds.data_url,
        }
    }

    fn auth(
        &self,
        builder: reqwest_middleware::RequestBuilder,
    ) -> reqwest_middleware::RequestBuilder {
        builder
            .header(KEY_HEADER, self.key_id.as_str())
            .header(SECRET_HEADER, self.secret_key.as_str())
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, BrokerError> {
        let response = self
            .auth(self.read_client.get(url))
            .send()
            .await
            .map_err(transport)?;

        if !response.status().is_success() {
            return Err(response_error(response).await);
        }
        response
            .json::<T>()
            .await
            .map_err(|e| BrokerError::Transport(format!("decode failed: {}", e)))
    }
}

#[async_trait]
impl BrokerClient for AlpacaBrokerClient {
    async fn get_account(&self) -> Result<BrokerAccount, BrokerError> {
        let wire: AccountWire = self.get_json(&format!("{}/v2/account", self.base_url)).await?;
        Ok(BrokerAccount {
            equity: parse_decimal(&wire.equity)?,
            cash: parse_decimal(&wire.cash)?,
            last_equity: parse_decimal(&wire.last_equity)?,
        })
    }

    async fn get_open_position(
        &self,
        symbol: &str,
    ) -> Result<Option<BrokerPosition>, BrokerError> {
        let url = format!("{}/v2/positions/{}", self.base_url, symbol);
        let response = self
            .auth(self.read_client.get(&url))
            .send()
            .await
            .map_err(transport)?;

        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(response_error(response).await);
        }

        let wire: PositionWire = response
            .json()
            .await
            .map_err(|e| BrokerError::Transport(format!("decode failed: {}", e)))?;
        Ok(Some(position_from_wire(wire)?))
    }

    async fn get_all_positions(&self) -> Result<Vec<BrokerPosition>, BrokerError> {
        let wires: Vec<PositionWire> = self
            .get_json(&format!("{}/v2/positions", self.base_url))
            .await?;
        wires.into_iter().map(position_from_wire).collect()
    }

    async fn get_latest_trade(&self, symbol: &str) -> Result<Decimal, BrokerError> {
        let url = format!("{}/v2/stocks/{}/trades/latest", self.data_url, symbol);
        let wire: LatestTradeWire = self.get_json(&url).await?;
        Decimal::from_f64(wire.trade.price)
            .ok_or_else(|| BrokerError::Transport(format!("bad trade price {}", wire.trade.price)))
    }

    async fn get_latest_crypto_quote(&self, pair: &str) -> Result<CryptoQuote, BrokerError> {
        let url = build_url_with_query(
            &format!("{}/v1beta3/crypto/us/latest/quotes", self.data_url),
            &[("symbols", pair)],
        );
        let wire: CryptoQuotesWire = self.get_json(&url).await?;
        let quote = wire.quotes.get(pair).ok_or_else(|| BrokerError::Rejected {
            status: 404,
            message: format!("no quote for {}", pair),
        })?;

        Ok(CryptoQuote {
            bid: Decimal::from_f64(quote.bid).unwrap_or(Decimal::ZERO),
            ask: Decimal::from_f64(quote.ask).unwrap_or(Decimal::ZERO),
        })
    }

    async fn list_open_orders(
        &self,
        symbol: &str,
        side: Option<Action>,
    ) -> Result<Vec<OpenOrder>, BrokerError> {
        let url = build_url_with_query(
            &format!("{}/v2/orders", self.base_url),
            &[("status", "open"), ("symbols", symbol)],
        );
        let wires: Vec<OrderWire> = self.get_json(&url).await?;

        Ok(wires
            .into_iter()
            .filter_map(|w| {
                let order_side = Action::from_str(&w.side).ok()?;
                if side.is_some_and(|wanted| wanted != order_side) {
                    return None;
                }
                Some(OpenOrder {
                    id: w.id,
                    symbol: w.symbol,
                    side: order_side,
                    qty: w
                        .qty
                        .as_deref()
                        .and_then(|q| Decimal::from_str(q).ok())
                        .unwrap_or(Decimal::ZERO),
                })
            })
            .collect())
    }

    async fn cancel_order(&self, order_id: &str) -> Result<(), BrokerError> {
        let url = format!("{}/v2/orders/{}", self.base_url, order_id);
        let response = self
            .auth(self.submit_client.delete(&url))
            .send()
            .await
            .map_err(transport)?;

        // Already filled or expired; nothing left to cancel.
        if response.status().as_u16() == 404 {
            info!(order_id, "cancel target not found, treating as cancelled");
            return Ok(());
        }
        if !response.status().is_success() {
            return Err(response_error(response).await);
        }
        Ok(())
    }

    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderAck, BrokerError> {
        let wire = OrderRequestWire::from(request);
        let response = self
            .auth(self.submit_client.post(format!("{}/v2/orders", self.base_url)))
            .json(&wire)
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if status.is_success() {
            let ack: OrderAckWire = response
                .json()
                .await
                .map_err(|e| BrokerError::Transport(format!("decode failed: {}", e)))?;
            return Ok(OrderAck {
                id: ack.id,
                status: ack.status,
            });
        }

        let message = response.text().await.unwrap_or_default();
        if message.contains("client_order_id")
            && (message.contains("unique") || message.contains("already"))
        {
            return Err(BrokerError::AlreadyExists);
        }
        if status.is_client_error() {
            return Err(BrokerError::Rejected {
                status: status.as_u16(),
                message,
            });
        }
        Err(BrokerError::Transport(format!("{}: {}", status, message)))
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }
}

fn position_from_wire(wire: PositionWire) -> Result<BrokerPosition, BrokerError> {
    Ok(BrokerPosition {
        qty: parse_decimal(&wire.qty)?,
        avg_entry_price: wire
            .avg_entry_price
            .as_deref()
            .and_then(|p| Decimal::from_str(p).ok()),
        symbol: wire.symbol,
    })
}

fn parse_decimal(s: &str) -> Result<Decimal, BrokerError> {
    Decimal::from_str(s).map_err(|e| BrokerError::Transport(format!("bad decimal '{}': {}", s, e)))
}

fn transport(err: reqwest_middleware::Error) -> BrokerError {
    BrokerError::Transport(err.to_string())
}

async fn response_error(response: reqwest::Response) -> BrokerError {
    let status = response.status();
    let message = response.text().await.unwrap_or_default();
    if status.is_client_error() {
        BrokerError::Rejected {
            status: status.as_u16(),
            message,
        }
    } else {
        BrokerError::Transport(format!("{}: {}", status, message))
    }
}
