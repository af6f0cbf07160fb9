/*
[INPUT]:  Engine-side order intents
[OUTPUT]: Exchange acknowledgements through a swappable capability trait
[POS]:    Gateway seam - one implementation per venue, plus test doubles
[UPDATE]: When the state machine needs new exchange operations
*/

use async_trait::async_trait;
use gridcycle_adapter::{BinanceClient, NewOrderRequest, OrderStatus, Side};
use rust_decimal::Decimal;

use crate::error::Result;

/// Exchange acknowledgement of a freshly placed order.
#[derive(Debug, Clone)]
pub struct PlacedOrder {
    pub order_id: i64,
    pub status: OrderStatus,
    pub executed_qty: Decimal,
    pub raw: serde_json::Value,
}

/// Result of a cancel that actually reached a live order.
#[derive(Debug, Clone)]
pub struct CancelledOrder {
    pub status: OrderStatus,
    pub executed_qty: Decimal,
}

/// Authoritative snapshot of one exchange-side order.
#[derive(Debug, Clone)]
pub struct OrderSnapshot {
    pub status: OrderStatus,
    pub executed_qty: Decimal,
    pub raw: serde_json::Value,
}

/// The exchange capability one bot trades through.
///
/// Credentials are implicit per instance. Two implementations exist: the
/// real venue client and in-memory doubles in tests.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// Last traded price for a symbol.
    async fn ticker_price(&self, symbol: &str) -> Result<Decimal>;

    /// Place a limit GTC order.
    async fn place_limit_order(
        &self,
        symbol: &str,
        side: Side,
        quantity: Decimal,
        price: Decimal,
    ) -> Result<PlacedOrder>;

    /// Cancel an order. `None` means the venue already considers it
    /// terminal (unknown order), which callers fold into success.
    async fn cancel_order(&self, symbol: &str, order_id: i64) -> Result<Option<CancelledOrder>>;

    /// Query one order; `None` when the venue no longer knows it.
    async fn get_order(&self, symbol: &str, order_id: i64) -> Result<Option<OrderSnapshot>>;

    /// Obtain a user-data stream token.
    async fn new_listen_key(&self) -> Result<String>;

    /// Renew a user-data stream token before the venue expires it.
    async fn keepalive_listen_key(&self, listen_key: &str) -> Result<()>;
}

#[async_trait]
impl ExchangeGateway for BinanceClient {
    async fn ticker_price(&self, symbol: &str) -> Result<Decimal> {
        Ok(BinanceClient::ticker_price(self, symbol).await?)
    }

    async fn place_limit_order(
        &self,
        symbol: &str,
        side: Side,
        quantity: Decimal,
        price: Decimal,
    ) -> Result<PlacedOrder> {
        let ack = self
            .new_order(NewOrderRequest::limit(symbol, side, quantity, price))
            .await?;
        Ok(PlacedOrder {
            order_id: ack.order_id,
            status: ack.status,
            executed_qty: ack.executed_qty,
            raw: ack.raw,
        })
    }

    async fn cancel_order(&self, symbol: &str, order_id: i64) -> Result<Option<CancelledOrder>> {
        let ack = BinanceClient::cancel_order(self, symbol, order_id).await?;
        Ok(ack.map(|ack| CancelledOrder {
            status: ack.status,
            executed_qty: ack.executed_qty,
        }))
    }

    async fn get_order(&self, symbol: &str, order_id: i64) -> Result<Option<OrderSnapshot>> {
        let detail = BinanceClient::get_order(self, symbol, order_id).await?;
        Ok(detail.map(|detail| OrderSnapshot {
            status: detail.status,
            executed_qty: detail.executed_qty,
            raw: detail.raw,
        }))
    }

    async fn new_listen_key(&self) -> Result<String> {
        Ok(BinanceClient::new_listen_key(self).await?)
    }

    async fn keepalive_listen_key(&self, listen_key: &str) -> Result<()> {
        Ok(BinanceClient::keepalive_listen_key(self, listen_key).await?)
    }
}
