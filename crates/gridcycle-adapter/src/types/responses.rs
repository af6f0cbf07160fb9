/*
[INPUT]:  Binance spot API schema and serde requirements
[OUTPUT]: Typed Rust response structs with deserialization support
[POS]:    Data layer - type definitions for API communication
[UPDATE]: When the venue schema changes or new types are added
*/

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::enums::{OrderStatus, Side};

/// `GET /api/v3/ticker/price` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickerPrice {
    pub symbol: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
}

/// Acknowledgement for `POST /api/v3/order`.
///
/// The raw payload is retained alongside the typed fields so callers can keep
/// an audit copy of exactly what the exchange echoed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderAck {
    pub symbol: String,
    pub order_id: i64,
    pub status: OrderStatus,
    #[serde(with = "rust_decimal::serde::str", default)]
    pub executed_qty: Decimal,
    #[serde(skip)]
    pub raw: serde_json::Value,
}

/// Acknowledgement for `DELETE /api/v3/order`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelAck {
    pub symbol: String,
    pub order_id: i64,
    pub status: OrderStatus,
    #[serde(with = "rust_decimal::serde::str", default)]
    pub executed_qty: Decimal,
}

/// Full order snapshot from `GET /api/v3/order`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDetail {
    pub symbol: String,
    pub order_id: i64,
    pub side: Side,
    pub status: OrderStatus,
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub orig_qty: Decimal,
    #[serde(with = "rust_decimal::serde::str", default)]
    pub executed_qty: Decimal,
    #[serde(skip)]
    pub raw: serde_json::Value,
}

/// `POST /api/v3/userDataStream` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenKey {
    pub listen_key: String,
}

/// One asset balance from `GET /api/v3/account`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetBalance {
    pub asset: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub free: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub locked: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct AccountInfo {
    pub balances: Vec<AssetBalance>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn order_ack_decodes_binance_payload() {
        let payload = serde_json::json!({
            "symbol": "BTCUSDT",
            "orderId": 28,
            "orderListId": -1,
            "clientOrderId": "6gCrw2kRUAF9CvJDGP16IP",
            "transactTime": 1507725176595u64,
            "price": "24750.00",
            "origQty": "0.00800000",
            "executedQty": "0.00000000",
            "status": "NEW",
            "timeInForce": "GTC",
            "type": "LIMIT",
            "side": "BUY"
        });

        let ack: OrderAck = serde_json::from_value(payload).expect("decode ack");
        assert_eq!(ack.order_id, 28);
        assert_eq!(ack.status, OrderStatus::New);
        assert_eq!(ack.executed_qty, Decimal::ZERO);
    }

    #[test]
    fn ticker_price_decodes_string_price() {
        let ticker: TickerPrice =
            serde_json::from_str(r#"{"symbol":"ETHUSDT","price":"1845.12000000"}"#).unwrap();
        assert_eq!(ticker.price, Decimal::from_str("1845.12").unwrap());
    }
}
