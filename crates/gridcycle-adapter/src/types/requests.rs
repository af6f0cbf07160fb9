/*
[INPUT]:  Binance spot API schema and serde requirements
[OUTPUT]: Typed Rust request structs with serialization support
[POS]:    Data layer - type definitions for API communication
[UPDATE]: When the venue schema changes or new types are added
*/

use rust_decimal::Decimal;

use super::enums::{OrderType, Side, TimeInForce};

/// Parameters for `POST /api/v3/order`.
///
/// Serialized into signed query parameters rather than a JSON body, which is
/// why this carries an explicit `to_params` instead of deriving `Serialize`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOrderRequest {
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub time_in_force: TimeInForce,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
}

impl NewOrderRequest {
    /// A GTC limit order, the only shape the grid engine places.
    pub fn limit(symbol: impl Into<String>, side: Side, quantity: Decimal, price: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Limit,
            time_in_force: TimeInForce::Gtc,
            quantity,
            price: Some(price),
        }
    }

    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params = vec![
            ("symbol".to_string(), self.symbol.clone()),
            ("side".to_string(), self.side.as_str().to_string()),
            ("type".to_string(), self.order_type.as_str().to_string()),
            ("timeInForce".to_string(), self.time_in_force.as_str().to_string()),
            ("quantity".to_string(), self.quantity.to_string()),
        ];
        if let Some(price) = self.price {
            params.push(("price".to_string(), price.to_string()));
        }
        params
    }
}
