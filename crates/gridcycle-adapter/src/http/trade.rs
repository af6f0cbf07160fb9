/*
[INPUT]:  Order requests with signed query parameters
[OUTPUT]: Order acknowledgements, cancellations and snapshots
[POS]:    HTTP layer - trading endpoints (require signature)
[UPDATE]: When adding new trading endpoints or changing order flow
*/

use reqwest::Method;

use crate::http::client::BinanceClient;
use crate::http::error::Result;
use crate::types::{CancelAck, NewOrderRequest, OrderAck, OrderDetail};

impl BinanceClient {
    /// Place a new order.
    ///
    /// POST /api/v3/order
    pub async fn new_order(&self, req: NewOrderRequest) -> Result<OrderAck> {
        let raw = self
            .signed_request_raw(Method::POST, "/api/v3/order", req.to_params())
            .await?;

        let mut ack: OrderAck = serde_json::from_value(raw.clone())?;
        ack.raw = raw;
        Ok(ack)
    }

    /// Cancel an existing order.
    ///
    /// DELETE /api/v3/order
    ///
    /// Returns `None` when the venue no longer knows the order (already
    /// filled, cancelled or expired) so callers can treat the cancel as done.
    pub async fn cancel_order(&self, symbol: &str, order_id: i64) -> Result<Option<CancelAck>> {
        let params = vec![
            ("symbol".to_string(), symbol.to_string()),
            ("orderId".to_string(), order_id.to_string()),
        ];

        match self
            .signed_request_raw(Method::DELETE, "/api/v3/order", params)
            .await
        {
            Ok(raw) => Ok(Some(serde_json::from_value(raw)?)),
            Err(err) if err.is_unknown_order() => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Query a single order.
    ///
    /// GET /api/v3/order
    ///
    /// Returns `None` on an unknown order, mirroring `cancel_order`.
    pub async fn get_order(&self, symbol: &str, order_id: i64) -> Result<Option<OrderDetail>> {
        let params = vec![
            ("symbol".to_string(), symbol.to_string()),
            ("orderId".to_string(), order_id.to_string()),
        ];

        match self
            .signed_request_raw(Method::GET, "/api/v3/order", params)
            .await
        {
            Ok(raw) => {
                let mut detail: OrderDetail = serde_json::from_value(raw.clone())?;
                detail.raw = raw;
                Ok(Some(detail))
            }
            Err(err) if err.is_unknown_order() => Ok(None),
            Err(err) => Err(err),
        }
    }
}
