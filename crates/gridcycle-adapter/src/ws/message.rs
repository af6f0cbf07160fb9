/*
[INPUT]:  Raw websocket frame text
[OUTPUT]: Parsed stream events plus the raw payload for auditing
[POS]:    WebSocket layer - message parsing and validation
[UPDATE]: When new event types or frame formats are handled
*/

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::enums::{OrderStatus, Side};

/// One decoded frame from either stream, dispatched on the `e` field.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "e")]
pub enum StreamEvent {
    #[serde(rename = "executionReport")]
    ExecutionReport(ExecutionReport),
    #[serde(rename = "24hrTicker")]
    Ticker(TickerEvent),
    #[serde(other)]
    Other,
}

/// Order state change pushed over the user-data stream.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExecutionReport {
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "S")]
    pub side: Side,
    #[serde(rename = "i")]
    pub order_id: i64,
    #[serde(rename = "X")]
    pub status: OrderStatus,
    #[serde(rename = "z", with = "rust_decimal::serde::str")]
    pub cumulative_filled_qty: Decimal,
}

/// Rolling-window ticker for one symbol; only the last price is consumed.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TickerEvent {
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "c", with = "rust_decimal::serde::str")]
    pub last_price: Decimal,
}

/// What the reader task hands to subscribers.
#[derive(Debug, Clone)]
pub enum StreamMessage {
    /// Emitted after every successful (re)connect, before any events.
    Connected,
    /// A decoded event together with its raw payload.
    Event {
        event: StreamEvent,
        raw: serde_json::Value,
    },
}

/// Decode one frame. Combined-stream frames arrive wrapped as
/// `{"stream": "...", "data": {...}}`; raw-stream frames are the payload
/// itself. Unknown event types decode to `StreamEvent::Other`.
pub fn decode_frame(text: &str) -> Option<StreamMessage> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;

    let payload = match value.get("data") {
        Some(data) if value.get("stream").is_some() => data.clone(),
        _ => value,
    };

    let event = serde_json::from_value::<StreamEvent>(payload.clone()).unwrap_or(StreamEvent::Other);
    Some(StreamMessage::Event { event, raw: payload })
}
