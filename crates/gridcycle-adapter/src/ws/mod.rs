/*
[INPUT]:  Websocket stream URLs and frames
[OUTPUT]: Stream reader tasks and decoded messages
[POS]:    WebSocket layer - module wiring
[UPDATE]: When adding new streams or message types
*/

pub mod client;
pub mod message;

pub use client::BinanceStreams;
pub use message::{ExecutionReport, StreamEvent, StreamMessage, TickerEvent, decode_frame};
