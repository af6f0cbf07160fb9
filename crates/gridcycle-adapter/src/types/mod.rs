/*
[INPUT]:  Venue schema definitions
[OUTPUT]: Typed request/response/enum modules
[POS]:    Data layer - module wiring
[UPDATE]: When new type groups are added
*/

pub mod enums;
pub mod requests;
pub mod responses;

pub use enums::{OrderStatus, OrderType, Side, TimeInForce};
pub use requests::NewOrderRequest;
pub use responses::{AssetBalance, CancelAck, ListenKey, OrderAck, OrderDetail, TickerPrice};
