/*
[INPUT]:  Symbol identifiers
[OUTPUT]: Market data (last traded price)
[POS]:    HTTP layer - public market data endpoints (no auth required)
[UPDATE]: When adding new public endpoints
*/

use rust_decimal::Decimal;

use crate::http::client::BinanceClient;
use crate::http::error::Result;
use crate::types::TickerPrice;

impl BinanceClient {
    /// Last traded price for a symbol.
    ///
    /// GET /api/v3/ticker/price
    pub async fn ticker_price(&self, symbol: &str) -> Result<Decimal> {
        let params = vec![("symbol".to_string(), symbol.to_string())];
        let ticker: TickerPrice = self.public_get("/api/v3/ticker/price", &params).await?;
        Ok(ticker.price)
    }
}
