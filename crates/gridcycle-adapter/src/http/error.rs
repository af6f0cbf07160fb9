/*
[INPUT]:  Error sources (HTTP, venue error codes, serialization, websocket)
[OUTPUT]: Structured error types with retry and classification hints
[POS]:    Error handling layer - unified error types for the adapter
[UPDATE]: When new error sources or venue error codes are handled
*/

use reqwest::StatusCode;
use thiserror::Error;

/// Main error type for the Binance adapter.
#[derive(Error, Debug)]
pub enum BinanceError {
    /// HTTP transport failed (connect, TLS, body read).
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The venue rejected the request parameters (filters, notional, precision).
    #[error("order rejected by exchange (code {code}): {message}")]
    Validation { code: i64, message: String },

    /// Cancel or query referenced an order the venue no longer knows.
    #[error("unknown order (code {code}): {message}")]
    UnknownOrder { code: i64, message: String },

    /// Credential rejection. Never retried.
    #[error("authentication failed (code {code}): {message}")]
    Auth { code: i64, message: String },

    /// Any other venue-side error response.
    #[error("API error (code {code}): {message}")]
    Api { code: i64, message: String },

    /// Non-2xx status without a decodable venue error body.
    #[error("HTTP status {status}: {body}")]
    Status { status: StatusCode, body: String },

    /// The venue asked us to back off.
    #[error("rate limit exceeded (status {status})")]
    RateLimit { status: StatusCode },

    #[error("request timed out after {millis}ms")]
    Timeout { millis: u64 },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid URL: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("websocket error: {0}")]
    WebSocket(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

// Venue error codes the engine cares about. Binance returns them in the JSON
// body as {"code": <i64>, "msg": <string>} with a 4xx status.
const CODE_UNKNOWN_ORDER: i64 = -2011;
const CODE_ORDER_NOT_FOUND: i64 = -2013;
const CODE_INVALID_API_KEY: i64 = -2014;
const CODE_REJECTED_KEY: i64 = -2015;
const CODE_FILTER_FAILURE: i64 = -1013;
const CODE_NEW_ORDER_REJECTED: i64 = -2010;
const CODE_PRECISION_OVER_MAX: i64 = -1111;
const CODE_INVALID_SYMBOL: i64 = -1121;
const CODE_TIMESTAMP_OUT_OF_WINDOW: i64 = -1021;

impl BinanceError {
    /// Classify a decoded venue error body.
    pub fn from_api_code(code: i64, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            CODE_UNKNOWN_ORDER | CODE_ORDER_NOT_FOUND => BinanceError::UnknownOrder { code, message },
            CODE_INVALID_API_KEY | CODE_REJECTED_KEY => BinanceError::Auth { code, message },
            CODE_FILTER_FAILURE
            | CODE_NEW_ORDER_REJECTED
            | CODE_PRECISION_OVER_MAX
            | CODE_INVALID_SYMBOL => BinanceError::Validation { code, message },
            _ => BinanceError::Api { code, message },
        }
    }

    /// Transient failures worth another attempt after backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            BinanceError::Http(_)
            | BinanceError::Timeout { .. }
            | BinanceError::RateLimit { .. }
            | BinanceError::WebSocket(_) => true,
            BinanceError::Status { status, .. } => status.is_server_error(),
            BinanceError::Api { code, .. } => *code == CODE_TIMESTAMP_OUT_OF_WINDOW,
            _ => false,
        }
    }

    pub fn is_auth_error(&self) -> bool {
        match self {
            BinanceError::Auth { .. } => true,
            BinanceError::Status { status, .. } => {
                *status == StatusCode::UNAUTHORIZED || *status == StatusCode::FORBIDDEN
            }
            _ => false,
        }
    }

    /// True when a cancel/get may treat the target as already finalized.
    pub fn is_unknown_order(&self) -> bool {
        matches!(self, BinanceError::UnknownOrder { .. })
    }
}

/// Result type alias for adapter operations.
pub type Result<T> = std::result::Result<T, BinanceError>;
