/*
[INPUT]:  Failures from the gateway, the store and state-machine preconditions
[OUTPUT]: Engine error taxonomy with classification helpers
[POS]:    Error handling layer - unified error types for the engine
[UPDATE]: When new failure classes are distinguished
*/

use gridcycle_adapter::BinanceError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    /// The venue rejected a request (notional, step size, price filters).
    /// The failing placement aborts; the cycle stays ACTIVE with fewer
    /// orders and a later tick or reconcile retries.
    #[error("validation rejected by exchange: {0}")]
    Validation(String),

    /// Network/5xx/timeout after the adapter exhausted its retries. Folded
    /// into "retry next tick"; never changes persisted state.
    #[error("transient exchange failure: {0}")]
    Transient(String),

    /// A state-machine precondition failed. Fatal for the calling operation
    /// only; the supervisor keeps running.
    #[error("invariant violated: {0}")]
    Invariant(String),

    /// Credential rejection or corrupt persisted state. Stops the bot's
    /// pipeline without touching exchange-side orders.
    #[error("fatal: {0}")]
    Fatal(String),

    /// Grid sizing found no budget left for a resumed cycle.
    #[error("cycle budget exhausted")]
    CycleBudgetExhausted,

    #[error("no filters configured for symbol {0}")]
    UnknownSymbol(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl EngineError {
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::Transient(_))
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::Fatal(_))
    }
}

impl From<BinanceError> for EngineError {
    fn from(err: BinanceError) -> Self {
        if err.is_auth_error() {
            EngineError::Fatal(err.to_string())
        } else {
            match err {
                BinanceError::Validation { .. } => EngineError::Validation(err.to_string()),
                // Unknown-order is folded inside the adapter; reaching here
                // means a caller did not use the folding entry point.
                BinanceError::UnknownOrder { .. } => EngineError::Invariant(err.to_string()),
                _ => EngineError::Transient(err.to_string()),
            }
        }
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(err: rusqlite::Error) -> Self {
        EngineError::Storage(err.to_string())
    }
}

impl From<r2d2::Error> for EngineError {
    fn from(err: r2d2::Error) -> Self {
        EngineError::Storage(err.to_string())
    }
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
