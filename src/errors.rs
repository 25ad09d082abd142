//! Typed error taxonomy. `anyhow::Result` is used at call sites that don't need to
//! match on kind; these variants are for the seams the core must distinguish.

use thiserror::Error;

use crate::domain::enums::TradeStatus;

#[derive(Debug, Error)]
pub enum MartinError {
    #[error("config error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimit { retry_after_secs: u64 },

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("api error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("illegal trade transition from {from:?} via {event}")]
    Trade { from: TradeStatus, event: String },

    #[error("security error: {0}")]
    Security(String),
}

impl MartinError {
    pub fn trade(from: TradeStatus, event: impl Into<String>) -> Self {
        MartinError::Trade { from, event: event.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trade_error_carries_state_and_event() {
        let err = MartinError::trade(TradeStatus::New, "on_qualifying_signal_found");
        assert!(err.to_string().contains("New"));
        assert!(err.to_string().contains("on_qualifying_signal_found"));
    }

    #[test]
    fn rate_limit_error_carries_retry_after() {
        let err = MartinError::RateLimit { retry_after_secs: 7 };
        assert!(err.to_string().contains('7'));
    }

    #[test]
    fn api_error_carries_status_and_body() {
        let err = MartinError::Api { status: 503, body: "maintenance".to_string() };
        assert!(err.to_string().contains("503"));
        assert!(err.to_string().contains("maintenance"));
    }
}
