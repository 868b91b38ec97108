//! Swap aggregator boundary

pub mod jupiter;

use async_trait::async_trait;
use serde_json::Value;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::transaction::VersionedTransaction;
use thiserror::Error;

use crate::rpc::RateLimited;

pub use jupiter::JupiterClient;

#[derive(Debug, Clone, Error)]
pub enum SwapError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Aggregator rate limited the request")]
    RateLimited,

    #[error("Aggregator returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("No route: {0}")]
    NoRoute(String),

    #[error("Failed to decode aggregator response: {0}")]
    Decode(String),
}

impl RateLimited for SwapError {
    fn is_rate_limited(&self) -> bool {
        match self {
            SwapError::RateLimited => true,
            SwapError::Api { status, body } => {
                *status == 429 || body.to_lowercase().contains("too many requests")
            }
            _ => false,
        }
    }
}

impl From<reqwest::Error> for SwapError {
    fn from(err: reqwest::Error) -> Self {
        if err.status().map(|s| s.as_u16()) == Some(429) {
            SwapError::RateLimited
        } else {
            SwapError::Http(err.to_string())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuoteRequest {
    pub input_mint: Pubkey,
    pub output_mint: Pubkey,
    /// Input amount in base units
    pub amount: u64,
    pub slippage_bps: u16,
}

/// A route quote. `raw` is passed back to the aggregator untouched.
#[derive(Debug, Clone)]
pub struct SwapQuote {
    pub input_mint: Pubkey,
    pub output_mint: Pubkey,
    pub in_amount: u64,
    pub out_amount: u64,
    /// Minimum output after slippage
    pub other_amount_threshold: u64,
    pub price_impact_pct: Option<f64>,
    pub raw: Value,
}

#[async_trait]
pub trait SwapAggregator: Send + Sync {
    async fn quote(&self, request: &QuoteRequest) -> Result<SwapQuote, SwapError>;

    /// Unsigned transaction executing `quote` for `user`
    async fn swap_transaction(
        &self,
        quote: &SwapQuote,
        user: &Pubkey,
    ) -> Result<VersionedTransaction, SwapError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_detection() {
        assert!(SwapError::RateLimited.is_rate_limited());
        assert!(SwapError::Api { status: 429, body: String::new() }.is_rate_limited());
        assert!(SwapError::Api {
            status: 503,
            body: "Too Many Requests".to_string()
        }
        .is_rate_limited());
        assert!(!SwapError::Api { status: 400, body: "bad".to_string() }.is_rate_limited());
        assert!(!SwapError::NoRoute("x".to_string()).is_rate_limited());
    }
}
