//! Error types and reconnect backoff for the listener and its transport

use rand::Rng;
use std::time::Duration;
use thiserror::Error;

use crate::rpc::RpcManagerError;

#[derive(Debug, Clone, Error)]
pub enum ListenerError {
    #[error("Configuration validation error: {0}")]
    ConfigValidation(String),

    #[error("Stream connection error: {0}")]
    StreamConnection(String),

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Transaction fetch failed: {0}")]
    Fetch(#[from] RpcManagerError),

    #[error("No migrated mint in post token balances")]
    MintNotFound,

    #[error("Invalid mint {0}")]
    InvalidMint(String),
}

/// Exponential backoff with ±20% jitter for reconnect loops
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    current_attempt: u32,
    initial_backoff_ms: u64,
    max_backoff_ms: u64,
}

impl ExponentialBackoff {
    pub fn new(initial_backoff_ms: u64, max_backoff_ms: u64) -> Self {
        Self {
            current_attempt: 0,
            initial_backoff_ms,
            max_backoff_ms,
        }
    }

    /// Get the next backoff duration with jitter
    pub fn next_backoff(&mut self) -> Duration {
        let factor = 1u64.checked_shl(self.current_attempt).unwrap_or(u64::MAX);
        let backoff_ms = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);

        self.current_attempt = self.current_attempt.saturating_add(1);

        let jitter = backoff_ms / 5;
        if jitter == 0 {
            return Duration::from_millis(backoff_ms);
        }
        let low = backoff_ms - jitter;
        let high = backoff_ms.saturating_add(jitter);
        Duration::from_millis(rand::thread_rng().gen_range(low..=high))
    }

    pub fn reset(&mut self) {
        self.current_attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.current_attempt
    }
}
