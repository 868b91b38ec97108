//! gradwatch - graduation to pool to liquidity pipeline
//!
//! Watches a launch platform's migration program for graduated tokens, waits
//! for a qualifying DAMM v2 pool to appear for each one, then buys the token
//! and opens a liquidity position in that pool.

pub mod config;
pub mod endpoints;
pub mod liquidity;
pub mod listener;
pub mod metrics;
pub mod notifier;
pub mod orchestrator;
pub mod pool;
pub mod reconciler;
pub mod registry;
pub mod rpc;
pub mod streaming;
pub mod structured_logging;
pub mod supervisor;
pub mod swap;
pub mod types;
pub mod wallet;

pub mod test_utils;

// Re-export commonly used types
pub use solana_sdk::{pubkey::Pubkey, signature::Signature};
