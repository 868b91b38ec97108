//! Log subscription transports
//!
//! A transport owns its connection, reconnects on its own and pushes every
//! notification into a bounded channel consumed by the listener.

#[cfg(feature = "ws-stream")]
pub mod websocket_stream;

#[cfg(feature = "ws-stream")]
pub use websocket_stream::WebSocketLogStream;

use async_trait::async_trait;
use solana_sdk::pubkey::Pubkey;
use tokio::sync::{mpsc, watch};

use crate::listener::ListenerError;

/// One `logsNotification` for a transaction mentioning the subscribed program
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogNotification {
    pub signature: String,
    pub slot: u64,
    /// Set when the transaction failed
    pub err: Option<String>,
    pub logs: Vec<String>,
}

#[async_trait]
pub trait LogStreamProvider: Send + Sync {
    /// Stream logs mentioning `program` into `tx` until shutdown flips or
    /// the receiver is dropped. Reconnects internally.
    async fn stream_logs(
        &self,
        program: Pubkey,
        tx: mpsc::Sender<LogNotification>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(), ListenerError>;
}
