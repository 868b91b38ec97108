//! `logsSubscribe` transport over the Solana WebSocket API

use async_trait::async_trait;
use futures_util::StreamExt;
use solana_client::nonblocking::pubsub_client::PubsubClient;
use solana_client::rpc_config::{RpcTransactionLogsConfig, RpcTransactionLogsFilter};
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::pubkey::Pubkey;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use super::{LogNotification, LogStreamProvider};
use crate::listener::{ExponentialBackoff, ListenerError};
use crate::metrics::metrics;

const INITIAL_BACKOFF_MS: u64 = 500;
const MAX_BACKOFF_MS: u64 = 30_000;

enum SessionEnd {
    Shutdown,
    ReceiverClosed,
    Disconnected,
}

/// WebSocket log subscription with reconnect
pub struct WebSocketLogStream {
    ws_url: String,
    commitment: CommitmentConfig,
}

impl WebSocketLogStream {
    pub fn new(ws_url: String) -> Self {
        Self {
            ws_url,
            commitment: CommitmentConfig::confirmed(),
        }
    }

    async fn session(
        &self,
        program: &Pubkey,
        tx: &mpsc::Sender<LogNotification>,
        shutdown: &mut watch::Receiver<bool>,
        backoff: &mut ExponentialBackoff,
    ) -> Result<SessionEnd, ListenerError> {
        info!(url = %self.ws_url, "Connecting to WebSocket");
        let client = PubsubClient::new(&self.ws_url)
            .await
            .map_err(|e| ListenerError::StreamConnection(e.to_string()))?;

        let (mut notifications, unsubscribe) = client
            .logs_subscribe(
                RpcTransactionLogsFilter::Mentions(vec![program.to_string()]),
                RpcTransactionLogsConfig {
                    commitment: Some(self.commitment),
                },
            )
            .await
            .map_err(|e| ListenerError::StreamConnection(e.to_string()))?;

        info!(program = %program, "Subscribed to program logs");
        backoff.reset();

        let end = loop {
            tokio::select! {
                _ = shutdown.changed() => break SessionEnd::Shutdown,
                item = notifications.next() => match item {
                    Some(response) => {
                        let notification = LogNotification {
                            signature: response.value.signature,
                            slot: response.context.slot,
                            err: response.value.err.map(|e| format!("{:?}", e)),
                            logs: response.value.logs,
                        };
                        if tx.send(notification).await.is_err() {
                            break SessionEnd::ReceiverClosed;
                        }
                    }
                    None => break SessionEnd::Disconnected,
                }
            }
        };

        unsubscribe().await;
        Ok(end)
    }
}

#[async_trait]
impl LogStreamProvider for WebSocketLogStream {
    async fn stream_logs(
        &self,
        program: Pubkey,
        tx: mpsc::Sender<LogNotification>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), ListenerError> {
        let mut backoff = ExponentialBackoff::new(INITIAL_BACKOFF_MS, MAX_BACKOFF_MS);

        loop {
            if *shutdown.borrow() {
                return Ok(());
            }

            match self.session(&program, &tx, &mut shutdown, &mut backoff).await {
                Ok(SessionEnd::Shutdown) => return Ok(()),
                Ok(SessionEnd::ReceiverClosed) => {
                    warn!("Log receiver dropped, closing subscription");
                    return Ok(());
                }
                Ok(SessionEnd::Disconnected) => warn!("Log subscription ended by server"),
                Err(e) => warn!(error = %e, "Log subscription failed"),
            }

            metrics().stream_reconnects.inc();
            let delay = backoff.next_backoff();
            info!(attempt = backoff.attempt(), delay_ms = delay.as_millis() as u64, "Reconnecting log stream");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => return Ok(()),
            }
        }
    }
}
