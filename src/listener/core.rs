//! Listener receive loop and per-notification pipeline

use chrono::Utc;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};

use super::config::ListenerConfig;
use super::dedup::DedupWindow;
use super::errors::ListenerError;
use super::extractor::extract_migrated_mint;
use super::prefilter::{contains_hint, contains_marker};
use crate::metrics::metrics;
use crate::rpc::ChainClient;
use crate::streaming::LogNotification;
use crate::types::{MigrationEvent, MigrationEventSender};

/// Listener counters, one per pipeline exit
#[derive(Debug, Default)]
pub struct ListenerStats {
    pub seen: AtomicU64,
    pub failed_tx: AtomicU64,
    pub prefiltered: AtomicU64,
    pub duplicate_signatures: AtomicU64,
    pub marker_missing: AtomicU64,
    pub extract_failed: AtomicU64,
    pub duplicate_tokens: AtomicU64,
    pub emitted: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListenerStatsSnapshot {
    pub seen: u64,
    pub failed_tx: u64,
    pub prefiltered: u64,
    pub duplicate_signatures: u64,
    pub marker_missing: u64,
    pub extract_failed: u64,
    pub duplicate_tokens: u64,
    pub emitted: u64,
}

impl ListenerStats {
    pub fn snapshot(&self) -> ListenerStatsSnapshot {
        ListenerStatsSnapshot {
            seen: self.seen.load(Ordering::Relaxed),
            failed_tx: self.failed_tx.load(Ordering::Relaxed),
            prefiltered: self.prefiltered.load(Ordering::Relaxed),
            duplicate_signatures: self.duplicate_signatures.load(Ordering::Relaxed),
            marker_missing: self.marker_missing.load(Ordering::Relaxed),
            extract_failed: self.extract_failed.load(Ordering::Relaxed),
            duplicate_tokens: self.duplicate_tokens.load(Ordering::Relaxed),
            emitted: self.emitted.load(Ordering::Relaxed),
        }
    }
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Turns migration program log notifications into [`MigrationEvent`]s
pub struct EventListener {
    config: ListenerConfig,
    chain: Arc<dyn ChainClient>,
    signatures: Arc<DedupWindow<String>>,
    mints: Arc<DedupWindow<Pubkey>>,
    stats: Arc<ListenerStats>,
}

impl EventListener {
    pub fn new(config: ListenerConfig, chain: Arc<dyn ChainClient>) -> Self {
        let ttl = config.dedup_ttl;
        Self {
            config,
            chain,
            signatures: Arc::new(DedupWindow::new(ttl)),
            mints: Arc::new(DedupWindow::new(ttl)),
            stats: Arc::new(ListenerStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<ListenerStats> {
        Arc::clone(&self.stats)
    }

    pub fn config(&self) -> &ListenerConfig {
        &self.config
    }

    /// Run one notification through the pipeline.
    ///
    /// `Ok(None)` means the notification was filtered out. On `Ok(Some(_))`
    /// the signature and token are already marked in their dedup windows.
    pub async fn process(
        &self,
        notification: &LogNotification,
    ) -> Result<Option<MigrationEvent>, ListenerError> {
        bump(&self.stats.seen);

        if notification.err.is_some() {
            bump(&self.stats.failed_tx);
            return Ok(None);
        }

        if !contains_hint(&notification.logs, &self.config.keyword_hints) {
            bump(&self.stats.prefiltered);
            return Ok(None);
        }

        if self.signatures.is_seen(&notification.signature) {
            bump(&self.stats.duplicate_signatures);
            trace!(signature = %notification.signature, "Duplicate signature");
            return Ok(None);
        }

        if !contains_marker(&notification.logs, &self.config.instruction_marker) {
            bump(&self.stats.marker_missing);
            return Ok(None);
        }

        let signature = Signature::from_str(&notification.signature)
            .map_err(|_| ListenerError::InvalidSignature(notification.signature.clone()))?;

        let token = match self.extract(&signature).await {
            Ok(token) => token,
            Err(e) => {
                bump(&self.stats.extract_failed);
                return Err(e);
            }
        };

        self.signatures.mark(notification.signature.clone());

        if self.mints.is_seen(&token) {
            bump(&self.stats.duplicate_tokens);
            debug!(token = %token, signature = %notification.signature, "Token already emitted");
            return Ok(None);
        }
        self.mints.mark(token);

        bump(&self.stats.emitted);
        Ok(Some(MigrationEvent {
            token,
            timestamp: Utc::now(),
            signature: notification.signature.clone(),
            slot: notification.slot,
        }))
    }

    async fn extract(&self, signature: &Signature) -> Result<Pubkey, ListenerError> {
        let balances = self.chain.transaction_token_balances(signature).await?;
        extract_migrated_mint(&balances)
    }

    /// Consume notifications until shutdown or until either channel closes
    pub async fn run(
        self: Arc<Self>,
        mut notifications: mpsc::Receiver<LogNotification>,
        events: MigrationEventSender,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let sweepers = [
            self.signatures.spawn_sweeper(shutdown.clone()),
            self.mints.spawn_sweeper(shutdown.clone()),
        ];

        info!(program = %self.config.migration_program, "Migration listener started");

        loop {
            let notification = tokio::select! {
                _ = shutdown.changed() => break,
                received = notifications.recv() => match received {
                    Some(n) => n,
                    None => {
                        warn!("Log notification channel closed");
                        break;
                    }
                },
            };

            match self.process(&notification).await {
                Ok(Some(event)) => {
                    metrics().migrations_seen.inc();
                    info!(
                        token = %event.token,
                        signature = %event.signature,
                        slot = event.slot,
                        "Migration detected"
                    );
                    if events.send(event).await.is_err() {
                        warn!("Migration event receiver dropped");
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(signature = %notification.signature, error = %e, "Failed to process migration log");
                }
            }
        }

        for sweeper in sweepers {
            sweeper.abort();
        }
        info!("Migration listener stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::TokenBalanceEntry;
    use crate::test_utils::FakeChain;
    use crate::types::native_mint;

    fn migrate_logs() -> Vec<String> {
        vec![
            "Program 39azUYFWPz3VHgKCf3VChUwbpURdCHRxjWVowf5jUJjg invoke [1]".to_string(),
            "Program log: Instruction: Migrate".to_string(),
        ]
    }

    fn notification(signature: &Signature, logs: Vec<String>) -> LogNotification {
        LogNotification {
            signature: signature.to_string(),
            slot: 42,
            err: None,
            logs,
        }
    }

    fn balances(token: &Pubkey) -> Vec<TokenBalanceEntry> {
        vec![
            TokenBalanceEntry {
                account_index: 1,
                mint: native_mint().to_string(),
                amount: "85000000000".to_string(),
                owner: None,
            },
            TokenBalanceEntry {
                account_index: 2,
                mint: token.to_string(),
                amount: "206900000000000".to_string(),
                owner: None,
            },
        ]
    }

    fn listener(chain: Arc<FakeChain>) -> EventListener {
        EventListener::new(ListenerConfig::default(), chain)
    }

    #[tokio::test]
    async fn test_emits_migrated_token() {
        let chain = Arc::new(FakeChain::new());
        let sig = Signature::new_unique();
        let token = Pubkey::new_unique();
        chain.set_transaction_balances(sig, balances(&token));

        let listener = listener(chain);
        let event = listener
            .process(&notification(&sig, migrate_logs()))
            .await
            .unwrap()
            .expect("event");

        assert_eq!(event.token, token);
        assert_eq!(event.slot, 42);
        assert_eq!(event.signature, sig.to_string());
        assert_eq!(listener.stats().snapshot().emitted, 1);
    }

    #[tokio::test]
    async fn test_duplicate_signature_is_dropped_before_fetch() {
        let chain = Arc::new(FakeChain::new());
        let sig = Signature::new_unique();
        chain.set_transaction_balances(sig, balances(&Pubkey::new_unique()));

        let listener = listener(Arc::clone(&chain));
        assert!(listener.process(&notification(&sig, migrate_logs())).await.unwrap().is_some());
        assert!(listener.process(&notification(&sig, migrate_logs())).await.unwrap().is_none());

        assert_eq!(chain.transaction_fetches(), 1);
        assert_eq!(listener.stats().snapshot().duplicate_signatures, 1);
    }

    #[tokio::test]
    async fn test_same_token_in_two_transactions_emits_once() {
        let chain = Arc::new(FakeChain::new());
        let token = Pubkey::new_unique();
        let first = Signature::new_unique();
        let second = Signature::new_unique();
        chain.set_transaction_balances(first, balances(&token));
        chain.set_transaction_balances(second, balances(&token));

        let listener = listener(chain);
        assert!(listener.process(&notification(&first, migrate_logs())).await.unwrap().is_some());
        assert!(listener.process(&notification(&second, migrate_logs())).await.unwrap().is_none());
        assert_eq!(listener.stats().snapshot().duplicate_tokens, 1);
    }

    #[tokio::test]
    async fn test_hint_without_marker_does_not_fetch() {
        let chain = Arc::new(FakeChain::new());
        let sig = Signature::new_unique();
        let listener = listener(Arc::clone(&chain));

        let logs = vec!["Program log: will migrate soon".to_string()];
        assert!(listener.process(&notification(&sig, logs)).await.unwrap().is_none());
        assert_eq!(chain.transaction_fetches(), 0);
        assert_eq!(listener.stats().snapshot().marker_missing, 1);
    }

    #[tokio::test]
    async fn test_failed_transaction_is_dropped() {
        let chain = Arc::new(FakeChain::new());
        let sig = Signature::new_unique();
        let listener = listener(Arc::clone(&chain));

        let mut n = notification(&sig, migrate_logs());
        n.err = Some("InstructionError(0, Custom(1))".to_string());
        assert!(listener.process(&n).await.unwrap().is_none());
        assert_eq!(chain.transaction_fetches(), 0);
    }

    #[tokio::test]
    async fn test_fetch_failure_yields_error_and_no_mark() {
        let chain = Arc::new(FakeChain::new());
        let sig = Signature::new_unique();
        let listener = listener(Arc::clone(&chain));

        // Unknown transaction: the fake reports an invalid-data error
        assert!(listener.process(&notification(&sig, migrate_logs())).await.is_err());

        let token = Pubkey::new_unique();
        chain.set_transaction_balances(sig, balances(&token));
        let event = listener.process(&notification(&sig, migrate_logs())).await.unwrap();
        assert_eq!(event.map(|e| e.token), Some(token));
    }

    #[tokio::test]
    async fn test_run_forwards_events_and_stops_on_shutdown() {
        let chain = Arc::new(FakeChain::new());
        let sig = Signature::new_unique();
        let token = Pubkey::new_unique();
        chain.set_transaction_balances(sig, balances(&token));

        let listener = Arc::new(listener(chain));
        let (log_tx, log_rx) = mpsc::channel(8);
        let (event_tx, mut event_rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(Arc::clone(&listener).run(log_rx, event_tx, shutdown_rx));

        log_tx
            .send(LogNotification {
                signature: "garbage".to_string(),
                slot: 1,
                err: None,
                logs: migrate_logs(),
            })
            .await
            .unwrap();
        log_tx.send(notification(&sig, migrate_logs())).await.unwrap();

        let event = event_rx.recv().await.unwrap();
        assert_eq!(event.token, token);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
