//! Common types used throughout the pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

/// Wrapped SOL mint, the quote side every qualifying pool must carry
pub fn native_mint() -> Pubkey {
    spl_token::native_mint::id()
}

/// Operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    /// Quote and simulate, never submit transactions
    Simulation,
    /// Submit real transactions
    Production,
}

impl Mode {
    pub fn is_simulation(&self) -> bool {
        matches!(self, Mode::Simulation)
    }
}

/// A confirmed graduation observed by the listener
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationEvent {
    /// Migrated token mint
    pub token: Pubkey,

    /// When the listener extracted the event
    pub timestamp: DateTime<Utc>,

    /// Signature of the migration transaction
    pub signature: String,

    /// Slot the log notification was produced at
    pub slot: u64,
}

/// A token waiting for a qualifying pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationCandidate {
    pub token: Pubkey,
    pub first_seen_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// The (token, pool) pair gating at-most-once execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActionKey {
    pub token: Pubkey,
    pub pool: Pubkey,
}

impl ActionKey {
    pub fn new(token: Pubkey, pool: Pubkey) -> Self {
        Self { token, pool }
    }
}

impl fmt::Display for ActionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.token, self.pool)
    }
}

/// Sender for migration events from the listener
pub type MigrationEventSender = mpsc::Sender<MigrationEvent>;

/// Receiver for migration events in the main loop
pub type MigrationEventReceiver = mpsc::Receiver<MigrationEvent>;

/// Pipeline statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Stats {
    /// Migration events received from the listener
    pub migrations_seen: u64,

    /// Pools that passed the qualifier
    pub pools_matched: u64,

    /// Actions that finished cleanly
    pub actions_succeeded: u64,

    /// Actions that finished with a non-critical program error
    pub actions_warned: u64,

    /// Actions that ended in a hard failure
    pub actions_failed: u64,

    /// SOL spent on purchases
    pub total_spent_sol: f64,
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub mode: Mode,
    pub stats: Arc<RwLock<Stats>>,
}

impl AppState {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            stats: Arc::new(RwLock::new(Stats::default())),
        }
    }

    pub async fn record_migration(&self) {
        self.stats.write().await.migrations_seen += 1;
    }

    pub async fn record_match(&self) {
        self.stats.write().await.pools_matched += 1;
    }

    pub async fn record_action(&self, outcome: &crate::orchestrator::ActionOutcome, spent_sol: f64) {
        use crate::orchestrator::ActionOutcome;

        let mut stats = self.stats.write().await;
        match outcome {
            ActionOutcome::Success => stats.actions_succeeded += 1,
            ActionOutcome::SuccessWithWarning { .. } => stats.actions_warned += 1,
            ActionOutcome::Failure(_) => stats.actions_failed += 1,
            ActionOutcome::Skipped => {}
        }
        stats.total_spent_sol += spent_sol;
    }

    pub async fn snapshot(&self) -> Stats {
        self.stats.read().await.clone()
    }
}
