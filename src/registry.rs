//! Bounded-lifetime registry of graduated tokens awaiting a pool
//!
//! Each registration owns a tokio timer. Registrations carry a generation
//! number and a timer only removes the token if its generation is still the
//! current one, so a stale timer can never drop a newer registration.

use chrono::Utc;
use parking_lot::Mutex;
use solana_sdk::pubkey::Pubkey;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::metrics::metrics;
use crate::notifier::{Milestone, Notification, NotificationSink};
use crate::types::{AppState, MigrationCandidate, MigrationEventReceiver};

struct Entry {
    candidate: MigrationCandidate,
    generation: u64,
    deadline: Instant,
    timer: JoinHandle<()>,
}

type Entries = Mutex<HashMap<Pubkey, Entry>>;

pub struct CandidateRegistry {
    entries: Arc<Entries>,
    next_generation: AtomicU64,
    default_ttl: Duration,
}

impl CandidateRegistry {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(1),
            default_ttl,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Register `token` with the default lifetime
    pub fn add_default(&self, token: Pubkey) -> MigrationCandidate {
        self.add(token, self.default_ttl)
    }

    /// Register `token` for `ttl`. Re-adding a live token restarts its
    /// lifetime and keeps the original `first_seen_at`.
    pub fn add(&self, token: Pubkey, ttl: Duration) -> MigrationCandidate {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let deadline = Instant::now() + ttl;
        let now = Utc::now();
        let expires_at = now + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(365));

        let mut entries = self.entries.lock();
        // Spawned under the lock so the timer cannot observe the map before insert
        let timer = spawn_expiry(Arc::downgrade(&self.entries), token, generation, deadline);
        let first_seen_at = match entries.remove(&token) {
            Some(previous) => {
                previous.timer.abort();
                previous.candidate.first_seen_at
            }
            None => now,
        };

        let candidate = MigrationCandidate {
            token,
            first_seen_at,
            expires_at,
        };
        entries.insert(
            token,
            Entry {
                candidate: candidate.clone(),
                generation,
                deadline,
                timer,
            },
        );
        metrics().pending_candidates.set(entries.len() as i64);
        drop(entries);

        metrics().candidates_registered.inc();
        debug!(token = %token, ttl_ms = ttl.as_millis() as u64, generation, "Candidate registered");
        candidate
    }

    /// Remove `token` and cancel its timer. Returns whether it was present.
    pub fn remove(&self, token: &Pubkey) -> bool {
        let mut entries = self.entries.lock();
        let removed = entries.remove(token);
        metrics().pending_candidates.set(entries.len() as i64);
        drop(entries);

        match removed {
            Some(entry) => {
                entry.timer.abort();
                true
            }
            None => false,
        }
    }

    /// True while the token is registered and its lifetime has not passed
    pub fn has(&self, token: &Pubkey) -> bool {
        let now = Instant::now();
        self.entries
            .lock()
            .get(token)
            .map(|entry| now < entry.deadline)
            .unwrap_or(false)
    }

    /// Live candidates, oldest first
    pub fn list(&self) -> Vec<MigrationCandidate> {
        let now = Instant::now();
        let mut candidates: Vec<MigrationCandidate> = self
            .entries
            .lock()
            .values()
            .filter(|entry| now < entry.deadline)
            .map(|entry| entry.candidate.clone())
            .collect();
        candidates.sort_by_key(|c| c.first_seen_at);
        candidates
    }

    /// Drop every registration and cancel all timers
    pub fn clear(&self) {
        let drained: Vec<Entry> = {
            let mut entries = self.entries.lock();
            entries.drain().map(|(_, entry)| entry).collect()
        };
        metrics().pending_candidates.set(0);
        for entry in drained {
            entry.timer.abort();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Drop for CandidateRegistry {
    fn drop(&mut self) {
        for (_, entry) in self.entries.lock().drain() {
            entry.timer.abort();
        }
    }
}

fn spawn_expiry(entries: Weak<Entries>, token: Pubkey, generation: u64, deadline: Instant) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep_until(deadline).await;

        let Some(entries) = entries.upgrade() else {
            return;
        };
        let mut entries = entries.lock();
        if entries.get(&token).map(|e| e.generation) == Some(generation) {
            entries.remove(&token);
            metrics().pending_candidates.set(entries.len() as i64);
            drop(entries);
            metrics().candidates_expired.inc();
            debug!(token = %token, generation, "Candidate expired");
        }
    })
}

/// Register every emitted migration until shutdown or until the listener goes away
pub async fn intake(
    registry: Arc<CandidateRegistry>,
    mut events: MigrationEventReceiver,
    notifier: NotificationSink,
    app_state: AppState,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let event = tokio::select! {
            _ = shutdown.changed() => break,
            received = events.recv() => match received {
                Some(event) => event,
                None => break,
            },
        };

        let candidate = registry.add_default(event.token);
        app_state.record_migration().await;
        info!(
            token = %event.token,
            expires_at = %candidate.expires_at,
            pending = registry.len(),
            "Candidate registered"
        );
        notifier.fire(
            Notification::new(Milestone::MigrationSeen, event.token, "Token graduated")
                .with_signature(event.signature),
        );
    }
    debug!("Candidate intake stopped");
}
