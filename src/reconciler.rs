//! Periodic reconciliation of pending candidates against pool accounts
//!
//! Each tick walks the registry, scans the DEX program for pools holding each
//! pending token on either side, and hands the first qualifying pool to the
//! executor. Pools that fail qualification are remembered and never
//! re-evaluated.

use dashmap::DashSet;
use parking_lot::Mutex;
use solana_sdk::pubkey::Pubkey;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::metrics::{metrics, Timer};
use crate::orchestrator::{ActionExecutor, ActionReport};
use crate::pool::{
    PoolObservation, PoolQualifier, PoolState, POOL_ACCOUNT_SIZE, TOKEN_A_MINT_OFFSET, TOKEN_B_MINT_OFFSET,
};
use crate::registry::CandidateRegistry;
use crate::rpc::{ChainClient, ProgramAccount};
use crate::types::{ActionKey, AppState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcilerPhase {
    Idle,
    Scanning,
    Querying,
    Evaluating,
    Matched,
    Unmatched,
}

impl fmt::Display for ReconcilerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Sets the reconciler owns. Only ever inserted into.
#[derive(Debug, Default)]
pub struct ReconcilerState {
    pub seen_pools: DashSet<Pubkey>,
    pub action_keys: DashSet<ActionKey>,
}

impl ReconcilerState {
    pub fn new() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickSummary {
    /// Another tick was still running
    pub skipped: bool,
    pub tokens: usize,
    pub pools_evaluated: usize,
    pub matched: Vec<ActionKey>,
    pub errors: usize,
}

pub struct Reconciler {
    registry: Arc<CandidateRegistry>,
    chain: Arc<dyn ChainClient>,
    executor: Arc<dyn ActionExecutor>,
    qualifier: PoolQualifier,
    state: Arc<ReconcilerState>,
    app_state: AppState,
    dex_program: Pubkey,
    interval: Duration,
    in_progress: AtomicBool,
    /// Set at shutdown; no hand-off happens afterwards
    stopping: AtomicBool,
    phase: Mutex<ReconcilerPhase>,
    in_flight: Mutex<Vec<JoinHandle<ActionReport>>>,
}

impl Reconciler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<CandidateRegistry>,
        chain: Arc<dyn ChainClient>,
        executor: Arc<dyn ActionExecutor>,
        state: Arc<ReconcilerState>,
        app_state: AppState,
        dex_program: Pubkey,
        interval: Duration,
    ) -> Self {
        Self {
            registry,
            chain,
            executor,
            qualifier: PoolQualifier::new(),
            state,
            app_state,
            dex_program,
            interval,
            in_progress: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
            phase: Mutex::new(ReconcilerPhase::Idle),
            in_flight: Mutex::new(Vec::new()),
        }
    }

    pub fn phase(&self) -> ReconcilerPhase {
        *self.phase.lock()
    }

    fn set_phase(&self, phase: ReconcilerPhase) {
        *self.phase.lock() = phase;
    }

    pub fn state(&self) -> &Arc<ReconcilerState> {
        &self.state
    }

    pub fn seen_pools(&self) -> usize {
        self.state.seen_pools.len()
    }

    /// Refuse further hand-offs. Actions already handed off keep running.
    pub fn stop(&self) {
        self.stopping.store(true, Ordering::Release);
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    pub fn in_flight(&self) -> usize {
        let mut handles = self.in_flight.lock();
        handles.retain(|h| !h.is_finished());
        handles.len()
    }

    /// One reconciliation pass. Overlapping calls return a skipped summary.
    pub async fn tick(&self) -> TickSummary {
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            metrics().reconcile_ticks_skipped.inc();
            debug!("Previous reconciliation tick still running, skipping");
            return TickSummary {
                skipped: true,
                ..Default::default()
            };
        }
        let _running = scopeguard::guard((), |_| {
            self.set_phase(ReconcilerPhase::Idle);
            self.in_progress.store(false, Ordering::Release);
        });

        let mut summary = TickSummary::default();
        let candidates = self.registry.list();
        if candidates.is_empty() {
            return summary;
        }

        let timer = Timer::new();
        self.set_phase(ReconcilerPhase::Scanning);
        summary.tokens = candidates.len();

        for candidate in candidates {
            if self.is_stopping() {
                break;
            }
            // Expired or matched since the snapshot
            if !self.registry.has(&candidate.token) {
                continue;
            }
            self.reconcile_token(&candidate.token, &mut summary).await;
        }

        timer.observe_duration(&metrics().tick_latency);
        debug!(
            tokens = summary.tokens,
            pools = summary.pools_evaluated,
            matched = summary.matched.len(),
            errors = summary.errors,
            "Reconciliation tick complete"
        );
        summary
    }

    async fn find_pools(&self, token: &Pubkey, summary: &mut TickSummary) -> Vec<ProgramAccount> {
        let mut ids = HashSet::new();
        let mut pools = Vec::new();

        for offset in [TOKEN_A_MINT_OFFSET, TOKEN_B_MINT_OFFSET] {
            match self
                .chain
                .scan_program_accounts(&self.dex_program, POOL_ACCOUNT_SIZE as u64, offset, token)
                .await
            {
                Ok(accounts) => pools.extend(accounts.into_iter().filter(|a| ids.insert(a.pubkey))),
                Err(e) => {
                    summary.errors += 1;
                    warn!(token = %token, offset, error = %e, "Pool scan failed");
                }
            }
        }
        pools
    }

    async fn reconcile_token(&self, token: &Pubkey, summary: &mut TickSummary) {
        self.set_phase(ReconcilerPhase::Querying);
        let pools = self.find_pools(token, summary).await;
        // The scan awaited; the token may have expired or shutdown begun meanwhile
        if self.is_stopping() || !self.registry.has(token) {
            self.set_phase(ReconcilerPhase::Unmatched);
            return;
        }

        self.set_phase(ReconcilerPhase::Evaluating);
        for account in pools {
            let key = ActionKey::new(*token, account.pubkey);
            if self.state.seen_pools.contains(&account.pubkey) || self.state.action_keys.contains(&key) {
                continue;
            }

            let pool_state = match PoolState::decode(&account.data) {
                Ok(state) => state,
                Err(e) => {
                    summary.errors += 1;
                    warn!(pool = %account.pubkey, error = %e, "Failed to decode pool");
                    continue;
                }
            };
            metrics().pools_scanned.inc();
            summary.pools_evaluated += 1;
            let observation = PoolObservation::new(account.pubkey, &pool_state);
            debug!(
                pool = %observation.pool,
                token_a = %observation.token_a,
                token_b = %observation.token_b,
                base_fee = ?observation.base_fee,
                collect_fee_mode = ?observation.collect_fee_mode,
                "Evaluating pool"
            );

            if let Err(rejection) = self.qualifier.assess(&pool_state, token) {
                metrics().pools_rejected.inc();
                debug!(token = %token, pool = %observation.pool, reason = %rejection, "Pool rejected");
                self.state.seen_pools.insert(observation.pool);
                continue;
            }

            if self.is_stopping() {
                info!(token = %token, pool = %observation.pool, "Qualifying pool found during shutdown, not handing off");
                return;
            }
            if !self.state.action_keys.insert(key) {
                continue;
            }
            self.state.seen_pools.insert(observation.pool);
            self.set_phase(ReconcilerPhase::Matched);
            metrics().pools_qualified.inc();
            info!(token = %token, pool = %observation.pool, "Qualifying pool found");

            self.app_state.record_match().await;
            self.registry.remove(token);
            if self.hand_off(key, pool_state) {
                summary.matched.push(key);
            }
            return;
        }

        self.set_phase(ReconcilerPhase::Unmatched);
    }

    /// Spawn the action. Returns false once stopping; nothing is spawned then.
    fn hand_off(&self, key: ActionKey, pool_state: PoolState) -> bool {
        // Checked under the lock drain_in_flight takes, so a drain never misses a spawn
        let mut handles = self.in_flight.lock();
        if self.is_stopping() {
            warn!(key = %key, "Reconciler stopping, action not started");
            return false;
        }

        let executor = Arc::clone(&self.executor);
        let handle = tokio::spawn(async move { executor.execute(key, pool_state).await });
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
        true
    }

    /// Wait for handed-off actions. Returns false if the timeout passed first.
    pub async fn drain_in_flight(&self, timeout: Duration) -> bool {
        let handles: Vec<_> = std::mem::take(&mut *self.in_flight.lock());
        if handles.is_empty() {
            return true;
        }

        info!(count = handles.len(), "Waiting for in-flight actions");
        match tokio::time::timeout(timeout, futures::future::join_all(handles)).await {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        warn!(error = %e, "Action task ended abnormally");
                    }
                }
                true
            }
            Err(_) => {
                warn!(timeout = ?timeout, "In-flight actions still running at shutdown");
                false
            }
        }
    }

    /// Tick on the configured interval until shutdown flips
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(interval = ?self.interval, program = %self.dex_program, "Reconciler started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut ticks: Vec<JoinHandle<TickSummary>> = Vec::new();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    ticks.retain(|h| !h.is_finished());
                    let this = Arc::clone(&self);
                    ticks.push(tokio::spawn(async move { this.tick().await }));
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.stop();
        // A tick mid-scan must finish before callers drain in-flight actions
        for result in futures::future::join_all(ticks).await {
            if let Err(e) = result {
                warn!(error = %e, "Reconciliation tick ended abnormally");
            }
        }
        info!("Reconciler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{FakeChain, PoolAccountBuilder, RecordingExecutor};
    use crate::types::{native_mint, Mode};

    struct Harness {
        chain: Arc<FakeChain>,
        registry: Arc<CandidateRegistry>,
        executor: Arc<RecordingExecutor>,
        reconciler: Reconciler,
        program: Pubkey,
    }

    fn harness() -> Harness {
        let chain = Arc::new(FakeChain::new());
        let registry = Arc::new(CandidateRegistry::new(Duration::from_secs(420)));
        let executor = Arc::new(RecordingExecutor::new());
        let program = Pubkey::new_unique();
        let reconciler = Reconciler::new(
            registry.clone(),
            chain.clone(),
            executor.clone(),
            Arc::new(ReconcilerState::new()),
            AppState::new(Mode::Simulation),
            program,
            Duration::from_secs(20),
        );
        Harness {
            chain,
            registry,
            executor,
            reconciler,
            program,
        }
    }

    #[tokio::test]
    async fn test_empty_registry_is_noop() {
        let h = harness();
        let summary = h.reconciler.tick().await;
        assert_eq!(summary, TickSummary::default());
        assert_eq!(h.chain.scans(), 0);
    }

    #[tokio::test]
    async fn test_match_hands_off_and_removes_candidate() {
        let h = harness();
        let token = Pubkey::new_unique();
        let pool = Pubkey::new_unique();
        h.chain
            .add_program_account(h.program, pool, PoolAccountBuilder::qualifying(token).build());
        h.registry.add_default(token);

        let summary = h.reconciler.tick().await;
        assert_eq!(summary.matched, vec![ActionKey::new(token, pool)]);
        assert!(!h.registry.has(&token));
        assert!(h.reconciler.drain_in_flight(Duration::from_secs(1)).await);
        assert_eq!(h.executor.executed(), vec![ActionKey::new(token, pool)]);
        assert_eq!(h.reconciler.phase(), ReconcilerPhase::Idle);
    }

    #[tokio::test]
    async fn test_token_on_b_side_found() {
        let h = harness();
        let token = Pubkey::new_unique();
        let pool = Pubkey::new_unique();
        // Token on B, SOL on A: found by the B-offset scan, rejected on fee side
        h.chain.add_program_account(
            h.program,
            pool,
            PoolAccountBuilder::new(native_mint(), token).collect_fee_mode(1).build(),
        );
        h.registry.add_default(token);

        let summary = h.reconciler.tick().await;
        assert_eq!(summary.pools_evaluated, 1);
        assert!(summary.matched.is_empty());
        assert_eq!(h.chain.scans(), 2);
        assert!(h.registry.has(&token));
    }

    #[tokio::test]
    async fn test_rejected_pool_not_reevaluated() {
        let h = harness();
        let token = Pubkey::new_unique();
        h.chain.add_program_account(
            h.program,
            Pubkey::new_unique(),
            PoolAccountBuilder::qualifying(token).collect_fee_mode(0).build(),
        );
        h.registry.add_default(token);

        assert_eq!(h.reconciler.tick().await.pools_evaluated, 1);
        assert_eq!(h.reconciler.seen_pools(), 1);
        assert_eq!(h.reconciler.tick().await.pools_evaluated, 0);
        assert!(h.executor.executed().is_empty());
    }

    #[tokio::test]
    async fn test_first_match_wins() {
        let h = harness();
        let token = Pubkey::new_unique();
        for _ in 0..2 {
            h.chain.add_program_account(
                h.program,
                Pubkey::new_unique(),
                PoolAccountBuilder::qualifying(token).build(),
            );
        }
        h.registry.add_default(token);

        let summary = h.reconciler.tick().await;
        assert_eq!(summary.matched.len(), 1);
        h.reconciler.drain_in_flight(Duration::from_secs(1)).await;
        assert_eq!(h.executor.executed().len(), 1);

        // Candidate is gone; the second pool is never looked at
        assert_eq!(h.reconciler.tick().await, TickSummary::default());
    }

    #[tokio::test]
    async fn test_scan_failure_retried_next_tick() {
        let h = harness();
        let token = Pubkey::new_unique();
        let pool = Pubkey::new_unique();
        h.chain
            .add_program_account(h.program, pool, PoolAccountBuilder::qualifying(token).build());
        h.registry.add_default(token);
        h.chain.fail_next_scans(1);

        // The token-A scan fails; the token-B scan runs and finds nothing
        let summary = h.reconciler.tick().await;
        assert_eq!(summary.errors, 1);
        assert!(summary.matched.is_empty());
        assert!(h.registry.has(&token));

        let summary = h.reconciler.tick().await;
        assert_eq!(summary.matched, vec![ActionKey::new(token, pool)]);
    }

    #[tokio::test]
    async fn test_overlapping_tick_skipped() {
        let h = harness();
        h.registry.add_default(Pubkey::new_unique());
        h.reconciler.in_progress.store(true, Ordering::SeqCst);

        let summary = h.reconciler.tick().await;
        assert!(summary.skipped);
        assert_eq!(h.chain.scans(), 0);

        h.reconciler.in_progress.store(false, Ordering::SeqCst);
        assert!(!h.reconciler.tick().await.skipped);
    }

    #[tokio::test]
    async fn test_stopped_reconciler_hands_off_nothing() {
        let h = harness();
        let token = Pubkey::new_unique();
        h.chain
            .add_program_account(h.program, Pubkey::new_unique(), PoolAccountBuilder::qualifying(token).build());
        h.registry.add_default(token);

        h.reconciler.stop();
        let summary = h.reconciler.tick().await;
        assert!(summary.matched.is_empty());
        assert_eq!(h.chain.scans(), 0);
        assert!(h.registry.has(&token));
        assert!(h.executor.executed().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_waits_for_tick_in_progress() {
        let h = harness();
        let reconciler = Arc::new(h.reconciler);
        let token = Pubkey::new_unique();
        h.chain
            .add_program_account(h.program, Pubkey::new_unique(), PoolAccountBuilder::qualifying(token).build());
        h.registry.add_default(token);
        h.chain.delay_scans(Duration::from_secs(5));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let run = tokio::spawn(reconciler.clone().run(shutdown_rx));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(reconciler.phase(), ReconcilerPhase::Querying);

        shutdown_tx.send_replace(true);
        h.registry.clear();
        run.await.unwrap();

        // The scan finished inside run; nothing was left to start after the drain
        assert_eq!(reconciler.phase(), ReconcilerPhase::Idle);
        assert!(reconciler.drain_in_flight(Duration::from_secs(60)).await);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(h.executor.executed().is_empty());
        assert_eq!(reconciler.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_times_out_on_slow_action() {
        let chain = Arc::new(FakeChain::new());
        let registry = Arc::new(CandidateRegistry::new(Duration::from_secs(420)));
        let program = Pubkey::new_unique();
        let reconciler = Reconciler::new(
            registry.clone(),
            chain.clone(),
            Arc::new(RecordingExecutor::with_delay(Duration::from_secs(120))),
            Arc::new(ReconcilerState::new()),
            AppState::new(Mode::Simulation),
            program,
            Duration::from_secs(20),
        );
        let token = Pubkey::new_unique();
        chain.add_program_account(program, Pubkey::new_unique(), PoolAccountBuilder::qualifying(token).build());
        registry.add_default(token);

        reconciler.tick().await;
        assert_eq!(reconciler.in_flight(), 1);
        assert!(!reconciler.drain_in_flight(Duration::from_secs(60)).await);
    }
}
