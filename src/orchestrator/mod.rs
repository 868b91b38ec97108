//! Action orchestration for a matched (token, pool) pair
//!
//! One action is: purchase the token with SOL, wait for the balance to settle,
//! then (when enabled) open a liquidity position in the matched pool. Every
//! key runs at most once per process; a failed action stays processed.

pub mod confirm;
pub mod outcome;

use async_trait::async_trait;
use dashmap::DashSet;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signature, Signer};
use solana_sdk::transaction::VersionedTransaction;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_retry::strategy::FixedInterval;
use tokio_retry::RetryIf;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::liquidity::{plan_liquidity, AddLiquidityRequest, LiquidityBuilder, LiquidityError};
use crate::metrics::{metrics, Timer};
use crate::notifier::{Milestone, Notification, NotificationSink};
use crate::pool::{PoolDecodeError, PoolState};
use crate::rpc::{ChainClient, RpcManagerError, TransactionFailure};
use crate::structured_logging::PipelineContext;
use crate::swap::{QuoteRequest, SwapAggregator, SwapError};
use crate::types::{native_mint, ActionKey, AppState, Mode};

pub use confirm::{await_confirmation, ConfirmSchedule, Confirmation};
pub use outcome::{
    classify_failure, ActionOutcome, ActionReport, CleanupWarning, PurchaseResult, NON_CRITICAL_INSTRUCTION_INDEX,
};

/// Seam between the reconciler and whatever executes a matched pair
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(&self, key: ActionKey, pool_state: PoolState) -> ActionReport;
}

#[derive(Debug, Error)]
pub enum PurchaseError {
    #[error("Wallet balance {balance} lamports cannot cover {required} lamports plus reserve")]
    InsufficientSol { balance: u64, required: u64 },

    #[error(transparent)]
    Swap(#[from] SwapError),

    #[error(transparent)]
    Rpc(#[from] RpcManagerError),

    #[error("Failed to sign swap transaction: {0}")]
    Signing(String),

    #[error("Simulation failed: {}", .0.message)]
    Simulation(TransactionFailure),

    #[error("Swap transaction failed on chain: {}", .0.message)]
    Rejected(TransactionFailure),

    #[error("Swap transaction {0} was never confirmed")]
    Unconfirmed(Signature),
}

impl PurchaseError {
    /// Funding shortfalls, missing routes and swaps that failed on chain are final
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            PurchaseError::InsufficientSol { .. }
                | PurchaseError::Rejected(_)
                | PurchaseError::Swap(SwapError::NoRoute(_))
        )
    }
}

#[derive(Debug, Error)]
enum LiquidityStepError {
    #[error(transparent)]
    Rpc(#[from] RpcManagerError),

    #[error(transparent)]
    Decode(#[from] PoolDecodeError),

    #[error(transparent)]
    Liquidity(#[from] LiquidityError),

    #[error("{0}")]
    Transaction(String),
}

#[derive(Debug, Clone)]
pub struct LiquiditySettings {
    pub sol_amount_lamports: u64,
    pub slippage_bps: u16,
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub mode: Mode,
    pub buy_amount_lamports: u64,
    pub slippage_bps: u16,
    pub min_sol_reserve_lamports: u64,
    pub purchase_attempts: usize,
    pub purchase_retry_delay: Duration,
    pub confirm: ConfirmSchedule,
    pub settlement_poll: Duration,
    pub settlement_timeout: Duration,
    /// `None` disables the liquidity step
    pub liquidity: Option<LiquiditySettings>,
}

impl OrchestratorSettings {
    pub fn from_config(config: &Config, mode: Mode) -> Self {
        let trading = &config.trading;
        Self {
            mode,
            buy_amount_lamports: trading.buy_amount_lamports(),
            slippage_bps: trading.slippage_bps,
            min_sol_reserve_lamports: trading.min_sol_reserve_lamports,
            purchase_attempts: trading.purchase_attempts.max(1),
            purchase_retry_delay: Duration::from_millis(trading.purchase_retry_delay_ms),
            confirm: ConfirmSchedule {
                checks: trading.confirm_checks,
                step: Duration::from_millis(trading.confirm_step_ms),
            },
            settlement_poll: Duration::from_millis(trading.settlement_poll_ms),
            settlement_timeout: Duration::from_millis(trading.settlement_timeout_ms),
            liquidity: config.liquidity.enabled.then(|| LiquiditySettings {
                sol_amount_lamports: config.liquidity.sol_amount_lamports(),
                slippage_bps: config.liquidity.slippage_bps,
            }),
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from_config(&Config::default(), Mode::Simulation)
    }
}

pub struct ActionOrchestrator {
    chain: Arc<dyn ChainClient>,
    swap: Arc<dyn SwapAggregator>,
    liquidity: Arc<dyn LiquidityBuilder>,
    wallet: Arc<Keypair>,
    notifier: NotificationSink,
    app_state: AppState,
    settings: OrchestratorSettings,
    processed: DashSet<ActionKey>,
}

impl ActionOrchestrator {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        swap: Arc<dyn SwapAggregator>,
        liquidity: Arc<dyn LiquidityBuilder>,
        wallet: Arc<Keypair>,
        notifier: NotificationSink,
        app_state: AppState,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            chain,
            swap,
            liquidity,
            wallet,
            notifier,
            app_state,
            settings,
            processed: DashSet::new(),
        }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub fn is_processed(&self, key: &ActionKey) -> bool {
        self.processed.contains(key)
    }

    pub fn processed_count(&self) -> usize {
        self.processed.len()
    }

    fn owner(&self) -> Pubkey {
        self.wallet.pubkey()
    }

    fn notify(&self, milestone: Milestone, key: &ActionKey, text: String, signature: Option<&Signature>) {
        let mut notification = Notification::new(milestone, key.token, text).with_pool(key.pool);
        if let Some(sig) = signature {
            notification = notification.with_signature(sig.to_string());
        }
        self.notifier.fire(notification);
    }

    async fn run(&self, key: ActionKey, pool_state: PoolState) -> ActionReport {
        let ctx = PipelineContext::new("action");
        ctx.logger.log_pool_matched(&key);
        self.notify(
            Milestone::PoolMatched,
            &key,
            "Graduated token found in a qualifying pool".to_string(),
            None,
        );

        let mut report = ActionReport {
            key,
            outcome: ActionOutcome::Success,
            purchase: None,
            position_signature: None,
            correlation_id: Some(ctx.correlation_id.clone()),
        };

        let purchase = match self.purchase(&key, &ctx).await {
            Ok(purchase) => purchase,
            Err(e) => {
                metrics().purchases_failed.inc();
                ctx.logger.error(&format!("purchase failed for {}: {}", key, e));
                return self.fail(report, format!("purchase failed: {}", e));
            }
        };
        report.purchase = Some(purchase.clone());

        match &purchase {
            PurchaseResult::AlreadyHeld { balance } => {
                metrics().purchases_skipped.inc();
                info!(token = %key.token, balance, "Token already held, skipping purchase");
            }
            PurchaseResult::Bought { signature, warning, .. } => {
                metrics().purchases_ok.inc();
                let mut text = format!("Bought with {} lamports", self.settings.buy_amount_lamports);
                if let Some(warning) = warning {
                    warn!(
                        token = %key.token,
                        signature = %signature,
                        instruction_index = warning.instruction_index,
                        code = ?warning.code,
                        "Swap landed, cleanup instruction failed"
                    );
                    text.push_str(&format!(" (instruction {} failed)", warning.instruction_index));
                    report.outcome = warning.outcome();
                }
                self.notify(Milestone::PurchaseComplete, &key, text, Some(signature));
            }
            PurchaseResult::Simulated { expected_out } => {
                info!(token = %key.token, expected_out, "Simulation mode: purchase not submitted");
            }
        }

        let Some(liquidity) = self.settings.liquidity.clone() else {
            return report;
        };

        let token_balance = match &purchase {
            PurchaseResult::Simulated { expected_out } => *expected_out,
            _ => match self.wait_for_settlement(&key.token).await {
                Some(balance) => balance,
                None => {
                    return self.fail(
                        report,
                        format!("token balance did not settle within {:?}", self.settings.settlement_timeout),
                    )
                }
            },
        };

        let lp_ctx = ctx.child("liquidity");
        match self.provide_liquidity(&key, &pool_state, token_balance, &liquidity).await {
            Ok((outcome, signature)) => {
                let sig_text = signature.map(|s| s.to_string());
                lp_ctx
                    .logger
                    .log_liquidity_result(&key, sig_text.as_deref(), outcome.label());
                report.position_signature = signature;
                match &outcome {
                    ActionOutcome::Success => {
                        metrics().positions_ok.inc();
                        if signature.is_some() {
                            self.notify(
                                Milestone::PositionCreated,
                                &key,
                                "Liquidity position created".to_string(),
                                signature.as_ref(),
                            );
                        }
                    }
                    ActionOutcome::SuccessWithWarning { code, instruction_index } => {
                        metrics().positions_warned.inc();
                        warn!(
                            token = %key.token,
                            pool = %key.pool,
                            instruction_index,
                            code = ?code,
                            "Position created, cleanup instruction failed"
                        );
                        self.notify(
                            Milestone::PositionCreated,
                            &key,
                            format!("Liquidity position created (instruction {} failed)", instruction_index),
                            signature.as_ref(),
                        );
                    }
                    ActionOutcome::Failure(reason) => {
                        metrics().positions_failed.inc();
                        return self.fail(report, format!("liquidity failed: {}", reason));
                    }
                    ActionOutcome::Skipped => {}
                }
                // A clean position keeps any warning from the swap
                if outcome != ActionOutcome::Success {
                    report.outcome = outcome;
                }
                report
            }
            Err(e) => {
                metrics().positions_failed.inc();
                lp_ctx.logger.error(&format!("liquidity failed for {}: {}", key, e));
                self.fail(report, format!("liquidity failed: {}", e))
            }
        }
    }

    fn fail(&self, mut report: ActionReport, reason: String) -> ActionReport {
        self.notify(Milestone::ActionFailed, &report.key, reason.clone(), None);
        report.outcome = ActionOutcome::Failure(reason);
        report
    }

    /// Buy the token unless it is already held, retrying whole attempts
    pub async fn purchase(&self, key: &ActionKey, ctx: &PipelineContext) -> Result<PurchaseResult, PurchaseError> {
        let held = self.chain.token_balance(&self.owner(), &key.token).await?;
        if held > 0 {
            return Ok(PurchaseResult::AlreadyHeld { balance: held });
        }

        let strategy = FixedInterval::new(self.settings.purchase_retry_delay)
            .take(self.settings.purchase_attempts.saturating_sub(1));
        let mut attempt = 0usize;

        RetryIf::spawn(
            strategy,
            || {
                attempt += 1;
                let current = attempt;
                async move {
                    ctx.logger
                        .log_purchase_attempt(key, current, self.settings.buy_amount_lamports);
                    let started = Instant::now();
                    let result = self.purchase_attempt(key).await;
                    match &result {
                        Ok(PurchaseResult::Bought { signature, .. }) => ctx.logger.log_purchase_success(
                            key,
                            &signature.to_string(),
                            started.elapsed().as_millis() as u64,
                        ),
                        Ok(_) => {}
                        Err(e) => ctx.logger.log_purchase_failure(key, &e.to_string(), current),
                    }
                    result
                }
            },
            PurchaseError::is_retryable,
        )
        .await
    }

    async fn purchase_attempt(&self, key: &ActionKey) -> Result<PurchaseResult, PurchaseError> {
        let owner = self.owner();
        let amount = self.settings.buy_amount_lamports;

        let balance = self.chain.sol_balance(&owner).await?;
        let required = amount.saturating_add(self.settings.min_sol_reserve_lamports);
        if balance < required {
            return Err(PurchaseError::InsufficientSol { balance, required });
        }

        let quote = self
            .swap
            .quote(&QuoteRequest {
                input_mint: native_mint(),
                output_mint: key.token,
                amount,
                slippage_bps: self.settings.slippage_bps,
            })
            .await?;
        debug!(
            token = %key.token,
            out_amount = quote.out_amount,
            price_impact = ?quote.price_impact_pct,
            "Quote received"
        );

        let unsigned = self.swap.swap_transaction(&quote, &owner).await?;
        let tx = VersionedTransaction::try_new(unsigned.message, &[self.wallet.as_ref()])
            .map_err(|e| PurchaseError::Signing(e.to_string()))?;

        let simulation = self.chain.simulate(&tx).await?;
        if let Some(failure) = simulation.err {
            debug!(token = %key.token, logs = ?simulation.logs, "Swap simulation failed");
            return Err(PurchaseError::Simulation(failure));
        }

        if self.settings.mode.is_simulation() {
            return Ok(PurchaseResult::Simulated {
                expected_out: quote.out_amount,
            });
        }

        let signature = self.chain.send(&tx).await?;
        info!(token = %key.token, signature = %signature, "Swap submitted");

        match await_confirmation(self.chain.as_ref(), &signature, self.settings.confirm).await? {
            Confirmation::Confirmed => Ok(PurchaseResult::Bought {
                signature,
                expected_out: quote.out_amount,
                warning: None,
            }),
            Confirmation::Failed(failure) => match classify_failure(&failure) {
                ActionOutcome::SuccessWithWarning { code, instruction_index } => Ok(PurchaseResult::Bought {
                    signature,
                    expected_out: quote.out_amount,
                    warning: Some(CleanupWarning { code, instruction_index }),
                }),
                _ => Err(PurchaseError::Rejected(failure)),
            },
            Confirmation::Unknown => Err(PurchaseError::Unconfirmed(signature)),
        }
    }

    /// Poll until a positive token balance shows up or the timeout passes
    async fn wait_for_settlement(&self, token: &Pubkey) -> Option<u64> {
        let owner = self.owner();
        let deadline = Instant::now() + self.settings.settlement_timeout;

        loop {
            match self.chain.token_balance(&owner, token).await {
                Ok(balance) if balance > 0 => return Some(balance),
                Ok(_) => debug!(token = %token, "Token balance not settled yet"),
                Err(e) => warn!(token = %token, error = %e, "Balance check failed"),
            }
            if Instant::now() + self.settings.settlement_poll > deadline {
                return None;
            }
            tokio::time::sleep(self.settings.settlement_poll).await;
        }
    }

    async fn provide_liquidity(
        &self,
        key: &ActionKey,
        matched_state: &PoolState,
        token_balance: u64,
        settings: &LiquiditySettings,
    ) -> Result<(ActionOutcome, Option<Signature>), LiquidityStepError> {
        // Price moves between match and purchase; size against the current state
        let pool_state = match self.chain.account_data(&key.pool).await {
            Ok(data) => PoolState::decode(&data)?,
            Err(e) => {
                warn!(pool = %key.pool, error = %e, "Pool refresh failed, using matched state");
                matched_state.clone()
            }
        };

        let plan = plan_liquidity(
            &pool_state,
            &key.token,
            token_balance,
            settings.sol_amount_lamports,
            settings.slippage_bps,
        )?;
        info!(
            token = %key.token,
            pool = %key.pool,
            token_amount = plan.token_amount,
            sol_amount = plan.sol_amount,
            liquidity_delta = %plan.liquidity_delta,
            "Liquidity planned"
        );

        let request = AddLiquidityRequest {
            pool: key.pool,
            token_a_program: self.chain.account_owner(&pool_state.token_a_mint).await?,
            token_b_program: self.chain.account_owner(&pool_state.token_b_mint).await?,
            pool_state,
            plan,
        };

        let blockhash = self.chain.latest_blockhash().await?;
        let wrap = self
            .liquidity
            .build_wrap_sol(&self.wallet, plan.sol_amount, blockhash)
            .await?;
        let position = self
            .liquidity
            .build_create_position_and_add_liquidity(&request, &self.wallet, blockhash)
            .await?;

        if self.settings.mode.is_simulation() {
            info!(token = %key.token, pool = %key.pool, "Simulation mode: position not submitted");
            return Ok((ActionOutcome::Success, None));
        }

        let wrap_sig = self.chain.send(&wrap).await?;
        match await_confirmation(self.chain.as_ref(), &wrap_sig, self.settings.confirm).await? {
            Confirmation::Confirmed => {}
            Confirmation::Failed(failure) => {
                return Err(LiquidityStepError::Transaction(format!("wrap failed: {}", failure.message)))
            }
            Confirmation::Unknown => {
                return Err(LiquidityStepError::Transaction(format!("wrap {} unconfirmed", wrap_sig)))
            }
        }

        let signature = self.chain.send(&position).await?;
        info!(pool = %key.pool, signature = %signature, "Position transaction submitted");

        let outcome = match await_confirmation(self.chain.as_ref(), &signature, self.settings.confirm).await? {
            Confirmation::Confirmed => ActionOutcome::Success,
            Confirmation::Failed(failure) => classify_failure(&failure),
            Confirmation::Unknown => ActionOutcome::Failure(format!("position {} unconfirmed", signature)),
        };
        Ok((outcome, Some(signature)))
    }
}

#[async_trait]
impl ActionExecutor for ActionOrchestrator {
    async fn execute(&self, key: ActionKey, pool_state: PoolState) -> ActionReport {
        // Marked before any external call; the second caller sees it taken
        if !self.processed.insert(key) {
            debug!(key = %key, "Action already processed");
            return ActionReport::skipped(key);
        }

        metrics().in_flight_actions.inc();
        let _in_flight = scopeguard::guard((), |_| metrics().in_flight_actions.dec());
        let timer = Timer::new();

        let report = self.run(key, pool_state).await;
        timer.observe_duration(&metrics().action_latency);

        let spent_sol = match &report.purchase {
            Some(PurchaseResult::Bought { .. }) => {
                self.settings.buy_amount_lamports as f64 / crate::config::LAMPORTS_PER_SOL as f64
            }
            _ => 0.0,
        };
        self.app_state.record_action(&report.outcome, spent_sol).await;

        info!(
            token = %key.token,
            pool = %key.pool,
            outcome = %report.outcome,
            "Action finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::liquidity::DammV2Builder;
    use crate::test_utils::{FakeChain, FakeSwap, PoolAccountBuilder};

    fn settings(mode: Mode) -> OrchestratorSettings {
        OrchestratorSettings {
            mode,
            buy_amount_lamports: 1_000_000,
            slippage_bps: 100,
            min_sol_reserve_lamports: 10_000_000,
            purchase_attempts: 3,
            purchase_retry_delay: Duration::from_secs(2),
            confirm: ConfirmSchedule {
                checks: 6,
                step: Duration::from_secs(5),
            },
            settlement_poll: Duration::from_secs(2),
            settlement_timeout: Duration::from_secs(30),
            liquidity: None,
        }
    }

    fn orchestrator(chain: Arc<FakeChain>, swap: Arc<FakeSwap>, settings: OrchestratorSettings) -> ActionOrchestrator {
        ActionOrchestrator::new(
            chain,
            swap,
            Arc::new(DammV2Builder::new(Pubkey::new_unique())),
            Arc::new(Keypair::new()),
            NotificationSink::default(),
            AppState::new(settings.mode),
            settings,
        )
    }

    fn key_and_state() -> (ActionKey, PoolState) {
        let token = Pubkey::new_unique();
        let state = PoolState::decode(&PoolAccountBuilder::qualifying(token).build()).unwrap();
        (ActionKey::new(token, Pubkey::new_unique()), state)
    }

    #[tokio::test(start_paused = true)]
    async fn test_purchase_retries_then_succeeds() {
        let chain = Arc::new(FakeChain::new());
        let swap = Arc::new(FakeSwap::new(10));
        swap.fail_next_quotes(2);
        let orch = orchestrator(chain.clone(), swap.clone(), settings(Mode::Production));
        let (key, state) = key_and_state();

        let report = orch.execute(key, state).await;
        assert_eq!(report.outcome, ActionOutcome::Success);
        assert_eq!(swap.quotes(), 3);
        assert!(matches!(report.purchase, Some(PurchaseResult::Bought { .. })));
        assert_eq!(chain.sent().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purchase_gives_up_after_three_attempts() {
        let chain = Arc::new(FakeChain::new());
        let swap = Arc::new(FakeSwap::new(10));
        swap.fail_next_quotes(10);
        let orch = orchestrator(chain.clone(), swap.clone(), settings(Mode::Production));
        let (key, state) = key_and_state();

        let report = orch.execute(key, state.clone()).await;
        assert!(matches!(report.outcome, ActionOutcome::Failure(_)));
        assert_eq!(swap.quotes(), 3);

        // Failed keys stay processed
        assert!(orch.is_processed(&key));
        assert_eq!(orch.execute(key, state).await.outcome, ActionOutcome::Skipped);
        assert_eq!(swap.quotes(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reserve_shortfall_is_not_retried() {
        let chain = Arc::new(FakeChain::new());
        let swap = Arc::new(FakeSwap::new(10));
        let orch = orchestrator(chain.clone(), swap.clone(), settings(Mode::Production));
        chain.set_sol_balance(orch.owner(), 5_000_000);
        let (key, state) = key_and_state();

        let report = orch.execute(key, state).await;
        assert!(matches!(report.outcome, ActionOutcome::Failure(ref r) if r.contains("reserve")));
        assert_eq!(swap.quotes(), 0);
    }

    #[test]
    fn test_hard_purchase_failures_are_final() {
        let landed = TransactionFailure {
            instruction_index: Some(2),
            code: Some(6001),
            message: "InstructionError(2, Custom(6001))".to_string(),
        };
        assert!(!PurchaseError::Rejected(landed.clone()).is_retryable());
        assert!(!PurchaseError::Swap(SwapError::NoRoute("no route".to_string())).is_retryable());
        assert!(!PurchaseError::InsufficientSol {
            balance: 1,
            required: 2
        }
        .is_retryable());

        assert!(PurchaseError::Simulation(landed).is_retryable());
        assert!(PurchaseError::Swap(SwapError::RateLimited).is_retryable());
        assert!(PurchaseError::Unconfirmed(Signature::default()).is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulation_mode_never_sends() {
        let chain = Arc::new(FakeChain::new());
        let swap = Arc::new(FakeSwap::new(10));
        let mut s = settings(Mode::Simulation);
        s.liquidity = Some(LiquiditySettings {
            sol_amount_lamports: 1_000_000,
            slippage_bps: 100,
        });
        let orch = orchestrator(chain.clone(), swap.clone(), s);
        let (key, state) = key_and_state();

        let report = orch.execute(key, state).await;
        assert_eq!(report.outcome, ActionOutcome::Success);
        assert_eq!(report.purchase, Some(PurchaseResult::Simulated { expected_out: 10_000_000 }));
        assert!(chain.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulation_failure_surfaces() {
        let chain = Arc::new(FakeChain::new());
        chain.fail_simulation(TransactionFailure {
            instruction_index: Some(3),
            code: Some(6001),
            message: "slippage".to_string(),
        });
        let swap = Arc::new(FakeSwap::new(10));
        let orch = orchestrator(chain.clone(), swap.clone(), settings(Mode::Production));
        let (key, state) = key_and_state();

        let report = orch.execute(key, state).await;
        assert!(matches!(report.outcome, ActionOutcome::Failure(_)));
        assert_eq!(swap.quotes(), 3);
        assert!(chain.sent().is_empty());
    }
}
