//! Test Utilities Module
//!
//! In-memory stand-ins for the chain, the swap aggregator and the notifier,
//! plus a builder for raw pool accounts. Nothing here touches the network.
//!
//! These utilities are only compiled when running tests or when the
//! `test_utils` feature is enabled.

#![cfg(any(test, feature = "test_utils"))]

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::json;
use solana_sdk::hash::Hash;
use solana_sdk::instruction::{AccountMeta, Instruction};
use solana_sdk::message::Message;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::{Transaction, VersionedTransaction};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use crate::notifier::{Notification, Notifier, NotifyError};
use crate::orchestrator::{ActionExecutor, ActionOutcome, ActionReport, NON_CRITICAL_INSTRUCTION_INDEX};
use crate::pool::state::*;
use crate::rpc::{
    ChainClient, ProgramAccount, RpcManagerError, RpcResult, SignatureState, SimulationReport,
    TokenBalanceEntry, TransactionFailure,
};
use crate::swap::{QuoteRequest, SwapAggregator, SwapError, SwapQuote};
use crate::types::ActionKey;

/// Program id of the instruction [`FakeSwap`] puts in its transactions.
///
/// [`FakeChain`] credits the payer with the swapped tokens when it sees it.
pub const FAKE_SWAP_PROGRAM: Pubkey = Pubkey::new_from_array([0xfa; 32]);

#[derive(Default)]
struct ChainState {
    transactions: HashMap<Signature, Vec<TokenBalanceEntry>>,
    accounts: HashMap<Pubkey, Vec<u8>>,
    owners: HashMap<Pubkey, Pubkey>,
    /// (program, data) pairs scanned by `scan_program_accounts`
    program_accounts: Vec<(Pubkey, ProgramAccount)>,
    token_balances: HashMap<(Pubkey, Pubkey), u64>,
    sol_balances: HashMap<Pubkey, u64>,
    failing_programs: HashMap<Pubkey, TransactionFailure>,
    simulation_failure: Option<TransactionFailure>,
    sent: Vec<VersionedTransaction>,
}

/// An in-memory chain.
///
/// Sent transactions confirm immediately unless they invoke a program marked
/// with [`FakeChain::fail_when_invoking`].
pub struct FakeChain {
    state: Mutex<ChainState>,
    statuses: DashMap<Signature, SignatureState>,
    transaction_fetches: AtomicUsize,
    scans: AtomicUsize,
    scan_errors: AtomicUsize,
    scan_delay: Mutex<Duration>,
}

impl FakeChain {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ChainState::default()),
            statuses: DashMap::new(),
            transaction_fetches: AtomicUsize::new(0),
            scans: AtomicUsize::new(0),
            scan_errors: AtomicUsize::new(0),
            scan_delay: Mutex::new(Duration::ZERO),
        }
    }

    pub fn set_transaction_balances(&self, signature: Signature, balances: Vec<TokenBalanceEntry>) {
        self.state.lock().transactions.insert(signature, balances);
    }

    pub fn transaction_fetches(&self) -> usize {
        self.transaction_fetches.load(Ordering::SeqCst)
    }

    /// Register a pool account owned by `program`
    pub fn add_program_account(&self, program: Pubkey, pubkey: Pubkey, data: Vec<u8>) {
        let mut state = self.state.lock();
        state.accounts.insert(pubkey, data.clone());
        state.owners.insert(pubkey, program);
        state.program_accounts.push((program, ProgramAccount { pubkey, data }));
    }

    pub fn set_account_owner(&self, account: Pubkey, owner: Pubkey) {
        self.state.lock().owners.insert(account, owner);
    }

    pub fn set_token_balance(&self, owner: Pubkey, mint: Pubkey, amount: u64) {
        self.state.lock().token_balances.insert((owner, mint), amount);
    }

    pub fn set_sol_balance(&self, owner: Pubkey, lamports: u64) {
        self.state.lock().sol_balances.insert(owner, lamports);
    }

    /// Transactions invoking `program` land but fail with `failure`
    pub fn fail_when_invoking(&self, program: Pubkey, failure: TransactionFailure) {
        self.state.lock().failing_programs.insert(program, failure);
    }

    pub fn fail_simulation(&self, failure: TransactionFailure) {
        self.state.lock().simulation_failure = Some(failure);
    }

    /// Make the next `count` scans fail with a transport error
    pub fn fail_next_scans(&self, count: usize) {
        self.scan_errors.store(count, Ordering::SeqCst);
    }

    /// Every scan sleeps for `delay` before answering
    pub fn delay_scans(&self, delay: Duration) {
        *self.scan_delay.lock() = delay;
    }

    pub fn sent(&self) -> Vec<VersionedTransaction> {
        self.state.lock().sent.clone()
    }

    pub fn scans(&self) -> usize {
        self.scans.load(Ordering::SeqCst)
    }

    /// Number of sent transactions invoking `program`
    pub fn sent_invoking(&self, program: &Pubkey) -> usize {
        self.state
            .lock()
            .sent
            .iter()
            .filter(|tx| invoked_programs(tx).contains(program))
            .count()
    }
}

impl Default for FakeChain {
    fn default() -> Self {
        Self::new()
    }
}

fn invoked_programs(tx: &VersionedTransaction) -> Vec<Pubkey> {
    let keys = tx.message.static_account_keys();
    tx.message
        .instructions()
        .iter()
        .filter_map(|ix| keys.get(ix.program_id_index as usize).copied())
        .collect()
}

#[async_trait]
impl ChainClient for FakeChain {
    async fn transaction_token_balances(&self, signature: &Signature) -> RpcResult<Vec<TokenBalanceEntry>> {
        self.transaction_fetches.fetch_add(1, Ordering::SeqCst);
        self.state
            .lock()
            .transactions
            .get(signature)
            .cloned()
            .ok_or_else(|| RpcManagerError::InvalidData(format!("unknown transaction {}", signature)))
    }

    async fn scan_program_accounts(
        &self,
        program: &Pubkey,
        data_size: u64,
        offset: usize,
        mint: &Pubkey,
    ) -> RpcResult<Vec<ProgramAccount>> {
        self.scans.fetch_add(1, Ordering::SeqCst);
        let delay = *self.scan_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let pending_errors = self.scan_errors.load(Ordering::SeqCst);
        if pending_errors > 0 {
            self.scan_errors.store(pending_errors - 1, Ordering::SeqCst);
            return Err(RpcManagerError::Transport {
                endpoint: "fake".to_string(),
                message: "connection reset".to_string(),
            });
        }

        let state = self.state.lock();
        Ok(state
            .program_accounts
            .iter()
            .filter(|(owner, account)| {
                owner == program
                    && account.data.len() as u64 == data_size
                    && account.data.get(offset..offset + 32) == Some(mint.as_ref())
            })
            .map(|(_, account)| account.clone())
            .collect())
    }

    async fn account_data(&self, account: &Pubkey) -> RpcResult<Vec<u8>> {
        self.state
            .lock()
            .accounts
            .get(account)
            .cloned()
            .ok_or_else(|| RpcManagerError::AccountNotFound {
                account: account.to_string(),
            })
    }

    async fn account_owner(&self, account: &Pubkey) -> RpcResult<Pubkey> {
        Ok(self
            .state
            .lock()
            .owners
            .get(account)
            .copied()
            .unwrap_or_else(spl_token::id))
    }

    async fn token_balance(&self, owner: &Pubkey, mint: &Pubkey) -> RpcResult<u64> {
        Ok(self
            .state
            .lock()
            .token_balances
            .get(&(*owner, *mint))
            .copied()
            .unwrap_or(0))
    }

    async fn sol_balance(&self, owner: &Pubkey) -> RpcResult<u64> {
        Ok(self
            .state
            .lock()
            .sol_balances
            .get(owner)
            .copied()
            .unwrap_or(100 * crate::config::LAMPORTS_PER_SOL))
    }

    async fn latest_blockhash(&self) -> RpcResult<Hash> {
        Ok(Hash::new_unique())
    }

    async fn simulate(&self, _tx: &VersionedTransaction) -> RpcResult<SimulationReport> {
        Ok(SimulationReport {
            err: self.state.lock().simulation_failure.clone(),
            logs: vec!["Program log: simulated".to_string()],
            units_consumed: Some(50_000),
        })
    }

    async fn send(&self, tx: &VersionedTransaction) -> RpcResult<Signature> {
        let signature = tx.signatures.first().copied().unwrap_or_default();
        let programs = invoked_programs(tx);
        let keys = tx.message.static_account_keys();
        let payer = keys.first().copied().unwrap_or_default();

        let mut state = self.state.lock();
        let failure = programs
            .iter()
            .find_map(|program| state.failing_programs.get(program).cloned());

        // A failure on a cleanup instruction still leaves the swap credited
        let credits = failure.as_ref().map_or(true, |f| {
            f.instruction_index
                .map_or(false, |index| index >= NON_CRITICAL_INSTRUCTION_INDEX)
        });
        if credits {
            for ix in tx.message.instructions() {
                if keys.get(ix.program_id_index as usize) != Some(&FAKE_SWAP_PROGRAM) {
                    continue;
                }
                let mint = ix.accounts.first().and_then(|i| keys.get(*i as usize)).copied();
                let amount = ix.data.get(..8).and_then(|b| b.try_into().ok()).map(u64::from_le_bytes);
                if let (Some(mint), Some(amount)) = (mint, amount) {
                    *state.token_balances.entry((payer, mint)).or_insert(0) += amount;
                }
            }
        }
        let status = match failure {
            Some(failure) => SignatureState::Failed(failure),
            None => SignatureState::Confirmed,
        };
        self.statuses.insert(signature, status);
        state.sent.push(tx.clone());
        Ok(signature)
    }

    async fn signature_status(&self, signature: &Signature, _search_history: bool) -> RpcResult<Option<SignatureState>> {
        Ok(self.statuses.get(signature).map(|s| s.clone()))
    }
}

/// Aggregator returning fixed-rate quotes and single-instruction swaps
pub struct FakeSwap {
    /// Output base units per input lamport
    pub rate: u64,
    quotes: AtomicUsize,
    swaps: AtomicUsize,
    failures_remaining: AtomicUsize,
    no_route: AtomicBool,
}

impl FakeSwap {
    pub fn new(rate: u64) -> Self {
        Self {
            rate,
            quotes: AtomicUsize::new(0),
            swaps: AtomicUsize::new(0),
            failures_remaining: AtomicUsize::new(0),
            no_route: AtomicBool::new(false),
        }
    }

    /// The next `count` quote calls fail with an API error
    pub fn fail_next_quotes(&self, count: usize) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    /// Every quote fails with [`SwapError::NoRoute`]
    pub fn without_route(self) -> Self {
        self.no_route.store(true, Ordering::SeqCst);
        self
    }

    pub fn quotes(&self) -> usize {
        self.quotes.load(Ordering::SeqCst)
    }

    pub fn swaps(&self) -> usize {
        self.swaps.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SwapAggregator for FakeSwap {
    async fn quote(&self, request: &QuoteRequest) -> Result<SwapQuote, SwapError> {
        self.quotes.fetch_add(1, Ordering::SeqCst);
        if self.no_route.load(Ordering::SeqCst) {
            return Err(SwapError::NoRoute(format!("no route to {}", request.output_mint)));
        }
        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(SwapError::Api {
                status: 500,
                body: "upstream unavailable".to_string(),
            });
        }

        let out_amount = request.amount.saturating_mul(self.rate);
        Ok(SwapQuote {
            input_mint: request.input_mint,
            output_mint: request.output_mint,
            in_amount: request.amount,
            out_amount,
            other_amount_threshold: out_amount,
            price_impact_pct: Some(0.0),
            raw: json!({ "outAmount": out_amount.to_string() }),
        })
    }

    async fn swap_transaction(&self, quote: &SwapQuote, user: &Pubkey) -> Result<VersionedTransaction, SwapError> {
        self.swaps.fetch_add(1, Ordering::SeqCst);
        let ix = Instruction {
            program_id: FAKE_SWAP_PROGRAM,
            accounts: vec![AccountMeta::new_readonly(quote.output_mint, false)],
            data: quote.out_amount.to_le_bytes().to_vec(),
        };
        Ok(VersionedTransaction::from(Transaction::new_unsigned(Message::new(&[ix], Some(user)))))
    }
}

/// Keeps every delivered notification
#[derive(Default)]
pub struct RecordingNotifier {
    delivered: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delivered(&self) -> Vec<Notification> {
        self.delivered.lock().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.delivered.lock().push(notification.clone());
        Ok(())
    }
}

/// Executor that records hand-offs instead of trading
#[derive(Default)]
pub struct RecordingExecutor {
    executed: Mutex<Vec<(ActionKey, PoolState)>>,
    delay: Duration,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Each execution sleeps for `delay` before recording
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            executed: Mutex::new(Vec::new()),
            delay,
        }
    }

    pub fn executed(&self) -> Vec<ActionKey> {
        self.executed.lock().iter().map(|(key, _)| *key).collect()
    }
}

#[async_trait]
impl ActionExecutor for RecordingExecutor {
    async fn execute(&self, key: ActionKey, pool_state: PoolState) -> ActionReport {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.executed.lock().push((key, pool_state));
        ActionReport {
            outcome: ActionOutcome::Success,
            ..ActionReport::skipped(key)
        }
    }
}

/// Writes a raw DAMM v2 pool account
#[derive(Debug, Clone)]
pub struct PoolAccountBuilder {
    token_a: Pubkey,
    token_b: Pubkey,
    cliff_fee_numerator: u64,
    fee_scheduler_mode: u8,
    number_of_period: u16,
    period_frequency: u64,
    reduction_factor: u64,
    collect_fee_mode: u8,
    liquidity: u128,
    sqrt_price: u128,
    sqrt_min_price: u128,
    sqrt_max_price: u128,
}

impl PoolAccountBuilder {
    pub fn new(token_a: Pubkey, token_b: Pubkey) -> Self {
        Self {
            token_a,
            token_b,
            cliff_fee_numerator: 0,
            fee_scheduler_mode: 0,
            number_of_period: 0,
            period_frequency: 0,
            reduction_factor: 0,
            collect_fee_mode: 0,
            liquidity: 0,
            sqrt_price: 1u128 << 64,
            sqrt_min_price: 4_295_048_016,
            sqrt_max_price: 79_226_673_521_066_979_257_578_248_091,
        }
    }

    pub fn cliff_fee_numerator(mut self, value: u64) -> Self {
        self.cliff_fee_numerator = value;
        self
    }

    pub fn fee_scheduler_mode(mut self, value: u8) -> Self {
        self.fee_scheduler_mode = value;
        self
    }

    pub fn number_of_period(mut self, value: u16) -> Self {
        self.number_of_period = value;
        self
    }

    pub fn period_frequency(mut self, value: u64) -> Self {
        self.period_frequency = value;
        self
    }

    pub fn reduction_factor(mut self, value: u64) -> Self {
        self.reduction_factor = value;
        self
    }

    pub fn collect_fee_mode(mut self, value: u8) -> Self {
        self.collect_fee_mode = value;
        self
    }

    pub fn liquidity(mut self, value: u128) -> Self {
        self.liquidity = value;
        self
    }

    pub fn sqrt_price(mut self, value: u128) -> Self {
        self.sqrt_price = value;
        self
    }

    pub fn sqrt_min_price(mut self, value: u128) -> Self {
        self.sqrt_min_price = value;
        self
    }

    pub fn sqrt_max_price(mut self, value: u128) -> Self {
        self.sqrt_max_price = value;
        self
    }

    /// A pool the qualifier accepts: token on A, SOL on B, fees in B, linear
    pub fn qualifying(token: Pubkey) -> Self {
        Self::new(token, crate::types::native_mint())
            .collect_fee_mode(1)
            .fee_scheduler_mode(0)
            .cliff_fee_numerator(500_000_000)
            .number_of_period(100)
            .period_frequency(60)
            .reduction_factor(4_000_000)
    }

    pub fn build(&self) -> Vec<u8> {
        fn put(data: &mut [u8], offset: usize, bytes: &[u8]) {
            data[offset..offset + bytes.len()].copy_from_slice(bytes);
        }

        let mut data = vec![0u8; POOL_ACCOUNT_SIZE];
        put(&mut data, CLIFF_FEE_NUMERATOR_OFFSET, &self.cliff_fee_numerator.to_le_bytes());
        data[FEE_SCHEDULER_MODE_OFFSET] = self.fee_scheduler_mode;
        put(&mut data, NUMBER_OF_PERIOD_OFFSET, &self.number_of_period.to_le_bytes());
        put(&mut data, PERIOD_FREQUENCY_OFFSET, &self.period_frequency.to_le_bytes());
        put(&mut data, REDUCTION_FACTOR_OFFSET, &self.reduction_factor.to_le_bytes());
        put(&mut data, TOKEN_A_MINT_OFFSET, self.token_a.as_ref());
        put(&mut data, TOKEN_B_MINT_OFFSET, self.token_b.as_ref());
        put(&mut data, TOKEN_A_VAULT_OFFSET, Pubkey::new_unique().as_ref());
        put(&mut data, TOKEN_B_VAULT_OFFSET, Pubkey::new_unique().as_ref());
        put(&mut data, LIQUIDITY_OFFSET, &self.liquidity.to_le_bytes());
        put(&mut data, SQRT_MIN_PRICE_OFFSET, &self.sqrt_min_price.to_le_bytes());
        put(&mut data, SQRT_MAX_PRICE_OFFSET, &self.sqrt_max_price.to_le_bytes());
        put(&mut data, SQRT_PRICE_OFFSET, &self.sqrt_price.to_le_bytes());
        data[COLLECT_FEE_MODE_OFFSET] = self.collect_fee_mode;
        data
    }
}
