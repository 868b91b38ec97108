//! Chain access boundary
//!
//! Everything the pipeline needs from a Solana node goes through
//! [`ChainClient`], so the listener, reconciler and orchestrator can be driven
//! by an in-memory chain in tests.

pub mod client;
pub mod errors;
pub mod retry;

use async_trait::async_trait;
use solana_sdk::hash::Hash;
use solana_sdk::instruction::InstructionError;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::{TransactionError, VersionedTransaction};

pub use client::RpcChainClient;
pub use errors::RpcManagerError;
pub use retry::{RateLimited, RetryPolicy};

pub type RpcResult<T> = Result<T, RpcManagerError>;

/// One post-transaction token balance, as reported by the node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBalanceEntry {
    pub account_index: u8,
    pub mint: String,
    /// Raw amount in base units, kept as the string the node returned
    pub amount: String,
    pub owner: Option<String>,
}

/// Where and why a transaction failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionFailure {
    pub instruction_index: Option<u8>,
    /// Custom program error code, when the failing instruction returned one
    pub code: Option<u32>,
    pub message: String,
}

impl TransactionFailure {
    pub fn from_transaction_error(err: &TransactionError) -> Self {
        match err {
            TransactionError::InstructionError(index, inner) => Self {
                instruction_index: Some(*index),
                code: match inner {
                    InstructionError::Custom(code) => Some(*code),
                    _ => None,
                },
                message: format!("{:?}", err),
            },
            other => Self {
                instruction_index: None,
                code: None,
                message: format!("{:?}", other),
            },
        }
    }
}

/// Confirmed state of a submitted signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureState {
    Confirmed,
    Failed(TransactionFailure),
}

/// Result of a preflight simulation
#[derive(Debug, Clone, Default)]
pub struct SimulationReport {
    pub err: Option<TransactionFailure>,
    pub logs: Vec<String>,
    pub units_consumed: Option<u64>,
}

/// A program account returned by a filtered scan
#[derive(Debug, Clone)]
pub struct ProgramAccount {
    pub pubkey: Pubkey,
    pub data: Vec<u8>,
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Post-transaction token balances of a confirmed transaction
    async fn transaction_token_balances(
        &self,
        signature: &Signature,
    ) -> RpcResult<Vec<TokenBalanceEntry>>;

    /// Accounts of `program` with exactly `data_size` bytes and `mint` at `offset`
    async fn scan_program_accounts(
        &self,
        program: &Pubkey,
        data_size: u64,
        offset: usize,
        mint: &Pubkey,
    ) -> RpcResult<Vec<ProgramAccount>>;

    async fn account_data(&self, account: &Pubkey) -> RpcResult<Vec<u8>>;

    /// Program that owns `account`; used to pick the token program for a mint
    async fn account_owner(&self, account: &Pubkey) -> RpcResult<Pubkey>;

    /// Sum of `owner`'s token accounts for `mint`, in base units
    async fn token_balance(&self, owner: &Pubkey, mint: &Pubkey) -> RpcResult<u64>;

    async fn sol_balance(&self, owner: &Pubkey) -> RpcResult<u64>;

    async fn latest_blockhash(&self) -> RpcResult<Hash>;

    async fn simulate(&self, tx: &VersionedTransaction) -> RpcResult<SimulationReport>;

    async fn send(&self, tx: &VersionedTransaction) -> RpcResult<Signature>;

    /// `None` while the signature is unknown or not yet confirmed
    async fn signature_status(
        &self,
        signature: &Signature,
        search_history: bool,
    ) -> RpcResult<Option<SignatureState>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_from_custom_instruction_error() {
        let err = TransactionError::InstructionError(5, InstructionError::Custom(6001));
        let failure = TransactionFailure::from_transaction_error(&err);
        assert_eq!(failure.instruction_index, Some(5));
        assert_eq!(failure.code, Some(6001));
    }

    #[test]
    fn test_failure_without_instruction() {
        let failure = TransactionFailure::from_transaction_error(&TransactionError::BlockhashNotFound);
        assert_eq!(failure.instruction_index, None);
        assert_eq!(failure.code, None);
        assert!(failure.message.contains("BlockhashNotFound"));
    }
}
