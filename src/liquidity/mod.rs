//! Liquidity provisioning
//!
//! [`plan_liquidity`] sizes the deposit; a [`LiquidityBuilder`] turns the plan
//! into signed transactions for the pool program.

pub mod damm;
pub mod math;

use async_trait::async_trait;
use solana_sdk::hash::Hash;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Keypair;
use solana_sdk::transaction::VersionedTransaction;
use thiserror::Error;

use crate::pool::PoolState;

pub use damm::DammV2Builder;
pub use math::{plan_liquidity, price_b_per_a, with_slippage, LiquidityPlan};

#[derive(Debug, Clone, Error)]
pub enum LiquidityError {
    #[error("Pool price {0} is not usable")]
    InvalidPrice(u128),

    #[error("Pool price {sqrt_price} outside range [{sqrt_min}, {sqrt_max}]")]
    PriceOutOfRange {
        sqrt_price: u128,
        sqrt_min: u128,
        sqrt_max: u128,
    },

    #[error("Insufficient balance for a position (token: {token}, sol: {sol})")]
    InsufficientBalance { token: u64, sol: u64 },

    #[error("Token {0} is not in the pool")]
    TokenNotInPool(Pubkey),

    #[error("Failed to build liquidity transaction: {0}")]
    Build(String),
}

/// Everything needed to open a position and deposit into it
#[derive(Debug, Clone)]
pub struct AddLiquidityRequest {
    pub pool: Pubkey,
    pub pool_state: PoolState,
    pub plan: LiquidityPlan,
    /// Token program owning each mint
    pub token_a_program: Pubkey,
    pub token_b_program: Pubkey,
}

#[async_trait]
pub trait LiquidityBuilder: Send + Sync {
    /// Wrap `lamports` of SOL into the owner's wrapped SOL account
    async fn build_wrap_sol(
        &self,
        owner: &Keypair,
        lamports: u64,
        recent_blockhash: Hash,
    ) -> Result<VersionedTransaction, LiquidityError>;

    /// One signed transaction that creates a position and adds liquidity.
    ///
    /// Instructions before index 4 open and fund the position; anything at
    /// index 4 or later is cleanup whose failure leaves the position intact.
    async fn build_create_position_and_add_liquidity(
        &self,
        request: &AddLiquidityRequest,
        owner: &Keypair,
        recent_blockhash: Hash,
    ) -> Result<VersionedTransaction, LiquidityError>;
}
