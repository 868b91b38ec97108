//! DAMM v2 pool account decoding
//!
//! Only the fields the qualifier and the liquidity planner read are decoded.
//! The 8-byte account discriminator is not checked: accounts come from a
//! scan already filtered by program and data size.

use chrono::{DateTime, Utc};
use solana_sdk::pubkey::Pubkey;
use thiserror::Error;

/// Size of a DAMM v2 pool account
pub const POOL_ACCOUNT_SIZE: usize = 1112;

pub const CLIFF_FEE_NUMERATOR_OFFSET: usize = 8;
pub const FEE_SCHEDULER_MODE_OFFSET: usize = 16;
pub const NUMBER_OF_PERIOD_OFFSET: usize = 22;
pub const PERIOD_FREQUENCY_OFFSET: usize = 24;
pub const REDUCTION_FACTOR_OFFSET: usize = 32;
pub const TOKEN_A_MINT_OFFSET: usize = 168;
pub const TOKEN_B_MINT_OFFSET: usize = 200;
pub const TOKEN_A_VAULT_OFFSET: usize = 232;
pub const TOKEN_B_VAULT_OFFSET: usize = 264;
pub const LIQUIDITY_OFFSET: usize = 360;
pub const SQRT_MIN_PRICE_OFFSET: usize = 424;
pub const SQRT_MAX_PRICE_OFFSET: usize = 440;
pub const SQRT_PRICE_OFFSET: usize = 456;
pub const ACTIVATION_POINT_OFFSET: usize = 472;
pub const ACTIVATION_TYPE_OFFSET: usize = 480;
pub const POOL_STATUS_OFFSET: usize = 481;
pub const COLLECT_FEE_MODE_OFFSET: usize = 484;
pub const POOL_TYPE_OFFSET: usize = 485;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PoolDecodeError {
    #[error("pool account too short: {actual} bytes, expected at least {expected}")]
    TooShort { expected: usize, actual: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeSchedulerMode {
    Linear,
    Exponential,
}

impl FeeSchedulerMode {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Linear),
            1 => Some(Self::Exponential),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectFeeMode {
    /// Fees accrue in both tokens
    BothToken,
    /// Fees accrue in token B only
    OnlyB,
}

impl CollectFeeMode {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::BothToken),
            1 => Some(Self::OnlyB),
            _ => None,
        }
    }
}

/// Base fee schedule of a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaseFee {
    pub cliff_fee_numerator: u64,
    /// `None` when the discriminant byte is not a known mode
    pub fee_scheduler_mode: Option<FeeSchedulerMode>,
    pub raw_fee_scheduler_mode: u8,
    pub number_of_period: u16,
    pub period_frequency: u64,
    pub reduction_factor: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolState {
    pub token_a_mint: Pubkey,
    pub token_b_mint: Pubkey,
    pub token_a_vault: Pubkey,
    pub token_b_vault: Pubkey,
    pub liquidity: u128,
    pub sqrt_min_price: u128,
    pub sqrt_max_price: u128,
    /// Q64.64 square root of the B-per-A price
    pub sqrt_price: u128,
    pub activation_point: u64,
    pub activation_type: u8,
    pub pool_status: u8,
    pub collect_fee_mode: Option<CollectFeeMode>,
    pub raw_collect_fee_mode: u8,
    pub pool_type: u8,
    pub base_fee: BaseFee,
}

fn read_array<const N: usize>(data: &[u8], offset: usize) -> [u8; N] {
    let mut buf = [0u8; N];
    buf.copy_from_slice(&data[offset..offset + N]);
    buf
}

fn read_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes(read_array(data, offset))
}

fn read_u64(data: &[u8], offset: usize) -> u64 {
    u64::from_le_bytes(read_array(data, offset))
}

fn read_u128(data: &[u8], offset: usize) -> u128 {
    u128::from_le_bytes(read_array(data, offset))
}

fn read_pubkey(data: &[u8], offset: usize) -> Pubkey {
    Pubkey::new_from_array(read_array(data, offset))
}

impl PoolState {
    pub fn decode(data: &[u8]) -> Result<Self, PoolDecodeError> {
        if data.len() < POOL_ACCOUNT_SIZE {
            return Err(PoolDecodeError::TooShort {
                expected: POOL_ACCOUNT_SIZE,
                actual: data.len(),
            });
        }

        let raw_fee_scheduler_mode = data[FEE_SCHEDULER_MODE_OFFSET];
        let raw_collect_fee_mode = data[COLLECT_FEE_MODE_OFFSET];

        Ok(Self {
            token_a_mint: read_pubkey(data, TOKEN_A_MINT_OFFSET),
            token_b_mint: read_pubkey(data, TOKEN_B_MINT_OFFSET),
            token_a_vault: read_pubkey(data, TOKEN_A_VAULT_OFFSET),
            token_b_vault: read_pubkey(data, TOKEN_B_VAULT_OFFSET),
            liquidity: read_u128(data, LIQUIDITY_OFFSET),
            sqrt_min_price: read_u128(data, SQRT_MIN_PRICE_OFFSET),
            sqrt_max_price: read_u128(data, SQRT_MAX_PRICE_OFFSET),
            sqrt_price: read_u128(data, SQRT_PRICE_OFFSET),
            activation_point: read_u64(data, ACTIVATION_POINT_OFFSET),
            activation_type: data[ACTIVATION_TYPE_OFFSET],
            pool_status: data[POOL_STATUS_OFFSET],
            collect_fee_mode: CollectFeeMode::from_byte(raw_collect_fee_mode),
            raw_collect_fee_mode,
            pool_type: data[POOL_TYPE_OFFSET],
            base_fee: BaseFee {
                cliff_fee_numerator: read_u64(data, CLIFF_FEE_NUMERATOR_OFFSET),
                fee_scheduler_mode: FeeSchedulerMode::from_byte(raw_fee_scheduler_mode),
                raw_fee_scheduler_mode,
                number_of_period: read_u16(data, NUMBER_OF_PERIOD_OFFSET),
                period_frequency: read_u64(data, PERIOD_FREQUENCY_OFFSET),
                reduction_factor: read_u64(data, REDUCTION_FACTOR_OFFSET),
            },
        })
    }

    pub fn contains_mint(&self, mint: &Pubkey) -> bool {
        self.token_a_mint == *mint || self.token_b_mint == *mint
    }

    /// The side opposite to `mint`, if `mint` is in the pool
    pub fn other_side(&self, mint: &Pubkey) -> Option<Pubkey> {
        if self.token_a_mint == *mint {
            Some(self.token_b_mint)
        } else if self.token_b_mint == *mint {
            Some(self.token_a_mint)
        } else {
            None
        }
    }
}

/// A pool seen during a scan; only its address outlives the tick
#[derive(Debug, Clone)]
pub struct PoolObservation {
    pub pool: Pubkey,
    pub token_a: Pubkey,
    pub token_b: Pubkey,
    pub base_fee: BaseFee,
    pub collect_fee_mode: Option<CollectFeeMode>,
    pub first_seen_at: DateTime<Utc>,
}

impl PoolObservation {
    pub fn new(pool: Pubkey, state: &PoolState) -> Self {
        Self {
            pool,
            token_a: state.token_a_mint,
            token_b: state.token_b_mint,
            base_fee: state.base_fee,
            collect_fee_mode: state.collect_fee_mode,
            first_seen_at: Utc::now(),
        }
    }
}
