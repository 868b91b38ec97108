//! DAMM v2 instruction building
//!
//! Position layout:
//!
//! | index | instruction |
//! |-------|-------------|
//! | 0 | compute unit limit |
//! | 1 | compute unit price |
//! | 2 | `create_position` |
//! | 3 | `add_liquidity` |
//! | 4 | close wrapped SOL account |

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use solana_sdk::compute_budget::ComputeBudgetInstruction;
use solana_sdk::hash::Hash;
use solana_sdk::instruction::{AccountMeta, Instruction};
use solana_sdk::message::{v0::Message as MessageV0, VersionedMessage};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signer};
use solana_sdk::system_instruction;
use solana_sdk::transaction::VersionedTransaction;
use spl_associated_token_account::get_associated_token_address_with_program_id;
use spl_associated_token_account::instruction::create_associated_token_account_idempotent;

use super::{AddLiquidityRequest, LiquidityBuilder, LiquidityError};
use crate::types::native_mint;

/// Position NFTs are Token-2022 mints
pub const TOKEN_2022_PROGRAM: Pubkey = solana_sdk::pubkey!("TokenzQdBNbLqP5VEhdkAS6EPFLC1PHnBqCXEpPxuEb");

const POSITION_SEED: &[u8] = b"position";
const POSITION_NFT_ACCOUNT_SEED: &[u8] = b"position_nft_account";
const POOL_AUTHORITY_SEED: &[u8] = b"pool_authority";
const EVENT_AUTHORITY_SEED: &[u8] = b"__event_authority";

const DEFAULT_COMPUTE_UNIT_LIMIT: u32 = 400_000;
const DEFAULT_COMPUTE_UNIT_PRICE: u64 = 100_000;

/// Anchor instruction discriminator: first 8 bytes of `sha256("global:<name>")`
pub fn instruction_discriminator(name: &str) -> [u8; 8] {
    let digest = Sha256::digest(format!("global:{}", name).as_bytes());
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest[..8]);
    out
}

pub struct DammV2Builder {
    program: Pubkey,
    compute_unit_limit: u32,
    compute_unit_price: u64,
}

impl DammV2Builder {
    pub fn new(program: Pubkey) -> Self {
        Self {
            program,
            compute_unit_limit: DEFAULT_COMPUTE_UNIT_LIMIT,
            compute_unit_price: DEFAULT_COMPUTE_UNIT_PRICE,
        }
    }

    pub fn with_compute_budget(mut self, limit: u32, micro_lamports: u64) -> Self {
        self.compute_unit_limit = limit;
        self.compute_unit_price = micro_lamports;
        self
    }

    fn pda(&self, seeds: &[&[u8]]) -> Pubkey {
        Pubkey::find_program_address(seeds, &self.program).0
    }

    pub fn position_address(&self, nft_mint: &Pubkey) -> Pubkey {
        self.pda(&[POSITION_SEED, nft_mint.as_ref()])
    }

    pub fn position_nft_account(&self, nft_mint: &Pubkey) -> Pubkey {
        self.pda(&[POSITION_NFT_ACCOUNT_SEED, nft_mint.as_ref()])
    }

    pub fn create_position_instruction(&self, owner: &Pubkey, nft_mint: &Pubkey, pool: &Pubkey) -> Instruction {
        Instruction {
            program_id: self.program,
            accounts: vec![
                AccountMeta::new_readonly(*owner, false),
                AccountMeta::new(*nft_mint, true),
                AccountMeta::new(self.position_nft_account(nft_mint), false),
                AccountMeta::new(*pool, false),
                AccountMeta::new(self.position_address(nft_mint), false),
                AccountMeta::new_readonly(self.pda(&[POOL_AUTHORITY_SEED]), false),
                AccountMeta::new(*owner, true),
                AccountMeta::new_readonly(TOKEN_2022_PROGRAM, false),
                AccountMeta::new_readonly(solana_sdk::system_program::id(), false),
                AccountMeta::new_readonly(self.pda(&[EVENT_AUTHORITY_SEED]), false),
                AccountMeta::new_readonly(self.program, false),
            ],
            data: instruction_discriminator("create_position").to_vec(),
        }
    }

    pub fn add_liquidity_instruction(
        &self,
        request: &AddLiquidityRequest,
        owner: &Pubkey,
        nft_mint: &Pubkey,
    ) -> Instruction {
        let state = &request.pool_state;
        let token_a_account =
            get_associated_token_address_with_program_id(owner, &state.token_a_mint, &request.token_a_program);
        let token_b_account =
            get_associated_token_address_with_program_id(owner, &state.token_b_mint, &request.token_b_program);

        let mut data = instruction_discriminator("add_liquidity").to_vec();
        data.extend_from_slice(&request.plan.liquidity_delta.to_le_bytes());
        data.extend_from_slice(&request.plan.token_a_amount_threshold.to_le_bytes());
        data.extend_from_slice(&request.plan.token_b_amount_threshold.to_le_bytes());

        Instruction {
            program_id: self.program,
            accounts: vec![
                AccountMeta::new(request.pool, false),
                AccountMeta::new(self.position_address(nft_mint), false),
                AccountMeta::new(token_a_account, false),
                AccountMeta::new(token_b_account, false),
                AccountMeta::new(state.token_a_vault, false),
                AccountMeta::new(state.token_b_vault, false),
                AccountMeta::new_readonly(state.token_a_mint, false),
                AccountMeta::new_readonly(state.token_b_mint, false),
                AccountMeta::new_readonly(self.position_nft_account(nft_mint), false),
                AccountMeta::new_readonly(*owner, true),
                AccountMeta::new_readonly(request.token_a_program, false),
                AccountMeta::new_readonly(request.token_b_program, false),
                AccountMeta::new_readonly(self.pda(&[EVENT_AUTHORITY_SEED]), false),
                AccountMeta::new_readonly(self.program, false),
            ],
            data,
        }
    }

    fn compile(
        payer: &Pubkey,
        instructions: &[Instruction],
        recent_blockhash: Hash,
        signers: &[&Keypair],
    ) -> Result<VersionedTransaction, LiquidityError> {
        let message = MessageV0::try_compile(payer, instructions, &[], recent_blockhash)
            .map_err(|e| LiquidityError::Build(format!("failed to compile message: {}", e)))?;
        VersionedTransaction::try_new(VersionedMessage::V0(message), signers)
            .map_err(|e| LiquidityError::Build(format!("failed to sign: {}", e)))
    }
}

fn wsol_account(owner: &Pubkey) -> Pubkey {
    get_associated_token_address_with_program_id(owner, &native_mint(), &spl_token::id())
}

#[async_trait]
impl LiquidityBuilder for DammV2Builder {
    async fn build_wrap_sol(
        &self,
        owner: &Keypair,
        lamports: u64,
        recent_blockhash: Hash,
    ) -> Result<VersionedTransaction, LiquidityError> {
        let owner_key = owner.pubkey();
        let wsol = wsol_account(&owner_key);

        let sync = spl_token::instruction::sync_native(&spl_token::id(), &wsol)
            .map_err(|e| LiquidityError::Build(e.to_string()))?;
        let instructions = vec![
            create_associated_token_account_idempotent(&owner_key, &owner_key, &native_mint(), &spl_token::id()),
            system_instruction::transfer(&owner_key, &wsol, lamports),
            sync,
        ];

        Self::compile(&owner_key, &instructions, recent_blockhash, &[owner])
    }

    async fn build_create_position_and_add_liquidity(
        &self,
        request: &AddLiquidityRequest,
        owner: &Keypair,
        recent_blockhash: Hash,
    ) -> Result<VersionedTransaction, LiquidityError> {
        let owner_key = owner.pubkey();
        let nft_mint = Keypair::new();
        let nft_key = nft_mint.pubkey();

        let close_wsol = spl_token::instruction::close_account(
            &spl_token::id(),
            &wsol_account(&owner_key),
            &owner_key,
            &owner_key,
            &[],
        )
        .map_err(|e| LiquidityError::Build(e.to_string()))?;

        let instructions = vec![
            ComputeBudgetInstruction::set_compute_unit_limit(self.compute_unit_limit),
            ComputeBudgetInstruction::set_compute_unit_price(self.compute_unit_price),
            self.create_position_instruction(&owner_key, &nft_key, &request.pool),
            self.add_liquidity_instruction(request, &owner_key, &nft_key),
            close_wsol,
        ];

        Self::compile(&owner_key, &instructions, recent_blockhash, &[owner, &nft_mint])
    }
}
