//! Migrated mint extraction from post-transaction token balances

use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;

use super::errors::ListenerError;
use crate::rpc::TokenBalanceEntry;
use crate::types::native_mint;

/// First balance entry whose mint is not wrapped SOL and whose amount is positive.
///
/// Migrations move the whole curve reserve into the new pool, so the migrated
/// mint always appears with a non-zero post balance. Entries with an unparsable
/// amount are skipped.
pub fn extract_migrated_mint(balances: &[TokenBalanceEntry]) -> Result<Pubkey, ListenerError> {
    let wsol = native_mint().to_string();

    let entry = balances
        .iter()
        .find(|b| b.mint != wsol && b.amount.parse::<u128>().map(|a| a > 0).unwrap_or(false))
        .ok_or(ListenerError::MintNotFound)?;

    Pubkey::from_str(&entry.mint).map_err(|_| ListenerError::InvalidMint(entry.mint.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(index: u8, mint: &str, amount: &str) -> TokenBalanceEntry {
        TokenBalanceEntry {
            account_index: index,
            mint: mint.to_string(),
            amount: amount.to_string(),
            owner: None,
        }
    }

    #[test]
    fn test_skips_wsol_and_zero_balances() {
        let token = Pubkey::new_unique();
        let empty = Pubkey::new_unique();
        let balances = vec![
            entry(1, &native_mint().to_string(), "85000000000"),
            entry(2, &empty.to_string(), "0"),
            entry(3, &token.to_string(), "206900000000000"),
        ];

        assert_eq!(extract_migrated_mint(&balances).unwrap(), token);
    }

    #[test]
    fn test_first_match_wins() {
        let first = Pubkey::new_unique();
        let second = Pubkey::new_unique();
        let balances = vec![
            entry(1, &first.to_string(), "5"),
            entry(2, &second.to_string(), "10"),
        ];

        assert_eq!(extract_migrated_mint(&balances).unwrap(), first);
    }

    #[test]
    fn test_only_wsol_is_not_found() {
        let balances = vec![entry(0, &native_mint().to_string(), "1")];
        assert!(matches!(extract_migrated_mint(&balances), Err(ListenerError::MintNotFound)));
        assert!(matches!(extract_migrated_mint(&[]), Err(ListenerError::MintNotFound)));
    }

    #[test]
    fn test_garbage_amount_is_skipped() {
        let token = Pubkey::new_unique();
        let balances = vec![
            entry(1, &Pubkey::new_unique().to_string(), "n/a"),
            entry(2, &token.to_string(), "7"),
        ];
        assert_eq!(extract_migrated_mint(&balances).unwrap(), token);
    }

    #[test]
    fn test_invalid_mint_string() {
        let balances = vec![entry(1, "not-base58!", "7")];
        assert!(matches!(extract_migrated_mint(&balances), Err(ListenerError::InvalidMint(_))));
    }
}
