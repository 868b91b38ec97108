//! Deposit amounts and liquidity delta for a DAMM v2 position
//!
//! Prices are Q64.64 square roots. Amounts are sized in floating point, the
//! same way the pool price itself is interpreted; the slippage thresholds bound
//! what the program may actually pull from the wallet.

use solana_sdk::pubkey::Pubkey;

use super::LiquidityError;
use crate::pool::PoolState;

const Q64: f64 = 18_446_744_073_709_551_616.0;
const Q128: f64 = Q64 * Q64;
const BPS: u128 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiquidityPlan {
    /// Whether the bought token is the pool's token A
    pub token_is_a: bool,
    pub token_amount: u64,
    pub sol_amount: u64,
    pub liquidity_delta: u128,
    pub token_a_amount_threshold: u64,
    pub token_b_amount_threshold: u64,
}

impl LiquidityPlan {
    pub fn amount_a(&self) -> u64 {
        if self.token_is_a { self.token_amount } else { self.sol_amount }
    }

    pub fn amount_b(&self) -> u64 {
        if self.token_is_a { self.sol_amount } else { self.token_amount }
    }
}

/// B-per-A price in base units: `(sqrt_price / 2^64)^2`
pub fn price_b_per_a(sqrt_price: u128) -> Result<f64, LiquidityError> {
    let root = sqrt_price as f64 / Q64;
    let price = root * root;
    if sqrt_price == 0 || !price.is_finite() || price <= 0.0 {
        return Err(LiquidityError::InvalidPrice(sqrt_price));
    }
    Ok(price)
}

/// `amount * (10_000 + slippage_bps) / 10_000`, saturating at `u64::MAX`
pub fn with_slippage(amount: u64, slippage_bps: u16) -> u64 {
    let scaled = amount as u128 * (BPS + slippage_bps as u128) / BPS;
    u64::try_from(scaled).unwrap_or(u64::MAX)
}

fn liquidity_from_a(amount_a: u64, sqrt_price: u128, sqrt_max: u128) -> f64 {
    let r = sqrt_price as f64;
    let upper = sqrt_max as f64;
    amount_a as f64 * r * upper / (upper - r)
}

fn liquidity_from_b(amount_b: u64, sqrt_price: u128, sqrt_min: u128) -> f64 {
    let r = sqrt_price as f64;
    let lower = sqrt_min as f64;
    amount_b as f64 * Q128 / (r - lower)
}

/// Size a deposit from the held token balance and a SOL budget.
///
/// The token side is clamped so its SOL counterpart fits the budget.
pub fn plan_liquidity(
    state: &PoolState,
    token: &Pubkey,
    token_balance: u64,
    sol_budget: u64,
    slippage_bps: u16,
) -> Result<LiquidityPlan, LiquidityError> {
    let token_is_a = if state.token_a_mint == *token {
        true
    } else if state.token_b_mint == *token {
        false
    } else {
        return Err(LiquidityError::TokenNotInPool(*token));
    };

    if token_balance == 0 || sol_budget == 0 {
        return Err(LiquidityError::InsufficientBalance {
            token: token_balance,
            sol: sol_budget,
        });
    }

    let price = price_b_per_a(state.sqrt_price)?;
    if state.sqrt_price <= state.sqrt_min_price || state.sqrt_price >= state.sqrt_max_price {
        return Err(LiquidityError::PriceOutOfRange {
            sqrt_price: state.sqrt_price,
            sqrt_min: state.sqrt_min_price,
            sqrt_max: state.sqrt_max_price,
        });
    }

    // SOL needed for one base unit of the token
    let sol_per_token = if token_is_a { price } else { 1.0 / price };

    let full_cost = token_balance as f64 * sol_per_token;
    let (token_amount, sol_amount) = if full_cost <= sol_budget as f64 {
        (token_balance, full_cost.ceil() as u64)
    } else {
        ((sol_budget as f64 / sol_per_token).floor() as u64, sol_budget)
    };

    if token_amount == 0 || sol_amount == 0 {
        return Err(LiquidityError::InsufficientBalance {
            token: token_amount,
            sol: sol_amount,
        });
    }

    let (amount_a, amount_b) = if token_is_a {
        (token_amount, sol_amount)
    } else {
        (sol_amount, token_amount)
    };

    let from_a = liquidity_from_a(amount_a, state.sqrt_price, state.sqrt_max_price);
    let from_b = liquidity_from_b(amount_b, state.sqrt_price, state.sqrt_min_price);
    let liquidity = from_a.min(from_b);
    if !liquidity.is_finite() || liquidity < 1.0 {
        return Err(LiquidityError::InsufficientBalance {
            token: token_amount,
            sol: sol_amount,
        });
    }

    Ok(LiquidityPlan {
        token_is_a,
        token_amount,
        sol_amount,
        liquidity_delta: liquidity.floor() as u128,
        token_a_amount_threshold: with_slippage(amount_a, slippage_bps),
        token_b_amount_threshold: with_slippage(amount_b, slippage_bps),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::PoolAccountBuilder;
    use crate::types::native_mint;

    const ONE: u128 = 1u128 << 64;

    fn pool(token_a: Pubkey, token_b: Pubkey, sqrt_price: u128) -> PoolState {
        PoolState::decode(
            &PoolAccountBuilder::new(token_a, token_b)
                .sqrt_price(sqrt_price)
                .sqrt_min_price(4_295_048_016)
                .sqrt_max_price(79_226_673_521_066_979_257_578_248_091)
                .build(),
        )
        .unwrap()
    }

    #[test]
    fn test_price_from_sqrt() {
        assert!((price_b_per_a(ONE).unwrap() - 1.0).abs() < 1e-12);
        assert!((price_b_per_a(ONE / 2).unwrap() - 0.25).abs() < 1e-12);
        assert!(matches!(price_b_per_a(0), Err(LiquidityError::InvalidPrice(0))));
    }

    #[test]
    fn test_slippage_threshold() {
        assert_eq!(with_slippage(10_000, 100), 10_100);
        assert_eq!(with_slippage(0, 100), 0);
        assert_eq!(with_slippage(u64::MAX, 10_000), u64::MAX);
    }

    #[test]
    fn test_token_side_clamped_to_budget() {
        let token = Pubkey::new_unique();
        // Token is A at 0.25 lamports per base unit
        let state = pool(token, native_mint(), ONE / 2);

        let plan = plan_liquidity(&state, &token, 1_000_000, 100_000, 100).unwrap();
        assert!(plan.token_is_a);
        assert_eq!(plan.token_amount, 400_000);
        assert_eq!(plan.sol_amount, 100_000);
        assert_eq!(plan.token_a_amount_threshold, 404_000);
        assert_eq!(plan.token_b_amount_threshold, 101_000);
        assert!(plan.liquidity_delta > 0);
    }

    #[test]
    fn test_small_balance_uses_all_tokens() {
        let token = Pubkey::new_unique();
        let state = pool(token, native_mint(), ONE / 2);

        let plan = plan_liquidity(&state, &token, 1_000, 1_000_000_000, 50).unwrap();
        assert_eq!(plan.token_amount, 1_000);
        assert_eq!(plan.sol_amount, 250);
    }

    #[test]
    fn test_token_on_b_side() {
        let token = Pubkey::new_unique();
        // 4 token units per lamport
        let state = pool(native_mint(), token, ONE * 2);

        let plan = plan_liquidity(&state, &token, 1_000_000, 100_000, 0).unwrap();
        assert!(!plan.token_is_a);
        assert_eq!(plan.token_amount, 400_000);
        assert_eq!(plan.sol_amount, 100_000);
        assert_eq!(plan.amount_a(), 100_000);
        assert_eq!(plan.amount_b(), 400_000);
    }

    #[test]
    fn test_price_outside_range() {
        let token = Pubkey::new_unique();
        let state = PoolState::decode(
            &PoolAccountBuilder::new(token, native_mint())
                .sqrt_price(ONE)
                .sqrt_min_price(ONE * 2)
                .sqrt_max_price(ONE * 4)
                .build(),
        )
        .unwrap();
        assert!(matches!(
            plan_liquidity(&state, &token, 1_000, 1_000, 0),
            Err(LiquidityError::PriceOutOfRange { .. })
        ));
    }

    #[test]
    fn test_zero_balance() {
        let token = Pubkey::new_unique();
        let state = pool(token, native_mint(), ONE);
        assert!(matches!(
            plan_liquidity(&state, &token, 0, 1_000, 0),
            Err(LiquidityError::InsufficientBalance { .. })
        ));
    }

    #[test]
    fn test_token_not_in_pool() {
        let state = pool(Pubkey::new_unique(), native_mint(), ONE);
        assert!(matches!(
            plan_liquidity(&state, &Pubkey::new_unique(), 10, 10, 0),
            Err(LiquidityError::TokenNotInPool(_))
        ));
    }
}
