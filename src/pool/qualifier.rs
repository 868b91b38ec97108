//! Pool qualification
//!
//! A pool qualifies for a target token when it pairs the token with wrapped
//! SOL, collects fees only on the SOL side and runs a linear fee schedule.

use solana_sdk::pubkey::Pubkey;
use std::fmt;
use tracing::warn;

use super::state::{BaseFee, CollectFeeMode, FeeSchedulerMode, PoolState};
use crate::types::native_mint;

/// Reduction factors above this are absolute decrements, not basis points
pub const BPS_SCALE: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleClass {
    Linear,
    Exponential,
    Ambiguous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleSource {
    /// Read from the scheduler mode byte
    Discriminant,
    /// Inferred from the schedule parameters
    Heuristic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    NoQuoteSide,
    TargetMissing,
    CollectModeUnknown { raw: u8 },
    FeesNotQuoteOnly,
    ScheduleNotLinear {
        class: ScheduleClass,
        source: ScheduleSource,
    },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::NoQuoteSide => write!(f, "no wrapped SOL side"),
            Rejection::TargetMissing => write!(f, "target token not in pool"),
            Rejection::CollectModeUnknown { raw } => write!(f, "unknown collect fee mode {}", raw),
            Rejection::FeesNotQuoteOnly => write!(f, "fees not collected in SOL only"),
            Rejection::ScheduleNotLinear { class, source } => {
                write!(f, "fee schedule {:?} ({:?})", class, source)
            }
        }
    }
}

/// Classify from parameters alone.
///
/// `reduction_factor <= 10_000` reads as basis points per period (exponential),
/// larger values as an absolute numerator decrement (linear). Cases where the
/// parameters fit both readings, or neither, are ambiguous.
pub fn heuristic_schedule(fee: &BaseFee) -> ScheduleClass {
    if fee.number_of_period == 0 || fee.reduction_factor == 0 {
        return ScheduleClass::Linear;
    }

    let total_reduction = fee.reduction_factor as u128 * fee.number_of_period as u128;
    let fits_linear = total_reduction <= fee.cliff_fee_numerator as u128;

    if fee.reduction_factor > BPS_SCALE && fits_linear {
        ScheduleClass::Linear
    } else if fee.reduction_factor <= BPS_SCALE && !fits_linear {
        ScheduleClass::Exponential
    } else {
        ScheduleClass::Ambiguous
    }
}

pub fn classify_schedule(fee: &BaseFee) -> (ScheduleClass, ScheduleSource) {
    match fee.fee_scheduler_mode {
        Some(FeeSchedulerMode::Linear) => (ScheduleClass::Linear, ScheduleSource::Discriminant),
        Some(FeeSchedulerMode::Exponential) => {
            (ScheduleClass::Exponential, ScheduleSource::Discriminant)
        }
        None => {
            let class = heuristic_schedule(fee);
            warn!(
                raw_mode = fee.raw_fee_scheduler_mode,
                cliff = fee.cliff_fee_numerator,
                periods = fee.number_of_period,
                reduction = fee.reduction_factor,
                class = ?class,
                "Fee scheduler mode unknown, classified heuristically"
            );
            (class, ScheduleSource::Heuristic)
        }
    }
}

#[derive(Debug, Clone)]
pub struct PoolQualifier {
    quote_mint: Pubkey,
}

impl Default for PoolQualifier {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolQualifier {
    pub fn new() -> Self {
        Self {
            quote_mint: native_mint(),
        }
    }

    pub fn quote_mint(&self) -> Pubkey {
        self.quote_mint
    }

    /// First failing criterion, or `Ok` if the pool qualifies
    pub fn assess(&self, state: &PoolState, target: &Pubkey) -> Result<(), Rejection> {
        if !state.contains_mint(&self.quote_mint) {
            return Err(Rejection::NoQuoteSide);
        }
        if !state.contains_mint(target) {
            return Err(Rejection::TargetMissing);
        }

        match state.collect_fee_mode {
            None => {
                return Err(Rejection::CollectModeUnknown {
                    raw: state.raw_collect_fee_mode,
                })
            }
            Some(CollectFeeMode::OnlyB) if state.token_b_mint == self.quote_mint => {}
            Some(_) => return Err(Rejection::FeesNotQuoteOnly),
        }

        match classify_schedule(&state.base_fee) {
            (ScheduleClass::Linear, _) => Ok(()),
            (class, source) => Err(Rejection::ScheduleNotLinear { class, source }),
        }
    }

    pub fn evaluate(&self, state: &PoolState, target: &Pubkey) -> bool {
        self.assess(state, target).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::PoolAccountBuilder;
    use proptest::prelude::*;

    fn qualifying(token: Pubkey) -> PoolAccountBuilder {
        PoolAccountBuilder::new(token, native_mint())
            .collect_fee_mode(1)
            .fee_scheduler_mode(0)
            .cliff_fee_numerator(500_000_000)
            .number_of_period(100)
            .reduction_factor(4_000_000)
    }

    fn decode(builder: PoolAccountBuilder) -> PoolState {
        PoolState::decode(&builder.build()).unwrap()
    }

    #[test]
    fn test_qualifying_pool() {
        let token = Pubkey::new_unique();
        let qualifier = PoolQualifier::new();
        assert!(qualifier.evaluate(&decode(qualifying(token)), &token));
    }

    #[test]
    fn test_exponential_discriminant_rejected() {
        let token = Pubkey::new_unique();
        let state = decode(qualifying(token).fee_scheduler_mode(1));
        assert_eq!(
            PoolQualifier::new().assess(&state, &token),
            Err(Rejection::ScheduleNotLinear {
                class: ScheduleClass::Exponential,
                source: ScheduleSource::Discriminant
            })
        );
    }

    #[test]
    fn test_both_token_fees_rejected() {
        let token = Pubkey::new_unique();
        let state = decode(qualifying(token).collect_fee_mode(0));
        assert_eq!(PoolQualifier::new().assess(&state, &token), Err(Rejection::FeesNotQuoteOnly));
    }

    #[test]
    fn test_only_b_with_sol_on_a_side_rejected() {
        // Fees in B, but B is the target token, not SOL
        let token = Pubkey::new_unique();
        let state = decode(
            PoolAccountBuilder::new(native_mint(), token)
                .collect_fee_mode(1)
                .fee_scheduler_mode(0),
        );
        assert_eq!(PoolQualifier::new().assess(&state, &token), Err(Rejection::FeesNotQuoteOnly));
    }

    #[test]
    fn test_unknown_collect_mode_rejected() {
        let token = Pubkey::new_unique();
        let state = decode(qualifying(token).collect_fee_mode(4));
        assert_eq!(
            PoolQualifier::new().assess(&state, &token),
            Err(Rejection::CollectModeUnknown { raw: 4 })
        );
    }

    #[test]
    fn test_missing_sides() {
        let token = Pubkey::new_unique();
        let other = Pubkey::new_unique();

        let state = decode(PoolAccountBuilder::new(token, other).collect_fee_mode(1));
        assert_eq!(PoolQualifier::new().assess(&state, &token), Err(Rejection::NoQuoteSide));

        let state = decode(qualifying(other));
        assert_eq!(PoolQualifier::new().assess(&state, &token), Err(Rejection::TargetMissing));
    }

    #[test]
    fn test_heuristic_cases() {
        let fee = |cliff: u64, periods: u16, reduction: u64| BaseFee {
            cliff_fee_numerator: cliff,
            fee_scheduler_mode: None,
            raw_fee_scheduler_mode: 0xff,
            number_of_period: periods,
            period_frequency: 60,
            reduction_factor: reduction,
        };

        // Constant fee
        assert_eq!(heuristic_schedule(&fee(500_000_000, 0, 10)), ScheduleClass::Linear);
        assert_eq!(heuristic_schedule(&fee(500_000_000, 10, 0)), ScheduleClass::Linear);
        // Absolute decrement that stays non-negative
        assert_eq!(heuristic_schedule(&fee(500_000_000, 100, 4_000_000)), ScheduleClass::Linear);
        // Basis points that would overshoot as an absolute decrement
        assert_eq!(heuristic_schedule(&fee(5_000, 100, 500)), ScheduleClass::Exponential);
        // Basis-point sized and fits linear: both readings plausible
        assert_eq!(heuristic_schedule(&fee(500_000_000, 100, 500)), ScheduleClass::Ambiguous);
        // Large decrement that overshoots: neither reading fits
        assert_eq!(heuristic_schedule(&fee(1_000_000, 100, 4_000_000)), ScheduleClass::Ambiguous);
    }

    #[test]
    fn test_heuristic_linear_accepted_when_mode_unknown() {
        let token = Pubkey::new_unique();
        let state = decode(qualifying(token).fee_scheduler_mode(3));
        assert!(PoolQualifier::new().evaluate(&state, &token));
    }

    proptest! {
        #[test]
        fn prop_evaluate_is_pure(
            mode in 0u8..4,
            collect in 0u8..3,
            cliff in any::<u64>(),
            periods in any::<u16>(),
            reduction in any::<u64>(),
        ) {
            let token = Pubkey::new_unique();
            let state = decode(
                PoolAccountBuilder::new(token, native_mint())
                    .fee_scheduler_mode(mode)
                    .collect_fee_mode(collect)
                    .cliff_fee_numerator(cliff)
                    .number_of_period(periods)
                    .reduction_factor(reduction),
            );
            let qualifier = PoolQualifier::new();
            let first = qualifier.assess(&state, &token);
            prop_assert_eq!(first, qualifier.assess(&state, &token));
        }

        #[test]
        fn prop_never_accepts_ambiguous_or_exponential(
            mode in 2u8..=255,
            cliff in any::<u64>(),
            periods in any::<u16>(),
            reduction in any::<u64>(),
        ) {
            let token = Pubkey::new_unique();
            let state = decode(
                qualifying(token)
                    .fee_scheduler_mode(mode)
                    .cliff_fee_numerator(cliff)
                    .number_of_period(periods)
                    .reduction_factor(reduction),
            );
            let accepted = PoolQualifier::new().evaluate(&state, &token);
            let class = heuristic_schedule(&state.base_fee);
            if class != ScheduleClass::Linear {
                prop_assert!(!accepted);
            } else {
                prop_assert!(accepted);
            }
        }

        #[test]
        fn prop_unknown_collect_mode_always_rejected(raw in 2u8..=255, mode in 0u8..=1) {
            let token = Pubkey::new_unique();
            let state = decode(qualifying(token).collect_fee_mode(raw).fee_scheduler_mode(mode));
            prop_assert!(!PoolQualifier::new().evaluate(&state, &token));
        }
    }
}
