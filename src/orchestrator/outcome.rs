//! Action results and liquidity failure classification

use solana_sdk::signature::Signature;
use std::fmt;

use crate::rpc::TransactionFailure;
use crate::types::ActionKey;

/// First instruction index that is cleanup rather than core work.
///
/// A failure at or after this index means the swap or position already landed.
pub const NON_CRITICAL_INSTRUCTION_INDEX: u8 = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    Success,
    SuccessWithWarning { code: Option<u32>, instruction_index: u8 },
    Failure(String),
    /// The key was already processed or in flight
    Skipped,
}

impl ActionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ActionOutcome::Success | ActionOutcome::SuccessWithWarning { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            ActionOutcome::Success => "success",
            ActionOutcome::SuccessWithWarning { .. } => "success_with_warning",
            ActionOutcome::Failure(_) => "failure",
            ActionOutcome::Skipped => "skipped",
        }
    }
}

impl fmt::Display for ActionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionOutcome::SuccessWithWarning { code, instruction_index } => write!(
                f,
                "success with warning (instruction {}, code {:?})",
                instruction_index, code
            ),
            ActionOutcome::Failure(reason) => write!(f, "failure: {}", reason),
            other => f.write_str(other.label()),
        }
    }
}

/// Map a landed-but-failed swap or position transaction to an outcome
pub fn classify_failure(failure: &TransactionFailure) -> ActionOutcome {
    match failure.instruction_index {
        Some(index) if index >= NON_CRITICAL_INSTRUCTION_INDEX => ActionOutcome::SuccessWithWarning {
            code: failure.code,
            instruction_index: index,
        },
        _ => ActionOutcome::Failure(failure.message.clone()),
    }
}

/// A landed transaction whose failing instruction was past the core ones
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanupWarning {
    pub code: Option<u32>,
    pub instruction_index: u8,
}

impl CleanupWarning {
    pub fn outcome(&self) -> ActionOutcome {
        ActionOutcome::SuccessWithWarning {
            code: self.code,
            instruction_index: self.instruction_index,
        }
    }
}

/// How the purchase step ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PurchaseResult {
    /// Wallet already held the token; nothing was bought
    AlreadyHeld { balance: u64 },
    Bought {
        signature: Signature,
        expected_out: u64,
        /// Set when the swap landed with a failed cleanup instruction
        warning: Option<CleanupWarning>,
    },
    /// Simulation mode: quoted and simulated only
    Simulated { expected_out: u64 },
}

#[derive(Debug, Clone)]
pub struct ActionReport {
    pub key: ActionKey,
    pub outcome: ActionOutcome,
    pub purchase: Option<PurchaseResult>,
    pub position_signature: Option<Signature>,
    pub correlation_id: Option<String>,
}

impl ActionReport {
    pub fn skipped(key: ActionKey) -> Self {
        Self {
            key,
            outcome: ActionOutcome::Skipped,
            purchase: None,
            position_signature: None,
            correlation_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(index: Option<u8>, code: Option<u32>) -> TransactionFailure {
        TransactionFailure {
            instruction_index: index,
            code,
            message: "InstructionError".to_string(),
        }
    }

    #[test]
    fn test_cleanup_failure_is_warning() {
        assert_eq!(
            classify_failure(&failure(Some(5), Some(6001))),
            ActionOutcome::SuccessWithWarning {
                code: Some(6001),
                instruction_index: 5
            }
        );
        assert!(classify_failure(&failure(Some(4), None)).is_success());
    }

    #[test]
    fn test_core_failure_is_hard() {
        assert!(matches!(classify_failure(&failure(Some(2), Some(1))), ActionOutcome::Failure(_)));
        assert!(matches!(classify_failure(&failure(Some(3), None)), ActionOutcome::Failure(_)));
        assert!(matches!(classify_failure(&failure(None, None)), ActionOutcome::Failure(_)));
    }
}
