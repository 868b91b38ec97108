//! Signature confirmation with an escalating poll schedule

use solana_sdk::signature::Signature;
use std::time::Duration;
use tracing::{debug, warn};

use crate::rpc::{ChainClient, RpcResult, SignatureState, TransactionFailure};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confirmation {
    Confirmed,
    Failed(TransactionFailure),
    /// Never observed, even in history
    Unknown,
}

/// Check `n` waits `n * step` before querying, for `checks` rounds
#[derive(Debug, Clone, Copy)]
pub struct ConfirmSchedule {
    pub checks: u32,
    pub step: Duration,
}

impl ConfirmSchedule {
    pub fn delay_before(&self, check: u32) -> Duration {
        self.step * check
    }

    pub fn total_wait(&self) -> Duration {
        (1..=self.checks).map(|n| self.delay_before(n)).sum()
    }
}

impl Default for ConfirmSchedule {
    fn default() -> Self {
        Self {
            checks: 6,
            step: Duration::from_secs(5),
        }
    }
}

/// Poll until confirmed or failed, then fall back to a history lookup.
///
/// Errors during the polling rounds are logged and treated as "not yet";
/// only the final history query propagates an error.
pub async fn await_confirmation(
    chain: &dyn ChainClient,
    signature: &Signature,
    schedule: ConfirmSchedule,
) -> RpcResult<Confirmation> {
    for check in 1..=schedule.checks {
        tokio::time::sleep(schedule.delay_before(check)).await;
        match chain.signature_status(signature, false).await {
            Ok(Some(SignatureState::Confirmed)) => return Ok(Confirmation::Confirmed),
            Ok(Some(SignatureState::Failed(failure))) => return Ok(Confirmation::Failed(failure)),
            Ok(None) => debug!(signature = %signature, check, "Not yet confirmed"),
            Err(e) => warn!(signature = %signature, check, error = %e, "Status check failed"),
        }
    }

    match chain.signature_status(signature, true).await? {
        Some(SignatureState::Confirmed) => Ok(Confirmation::Confirmed),
        Some(SignatureState::Failed(failure)) => Ok(Confirmation::Failed(failure)),
        None => Ok(Confirmation::Unknown),
    }
}
