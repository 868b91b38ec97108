//! DAMM v2 pool state and qualification

pub mod qualifier;
pub mod state;

pub use qualifier::{PoolQualifier, Rejection, ScheduleClass, ScheduleSource};
pub use state::{
    BaseFee, CollectFeeMode, FeeSchedulerMode, PoolDecodeError, PoolObservation, PoolState,
    POOL_ACCOUNT_SIZE, TOKEN_A_MINT_OFFSET, TOKEN_B_MINT_OFFSET,
};
