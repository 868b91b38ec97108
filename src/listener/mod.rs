//! Migration listener
//!
//! Consumes log notifications from the migration program and emits one
//! [`MigrationEvent`](crate::types::MigrationEvent) per newly graduated token.
//! Reconnection and subscription live in [`crate::streaming`].

pub mod config;
pub mod core;
pub mod dedup;
pub mod errors;
pub mod extractor;
pub mod prefilter;

pub use config::ListenerConfig;
pub use self::core::{EventListener, ListenerStats, ListenerStatsSnapshot};
pub use dedup::DedupWindow;
pub use errors::{ExponentialBackoff, ListenerError};
