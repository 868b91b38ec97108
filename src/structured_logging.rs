//! Structured logging and pipeline context
//!
//! Every action gets a [`PipelineContext`] whose correlation id ties together
//! the purchase, settlement and liquidity log lines for one (token, pool) pair.

use chrono::Utc;
use uuid::Uuid;

use crate::types::ActionKey;

/// Structured logger for pipeline milestones
#[derive(Debug, Clone)]
pub struct StructuredLogger {
    context_id: String,
}

impl StructuredLogger {
    pub fn new(context_id: String) -> Self {
        Self { context_id }
    }

    pub fn context_id(&self) -> &str {
        &self.context_id
    }

    pub fn log_pool_matched(&self, key: &ActionKey) {
        tracing::info!(
            context_id = %self.context_id,
            token = %key.token,
            pool = %key.pool,
            "Qualifying pool matched"
        );
    }

    pub fn log_purchase_attempt(&self, key: &ActionKey, attempt: usize, lamports: u64) {
        tracing::info!(
            context_id = %self.context_id,
            token = %key.token,
            attempt,
            lamports,
            "Attempting purchase"
        );
    }

    pub fn log_purchase_success(&self, key: &ActionKey, signature: &str, latency_ms: u64) {
        tracing::info!(
            context_id = %self.context_id,
            token = %key.token,
            signature = %signature,
            latency_ms,
            "Purchase confirmed"
        );
    }

    pub fn log_purchase_failure(&self, key: &ActionKey, error: &str, attempt: usize) {
        tracing::warn!(
            context_id = %self.context_id,
            token = %key.token,
            error = %error,
            attempt,
            "Purchase attempt failed"
        );
    }

    pub fn log_liquidity_result(&self, key: &ActionKey, signature: Option<&str>, outcome: &str) {
        tracing::info!(
            context_id = %self.context_id,
            token = %key.token,
            pool = %key.pool,
            signature = ?signature,
            outcome = %outcome,
            "Liquidity step finished"
        );
    }

    pub fn warn(&self, message: &str) {
        tracing::warn!(context_id = %self.context_id, message = %message, "Warning");
    }

    pub fn error(&self, message: &str) {
        tracing::error!(context_id = %self.context_id, message = %message, "Error");
    }
}

/// Correlation context for one pipeline operation
#[derive(Debug, Clone)]
pub struct PipelineContext {
    /// Shared by every child context
    pub correlation_id: String,

    pub span_id: String,

    pub parent_span_id: Option<String>,

    pub operation: String,

    /// Unix seconds at creation
    pub timestamp: i64,

    pub logger: StructuredLogger,
}

impl PipelineContext {
    pub fn new(operation: &str) -> Self {
        let correlation_id = Uuid::new_v4().to_string();
        Self {
            logger: StructuredLogger::new(correlation_id.clone()),
            correlation_id,
            span_id: Uuid::new_v4().to_string(),
            parent_span_id: None,
            operation: operation.to_string(),
            timestamp: Utc::now().timestamp(),
        }
    }

    /// A child span sharing this context's correlation id
    pub fn child(&self, operation: &str) -> Self {
        Self {
            correlation_id: self.correlation_id.clone(),
            span_id: Uuid::new_v4().to_string(),
            parent_span_id: Some(self.span_id.clone()),
            operation: operation.to_string(),
            timestamp: Utc::now().timestamp(),
            logger: self.logger.clone(),
        }
    }
}

impl Default for PipelineContext {
    fn default() -> Self {
        Self::new("default")
    }
}
