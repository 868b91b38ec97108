use solana_client::client_error::ClientError;
use thiserror::Error;

/// Classified errors from the chain RPC boundary
#[derive(Debug, Clone, Error)]
pub enum RpcManagerError {
    /// Transport-level errors (network, connection)
    #[error("Transport error: {message} (endpoint: {endpoint})")]
    Transport { endpoint: String, message: String },

    #[error("Timeout after {timeout_ms}ms (endpoint: {endpoint})")]
    Timeout { endpoint: String, timeout_ms: u64 },

    /// RPC response errors (from the RPC server)
    #[error("RPC response error: {message} (endpoint: {endpoint}, code: {code:?})")]
    RpcResponse {
        endpoint: String,
        message: String,
        code: Option<i64>,
    },

    /// HTTP 429 or a "too many requests" body
    #[error("Rate limit exceeded (endpoint: {endpoint})")]
    RateLimitExceeded { endpoint: String },

    #[error("Blockhash not found (endpoint: {endpoint})")]
    BlockhashNotFound { endpoint: String },

    #[error("Transaction expired (endpoint: {endpoint})")]
    TransactionExpired { endpoint: String },

    #[error("Account not found: {account}")]
    AccountNotFound { account: String },

    #[error("Insufficient funds (endpoint: {endpoint})")]
    InsufficientFunds { endpoint: String },

    /// Response arrived but did not contain what we asked for
    #[error("Invalid response data: {0}")]
    InvalidData(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RpcManagerError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            RpcManagerError::Transport { .. }
            | RpcManagerError::Timeout { .. }
            | RpcManagerError::RateLimitExceeded { .. }
            | RpcManagerError::BlockhashNotFound { .. } => true,

            RpcManagerError::TransactionExpired { .. }
            | RpcManagerError::AccountNotFound { .. }
            | RpcManagerError::InsufficientFunds { .. }
            | RpcManagerError::InvalidData(_)
            | RpcManagerError::Internal(_) => false,

            // Retry on server errors (5xx)
            RpcManagerError::RpcResponse { code, .. } => {
                matches!(code, Some(c) if (500..600).contains(c))
            }
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, RpcManagerError::RateLimitExceeded { .. })
    }

    /// Create from ClientError with context
    pub fn from_client_error(err: ClientError, endpoint: &str) -> Self {
        Self::classify(&err.to_string(), endpoint)
    }

    /// Classify an error message the way RPC nodes phrase them
    pub fn classify(message: &str, endpoint: &str) -> Self {
        let lower = message.to_lowercase();
        let endpoint = endpoint.to_string();

        if lower.contains("blockhash not found") {
            RpcManagerError::BlockhashNotFound { endpoint }
        } else if lower.contains("transaction expired") || lower.contains("block height exceeded") {
            RpcManagerError::TransactionExpired { endpoint }
        } else if lower.contains("account not found") {
            RpcManagerError::AccountNotFound {
                account: "unknown".to_string(),
            }
        } else if lower.contains("insufficient funds") || lower.contains("insufficient lamports") {
            RpcManagerError::InsufficientFunds { endpoint }
        } else if lower.contains("rate limit")
            || lower.contains("too many requests")
            || lower.contains("429")
        {
            RpcManagerError::RateLimitExceeded { endpoint }
        } else if lower.contains("timeout") || lower.contains("timed out") {
            RpcManagerError::Timeout {
                endpoint,
                timeout_ms: 0,
            }
        } else if lower.contains("connection") || lower.contains("dns") || lower.contains("error sending request") {
            RpcManagerError::Transport {
                endpoint,
                message: message.to_string(),
            }
        } else {
            let code = lower
                .split("code:")
                .nth(1)
                .and_then(|s| s.split_whitespace().next())
                .and_then(|s| s.trim_end_matches(',').parse::<i64>().ok());

            RpcManagerError::RpcResponse {
                endpoint,
                message: message.to_string(),
                code,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_rate_limit() {
        for msg in [
            "HTTP status client error (429 Too Many Requests)",
            "too many requests for a specific RPC call",
            "Rate limit reached",
        ] {
            let err = RpcManagerError::classify(msg, "http://rpc");
            assert!(err.is_rate_limited(), "{}", msg);
            assert!(err.is_retryable());
        }
    }

    #[test]
    fn test_classify_fatal() {
        let err = RpcManagerError::classify("Attempt to debit an account but found no record of a prior credit. insufficient funds", "x");
        assert!(matches!(err, RpcManagerError::InsufficientFunds { .. }));
        assert!(!err.is_retryable());
        assert!(!err.is_rate_limited());
    }

    #[test]
    fn test_classify_response_code() {
        let err = RpcManagerError::classify("RPC response error code: 503 service unavailable", "x");
        match &err {
            RpcManagerError::RpcResponse { code, .. } => assert_eq!(*code, Some(503)),
            other => panic!("unexpected {:?}", other),
        }
        assert!(err.is_retryable());

        let err = RpcManagerError::classify("RPC response error code: -32602 invalid params", "x");
        assert!(!err.is_retryable());
    }
}
