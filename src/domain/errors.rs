use thiserror::Error;

/// Errors surfaced by the brokerage RPC boundary.
///
/// A failed call fails the current tick only; the scheduler retries at
/// the next interval. The engine itself never raises for data-quality
/// reasons.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("broker unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("broker call timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("unauthorized: {reason}")]
    Unauthorized { reason: String },

    #[error("account not found: {selector}")]
    AccountNotFound { selector: String },
}

impl RpcError {
    /// Transient failures are worth another attempt within the backoff
    /// budget; unauthorized is not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RpcError::Unavailable { .. } | RpcError::Timeout { .. } | RpcError::RateLimited { .. }
        )
    }
}
