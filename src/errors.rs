//! Error taxonomy for chain access and claim orchestration.
//!
//! Three failure kinds cross the chain boundary and each one drives a
//! different retry decision:
//! - `Unavailable`: transport/RPC failure, retried with backoff
//! - `Rejected`: on-chain revert, never retried automatically
//! - `TimedOut`: confirmation wait expired, re-checked by hash only

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("chain unavailable: {0}")]
    Unavailable(String),

    #[error("transaction rejected: {0}")]
    Rejected(String),

    #[error("confirmation timed out after {seconds}s")]
    TimedOut { seconds: u64 },
}

impl ChainError {
    /// Whether the same operation may be attempted again
    pub fn is_recoverable(&self) -> bool {
        match self {
            ChainError::Unavailable(_) => true,
            ChainError::TimedOut { .. } => true,
            ChainError::Rejected(_) => false,
        }
    }

    /// Suggested base delay before the next attempt
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ChainError::Unavailable(_) => Some(Duration::from_secs(5)),
            ChainError::TimedOut { .. } => Some(Duration::from_secs(10)),
            ChainError::Rejected(_) => None,
        }
    }
}

pub type ChainResult<T> = Result<T, ChainError>;

/// Per-instance configuration problems found at load time.
///
/// One bad instance never aborts startup; it is skipped and reported while
/// the remaining instances load.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("instance '{instance}': invalid {field} address '{value}'")]
    InvalidAddress {
        instance: String,
        field: &'static str,
        value: String,
    },

    #[error("instance '{instance}': {reason}")]
    InvalidInstance { instance: String, reason: String },

    #[error("duplicate instance id '{0}'")]
    DuplicateInstance(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_is_not_recoverable() {
        let err = ChainError::Rejected("execution reverted".to_string());
        assert!(!err.is_recoverable());
        assert!(err.retry_after().is_none());
    }

    #[test]
    fn transient_errors_are_recoverable() {
        assert!(ChainError::Unavailable("connection refused".to_string()).is_recoverable());
        assert!(ChainError::TimedOut { seconds: 120 }.is_recoverable());
    }
}
