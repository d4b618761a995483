//! Execution error taxonomy.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why an open/close attempt did not confirm.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecutionError {
    /// No quote could be obtained (service down, no route, empty output).
    #[error("Quote unavailable: {0}")]
    QuoteUnavailable(String),

    #[error("Price impact too high: {impact_pct:.3}% > {max_pct:.3}%")]
    PriceImpactExceeded { impact_pct: f64, max_pct: f64 },

    #[error("Insufficient balance: need {required:.6}, have {available:.6}")]
    InsufficientBalance { required: f64, available: f64 },

    #[error("Submission failed: {0}")]
    SubmissionFailed(String),

    #[error("Confirmation timed out after {timeout_ms}ms")]
    ConfirmationTimeout { timeout_ms: u64 },

    #[error("Kill-switch active: {0}")]
    KillSwitchActive(String),

    /// Daily trade count, open-position count or trade size limit.
    #[error("Limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("Position already open or opening for {0}")]
    AlreadyOpen(String),

    #[error("No open position for {0}")]
    PositionNotFound(String),

    #[error("Close already in progress for {0}")]
    CloseInProgress(String),

    /// Collaborator reported a terminal failure for a submitted trade.
    #[error("Venue error: {0}")]
    Venue(String),
}

/// SafetyController error bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Quote,
    Submit,
    Confirm,
}

impl ErrorCategory {
    pub fn all() -> [ErrorCategory; 3] {
        [ErrorCategory::Quote, ErrorCategory::Submit, ErrorCategory::Confirm]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Quote => "quote",
            ErrorCategory::Submit => "submit",
            ErrorCategory::Confirm => "confirm",
        }
    }
}

/// Serializable discriminant stored on failed TradeRecords.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    QuoteUnavailable,
    PriceImpactExceeded,
    InsufficientBalance,
    SubmissionFailed,
    ConfirmationTimeout,
    KillSwitchActive,
    LimitExceeded,
    AlreadyOpen,
    PositionNotFound,
    CloseInProgress,
    Venue,
}

impl ExecutionError {
    /// Only transient venue conditions are retried, with widened slippage.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExecutionError::QuoteUnavailable(_) | ExecutionError::ConfirmationTimeout { .. }
        )
    }

    /// Which safety counter this failure feeds, if any.
    pub fn category(&self) -> Option<ErrorCategory> {
        match self {
            ExecutionError::QuoteUnavailable(_) => Some(ErrorCategory::Quote),
            ExecutionError::SubmissionFailed(_) => Some(ErrorCategory::Submit),
            ExecutionError::ConfirmationTimeout { .. } | ExecutionError::Venue(_) => {
                Some(ErrorCategory::Confirm)
            }
            _ => None,
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            ExecutionError::QuoteUnavailable(_) => FailureKind::QuoteUnavailable,
            ExecutionError::PriceImpactExceeded { .. } => FailureKind::PriceImpactExceeded,
            ExecutionError::InsufficientBalance { .. } => FailureKind::InsufficientBalance,
            ExecutionError::SubmissionFailed(_) => FailureKind::SubmissionFailed,
            ExecutionError::ConfirmationTimeout { .. } => FailureKind::ConfirmationTimeout,
            ExecutionError::KillSwitchActive(_) => FailureKind::KillSwitchActive,
            ExecutionError::LimitExceeded(_) => FailureKind::LimitExceeded,
            ExecutionError::AlreadyOpen(_) => FailureKind::AlreadyOpen,
            ExecutionError::PositionNotFound(_) => FailureKind::PositionNotFound,
            ExecutionError::CloseInProgress(_) => FailureKind::CloseInProgress,
            ExecutionError::Venue(_) => FailureKind::Venue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_quote_and_timeout_retry() {
        assert!(ExecutionError::QuoteUnavailable("x".into()).is_retryable());
        assert!(ExecutionError::ConfirmationTimeout { timeout_ms: 10 }.is_retryable());
        assert!(!ExecutionError::SubmissionFailed("x".into()).is_retryable());
        assert!(!ExecutionError::KillSwitchActive("x".into()).is_retryable());
        assert!(!ExecutionError::PriceImpactExceeded { impact_pct: 3.0, max_pct: 2.0 }.is_retryable());
    }

    #[test]
    fn test_categories() {
        assert_eq!(
            ExecutionError::SubmissionFailed("x".into()).category(),
            Some(ErrorCategory::Submit)
        );
        assert_eq!(
            ExecutionError::InsufficientBalance { required: 1.0, available: 0.0 }.category(),
            None
        );
    }

    #[test]
    fn test_display_mentions_values() {
        let err = ExecutionError::PriceImpactExceeded { impact_pct: 3.5, max_pct: 2.0 };
        assert_eq!(err.to_string(), "Price impact too high: 3.500% > 2.000%");
    }
}
