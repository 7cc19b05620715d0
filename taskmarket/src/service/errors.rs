use thiserror::Error;

pub type MarketResult<T> = std::result::Result<T, MarketError>;

/// Failures surfaced to callers of the market service
#[derive(Debug, Error)]
pub enum MarketError {
    #[error("{0}")]
    Validation(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("{0}")]
    Conflict(String),
    #[error("application {0} has already been reviewed")]
    AlreadyReviewed(String),
    #[error("task {0} has reached its maximum completions")]
    Capacity(String),
    #[error("payment verification failed: {0}")]
    Verification(String),
    #[error("payment failed: {0}")]
    Payment(String),
    #[error("payment outcome unknown: {0}")]
    PaymentUnknown(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl MarketError {
    pub fn kind(&self) -> &'static str {
        match self {
            MarketError::Validation(_) => "validation",
            MarketError::NotFound(_) => "not_found",
            MarketError::Unauthorized(_) => "unauthorized",
            MarketError::Conflict(_) => "conflict",
            MarketError::AlreadyReviewed(_) => "already_reviewed",
            MarketError::Capacity(_) => "capacity",
            MarketError::Verification(_) => "verification",
            MarketError::Payment(_) => "payment",
            MarketError::PaymentUnknown(_) => "payment_unknown",
            MarketError::Internal(_) => "internal",
        }
    }

    /// Message safe to return to a caller, internal details stay in the log
    pub fn public_message(&self) -> String {
        match self {
            MarketError::Internal(_) => "internal error".to_string(),
            other => other.to_string(),
        }
    }

    pub(crate) fn invalid(err: impl std::fmt::Display) -> Self {
        MarketError::Validation(err.to_string())
    }

    pub(crate) fn not_found(what: impl std::fmt::Display) -> Self {
        MarketError::NotFound(what.to_string())
    }
}
