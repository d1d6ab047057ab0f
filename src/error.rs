use thiserror::Error;

/// Main error type for the keeper
#[derive(Error, Debug)]
pub enum KeeperError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Chain adapter errors
    #[error(transparent)]
    Chain(#[from] ChainError),

    // Store errors
    #[error("Job store error: {0}")]
    Store(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for KeeperError
pub type Result<T> = std::result::Result<T, KeeperError>;

impl KeeperError {
    /// Classification used by the executor's error policy.
    ///
    /// Only chain adapter errors carry a meaningful kind; everything else raised
    /// while evaluating a job is unexpected.
    pub fn kind(&self) -> ExecutorErrorKind {
        match self {
            KeeperError::Chain(err) => err.kind,
            _ => ExecutorErrorKind::Unexpected,
        }
    }
}

/// Typed failure categories reported by a chain adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutorErrorKind {
    /// The contract re-checked the trigger price and it no longer holds
    PriceConditionNotMet,
    /// The contract rejected a DCA tick because its interval has not elapsed
    IntervalNotReached,
    /// The transaction was sent but its receipt is not indexed yet
    ReceiptNotFound,
    /// Realized output fell below the minimum accepted amount
    SlippageExceeded,
    /// The registry has no job with this id
    JobNotFound,
    /// The registry knows the job but it is no longer executable
    JobNotActive,
    /// The call did not finish in time; the outcome is unknown
    Timeout,
    /// Anything else
    Unexpected,
}

impl ExecutorErrorKind {
    pub fn policy(&self) -> ErrorPolicy {
        match self {
            ExecutorErrorKind::PriceConditionNotMet
            | ExecutorErrorKind::IntervalNotReached
            | ExecutorErrorKind::ReceiptNotFound => ErrorPolicy::SilentRetry,
            ExecutorErrorKind::SlippageExceeded => ErrorPolicy::RetryWithBookkeeping,
            ExecutorErrorKind::JobNotFound => ErrorPolicy::CancelUnknown,
            ExecutorErrorKind::JobNotActive => ErrorPolicy::Reconcile,
            ExecutorErrorKind::Timeout => ErrorPolicy::ResolveAmbiguous,
            ExecutorErrorKind::Unexpected => ErrorPolicy::Escalate,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutorErrorKind::PriceConditionNotMet => "price_condition_not_met",
            ExecutorErrorKind::IntervalNotReached => "interval_not_reached",
            ExecutorErrorKind::ReceiptNotFound => "receipt_not_found",
            ExecutorErrorKind::SlippageExceeded => "slippage_exceeded",
            ExecutorErrorKind::JobNotFound => "job_not_found",
            ExecutorErrorKind::JobNotActive => "job_not_active",
            ExecutorErrorKind::Timeout => "timeout",
            ExecutorErrorKind::Unexpected => "unexpected",
        }
    }
}

impl std::fmt::Display for ExecutorErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What the executor does with a failed job evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Log and let the next tick re-evaluate from scratch
    SilentRetry,
    /// Count the attempt and record the error, keep the job alive
    RetryWithBookkeeping,
    /// Job belongs to a superseded deployment
    CancelUnknown,
    /// Read on-chain status and correct the local record
    Reconcile,
    /// Outcome unknown, resolve by status read instead of resubmitting
    ResolveAmbiguous,
    /// Count toward the retry cap, back off, eventually fail
    Escalate,
}

/// Error returned by chain adapters
#[derive(Error, Debug, Clone)]
#[error("chain error ({kind}): {message}")]
pub struct ChainError {
    pub kind: ExecutorErrorKind,
    pub message: String,
}

impl ChainError {
    pub fn new(kind: ExecutorErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(operation: &str, elapsed_ms: u64) -> Self {
        Self::new(
            ExecutorErrorKind::Timeout,
            format!("{} timed out after {}ms", operation, elapsed_ms),
        )
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::new(ExecutorErrorKind::Unexpected, message)
    }
}
