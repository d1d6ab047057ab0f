//! Revert reason classification.
//!
//! Node and contract errors only arrive as text. This is the one place that
//! text is inspected; everything downstream branches on [`ExecutorErrorKind`].

use crate::error::{ChainError, ExecutorErrorKind};

const RECEIPT_PATTERNS: &[&str] = &[
    "transactionreceiptnotfound",
    "receipt not found",
    "receipt could not be found",
    "transaction receipt with hash",
];

const PRICE_PATTERNS: &[&str] = &["priceconditionnotmet", "price condition not met", "price not met"];

const INTERVAL_PATTERNS: &[&str] = &[
    "intervalnotreached",
    "interval not reached",
    "too early",
];

const SLIPPAGE_PATTERNS: &[&str] = &[
    "slippage",
    "insufficient_output_amount",
    "insufficient output",
    "too little received",
];

const NOT_FOUND_PATTERNS: &[&str] = &["jobnotfound", "job not found", "unknown job", "invalid job id"];

const NOT_ACTIVE_PATTERNS: &[&str] = &["jobnotactive", "job not active", "job is not active"];

const TIMEOUT_PATTERNS: &[&str] = &["timed out", "timeout", "deadline has elapsed"];

/// Map a raw adapter/node error message to its category
pub fn classify_revert(message: &str) -> ExecutorErrorKind {
    let lower = message.to_ascii_lowercase();
    let matches = |patterns: &[&str]| patterns.iter().any(|p| lower.contains(p));

    // Receipt lookups mention "not found" too, so they go first
    if matches(RECEIPT_PATTERNS) {
        ExecutorErrorKind::ReceiptNotFound
    } else if matches(PRICE_PATTERNS) {
        ExecutorErrorKind::PriceConditionNotMet
    } else if matches(INTERVAL_PATTERNS) {
        ExecutorErrorKind::IntervalNotReached
    } else if matches(SLIPPAGE_PATTERNS) {
        ExecutorErrorKind::SlippageExceeded
    } else if matches(NOT_FOUND_PATTERNS) {
        ExecutorErrorKind::JobNotFound
    } else if matches(NOT_ACTIVE_PATTERNS) {
        ExecutorErrorKind::JobNotActive
    } else if matches(TIMEOUT_PATTERNS) {
        ExecutorErrorKind::Timeout
    } else {
        ExecutorErrorKind::Unexpected
    }
}

/// Build a typed chain error from any displayable adapter error
pub fn chain_error(context: &str, err: impl std::fmt::Display) -> ChainError {
    let message = format!("{}: {}", context, err);
    ChainError::new(classify_revert(&message), message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_custom_error_names() {
        assert_eq!(
            classify_revert("execution reverted: custom error PriceConditionNotMet()"),
            ExecutorErrorKind::PriceConditionNotMet
        );
        assert_eq!(
            classify_revert("execution reverted: IntervalNotReached()"),
            ExecutorErrorKind::IntervalNotReached
        );
        assert_eq!(
            classify_revert("execution reverted: JobNotFound(42)"),
            ExecutorErrorKind::JobNotFound
        );
        assert_eq!(
            classify_revert("execution reverted: JobNotActive(42)"),
            ExecutorErrorKind::JobNotActive
        );
    }

    #[test]
    fn test_receipt_beats_not_found() {
        assert_eq!(
            classify_revert("Transaction receipt with hash 0xabc could not be found"),
            ExecutorErrorKind::ReceiptNotFound
        );
    }

    #[test]
    fn test_slippage_variants() {
        for msg in [
            "UniswapV2Router: INSUFFICIENT_OUTPUT_AMOUNT",
            "Too little received",
            "slippage exceeded",
        ] {
            assert_eq!(classify_revert(msg), ExecutorErrorKind::SlippageExceeded, "{}", msg);
        }
    }

    #[test]
    fn test_timeouts_and_unknowns() {
        assert_eq!(
            classify_revert("request timed out"),
            ExecutorErrorKind::Timeout
        );
        assert_eq!(
            classify_revert("nonce too low"),
            ExecutorErrorKind::Unexpected
        );
    }

    #[test]
    fn test_chain_error_keeps_context() {
        let err = chain_error("executeLimitOrder simulation", "execution reverted: JobNotActive(1)");
        assert_eq!(err.kind, ExecutorErrorKind::JobNotActive);
        assert!(err.message.starts_with("executeLimitOrder simulation:"));
    }
}
