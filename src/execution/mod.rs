//! Execution engine: trigger evaluation, retry scheduling, tick orchestration

pub mod executor;
pub mod job_store;
pub mod price_checker;
pub mod retry_queue;

pub use executor::{Executor, ExecutorConfig, TickOutcome, TickReport, SYNC_TX_MARKER};
pub use job_store::{ExecutionRecord, JobStore};
pub use price_checker::{
    raw_to_units, DecimalsResolver, FixedDecimals, PriceCheckResult, PriceChecker, PriceSource,
    DCA_EXECUTION_BUFFER_MS, DEFAULT_TOKEN_DECIMALS,
};
pub use retry_queue::{RetryConfig, RetryQueue, RetryQueueEntry, RetryQueueStats};
