pub mod adapters;
pub mod chain;
pub mod cli;
pub mod config;
pub mod coordination;
pub mod domain;
pub mod error;
pub mod execution;
pub mod services;

pub use chain::{KeeperClient, OnChainStatus, TimedKeeperClient};
pub use config::KeeperConfig;
pub use coordination::{SafetyContext, SafetyDecision, SafetyGuard};
pub use domain::{Job, JobParams, JobStatus, JobType, SafetyConfig, SafetyViolation};
pub use error::{ChainError, ErrorPolicy, ExecutorErrorKind, KeeperError, Result};
pub use execution::{
    Executor, ExecutorConfig, JobStore, PriceChecker, PriceSource, RetryQueue, TickOutcome,
    TickReport,
};
pub use services::KeeperService;
