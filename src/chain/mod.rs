//! Chain adapter contract.
//!
//! The executor only knows the three operations of [`KeeperClient`]; ledger
//! specifics live in adapter implementations (see `adapters::keeper_contract`).

pub mod revert;
pub mod timeout;
pub mod traits;

pub use revert::{chain_error, classify_revert};
pub use timeout::TimedKeeperClient;
pub use traits::{ChainResult, DcaExecutionReceipt, ExecutionReceipt, KeeperClient, OnChainStatus};

#[cfg(test)]
pub(crate) use traits::mock;
