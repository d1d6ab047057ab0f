use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{DcaParams, LimitOrderParams};
use crate::error::ChainError;

pub type ChainResult<T> = std::result::Result<T, ChainError>;

/// Job status as recorded by the on-chain registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnChainStatus {
    Active,
    Executed,
    Cancelled,
    Expired,
}

impl OnChainStatus {
    /// Registry enum encoding
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(OnChainStatus::Active),
            1 => Some(OnChainStatus::Executed),
            2 => Some(OnChainStatus::Cancelled),
            3 => Some(OnChainStatus::Expired),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OnChainStatus::Active => "active",
            OnChainStatus::Executed => "executed",
            OnChainStatus::Cancelled => "cancelled",
            OnChainStatus::Expired => "expired",
        }
    }
}

impl std::fmt::Display for OnChainStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Mined limit order execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionReceipt {
    pub tx_hash: String,
    /// Realized output decoded from the execution event, when present
    pub amount_out: Option<u128>,
}

/// Mined DCA tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DcaExecutionReceipt {
    pub tx_hash: String,
    pub amount_out: Option<u128>,
    /// Next execution time reported by the registry, epoch seconds
    pub next_execution_sec: u64,
}

/// Chain adapter used by the executor.
///
/// Implementations simulate before submitting, decode the realized output from
/// the transaction logs, and report failures as typed [`ChainError`]s. A call that
/// does not finish in time must surface as `ExecutorErrorKind::Timeout`, never as
/// a definite failure.
#[async_trait]
pub trait KeeperClient: Send + Sync {
    async fn execute_limit_order(
        &self,
        job_id: u64,
        owner: &str,
        params: &LimitOrderParams,
    ) -> ChainResult<ExecutionReceipt>;

    async fn execute_dca_tick(
        &self,
        job_id: u64,
        owner: &str,
        params: &DcaParams,
    ) -> ChainResult<DcaExecutionReceipt>;

    async fn get_on_chain_status(&self, job_id: u64) -> ChainResult<OnChainStatus>;
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(OnChainStatus::from_code(0), Some(OnChainStatus::Active));
        assert_eq!(OnChainStatus::from_code(1), Some(OnChainStatus::Executed));
        assert_eq!(OnChainStatus::from_code(2), Some(OnChainStatus::Cancelled));
        assert_eq!(OnChainStatus::from_code(3), Some(OnChainStatus::Expired));
        assert_eq!(OnChainStatus::from_code(4), None);
    }
}
