//! Timeout decorator for chain adapters.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::warn;

use super::traits::{
    ChainResult, DcaExecutionReceipt, ExecutionReceipt, KeeperClient, OnChainStatus,
};
use crate::domain::{DcaParams, LimitOrderParams};
use crate::error::ChainError;

/// Bounds every call of the wrapped client.
///
/// An elapsed timer becomes `ExecutorErrorKind::Timeout`: the transaction may
/// still land, so callers resolve it with a status read.
pub struct TimedKeeperClient {
    inner: Arc<dyn KeeperClient>,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl TimedKeeperClient {
    pub fn new(inner: Arc<dyn KeeperClient>, read_timeout: Duration, write_timeout: Duration) -> Self {
        Self {
            inner,
            read_timeout,
            write_timeout,
        }
    }

    async fn bounded<T, F>(&self, operation: &str, limit: Duration, fut: F) -> ChainResult<T>
    where
        F: Future<Output = ChainResult<T>> + Send,
    {
        match timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => {
                let elapsed_ms = limit.as_millis() as u64;
                warn!(operation, elapsed_ms, "Chain call timed out, outcome unknown");
                Err(ChainError::timeout(operation, elapsed_ms))
            }
        }
    }
}

#[async_trait]
impl KeeperClient for TimedKeeperClient {
    async fn execute_limit_order(
        &self,
        job_id: u64,
        owner: &str,
        params: &LimitOrderParams,
    ) -> ChainResult<ExecutionReceipt> {
        self.bounded(
            "executeLimitOrder",
            self.write_timeout,
            self.inner.execute_limit_order(job_id, owner, params),
        )
        .await
    }

    async fn execute_dca_tick(
        &self,
        job_id: u64,
        owner: &str,
        params: &DcaParams,
    ) -> ChainResult<DcaExecutionReceipt> {
        self.bounded(
            "executeDCATick",
            self.write_timeout,
            self.inner.execute_dca_tick(job_id, owner, params),
        )
        .await
    }

    async fn get_on_chain_status(&self, job_id: u64) -> ChainResult<OnChainStatus> {
        self.bounded(
            "getJobStatus",
            self.read_timeout,
            self.inner.get_on_chain_status(job_id),
        )
        .await
    }
}
