//! Persistence interface used by the [`super::Executor`].
//!
//! The executor never owns job state; every transition goes through one of
//! these calls, at most once per terminal transition per job per tick.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::Job;
use crate::error::Result;

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Every job in `pending` or `active` status
    async fn get_active_jobs(&self) -> Result<Vec<Job>>;

    async fn mark_active(&self, id: &str) -> Result<()>;

    async fn mark_executed(&self, id: &str, tx_hash: &str, amount_out: Option<u128>) -> Result<()>;

    /// Record one DCA swap. Reaching `total_swaps` moves the job to `executed`.
    async fn mark_dca_tick(
        &self,
        id: &str,
        tx_hash: &str,
        new_swaps_completed: u32,
        next_execution_ms: i64,
        amount_out: Option<u128>,
    ) -> Result<()>;

    async fn mark_failed(&self, id: &str, error: &str) -> Result<()>;

    async fn increment_retry(&self, id: &str) -> Result<()>;

    async fn mark_expired(&self, id: &str) -> Result<()>;

    async fn mark_cancelled(&self, id: &str) -> Result<()>;

    async fn update_last_error(&self, id: &str, error: &str) -> Result<()>;
}

/// One recorded on-chain execution of a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub job_id: String,
    pub tx_hash: String,
    pub amount_out: Option<u128>,
    /// Swap number for DCA ticks
    pub swap_index: Option<u32>,
    pub executed_at: DateTime<Utc>,
}
