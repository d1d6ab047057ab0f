//! In-memory job store for dry runs and tests.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

use crate::domain::{Job, JobParams, JobStatus};
use crate::error::{KeeperError, Result};
use crate::execution::{ExecutionRecord, JobStore};

/// A store mutation, recorded in call order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    MarkActive { id: String },
    MarkExecuted { id: String, tx_hash: String },
    MarkDcaTick { id: String, tx_hash: String, swaps_completed: u32 },
    MarkFailed { id: String, error: String },
    IncrementRetry { id: String },
    MarkExpired { id: String },
    MarkCancelled { id: String },
    UpdateLastError { id: String, error: String },
}

impl StoreCall {
    pub fn name(&self) -> &'static str {
        match self {
            StoreCall::MarkActive { .. } => "mark_active",
            StoreCall::MarkExecuted { .. } => "mark_executed",
            StoreCall::MarkDcaTick { .. } => "mark_dca_tick",
            StoreCall::MarkFailed { .. } => "mark_failed",
            StoreCall::IncrementRetry { .. } => "increment_retry",
            StoreCall::MarkExpired { .. } => "mark_expired",
            StoreCall::MarkCancelled { .. } => "mark_cancelled",
            StoreCall::UpdateLastError { .. } => "update_last_error",
        }
    }
}

#[derive(Debug, Default)]
struct StoreState {
    jobs: HashMap<String, Job>,
    executions: Vec<ExecutionRecord>,
    calls: Vec<StoreCall>,
}

/// Job store backed by a map, with a call log for inspection
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    state: RwLock<StoreState>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, job: Job) {
        let mut state = self.state.write().await;
        state.jobs.insert(job.id.clone(), job);
    }

    pub async fn get(&self, id: &str) -> Option<Job> {
        self.state.read().await.jobs.get(id).cloned()
    }

    /// Set a job's status directly, as the API layer would (e.g. user cancel)
    pub async fn set_status(&self, id: &str, status: JobStatus) -> Result<()> {
        self.update(id, None, |job| {
            job.status = status;
            Ok(())
        })
        .await
    }

    pub async fn executions(&self) -> Vec<ExecutionRecord> {
        self.state.read().await.executions.clone()
    }

    pub async fn calls(&self) -> Vec<StoreCall> {
        self.state.read().await.calls.clone()
    }

    pub async fn call_count(&self, name: &str) -> usize {
        self.state
            .read()
            .await
            .calls
            .iter()
            .filter(|call| call.name() == name)
            .count()
    }

    async fn update<F>(&self, id: &str, call: Option<StoreCall>, f: F) -> Result<()>
    where
        F: FnOnce(&mut Job) -> Result<()>,
    {
        let mut state = self.state.write().await;
        if let Some(call) = call {
            state.calls.push(call);
        }
        let job = state
            .jobs
            .get_mut(id)
            .ok_or_else(|| KeeperError::JobNotFound(id.to_string()))?;
        f(job)?;
        job.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn get_active_jobs(&self) -> Result<Vec<Job>> {
        let state = self.state.read().await;
        let mut jobs: Vec<Job> = state
            .jobs
            .values()
            .filter(|job| job.status.is_executable())
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(jobs)
    }

    async fn mark_active(&self, id: &str) -> Result<()> {
        let call = StoreCall::MarkActive { id: id.to_string() };
        self.update(id, Some(call), |job| {
            job.status = JobStatus::Active;
            Ok(())
        })
        .await
    }

    async fn mark_executed(&self, id: &str, tx_hash: &str, amount_out: Option<u128>) -> Result<()> {
        let call = StoreCall::MarkExecuted {
            id: id.to_string(),
            tx_hash: tx_hash.to_string(),
        };
        self.update(id, Some(call), |job| {
            job.status = JobStatus::Executed;
            Ok(())
        })
        .await?;

        self.state.write().await.executions.push(ExecutionRecord {
            job_id: id.to_string(),
            tx_hash: tx_hash.to_string(),
            amount_out,
            swap_index: None,
            executed_at: Utc::now(),
        });
        Ok(())
    }

    async fn mark_dca_tick(
        &self,
        id: &str,
        tx_hash: &str,
        new_swaps_completed: u32,
        next_execution_ms: i64,
        amount_out: Option<u128>,
    ) -> Result<()> {
        let call = StoreCall::MarkDcaTick {
            id: id.to_string(),
            tx_hash: tx_hash.to_string(),
            swaps_completed: new_swaps_completed,
        };
        self.update(id, Some(call), |job| {
            let JobParams::Dca(params) = &mut job.params else {
                return Err(KeeperError::Validation(format!("job {} is not a DCA job", id)));
            };
            params.swaps_completed = new_swaps_completed;
            params.next_execution = next_execution_ms;
            if params.is_complete() {
                debug!(job_id = id, "All DCA swaps completed");
                job.status = JobStatus::Executed;
            }
            Ok(())
        })
        .await?;

        self.state.write().await.executions.push(ExecutionRecord {
            job_id: id.to_string(),
            tx_hash: tx_hash.to_string(),
            amount_out,
            swap_index: Some(new_swaps_completed),
            executed_at: Utc::now(),
        });
        Ok(())
    }

    async fn mark_failed(&self, id: &str, error: &str) -> Result<()> {
        let call = StoreCall::MarkFailed {
            id: id.to_string(),
            error: error.to_string(),
        };
        self.update(id, Some(call), |job| {
            job.status = JobStatus::Failed;
            job.last_error = Some(error.to_string());
            Ok(())
        })
        .await
    }

    async fn increment_retry(&self, id: &str) -> Result<()> {
        let call = StoreCall::IncrementRetry { id: id.to_string() };
        self.update(id, Some(call), |job| {
            job.retries = job.retries.saturating_add(1);
            Ok(())
        })
        .await
    }

    async fn mark_expired(&self, id: &str) -> Result<()> {
        let call = StoreCall::MarkExpired { id: id.to_string() };
        self.update(id, Some(call), |job| {
            job.status = JobStatus::Expired;
            Ok(())
        })
        .await
    }

    async fn mark_cancelled(&self, id: &str) -> Result<()> {
        let call = StoreCall::MarkCancelled { id: id.to_string() };
        self.update(id, Some(call), |job| {
            job.status = JobStatus::Cancelled;
            Ok(())
        })
        .await
    }

    async fn update_last_error(&self, id: &str, error: &str) -> Result<()> {
        let call = StoreCall::UpdateLastError {
            id: id.to_string(),
            error: error.to_string(),
        };
        self.update(id, Some(call), |job| {
            job.last_error = Some(error.to_string());
            Ok(())
        })
        .await
    }
}
