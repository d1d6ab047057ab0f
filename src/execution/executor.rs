//! Tick orchestration.
//!
//! Each tick pulls the store's active jobs plus due retries and evaluates every
//! job concurrently. A job's evaluation runs price check, safety check, submit
//! and persist strictly in that order, and every failure is resolved inside the
//! job's own evaluation through the typed error policy.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use super::job_store::JobStore;
use super::price_checker::{PriceChecker, DCA_EXECUTION_BUFFER_MS};
use super::retry_queue::{RetryConfig, RetryQueue};
use crate::chain::{KeeperClient, OnChainStatus};
use crate::coordination::{SafetyContext, SafetyDecision, SafetyGuard};
use crate::domain::{Job, JobParams, JobStatus, SafetyRule};
use crate::error::{ErrorPolicy, ExecutorErrorKind, KeeperError, Result};

/// Stored in place of a transaction hash when a job is marked executed because
/// the chain already reports it executed
pub const SYNC_TX_MARKER: &str = "sync:on-chain-executed";

/// Executor settings
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorConfig {
    /// Evaluate and log, never submit
    #[serde(default = "default_dry_run")]
    pub dry_run: bool,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_dca_buffer_ms")]
    pub dca_buffer_ms: i64,
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_dry_run() -> bool {
    true
}

fn default_tick_interval_ms() -> u64 {
    15_000
}

fn default_dca_buffer_ms() -> i64 {
    DCA_EXECUTION_BUFFER_MS
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            dry_run: default_dry_run(),
            tick_interval_ms: default_tick_interval_ms(),
            dca_buffer_ms: default_dca_buffer_ms(),
            retry: RetryConfig::default(),
        }
    }
}

/// What happened to one job during a tick
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Submitted and persisted (limit fill or one DCA swap)
    Executed { tx_hash: String },
    /// Trigger does not hold yet
    NotReady,
    /// Safety guard refused the submission
    Blocked(SafetyRule),
    /// Would have submitted
    DryRun,
    /// Nothing to do for this job right now
    Skipped(&'static str),
    /// Passed its expiry, marked expired
    Expired,
    /// Transient failure, the job stays active
    Retried(ExecutorErrorKind),
    /// Local status corrected to match the chain
    Reconciled(JobStatus),
    /// Unexpected failure, job parked in the retry queue
    RetryScheduled { retries: u32, retry_at: DateTime<Utc> },
    /// Retry budget exhausted
    Failed,
}

/// Aggregate counts for one tick
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub evaluated: usize,
    pub executed: usize,
    pub not_ready: usize,
    pub blocked: usize,
    pub dry_run: usize,
    pub skipped: usize,
    pub retried: usize,
    pub reconciled: usize,
    pub expired: usize,
    pub failed: usize,
}

impl TickReport {
    pub fn record(&mut self, outcome: &TickOutcome) {
        self.evaluated += 1;
        match outcome {
            TickOutcome::Executed { .. } => self.executed += 1,
            TickOutcome::NotReady => self.not_ready += 1,
            TickOutcome::Blocked(_) => self.blocked += 1,
            TickOutcome::DryRun => self.dry_run += 1,
            TickOutcome::Skipped(_) => self.skipped += 1,
            TickOutcome::Expired => self.expired += 1,
            TickOutcome::Retried(_) | TickOutcome::RetryScheduled { .. } => self.retried += 1,
            TickOutcome::Reconciled(_) => self.reconciled += 1,
            TickOutcome::Failed => self.failed += 1,
        }
    }
}

impl std::fmt::Display for TickReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "evaluated={} executed={} not_ready={} blocked={} dry_run={} skipped={} retried={} reconciled={} expired={} failed={}",
            self.evaluated,
            self.executed,
            self.not_ready,
            self.blocked,
            self.dry_run,
            self.skipped,
            self.retried,
            self.reconciled,
            self.expired,
            self.failed
        )
    }
}

/// Keeper tick orchestrator
pub struct Executor {
    store: Arc<dyn JobStore>,
    client: Arc<dyn KeeperClient>,
    price_checker: Arc<PriceChecker>,
    safety: Arc<SafetyGuard>,
    retry_queue: Arc<RetryQueue>,
    dry_run: bool,
}

impl Executor {
    pub fn new(
        store: Arc<dyn JobStore>,
        client: Arc<dyn KeeperClient>,
        price_checker: Arc<PriceChecker>,
        safety: Arc<SafetyGuard>,
    ) -> Self {
        Self {
            store,
            client,
            price_checker,
            safety,
            retry_queue: Arc::new(RetryQueue::with_defaults()),
            dry_run: true,
        }
    }

    pub fn with_retry_queue(mut self, retry_queue: Arc<RetryQueue>) -> Self {
        self.retry_queue = retry_queue;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn safety(&self) -> &Arc<SafetyGuard> {
        &self.safety
    }

    pub fn retry_queue(&self) -> &Arc<RetryQueue> {
        &self.retry_queue
    }

    pub fn price_checker(&self) -> &Arc<PriceChecker> {
        &self.price_checker
    }

    /// Evaluate every active job and every due retry once
    pub async fn run_all_ticks(&self) -> Result<TickReport> {
        self.run_all_ticks_at(Utc::now()).await
    }

    pub async fn run_all_ticks_at(&self, now: DateTime<Utc>) -> Result<TickReport> {
        let active = self.store.get_active_jobs().await?;
        let due = self.retry_queue.drain_due_at(now).await;
        // Whatever is still queued after the drain is backing off
        let held = self.retry_queue.pending_ids().await;

        let mut seen = HashSet::new();
        let mut jobs = Vec::with_capacity(active.len());
        let mut fresh: HashMap<String, Job> = HashMap::new();
        for job in active {
            if held.contains(&job.id) {
                debug!(job_id = %job.id, "Job backing off, skipped this tick");
                continue;
            }
            fresh.insert(job.id.clone(), job);
        }

        // Due retries run on the store's current record; a retry whose job left
        // the active set (cancelled, paused, ...) is superseded
        for entry in due {
            match fresh.remove(&entry.job.id) {
                Some(job) => {
                    if seen.insert(job.id.clone()) {
                        jobs.push(job);
                    }
                }
                None if seen.contains(&entry.job.id) => {}
                None => {
                    debug!(job_id = %entry.job.id, "Dropping superseded retry");
                }
            }
        }
        let mut remaining: Vec<Job> = fresh.into_values().collect();
        remaining.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        for job in remaining {
            if seen.insert(job.id.clone()) {
                jobs.push(job);
            }
        }

        let outcomes = join_all(jobs.into_iter().map(|job| self.process_tick_at(job, now))).await;

        let mut report = TickReport::default();
        for outcome in &outcomes {
            report.record(outcome);
        }

        if report.evaluated > 0 {
            info!("Tick complete: {}", report);
        } else {
            debug!("Tick complete: no jobs due");
        }
        Ok(report)
    }

    /// Evaluate a single job. Never fails: every error is resolved here.
    pub async fn process_tick(&self, job: Job) -> TickOutcome {
        self.process_tick_at(job, Utc::now()).await
    }

    #[instrument(skip(self, job, now), fields(job_id = %job.id, job_type = %job.job_type()))]
    pub async fn process_tick_at(&self, mut job: Job, now: DateTime<Utc>) -> TickOutcome {
        // Expiry pre-empts everything else
        if job.is_expired_at(now) {
            info!("Job expired before execution");
            self.persist("mark_expired", self.store.mark_expired(&job.id))
                .await;
            return TickOutcome::Expired;
        }

        if job.status == JobStatus::Pending {
            if let Err(e) = self.store.mark_active(&job.id).await {
                return self.handle_error(&job, e, now).await;
            }
            debug!("Job activated");
            job.status = JobStatus::Active;
        }

        let result = match &job.params {
            JobParams::LimitOrder(_) => self.execute_limit_order(&job, now).await,
            JobParams::Dca(_) => self.execute_dca_tick(&job, now).await,
            JobParams::Twap(_) | JobParams::Swap(_) => {
                debug!("No execution path for job type");
                return TickOutcome::Skipped("unsupported job type");
            }
        };

        match result {
            Ok(outcome) => outcome,
            Err(e) => self.handle_error(&job, e, now).await,
        }
    }

    async fn execute_limit_order(&self, job: &Job, now: DateTime<Utc>) -> Result<TickOutcome> {
        let params = job.limit_params().ok_or_else(|| {
            KeeperError::Validation(format!("job {} is not a limit order", job.id))
        })?;

        let check = self.price_checker.check_limit_order(job).await?;
        if !check.condition_met {
            debug!(
                current_price = check.current_price,
                target_price = check.target_price,
                "Limit order condition not met"
            );
            return Ok(TickOutcome::NotReady);
        }

        if let Some(outcome) = self.guard(job, check.swap_usd, now).await? {
            return Ok(outcome);
        }

        if self.dry_run {
            info!(
                current_price = check.current_price,
                swap_usd = %check.swap_usd,
                "[DRY RUN] Would execute limit order"
            );
            return Ok(TickOutcome::DryRun);
        }

        let Some(on_chain_id) = job.on_chain_job_id else {
            debug!("Job not registered on-chain yet");
            return Ok(TickOutcome::Skipped("not registered on-chain"));
        };

        let receipt = self
            .client
            .execute_limit_order(on_chain_id, &job.owner, params)
            .await?;
        self.store
            .mark_executed(&job.id, &receipt.tx_hash, receipt.amount_out)
            .await?;

        info!(
            tx_hash = %receipt.tx_hash,
            amount_out = ?receipt.amount_out,
            "Limit order executed"
        );
        Ok(TickOutcome::Executed {
            tx_hash: receipt.tx_hash,
        })
    }

    async fn execute_dca_tick(&self, job: &Job, now: DateTime<Utc>) -> Result<TickOutcome> {
        let params = job
            .dca_params()
            .ok_or_else(|| KeeperError::Validation(format!("job {} is not a DCA job", job.id)))?;

        let check = self.price_checker.check_dca_at(job, now).await?;
        if !check.condition_met {
            debug!(
                next_execution = params.next_execution,
                "DCA interval not reached"
            );
            return Ok(TickOutcome::NotReady);
        }

        if let Some(outcome) = self.guard(job, check.swap_usd, now).await? {
            return Ok(outcome);
        }

        if self.dry_run {
            info!(
                swap = params.swaps_completed + 1,
                total_swaps = params.total_swaps,
                swap_usd = %check.swap_usd,
                "[DRY RUN] Would execute DCA tick"
            );
            return Ok(TickOutcome::DryRun);
        }

        let Some(on_chain_id) = job.on_chain_job_id else {
            debug!("Job not registered on-chain yet");
            return Ok(TickOutcome::Skipped("not registered on-chain"));
        };

        let receipt = self
            .client
            .execute_dca_tick(on_chain_id, &job.owner, params)
            .await?;

        // The registry's schedule is authoritative, never recompute it locally
        let swaps_completed = params.swaps_completed.saturating_add(1);
        let next_execution_ms = i64::try_from(receipt.next_execution_sec)
            .unwrap_or(i64::MAX)
            .saturating_mul(1000);
        self.store
            .mark_dca_tick(
                &job.id,
                &receipt.tx_hash,
                swaps_completed,
                next_execution_ms,
                receipt.amount_out,
            )
            .await?;

        info!(
            tx_hash = %receipt.tx_hash,
            swap = swaps_completed,
            total_swaps = params.total_swaps,
            next_execution_ms,
            "DCA tick executed"
        );
        Ok(TickOutcome::Executed {
            tx_hash: receipt.tx_hash,
        })
    }

    /// Returns the outcome to report when the guard refuses the job
    async fn guard(
        &self,
        job: &Job,
        swap_usd: rust_decimal::Decimal,
        now: DateTime<Utc>,
    ) -> Result<Option<TickOutcome>> {
        match self
            .safety
            .check(job, SafetyContext::new(swap_usd).at(now))
            .await
        {
            SafetyDecision::Allowed => Ok(None),
            SafetyDecision::Blocked(violation) if violation.rule == SafetyRule::MaxRetries => {
                error!(
                    retries = job.retries,
                    max_retries = job.max_retries,
                    "Retry budget exhausted, failing job"
                );
                self.store
                    .mark_failed(&job.id, "retry budget exhausted")
                    .await?;
                Ok(Some(TickOutcome::Failed))
            }
            SafetyDecision::Blocked(violation) => {
                info!(rule = %violation.rule, "Execution blocked: {}", violation.detail);
                Ok(Some(TickOutcome::Blocked(violation.rule)))
            }
        }
    }

    async fn handle_error(&self, job: &Job, err: KeeperError, now: DateTime<Utc>) -> TickOutcome {
        let kind = err.kind();
        let message = err.to_string();

        match kind.policy() {
            ErrorPolicy::SilentRetry => {
                debug!(kind = %kind, "Transient condition, re-evaluating next tick: {}", message);
                TickOutcome::Retried(kind)
            }
            ErrorPolicy::RetryWithBookkeeping => {
                warn!(kind = %kind, "Retrying after: {}", message);
                self.record_retry(job, &message).await;
                TickOutcome::Retried(kind)
            }
            ErrorPolicy::CancelUnknown => {
                warn!("Job unknown on-chain, cancelling as superseded: {}", message);
                self.cancel(job, &message).await
            }
            ErrorPolicy::Reconcile => self.reconcile(job, &message).await,
            ErrorPolicy::ResolveAmbiguous => self.resolve_ambiguous(job, &message).await,
            ErrorPolicy::Escalate => self.escalate(job, &message, now).await,
        }
    }

    /// The chain rejected the job as inactive: take its status as the truth
    async fn reconcile(&self, job: &Job, message: &str) -> TickOutcome {
        match self.read_on_chain_status(job).await {
            Ok(OnChainStatus::Executed) => {
                warn!("Job already executed on-chain, syncing local status");
                self.mark_synced(job).await
            }
            Ok(OnChainStatus::Active) => {
                warn!("Chain rejected job as inactive but reports it active: {}", message);
                self.record_retry(job, message).await;
                TickOutcome::Retried(ExecutorErrorKind::JobNotActive)
            }
            Ok(status) => {
                warn!(on_chain_status = %status, "Job no longer active on-chain, cancelling");
                self.cancel(job, message).await
            }
            Err(e) => {
                warn!("On-chain status unavailable ({}), cancelling: {}", e, message);
                self.cancel(job, message).await
            }
        }
    }

    /// A submission timed out: the transaction may or may not have landed, so
    /// never resubmit blindly
    async fn resolve_ambiguous(&self, job: &Job, message: &str) -> TickOutcome {
        match self.read_on_chain_status(job).await {
            Ok(OnChainStatus::Executed) => {
                warn!("Timed out submission landed, syncing local status");
                self.mark_synced(job).await
            }
            Ok(status @ (OnChainStatus::Cancelled | OnChainStatus::Expired)) => {
                warn!(on_chain_status = %status, "Job no longer active on-chain after timeout");
                self.cancel(job, message).await
            }
            Ok(OnChainStatus::Active) | Err(_) => {
                warn!("Outcome unknown after timeout, re-evaluating next tick: {}", message);
                self.persist(
                    "update_last_error",
                    self.store.update_last_error(&job.id, message),
                )
                .await;
                TickOutcome::Retried(ExecutorErrorKind::Timeout)
            }
        }
    }

    async fn escalate(&self, job: &Job, message: &str, now: DateTime<Utc>) -> TickOutcome {
        error!(
            retries = job.retries,
            max_retries = job.max_retries,
            "Unexpected execution error: {}",
            message
        );
        self.record_retry(job, message).await;

        let retries = job.retries.saturating_add(1);
        if retries < job.max_retries {
            let mut snapshot = job.clone();
            snapshot.retries = retries;
            snapshot.last_error = Some(message.to_string());
            let retry_at = self.retry_queue.enqueue_at(snapshot, now).await;
            info!(retries, retry_at = %retry_at.to_rfc3339(), "Job scheduled for retry");
            TickOutcome::RetryScheduled { retries, retry_at }
        } else {
            error!(retries, "Retry budget exhausted, failing job");
            self.persist("mark_failed", self.store.mark_failed(&job.id, message))
                .await;
            TickOutcome::Failed
        }
    }

    async fn read_on_chain_status(&self, job: &Job) -> Result<OnChainStatus> {
        let on_chain_id = job.on_chain_job_id.ok_or_else(|| {
            KeeperError::Validation(format!("job {} has no on-chain id", job.id))
        })?;
        Ok(self.client.get_on_chain_status(on_chain_id).await?)
    }

    async fn mark_synced(&self, job: &Job) -> TickOutcome {
        self.persist(
            "mark_executed",
            self.store.mark_executed(&job.id, SYNC_TX_MARKER, None),
        )
        .await;
        TickOutcome::Reconciled(JobStatus::Executed)
    }

    async fn cancel(&self, job: &Job, message: &str) -> TickOutcome {
        self.persist(
            "update_last_error",
            self.store.update_last_error(&job.id, message),
        )
        .await;
        self.persist("mark_cancelled", self.store.mark_cancelled(&job.id))
            .await;
        TickOutcome::Reconciled(JobStatus::Cancelled)
    }

    async fn record_retry(&self, job: &Job, message: &str) {
        self.persist("increment_retry", self.store.increment_retry(&job.id))
            .await;
        self.persist(
            "update_last_error",
            self.store.update_last_error(&job.id, message),
        )
        .await;
    }

    /// Store writes made while handling an error are logged, not propagated
    async fn persist<F>(&self, operation: &str, fut: F) -> bool
    where
        F: Future<Output = Result<()>>,
    {
        match fut.await {
            Ok(()) => true,
            Err(e) => {
                error!(operation, "Store update failed: {}", e);
                false
            }
        }
    }
}
