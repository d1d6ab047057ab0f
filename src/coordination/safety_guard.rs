//! Safety Guard
//!
//! Last gate before a transaction is submitted. Validates a job against the
//! live execution bounds, owns the global circuit breaker, and keeps an
//! append-only audit trail of blocked checks (oldest records are dropped once
//! the retention cap is reached).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::VecDeque;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::domain::{Job, JobParams, SafetyConfig, SafetyConfigPatch, SafetyRule, SafetyViolation};

/// Inputs computed by the caller for a single check
#[derive(Debug, Clone, Copy)]
pub struct SafetyContext {
    /// Estimated USD value of the swap
    pub swap_usd: Decimal,
    /// Evaluation time, defaults to now
    pub current_time: Option<DateTime<Utc>>,
}

impl SafetyContext {
    pub fn new(swap_usd: Decimal) -> Self {
        Self {
            swap_usd,
            current_time: None,
        }
    }

    pub fn at(mut self, time: DateTime<Utc>) -> Self {
        self.current_time = Some(time);
        self
    }
}

/// Outcome of a guard check
#[derive(Debug, Clone, PartialEq)]
pub enum SafetyDecision {
    Allowed,
    Blocked(SafetyViolation),
}

impl SafetyDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, SafetyDecision::Allowed)
    }

    pub fn violation(&self) -> Option<&SafetyViolation> {
        match self {
            SafetyDecision::Allowed => None,
            SafetyDecision::Blocked(v) => Some(v),
        }
    }
}

/// Audit records kept before the oldest are dropped
pub const DEFAULT_VIOLATION_CAPACITY: usize = 10_000;

/// Process-wide safety guard
pub struct SafetyGuard {
    config: RwLock<SafetyConfig>,
    violations: RwLock<VecDeque<SafetyViolation>>,
    violation_capacity: usize,
}

impl SafetyGuard {
    pub fn new(config: SafetyConfig) -> Self {
        Self {
            config: RwLock::new(config),
            violations: RwLock::new(VecDeque::new()),
            violation_capacity: DEFAULT_VIOLATION_CAPACITY,
        }
    }

    pub fn with_violation_capacity(mut self, capacity: usize) -> Self {
        self.violation_capacity = capacity.max(1);
        self
    }

    pub fn with_defaults() -> Self {
        Self::new(SafetyConfig::default())
    }

    /// Run every rule in order, stopping at the first failure
    pub async fn check(&self, job: &Job, ctx: SafetyContext) -> SafetyDecision {
        let now = ctx.current_time.unwrap_or_else(Utc::now);
        let config = self.config.read().await.clone();

        match Self::evaluate(&config, job, ctx.swap_usd, now) {
            None => SafetyDecision::Allowed,
            Some((rule, detail)) => {
                let violation = SafetyViolation {
                    job_id: job.id.clone(),
                    rule,
                    detail,
                    timestamp: now,
                };
                warn!(
                    job_id = %job.id,
                    rule = %violation.rule,
                    "Safety check blocked job: {}",
                    violation.detail
                );
                self.record(violation.clone()).await;
                SafetyDecision::Blocked(violation)
            }
        }
    }

    fn evaluate(
        config: &SafetyConfig,
        job: &Job,
        swap_usd: Decimal,
        now: DateTime<Utc>,
    ) -> Option<(SafetyRule, String)> {
        if config.global_pause {
            return Some((
                SafetyRule::GlobalPause,
                "global pause is active".to_string(),
            ));
        }

        if !job.status.is_executable() {
            return Some((
                SafetyRule::InvalidStatus,
                format!("job status '{}' is not executable", job.status),
            ));
        }

        if job.retries_exhausted() {
            return Some((
                SafetyRule::MaxRetries,
                format!("retries {} >= max {}", job.retries, job.max_retries),
            ));
        }

        if swap_usd > config.max_swap_usd {
            return Some((
                SafetyRule::MaxSwapUsd,
                format!("swap ${} exceeds cap ${}", swap_usd, config.max_swap_usd),
            ));
        }

        if let Some(expires_at) = job.expires_at {
            if now >= expires_at {
                return Some((
                    SafetyRule::Expired,
                    format!("expired at {}", expires_at.to_rfc3339()),
                ));
            }
        }

        if let JobParams::Dca(params) = &job.params {
            let now_ms = now.timestamp_millis();
            if now_ms < params.next_execution {
                let remaining_secs = (params.next_execution - now_ms + 999) / 1000;
                return Some((
                    SafetyRule::DcaInterval,
                    format!("next execution in {}s", remaining_secs),
                ));
            }
            if params.interval_seconds < config.min_execution_interval_seconds {
                return Some((
                    SafetyRule::MinInterval,
                    format!(
                        "interval {}s below minimum {}s",
                        params.interval_seconds, config.min_execution_interval_seconds
                    ),
                ));
            }
        }

        if let JobParams::LimitOrder(params) = &job.params {
            if let Some(slippage_bps) = params.slippage_bps {
                if slippage_bps > config.max_slippage_bps {
                    return Some((
                        SafetyRule::MaxSlippage,
                        format!(
                            "slippage {} bps exceeds max {} bps",
                            slippage_bps, config.max_slippage_bps
                        ),
                    ));
                }
            }
        }

        None
    }

    /// Trip the circuit breaker
    pub async fn pause_all(&self) {
        self.config.write().await.global_pause = true;
        warn!("Global pause ENABLED - all job execution halted");
    }

    /// Reset the circuit breaker
    pub async fn resume_all(&self) {
        self.config.write().await.global_pause = false;
        info!("Global pause disabled - execution resumed");
    }

    pub async fn is_paused(&self) -> bool {
        self.config.read().await.global_pause
    }

    /// Merge a partial patch into the live config
    pub async fn update_config(&self, patch: &SafetyConfigPatch) -> SafetyConfig {
        let mut config = self.config.write().await;
        config.apply(patch);
        info!(?patch, "Safety config updated");
        config.clone()
    }

    pub async fn config(&self) -> SafetyConfig {
        self.config.read().await.clone()
    }

    /// Retained audit records, oldest first
    pub async fn get_violations(&self) -> Vec<SafetyViolation> {
        self.violations.read().await.iter().cloned().collect()
    }

    pub async fn violation_count(&self) -> usize {
        self.violations.read().await.len()
    }

    pub async fn clear_violations(&self) {
        self.violations.write().await.clear();
    }

    async fn record(&self, violation: SafetyViolation) {
        let mut log = self.violations.write().await;
        while log.len() >= self.violation_capacity {
            log.pop_front();
        }
        log.push_back(violation);
    }
}

impl Default for SafetyGuard {
    fn default() -> Self {
        Self::with_defaults()
    }
}
