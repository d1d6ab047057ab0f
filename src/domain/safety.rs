use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Runtime execution bounds, hot-reloadable through the safety guard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    /// Largest swap, in USD, the keeper may submit
    pub max_swap_usd: Decimal,
    /// Largest slippage tolerance a job may request
    pub max_slippage_bps: u32,
    /// Retry cap suggested to job creators. Not enforced here: the guard
    /// compares each job's own `retries` against its own `max_retries`.
    pub max_retries: u32,
    /// Shortest DCA interval the keeper will service
    pub min_execution_interval_seconds: u64,
    /// Circuit breaker: blocks every job while set
    pub global_pause: bool,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            max_swap_usd: Decimal::from(1000),
            max_slippage_bps: 100,
            max_retries: 3,
            min_execution_interval_seconds: 60,
            global_pause: false,
        }
    }
}

/// Partial update merged into the live [`SafetyConfig`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SafetyConfigPatch {
    #[serde(default)]
    pub max_swap_usd: Option<Decimal>,
    #[serde(default)]
    pub max_slippage_bps: Option<u32>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub min_execution_interval_seconds: Option<u64>,
    #[serde(default)]
    pub global_pause: Option<bool>,
}

impl SafetyConfig {
    pub fn apply(&mut self, patch: &SafetyConfigPatch) {
        if let Some(v) = patch.max_swap_usd {
            self.max_swap_usd = v;
        }
        if let Some(v) = patch.max_slippage_bps {
            self.max_slippage_bps = v;
        }
        if let Some(v) = patch.max_retries {
            self.max_retries = v;
        }
        if let Some(v) = patch.min_execution_interval_seconds {
            self.min_execution_interval_seconds = v;
        }
        if let Some(v) = patch.global_pause {
            self.global_pause = v;
        }
    }
}

impl From<SafetyConfig> for SafetyConfigPatch {
    fn from(config: SafetyConfig) -> Self {
        Self {
            max_swap_usd: Some(config.max_swap_usd),
            max_slippage_bps: Some(config.max_slippage_bps),
            max_retries: Some(config.max_retries),
            min_execution_interval_seconds: Some(config.min_execution_interval_seconds),
            global_pause: Some(config.global_pause),
        }
    }
}

/// Guard rules, in evaluation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyRule {
    GlobalPause,
    InvalidStatus,
    MaxRetries,
    MaxSwapUsd,
    Expired,
    DcaInterval,
    MaxSlippage,
    MinInterval,
}

impl SafetyRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            SafetyRule::GlobalPause => "global_pause",
            SafetyRule::InvalidStatus => "invalid_status",
            SafetyRule::MaxRetries => "max_retries",
            SafetyRule::MaxSwapUsd => "max_swap_usd",
            SafetyRule::Expired => "expired",
            SafetyRule::DcaInterval => "dca_interval",
            SafetyRule::MaxSlippage => "max_slippage",
            SafetyRule::MinInterval => "min_interval",
        }
    }
}

impl std::fmt::Display for SafetyRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Audit record, one per failed check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyViolation {
    pub job_id: String,
    pub rule: SafetyRule,
    pub detail: String,
    pub timestamp: DateTime<Utc>,
}

impl std::fmt::Display for SafetyViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] job {}: {}", self.rule, self.job_id, self.detail)
    }
}
