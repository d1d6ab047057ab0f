use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Default per-job retry cap when none is given at creation
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Job lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Created by the API layer, not yet picked up
    Pending,
    /// Picked up by the keeper and being evaluated every tick
    Active,
    /// Fully executed (limit order filled, or last DCA swap done)
    Executed,
    /// Cancelled by the user or by reconciliation
    Cancelled,
    /// Retry budget exhausted
    Failed,
    /// Suspended by the user
    Paused,
    /// Passed its `expires_at` before executing
    Expired,
}

impl JobStatus {
    /// Only pending and active jobs may be submitted
    pub fn is_executable(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Active)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Executed | JobStatus::Cancelled | JobStatus::Failed | JobStatus::Expired
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Active => "active",
            JobStatus::Executed => "executed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Failed => "failed",
            JobStatus::Paused => "paused",
            JobStatus::Expired => "expired",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(JobStatus::Pending),
            "active" => Ok(JobStatus::Active),
            "executed" => Ok(JobStatus::Executed),
            "cancelled" => Ok(JobStatus::Cancelled),
            "failed" => Ok(JobStatus::Failed),
            "paused" => Ok(JobStatus::Paused),
            "expired" => Ok(JobStatus::Expired),
            other => Err(format!("unknown job status '{}'", other)),
        }
    }
}

/// Job kind, mirrors the `type` tag of [`JobParams`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    LimitOrder,
    Dca,
    Twap,
    Swap,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::LimitOrder => "limit_order",
            JobType::Dca => "dca",
            JobType::Twap => "twap",
            JobType::Swap => "swap",
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Trigger direction for limit orders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Fire when price rises to or above target
    Gte,
    /// Fire when price falls to or below target
    Lte,
}

impl Direction {
    pub fn is_met(&self, current_price: u128, target_price: u128) -> bool {
        match self {
            Direction::Gte => current_price >= target_price,
            Direction::Lte => current_price <= target_price,
        }
    }
}

/// Raw integer token amounts are serialized as decimal strings so they survive
/// JSON stores that cap numbers at 64 bits.
mod amount_str {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(u64),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Text(s) => s.trim().parse::<u128>().map_err(D::Error::custom),
            Raw::Number(n) => Ok(n as u128),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitOrderParams {
    pub token_in: String,
    pub token_out: String,
    #[serde(with = "amount_str")]
    pub amount_in: u128,
    #[serde(with = "amount_str")]
    pub min_amount_out: u128,
    /// 18-decimal fixed point, same scale as the price source
    #[serde(with = "amount_str")]
    pub target_price: u128,
    pub direction: Direction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slippage_bps: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DcaParams {
    pub token_in: String,
    pub token_out: String,
    #[serde(with = "amount_str")]
    pub amount_per_swap: u128,
    pub interval_seconds: u64,
    pub total_swaps: u32,
    pub swaps_completed: u32,
    /// Epoch milliseconds
    pub next_execution: i64,
}

impl DcaParams {
    pub fn remaining_swaps(&self) -> u32 {
        self.total_swaps.saturating_sub(self.swaps_completed)
    }

    pub fn is_complete(&self) -> bool {
        self.swaps_completed >= self.total_swaps
    }
}

/// Inert shape: no execution path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TwapParams {
    pub token_in: String,
    pub token_out: String,
    #[serde(with = "amount_str")]
    pub total_amount: u128,
    pub num_slices: u32,
    pub interval_seconds: u64,
}

/// Inert shape: no execution path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapParams {
    pub token_in: String,
    pub token_out: String,
    #[serde(with = "amount_str")]
    pub amount_in: u128,
    #[serde(with = "amount_str")]
    pub min_amount_out: u128,
}

/// Type-specific job parameters, tagged by `type`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "params", rename_all = "snake_case")]
pub enum JobParams {
    LimitOrder(LimitOrderParams),
    Dca(DcaParams),
    Twap(TwapParams),
    Swap(SwapParams),
}

impl JobParams {
    pub fn job_type(&self) -> JobType {
        match self {
            JobParams::LimitOrder(_) => JobType::LimitOrder,
            JobParams::Dca(_) => JobType::Dca,
            JobParams::Twap(_) => JobType::Twap,
            JobParams::Swap(_) => JobType::Swap,
        }
    }
}

/// A user-authorized automation request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub owner: String,
    pub status: JobStatus,
    /// Registry id, assigned once the job is registered on-chain
    pub on_chain_job_id: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub retries: u32,
    pub max_retries: u32,
    pub last_error: Option<String>,
    #[serde(flatten)]
    pub params: JobParams,
}

impl Job {
    pub fn new(owner: impl Into<String>, params: JobParams) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            owner: owner.into(),
            status: JobStatus::Pending,
            on_chain_job_id: None,
            created_at: now,
            updated_at: now,
            expires_at: None,
            retries: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            last_error: None,
            params,
        }
    }

    pub fn limit_order(owner: impl Into<String>, params: LimitOrderParams) -> Self {
        Self::new(owner, JobParams::LimitOrder(params))
    }

    pub fn dca(owner: impl Into<String>, params: DcaParams) -> Self {
        Self::new(owner, JobParams::Dca(params))
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_on_chain_id(mut self, on_chain_job_id: u64) -> Self {
        self.on_chain_job_id = Some(on_chain_job_id);
        self
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = status;
        self
    }

    pub fn job_type(&self) -> JobType {
        self.params.job_type()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|exp| now >= exp).unwrap_or(false)
    }

    pub fn retries_exhausted(&self) -> bool {
        self.retries >= self.max_retries
    }

    pub fn limit_params(&self) -> Option<&LimitOrderParams> {
        match &self.params {
            JobParams::LimitOrder(p) => Some(p),
            _ => None,
        }
    }

    pub fn dca_params(&self) -> Option<&DcaParams> {
        match &self.params {
            JobParams::Dca(p) => Some(p),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample_limit() -> LimitOrderParams {
        LimitOrderParams {
            token_in: "0xA0b8".to_string(),
            token_out: "0xC02a".to_string(),
            amount_in: 1_000_000_000_000_000_000,
            min_amount_out: 1,
            target_price: 2_000_000_000_000_000_000_000,
            direction: Direction::Gte,
            slippage_bps: Some(50),
        }
    }

    #[test]
    fn test_direction_is_met() {
        assert!(Direction::Gte.is_met(100, 100));
        assert!(Direction::Gte.is_met(101, 100));
        assert!(!Direction::Gte.is_met(99, 100));
        assert!(Direction::Lte.is_met(100, 100));
        assert!(Direction::Lte.is_met(99, 100));
        assert!(!Direction::Lte.is_met(101, 100));
    }

    #[test]
    fn test_only_pending_and_active_are_executable() {
        assert!(JobStatus::Pending.is_executable());
        assert!(JobStatus::Active.is_executable());
        for status in [
            JobStatus::Executed,
            JobStatus::Cancelled,
            JobStatus::Failed,
            JobStatus::Paused,
            JobStatus::Expired,
        ] {
            assert!(!status.is_executable(), "{} should not execute", status);
        }
        assert!(!JobStatus::Paused.is_terminal());
    }

    #[test]
    fn test_status_parses_from_store_text() {
        assert_eq!("ACTIVE".parse::<JobStatus>().unwrap(), JobStatus::Active);
        assert_eq!("expired".parse::<JobStatus>().unwrap(), JobStatus::Expired);
        assert!("done".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_new_job_defaults() {
        let job = Job::limit_order("0xowner", sample_limit());
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.retries, 0);
        assert_eq!(job.max_retries, DEFAULT_MAX_RETRIES);
        assert!(job.on_chain_job_id.is_none());
        assert_eq!(job.job_type(), JobType::LimitOrder);
        assert!(job.limit_params().is_some());
        assert!(job.dca_params().is_none());
    }

    #[test]
    fn test_expiry_is_inclusive() {
        let now = Utc::now();
        let job = Job::limit_order("0xowner", sample_limit()).with_expiry(now);
        assert!(job.is_expired_at(now));
        assert!(!job.is_expired_at(now - Duration::seconds(1)));

        let no_expiry = Job::limit_order("0xowner", sample_limit());
        assert!(!no_expiry.is_expired_at(now + Duration::days(365)));
    }

    #[test]
    fn test_job_json_shape() {
        let job = Job::limit_order("0xowner", sample_limit())
            .with_id("job-1")
            .with_on_chain_id(7);
        let value = serde_json::to_value(&job).unwrap();

        assert_eq!(value["type"], "limit_order");
        assert_eq!(value["onChainJobId"], 7);
        assert_eq!(value["params"]["direction"], "gte");
        // Amounts beyond u64 survive as strings
        assert_eq!(
            value["params"]["targetPrice"],
            "2000000000000000000000"
        );

        let back: Job = serde_json::from_value(value).unwrap();
        assert_eq!(back, job);
    }

    #[test]
    fn test_amounts_accept_plain_numbers() {
        let raw = serde_json::json!({
            "tokenIn": "0xa",
            "tokenOut": "0xb",
            "amountPerSwap": 5000,
            "intervalSeconds": 3600,
            "totalSwaps": 3,
            "swapsCompleted": 1,
            "nextExecution": 0
        });
        let params: DcaParams = serde_json::from_value(raw).unwrap();
        assert_eq!(params.amount_per_swap, 5000);
        assert_eq!(params.remaining_swaps(), 2);
        assert!(!params.is_complete());
    }
}
