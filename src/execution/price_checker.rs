//! Trigger evaluation for limit orders and DCA ticks.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::domain::Job;
use crate::error::{KeeperError, Result};

/// Default buffer added to a DCA job's next execution time before it is due.
/// Covers the gap between local evaluation and the block that mines the tick.
pub const DCA_EXECUTION_BUFFER_MS: i64 = 15_000;

/// Token decimals assumed when nothing better is known
pub const DEFAULT_TOKEN_DECIMALS: u32 = 18;

/// Quotes tokenIn → tokenOut as an 18-decimal fixed-point price
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn get_price(&self, token_in: &str, token_out: &str) -> Result<u128>;
}

/// Resolves the decimal count of a token
#[async_trait]
pub trait DecimalsResolver: Send + Sync {
    async fn decimals(&self, token: &str) -> Result<u32>;
}

/// Resolver that answers the same count for every token, with optional overrides
#[derive(Debug, Clone)]
pub struct FixedDecimals {
    default: u32,
    overrides: HashMap<String, u32>,
}

impl FixedDecimals {
    pub fn new(default: u32) -> Self {
        Self {
            default,
            overrides: HashMap::new(),
        }
    }

    pub fn with_overrides(mut self, overrides: HashMap<String, u32>) -> Self {
        self.overrides = overrides
            .into_iter()
            .map(|(token, decimals)| (token.to_lowercase(), decimals))
            .collect();
        self
    }
}

impl Default for FixedDecimals {
    fn default() -> Self {
        Self::new(DEFAULT_TOKEN_DECIMALS)
    }
}

#[async_trait]
impl DecimalsResolver for FixedDecimals {
    async fn decimals(&self, token: &str) -> Result<u32> {
        Ok(self
            .overrides
            .get(&token.to_lowercase())
            .copied()
            .unwrap_or(self.default))
    }
}

/// Result of evaluating a job's trigger
#[derive(Debug, Clone, PartialEq)]
pub struct PriceCheckResult {
    pub condition_met: bool,
    pub current_price: u128,
    pub target_price: u128,
    pub swap_usd: Decimal,
}

/// Evaluates whether a job's trigger currently holds
pub struct PriceChecker {
    source: Arc<dyn PriceSource>,
    decimals: Arc<dyn DecimalsResolver>,
    /// token address (lowercase) -> USD per whole token
    usd_prices: RwLock<HashMap<String, Decimal>>,
    dca_buffer_ms: i64,
}

impl PriceChecker {
    pub fn new(source: Arc<dyn PriceSource>) -> Self {
        Self {
            source,
            decimals: Arc::new(FixedDecimals::default()),
            usd_prices: RwLock::new(HashMap::new()),
            dca_buffer_ms: DCA_EXECUTION_BUFFER_MS,
        }
    }

    pub fn with_decimals(mut self, decimals: Arc<dyn DecimalsResolver>) -> Self {
        self.decimals = decimals;
        self
    }

    pub fn with_dca_buffer_ms(mut self, buffer_ms: i64) -> Self {
        self.dca_buffer_ms = buffer_ms;
        self
    }

    pub async fn check_limit_order(&self, job: &Job) -> Result<PriceCheckResult> {
        let params = job.limit_params().ok_or_else(|| {
            KeeperError::Validation(format!("job {} is not a limit order", job.id))
        })?;

        let current_price = self.fetch_price(&params.token_in, &params.token_out).await;
        let condition_met = params.direction.is_met(current_price, params.target_price);
        let swap_usd = self.estimate_usd(&params.token_in, params.amount_in).await;

        debug!(
            job_id = %job.id,
            current_price,
            target_price = params.target_price,
            direction = ?params.direction,
            condition_met,
            "Limit order checked"
        );

        Ok(PriceCheckResult {
            condition_met,
            current_price,
            target_price: params.target_price,
            swap_usd,
        })
    }

    pub async fn check_dca(&self, job: &Job) -> Result<PriceCheckResult> {
        self.check_dca_at(job, Utc::now()).await
    }

    /// DCA has no price condition, only time: due once `now >= next + buffer`
    pub async fn check_dca_at(&self, job: &Job, now: DateTime<Utc>) -> Result<PriceCheckResult> {
        let params = job
            .dca_params()
            .ok_or_else(|| KeeperError::Validation(format!("job {} is not a DCA job", job.id)))?;

        let condition_met =
            now.timestamp_millis() >= params.next_execution.saturating_add(self.dca_buffer_ms);
        let current_price = self.fetch_price(&params.token_in, &params.token_out).await;
        let swap_usd = self
            .estimate_usd(&params.token_in, params.amount_per_swap)
            .await;

        Ok(PriceCheckResult {
            condition_met,
            current_price,
            target_price: 0,
            swap_usd,
        })
    }

    /// USD value of `amount` raw units of `token`, zero when the token has no cached price
    pub async fn estimate_usd(&self, token: &str, amount: u128) -> Decimal {
        let usd_price = match self.usd_price(token).await {
            Some(price) => price,
            None => return Decimal::ZERO,
        };

        let decimals = match self.decimals.decimals(token).await {
            Ok(d) => d,
            Err(e) => {
                warn!(token, "Decimals lookup failed, assuming {}: {}", DEFAULT_TOKEN_DECIMALS, e);
                DEFAULT_TOKEN_DECIMALS
            }
        };

        raw_to_units(amount, decimals)
            .checked_mul(usd_price)
            .unwrap_or(Decimal::MAX)
    }

    pub async fn set_usd_price(&self, token: &str, usd_price: Decimal) {
        self.usd_prices
            .write()
            .await
            .insert(token.to_lowercase(), usd_price);
    }

    pub async fn set_usd_prices(&self, entries: &HashMap<String, Decimal>) {
        let mut prices = self.usd_prices.write().await;
        for (token, price) in entries {
            prices.insert(token.to_lowercase(), *price);
        }
    }

    pub async fn usd_price(&self, token: &str) -> Option<Decimal> {
        self.usd_prices
            .read()
            .await
            .get(&token.to_lowercase())
            .copied()
    }

    async fn fetch_price(&self, token_in: &str, token_out: &str) -> u128 {
        match self.source.get_price(token_in, token_out).await {
            Ok(price) => price,
            Err(e) => {
                warn!(token_in, token_out, "Price unavailable, treating as 0: {}", e);
                0
            }
        }
    }
}

/// Convert a raw integer amount into whole-token units
pub fn raw_to_units(amount: u128, decimals: u32) -> Decimal {
    // Decimal carries at most 28 fractional digits
    let scale = decimals.min(28);
    let divisor = 10u128.pow(scale);
    let whole = Decimal::from_u128(amount / divisor).unwrap_or(Decimal::MAX);
    let frac = Decimal::from_i128_with_scale((amount % divisor) as i128, scale);
    let units = whole.checked_add(frac).unwrap_or(Decimal::MAX);

    let extra = decimals.saturating_sub(28).min(28);
    if extra > 0 {
        units * Decimal::new(1, extra)
    } else {
        units
    }
}
