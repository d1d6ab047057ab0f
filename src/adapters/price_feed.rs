//! Price sources for the price checker.

use alloy::primitives::Address;
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::sol;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::keeper_contract::parse_address;
use crate::error::{KeeperError, Result};
use crate::execution::PriceSource;

sol! {
    #[allow(missing_docs)]
    #[sol(rpc)]
    interface IPriceOracle {
        /// tokenIn price in tokenOut, 18-decimal fixed point
        function getPrice(address tokenIn, address tokenOut) external view returns (uint256);
    }
}

fn pair_key(token_in: &str, token_out: &str) -> (String, String) {
    (token_in.trim().to_lowercase(), token_out.trim().to_lowercase())
}

/// In-memory quotes, set explicitly. Unknown pairs quote 0.
#[derive(Debug, Default)]
pub struct StaticPriceSource {
    prices: RwLock<HashMap<(String, String), u128>>,
}

impl StaticPriceSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_price(mut self, token_in: &str, token_out: &str, price: u128) -> Self {
        self.prices
            .get_mut()
            .insert(pair_key(token_in, token_out), price);
        self
    }

    pub async fn set_price(&self, token_in: &str, token_out: &str, price: u128) {
        self.prices
            .write()
            .await
            .insert(pair_key(token_in, token_out), price);
    }

    pub async fn len(&self) -> usize {
        self.prices.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.prices.read().await.is_empty()
    }
}

#[async_trait]
impl PriceSource for StaticPriceSource {
    async fn get_price(&self, token_in: &str, token_out: &str) -> Result<u128> {
        let prices = self.prices.read().await;
        Ok(prices
            .get(&pair_key(token_in, token_out))
            .copied()
            .unwrap_or(0))
    }
}

/// Quotes from an on-chain oracle view call
pub struct OraclePriceSource {
    oracle: IPriceOracle::IPriceOracleInstance<DynProvider>,
}

impl OraclePriceSource {
    pub fn new(rpc_url: &str, oracle_address: &str) -> Result<Self> {
        let rpc_url = rpc_url
            .parse()
            .map_err(|e| KeeperError::Validation(format!("Invalid RPC URL: {}", e)))?;
        let provider = ProviderBuilder::new().connect_http(rpc_url).erased();

        Ok(Self {
            oracle: IPriceOracle::new(parse_address(oracle_address)?, provider),
        })
    }

    pub fn oracle_address(&self) -> Address {
        *self.oracle.address()
    }
}

#[async_trait]
impl PriceSource for OraclePriceSource {
    /// Any lookup failure quotes 0, which never satisfies a `gte` trigger
    async fn get_price(&self, token_in: &str, token_out: &str) -> Result<u128> {
        let (token_in_addr, token_out_addr) =
            match (parse_address(token_in), parse_address(token_out)) {
                (Ok(a), Ok(b)) => (a, b),
                _ => {
                    warn!(token_in, token_out, "Unparseable token address, quoting 0");
                    return Ok(0);
                }
            };

        match self.oracle.getPrice(token_in_addr, token_out_addr).call().await {
            Ok(price) => {
                let price = u128::try_from(price).unwrap_or_else(|_| {
                    warn!(token_in, token_out, "Oracle price exceeds u128, clamping");
                    u128::MAX
                });
                debug!(token_in, token_out, price, "Oracle price");
                Ok(price)
            }
            Err(e) => {
                warn!(token_in, token_out, "Oracle price unavailable: {}", e);
                Ok(0)
            }
        }
    }
}

/// Raw 18-decimal value of a whole-number price, for fixtures and config
pub fn price_from_units(units: u64) -> u128 {
    u128::from(units) * 10u128.pow(18)
}
