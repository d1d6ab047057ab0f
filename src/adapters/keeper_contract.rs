//! Keeper registry contract adapter.
//!
//! Every write is simulated with `eth_call` first so contract reverts surface
//! with their reason before any gas is spent, then sent and awaited for a
//! receipt. Realized amounts come from the registry's execution events.

use alloy::network::EthereumWallet;
use alloy::primitives::{Address, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::TransactionReceipt;
use alloy::signers::local::PrivateKeySigner;
use alloy::sol;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::chain::{
    chain_error, ChainResult, DcaExecutionReceipt, ExecutionReceipt, KeeperClient, OnChainStatus,
};
use crate::domain::{DcaParams, LimitOrderParams};
use crate::error::{ChainError, ExecutorErrorKind, KeeperError, Result};

sol! {
    #[allow(missing_docs)]
    #[sol(rpc)]
    interface IKeeperRegistry {
        /// Execute a registered limit order whose trigger holds
        function executeLimitOrder(uint256 jobId) external returns (uint256 amountOut);

        /// Execute the next swap of a registered DCA schedule
        function executeDCATick(uint256 jobId) external returns (uint256 amountOut);

        /// 0 active, 1 executed, 2 cancelled, 3 expired
        function getJobStatus(uint256 jobId) external view returns (uint8);

        event LimitOrderExecuted(
            uint256 indexed jobId,
            address indexed owner,
            uint256 amountIn,
            uint256 amountOut
        );

        event DCATickExecuted(
            uint256 indexed jobId,
            address indexed owner,
            uint256 swapNumber,
            uint256 amountOut,
            uint256 nextExecution
        );
    }
}

/// [`KeeperClient`] backed by the on-chain keeper registry
pub struct ContractKeeperClient {
    registry: IKeeperRegistry::IKeeperRegistryInstance<DynProvider>,
    receipt_timeout: Duration,
}

impl ContractKeeperClient {
    /// Signing client able to submit executions
    pub fn new(
        rpc_url: &str,
        registry_address: &str,
        private_key: &str,
        receipt_timeout: Duration,
    ) -> Result<Self> {
        let signer: PrivateKeySigner = private_key
            .trim()
            .parse()
            .map_err(|e| KeeperError::Validation(format!("Invalid private key: {}", e)))?;
        info!("Keeper signer: {}", signer.address());

        let wallet = EthereumWallet::from(signer);
        let rpc_url = rpc_url
            .parse()
            .map_err(|e| KeeperError::Validation(format!("Invalid RPC URL: {}", e)))?;
        let provider = ProviderBuilder::new()
            .wallet(wallet)
            .connect_http(rpc_url)
            .erased();

        Ok(Self {
            registry: IKeeperRegistry::new(parse_address(registry_address)?, provider),
            receipt_timeout,
        })
    }

    /// Client without a signer: status reads work, writes are rejected by the node
    pub fn read_only(rpc_url: &str, registry_address: &str) -> Result<Self> {
        let rpc_url = rpc_url
            .parse()
            .map_err(|e| KeeperError::Validation(format!("Invalid RPC URL: {}", e)))?;
        let provider = ProviderBuilder::new().connect_http(rpc_url).erased();

        Ok(Self {
            registry: IKeeperRegistry::new(parse_address(registry_address)?, provider),
            receipt_timeout: Duration::from_secs(120),
        })
    }

    pub fn registry_address(&self) -> Address {
        *self.registry.address()
    }

    /// A mined transaction whose status is failure moved between simulation and
    /// mining; it counts as slippage, not as an unknown failure
    fn ensure_success(receipt: &TransactionReceipt) -> ChainResult<String> {
        let tx_hash = format!("{:?}", receipt.transaction_hash);
        if !receipt.status() {
            return Err(ChainError::new(
                ExecutorErrorKind::SlippageExceeded,
                format!("transaction {} reverted after simulation", tx_hash),
            ));
        }
        Ok(tx_hash)
    }
}

pub(crate) fn parse_address(raw: &str) -> Result<Address> {
    raw.trim()
        .parse()
        .map_err(|e| KeeperError::Validation(format!("Invalid address '{}': {}", raw, e)))
}

/// Sent transactions whose receipt cannot be confirmed have an unknown outcome
fn receipt_error(context: &str, err: impl std::fmt::Display) -> ChainError {
    let err = chain_error(context, err);
    match err.kind {
        ExecutorErrorKind::ReceiptNotFound | ExecutorErrorKind::Timeout => err,
        _ => ChainError::new(ExecutorErrorKind::Timeout, err.message),
    }
}

fn to_u128(value: U256) -> Option<u128> {
    u128::try_from(value).ok()
}

#[async_trait]
impl KeeperClient for ContractKeeperClient {
    async fn execute_limit_order(
        &self,
        job_id: u64,
        owner: &str,
        params: &LimitOrderParams,
    ) -> ChainResult<ExecutionReceipt> {
        let call = self.registry.executeLimitOrder(U256::from(job_id));

        let expected = call
            .call()
            .await
            .map_err(|e| chain_error("executeLimitOrder simulation", e))?;
        debug!(
            job_id,
            owner,
            expected_out = %expected,
            min_amount_out = params.min_amount_out,
            "Limit order simulation passed"
        );

        let pending = call
            .send()
            .await
            .map_err(|e| chain_error("executeLimitOrder send", e))?;
        let receipt = pending
            .with_timeout(Some(self.receipt_timeout))
            .get_receipt()
            .await
            .map_err(|e| receipt_error("executeLimitOrder receipt", e))?;
        let tx_hash = Self::ensure_success(&receipt)?;

        let amount_out = receipt
            .decoded_log::<IKeeperRegistry::LimitOrderExecuted>()
            .and_then(|log| to_u128(log.data.amountOut));
        if amount_out.is_none() {
            warn!(job_id, tx_hash = %tx_hash, "LimitOrderExecuted event not found in receipt");
        }

        Ok(ExecutionReceipt {
            tx_hash,
            amount_out,
        })
    }

    async fn execute_dca_tick(
        &self,
        job_id: u64,
        owner: &str,
        params: &DcaParams,
    ) -> ChainResult<DcaExecutionReceipt> {
        let call = self.registry.executeDCATick(U256::from(job_id));

        call.call()
            .await
            .map_err(|e| chain_error("executeDCATick simulation", e))?;
        debug!(
            job_id,
            owner,
            swap = params.swaps_completed + 1,
            "DCA tick simulation passed"
        );

        let pending = call
            .send()
            .await
            .map_err(|e| chain_error("executeDCATick send", e))?;
        let receipt = pending
            .with_timeout(Some(self.receipt_timeout))
            .get_receipt()
            .await
            .map_err(|e| receipt_error("executeDCATick receipt", e))?;
        let tx_hash = Self::ensure_success(&receipt)?;

        // The registry's schedule is the only source for the next execution
        let event = receipt
            .decoded_log::<IKeeperRegistry::DCATickExecuted>()
            .ok_or_else(|| {
                ChainError::unexpected(format!(
                    "DCATickExecuted event missing from receipt {}",
                    tx_hash
                ))
            })?;

        Ok(DcaExecutionReceipt {
            tx_hash,
            amount_out: to_u128(event.data.amountOut),
            next_execution_sec: u64::try_from(event.data.nextExecution).unwrap_or(u64::MAX),
        })
    }

    async fn get_on_chain_status(&self, job_id: u64) -> ChainResult<OnChainStatus> {
        let code = self
            .registry
            .getJobStatus(U256::from(job_id))
            .call()
            .await
            .map_err(|e| chain_error("getJobStatus", e))?;

        OnChainStatus::from_code(code).ok_or_else(|| {
            ChainError::unexpected(format!("unknown on-chain status code {}", code))
        })
    }
}
