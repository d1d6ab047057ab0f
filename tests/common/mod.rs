#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keeper::adapters::InMemoryJobStore;
use keeper::chain::{ChainResult, DcaExecutionReceipt, ExecutionReceipt, KeeperClient, OnChainStatus};
use keeper::coordination::SafetyGuard;
use keeper::domain::{DcaParams, Direction, Job, JobStatus, LimitOrderParams, SafetyConfig};
use keeper::error::{ChainError, ExecutorErrorKind};
use keeper::execution::{Executor, PriceChecker, PriceSource};
use keeper::Result;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const ONE: u128 = 1_000_000_000_000_000_000;

/// Price source returning one settable quote for every pair
pub struct FixedPrice(Mutex<u128>);

impl FixedPrice {
    pub fn new(price: u128) -> Self {
        Self(Mutex::new(price))
    }

    pub fn set(&self, price: u128) {
        *self.0.lock().unwrap() = price;
    }
}

#[async_trait]
impl PriceSource for FixedPrice {
    async fn get_price(&self, _token_in: &str, _token_out: &str) -> Result<u128> {
        Ok(*self.0.lock().unwrap())
    }
}

/// Chain adapter that replays queued results, then succeeds
pub struct ScriptedClient {
    limit: Mutex<VecDeque<ChainResult<ExecutionReceipt>>>,
    dca: Mutex<VecDeque<ChainResult<DcaExecutionReceipt>>>,
    status: Mutex<ChainResult<OnChainStatus>>,
    interval_sec: u64,
    pub submissions: AtomicUsize,
    pub status_reads: AtomicUsize,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self {
            limit: Mutex::new(VecDeque::new()),
            dca: Mutex::new(VecDeque::new()),
            status: Mutex::new(Ok(OnChainStatus::Active)),
            interval_sec: 3600,
            submissions: AtomicUsize::new(0),
            status_reads: AtomicUsize::new(0),
        }
    }

    pub fn fail_limit(&self, kind: ExecutorErrorKind) {
        self.limit
            .lock()
            .unwrap()
            .push_back(Err(ChainError::new(kind, format!("execution reverted: {}", kind))));
    }

    pub fn push_dca(&self, receipt: DcaExecutionReceipt) {
        self.dca.lock().unwrap().push_back(Ok(receipt));
    }

    pub fn set_status(&self, status: ChainResult<OnChainStatus>) {
        *self.status.lock().unwrap() = status;
    }

    pub fn submissions(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeeperClient for ScriptedClient {
    async fn execute_limit_order(
        &self,
        job_id: u64,
        _owner: &str,
        params: &LimitOrderParams,
    ) -> ChainResult<ExecutionReceipt> {
        self.submissions.fetch_add(1, Ordering::SeqCst);
        self.limit.lock().unwrap().pop_front().unwrap_or_else(|| {
            Ok(ExecutionReceipt {
                tx_hash: format!("0xlimit{}", job_id),
                amount_out: Some(params.min_amount_out),
            })
        })
    }

    async fn execute_dca_tick(
        &self,
        job_id: u64,
        _owner: &str,
        params: &DcaParams,
    ) -> ChainResult<DcaExecutionReceipt> {
        self.submissions.fetch_add(1, Ordering::SeqCst);
        self.dca.lock().unwrap().pop_front().unwrap_or_else(|| {
            let next = params.next_execution / 1000 + self.interval_sec as i64;
            Ok(DcaExecutionReceipt {
                tx_hash: format!("0xdca{}-{}", job_id, params.swaps_completed + 1),
                amount_out: Some(params.amount_per_swap),
                next_execution_sec: next.max(0) as u64,
            })
        })
    }

    async fn get_on_chain_status(&self, _job_id: u64) -> ChainResult<OnChainStatus> {
        self.status_reads.fetch_add(1, Ordering::SeqCst);
        self.status.lock().unwrap().clone()
    }
}

pub struct Keeper {
    pub store: Arc<InMemoryJobStore>,
    pub client: Arc<ScriptedClient>,
    pub prices: Arc<FixedPrice>,
    pub executor: Executor,
}

pub fn harness() -> Keeper {
    harness_with(SafetyConfig::default())
}

pub fn harness_with(safety: SafetyConfig) -> Keeper {
    let store = Arc::new(InMemoryJobStore::new());
    let client = Arc::new(ScriptedClient::new());
    let prices = Arc::new(FixedPrice::new(ONE));
    let executor = Executor::new(
        store.clone(),
        client.clone(),
        Arc::new(PriceChecker::new(prices.clone())),
        Arc::new(SafetyGuard::new(safety)),
    )
    .with_dry_run(false);
    Keeper {
        store,
        client,
        prices,
        executor,
    }
}

pub fn limit_order(id: &str, target_price: u128, direction: Direction) -> Job {
    Job::limit_order(
        "0x00000000000000000000000000000000000000aa",
        LimitOrderParams {
            token_in: "0x00000000000000000000000000000000000000b1".to_string(),
            token_out: "0x00000000000000000000000000000000000000b2".to_string(),
            amount_in: ONE,
            min_amount_out: ONE / 2,
            target_price,
            direction,
            slippage_bps: Some(50),
        },
    )
    .with_id(id)
    .with_on_chain_id(7)
    .with_status(JobStatus::Active)
}

pub fn dca(id: &str, total_swaps: u32, next_execution: DateTime<Utc>) -> Job {
    Job::dca(
        "0x00000000000000000000000000000000000000aa",
        DcaParams {
            token_in: "0x00000000000000000000000000000000000000b1".to_string(),
            token_out: "0x00000000000000000000000000000000000000b2".to_string(),
            amount_per_swap: ONE,
            interval_seconds: 3600,
            total_swaps,
            swaps_completed: 0,
            next_execution: next_execution.timestamp_millis(),
        },
    )
    .with_id(id)
    .with_on_chain_id(9)
    .with_status(JobStatus::Active)
}
