//! Keeper service: wires the executor from configuration and drives its ticks.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::adapters::{
    ContractKeeperClient, InMemoryJobStore, OraclePriceSource, PostgresJobStore, StaticPriceSource,
};
use crate::chain::{KeeperClient, TimedKeeperClient};
use crate::config::KeeperConfig;
use crate::coordination::SafetyGuard;
use crate::domain::{SafetyConfig, SafetyConfigPatch};
use crate::error::{KeeperError, Result};
use crate::execution::{
    Executor, FixedDecimals, JobStore, PriceChecker, PriceSource, RetryQueue, TickReport,
};

/// Long-running keeper process
pub struct KeeperService {
    executor: Arc<Executor>,
    tick_interval: Duration,
    config_dir: Option<PathBuf>,
}

impl KeeperService {
    pub fn new(executor: Arc<Executor>, tick_interval: Duration) -> Self {
        Self {
            executor,
            tick_interval,
            config_dir: None,
        }
    }

    /// Directory re-read on SIGHUP
    pub fn with_config_dir(mut self, config_dir: impl Into<PathBuf>) -> Self {
        self.config_dir = Some(config_dir.into());
        self
    }

    /// Build every collaborator from configuration
    pub async fn from_config(config: &KeeperConfig) -> Result<Self> {
        let store: Arc<dyn JobStore> = match &config.database.url {
            Some(url) => {
                let store = PostgresJobStore::new(url, config.database.max_connections).await?;
                store.migrate().await?;
                Arc::new(store)
            }
            None => {
                warn!("No database configured, using an empty in-memory job store");
                Arc::new(InMemoryJobStore::new())
            }
        };

        let contract: Arc<dyn KeeperClient> = match config
            .chain
            .private_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
        {
            Some(key) => Arc::new(ContractKeeperClient::new(
                &config.chain.rpc_url,
                &config.chain.registry_address,
                key,
                Duration::from_millis(config.chain.receipt_timeout_ms),
            )?),
            None => {
                info!("No signing key configured, chain client is read-only");
                Arc::new(ContractKeeperClient::read_only(
                    &config.chain.rpc_url,
                    &config.chain.registry_address,
                )?)
            }
        };
        let client = Arc::new(TimedKeeperClient::new(
            contract,
            Duration::from_millis(config.chain.call_timeout_ms),
            Duration::from_millis(
                config
                    .chain
                    .receipt_timeout_ms
                    .saturating_add(config.chain.call_timeout_ms),
            ),
        ));

        let source: Arc<dyn PriceSource> = match &config.chain.oracle_address {
            Some(oracle) => Arc::new(OraclePriceSource::new(&config.chain.rpc_url, oracle)?),
            None => {
                let source = config
                    .quotes
                    .iter()
                    .fold(StaticPriceSource::new(), |source, quote| {
                        source.with_price(&quote.token_in, &quote.token_out, quote.price)
                    });
                info!("Using {} static price quotes", source.len().await);
                Arc::new(source)
            }
        };

        let price_checker = PriceChecker::new(source)
            .with_decimals(Arc::new(
                FixedDecimals::default().with_overrides(config.decimals.clone()),
            ))
            .with_dca_buffer_ms(config.executor.dca_buffer_ms);
        price_checker.set_usd_prices(&config.prices).await;

        let executor = Executor::new(
            store,
            client,
            Arc::new(price_checker),
            Arc::new(SafetyGuard::new(config.safety.clone())),
        )
        .with_retry_queue(Arc::new(RetryQueue::new(config.executor.retry.clone())))
        .with_dry_run(config.executor.dry_run);

        Ok(Self::new(
            Arc::new(executor),
            Duration::from_millis(config.executor.tick_interval_ms),
        ))
    }

    pub fn executor(&self) -> &Arc<Executor> {
        &self.executor
    }

    /// One tick
    pub async fn run_once(&self) -> Result<TickReport> {
        self.executor.run_all_ticks().await
    }

    /// Tick until `shutdown` flips. A tick in progress always completes.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            tick_interval_ms = self.tick_interval.as_millis() as u64,
            dry_run = self.executor.is_dry_run(),
            "Keeper started"
        );

        let mut tick = tokio::time::interval(self.tick_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut hangup = install_hangup();

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if let Err(e) = self.executor.run_all_ticks().await {
                        error!("Tick failed: {}", e);
                    }
                }
                _ = wait_hangup(&mut hangup) => {
                    match self.reload_safety().await {
                        Ok(config) => info!(?config, "Safety configuration reloaded"),
                        Err(e) => error!("Safety reload failed, keeping current bounds: {}", e),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        let queue = self.executor.retry_queue().stats().await;
        let violations = self.executor.safety().violation_count().await;
        info!(violations, "Keeper stopped ({})", queue);
        Ok(())
    }

    /// Re-read configuration and apply its `safety` section and USD prices
    pub async fn reload_safety(&self) -> Result<SafetyConfig> {
        let config = match &self.config_dir {
            Some(dir) => KeeperConfig::load_from(dir)?,
            None => KeeperConfig::load()?,
        };
        if let Err(errors) = config.validate() {
            return Err(KeeperError::Validation(errors.join("; ")));
        }

        self.executor.price_checker().set_usd_prices(&config.prices).await;
        let patch = SafetyConfigPatch::from(config.safety);
        Ok(self.executor.safety().update_config(&patch).await)
    }
}

#[cfg(unix)]
type Hangup = Option<signal::unix::Signal>;

#[cfg(not(unix))]
type Hangup = Option<()>;

fn install_hangup() -> Hangup {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::hangup()) {
            Ok(stream) => Some(stream),
            Err(e) => {
                warn!("Failed to install SIGHUP handler, hot reload disabled: {}", e);
                None
            }
        }
    }
    #[cfg(not(unix))]
    {
        None
    }
}

async fn wait_hangup(hangup: &mut Hangup) {
    #[cfg(unix)]
    {
        if let Some(stream) = hangup.as_mut() {
            if stream.recv().await.is_some() {
                debug!("SIGHUP received");
                return;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = hangup;
    }
    std::future::pending::<()>().await
}

/// Resolves on Ctrl+C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::mock::MockKeeperClient;
    use crate::domain::{Direction, Job, JobStatus, LimitOrderParams};
    use crate::execution::price_checker::mock::MockPriceSource;
    use rust_decimal_macros::dec;

    const ONE: u128 = 1_000_000_000_000_000_000;

    fn service(store: Arc<InMemoryJobStore>) -> KeeperService {
        let executor = Executor::new(
            store,
            Arc::new(MockKeeperClient::new()),
            Arc::new(PriceChecker::new(Arc::new(MockPriceSource::new(ONE)))),
            Arc::new(SafetyGuard::with_defaults()),
        )
        .with_dry_run(false);
        KeeperService::new(Arc::new(executor), Duration::from_millis(10))
    }

    fn limit_job(id: &str) -> Job {
        Job::limit_order(
            "0xowner",
            LimitOrderParams {
                token_in: "0xin".to_string(),
                token_out: "0xout".to_string(),
                amount_in: ONE,
                min_amount_out: 1,
                target_price: ONE,
                direction: Direction::Gte,
                slippage_bps: None,
            },
        )
        .with_id(id)
        .with_on_chain_id(5)
    }

    #[tokio::test]
    async fn test_run_once_executes_due_jobs() {
        let store = Arc::new(InMemoryJobStore::new());
        store.insert(limit_job("j1")).await;

        let report = service(store.clone()).run_once().await.unwrap();
        assert_eq!(report.executed, 1);
        assert_eq!(store.get("j1").await.unwrap().status, JobStatus::Executed);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let store = Arc::new(InMemoryJobStore::new());
        store.insert(limit_job("j1")).await;
        let service = Arc::new(service(store.clone()));
        let (tx, rx) = watch::channel(false);

        let runner = {
            let service = service.clone();
            tokio::spawn(async move { service.run(rx).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(2), runner)
            .await
            .expect("service did not stop")
            .unwrap();
        assert!(result.is_ok());
        assert_eq!(store.get("j1").await.unwrap().status, JobStatus::Executed);
    }

    #[tokio::test]
    async fn test_reload_applies_safety_section() {
        let dir = std::env::temp_dir().join(format!("keeper-reload-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("default.toml"),
            r#"
[safety]
max_swap_usd = "50"
global_pause = true

[chain]
rpc_url = "http://127.0.0.1:8545"
registry_address = "0x0000000000000000000000000000000000000001"

[prices]
"0xin" = "2"
"#,
        )
        .unwrap();

        let service = service(Arc::new(InMemoryJobStore::new())).with_config_dir(&dir);
        let applied = service.reload_safety().await.unwrap();

        assert_eq!(applied.max_swap_usd, dec!(50));
        assert!(service.executor().safety().is_paused().await);
        assert_eq!(
            service.executor().price_checker().usd_price("0xIN").await,
            Some(dec!(2))
        );
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_invalid_reload_keeps_bounds() {
        let dir = std::env::temp_dir().join(format!("keeper-reload-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("default.toml"),
            r#"
[safety]
max_swap_usd = "-1"

[chain]
rpc_url = "http://127.0.0.1:8545"
registry_address = "0x0000000000000000000000000000000000000001"
"#,
        )
        .unwrap();

        let service = service(Arc::new(InMemoryJobStore::new())).with_config_dir(&dir);
        assert!(service.reload_safety().await.is_err());
        assert_eq!(
            service.executor().safety().config().await.max_swap_usd,
            dec!(1000)
        );
        std::fs::remove_dir_all(&dir).ok();
    }
}
