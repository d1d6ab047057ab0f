use anyhow::{Context, Result};
use clap::Parser;
use keeper::cli::{Cli, Commands};
use keeper::config::KeeperConfig;
use keeper::error::KeeperError;
use keeper::services::{shutdown_signal, KeeperService};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let command = cli.command();

    let config = match KeeperConfig::load_from(&cli.config_dir) {
        Ok(config) => config,
        Err(e) => {
            init_logging("info", false);
            error!("Failed to load configuration from {}: {}", cli.config_dir, e);
            return Err(e).with_context(|| format!("loading configuration from {}", cli.config_dir));
        }
    };
    init_logging(&config.logging.level, config.logging.json);

    let result = match command {
        Commands::CheckConfig => check_config(&config),
        Commands::Once { live } => run_once(config, live).await,
        Commands::Run { live } => run_keeper(config, live, &cli.config_dir).await,
    };

    if let Err(e) = &result {
        error!("Keeper exited with error: {}", e);
    }
    result
}

fn check_config(config: &KeeperConfig) -> Result<()> {
    validate(config)?;
    println!(
        "Configuration OK (dry_run={}, tick_interval_ms={}, max_swap_usd={})",
        config.executor.dry_run, config.executor.tick_interval_ms, config.safety.max_swap_usd
    );
    Ok(())
}

fn validate(config: &KeeperConfig) -> Result<()> {
    if let Err(errors) = config.validate() {
        for e in &errors {
            error!("Config error: {}", e);
        }
        return Err(KeeperError::Validation(errors.join("; ")).into());
    }
    Ok(())
}

fn apply_live_flag(config: &mut KeeperConfig, live: bool) {
    if live {
        config.executor.dry_run = false;
    }
    if config.executor.dry_run {
        info!("Dry run: jobs are evaluated but no transaction is submitted");
    } else {
        warn!("LIVE MODE: the keeper will submit transactions");
    }
}

async fn run_once(mut config: KeeperConfig, live: bool) -> Result<()> {
    apply_live_flag(&mut config, live);
    validate(&config)?;

    let service = KeeperService::from_config(&config)
        .await
        .context("building keeper service")?;
    let report = service.run_once().await.context("running tick")?;
    println!("{}", report);
    Ok(())
}

async fn run_keeper(mut config: KeeperConfig, live: bool, config_dir: &str) -> Result<()> {
    apply_live_flag(&mut config, live);
    validate(&config)?;

    let service = KeeperService::from_config(&config)
        .await
        .context("building keeper service")?
        .with_config_dir(config_dir);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received, finishing current tick");
        let _ = shutdown_tx.send(true);
    });

    service.run(shutdown_rx).await?;
    Ok(())
}

fn init_logging(level: &str, json: bool) {
    let default_directives = match level {
        "info" => "info,keeper=debug,sqlx=warn".to_string(),
        other => format!("{},sqlx=warn", other),
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}
