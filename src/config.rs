use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use std::path::Path;

use crate::domain::SafetyConfig;
use crate::execution::ExecutorConfig;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct KeeperConfig {
    #[serde(default)]
    pub safety: SafetyConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    pub chain: ChainConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Token address -> USD per whole token, seeds the USD estimate cache
    #[serde(default)]
    pub prices: HashMap<String, Decimal>,
    /// Token address -> decimals, for tokens that are not 18-decimal
    #[serde(default)]
    pub decimals: HashMap<String, u32>,
    /// Fixed pair quotes used when no oracle is configured
    #[serde(default)]
    pub quotes: Vec<QuoteConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    /// JSON-RPC endpoint
    pub rpc_url: String,
    /// Keeper registry contract
    pub registry_address: String,
    /// Price oracle contract; static quotes are used when absent
    #[serde(default)]
    pub oracle_address: Option<String>,
    /// Keeper signing key, required for live execution
    #[serde(default)]
    pub private_key: Option<String>,
    /// Bound on every simulate/read call
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
    /// Bound on a full submit including the receipt wait
    #[serde(default = "default_receipt_timeout_ms")]
    pub receipt_timeout_ms: u64,
}

fn default_call_timeout_ms() -> u64 {
    30_000
}

fn default_receipt_timeout_ms() -> u64 {
    120_000
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL; jobs are kept in memory when absent
    #[serde(default)]
    pub url: Option<String>,
    /// Maximum connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuoteConfig {
    pub token_in: String,
    pub token_out: String,
    /// 18-decimal fixed point, as a decimal string
    #[serde(deserialize_with = "deserialize_raw_amount")]
    pub price: u128,
}

fn deserialize_raw_amount<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u64),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s.trim().parse::<u128>().map_err(serde::de::Error::custom),
        Raw::Number(n) => Ok(u128::from(n)),
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl KeeperConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Start with default values
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("executor.dry_run", true)?
            .set_default("database.max_connections", 5)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("KEEPER_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (KEEPER__CHAIN__RPC_URL, etc.)
            .add_source(
                Environment::with_prefix("KEEPER")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Local development configuration: dry run against a local node
    pub fn default_config(rpc_url: &str, registry_address: &str) -> Self {
        Self {
            safety: SafetyConfig::default(),
            executor: ExecutorConfig::default(),
            chain: ChainConfig {
                rpc_url: rpc_url.to_string(),
                registry_address: registry_address.to_string(),
                oracle_address: None,
                private_key: None,
                call_timeout_ms: default_call_timeout_ms(),
                receipt_timeout_ms: default_receipt_timeout_ms(),
            },
            database: DatabaseConfig::default(),
            prices: HashMap::new(),
            decimals: HashMap::new(),
            quotes: Vec::new(),
            logging: LoggingConfig::default(),
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        // Safety bounds
        if self.safety.max_swap_usd <= Decimal::ZERO {
            errors.push("safety.max_swap_usd must be positive".to_string());
        }

        if self.safety.max_slippage_bps > 10_000 {
            errors.push("safety.max_slippage_bps cannot exceed 10000".to_string());
        }

        if self.safety.max_retries == 0 {
            errors.push("safety.max_retries must be at least 1".to_string());
        }

        // Executor
        if self.executor.tick_interval_ms == 0 {
            errors.push("executor.tick_interval_ms must be positive".to_string());
        }

        if self.executor.dca_buffer_ms < 0 {
            errors.push("executor.dca_buffer_ms cannot be negative".to_string());
        }

        if self.executor.retry.base_delay_ms == 0 {
            errors.push("executor.retry.base_delay_ms must be positive".to_string());
        }

        if self.executor.retry.max_delay_ms < self.executor.retry.base_delay_ms {
            errors.push("executor.retry.max_delay_ms must be >= base_delay_ms".to_string());
        }

        // Chain
        if self.chain.rpc_url.trim().is_empty() {
            errors.push("chain.rpc_url is required".to_string());
        }

        if self.chain.registry_address.trim().is_empty() {
            errors.push("chain.registry_address is required".to_string());
        }

        if self.chain.call_timeout_ms == 0 || self.chain.receipt_timeout_ms == 0 {
            errors.push("chain timeouts must be positive".to_string());
        }

        if !self.executor.dry_run {
            let has_key = self
                .chain
                .private_key
                .as_deref()
                .map(|k| !k.trim().is_empty())
                .unwrap_or(false);
            if !has_key {
                errors.push("chain.private_key is required for live execution".to_string());
            }
            if self.database.url.is_none() {
                errors.push("database.url is required for live execution".to_string());
            }
        }

        for (token, price) in &self.prices {
            if price.is_sign_negative() {
                errors.push(format!("prices.{} cannot be negative", token));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn local() -> KeeperConfig {
        KeeperConfig::default_config(
            "http://127.0.0.1:8545",
            "0x0000000000000000000000000000000000000001",
        )
    }

    #[test]
    fn test_default_config_is_valid_dry_run() {
        let config = local();
        assert!(config.executor.dry_run);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_live_mode_requires_key_and_database() {
        let mut config = local();
        config.executor.dry_run = false;

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().any(|e| e.contains("private_key")));
        assert!(errors.iter().any(|e| e.contains("database.url")));
    }

    #[test]
    fn test_validate_collects_every_error() {
        let mut config = local();
        config.safety.max_swap_usd = dec!(0);
        config.safety.max_slippage_bps = 20_000;
        config.executor.retry.base_delay_ms = 10;
        config.executor.retry.max_delay_ms = 5;

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn test_load_from_toml() {
        let dir = std::env::temp_dir().join(format!("keeper-config-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("default.toml"),
            r#"
[safety]
max_swap_usd = "250"
global_pause = true

[executor]
tick_interval_ms = 5000

[executor.retry]
base_delay_ms = 1000

[chain]
rpc_url = "http://127.0.0.1:8545"
registry_address = "0x0000000000000000000000000000000000000001"

[prices]
"0xabc" = "3000.5"

[[quotes]]
token_in = "0xabc"
token_out = "0xdef"
price = "2000000000000000000000"
"#,
        )
        .unwrap();

        let config = KeeperConfig::load_from(&dir).unwrap();
        assert_eq!(config.safety.max_swap_usd, dec!(250));
        assert!(config.safety.global_pause);
        assert_eq!(config.safety.max_retries, 3);
        assert!(config.executor.dry_run);
        assert_eq!(config.executor.tick_interval_ms, 5000);
        assert_eq!(config.executor.retry.base_delay_ms, 1000);
        assert_eq!(config.executor.retry.max_delay_ms, 300_000);
        assert_eq!(config.chain.call_timeout_ms, 30_000);
        assert_eq!(config.prices.get("0xabc"), Some(&dec!(3000.5)));
        assert_eq!(config.quotes[0].price, 2_000_000_000_000_000_000_000);

        std::fs::remove_dir_all(&dir).ok();
    }
}
