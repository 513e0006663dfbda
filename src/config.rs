use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub risk: RiskDefaults,
    pub venues: VenueEndpoints,
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Platform fee rate applied to every filled leg (e.g. 0.01 = 1%)
    pub fee_rate: Decimal,
    /// Maximum retry attempts for transient submission failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u8,
    /// Base backoff between retries in milliseconds (doubles per attempt)
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Sleep between agent strategy cycles in milliseconds
    #[serde(default = "default_cycle_interval_ms")]
    pub cycle_interval_ms: u64,
    /// Interval between state snapshots in seconds
    #[serde(default = "default_checkpoint_interval_secs")]
    pub checkpoint_interval_secs: u64,
    /// Simulated connector latency bounds in milliseconds
    #[serde(default = "default_sim_latency_min_ms")]
    pub sim_latency_min_ms: u64,
    #[serde(default = "default_sim_latency_max_ms")]
    pub sim_latency_max_ms: u64,
    /// Starting balance credited to each new agent book (USD)
    #[serde(default = "default_starting_balance")]
    pub starting_balance: Decimal,
    /// Trades kept in a status report's recent list
    #[serde(default = "default_recent_trades")]
    pub recent_trades: usize,
}

fn default_max_retries() -> u8 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    250
}

fn default_cycle_interval_ms() -> u64 {
    5000
}

fn default_checkpoint_interval_secs() -> u64 {
    30
}

fn default_sim_latency_min_ms() -> u64 {
    100
}

fn default_sim_latency_max_ms() -> u64 {
    800
}

fn default_starting_balance() -> Decimal {
    Decimal::from(10_000)
}

fn default_recent_trades() -> usize {
    20
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fee_rate: Decimal::new(1, 2), // 1%
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            cycle_interval_ms: default_cycle_interval_ms(),
            checkpoint_interval_secs: default_checkpoint_interval_secs(),
            sim_latency_min_ms: default_sim_latency_min_ms(),
            sim_latency_max_ms: default_sim_latency_max_ms(),
            starting_balance: default_starting_balance(),
            recent_trades: default_recent_trades(),
        }
    }
}

/// Engine-wide risk bounds applied to every agent on top of its own limits
#[derive(Debug, Clone, Deserialize)]
pub struct RiskDefaults {
    /// Default maximum total open notional per agent (USD)
    pub max_total_exposure: Decimal,
    /// Default minimum market liquidity (USD)
    pub min_liquidity: Decimal,
}

impl Default for RiskDefaults {
    fn default() -> Self {
        Self {
            max_total_exposure: Decimal::from(5000),
            min_liquidity: Decimal::from(10_000),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct VenueEndpoints {
    /// REST endpoint for the blockchain-signed CLOB venue
    pub clob_rest_url: String,
    /// Chain id used to derive the CLOB signer
    #[serde(default = "default_chain_id")]
    pub clob_chain_id: u64,
    /// REST endpoint for the HMAC-session venue
    pub session_rest_url: String,
    /// Session token lifetime in seconds
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
}

fn default_chain_id() -> u64 {
    137
}

fn default_session_ttl_secs() -> u64 {
    1800
}

impl Default for VenueEndpoints {
    fn default() -> Self {
        Self {
            clob_rest_url: "https://clob.polymarket.com".to_string(),
            clob_chain_id: default_chain_id(),
            session_rest_url: "https://trading-api.kalshi.com/trade-api/v2".to_string(),
            session_ttl_secs: default_session_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the state snapshot
    pub data_dir: String,
    /// Snapshot file name inside the data dir
    #[serde(default = "default_snapshot_file")]
    pub snapshot_file: String,
}

fn default_snapshot_file() -> String {
    "engine_state.json".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "data".to_string(),
            snapshot_file: default_snapshot_file(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            risk: RiskDefaults::default(),
            venues: VenueEndpoints::default(),
            storage: StorageConfig::default(),
            logging: LoggingConfig {
                level: default_log_level(),
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .set_default("engine.fee_rate", "0.01")?
            .set_default("engine.max_retries", 3)?
            .set_default("risk.max_total_exposure", "5000")?
            .set_default("risk.min_liquidity", "10000")?
            .set_default("venues.clob_rest_url", "https://clob.polymarket.com")?
            .set_default(
                "venues.session_rest_url",
                "https://trading-api.kalshi.com/trade-api/v2",
            )?
            .set_default("storage.data_dir", "data")?
            .set_default("logging.level", "info")?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g. config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("PARLAY_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (PARLAY_ENGINE__FEE_RATE, etc.)
            .add_source(
                Environment::with_prefix("PARLAY")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.engine.fee_rate < Decimal::ZERO || self.engine.fee_rate >= Decimal::ONE {
            errors.push("engine.fee_rate must be in [0, 1)".to_string());
        }

        if self.engine.sim_latency_min_ms > self.engine.sim_latency_max_ms {
            errors.push("engine.sim_latency_min_ms must not exceed sim_latency_max_ms".to_string());
        }

        if self.engine.starting_balance <= Decimal::ZERO {
            errors.push("engine.starting_balance must be positive".to_string());
        }

        if self.risk.max_total_exposure <= Decimal::ZERO {
            errors.push("risk.max_total_exposure must be positive".to_string());
        }

        if self.risk.min_liquidity < Decimal::ZERO {
            errors.push("risk.min_liquidity must not be negative".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
