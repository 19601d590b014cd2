//! Configuration for the survivor engine.
//!
//! Provides YAML configuration loading, environment variable interpolation,
//! and fail-fast validation for every component.
//!
//! # Usage
//!
//! ```rust,ignore
//! use survivor_engine::config::{Config, load_config};
//!
//! // Load from default path (config.yaml)
//! let config = load_config(None)?;
//!
//! // Access configuration values
//! println!("series: {}", config.strategy.symbol_initials);
//! ```

mod strategy;

use std::path::PathBuf;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use strategy::{ExitTieBreak, StrategyConfig};

use crate::broker::RetryPolicy;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    ReadError {
        /// Path to the config file.
        path: String,
        /// The underlying IO error.
        source: std::io::Error,
    },

    /// Failed to parse YAML configuration.
    #[error("Failed to parse config YAML: {0}")]
    ParseError(#[from] serde_yaml_bw::Error),

    /// Configuration validation failed.
    #[error("Config validation failed: {0}")]
    ValidationError(String),
}

/// Run mode: live trading or historical replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Mode {
    /// Live session against a real broker feed.
    Live,
    /// Backtest over stored historical bars.
    Backtest {
        /// First day replayed (inclusive).
        start: NaiveDate,
        /// Last day replayed (inclusive).
        end: NaiveDate,
    },
}

impl Default for Mode {
    fn default() -> Self {
        Self::Live
    }
}

/// Dispatcher tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Ticks older than this relative to the newest tick seen for the same
    /// instrument are dropped as data-quality events.
    pub staleness_window_ms: u64,
    /// How many subsequent ticks an out-of-order tick may be held for
    /// reordering before the gap is accepted.
    pub reorder_window: usize,
    /// Per-instrument delivery buffer capacity; overflow drops the oldest
    /// buffered tick.
    pub buffer_capacity: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            staleness_window_ms: 5_000,
            reorder_window: 8,
            buffer_capacity: 64,
        }
    }
}

/// Execution/session tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// How many times a broker-rejected entry placement is retried before
    /// the leg is marked failed.
    pub entry_retry_limit: u32,
    /// Grace period for exit-order submission on operator shutdown.
    pub shutdown_grace_ms: u64,
    /// Whether reconciliation orphans are acknowledged; a session with
    /// unacknowledged orphans refuses to resume.
    pub acknowledge_orphans: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            entry_retry_limit: 2,
            shutdown_grace_ms: 5_000,
            acknowledge_orphans: false,
        }
    }
}

/// Durable store locations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Directory holding `orders.json` and `sessions.json`.
    pub data_dir: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("artifacts"),
        }
    }
}

/// Synthetic premium model used by backtests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestParams {
    /// Premium of an exactly at-the-money option at session start.
    pub base_premium: Decimal,
    /// Premium lost per point of out-of-the-money distance.
    pub distance_decay: Decimal,
    /// Premium lost per replayed bar (time decay).
    pub time_decay: Decimal,
    /// JSON file of underlying bars to replay.
    pub bars_file: Option<PathBuf>,
}

impl Default for BacktestParams {
    fn default() -> Self {
        Self {
            base_premium: dec!(120),
            distance_decay: dec!(0.4),
            time_decay: dec!(0.25),
            bars_file: None,
        }
    }
}

/// Root configuration structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Strategy parameters.
    #[serde(default)]
    pub strategy: StrategyConfig,
    /// Dispatcher tuning.
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    /// Broker retry policy.
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Execution/session tuning.
    #[serde(default)]
    pub execution: ExecutionConfig,
    /// Durable store locations.
    #[serde(default)]
    pub persistence: PersistenceConfig,
    /// Run mode.
    #[serde(default)]
    pub mode: Mode,
    /// Backtest premium model.
    #[serde(default)]
    pub backtest: BacktestParams,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            strategy: StrategyConfig::default(),
            dispatcher: DispatcherConfig::default(),
            retry: RetryPolicy::default(),
            execution: ExecutionConfig::default(),
            persistence: PersistenceConfig::default(),
            mode: Mode::default(),
            backtest: BacktestParams::default(),
        }
    }
}

// ============================================
// Configuration Loading
// ============================================

/// Load configuration from a YAML file with environment variable interpolation.
///
/// # Arguments
///
/// * `path` - Optional path to the config file. Defaults to "config.yaml".
///
/// # Errors
///
/// Returns a `ConfigError` if the file cannot be read, parsed, or validated.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or("config.yaml");

    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_string(),
        source: e,
    })?;

    let interpolated = interpolate_env_vars(&contents);
    let config: Config = serde_yaml_bw::from_str(&interpolated)?;
    validate_config(&config)?;

    Ok(config)
}

/// Validate a configuration, failing fast before any subscription or order
/// activity begins.
///
/// # Errors
///
/// Returns `ConfigError::ValidationError` describing the first invalid
/// parameter combination.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    config
        .strategy
        .validate()
        .map_err(ConfigError::ValidationError)?;

    if config.dispatcher.staleness_window_ms == 0 {
        return Err(ConfigError::ValidationError(
            "dispatcher.staleness_window_ms must be positive".to_string(),
        ));
    }
    if config.dispatcher.buffer_capacity == 0 {
        return Err(ConfigError::ValidationError(
            "dispatcher.buffer_capacity must be positive".to_string(),
        ));
    }
    if config.retry.max_attempts == 0 {
        return Err(ConfigError::ValidationError(
            "retry.max_attempts must be positive".to_string(),
        ));
    }
    if let Mode::Backtest { start, end } = config.mode
        && start > end
    {
        return Err(ConfigError::ValidationError(format!(
            "backtest start {start} is after end {end}"
        )));
    }

    Ok(())
}

/// Replace `${VAR}` references with environment variable values.
///
/// Unset variables are left untouched so the YAML parse error points at the
/// offending placeholder.
fn interpolate_env_vars(contents: &str) -> String {
    let mut out = String::with_capacity(contents.len());
    let mut rest = contents;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        if let Some(end) = after.find('}') {
            let name = &after[..end];
            match std::env::var(name) {
                Ok(value) => out.push_str(&value),
                Err(_) => {
                    out.push_str("${");
                    out.push_str(name);
                    out.push('}');
                }
            }
            rest = &after[end + 1..];
        } else {
            out.push_str("${");
            rest = after;
        }
    }
    out.push_str(rest);
    out
}

/// Render the effective configuration as YAML for `--show-config`.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn render_config(config: &Config) -> Result<String, ConfigError> {
    Ok(serde_yaml_bw::to_string(config)?)
}
