//! Typed configuration for the kernel.
//!
//! One `KernelConfig` is built once, by [`KernelConfig::from_env`] or
//! [`KernelConfig::load`], and passed by reference into every subsystem
//! at construction time — there is no ambient singleton to reach for.

mod errors;

pub use errors::ConfigError;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSetting {
    pub max_per_window: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// `budget.max_api_cost`, in whole USD; converted to micros internally.
    pub max_api_cost: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorSettings {
    pub timeout_seconds: u64,
    pub allowed_imports: Vec<String>,
    pub max_invocation_depth: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    pub window_seconds: u64,
    pub resources: HashMap<String, RateLimitSetting>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MintConfig {
    pub auction_period_seconds: u64,
    pub bidding_window_seconds: u64,
    pub first_auction_tick_seconds: u64,
    pub min_bid: u64,
    pub mint_ratio: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    pub max_backoff_seconds: u64,
    pub max_consecutive_crashes: u32,
    pub crash_window_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelConfig {
    pub budget: BudgetConfig,
    pub executor: ExecutorSettings,
    pub rate_limiting: RateLimitingConfig,
    pub mint: MintConfig,
    pub supervisor: SupervisorConfig,
    pub genesis_manifest_path: String,
    pub checkpoint_path: String,
    pub event_log_path: String,
}

impl KernelConfig {
    /// Loads from a YAML file, matching the genesis-loader's own format
    /// family so operators configure both the same way.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_string(), e.to_string()))?;
        let config: KernelConfig = serde_yaml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Builds a config from `std::env::var` lookups with defaults,
    /// using plain `.unwrap_or_else` fallbacks rather than a
    /// derive-macro env parser.
    pub fn from_env() -> Result<Self, ConfigError> {
        fn env_u64(key: &str, default: u64) -> u64 {
            std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
        }
        fn env_f64(key: &str, default: f64) -> f64 {
            std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
        }
        fn env_str(key: &str, default: &str) -> String {
            std::env::var(key).unwrap_or_else(|_| default.to_string())
        }

        let mut resources = HashMap::new();
        resources.insert("cpu_rate".to_string(), RateLimitSetting { max_per_window: env_u64("RATE_CPU_MAX_PER_WINDOW", 5) });
        resources.insert("llm_rate".to_string(), RateLimitSetting { max_per_window: env_u64("RATE_LLM_MAX_PER_WINDOW", 20) });

        let config = KernelConfig {
            budget: BudgetConfig { max_api_cost: env_f64("BUDGET_MAX_API_COST", 50.0) },
            executor: ExecutorSettings {
                timeout_seconds: env_u64("EXECUTOR_TIMEOUT_SECONDS", 5),
                allowed_imports: vec!["core".to_string(), "math".to_string()],
                max_invocation_depth: env_u64("EXECUTOR_MAX_INVOCATION_DEPTH", 5) as u32,
            },
            rate_limiting: RateLimitingConfig { window_seconds: env_u64("RATE_LIMITING_WINDOW_SECONDS", 1), resources },
            mint: MintConfig {
                auction_period_seconds: env_u64("MINT_AUCTION_PERIOD_SECONDS", 3600),
                bidding_window_seconds: env_u64("MINT_BIDDING_WINDOW_SECONDS", 300),
                first_auction_tick_seconds: env_u64("MINT_FIRST_AUCTION_TICK_SECONDS", 60),
                min_bid: env_u64("MINT_MIN_BID", 1),
                mint_ratio: env_u64("MINT_MINT_RATIO", 10),
            },
            supervisor: SupervisorConfig {
                max_backoff_seconds: env_u64("SUPERVISOR_MAX_BACKOFF_SECONDS", 60),
                max_consecutive_crashes: env_u64("SUPERVISOR_MAX_CONSECUTIVE_CRASHES", 5) as u32,
                crash_window_seconds: env_u64("SUPERVISOR_CRASH_WINDOW_SECONDS", 300),
            },
            genesis_manifest_path: env_str("GENESIS_MANIFEST_PATH", "genesis.yaml"),
            checkpoint_path: env_str("CHECKPOINT_PATH", "checkpoint.json"),
            event_log_path: env_str("EVENT_LOG_PATH", "events.jsonl"),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.mint.min_bid == 0 {
            return Err(ConfigError::Invalid("mint.min_bid must be at least 1".into()));
        }
        if self.mint.mint_ratio == 0 {
            return Err(ConfigError::Invalid("mint.mint_ratio must be at least 1".into()));
        }
        if self.executor.max_invocation_depth == 0 {
            return Err(ConfigError::Invalid("executor.max_invocation_depth must be at least 1".into()));
        }
        if self.budget.max_api_cost < 0.0 {
            return Err(ConfigError::Invalid("budget.max_api_cost must be non-negative".into()));
        }
        Ok(())
    }

    pub fn max_api_cost_micros(&self) -> i64 {
        (self.budget.max_api_cost * 1_000_000.0).round() as i64
    }

    pub fn executor_timeout(&self) -> Duration {
        Duration::from_secs(self.executor.timeout_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_env_falls_back_to_defaults_when_unset() {
        let config = KernelConfig::from_env().unwrap();
        assert_eq!(config.mint.min_bid, 1);
        assert_eq!(config.executor.max_invocation_depth, 5);
    }

    #[test]
    fn validate_rejects_zero_min_bid() {
        let mut config = KernelConfig::from_env().unwrap();
        config.mint.min_bid = 0;
        assert!(config.validate().is_err());
    }
}
