//! poolgrid.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolgridConfig {
    pub balancer: BalancerConfig,
    pub lock: LockConfig,
    pub server: ServerConfig,
    pub poi: PoiConfig,
}

/// Which placement policy the balancer runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalancerMode {
    /// Create pools on demand, migrate on join, merge and delete on leave.
    #[default]
    Dynamic,
    /// Fixed pool count with a persisted cursor and a growing capacity.
    RoundRobin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BalancerConfig {
    pub mode: BalancerMode,
    pub pool_prefix: String,
    pub capacity: u32,
    pub max_pools: u32,
    /// Pool count created at startup in round-robin mode.
    pub round_robin_pools: u32,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            mode: BalancerMode::Dynamic,
            pool_prefix: "AutoGroup".to_string(),
            capacity: 5,
            max_pools: 100,
            round_robin_pools: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    pub retries: u32,
    pub backoff_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            retries: 5,
            backoff_ms: 100,
        }
    }
}

impl LockConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub data_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8443,
            data_dir: PathBuf::from("/var/lib/poolgrid"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoiConfig {
    /// Base URL of the content source. `None` disables the POI cache.
    pub base_url: Option<String>,
    pub category: u32,
    pub refresh_secs: u64,
    pub startup_timeout_secs: u64,
}

impl Default for PoiConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            category: 3,
            refresh_secs: 300,
            startup_timeout_secs: 60,
        }
    }
}

impl PoiConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_secs)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }
}

/// Rejected configuration values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("balancer.capacity must be at least 1")]
    ZeroCapacity,

    #[error("balancer.max_pools must be at least 1")]
    ZeroMaxPools,

    #[error("balancer.round_robin_pools must be at least 1")]
    ZeroRoundRobinPools,

    #[error("balancer.pool_prefix must not be empty")]
    EmptyPrefix,

    #[error("lock.retries must be at least 1")]
    ZeroRetries,

    #[error("poi.refresh_secs must be at least 1 when poi.base_url is set")]
    ZeroRefresh,
}

impl PoolgridConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: PoolgridConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let b = &self.balancer;
        if b.capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if b.max_pools == 0 {
            return Err(ConfigError::ZeroMaxPools);
        }
        if b.mode == BalancerMode::RoundRobin && b.round_robin_pools == 0 {
            return Err(ConfigError::ZeroRoundRobinPools);
        }
        if b.pool_prefix.is_empty() {
            return Err(ConfigError::EmptyPrefix);
        }
        if self.lock.retries == 0 {
            return Err(ConfigError::ZeroRetries);
        }
        if self.poi.base_url.is_some() && self.poi.refresh_secs == 0 {
            return Err(ConfigError::ZeroRefresh);
        }
        Ok(())
    }
}
