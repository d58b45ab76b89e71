//! Sharding configuration
//!
//! Static policy read at manager construction. Topology changes go through
//! explicit `add_shard`/`remove_shard` calls, never config hot-reload.

use crate::error::{Result, ShardError};
use crate::types::Region;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Static sharding policy
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ShardConfig {
    /// Enable shard routing
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Region used when a caller supplies no placement hint
    #[serde(default = "default_region")]
    pub default_region: Region,

    /// Regions shards are provisioned in
    #[serde(default = "default_regions")]
    pub regions: Vec<Region>,

    /// Shards created per region at startup
    #[serde(default = "default_shards_per_region")]
    pub shards_per_region: usize,

    /// Lower bound on total shard count
    #[serde(default = "default_min_shards")]
    pub min_shards: usize,

    /// Upper bound on total shard count
    #[serde(default = "default_max_shards")]
    pub max_shards: usize,

    /// Data size per shard that triggers a reshard signal
    #[serde(default = "default_size_threshold_gb")]
    pub shard_size_threshold_gb: f64,

    /// Query rate that triggers a reshard signal
    #[serde(default = "default_max_qps")]
    pub max_qps: f64,

    #[serde(default = "default_replication_factor")]
    pub replication_factor: usize,

    #[serde(default = "default_auto_scaling")]
    pub auto_scaling: bool,

    /// Allow fan-out of a single operation across regions
    #[serde(default = "default_cross_region_queries")]
    pub cross_region_queries: bool,

    /// Virtual points per shard on the hash ring
    #[serde(default = "default_ring_size")]
    pub ring_size: usize,

    /// Directory for shard database files; in-memory shards when absent
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    #[serde(default)]
    pub health: HealthConfig,
}

fn default_enabled() -> bool {
    true
}

fn default_region() -> Region {
    Region::NaEast
}

fn default_regions() -> Vec<Region> {
    vec![Region::NaEast]
}

fn default_shards_per_region() -> usize {
    2
}

fn default_min_shards() -> usize {
    2
}

fn default_max_shards() -> usize {
    16
}

fn default_size_threshold_gb() -> f64 {
    100.0
}

fn default_max_qps() -> f64 {
    1000.0
}

fn default_replication_factor() -> usize {
    2
}

fn default_auto_scaling() -> bool {
    true
}

fn default_cross_region_queries() -> bool {
    true
}

fn default_ring_size() -> usize {
    1024
}

impl Default for ShardConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            default_region: default_region(),
            regions: default_regions(),
            shards_per_region: default_shards_per_region(),
            min_shards: default_min_shards(),
            max_shards: default_max_shards(),
            shard_size_threshold_gb: default_size_threshold_gb(),
            max_qps: default_max_qps(),
            replication_factor: default_replication_factor(),
            auto_scaling: default_auto_scaling(),
            cross_region_queries: default_cross_region_queries(),
            ring_size: default_ring_size(),
            data_dir: None,
            health: HealthConfig::default(),
        }
    }
}

impl ShardConfig {
    /// Validate the policy before the manager provisions anything
    pub fn validate(&self) -> Result<()> {
        if self.regions.is_empty() {
            return Err(ShardError::Config("at least one region is required".into()));
        }
        if self.shards_per_region == 0 {
            return Err(ShardError::Config("shards_per_region must be >= 1".into()));
        }
        if self.ring_size == 0 {
            return Err(ShardError::Config("ring_size must be >= 1".into()));
        }
        let initial = self.regions.len() * self.shards_per_region;
        if initial < self.min_shards {
            return Err(ShardError::Config(format!(
                "initial shard count {initial} below min_shards {}",
                self.min_shards
            )));
        }
        if initial > self.max_shards {
            return Err(ShardError::Config(format!(
                "initial shard count {initial} exceeds max_shards {}",
                self.max_shards
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for region in &self.regions {
            if !seen.insert(region) {
                return Err(ShardError::Config(format!("duplicate region: {region}")));
            }
        }
        Ok(())
    }

    /// Parse a TOML document into a validated config
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: ShardConfig = toml::from_str(raw)
            .map_err(|e| ShardError::Config(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            ShardError::Config(format!("cannot read {}: {e}", path.as_ref().display()))
        })?;
        Self::from_toml_str(&raw)
    }

    /// Database file path (or `:memory:`) for a shard
    pub fn connection_string(&self, shard_id: &str) -> String {
        match &self.data_dir {
            Some(dir) => dir.join(format!("{shard_id}.db")).display().to_string(),
            None => ":memory:".to_string(),
        }
    }
}

/// Action taken when the health loop observes a shard failure. Advisory in
/// all cases: routing is never changed by the health loop itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailureAction {
    #[default]
    AlertOnly,
    Rebalance,
    Manual,
}

/// Health check loop configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HealthConfig {
    /// Seconds between liveness sweeps
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,

    #[serde(default)]
    pub on_failure: FailureAction,
}

fn default_check_interval() -> u64 {
    60
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval(),
            on_failure: FailureAction::default(),
        }
    }
}

impl HealthConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }
}
