//! Shard routing strategies
//!
//! A strategy is pure routing logic over an immutable view of the shard
//! set: it maps keys to shards, lists the shards an operation touches, and
//! decides when resharding is warranted. The manager replaces the strategy
//! object wholesale on every topology change, so strategies never mutate.

mod geographic;
mod region;
mod ring;

pub use geographic::{GeographicStrategy, LatencyTable};
pub use region::RegionStrategy;
pub use ring::{hash_position, HashRing};

use crate::config::ShardConfig;
use crate::error::Result;
use crate::types::{Region, ShardInfo, ShardKey, ShardOperation, ShardingMetrics};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Routing contract shared by all strategies
pub trait ShardStrategy: Send + Sync {
    /// Resolve a key to exactly one shard. Total over any non-empty shard
    /// set for the key's region; an empty region is a routing error.
    fn get_shard(&self, key: &ShardKey) -> Result<ShardInfo>;

    /// List every shard an operation touches: the single hash-selected
    /// shard, or all shards in the key's region for cross-shard operations.
    fn shards_for_operation(&self, op: &ShardOperation) -> Result<Vec<ShardInfo>>;

    /// Signal that the topology should grow. Any single breached threshold
    /// triggers the signal.
    fn should_reshard(&self, metrics: &ShardingMetrics) -> bool;

    /// Latency-aware read placement. The default keeps canonical hash
    /// placement; the geographic strategy overrides it.
    fn optimal_shard(&self, key: &ShardKey, _client_region: Region) -> Result<ShardInfo> {
        self.get_shard(key)
    }
}

/// Which strategy implementation the manager builds on topology changes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    #[default]
    Region,
    Geographic,
}

/// Thresholds evaluated by `should_reshard`, taken from config at
/// strategy construction
#[derive(Debug, Clone, Copy)]
pub struct ReshardThresholds {
    pub shard_size_threshold_gb: f64,
    pub max_qps: f64,
    pub connection_utilization: f64,
}

impl Default for ReshardThresholds {
    fn default() -> Self {
        Self {
            shard_size_threshold_gb: 100.0,
            max_qps: 1000.0,
            connection_utilization: 0.8,
        }
    }
}

impl From<&ShardConfig> for ReshardThresholds {
    fn from(config: &ShardConfig) -> Self {
        Self {
            shard_size_threshold_gb: config.shard_size_threshold_gb,
            max_qps: config.max_qps,
            connection_utilization: 0.8,
        }
    }
}

/// Build the configured strategy over a snapshot of the shard set
pub fn build_strategy(
    kind: StrategyKind,
    shards: Vec<ShardInfo>,
    config: &ShardConfig,
) -> Arc<dyn ShardStrategy> {
    let thresholds = ReshardThresholds::from(config);
    match kind {
        StrategyKind::Region => Arc::new(RegionStrategy::new(shards, config.ring_size, thresholds)),
        StrategyKind::Geographic => Arc::new(GeographicStrategy::new(
            shards,
            config.ring_size,
            thresholds,
            LatencyTable::with_defaults(),
        )),
    }
}
