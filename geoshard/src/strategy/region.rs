//! Region-scoped consistent-hash strategy
//!
//! One hash ring per region, built over that region's shards. Keys stay
//! inside their region's shard set, so adding a shard to one region never
//! perturbs placement anywhere else, and within the region only the keys
//! whose nearest ring point changed are reassigned.

use super::ring::{hash_position, HashRing};
use super::{ReshardThresholds, ShardStrategy};
use crate::error::{Result, ShardError};
use crate::types::{Region, ShardInfo, ShardKey, ShardOperation, ShardingMetrics};
use std::collections::HashMap;

pub struct RegionStrategy {
    shards: HashMap<String, ShardInfo>,
    rings: HashMap<Region, HashRing>,
    thresholds: ReshardThresholds,
}

impl RegionStrategy {
    pub fn new(shards: Vec<ShardInfo>, ring_size: usize, thresholds: ReshardThresholds) -> Self {
        let mut by_region: HashMap<Region, Vec<String>> = HashMap::new();
        for shard in &shards {
            by_region
                .entry(shard.region)
                .or_default()
                .push(shard.shard_id.clone());
        }

        let rings = by_region
            .into_iter()
            .map(|(region, ids)| (region, HashRing::build(ids, ring_size)))
            .collect();

        Self {
            shards: shards
                .into_iter()
                .map(|s| (s.shard_id.clone(), s))
                .collect(),
            rings,
            thresholds,
        }
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// All shards in a region, in shard-id order
    pub fn region_shards(&self, region: Region) -> Vec<ShardInfo> {
        let mut shards: Vec<ShardInfo> = self
            .shards
            .values()
            .filter(|s| s.region == region)
            .cloned()
            .collect();
        shards.sort_by(|a, b| a.shard_id.cmp(&b.shard_id));
        shards
    }

    pub(super) fn all_shards(&self) -> impl Iterator<Item = &ShardInfo> {
        self.shards.values()
    }

    fn resolve(&self, region: Region, routing_key: &str) -> Result<ShardInfo> {
        let ring = self
            .rings
            .get(&region)
            .ok_or_else(|| ShardError::Routing(format!("no ring for region {region}")))?;
        let shard_id = ring
            .locate(hash_position(routing_key))
            .ok_or_else(|| ShardError::Routing(format!("empty ring for region {region}")))?;
        self.shards
            .get(shard_id)
            .cloned()
            .ok_or_else(|| ShardError::Routing(format!("ring references unknown shard {shard_id}")))
    }
}

impl ShardStrategy for RegionStrategy {
    fn get_shard(&self, key: &ShardKey) -> Result<ShardInfo> {
        self.resolve(key.region, &key.to_routing_key())
    }

    fn shards_for_operation(&self, op: &ShardOperation) -> Result<Vec<ShardInfo>> {
        if !op.cross_shard {
            return Ok(vec![self.get_shard(&op.shard_key)?]);
        }
        let shards = self.region_shards(op.shard_key.region);
        if shards.is_empty() {
            return Err(ShardError::Routing(format!(
                "no shards in region {}",
                op.shard_key.region
            )));
        }
        Ok(shards)
    }

    fn should_reshard(&self, metrics: &ShardingMetrics) -> bool {
        if metrics.data_size_gb > self.thresholds.shard_size_threshold_gb {
            return true;
        }
        if metrics.queries_per_second > self.thresholds.max_qps {
            return true;
        }
        if metrics.connection_utilization >= self.thresholds.connection_utilization {
            return true;
        }
        false
    }
}
