//! Latency-aware geographic strategy
//!
//! Extends region-based consistent hashing with a region-to-region latency
//! table used for read placement. Serving a read from a closer shard trades
//! hash-placement consistency for latency: the same key may be read from a
//! different physical shard depending on client origin, while writes keep
//! routing to the canonical hash-selected shard. That staleness window is a
//! documented eventual-consistency concession, not a correctness violation.

use super::region::RegionStrategy;
use super::{ReshardThresholds, ShardStrategy};
use crate::error::Result;
use crate::types::{Region, ShardInfo, ShardKey, ShardOperation, ShardingMetrics};
use std::collections::HashMap;

/// Symmetric region-pair latency table. Lookup tries both orderings of a
/// pair; a pair with no data is treated as unreachable (infinite latency).
#[derive(Debug, Clone, Default)]
pub struct LatencyTable {
    entries: HashMap<(Region, Region), f64>,
}

impl LatencyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with representative inter-region round-trip times (ms).
    /// Production deployments overwrite these from measurement.
    pub fn with_defaults() -> Self {
        let mut table = Self::new();
        table.set(Region::NaEast, Region::NaWest, 50.0);
        table.set(Region::NaEast, Region::EuWest, 100.0);
        table.set(Region::NaEast, Region::EuCentral, 110.0);
        table.set(Region::NaWest, Region::AsiaEast, 120.0);
        table.set(Region::NaWest, Region::Oceania, 140.0);
        table.set(Region::EuWest, Region::EuCentral, 25.0);
        table.set(Region::EuWest, Region::AsiaSouth, 130.0);
        table.set(Region::EuCentral, Region::AsiaSouth, 120.0);
        table.set(Region::AsiaEast, Region::AsiaSouth, 70.0);
        table.set(Region::AsiaEast, Region::Oceania, 110.0);
        table
    }

    pub fn set(&mut self, a: Region, b: Region, latency_ms: f64) {
        self.entries.insert((a, b), latency_ms);
    }

    /// Latency between two regions; same-region pairs are zero
    pub fn get(&self, a: Region, b: Region) -> Option<f64> {
        if a == b {
            return Some(0.0);
        }
        self.entries
            .get(&(a, b))
            .or_else(|| self.entries.get(&(b, a)))
            .copied()
    }
}

pub struct GeographicStrategy {
    inner: RegionStrategy,
    latencies: LatencyTable,
}

impl GeographicStrategy {
    pub fn new(
        shards: Vec<ShardInfo>,
        ring_size: usize,
        thresholds: ReshardThresholds,
        latencies: LatencyTable,
    ) -> Self {
        Self {
            inner: RegionStrategy::new(shards, ring_size, thresholds),
            latencies,
        }
    }

    pub fn latency_table(&self) -> &LatencyTable {
        &self.latencies
    }
}

impl ShardStrategy for GeographicStrategy {
    fn get_shard(&self, key: &ShardKey) -> Result<ShardInfo> {
        self.inner.get_shard(key)
    }

    fn shards_for_operation(&self, op: &ShardOperation) -> Result<Vec<ShardInfo>> {
        self.inner.shards_for_operation(op)
    }

    fn should_reshard(&self, metrics: &ShardingMetrics) -> bool {
        self.inner.should_reshard(metrics)
    }

    fn optimal_shard(&self, key: &ShardKey, client_region: Region) -> Result<ShardInfo> {
        let primary = self.inner.get_shard(key)?;
        if primary.region == client_region {
            return Ok(primary);
        }

        // Scan for the lowest-latency shard in shard-id order, so latency
        // ties resolve to the same shard on every node. Unknown pairs keep
        // the canonical hash-selected shard.
        let mut candidates: Vec<&ShardInfo> = self.inner.all_shards().collect();
        candidates.sort_by(|a, b| a.shard_id.cmp(&b.shard_id));

        let mut min_latency = f64::INFINITY;
        let mut optimal = primary.clone();
        for shard in candidates {
            if let Some(latency) = self.latencies.get(client_region, shard.region) {
                if latency < min_latency {
                    min_latency = latency;
                    optimal = shard.clone();
                }
            }
        }
        Ok(optimal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shard(region: Region, index: usize) -> ShardInfo {
        ShardInfo::new(region, index, ":memory:")
    }

    fn strategy() -> GeographicStrategy {
        GeographicStrategy::new(
            vec![
                shard(Region::NaEast, 0),
                shard(Region::NaWest, 0),
                shard(Region::EuWest, 0),
            ],
            128,
            ReshardThresholds::default(),
            LatencyTable::with_defaults(),
        )
    }

    #[test]
    fn test_latency_lookup_is_symmetric() {
        let table = LatencyTable::with_defaults();
        assert_eq!(table.get(Region::NaEast, Region::EuWest), Some(100.0));
        assert_eq!(table.get(Region::EuWest, Region::NaEast), Some(100.0));
        assert_eq!(table.get(Region::Oceania, Region::EuCentral), None);
        assert_eq!(table.get(Region::Oceania, Region::Oceania), Some(0.0));
    }

    #[test]
    fn test_same_region_client_keeps_primary() {
        let strategy = strategy();
        let key = ShardKey::new(Region::NaEast, "job", "j-1");
        let primary = strategy.get_shard(&key).unwrap();
        let optimal = strategy.optimal_shard(&key, primary.region).unwrap();
        assert_eq!(optimal.shard_id, primary.shard_id);
    }

    #[test]
    fn test_remote_client_gets_local_shard_when_available() {
        let strategy = strategy();
        // Key placed in NA-EAST; client in EU-WEST has a zero-latency shard
        // in its own region.
        let key = ShardKey::new(Region::NaEast, "job", "j-1");
        let optimal = strategy.optimal_shard(&key, Region::EuWest).unwrap();
        assert_eq!(optimal.region, Region::EuWest);
    }

    #[test]
    fn test_latency_ties_resolve_to_lowest_shard_id() {
        // Two EU-WEST shards both sit at zero latency for an EU-WEST
        // client; the scan must always settle on the lower shard id.
        let strategy = GeographicStrategy::new(
            vec![
                shard(Region::NaEast, 0),
                shard(Region::EuWest, 0),
                shard(Region::EuWest, 1),
            ],
            128,
            ReshardThresholds::default(),
            LatencyTable::with_defaults(),
        );
        let key = ShardKey::new(Region::NaEast, "job", "j-1");
        for _ in 0..16 {
            let optimal = strategy.optimal_shard(&key, Region::EuWest).unwrap();
            assert_eq!(optimal.shard_id, "eu-west-0");
        }
    }

    #[test]
    fn test_no_latency_data_falls_back_to_primary() {
        // Single shard, client in a region with no table entries toward it.
        let strategy = GeographicStrategy::new(
            vec![shard(Region::AsiaSouth, 0)],
            128,
            ReshardThresholds::default(),
            LatencyTable::new(),
        );
        let key = ShardKey::new(Region::AsiaSouth, "job", "j-1");
        let optimal = strategy.optimal_shard(&key, Region::Oceania).unwrap();
        assert_eq!(optimal.shard_id, "asia-south-0");
    }

    #[test]
    fn test_writes_still_use_hash_placement() {
        let strategy = strategy();
        let key = ShardKey::new(Region::NaEast, "job", "j-1");
        // get_shard (the write path) must ignore client geography entirely.
        let canonical = strategy.get_shard(&key).unwrap();
        assert_eq!(canonical.region, Region::NaEast);
    }
}
