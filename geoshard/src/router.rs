//! High-level routing operations
//!
//! The router is a thin layer over the manager for callers that think in
//! queries rather than shard topology: single-key execution, per-shard
//! transactional bulk batches, and cross-region fan-out.

use crate::error::{Result, ShardError};
use crate::manager::ShardManager;
use crate::metrics;
use crate::strategy::ShardStrategy;
use crate::types::{OperationType, Region, ShardInfo, ShardKey, ShardOperation};
use futures::future::join_all;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::warn;

pub struct ShardRouter {
    manager: Arc<ShardManager>,
}

impl ShardRouter {
    pub fn new(manager: Arc<ShardManager>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &Arc<ShardManager> {
        &self.manager
    }

    /// Route one operation by its key and execute it
    pub async fn execute(&self, op: &ShardOperation) -> Result<Vec<Value>> {
        self.manager.execute_operation(op).await
    }

    /// Convenience wrapper for a single statement against one key
    pub async fn execute_query(
        &self,
        key: ShardKey,
        operation_type: OperationType,
        query: impl Into<String>,
        params: HashMap<String, Value>,
    ) -> Result<Vec<Value>> {
        let op = ShardOperation::new(key, operation_type, query).with_parameters(params);
        self.manager.execute_operation(&op).await
    }

    /// Execute a batch of single-shard operations, grouped by target
    /// shard. Each shard's group commits atomically in one transaction;
    /// the batch as a whole is NOT atomic across shards, and a failing
    /// group leaves previously committed groups in place.
    pub async fn bulk_execute(&self, ops: &[ShardOperation]) -> Result<Vec<Value>> {
        let mut groups: BTreeMap<String, Vec<(String, HashMap<String, Value>)>> = BTreeMap::new();
        for op in ops {
            if op.cross_shard {
                return Err(ShardError::Routing(
                    "cross-shard operations cannot be batched".into(),
                ));
            }
            let shard = self.manager.get_shard(&op.shard_key)?;
            groups
                .entry(shard.shard_id)
                .or_default()
                .push((op.query.clone(), op.parameters.clone()));
        }

        // Deterministic shard order so partial failures are reproducible.
        let mut rows = Vec::new();
        for (shard_id, statements) in &groups {
            let mut group_rows = self
                .manager
                .execute_transactional_batch(shard_id, statements)
                .await?;
            rows.append(&mut group_rows);
        }
        Ok(rows)
    }

    /// Fan an operation out to every requested region (all populated
    /// regions when `regions` is `None`). The result always carries one
    /// entry per requested region: `Some(rows)` on success, `None` where
    /// that region failed. One region's failure never hides another's
    /// rows.
    pub async fn execute_cross_region(
        &self,
        op: &ShardOperation,
        regions: Option<Vec<Region>>,
    ) -> Result<BTreeMap<Region, Option<Vec<Value>>>> {
        if !self.manager.config().cross_region_queries {
            return Err(ShardError::Config(
                "cross-region queries are disabled".into(),
            ));
        }

        let regions = match regions {
            Some(regions) => regions,
            None => self.manager.active_regions().await,
        };

        let tasks = regions.iter().map(|region| {
            let mut regional = op.clone();
            regional.shard_key.region = *region;
            async move {
                let outcome = self.manager.execute_operation(&regional).await;
                (*region, outcome)
            }
        });

        let mut results = BTreeMap::new();
        for (region, outcome) in join_all(tasks).await {
            match outcome {
                Ok(rows) => {
                    metrics::record_fanout_result(region.as_str(), true);
                    results.insert(region, Some(rows));
                }
                Err(err) => {
                    metrics::record_fanout_result(region.as_str(), false);
                    warn!(region = %region, error = %err, "cross-region fan-out leg failed");
                    results.insert(region, None);
                }
            }
        }
        Ok(results)
    }

    /// Latency-aware read placement for a client in a known region
    pub fn optimal_route(&self, key: &ShardKey, client_region: Region) -> Result<ShardInfo> {
        self.manager.strategy().optimal_shard(key, client_region)
    }
}
