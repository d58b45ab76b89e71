//! Bounded cross-region query fan-out
//!
//! Runs one statement against the primary shard of each requested region.
//! Parallel fan-out is capped by a semaphore so a query spanning many
//! regions cannot monopolize every shard connection at once. Unlike the
//! router's advisory fan-out, errors here propagate to the caller.

use crate::error::{Result, ShardError};
use crate::manager::ShardManager;
use crate::types::Region;
use futures::future::join_all;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::debug;

const MAX_CONCURRENT_REGION_QUERIES: usize = 10;

pub struct QueryOptimizer {
    manager: Arc<ShardManager>,
    semaphore: Arc<Semaphore>,
}

impl QueryOptimizer {
    pub fn new(manager: Arc<ShardManager>) -> Self {
        Self {
            manager,
            semaphore: Arc::new(Semaphore::new(MAX_CONCURRENT_REGION_QUERIES)),
        }
    }

    /// Execute a statement against each region's primary shard. Results
    /// come back in region order regardless of completion order.
    pub async fn execute_query(
        &self,
        query: &str,
        params: &HashMap<String, Value>,
        regions: Option<Vec<Region>>,
        parallel: bool,
    ) -> Result<Vec<Value>> {
        let regions = match regions {
            Some(regions) => regions,
            None => self.manager.active_regions().await,
        };

        let mut targets = Vec::with_capacity(regions.len());
        for region in regions {
            targets.push((region, self.manager.primary_shard_for_region(region).await?));
        }
        debug!(regions = targets.len(), parallel, "query fan-out");

        let mut collected: BTreeMap<Region, Vec<Value>> = BTreeMap::new();
        if parallel {
            let tasks = targets.iter().map(|(region, shard)| async move {
                let _permit = self
                    .semaphore
                    .acquire()
                    .await
                    .map_err(|_| ShardError::Backend("query semaphore closed".into()))?;
                let rows = self
                    .manager
                    .execute_on_shard(&shard.shard_id, query, params)
                    .await?;
                Ok::<_, ShardError>((*region, rows))
            });
            for outcome in join_all(tasks).await {
                let (region, rows) = outcome?;
                collected.insert(region, rows);
            }
        } else {
            for (region, shard) in &targets {
                let rows = self
                    .manager
                    .execute_on_shard(&shard.shard_id, query, params)
                    .await?;
                collected.insert(*region, rows);
            }
        }

        Ok(collected.into_values().flatten().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ShardConfig;
    use crate::strategy::StrategyKind;
    use serde_json::json;

    async fn optimizer() -> QueryOptimizer {
        let config = ShardConfig {
            regions: vec![Region::NaEast, Region::EuWest],
            shards_per_region: 1,
            min_shards: 2,
            ring_size: 64,
            ..Default::default()
        };
        let manager = Arc::new(
            ShardManager::new(config, StrategyKind::Region)
                .await
                .unwrap(),
        );
        QueryOptimizer::new(manager)
    }

    async fn seed(optimizer: &QueryOptimizer, shard_id: &str, id: &str) {
        optimizer
            .manager
            .execute_on_shard(
                shard_id,
                "INSERT INTO entities (id, entity_type, region) VALUES (:id, 'job', 'x')",
                &HashMap::from([("id".to_string(), json!(id))]),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_parallel_results_follow_region_order() {
        let optimizer = optimizer().await;
        seed(&optimizer, "na-east-0", "j-na").await;
        seed(&optimizer, "eu-west-0", "j-eu").await;

        let rows = optimizer
            .execute_query("SELECT id FROM entities", &HashMap::new(), None, true)
            .await
            .unwrap();
        // EU sorts before NA; region order, not completion order.
        let ids: Vec<&str> = rows.iter().map(|r| r["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["j-eu", "j-na"]);
    }

    #[tokio::test]
    async fn test_sequential_matches_parallel() {
        let optimizer = optimizer().await;
        seed(&optimizer, "na-east-0", "j-na").await;
        seed(&optimizer, "eu-west-0", "j-eu").await;

        let parallel = optimizer
            .execute_query("SELECT id FROM entities", &HashMap::new(), None, true)
            .await
            .unwrap();
        let sequential = optimizer
            .execute_query("SELECT id FROM entities", &HashMap::new(), None, false)
            .await
            .unwrap();
        assert_eq!(parallel, sequential);
    }

    #[tokio::test]
    async fn test_failure_propagates() {
        let optimizer = optimizer().await;
        let err = optimizer
            .execute_query("SELECT * FROM no_such_table", &HashMap::new(), None, true)
            .await
            .unwrap_err();
        assert_eq!(err.error_type(), "backend");
    }

    #[tokio::test]
    async fn test_explicit_region_subset() {
        let optimizer = optimizer().await;
        seed(&optimizer, "na-east-0", "j-na").await;
        seed(&optimizer, "eu-west-0", "j-eu").await;

        let rows = optimizer
            .execute_query(
                "SELECT id FROM entities",
                &HashMap::new(),
                Some(vec![Region::EuWest]),
                true,
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], json!("j-eu"));
    }
}
