//! Key-aware query planning
//!
//! Picks the cheapest execution shape for a query: a single-shard routed
//! read when the caller knows the entity's key, a parallel cross-region
//! fan-out when it does not. Full scatter-gather SELECT results flow
//! through the TTL cache; point lookups bypass it.

use super::{QueryCache, QueryOptimizer};
use crate::error::Result;
use crate::manager::ShardManager;
use crate::types::{OperationType, Region, ShardKey, ShardOperation};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub struct QueryPlanner {
    manager: Arc<ShardManager>,
    optimizer: QueryOptimizer,
    cache: QueryCache,
}

impl QueryPlanner {
    pub fn new(manager: Arc<ShardManager>) -> Self {
        Self {
            optimizer: QueryOptimizer::new(manager.clone()),
            cache: QueryCache::default(),
            manager,
        }
    }

    pub fn with_cache_ttl(manager: Arc<ShardManager>, ttl: Duration) -> Self {
        Self {
            optimizer: QueryOptimizer::new(manager.clone()),
            cache: QueryCache::new(ttl),
            manager,
        }
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    /// Execute a query on the narrowest shard set the inputs allow
    pub async fn execute_optimized(
        &self,
        query: &str,
        params: &HashMap<String, Value>,
        shard_key: Option<&ShardKey>,
        regions: Option<Vec<Region>>,
    ) -> Result<Vec<Value>> {
        // Only full scatter-gather SELECTs are worth caching; point lookups
        // and region-restricted reads go straight to the shards.
        let cacheable = is_select(query) && shard_key.is_none() && regions.is_none();
        let cache_key = cacheable.then(|| QueryCache::key_for(query, shard_key));
        if let Some(cache_key) = &cache_key {
            if let Some(rows) = self.cache.get(cache_key) {
                return Ok(rows);
            }
        }

        let rows = match shard_key {
            Some(key) => {
                debug!(region = %key.region, entity = %key.entity_type, "planned single-shard query");
                let op = ShardOperation::new(key.clone(), OperationType::Read, query)
                    .with_parameters(params.clone());
                self.manager.execute_operation(&op).await?
            }
            None => {
                debug!("planned cross-region query");
                self.optimizer
                    .execute_query(query, params, regions, true)
                    .await?
            }
        };

        if let Some(cache_key) = cache_key {
            self.cache.set(cache_key, rows.clone());
        }
        Ok(rows)
    }
}

fn is_select(query: &str) -> bool {
    query
        .trim_start()
        .get(..6)
        .is_some_and(|head| head.eq_ignore_ascii_case("select"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ShardConfig;
    use crate::strategy::StrategyKind;
    use serde_json::json;

    async fn planner() -> QueryPlanner {
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
        QueryPlanner::new(manager)
    }

    async fn seed(planner: &QueryPlanner, shard_id: &str, id: &str) {
        planner
            .manager
            .execute_on_shard(
                shard_id,
                "INSERT INTO entities (id, entity_type, region) VALUES (:id, 'job', 'x')",
                &HashMap::from([("id".to_string(), json!(id))]),
            )
            .await
            .unwrap();
    }

    #[test]
    fn test_is_select_detection() {
        assert!(is_select("SELECT 1"));
        assert!(is_select("  select id FROM entities"));
        assert!(!is_select("INSERT INTO entities (id) VALUES ('x')"));
        assert!(!is_select("sel"));
    }

    #[tokio::test]
    async fn test_keyed_query_stays_on_one_shard() {
        let planner = planner().await;
        seed(&planner, "na-east-0", "j-na").await;
        seed(&planner, "eu-west-0", "j-eu").await;

        let key = ShardKey::new(Region::NaEast, "job", "j-na");
        let rows = planner
            .execute_optimized("SELECT id FROM entities", &HashMap::new(), Some(&key), None)
            .await
            .unwrap();
        // Only the NA shard's rows; the EU shard was never consulted.
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], json!("j-na"));
    }

    #[tokio::test]
    async fn test_keyless_query_fans_out() {
        let planner = planner().await;
        seed(&planner, "na-east-0", "j-na").await;
        seed(&planner, "eu-west-0", "j-eu").await;

        let rows = planner
            .execute_optimized("SELECT id FROM entities", &HashMap::new(), None, None)
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn test_select_results_are_cached() {
        let planner = planner().await;
        seed(&planner, "na-east-0", "j-1").await;

        planner
            .execute_optimized("SELECT id FROM entities", &HashMap::new(), None, None)
            .await
            .unwrap();
        // Second identical query must be served from cache even though the
        // underlying data changed.
        seed(&planner, "na-east-0", "j-2").await;
        let rows = planner
            .execute_optimized("SELECT id FROM entities", &HashMap::new(), None, None)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(planner.cache().stats().hits, 1);
    }

    #[tokio::test]
    async fn test_point_lookups_bypass_cache() {
        let planner = planner().await;
        seed(&planner, "na-east-0", "j-na").await;
        let key = ShardKey::new(Region::NaEast, "job", "j-na");
        planner
            .execute_optimized("SELECT id FROM entities", &HashMap::new(), Some(&key), None)
            .await
            .unwrap();
        assert_eq!(planner.cache().stats().entries, 0);
    }

    #[tokio::test]
    async fn test_writes_bypass_cache() {
        let planner = planner().await;
        let key = ShardKey::new(Region::NaEast, "job", "j-1");
        planner
            .execute_optimized(
                "INSERT INTO entities (id, entity_type, region) VALUES (:id, 'job', 'na-east')",
                &HashMap::from([("id".to_string(), json!("j-1"))]),
                Some(&key),
                None,
            )
            .await
            .unwrap();
        assert_eq!(planner.cache().stats().entries, 0);
    }
}
