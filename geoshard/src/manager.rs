//! Shard registry and operation execution
//!
//! The `ShardManager` owns the authoritative shard registry and the stores
//! behind it. Routed operations hold a read guard on the registry for their
//! whole execution, so `remove_shard` (which takes the write guard) cannot
//! pull a shard out from under an in-flight operation.
//!
//! The routing strategy is an immutable object swapped wholesale on every
//! topology change; readers grab an `Arc` and never observe a half-built
//! ring.

use crate::bootstrap;
use crate::config::ShardConfig;
use crate::error::{Result, ShardError};
use crate::metrics;
use crate::store::ShardStore;
use crate::strategy::{build_strategy, ShardStrategy, StrategyKind};
use crate::types::{
    Region, ShardInfo, ShardKey, ShardOperation, ShardStatus, ShardingMetrics,
};
use chrono::Utc;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

struct Registry {
    shards: BTreeMap<String, ShardInfo>,
    stores: BTreeMap<String, Arc<ShardStore>>,
}

pub struct ShardManager {
    config: ShardConfig,
    strategy_kind: StrategyKind,
    inner: RwLock<Registry>,
    strategy: parking_lot::RwLock<Arc<dyn ShardStrategy>>,
    ops_total: AtomicU64,
    ops_cross_shard: AtomicU64,
    started_at: Instant,
}

impl ShardManager {
    /// Provision the initial topology from config: `shards_per_region`
    /// shards in every enabled region, each with its schema initialized.
    pub async fn new(config: ShardConfig, strategy_kind: StrategyKind) -> Result<Self> {
        config.validate()?;

        let mut shards = BTreeMap::new();
        let mut stores = BTreeMap::new();
        for region in &config.regions {
            for index in 0..config.shards_per_region {
                let info = ShardInfo::new(
                    *region,
                    index,
                    config.connection_string(&format!("{}-{}", region.as_str(), index)),
                );
                let store = Arc::new(ShardStore::open(&info.shard_id, &info.connection_string)?);
                bootstrap::init_shard_store(&store).await?;
                stores.insert(info.shard_id.clone(), store);
                shards.insert(info.shard_id.clone(), info);
            }
        }

        let strategy = build_strategy(strategy_kind, shards.values().cloned().collect(), &config);
        info!(
            shards = shards.len(),
            regions = config.regions.len(),
            "shard manager initialized"
        );

        Ok(Self {
            config,
            strategy_kind,
            inner: RwLock::new(Registry { shards, stores }),
            strategy: parking_lot::RwLock::new(strategy),
            ops_total: AtomicU64::new(0),
            ops_cross_shard: AtomicU64::new(0),
            started_at: Instant::now(),
        })
    }

    pub fn config(&self) -> &ShardConfig {
        &self.config
    }

    /// Current strategy object. Callers get a consistent snapshot; the
    /// manager swaps in a new one on topology changes.
    pub fn strategy(&self) -> Arc<dyn ShardStrategy> {
        self.strategy.read().clone()
    }

    /// Resolve a key to its owning shard
    pub fn get_shard(&self, key: &ShardKey) -> Result<ShardInfo> {
        let shard = self.strategy().get_shard(key)?;
        metrics::record_route(&shard.shard_id, shard.region.as_str());
        Ok(shard)
    }

    /// Execute an operation against every shard it targets. Fails fast on
    /// the first shard error; results are flattened in shard order.
    #[instrument(skip(self, op), fields(entity = %op.shard_key.entity_type, cross_shard = op.cross_shard))]
    pub async fn execute_operation(&self, op: &ShardOperation) -> Result<Vec<Value>> {
        if !self.config.enabled {
            return Err(ShardError::Config("shard routing is disabled".into()));
        }

        let targets = self.strategy().shards_for_operation(op)?;
        self.ops_total.fetch_add(1, Ordering::Relaxed);
        if op.cross_shard {
            self.ops_cross_shard.fetch_add(1, Ordering::Relaxed);
        }

        // Read guard held for the whole execution: removal waits us out.
        let registry = self.inner.read().await;
        let mut rows = Vec::new();
        for target in &targets {
            let info = registry
                .shards
                .get(&target.shard_id)
                .ok_or_else(|| ShardError::ShardNotFound(target.shard_id.clone()))?;
            if info.status == ShardStatus::Inactive {
                return Err(ShardError::ShardUnavailable {
                    shard_id: info.shard_id.clone(),
                    reason: "shard is inactive".into(),
                });
            }
            let store = registry
                .stores
                .get(&target.shard_id)
                .ok_or_else(|| ShardError::ShardNotFound(target.shard_id.clone()))?;

            let mut shard_rows = self
                .run_on_store(store, op, &target.shard_id)
                .await
                .inspect_err(|err| {
                    metrics::record_operation_error(&target.shard_id, err.error_type());
                })?;
            rows.append(&mut shard_rows);
        }
        Ok(rows)
    }

    /// The deadline bounds how long the caller waits, whether the statement
    /// is queued behind the shard's connection or already executing. A timed
    /// -out statement is abandoned, not interrupted: it finishes on its
    /// blocking thread after the caller has moved on.
    async fn run_on_store(
        &self,
        store: &ShardStore,
        op: &ShardOperation,
        shard_id: &str,
    ) -> Result<Vec<Value>> {
        let timer = metrics::OperationTimer::start(shard_id, op.operation_type.as_str());
        let deadline = Duration::from_secs(op.timeout_seconds);
        let work = async {
            if op.requires_transaction {
                let statements = vec![(op.query.clone(), op.parameters.clone())];
                store.execute_in_transaction(&statements).await
            } else {
                store.execute(&op.query, &op.parameters).await
            }
        };
        let rows = tokio::time::timeout(deadline, work)
            .await
            .map_err(|_| ShardError::Timeout {
                shard_id: shard_id.to_string(),
                seconds: op.timeout_seconds,
            })??;
        timer.succeed();
        Ok(rows)
    }

    /// Run a raw statement on a named shard, bypassing key routing
    pub async fn execute_on_shard(
        &self,
        shard_id: &str,
        sql: &str,
        params: &std::collections::HashMap<String, Value>,
    ) -> Result<Vec<Value>> {
        let registry = self.inner.read().await;
        let store = registry
            .stores
            .get(shard_id)
            .ok_or_else(|| ShardError::ShardNotFound(shard_id.to_string()))?;
        store.execute(sql, params).await
    }

    /// Run a statement group atomically on a named shard
    pub async fn execute_transactional_batch(
        &self,
        shard_id: &str,
        statements: &[(String, std::collections::HashMap<String, Value>)],
    ) -> Result<Vec<Value>> {
        let registry = self.inner.read().await;
        let store = registry
            .stores
            .get(shard_id)
            .ok_or_else(|| ShardError::ShardNotFound(shard_id.to_string()))?;
        store.execute_in_transaction(statements).await
    }

    /// Add a shard to a region. The new shard enters in `Scaling` status
    /// and immediately joins the ring; only keys whose ring successor is a
    /// point of the new shard are remapped.
    pub async fn add_shard(&self, region: Region) -> Result<ShardInfo> {
        if !self.config.regions.contains(&region) {
            return Err(ShardError::RegionNotEnabled(region));
        }

        let mut registry = self.inner.write().await;
        if registry.shards.len() >= self.config.max_shards {
            return Err(ShardError::Config(format!(
                "max_shards {} reached",
                self.config.max_shards
            )));
        }

        // Next free index, so removed indices are never reused.
        let prefix = format!("{}-", region.as_str());
        let next_index = registry
            .shards
            .keys()
            .filter_map(|id| id.strip_prefix(&prefix)?.parse::<usize>().ok())
            .max()
            .map_or(0, |max| max + 1);

        let mut info = ShardInfo::new(
            region,
            next_index,
            self.config
                .connection_string(&format!("{}{}", prefix, next_index)),
        );
        info.status = ShardStatus::Scaling;

        let store = Arc::new(ShardStore::open(&info.shard_id, &info.connection_string)?);
        bootstrap::init_shard_store(&store).await?;
        registry.stores.insert(info.shard_id.clone(), store);
        registry.shards.insert(info.shard_id.clone(), info.clone());
        self.rebuild_strategy(&registry);

        metrics::update_shard_status(&info.shard_id, info.status);
        info!(shard_id = %info.shard_id, region = %region, "shard added");
        Ok(info)
    }

    /// Remove a shard. Refused while the shard still holds entity or
    /// mapping rows; callers must migrate data off first.
    pub async fn remove_shard(&self, shard_id: &str) -> Result<()> {
        let mut registry = self.inner.write().await;
        if !registry.shards.contains_key(shard_id) {
            return Err(ShardError::ShardNotFound(shard_id.to_string()));
        }
        if registry.shards.len() <= self.config.min_shards {
            return Err(ShardError::Config(format!(
                "cannot drop below min_shards {}",
                self.config.min_shards
            )));
        }

        let store = registry
            .stores
            .get(shard_id)
            .ok_or_else(|| ShardError::ShardNotFound(shard_id.to_string()))?;
        let pending =
            store.count_rows("entities").await? + store.count_rows("cross_shard_mappings").await?;
        if pending > 0 {
            return Err(ShardError::MigrationRequired {
                shard_id: shard_id.to_string(),
                pending_rows: pending,
            });
        }

        registry.shards.remove(shard_id);
        registry.stores.remove(shard_id);
        self.rebuild_strategy(&registry);

        metrics::update_shard_status(shard_id, ShardStatus::Inactive);
        info!(shard_id, "shard removed");
        Ok(())
    }

    fn rebuild_strategy(&self, registry: &Registry) {
        let strategy = build_strategy(
            self.strategy_kind,
            registry.shards.values().cloned().collect(),
            &self.config,
        );
        *self.strategy.write() = strategy;
        metrics::update_topology(
            registry.shards.len(),
            registry
                .shards
                .values()
                .filter(|s| s.status == ShardStatus::Active)
                .count(),
        );
    }

    /// Liveness probe against one shard's store
    pub async fn ping_shard(&self, shard_id: &str) -> Result<()> {
        let registry = self.inner.read().await;
        let store = registry
            .stores
            .get(shard_id)
            .ok_or_else(|| ShardError::ShardNotFound(shard_id.to_string()))?;
        store.ping().await
    }

    /// Set a shard's lifecycle status. Routing is unaffected: status is
    /// advisory and consumed by operators and the health loop.
    pub async fn set_shard_status(&self, shard_id: &str, status: ShardStatus) -> Result<()> {
        let mut registry = self.inner.write().await;
        let info = registry
            .shards
            .get_mut(shard_id)
            .ok_or_else(|| ShardError::ShardNotFound(shard_id.to_string()))?;
        if info.status != status {
            warn!(shard_id, from = info.status.as_str(), to = status.as_str(), "shard status change");
        }
        info.status = status;
        metrics::update_shard_status(shard_id, status);
        Ok(())
    }

    /// Stamp a shard's last health check time
    pub async fn mark_health_checked(&self, shard_id: &str) -> Result<()> {
        let mut registry = self.inner.write().await;
        let info = registry
            .shards
            .get_mut(shard_id)
            .ok_or_else(|| ShardError::ShardNotFound(shard_id.to_string()))?;
        info.last_health_check = Some(Utc::now());
        Ok(())
    }

    pub async fn shard_info(&self, shard_id: &str) -> Option<ShardInfo> {
        self.inner.read().await.shards.get(shard_id).cloned()
    }

    /// All shards, in shard-id order
    pub async fn snapshot(&self) -> Vec<ShardInfo> {
        self.inner.read().await.shards.values().cloned().collect()
    }

    /// All shards in one region, in shard-id order
    pub async fn shards_for_region(&self, region: Region) -> Vec<ShardInfo> {
        self.inner
            .read()
            .await
            .shards
            .values()
            .filter(|s| s.region == region)
            .cloned()
            .collect()
    }

    /// Regions that currently have at least one shard, in stable order
    pub async fn active_regions(&self) -> Vec<Region> {
        let registry = self.inner.read().await;
        let mut regions: Vec<Region> = registry.shards.values().map(|s| s.region).collect();
        regions.sort();
        regions.dedup();
        regions
    }

    /// The shard relationship writes land on for a region: the first
    /// active shard in id order, or the first shard at all as a fallback.
    pub async fn primary_shard_for_region(&self, region: Region) -> Result<ShardInfo> {
        let registry = self.inner.read().await;
        let mut candidates: Vec<&ShardInfo> = registry
            .shards
            .values()
            .filter(|s| s.region == region)
            .collect();
        candidates.sort_by(|a, b| a.shard_id.cmp(&b.shard_id));
        candidates
            .iter()
            .find(|s| s.status == ShardStatus::Active)
            .or_else(|| candidates.first())
            .map(|s| (*s).clone())
            .ok_or_else(|| ShardError::Routing(format!("no shards in region {region}")))
    }

    pub(crate) async fn stores_snapshot(&self) -> Vec<Arc<ShardStore>> {
        self.inner.read().await.stores.values().cloned().collect()
    }

    /// Point-in-time metrics computed from the registry and counters
    pub async fn get_metrics(&self) -> Result<ShardingMetrics> {
        let registry = self.inner.read().await;

        let total_shards = registry.shards.len();
        let active_shards = registry
            .shards
            .values()
            .filter(|s| s.status == ShardStatus::Active)
            .count();
        let max_connections: u32 = registry.shards.values().map(|s| s.max_connections).sum();
        let total_connections: u32 = registry.stores.values().map(|s| s.in_flight()).sum();

        let mut data_size_bytes = 0u64;
        for store in registry.stores.values() {
            data_size_bytes += store.data_size_bytes().await?;
        }

        let ops_total = self.ops_total.load(Ordering::Relaxed);
        let ops_cross = self.ops_cross_shard.load(Ordering::Relaxed);
        let uptime = self.started_at.elapsed().as_secs_f64().max(1.0);

        Ok(ShardingMetrics {
            total_shards,
            active_shards,
            total_connections,
            max_connections,
            connection_utilization: if max_connections == 0 {
                0.0
            } else {
                f64::from(total_connections) / f64::from(max_connections)
            },
            data_size_gb: data_size_bytes as f64 / 1_000_000_000.0,
            queries_per_second: ops_total as f64 / uptime,
            cross_shard_queries_percent: if ops_total == 0 {
                0.0
            } else {
                ops_cross as f64 / ops_total as f64 * 100.0
            },
            replication_lag_seconds: 0.0,
        })
    }

    /// Whether current load warrants growing the topology
    pub async fn should_reshard(&self) -> Result<bool> {
        let metrics = self.get_metrics().await?;
        Ok(self.strategy().should_reshard(&metrics))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OperationType;
    use serde_json::json;
    use std::collections::HashMap;

    fn config_2x2() -> ShardConfig {
        ShardConfig {
            regions: vec![Region::NaEast, Region::EuWest],
            shards_per_region: 2,
            min_shards: 2,
            max_shards: 6,
            ring_size: 128,
            ..Default::default()
        }
    }

    async fn manager() -> ShardManager {
        ShardManager::new(config_2x2(), StrategyKind::Region)
            .await
            .unwrap()
    }

    fn insert_op(region: Region, id: &str) -> ShardOperation {
        let key = ShardKey::new(region, "job", id);
        ShardOperation::new(
            key,
            OperationType::Write,
            "INSERT INTO entities (id, entity_type, region) VALUES (:id, :etype, :region)",
        )
        .with_parameters(HashMap::from([
            ("id".to_string(), json!(id)),
            ("etype".to_string(), json!("job")),
            ("region".to_string(), json!(region.as_str())),
        ]))
    }

    #[tokio::test]
    async fn test_initial_topology_matches_config() {
        let manager = manager().await;
        let shards = manager.snapshot().await;
        assert_eq!(shards.len(), 4);
        let ids: Vec<&str> = shards.iter().map(|s| s.shard_id.as_str()).collect();
        assert_eq!(ids, vec!["eu-west-0", "eu-west-1", "na-east-0", "na-east-1"]);
    }

    #[tokio::test]
    async fn test_write_then_read_same_shard() {
        let manager = manager().await;
        manager
            .execute_operation(&insert_op(Region::NaEast, "j-1"))
            .await
            .unwrap();

        let key = ShardKey::new(Region::NaEast, "job", "j-1");
        let read = ShardOperation::new(
            key,
            OperationType::Read,
            "SELECT id FROM entities WHERE id = :id",
        )
        .with_parameters(HashMap::from([("id".to_string(), json!("j-1"))]));
        let rows = manager.execute_operation(&read).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], json!("j-1"));
    }

    #[tokio::test]
    async fn test_cross_shard_read_covers_region() {
        let manager = manager().await;
        for i in 0..20 {
            manager
                .execute_operation(&insert_op(Region::NaEast, &format!("j-{i}")))
                .await
                .unwrap();
        }

        let key = ShardKey::new(Region::NaEast, "job", "any");
        let read = ShardOperation::new(
            key,
            OperationType::Read,
            "SELECT COUNT(*) AS n FROM entities",
        )
        .cross_shard();
        let rows = manager.execute_operation(&read).await.unwrap();
        // One count row per shard in the region; together they see all 20.
        assert_eq!(rows.len(), 2);
        let total: i64 = rows.iter().map(|r| r["n"].as_i64().unwrap()).sum();
        assert_eq!(total, 20);
    }

    #[tokio::test]
    async fn test_add_shard_grows_region() {
        let manager = manager().await;
        let info = manager.add_shard(Region::NaEast).await.unwrap();
        assert_eq!(info.shard_id, "na-east-2");
        assert_eq!(info.status, ShardStatus::Scaling);
        assert_eq!(manager.snapshot().await.len(), 5);

        // New shard is routable immediately.
        let mut seen_new = false;
        for i in 0..200 {
            let key = ShardKey::new(Region::NaEast, "job", format!("k-{i}"));
            if manager.get_shard(&key).unwrap().shard_id == "na-east-2" {
                seen_new = true;
                break;
            }
        }
        assert!(seen_new);
    }

    #[tokio::test]
    async fn test_add_shard_rejects_disabled_region() {
        let manager = manager().await;
        let err = manager.add_shard(Region::Oceania).await.unwrap_err();
        assert_eq!(err.error_type(), "region_not_enabled");
    }

    #[tokio::test]
    async fn test_add_shard_respects_max() {
        let manager = manager().await;
        manager.add_shard(Region::NaEast).await.unwrap();
        manager.add_shard(Region::EuWest).await.unwrap();
        let err = manager.add_shard(Region::NaEast).await.unwrap_err();
        assert_eq!(err.error_type(), "config");
    }

    #[tokio::test]
    async fn test_remove_empty_shard_succeeds() {
        let manager = manager().await;
        manager.add_shard(Region::NaEast).await.unwrap();
        manager.remove_shard("na-east-2").await.unwrap();
        assert!(manager.shard_info("na-east-2").await.is_none());
    }

    #[tokio::test]
    async fn test_remove_shard_with_data_requires_migration() {
        let manager = manager().await;
        manager.add_shard(Region::NaEast).await.unwrap();
        manager
            .execute_on_shard(
                "na-east-2",
                "INSERT INTO entities (id, entity_type, region) VALUES ('x', 'job', 'na-east')",
                &HashMap::new(),
            )
            .await
            .unwrap();

        let err = manager.remove_shard("na-east-2").await.unwrap_err();
        assert_eq!(err.error_type(), "migration_required");
        // Shard must still be present and routable after the refusal.
        assert!(manager.shard_info("na-east-2").await.is_some());
    }

    #[tokio::test]
    async fn test_remove_shard_respects_min() {
        let config = ShardConfig {
            regions: vec![Region::NaEast],
            shards_per_region: 2,
            min_shards: 2,
            ..Default::default()
        };
        let manager = ShardManager::new(config, StrategyKind::Region).await.unwrap();
        let err = manager.remove_shard("na-east-0").await.unwrap_err();
        assert_eq!(err.error_type(), "config");
    }

    #[tokio::test]
    async fn test_removed_index_is_not_reused() {
        let manager = manager().await;
        manager.add_shard(Region::NaEast).await.unwrap();
        manager.remove_shard("na-east-2").await.unwrap();
        let info = manager.add_shard(Region::NaEast).await.unwrap();
        // Indices only grow, so a new shard never inherits old data paths.
        assert_eq!(info.shard_id, "na-east-2");
    }

    #[tokio::test]
    async fn test_inactive_shard_refuses_operations() {
        let manager = manager().await;
        let key = ShardKey::new(Region::NaEast, "job", "j-1");
        let target = manager.get_shard(&key).unwrap();
        manager
            .set_shard_status(&target.shard_id, ShardStatus::Inactive)
            .await
            .unwrap();

        let op = ShardOperation::new(key, OperationType::Read, "SELECT 1");
        let err = manager.execute_operation(&op).await.unwrap_err();
        assert_eq!(err.error_type(), "shard_unavailable");
    }

    #[tokio::test]
    async fn test_metrics_reflect_counters() {
        let manager = manager().await;
        manager
            .execute_operation(&insert_op(Region::NaEast, "j-1"))
            .await
            .unwrap();
        let key = ShardKey::new(Region::NaEast, "job", "any");
        let cross = ShardOperation::new(key, OperationType::Read, "SELECT 1").cross_shard();
        manager.execute_operation(&cross).await.unwrap();

        let metrics = manager.get_metrics().await.unwrap();
        assert_eq!(metrics.total_shards, 4);
        assert_eq!(metrics.active_shards, 4);
        assert_eq!(metrics.cross_shard_queries_percent, 50.0);
        assert!(metrics.data_size_gb > 0.0);
        assert!(metrics.queries_per_second > 0.0);
    }

    #[tokio::test]
    async fn test_primary_shard_prefers_active() {
        let manager = manager().await;
        assert_eq!(
            manager
                .primary_shard_for_region(Region::NaEast)
                .await
                .unwrap()
                .shard_id,
            "na-east-0"
        );

        manager
            .set_shard_status("na-east-0", ShardStatus::Maintenance)
            .await
            .unwrap();
        assert_eq!(
            manager
                .primary_shard_for_region(Region::NaEast)
                .await
                .unwrap()
                .shard_id,
            "na-east-1"
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_operation_timeout_maps_to_timeout_error() {
        let manager = manager().await;
        let key = ShardKey::new(Region::NaEast, "job", "j-1");
        let target = manager.get_shard(&key).unwrap();
        let store = manager
            .stores_snapshot()
            .await
            .into_iter()
            .find(|s| s.shard_id() == target.shard_id)
            .unwrap();

        // Occupy the shard's connection with a slow scan so the routed
        // operation blocks on the store and hits its deadline.
        let busy = tokio::spawn(async move {
            let _ = store
                .execute(
                    "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 20000000) SELECT COUNT(*) FROM c",
                    &HashMap::new(),
                )
                .await;
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let op = ShardOperation::new(key, OperationType::Read, "SELECT 1").with_timeout(0);
        let err = manager.execute_operation(&op).await.unwrap_err();
        assert_eq!(err.error_type(), "timeout");
        busy.abort();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_timeout_fires_while_statement_is_executing() {
        let manager = manager().await;
        let key = ShardKey::new(Region::NaEast, "job", "j-1");

        // The slow scan is itself the timed operation: the deadline must
        // fire mid-statement, not only while queued behind the connection.
        let op = ShardOperation::new(
            key,
            OperationType::Read,
            "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 50000000) SELECT COUNT(*) FROM c",
        )
        .with_timeout(1);

        let started = std::time::Instant::now();
        let err = manager.execute_operation(&op).await.unwrap_err();
        assert_eq!(err.error_type(), "timeout");
        assert!(started.elapsed() < Duration::from_secs(30));
    }
}
