//! Cross-shard relationship store
//!
//! Relationships between entities on different shards are written twice,
//! once on each side's regional primary, so either copy survives the loss
//! of the other. The two writes are independent transactions: a half
//! -applied write surfaces as `PartialRelationship` and is never silently
//! treated as success. Same-region relationships collapse to one write.

use crate::error::{Result, ShardError};
use crate::manager::ShardManager;
use crate::metrics;
use crate::types::{CrossShardMapping, Region, ShardKey, ShardOperation};
use futures::future::join_all;
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::warn;

const INSERT_MAPPING: &str = "INSERT INTO cross_shard_mappings \
    (id, source_id, source_region, target_id, target_region, relationship_type, metadata, created_at) \
    VALUES (:id, :source_id, :source_region, :target_id, :target_region, :relationship_type, :metadata, :created_at)";

const DELETE_MAPPING: &str = "DELETE FROM cross_shard_mappings \
    WHERE source_id = :source_id AND target_id = :target_id AND relationship_type = :relationship_type";

pub struct RelationshipManager {
    manager: Arc<ShardManager>,
}

impl RelationshipManager {
    pub fn new(manager: Arc<ShardManager>) -> Self {
        Self { manager }
    }

    /// Persist a relationship on both sides' regional primaries
    pub async fn create_relationship(&self, mapping: &CrossShardMapping) -> Result<()> {
        let params = mapping_params(mapping);
        self.dual_write(mapping, INSERT_MAPPING, &params).await
    }

    /// Remove a relationship from both sides
    pub async fn delete_relationship(&self, mapping: &CrossShardMapping) -> Result<()> {
        let params = HashMap::from([
            ("source_id".to_string(), json!(mapping.source_id)),
            ("target_id".to_string(), json!(mapping.target_id)),
            (
                "relationship_type".to_string(),
                json!(mapping.relationship_type),
            ),
        ]);
        self.dual_write(mapping, DELETE_MAPPING, &params).await
    }

    async fn dual_write(
        &self,
        mapping: &CrossShardMapping,
        sql: &str,
        params: &HashMap<String, Value>,
    ) -> Result<()> {
        let source_shard = self
            .manager
            .primary_shard_for_region(mapping.source_region)
            .await?;
        let target_shard = self
            .manager
            .primary_shard_for_region(mapping.target_region)
            .await?;

        // Same shard on both sides: one write, no redundancy needed.
        if source_shard.shard_id == target_shard.shard_id {
            self.manager
                .execute_on_shard(&source_shard.shard_id, sql, params)
                .await?;
            metrics::record_relationship_write("ok");
            return Ok(());
        }

        let source_result = self
            .manager
            .execute_on_shard(&source_shard.shard_id, sql, params)
            .await;
        let target_result = self
            .manager
            .execute_on_shard(&target_shard.shard_id, sql, params)
            .await;

        match (source_result, target_result) {
            (Ok(_), Ok(_)) => {
                metrics::record_relationship_write("ok");
                Ok(())
            }
            (Ok(_), Err(err)) => {
                metrics::record_relationship_write("partial");
                Err(ShardError::PartialRelationship {
                    applied_on: source_shard.shard_id,
                    failed_on: target_shard.shard_id,
                    source_id: mapping.source_id.clone(),
                    target_id: mapping.target_id.clone(),
                    reason: err.to_string(),
                })
            }
            (Err(err), Ok(_)) => {
                metrics::record_relationship_write("partial");
                Err(ShardError::PartialRelationship {
                    applied_on: target_shard.shard_id,
                    failed_on: source_shard.shard_id,
                    source_id: mapping.source_id.clone(),
                    target_id: mapping.target_id.clone(),
                    reason: err.to_string(),
                })
            }
            (Err(source_err), Err(_)) => {
                metrics::record_relationship_write("failed");
                Err(ShardError::RelationshipFailed {
                    source_shard: source_shard.shard_id,
                    target_shard: target_shard.shard_id,
                    reason: source_err.to_string(),
                })
            }
        }
    }

    /// Fetch an entity's relationships with their target entities resolved.
    ///
    /// Candidate regions default to every populated region; passing
    /// `target_regions` limits the scan to relationships targeting those
    /// regions. Each region contributes only the mappings that target it,
    /// which is exactly one copy per relationship despite the redundant
    /// storage. A down region drops out of the result with a warning rather
    /// than failing the whole read.
    pub async fn get_related_objects(
        &self,
        source_id: &str,
        source_region: Region,
        target_regions: Option<Vec<Region>>,
        relationship_type: Option<&str>,
    ) -> Result<Vec<Value>> {
        let mut sql = String::from(
            "SELECT id, source_id, source_region, target_id, target_region, \
             relationship_type, metadata, created_at \
             FROM cross_shard_mappings \
             WHERE source_id = :source_id AND source_region = :source_region \
             AND target_region = :region",
        );
        if relationship_type.is_some() {
            sql.push_str(" AND relationship_type = :relationship_type");
        }

        let regions = match target_regions {
            Some(regions) => regions,
            None => self.manager.active_regions().await,
        };
        let tasks = regions.iter().map(|region| {
            let mut params = HashMap::from([
                ("source_id".to_string(), json!(source_id)),
                ("source_region".to_string(), json!(source_region.as_str())),
                ("region".to_string(), json!(region.as_str())),
            ]);
            if let Some(rtype) = relationship_type {
                params.insert("relationship_type".to_string(), json!(rtype));
            }
            let op = ShardOperation::new(
                ShardKey::new(*region, "mapping", source_id),
                crate::types::OperationType::Read,
                sql.clone(),
            )
            .with_parameters(params)
            .cross_shard();
            async move { (*region, self.manager.execute_operation(&op).await) }
        });

        let mut mappings: Vec<Value> = Vec::new();
        let mut seen = HashSet::new();
        for (region, outcome) in join_all(tasks).await {
            match outcome {
                Ok(rows) => {
                    for row in rows {
                        let id = row["id"].as_str().unwrap_or_default().to_string();
                        if seen.insert(id) {
                            mappings.push(row);
                        }
                    }
                }
                Err(err) => {
                    warn!(region = %region, error = %err, "relationship lookup skipped region");
                }
            }
        }

        let entities = self.resolve_targets(&mappings).await;
        Ok(mappings
            .into_iter()
            .map(|mapping| {
                let target_id = mapping["target_id"].as_str().unwrap_or_default();
                let entity = entities.get(target_id).cloned().unwrap_or(Value::Null);
                json!({ "mapping": mapping, "entity": entity })
            })
            .collect())
    }

    /// Load target entities region by region with one IN query per region
    async fn resolve_targets(&self, mappings: &[Value]) -> HashMap<String, Value> {
        let mut by_region: HashMap<Region, Vec<String>> = HashMap::new();
        for mapping in mappings {
            let Some(target_id) = mapping["target_id"].as_str() else {
                continue;
            };
            let Ok(region) = mapping["target_region"]
                .as_str()
                .unwrap_or_default()
                .parse::<Region>()
            else {
                continue;
            };
            by_region.entry(region).or_default().push(target_id.to_string());
        }

        let mut entities = HashMap::new();
        for (region, ids) in by_region {
            let mut params: HashMap<String, Value> = HashMap::new();
            let placeholders: Vec<String> = ids
                .iter()
                .enumerate()
                .map(|(i, id)| {
                    params.insert(format!("id{i}"), json!(id));
                    format!(":id{i}")
                })
                .collect();
            let sql = format!(
                "SELECT * FROM entities WHERE id IN ({})",
                placeholders.join(", ")
            );

            let op = ShardOperation::new(
                ShardKey::new(region, "entity", "lookup"),
                crate::types::OperationType::Read,
                sql,
            )
            .with_parameters(params)
            .cross_shard();

            match self.manager.execute_operation(&op).await {
                Ok(rows) => {
                    for row in rows {
                        if let Some(Value::String(id)) = row.get("id") {
                            entities.insert(id.clone(), row.clone());
                        }
                    }
                }
                Err(err) => {
                    warn!(region = %region, error = %err, "target entity resolution failed");
                }
            }
        }
        entities
    }
}

fn mapping_params(mapping: &CrossShardMapping) -> HashMap<String, Value> {
    let mut params = Map::new();
    params.insert("id".into(), json!(mapping.id.to_string()));
    params.insert("source_id".into(), json!(mapping.source_id));
    params.insert(
        "source_region".into(),
        json!(mapping.source_region.as_str()),
    );
    params.insert("target_id".into(), json!(mapping.target_id));
    params.insert(
        "target_region".into(),
        json!(mapping.target_region.as_str()),
    );
    params.insert(
        "relationship_type".into(),
        json!(mapping.relationship_type),
    );
    params.insert(
        "metadata".into(),
        mapping.metadata.clone().unwrap_or(Value::Null),
    );
    params.insert("created_at".into(), json!(mapping.created_at.to_rfc3339()));
    params.into_iter().collect()
}
