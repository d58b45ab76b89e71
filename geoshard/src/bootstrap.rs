//! Shard schema provisioning and verification
//!
//! Every shard carries the same four tables. `init_shard_store` is
//! idempotent, so re-running bootstrap against a live fleet is safe.

use crate::error::Result;
use crate::manager::ShardManager;
use crate::store::ShardStore;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{info, warn};

/// Tables every shard must carry to accept routed operations
pub const REQUIRED_TABLES: &[&str] = &[
    "entities",
    "cross_shard_mappings",
    "shard_metadata",
    "shard_metrics",
];

const SHARD_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS entities (
    id          TEXT PRIMARY KEY,
    entity_type TEXT NOT NULL,
    region      TEXT NOT NULL,
    tenant_id   TEXT,
    payload     TEXT,
    created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    updated_at  TEXT
);

CREATE INDEX IF NOT EXISTS idx_entities_type ON entities (entity_type);
CREATE INDEX IF NOT EXISTS idx_entities_tenant ON entities (tenant_id);

CREATE TABLE IF NOT EXISTS cross_shard_mappings (
    id                TEXT PRIMARY KEY,
    source_id         TEXT NOT NULL,
    source_region     TEXT NOT NULL,
    target_id         TEXT NOT NULL,
    target_region     TEXT NOT NULL,
    relationship_type TEXT NOT NULL,
    metadata          TEXT,
    created_at        TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_cross_shard_source
    ON cross_shard_mappings (source_id, source_region);
CREATE INDEX IF NOT EXISTS idx_cross_shard_target
    ON cross_shard_mappings (target_id, target_region);

CREATE TABLE IF NOT EXISTS shard_metadata (
    key   TEXT PRIMARY KEY,
    value TEXT
);

CREATE TABLE IF NOT EXISTS shard_metrics (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    recorded_at     TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    queries_total   INTEGER NOT NULL DEFAULT 0,
    data_size_bytes INTEGER NOT NULL DEFAULT 0
);
"#;

/// Create the shard schema on one store. Idempotent.
pub async fn init_shard_store(store: &ShardStore) -> Result<()> {
    store.execute_batch(SHARD_SCHEMA).await?;
    store
        .execute(
            "INSERT OR REPLACE INTO shard_metadata (key, value) VALUES (:key, :value)",
            &HashMap::from([
                ("key".to_string(), serde_json::json!("shard_id")),
                ("value".to_string(), serde_json::json!(store.shard_id())),
            ]),
        )
        .await?;
    Ok(())
}

/// Provision the schema on every registered shard. Returns the number of
/// shards successfully initialized; failures are logged and skipped so one
/// broken shard does not block the rest of the fleet.
pub async fn bootstrap_all(manager: &ShardManager) -> usize {
    let mut initialized = 0;
    for store in manager.stores_snapshot().await {
        match init_shard_store(&store).await {
            Ok(()) => {
                info!(shard_id = %store.shard_id(), "shard schema initialized");
                initialized += 1;
            }
            Err(err) => {
                warn!(shard_id = %store.shard_id(), error = %err, "shard bootstrap failed");
            }
        }
    }
    initialized
}

/// Verification result for one shard
#[derive(Debug, Clone, Serialize)]
pub struct ShardReport {
    pub shard_id: String,
    pub healthy: bool,
    pub tables_present: Vec<String>,
    pub missing_tables: Vec<String>,
    pub error: Option<String>,
}

/// Check every shard for reachability and schema completeness
pub async fn verify_shards(manager: &ShardManager) -> Vec<ShardReport> {
    let mut reports = Vec::new();
    for store in manager.stores_snapshot().await {
        reports.push(verify_store(&store).await);
    }
    reports
}

async fn verify_store(store: &ShardStore) -> ShardReport {
    let shard_id = store.shard_id().to_string();
    let rows = match store
        .execute(
            "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
            &HashMap::new(),
        )
        .await
    {
        Ok(rows) => rows,
        Err(err) => {
            return ShardReport {
                shard_id,
                healthy: false,
                tables_present: Vec::new(),
                missing_tables: REQUIRED_TABLES.iter().map(|t| t.to_string()).collect(),
                error: Some(err.to_string()),
            }
        }
    };

    let present: Vec<String> = rows
        .iter()
        .filter_map(|row| row["name"].as_str().map(String::from))
        .collect();
    let missing: Vec<String> = REQUIRED_TABLES
        .iter()
        .filter(|t| !present.iter().any(|p| p == *t))
        .map(|t| t.to_string())
        .collect();

    ShardReport {
        shard_id,
        healthy: missing.is_empty(),
        tables_present: present,
        missing_tables: missing,
        error: None,
    }
}
