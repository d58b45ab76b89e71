//! Core vocabulary for shard routing: regions, shard descriptors, keys,
//! operations and metrics snapshots.

use crate::error::{Result, ShardError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Geographic zones used as the partition dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Region {
    NaEast,
    NaWest,
    EuWest,
    EuCentral,
    AsiaEast,
    AsiaSouth,
    Oceania,
}

impl Region {
    /// All known regions, in a stable order
    pub fn all() -> &'static [Region] {
        &[
            Region::NaEast,
            Region::NaWest,
            Region::EuWest,
            Region::EuCentral,
            Region::AsiaEast,
            Region::AsiaSouth,
            Region::Oceania,
        ]
    }

    /// Wire string for this region (matches the serde representation)
    pub fn as_str(&self) -> &'static str {
        match self {
            Region::NaEast => "na-east",
            Region::NaWest => "na-west",
            Region::EuWest => "eu-west",
            Region::EuCentral => "eu-central",
            Region::AsiaEast => "asia-east",
            Region::AsiaSouth => "asia-south",
            Region::Oceania => "oceania",
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Region {
    type Err = ShardError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "na-east" => Ok(Region::NaEast),
            "na-west" => Ok(Region::NaWest),
            "eu-west" => Ok(Region::EuWest),
            "eu-central" => Ok(Region::EuCentral),
            "asia-east" => Ok(Region::AsiaEast),
            "asia-south" => Ok(Region::AsiaSouth),
            "oceania" => Ok(Region::Oceania),
            other => Err(ShardError::Config(format!("unknown region: {other}"))),
        }
    }
}

/// Role a shard plays within its region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShardType {
    Primary,
    Replica,
    Analytics,
}

/// Lifecycle status of a shard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShardStatus {
    Active,
    Scaling,
    Migrating,
    Maintenance,
    Inactive,
}

impl ShardStatus {
    /// Get status as a string for metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            ShardStatus::Active => "active",
            ShardStatus::Scaling => "scaling",
            ShardStatus::Migrating => "migrating",
            ShardStatus::Maintenance => "maintenance",
            ShardStatus::Inactive => "inactive",
        }
    }
}

/// Descriptor for one physical/logical shard. Identity is `shard_id`,
/// derived as `{region}-{index}`. The connection pool behind
/// `connection_string` is exclusively owned by the `ShardManager`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardInfo {
    pub shard_id: String,
    pub region: Region,
    pub shard_type: ShardType,
    pub status: ShardStatus,
    pub connection_string: String,
    pub max_connections: u32,
    pub current_connections: u32,
    pub created_at: DateTime<Utc>,
    pub last_health_check: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl ShardInfo {
    /// Create a primary shard descriptor with default connection limits
    pub fn new(region: Region, index: usize, connection_string: impl Into<String>) -> Self {
        Self {
            shard_id: format!("{}-{}", region.as_str(), index),
            region,
            shard_type: ShardType::Primary,
            status: ShardStatus::Active,
            connection_string: connection_string.into(),
            max_connections: 100,
            current_connections: 0,
            created_at: Utc::now(),
            last_health_check: None,
            metadata: HashMap::new(),
        }
    }
}

/// Routing key: the sole input the strategy uses to place an entity.
///
/// Serializes deterministically to `region:entity_type:entity_id[:tenant_id]`
/// and parses back losslessly. Components must not contain `:`; the optional
/// timestamp does not participate in routing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardKey {
    pub region: Region,
    pub entity_type: String,
    pub entity_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ShardKey {
    pub fn new(region: Region, entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self {
            region,
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            tenant_id: None,
            timestamp: None,
        }
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    /// Serialize to the routing string fed to the hash ring
    pub fn to_routing_key(&self) -> String {
        match &self.tenant_id {
            Some(tenant) => format!(
                "{}:{}:{}:{}",
                self.region.as_str(),
                self.entity_type,
                self.entity_id,
                tenant
            ),
            None => format!(
                "{}:{}:{}",
                self.region.as_str(),
                self.entity_type,
                self.entity_id
            ),
        }
    }

    /// Parse a routing string produced by [`to_routing_key`](Self::to_routing_key)
    pub fn from_routing_key(routing_key: &str) -> Result<Self> {
        let parts: Vec<&str> = routing_key.split(':').collect();
        if parts.len() < 3 || parts.len() > 4 {
            return Err(ShardError::Routing(format!(
                "malformed routing key: {routing_key}"
            )));
        }
        if parts[1].is_empty() || parts[2].is_empty() {
            return Err(ShardError::Routing(format!(
                "routing key has empty components: {routing_key}"
            )));
        }
        Ok(Self {
            region: parts[0].parse()?,
            entity_type: parts[1].to_string(),
            entity_id: parts[2].to_string(),
            tenant_id: parts.get(3).map(|t| t.to_string()),
            timestamp: None,
        })
    }
}

/// Kind of work a shard operation performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Read,
    Write,
    Delete,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Read => "read",
            OperationType::Write => "write",
            OperationType::Delete => "delete",
        }
    }
}

/// A unit of work routed to one or more shards. Constructed per call,
/// never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardOperation {
    pub shard_key: ShardKey,
    pub operation_type: OperationType,
    pub query: String,
    #[serde(default)]
    pub parameters: HashMap<String, Value>,
    #[serde(default)]
    pub requires_transaction: bool,
    #[serde(default)]
    pub cross_shard: bool,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_timeout_seconds() -> u64 {
    30
}

impl ShardOperation {
    pub fn new(shard_key: ShardKey, operation_type: OperationType, query: impl Into<String>) -> Self {
        Self {
            shard_key,
            operation_type,
            query: query.into(),
            parameters: HashMap::new(),
            requires_transaction: false,
            cross_shard: false,
            timeout_seconds: default_timeout_seconds(),
        }
    }

    pub fn with_parameters(mut self, parameters: HashMap<String, Value>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn transactional(mut self) -> Self {
        self.requires_transaction = true;
        self
    }

    /// Fan the operation out to every shard in the key's region
    pub fn cross_shard(mut self) -> Self {
        self.cross_shard = true;
        self
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }
}

/// Persisted relationship record, stored redundantly on both the source
/// and target shards so either side survives the loss of the other.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossShardMapping {
    pub id: Uuid,
    pub source_id: String,
    pub source_region: Region,
    pub target_id: String,
    pub target_region: Region,
    pub relationship_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
}

impl CrossShardMapping {
    pub fn new(
        source_id: impl Into<String>,
        source_region: Region,
        target_id: impl Into<String>,
        target_region: Region,
        relationship_type: impl Into<String>,
        metadata: Option<Value>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_id: source_id.into(),
            source_region,
            target_id: target_id.into(),
            target_region,
            relationship_type: relationship_type.into(),
            metadata,
            created_at: Utc::now(),
        }
    }
}

/// Ephemeral metrics snapshot, computed on demand from the registry and
/// the manager's operation counters. Never stored as source of truth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardingMetrics {
    pub total_shards: usize,
    pub active_shards: usize,
    pub total_connections: u32,
    pub max_connections: u32,
    /// total_connections / max_connections, in [0, 1]
    pub connection_utilization: f64,
    pub data_size_gb: f64,
    pub queries_per_second: f64,
    pub cross_shard_queries_percent: f64,
    /// Placeholder until replica shards carry real lag instrumentation
    pub replication_lag_seconds: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_wire_roundtrip() {
        for region in Region::all() {
            let parsed: Region = region.as_str().parse().unwrap();
            assert_eq!(parsed, *region);
        }
    }

    #[test]
    fn test_region_serde_matches_as_str() {
        let json = serde_json::to_string(&Region::EuCentral).unwrap();
        assert_eq!(json, "\"eu-central\"");
        let back: Region = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Region::EuCentral);
    }

    #[test]
    fn test_unknown_region_rejected() {
        let err = "mars-north".parse::<Region>().unwrap_err();
        assert_eq!(err.error_type(), "config");
    }

    #[test]
    fn test_routing_key_without_tenant() {
        let key = ShardKey::new(Region::NaEast, "job", "j-1");
        assert_eq!(key.to_routing_key(), "na-east:job:j-1");

        let parsed = ShardKey::from_routing_key("na-east:job:j-1").unwrap();
        assert_eq!(parsed.region, Region::NaEast);
        assert_eq!(parsed.entity_type, "job");
        assert_eq!(parsed.entity_id, "j-1");
        assert_eq!(parsed.tenant_id, None);
    }

    #[test]
    fn test_routing_key_with_tenant() {
        let key = ShardKey::new(Region::AsiaEast, "user", "u-42").with_tenant("acme");
        let routing = key.to_routing_key();
        assert_eq!(routing, "asia-east:user:u-42:acme");

        let parsed = ShardKey::from_routing_key(&routing).unwrap();
        assert_eq!(parsed, key);
    }

    #[test]
    fn test_malformed_routing_keys_rejected() {
        assert!(ShardKey::from_routing_key("na-east:job").is_err());
        assert!(ShardKey::from_routing_key("na-east:job:j-1:t:extra").is_err());
        assert!(ShardKey::from_routing_key("nowhere:job:j-1").is_err());
        assert!(ShardKey::from_routing_key("na-east::j-1").is_err());
    }

    #[test]
    fn test_shard_id_derivation() {
        let shard = ShardInfo::new(Region::EuWest, 3, ":memory:");
        assert_eq!(shard.shard_id, "eu-west-3");
        assert_eq!(shard.region, Region::EuWest);
        assert_eq!(shard.status, ShardStatus::Active);
    }

    #[test]
    fn test_operation_builder() {
        let key = ShardKey::new(Region::NaEast, "job", "j-1");
        let op = ShardOperation::new(key, OperationType::Write, "INSERT INTO jobs VALUES (:id)")
            .transactional()
            .with_timeout(5);
        assert!(op.requires_transaction);
        assert!(!op.cross_shard);
        assert_eq!(op.timeout_seconds, 5);
    }
}
