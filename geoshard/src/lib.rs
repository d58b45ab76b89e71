//! Geoshard - Region-aware shard routing over embedded SQLite stores
//!
//! This crate places entities on shards by consistent hashing within their
//! home region and executes routed SQL against the shard stores it owns.
//!
//! # Architecture
//!
//! - **Strategy**: Per-region consistent-hash rings, plus a latency-aware
//!   geographic variant for read placement
//! - **Manager**: Authoritative shard registry, topology changes, routed
//!   operation execution with per-shard timeouts
//! - **Store**: One SQLite connection per shard, JSON in, JSON out
//! - **Router**: Bulk per-shard transactional batches and cross-region
//!   fan-out with per-region failure isolation
//! - **Query**: Bounded parallel fan-out, key-aware planning, TTL result
//!   cache
//! - **Relationships**: Redundant dual-write cross-shard relationship
//!   store with partial-failure reporting
//! - **Health**: Background probe loop driving advisory status
//!   transitions
//!
//! # Key Operations
//!
//! - Routing: get_shard, optimal_route, shards_for_operation
//! - Execution: execute_operation, bulk_execute, execute_cross_region
//! - Topology: add_shard, remove_shard (migration-guarded)
//! - Relationships: create, delete, get_related_objects
//! - Provisioning: bootstrap_all, verify_shards

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod health;
pub mod manager;
pub mod metrics;
pub mod query;
pub mod relationships;
pub mod router;
pub mod store;
pub mod strategy;
pub mod types;

pub use bootstrap::{ShardReport, REQUIRED_TABLES};
pub use config::{FailureAction, HealthConfig, ShardConfig};
pub use error::{Result, ShardError};
pub use health::{HealthEvent, HealthMonitor};
pub use manager::ShardManager;
pub use query::{CacheStats, QueryCache, QueryOptimizer, QueryPlanner};
pub use relationships::RelationshipManager;
pub use router::ShardRouter;
pub use store::ShardStore;
pub use strategy::{
    build_strategy, GeographicStrategy, HashRing, LatencyTable, RegionStrategy, ShardStrategy,
    StrategyKind,
};
pub use types::{
    CrossShardMapping, OperationType, Region, ShardInfo, ShardKey, ShardOperation, ShardStatus,
    ShardType, ShardingMetrics,
};
