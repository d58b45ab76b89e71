//! Shard routing observability metrics
//!
//! Provides Prometheus-compatible metrics for the routing layer including:
//! - Route resolutions per shard
//! - Operation outcomes and latency
//! - Health transitions
//! - Cross-region fan-out results
//! - Query cache hit rates
//! - Redundant relationship writes

use crate::types::ShardStatus;
use std::time::{Duration, Instant};

/// Record a key-to-shard resolution
pub fn record_route(shard_id: &str, region: &str) {
    metrics::counter!(
        "geoshard_routes_total",
        "shard" => shard_id.to_string(),
        "region" => region.to_string(),
    )
    .increment(1);
}

/// Record a completed shard operation
pub fn record_operation(shard_id: &str, operation_type: &str, success: bool, duration: Duration) {
    let status = if success { "ok" } else { "error" };
    metrics::counter!(
        "geoshard_operations_total",
        "shard" => shard_id.to_string(),
        "type" => operation_type.to_string(),
        "status" => status.to_string(),
    )
    .increment(1);

    metrics::histogram!(
        "geoshard_operation_duration_seconds",
        "shard" => shard_id.to_string(),
        "type" => operation_type.to_string(),
    )
    .record(duration.as_secs_f64());
}

/// Record an operation failure by error class
pub fn record_operation_error(shard_id: &str, error_type: &str) {
    metrics::counter!(
        "geoshard_operation_errors_total",
        "shard" => shard_id.to_string(),
        "error_type" => error_type.to_string(),
    )
    .increment(1);
}

/// Record a health-driven status transition
pub fn record_health_transition(shard_id: &str, from: &str, to: &str) {
    metrics::counter!(
        "geoshard_health_transitions_total",
        "shard" => shard_id.to_string(),
        "from" => from.to_string(),
        "to" => to.to_string(),
    )
    .increment(1);
}

/// Record the outcome of one region within a cross-region fan-out
pub fn record_fanout_result(region: &str, success: bool) {
    let status = if success { "ok" } else { "error" };
    metrics::counter!(
        "geoshard_fanout_regions_total",
        "region" => region.to_string(),
        "status" => status.to_string(),
    )
    .increment(1);
}

/// Record a query cache lookup
pub fn record_cache_lookup(hit: bool) {
    let outcome = if hit { "hit" } else { "miss" };
    metrics::counter!(
        "geoshard_query_cache_lookups_total",
        "outcome" => outcome.to_string(),
    )
    .increment(1);
}

/// Record a redundant relationship write outcome
pub fn record_relationship_write(outcome: &str) {
    metrics::counter!(
        "geoshard_relationship_writes_total",
        "outcome" => outcome.to_string(),
    )
    .increment(1);
}

/// Update per-shard status gauge (1 for the current status, 0 otherwise)
pub fn update_shard_status(shard_id: &str, status: ShardStatus) {
    for candidate in [
        ShardStatus::Active,
        ShardStatus::Scaling,
        ShardStatus::Migrating,
        ShardStatus::Maintenance,
        ShardStatus::Inactive,
    ] {
        let value = if candidate == status { 1.0 } else { 0.0 };
        metrics::gauge!(
            "geoshard_shard_status",
            "shard" => shard_id.to_string(),
            "status" => candidate.as_str().to_string(),
        )
        .set(value);
    }
}

/// Update the topology gauges from a registry snapshot
pub fn update_topology(total_shards: usize, active_shards: usize) {
    metrics::gauge!("geoshard_shards_total").set(total_shards as f64);
    metrics::gauge!("geoshard_shards_active").set(active_shards as f64);
}

/// Measures an operation's wall time and records it on drop
pub struct OperationTimer {
    shard_id: String,
    operation_type: String,
    start: Instant,
    success: bool,
}

impl OperationTimer {
    pub fn start(shard_id: &str, operation_type: &str) -> Self {
        Self {
            shard_id: shard_id.to_string(),
            operation_type: operation_type.to_string(),
            start: Instant::now(),
            success: false,
        }
    }

    pub fn succeed(mut self) {
        self.success = true;
    }
}

impl Drop for OperationTimer {
    fn drop(&mut self) {
        record_operation(
            &self.shard_id,
            &self.operation_type,
            self.success,
            self.start.elapsed(),
        );
    }
}
