//! TTL cache for cross-shard query results
//!
//! Keys are derived from the query text, so the same query fans out to the
//! cache before the shards. Scoped keys carry the routing region and entity
//! type; unscoped queries share a global namespace. Expiry is lazy, with an
//! explicit `purge_expired` sweep for long-running processes.

use crate::metrics;
use crate::types::ShardKey;
use parking_lot::RwLock;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

const DEFAULT_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

struct Entry {
    expires_at: Instant,
    rows: Vec<Value>,
}

pub struct QueryCache {
    entries: RwLock<HashMap<String, Entry>>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl QueryCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Cache key for a query, scoped to the routing key when one exists
    pub fn key_for(query: &str, shard_key: Option<&ShardKey>) -> String {
        let digest = hex::encode(Sha256::digest(query.as_bytes()));
        match shard_key {
            Some(key) => format!(
                "query:{digest}:shard:{}:{}",
                key.region.as_str(),
                key.entity_type
            ),
            None => format!("query:{digest}:global"),
        }
    }

    pub fn get(&self, key: &str) -> Option<Vec<Value>> {
        let hit = {
            let entries = self.entries.read();
            entries
                .get(key)
                .filter(|e| e.expires_at > Instant::now())
                .map(|e| e.rows.clone())
        };
        match hit {
            Some(rows) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                metrics::record_cache_lookup(true);
                Some(rows)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                metrics::record_cache_lookup(false);
                None
            }
        }
    }

    pub fn set(&self, key: impl Into<String>, rows: Vec<Value>) {
        self.set_with_ttl(key, rows, self.ttl);
    }

    pub fn set_with_ttl(&self, key: impl Into<String>, rows: Vec<Value>, ttl: Duration) {
        self.entries.write().insert(
            key.into(),
            Entry {
                expires_at: Instant::now() + ttl,
                rows,
            },
        );
    }

    /// Drop every entry whose TTL has passed
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.entries.write().retain(|_, e| e.expires_at > now);
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.read().len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}
