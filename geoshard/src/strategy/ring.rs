//! Consistent hash ring
//!
//! Immutable once built: topology changes allocate a new ring rather than
//! mutating in place, so concurrent readers always observe a complete ring.
//! Lookup walks to the first point at or after the key's hash and wraps to
//! the smallest point when the hash lies past the largest one.

use sha2::{Digest, Sha256};

/// Hash a ring key (shard virtual point or routing string) to a position.
/// SHA-256, truncated to the high 128 bits.
pub fn hash_position(key: &str) -> u128 {
    let digest = Sha256::digest(key.as_bytes());
    let mut high = [0u8; 16];
    high.copy_from_slice(&digest[..16]);
    u128::from_be_bytes(high)
}

/// Sorted ring of `(position, shard_id)` virtual points
#[derive(Debug, Clone)]
pub struct HashRing {
    points: Vec<(u128, String)>,
    points_per_shard: usize,
}

impl HashRing {
    /// Build a ring with `points_per_shard` virtual points per shard,
    /// each derived from `hash("{shard_id}:{i}")`.
    pub fn build<I, S>(shard_ids: I, points_per_shard: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut points = Vec::new();
        for shard_id in shard_ids {
            let shard_id = shard_id.as_ref();
            for i in 0..points_per_shard {
                let position = hash_position(&format!("{shard_id}:{i}"));
                points.push((position, shard_id.to_string()));
            }
        }
        // Sort by (position, shard_id) so hash collisions still resolve
        // deterministically.
        points.sort();
        Self {
            points,
            points_per_shard,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn points_per_shard(&self) -> usize {
        self.points_per_shard
    }

    /// Resolve a raw position to the owning shard: the first point with
    /// `point >= position`, wrapping to the first entry of the ring.
    pub fn locate(&self, position: u128) -> Option<&str> {
        if self.points.is_empty() {
            return None;
        }
        let idx = self.points.partition_point(|(p, _)| *p < position);
        let (_, shard_id) = self.points.get(idx).unwrap_or(&self.points[0]);
        Some(shard_id)
    }

    /// Resolve a routing string to the owning shard
    pub fn locate_key(&self, routing_key: &str) -> Option<&str> {
        self.locate(hash_position(routing_key))
    }
}
