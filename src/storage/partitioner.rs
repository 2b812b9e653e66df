//! Partitioner
//!
//! Maps keys to partitions and partitions to their replica sets. It ensures a
//! deterministic distribution of data that every process in the deployment can
//! compute independently.
//!
//! ## Mechanism
//! - **Hashing**: Keys are hashed to a 32-bit value with the left-shift hash
//!   below and mapped to a partition id using modulo arithmetic. The signed
//!   32-bit wrap on every step keeps the mapping byte-identical across
//!   processes, so it must not be replaced with a platform hasher.
//! - **Replication**: Copies of an item live on the partitions immediately
//!   following the primary, wrapping around the shard space.
//!
//! Note that this is plain hash-mod-P, not a consistent-hash ring: changing
//! the partition count invalidates every prior assignment.

use crate::error::ClusterError;
use std::sync::Arc;

#[derive(Debug)]
pub struct Partitioner {
    /// Total number of logical partitions (shards).
    pub num_partitions: u32,
    replication_factor: usize,
}

impl Partitioner {
    /// Creates a partitioner. Fails when the replication factor exceeds the
    /// partition count, since replicas would wrap onto the primary.
    pub fn new(num_partitions: u32, replication_factor: usize) -> Result<Arc<Self>, ClusterError> {
        if num_partitions == 0 {
            return Err(ClusterError::InvalidInput(
                "partition count must be at least 1".to_string(),
            ));
        }
        if replication_factor as u32 > num_partitions {
            return Err(ClusterError::InvalidInput(format!(
                "replication factor {} exceeds partition count {}",
                replication_factor, num_partitions
            )));
        }
        Ok(Arc::new(Self {
            num_partitions,
            replication_factor: replication_factor.max(1),
        }))
    }

    /// Raw 32-bit key hash: `h = ((h << 5) - h) + byte`, truncated to signed
    /// 32-bit arithmetic at every step.
    pub fn hash32(key: &str) -> i32 {
        let mut h: i32 = 0;
        for &byte in key.as_bytes() {
            h = h.wrapping_shl(5).wrapping_sub(h).wrapping_add(i32::from(byte));
        }
        h
    }

    /// Maps a string key to a partition id in `[0, num_partitions)`.
    ///
    /// The empty key hashes to 0 and therefore always lands on partition 0.
    pub fn partition(&self, key: &str) -> u32 {
        Self::hash32(key).unsigned_abs() % self.num_partitions
    }

    /// The ordered replica set for a primary partition.
    ///
    /// Index 0 is the primary itself; indices 1+ are the backup partitions,
    /// wrapping around the shard space. With a replication factor of 1 the
    /// result is just the primary.
    pub fn replicas(&self, primary: u32) -> Vec<u32> {
        (0..self.replication_factor as u32)
            .map(|offset| (primary + offset) % self.num_partitions)
            .collect()
    }

    pub fn replication_factor(&self) -> usize {
        self.replication_factor
    }
}
