//! Simulated Shard Store
//!
//! An in-memory mapping from partition id to a key/value table, with
//! per-partition size and count summaries. The in-process dispatch path uses
//! it to model HDFS-like placement: every stored key lands on its primary
//! partition plus the replica partitions the partitioner assigns.
//!
//! Writes are atomic per partition (a reader sees the old or the new entry,
//! never a torn one) but not across partitions: while a multi-replica write is
//! in progress a concurrent reader may see the primary updated and a replica
//! lagging. Readers are expected to read the primary.

use super::partitioner::Partitioner;
use crate::error::ClusterError;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Default cap on entries per partition before `store` fails.
pub const DEFAULT_PARTITION_CAP: usize = 10_000;

/// One stored datum inside a partition.
#[derive(Debug, Clone, Serialize)]
pub struct ShardEntry {
    pub key: String,
    /// Short excerpt of the payload, not the payload itself.
    pub payload_snippet: String,
    pub timestamp: u64,
    pub primary_partition: u32,
    pub is_replica: bool,
}

struct PartitionTable {
    entries: DashMap<String, ShardEntry>,
    byte_size: AtomicU64,
}

impl PartitionTable {
    fn new() -> Self {
        Self {
            entries: DashMap::new(),
            byte_size: AtomicU64::new(0),
        }
    }

    fn clear(&self) {
        self.entries.clear();
        self.byte_size.store(0, Ordering::SeqCst);
    }
}

/// Per-partition summary returned by `stats` and `rebalance`.
#[derive(Debug, Clone, Serialize)]
pub struct PartitionStats {
    pub id: u32,
    pub item_count: usize,
    pub byte_size: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub partitions: Vec<PartitionStats>,
    pub total_items: usize,
    pub total_bytes: u64,
}

pub struct ShardStore {
    partitioner: Arc<Partitioner>,
    partitions: DashMap<u32, PartitionTable>,
    partition_cap: usize,
}

impl ShardStore {
    pub fn new(partitioner: Arc<Partitioner>) -> Arc<Self> {
        Self::with_cap(partitioner, DEFAULT_PARTITION_CAP)
    }

    pub fn with_cap(partitioner: Arc<Partitioner>, partition_cap: usize) -> Arc<Self> {
        let partitions = DashMap::new();
        for id in 0..partitioner.num_partitions {
            partitions.insert(id, PartitionTable::new());
        }
        Arc::new(Self {
            partitioner,
            partitions,
            partition_cap,
        })
    }

    /// Places `snippet` under `key` in the primary partition and a copy in
    /// each replica partition. Returns the primary partition id.
    ///
    /// A partition at its cap rejects the write with `PartitionFull`; the
    /// caller surfaces that upstream rather than retrying.
    pub fn store(&self, key: &str, snippet: &str) -> Result<u32, ClusterError> {
        let primary = self.partitioner.partition(key);

        for (idx, partition) in self.partitioner.replicas(primary).into_iter().enumerate() {
            let table = self
                .partitions
                .get(&partition)
                .ok_or_else(|| ClusterError::NotFound(format!("partition {}", partition)))?;

            if table.entries.len() >= self.partition_cap && !table.entries.contains_key(key) {
                return Err(ClusterError::PartitionFull(partition));
            }

            let entry = ShardEntry {
                key: key.to_string(),
                payload_snippet: snippet.to_string(),
                timestamp: now_ms(),
                primary_partition: primary,
                is_replica: idx > 0,
            };

            let added = entry.payload_snippet.len() as u64 + entry.key.len() as u64;
            if let Some(previous) = table.entries.insert(key.to_string(), entry) {
                let removed = previous.payload_snippet.len() as u64 + previous.key.len() as u64;
                table.byte_size.fetch_sub(removed, Ordering::SeqCst);
            }
            table.byte_size.fetch_add(added, Ordering::SeqCst);
        }

        tracing::debug!("Stored key {:?} on primary partition {}", key, primary);
        Ok(primary)
    }

    /// Reads `key` from its primary partition.
    pub fn retrieve(&self, key: &str) -> Result<ShardEntry, ClusterError> {
        let primary = self.partitioner.partition(key);
        self.partitions
            .get(&primary)
            .and_then(|table| table.entries.get(key).map(|entry| entry.clone()))
            .ok_or_else(|| ClusterError::NotFound(key.to_string()))
    }

    /// Number of partitions that currently hold `key`. Used by the telemetry
    /// path and by replication checks.
    pub fn holders(&self, key: &str) -> usize {
        self.partitions
            .iter()
            .filter(|table| table.entries.contains_key(key))
            .count()
    }

    pub fn stats(&self) -> StoreStats {
        let mut partitions: Vec<PartitionStats> = self
            .partitions
            .iter()
            .map(|item| PartitionStats {
                id: *item.key(),
                item_count: item.value().entries.len(),
                byte_size: item.value().byte_size.load(Ordering::SeqCst),
            })
            .collect();
        partitions.sort_by_key(|stats| stats.id);

        let total_items = partitions.iter().map(|p| p.item_count).sum();
        let total_bytes = partitions.iter().map(|p| p.byte_size).sum();

        StoreStats {
            partitions,
            total_items,
            total_bytes,
        }
    }

    /// Resets one partition, or all of them when `partition` is `None`.
    pub fn clear(&self, partition: Option<u32>) {
        match partition {
            Some(id) => {
                if let Some(table) = self.partitions.get(&id) {
                    table.clear();
                }
            }
            None => {
                for table in self.partitions.iter() {
                    table.clear();
                }
            }
        }
    }

    /// Placement never actually migrates data; the hook exists so callers can
    /// observe the current layout where a real system would shuffle shards.
    pub fn rebalance(&self) -> StoreStats {
        tracing::info!("Rebalance requested; shard layout is static");
        self.stats()
    }

    pub fn partitioner(&self) -> &Arc<Partitioner> {
        &self.partitioner
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
