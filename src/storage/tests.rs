use super::object::{MemoryObjectStore, ObjectStore};
use super::partitioner::Partitioner;
use super::shard::ShardStore;
use crate::error::ClusterError;
use bytes::Bytes;
use std::collections::HashMap;

// ============================================================
// PARTITIONER TESTS
// ============================================================

#[test]
fn partition_is_deterministic() {
    let partitioner = Partitioner::new(8, 1).unwrap();

    let p1 = partitioner.partition("image_001.jpg");
    let p2 = partitioner.partition("image_001.jpg");
    assert_eq!(p1, p2, "same key must map to the same partition");
    assert!(p1 < 8);
}

#[test]
fn empty_key_lands_on_partition_zero() {
    let partitioner = Partitioner::new(8, 1).unwrap();
    assert_eq!(Partitioner::hash32(""), 0);
    assert_eq!(partitioner.partition(""), 0);
}

#[test]
fn hash_matches_signed_32bit_reference() {
    // Reference values computed with ((h << 5) - h) + c over wrapping i32.
    let mut expected: i32 = 0;
    for &byte in "image_001.jpg".as_bytes() {
        expected = expected
            .wrapping_mul(31)
            .wrapping_add(i32::from(byte));
    }
    assert_eq!(Partitioner::hash32("image_001.jpg"), expected);
}

#[test]
fn partition_is_within_range() {
    let partitioner = Partitioner::new(8, 1).unwrap();
    for i in 0..1000 {
        let key = format!("test_key_{}", i);
        let partition = partitioner.partition(&key);
        assert!(
            partition < partitioner.num_partitions,
            "partition {} should be < {}",
            partition,
            partitioner.num_partitions
        );
    }
}

#[test]
fn partition_distribution_is_reasonable() {
    let partitioner = Partitioner::new(8, 1).unwrap();

    let mut counts = HashMap::new();
    for i in 0..10_000 {
        let key = format!("image_{:05}.jpg", i);
        *counts.entry(partitioner.partition(&key)).or_insert(0usize) += 1;
    }

    // With 8 partitions and 10k keys every partition should see traffic.
    assert_eq!(counts.len(), 8, "all partitions should receive keys");
    for (partition, count) in counts {
        assert!(
            count > 500,
            "partition {} only received {} keys",
            partition,
            count
        );
    }
}

#[test]
fn replicas_follow_primary_and_wrap() {
    let partitioner = Partitioner::new(4, 3).unwrap();
    assert_eq!(partitioner.replicas(1), vec![1, 2, 3]);
    assert_eq!(partitioner.replicas(3), vec![3, 0, 1]);
}

#[test]
fn replication_factor_one_means_primary_only() {
    let partitioner = Partitioner::new(4, 1).unwrap();
    assert_eq!(partitioner.replicas(2), vec![2]);
}

#[test]
fn replication_factor_above_partition_count_is_rejected() {
    let err = Partitioner::new(4, 5).unwrap_err();
    assert!(matches!(err, ClusterError::InvalidInput(_)));
}

// ============================================================
// SHARD STORE TESTS
// ============================================================

#[test]
fn store_and_retrieve_roundtrip() {
    let partitioner = Partitioner::new(4, 2).unwrap();
    let store = ShardStore::new(partitioner.clone());

    let primary = store.store("k1", "payload-snippet").unwrap();
    assert_eq!(primary, partitioner.partition("k1"));

    let entry = store.retrieve("k1").unwrap();
    assert_eq!(entry.payload_snippet, "payload-snippet");
    assert_eq!(entry.primary_partition, primary);
    assert!(!entry.is_replica);
}

#[test]
fn replicated_write_touches_exactly_r_partitions() {
    let partitioner = Partitioner::new(4, 2).unwrap();
    let store = ShardStore::new(partitioner.clone());

    let primary = store.store("k1", "v").unwrap();
    let backup = (primary + 1) % 4;

    let stats = store.stats();
    assert_eq!(stats.partitions[primary as usize].item_count, 1);
    assert_eq!(stats.partitions[backup as usize].item_count, 1);
    assert_eq!(stats.total_items, 2);
    assert_eq!(store.holders("k1"), 2);
}

#[test]
fn retrieve_missing_key_is_not_found() {
    let partitioner = Partitioner::new(4, 1).unwrap();
    let store = ShardStore::new(partitioner);
    assert!(matches!(
        store.retrieve("missing"),
        Err(ClusterError::NotFound(_))
    ));
}

#[test]
fn overwrite_keeps_counters_consistent() {
    let partitioner = Partitioner::new(4, 1).unwrap();
    let store = ShardStore::new(partitioner.clone());

    store.store("k1", "short").unwrap();
    store.store("k1", "a-much-longer-snippet").unwrap();

    let entry = store.retrieve("k1").unwrap();
    assert_eq!(entry.payload_snippet, "a-much-longer-snippet");

    let stats = store.stats();
    let partition = partitioner.partition("k1") as usize;
    assert_eq!(stats.partitions[partition].item_count, 1);
    assert_eq!(
        stats.partitions[partition].byte_size,
        ("k1".len() + "a-much-longer-snippet".len()) as u64
    );
}

#[test]
fn full_partition_rejects_store() {
    let partitioner = Partitioner::new(1, 1).unwrap();
    let store = ShardStore::with_cap(partitioner, 2);

    store.store("a", "1").unwrap();
    store.store("b", "2").unwrap();

    let err = store.store("c", "3").unwrap_err();
    assert!(matches!(err, ClusterError::PartitionFull(0)));

    // Overwriting an existing key is still allowed at the cap.
    store.store("a", "updated").unwrap();
}

#[test]
fn clear_resets_one_or_all_partitions() {
    let partitioner = Partitioner::new(4, 1).unwrap();
    let store = ShardStore::new(partitioner.clone());

    for i in 0..20 {
        store.store(&format!("key-{}", i), "v").unwrap();
    }
    assert_eq!(store.stats().total_items, 20);

    let victim = partitioner.partition("key-0");
    store.clear(Some(victim));
    assert_eq!(store.stats().partitions[victim as usize].item_count, 0);
    assert!(store.stats().total_items < 20);

    store.clear(None);
    let stats = store.stats();
    assert_eq!(stats.total_items, 0);
    assert_eq!(stats.total_bytes, 0);
}

#[test]
fn rebalance_is_a_stats_snapshot() {
    let partitioner = Partitioner::new(4, 1).unwrap();
    let store = ShardStore::new(partitioner);
    store.store("k", "v").unwrap();

    let before = store.stats();
    let after = store.rebalance();
    assert_eq!(before.total_items, after.total_items);
    assert_eq!(before.partitions.len(), after.partitions.len());
}

// ============================================================
// MEMORY OBJECT STORE TESTS
// ============================================================

#[tokio::test]
async fn object_store_put_get_remove() {
    let store = MemoryObjectStore::new();
    store.make_bucket("bigdata-images", "us-east-1").await.unwrap();

    store
        .put_object(
            "bigdata-images",
            "partition-0/abc.jpg",
            Bytes::from_static(b"jpeg-bytes"),
            "image/jpeg",
            HashMap::new(),
        )
        .await
        .unwrap();

    let bytes = store
        .get_object("bigdata-images", "partition-0/abc.jpg")
        .await
        .unwrap();
    assert_eq!(bytes.as_ref(), b"jpeg-bytes");

    store
        .remove_object("bigdata-images", "partition-0/abc.jpg")
        .await
        .unwrap();
    assert!(matches!(
        store.get_object("bigdata-images", "partition-0/abc.jpg").await,
        Err(ClusterError::NotFound(_))
    ));
}

#[tokio::test]
async fn object_store_list_filters_by_prefix() {
    let store = MemoryObjectStore::new();
    for key in ["partition-0/a.jpg", "partition-0/b.jpg", "partition-1/c.jpg"] {
        store
            .put_object("b", key, Bytes::from_static(b"x"), "image/jpeg", HashMap::new())
            .await
            .unwrap();
    }

    let listed = store.list_objects("b", "partition-0/").await.unwrap();
    assert_eq!(listed.len(), 2);
    assert!(listed.iter().all(|o| o.key.starts_with("partition-0/")));
}

#[tokio::test]
async fn object_store_bucket_lifecycle() {
    let store = MemoryObjectStore::new();
    assert!(!store.bucket_exists("results").await.unwrap());
    store.make_bucket("results", "us-east-1").await.unwrap();
    assert!(store.bucket_exists("results").await.unwrap());
}
