use super::events::{BatchStats, LogType, StreamEvent};
use super::handlers::{run_batch, BatchItem};
use super::sink::EventSink;
use crate::describe::Describe;
use crate::error::ClusterError;
use crate::pool::WorkerPool;
use crate::storage::partitioner::Partitioner;
use crate::storage::shard::ShardStore;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

struct QuickDescriber;

#[async_trait]
impl Describe for QuickDescriber {
    async fn describe(&self, _image: &[u8]) -> Result<String, ClusterError> {
        tokio::time::sleep(Duration::from_millis(10)).await;
        Ok("two birds on a wire".to_string())
    }
}

struct BrokenDescriber;

#[async_trait]
impl Describe for BrokenDescriber {
    async fn describe(&self, _image: &[u8]) -> Result<String, ClusterError> {
        Err(ClusterError::DescribePermanent("model offline".to_string()))
    }
}

fn item(id: &str) -> BatchItem {
    BatchItem {
        task_id: id.to_string(),
        filename: format!("{}.jpg", id),
        bytes: Bytes::from_static(b"\xff\xd8fake-jpeg-bytes"),
    }
}

fn fixtures(describer: Arc<dyn Describe>) -> (Arc<WorkerPool>, Arc<ShardStore>) {
    let partitioner = Partitioner::new(8, 2).unwrap();
    (WorkerPool::new(4, describer), ShardStore::new(partitioner))
}

/// Drains the stream and parses every `data: <json>` frame.
async fn collect_events(mut rx: UnboundedReceiver<Bytes>) -> Vec<Value> {
    let mut events = Vec::new();
    while let Some(frame) = rx.recv().await {
        let text = String::from_utf8(frame.to_vec()).unwrap();
        let json = text
            .strip_prefix("data: ")
            .and_then(|rest| rest.strip_suffix("\n\n"))
            .expect("event frame shape");
        events.push(serde_json::from_str(json).unwrap());
    }
    events
}

fn assert_stats_identity(event: &Value) {
    let stats = &event["stats"];
    let total = stats["total"].as_u64().unwrap();
    let sum = stats["pending"].as_u64().unwrap()
        + stats["processing"].as_u64().unwrap()
        + stats["completed"].as_u64().unwrap()
        + stats["errors"].as_u64().unwrap();
    assert_eq!(sum, total, "stats identity violated: {}", stats);
}

// ============================================================
// EVENT SHAPE TESTS
// ============================================================

#[test]
fn events_serialize_with_wire_field_names() {
    let processing = StreamEvent::processing("t1", 3, 2);
    let json = serde_json::to_value(&processing).unwrap();
    assert_eq!(json["type"], "result");
    assert_eq!(json["status"], "processing");
    assert_eq!(json["partition"], 3);
    assert_eq!(json["workerThread"], 2);
    assert!(json.get("description").is_none());

    let completed = StreamEvent::completed("t1", "a dog".to_string(), 3, 2, 1200);
    let json = serde_json::to_value(&completed).unwrap();
    assert_eq!(json["status"], "completed");
    assert_eq!(json["processingTime"], 1200);
    assert_eq!(json["description"], "a dog");

    let log = StreamEvent::log(LogType::Partition, "assigned");
    let json = serde_json::to_value(&log).unwrap();
    assert_eq!(json["type"], "log");
    assert_eq!(json["logType"], "partition");

    let progress = StreamEvent::Progress {
        batch_index: 1,
        total_batches: 4,
        batch_size: 10,
        total_ingested: 20,
        total_images: 40,
    };
    let json = serde_json::to_value(&progress).unwrap();
    assert_eq!(json["type"], "progress");
    assert_eq!(json["batchIndex"], 1);
    assert_eq!(json["totalBatches"], 4);
    assert_eq!(json["totalIngested"], 20);
}

#[test]
fn partitions_event_uses_item_count() {
    let partitioner = Partitioner::new(4, 1).unwrap();
    let shards = ShardStore::new(partitioner);
    shards.store("k", "v").unwrap();

    let event = StreamEvent::partitions(&shards.stats(), None);
    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(json["type"], "partitions");
    let partitions = json["partitions"].as_array().unwrap();
    assert_eq!(partitions.len(), 4);
    assert!(partitions[0].get("itemCount").is_some());
    assert!(partitions[0].get("size").is_some());
}

// ============================================================
// SINK TESTS
// ============================================================

#[tokio::test]
async fn sink_swallows_writes_after_disconnect() {
    let (sink, rx) = EventSink::channel();
    assert!(sink.emit(&StreamEvent::stats(BatchStats::new(1))));

    drop(rx);
    assert!(!sink.emit(&StreamEvent::stats(BatchStats::new(1))));
    assert!(sink.is_closed());
    // Still a no-op, still no panic.
    assert!(!sink.emit(&StreamEvent::log(LogType::Info, "late")));
}

// ============================================================
// BATCH PIPELINE TESTS
// ============================================================

#[tokio::test]
async fn batch_stream_has_processing_then_terminal_per_task() {
    let (pool, shards) = fixtures(Arc::new(QuickDescriber));
    let (sink, rx) = EventSink::channel();

    run_batch(
        pool,
        shards,
        sink,
        vec![item("a"), item("b"), item("c")],
    )
    .await;

    let events = collect_events(rx).await;

    // First event: initial stats with the full batch pending.
    assert_eq!(events[0]["type"], "stats");
    assert_eq!(events[0]["stats"]["total"], 3);
    assert_eq!(events[0]["stats"]["pending"], 3);

    for event in events.iter().filter(|e| e["type"] == "stats") {
        assert_stats_identity(event);
    }

    let results: Vec<&Value> = events.iter().filter(|e| e["type"] == "result").collect();
    let processing: Vec<&&Value> = results
        .iter()
        .filter(|e| e["status"] == "processing")
        .collect();
    let terminal: Vec<&&Value> = results
        .iter()
        .filter(|e| e["status"] == "completed" || e["status"] == "error")
        .collect();
    assert_eq!(processing.len(), 3);
    assert_eq!(terminal.len(), 3);
    assert!(processing.iter().all(|e| e.get("workerThread").is_some()));

    // Per task id, processing strictly precedes the terminal event.
    for id in ["a", "b", "c"] {
        let sequence: Vec<&str> = events
            .iter()
            .filter(|e| e["type"] == "result" && e["id"] == id)
            .map(|e| e["status"].as_str().unwrap())
            .collect();
        assert_eq!(sequence.first(), Some(&"processing"), "task {}", id);
        assert_eq!(sequence.len(), 2, "exactly one terminal event for {}", id);
    }

    // Final log is the success line.
    let last_log = events
        .iter()
        .rev()
        .find(|e| e["type"] == "log")
        .expect("a closing log event");
    assert_eq!(last_log["logType"], "success");

    // Final stats account for the whole batch.
    let final_stats = events
        .iter()
        .rev()
        .find(|e| e["type"] == "stats")
        .expect("a final stats event");
    assert_eq!(final_stats["stats"]["completed"], 3);
    assert_eq!(final_stats["stats"]["errors"], 0);
}

#[tokio::test]
async fn empty_batch_terminates_cleanly() {
    let (pool, shards) = fixtures(Arc::new(QuickDescriber));
    let (sink, rx) = EventSink::channel();

    run_batch(pool, shards, sink, vec![]).await;

    let events = collect_events(rx).await;
    assert_eq!(events[0]["type"], "stats");
    assert_eq!(events[0]["stats"]["total"], 0);
    assert!(events.iter().all(|e| e["type"] != "result"));
    assert!(events
        .iter()
        .any(|e| e["type"] == "log" && e["logType"] == "success"));
}

#[tokio::test]
async fn failing_describer_turns_every_task_into_an_error() {
    let (pool, shards) = fixtures(Arc::new(BrokenDescriber));
    let (sink, rx) = EventSink::channel();

    run_batch(pool, shards, sink, vec![item("x"), item("y")]).await;

    let events = collect_events(rx).await;
    let errors: Vec<&Value> = events
        .iter()
        .filter(|e| e["type"] == "result" && e["status"] == "error")
        .collect();
    assert_eq!(errors.len(), 2);
    assert!(errors.iter().all(|e| e.get("error").is_some()));

    let final_stats = events
        .iter()
        .rev()
        .find(|e| e["type"] == "stats")
        .unwrap();
    assert_eq!(final_stats["stats"]["errors"], 2);
    assert_eq!(final_stats["stats"]["completed"], 0);
}

#[tokio::test]
async fn batch_stores_snippets_under_the_replication_factor() {
    let (pool, shards) = fixtures(Arc::new(QuickDescriber));
    let (sink, rx) = EventSink::channel();

    run_batch(pool, shards.clone(), sink, vec![item("replicated")]).await;
    collect_events(rx).await;

    // R = 2: the filename key lands on two partitions.
    assert_eq!(shards.holders("replicated.jpg"), 2);
    let entry = shards.retrieve("replicated.jpg").unwrap();
    assert!(!entry.is_replica);
}

#[tokio::test]
async fn client_disconnect_does_not_abort_the_batch() {
    let (pool, shards) = fixtures(Arc::new(QuickDescriber));
    let (sink, rx) = EventSink::channel();

    // Client goes away before the batch even starts.
    drop(rx);

    run_batch(pool.clone(), shards, sink, vec![item("a"), item("b")]).await;

    // The pipeline ran to completion server-side.
    assert_eq!(pool.in_flight(), 0);
    let processed: u64 = pool.snapshot().iter().map(|w| w.processed).sum();
    assert_eq!(processed, 2);
}
