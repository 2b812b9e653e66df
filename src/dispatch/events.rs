//! Stream Event DTOs
//!
//! Every record the dispatcher writes to a client stream is one of these
//! variants, discriminated by the `type` field. Field names follow the wire
//! contract the browser client expects (camelCase).

use crate::pool::WorkerSnapshot;
use crate::storage::shard::StoreStats;
use serde::Serialize;

/// Running counters for one batch. The identity
/// `pending + processing + completed + errors == total` holds at every
/// emission.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct BatchStats {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub errors: usize,
}

impl BatchStats {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            pending: total,
            processing: 0,
            completed: 0,
            errors: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogType {
    Info,
    Success,
    Error,
    Worker,
    Partition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Processing,
    Completed,
    Error,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionView {
    pub id: u32,
    pub item_count: usize,
    pub size: u64,
}

/// Projects shard store stats into the wire shape.
pub fn partition_views(stats: &StoreStats) -> Vec<PartitionView> {
    stats
        .partitions
        .iter()
        .map(|p| PartitionView {
            id: p.id,
            item_count: p.item_count,
            size: p.byte_size,
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    Stats {
        stats: BatchStats,
    },
    #[serde(rename_all = "camelCase")]
    Log {
        log_type: LogType,
        message: String,
    },
    Workers {
        workers: Vec<WorkerSnapshot>,
    },
    Partitions {
        partitions: Vec<PartitionView>,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Result {
        id: String,
        status: ResultStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        partition: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        worker_thread: Option<usize>,
        #[serde(skip_serializing_if = "Option::is_none")]
        processing_time: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Error {
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    Progress {
        batch_index: usize,
        total_batches: usize,
        batch_size: usize,
        total_ingested: usize,
        total_images: usize,
    },
    #[serde(rename_all = "camelCase")]
    Complete {
        total_ingested: usize,
        dataset_name: String,
        message: String,
    },
}

impl StreamEvent {
    pub fn log(log_type: LogType, message: impl Into<String>) -> Self {
        StreamEvent::Log {
            log_type,
            message: message.into(),
        }
    }

    pub fn stats(stats: BatchStats) -> Self {
        StreamEvent::Stats { stats }
    }

    pub fn workers(workers: Vec<WorkerSnapshot>) -> Self {
        StreamEvent::Workers { workers }
    }

    pub fn partitions(stats: &StoreStats, message: Option<String>) -> Self {
        StreamEvent::Partitions {
            partitions: partition_views(stats),
            message,
        }
    }

    pub fn processing(id: &str, partition: u32, worker_thread: usize) -> Self {
        StreamEvent::Result {
            id: id.to_string(),
            status: ResultStatus::Processing,
            description: None,
            partition: Some(partition),
            worker_thread: Some(worker_thread),
            processing_time: None,
            error: None,
        }
    }

    pub fn completed(
        id: &str,
        description: String,
        partition: u32,
        worker_thread: usize,
        processing_time: u64,
    ) -> Self {
        StreamEvent::Result {
            id: id.to_string(),
            status: ResultStatus::Completed,
            description: Some(description),
            partition: Some(partition),
            worker_thread: Some(worker_thread),
            processing_time: Some(processing_time),
            error: None,
        }
    }

    pub fn failed(
        id: &str,
        error: String,
        partition: Option<u32>,
        worker_thread: Option<usize>,
        processing_time: Option<u64>,
    ) -> Self {
        StreamEvent::Result {
            id: id.to_string(),
            status: ResultStatus::Error,
            description: None,
            partition,
            worker_thread,
            processing_time,
            error: Some(error),
        }
    }
}
