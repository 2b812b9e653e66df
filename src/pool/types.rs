use crate::error::ClusterError;
use bytes::Bytes;
use serde::Serialize;
use std::sync::Arc;

/// A unit of work handed to the pool: one image to describe.
#[derive(Debug, Clone)]
pub struct PoolTask {
    pub task_id: String,
    pub filename: String,
    pub payload: Bytes,
    pub partition: u32,
    pub submitted_at: u64,
}

/// Successful terminal outcome of a pool task.
#[derive(Debug, Clone)]
pub struct PoolCompletion {
    pub description: String,
    pub worker_id: usize,
    pub elapsed_ms: u64,
}

/// Failed terminal outcome. Carries the worker that attempted the task so the
/// dispatcher can attribute the failure in its result event.
#[derive(Debug)]
pub struct PoolFailure {
    pub error: ClusterError,
    pub worker_id: usize,
    pub elapsed_ms: u64,
}

/// Mutable record for one worker slot. Owned by the pool; the coordinator
/// mutates it at assignment, the worker's completion path at release.
#[derive(Debug)]
pub(crate) struct WorkerSlot {
    pub id: usize,
    pub busy: bool,
    pub processed: u64,
    pub current_task: Option<String>,
}

impl WorkerSlot {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            busy: false,
            processed: 0,
            current_task: None,
        }
    }
}

/// Read-only view of a worker slot, as exposed on the event stream.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerSnapshot {
    pub id: usize,
    pub busy: bool,
    pub processed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_task: Option<String>,
}

/// Invoked by the coordinator right before a task starts executing, with
/// `(worker_id, queue_size_after_pop, task_id)`. The only coupling between
/// the pool and the streaming dispatcher.
pub type AssignmentHook = Arc<dyn Fn(usize, usize, &str) + Send + Sync>;

pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
