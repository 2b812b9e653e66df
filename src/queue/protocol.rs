//! Queue Plane Protocol
//!
//! HTTP contracts between worker processes and the queue plane. Worker
//! processes are the only consumers; the dispatcher enqueues in-process.

use super::queue::RegisteredWorker;
use super::types::{FailOutcome, QueueDepth, QueuedJob};
use serde::{Deserialize, Serialize};

// --- API Endpoints ---

/// Registers a worker process and its partition assignment.
pub const ENDPOINT_REGISTER: &str = "/queue/register";
/// Hands out the best eligible job for a worker's partitions.
pub const ENDPOINT_LEASE: &str = "/queue/lease";
/// Extends a held lease during a long describe call.
pub const ENDPOINT_RENEW: &str = "/queue/renew";
/// Reports terminal success.
pub const ENDPOINT_COMPLETE: &str = "/queue/complete";
/// Reports a failed attempt (the plane decides retry vs terminal).
pub const ENDPOINT_FAIL: &str = "/queue/fail";
/// Nacks a mis-routed job back without consuming an attempt.
pub const ENDPOINT_RELEASE: &str = "/queue/release";
/// Queue depth and registered workers.
pub const ENDPOINT_DEPTH: &str = "/queue/depth";

// --- Data Transfer Objects ---

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub worker_id: usize,
    pub partitions: Vec<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LeaseRequest {
    pub worker_id: usize,
    pub partitions: Vec<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LeaseResponse {
    /// `None` when no eligible job exists for the worker's partitions.
    pub job: Option<QueuedJob>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RenewRequest {
    pub worker_id: usize,
    pub partition: u32,
    pub task_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CompleteRequest {
    pub worker_id: usize,
    pub partition: u32,
    pub task_id: String,
    pub description: String,
    pub elapsed_ms: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FailRequest {
    pub worker_id: usize,
    pub partition: u32,
    pub task_id: String,
    pub error_kind: String,
    pub message: String,
    pub retryable: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FailResponse {
    pub outcome: FailOutcome,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReleaseRequest {
    pub worker_id: usize,
    pub partition: u32,
    pub task_id: String,
    pub delay_ms: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AckResponse {
    pub success: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DepthResponse {
    pub depth: QueueDepth,
    pub workers: Vec<RegisteredWorker>,
}
