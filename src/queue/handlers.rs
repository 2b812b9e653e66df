//! Queue Plane Handlers
//!
//! Axum handlers exposing the queue plane to worker processes. These
//! translate HTTP requests into `JobQueue` calls; all decisions (affinity,
//! backoff, stall budget) live in the queue itself.

use super::protocol::*;
use super::queue::JobQueue;
use crate::error::ClusterError;

use axum::{extract::Extension, http::StatusCode, Json};
use std::sync::Arc;

fn error_status(err: &ClusterError) -> StatusCode {
    match err {
        ClusterError::NotFound(_) => StatusCode::NOT_FOUND,
        ClusterError::InvalidInput(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub async fn handle_register(
    Extension(queue): Extension<Arc<JobQueue>>,
    Json(req): Json<RegisterRequest>,
) -> (StatusCode, Json<AckResponse>) {
    queue.register_worker(req.worker_id, req.partitions);
    (StatusCode::OK, Json(AckResponse { success: true }))
}

pub async fn handle_lease(
    Extension(queue): Extension<Arc<JobQueue>>,
    Json(req): Json<LeaseRequest>,
) -> (StatusCode, Json<LeaseResponse>) {
    let job = queue.lease(req.worker_id, &req.partitions);
    (StatusCode::OK, Json(LeaseResponse { job }))
}

pub async fn handle_renew(
    Extension(queue): Extension<Arc<JobQueue>>,
    Json(req): Json<RenewRequest>,
) -> (StatusCode, Json<AckResponse>) {
    match queue.renew(req.partition, &req.task_id, req.worker_id) {
        Ok(()) => (StatusCode::OK, Json(AckResponse { success: true })),
        Err(e) => {
            tracing::debug!("Renew rejected for {}: {}", req.task_id, e);
            (error_status(&e), Json(AckResponse { success: false }))
        }
    }
}

pub async fn handle_complete(
    Extension(queue): Extension<Arc<JobQueue>>,
    Json(req): Json<CompleteRequest>,
) -> (StatusCode, Json<AckResponse>) {
    match queue.complete(
        req.partition,
        &req.task_id,
        req.worker_id,
        req.description,
        req.elapsed_ms,
    ) {
        Ok(_) => (StatusCode::OK, Json(AckResponse { success: true })),
        Err(e) => {
            tracing::warn!("Complete rejected for {}: {}", req.task_id, e);
            (error_status(&e), Json(AckResponse { success: false }))
        }
    }
}

pub async fn handle_fail(
    Extension(queue): Extension<Arc<JobQueue>>,
    Json(req): Json<FailRequest>,
) -> (StatusCode, Json<FailResponse>) {
    match queue.fail(
        req.partition,
        &req.task_id,
        req.worker_id,
        &req.error_kind,
        &req.message,
        req.retryable,
    ) {
        Ok(outcome) => (StatusCode::OK, Json(FailResponse { outcome })),
        Err(e) => {
            tracing::warn!("Fail report rejected for {}: {}", req.task_id, e);
            (
                error_status(&e),
                Json(FailResponse {
                    outcome: super::types::FailOutcome::Terminal,
                }),
            )
        }
    }
}

pub async fn handle_release(
    Extension(queue): Extension<Arc<JobQueue>>,
    Json(req): Json<ReleaseRequest>,
) -> (StatusCode, Json<AckResponse>) {
    match queue.release(req.partition, &req.task_id, req.worker_id, req.delay_ms) {
        Ok(()) => (StatusCode::OK, Json(AckResponse { success: true })),
        Err(e) => {
            tracing::warn!("Release rejected for {}: {}", req.task_id, e);
            (error_status(&e), Json(AckResponse { success: false }))
        }
    }
}

pub async fn handle_depth(
    Extension(queue): Extension<Arc<JobQueue>>,
) -> (StatusCode, Json<DepthResponse>) {
    (
        StatusCode::OK,
        Json(DepthResponse {
            depth: queue.depth(),
            workers: queue.registered_workers(),
        }),
    )
}
