//! Streaming Dispatcher
//!
//! Request-scoped orchestration. `/process` fuses ingestion, partition
//! assignment, submission and result streaming into one backpressure-aware
//! pipeline; `/ingest` seeds the distributed path; `/health` and `/worker`
//! expose the operational surface.
//!
//! The batch pipeline prepares and submits every task before awaiting any
//! completion, so the worker pool's queue is saturated from the first
//! dispatch. Awaiting tasks inline would serialize the batch and leave all
//! but one worker idle.

use super::events::{BatchStats, LogType, StreamEvent};
use super::sink::{stream_response, EventSink};
use crate::config::IMAGES_BUCKET;
use crate::error::ClusterError;
use crate::pool::{pool::recv_failure, PoolTask, WorkerPool};
use crate::queue::types::now_ms;
use crate::queue::worker::WorkerSupervisor;
use crate::queue::{JobPriority, JobQueue, JobSpec};
use crate::storage::object::ObjectStore;
use crate::storage::partitioner::Partitioner;
use crate::storage::shard::ShardStore;

use axum::extract::{Extension, Multipart};
use axum::http::StatusCode;
use axum::response::Response;
use axum::Json;
use bytes::Bytes;
use dashmap::DashMap;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Bytes of payload kept as the shard store snippet.
const SNIPPET_BYTES: usize = 32;
/// Default `/ingest` chunk size when the client sends none.
const DEFAULT_INGEST_BATCH: usize = 10;

/// One image lifted out of the multipart body.
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub task_id: String,
    pub filename: String,
    pub bytes: Bytes,
}

struct ParsedUpload {
    items: Vec<BatchItem>,
    fields: HashMap<String, String>,
}

/// Reads the whole multipart body: repeated `images` file parts, repeated
/// `imageIds` text parts aligned by index, plus any extra text fields.
async fn parse_upload(mut multipart: Multipart) -> Result<ParsedUpload, ClusterError> {
    let mut images: Vec<(Option<String>, Bytes)> = Vec::new();
    let mut ids: Vec<String> = Vec::new();
    let mut fields = HashMap::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ClusterError::InvalidInput(format!("malformed multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "images" => {
                let filename = field.file_name().map(|f| f.to_string());
                let bytes = field.bytes().await.map_err(|e| {
                    ClusterError::InvalidInput(format!("unreadable image part: {}", e))
                })?;
                if bytes.is_empty() {
                    return Err(ClusterError::InvalidInput(format!(
                        "empty image part {:?}",
                        filename.unwrap_or_default()
                    )));
                }
                images.push((filename, bytes));
            }
            "imageIds" => {
                let id = field.text().await.map_err(|e| {
                    ClusterError::InvalidInput(format!("unreadable imageIds part: {}", e))
                })?;
                ids.push(id);
            }
            other => {
                let value = field.text().await.map_err(|e| {
                    ClusterError::InvalidInput(format!("unreadable field {:?}: {}", other, e))
                })?;
                fields.insert(other.to_string(), value);
            }
        }
    }

    let items = images
        .into_iter()
        .enumerate()
        .map(|(index, (filename, bytes))| {
            let task_id = ids
                .get(index)
                .filter(|id| !id.is_empty())
                .cloned()
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            BatchItem {
                task_id,
                filename: filename.unwrap_or_else(|| format!("upload-{}.jpg", index)),
                bytes,
            }
        })
        .collect();

    Ok(ParsedUpload { items, fields })
}

// ============================================================
// /process
// ============================================================

pub async fn handle_process(
    Extension(pool): Extension<Arc<WorkerPool>>,
    Extension(shards): Extension<Arc<ShardStore>>,
    multipart: Multipart,
) -> Response {
    let (sink, rx) = EventSink::channel();

    match parse_upload(multipart).await {
        Ok(upload) => {
            tokio::spawn(run_batch(pool, shards, sink, upload.items));
        }
        Err(e) => {
            tracing::warn!("Rejected batch: {}", e);
            sink.emit(&StreamEvent::Error {
                message: e.to_string(),
            });
        }
    }

    stream_response(rx)
}

/// Running stats for one batch, shared between the orchestrator and the
/// assignment callback. Snapshots are taken under the lock so every emitted
/// `stats` event satisfies the counter identity.
struct BatchTracker {
    stats: Mutex<BatchStats>,
}

impl BatchTracker {
    fn new(total: usize) -> Arc<Self> {
        Arc::new(Self {
            stats: Mutex::new(BatchStats::new(total)),
        })
    }

    fn snapshot(&self) -> BatchStats {
        *self.stats.lock().unwrap()
    }

    fn begin_processing(&self) -> BatchStats {
        let mut stats = self.stats.lock().unwrap();
        stats.pending -= 1;
        stats.processing += 1;
        *stats
    }

    /// `was_processing` is false for a task whose pickup was never observed
    /// (the callback slot was replaced mid-batch); it moves straight from
    /// pending to its terminal counter.
    fn finish(&self, success: bool, was_processing: bool) -> BatchStats {
        let mut stats = self.stats.lock().unwrap();
        if was_processing {
            stats.processing -= 1;
        } else {
            stats.pending -= 1;
        }
        if success {
            stats.completed += 1;
        } else {
            stats.errors += 1;
        }
        *stats
    }

    /// A task that never reached submission (preparation failed).
    fn abandon(&self) -> BatchStats {
        let mut stats = self.stats.lock().unwrap();
        stats.pending -= 1;
        stats.errors += 1;
        *stats
    }
}

/// The batch pipeline. Public within the crate so tests can drive it without
/// an HTTP server.
pub(crate) async fn run_batch(
    pool: Arc<WorkerPool>,
    shards: Arc<ShardStore>,
    sink: EventSink,
    items: Vec<BatchItem>,
) {
    let total = items.len();
    let tracker = BatchTracker::new(total);

    sink.emit(&StreamEvent::stats(tracker.snapshot()));
    sink.emit(&StreamEvent::log(
        LogType::Info,
        format!("Received batch of {} images", total),
    ));

    if items.is_empty() {
        sink.emit(&StreamEvent::log(LogType::Success, "Nothing to process"));
        return;
    }

    sink.emit(&StreamEvent::workers(pool.snapshot()));
    sink.emit(&StreamEvent::partitions(&shards.stats(), None));

    // Assignment callback: flips a task to processing the moment a worker
    // picks it up, before the describe call starts.
    let partition_of: Arc<DashMap<String, u32>> = Arc::new(DashMap::new());
    let marked_processing: Arc<DashMap<String, ()>> = Arc::new(DashMap::new());
    let hook = {
        let sink = sink.clone();
        let tracker = tracker.clone();
        let partition_of = partition_of.clone();
        let marked_processing = marked_processing.clone();
        let pool_ref = Arc::downgrade(&pool);
        let hook: crate::pool::AssignmentHook = Arc::new(move |worker_id, _remaining, task_id| {
            // A replacement hook may still see assignments from an earlier
            // batch draining out of the pool; those are not ours to count.
            let Some(partition) = partition_of.get(task_id).map(|p| *p) else {
                return;
            };
            let stats = tracker.begin_processing();
            marked_processing.insert(task_id.to_string(), ());
            sink.emit(&StreamEvent::processing(task_id, partition, worker_id));
            sink.emit(&StreamEvent::stats(stats));
            if let Some(pool) = pool_ref.upgrade() {
                sink.emit(&StreamEvent::workers(pool.snapshot()));
            }
        });
        pool.set_assignment_hook(hook.clone());
        hook
    };

    // Preparation phase: partition + store every image, in input order.
    let mut prepared: Vec<(BatchItem, u32)> = Vec::new();
    for item in items {
        let snippet = payload_snippet(&item.bytes);
        match shards.store(&item.filename, &snippet) {
            Ok(partition) => {
                partition_of.insert(item.task_id.clone(), partition);
                sink.emit(&StreamEvent::log(
                    LogType::Partition,
                    format!("Assigned {} to partition {}", item.filename, partition),
                ));
                sink.emit(&StreamEvent::partitions(&shards.stats(), None));
                prepared.push((item, partition));
            }
            Err(e) => {
                tracing::warn!("Preparation failed for {}: {}", item.filename, e);
                let stats = tracker.abandon();
                sink.emit(&StreamEvent::failed(
                    &item.task_id,
                    e.to_string(),
                    None,
                    None,
                    None,
                ));
                sink.emit(&StreamEvent::stats(stats));
            }
        }
    }

    // Submission phase: everything goes into the pool queue before any
    // completion is awaited.
    let mut completions = FuturesUnordered::new();
    for (item, partition) in prepared {
        let receiver = pool.submit(PoolTask {
            task_id: item.task_id.clone(),
            filename: item.filename,
            payload: item.bytes,
            partition,
            submitted_at: now_ms(),
        });
        completions.push(async move { (item.task_id, partition, receiver.await) });
    }

    // Completion phase: terminal events in whatever order workers finish.
    while let Some((task_id, partition, outcome)) = completions.next().await {
        let was_processing = marked_processing.remove(&task_id).is_some();
        match outcome {
            Ok(Ok(done)) => {
                let stats = tracker.finish(true, was_processing);
                sink.emit(&StreamEvent::completed(
                    &task_id,
                    done.description,
                    partition,
                    done.worker_id,
                    done.elapsed_ms,
                ));
                sink.emit(&StreamEvent::stats(stats));
                sink.emit(&StreamEvent::workers(pool.snapshot()));
            }
            Ok(Err(failure)) => {
                let stats = tracker.finish(false, was_processing);
                sink.emit(&StreamEvent::failed(
                    &task_id,
                    failure.error.to_string(),
                    Some(partition),
                    Some(failure.worker_id),
                    Some(failure.elapsed_ms),
                ));
                sink.emit(&StreamEvent::stats(stats));
                sink.emit(&StreamEvent::workers(pool.snapshot()));
            }
            Err(_) => {
                let stats = tracker.finish(false, was_processing);
                sink.emit(&StreamEvent::failed(
                    &task_id,
                    recv_failure().to_string(),
                    Some(partition),
                    None,
                    None,
                ));
                sink.emit(&StreamEvent::stats(stats));
            }
        }
    }

    let stats = tracker.snapshot();
    sink.emit(&StreamEvent::log(
        LogType::Success,
        format!(
            "Batch complete: {} described, {} failed",
            stats.completed, stats.errors
        ),
    ));

    // Let the stream close: the hook holds a sink clone, so it has to go.
    pool.clear_assignment_hook(&hook);
}

fn payload_snippet(bytes: &Bytes) -> String {
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;
    let head = &bytes[..bytes.len().min(SNIPPET_BYTES)];
    format!("{} ({} bytes)", BASE64.encode(head), bytes.len())
}

// ============================================================
// /ingest
// ============================================================

pub async fn handle_ingest(
    Extension(store): Extension<Arc<dyn ObjectStore>>,
    Extension(queue): Extension<Arc<JobQueue>>,
    Extension(partitioner): Extension<Arc<Partitioner>>,
    multipart: Multipart,
) -> Response {
    let (sink, rx) = EventSink::channel();

    match parse_upload(multipart).await {
        Ok(upload) => {
            tokio::spawn(run_ingest(store, queue, partitioner, sink, upload));
        }
        Err(e) => {
            tracing::warn!("Rejected ingest: {}", e);
            sink.emit(&StreamEvent::Error {
                message: e.to_string(),
            });
        }
    }

    stream_response(rx)
}

async fn run_ingest(
    store: Arc<dyn ObjectStore>,
    queue: Arc<JobQueue>,
    partitioner: Arc<Partitioner>,
    sink: EventSink,
    upload: ParsedUpload,
) {
    let dataset_name = upload
        .fields
        .get("datasetName")
        .cloned()
        .unwrap_or_else(|| "dataset".to_string());
    let batch_size = upload
        .fields
        .get("batchSize")
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|&n| n > 0)
        .unwrap_or(DEFAULT_INGEST_BATCH);

    let total_images = upload.items.len();
    let total_batches = total_images.div_ceil(batch_size);
    let mut total_ingested = 0usize;

    sink.emit(&StreamEvent::log(
        LogType::Info,
        format!(
            "Ingesting {} images into dataset {:?} in {} batches",
            total_images, dataset_name, total_batches
        ),
    ));

    for (batch_index, chunk) in upload.items.chunks(batch_size).enumerate() {
        for item in chunk {
            let partition = partitioner.partition(&item.filename);
            let object_key = ingest_object_key(partition, &item.filename);

            let mut metadata = HashMap::new();
            metadata.insert("filename".to_string(), item.filename.clone());
            metadata.insert("dataset".to_string(), dataset_name.clone());

            if let Err(e) = store
                .put_object(
                    IMAGES_BUCKET,
                    &object_key,
                    item.bytes.clone(),
                    content_type_for(&item.filename),
                    metadata,
                )
                .await
            {
                tracing::error!("Ingest store failed for {}: {}", item.filename, e);
                sink.emit(&StreamEvent::Error {
                    message: e.to_string(),
                });
                return;
            }

            let enqueued = queue.enqueue(JobSpec {
                task_id: item.task_id.clone(),
                filename: item.filename.clone(),
                bucket: IMAGES_BUCKET.to_string(),
                object_key,
                partition,
                submitted_at: now_ms(),
                priority: JobPriority::Normal,
            });
            if let Err(e) = enqueued {
                tracing::error!("Enqueue failed for {}: {}", item.filename, e);
                sink.emit(&StreamEvent::Error {
                    message: e.to_string(),
                });
                return;
            }

            total_ingested += 1;
        }

        sink.emit(&StreamEvent::Progress {
            batch_index,
            total_batches,
            batch_size: chunk.len(),
            total_ingested,
            total_images,
        });
    }

    sink.emit(&StreamEvent::Complete {
        total_ingested,
        dataset_name: dataset_name.clone(),
        message: format!("Ingested {} images into {}", total_ingested, dataset_name),
    });
}

/// Object key layout: `partition-{i}/{hash8}-{epoch_ms}.{ext}`.
fn ingest_object_key(partition: u32, filename: &str) -> String {
    let hash8 = Partitioner::hash32(filename) as u32;
    let ext = filename.rsplit('.').next().filter(|e| !e.is_empty() && e.len() <= 4);
    format!(
        "partition-{}/{:08x}-{}.{}",
        partition,
        hash8,
        now_ms(),
        ext.unwrap_or("jpg")
    )
}

fn content_type_for(filename: &str) -> &'static str {
    match filename.rsplit('.').next().map(|e| e.to_ascii_lowercase()).as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("bmp") => "image/bmp",
        _ => "application/octet-stream",
    }
}

// ============================================================
// /health
// ============================================================

#[derive(Debug, Serialize)]
pub struct HealthChecks {
    pub queue: bool,
    pub s3: bool,
    pub redis: bool,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub checks: HealthChecks,
    pub timestamp: u64,
}

pub async fn handle_health(
    Extension(queue): Extension<Arc<JobQueue>>,
    Extension(store): Extension<Arc<dyn ObjectStore>>,
) -> (StatusCode, Json<HealthResponse>) {
    let queue_ok = queue.ping();
    let s3_ok = store.bucket_exists(IMAGES_BUCKET).await.unwrap_or(false);
    // The queue plane doubles as its own backing store in this deployment.
    let redis_ok = queue.ping();

    let healthy = queue_ok && s3_ok && redis_ok;
    let response = HealthResponse {
        status: if healthy { "healthy" } else { "unhealthy" }.to_string(),
        checks: HealthChecks {
            queue: queue_ok,
            s3: s3_ok,
            redis: redis_ok,
        },
        timestamp: now_ms(),
    };

    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(response))
}

// ============================================================
// /worker
// ============================================================

#[derive(Debug, Serialize)]
pub struct WorkerStartResponse {
    pub status: String,
    pub worker_id: usize,
    pub partitions: Vec<u32>,
}

pub async fn handle_worker_start(
    Extension(supervisor): Extension<Arc<WorkerSupervisor>>,
) -> (StatusCode, Json<WorkerStartResponse>) {
    match supervisor.start().await {
        Ok((worker_id, partitions)) => (
            StatusCode::OK,
            Json(WorkerStartResponse {
                status: "started".to_string(),
                worker_id,
                partitions,
            }),
        ),
        Err(e) => {
            tracing::error!("Worker bootstrap failed: {}", e);
            (
                StatusCode::CONFLICT,
                Json(WorkerStartResponse {
                    status: e.to_string(),
                    worker_id: 0,
                    partitions: vec![],
                }),
            )
        }
    }
}

#[derive(Debug, Serialize)]
pub struct WorkerStatusResponse {
    pub status: String,
    pub workers: Vec<WorkerAssignment>,
    pub queue: crate::queue::types::QueueDepth,
    pub cpu_usage: f32,
    pub mem_used_mb: u64,
    pub mem_total_mb: u64,
}

#[derive(Debug, Serialize)]
pub struct WorkerAssignment {
    pub worker_id: usize,
    pub partitions: Vec<u32>,
}

pub async fn handle_worker_status(
    Extension(queue): Extension<Arc<JobQueue>>,
    Extension(supervisor): Extension<Arc<WorkerSupervisor>>,
) -> Json<WorkerStatusResponse> {
    use sysinfo::System;

    let mut sys = System::new_all();
    sys.refresh_cpu();
    sys.refresh_memory();
    let cpu_usage = sys.global_cpu_info().cpu_usage();
    // sysinfo returns bytes for memory values.
    let mem_total_mb = sys.total_memory() / (1024 * 1024);
    let mem_used_mb = sys.used_memory() / (1024 * 1024);

    Json(WorkerStatusResponse {
        status: "ok".to_string(),
        workers: supervisor
            .running()
            .into_iter()
            .map(|(worker_id, partitions)| WorkerAssignment {
                worker_id,
                partitions,
            })
            .collect(),
        queue: queue.depth(),
        cpu_usage,
        mem_used_mb,
        mem_total_mb,
    })
}
