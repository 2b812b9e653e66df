//! Worker Runtime
//!
//! The process-side of the distributed path. A worker registers with the
//! queue plane, then loops: lease a job from its assigned partitions, fetch
//! the payload from the object store, run the describe call under a lease
//! renewal heartbeat, and report the outcome back.
//!
//! A job the plane hands out whose partition is outside the worker's
//! assignment is nacked back with a short delay instead of being failed, so
//! a mis-routed job is never lost.

use super::protocol::*;
use super::types::{now_ms, QueuedJob};
use crate::config::{Config, RESULTS_BUCKET};
use crate::describe::Describe;
use crate::error::ClusterError;
use crate::storage::object::ObjectStore;

use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Delay before re-polling when no job is available.
const IDLE_POLL: Duration = Duration::from_millis(500);
/// Lease renewal period; well under the plane's stall timeout.
const RENEWAL_PERIOD: Duration = Duration::from_secs(10);
/// Nack delay for a job outside this worker's partitions.
const MISROUTE_DELAY_MS: u64 = 1_000;

/// Result document persisted next to the images after a completed job.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ResultDocument<'a> {
    description: &'a str,
    partition: u32,
    worker_id: usize,
    processing_time: u64,
    timestamp: u64,
}

pub struct WorkerRuntime {
    worker_id: usize,
    partitions: Vec<u32>,
    api_base: String,
    http: reqwest::Client,
    describer: Arc<dyn Describe>,
    store: Arc<dyn ObjectStore>,
}

impl WorkerRuntime {
    pub fn new(
        config: &Config,
        describer: Arc<dyn Describe>,
        store: Arc<dyn ObjectStore>,
    ) -> Arc<Self> {
        Arc::new(Self {
            worker_id: config.worker_id,
            partitions: config.worker_partitions.clone(),
            api_base: config.api_endpoint.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
            describer,
            store,
        })
    }

    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    pub fn partitions(&self) -> &[u32] {
        &self.partitions
    }

    /// Announces this worker and its partition assignment to the plane.
    pub async fn register(&self) -> Result<(), ClusterError> {
        let payload = RegisterRequest {
            worker_id: self.worker_id,
            partitions: self.partitions.clone(),
        };
        let response = self
            .post_with_retry(
                format!("{}{}", self.api_base, ENDPOINT_REGISTER),
                &payload,
                Duration::from_millis(2_000),
                3,
            )
            .await?;

        if !response.status().is_success() {
            return Err(ClusterError::QueueUnavailable(format!(
                "register failed: {}",
                response.status()
            )));
        }

        tracing::info!(
            "Worker {} registered for partitions {:?}",
            self.worker_id,
            self.partitions
        );
        Ok(())
    }

    /// The main worker loop. Never returns; lease errors back off and retry
    /// since an unreachable queue is a transient condition.
    pub async fn run(self: Arc<Self>) {
        tracing::info!("Worker {} started", self.worker_id);

        loop {
            match self.lease_one().await {
                Ok(Some(job)) => {
                    self.process(job).await;
                }
                Ok(None) => {
                    tokio::time::sleep(IDLE_POLL).await;
                }
                Err(e) => {
                    tracing::warn!("Worker {} lease failed: {}", self.worker_id, e);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    async fn lease_one(&self) -> Result<Option<QueuedJob>, ClusterError> {
        let payload = LeaseRequest {
            worker_id: self.worker_id,
            partitions: self.partitions.clone(),
        };
        let response = self
            .post_with_retry(
                format!("{}{}", self.api_base, ENDPOINT_LEASE),
                &payload,
                Duration::from_millis(2_000),
                3,
            )
            .await?;

        if !response.status().is_success() {
            return Err(ClusterError::QueueUnavailable(format!(
                "lease failed: {}",
                response.status()
            )));
        }

        let lease: LeaseResponse = response
            .json()
            .await
            .map_err(|e| ClusterError::QueueUnavailable(format!("bad lease response: {}", e)))?;
        Ok(lease.job)
    }

    async fn process(&self, job: QueuedJob) {
        let task_id = job.spec.task_id.clone();
        let partition = job.spec.partition;

        if !self.partitions.contains(&partition) {
            tracing::warn!(
                "Worker {} received job {} for foreign partition {}; nacking",
                self.worker_id,
                task_id,
                partition
            );
            if let Err(e) = self.release(partition, &task_id, MISROUTE_DELAY_MS).await {
                tracing::error!("Nack of {} failed: {}", task_id, e);
            }
            return;
        }

        tracing::info!(
            "Worker {} claimed job {} (attempt {})",
            self.worker_id,
            task_id,
            job.attempts
        );

        let renewal = self.spawn_lease_renewal(partition, &task_id);
        let started = Instant::now();
        let outcome = self.execute(&job).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        renewal.abort();

        let report = match outcome {
            Ok(description) => {
                self.persist_result(&job, &description, elapsed_ms).await;
                self.complete(partition, &task_id, description, elapsed_ms).await
            }
            Err(error) => self.fail(partition, &task_id, &error).await,
        };

        if let Err(e) = report {
            tracing::error!(
                "Worker {} could not report outcome for {}: {}",
                self.worker_id,
                task_id,
                e
            );
        }
    }

    async fn execute(&self, job: &QueuedJob) -> Result<String, ClusterError> {
        let bytes = self
            .store
            .get_object(&job.spec.bucket, &job.spec.object_key)
            .await?;
        self.describer.describe(&bytes).await
    }

    /// Writes the result document to the results bucket. Best effort: the
    /// queue still records the completion when this write fails.
    async fn persist_result(&self, job: &QueuedJob, description: &str, elapsed_ms: u64) {
        let document = ResultDocument {
            description,
            partition: job.spec.partition,
            worker_id: self.worker_id,
            processing_time: elapsed_ms,
            timestamp: now_ms(),
        };

        let body = match serde_json::to_vec(&document) {
            Ok(body) => body,
            Err(e) => {
                tracing::error!("Result for {} did not serialize: {}", job.spec.task_id, e);
                return;
            }
        };

        let key = format!("results/{}.json", job.spec.task_id);
        if let Err(e) = self
            .store
            .put_object(
                RESULTS_BUCKET,
                &key,
                body.into(),
                "application/json",
                HashMap::new(),
            )
            .await
        {
            tracing::warn!("Result persistence for {} failed: {}", job.spec.task_id, e);
        }
    }

    /// Periodically extends the lease so a long describe call is not counted
    /// as a stall. Aborted as soon as the job finishes.
    fn spawn_lease_renewal(&self, partition: u32, task_id: &str) -> tokio::task::JoinHandle<()> {
        let worker_id = self.worker_id;
        let task_id = task_id.to_string();
        let url = format!("{}{}", self.api_base, ENDPOINT_RENEW);
        let http = self.http.clone();

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(RENEWAL_PERIOD).await;

                let payload = RenewRequest {
                    worker_id,
                    partition,
                    task_id: task_id.clone(),
                };
                match http
                    .post(&url)
                    .json(&payload)
                    .timeout(Duration::from_millis(2_000))
                    .send()
                    .await
                {
                    Ok(response) if response.status().is_success() => {
                        tracing::trace!("Renewed lease for job {}", task_id);
                    }
                    Ok(_) | Err(_) => {
                        tracing::trace!("Job {} no longer needs lease renewal", task_id);
                        break;
                    }
                }
            }
        })
    }

    async fn complete(
        &self,
        partition: u32,
        task_id: &str,
        description: String,
        elapsed_ms: u64,
    ) -> Result<(), ClusterError> {
        let payload = CompleteRequest {
            worker_id: self.worker_id,
            partition,
            task_id: task_id.to_string(),
            description,
            elapsed_ms,
        };
        self.post_with_retry(
            format!("{}{}", self.api_base, ENDPOINT_COMPLETE),
            &payload,
            Duration::from_millis(2_000),
            3,
        )
        .await?;
        Ok(())
    }

    async fn fail(
        &self,
        partition: u32,
        task_id: &str,
        error: &ClusterError,
    ) -> Result<(), ClusterError> {
        let payload = FailRequest {
            worker_id: self.worker_id,
            partition,
            task_id: task_id.to_string(),
            error_kind: error.kind().to_string(),
            message: error.to_string(),
            retryable: error.is_retryable(),
        };
        self.post_with_retry(
            format!("{}{}", self.api_base, ENDPOINT_FAIL),
            &payload,
            Duration::from_millis(2_000),
            3,
        )
        .await?;
        Ok(())
    }

    async fn release(
        &self,
        partition: u32,
        task_id: &str,
        delay_ms: u64,
    ) -> Result<(), ClusterError> {
        let payload = ReleaseRequest {
            worker_id: self.worker_id,
            partition,
            task_id: task_id.to_string(),
            delay_ms,
        };
        self.post_with_retry(
            format!("{}{}", self.api_base, ENDPOINT_RELEASE),
            &payload,
            Duration::from_millis(2_000),
            3,
        )
        .await?;
        Ok(())
    }

    async fn post_with_retry<T: Serialize>(
        &self,
        url: String,
        payload: &T,
        timeout: Duration,
        attempts: usize,
    ) -> Result<reqwest::Response, ClusterError> {
        let mut delay_ms = 150u64;

        for attempt in 0..attempts {
            let response = self
                .http
                .post(url.clone())
                .json(payload)
                .timeout(timeout)
                .send()
                .await;

            match response {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    if attempt + 1 == attempts {
                        return Err(ClusterError::QueueUnavailable(e.to_string()));
                    }
                    let jitter = rand::random::<u64>() % 50;
                    tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
                    delay_ms = (delay_ms * 2).min(1_200);
                }
            }
        }

        Err(ClusterError::QueueUnavailable(
            "retry attempts exhausted".to_string(),
        ))
    }
}

/// Bootstraps worker runtimes inside the server process (`POST /worker`) and
/// tracks which ones are running. Standalone worker processes bypass this
/// and run the runtime directly from `main`.
pub struct WorkerSupervisor {
    config: Config,
    describer: Arc<dyn Describe>,
    store: Arc<dyn ObjectStore>,
    running: DashMap<usize, Vec<u32>>,
}

impl WorkerSupervisor {
    pub fn new(
        config: Config,
        describer: Arc<dyn Describe>,
        store: Arc<dyn ObjectStore>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            describer,
            store,
            running: DashMap::new(),
        })
    }

    /// Registers and starts the worker configured by `WORKER_ID` and
    /// `PARTITIONS`. Starting the same worker twice is rejected.
    pub async fn start(&self) -> Result<(usize, Vec<u32>), ClusterError> {
        let worker_id = self.config.worker_id;
        let partitions = self.config.worker_partitions.clone();

        if partitions.is_empty() {
            return Err(ClusterError::InvalidInput(
                "PARTITIONS is not configured".to_string(),
            ));
        }
        if self.running.contains_key(&worker_id) {
            return Err(ClusterError::InvalidInput(format!(
                "worker {} is already running",
                worker_id
            )));
        }

        let runtime = WorkerRuntime::new(&self.config, self.describer.clone(), self.store.clone());
        runtime.register().await?;
        self.running.insert(worker_id, partitions.clone());
        tokio::spawn(runtime.run());

        Ok((worker_id, partitions))
    }

    pub fn running(&self) -> Vec<(usize, Vec<u32>)> {
        let mut running: Vec<(usize, Vec<u32>)> = self
            .running
            .iter()
            .map(|w| (*w.key(), w.value().clone()))
            .collect();
        running.sort_by_key(|(worker_id, _)| *worker_id);
        running
    }
}
