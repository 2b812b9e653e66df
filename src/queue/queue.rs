//! Queue Plane
//!
//! Holds every queued job, partitioned the same way the shard store is, and
//! runs the full lease lifecycle: claim, renew, complete, fail-with-backoff,
//! nack, stall detection. Worker processes talk to it through the handlers in
//! this module's sibling files; the dispatcher enqueues into it directly.

use super::types::*;
use crate::error::ClusterError;

use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Mutex;

pub struct JobQueue {
    /// partition id -> task id -> job.
    jobs: DashMap<u32, DashMap<String, QueuedJob>>,
    completed: Mutex<VecDeque<FinishedJob>>,
    failed: Mutex<VecDeque<FinishedJob>>,
    /// Worker processes that have announced themselves, by worker id.
    workers: DashMap<usize, RegisteredWorker>,
    num_partitions: u32,
    lease_timeout_ms: u64,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RegisteredWorker {
    pub worker_id: usize,
    pub partitions: Vec<u32>,
    pub registered_at: u64,
}

impl JobQueue {
    pub fn new(num_partitions: u32) -> Self {
        Self::with_lease_timeout(num_partitions, DEFAULT_LEASE_TIMEOUT_MS)
    }

    pub fn with_lease_timeout(num_partitions: u32, lease_timeout_ms: u64) -> Self {
        let jobs = DashMap::new();
        for partition in 0..num_partitions {
            jobs.insert(partition, DashMap::new());
        }
        Self {
            jobs,
            completed: Mutex::new(VecDeque::new()),
            failed: Mutex::new(VecDeque::new()),
            workers: DashMap::new(),
            num_partitions,
            lease_timeout_ms,
        }
    }

    /// Records a new job under its partition. The job becomes leasable
    /// immediately.
    pub fn enqueue(&self, spec: JobSpec) -> Result<String, ClusterError> {
        if spec.partition >= self.num_partitions {
            return Err(ClusterError::InvalidInput(format!(
                "partition {} out of range (have {})",
                spec.partition, self.num_partitions
            )));
        }

        let task_id = spec.task_id.clone();
        let partition = spec.partition;
        let job = QueuedJob {
            spec,
            state: JobState::Pending,
            attempts: 0,
            next_attempt_at: now_ms(),
            lease: None,
            stalls: 0,
            created_at: now_ms(),
            last_error: None,
        };

        self.partition_map(partition)?.insert(task_id.clone(), job);
        tracing::debug!("Enqueued job {} on partition {}", task_id, partition);
        Ok(task_id)
    }

    pub fn register_worker(&self, worker_id: usize, partitions: Vec<u32>) {
        tracing::info!("Worker {} registered for partitions {:?}", worker_id, partitions);
        self.workers.insert(
            worker_id,
            RegisteredWorker {
                worker_id,
                partitions,
                registered_at: now_ms(),
            },
        );
    }

    pub fn registered_workers(&self) -> Vec<RegisteredWorker> {
        let mut workers: Vec<RegisteredWorker> =
            self.workers.iter().map(|w| w.value().clone()).collect();
        workers.sort_by_key(|w| w.worker_id);
        workers
    }

    /// Leases the best eligible job whose partition is in `partitions`.
    ///
    /// Expired leases observed during the scan count a stall; a job past
    /// `MAX_STALLS` is declared failed instead of being handed out again.
    /// Among eligible jobs, high priority wins, then oldest submission.
    pub fn lease(&self, worker_id: usize, partitions: &[u32]) -> Option<QueuedJob> {
        let now = now_ms();
        let mut candidates: Vec<(u8, u64, u32, String)> = Vec::new();

        for &partition in partitions {
            let Some(partition_map) = self.jobs.get(&partition) else {
                continue;
            };

            // Two-phase: collect under the read guards, mutate afterwards.
            let mut expired: Vec<String> = Vec::new();
            for entry in partition_map.iter() {
                let job = entry.value();
                match job.state {
                    JobState::Pending if now >= job.next_attempt_at => {
                        candidates.push((
                            job.spec.priority.weight(),
                            job.created_at,
                            partition,
                            entry.key().clone(),
                        ));
                    }
                    JobState::Leased => {
                        if let Some(lease) = &job.lease {
                            if now >= lease.expires_at {
                                expired.push(entry.key().clone());
                            }
                        }
                    }
                    _ => {}
                }
            }
            drop(partition_map);

            for task_id in expired {
                if let Some((weight, created_at)) = self.count_stall(partition, &task_id) {
                    candidates.push((weight, created_at, partition, task_id));
                }
            }
        }

        // High priority first, then oldest.
        candidates.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

        for (_, _, partition, task_id) in candidates {
            if let Some(job) = self.try_claim(worker_id, partition, &task_id, now) {
                return Some(job);
            }
        }

        None
    }

    /// Re-checks eligibility under the write guard and installs the lease.
    fn try_claim(
        &self,
        worker_id: usize,
        partition: u32,
        task_id: &str,
        now: u64,
    ) -> Option<QueuedJob> {
        let partition_map = self.jobs.get(&partition)?;
        let mut job = partition_map.get_mut(task_id)?;

        if job.state != JobState::Pending || now < job.next_attempt_at {
            return None;
        }

        job.state = JobState::Leased;
        job.attempts += 1;
        job.lease = Some(JobLease {
            worker_id,
            expires_at: now + self.lease_timeout_ms,
        });

        tracing::debug!(
            "Worker {} leased job {} (attempt {})",
            worker_id,
            task_id,
            job.attempts
        );
        Some(job.clone())
    }

    /// Handles one observed lease expiry. Returns the job's sort key when it
    /// was requeued (and is therefore a lease candidate), `None` when the
    /// stall budget ran out and the job was terminated.
    fn count_stall(&self, partition: u32, task_id: &str) -> Option<(u8, u64)> {
        let partition_map = self.jobs.get(&partition)?;
        let mut job = partition_map.get_mut(task_id)?;

        // Re-check under the write guard; a renew may have raced us.
        let still_expired = job
            .lease
            .as_ref()
            .map(|lease| now_ms() >= lease.expires_at)
            .unwrap_or(false);
        if job.state != JobState::Leased || !still_expired {
            return None;
        }

        job.stalls += 1;
        tracing::warn!(
            "Job {} stalled ({} of {})",
            task_id,
            job.stalls,
            MAX_STALLS
        );

        if job.stalls >= MAX_STALLS {
            let finished = FinishedJob {
                task_id: task_id.to_string(),
                partition,
                worker_id: job.lease.as_ref().map(|l| l.worker_id),
                description: None,
                error_kind: Some("stalled".to_string()),
                error: Some(format!("lease expired {} times", job.stalls)),
                attempts: job.attempts,
                elapsed_ms: 0,
                finished_at: now_ms(),
            };
            drop(job);
            partition_map.remove(task_id);
            drop(partition_map);
            self.push_failed(finished);
            return None;
        }

        job.state = JobState::Pending;
        job.lease = None;
        Some((job.spec.priority.weight(), job.created_at))
    }

    /// Extends a held lease. Fails when the caller no longer owns it.
    pub fn renew(&self, partition: u32, task_id: &str, worker_id: usize) -> Result<(), ClusterError> {
        let partition_map = self.partition_map(partition)?;
        let mut job = partition_map
            .get_mut(task_id)
            .ok_or_else(|| ClusterError::NotFound(task_id.to_string()))?;

        match &job.lease {
            Some(lease) if lease.worker_id == worker_id && job.state == JobState::Leased => {
                job.lease = Some(JobLease {
                    worker_id,
                    expires_at: now_ms() + self.lease_timeout_ms,
                });
                tracing::trace!("Renewed lease for job {}", task_id);
                Ok(())
            }
            _ => Err(ClusterError::InvalidInput(format!(
                "worker {} does not hold the lease for {}",
                worker_id, task_id
            ))),
        }
    }

    /// Terminal success: removes the job and records it in the completed
    /// window.
    pub fn complete(
        &self,
        partition: u32,
        task_id: &str,
        worker_id: usize,
        description: String,
        elapsed_ms: u64,
    ) -> Result<FinishedJob, ClusterError> {
        let partition_map = self.partition_map(partition)?;
        self.check_lease_owner(&partition_map, task_id, worker_id)?;

        let (_, job) = partition_map
            .remove(task_id)
            .ok_or_else(|| ClusterError::NotFound(task_id.to_string()))?;
        drop(partition_map);

        let finished = FinishedJob {
            task_id: task_id.to_string(),
            partition,
            worker_id: Some(worker_id),
            description: Some(description),
            error_kind: None,
            error: None,
            attempts: job.attempts,
            elapsed_ms,
            finished_at: now_ms(),
        };

        tracing::info!(
            "Job {} completed by worker {} after {} attempt(s)",
            task_id,
            worker_id,
            job.attempts
        );

        let mut completed = self.completed.lock().unwrap();
        completed.push_back(finished.clone());
        while completed.len() > COMPLETED_RETENTION {
            completed.pop_front();
        }
        Ok(finished)
    }

    /// Reports a failed attempt. Retryable failures under the attempt budget
    /// reschedule with exponential backoff; everything else is terminal.
    pub fn fail(
        &self,
        partition: u32,
        task_id: &str,
        worker_id: usize,
        error_kind: &str,
        message: &str,
        retryable: bool,
    ) -> Result<FailOutcome, ClusterError> {
        let partition_map = self.partition_map(partition)?;
        self.check_lease_owner(&partition_map, task_id, worker_id)?;

        let retry = {
            let job = partition_map
                .get(task_id)
                .ok_or_else(|| ClusterError::NotFound(task_id.to_string()))?;
            retryable && job.attempts < MAX_ATTEMPTS
        };

        if retry {
            let mut job = partition_map
                .get_mut(task_id)
                .ok_or_else(|| ClusterError::NotFound(task_id.to_string()))?;
            let base = job.spec.priority.backoff_base_ms();
            let delay = base * 2u64.pow(job.attempts.saturating_sub(1));
            let next_attempt_at = now_ms() + delay;

            job.state = JobState::Pending;
            job.lease = None;
            job.next_attempt_at = next_attempt_at;
            job.last_error = Some(message.to_string());

            tracing::warn!(
                "Job {} attempt {} failed ({}); retrying in {} ms",
                task_id,
                job.attempts,
                error_kind,
                delay
            );
            return Ok(FailOutcome::Retrying { next_attempt_at });
        }

        let (_, job) = partition_map
            .remove(task_id)
            .ok_or_else(|| ClusterError::NotFound(task_id.to_string()))?;
        drop(partition_map);

        tracing::error!(
            "Job {} failed terminally after {} attempt(s): {}",
            task_id,
            job.attempts,
            message
        );

        self.push_failed(FinishedJob {
            task_id: task_id.to_string(),
            partition,
            worker_id: Some(worker_id),
            description: None,
            error_kind: Some(error_kind.to_string()),
            error: Some(message.to_string()),
            attempts: job.attempts,
            elapsed_ms: 0,
            finished_at: now_ms(),
        });
        Ok(FailOutcome::Terminal)
    }

    /// Nack: hands a leased job back without consuming an attempt. Used by a
    /// worker that received a job outside its assigned partitions, so a
    /// mis-routed job is delayed rather than lost.
    pub fn release(
        &self,
        partition: u32,
        task_id: &str,
        worker_id: usize,
        delay_ms: u64,
    ) -> Result<(), ClusterError> {
        let partition_map = self.partition_map(partition)?;
        self.check_lease_owner(&partition_map, task_id, worker_id)?;

        let mut job = partition_map
            .get_mut(task_id)
            .ok_or_else(|| ClusterError::NotFound(task_id.to_string()))?;
        job.state = JobState::Pending;
        job.lease = None;
        job.attempts = job.attempts.saturating_sub(1);
        job.next_attempt_at = now_ms() + delay_ms;

        tracing::debug!(
            "Job {} released by worker {} (delayed {} ms)",
            task_id,
            worker_id,
            delay_ms
        );
        Ok(())
    }

    /// Verifies the queue's backing store is reachable. The plane is held in
    /// process memory, so reachability reduces to the process being alive.
    pub fn ping(&self) -> bool {
        true
    }

    pub fn depth(&self) -> QueueDepth {
        let mut pending = 0;
        let mut leased = 0;
        for partition in self.jobs.iter() {
            for job in partition.value().iter() {
                match job.state {
                    JobState::Pending => pending += 1,
                    JobState::Leased => leased += 1,
                }
            }
        }
        QueueDepth {
            pending,
            leased,
            completed: self.completed.lock().unwrap().len(),
            failed: self.failed.lock().unwrap().len(),
        }
    }

    pub fn recent_failed(&self, limit: usize) -> Vec<FinishedJob> {
        let failed = self.failed.lock().unwrap();
        failed.iter().rev().take(limit).cloned().collect()
    }

    pub fn get_job(&self, partition: u32, task_id: &str) -> Option<QueuedJob> {
        self.jobs
            .get(&partition)
            .and_then(|map| map.get(task_id).map(|job| job.clone()))
    }

    fn partition_map(
        &self,
        partition: u32,
    ) -> Result<dashmap::mapref::one::Ref<'_, u32, DashMap<String, QueuedJob>>, ClusterError> {
        self.jobs
            .get(&partition)
            .ok_or_else(|| ClusterError::NotFound(format!("partition {}", partition)))
    }

    fn check_lease_owner(
        &self,
        partition_map: &DashMap<String, QueuedJob>,
        task_id: &str,
        worker_id: usize,
    ) -> Result<(), ClusterError> {
        let job = partition_map
            .get(task_id)
            .ok_or_else(|| ClusterError::NotFound(task_id.to_string()))?;
        match &job.lease {
            Some(lease) if lease.worker_id == worker_id => Ok(()),
            _ => Err(ClusterError::InvalidInput(format!(
                "worker {} does not hold the lease for {}",
                worker_id, task_id
            ))),
        }
    }

    fn push_failed(&self, finished: FinishedJob) {
        let mut failed = self.failed.lock().unwrap();
        failed.push_back(finished);
        while failed.len() > FAILED_RETENTION {
            failed.pop_front();
        }
    }

    /// Test support: makes a job leasable immediately.
    #[cfg(test)]
    pub(crate) fn make_ready(&self, partition: u32, task_id: &str) {
        if let Some(partition_map) = self.jobs.get(&partition) {
            if let Some(mut job) = partition_map.get_mut(task_id) {
                job.next_attempt_at = 0;
            }
        }
    }
}
