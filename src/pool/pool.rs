//! Worker Pool Implementation
//!
//! One coordinator, N workers. The coordinator is a single logical task: the
//! `coordinating` latch guarantees it never runs concurrently with itself,
//! and it goes idle when the queue drains. Submission from any task wakes it
//! back up.
//!
//! Instead of busy-polling, the coordinator parks on two signals: `task_added`
//! (a submission arrived) and `worker_freed` (a completion released a slot).
//! Both waits are bounded so the drain check can still observe an empty queue
//! and exit cleanly after the last task.

use super::types::*;
use crate::describe::Describe;
use crate::error::ClusterError;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Notify};

/// How long the coordinator waits for late arrivals before going idle.
const DRAIN_POLL: Duration = Duration::from_millis(100);
/// How long the coordinator waits for a slot when every worker is busy.
const SATURATED_WAIT: Duration = Duration::from_millis(50);

type TaskSender = oneshot::Sender<Result<PoolCompletion, PoolFailure>>;

pub struct WorkerPool {
    size: usize,
    /// The coordinator holds this lock only during worker selection; each
    /// worker holds it only to flip its own `busy` flag back.
    workers: Mutex<Vec<WorkerSlot>>,
    queue: Mutex<VecDeque<(PoolTask, TaskSender)>>,
    in_flight: AtomicUsize,
    /// Latch ensuring a single coordinator instance.
    coordinating: AtomicBool,
    task_added: Notify,
    worker_freed: Notify,
    describer: Arc<dyn Describe>,
    assignment_hook: RwLock<Option<AssignmentHook>>,
}

impl WorkerPool {
    pub fn new(size: usize, describer: Arc<dyn Describe>) -> Arc<Self> {
        let workers = (0..size).map(WorkerSlot::new).collect();
        Arc::new(Self {
            size,
            workers: Mutex::new(workers),
            queue: Mutex::new(VecDeque::new()),
            in_flight: AtomicUsize::new(0),
            coordinating: AtomicBool::new(false),
            task_added: Notify::new(),
            worker_freed: Notify::new(),
            describer,
            assignment_hook: RwLock::new(None),
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn queue_len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Registers the assignment callback, replacing any previous one.
    pub fn set_assignment_hook(&self, hook: AssignmentHook) {
        *self.assignment_hook.write().unwrap() = Some(hook);
    }

    /// Removes the callback, but only when it is still the one the caller
    /// registered; a later batch may already have replaced it.
    pub fn clear_assignment_hook(&self, expected: &AssignmentHook) {
        let mut slot = self.assignment_hook.write().unwrap();
        if slot
            .as_ref()
            .map(|hook| Arc::ptr_eq(hook, expected))
            .unwrap_or(false)
        {
            *slot = None;
        }
    }

    /// Current state of every worker slot, lowest id first.
    pub fn snapshot(&self) -> Vec<WorkerSnapshot> {
        self.workers
            .lock()
            .unwrap()
            .iter()
            .map(|slot| WorkerSnapshot {
                id: slot.id,
                busy: slot.busy,
                processed: slot.processed,
                current_task: slot.current_task.clone(),
            })
            .collect()
    }

    /// Enqueues a task and wakes the coordinator if it is idle. Non-blocking;
    /// the returned future resolves when a worker finishes the task.
    pub fn submit(
        self: &Arc<Self>,
        task: PoolTask,
    ) -> oneshot::Receiver<Result<PoolCompletion, PoolFailure>> {
        let (done_tx, done_rx) = oneshot::channel();
        self.queue.lock().unwrap().push_back((task, done_tx));
        self.task_added.notify_one();
        self.wake();
        done_rx
    }

    fn wake(self: &Arc<Self>) {
        if !self.coordinating.swap(true, Ordering::SeqCst) {
            let pool = self.clone();
            tokio::spawn(async move {
                pool.coordinate().await;
            });
        }
    }

    /// The coordinator loop. Runs while there are queued or in-flight tasks,
    /// then clears the latch and exits.
    async fn coordinate(self: Arc<Self>) {
        tracing::debug!("Coordinator started");

        loop {
            let next = self.queue.lock().unwrap().pop_front();

            let Some((task, done)) = next else {
                if self.in_flight.load(Ordering::SeqCst) == 0 {
                    // Brief poll for late arrivals before going idle.
                    let _ = tokio::time::timeout(DRAIN_POLL, self.task_added.notified()).await;
                    if self.queue.lock().unwrap().is_empty() {
                        break;
                    }
                } else {
                    let _ =
                        tokio::time::timeout(SATURATED_WAIT, self.worker_freed.notified()).await;
                }
                continue;
            };

            if self.in_flight.load(Ordering::SeqCst) >= self.size {
                // Every slot taken; put the task back and wait for a release.
                self.queue.lock().unwrap().push_front((task, done));
                let _ = tokio::time::timeout(SATURATED_WAIT, self.worker_freed.notified()).await;
                continue;
            }

            let worker_id = self.assign_worker(&task.task_id);
            self.in_flight.fetch_add(1, Ordering::SeqCst);
            let remaining = self.queue.lock().unwrap().len();

            tracing::debug!(
                "Assigned task {} to worker {} ({} queued)",
                task.task_id,
                worker_id,
                remaining
            );

            let hook = self.assignment_hook.read().unwrap().clone();
            if let Some(hook) = hook {
                hook(worker_id, remaining, &task.task_id);
            }

            let pool = self.clone();
            tokio::spawn(async move {
                pool.run_task(worker_id, task, done).await;
            });

            // Yield so completion callbacks get a chance to run between
            // dispatches.
            tokio::task::yield_now().await;
        }

        self.coordinating.store(false, Ordering::SeqCst);
        tracing::debug!("Coordinator idle");

        // A submission may have raced the latch release; wake back up rather
        // than leaving it stranded.
        if !self.queue.lock().unwrap().is_empty() {
            self.wake();
        }
    }

    /// Picks a worker and marks the slot busy. Prefers an idle worker with
    /// the lowest id; when every worker is busy (a fallback the coordinator
    /// normally prevents) it picks the one with the fewest assignments.
    /// `processed` increments here, at assignment, so it doubles as the
    /// fairness signal for the fallback branch.
    fn assign_worker(&self, task_id: &str) -> usize {
        let mut workers = self.workers.lock().unwrap();

        let slot = match workers.iter_mut().find(|slot| !slot.busy) {
            Some(idle) => idle,
            None => workers
                .iter_mut()
                .min_by_key(|slot| slot.processed)
                .expect("pool has at least one worker"),
        };

        slot.busy = true;
        slot.processed += 1;
        slot.current_task = Some(task_id.to_string());
        slot.id
    }

    async fn run_task(self: Arc<Self>, worker_id: usize, task: PoolTask, done: TaskSender) {
        let started = Instant::now();
        let outcome = self.describer.describe(&task.payload).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        self.release_worker(worker_id);

        let result = match outcome {
            Ok(description) => {
                tracing::debug!(
                    "Worker {} described {} in {} ms",
                    worker_id,
                    task.task_id,
                    elapsed_ms
                );
                Ok(PoolCompletion {
                    description,
                    worker_id,
                    elapsed_ms,
                })
            }
            Err(error) => {
                tracing::warn!(
                    "Worker {} failed task {}: {}",
                    worker_id,
                    task.task_id,
                    error
                );
                Err(PoolFailure {
                    error,
                    worker_id,
                    elapsed_ms,
                })
            }
        };

        // The receiver may be gone when the client disconnected; the task
        // still ran to completion, its result is simply discarded.
        let _ = done.send(result);
    }

    fn release_worker(&self, worker_id: usize) {
        {
            let mut workers = self.workers.lock().unwrap();
            if let Some(slot) = workers.iter_mut().find(|slot| slot.id == worker_id) {
                slot.busy = false;
                slot.current_task = None;
            }
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.worker_freed.notify_one();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("size", &self.size)
            .field("queued", &self.queue_len())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

/// Convenience used by error paths that need a `ClusterError` out of a
/// oneshot cancellation.
pub fn recv_failure() -> ClusterError {
    ClusterError::QueueUnavailable("worker pool dropped the task".to_string())
}
