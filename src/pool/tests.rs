use super::pool::WorkerPool;
use super::types::{now_ms, PoolTask};
use crate::describe::Describe;
use crate::error::ClusterError;

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Describer that sleeps for a fixed delay and tracks peak concurrency.
struct SleepDescriber {
    delay: Duration,
    concurrent: AtomicUsize,
    peak: AtomicUsize,
}

impl SleepDescriber {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            concurrent: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Describe for SleepDescriber {
    async fn describe(&self, _image: &[u8]) -> Result<String, ClusterError> {
        let now = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.concurrent.fetch_sub(1, Ordering::SeqCst);
        Ok("a small dog on a beach".to_string())
    }
}

struct FailingDescriber;

#[async_trait]
impl Describe for FailingDescriber {
    async fn describe(&self, _image: &[u8]) -> Result<String, ClusterError> {
        Err(ClusterError::DescribePermanent("model rejected input".to_string()))
    }
}

fn task(id: &str) -> PoolTask {
    PoolTask {
        task_id: id.to_string(),
        filename: format!("{}.jpg", id),
        payload: Bytes::from_static(b"fake-jpeg"),
        partition: 0,
        submitted_at: now_ms(),
    }
}

#[tokio::test]
async fn pool_runs_tasks_in_parallel_up_to_size() {
    let describer = SleepDescriber::new(Duration::from_millis(200));
    let pool = WorkerPool::new(4, describer.clone());

    let started = Instant::now();
    let futures: Vec<_> = (0..8).map(|i| pool.submit(task(&format!("t{}", i)))).collect();

    let mut completions = 0;
    for rx in futures {
        let outcome = rx.await.expect("pool resolved the future");
        let completion = outcome.expect("describe succeeded");
        assert!(!completion.description.is_empty());
        assert!(completion.worker_id < 4);
        completions += 1;
    }
    let elapsed = started.elapsed();

    // 8 tasks of 200 ms on 4 workers: two waves, so well under four waves.
    assert_eq!(completions, 8);
    assert!(
        elapsed < Duration::from_millis(700),
        "expected two waves, took {:?}",
        elapsed
    );
    assert_eq!(describer.peak.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn single_task_single_worker() {
    let pool = WorkerPool::new(1, SleepDescriber::new(Duration::from_millis(10)));

    let outcome = pool.submit(task("only")).await.unwrap().unwrap();
    assert_eq!(outcome.worker_id, 0);

    let snapshot = pool.snapshot();
    assert_eq!(snapshot.len(), 1);
    assert!(!snapshot[0].busy);
    assert_eq!(snapshot[0].processed, 1);
    assert!(snapshot[0].current_task.is_none());
}

#[tokio::test]
async fn assignment_hook_fires_once_per_task_before_completion() {
    let pool = WorkerPool::new(1, SleepDescriber::new(Duration::from_millis(20)));

    let seen: Arc<Mutex<Vec<(usize, usize, String)>>> = Arc::new(Mutex::new(Vec::new()));
    let seen_hook = seen.clone();
    pool.set_assignment_hook(Arc::new(move |worker_id, remaining, task_id| {
        seen_hook
            .lock()
            .unwrap()
            .push((worker_id, remaining, task_id.to_string()));
    }));

    let futures: Vec<_> = ["a", "b", "c"].iter().map(|id| pool.submit(task(id))).collect();
    for rx in futures {
        rx.await.unwrap().unwrap();
    }

    let calls = seen.lock().unwrap();
    assert_eq!(calls.len(), 3);
    // Single worker: every assignment goes to worker 0.
    assert!(calls.iter().all(|(worker_id, _, _)| *worker_id == 0));
    let ids: Vec<&str> = calls.iter().map(|(_, _, id)| id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b", "c"], "FIFO assignment order");
}

#[tokio::test]
async fn describer_errors_reject_the_future_and_free_the_worker() {
    let pool = WorkerPool::new(2, Arc::new(FailingDescriber));

    let rx1 = pool.submit(task("x"));
    let rx2 = pool.submit(task("y"));

    let failure = rx1.await.unwrap().unwrap_err();
    assert!(matches!(failure.error, ClusterError::DescribePermanent(_)));
    assert!(failure.worker_id < 2);
    rx2.await.unwrap().unwrap_err();

    // Both workers returned to idle despite the failures.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(pool.snapshot().iter().all(|w| !w.busy));
    assert_eq!(pool.in_flight(), 0);
}

#[tokio::test]
async fn processed_counters_account_for_every_assignment() {
    let pool = WorkerPool::new(3, SleepDescriber::new(Duration::from_millis(5)));

    let futures: Vec<_> = (0..12).map(|i| pool.submit(task(&format!("t{}", i)))).collect();
    for rx in futures {
        rx.await.unwrap().unwrap();
    }

    let total: u64 = pool.snapshot().iter().map(|w| w.processed).sum();
    assert_eq!(total, 12);
}

#[tokio::test]
async fn coordinator_wakes_again_after_draining() {
    let pool = WorkerPool::new(2, SleepDescriber::new(Duration::from_millis(5)));

    pool.submit(task("first")).await.unwrap().unwrap();

    // Let the coordinator go idle, then submit again.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(pool.in_flight(), 0);

    let outcome = pool.submit(task("second")).await.unwrap().unwrap();
    assert!(!outcome.description.is_empty());
}

#[tokio::test]
async fn in_flight_never_exceeds_pool_size_under_load() {
    let describer = SleepDescriber::new(Duration::from_millis(30));
    let pool = WorkerPool::new(2, describer.clone());

    let futures: Vec<_> = (0..10).map(|i| pool.submit(task(&format!("t{}", i)))).collect();
    for rx in futures {
        rx.await.unwrap().unwrap();
    }

    assert!(describer.peak.load(Ordering::SeqCst) <= 2);
}
