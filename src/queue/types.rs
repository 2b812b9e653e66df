use serde::{Deserialize, Serialize};

/// Attempts a job may consume before it is declared failed.
pub const MAX_ATTEMPTS: u32 = 3;
/// How long a lease lives without renewal before the job is considered
/// stalled.
pub const DEFAULT_LEASE_TIMEOUT_MS: u64 = 30_000;
/// Stalls a job may survive before it is declared failed.
pub const MAX_STALLS: u32 = 3;
/// Most recent completed jobs kept for inspection.
pub const COMPLETED_RETENTION: usize = 1_000;
/// Most recent failed jobs kept for inspection.
pub const FAILED_RETENTION: usize = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    #[default]
    Normal,
    High,
}

impl JobPriority {
    /// Base delay for the exponential backoff schedule
    /// (`delay = base * 2^(attempts-1)`).
    pub fn backoff_base_ms(self) -> u64 {
        match self {
            JobPriority::Normal => 2_000,
            JobPriority::High => 1_000,
        }
    }

    /// Sort weight; higher leases first.
    pub fn weight(self) -> u8 {
        match self {
            JobPriority::Normal => 0,
            JobPriority::High => 1,
        }
    }
}

/// Immutable description of the work itself. The payload lives in the object
/// store; the queue only carries its key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    pub task_id: String,
    pub filename: String,
    pub bucket: String,
    pub object_key: String,
    pub partition: u32,
    pub submitted_at: u64,
    #[serde(default)]
    pub priority: JobPriority,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Leased,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobLease {
    pub worker_id: usize,
    pub expires_at: u64,
}

/// A job plus its queue-plane metadata. Mutated by leasing and completion,
/// removed when terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedJob {
    pub spec: JobSpec,
    pub state: JobState,
    /// Attempts started so far; incremented at lease time.
    pub attempts: u32,
    /// Epoch millis before which the job must not be leased.
    pub next_attempt_at: u64,
    pub lease: Option<JobLease>,
    pub stalls: u32,
    pub created_at: u64,
    pub last_error: Option<String>,
}

/// Terminal record kept in the retention windows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinishedJob {
    pub task_id: String,
    pub partition: u32,
    pub worker_id: Option<usize>,
    pub description: Option<String>,
    pub error_kind: Option<String>,
    pub error: Option<String>,
    pub attempts: u32,
    pub elapsed_ms: u64,
    pub finished_at: u64,
}

/// Outcome of reporting a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailOutcome {
    /// Rescheduled; leasable again at the embedded time.
    Retrying { next_attempt_at: u64 },
    /// Out of attempts or non-retryable; moved to the failed window.
    Terminal,
}

/// Aggregate queue counters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QueueDepth {
    pub pending: usize,
    pub leased: usize,
    pub completed: usize,
    pub failed: usize,
}

pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
