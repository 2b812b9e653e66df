//! Distributed Job Queue Module
//!
//! The cross-process counterpart of the worker pool: the same logical
//! contract (submit a task, eventually get one terminal outcome) stretched
//! across multiple worker processes, each assigned a disjoint subset of
//! partitions.
//!
//! ## Architecture Overview
//! The queue follows a **pull-based** model with **lease** management:
//! 1. **Submission**: `enqueue` records a job under the partition its key
//!    hashed to, with a priority class and a retry budget.
//! 2. **Leasing**: A worker process leases a job only when the job's
//!    partition is in the worker's assigned set (partition affinity). The
//!    lease carries an expiry; an expired, uncompleted lease counts a stall
//!    and makes the job leasable again. Three stalls kill the job.
//! 3. **Execution**: The worker fetches the payload from the object store,
//!    runs the describe call under a renewal heartbeat, and reports the
//!    outcome back.
//! 4. **Retry**: Transient failures reschedule with exponential backoff
//!    (per-priority base); everything else is terminal on first occurrence.
//!
//! ## Submodules
//! - **`queue`**: The queue plane itself: state, leasing, retry, retention.
//! - **`worker`**: The worker-process runtime that leases and executes jobs.
//! - **`protocol`**: HTTP contracts between worker processes and the plane.
//! - **`handlers`**: Axum handlers exposing the plane to worker processes.

pub mod handlers;
pub mod protocol;
pub mod queue;
pub mod types;
pub mod worker;

pub use queue::JobQueue;
pub use types::{JobPriority, JobSpec, QueuedJob};
