//! Worker Pool Module
//!
//! In-process dispatch: a single coordinator serializes assignment decisions
//! while N workers run describe calls in parallel.
//!
//! ## Architecture Overview
//! 1. **Submission**: `submit` appends to the coordinator's FIFO queue and
//!    wakes the coordinator if it is idle. The caller gets a future that
//!    resolves with the description and the worker that produced it.
//! 2. **Assignment**: The coordinator pops the head task, picks an idle
//!    worker (lowest id; fallback to least-loaded when all are busy), and
//!    fires the assignment callback before the task runs.
//! 3. **Execution**: Workers invoke the describer concurrently; the in-flight
//!    counter caps concurrency at the pool size.
//! 4. **Completion**: Each worker's completion flips its slot back to idle
//!    and signals the coordinator, which may be waiting for a free slot or
//!    draining toward idle.

pub mod pool;
pub mod types;

pub use pool::WorkerPool;
pub use types::{AssignmentHook, PoolCompletion, PoolFailure, PoolTask, WorkerSnapshot};

#[cfg(test)]
mod tests;
