//! Sharded Image Description Cluster Library
//!
//! This library crate defines the core modules of the system. It serves as
//! the foundation for the binary executable (`main.rs`), which runs either
//! as the dispatching server or as a queue worker process.
//!
//! ## Architecture Modules
//! The system is composed of five loosely coupled subsystems:
//!
//! - **`storage`**: The placement layer. A deterministic partitioner maps
//!   keys onto a fixed shard space, an in-memory shard store models that
//!   placement for the in-process path, and an object-store adapter holds
//!   payloads for the distributed path.
//! - **`pool`**: The in-process execution engine. A single coordinator
//!   assigns queued tasks to N parallel workers and reports every assignment
//!   through a callback.
//! - **`queue`**: The distributed execution engine. A lease-based job queue
//!   with priorities, retry backoff and stall detection, plus the worker
//!   runtime that leases partition-affine jobs across process replicas.
//! - **`describe`**: The client for the external vision-language model that
//!   turns image bytes into text.
//! - **`dispatch`**: The request-scoped orchestrator that fuses upload,
//!   partition assignment, submission and result streaming into one event
//!   stream per batch.

pub mod config;
pub mod describe;
pub mod dispatch;
pub mod error;
pub mod pool;
pub mod queue;
pub mod storage;
