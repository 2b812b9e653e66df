//! Storage Module
//!
//! Everything that places or holds data:
//!
//! ## Core Concepts
//! - **Partitioning**: Keys map onto a fixed shard space via a deterministic
//!   32-bit hash (`Partitioner`), identical in every process.
//! - **Placement**: Each key has one primary partition; replicas occupy the
//!   following partitions, wrapping around.
//! - **Shard Store**: An in-memory model of partitioned placement used by the
//!   in-process dispatch path.
//! - **Object Store**: The S3/MinIO capability the distributed path uses for
//!   raw payloads and result documents.

pub mod object;
pub mod partitioner;
pub mod shard;

#[cfg(test)]
mod tests;
