//! Dispatch Module
//!
//! The request-scoped orchestration layer. A batch comes in as multipart
//! form data and leaves as a chunked event stream: counters, logs, worker
//! and partition snapshots, per-task progress and terminal results, all
//! multiplexed onto one channel owned by the request handler.
//!
//! ## Submodules
//! - **`events`**: The wire shapes of every stream record.
//! - **`sink`**: The safe-write channel wrapper and the streaming response.
//! - **`handlers`**: `/process`, `/ingest`, `/health`, `/worker`.

pub mod events;
pub mod handlers;
pub mod sink;

#[cfg(test)]
mod tests;
