//! Cluster Error Taxonomy
//!
//! Every fallible operation in the core maps onto one of these variants so that
//! the dispatcher and the job queue can decide uniformly whether an error is
//! retryable and what to report to the client.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClusterError {
    /// Malformed client input: broken multipart body, missing image part,
    /// or a replication factor larger than the partition count.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The shard store rejected a write because the partition hit its cap.
    #[error("partition {0} is full")]
    PartitionFull(u32),

    /// Lookup for a key that no partition holds.
    #[error("key not found: {0}")]
    NotFound(String),

    /// The describer failed in a way worth retrying: 5xx, 429, timeout,
    /// or a connection-level failure.
    #[error("describer transient failure: {0}")]
    DescribeTransient(String),

    /// The describer rejected the request or returned an unparseable body.
    /// Retrying will not help.
    #[error("describer permanent failure: {0}")]
    DescribePermanent(String),

    /// The job queue's backing store could not be reached.
    #[error("queue unavailable: {0}")]
    QueueUnavailable(String),

    /// The object store could not be reached or refused the operation.
    #[error("object storage unavailable: {0}")]
    StorageUnavailable(String),

    /// The client went away mid-stream. Informational; never sent to clients.
    #[error("client stream closed")]
    StreamClosed,
}

impl ClusterError {
    /// Stable machine-readable tag, used in terminal result events and in
    /// persisted failure records.
    pub fn kind(&self) -> &'static str {
        match self {
            ClusterError::InvalidInput(_) => "invalid_input",
            ClusterError::PartitionFull(_) => "partition_full",
            ClusterError::NotFound(_) => "not_found",
            ClusterError::DescribeTransient(_) => "describe_transient",
            ClusterError::DescribePermanent(_) => "describe_permanent",
            ClusterError::QueueUnavailable(_) => "queue_unavailable",
            ClusterError::StorageUnavailable(_) => "storage_unavailable",
            ClusterError::StreamClosed => "stream_closed",
        }
    }

    /// Only transient describer failures and an unreachable queue warrant a
    /// retry; every other class terminates the job on first occurrence.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClusterError::DescribeTransient(_) | ClusterError::QueueUnavailable(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(ClusterError::DescribeTransient("timeout".into()).is_retryable());
        assert!(ClusterError::QueueUnavailable("down".into()).is_retryable());
        assert!(!ClusterError::DescribePermanent("bad model".into()).is_retryable());
        assert!(!ClusterError::PartitionFull(3).is_retryable());
        assert!(!ClusterError::NotFound("k".into()).is_retryable());
    }

    #[test]
    fn kind_tags_are_stable() {
        assert_eq!(ClusterError::InvalidInput("x".into()).kind(), "invalid_input");
        assert_eq!(ClusterError::StreamClosed.kind(), "stream_closed");
        assert_eq!(
            ClusterError::DescribeTransient("x".into()).kind(),
            "describe_transient"
        );
    }
}
