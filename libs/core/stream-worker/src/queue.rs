//! The dispatch queue contract.
//!
//! A queue is a durable, ordered, at-least-once channel with leases:
//! - `enqueue` appends and never waits on processing
//! - `claim` leases entries to the caller; leases that outlive the claim
//!   timeout are handed to the next claimer with a higher delivery count
//! - every claimed entry ends in exactly one of `ack`, `requeue` or `dead_letter`

use crate::dlq::{DlqEntry, DlqStats};
use crate::error::StreamError;
use crate::event::StreamEvent;
use crate::registry::StreamJob;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

/// Snapshot of a queue for monitoring endpoints
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueueStats {
    pub stream_name: String,
    /// Entries waiting to be claimed (for Redis, the consumer group's lag)
    pub length: i64,
    /// Entries leased but not yet acknowledged
    pub pending: i64,
    /// Retry copies not yet visible
    pub delayed: i64,
    pub dlq_length: i64,
}

/// Operator view of a queue, independent of the job type.
#[async_trait]
pub trait QueueMonitor: Send + Sync {
    /// Backend liveness (Redis PING for the Redis queue)
    async fn ping(&self) -> Result<(), StreamError>;

    async fn stats(&self) -> Result<QueueStats, StreamError>;

    /// Oldest-first page of dead-lettered entries
    async fn dead_letters(&self, limit: usize, offset: usize)
    -> Result<Vec<DlqEntry>, StreamError>;

    async fn dlq_stats(&self) -> Result<DlqStats, StreamError>;
}

/// Durable job channel used by producers and the [`crate::StreamWorker`].
#[async_trait]
pub trait JobQueue<J: StreamJob>: QueueMonitor {
    /// Prepare backend structures (consumer group, stream). Idempotent.
    async fn init(&self) -> Result<(), StreamError> {
        Ok(())
    }

    /// Append a job; returns its stream entry ID.
    async fn enqueue(&self, job: &J) -> Result<String, StreamError>;

    /// Lease up to `count` entries, waiting at most the configured blocking
    /// timeout when none are available. Expired leases come first.
    async fn claim(&self, count: usize) -> Result<Vec<StreamEvent<J>>, StreamError>;

    /// Complete a lease.
    async fn ack(&self, stream_id: &str) -> Result<(), StreamError>;

    /// Append `job` (the retry copy) visible after `delay`, then ack `stream_id`.
    async fn requeue(&self, stream_id: &str, job: &J, delay: Duration)
    -> Result<(), StreamError>;

    /// Record a DLQ entry for `job`, then ack `stream_id`. Returns the DLQ entry ID.
    async fn dead_letter(&self, stream_id: &str, job: &J, error: &str)
    -> Result<String, StreamError>;
}

/// Terminal state of one claimed job after a worker pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Acked {
        job_id: String,
    },
    Requeued {
        job_id: String,
        retry_count: u32,
        delay: Duration,
    },
    DeadLettered {
        job_id: String,
        error: String,
    },
}

impl JobOutcome {
    pub fn job_id(&self) -> &str {
        match self {
            JobOutcome::Acked { job_id }
            | JobOutcome::Requeued { job_id, .. }
            | JobOutcome::DeadLettered { job_id, .. } => job_id,
        }
    }

    pub fn status(&self) -> &'static str {
        match self {
            JobOutcome::Acked { .. } => "acked",
            JobOutcome::Requeued { .. } => "requeued",
            JobOutcome::DeadLettered { .. } => "dead_lettered",
        }
    }
}
