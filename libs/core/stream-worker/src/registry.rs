//! Stream definitions and the job/processor traits.
//!
//! This module provides:
//! - `StreamDef` trait for domain-specific stream naming
//! - `StreamJob` trait for queue payloads
//! - `StreamProcessor` trait for job handlers

use crate::error::StreamError;
use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};

/// Stream definition trait.
///
/// Each domain implements this trait to define its stream configuration.
///
/// # Example
///
/// ```rust,ignore
/// use stream_worker::StreamDef;
///
/// pub struct EmailStream;
///
/// impl StreamDef for EmailStream {
///     const STREAM_NAME: &'static str = "email:jobs";
///     const CONSUMER_GROUP: &'static str = "email_workers";
///     const DLQ_STREAM: &'static str = "email:dlq";
/// }
/// ```
pub trait StreamDef: Send + Sync {
    /// The Redis stream name (e.g., "email:jobs").
    const STREAM_NAME: &'static str;

    /// The consumer group name for this stream.
    const CONSUMER_GROUP: &'static str;

    /// The dead letter queue stream name for failed jobs.
    const DLQ_STREAM: &'static str;

    /// Maximum stream length before auto-trim (MAXLEN ~).
    const MAX_LENGTH: i64 = 100_000;

    /// Messages per claim.
    const BATCH_SIZE: usize = 10;

    /// Lease duration before another consumer may reclaim a message.
    const CLAIM_TIMEOUT_MS: u64 = 30_000;

    fn stream_name() -> &'static str {
        Self::STREAM_NAME
    }

    fn consumer_group() -> &'static str {
        Self::CONSUMER_GROUP
    }

    fn dlq_stream() -> &'static str {
        Self::DLQ_STREAM
    }
}

/// Trait for queue payloads.
///
/// A job is immutable once enqueued except for its retry counter, which only
/// changes on the copy appended by a requeue.
///
/// ```rust,ignore
/// impl StreamJob for EmailJob {
///     fn job_id(&self) -> String {
///         self.id.to_string()
///     }
///
///     fn retry_count(&self) -> u32 {
///         self.retry_count
///     }
///
///     fn with_retry(&self) -> Self {
///         Self {
///             retry_count: self.retry_count + 1,
///             ..self.clone()
///         }
///     }
/// }
/// ```
pub trait StreamJob: Serialize + DeserializeOwned + Send + Sync + Clone + 'static {
    /// Returns the job ID for logging and tracking.
    fn job_id(&self) -> String;

    /// Returns how many times this job has been requeued.
    fn retry_count(&self) -> u32;

    /// Creates the retry copy with an incremented retry count.
    fn with_retry(&self) -> Self;
}

/// Trait for job processors.
///
/// Processors never retry internally: they return a categorized
/// [`StreamError`] and the worker decides between requeue and DLQ.
#[async_trait]
pub trait StreamProcessor<J: StreamJob>: Send + Sync {
    /// Process a single job.
    async fn process(&self, job: &J) -> Result<(), StreamError>;

    /// Processor name for logs and metric labels.
    fn name(&self) -> &'static str;

    /// Readiness of the processor's downstream dependencies.
    async fn health_check(&self) -> Result<bool, StreamError> {
        Ok(true)
    }
}
