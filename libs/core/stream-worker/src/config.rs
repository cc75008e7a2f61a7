//! Worker configuration
//!
//! `WorkerConfig` drives both the queue implementations (stream names, lease
//! and blocking timeouts) and the worker loop (batching, concurrency, retries).

use crate::error::RetryPolicy;
use crate::registry::StreamDef;
use std::time::Duration;
use uuid::Uuid;

/// Configuration for the stream worker
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Redis stream name
    pub stream_name: String,

    /// Consumer group name
    pub consumer_group: String,

    /// Unique consumer ID (auto-generated if not provided)
    pub consumer_id: String,

    /// Dead letter queue stream name
    pub dlq_stream: String,

    /// Maximum stream length before trimming
    pub max_length: i64,

    /// Sleep between empty polls when claims do not block
    pub poll_interval_ms: u64,

    /// Batch size for claiming messages
    pub batch_size: usize,

    /// Blocking claim timeout in milliseconds (None = non-blocking)
    pub blocking_timeout_ms: Option<u64>,

    /// Maximum concurrent jobs to process
    pub max_concurrent_jobs: usize,

    /// Lease duration in milliseconds; older unacknowledged messages are reclaimed
    pub claim_timeout_ms: u64,

    /// Requeue budget and backoff for transient failures
    pub retry: RetryPolicy,
}

impl WorkerConfig {
    /// Create a new WorkerConfig from a StreamDef
    pub fn from_stream_def<S: StreamDef>() -> Self {
        Self {
            stream_name: S::STREAM_NAME.to_string(),
            consumer_group: S::CONSUMER_GROUP.to_string(),
            dlq_stream: S::DLQ_STREAM.to_string(),
            max_length: S::MAX_LENGTH,
            batch_size: S::BATCH_SIZE,
            claim_timeout_ms: S::CLAIM_TIMEOUT_MS,
            ..Self::new(S::STREAM_NAME, S::CONSUMER_GROUP)
        }
    }

    /// Create a new WorkerConfig with explicit values
    pub fn new(stream_name: impl Into<String>, consumer_group: impl Into<String>) -> Self {
        let stream_name = stream_name.into();
        let dlq_stream = format!("{}:dlq", stream_name);
        Self {
            stream_name,
            consumer_group: consumer_group.into(),
            consumer_id: format!("worker-{}", Uuid::new_v4()),
            dlq_stream,
            max_length: 100_000,
            poll_interval_ms: 1000,
            batch_size: 10,
            blocking_timeout_ms: Some(5000),
            max_concurrent_jobs: 1,
            claim_timeout_ms: 30_000,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_stream_name(mut self, stream: impl Into<String>) -> Self {
        self.stream_name = stream.into();
        self
    }

    pub fn with_consumer_group(mut self, group: impl Into<String>) -> Self {
        self.consumer_group = group.into();
        self
    }

    pub fn with_consumer_id(mut self, id: impl Into<String>) -> Self {
        self.consumer_id = id.into();
        self
    }

    pub fn with_dlq_stream(mut self, stream: impl Into<String>) -> Self {
        self.dlq_stream = stream.into();
        self
    }

    pub fn with_max_length(mut self, max_length: i64) -> Self {
        self.max_length = max_length;
        self
    }

    pub fn with_poll_interval_ms(mut self, interval: u64) -> Self {
        self.poll_interval_ms = interval;
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// Set the blocking timeout (None for non-blocking)
    pub fn with_blocking(mut self, timeout_ms: Option<u64>) -> Self {
        self.blocking_timeout_ms = timeout_ms;
        self
    }

    pub fn with_max_concurrent_jobs(mut self, count: usize) -> Self {
        self.max_concurrent_jobs = count.max(1);
        self
    }

    pub fn with_claim_timeout_ms(mut self, timeout: u64) -> Self {
        self.claim_timeout_ms = timeout;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.retry.max_retries = max_retries;
        self
    }

    pub fn claim_timeout(&self) -> Duration {
        Duration::from_millis(self.claim_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn blocking_timeout(&self) -> Option<Duration> {
        self.blocking_timeout_ms.map(Duration::from_millis)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::new("stream:jobs", "workers")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestStream;

    impl StreamDef for TestStream {
        const STREAM_NAME: &'static str = "test:stream";
        const CONSUMER_GROUP: &'static str = "test:group";
        const DLQ_STREAM: &'static str = "test:dead";
        const CLAIM_TIMEOUT_MS: u64 = 5_000;
    }

    #[test]
    fn test_from_stream_def() {
        let config = WorkerConfig::from_stream_def::<TestStream>();

        assert_eq!(config.stream_name, "test:stream");
        assert_eq!(config.consumer_group, "test:group");
        assert_eq!(config.dlq_stream, "test:dead");
        assert_eq!(config.claim_timeout(), Duration::from_secs(5));
        assert!(config.consumer_id.starts_with("worker-"));
        assert_eq!(config.retry, RetryPolicy::default());
    }

    #[test]
    fn test_builder_pattern() {
        let config = WorkerConfig::new("my:stream", "my:group")
            .with_consumer_id("worker-1")
            .with_batch_size(20)
            .with_max_concurrent_jobs(0)
            .with_max_retries(5)
            .with_blocking(Some(10_000));

        assert_eq!(config.stream_name, "my:stream");
        assert_eq!(config.dlq_stream, "my:stream:dlq");
        assert_eq!(config.consumer_id, "worker-1");
        assert_eq!(config.batch_size, 20);
        assert_eq!(config.max_concurrent_jobs, 1);
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.blocking_timeout(), Some(Duration::from_secs(10)));
    }
}
