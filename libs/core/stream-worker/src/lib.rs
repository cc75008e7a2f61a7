//! Stream Worker Framework
//!
//! A durable, at-least-once job queue with leases, plus the generic worker
//! that drains it.
//!
//! ## Features
//!
//! - **Queue contract**: `JobQueue<J>` with enqueue / claim / ack / requeue / dead_letter
//! - **Backends**: `RedisStreamQueue` (consumer groups, XCLAIM) and `InMemoryQueue`
//! - **Generic worker**: `StreamWorker<J, P>` settles every claimed job exactly once
//! - **Retry policy**: transient failures requeued with exponential backoff
//! - **Dead Letter Queue**: permanent failures and exhausted retries
//! - **Prometheus metrics** and K8s-style **health endpoints**
//!
//! ## Example
//!
//! ```ignore
//! use stream_worker::{RedisStreamQueue, StreamWorker, WorkerConfig};
//!
//! let config = WorkerConfig::from_stream_def::<EmailStream>();
//! let queue = Arc::new(RedisStreamQueue::new(redis, config.clone()));
//! let worker = StreamWorker::new(queue, processor, config);
//! worker.run(shutdown_rx).await?;
//! ```

mod config;
mod dlq;
mod error;
mod event;
mod health;
mod memory;
pub mod metrics;
mod queue;
mod redis_queue;
mod registry;
#[cfg(test)]
mod testing;
mod worker;

pub use config::WorkerConfig;
pub use dlq::{DlqEntry, DlqStats};
pub use error::{ErrorCategory, RetryPolicy, StreamError};
pub use event::StreamEvent;
pub use health::{HealthState, dlq_admin_router, full_admin_router, health_router};
pub use memory::InMemoryQueue;
pub use metrics::{StreamMetrics, init_metrics};
pub use queue::{JobOutcome, JobQueue, QueueMonitor, QueueStats};
pub use redis_queue::{RedisStreamQueue, connect, connect_with_retry};
pub use registry::{StreamDef, StreamJob, StreamProcessor};
pub use worker::StreamWorker;
