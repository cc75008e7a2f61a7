//! Prometheus metrics for stream workers
//!
//! Provides observability into queue throughput and failure categories.

use crate::error::{ErrorCategory, StreamError};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use std::time::Duration;
use tracing::info;

static PROMETHEUS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the Prometheus recorder.
///
/// Call this once at startup. Subsequent calls are no-ops.
pub fn init_metrics() -> Result<(), StreamError> {
    PROMETHEUS_HANDLE.get_or_try_init(|| {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| StreamError::Config(format!("Failed to install Prometheus recorder: {e}")))?;
        info!("Prometheus metrics initialized");
        Ok::<_, StreamError>(handle)
    })?;
    Ok(())
}

/// Get the Prometheus handle for rendering metrics
pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

/// Render metrics in Prometheus text format
pub fn render_metrics() -> Option<String> {
    prometheus_handle().map(|h| h.render())
}

/// Per-stream metrics helper
#[derive(Clone)]
pub struct StreamMetrics {
    stream_name: String,
    processor_name: String,
}

impl StreamMetrics {
    pub fn new(stream_name: impl Into<String>, processor_name: impl Into<String>) -> Self {
        Self {
            stream_name: stream_name.into(),
            processor_name: processor_name.into(),
        }
    }

    /// Record a job appended by a producer
    pub fn job_enqueued(&self) {
        counter!(
            "stream_worker_jobs_enqueued_total",
            "stream" => self.stream_name.clone()
        )
        .increment(1);
    }

    pub fn job_received(&self) {
        counter!(
            "stream_worker_jobs_received_total",
            "stream" => self.stream_name.clone(),
            "processor" => self.processor_name.clone()
        )
        .increment(1);
    }

    pub fn job_processed(&self, duration: Duration) {
        counter!(
            "stream_worker_jobs_processed_total",
            "stream" => self.stream_name.clone(),
            "processor" => self.processor_name.clone(),
            "status" => "success"
        )
        .increment(1);

        histogram!(
            "stream_worker_job_duration_seconds",
            "stream" => self.stream_name.clone(),
            "processor" => self.processor_name.clone()
        )
        .record(duration.as_secs_f64());
    }

    pub fn job_failed(&self, category: ErrorCategory) {
        counter!(
            "stream_worker_jobs_processed_total",
            "stream" => self.stream_name.clone(),
            "processor" => self.processor_name.clone(),
            "status" => "failed"
        )
        .increment(1);

        counter!(
            "stream_worker_job_errors_total",
            "stream" => self.stream_name.clone(),
            "processor" => self.processor_name.clone(),
            "category" => category.as_str()
        )
        .increment(1);
    }

    pub fn job_retried(&self) {
        counter!(
            "stream_worker_jobs_retried_total",
            "stream" => self.stream_name.clone(),
            "processor" => self.processor_name.clone()
        )
        .increment(1);
    }

    pub fn job_moved_to_dlq(&self) {
        counter!(
            "stream_worker_jobs_dlq_total",
            "stream" => self.stream_name.clone(),
            "processor" => self.processor_name.clone()
        )
        .increment(1);
    }

    /// Record a redelivered message (expired lease)
    pub fn message_reclaimed(&self) {
        counter!(
            "stream_worker_messages_claimed_total",
            "stream" => self.stream_name.clone(),
            "processor" => self.processor_name.clone()
        )
        .increment(1);
    }

    pub fn in_flight(&self, count: usize) {
        gauge!(
            "stream_worker_in_flight_jobs",
            "stream" => self.stream_name.clone()
        )
        .set(count as f64);
    }
}
