//! Submission side: validate, then enqueue.

use crate::models::{DispatchJob, JobHandle, RawSendRequest};
use crate::streams::EmailStream;
use crate::validation::{SenderPolicy, Violation, validate};
use std::sync::Arc;
use stream_worker::{JobQueue, StreamDef, StreamError, StreamMetrics};
use thiserror::Error;
use tracing::{info, instrument, warn};

/// Why a submission was not accepted.
#[derive(Debug, Error)]
pub enum SubmitError {
    /// Rejected before enqueue; nothing was queued.
    #[error("validation failed: {}", format_violations(.0))]
    Validation(Vec<Violation>),

    #[error("queue unavailable: {0}")]
    Queue(#[from] StreamError),
}

fn format_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(Violation::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Validates requests and appends them to the dispatch queue.
///
/// Never waits on delivery.
#[derive(Clone)]
pub struct NotificationService {
    queue: Arc<dyn JobQueue<DispatchJob>>,
    policy: SenderPolicy,
    metrics: StreamMetrics,
}

impl NotificationService {
    pub fn new(queue: Arc<dyn JobQueue<DispatchJob>>, policy: SenderPolicy) -> Self {
        Self {
            queue,
            policy,
            metrics: StreamMetrics::new(EmailStream::STREAM_NAME, "NotificationService"),
        }
    }

    /// Label metrics with a stream other than [`EmailStream`]'s default.
    pub fn with_stream_name(mut self, stream_name: impl Into<String>) -> Self {
        self.metrics = StreamMetrics::new(stream_name, "NotificationService");
        self
    }

    pub fn policy(&self) -> &SenderPolicy {
        &self.policy
    }

    #[instrument(skip(self, raw), fields(to = ?raw.to, template = ?raw.template))]
    pub async fn submit(&self, raw: RawSendRequest) -> Result<JobHandle, SubmitError> {
        let request = validate(raw, &self.policy).map_err(|violations| {
            warn!(violations = %format_violations(&violations), "Rejected send request");
            SubmitError::Validation(violations)
        })?;

        let job = DispatchJob::new(request);
        let stream_id = self.queue.enqueue(&job).await?;
        self.metrics.job_enqueued();

        info!(
            job_id = %job.id,
            stream_id = %stream_id,
            service = %job.request.service,
            "Queued email job"
        );

        Ok(JobHandle {
            job_id: job.id,
            stream_id,
        })
    }
}
