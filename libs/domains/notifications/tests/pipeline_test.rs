//! End-to-end dispatch over the in-memory queue: submit, claim, render, deliver.

use async_trait::async_trait;
use domain_notifications::{
    ComposedMessage, ContextValue, DispatchJob, DispatchProcessor, EmailProvider,
    InMemoryTemplateStore, NotificationService, RawSendRequest, RenderContext, Renderer,
    SenderPolicy, SentEmail, SubmitError, TemplateResolver, TemplateStore, TransportError,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use stream_worker::{
    InMemoryQueue, JobOutcome, QueueMonitor, RetryPolicy, StreamWorker, WorkerConfig,
};

/// Records every delivery attempt and answers from a script, then succeeds.
#[derive(Default)]
struct RecordingProvider {
    script: Mutex<VecDeque<TransportError>>,
    attempts: Mutex<Vec<ComposedMessage>>,
}

impl RecordingProvider {
    fn failing_with(errors: Vec<TransportError>) -> Self {
        Self {
            script: Mutex::new(errors.into()),
            ..Default::default()
        }
    }

    fn attempts(&self) -> Vec<ComposedMessage> {
        self.attempts.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmailProvider for RecordingProvider {
    async fn send(&self, message: &ComposedMessage) -> Result<SentEmail, TransportError> {
        self.attempts.lock().unwrap().push(message.clone());
        match self.script.lock().unwrap().pop_front() {
            Some(err) => Err(err),
            None => Ok(SentEmail {
                message_id: Some("250 queued".to_string()),
            }),
        }
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

struct Pipeline {
    queue: Arc<InMemoryQueue>,
    store: Arc<InMemoryTemplateStore>,
    provider: Arc<RecordingProvider>,
    service: NotificationService,
    worker: StreamWorker<DispatchJob, DispatchProcessor>,
}

impl Pipeline {
    fn new(provider: RecordingProvider) -> Self {
        let queue = Arc::new(InMemoryQueue::new("email:jobs"));
        let store = Arc::new(InMemoryTemplateStore::new());
        let provider = Arc::new(provider);

        let processor = DispatchProcessor::new(
            Arc::new(TemplateResolver::new(store.clone())),
            Renderer::new(),
            provider.clone(),
        );
        let config = WorkerConfig::new("email:jobs", "email_workers")
            .with_blocking(None)
            .with_retry_policy(RetryPolicy::immediate(3));

        Self {
            service: NotificationService::new(queue.clone(), SenderPolicy::new(["example.org"])),
            worker: StreamWorker::new(queue.clone(), processor, config),
            queue,
            store,
            provider,
        }
    }
}

fn raw(to: &str, subject: &str) -> RawSendRequest {
    RawSendRequest {
        to: Some(to.to_string()),
        subject: Some(subject.to_string()),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_invalid_recipient_never_reaches_the_queue() {
    let pipeline = Pipeline::new(RecordingProvider::default());

    let result = pipeline.service.submit(raw("not-an-email", "Hi")).await;
    assert!(matches!(result, Err(SubmitError::Validation(_))));

    assert_eq!(pipeline.queue.stats().await.unwrap().length, 0);
    assert!(pipeline.worker.poll_once().await.unwrap().is_empty());
    assert!(pipeline.provider.attempts().is_empty());
}

#[tokio::test]
async fn test_raw_body_is_delivered_unchanged() {
    let pipeline = Pipeline::new(RecordingProvider::default());
    let mut request = raw("user@example.com", "Hi");
    request.body = Some("<p>Hi</p>".to_string());

    let handle = pipeline.service.submit(request).await.unwrap();
    let outcomes = pipeline.worker.poll_once().await.unwrap();

    assert_eq!(
        outcomes,
        vec![JobOutcome::Acked {
            job_id: handle.job_id.to_string()
        }]
    );
    let attempts = pipeline.provider.attempts();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].body, "<p>Hi</p>");
    assert_eq!(attempts[0].to, "user@example.com");
    assert_eq!(attempts[0].from, None);
}

#[tokio::test]
async fn test_template_is_rendered_in_its_service() {
    let pipeline = Pipeline::new(RecordingProvider::default());
    pipeline
        .store
        .put("acme", "welcome", "Hello {{name}}")
        .await
        .unwrap();

    let mut context = RenderContext::new();
    context.insert("name".to_string(), ContextValue::from("Ana"));
    let mut request = raw("user@example.com", "Welcome");
    request.template = Some("welcome".to_string());
    request.context = Some(context);
    request.service = Some("acme".to_string());
    request.from = Some("team@example.org".to_string());

    pipeline.service.submit(request).await.unwrap();
    let outcomes = pipeline.worker.poll_once().await.unwrap();

    assert_eq!(outcomes[0].status(), "acked");
    let attempts = pipeline.provider.attempts();
    assert_eq!(attempts[0].body, "Hello Ana");
    assert_eq!(attempts[0].subject, "Welcome");
    assert_eq!(attempts[0].from.as_deref(), Some("team@example.org"));
}

#[tokio::test]
async fn test_missing_template_is_dead_lettered_without_sending() {
    let pipeline = Pipeline::new(RecordingProvider::default());
    pipeline.store.put("acme", "welcome", "Hello").await.unwrap();

    let mut request = raw("user@example.com", "Welcome");
    request.template = Some("welcome".to_string());
    let handle = pipeline.service.submit(request).await.unwrap();

    let outcomes = pipeline.worker.poll_once().await.unwrap();

    match &outcomes[..] {
        [JobOutcome::DeadLettered { job_id, error }] => {
            assert_eq!(job_id, &handle.job_id.to_string());
            assert!(error.contains("not found"), "unexpected error: {error}");
        }
        other => panic!("expected a dead-lettered job, got {other:?}"),
    }
    assert!(pipeline.provider.attempts().is_empty());

    let dead = pipeline.queue.dead_letters(10, 0).await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].job_id, handle.job_id.to_string());
    assert_eq!(dead[0].original_stream_id, handle.stream_id);
    let job: DispatchJob = dead[0].job().unwrap();
    assert_eq!(job.request.template.as_deref(), Some("welcome"));
}

#[tokio::test]
async fn test_transient_failure_then_success_is_acked() {
    let pipeline = Pipeline::new(RecordingProvider::failing_with(vec![
        TransportError::Transient("421 try again later".to_string()),
    ]));
    let mut request = raw("user@example.com", "Hi");
    request.body = Some("body".to_string());
    let handle = pipeline.service.submit(request).await.unwrap();

    let first = pipeline.worker.poll_once().await.unwrap();
    assert!(matches!(
        &first[..],
        [JobOutcome::Requeued { retry_count: 1, .. }]
    ));

    let second = pipeline.worker.poll_once().await.unwrap();
    assert_eq!(
        second,
        vec![JobOutcome::Acked {
            job_id: handle.job_id.to_string()
        }]
    );

    assert_eq!(pipeline.provider.attempts().len(), 2);
    let stats = pipeline.queue.stats().await.unwrap();
    assert_eq!(stats.length, 0);
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.dlq_length, 0);
}

#[tokio::test]
async fn test_permanent_transport_failure_is_not_retried() {
    let pipeline = Pipeline::new(RecordingProvider::failing_with(vec![
        TransportError::Permanent("550 mailbox unavailable".to_string()),
    ]));
    pipeline
        .service
        .submit(raw("user@example.com", "Hi"))
        .await
        .unwrap();

    let outcomes = pipeline.worker.poll_once().await.unwrap();

    assert_eq!(outcomes[0].status(), "dead_lettered");
    assert_eq!(pipeline.provider.attempts().len(), 1);
    assert_eq!(pipeline.queue.stats().await.unwrap().dlq_length, 1);
}

#[tokio::test]
async fn test_retries_are_bounded() {
    let pipeline = Pipeline::new(RecordingProvider::failing_with(vec![
        TransportError::Transient("connection refused".to_string());
        10
    ]));
    pipeline
        .service
        .submit(raw("user@example.com", "Hi"))
        .await
        .unwrap();

    let mut statuses = Vec::new();
    for _ in 0..4 {
        let outcomes = pipeline.worker.poll_once().await.unwrap();
        statuses.extend(outcomes.iter().map(|o| o.status()));
    }

    assert_eq!(
        statuses,
        vec!["requeued", "requeued", "requeued", "dead_lettered"]
    );
    assert_eq!(pipeline.provider.attempts().len(), 4);

    let dead = pipeline.queue.dead_letters(10, 0).await.unwrap();
    assert_eq!(dead[0].retry_count, 3);
}
