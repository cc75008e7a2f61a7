//! The generic StreamWorker loop.
//!
//! A worker claims a batch, hands each job to its processor and settles every
//! lease with exactly one queue operation:
//! - success: `ack`
//! - transient failure within the retry budget: `requeue` the retry copy with backoff
//! - permanent failure, or retries exhausted: `dead_letter`

use crate::config::WorkerConfig;
use crate::error::StreamError;
use crate::event::StreamEvent;
use crate::metrics::StreamMetrics;
use crate::queue::{JobOutcome, JobQueue};
use crate::registry::{StreamJob, StreamProcessor};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

const MAX_BACKOFF_SECS: u64 = 30;

/// Generic worker that processes jobs from a [`JobQueue`] with a processor.
///
/// Jobs of one batch run sequentially unless `max_concurrent_jobs > 1`, in
/// which case a semaphore bounds how many run at once.
pub struct StreamWorker<J, P>
where
    J: StreamJob,
    P: StreamProcessor<J>,
{
    queue: Arc<dyn JobQueue<J>>,
    processor: Arc<P>,
    config: WorkerConfig,
    semaphore: Arc<Semaphore>,
    metrics: StreamMetrics,
}

impl<J, P> StreamWorker<J, P>
where
    J: StreamJob,
    P: StreamProcessor<J> + 'static,
{
    pub fn new(queue: Arc<dyn JobQueue<J>>, processor: P, config: WorkerConfig) -> Self {
        Self::with_arc_processor(queue, Arc::new(processor), config)
    }

    pub fn with_arc_processor(
        queue: Arc<dyn JobQueue<J>>,
        processor: Arc<P>,
        config: WorkerConfig,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1)));
        let metrics = StreamMetrics::new(config.stream_name.clone(), processor.name());
        Self {
            queue,
            processor,
            config,
            semaphore,
            metrics,
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn queue(&self) -> Arc<dyn JobQueue<J>> {
        Arc::clone(&self.queue)
    }

    /// Run until the shutdown flag flips to `true` (or its sender is dropped).
    ///
    /// Shutdown is observed between batches; a claimed batch always completes.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), StreamError> {
        info!(
            consumer_id = %self.config.consumer_id,
            stream = %self.config.stream_name,
            group = %self.config.consumer_group,
            processor = %self.processor.name(),
            max_concurrent_jobs = self.config.max_concurrent_jobs,
            batch_size = self.config.batch_size,
            "Starting stream worker"
        );

        self.queue.init().await?;

        let mut consecutive_errors: u32 = 0;

        loop {
            if *shutdown.borrow() {
                info!("Received shutdown signal, stopping worker");
                break;
            }

            let idle = match self.poll_once().await {
                Ok(outcomes) => {
                    if consecutive_errors > 0 {
                        info!(consecutive_errors, "Queue recovered");
                        consecutive_errors = 0;
                    }
                    outcomes.is_empty()
                }
                Err(e) => {
                    consecutive_errors += 1;
                    let backoff_secs =
                        2u64.pow(consecutive_errors.min(5)).min(MAX_BACKOFF_SECS);
                    if e.is_connection_error() {
                        warn!(error = %e, consecutive_errors, backoff_secs, "Queue connection error, backing off");
                    } else {
                        error!(error = %e, consecutive_errors, backoff_secs, "Error claiming batch");
                    }
                    if Self::sleep_or_shutdown(&mut shutdown, Duration::from_secs(backoff_secs)).await {
                        break;
                    }
                    continue;
                }
            };

            // Blocking claims already waited inside the queue
            if idle
                && self.config.blocking_timeout_ms.is_none()
                && Self::sleep_or_shutdown(&mut shutdown, self.config.poll_interval()).await
            {
                break;
            }
        }

        info!("Stream worker stopped");
        Ok(())
    }

    /// Returns true when shutdown was requested during the sleep.
    async fn sleep_or_shutdown(shutdown: &mut watch::Receiver<bool>, duration: Duration) -> bool {
        tokio::select! {
            changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
            _ = tokio::time::sleep(duration) => false,
        }
    }

    /// Claim one batch and settle every job in it.
    ///
    /// Returns one outcome per settled job. A job whose settling queue call
    /// failed is logged and left leased, so it is redelivered after the lease expires.
    pub async fn poll_once(&self) -> Result<Vec<JobOutcome>, StreamError> {
        let events = self.queue.claim(self.config.batch_size).await?;
        if events.is_empty() {
            return Ok(vec![]);
        }

        debug!(count = events.len(), "Claimed batch");

        if self.config.max_concurrent_jobs <= 1 {
            let mut outcomes = Vec::with_capacity(events.len());
            for event in events {
                let settled = Self::handle_event(
                    self.queue.as_ref(),
                    self.processor.as_ref(),
                    &self.config,
                    &self.metrics,
                    event,
                )
                .await;
                outcomes.extend(settled);
            }
            return Ok(outcomes);
        }

        Ok(self.process_concurrent(events).await)
    }

    async fn process_concurrent(&self, events: Vec<StreamEvent<J>>) -> Vec<JobOutcome> {
        let mut join_set: JoinSet<Option<JobOutcome>> = JoinSet::new();
        let in_flight = Arc::new(AtomicUsize::new(0));

        for event in events {
            let semaphore = Arc::clone(&self.semaphore);
            let queue = Arc::clone(&self.queue);
            let processor = Arc::clone(&self.processor);
            let config = self.config.clone();
            let metrics = self.metrics.clone();
            let in_flight = Arc::clone(&in_flight);

            join_set.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return None;
                };
                metrics.in_flight(in_flight.fetch_add(1, Ordering::SeqCst) + 1);

                let outcome =
                    Self::handle_event(queue.as_ref(), processor.as_ref(), &config, &metrics, event)
                        .await;

                metrics.in_flight(in_flight.fetch_sub(1, Ordering::SeqCst) - 1);
                outcome
            });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(Some(outcome)) => outcomes.push(outcome),
                Ok(None) => {}
                Err(e) => error!(error = %e, "Job task panicked"),
            }
        }
        outcomes
    }

    async fn handle_event(
        queue: &dyn JobQueue<J>,
        processor: &P,
        config: &WorkerConfig,
        metrics: &StreamMetrics,
        event: StreamEvent<J>,
    ) -> Option<JobOutcome> {
        let job_id = event.job_id();
        metrics.job_received();
        if event.is_redelivery() {
            metrics.message_reclaimed();
            warn!(
                job_id = %job_id,
                stream_id = %event.stream_id,
                delivery_count = event.delivery_count,
                "Processing redelivered job"
            );
        }

        let start = Instant::now();
        let result = processor.process(&event.job).await;

        let settled = match result {
            Ok(()) => {
                metrics.job_processed(start.elapsed());
                queue.ack(&event.stream_id).await.map(|()| {
                    debug!(job_id = %job_id, stream_id = %event.stream_id, "Job completed");
                    JobOutcome::Acked {
                        job_id: job_id.clone(),
                    }
                })
            }
            Err(e) => {
                let category = e.category();
                let retry_count = event.retry_count();
                metrics.job_failed(category);

                if config.retry.should_retry(category, retry_count) {
                    let delay = config.retry.backoff(retry_count);
                    let retry_job = event.job.with_retry();
                    metrics.job_retried();
                    warn!(
                        job_id = %job_id,
                        stream_id = %event.stream_id,
                        error = %e,
                        error_category = ?category,
                        retry_attempt = retry_count + 1,
                        delay_ms = delay.as_millis() as u64,
                        "Job failed, scheduling retry with backoff"
                    );
                    queue
                        .requeue(&event.stream_id, &retry_job, delay)
                        .await
                        .map(|()| JobOutcome::Requeued {
                            job_id: job_id.clone(),
                            retry_count: retry_job.retry_count(),
                            delay,
                        })
                } else {
                    let reason = e.to_string();
                    metrics.job_moved_to_dlq();
                    error!(
                        job_id = %job_id,
                        stream_id = %event.stream_id,
                        error = %reason,
                        error_category = ?category,
                        retry_count,
                        "Job failed permanently, moving to DLQ"
                    );
                    queue
                        .dead_letter(&event.stream_id, &event.job, &reason)
                        .await
                        .map(|_| JobOutcome::DeadLettered {
                            job_id: job_id.clone(),
                            error: reason,
                        })
                }
            }
        };

        match settled {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                error!(
                    job_id = %job_id,
                    stream_id = %event.stream_id,
                    error = %e,
                    "Failed to settle job, leaving it leased"
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RetryPolicy;
    use crate::memory::InMemoryQueue;
    use crate::queue::QueueMonitor;
    use crate::testing::TestJob;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicU32;

    /// Processor returning scripted results, then `Ok(())`.
    struct ScriptedProcessor {
        script: Mutex<VecDeque<Result<(), StreamError>>>,
        calls: AtomicU32,
    }

    impl ScriptedProcessor {
        fn new(script: Vec<Result<(), StreamError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl StreamProcessor<TestJob> for ScriptedProcessor {
        async fn process(&self, _job: &TestJob) -> Result<(), StreamError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script.lock().unwrap().pop_front().unwrap_or(Ok(()))
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }

    /// Processor that takes a fixed time per job and records every call.
    struct SlowProcessor {
        delay: Duration,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl StreamProcessor<TestJob> for SlowProcessor {
        async fn process(&self, job: &TestJob) -> Result<(), StreamError> {
            self.seen.lock().unwrap().push(job.job_id());
            tokio::time::sleep(self.delay).await;
            Ok(())
        }

        fn name(&self) -> &'static str {
            "slow"
        }
    }

    fn setup(
        script: Vec<Result<(), StreamError>>,
        config: WorkerConfig,
    ) -> (Arc<InMemoryQueue>, Arc<ScriptedProcessor>, StreamWorker<TestJob, ScriptedProcessor>) {
        let queue = Arc::new(InMemoryQueue::from_config(&config));
        let processor = Arc::new(ScriptedProcessor::new(script));
        let worker = StreamWorker::with_arc_processor(
            queue.clone() as Arc<dyn JobQueue<TestJob>>,
            Arc::clone(&processor),
            config,
        );
        (queue, processor, worker)
    }

    fn config() -> WorkerConfig {
        WorkerConfig::new("test:jobs", "test_workers")
            .with_blocking(None)
            .with_retry_policy(RetryPolicy::immediate(3))
    }

    #[tokio::test]
    async fn test_success_is_acked() {
        let (queue, processor, worker) = setup(vec![], config());
        JobQueue::<TestJob>::enqueue(queue.as_ref(), &TestJob::new("a")).await.unwrap();

        let outcomes = worker.poll_once().await.unwrap();

        assert_eq!(
            outcomes,
            vec![JobOutcome::Acked {
                job_id: "a".to_string()
            }]
        );
        assert_eq!(processor.calls(), 1);
        assert_eq!(queue.stats().await.unwrap().pending, 0);
    }

    #[tokio::test]
    async fn test_transient_then_success_is_acked_after_one_retry() {
        let (queue, processor, worker) =
            setup(vec![Err(StreamError::transient("smtp busy"))], config());
        JobQueue::<TestJob>::enqueue(queue.as_ref(), &TestJob::new("a")).await.unwrap();

        let first = worker.poll_once().await.unwrap();
        assert!(matches!(
            first.as_slice(),
            [JobOutcome::Requeued { retry_count: 1, .. }]
        ));

        let second = worker.poll_once().await.unwrap();
        assert_eq!(second[0].status(), "acked");
        assert_eq!(processor.calls(), 2);

        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.dlq_length, 0);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_dead_lettered_without_retry() {
        let (queue, processor, worker) =
            setup(vec![Err(StreamError::permanent("template missing"))], config());
        JobQueue::<TestJob>::enqueue(queue.as_ref(), &TestJob::new("a")).await.unwrap();

        let outcomes = worker.poll_once().await.unwrap();
        match outcomes.as_slice() {
            [JobOutcome::DeadLettered { job_id, error }] => {
                assert_eq!(job_id, "a");
                assert!(error.contains("template missing"));
            }
            other => panic!("unexpected outcomes: {other:?}"),
        }

        assert!(worker.poll_once().await.unwrap().is_empty());
        assert_eq!(processor.calls(), 1);
        assert_eq!(queue.dead_letters(10, 0).await.unwrap()[0].retry_count, 0);
    }

    #[tokio::test]
    async fn test_retries_exhausted_moves_to_dlq() {
        let script = (0..4).map(|_| Err(StreamError::transient("down"))).collect();
        let (queue, processor, worker) = setup(script, config().with_max_retries(2));
        JobQueue::<TestJob>::enqueue(queue.as_ref(), &TestJob::new("a")).await.unwrap();

        let statuses: Vec<&str> = {
            let mut all = Vec::new();
            for _ in 0..3 {
                all.extend(worker.poll_once().await.unwrap());
            }
            all.iter().map(JobOutcome::status).collect()
        };

        assert_eq!(statuses, ["requeued", "requeued", "dead_lettered"]);
        assert_eq!(processor.calls(), 3);

        let entries = queue.dead_letters(10, 0).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].retry_count, 2);
    }

    #[tokio::test]
    async fn test_backoff_delay_is_applied_to_requeue() {
        let policy = RetryPolicy::new(3).with_base_delay(Duration::from_millis(40));
        let (queue, _processor, worker) = setup(
            vec![Err(StreamError::transient("busy"))],
            config().with_retry_policy(policy),
        );
        JobQueue::<TestJob>::enqueue(queue.as_ref(), &TestJob::new("a")).await.unwrap();

        let first = worker.poll_once().await.unwrap();
        assert!(matches!(
            first.as_slice(),
            [JobOutcome::Requeued { delay, .. }] if *delay == Duration::from_millis(40)
        ));

        assert!(worker.poll_once().await.unwrap().is_empty());
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(worker.poll_once().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_batch_settles_every_job() {
        let (queue, processor, worker) =
            setup(vec![], config().with_max_concurrent_jobs(4).with_batch_size(10));
        for i in 0..6 {
            JobQueue::<TestJob>::enqueue(queue.as_ref(), &TestJob::new(&format!("job-{i}")))
                .await
                .unwrap();
        }

        let outcomes = worker.poll_once().await.unwrap();

        assert_eq!(outcomes.len(), 6);
        assert!(outcomes.iter().all(|o| o.status() == "acked"));
        assert_eq!(processor.calls(), 6);
    }

    #[tokio::test]
    async fn test_two_workers_sharing_a_queue_process_each_job_once() {
        // Three jobs of 40ms each outlast a 100ms lease only when claimed together
        let config = config()
            .with_batch_size(1)
            .with_claim_timeout_ms(100)
            .with_poll_interval_ms(5);
        let queue = Arc::new(InMemoryQueue::from_config(&config));
        let processor = Arc::new(SlowProcessor {
            delay: Duration::from_millis(40),
            seen: Mutex::new(Vec::new()),
        });
        for id in ["a", "b", "c"] {
            JobQueue::<TestJob>::enqueue(queue.as_ref(), &TestJob::new(id)).await.unwrap();
        }

        let (tx, rx) = watch::channel(false);
        let mut handles = Vec::new();
        for consumer in ["worker-1", "worker-2"] {
            let worker = StreamWorker::with_arc_processor(
                queue.clone() as Arc<dyn JobQueue<TestJob>>,
                Arc::clone(&processor),
                config.clone().with_consumer_id(consumer),
            );
            let rx = rx.clone();
            handles.push(tokio::spawn(async move { worker.run(rx).await }));
        }

        tokio::time::sleep(Duration::from_millis(400)).await;
        tx.send(true).unwrap();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let mut seen = processor.seen.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen, ["a", "b", "c"]);

        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.length, 0);
        assert_eq!(stats.pending, 0);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (queue, processor, worker) = setup(vec![], config().with_poll_interval_ms(10));
        JobQueue::<TestJob>::enqueue(queue.as_ref(), &TestJob::new("a")).await.unwrap();

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move { worker.run(rx).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("worker did not stop")
            .unwrap()
            .unwrap();
        assert_eq!(processor.calls(), 1);
    }
}
