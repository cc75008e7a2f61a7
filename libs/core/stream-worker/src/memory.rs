//! In-process queue with the same lease semantics as the Redis Streams queue.
//!
//! Used by tests and single-process deployments. Payloads are stored as JSON,
//! exactly like the `job` field of a stream entry, so a job that survives this
//! queue survives Redis too.

use crate::config::WorkerConfig;
use crate::dlq::{DlqEntry, DlqStats};
use crate::error::StreamError;
use crate::event::StreamEvent;
use crate::queue::{JobQueue, QueueMonitor, QueueStats};
use crate::registry::StreamJob;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
struct Entry {
    id: String,
    payload: String,
    delivery_count: u32,
}

#[derive(Debug)]
struct Lease {
    entry: Entry,
    expires_at: Instant,
}

#[derive(Debug)]
struct Delayed {
    entry: Entry,
    visible_at: Instant,
}

#[derive(Debug, Default)]
struct State {
    ready: VecDeque<Entry>,
    delayed: Vec<Delayed>,
    leases: Vec<Lease>,
    dlq: Vec<(String, DlqEntry)>,
    next_seq: u64,
}

impl State {
    fn next_id(&mut self) -> String {
        let seq = self.next_seq;
        self.next_seq += 1;
        format!("{}-{}", Utc::now().timestamp_millis(), seq)
    }

    fn release(&mut self, stream_id: &str) -> Result<Lease, StreamError> {
        let position = self
            .leases
            .iter()
            .position(|lease| lease.entry.id == stream_id)
            .ok_or_else(|| StreamError::UnknownEntry(stream_id.to_string()))?;
        Ok(self.leases.remove(position))
    }

    /// Move due retry copies to the ready queue, earliest first.
    fn promote_delayed(&mut self, now: Instant) {
        if self.delayed.is_empty() {
            return;
        }
        self.delayed.sort_by_key(|d| d.visible_at);
        let due = self.delayed.partition_point(|d| d.visible_at <= now);
        for delayed in self.delayed.drain(..due) {
            self.ready.push_back(delayed.entry);
        }
    }

    fn next_visible_at(&self) -> Option<Instant> {
        self.delayed.iter().map(|d| d.visible_at).min()
    }
}

/// In-memory lease queue
pub struct InMemoryQueue {
    stream_name: String,
    dlq_stream: String,
    claim_timeout: Duration,
    blocking_timeout: Option<Duration>,
    max_dlq_length: usize,
    state: Mutex<State>,
    notify: Notify,
}

impl InMemoryQueue {
    /// Non-blocking queue with a 30s lease.
    pub fn new(stream_name: impl Into<String>) -> Self {
        let stream_name = stream_name.into();
        Self {
            dlq_stream: format!("{}:dlq", stream_name),
            stream_name,
            claim_timeout: Duration::from_secs(30),
            blocking_timeout: None,
            max_dlq_length: 10_000,
            state: Mutex::new(State::default()),
            notify: Notify::new(),
        }
    }

    pub fn from_config(config: &WorkerConfig) -> Self {
        Self::new(config.stream_name.clone())
            .with_dlq_stream(config.dlq_stream.clone())
            .with_claim_timeout(config.claim_timeout())
            .with_blocking(config.blocking_timeout())
    }

    pub fn with_dlq_stream(mut self, stream: impl Into<String>) -> Self {
        self.dlq_stream = stream.into();
        self
    }

    pub fn with_claim_timeout(mut self, timeout: Duration) -> Self {
        self.claim_timeout = timeout;
        self
    }

    pub fn with_blocking(mut self, timeout: Option<Duration>) -> Self {
        self.blocking_timeout = timeout;
        self
    }

    pub fn with_max_dlq_length(mut self, max_length: usize) -> Self {
        self.max_dlq_length = max_length.max(1);
        self
    }

    fn push_dlq(&self, state: &mut State, entry: DlqEntry) -> String {
        let dlq_id = state.next_id();
        state.dlq.push((dlq_id.clone(), entry));
        if state.dlq.len() > self.max_dlq_length {
            let overflow = state.dlq.len() - self.max_dlq_length;
            state.dlq.drain(..overflow);
        }
        dlq_id
    }

    /// One non-blocking pass: reclaim expired leases, then lease ready entries.
    /// Returns the leased events and, when nothing was leased, the next instant
    /// at which a delayed entry becomes visible.
    async fn try_claim<J: StreamJob>(
        &self,
        count: usize,
    ) -> (Vec<StreamEvent<J>>, Option<Instant>) {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        state.promote_delayed(now);

        let mut leased: Vec<Entry> = Vec::new();

        let mut index = 0;
        while index < state.leases.len() && leased.len() < count {
            if state.leases[index].expires_at <= now {
                let lease = state.leases.remove(index);
                debug!(stream_id = %lease.entry.id, "Reclaiming expired lease");
                leased.push(lease.entry);
            } else {
                index += 1;
            }
        }

        while leased.len() < count {
            match state.ready.pop_front() {
                Some(entry) => leased.push(entry),
                None => break,
            }
        }

        let mut events = Vec::with_capacity(leased.len());
        for mut entry in leased {
            entry.delivery_count += 1;
            match serde_json::from_str::<J>(&entry.payload) {
                Ok(job) => {
                    events.push(StreamEvent::with_delivery_count(
                        entry.id.clone(),
                        job,
                        entry.delivery_count,
                    ));
                    state.leases.push(Lease {
                        entry,
                        expires_at: now + self.claim_timeout,
                    });
                }
                Err(e) => {
                    warn!(stream_id = %entry.id, error = %e, "Failed to parse job, moving to DLQ");
                    let dlq_entry = DlqEntry::malformed(&entry.payload, &e.to_string(), &entry.id);
                    self.push_dlq(&mut state, dlq_entry);
                }
            }
        }

        let wake_at = if events.is_empty() {
            state.next_visible_at()
        } else {
            None
        };
        (events, wake_at)
    }
}

#[async_trait]
impl QueueMonitor for InMemoryQueue {
    async fn ping(&self) -> Result<(), StreamError> {
        Ok(())
    }

    async fn stats(&self) -> Result<QueueStats, StreamError> {
        let state = self.state.lock().await;
        Ok(QueueStats {
            stream_name: self.stream_name.clone(),
            length: state.ready.len() as i64,
            pending: state.leases.len() as i64,
            delayed: state.delayed.len() as i64,
            dlq_length: state.dlq.len() as i64,
        })
    }

    async fn dead_letters(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<DlqEntry>, StreamError> {
        let state = self.state.lock().await;
        Ok(state
            .dlq
            .iter()
            .skip(offset)
            .take(limit)
            .map(|(_, entry)| entry.clone())
            .collect())
    }

    async fn dlq_stats(&self) -> Result<DlqStats, StreamError> {
        let state = self.state.lock().await;
        Ok(DlqStats {
            stream_name: self.dlq_stream.clone(),
            length: state.dlq.len() as i64,
            oldest_entry_id: state.dlq.first().map(|(id, _)| id.clone()),
            newest_entry_id: state.dlq.last().map(|(id, _)| id.clone()),
        })
    }
}

#[async_trait]
impl<J: StreamJob> JobQueue<J> for InMemoryQueue {
    async fn enqueue(&self, job: &J) -> Result<String, StreamError> {
        let payload = serde_json::to_string(job)?;
        let stream_id = {
            let mut state = self.state.lock().await;
            let id = state.next_id();
            state.ready.push_back(Entry {
                id: id.clone(),
                payload,
                delivery_count: 0,
            });
            id
        };
        self.notify.notify_one();

        debug!(stream = %self.stream_name, stream_id = %stream_id, "Enqueued job");
        Ok(stream_id)
    }

    async fn claim(&self, count: usize) -> Result<Vec<StreamEvent<J>>, StreamError> {
        let count = count.max(1);
        let (events, wake_at) = self.try_claim(count).await;
        if !events.is_empty() {
            return Ok(events);
        }

        let Some(block) = self.blocking_timeout.filter(|b| !b.is_zero()) else {
            return Ok(events);
        };

        let deadline = Instant::now() + block;
        let wait_until = wake_at.map_or(deadline, |at| at.min(deadline));
        let _ = tokio::time::timeout_at(wait_until, self.notify.notified()).await;

        Ok(self.try_claim(count).await.0)
    }

    async fn ack(&self, stream_id: &str) -> Result<(), StreamError> {
        self.state.lock().await.release(stream_id)?;
        debug!(stream_id = %stream_id, "Acknowledged message");
        Ok(())
    }

    async fn requeue(
        &self,
        stream_id: &str,
        job: &J,
        delay: Duration,
    ) -> Result<(), StreamError> {
        let payload = serde_json::to_string(job)?;
        {
            let mut state = self.state.lock().await;
            state.release(stream_id)?;
            let entry = Entry {
                id: state.next_id(),
                payload,
                delivery_count: 0,
            };
            if delay.is_zero() {
                state.ready.push_back(entry);
            } else {
                state.delayed.push(Delayed {
                    entry,
                    visible_at: Instant::now() + delay,
                });
            }
        }
        self.notify.notify_one();
        Ok(())
    }

    async fn dead_letter(
        &self,
        stream_id: &str,
        job: &J,
        error: &str,
    ) -> Result<String, StreamError> {
        let entry = DlqEntry::new(job, error, stream_id)?;
        let mut state = self.state.lock().await;
        state.release(stream_id)?;
        Ok(self.push_dlq(&mut state, entry))
    }
}
