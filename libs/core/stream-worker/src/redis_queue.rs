//! Redis Streams implementation of [`JobQueue`].
//!
//! Layout for a stream `S` with consumer group `G`:
//! - `S`: the job stream, one `job` field of JSON per entry (`XADD MAXLEN ~`)
//! - `S:delayed`: sorted set of retry copies scored by visibility time (ms)
//! - the DLQ stream: one `data` field holding a JSON [`DlqEntry`]
//!
//! Leases are consumer-group pending entries. A pending entry idle for longer
//! than the claim timeout is taken over with `XCLAIM`.

use crate::config::WorkerConfig;
use crate::dlq::{DlqEntry, DlqStats};
use crate::error::StreamError;
use crate::event::StreamEvent;
use crate::queue::{JobQueue, QueueMonitor, QueueStats};
use crate::registry::StreamJob;
use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::streams::{
    StreamClaimReply, StreamId, StreamInfoGroupsReply, StreamPendingCountReply,
    StreamPendingReply, StreamRangeReply, StreamReadReply,
};
use redis::{Client, RedisResult};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Moves due members of the delayed set into the stream atomically.
/// KEYS[1] = delayed set, KEYS[2] = stream; ARGV = now_ms, limit, maxlen.
const PROMOTE_DUE_SCRIPT: &str = r#"
local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, ARGV[2])
for _, member in ipairs(due) do
  redis.call('ZREM', KEYS[1], member)
  local sep = string.find(member, '|', 1, true)
  redis.call('XADD', KEYS[2], 'MAXLEN', '~', ARGV[3], '*', 'job', string.sub(member, sep + 1))
end
return #due
"#;

const DLQ_MAX_LENGTH: i64 = 10_000;

/// Connect to Redis and verify the connection with PING.
pub async fn connect(url: &str) -> RedisResult<ConnectionManager> {
    info!("Attempting to connect to Redis");

    let client = Client::open(url)?;
    let manager = ConnectionManager::new(client).await?;

    let mut conn = manager.clone();
    let _: String = redis::cmd("PING").query_async(&mut conn).await?;

    info!("Successfully connected to Redis");
    Ok(manager)
}

/// Connect with exponential backoff (100ms doubling, capped at 5s).
pub async fn connect_with_retry(url: &str, max_attempts: u32) -> RedisResult<ConnectionManager> {
    let mut delay = Duration::from_millis(100);
    let mut attempt = 1;
    loop {
        match connect(url).await {
            Ok(manager) => return Ok(manager),
            Err(e) if attempt < max_attempts => {
                warn!(attempt, error = %e, delay_ms = delay.as_millis() as u64, "Redis connection failed, retrying");
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(Duration::from_secs(5));
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Redis Streams queue bound to one stream and consumer.
#[derive(Clone)]
pub struct RedisStreamQueue {
    redis: ConnectionManager,
    config: WorkerConfig,
    delayed_key: String,
}

impl RedisStreamQueue {
    pub fn new(redis: ConnectionManager, config: WorkerConfig) -> Self {
        let delayed_key = format!("{}:delayed", config.stream_name);
        Self {
            redis,
            config,
            delayed_key,
        }
    }

    pub fn stream_name(&self) -> &str {
        &self.config.stream_name
    }

    pub fn consumer_id(&self) -> &str {
        &self.config.consumer_id
    }

    /// Create the consumer group (and the stream) if missing.
    async fn ensure_consumer_group(&self) -> Result<(), StreamError> {
        let mut conn = self.redis.clone();

        let result: RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(()) => {
                info!(
                    stream = %self.config.stream_name,
                    group = %self.config.consumer_group,
                    "Created consumer group"
                );
                Ok(())
            }
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!(
                    stream = %self.config.stream_name,
                    group = %self.config.consumer_group,
                    "Consumer group already exists"
                );
                Ok(())
            }
            Err(e) => Err(StreamError::Redis(e)),
        }
    }

    async fn append(&self, payload: &str) -> Result<String, StreamError> {
        let mut conn = self.redis.clone();
        let stream_id: String = redis::cmd("XADD")
            .arg(&self.config.stream_name)
            .arg("MAXLEN")
            .arg("~")
            .arg(self.config.max_length)
            .arg("*")
            .arg("job")
            .arg(payload)
            .query_async(&mut conn)
            .await?;
        Ok(stream_id)
    }

    async fn xack(&self, stream_id: &str) -> Result<(), StreamError> {
        let mut conn = self.redis.clone();
        let _: i64 = redis::cmd("XACK")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(stream_id)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn push_dlq(&self, entry: &DlqEntry) -> Result<String, StreamError> {
        let data = serde_json::to_string(entry)?;
        let mut conn = self.redis.clone();
        let dlq_id: String = redis::cmd("XADD")
            .arg(&self.config.dlq_stream)
            .arg("MAXLEN")
            .arg("~")
            .arg(DLQ_MAX_LENGTH)
            .arg("*")
            .arg("data")
            .arg(&data)
            .query_async(&mut conn)
            .await?;
        Ok(dlq_id)
    }

    async fn promote_due(&self, limit: usize) -> Result<(), StreamError> {
        let mut conn = self.redis.clone();
        let promoted: i64 = redis::Script::new(PROMOTE_DUE_SCRIPT)
            .key(&self.delayed_key)
            .key(&self.config.stream_name)
            .arg(Utc::now().timestamp_millis())
            .arg(limit)
            .arg(self.config.max_length)
            .invoke_async(&mut conn)
            .await?;
        if promoted > 0 {
            debug!(count = promoted, "Promoted delayed retries");
        }
        Ok(())
    }

    /// Take over pending entries idle for longer than the claim timeout.
    async fn claim_abandoned<J: StreamJob>(
        &self,
        count: usize,
    ) -> Result<Vec<StreamEvent<J>>, StreamError> {
        let mut conn = self.redis.clone();

        let pending: StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("-")
            .arg("+")
            .arg(count)
            .query_async(&mut conn)
            .await?;

        let expired: Vec<_> = pending
            .ids
            .iter()
            .filter(|p| p.last_delivered_ms as u64 >= self.config.claim_timeout_ms)
            .collect();

        if expired.is_empty() {
            return Ok(vec![]);
        }

        let mut cmd = redis::cmd("XCLAIM");
        cmd.arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(&self.config.consumer_id)
            .arg(self.config.claim_timeout_ms);
        for entry in &expired {
            cmd.arg(&entry.id);
        }

        let claimed: StreamClaimReply = cmd.query_async(&mut conn).await?;

        let mut events = Vec::with_capacity(claimed.ids.len());
        for entry in claimed.ids {
            let delivery_count = expired
                .iter()
                .find(|p| p.id == entry.id)
                .map_or(2, |p| p.times_delivered as u32 + 1);
            if let Some(job) = self.decode::<J>(&entry).await? {
                events.push(StreamEvent::with_delivery_count(
                    entry.id.clone(),
                    job,
                    delivery_count,
                ));
            }
        }

        if !events.is_empty() {
            warn!(count = events.len(), "Claimed abandoned messages");
        }
        Ok(events)
    }

    async fn read_new<J: StreamJob>(
        &self,
        count: usize,
        block: bool,
    ) -> Result<Vec<StreamEvent<J>>, StreamError> {
        let mut conn = self.redis.clone();

        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(&self.config.consumer_id);

        if block && let Some(timeout) = self.config.blocking_timeout_ms {
            cmd.arg("BLOCK").arg(timeout);
        }

        cmd.arg("COUNT")
            .arg(count)
            .arg("STREAMS")
            .arg(&self.config.stream_name)
            .arg(">");

        let reply: Option<StreamReadReply> = cmd.query_async(&mut conn).await?;

        let mut events = Vec::new();
        for key in reply.map(|r| r.keys).unwrap_or_default() {
            for entry in key.ids {
                if let Some(job) = self.decode::<J>(&entry).await? {
                    events.push(StreamEvent::new(entry.id.clone(), job));
                }
            }
        }
        Ok(events)
    }

    /// Decode the `job` field. Undecodable entries are dead-lettered and acked.
    async fn decode<J: StreamJob>(&self, entry: &StreamId) -> Result<Option<J>, StreamError> {
        let raw: Option<String> = entry.get("job");
        let failure = match raw.as_deref().map(serde_json::from_str::<J>) {
            Some(Ok(job)) => return Ok(Some(job)),
            Some(Err(e)) => e.to_string(),
            None => "missing 'job' field".to_string(),
        };

        warn!(stream_id = %entry.id, error = %failure, "Failed to parse job, moving to DLQ");
        let dlq_entry = DlqEntry::malformed(raw.as_deref().unwrap_or_default(), &failure, &entry.id);
        self.push_dlq(&dlq_entry).await?;
        self.xack(&entry.id).await?;
        Ok(None)
    }

    /// Entries not yet delivered to the consumer group.
    ///
    /// Uses the group's `lag` (Redis 7+). Falls back to `XLEN` when the server
    /// cannot tell, which also counts acknowledged entries still in the stream.
    async fn waiting(&self) -> Result<i64, StreamError> {
        let mut conn = self.redis.clone();
        let groups: RedisResult<StreamInfoGroupsReply> = redis::cmd("XINFO")
            .arg("GROUPS")
            .arg(&self.config.stream_name)
            .query_async(&mut conn)
            .await;

        let lag = groups.ok().and_then(|reply| {
            reply
                .groups
                .into_iter()
                .find(|g| g.name == self.config.consumer_group)
                .and_then(|g| g.lag)
        });

        match lag {
            Some(lag) => Ok(lag as i64),
            None => self.xlen(&self.config.stream_name).await,
        }
    }

    async fn xlen(&self, key: &str) -> Result<i64, StreamError> {
        let mut conn = self.redis.clone();
        Ok(redis::cmd("XLEN").arg(key).query_async(&mut conn).await?)
    }

    async fn edge_entry_id(&self, command: &str, from: &str, to: &str) -> Option<String> {
        let mut conn = self.redis.clone();
        let reply: RedisResult<StreamRangeReply> = redis::cmd(command)
            .arg(&self.config.dlq_stream)
            .arg(from)
            .arg(to)
            .arg("COUNT")
            .arg(1)
            .query_async(&mut conn)
            .await;
        reply.ok().and_then(|r| r.ids.into_iter().next().map(|e| e.id))
    }
}

#[async_trait]
impl QueueMonitor for RedisStreamQueue {
    async fn ping(&self) -> Result<(), StreamError> {
        let mut conn = self.redis.clone();
        let response: String = redis::cmd("PING").query_async(&mut conn).await?;
        if response == "PONG" {
            Ok(())
        } else {
            Err(StreamError::Internal(format!(
                "unexpected PING response: {response}"
            )))
        }
    }

    async fn stats(&self) -> Result<QueueStats, StreamError> {
        let mut conn = self.redis.clone();

        let pending: RedisResult<StreamPendingReply> = redis::cmd("XPENDING")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .query_async(&mut conn)
            .await;
        let delayed: i64 = redis::cmd("ZCARD")
            .arg(&self.delayed_key)
            .query_async(&mut conn)
            .await?;

        Ok(QueueStats {
            stream_name: self.config.stream_name.clone(),
            length: self.waiting().await?,
            pending: pending.map(|p| p.count() as i64).unwrap_or(0),
            delayed,
            dlq_length: self.xlen(&self.config.dlq_stream).await?,
        })
    }

    async fn dead_letters(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<DlqEntry>, StreamError> {
        let mut conn = self.redis.clone();

        let range: StreamRangeReply = redis::cmd("XRANGE")
            .arg(&self.config.dlq_stream)
            .arg("-")
            .arg("+")
            .arg("COUNT")
            .arg(offset.saturating_add(limit))
            .query_async(&mut conn)
            .await?;

        Ok(range
            .ids
            .iter()
            .skip(offset)
            .filter_map(|entry| entry.get::<String>("data"))
            .filter_map(|data| serde_json::from_str::<DlqEntry>(&data).ok())
            .collect())
    }

    async fn dlq_stats(&self) -> Result<DlqStats, StreamError> {
        Ok(DlqStats {
            stream_name: self.config.dlq_stream.clone(),
            length: self.xlen(&self.config.dlq_stream).await?,
            oldest_entry_id: self.edge_entry_id("XRANGE", "-", "+").await,
            newest_entry_id: self.edge_entry_id("XREVRANGE", "+", "-").await,
        })
    }
}

#[async_trait]
impl<J: StreamJob> JobQueue<J> for RedisStreamQueue {
    async fn init(&self) -> Result<(), StreamError> {
        self.ensure_consumer_group().await
    }

    async fn enqueue(&self, job: &J) -> Result<String, StreamError> {
        let payload = serde_json::to_string(job)?;
        let stream_id = self.append(&payload).await?;

        debug!(
            stream = %self.config.stream_name,
            stream_id = %stream_id,
            job_id = %job.job_id(),
            "Enqueued job"
        );
        Ok(stream_id)
    }

    async fn claim(&self, count: usize) -> Result<Vec<StreamEvent<J>>, StreamError> {
        let count = count.max(1);

        let result = async {
            self.promote_due(count).await?;
            let mut events = self.claim_abandoned::<J>(count).await?;
            if events.len() < count {
                let block = events.is_empty();
                events.extend(self.read_new::<J>(count - events.len(), block).await?);
            }
            Ok::<_, StreamError>(events)
        }
        .await;

        match result {
            Err(e) if e.is_nogroup_error() => {
                warn!("Consumer group missing, recreating");
                self.ensure_consumer_group().await?;
                Ok(vec![])
            }
            other => other,
        }
    }

    async fn ack(&self, stream_id: &str) -> Result<(), StreamError> {
        self.xack(stream_id).await?;
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

        if delay.is_zero() {
            self.append(&payload).await?;
        } else {
            let visible_at = Utc::now().timestamp_millis() + delay.as_millis() as i64;
            let member = format!("{}|{}", Uuid::new_v4(), payload);
            let mut conn = self.redis.clone();
            let _: i64 = redis::cmd("ZADD")
                .arg(&self.delayed_key)
                .arg(visible_at)
                .arg(member)
                .query_async(&mut conn)
                .await?;
        }

        self.xack(stream_id).await
    }

    async fn dead_letter(
        &self,
        stream_id: &str,
        job: &J,
        error: &str,
    ) -> Result<String, StreamError> {
        let entry = DlqEntry::new(job, error, stream_id)?;
        let dlq_id = self.push_dlq(&entry).await?;
        self.xack(stream_id).await?;

        info!(
            job_id = %entry.job_id,
            dlq_id = %dlq_id,
            error = %error,
            retry_count = entry.retry_count,
            "Moved job to DLQ"
        );
        Ok(dlq_id)
    }
}
