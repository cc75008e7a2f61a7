//! Stream event wrapper
//!
//! Wraps a claimed job with its stream metadata (ID, timestamp, delivery count).

use crate::registry::StreamJob;
use chrono::{DateTime, Utc};

/// A claimed job and its lease metadata
#[derive(Debug, Clone)]
pub struct StreamEvent<J: StreamJob> {
    /// Stream entry ID (e.g., "1234567890123-0")
    pub stream_id: String,

    /// The job payload
    pub job: J,

    /// When the entry was appended (parsed from the stream ID)
    pub timestamp: DateTime<Utc>,

    /// Number of times this entry has been delivered
    pub delivery_count: u32,
}

impl<J: StreamJob> StreamEvent<J> {
    pub fn new(stream_id: String, job: J) -> Self {
        Self::with_delivery_count(stream_id, job, 1)
    }

    pub fn with_delivery_count(stream_id: String, job: J, delivery_count: u32) -> Self {
        let timestamp = Self::parse_timestamp(&stream_id);
        Self {
            stream_id,
            job,
            timestamp,
            delivery_count,
        }
    }

    /// Stream IDs are in format "timestamp_ms-sequence"
    fn parse_timestamp(stream_id: &str) -> DateTime<Utc> {
        stream_id
            .split('-')
            .next()
            .and_then(|ts| ts.parse::<i64>().ok())
            .and_then(DateTime::from_timestamp_millis)
            .unwrap_or_else(Utc::now)
    }

    pub fn job_id(&self) -> String {
        self.job.job_id()
    }

    pub fn retry_count(&self) -> u32 {
        self.job.retry_count()
    }

    /// A lease expired and the entry was handed out again
    pub fn is_redelivery(&self) -> bool {
        self.delivery_count > 1
    }

    pub fn age_ms(&self) -> i64 {
        (Utc::now() - self.timestamp).num_milliseconds()
    }
}
