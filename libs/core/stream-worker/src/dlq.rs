//! Dead Letter Queue (DLQ) records
//!
//! Every terminal failure produces a `DlqEntry`. Queue implementations store
//! the entries (a second Redis stream, or an in-process list) and expose them
//! to operators through [`crate::QueueMonitor`].

use crate::error::StreamError;
use crate::registry::StreamJob;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// DLQ entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DlqEntry {
    /// Original job ID
    pub job_id: String,

    /// Serialized job data
    pub job_data: serde_json::Value,

    /// Error message that caused the failure
    pub error: String,

    /// Original stream entry ID
    pub original_stream_id: String,

    /// Number of retry attempts
    pub retry_count: u32,

    /// When the job was moved to DLQ
    pub failed_at: DateTime<Utc>,
}

impl DlqEntry {
    pub fn new<J: StreamJob>(
        job: &J,
        error: &str,
        original_stream_id: &str,
    ) -> Result<Self, StreamError> {
        Ok(Self {
            job_id: job.job_id(),
            job_data: serde_json::to_value(job)?,
            error: error.to_string(),
            original_stream_id: original_stream_id.to_string(),
            retry_count: job.retry_count(),
            failed_at: Utc::now(),
        })
    }

    /// Entry for a stream message whose payload could not be decoded
    pub fn malformed(raw: &str, error: &str, original_stream_id: &str) -> Self {
        Self {
            job_id: "unknown".to_string(),
            job_data: serde_json::Value::String(raw.to_string()),
            error: error.to_string(),
            original_stream_id: original_stream_id.to_string(),
            retry_count: 0,
            failed_at: Utc::now(),
        }
    }

    /// Decode the stored payload back into the job type
    pub fn job<J: StreamJob>(&self) -> Result<J, StreamError> {
        Ok(serde_json::from_value(self.job_data.clone())?)
    }
}

/// DLQ statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqStats {
    pub stream_name: String,
    pub length: i64,
    pub oldest_entry_id: Option<String>,
    pub newest_entry_id: Option<String>,
}
