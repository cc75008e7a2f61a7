//! Job fixture shared by the unit tests of this crate.

use crate::registry::StreamJob;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestJob {
    pub id: String,
    pub data: String,
    pub retry_count: u32,
}

impl TestJob {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            data: format!("payload-{id}"),
            retry_count: 0,
        }
    }
}

impl StreamJob for TestJob {
    fn job_id(&self) -> String {
        self.id.clone()
    }

    fn retry_count(&self) -> u32 {
        self.retry_count
    }

    fn with_retry(&self) -> Self {
        Self {
            retry_count: self.retry_count + 1,
            ..self.clone()
        }
    }
}
