//! Data models for the notifications domain.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use stream_worker::StreamJob;
use uuid::Uuid;

/// Namespace used when a request names no service.
pub const DEFAULT_SERVICE: &str = "default";

// ============================================================================
// Render context
// ============================================================================

/// A value inside a render context.
///
/// Serialized as plain JSON. `null` is not representable and fails to
/// deserialize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContextValue {
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Sequence(Vec<ContextValue>),
    Mapping(BTreeMap<String, ContextValue>),
}

impl From<&str> for ContextValue {
    fn from(value: &str) -> Self {
        ContextValue::String(value.to_string())
    }
}

impl From<String> for ContextValue {
    fn from(value: String) -> Self {
        ContextValue::String(value)
    }
}

impl From<bool> for ContextValue {
    fn from(value: bool) -> Self {
        ContextValue::Bool(value)
    }
}

impl From<i64> for ContextValue {
    fn from(value: i64) -> Self {
        ContextValue::Number(value.into())
    }
}

/// Top-level render input, ordered by key.
pub type RenderContext = BTreeMap<String, ContextValue>;

// ============================================================================
// Send requests
// ============================================================================

/// Inbound payload exactly as received, before validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawSendRequest {
    pub to: Option<String>,
    pub from: Option<String>,
    pub subject: Option<String>,
    pub body: Option<String>,
    pub template: Option<String>,
    pub context: Option<RenderContext>,
    pub service: Option<String>,
}

/// A validated and normalized request. Immutable once enqueued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendRequest {
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    pub subject: String,
    /// Raw body; unused when `template` is set.
    #[serde(default)]
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: RenderContext,
    pub service: String,
}

impl SendRequest {
    /// Request with a raw body in the default namespace.
    pub fn new(to: impl Into<String>, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            from: None,
            subject: subject.into(),
            body: body.into(),
            template: None,
            context: RenderContext::new(),
            service: DEFAULT_SERVICE.to_string(),
        }
    }

    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    pub fn with_template(mut self, name: impl Into<String>, context: RenderContext) -> Self {
        self.template = Some(name.into());
        self.context = context;
        self
    }

    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = service.into();
        self
    }
}

// ============================================================================
// Queue payload
// ============================================================================

/// The queue payload carrying one [`SendRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchJob {
    pub id: Uuid,
    pub request: SendRequest,
    pub retry_count: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl DispatchJob {
    pub fn new(request: SendRequest) -> Self {
        Self {
            id: Uuid::now_v7(),
            request,
            retry_count: 0,
            enqueued_at: Utc::now(),
        }
    }
}

impl StreamJob for DispatchJob {
    fn job_id(&self) -> String {
        self.id.to_string()
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

/// Acknowledgment returned to the submitter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHandle {
    pub job_id: Uuid,
    pub stream_id: String,
}

// ============================================================================
// Templates and services
// ============================================================================

/// A stored template. `name` is unique within its `service` only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub id: Uuid,
    pub name: String,
    pub content: String,
    pub service: String,
}

/// A tenant namespace owning templates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: Uuid,
    pub name: String,
    pub api_key: Option<String>,
}

// ============================================================================
// Outbound message
// ============================================================================

/// What the worker hands to the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComposedMessage {
    pub to: String,
    /// `None` means the transport's default sender.
    pub from: Option<String>,
    pub subject: String,
    pub body: String,
}
