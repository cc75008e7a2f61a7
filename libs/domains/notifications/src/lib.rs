//! Notifications Domain
//!
//! Asynchronous email dispatch: requests are validated and queued by the
//! submission side and delivered later by a stream worker.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────┐
//! │ POST /email/send    │  ← handlers::router
//! └──────────┬──────────┘
//!            │
//! ┌──────────▼──────────┐
//! │ NotificationService │  ← validate + enqueue, returns a JobHandle
//! └──────────┬──────────┘
//!            │
//! ┌──────────▼──────────┐
//! │   Dispatch queue    │  ← Redis stream (email:jobs) or in-memory
//! └──────────┬──────────┘
//!            │
//! ┌──────────▼──────────┐
//! │  DispatchProcessor  │  ← resolve template → render → compose
//! └──────────┬──────────┘
//!            │
//! ┌──────────▼──────────┐
//! │   Email Provider    │  ← SMTP
//! └─────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use domain_notifications::{DispatchProcessor, NotificationService, Renderer, TemplateResolver};
//!
//! let service = NotificationService::new(queue.clone(), mail.sender_policy());
//! let handle = service.submit(raw).await?;
//!
//! let processor = DispatchProcessor::new(
//!     Arc::new(TemplateResolver::new(store)),
//!     Renderer::new(),
//!     Arc::new(SmtpProvider::new(smtp)?),
//! );
//! StreamWorker::new(queue, processor, mail.worker_config()).run(shutdown_rx).await?;
//! ```

pub mod error;
pub mod handlers;
pub mod models;
pub mod processor;
pub mod providers;
pub mod renderer;
pub mod service;
pub mod streams;
pub mod templates;
pub mod validation;

pub use error::{NotificationError, NotificationResult};
pub use models::{
    ComposedMessage, ContextValue, DEFAULT_SERVICE, DispatchJob, JobHandle, RawSendRequest,
    RenderContext, SendRequest, Service, Template,
};
pub use processor::{DispatchError, DispatchProcessor};
pub use providers::{EmailProvider, SentEmail, SmtpConfig, SmtpProvider, TransportError};
pub use renderer::{RenderFailure, Renderer};
pub use service::{NotificationService, SubmitError};
pub use streams::{EmailStream, MailConfig};
pub use templates::{
    CachedTemplateResolver, InMemoryTemplateStore, PgTemplateStore, TemplateLookup,
    TemplateResolver, TemplateStore,
};
pub use validation::{SenderPolicy, Violation, validate};
