//! Dispatch processor for stream workers.
//!
//! `DispatchProcessor` implements `StreamProcessor<DispatchJob>`:
//! resolve the template (when named), render it, compose the message and hand
//! it to the provider. Every failure is classified so the worker can decide
//! between requeue and dead-letter; the processor itself never retries.

use crate::models::{ComposedMessage, DispatchJob, SendRequest};
use crate::providers::{EmailProvider, SentEmail, TransportError};
use crate::renderer::{RenderFailure, Renderer};
use crate::templates::TemplateLookup;
use async_trait::async_trait;
use std::sync::Arc;
use stream_worker::{ErrorCategory, StreamError, StreamProcessor};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Why a dispatch did not deliver.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Template {name} not found in service {service}")]
    TemplateNotFound { name: String, service: String },

    /// The template store could not be queried.
    #[error("Template lookup failed: {0}")]
    Lookup(String),

    #[error(transparent)]
    Render(#[from] RenderFailure),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl DispatchError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            DispatchError::Lookup(_) => ErrorCategory::Transient,
            DispatchError::Transport(TransportError::Transient(_)) => ErrorCategory::Transient,
            DispatchError::TemplateNotFound { .. }
            | DispatchError::Render(_)
            | DispatchError::Transport(TransportError::Permanent(_)) => ErrorCategory::Permanent,
        }
    }

    /// Pipeline stage the job failed in.
    pub fn stage(&self) -> &'static str {
        match self {
            DispatchError::TemplateNotFound { .. } | DispatchError::Lookup(_) => "resolve",
            DispatchError::Render(_) => "render",
            DispatchError::Transport(_) => "deliver",
        }
    }
}

impl From<DispatchError> for StreamError {
    fn from(err: DispatchError) -> Self {
        StreamError::Processing {
            category: err.category(),
            message: err.to_string(),
        }
    }
}

/// Renders and delivers [`DispatchJob`]s.
pub struct DispatchProcessor {
    resolver: Arc<dyn TemplateLookup>,
    renderer: Renderer,
    provider: Arc<dyn EmailProvider>,
}

impl DispatchProcessor {
    pub fn new(
        resolver: Arc<dyn TemplateLookup>,
        renderer: Renderer,
        provider: Arc<dyn EmailProvider>,
    ) -> Self {
        Self {
            resolver,
            renderer,
            provider,
        }
    }

    /// Build the outgoing message. No side effects besides the template lookup.
    pub async fn compose(&self, request: &SendRequest) -> Result<ComposedMessage, DispatchError> {
        let body = match &request.template {
            Some(name) => {
                let template = self
                    .resolver
                    .resolve(name, &request.service)
                    .await
                    .map_err(|e| DispatchError::Lookup(e.to_string()))?
                    .ok_or_else(|| DispatchError::TemplateNotFound {
                        name: name.clone(),
                        service: request.service.clone(),
                    })?;

                debug!(template = %name, service = %request.service, "Rendering template");
                self.renderer.render(&template.content, &request.context)?
            }
            None => request.body.clone(),
        };

        Ok(ComposedMessage {
            to: request.to.clone(),
            from: request.from.clone(),
            subject: request.subject.clone(),
            body,
        })
    }

    /// Run one job through compose and delivery.
    ///
    /// The provider is only invoked once composition succeeded.
    pub async fn dispatch(&self, job: &DispatchJob) -> Result<SentEmail, DispatchError> {
        let message = self.compose(&job.request).await?;
        let sent = self.provider.send(&message).await?;
        Ok(sent)
    }
}

#[async_trait]
impl StreamProcessor<DispatchJob> for DispatchProcessor {
    async fn process(&self, job: &DispatchJob) -> Result<(), StreamError> {
        info!(
            job_id = %job.id,
            to = %job.request.to,
            template = ?job.request.template,
            service = %job.request.service,
            retry_count = job.retry_count,
            "Processing dispatch job"
        );

        match self.dispatch(job).await {
            Ok(sent) => {
                info!(
                    job_id = %job.id,
                    to = %job.request.to,
                    message_id = ?sent.message_id,
                    provider = self.provider.name(),
                    "Email delivered"
                );
                Ok(())
            }
            Err(e) => {
                warn!(
                    job_id = %job.id,
                    to = %job.request.to,
                    stage = e.stage(),
                    category = e.category().as_str(),
                    error = %e,
                    "Dispatch failed"
                );
                Err(e.into())
            }
        }
    }

    fn name(&self) -> &'static str {
        "DispatchProcessor"
    }

    async fn health_check(&self) -> Result<bool, StreamError> {
        self.provider
            .health_check()
            .await
            .map_err(|e| StreamError::transient(e.to_string()))
    }
}
