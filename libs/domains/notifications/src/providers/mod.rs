//! Mail transports.
//!
//! This module contains the `EmailProvider` trait and the SMTP implementation.
//! Providers classify every failure as transient or permanent; they never retry.

mod smtp;

pub use smtp::{SmtpConfig, SmtpProvider};

use crate::models::ComposedMessage;
use async_trait::async_trait;
use thiserror::Error;

/// Represents a sent email with provider-specific message ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentEmail {
    /// Provider-specific message ID for tracking.
    pub message_id: Option<String>,
}

/// Classified delivery failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Might succeed later (connection refused, 4xx reply, timeout).
    #[error("transient delivery failure: {0}")]
    Transient(String),

    /// Will not succeed as composed (5xx reply, unparsable address).
    #[error("permanent delivery failure: {0}")]
    Permanent(String),
}

impl TransportError {
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Transient(_))
    }
}

/// Trait for email sending providers.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmailProvider: Send + Sync {
    /// Deliver one composed message. An absent `from` uses the provider's
    /// default sender.
    async fn send(&self, message: &ComposedMessage) -> Result<SentEmail, TransportError>;

    /// Get the provider name for logging.
    fn name(&self) -> &'static str;

    /// Check if the provider is reachable.
    async fn health_check(&self) -> Result<bool, TransportError> {
        Ok(true)
    }
}
