//! Error types for the notifications domain.

use thiserror::Error;

/// Result type for notification operations.
pub type NotificationResult<T> = Result<T, NotificationError>;

/// Infrastructure errors raised by stores and providers outside a dispatch.
#[derive(Debug, Error)]
pub enum NotificationError {
    /// Database error.
    #[error("Database error: {0}")]
    Database(String),

    /// Email provider could not be set up.
    #[error("Email provider error: {0}")]
    Provider(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<sea_orm::DbErr> for NotificationError {
    fn from(err: sea_orm::DbErr) -> Self {
        NotificationError::Database(err.to_string())
    }
}

impl From<core_config::ConfigError> for NotificationError {
    fn from(err: core_config::ConfigError) -> Self {
        NotificationError::Config(err.to_string())
    }
}
