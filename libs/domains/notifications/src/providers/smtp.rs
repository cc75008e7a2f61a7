//! SMTP email provider implementation using lettre.
//!
//! Works against real relays (TLS + credentials) and local capture servers
//! such as MailHog/Mailpit (plain, no auth).

use super::{EmailProvider, SentEmail, TransportError};
use crate::error::{NotificationError, NotificationResult};
use crate::models::ComposedMessage;
use async_trait::async_trait;
use core_config::{ConfigError, FromEnv, env_or_default, env_parse};
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, header::ContentType},
    transport::smtp::authentication::Credentials,
};
use std::time::Duration;
use tracing::{debug, info, warn};

/// SMTP configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpConfig {
    /// SMTP server host.
    pub host: String,
    /// SMTP server port.
    pub port: u16,
    /// Default sender address, used when a message has no `from`.
    pub from_email: String,
    /// Default sender display name.
    pub from_name: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Whether to use TLS (false for local dev servers).
    pub use_tls: bool,
    /// Upper bound for one delivery, connection included.
    pub timeout: Duration,
}

impl SmtpConfig {
    pub fn new(host: impl Into<String>, port: u16, from_email: impl Into<String>, from_name: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            from_email: from_email.into(),
            from_name: from_name.into(),
            username: None,
            password: None,
            use_tls: false,
            timeout: Duration::from_secs(30),
        }
    }

    /// Builder method to set TLS.
    pub fn with_tls(mut self, use_tls: bool) -> Self {
        self.use_tls = use_tls;
        self
    }

    /// Builder method to set credentials.
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl FromEnv for SmtpConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let use_tls = matches!(
            env_or_default("SMTP_USE_TLS", "false").to_ascii_lowercase().as_str(),
            "true" | "1"
        );

        Ok(Self {
            host: env_or_default("SMTP_HOST", "localhost"),
            port: env_parse("SMTP_PORT", 1025)?,
            from_email: env_or_default("SMTP_FROM_EMAIL", "noreply@example.org"),
            from_name: env_or_default("SMTP_FROM_NAME", "No Reply"),
            username: std::env::var("SMTP_USERNAME").ok(),
            password: std::env::var("SMTP_PASSWORD").ok(),
            use_tls,
            timeout: Duration::from_secs(env_parse("SMTP_TIMEOUT_SECS", 30)?),
        })
    }
}

/// SMTP email provider.
pub struct SmtpProvider {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    config: SmtpConfig,
    default_sender: Mailbox,
}

impl SmtpProvider {
    /// Create a new SMTP provider. Does not connect.
    pub fn new(config: SmtpConfig) -> NotificationResult<Self> {
        let default_sender = Mailbox::new(
            Some(config.from_name.clone()),
            config
                .from_email
                .parse()
                .map_err(|e| NotificationError::Config(format!("Invalid SMTP_FROM_EMAIL: {e}")))?,
        );
        let transport = Self::build_transport(&config)?;
        Ok(Self {
            transport,
            config,
            default_sender,
        })
    }

    pub fn config(&self) -> &SmtpConfig {
        &self.config
    }

    /// Build the SMTP transport based on configuration.
    fn build_transport(config: &SmtpConfig) -> NotificationResult<AsyncSmtpTransport<Tokio1Executor>> {
        let mut builder = if config.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
                .map_err(|e| NotificationError::Provider(format!("Failed to create SMTP relay: {e}")))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
        }
        .port(config.port)
        .timeout(Some(config.timeout));

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(builder.build())
    }

    /// Build a single-part HTML message. Address problems are permanent.
    fn build_message(&self, message: &ComposedMessage) -> Result<Message, TransportError> {
        let from = match &message.from {
            Some(address) => address
                .parse::<Mailbox>()
                .map_err(|e| TransportError::Permanent(format!("Invalid from address: {e}")))?,
            None => self.default_sender.clone(),
        };

        let to: Mailbox = message
            .to
            .parse()
            .map_err(|e| TransportError::Permanent(format!("Invalid to address: {e}")))?;

        Message::builder()
            .from(from)
            .to(to)
            .subject(&message.subject)
            .header(ContentType::TEXT_HTML)
            .body(message.body.clone())
            .map_err(|e| TransportError::Permanent(format!("Failed to build email message: {e}")))
    }
}

/// 5xx replies and client-side protocol errors will not heal; the rest may.
fn classify(err: lettre::transport::smtp::Error) -> TransportError {
    if err.is_permanent() || err.is_client() {
        TransportError::Permanent(format!("SMTP send failed: {err}"))
    } else {
        TransportError::Transient(format!("SMTP send failed: {err}"))
    }
}

#[async_trait]
impl EmailProvider for SmtpProvider {
    async fn send(&self, message: &ComposedMessage) -> Result<SentEmail, TransportError> {
        debug!(
            to = %message.to,
            subject = %message.subject,
            host = %self.config.host,
            port = %self.config.port,
            "Sending email via SMTP"
        );

        let email = self.build_message(message)?;

        let response = tokio::time::timeout(self.config.timeout, self.transport.send(email))
            .await
            .map_err(|_| {
                TransportError::Transient(format!(
                    "SMTP send timed out after {}s",
                    self.config.timeout.as_secs()
                ))
            })?
            .map_err(classify)
            .inspect_err(|e| warn!(to = %message.to, error = %e, "Failed to send email via SMTP"))?;

        let message_id = response.message().next().map(|s| s.to_string());

        info!(
            to = %message.to,
            message_id = ?message_id,
            "Email sent successfully via SMTP"
        );

        Ok(SentEmail { message_id })
    }

    fn name(&self) -> &'static str {
        "SMTP"
    }

    async fn health_check(&self) -> Result<bool, TransportError> {
        self.transport
            .test_connection()
            .await
            .map_err(|e| TransportError::Transient(format!("SMTP health check failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(to: &str, from: Option<&str>) -> ComposedMessage {
        ComposedMessage {
            to: to.to_string(),
            from: from.map(str::to_string),
            subject: "Hi".to_string(),
            body: "<p>Hi</p>".to_string(),
        }
    }

    #[test]
    fn test_smtp_config_defaults_from_env() {
        temp_env::with_vars_unset(
            [
                "SMTP_HOST",
                "SMTP_PORT",
                "SMTP_FROM_EMAIL",
                "SMTP_FROM_NAME",
                "SMTP_USERNAME",
                "SMTP_PASSWORD",
                "SMTP_USE_TLS",
                "SMTP_TIMEOUT_SECS",
            ],
            || {
                let config = SmtpConfig::from_env().unwrap();
                assert_eq!(config.host, "localhost");
                assert_eq!(config.port, 1025);
                assert_eq!(config.from_email, "noreply@example.org");
                assert_eq!(config.from_name, "No Reply");
                assert!(!config.use_tls);
                assert_eq!(config.timeout, Duration::from_secs(30));
                assert!(config.username.is_none());
            },
        );
    }

    #[test]
    fn test_smtp_config_from_env_overrides() {
        temp_env::with_vars(
            [
                ("SMTP_HOST", Some("mail.example.org")),
                ("SMTP_PORT", Some("587")),
                ("SMTP_USE_TLS", Some("1")),
                ("SMTP_USERNAME", Some("user")),
                ("SMTP_PASSWORD", Some("pass")),
                ("SMTP_TIMEOUT_SECS", Some("5")),
            ],
            || {
                let config = SmtpConfig::from_env().unwrap();
                assert_eq!(config.host, "mail.example.org");
                assert_eq!(config.port, 587);
                assert!(config.use_tls);
                assert_eq!(config.username.as_deref(), Some("user"));
                assert_eq!(config.timeout, Duration::from_secs(5));
            },
        );
    }

    #[test]
    fn test_smtp_config_rejects_bad_port() {
        temp_env::with_var("SMTP_PORT", Some("not-a-port"), || {
            assert!(SmtpConfig::from_env().is_err());
        });
    }

    #[test]
    fn test_smtp_config_with_tls() {
        let config = SmtpConfig::new("smtp.example.org", 587, "test@example.org", "Test")
            .with_tls(true)
            .with_credentials("user", "pass");

        assert!(config.use_tls);
        assert_eq!(config.username, Some("user".to_string()));
        assert_eq!(config.password, Some("pass".to_string()));
    }

    #[test]
    fn test_invalid_default_sender_is_rejected() {
        let config = SmtpConfig::new("localhost", 1025, "not an address", "Test");
        assert!(matches!(SmtpProvider::new(config), Err(NotificationError::Config(_))));
    }

    #[test]
    fn test_build_message_uses_default_sender() {
        let provider =
            SmtpProvider::new(SmtpConfig::new("localhost", 1025, "noreply@example.org", "No Reply")).unwrap();

        let email = provider.build_message(&message("user@example.com", None)).unwrap();
        let raw = String::from_utf8(email.formatted()).unwrap();
        assert!(raw.contains("From: \"No Reply\" <noreply@example.org>") || raw.contains("From: No Reply <noreply@example.org>"));
        assert!(raw.contains("To: user@example.com"));
        assert!(raw.contains("<p>Hi</p>"));

        let email = provider
            .build_message(&message("user@example.com", Some("team@example.org")))
            .unwrap();
        let raw = String::from_utf8(email.formatted()).unwrap();
        assert!(raw.contains("From: team@example.org"));
    }

    #[test]
    fn test_unparsable_recipient_is_permanent() {
        let provider =
            SmtpProvider::new(SmtpConfig::new("localhost", 1025, "noreply@example.org", "No Reply")).unwrap();

        let err = provider.build_message(&message("not-an-address", None)).unwrap_err();
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_unreachable_server_is_transient() {
        let config = SmtpConfig::new("127.0.0.1", 1, "noreply@example.org", "No Reply")
            .with_timeout(Duration::from_secs(2));
        let provider = SmtpProvider::new(config).unwrap();

        let err = provider.send(&message("user@example.com", None)).await.unwrap_err();
        assert!(err.is_transient(), "connection failures must be retryable: {err}");
    }
}
