//! Stream definitions and dispatch settings for the notifications domain.

use crate::validation::SenderPolicy;
use core_config::{ConfigError, FromEnv, env_list, env_or_default, env_parse};
use std::time::Duration;
use stream_worker::{StreamDef, WorkerConfig};

/// Email jobs stream definition.
///
/// Used by the email-worker and the submission API.
pub struct EmailStream;

impl StreamDef for EmailStream {
    /// Stream name for email jobs.
    const STREAM_NAME: &'static str = "email:jobs";

    /// Consumer group for email workers.
    const CONSUMER_GROUP: &'static str = "email_workers";

    /// Dead letter queue for failed email jobs.
    const DLQ_STREAM: &'static str = "email:dlq";

    /// Maximum stream length (100k entries).
    const MAX_LENGTH: i64 = 100_000;

    /// One job per claim; every lease starts when its send starts.
    const BATCH_SIZE: usize = 1;

    /// Lease well above the default 30s SMTP timeout.
    const CLAIM_TIMEOUT_MS: u64 = 120_000;
}

/// Dispatch settings read from `MAIL_*` variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailConfig {
    pub allowed_sender_domains: Vec<String>,
    pub stream_name: String,
    pub consumer_group: String,
    pub dlq_stream: String,
    pub max_retries: u32,
    pub claim_timeout_ms: u64,
    pub max_concurrent_jobs: usize,
    /// Zero disables the template cache.
    pub template_cache_ttl_secs: u64,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            allowed_sender_domains: vec!["example.org".to_string()],
            stream_name: EmailStream::STREAM_NAME.to_string(),
            consumer_group: EmailStream::CONSUMER_GROUP.to_string(),
            dlq_stream: EmailStream::DLQ_STREAM.to_string(),
            max_retries: 3,
            claim_timeout_ms: EmailStream::CLAIM_TIMEOUT_MS,
            max_concurrent_jobs: 1,
            template_cache_ttl_secs: 60,
        }
    }
}

impl FromEnv for MailConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            allowed_sender_domains: env_list("MAIL_ALLOWED_SENDER_DOMAINS", "example.org"),
            stream_name: env_or_default("MAIL_STREAM_NAME", &defaults.stream_name),
            consumer_group: env_or_default("MAIL_CONSUMER_GROUP", &defaults.consumer_group),
            dlq_stream: env_or_default("MAIL_DLQ_STREAM", &defaults.dlq_stream),
            max_retries: env_parse("MAIL_MAX_RETRIES", defaults.max_retries)?,
            claim_timeout_ms: env_parse("MAIL_CLAIM_TIMEOUT_MS", defaults.claim_timeout_ms)?,
            max_concurrent_jobs: env_parse("MAIL_MAX_CONCURRENT_JOBS", defaults.max_concurrent_jobs)?,
            template_cache_ttl_secs: env_parse(
                "MAIL_TEMPLATE_CACHE_TTL_SECS",
                defaults.template_cache_ttl_secs,
            )?,
        })
    }
}

impl MailConfig {
    pub fn sender_policy(&self) -> SenderPolicy {
        SenderPolicy::new(&self.allowed_sender_domains)
    }

    /// Worker/queue settings on top of the [`EmailStream`] defaults.
    ///
    /// A claim never takes more jobs than there are free processing slots, so
    /// no claimed job waits behind another while its lease runs.
    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig::from_stream_def::<EmailStream>()
            .with_stream_name(&self.stream_name)
            .with_consumer_group(&self.consumer_group)
            .with_dlq_stream(&self.dlq_stream)
            .with_max_retries(self.max_retries)
            .with_claim_timeout_ms(self.claim_timeout_ms)
            .with_max_concurrent_jobs(self.max_concurrent_jobs)
            .with_batch_size(self.max_concurrent_jobs)
    }

    /// Reject a lease that a single send could outlive.
    ///
    /// The lease must be at least twice `send_timeout`, leaving room for the
    /// template lookup and the ack around the send.
    pub fn ensure_lease_covers(&self, send_timeout: Duration) -> Result<(), ConfigError> {
        let required_ms = send_timeout.as_millis().saturating_mul(2);
        if u128::from(self.claim_timeout_ms) < required_ms {
            return Err(ConfigError::Invalid {
                key: "MAIL_CLAIM_TIMEOUT_MS".to_string(),
                details: format!(
                    "{}ms lease is shorter than twice the {}ms send timeout",
                    self.claim_timeout_ms,
                    send_timeout.as_millis()
                ),
            });
        }
        Ok(())
    }

    pub fn template_cache_ttl(&self) -> Option<Duration> {
        (self.template_cache_ttl_secs > 0).then(|| Duration::from_secs(self.template_cache_ttl_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAIL_VARS: [&str; 8] = [
        "MAIL_ALLOWED_SENDER_DOMAINS",
        "MAIL_STREAM_NAME",
        "MAIL_CONSUMER_GROUP",
        "MAIL_DLQ_STREAM",
        "MAIL_MAX_RETRIES",
        "MAIL_CLAIM_TIMEOUT_MS",
        "MAIL_MAX_CONCURRENT_JOBS",
        "MAIL_TEMPLATE_CACHE_TTL_SECS",
    ];

    #[test]
    fn test_email_stream_def() {
        assert_eq!(EmailStream::stream_name(), "email:jobs");
        assert_eq!(EmailStream::consumer_group(), "email_workers");
        assert_eq!(EmailStream::dlq_stream(), "email:dlq");
        assert_eq!(EmailStream::MAX_LENGTH, 100_000);
        assert_eq!(EmailStream::BATCH_SIZE, 1);
    }

    #[test]
    fn test_mail_config_defaults() {
        temp_env::with_vars_unset(MAIL_VARS, || {
            let config = MailConfig::from_env().unwrap();
            assert_eq!(config, MailConfig::default());
            assert_eq!(config.template_cache_ttl(), Some(Duration::from_secs(60)));

            let worker = config.worker_config();
            assert_eq!(worker.stream_name, "email:jobs");
            assert_eq!(worker.dlq_stream, "email:dlq");
            assert_eq!(worker.retry.max_retries, 3);
            assert_eq!(worker.max_concurrent_jobs, 1);
            assert_eq!(worker.batch_size, 1);
            assert_eq!(worker.claim_timeout_ms, 120_000);
        });
    }

    #[test]
    fn test_mail_config_overrides() {
        temp_env::with_vars(
            [
                ("MAIL_ALLOWED_SENDER_DOMAINS", Some("acme.io, @globex.com")),
                ("MAIL_STREAM_NAME", Some("mail:jobs")),
                ("MAIL_MAX_RETRIES", Some("5")),
                ("MAIL_MAX_CONCURRENT_JOBS", Some("4")),
                ("MAIL_TEMPLATE_CACHE_TTL_SECS", Some("0")),
            ],
            || {
                let config = MailConfig::from_env().unwrap();
                assert_eq!(config.allowed_sender_domains, vec!["acme.io", "@globex.com"]);
                assert_eq!(config.template_cache_ttl(), None);

                let policy = config.sender_policy();
                assert!(policy.allows("a@globex.com"));
                assert!(!policy.allows("a@example.org"));

                let worker = config.worker_config();
                assert_eq!(worker.stream_name, "mail:jobs");
                assert_eq!(worker.retry.max_retries, 5);
                assert_eq!(worker.max_concurrent_jobs, 4);
                assert_eq!(worker.batch_size, 4);
            },
        );
    }

    #[test]
    fn test_default_lease_covers_default_smtp_timeout() {
        let config = MailConfig::default();
        assert!(config.ensure_lease_covers(Duration::from_secs(30)).is_ok());
        assert!(config.ensure_lease_covers(Duration::from_secs(60)).is_ok());
    }

    #[test]
    fn test_lease_shorter_than_send_timeout_is_rejected() {
        let config = MailConfig {
            claim_timeout_ms: 30_000,
            ..MailConfig::default()
        };

        let err = config
            .ensure_lease_covers(Duration::from_secs(30))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref key, .. } if key == "MAIL_CLAIM_TIMEOUT_MS"));
    }

    #[test]
    fn test_mail_config_rejects_garbage_numbers() {
        temp_env::with_var("MAIL_MAX_RETRIES", Some("many"), || {
            assert!(MailConfig::from_env().is_err());
        });
    }
}
