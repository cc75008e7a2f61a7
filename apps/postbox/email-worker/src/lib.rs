//! Email Worker Service
//!
//! Consumes dispatch jobs from the email stream and delivers them over SMTP.
//!
//! ## Architecture
//!
//! ```text
//! Redis Stream (email:jobs)
//!   ↓ (Consumer Group: email_workers)
//! StreamWorker<DispatchJob, DispatchProcessor>
//!   ↓ (resolve template → render → compose)
//! SmtpProvider
//!   ↓ on permanent failure or exhausted retries
//! Redis Stream (email:dlq)
//! ```
//!
//! ## Environment
//!
//! - `REDIS_URL` / `REDIS_HOST`: dispatch queue
//! - `DATABASE_URL`: template store
//! - `SMTP_*`: outbound transport
//! - `MAIL_*`: stream names, retries, concurrency, template cache TTL
//! - `HEALTH_PORT`: health and admin server (default 8082)

use axum::Router;
use core_config::database::DatabaseConfig;
use core_config::redis::RedisConfig;
use core_config::{Environment, FromEnv, app_info, env_parse};
use domain_notifications::{
    DispatchJob, DispatchProcessor, MailConfig, PgTemplateStore, Renderer, SmtpConfig,
    SmtpProvider, TemplateLookup, TemplateResolver,
};
use eyre::{Result, WrapErr};
use std::sync::Arc;
use stream_worker::{
    HealthState, RedisStreamQueue, StreamWorker, connect_with_retry, full_admin_router,
    init_metrics,
};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

const REDIS_CONNECT_ATTEMPTS: u32 = 5;

/// Start the health and admin HTTP server
///
/// Provides endpoints for:
/// - Liveness probes: `/health`, `/healthz`
/// - Readiness probes: `/ready`, `/readyz`
/// - Stream monitoring: `/stream/info`
/// - Prometheus metrics: `/metrics`
/// - DLQ admin: `/admin/dlq/*`
async fn start_health_server(health_state: HealthState, port: u16) -> Result<()> {
    let app: Router = full_admin_router(health_state);

    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr)
        .await
        .wrap_err_with(|| format!("Failed to bind health server to {}", addr))?;

    info!(port = %port, "Health and admin server listening");

    axum::serve(listener, app)
        .await
        .wrap_err("Health server failed")?;

    Ok(())
}

/// Pick the template lookup: cached when a TTL is configured.
fn template_lookup(store: PgTemplateStore, mail: &MailConfig) -> Arc<dyn TemplateLookup> {
    let resolver = TemplateResolver::new(Arc::new(store));
    match mail.template_cache_ttl() {
        Some(ttl) => {
            info!(ttl_secs = ttl.as_secs(), "Template cache enabled");
            Arc::new(resolver.cached(ttl))
        }
        None => Arc::new(resolver),
    }
}

/// Run the email worker
///
/// 1. Sets up error reporting, structured logging and metrics
/// 2. Loads mail, SMTP, PostgreSQL and Redis settings from the environment
/// 3. Connects to the template database and the dispatch queue
/// 4. Serves health/admin endpoints and runs the worker until SIGINT/SIGTERM
///
/// # Errors
///
/// Returns an error if any configuration is invalid, a backing service is
/// unreachable at startup, or the worker hits a fatal queue error.
pub async fn run() -> Result<()> {
    core_config::tracing::install_color_eyre();
    let environment = Environment::from_env();
    core_config::tracing::init_tracing(&environment);

    init_metrics().wrap_err("Failed to initialize metrics")?;

    let app_info = app_info!();
    info!(name = %app_info.name, version = %app_info.version, "Starting email worker service");

    let health_port: u16 = env_parse("HEALTH_PORT", 8082)?;

    let mail = MailConfig::from_env().wrap_err("Failed to load mail configuration")?;
    let smtp = SmtpConfig::from_env().wrap_err("Failed to load SMTP configuration")?;
    mail.ensure_lease_covers(smtp.timeout)
        .wrap_err("Claim timeout too short for the SMTP timeout")?;
    let db_config = DatabaseConfig::from_env().wrap_err("Failed to load PostgreSQL configuration")?;
    let redis_config = RedisConfig::from_env().wrap_err("Failed to load Redis configuration")?;

    info!("Connecting to PostgreSQL...");
    let store = PgTemplateStore::connect(&db_config)
        .await
        .wrap_err("Failed to connect to PostgreSQL")?;

    info!("Connecting to Redis...");
    let redis = connect_with_retry(&redis_config.url, REDIS_CONNECT_ATTEMPTS)
        .await
        .wrap_err("Failed to connect to Redis")?;
    info!("Connected to Redis successfully");

    let worker_config = mail.worker_config();
    info!(
        stream = %worker_config.stream_name,
        consumer_group = %worker_config.consumer_group,
        consumer_id = %worker_config.consumer_id,
        dlq_stream = %worker_config.dlq_stream,
        max_retries = worker_config.retry.max_retries,
        max_concurrent_jobs = worker_config.max_concurrent_jobs,
        batch_size = worker_config.batch_size,
        claim_timeout_ms = worker_config.claim_timeout_ms,
        "Worker configuration loaded"
    );

    let queue = Arc::new(RedisStreamQueue::new(redis, worker_config.clone()));

    let provider = SmtpProvider::new(smtp).wrap_err("Failed to build SMTP transport")?;
    let processor = DispatchProcessor::new(
        template_lookup(store, &mail),
        Renderer::new(),
        Arc::new(provider),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        if let Err(e) = shutdown_signal().await {
            error!("Error waiting for shutdown signal: {}", e);
        }
        let _ = shutdown_tx.send(true);
    });

    let health_state = HealthState::new(queue.clone(), app_info.name, app_info.version);
    tokio::spawn(async move {
        if let Err(e) = start_health_server(health_state, health_port).await {
            error!(error = %e, "Health server failed");
        }
    });

    info!("Starting email dispatch processor...");
    let worker = StreamWorker::<DispatchJob, _>::new(queue, processor, worker_config);
    worker
        .run(shutdown_rx)
        .await
        .wrap_err("Email worker stopped with an error")?;

    info!("Email worker service stopped");
    Ok(())
}

/// Wait for a shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
            .wrap_err("Failed to install SIGTERM handler")?;

        tokio::select! {
            result = signal::ctrl_c() => {
                result.wrap_err("Failed to listen for Ctrl+C")?;
                info!("Received Ctrl+C, initiating graceful shutdown");
            }
            _ = terminate.recv() => {
                info!("Received SIGTERM, initiating graceful shutdown");
            }
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c()
            .await
            .wrap_err("Failed to listen for Ctrl+C")?;
        info!("Received Ctrl+C, initiating graceful shutdown");
    }

    Ok(())
}
