//! Email Submission API
//!
//! Accepts `POST /email/send`, validates the request and appends it to the
//! email stream. Delivery happens later in the email worker; a successful
//! response only means the job was queued.
//!
//! Also serves `/health`, `/ready`, `/stream/info` and `/metrics` for the
//! dispatch queue it writes to.

use axum::{Json, Router, http::StatusCode, response::IntoResponse};
use core_config::redis::RedisConfig;
use core_config::{Environment, FromEnv, app_info, env_parse};
use domain_notifications::{DispatchJob, MailConfig, NotificationService, handlers};
use eyre::{Result, WrapErr};
use serde_json::json;
use std::sync::Arc;
use stream_worker::{
    HealthState, JobQueue, RedisStreamQueue, connect_with_retry, health_router, init_metrics,
};
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{Level, error, info};

const REDIS_CONNECT_ATTEMPTS: u32 = 5;

async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "not_found" })),
    )
}

/// Submission routes plus queue health, with request tracing.
pub fn build_app(service: NotificationService, health_state: HealthState) -> Router {
    Router::new()
        .merge(handlers::router(service))
        .merge(health_router(health_state))
        .fallback(not_found)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
}

/// Run the submission API until SIGINT/SIGTERM.
///
/// # Errors
///
/// Returns an error if configuration is invalid, Redis is unreachable at
/// startup, or the listener cannot bind.
pub async fn run() -> Result<()> {
    core_config::tracing::install_color_eyre();
    let environment = Environment::from_env();
    core_config::tracing::init_tracing(&environment);

    init_metrics().wrap_err("Failed to initialize metrics")?;

    let app_info = app_info!();
    info!(name = %app_info.name, version = %app_info.version, "Starting email submission API");

    let port: u16 = env_parse("API_PORT", 8080)?;
    let mail = MailConfig::from_env().wrap_err("Failed to load mail configuration")?;
    let redis_config = RedisConfig::from_env().wrap_err("Failed to load Redis configuration")?;

    info!("Connecting to Redis...");
    let redis = connect_with_retry(&redis_config.url, REDIS_CONNECT_ATTEMPTS)
        .await
        .wrap_err("Failed to connect to Redis")?;
    info!("Connected to Redis successfully");

    let worker_config = mail.worker_config();
    let queue = Arc::new(RedisStreamQueue::new(redis, worker_config.clone()));
    // The consumer group must exist before the first append so no job is skipped.
    JobQueue::<DispatchJob>::init(queue.as_ref())
        .await
        .wrap_err("Failed to initialize the email stream")?;

    let service = NotificationService::new(queue.clone(), mail.sender_policy())
        .with_stream_name(&worker_config.stream_name);
    let health_state = HealthState::new(queue, app_info.name, app_info.version);
    let app = build_app(service, health_state);

    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr)
        .await
        .wrap_err_with(|| format!("Failed to bind API server to {}", addr))?;
    info!(port = %port, stream = %worker_config.stream_name, "Email submission API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .wrap_err("API server failed")?;

    info!("Email submission API stopped");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM. A handler that fails to install never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down gracefully"),
        _ = terminate => info!("Received SIGTERM, shutting down gracefully"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, header};
    use domain_notifications::SenderPolicy;
    use serde_json::Value;
    use stream_worker::{InMemoryQueue, QueueMonitor};
    use tower::ServiceExt;

    fn app() -> (Router, Arc<InMemoryQueue>) {
        let queue = Arc::new(InMemoryQueue::new("email:jobs"));
        let service = NotificationService::new(queue.clone(), SenderPolicy::any());
        let health = HealthState::new(queue.clone(), "postbox_api", "0.1.0");
        (build_app(service, health), queue)
    }

    async fn call(router: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_send_is_queued() {
        let (router, queue) = app();
        let request = Request::builder()
            .method("POST")
            .uri("/email/send")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                r#"{"to":"user@example.com","subject":"Hi","body":"Hello"}"#,
            ))
            .unwrap();

        let (status, body) = call(router, request).await;

        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["message"], "Email queued successfully");
        assert_eq!(queue.stats().await.unwrap().length, 1);
    }

    #[tokio::test]
    async fn test_health_reports_app_info() {
        let (router, _) = app();
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();

        let (status, body) = call(router, request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["name"], "postbox_api");
    }

    #[tokio::test]
    async fn test_unknown_route_is_json_404() {
        let (router, _) = app();
        let request = Request::builder().uri("/nope").body(Body::empty()).unwrap();

        let (status, body) = call(router, request).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");
    }
}
