//! HTTP submission endpoint.

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
};
use serde_json::json;

use crate::models::RawSendRequest;
use crate::service::{NotificationService, SubmitError};

impl IntoResponse for SubmitError {
    fn into_response(self) -> Response {
        match self {
            SubmitError::Validation(violations) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({
                    "error": "validation_failed",
                    "violations": violations,
                })),
            )
                .into_response(),
            SubmitError::Queue(e) => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "error": "queue_unavailable",
                    "message": e.to_string(),
                })),
            )
                .into_response(),
        }
    }
}

/// `POST /email/send`
pub async fn send_email(
    State(service): State<NotificationService>,
    payload: Result<Json<RawSendRequest>, JsonRejection>,
) -> Result<impl IntoResponse, Response> {
    let Json(raw) = payload.map_err(|rejection| {
        (
            rejection.status(),
            Json(json!({
                "error": "invalid_body",
                "message": rejection.body_text(),
            })),
        )
            .into_response()
    })?;

    let handle = service.submit(raw).await.map_err(IntoResponse::into_response)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "message": "Email queued successfully",
            "job_id": handle.job_id,
            "stream_id": handle.stream_id,
        })),
    ))
}

/// Router exposing `POST /email/send`.
pub fn router(service: NotificationService) -> Router {
    Router::new()
        .route("/email/send", post(send_email))
        .with_state(service)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::SenderPolicy;
    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, header};
    use serde_json::Value;
    use std::sync::Arc;
    use std::time::Duration;
    use stream_worker::{
        DlqEntry, DlqStats, InMemoryQueue, JobQueue, QueueMonitor, QueueStats, StreamError, StreamEvent, StreamJob,
    };
    use tower::ServiceExt;

    async fn post_json(router: Router, body: &str) -> (StatusCode, Value) {
        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/email/send")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn app() -> (Router, Arc<InMemoryQueue>) {
        let queue = Arc::new(InMemoryQueue::new("email:jobs"));
        let service = NotificationService::new(queue.clone(), SenderPolicy::new(["example.org"]));
        (router(service), queue)
    }

    #[tokio::test]
    async fn test_accepted_request_returns_handle() {
        let (router, queue) = app();

        let (status, body) = post_json(
            router,
            r#"{"to":"user@example.com","subject":"Hi","body":"<p>Hi</p>"}"#,
        )
        .await;

        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["message"], "Email queued successfully");
        assert!(body["job_id"].is_string());
        assert!(body["stream_id"].is_string());
        assert_eq!(queue.stats().await.unwrap().length, 1);
    }

    #[tokio::test]
    async fn test_validation_failure_is_unprocessable() {
        let (router, queue) = app();

        let (status, body) = post_json(router, r#"{"to":"nope","subject":""}"#).await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "validation_failed");
        assert_eq!(body["violations"][0]["field"], "to");
        assert_eq!(body["violations"][0]["reason"], "invalid email address");
        assert_eq!(body["violations"][1]["field"], "subject");
        assert_eq!(queue.stats().await.unwrap().length, 0);
    }

    #[tokio::test]
    async fn test_null_context_value_is_rejected() {
        let (router, _) = app();

        let (status, body) = post_json(
            router,
            r#"{"to":"user@example.com","subject":"Hi","template":"t","context":{"name":null}}"#,
        )
        .await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "invalid_body");
    }

    struct DownQueue;

    #[async_trait]
    impl QueueMonitor for DownQueue {
        async fn ping(&self) -> Result<(), StreamError> {
            Err(StreamError::Internal("down".into()))
        }

        async fn stats(&self) -> Result<QueueStats, StreamError> {
            Err(StreamError::Internal("down".into()))
        }

        async fn dead_letters(&self, _: usize, _: usize) -> Result<Vec<DlqEntry>, StreamError> {
            Ok(Vec::new())
        }

        async fn dlq_stats(&self) -> Result<DlqStats, StreamError> {
            Err(StreamError::Internal("down".into()))
        }
    }

    #[async_trait]
    impl<J: StreamJob> JobQueue<J> for DownQueue {
        async fn enqueue(&self, _: &J) -> Result<String, StreamError> {
            Err(StreamError::Internal("down".into()))
        }

        async fn claim(&self, _: usize) -> Result<Vec<StreamEvent<J>>, StreamError> {
            Ok(Vec::new())
        }

        async fn ack(&self, _: &str) -> Result<(), StreamError> {
            Ok(())
        }

        async fn requeue(&self, _: &str, _: &J, _: Duration) -> Result<(), StreamError> {
            Ok(())
        }

        async fn dead_letter(&self, _: &str, _: &J, _: &str) -> Result<String, StreamError> {
            Ok(String::new())
        }
    }

    #[tokio::test]
    async fn test_queue_failure_is_service_unavailable() {
        let service = NotificationService::new(Arc::new(DownQueue), SenderPolicy::any());

        let (status, body) = post_json(
            router(service),
            r#"{"to":"user@example.com","subject":"Hi"}"#,
        )
        .await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"], "queue_unavailable");
    }
}
