use crate::server::AppState;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Extension, Json};
use courier_core::DispatchError;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

/// Placeholder the order dashboard sends for customers without a phone.
const UNREGISTERED_PHONE: &str = "Telefone não cadastrado";

#[derive(Debug, Deserialize)]
struct NotifyRequest {
    #[serde(default)]
    phone: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    customer_name: Option<String>,
}

pub fn router() -> axum::Router {
    axum::Router::new().route("/notify", post(notify))
}

#[tracing::instrument(level = "info", skip_all)]
async fn notify(
    Extension(state): Extension<Arc<AppState>>,
    payload: Result<Json<NotifyRequest>, JsonRejection>,
) -> (StatusCode, Json<serde_json::Value>) {
    let req = match payload {
        Ok(Json(req)) => req,
        Err(rejection) => {
            tracing::warn!(
                status = rejection.status().as_u16(),
                reason = %rejection.body_text(),
                "malformed notification body"
            );
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "success": false, "message": "invalid request" })),
            );
        }
    };
    let phone = req.phone.as_deref().map(str::trim).unwrap_or_default();
    if phone.is_empty() || phone == UNREGISTERED_PHONE {
        return invalid_phone();
    }

    let submitted = state.dispatcher.submit(
        phone,
        req.status.as_deref().unwrap_or_default(),
        req.customer_name.as_deref(),
    );
    match submitted {
        Ok(receipt) => {
            tracing::info!(
                task_id = %receipt.task_id,
                recipient = %receipt.recipient,
                queue_depth = receipt.queue_depth,
                "notification queued"
            );
            (
                StatusCode::OK,
                Json(json!({
                    "success": true,
                    "message": "queued",
                    "task_id": receipt.task_id,
                    "queue_depth": receipt.queue_depth,
                })),
            )
        }
        Err(DispatchError::InvalidRecipient(_)) => invalid_phone(),
        Err(DispatchError::EngineNotReady(reason)) => {
            tracing::warn!(%reason, "notification refused");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "success": false, "message": "engine not ready" })),
            )
        }
        Err(e) => {
            tracing::error!(error = %e, "notification failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "success": false, "message": e.to_string() })),
            )
        }
    }
}

fn invalid_phone() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "success": false, "message": "invalid phone" })),
    )
}

#[cfg(test)]
mod tests {
    use super::router;
    use crate::routes::test_support;
    use axum::Extension;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::json;
    use tower::util::ServiceExt;

    fn post_json(body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/notify")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    #[tokio::test]
    async fn accepted_notification_returns_task_id() {
        let state = test_support::state(true);
        let response = router()
            .layer(Extension(state.clone()))
            .oneshot(post_json(json!({
                "phone": "(83) 98169-1823",
                "status": "saiu_entrega",
                "customer_name": "Maria",
            })))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let body = test_support::body_json(response).await;
        assert_eq!(body["success"], true);
        assert!(body["task_id"].as_str().is_some_and(|id| !id.is_empty()));
        assert_eq!(body["queue_depth"], 1);
        assert_eq!(state.dispatcher.engine().status().submitted, 1);
    }

    #[tokio::test]
    async fn missing_or_placeholder_phone_is_rejected() {
        for payload in [
            json!({ "status": "saiu_entrega" }),
            json!({ "phone": "", "status": "saiu_entrega" }),
            json!({ "phone": "Telefone não cadastrado", "status": "saiu_entrega" }),
            json!({ "phone": "n/a", "status": "saiu_entrega" }),
        ] {
            let state = test_support::state(true);
            let response = router()
                .layer(Extension(state.clone()))
                .oneshot(post_json(payload.clone()))
                .await
                .expect("response");
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "payload {payload}");
            let body = test_support::body_json(response).await;
            assert_eq!(body, json!({ "success": false, "message": "invalid phone" }));
            assert_eq!(state.dispatcher.engine().status().queue_depth, 0);
        }
    }

    #[tokio::test]
    async fn engine_that_never_started_yields_503() {
        let response = router()
            .layer(Extension(test_support::state(false)))
            .oneshot(post_json(json!({ "phone": "83981691823", "status": "entregue" })))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = test_support::body_json(response).await;
        assert_eq!(body["message"], "engine not ready");
    }

    #[tokio::test]
    async fn malformed_body_gets_json_error() {
        let requests = [
            Request::builder()
                .method("POST")
                .uri("/notify")
                .header("content-type", "application/json")
                .body(Body::from("not json"))
                .expect("request"),
            Request::builder()
                .method("POST")
                .uri("/notify")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"phone": 83981691823}"#))
                .expect("request"),
            Request::builder()
                .method("POST")
                .uri("/notify")
                .body(Body::from(r#"{"phone": "83981691823"}"#))
                .expect("request"),
        ];
        for request in requests {
            let state = test_support::state(true);
            let response = router()
                .layer(Extension(state.clone()))
                .oneshot(request)
                .await
                .expect("response");
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            let body = test_support::body_json(response).await;
            assert_eq!(body, json!({ "success": false, "message": "invalid request" }));
            assert_eq!(state.dispatcher.engine().status().submitted, 0);
        }
    }

    #[tokio::test]
    async fn missing_name_and_status_still_queue() {
        let state = test_support::state(true);
        let response = router()
            .layer(Extension(state))
            .oneshot(post_json(json!({ "phone": "83981691823" })))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
    }
}
