//! HTTP surface: dispatch invocation, execution log, quota usage, health.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, Request, State, rejection::JsonRejection},
    http::{HeaderValue, Method, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{error, warn};

use crate::dispatch::{DispatchRequest, Dispatcher, RateLimiter};
use crate::error::DispatchError;
use crate::store::{Database, LogQuery};

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub db: Arc<dyn Database>,
    pub limiter: Arc<RateLimiter>,
    /// Bearer token required on `/api` routes when set.
    pub service_key: Option<Arc<SecretString>>,
}

fn allow_origin(allowed_origins: &[String]) -> AllowOrigin {
    if allowed_origins.iter().any(|o| o == "*") {
        return AllowOrigin::any();
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin: {e}");
                None
            }
        })
        .collect();
    AllowOrigin::list(origins)
}

pub fn router(state: AppState, allowed_origins: &[String]) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(allow_origin(allowed_origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    let api = Router::new()
        .route("/api/outreach/dispatch", post(dispatch))
        .route("/api/outreach/logs", get(list_logs))
        .route("/api/outreach/usage", get(usage))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_service_key,
        ));

    Router::new()
        .route("/health", get(health))
        .merge(api)
        .layer(cors)
        .with_state(state)
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

/// Reject `/api` requests without the configured bearer token.
async fn require_service_key(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(key) = &state.service_key else {
        return next.run(req).await;
    };

    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match token {
        Some(token) if token == key.expose_secret() => next.run(req).await,
        Some(_) => error_response(StatusCode::UNAUTHORIZED, "Invalid bearer token"),
        None => error_response(StatusCode::UNAUTHORIZED, "Missing Authorization header"),
    }
}

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "outreach-dispatch"
    }))
}

async fn dispatch(
    State(state): State<AppState>,
    body: Result<Json<DispatchRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => return error_response(StatusCode::BAD_REQUEST, rejection.body_text()),
    };

    match state.dispatcher.run(request).await {
        Ok(summary) => (StatusCode::OK, Json(json!(summary))).into_response(),
        Err(DispatchError::InvalidRequest(message)) => {
            error_response(StatusCode::BAD_REQUEST, message)
        }
        Err(e @ DispatchError::Fetch(_)) => {
            error!(error = %e, "Dispatch run failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

async fn list_logs(State(state): State<AppState>, Query(query): Query<LogQuery>) -> Response {
    match state.db.list_log_entries(&query).await {
        Ok(entries) => (StatusCode::OK, Json(json!(entries))).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to read execution log");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

#[derive(Deserialize)]
struct UsageQuery {
    #[serde(default)]
    user_id: Option<String>,
}

async fn usage(State(state): State<AppState>, Query(query): Query<UsageQuery>) -> Response {
    let Some(user_id) = query.user_id.filter(|u| !u.trim().is_empty()) else {
        return error_response(StatusCode::BAD_REQUEST, "user_id is required");
    };

    match state.limiter.usage(&user_id).await {
        Ok(usage) => (
            StatusCode::OK,
            Json(json!({ "user_id": user_id, "channels": usage })),
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to read send counters");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::SenderRegistry;
    use crate::config::{DispatchConfig, RateLimitConfig};
    use crate::dispatch::model::{Channel, OutreachTask, Recipient};
    use crate::dispatch::SystemClock;
    use crate::store::LibSqlBackend;
    use axum::body::Body;
    use serde_json::Value;
    use tower::ServiceExt;

    const TEST_KEY: &str = "svc_test_key";

    async fn make_state(service_key: Option<&str>) -> (AppState, Arc<LibSqlBackend>) {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let limiter = Arc::new(RateLimiter::new(
            db.clone(),
            RateLimitConfig::default(),
            Arc::new(SystemClock),
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            db.clone(),
            Arc::new(SenderRegistry::new()),
            limiter.clone(),
            DispatchConfig::default(),
        ));
        let state = AppState {
            dispatcher,
            db: db.clone(),
            limiter,
            service_key: service_key.map(|k| Arc::new(SecretString::from(k.to_string()))),
        };
        (state, db)
    }

    async fn body_json(resp: Response) -> Value {
        let bytes = axum::body::to_bytes(resp.into_body(), 1024 * 1024)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> axum::http::Request<Body> {
        axum::http::Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::AUTHORIZATION, format!("Bearer {TEST_KEY}"))
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_is_public() {
        let (state, _) = make_state(Some(TEST_KEY)).await;
        let resp = router(state, &[])
            .oneshot(axum::http::Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["status"], "ok");
    }

    #[tokio::test]
    async fn dispatch_requires_bearer_token() {
        let (state, _) = make_state(Some(TEST_KEY)).await;
        let resp = router(state.clone(), &[])
            .oneshot(
                axum::http::Request::post("/api/outreach/dispatch")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"user_id":"u1"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp = router(state, &[])
            .oneshot(
                axum::http::Request::post("/api/outreach/dispatch")
                    .header(header::CONTENT_TYPE, "application/json")
                    .header(header::AUTHORIZATION, "Bearer wrong")
                    .body(Body::from(r#"{"user_id":"u1"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn dispatch_returns_summary() {
        let (state, db) = make_state(Some(TEST_KEY)).await;
        let task = OutreachTask::new("u1", "camp", "cand", Channel::Sms, "hi", Recipient::new("Ada"))
            .approved();
        db.insert_task(&task).await.unwrap();

        let resp = router(state, &[])
            .oneshot(post_json("/api/outreach/dispatch", json!({ "user_id": "u1" })))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = body_json(resp).await;
        assert_eq!(body["sent"], 0);
        assert_eq!(body["failed"], 0);
        assert_eq!(body["skipped_rate_limit"], 0);
        assert_eq!(body["skipped_no_connection"], 1);
        assert_eq!(body["details"][0]["task_id"], task.id.to_string());
        assert_eq!(body["details"][0]["candidate_name"], "Ada");
        assert_eq!(body["details"][0]["status"], "skipped_no_connection");
    }

    #[tokio::test]
    async fn dispatch_rejects_invalid_requests() {
        let (state, _) = make_state(None).await;

        let resp = router(state.clone(), &[])
            .oneshot(post_json("/api/outreach/dispatch", json!({ "limit": 5 })))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = router(state, &[])
            .oneshot(post_json(
                "/api/outreach/dispatch",
                json!({ "user_id": "u1", "channels": ["pigeon"] }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(body_json(resp).await["error"]
            .as_str()
            .unwrap()
            .contains("pigeon"));
    }

    #[tokio::test]
    async fn fetch_failure_is_server_error() {
        let (state, db) = make_state(None).await;
        db.execute_raw("DROP TABLE outreach_tasks").await.unwrap();

        let resp = router(state, &[])
            .oneshot(post_json("/api/outreach/dispatch", json!({ "user_id": "u1" })))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn logs_and_usage_reflect_a_run() {
        let (state, db) = make_state(None).await;
        let task = OutreachTask::new("u1", "camp", "cand", Channel::Email, "hi", Recipient::new("Ada"))
            .approved();
        db.insert_task(&task).await.unwrap();

        let app = router(state, &[]);
        let resp = app
            .clone()
            .oneshot(post_json("/api/outreach/dispatch", json!({ "user_id": "u1" })))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = app
            .clone()
            .oneshot(
                axum::http::Request::get("/api/outreach/logs?user_id=u1&limit=10")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let logs = body_json(resp).await;
        assert_eq!(logs.as_array().unwrap().len(), 1);
        assert_eq!(logs[0]["task_id"], task.id.to_string());

        let resp = app
            .clone()
            .oneshot(
                axum::http::Request::get("/api/outreach/usage?user_id=u1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let usage = body_json(resp).await;
        assert_eq!(usage["channels"].as_array().unwrap().len(), 3);
        assert_eq!(usage["channels"][1]["channel"], "email");
        assert_eq!(usage["channels"][1]["sent_today"], 0);

        let resp = app
            .oneshot(
                axum::http::Request::get("/api/outreach/usage")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn cors_allows_configured_origin() {
        let (state, _) = make_state(None).await;
        let resp = router(state, &["https://app.example".to_string()])
            .oneshot(
                axum::http::Request::get("/health")
                    .header(header::ORIGIN, "https://app.example")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            resp.headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .and_then(|v| v.to_str().ok()),
            Some("https://app.example")
        );
    }
}
