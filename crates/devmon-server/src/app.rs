//! Application state and HTTP routes
//!
//! `AppState` carries the session store and telemetry service as trait
//! objects so the same routes run against SQLite in production and against
//! in-memory stores and scripted telemetry sources in tests.

use axum::{
    Router,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use devmon_core::{Clock, SessionStore};
use devmon_observability::{HealthState, health_router};
use devmon_sync::TelemetryService;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{config::Environment, handlers};

/// Shared state of every API handler
#[derive(Clone)]
pub struct AppState {
    sessions: Arc<dyn SessionStore>,
    telemetry: Arc<TelemetryService>,
    clock: Arc<dyn Clock>,
    /// Device used by webhooks that name none
    default_device: String,
    environment: Environment,
}

impl AppState {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        telemetry: Arc<TelemetryService>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            sessions,
            telemetry,
            clock,
            default_device: String::new(),
            environment: Environment::default(),
        }
    }

    pub fn with_default_device(mut self, device_id: impl Into<String>) -> Self {
        self.default_device = device_id.into();
        self
    }

    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    pub fn sessions(&self) -> &Arc<dyn SessionStore> {
        &self.sessions
    }

    pub fn telemetry(&self) -> &Arc<TelemetryService> {
        &self.telemetry
    }

    pub fn default_device(&self) -> &str {
        &self.default_device
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

/// `/api` routes
pub fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(handlers::health))
        // Sessions
        .route("/api/sessions", get(handlers::list_sessions))
        .route("/api/sessions/statistics", get(handlers::statistics))
        .route(
            "/api/sessions/device/{device_id}/statistics",
            get(handlers::device_statistics),
        )
        .route(
            "/api/sessions/{id}",
            get(handlers::get_session).delete(handlers::delete_session),
        )
        .route("/api/sessions/{id}/report", get(handlers::session_report))
        // Webhooks
        .route("/api/webhooks/device/start", post(handlers::device_start))
        .route("/api/webhooks/device/end", post(handlers::device_end))
        .route("/api/webhooks/test/start", post(handlers::test_start))
        .route("/api/webhooks/test/end", post(handlers::test_end))
        // Telemetry
        .route("/api/iot/sync/{session_id}", post(handlers::sync_session))
        .route("/api/iot/data-points", get(handlers::data_points))
        .route(
            "/api/iot/device/{device_id}/points",
            get(handlers::device_points),
        )
        .route("/api/iot/test-connection", get(handlers::test_connection))
        .fallback(handlers::not_found)
        .with_state(state)
}

/// API routes plus health and metrics endpoints
pub fn build_app(state: AppState, health: HealthState) -> Router {
    api_router(state)
        .merge(health_router(health))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::{
        body::Body,
        http::{Method, Request, StatusCode},
    };
    use chrono::{Duration, TimeZone};
    use devmon_core::{
        ManualClock, NullTelemetryStore, default_registry,
        telemetry::{RawSample, TelemetryValue},
    };
    use devmon_egress::{EgressError, TelemetrySource};
    use devmon_observability::Metrics;
    use devmon_session_sqlite::SqliteSessionStore;
    use devmon_sync::FetchOrchestrator;
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()
    }

    /// Two temperature samples per query, nothing for other points
    struct FakeSource {
        accept: bool,
    }

    #[async_trait]
    impl TelemetrySource for FakeSource {
        async fn query(
            &self,
            _device_id: &str,
            point_name: &str,
            start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> devmon_egress::Result<Vec<RawSample>> {
            if !self.accept {
                return Err(EgressError::Auth("appSecret mismatch".to_string()));
            }
            if point_name != "temperature" {
                return Ok(Vec::new());
            }
            Ok(vec![
                RawSample::new(
                    TelemetryValue::Number(start.timestamp_millis() as f64),
                    TelemetryValue::Text("21.5".to_string()),
                ),
                RawSample::new(
                    TelemetryValue::Text((start.timestamp() + 60).to_string()),
                    TelemetryValue::Number(22.0),
                ),
            ])
        }

        async fn authenticate(&self) -> devmon_egress::Result<()> {
            if self.accept {
                Ok(())
            } else {
                Err(EgressError::Auth("appSecret mismatch".to_string()))
            }
        }
    }

    struct TestApp {
        state: AppState,
        clock: Arc<ManualClock>,
    }

    impl TestApp {
        async fn new(accept: bool) -> Self {
            let clock = Arc::new(ManualClock::new(t0()));
            let orchestrator = FetchOrchestrator::new(
                Arc::new(FakeSource { accept }),
                default_registry(),
                clock.clone(),
            )
            .with_default_device("default-dev");
            let telemetry = TelemetryService::new(orchestrator, Arc::new(NullTelemetryStore));
            let sessions = SqliteSessionStore::in_memory().await.unwrap();

            let state = AppState::new(Arc::new(sessions), Arc::new(telemetry), clock.clone())
                .with_default_device("default-dev");
            Self { state, clock }
        }

        async fn send(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
            let metrics = Arc::new(Metrics::new().unwrap());
            let app = build_app(self.state.clone(), HealthState::new(metrics));

            let mut request = Request::builder().method(method).uri(uri);
            let body = match body {
                Some(json) => {
                    request = request.header("content-type", "application/json");
                    Body::from(json.to_string())
                }
                None => Body::empty(),
            };

            let response = app.oneshot(request.body(body).unwrap()).await.unwrap();
            let status = response.status();
            let bytes = response.into_body().collect().await.unwrap().to_bytes();
            let value = if bytes.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&bytes).unwrap_or(Value::Null)
            };
            (status, value)
        }

        async fn get(&self, uri: &str) -> (StatusCode, Value) {
            self.send(Method::GET, uri, None).await
        }

        async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
            self.send(Method::POST, uri, Some(body)).await
        }

        async fn start(&self, device: &str, timestamp: &str) -> String {
            let (status, body) = self
                .post(
                    "/api/webhooks/device/start",
                    json!({"power": "on", "deviceId": device, "timestamp": timestamp}),
                )
                .await;
            assert_eq!(status, StatusCode::OK, "{}", body);
            body["sessionId"].as_str().unwrap().to_string()
        }
    }

    #[tokio::test]
    async fn test_health() {
        let app = TestApp::new(true).await;
        let (status, body) = app.get("/api/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "healthy", "environment": "development"}));

        let (status, body) = app.get("/healthz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_unknown_api_path() {
        let app = TestApp::new(true).await;
        let (status, body) = app.get("/api/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "API endpoint not found");
    }

    #[tokio::test]
    async fn test_device_start_creates_session() {
        let app = TestApp::new(true).await;
        let (status, body) = app
            .post(
                "/api/webhooks/device/start?deviceName=from-query",
                json!({
                    "power": "on",
                    "deviceId": "from-body",
                    "timestamp": "2024-03-01T08:00:00Z",
                    "metadata": {"operator": "amy"}
                }),
            )
            .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Device started successfully");
        assert_eq!(body["deviceId"], "from-query");

        let session_id = body["sessionId"].as_str().unwrap();
        let (status, session) = app.get(&format!("/api/sessions/{}", session_id)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(session["device_id"], "from-query");
        assert_eq!(session["status"], "running");
        assert_eq!(session["metadata"]["operator"], "amy");
    }

    #[tokio::test]
    async fn test_device_start_falls_back_to_default_device_and_now() {
        let app = TestApp::new(true).await;
        let (status, body) = app
            .post(
                "/api/webhooks/device/start",
                json!({"power": "on", "timestamp": "yesterday"}),
            )
            .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["deviceId"], "default-dev");
        let start: DateTime<Utc> = serde_json::from_value(body["startTime"].clone()).unwrap();
        assert_eq!(start, t0());
    }

    #[tokio::test]
    async fn test_device_webhooks_reject_bad_input() {
        let app = TestApp::new(true).await;

        let (status, body) = app
            .post("/api/webhooks/device/start", json!({"power": "off"}))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid power status");

        let (status, body) = app
            .post("/api/webhooks/device/end", json!({"power": "on"}))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid power status");

        let (status, body) = app
            .post("/api/webhooks/device/start", json!({"power": 5}))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid request body");
    }

    #[tokio::test]
    async fn test_device_end_closes_newest_running_session() {
        let app = TestApp::new(true).await;
        let older = app.start("dev-1", "2024-03-01T08:00:00Z").await;
        let newer = app.start("dev-1", "2024-03-01T09:00:00Z").await;

        let (status, body) = app
            .post(
                "/api/webhooks/device/end",
                json!({"power": "off", "deviceId": "dev-1", "timestamp": "2024-03-01T09:30:00Z"}),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        assert_eq!(body["message"], "Device stopped successfully");
        assert_eq!(body["sessionId"], newer.as_str());

        let (_, session) = app.get(&format!("/api/sessions/{}", newer)).await;
        assert_eq!(session["status"], "completed");
        assert_eq!(session["duration"], 1800);

        let (_, session) = app.get(&format!("/api/sessions/{}", older)).await;
        assert_eq!(session["status"], "running");
    }

    #[tokio::test]
    async fn test_device_end_by_session_id() {
        let app = TestApp::new(true).await;
        let session_id = app.start("dev-1", "2024-03-01T08:00:00Z").await;

        let (status, _) = app
            .post(
                "/api/webhooks/device/end",
                json!({"power": "off", "sessionId": session_id, "timestamp": "2024-03-01T08:00:10Z"}),
            )
            .await;
        assert_eq!(status, StatusCode::OK);

        // Already completed
        let (status, body) = app
            .post(
                "/api/webhooks/device/end",
                json!({"power": "off", "sessionId": session_id}),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("is not running"));
    }

    #[tokio::test]
    async fn test_device_end_without_running_session() {
        let app = TestApp::new(true).await;
        let (status, body) = app
            .post(
                "/api/webhooks/device/end",
                json!({"power": "off", "deviceId": "idle"}),
            )
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "No running session found for device");
    }

    #[tokio::test]
    async fn test_test_webhooks() {
        let app = TestApp::new(true).await;

        let (status, body) = app
            .send(Method::POST, "/api/webhooks/test/start?deviceId=bench", None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Test device started successfully");
        assert_eq!(body["deviceId"], "bench");
        let session_id = body["sessionId"].as_str().unwrap().to_string();

        let (status, body) = app.send(Method::POST, "/api/webhooks/test/end", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Either sessionId or deviceId is required");

        app.clock.advance(Duration::seconds(42));
        let (status, body) = app
            .send(Method::POST, "/api/webhooks/test/end?deviceId=bench", None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Test device stopped successfully");
        assert_eq!(body["sessionId"], session_id.as_str());

        let (_, session) = app.get(&format!("/api/sessions/{}", session_id)).await;
        assert_eq!(session["duration"], 42);
        assert_eq!(session["metadata"]["test"], true);
    }

    #[tokio::test]
    async fn test_list_sessions_with_filters() {
        let app = TestApp::new(true).await;
        app.start("dev-1", "2024-03-01T08:00:00Z").await;
        app.start("dev-1", "2024-03-02T08:00:00Z").await;
        app.start("dev-2", "2024-03-03T08:00:00Z").await;

        let (status, body) = app.get("/api/sessions").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"].as_array().unwrap().len(), 3);
        assert_eq!(body["data"][0]["device_id"], "dev-2");
        assert_eq!(body["pagination"], json!({"limit": 50, "offset": 0, "total": 3}));

        let (_, body) = app.get("/api/sessions?deviceId=dev-1&limit=1&offset=1").await;
        assert_eq!(body["data"].as_array().unwrap().len(), 1);
        assert_eq!(body["data"][0]["start_time"], "2024-03-01T08:00:00Z");
        assert_eq!(body["pagination"], json!({"limit": 1, "offset": 1, "total": 2}));

        let (_, body) = app.get("/api/sessions?startDate=2024-03-02&endDate=2024-03-02").await;
        assert_eq!(body["pagination"]["total"], 1);

        let (status, _) = app.get("/api/sessions?status=paused").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = app.get("/api/sessions?startDate=03/01/2024").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid startDate, expected YYYY-MM-DD");
    }

    #[tokio::test]
    async fn test_get_and_delete_session() {
        let app = TestApp::new(true).await;

        let (status, body) = app.get("/api/sessions/missing").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Session not found");

        let session_id = app.start("dev-1", "2024-03-01T08:00:00Z").await;
        let (status, body) = app
            .send(Method::DELETE, &format!("/api/sessions/{}", session_id), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Session deleted successfully");

        let (status, _) = app.get(&format!("/api/sessions/{}", session_id)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_statistics_routes() {
        let app = TestApp::new(true).await;
        let first = app.start("dev-1", "2024-03-01T08:00:00Z").await;
        app.start("dev-2", "2024-03-01T08:00:00Z").await;
        app.post(
            "/api/webhooks/device/end",
            json!({"power": "off", "sessionId": first, "timestamp": "2024-03-01T08:01:40Z"}),
        )
        .await;

        let (status, body) = app.get("/api/sessions/statistics").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_sessions"], 2);
        assert_eq!(body["completed_sessions"], 1);
        assert_eq!(body["running_sessions"], 1);

        let (status, body) = app.get("/api/sessions/device/dev-1/statistics").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["total_sessions"], 1);
        assert_eq!(body["data"]["max_duration"], 100);
        assert_eq!(body["data"]["daily_distribution"][0]["date"], "2024-03-01");
    }

    #[tokio::test]
    async fn test_sync_flattens_samples() {
        let app = TestApp::new(true).await;
        let session_id = app.start("dev-1", "2024-03-01T08:00:00Z").await;
        app.clock.advance(Duration::minutes(5));

        let (status, body) = app
            .send(Method::POST, &format!("/api/iot/sync/{}", session_id), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "IoT data synced successfully");
        assert_eq!(body["dataCount"], 2);
        assert_eq!(
            body["data"][0],
            json!({
                "pointName": "temperature",
                "pointValue": 21.5,
                "timestamp": "2024-03-01T08:00:00Z",
                "unit": "°C"
            })
        );

        let (status, _) = app.send(Method::POST, "/api/iot/sync/missing", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_session_report() {
        let app = TestApp::new(true).await;
        let session_id = app.start("dev-1", "2024-03-01T08:00:00Z").await;

        let (status, body) = app.get(&format!("/api/sessions/{}/report", session_id)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["session"]["session_id"], session_id.as_str());

        let temperature = &body["data"]["points"]["temperature"];
        assert_eq!(temperature["count"], 2);
        assert_eq!(temperature["avg_value"], 21.75);
        assert_eq!(body["data"]["series"]["temperature"].as_array().unwrap().len(), 2);
        assert_eq!(body["data"]["points"]["volume"]["count"], 0);
    }

    #[tokio::test]
    async fn test_report_degrades_when_platform_rejects_credentials() {
        let app = TestApp::new(false).await;
        let session_id = app.start("dev-1", "2024-03-01T08:00:00Z").await;

        let (status, body) = app.get(&format!("/api/sessions/{}/report", session_id)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["points"]["temperature"]["count"], 0);
    }

    #[tokio::test]
    async fn test_data_point_listings() {
        let app = TestApp::new(true).await;

        let (status, body) = app.get("/api/iot/data-points").await;
        assert_eq!(status, StatusCode::OK);
        let points = body["dataPoints"].as_array().unwrap();
        assert_eq!(points.len(), 7);
        assert_eq!(points[0]["name"], "volume");

        let (status, body) = app.get("/api/iot/device/dev-1/points").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(
            body["data"][2],
            json!({"name": "temperature", "displayName": "Temperature", "unit": "°C"})
        );
    }

    #[tokio::test]
    async fn test_connection_endpoint() {
        let (status, body) = TestApp::new(true).await.get("/api/iot/test-connection").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({"message": "IoT connection test successful", "success": true})
        );

        let (status, body) = TestApp::new(false).await.get("/api/iot/test-connection").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["success"], false);
        assert_eq!(
            body["error"],
            "IoT connection test failed: Authentication failed: appSecret mismatch"
        );
    }
}
