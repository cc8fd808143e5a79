//! JSON API handlers

use axum::{
    Json,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, NaiveDate, Utc};
use devmon_core::{
    Error as CoreError, Session, SessionStatus,
    session::{SessionFilter, StatisticsFilter},
    session_store::SessionMetadata,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::app::AppState;

/// Error returned by API handlers, rendered as `{"error": "..."}`
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    /// Prefix internal failures with what was being attempted
    fn context(self, what: &str) -> Self {
        match self {
            ApiError::Internal(message) => ApiError::Internal(format!("{}: {}", what, message)),
            other => other,
        }
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::SessionNotFound(_) => ApiError::NotFound("Session not found".to_string()),
            CoreError::SessionNotRunning { .. } | CoreError::InvalidRequest(_) => {
                ApiError::BadRequest(err.to_string())
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

type ApiResult = Result<Json<serde_json::Value>, ApiError>;

/// Webhook body sent by the device gateway
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookRequest {
    #[serde(default)]
    power: String,
    #[serde(default)]
    device_id: String,
    #[serde(default)]
    session_id: String,
    /// RFC 3339; the current time is used when absent or unparsable
    #[serde(default)]
    timestamp: String,
    #[serde(default)]
    metadata: Option<SessionMetadata>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceQuery {
    device_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestWebhookQuery {
    session_id: Option<String>,
    device_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionsQuery {
    device_id: Option<String>,
    status: Option<String>,
    start_date: Option<String>,
    end_date: Option<String>,
    limit: Option<String>,
    offset: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateRangeQuery {
    device_id: Option<String>,
    start_date: Option<String>,
    end_date: Option<String>,
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn parse_date(value: Option<&str>, field: &str) -> Result<Option<NaiveDate>, ApiError> {
    non_empty(value)
        .map(|v| {
            NaiveDate::parse_from_str(v, "%Y-%m-%d").map_err(|_| {
                ApiError::BadRequest(format!("Invalid {}, expected YYYY-MM-DD", field))
            })
        })
        .transpose()
}

fn event_time(timestamp: &str, now: DateTime<Utc>) -> DateTime<Utc> {
    if timestamp.is_empty() {
        return now;
    }
    match DateTime::parse_from_rfc3339(timestamp) {
        Ok(parsed) => parsed.with_timezone(&Utc),
        Err(e) => {
            debug!("Ignoring unparsable webhook timestamp '{}': {}", timestamp, e);
            now
        }
    }
}

/// Device named by the query, then the body, then the configured default
fn webhook_device(state: &AppState, query: &DeviceQuery, body: &WebhookRequest) -> String {
    non_empty(query.device_name.as_deref())
        .or(non_empty(Some(body.device_id.as_str())))
        .unwrap_or(state.default_device())
        .to_string()
}

async fn newest_running_session(state: &AppState, device_id: &str) -> Result<String, ApiError> {
    let sessions = state
        .sessions()
        .running_sessions(device_id)
        .await
        .map_err(|e| ApiError::from(e).context("Failed to find running session"))?;

    sessions
        .into_iter()
        .next()
        .map(|s| s.session_id)
        .ok_or_else(|| ApiError::NotFound("No running session found for device".to_string()))
}

async fn load_session(state: &AppState, session_id: &str) -> Result<Session, ApiError> {
    state
        .sessions()
        .get_by_id(session_id)
        .await
        .map_err(|e| ApiError::from(e).context("Failed to get session"))
}

/// GET /api/health
pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "environment": state.environment().as_str(),
    }))
}

/// GET /api/sessions
pub async fn list_sessions(
    State(state): State<AppState>,
    Query(params): Query<SessionsQuery>,
) -> ApiResult {
    let status = non_empty(params.status.as_deref())
        .map(|s| s.parse::<SessionStatus>())
        .transpose()?;
    let limit = non_empty(params.limit.as_deref())
        .and_then(|l| l.parse::<u32>().ok())
        .unwrap_or(devmon_session_sqlite::DEFAULT_PAGE_SIZE);
    let offset = non_empty(params.offset.as_deref())
        .and_then(|o| o.parse::<u32>().ok())
        .unwrap_or(0);

    let filter = SessionFilter {
        device_id: non_empty(params.device_id.as_deref()).map(str::to_string),
        status,
        start_date: parse_date(params.start_date.as_deref(), "startDate")?,
        end_date: parse_date(params.end_date.as_deref(), "endDate")?,
        limit: Some(limit),
        offset: Some(offset),
    };

    let page = state
        .sessions()
        .list(&filter)
        .await
        .map_err(|e| ApiError::from(e).context("Failed to get sessions"))?;

    Ok(Json(json!({
        "success": true,
        "data": page.sessions,
        "pagination": {
            "limit": limit,
            "offset": offset,
            "total": page.total,
        },
    })))
}

/// GET /api/sessions/{id}
pub async fn get_session(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    let session = load_session(&state, &id).await?;
    Ok(Json(json!(session)))
}

/// GET /api/sessions/{id}/report
pub async fn session_report(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    let session = load_session(&state, &id).await?;
    let report = state
        .telemetry()
        .build_session_report(&session)
        .await
        .map_err(|e| ApiError::from(e).context("Failed to build session report"))?;

    Ok(Json(json!({
        "success": true,
        "data": report,
    })))
}

/// DELETE /api/sessions/{id}
pub async fn delete_session(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    state
        .sessions()
        .delete(&id)
        .await
        .map_err(|e| ApiError::from(e).context("Failed to delete session"))?;

    Ok(Json(json!({ "message": "Session deleted successfully" })))
}

async fn statistics_for(
    state: &AppState,
    device_id: Option<String>,
    params: &DateRangeQuery,
) -> Result<serde_json::Value, ApiError> {
    let filter = StatisticsFilter {
        device_id,
        start_date: parse_date(params.start_date.as_deref(), "startDate")?,
        end_date: parse_date(params.end_date.as_deref(), "endDate")?,
    };
    let stats = state
        .sessions()
        .statistics(&filter)
        .await
        .map_err(|e| ApiError::from(e).context("Failed to get statistics"))?;
    Ok(json!(stats))
}

/// GET /api/sessions/statistics
pub async fn statistics(
    State(state): State<AppState>,
    Query(params): Query<DateRangeQuery>,
) -> ApiResult {
    let device_id = non_empty(params.device_id.as_deref()).map(str::to_string);
    Ok(Json(statistics_for(&state, device_id, &params).await?))
}

/// GET /api/sessions/device/{device_id}/statistics
pub async fn device_statistics(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Query(params): Query<DateRangeQuery>,
) -> ApiResult {
    let stats = statistics_for(&state, Some(device_id), &params).await?;
    Ok(Json(json!({
        "success": true,
        "data": stats,
    })))
}

/// POST /api/webhooks/device/start
pub async fn device_start(
    State(state): State<AppState>,
    Query(query): Query<DeviceQuery>,
    body: Result<Json<WebhookRequest>, JsonRejection>,
) -> ApiResult {
    let Json(body) = body.map_err(|e| {
        debug!("Rejected webhook body: {}", e);
        ApiError::BadRequest("Invalid request body".to_string())
    })?;
    if body.power != "on" {
        return Err(ApiError::BadRequest("Invalid power status".to_string()));
    }

    let device_id = webhook_device(&state, &query, &body);
    let start_time = event_time(&body.timestamp, state.now());

    let session = state
        .sessions()
        .create(&device_id, start_time, body.metadata)
        .await
        .map_err(|e| ApiError::from(e).context("Failed to create session"))?;

    info!("Device {} powered on, session {}", device_id, session.session_id);
    Ok(Json(json!({
        "message": "Device started successfully",
        "sessionId": session.session_id,
        "deviceId": device_id,
        "startTime": start_time,
    })))
}

/// POST /api/webhooks/device/end
pub async fn device_end(
    State(state): State<AppState>,
    Query(query): Query<DeviceQuery>,
    body: Result<Json<WebhookRequest>, JsonRejection>,
) -> ApiResult {
    let Json(body) = body.map_err(|e| {
        debug!("Rejected webhook body: {}", e);
        ApiError::BadRequest("Invalid request body".to_string())
    })?;
    if body.power != "off" {
        return Err(ApiError::BadRequest("Invalid power status".to_string()));
    }

    let device_id = webhook_device(&state, &query, &body);
    let end_time = event_time(&body.timestamp, state.now());

    let session_id = match non_empty(Some(body.session_id.as_str())) {
        Some(id) => id.to_string(),
        None => newest_running_session(&state, &device_id).await?,
    };

    state
        .sessions()
        .end(&session_id, end_time, body.metadata)
        .await
        .map_err(|e| ApiError::from(e).context("Failed to end session"))?;

    info!("Device {} powered off, session {} ended", device_id, session_id);
    Ok(Json(json!({
        "message": "Device stopped successfully",
        "sessionId": session_id,
        "deviceId": device_id,
        "endTime": end_time,
    })))
}

fn test_metadata() -> SessionMetadata {
    let mut metadata = SessionMetadata::new();
    metadata.insert("test".to_string(), json!(true));
    metadata
}

/// POST /api/webhooks/test/start
pub async fn test_start(
    State(state): State<AppState>,
    Query(query): Query<TestWebhookQuery>,
) -> ApiResult {
    let device_id = non_empty(query.device_id.as_deref())
        .unwrap_or(state.default_device())
        .to_string();

    let session = state
        .sessions()
        .create(&device_id, state.now(), Some(test_metadata()))
        .await
        .map_err(|e| ApiError::from(e).context("Failed to create test session"))?;

    Ok(Json(json!({
        "message": "Test device started successfully",
        "sessionId": session.session_id,
        "deviceId": device_id,
    })))
}

/// POST /api/webhooks/test/end
pub async fn test_end(
    State(state): State<AppState>,
    Query(query): Query<TestWebhookQuery>,
) -> ApiResult {
    let session_id = match (
        non_empty(query.session_id.as_deref()),
        non_empty(query.device_id.as_deref()),
    ) {
        (Some(session_id), _) => session_id.to_string(),
        (None, Some(device_id)) => newest_running_session(&state, device_id).await?,
        (None, None) => {
            return Err(ApiError::BadRequest(
                "Either sessionId or deviceId is required".to_string(),
            ));
        }
    };

    state
        .sessions()
        .end(&session_id, state.now(), Some(test_metadata()))
        .await
        .map_err(|e| ApiError::from(e).context("Failed to end test session"))?;

    Ok(Json(json!({
        "message": "Test device stopped successfully",
        "sessionId": session_id,
    })))
}

/// POST /api/iot/sync/{session_id}
///
/// Flattens every point's samples into one row list.
pub async fn sync_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult {
    let session = load_session(&state, &session_id).await?;
    let results = state.telemetry().sync_session_data(&session).await;

    let failed = results.values().filter(|r| r.is_failed()).count();
    if failed > 0 {
        warn!(
            "{} of {} points failed for session {}",
            failed,
            results.len(),
            session_id
        );
    }

    let rows: Vec<serde_json::Value> = results
        .iter()
        .flat_map(|(name, result)| {
            result.samples.iter().map(move |sample| {
                json!({
                    "pointName": name,
                    "pointValue": sample.value,
                    "timestamp": sample.timestamp,
                    "unit": result.unit(),
                })
            })
        })
        .collect();

    Ok(Json(json!({
        "message": "IoT data synced successfully",
        "dataCount": rows.len(),
        "data": rows,
    })))
}

/// GET /api/iot/data-points
pub async fn data_points(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "dataPoints": state.telemetry().data_points() }))
}

/// GET /api/iot/device/{device_id}/points
///
/// Every device shares the same point model.
pub async fn device_points(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Json<serde_json::Value> {
    debug!("Listing points for device {}", device_id);
    let points: Vec<serde_json::Value> = state
        .telemetry()
        .data_points()
        .iter()
        .map(|spec| {
            json!({
                "name": spec.name,
                "displayName": spec.display_name,
                "unit": spec.unit,
            })
        })
        .collect();

    Json(json!({
        "success": true,
        "data": points,
    }))
}

/// GET /api/iot/test-connection
pub async fn test_connection(State(state): State<AppState>) -> Response {
    match state.telemetry().test_connection().await {
        Ok(()) => Json(json!({
            "message": "IoT connection test successful",
            "success": true,
        }))
        .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "error": format!("IoT connection test failed: {}", e),
                "success": false,
            })),
        )
            .into_response(),
    }
}

/// Unknown `/api` paths
pub async fn not_found() -> ApiError {
    ApiError::NotFound("API endpoint not found".to_string())
}
