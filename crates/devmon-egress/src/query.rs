//! Telemetry queries
//!
//! One query covers one device, one data point and one time window. The
//! platform answers with every requested identifier in a nested shape:
//!
//! ```json
//! { "data": [ { "point": { "identifier": "temperature" },
//!               "dataList": [ { "time": 1700000000000, "value": "21.5" } ] } ] }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Local, Utc};
use devmon_core::telemetry::RawSample;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::{EgressError, PlatformConfig, Result, TokenManager};

/// Pattern the platform expects for window bounds
const WINDOW_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Anything that can answer telemetry queries for a device
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    /// Raw samples of `point_name` between `start` and `end`, in platform order
    async fn query(
        &self,
        device_id: &str,
        point_name: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<RawSample>>;

    /// Check that the platform accepts our credentials
    async fn authenticate(&self) -> Result<()>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    device_name: &'a str,
    identifier: [&'a str; 1],
    start_time: String,
    end_time: String,
}

#[derive(Debug, Deserialize)]
struct PointSeries {
    #[serde(default)]
    point: Option<PointRef>,
    #[serde(default, rename = "dataList")]
    data_list: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
struct PointRef {
    #[serde(default)]
    identifier: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PlatformErrorBody {
    #[serde(default)]
    message: Option<String>,
}

/// Issues telemetry queries against the platform
pub struct QueryClient {
    client: Client,
    query_url: String,
    utc_offset: Option<FixedOffset>,
    tokens: Arc<TokenManager>,
}

impl QueryClient {
    /// Create a query client sharing `tokens` with any other platform caller
    pub fn new(config: &PlatformConfig, client: Client, tokens: Arc<TokenManager>) -> Self {
        Self {
            client,
            query_url: config.query_url(),
            utc_offset: config.utc_offset,
            tokens,
        }
    }

    pub fn tokens(&self) -> &Arc<TokenManager> {
        &self.tokens
    }

    /// Query one data point of one device over `[start, end]`
    ///
    /// # Errors
    /// - `EgressError::Auth` if no token can be obtained or the platform
    ///   rejects it with 401 (the cached token is dropped first)
    /// - `EgressError::Network` / `EgressError::Http` for transport failures
    ///   and non-2xx statuses
    /// - `EgressError::Parse` if the body is not a JSON object
    #[instrument(skip(self, start, end))]
    pub async fn query(
        &self,
        device_id: &str,
        point_name: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<RawSample>> {
        let token = self.tokens.get_token().await?;

        let request = QueryRequest {
            device_name: device_id,
            identifier: [point_name],
            start_time: format_window_time(start, self.utc_offset),
            end_time: format_window_time(end, self.utc_offset),
        };
        debug!(
            "Querying {} from {} to {}",
            point_name, request.start_time, request.end_time
        );

        let response = self
            .client
            .post(&self.query_url)
            .header("Content-Type", "application/json")
            .header("token", token)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if status == StatusCode::UNAUTHORIZED {
            self.tokens.invalidate().await;
            let message = serde_json::from_str::<PlatformErrorBody>(&body)
                .ok()
                .and_then(|b| b.message)
                .unwrap_or_else(|| "token rejected".to_string());
            warn!("Platform rejected token while querying {}: {}", point_name, message);
            return Err(EgressError::Auth(message));
        }

        if !status.is_success() {
            return Err(EgressError::Network {
                status_code: Some(status.as_u16()),
                message: body,
            });
        }

        debug!("Query response for {}: {} bytes", point_name, body.len());
        let samples = parse_query_response(&body, point_name)?;
        debug!("Got {} samples for {}", samples.len(), point_name);
        Ok(samples)
    }
}

#[async_trait]
impl TelemetrySource for QueryClient {
    async fn query(
        &self,
        device_id: &str,
        point_name: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<RawSample>> {
        QueryClient::query(self, device_id, point_name, start, end).await
    }

    async fn authenticate(&self) -> Result<()> {
        self.tokens.get_token().await.map(|_| ())
    }
}

/// Render a window bound the way the platform expects it
pub fn format_window_time(time: DateTime<Utc>, offset: Option<FixedOffset>) -> String {
    match offset {
        Some(offset) => time.with_timezone(&offset).format(WINDOW_TIME_FORMAT).to_string(),
        None => time.with_timezone(&Local).format(WINDOW_TIME_FORMAT).to_string(),
    }
}

/// Pull the `dataList` of `point_name` out of a query response body.
///
/// A body without a `data` array, or without an entry for the point, yields
/// no samples: the platform simply had nothing for the window. Entries for
/// other identifiers and malformed list items are skipped.
pub fn parse_query_response(body: &str, point_name: &str) -> Result<Vec<RawSample>> {
    let parsed: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| EgressError::Parse(format!("Invalid JSON in query response: {}", e)))?;

    let root = parsed
        .as_object()
        .ok_or_else(|| EgressError::Parse("Query response is not a JSON object".to_string()))?;

    let Some(entries) = root.get("data").and_then(|d| d.as_array()) else {
        debug!("Query response has no data array for {}", point_name);
        return Ok(Vec::new());
    };

    let mut samples = Vec::new();
    for entry in entries {
        let Ok(series) = serde_json::from_value::<PointSeries>(entry.clone()) else {
            continue;
        };

        let identifier = series.point.and_then(|p| p.identifier);
        if identifier.as_deref() != Some(point_name) {
            continue;
        }

        for item in series.data_list.unwrap_or_default() {
            if !item.is_object() {
                continue;
            }
            if let Ok(sample) = serde_json::from_value::<RawSample>(item) {
                samples.push(sample);
            }
        }
    }

    Ok(samples)
}
