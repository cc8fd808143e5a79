//! Telemetry sample and report types
//!
//! The platform is loose about encodings: a timestamp may arrive as a number
//! or as a digit string, and a value may be a number, a numeric string, a
//! boolean or an arbitrary JSON structure. [`TelemetryValue`] captures those
//! shapes explicitly at decode time so the rest of the pipeline can match on
//! them exhaustively.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{DataPointSpec, Session};

/// A time or value field exactly as the platform encoded it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TelemetryValue {
    Boolean(bool),
    Number(f64),
    Text(String),
    /// Anything else: arrays, objects, null
    Opaque(serde_json::Value),
}

impl TelemetryValue {
    /// The numeric payload, if this is a number
    pub fn as_number(&self) -> Option<f64> {
        match self {
            TelemetryValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, TelemetryValue::Number(_))
    }
}

impl Default for TelemetryValue {
    fn default() -> Self {
        TelemetryValue::Opaque(serde_json::Value::Null)
    }
}

/// One `dataList` entry, untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    #[serde(default)]
    pub time: TelemetryValue,
    #[serde(default)]
    pub value: TelemetryValue,
}

impl RawSample {
    pub fn new(time: TelemetryValue, value: TelemetryValue) -> Self {
        Self { time, value }
    }
}

/// A sample with a canonical timestamp and a value typed per its data point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedSample {
    #[serde(rename = "time")]
    pub timestamp: DateTime<Utc>,
    pub value: TelemetryValue,
}

/// Everything fetched for one data point during a sync
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointResult {
    #[serde(flatten)]
    pub spec: DataPointSpec,
    /// In platform order
    pub samples: Vec<NormalizedSample>,
    /// Why the query for this point failed, if it did
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PointResult {
    pub fn new(spec: DataPointSpec, samples: Vec<NormalizedSample>) -> Self {
        Self {
            spec,
            samples,
            error: None,
        }
    }

    /// An empty result recording why the point could not be fetched
    pub fn failed(spec: DataPointSpec, reason: impl Into<String>) -> Self {
        Self {
            spec,
            samples: Vec::new(),
            error: Some(reason.into()),
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn display_name(&self) -> &str {
        &self.spec.display_name
    }

    pub fn unit(&self) -> &str {
        &self.spec.unit
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }
}

/// Result of a sync, keyed by data point name
pub type SyncResult = BTreeMap<String, PointResult>;

/// Count/min/max/avg over the numeric samples of one data point
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PointSummary {
    pub point_name: String,
    pub unit: String,
    pub count: u64,
    pub min_value: f64,
    pub max_value: f64,
    pub avg_value: f64,
}

impl PointSummary {
    /// All-zero summary for a point without numeric samples
    pub fn empty(point_name: impl Into<String>, unit: impl Into<String>) -> Self {
        Self {
            point_name: point_name.into(),
            unit: unit.into(),
            ..Default::default()
        }
    }
}

/// One entry of a report time series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub time: DateTime<Utc>,
    pub value: TelemetryValue,
}

impl From<&NormalizedSample> for SeriesPoint {
    fn from(sample: &NormalizedSample) -> Self {
        Self {
            time: sample.timestamp,
            value: sample.value.clone(),
        }
    }
}

/// A telemetry sample as a persistent backend would hold it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSample {
    pub session_id: String,
    pub point_name: String,
    pub point_value: f64,
    pub unit: String,
    pub timestamp: DateTime<Utc>,
    pub raw_data: Option<String>,
}

/// The composed per-session telemetry report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionReport {
    pub session: Session,
    pub points: BTreeMap<String, PointSummary>,
    /// Raw per-sample sequences in platform order, not time-bucketed
    pub series: BTreeMap<String, Vec<SeriesPoint>>,
    pub raw_samples: Vec<StoredSample>,
}
