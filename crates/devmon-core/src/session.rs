//! Device monitoring sessions
//!
//! A session spans one "on" → "off" cycle of a monitored device. Sessions are
//! owned by a [`SessionStore`](crate::SessionStore); the telemetry pipeline
//! only reads them.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Lifecycle status of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    Completed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "running" => Ok(SessionStatus::Running),
            "completed" => Ok(SessionStatus::Completed),
            other => Err(Error::InvalidRequest(format!(
                "Unknown session status '{}'",
                other
            ))),
        }
    }
}

/// A device monitoring session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    #[serde(default)]
    pub id: i64,
    pub device_id: String,
    pub session_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    /// Whole seconds between start and end, set when the session completes
    pub duration: Option<i64>,
    pub status: SessionStatus,
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// A freshly started session with no persistence identity yet
    pub fn running(
        device_id: impl Into<String>,
        session_id: impl Into<String>,
        start_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: 0,
            device_id: device_id.into(),
            session_id: session_id.into(),
            start_time,
            end_time: None,
            duration: None,
            status: SessionStatus::Running,
            metadata: None,
            created_at: start_time,
            updated_at: start_time,
        }
    }

    /// Mark the session completed at `end_time`
    pub fn complete(mut self, end_time: DateTime<Utc>) -> Self {
        self.duration = Some((end_time - self.start_time).num_seconds());
        self.end_time = Some(end_time);
        self.status = SessionStatus::Completed;
        self.updated_at = end_time;
        self
    }

    pub fn is_running(&self) -> bool {
        self.status == SessionStatus::Running
    }

    /// End of the telemetry window: the recorded end time for completed
    /// sessions, `now` otherwise.
    pub fn sync_window_end(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match (self.status, self.end_time) {
            (SessionStatus::Completed, Some(end)) => end,
            _ => now,
        }
    }

    /// `end_time` must be present exactly when the session is completed
    pub fn validate(&self) -> Result<()> {
        match (self.status, self.end_time) {
            (SessionStatus::Running, None) | (SessionStatus::Completed, Some(_)) => Ok(()),
            (SessionStatus::Running, Some(_)) => Err(Error::InvalidRequest(format!(
                "Running session {} has an end time",
                self.session_id
            ))),
            (SessionStatus::Completed, None) => Err(Error::InvalidRequest(format!(
                "Completed session {} has no end time",
                self.session_id
            ))),
        }
    }
}

/// Filters for listing sessions
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionFilter {
    pub device_id: Option<String>,
    pub status: Option<SessionStatus>,
    /// Inclusive lower bound on the start date
    pub start_date: Option<NaiveDate>,
    /// Inclusive upper bound on the start date
    pub end_date: Option<NaiveDate>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

/// One page of sessions plus the unpaginated total
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionPage {
    pub sessions: Vec<Session>,
    pub total: u64,
}

/// Filters for session statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatisticsFilter {
    pub device_id: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

/// Sessions started on one calendar day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySessionCount {
    pub date: NaiveDate,
    pub count: u64,
    pub total_duration: i64,
}

/// Aggregate session statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStatistics {
    pub total_sessions: u64,
    pub completed_sessions: u64,
    pub running_sessions: u64,
    pub total_duration: i64,
    pub avg_duration: f64,
    pub max_duration: i64,
    /// Shortest completed session with a non-zero duration
    pub min_duration: i64,
    pub daily_distribution: Vec<DailySessionCount>,
}
