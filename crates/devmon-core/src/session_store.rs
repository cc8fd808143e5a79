//! Session store trait
//!
//! The `SessionStore` trait abstracts over where monitoring sessions live.
//! The telemetry pipeline only needs lookups; the HTTP layer also creates,
//! ends and lists sessions through it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    Result,
    session::{Session, SessionFilter, SessionPage, SessionStatistics, StatisticsFilter},
};

/// Free-form metadata attached to a session
pub type SessionMetadata = serde_json::Map<String, serde_json::Value>;

/// Session store trait
///
/// Implementations:
/// - `SqliteSessionStore`: single-file SQLite database
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Start a new running session for `device_id`
    ///
    /// # Errors
    /// - `Error::Database` for write errors
    async fn create(
        &self,
        device_id: &str,
        start_time: DateTime<Utc>,
        metadata: Option<SessionMetadata>,
    ) -> Result<Session>;

    /// Complete a running session
    ///
    /// Metadata keys are merged into the existing metadata, new values win.
    ///
    /// # Errors
    /// - `Error::SessionNotFound` if the session doesn't exist
    /// - `Error::SessionNotRunning` if it has already been completed
    async fn end(
        &self,
        session_id: &str,
        end_time: DateTime<Utc>,
        metadata: Option<SessionMetadata>,
    ) -> Result<Session>;

    /// Get a single session by its session ID
    ///
    /// # Errors
    /// - `Error::SessionNotFound` if the session doesn't exist
    async fn get_by_id(&self, session_id: &str) -> Result<Session>;

    /// List sessions newest first, with the total matching count
    async fn list(&self, filter: &SessionFilter) -> Result<SessionPage>;

    /// Running sessions of a device, newest first
    async fn running_sessions(&self, device_id: &str) -> Result<Vec<Session>>;

    /// Delete a session. Deleting an unknown session is not an error.
    async fn delete(&self, session_id: &str) -> Result<()>;

    /// Aggregate statistics over the sessions matching `filter`
    async fn statistics(&self, filter: &StatisticsFilter) -> Result<SessionStatistics>;
}
