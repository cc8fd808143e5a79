//! Error types for DevMon Core

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // Session lifecycle errors
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session {session_id} is not running")]
    SessionNotRunning { session_id: String },

    #[error("Session store error: {0}")]
    SessionStore(String),

    // Telemetry persistence errors
    #[error("Telemetry store error: {0}")]
    TelemetryStore(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Database errors
    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
