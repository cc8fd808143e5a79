//! DevMon Egress Connector
//!
//! This crate talks to the device-cloud telemetry platform:
//! - Shared HTTP client construction
//! - Token acquisition with caching and single-flight refresh
//! - Per-point telemetry queries

pub mod auth;
pub mod client;
pub mod query;

pub use auth::{CachedToken, TokenManager};
pub use client::{HttpClientConfig, PlatformConfig};
pub use query::{QueryClient, TelemetrySource};

use thiserror::Error;

/// Errors raised while talking to the telemetry platform
#[derive(Debug, Error)]
pub enum EgressError {
    /// Bad credentials, or a token the platform rejected
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Transport failure or unexpected HTTP status
    #[error("Network error{}: {message}", status_code.map(|s| format!(" (status {})", s)).unwrap_or_default())]
    Network {
        status_code: Option<u16>,
        message: String,
    },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Response body did not have the expected shape
    #[error("Failed to parse platform response: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl EgressError {
    /// Stable label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            EgressError::Auth(_) => "auth",
            EgressError::Network { .. } | EgressError::Http(_) => "network",
            EgressError::Parse(_) => "parse",
            EgressError::Config(_) => "config",
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, EgressError::Auth(_))
    }
}

pub type Result<T> = std::result::Result<T, EgressError>;
