//! Platform token management
//!
//! The platform hands out opaque bearer tokens in exchange for the
//! application credentials. [`TokenManager`] caches the current token and
//! refreshes it when it expires or after a query reports it was rejected.
//!
//! Refreshes are single-flight: concurrent callers that find the cache cold
//! queue on the write lock, and whoever gets it first performs the only
//! network refresh. Each caller snapshots the refresh counter before it
//! touches the lock, so the others notice that a refresh finished while they
//! waited and share its outcome, token or error, instead of issuing their own.

use chrono::{DateTime, Utc};
use devmon_core::Clock;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::{EgressError, PlatformConfig, Result};

/// A token together with when it was issued and how long it is trusted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedToken {
    pub value: String,
    pub issued_at: DateTime<Utc>,
    pub ttl: chrono::Duration,
}

impl CachedToken {
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.issued_at + self.ttl
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AuthRequest<'a> {
    app_id: &'a str,
    app_secret: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    code: i64,
    #[serde(default)]
    data: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Default)]
struct TokenState {
    cached: Option<CachedToken>,
    /// Message of the most recent failed refresh
    last_error: Option<String>,
}

impl TokenState {
    fn valid_token(&self, now: DateTime<Utc>) -> Option<&CachedToken> {
        self.cached.as_ref().filter(|token| token.is_valid_at(now))
    }
}

/// Owns the cached platform token
pub struct TokenManager {
    client: Client,
    auth_url: String,
    app_id: String,
    app_secret: String,
    ttl: chrono::Duration,
    clock: Arc<dyn Clock>,
    state: RwLock<TokenState>,
    /// Completed refresh attempts, successful or not. Only bumped while the
    /// write lock is held.
    refreshes: AtomicU64,
}

impl TokenManager {
    /// Create a token manager for the configured platform
    pub fn new(config: &PlatformConfig, client: Client, clock: Arc<dyn Clock>) -> Result<Self> {
        let ttl = chrono::Duration::from_std(config.token_ttl)
            .map_err(|e| EgressError::Config(format!("Invalid token TTL: {}", e)))?;

        Ok(Self {
            client,
            auth_url: config.auth_url(),
            app_id: config.app_id.clone(),
            app_secret: config.app_secret.clone(),
            ttl,
            clock,
            state: RwLock::new(TokenState::default()),
            refreshes: AtomicU64::new(0),
        })
    }

    /// Return a valid token, refreshing it if needed
    ///
    /// # Errors
    /// - `EgressError::Auth` if the refresh fails for any reason
    pub async fn get_token(&self) -> Result<String> {
        let observed_refreshes = self.refreshes.load(Ordering::Acquire);

        {
            let state = self.state.read().await;
            if let Some(token) = state.valid_token(self.clock.now()) {
                return Ok(token.value.clone());
            }
        }

        let mut state = self.state.write().await;

        if self.refreshes.load(Ordering::Acquire) != observed_refreshes {
            // Someone else refreshed while we waited for the lock
            if let Some(token) = state.valid_token(self.clock.now()) {
                return Ok(token.value.clone());
            }
            if let Some(message) = &state.last_error {
                return Err(EgressError::Auth(message.clone()));
            }
        } else if let Some(token) = state.valid_token(self.clock.now()) {
            return Ok(token.value.clone());
        }

        let outcome = self.refresh().await;

        match outcome {
            Ok(value) => {
                let token = CachedToken {
                    value: value.clone(),
                    issued_at: self.clock.now(),
                    ttl: self.ttl,
                };
                debug!("Platform token cached until {}", token.expires_at());
                state.cached = Some(token);
                state.last_error = None;
                self.refreshes.fetch_add(1, Ordering::Release);
                Ok(value)
            }
            Err(message) => {
                state.cached = None;
                state.last_error = Some(message.clone());
                self.refreshes.fetch_add(1, Ordering::Release);
                Err(EgressError::Auth(message))
            }
        }
    }

    /// Drop the cached token so the next caller refreshes
    pub async fn invalidate(&self) {
        let mut state = self.state.write().await;
        if state.cached.take().is_some() {
            info!("Cached platform token invalidated");
        }
    }

    /// The cached token, valid or not
    pub async fn cached_token(&self) -> Option<CachedToken> {
        self.state.read().await.cached.clone()
    }

    /// Number of refresh attempts made so far
    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::Acquire)
    }

    /// Exchange the application credentials for a new token.
    /// Failures come back as the message carried by `EgressError::Auth`.
    #[instrument(skip(self), fields(url = %self.auth_url))]
    async fn refresh(&self) -> std::result::Result<String, String> {
        debug!("Requesting new platform token");

        let response = self
            .client
            .post(&self.auth_url)
            .header("Content-Type", "application/json")
            .json(&AuthRequest {
                app_id: &self.app_id,
                app_secret: &self.app_secret,
            })
            .send()
            .await
            .map_err(|e| {
                warn!("Token request failed: {}", e);
                format!("Failed to get access token: {}", e)
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| format!("Failed to read token response: {}", e))?;

        if !status.is_success() {
            warn!("Token request returned status {}", status);
            return Err(format!(
                "Token request failed with status {}: {}",
                status.as_u16(),
                body
            ));
        }

        let auth: AuthResponse = serde_json::from_str(&body)
            .map_err(|e| format!("Failed to parse token response: {}", e))?;

        if !auth.success || auth.code != 200 {
            let message = auth
                .error_message
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| format!("platform returned code {}", auth.code));
            warn!("Platform rejected credentials: {}", message);
            return Err(message);
        }

        match auth.data.filter(|token| !token.is_empty()) {
            Some(token) => {
                info!("Successfully obtained platform access token");
                Ok(token)
            }
            None => Err("Platform returned an empty token".to_string()),
        }
    }
}
