//! Shared HTTP client utilities and platform connection settings

use crate::{EgressError, Result};
use chrono::FixedOffset;
use reqwest::{Client, ClientBuilder, Proxy};
use std::time::Duration;
use tracing::{debug, warn};

/// Default lifetime assumed for a platform token. The auth response carries
/// no expiry, so this is local policy.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Request timeout in seconds, applied to every platform call
    pub timeout_secs: u64,

    /// Connection timeout in seconds
    pub connect_timeout_secs: u64,

    /// Maximum number of idle connections per host
    pub pool_max_idle_per_host: usize,

    /// User agent string
    pub user_agent: String,

    /// Optional proxy for all platform traffic
    pub proxy: Option<String>,

    /// Skip TLS certificate verification (self-signed platform deployments)
    pub accept_invalid_certs: bool,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            connect_timeout_secs: 10,
            // One connection per concurrently queried data point is plenty
            pool_max_idle_per_host: 8,
            user_agent: format!("DevMon/{}", env!("CARGO_PKG_VERSION")),
            proxy: None,
            accept_invalid_certs: false,
        }
    }
}

/// Create a configured HTTP client with connection pooling
pub fn create_client(config: &HttpClientConfig) -> Result<Client> {
    let mut builder = ClientBuilder::new()
        .timeout(Duration::from_secs(config.timeout_secs))
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .pool_max_idle_per_host(config.pool_max_idle_per_host)
        .pool_idle_timeout(Duration::from_secs(90))
        .user_agent(&config.user_agent);

    if let Some(proxy_url) = config.proxy.as_deref().filter(|p| !p.is_empty()) {
        match Proxy::all(proxy_url) {
            Ok(proxy) => {
                debug!("Routing platform traffic through proxy {}", proxy_url);
                builder = builder.proxy(proxy);
            }
            // A broken proxy setting should not take the service down
            Err(e) => warn!("Ignoring invalid proxy URL '{}': {}", proxy_url, e),
        }
    }

    if config.accept_invalid_certs {
        warn!("TLS certificate verification is disabled for platform requests");
        builder = builder.danger_accept_invalid_certs(true);
    }

    builder
        .build()
        .map_err(|e| EgressError::Config(format!("Failed to create HTTP client: {}", e)))
}

/// Connection settings for the telemetry platform
#[derive(Debug, Clone)]
pub struct PlatformConfig {
    /// Base URL, without a trailing slash
    pub base_url: String,

    /// Application ID used for token requests
    pub app_id: String,

    /// Application secret used for token requests
    pub app_secret: String,

    /// How long a freshly issued token is trusted
    pub token_ttl: Duration,

    /// Offset used to render query windows. `None` renders in host local time.
    pub utc_offset: Option<FixedOffset>,

    /// HTTP client configuration
    pub client_config: HttpClientConfig,
}

impl PlatformConfig {
    /// Create a new platform configuration
    pub fn new(
        base_url: impl Into<String>,
        app_id: impl Into<String>,
        app_secret: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            app_id: app_id.into(),
            app_secret: app_secret.into(),
            token_ttl: DEFAULT_TOKEN_TTL,
            utc_offset: None,
            client_config: HttpClientConfig::default(),
        }
    }

    /// Set the token lifetime
    pub fn with_token_ttl(mut self, ttl: Duration) -> Self {
        self.token_ttl = ttl;
        self
    }

    /// Render query windows at a fixed UTC offset
    pub fn with_utc_offset(mut self, offset: FixedOffset) -> Self {
        self.utc_offset = Some(offset);
        self
    }

    /// Set the HTTP client configuration
    pub fn with_client_config(mut self, client_config: HttpClientConfig) -> Self {
        self.client_config = client_config;
        self
    }

    pub fn auth_url(&self) -> String {
        format!("{}/api/v1/oauth/auth", self.base_url)
    }

    pub fn query_url(&self) -> String {
        format!("{}/api/v1/thing/queryDevicePropertiesData", self.base_url)
    }
}
