use chrono::FixedOffset;
use devmon_egress::{HttpClientConfig, PlatformConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(String),

    #[error("Failed to parse config file: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub environment: Environment,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub platform: PlatformSettings,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: String,
}

/// Telemetry platform connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default)]
    pub app_id: String,

    #[serde(default, skip_serializing)]
    pub app_secret: String,

    /// Device queried for sessions that carry no device id
    #[serde(default)]
    pub device_code: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: u64,

    /// Fixed offset for query windows; host local time when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub utc_offset_minutes: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,

    #[serde(default = "default_false")]
    pub accept_invalid_certs: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_false")]
    pub log_sql_queries: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            environment: Environment::default(),
            database: DatabaseConfig::default(),
            platform: PlatformSettings::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

impl Default for PlatformSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            app_id: String::new(),
            app_secret: String::new(),
            device_code: String::new(),
            timeout_secs: default_timeout_secs(),
            token_ttl_secs: default_token_ttl_secs(),
            utc_offset_minutes: None,
            proxy: None,
            accept_invalid_certs: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_sql_queries: false,
        }
    }
}

impl ServerConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileRead(format!("{}: {}", path.display(), e)))?;

        if path.extension().and_then(|s| s.to_str()) == Some("toml") {
            toml::from_str(&contents)
                .map_err(|e| ConfigError::Parse(format!("TOML parse error: {}", e)))
        } else {
            // Default to YAML
            serde_yaml::from_str(&contents)
                .map_err(|e| ConfigError::Parse(format!("YAML parse error: {}", e)))
        }
    }

    /// Merge process environment variables into config (env vars take precedence)
    pub fn merge_env(&mut self) {
        self.merge_env_with(|key| std::env::var(key).ok());
    }

    /// Merge overrides from `lookup`. Empty values count as unset.
    pub fn merge_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(val) = var("PORT") {
            match val.parse::<u16>() {
                Ok(port) => self.port = port,
                Err(_) => eprintln!("Warning: Invalid PORT '{}', keeping {}", val, self.port),
            }
        }

        if let Some(val) = var("APP_ENV").or_else(|| var("NODE_ENV")) {
            match val.to_lowercase().as_str() {
                "production" => self.environment = Environment::Production,
                "development" => self.environment = Environment::Development,
                _ => eprintln!("Warning: Unknown environment '{}', using default", val),
            }
        }

        if let Some(val) = var("DATABASE_PATH") {
            self.database.path = val;
        }

        if let Some(val) = var("IOT_API_BASE_URL") {
            self.platform.base_url = val;
        }
        if let Some(val) = var("IOT_APP_KEY") {
            self.platform.app_id = val;
        }
        if let Some(val) = var("IOT_APP_SECRET") {
            self.platform.app_secret = val;
        }
        if let Some(val) = var("IOT_DEVICE_CODE") {
            self.platform.device_code = val;
        }
        if let Some(val) = var("HTTPS_PROXY").or_else(|| var("HTTP_PROXY")) {
            self.platform.proxy = Some(val);
        }

        if let Some(val) = var("LOG_LEVEL") {
            self.logging.level = val;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.platform.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("platform.base_url is empty".to_string()));
        }
        if self.platform.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "platform.timeout_secs must be positive".to_string(),
            ));
        }
        if self.platform.token_ttl_secs == 0 {
            return Err(ConfigError::Invalid(
                "platform.token_ttl_secs must be positive".to_string(),
            ));
        }
        self.utc_offset()?;
        Ok(())
    }

    /// Database path with `~` expanded
    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.database.path).as_ref())
    }

    pub fn utc_offset(&self) -> Result<Option<FixedOffset>, ConfigError> {
        self.platform
            .utc_offset_minutes
            .map(|minutes| {
                FixedOffset::east_opt(minutes.saturating_mul(60)).ok_or_else(|| {
                    ConfigError::Invalid(format!(
                        "platform.utc_offset_minutes {} is out of range",
                        minutes
                    ))
                })
            })
            .transpose()
    }

    /// Connection settings for the platform connector
    pub fn platform_config(&self) -> Result<PlatformConfig, ConfigError> {
        let client_config = HttpClientConfig {
            timeout_secs: self.platform.timeout_secs,
            proxy: self.platform.proxy.clone(),
            accept_invalid_certs: self.platform.accept_invalid_certs,
            ..HttpClientConfig::default()
        };

        let mut config = PlatformConfig::new(
            self.platform.base_url.clone(),
            self.platform.app_id.clone(),
            self.platform.app_secret.clone(),
        )
        .with_token_ttl(Duration::from_secs(self.platform.token_ttl_secs))
        .with_client_config(client_config);

        if let Some(offset) = self.utc_offset()? {
            config = config.with_utc_offset(offset);
        }
        Ok(config)
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_database_path() -> String {
    "./database/device_monitor.db".to_string()
}

fn default_base_url() -> String {
    "https://iot.know-act.com".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_token_ttl_secs() -> u64 {
    24 * 60 * 60
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_false() -> bool {
    false
}
