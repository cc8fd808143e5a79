//! DevMon Server
//!
//! Tracks device power-on/power-off sessions and builds telemetry reports
//! for them:
//! - Webhooks open and close monitoring sessions (SQLite)
//! - Telemetry is fetched per data point from the device-cloud platform
//! - Reports summarize every point over the session window
//! - Prometheus metrics and health endpoints
//!
//! Usage:
//! ```bash
//! # With config file
//! devmon-server --config devmon.yaml
//!
//! # Or with environment variables
//! IOT_APP_KEY=key IOT_APP_SECRET=secret devmon-server
//!
//! # Check platform credentials
//! devmon-server test-connection
//!
//! # Print the report of one session
//! devmon-server report 6f1c2e0a-...
//! ```

mod app;
mod config;
mod handlers;

use anyhow::{Context, bail};
use app::AppState;
use clap::{Parser, Subcommand};
use config::ServerConfig;
use devmon_core::{Clock, NullTelemetryStore, SessionStore, SystemClock, default_registry};
use devmon_egress::{QueryClient, TokenManager, client::create_client};
use devmon_observability::{HealthState, Metrics};
use devmon_session_sqlite::SqliteSessionStore;
use devmon_sync::{FetchOrchestrator, TelemetryService};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// DevMon Server - device session and telemetry reporting
#[derive(Parser)]
#[command(name = "devmon-server")]
#[command(about = "Device session tracking and telemetry reporting", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to configuration file (YAML or TOML)
    #[arg(short, long, value_name = "FILE", env = "DEVMON_CONFIG", global = true)]
    config: Option<String>,

    /// Port to listen on
    #[arg(short, long, global = true)]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server (default if no command specified)
    Serve,
    /// Authenticate against the telemetry platform and exit
    TestConnection,
    /// Print the telemetry report of a session as JSON
    Report {
        /// Session ID
        session_id: String,
    },
}

/// Long-lived components shared by every command
struct Services {
    sessions: Arc<dyn SessionStore>,
    telemetry: Arc<TelemetryService>,
    clock: Arc<dyn Clock>,
    metrics: Arc<Metrics>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let dotenv = dotenvy::dotenv();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ServerConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path))?,
        None => ServerConfig::default(),
    };
    config.merge_env();
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    config.validate()?;

    init_tracing(&config)?;

    match dotenv {
        Ok(path) => info!("Loaded environment from {}", path.display()),
        Err(e) if e.not_found() => info!("No .env file found, using environment variables"),
        Err(e) => warn!("Failed to load .env file: {}", e),
    }
    match &cli.config {
        Some(path) => info!("Loaded configuration from {}", path),
        None => info!("Using default configuration"),
    }

    let services = build_services(&config).await?;

    match cli.command {
        Some(Commands::TestConnection) => test_connection(&services).await,
        Some(Commands::Report { session_id }) => print_report(&services, &session_id).await,
        Some(Commands::Serve) | None => serve(&config, services).await,
    }
}

fn init_tracing(config: &ServerConfig) -> anyhow::Result<()> {
    let mut filter = EnvFilter::try_new(&config.logging.level).unwrap_or_else(|e| {
        eprintln!(
            "Warning: Invalid log level '{}' ({}), using info",
            config.logging.level, e
        );
        EnvFilter::new("info")
    });

    if !config.logging.log_sql_queries {
        match "sqlx=warn".parse() {
            Ok(directive) => filter = filter.add_directive(directive),
            Err(e) => eprintln!("Warning: Failed to set sqlx log filter: {}", e),
        }
    }

    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

async fn build_services(config: &ServerConfig) -> anyhow::Result<Services> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let metrics = Arc::new(
        Metrics::new().map_err(|e| anyhow::anyhow!("Failed to register metrics: {}", e))?,
    );

    let db_path = config.database_path();
    let sessions = SqliteSessionStore::new(&db_path)
        .await
        .with_context(|| format!("Failed to open session database {}", db_path.display()))?;

    if config.platform.app_id.is_empty() || config.platform.app_secret.is_empty() {
        warn!("Platform credentials are not configured; telemetry queries will fail");
        warn!("    Set IOT_APP_KEY and IOT_APP_SECRET, or platform.app_id/app_secret");
    }
    if config.platform.device_code.is_empty() {
        warn!("No default device configured (IOT_DEVICE_CODE)");
    }

    let platform = config.platform_config()?;
    let client = create_client(&platform.client_config)?;
    let tokens = Arc::new(TokenManager::new(&platform, client.clone(), clock.clone())?);
    let source = Arc::new(QueryClient::new(&platform, client, tokens));
    info!("Telemetry platform: {}", platform.base_url);

    let orchestrator = FetchOrchestrator::new(source, default_registry(), clock.clone())
        .with_default_device(config.platform.device_code.clone());
    let telemetry = TelemetryService::new(orchestrator, Arc::new(NullTelemetryStore))
        .with_metrics(metrics.clone());

    Ok(Services {
        sessions: Arc::new(sessions),
        telemetry: Arc::new(telemetry),
        clock,
        metrics,
    })
}

async fn test_connection(services: &Services) -> anyhow::Result<()> {
    match services.telemetry.test_connection().await {
        Ok(()) => {
            println!("IoT connection test successful");
            Ok(())
        }
        Err(e) => bail!("IoT connection test failed: {}", e),
    }
}

async fn print_report(services: &Services, session_id: &str) -> anyhow::Result<()> {
    let session = services.sessions.get_by_id(session_id).await?;
    let report = services.telemetry.build_session_report(&session).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn serve(config: &ServerConfig, services: Services) -> anyhow::Result<()> {
    let state = AppState::new(services.sessions, services.telemetry, services.clock)
        .with_default_device(config.platform.device_code.clone())
        .with_environment(config.environment);
    let app = app::build_app(state, HealthState::new(services.metrics));

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", config.host, config.port))?;
    let listener = TcpListener::bind(addr).await?;

    info!("");
    info!(
        "DevMon server listening on http://{} ({} mode)",
        addr,
        config.environment.as_str()
    );
    info!("   API:                http://{}/api", addr);
    info!("   Health check:       http://{}/healthz", addr);
    info!("   Prometheus metrics: http://{}/metrics", addr);
    info!("");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
