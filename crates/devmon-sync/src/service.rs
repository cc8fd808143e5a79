//! The telemetry API consumed by the request layer

use devmon_core::{
    DataPointSpec, Session, TelemetryStore,
    telemetry::{SessionReport, SyncResult},
};
use devmon_observability::Metrics;
use std::sync::Arc;
use tracing::{info, warn};

use crate::{orchestrator::FetchOrchestrator, report::ReportBuilder};

/// Sync, connection test and report entry points
pub struct TelemetryService {
    orchestrator: FetchOrchestrator,
    reports: ReportBuilder,
    metrics: Option<Arc<Metrics>>,
}

impl TelemetryService {
    pub fn new(orchestrator: FetchOrchestrator, store: Arc<dyn TelemetryStore>) -> Self {
        Self {
            orchestrator,
            reports: ReportBuilder::new(store),
            metrics: None,
        }
    }

    /// Record syncs, point queries, reports and connection tests
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.orchestrator = self.orchestrator.with_metrics(metrics.clone());
        self.reports = self.reports.with_metrics(metrics.clone());
        self.metrics = Some(metrics);
        self
    }

    /// The data points every sync covers
    pub fn data_points(&self) -> &[DataPointSpec] {
        self.orchestrator.registry()
    }

    pub fn orchestrator(&self) -> &FetchOrchestrator {
        &self.orchestrator
    }

    /// Fetch every data point for the session's window
    pub async fn sync_session_data(&self, session: &Session) -> SyncResult {
        self.orchestrator.sync(session).await
    }

    /// Check that the platform accepts our credentials
    ///
    /// # Errors
    /// - `EgressError::Auth` if no token can be obtained
    pub async fn test_connection(&self) -> devmon_egress::Result<()> {
        let outcome = self.orchestrator.source().authenticate().await;
        match &outcome {
            Ok(()) => info!("Platform connection test succeeded"),
            Err(e) => warn!("Platform connection test failed: {}", e),
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_connection_test(outcome.is_ok());
        }
        outcome
    }

    /// Compose the telemetry report of a session
    pub async fn build_session_report(
        &self,
        session: &Session,
    ) -> devmon_core::Result<SessionReport> {
        self.reports
            .build_session_report(session, &self.orchestrator)
            .await
    }
}
