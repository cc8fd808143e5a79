//! Session report assembly

use devmon_core::{
    Result, Session, TelemetryStore,
    telemetry::{
        PointResult, PointSummary, SeriesPoint, SessionReport, StoredSample, SyncResult,
        TelemetryValue,
    },
};
use devmon_observability::{Metrics, ReportSource};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::{aggregate::summarize_all, orchestrator::FetchOrchestrator};

/// Builds session reports from stored telemetry, or from a live sync when
/// nothing is stored
pub struct ReportBuilder {
    store: Arc<dyn TelemetryStore>,
    metrics: Option<Arc<Metrics>>,
}

impl ReportBuilder {
    pub fn new(store: Arc<dyn TelemetryStore>) -> Self {
        Self {
            store,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Report for `session`
    ///
    /// # Errors
    /// Only telemetry store failures surface here. Platform failures degrade
    /// to zero-valued summaries and empty series.
    #[instrument(skip_all, fields(session_id = %session.session_id))]
    pub async fn build_session_report(
        &self,
        session: &Session,
        orchestrator: &FetchOrchestrator,
    ) -> Result<SessionReport> {
        let summaries = self.store.get_point_summaries(&session.session_id).await?;
        let raw_samples = self.store.get_raw_samples(&session.session_id).await?;

        let (report, source) = if summaries.is_empty() {
            info!("No stored telemetry for session, syncing from platform");
            let results = orchestrator.sync(session).await;
            (build_report(session, &results, raw_samples), ReportSource::Live)
        } else {
            debug!("Using {} stored point summaries", summaries.len());
            (
                build_stored_report(session, summaries, raw_samples),
                ReportSource::Stored,
            )
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_report(source);
        }
        Ok(report)
    }
}

/// Assemble a report from a sync result
pub fn build_report(
    session: &Session,
    results: &SyncResult,
    raw_samples: Vec<StoredSample>,
) -> SessionReport {
    SessionReport {
        session: session.clone(),
        points: summarize_all(results),
        series: results
            .iter()
            .map(|(name, result)| (name.clone(), series(result)))
            .collect(),
        raw_samples,
    }
}

/// Samples of one point as `(time, value)` pairs, in platform order
pub fn series(result: &PointResult) -> Vec<SeriesPoint> {
    result.samples.iter().map(SeriesPoint::from).collect()
}

fn build_stored_report(
    session: &Session,
    summaries: Vec<PointSummary>,
    raw_samples: Vec<StoredSample>,
) -> SessionReport {
    let mut series: BTreeMap<String, Vec<SeriesPoint>> = BTreeMap::new();
    for sample in &raw_samples {
        series
            .entry(sample.point_name.clone())
            .or_default()
            .push(SeriesPoint {
                time: sample.timestamp,
                value: TelemetryValue::Number(sample.point_value),
            });
    }

    let points = summaries
        .into_iter()
        .map(|summary| (summary.point_name.clone(), summary))
        .collect();

    SessionReport {
        session: session.clone(),
        points,
        series,
        raw_samples,
    }
}
