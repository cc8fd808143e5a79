//! Concurrent per-point telemetry fetch
//!
//! A sync launches one task per registered data point, waits for all of
//! them, then merges their results. Each task returns its own
//! [`PointResult`]; nothing is shared between tasks while they run.
//!
//! A failed point never fails the sync. It shows up in the result with no
//! samples and the failure reason attached.

use chrono::{DateTime, Utc};
use devmon_core::{
    Clock, DataPointSpec, Session,
    telemetry::{PointResult, SyncResult},
};
use devmon_egress::TelemetrySource;
use devmon_observability::Metrics;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use crate::normalize::normalize;

/// Reason recorded for a point whose task died before reporting back
const INCOMPLETE_REASON: &str = "query task did not complete";

/// Fans a session's sync out across the data-point registry
pub struct FetchOrchestrator {
    source: Arc<dyn TelemetrySource>,
    registry: Arc<[DataPointSpec]>,
    clock: Arc<dyn Clock>,
    /// Queried when a session carries no device id
    default_device: String,
    metrics: Option<Arc<Metrics>>,
}

impl FetchOrchestrator {
    pub fn new(
        source: Arc<dyn TelemetrySource>,
        registry: Vec<DataPointSpec>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            source,
            registry: registry.into(),
            clock,
            default_device: String::new(),
            metrics: None,
        }
    }

    pub fn with_default_device(mut self, device_id: impl Into<String>) -> Self {
        self.default_device = device_id.into();
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn registry(&self) -> &[DataPointSpec] {
        &self.registry
    }

    pub fn source(&self) -> &Arc<dyn TelemetrySource> {
        &self.source
    }

    /// Device queried for `session`
    pub fn device_for<'a>(&'a self, session: &'a Session) -> &'a str {
        if session.device_id.is_empty() {
            &self.default_device
        } else {
            &session.device_id
        }
    }

    /// `[start, end]` queried for `session`
    pub fn sync_window(&self, session: &Session) -> (DateTime<Utc>, DateTime<Utc>) {
        (
            session.start_time,
            session.sync_window_end(self.clock.now()),
        )
    }

    /// Fetch and normalize every registered point for `session`.
    ///
    /// The result holds one entry per registered point, whatever happened to
    /// its query.
    #[instrument(skip(self, session), fields(session_id = %session.session_id))]
    pub async fn sync(&self, session: &Session) -> SyncResult {
        let device_id = self.device_for(session).to_string();
        let (start, end) = self.sync_window(session);
        info!(
            "Syncing telemetry for device {} from {} to {}",
            device_id, start, end
        );

        let mut results: SyncResult = self
            .registry
            .iter()
            .map(|spec| {
                (
                    spec.name.clone(),
                    PointResult::failed(spec.clone(), INCOMPLETE_REASON),
                )
            })
            .collect();

        let mut tasks = JoinSet::new();
        for spec in self.registry.iter().cloned() {
            let source = Arc::clone(&self.source);
            let metrics = self.metrics.clone();
            let device_id = device_id.clone();
            tasks.spawn(async move {
                fetch_point(source.as_ref(), metrics.as_deref(), &device_id, spec, start, end)
                    .await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(point) => {
                    results.insert(point.spec.name.clone(), point);
                }
                Err(e) => error!("Point query task failed: {}", e),
            }
        }

        let failed = results.values().filter(|r| r.is_failed()).count();
        if failed > 0 {
            warn!(
                "Telemetry sync finished with {} of {} points failed",
                failed,
                results.len()
            );
        } else {
            info!("Telemetry sync completed with {} data points", results.len());
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_sync(failed);
        }

        results
    }
}

async fn fetch_point(
    source: &dyn TelemetrySource,
    metrics: Option<&Metrics>,
    device_id: &str,
    spec: DataPointSpec,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> PointResult {
    let started = Instant::now();
    let outcome = source.query(device_id, &spec.name, start, end).await;
    let elapsed = started.elapsed().as_secs_f64();

    match outcome {
        Ok(raw) => {
            debug!("Got {} samples for {}", raw.len(), spec.name);
            if let Some(metrics) = metrics {
                metrics.record_point_query(&spec.name, "success", elapsed);
            }
            let samples = raw.iter().map(|sample| normalize(sample, &spec)).collect();
            PointResult::new(spec, samples)
        }
        Err(e) => {
            warn!("Error querying {}: {}", spec.name, e);
            if let Some(metrics) = metrics {
                metrics.record_point_query(&spec.name, e.kind(), elapsed);
            }
            PointResult::failed(spec, e.to_string())
        }
    }
}
