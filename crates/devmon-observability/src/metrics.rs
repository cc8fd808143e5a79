//! Metrics collection with Prometheus
//!
//! This module provides Prometheus metrics for DevMon:
//! - Telemetry syncs run (complete or partial)
//! - Per-point query counts by outcome and query latency
//! - Platform connection tests by outcome
//! - Session reports built, by where their telemetry came from

use prometheus::{CounterVec, HistogramOpts, HistogramVec, Opts, Registry};
use std::sync::Arc;

/// Where a session report took its telemetry from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportSource {
    /// Summaries already held by the telemetry store
    Stored,
    /// A live sync against the platform
    Live,
}

impl ReportSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportSource::Stored => "stored",
            ReportSource::Live => "live",
        }
    }
}

/// Metrics collector for DevMon
#[derive(Clone)]
pub struct Metrics {
    /// Prometheus registry
    registry: Arc<Registry>,

    /// Syncs run, labelled `complete` or `partial`
    pub syncs_total: CounterVec,

    /// Point queries, labelled by point and outcome (`success` or an error kind)
    pub point_queries_total: CounterVec,
    /// Point query duration, including token acquisition
    pub point_query_duration_seconds: HistogramVec,

    /// Connection tests, labelled `success` or `failure`
    pub connection_tests_total: CounterVec,

    /// Session reports built, labelled by telemetry source
    pub reports_total: CounterVec,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let syncs_total = CounterVec::new(
            Opts::new("devmon_syncs_total", "Total number of telemetry syncs"),
            &["outcome"],
        )?;

        let point_queries_total = CounterVec::new(
            Opts::new(
                "devmon_point_queries_total",
                "Total number of per-point telemetry queries",
            ),
            &["point", "outcome"],
        )?;

        let point_query_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "devmon_point_query_duration_seconds",
                "Per-point telemetry query duration in seconds",
            )
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
            &["point"],
        )?;

        let connection_tests_total = CounterVec::new(
            Opts::new(
                "devmon_connection_tests_total",
                "Total number of platform connection tests",
            ),
            &["outcome"],
        )?;

        let reports_total = CounterVec::new(
            Opts::new("devmon_reports_total", "Total number of session reports built"),
            &["source"],
        )?;

        registry.register(Box::new(syncs_total.clone()))?;
        registry.register(Box::new(point_queries_total.clone()))?;
        registry.register(Box::new(point_query_duration_seconds.clone()))?;
        registry.register(Box::new(connection_tests_total.clone()))?;
        registry.register(Box::new(reports_total.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            syncs_total,
            point_queries_total,
            point_query_duration_seconds,
            connection_tests_total,
            reports_total,
        })
    }

    /// Get the Prometheus registry for exporting metrics
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record one point query. `outcome` is `success` or the error kind.
    pub fn record_point_query(&self, point: &str, outcome: &str, duration_secs: f64) {
        self.point_queries_total
            .with_label_values(&[point, outcome])
            .inc();
        self.point_query_duration_seconds
            .with_label_values(&[point])
            .observe(duration_secs);
    }

    /// Record a finished sync
    pub fn record_sync(&self, failed_points: usize) {
        let outcome = if failed_points == 0 {
            "complete"
        } else {
            "partial"
        };
        self.syncs_total.with_label_values(&[outcome]).inc();
    }

    pub fn record_connection_test(&self, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        self.connection_tests_total
            .with_label_values(&[outcome])
            .inc();
    }

    pub fn record_report(&self, source: ReportSource) {
        self.reports_total
            .with_label_values(&[source.as_str()])
            .inc();
    }
}
