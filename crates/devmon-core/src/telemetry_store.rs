//! Telemetry persistence trait
//!
//! DevMon does not persist telemetry: every report is recomputed from the
//! live platform. The trait is kept so a persistent backend can be dropped in
//! without touching the report pipeline.

use async_trait::async_trait;

use crate::{
    Result,
    telemetry::{PointSummary, StoredSample},
};

#[async_trait]
pub trait TelemetryStore: Send + Sync {
    /// Stored per-point summaries of a session
    async fn get_point_summaries(&self, session_id: &str) -> Result<Vec<PointSummary>>;

    /// Stored raw samples of a session, oldest first
    async fn get_raw_samples(&self, session_id: &str) -> Result<Vec<StoredSample>>;
}

/// A telemetry store that never holds anything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTelemetryStore;

#[async_trait]
impl TelemetryStore for NullTelemetryStore {
    async fn get_point_summaries(&self, _session_id: &str) -> Result<Vec<PointSummary>> {
        Ok(Vec::new())
    }

    async fn get_raw_samples(&self, _session_id: &str) -> Result<Vec<StoredSample>> {
        Ok(Vec::new())
    }
}
