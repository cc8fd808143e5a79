//! DevMon Telemetry Sync
//!
//! Pulls a session's telemetry from the platform and turns it into reports:
//! - Normalization of the platform's loose time/value encodings
//! - Concurrent per-point fetch with per-point failure isolation
//! - Per-point statistics and report assembly
//! - [`TelemetryService`], the entry point used by the request layer

pub mod aggregate;
pub mod normalize;
pub mod orchestrator;
pub mod report;
pub mod service;

pub use aggregate::{summarize, summarize_all};
pub use normalize::{normalize, normalize_time, normalize_value};
pub use orchestrator::FetchOrchestrator;
pub use report::{ReportBuilder, build_report};
pub use service::TelemetryService;
