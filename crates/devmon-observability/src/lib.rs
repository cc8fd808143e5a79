//! DevMon Observability
//!
//! This crate provides observability features:
//! - Metrics collection (Prometheus)
//! - Health and metrics endpoints

pub mod health;
pub mod metrics;

pub use health::{HealthResponse, HealthState, health_router};
pub use metrics::{Metrics, ReportSource};
