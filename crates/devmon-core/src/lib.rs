//! DevMon Core Types and Traits
//!
//! This crate provides the fundamental types and traits shared by every
//! DevMon crate:
//! - Monitoring session records and their lifecycle status
//! - Telemetry data-point registry and sample types
//! - Session and telemetry persistence traits
//! - Core error types

pub mod clock;
pub mod error;
pub mod registry;
pub mod session;
pub mod session_store;
pub mod telemetry;
pub mod telemetry_store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Error, Result};
pub use registry::{DataPointSpec, ValueKind, default_registry};
pub use session::{Session, SessionStatus};
pub use session_store::SessionStore;
pub use telemetry_store::{NullTelemetryStore, TelemetryStore};
