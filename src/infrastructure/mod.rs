//! Infrastructure Layer
//!
//! Cross-cutting concerns and infrastructure components.

pub mod health_monitor;
pub mod mirror;

pub use health_monitor::{HealthMonitor, HealthMonitorConfig, HealthReport, HealthState};
pub use mirror::{MirrorQueue, MirrorStats, DEFAULT_MIRROR_CAPACITY};
