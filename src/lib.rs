//! dualstore Library
//!
//! This module exposes the dual-store components for use in integration
//! tests and as a library.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;

// Re-export commonly used types
pub use application::{CoordinatorConfig, ReplicationCoordinator, ToggleHandler, ToggleOutcome};
pub use config::{load_config, ConfigError, DualStoreConfig, SecondaryConfig};
pub use domain::errors::{ErrorKind, StoreError};
pub use domain::operation::{Filter, Operation, OperationKind, OperationOutcome, Payload};
pub use domain::ports::StoreAdapter;
pub use infrastructure::{
    HealthMonitor, HealthMonitorConfig, HealthReport, HealthState, MirrorQueue, MirrorStats,
};
