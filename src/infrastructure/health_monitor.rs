//! Health Monitor
//!
//! Probes both stores and folds their reachability into a single service
//! health state. A cached report serves cheap reads between refreshes.

use crate::domain::ports::StoreAdapter;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Aggregate service health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    /// Primary reachable, secondary reachable or not configured
    Healthy,
    /// Exactly one store reachable
    Degraded,
    /// Neither store reachable
    Down,
}

impl HealthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Down => "down",
        }
    }
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Point-in-time reachability report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    /// Whether the primary store answered its probe
    pub primary_up: bool,
    /// Whether the secondary store answered its probe. Always false when
    /// no secondary is configured.
    pub secondary_up: bool,
    /// Aggregate state derived from the two probes
    pub status: HealthState,
}

/// Health monitor configuration.
#[derive(Debug, Clone)]
pub struct HealthMonitorConfig {
    /// Interval between background refreshes
    pub refresh_interval: Duration,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(30),
        }
    }
}

/// Probes the configured stores and caches the latest report.
pub struct HealthMonitor {
    primary: Arc<dyn StoreAdapter>,
    secondary: Option<Arc<dyn StoreAdapter>>,
    config: HealthMonitorConfig,
    report: Arc<RwLock<HealthReport>>,
    shutdown: Arc<AtomicBool>,
}

impl HealthMonitor {
    /// Create a monitor over the given stores.
    ///
    /// The cached report starts optimistic and is corrected by the first
    /// refresh.
    pub fn new(
        primary: Arc<dyn StoreAdapter>,
        secondary: Option<Arc<dyn StoreAdapter>>,
        config: HealthMonitorConfig,
    ) -> Self {
        let configured = secondary.is_some();
        let initial = HealthReport {
            primary_up: true,
            secondary_up: configured,
            status: Self::derive_status(true, configured, configured),
        };

        Self {
            primary,
            secondary,
            config,
            report: Arc::new(RwLock::new(initial)),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Probe the primary store.
    pub async fn check_primary(&self) -> bool {
        Self::probe_store(&self.primary).await
    }

    /// Probe the secondary store. False when none is configured.
    pub async fn check_secondary(&self) -> bool {
        match &self.secondary {
            Some(secondary) => Self::probe_store(secondary).await,
            None => false,
        }
    }

    /// Probe both stores and replace the cached report.
    ///
    /// Never fails: probe errors degrade the report instead of surfacing.
    pub async fn aggregate(&self) -> HealthReport {
        Self::refresh(&self.primary, &self.secondary, &self.report).await
    }

    /// Last computed report, without probing.
    pub fn last_report(&self) -> HealthReport {
        *self.report.read()
    }

    /// Start the periodic refresh loop.
    #[cfg_attr(coverage_nightly, coverage(off))]
    pub fn start(&self) {
        let primary = self.primary.clone();
        let secondary = self.secondary.clone();
        let report = self.report.clone();
        let shutdown = self.shutdown.clone();
        let refresh_interval = self.config.refresh_interval;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(refresh_interval);

            loop {
                interval.tick().await;

                if shutdown.load(Ordering::SeqCst) {
                    break;
                }

                Self::refresh(&primary, &secondary, &report).await;
            }
        });
    }

    /// Stop the refresh loop at its next tick.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    async fn probe_store(store: &Arc<dyn StoreAdapter>) -> bool {
        match store.probe().await {
            Ok(_) => true,
            Err(err) => {
                tracing::debug!("probe of {} failed: {}", store.name(), err);
                false
            }
        }
    }

    /// Probe both stores, derive the state and swap the cached report.
    async fn refresh(
        primary: &Arc<dyn StoreAdapter>,
        secondary: &Option<Arc<dyn StoreAdapter>>,
        report: &Arc<RwLock<HealthReport>>,
    ) -> HealthReport {
        let primary_up = Self::probe_store(primary).await;
        let secondary_up = match secondary {
            Some(secondary) => Self::probe_store(secondary).await,
            None => false,
        };
        let status = Self::derive_status(primary_up, secondary_up, secondary.is_some());

        let next = HealthReport {
            primary_up,
            secondary_up,
            status,
        };
        let previous = {
            let mut cached = report.write();
            std::mem::replace(&mut *cached, next)
        };

        if previous.status != next.status {
            match next.status {
                HealthState::Healthy => tracing::info!("service recovered to healthy"),
                _ => tracing::warn!(
                    "service is {} primary_up={} secondary_up={}",
                    next.status,
                    primary_up,
                    secondary_up
                ),
            }
        }

        next
    }

    /// Fold per-store reachability into one state.
    ///
    /// An unconfigured secondary is not counted against health.
    fn derive_status(
        primary_up: bool,
        secondary_up: bool,
        secondary_configured: bool,
    ) -> HealthState {
        if primary_up && (secondary_up || !secondary_configured) {
            HealthState::Healthy
        } else if primary_up || secondary_up {
            HealthState::Degraded
        } else {
            HealthState::Down
        }
    }
}
