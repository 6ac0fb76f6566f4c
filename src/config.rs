use crate::infrastructure::mirror::DEFAULT_MIRROR_CAPACITY;
use serde::Deserialize;
use std::time::Duration;

/// Credentials and tuning for the REST secondary.
#[derive(Debug, Deserialize, Clone)]
pub struct SecondaryConfig {
    /// Base URL of the REST service (e.g. "https://project.example.co")
    pub url: String,
    /// Service key, or the anon key when no service key is issued
    pub api_key: String,
    /// Per-request timeout in seconds (default: 5)
    pub request_timeout_secs: u64,
}

impl SecondaryConfig {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into(),
            request_timeout_secs: 5,
        }
    }

    /// Set the per-request timeout in seconds.
    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.request_timeout_secs = secs;
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DualStoreConfig {
    // Primary store settings
    pub db_path: String,
    pub probe_collection: String,

    // Mirroring and health settings
    pub mirror_queue_capacity: usize,
    pub health_refresh_secs: u64,

    // Secondary store, absent when credentials are not supplied
    pub secondary: Option<SecondaryConfig>,
}

impl Default for DualStoreConfig {
    fn default() -> Self {
        Self {
            db_path: "dualstore.db".to_string(),
            probe_collection: "users".to_string(),
            mirror_queue_capacity: DEFAULT_MIRROR_CAPACITY,
            health_refresh_secs: 30,
            secondary: None,
        }
    }
}

impl DualStoreConfig {
    /// Create a new configuration with the primary database path.
    pub fn new(db_path: impl Into<String>) -> Self {
        Self {
            db_path: db_path.into(),
            ..Default::default()
        }
    }

    /// Set the collection probed for liveness.
    pub fn probe_collection(mut self, collection: impl Into<String>) -> Self {
        self.probe_collection = collection.into();
        self
    }

    /// Set the mirror queue capacity.
    pub fn mirror_queue_capacity(mut self, capacity: usize) -> Self {
        self.mirror_queue_capacity = capacity;
        self
    }

    /// Set the health refresh cadence in seconds.
    pub fn health_refresh_secs(mut self, secs: u64) -> Self {
        self.health_refresh_secs = secs;
        self
    }

    /// Attach a secondary store.
    pub fn secondary(mut self, secondary: SecondaryConfig) -> Self {
        self.secondary = Some(secondary);
        self
    }

    pub fn health_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.health_refresh_secs)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.db_path.is_empty() {
            return Err(ConfigError::MissingDbPath);
        }
        if self.probe_collection.is_empty() {
            return Err(ConfigError::MissingProbeCollection);
        }
        if self.mirror_queue_capacity == 0 {
            return Err(ConfigError::ZeroMirrorCapacity);
        }
        if let Some(secondary) = &self.secondary {
            if secondary.url.is_empty() {
                return Err(ConfigError::MissingSecondaryUrl);
            }
            if secondary.api_key.is_empty() {
                return Err(ConfigError::MissingSecondaryKey);
            }
        }
        Ok(())
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("db_path is required")]
    MissingDbPath,
    #[error("probe_collection is required")]
    MissingProbeCollection,
    #[error("mirror_queue_capacity must be at least 1")]
    ZeroMirrorCapacity,
    #[error("secondary url is required")]
    MissingSecondaryUrl,
    #[error("secondary api key is required")]
    MissingSecondaryKey,
}

pub fn load_config() -> anyhow::Result<DualStoreConfig> {
    let db_path =
        std::env::var("DUALSTORE_DB_PATH").unwrap_or_else(|_| "dualstore.db".to_string());

    let probe_collection =
        std::env::var("DUALSTORE_PROBE_COLLECTION").unwrap_or_else(|_| "users".to_string());

    let mirror_queue_capacity = std::env::var("DUALSTORE_MIRROR_QUEUE_CAPACITY")
        .unwrap_or_else(|_| DEFAULT_MIRROR_CAPACITY.to_string())
        .parse()
        .unwrap_or(DEFAULT_MIRROR_CAPACITY);

    let health_refresh_secs = std::env::var("DUALSTORE_HEALTH_REFRESH_SECS")
        .unwrap_or_else(|_| "30".to_string())
        .parse()
        .unwrap_or(30);

    // Secondary store settings. The service key outranks the anon key;
    // both the URL and one key must be present for the secondary to exist.
    let secondary_url = std::env::var("DUALSTORE_SECONDARY_URL").ok();
    let secondary_key = std::env::var("DUALSTORE_SECONDARY_SERVICE_KEY")
        .or_else(|_| std::env::var("DUALSTORE_SECONDARY_ANON_KEY"))
        .ok();

    let secondary_timeout_secs = std::env::var("DUALSTORE_SECONDARY_TIMEOUT_SECS")
        .unwrap_or_else(|_| "5".to_string())
        .parse()
        .unwrap_or(5);

    let secondary = match (secondary_url, secondary_key) {
        (Some(url), Some(api_key)) => Some(SecondaryConfig {
            url,
            api_key,
            request_timeout_secs: secondary_timeout_secs,
        }),
        (Some(_), None) | (None, Some(_)) => {
            tracing::warn!("incomplete secondary credentials, running primary-only");
            None
        }
        (None, None) => None,
    };

    let config = DualStoreConfig {
        db_path,
        probe_collection,
        mirror_queue_capacity,
        health_refresh_secs,
        secondary,
    };
    config.validate()?;

    Ok(config)
}
