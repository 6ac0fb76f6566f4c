//! Integration tests for health monitoring
//!
//! Aggregates real SQLite and wiremock-backed REST probes into the
//! service health states an operator would see.

use dualstore::adapters::outbound::{RestStore, RestStoreConfig, SqliteStore};
use dualstore::{
    CoordinatorConfig, DualStoreConfig, HealthMonitor, HealthMonitorConfig, HealthState,
    Operation, ReplicationCoordinator, SecondaryConfig,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_test_writer()
        .try_init();
}

async fn sqlite_primary(dir: &TempDir) -> Arc<SqliteStore> {
    init_tracing();
    let path = dir.path().join("primary.db");
    let store = SqliteStore::open(path.to_str().unwrap().to_string())
        .await
        .expect("open primary");
    Arc::new(store)
}

fn rest_secondary(server: &MockServer) -> Arc<RestStore> {
    let config = RestStoreConfig {
        base_url: server.uri(),
        api_key: "test-key".to_string(),
        request_timeout: Duration::from_millis(500),
        probe_collection: "users".to_string(),
    };
    Arc::new(RestStore::new(config).expect("client"))
}

async fn mount_healthy_probe(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/rest/v1/users"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(server)
        .await;
}

async fn mount_failing_probe(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/rest/v1/users"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(server)
        .await;
}

/// Test both stores reachable report healthy
#[tokio::test]
async fn test_both_reachable_is_healthy() {
    let dir = TempDir::new().unwrap();
    let server = MockServer::start().await;
    mount_healthy_probe(&server).await;

    let monitor = HealthMonitor::new(
        sqlite_primary(&dir).await,
        Some(rest_secondary(&server)),
        HealthMonitorConfig::default(),
    );

    let report = monitor.aggregate().await;
    assert!(report.primary_up);
    assert!(report.secondary_up);
    assert_eq!(report.status, HealthState::Healthy);
}

/// Test a secondary outage degrades the service
#[tokio::test]
async fn test_secondary_outage_degrades() {
    let dir = TempDir::new().unwrap();
    let server = MockServer::start().await;
    mount_failing_probe(&server).await;

    let monitor = HealthMonitor::new(
        sqlite_primary(&dir).await,
        Some(rest_secondary(&server)),
        HealthMonitorConfig::default(),
    );

    let report = monitor.aggregate().await;
    assert!(report.primary_up);
    assert!(!report.secondary_up);
    assert_eq!(report.status, HealthState::Degraded);
}

/// Test a lost primary with a live secondary degrades instead of going down
#[tokio::test]
async fn test_primary_loss_with_live_secondary_degrades() {
    let dir = TempDir::new().unwrap();
    let server = MockServer::start().await;
    mount_healthy_probe(&server).await;

    let primary = sqlite_primary(&dir).await;
    let monitor = HealthMonitor::new(
        primary,
        Some(rest_secondary(&server)),
        HealthMonitorConfig::default(),
    );

    std::fs::remove_dir_all(dir.path()).unwrap();

    let report = monitor.aggregate().await;
    assert!(!report.primary_up);
    assert!(report.secondary_up);
    assert_eq!(report.status, HealthState::Degraded);
}

/// Test losing both stores reports down
#[tokio::test]
async fn test_total_outage_is_down() {
    let dir = TempDir::new().unwrap();
    let server = MockServer::start().await;
    mount_failing_probe(&server).await;

    let primary = sqlite_primary(&dir).await;
    let monitor = HealthMonitor::new(
        primary,
        Some(rest_secondary(&server)),
        HealthMonitorConfig::default(),
    );

    std::fs::remove_dir_all(dir.path()).unwrap();

    let report = monitor.aggregate().await;
    assert_eq!(report.status, HealthState::Down);
}

/// Test a primary-only deployment is healthy with the secondary reported down
#[tokio::test]
async fn test_primary_only_deployment_is_healthy() {
    let dir = TempDir::new().unwrap();

    let monitor = HealthMonitor::new(
        sqlite_primary(&dir).await,
        None,
        HealthMonitorConfig::default(),
    );

    let report = monitor.aggregate().await;
    assert!(report.primary_up);
    assert!(!report.secondary_up);
    assert_eq!(report.status, HealthState::Healthy);
}

/// Test the background refresh keeps the cached report current
#[tokio::test]
async fn test_background_refresh_tracks_outages() {
    let dir = TempDir::new().unwrap();
    let server = MockServer::start().await;
    mount_healthy_probe(&server).await;

    let monitor = HealthMonitor::new(
        sqlite_primary(&dir).await,
        Some(rest_secondary(&server)),
        HealthMonitorConfig {
            refresh_interval: Duration::from_millis(50),
        },
    );

    monitor.start();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(monitor.last_report().status, HealthState::Healthy);

    // Unmounting the probe mock turns further probes into misses.
    server.reset().await;
    tokio::time::sleep(Duration::from_millis(150)).await;
    monitor.stop();

    let report = monitor.last_report();
    assert!(!report.secondary_up);
    assert_eq!(report.status, HealthState::Degraded);
}

/// Test config-driven composition wires a working stack end to end
#[tokio::test]
async fn test_config_driven_stack_composition() {
    let dir = TempDir::new().unwrap();
    let server = MockServer::start().await;
    mount_healthy_probe(&server).await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/posts"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([{"id": "echo"}])))
        .mount(&server)
        .await;

    let db_path = dir.path().join("primary.db");
    let config = DualStoreConfig::new(db_path.to_str().unwrap())
        .mirror_queue_capacity(16)
        .health_refresh_secs(1)
        .secondary(SecondaryConfig::new(server.uri(), "test-key").request_timeout_secs(1));
    config.validate().expect("valid config");

    init_tracing();
    let primary = Arc::new(
        SqliteStore::open(config.db_path.clone())
            .await
            .expect("open primary")
            .with_probe_collection(config.probe_collection.clone()),
    );
    let secondary_cfg = config.secondary.as_ref().unwrap();
    let secondary = Arc::new(
        RestStore::new(RestStoreConfig {
            base_url: secondary_cfg.url.clone(),
            api_key: secondary_cfg.api_key.clone(),
            request_timeout: secondary_cfg.request_timeout(),
            probe_collection: config.probe_collection.clone(),
        })
        .expect("client"),
    );

    let coordinator = ReplicationCoordinator::new(
        CoordinatorConfig::new(primary.clone())
            .secondary(secondary.clone())
            .mirror_capacity(config.mirror_queue_capacity),
    );
    let monitor = HealthMonitor::new(
        primary,
        Some(secondary),
        HealthMonitorConfig {
            refresh_interval: config.health_refresh_interval(),
        },
    );

    let stored = coordinator
        .run(Operation::insert("posts", json!({"title": "wired"})), true)
        .await
        .unwrap();
    assert!(stored.as_record().unwrap()["id"].is_string());
    assert!(coordinator.drain_mirror(Duration::from_secs(2)).await);
    assert_eq!(coordinator.mirror_stats().mirrored, 1);

    let report = monitor.aggregate().await;
    assert_eq!(report.status, HealthState::Healthy);
}
