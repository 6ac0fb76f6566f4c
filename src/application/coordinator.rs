//! Replication Coordinator
//!
//! Application service that executes operations primary-first, queues
//! successful writes for replay on the secondary, and falls back to the
//! secondary when the primary is unreachable.

use crate::domain::operation::{Operation, OperationKind, OperationOutcome, Payload};
use crate::domain::ports::StoreAdapter;
use crate::infrastructure::mirror::{MirrorQueue, MirrorStats, DEFAULT_MIRROR_CAPACITY};
use std::sync::Arc;
use std::time::Duration;

/// Wiring for the coordinator.
pub struct CoordinatorConfig {
    /// Durable store that every operation hits first
    pub primary: Arc<dyn StoreAdapter>,
    /// Best-effort replica, absent in primary-only deployments
    pub secondary: Option<Arc<dyn StoreAdapter>>,
    /// Capacity of the mirror queue
    pub mirror_capacity: usize,
}

impl CoordinatorConfig {
    pub fn new(primary: Arc<dyn StoreAdapter>) -> Self {
        Self {
            primary,
            secondary: None,
            mirror_capacity: DEFAULT_MIRROR_CAPACITY,
        }
    }

    /// Attach a secondary store.
    pub fn secondary(mut self, secondary: Arc<dyn StoreAdapter>) -> Self {
        self.secondary = Some(secondary);
        self
    }

    /// Capacity of the mirror queue.
    pub fn mirror_capacity(mut self, capacity: usize) -> Self {
        self.mirror_capacity = capacity;
        self
    }
}

/// Executes operations against the store pair.
///
/// The primary outcome is authoritative. The secondary only ever serves
/// two roles: best-effort mirror target for successful writes, and
/// fallback when the primary cannot be reached at all.
pub struct ReplicationCoordinator {
    primary: Arc<dyn StoreAdapter>,
    secondary: Option<Arc<dyn StoreAdapter>>,
    mirror: Option<MirrorQueue>,
}

impl ReplicationCoordinator {
    /// Wire the coordinator and spawn the mirror worker when a secondary
    /// is configured.
    ///
    /// Must be called from within a tokio runtime when a secondary is
    /// present.
    pub fn new(config: CoordinatorConfig) -> Self {
        let mirror = config
            .secondary
            .as_ref()
            .map(|secondary| MirrorQueue::start(secondary.clone(), config.mirror_capacity));

        Self {
            primary: config.primary,
            secondary: config.secondary,
            mirror,
        }
    }

    /// Whether a secondary store is wired in.
    pub fn secondary_configured(&self) -> bool {
        self.secondary.is_some()
    }

    /// Mirror queue counters. All zero when no secondary is configured.
    pub fn mirror_stats(&self) -> MirrorStats {
        self.mirror
            .as_ref()
            .map(|mirror| mirror.stats())
            .unwrap_or_default()
    }

    /// Close the mirror intake and wait for queued jobs to finish.
    pub async fn drain_mirror(&self, timeout: Duration) -> bool {
        match &self.mirror {
            Some(mirror) => mirror.drain(timeout).await,
            None => true,
        }
    }

    /// Execute one operation with primary-first semantics.
    ///
    /// On primary success the payload is returned as-is; when `mirror` is
    /// set the operation is additionally queued for replay on the
    /// secondary. Only an unreachable primary triggers fallback: the
    /// operation is re-executed on the secondary and that outcome is
    /// returned. If the fallback fails too, the original primary error is
    /// returned. Any other primary failure is returned untouched.
    pub async fn run(&self, op: Operation, mirror: bool) -> OperationOutcome {
        match self.primary.execute(&op).await {
            Ok(payload) => {
                if mirror {
                    self.submit_mirror(&op, &payload);
                }
                Ok(payload)
            }
            Err(primary_err) if primary_err.is_unreachable() => {
                let Some(secondary) = &self.secondary else {
                    return Err(primary_err);
                };

                tracing::warn!(
                    "primary {} unreachable for {} on {}, falling back to {}",
                    self.primary.name(),
                    op.kind,
                    op.collection,
                    secondary.name()
                );

                match secondary.execute(&op).await {
                    Ok(payload) => {
                        tracing::debug!(
                            "fallback served {} on {} from {}",
                            op.kind,
                            op.collection,
                            secondary.name()
                        );
                        // Fallback writes are not mirrored back to the
                        // primary; the stores re-converge on its recovery.
                        Ok(payload)
                    }
                    Err(fallback_err) => {
                        tracing::warn!(
                            "fallback to {} failed: {}",
                            secondary.name(),
                            fallback_err
                        );
                        // The primary failure stays authoritative.
                        Err(primary_err)
                    }
                }
            }
            Err(err) => Err(err),
        }
    }

    /// Queue the operation for the secondary. Inserts replay the record
    /// the primary actually stored so both stores converge on the same
    /// keys.
    fn submit_mirror(&self, op: &Operation, payload: &Payload) {
        let Some(mirror) = &self.mirror else {
            return;
        };

        let replay = match (op.kind, payload) {
            (OperationKind::Insert, Payload::Record(stored)) => {
                op.clone().with_payload(stored.clone())
            }
            _ => op.clone(),
        };
        mirror.submit(replay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::{ErrorKind, StoreError};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    // ===== Mock Implementations =====

    /// Pops one scripted outcome per execute and records every call.
    struct ScriptedStore {
        name: &'static str,
        outcomes: Mutex<VecDeque<OperationOutcome>>,
        calls: Mutex<Vec<Operation>>,
    }

    impl ScriptedStore {
        fn new(name: &'static str, outcomes: Vec<OperationOutcome>) -> Arc<Self> {
            Arc::new(Self {
                name,
                outcomes: Mutex::new(outcomes.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<Operation> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl StoreAdapter for ScriptedStore {
        fn name(&self) -> &str {
            self.name
        }

        async fn execute(&self, op: &Operation) -> OperationOutcome {
            self.calls.lock().unwrap().push(op.clone());
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(StoreError::unknown(self.name, "script exhausted")))
        }

        async fn probe(&self) -> OperationOutcome {
            Ok(Payload::Records(vec![]))
        }
    }

    fn coordinator(
        primary: Arc<ScriptedStore>,
        secondary: Option<Arc<ScriptedStore>>,
    ) -> ReplicationCoordinator {
        let mut config = CoordinatorConfig::new(primary);
        if let Some(secondary) = secondary {
            config = config.secondary(secondary);
        }
        ReplicationCoordinator::new(config)
    }

    fn stored_post() -> serde_json::Value {
        json!({"id": "p1", "title": "hello", "created_at": 1_700_000_000_000u64})
    }

    // ===== Primary Path Tests =====

    #[tokio::test]
    async fn test_primary_success_is_returned() {
        let primary = ScriptedStore::new("primary", vec![Ok(Payload::Record(stored_post()))]);
        let coordinator = coordinator(primary.clone(), None);

        let op = Operation::insert("posts", json!({"title": "hello"}));
        let outcome = coordinator.run(op, true).await;

        assert_eq!(outcome, Ok(Payload::Record(stored_post())));
        assert_eq!(primary.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_non_unreachable_failure_is_returned_untouched() {
        let primary = ScriptedStore::new(
            "primary",
            vec![Err(StoreError::not_found("primary", "no such post"))],
        );
        let secondary = ScriptedStore::new("secondary", vec![Ok(Payload::Record(stored_post()))]);
        let coordinator = coordinator(primary, Some(secondary.clone()));

        let outcome = coordinator.run(Operation::read_by_key("posts", "p1"), false).await;

        let err = outcome.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
        // No fallback for a store that answered.
        assert!(secondary.calls().is_empty());
    }

    // ===== Mirror Tests =====

    #[tokio::test]
    async fn test_insert_mirrors_stored_record() {
        let primary = ScriptedStore::new("primary", vec![Ok(Payload::Record(stored_post()))]);
        let secondary = ScriptedStore::new("secondary", vec![Ok(Payload::Record(stored_post()))]);
        let coordinator = coordinator(primary, Some(secondary.clone()));

        let op = Operation::insert("posts", json!({"title": "hello"}));
        coordinator.run(op, true).await.unwrap();
        assert!(coordinator.drain_mirror(Duration::from_secs(1)).await);

        // The replay carries the record as the primary stored it, keys
        // included, not the caller's raw payload.
        let calls = secondary.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].kind, OperationKind::Insert);
        assert_eq!(calls[0].payload, Some(stored_post()));
        assert_eq!(coordinator.mirror_stats().mirrored, 1);
    }

    #[tokio::test]
    async fn test_unmirrored_operation_skips_secondary() {
        let primary = ScriptedStore::new("primary", vec![Ok(Payload::Record(stored_post()))]);
        let secondary = ScriptedStore::new("secondary", vec![]);
        let coordinator = coordinator(primary, Some(secondary.clone()));

        coordinator
            .run(Operation::read_by_key("posts", "p1"), false)
            .await
            .unwrap();
        assert!(coordinator.drain_mirror(Duration::from_secs(1)).await);

        assert!(secondary.calls().is_empty());
        assert_eq!(coordinator.mirror_stats().enqueued, 0);
    }

    #[tokio::test]
    async fn test_mirror_failure_does_not_change_outcome() {
        let primary = ScriptedStore::new("primary", vec![Ok(Payload::Record(stored_post()))]);
        let secondary = ScriptedStore::new(
            "secondary",
            vec![Err(StoreError::unreachable("secondary", "gateway timeout"))],
        );
        let coordinator = coordinator(primary, Some(secondary));

        let op = Operation::insert("posts", json!({"title": "hello"}));
        let outcome = coordinator.run(op, true).await;

        assert!(outcome.is_ok());
        assert!(coordinator.drain_mirror(Duration::from_secs(1)).await);
        let stats = coordinator.mirror_stats();
        assert_eq!(stats.enqueued, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.mirrored, 0);
    }

    // ===== Fallback Tests =====

    #[tokio::test]
    async fn test_unreachable_primary_falls_back() {
        let primary = ScriptedStore::new(
            "primary",
            vec![Err(StoreError::unreachable("primary", "disk gone"))],
        );
        let stale = json!({"id": "p1", "title": "stale copy"});
        let secondary =
            ScriptedStore::new("secondary", vec![Ok(Payload::Record(stale.clone()))]);
        let coordinator = coordinator(primary, Some(secondary.clone()));

        let op = Operation::read_by_key("posts", "p1");
        let outcome = coordinator.run(op.clone(), false).await;

        assert_eq!(outcome, Ok(Payload::Record(stale)));
        assert_eq!(secondary.calls(), vec![op]);
    }

    #[tokio::test]
    async fn test_fallback_write_is_not_mirrored() {
        let primary = ScriptedStore::new(
            "primary",
            vec![Err(StoreError::unreachable("primary", "disk gone"))],
        );
        let secondary = ScriptedStore::new("secondary", vec![Ok(Payload::Record(stored_post()))]);
        let coordinator = coordinator(primary, Some(secondary.clone()));

        let op = Operation::insert("posts", json!({"title": "hello"}));
        let outcome = coordinator.run(op, true).await;

        assert!(outcome.is_ok());
        assert!(coordinator.drain_mirror(Duration::from_secs(1)).await);

        // Exactly one secondary call: the fallback itself, no replay.
        assert_eq!(secondary.calls().len(), 1);
        assert_eq!(coordinator.mirror_stats().enqueued, 0);
    }

    #[tokio::test]
    async fn test_both_failing_returns_primary_error() {
        let primary = ScriptedStore::new(
            "primary",
            vec![Err(StoreError::unreachable("primary", "disk gone"))],
        );
        let secondary = ScriptedStore::new(
            "secondary",
            vec![Err(StoreError::not_found("secondary", "never mirrored"))],
        );
        let coordinator = coordinator(primary, Some(secondary));

        let outcome = coordinator.run(Operation::read_by_key("posts", "p1"), false).await;

        let err = outcome.unwrap_err();
        assert_eq!(err.kind, ErrorKind::StoreUnreachable);
        assert_eq!(err.store, "primary");
    }

    #[tokio::test]
    async fn test_unreachable_primary_without_secondary() {
        let primary = ScriptedStore::new(
            "primary",
            vec![Err(StoreError::unreachable("primary", "disk gone"))],
        );
        let coordinator = coordinator(primary, None);

        let outcome = coordinator.run(Operation::read_by_key("posts", "p1"), false).await;

        assert_eq!(outcome.unwrap_err().kind, ErrorKind::StoreUnreachable);
        assert!(!coordinator.secondary_configured());
    }

    // ===== Mirror Stats Tests =====

    #[tokio::test]
    async fn test_stats_without_secondary_are_zero() {
        let primary = ScriptedStore::new("primary", vec![]);
        let coordinator = coordinator(primary, None);

        assert_eq!(coordinator.mirror_stats(), MirrorStats::default());
        assert!(coordinator.drain_mirror(Duration::from_millis(10)).await);
    }
}
