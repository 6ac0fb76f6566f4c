//! Store Adapter Port
//!
//! Defines the interface for executing logical operations against one
//! backing store. Implementations exist for SQLite, a PostgREST-style REST
//! API, and in-memory storage.

use crate::domain::operation::{Operation, OperationOutcome};
use async_trait::async_trait;

/// Capability interface for a single backing store.
///
/// One implementation wraps exactly one store. Adapters do not retry
/// internally and never reach across to the other store; fallback and
/// mirroring policy belong to the coordinator. `execute` must fail fast
/// (bounded by the store's own timeout behavior) rather than hang, since
/// the coordinator's fallback decision depends on timely failure signaling.
#[async_trait]
pub trait StoreAdapter: Send + Sync {
    /// Stable adapter name used in logs and error reports.
    fn name(&self) -> &str;

    /// Execute one logical operation against this store.
    async fn execute(&self, op: &Operation) -> OperationOutcome;

    /// Cheap liveness probe: a limit-1 read of a known collection.
    ///
    /// Used only by the health monitor; the outcome flows through the same
    /// error classification as every other operation.
    async fn probe(&self) -> OperationOutcome;
}
