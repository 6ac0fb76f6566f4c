//! Toggle Handler
//!
//! Flips a unique (actor, target) pair record on and off: absent inserts,
//! present deletes. Races between the read and the write collapse onto
//! the state the store actually reached.

use crate::application::coordinator::ReplicationCoordinator;
use crate::domain::errors::StoreError;
use crate::domain::operation::{Filter, Operation, Payload};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// Result of a toggle call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ToggleOutcome {
    /// Whether the pair record exists after the call
    pub active: bool,
}

/// Check-then-flip handler for one toggle collection.
///
/// The collection needs a uniqueness constraint over the pair fields for
/// the conflict collapse to hold under concurrency.
pub struct ToggleHandler {
    coordinator: Arc<ReplicationCoordinator>,
    collection: String,
    actor_field: String,
    target_field: String,
}

impl ToggleHandler {
    /// Handler for `collection`, keyed by the two given fields.
    pub fn new(
        coordinator: Arc<ReplicationCoordinator>,
        collection: impl Into<String>,
        actor_field: impl Into<String>,
        target_field: impl Into<String>,
    ) -> Self {
        Self {
            coordinator,
            collection: collection.into(),
            actor_field: actor_field.into(),
            target_field: target_field.into(),
        }
    }

    /// Flip the pair record and report the state it ended up in.
    pub async fn toggle(&self, actor: &str, target: &str) -> Result<ToggleOutcome, StoreError> {
        let filter = self.pair_filter(actor, target);
        let read = Operation::read_one(&self.collection, filter.clone());

        match self.coordinator.run(read, false).await {
            Ok(_) => self.deactivate(filter).await,
            Err(err) if err.is_not_found() => self.activate(actor, target).await,
            Err(err) => Err(err),
        }
    }

    /// Whether the pair record currently exists.
    pub async fn is_active(&self, actor: &str, target: &str) -> Result<bool, StoreError> {
        let op = Operation::exists(&self.collection, self.pair_filter(actor, target));
        let payload = self.coordinator.run(op, false).await?;
        Ok(matches!(payload, Payload::Exists(true)))
    }

    async fn activate(&self, actor: &str, target: &str) -> Result<ToggleOutcome, StoreError> {
        let mut record = serde_json::Map::new();
        record.insert(self.actor_field.clone(), Value::from(actor));
        record.insert(self.target_field.clone(), Value::from(target));
        let insert = Operation::insert(&self.collection, Value::Object(record));

        match self.coordinator.run(insert, true).await {
            Ok(_) => Ok(ToggleOutcome { active: true }),
            // A concurrent toggle inserted the pair first; the record
            // exists, which is the state the caller asked for.
            Err(err) if err.is_conflict() => {
                tracing::debug!(
                    "toggle insert on {} collapsed onto existing pair",
                    self.collection
                );
                Ok(ToggleOutcome { active: true })
            }
            Err(err) => Err(err),
        }
    }

    async fn deactivate(&self, filter: Filter) -> Result<ToggleOutcome, StoreError> {
        let delete = Operation::delete_matching(&self.collection, filter);

        match self.coordinator.run(delete, true).await {
            Ok(_) => Ok(ToggleOutcome { active: false }),
            // A concurrent toggle removed the pair between the read and
            // the delete; it is gone either way.
            Err(err) if err.is_not_found() => {
                tracing::debug!(
                    "toggle delete on {} found the pair already gone",
                    self.collection
                );
                Ok(ToggleOutcome { active: false })
            }
            Err(err) => Err(err),
        }
    }

    fn pair_filter(&self, actor: &str, target: &str) -> Filter {
        Filter::new()
            .eq(self.actor_field.as_str(), actor)
            .eq(self.target_field.as_str(), target)
    }
}
