//! In-Memory Store
//!
//! Implements StoreAdapter using DashMap for lock-free concurrent access.
//! Backs embedded/dev deployments and fast tests. Enforces the same
//! uniqueness rules as the durable adapters via an atomic pair index, so
//! concurrent toggle activations collapse to a single record here too.

use crate::domain::errors::StoreError;
use crate::domain::operation::{Operation, OperationKind, OperationOutcome, Payload};
use crate::domain::ports::StoreAdapter;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// DashMap-backed store adapter.
///
/// Records are JSON objects keyed by their `id` field; the adapter assigns
/// a v4 id and a `created_at` timestamp (unix milliseconds) when an insert
/// payload omits them and returns the complete stored record, matching the
/// durable primary's behavior.
pub struct MemoryStore {
    name: String,
    probe_collection: String,
    collections: Arc<DashMap<String, Arc<DashMap<String, Value>>>>,
    /// collection -> (actor field, target field) for toggle collections
    unique_pairs: DashMap<String, (String, String)>,
    /// compound pair key -> record id, guards concurrent duplicate inserts
    pair_index: DashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            name: "memory".to_string(),
            probe_collection: "users".to_string(),
            collections: Arc::new(DashMap::new()),
            unique_pairs: DashMap::new(),
            pair_index: DashMap::new(),
        }
    }

    /// Set the adapter name reported in logs and errors.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the collection probed for liveness.
    pub fn with_probe_collection(mut self, collection: impl Into<String>) -> Self {
        self.probe_collection = collection.into();
        self
    }

    /// Declare a uniqueness constraint on (actor field, target field) for a
    /// collection. Inserts carrying both fields then conflict when another
    /// record already holds the same pair.
    pub fn ensure_unique(
        &self,
        collection: impl Into<String>,
        actor_field: impl Into<String>,
        target_field: impl Into<String>,
    ) {
        self.unique_pairs
            .insert(collection.into(), (actor_field.into(), target_field.into()));
    }

    /// Number of records currently held in a collection.
    pub fn count(&self, collection: &str) -> usize {
        self.collections
            .get(collection)
            .map(|c| c.len())
            .unwrap_or(0)
    }

    fn collection(&self, name: &str) -> Arc<DashMap<String, Value>> {
        self.collections
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(DashMap::new()))
            .clone()
    }

    fn pair_key(collection: &str, actor: &Value, target: &Value) -> String {
        format!("{}\u{1f}{}\u{1f}{}", collection, actor, target)
    }

    /// Pair key for a record in a unique collection, if it carries both fields.
    fn record_pair_key(&self, collection: &str, record: &Value) -> Option<String> {
        let pair = self.unique_pairs.get(collection)?;
        let (actor_field, target_field) = pair.value();
        let actor = record.get(actor_field)?;
        let target = record.get(target_field)?;
        Some(Self::pair_key(collection, actor, target))
    }

    fn do_insert(&self, op: &Operation) -> OperationOutcome {
        let payload = match &op.payload {
            Some(Value::Object(map)) => Value::Object(map.clone()),
            Some(_) => {
                return Err(StoreError::validation(
                    &self.name,
                    "insert payload must be a json object",
                ))
            }
            None => {
                return Err(StoreError::validation(
                    &self.name,
                    "insert requires a payload",
                ))
            }
        };
        let record = stamp_record(payload);
        let id = match record.get("id").and_then(Value::as_str) {
            Some(id) => id.to_string(),
            None => {
                return Err(StoreError::validation(
                    &self.name,
                    "record id must be a string",
                ))
            }
        };

        // Atomic duplicate guard for toggle collections
        if let Some(key) = self.record_pair_key(&op.collection, &record) {
            match self.pair_index.entry(key) {
                Entry::Occupied(_) => {
                    return Err(StoreError::conflict(
                        &self.name,
                        format!("duplicate pair in {}", op.collection),
                    ));
                }
                Entry::Vacant(e) => {
                    e.insert(id.clone());
                }
            }
        }

        self.collection(&op.collection).insert(id, record.clone());
        Ok(Payload::Record(record))
    }

    fn do_read_one(&self, op: &Operation) -> OperationOutcome {
        let collection = self.collection(&op.collection);
        let found = collection
            .iter()
            .find(|e| op.filter.matches(e.value()))
            .map(|e| e.value().clone());
        match found {
            Some(record) => Ok(Payload::Record(record)),
            None => Err(StoreError::not_found(
                &self.name,
                format!("no record in {} matches filter", op.collection),
            )),
        }
    }

    fn do_read_many(&self, op: &Operation) -> OperationOutcome {
        let collection = self.collection(&op.collection);
        let mut records: Vec<Value> = collection
            .iter()
            .filter(|e| op.filter.matches(e.value()))
            .map(|e| e.value().clone())
            .collect();
        records.sort_by_key(|r| std::cmp::Reverse(created_at_of(r)));
        records.truncate(op.effective_limit());
        Ok(Payload::Records(records))
    }

    fn do_update(&self, op: &Operation) -> OperationOutcome {
        let patch = match &op.payload {
            Some(Value::Object(map)) => map.clone(),
            Some(_) => {
                return Err(StoreError::validation(
                    &self.name,
                    "update payload must be a json object",
                ))
            }
            None => {
                return Err(StoreError::validation(
                    &self.name,
                    "update requires a payload",
                ))
            }
        };
        let collection = self.collection(&op.collection);
        let id = collection
            .iter()
            .find(|e| op.filter.matches(e.value()))
            .map(|e| e.key().clone());
        let id = match id {
            Some(id) => id,
            None => {
                return Err(StoreError::not_found(
                    &self.name,
                    format!("no record in {} matches filter", op.collection),
                ))
            }
        };
        // Bound so the entry guard drops before `collection` does.
        let updated = match collection.get_mut(&id) {
            Some(mut entry) => {
                if let Value::Object(record) = entry.value_mut() {
                    for (field, value) in patch {
                        // json_patch semantics: a null patch value removes the field
                        if value.is_null() {
                            record.remove(&field);
                        } else {
                            record.insert(field, value);
                        }
                    }
                }
                Ok(Payload::Record(entry.value().clone()))
            }
            // Removed between lookup and merge
            None => Err(StoreError::not_found(
                &self.name,
                format!("no record in {} matches filter", op.collection),
            )),
        };
        updated
    }

    fn do_delete(&self, op: &Operation) -> OperationOutcome {
        let collection = self.collection(&op.collection);
        let matching: Vec<String> = collection
            .iter()
            .filter(|e| op.filter.matches(e.value()))
            .map(|e| e.key().clone())
            .collect();

        let mut deleted = 0u64;
        for id in matching {
            if let Some((_, record)) = collection.remove(&id) {
                deleted += 1;
                if let Some(key) = self.record_pair_key(&op.collection, &record) {
                    self.pair_index.remove_if(&key, |_, held| *held == id);
                }
            }
        }

        if deleted == 0 {
            return Err(StoreError::not_found(
                &self.name,
                format!("no record in {} matches filter", op.collection),
            ));
        }
        Ok(Payload::Deleted(deleted))
    }

    fn do_exists(&self, op: &Operation) -> OperationOutcome {
        let collection = self.collection(&op.collection);
        let found = collection.iter().any(|e| op.filter.matches(e.value()));
        Ok(Payload::Exists(found))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StoreAdapter for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, op: &Operation) -> OperationOutcome {
        match op.kind {
            OperationKind::ReadOne => self.do_read_one(op),
            OperationKind::ReadMany => self.do_read_many(op),
            OperationKind::Insert => self.do_insert(op),
            OperationKind::Update => self.do_update(op),
            OperationKind::Delete => self.do_delete(op),
            OperationKind::Exists => self.do_exists(op),
        }
    }

    async fn probe(&self) -> OperationOutcome {
        let op = Operation::read_many_limit(&self.probe_collection, 1);
        self.do_read_many(&op)
    }
}

/// Fill in `id` and `created_at` when the payload omits them.
fn stamp_record(mut payload: Value) -> Value {
    if let Value::Object(map) = &mut payload {
        if !map.contains_key("id") {
            map.insert("id".to_string(), Value::from(Uuid::new_v4().to_string()));
        }
        if !map.contains_key("created_at") {
            map.insert("created_at".to_string(), Value::from(now_millis()));
        }
    }
    payload
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn created_at_of(record: &Value) -> i64 {
    record
        .get("created_at")
        .and_then(Value::as_i64)
        .unwrap_or(0)
}
