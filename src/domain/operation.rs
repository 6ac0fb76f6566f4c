//! Operations
//!
//! Value objects describing one logical unit of work against a store.
//! An Operation is constructed by the caller, consumed exactly once by the
//! coordinator, and immutable after construction.

use crate::domain::errors::StoreError;
use serde_json::Value;

/// Default row cap for collection reads.
pub const DEFAULT_READ_LIMIT: usize = 50;

/// What an operation does to its target collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// Fetch the single record matching the filter.
    ReadOne,
    /// Fetch up to `limit` records, newest first.
    ReadMany,
    /// Store a new record.
    Insert,
    /// Merge a partial payload into the record matching the filter.
    Update,
    /// Remove every record matching the filter.
    Delete,
    /// Report whether any record matches the filter.
    Exists,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReadOne => "read_one",
            Self::ReadMany => "read_many",
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Exists => "exists",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Conjunctive equality filter over record fields.
///
/// A record matches when every clause matches. Adapters translate clauses
/// into their native form (SQL predicates, REST query parameters, in-memory
/// comparison).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    /// Field/value equality clauses.
    pub clauses: Vec<(String, Value)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter on the record id.
    pub fn by_key(key: &str) -> Self {
        Self::new().eq("id", key)
    }

    /// Add an equality clause.
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.clauses.push((field.into(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// True when `record` satisfies every clause.
    pub fn matches(&self, record: &Value) -> bool {
        self.clauses
            .iter()
            .all(|(field, value)| record.get(field) == Some(value))
    }
}

/// One logical unit of work.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    /// What to do.
    pub kind: OperationKind,
    /// Target entity collection.
    pub collection: String,
    /// Which records the operation addresses.
    pub filter: Filter,
    /// Record payload for writes.
    pub payload: Option<Value>,
    /// Row cap for ReadMany.
    pub limit: Option<usize>,
}

impl Operation {
    fn new(kind: OperationKind, collection: impl Into<String>) -> Self {
        Self {
            kind,
            collection: collection.into(),
            filter: Filter::new(),
            payload: None,
            limit: None,
        }
    }

    /// Fetch the single record matching `filter`.
    pub fn read_one(collection: impl Into<String>, filter: Filter) -> Self {
        let mut op = Self::new(OperationKind::ReadOne, collection);
        op.filter = filter;
        op
    }

    /// Fetch the record with the given id.
    pub fn read_by_key(collection: impl Into<String>, key: &str) -> Self {
        Self::read_one(collection, Filter::by_key(key))
    }

    /// Fetch the newest records, capped at the default limit.
    pub fn read_many(collection: impl Into<String>) -> Self {
        let mut op = Self::new(OperationKind::ReadMany, collection);
        op.limit = Some(DEFAULT_READ_LIMIT);
        op
    }

    /// Fetch the newest records, capped at `limit`.
    pub fn read_many_limit(collection: impl Into<String>, limit: usize) -> Self {
        let mut op = Self::new(OperationKind::ReadMany, collection);
        op.limit = Some(limit);
        op
    }

    /// Store a new record.
    pub fn insert(collection: impl Into<String>, payload: Value) -> Self {
        let mut op = Self::new(OperationKind::Insert, collection);
        op.payload = Some(payload);
        op
    }

    /// Merge `patch` into the record with the given id.
    pub fn update(collection: impl Into<String>, key: &str, patch: Value) -> Self {
        let mut op = Self::new(OperationKind::Update, collection);
        op.filter = Filter::by_key(key);
        op.payload = Some(patch);
        op
    }

    /// Remove the record with the given id.
    pub fn delete_by_key(collection: impl Into<String>, key: &str) -> Self {
        Self::delete_matching(collection, Filter::by_key(key))
    }

    /// Remove every record matching `filter`.
    pub fn delete_matching(collection: impl Into<String>, filter: Filter) -> Self {
        let mut op = Self::new(OperationKind::Delete, collection);
        op.filter = filter;
        op
    }

    /// Report whether any record matches `filter`.
    pub fn exists(collection: impl Into<String>, filter: Filter) -> Self {
        let mut op = Self::new(OperationKind::Exists, collection);
        op.filter = filter;
        op
    }

    /// Same operation with the payload replaced.
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Row cap to apply for ReadMany.
    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_READ_LIMIT)
    }
}

/// Successful result of executing an Operation against one adapter.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// A single complete record.
    Record(Value),
    /// Zero or more records, newest first.
    Records(Vec<Value>),
    /// Whether a matching record exists.
    Exists(bool),
    /// Number of records removed.
    Deleted(u64),
}

impl Payload {
    pub fn as_record(&self) -> Option<&Value> {
        match self {
            Self::Record(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_records(&self) -> Option<&[Value]> {
        match self {
            Self::Records(v) => Some(v),
            _ => None,
        }
    }
}

/// Result of executing an Operation against one adapter: either a success
/// payload or a failure classified by kind. Never coerced to empty success.
pub type OperationOutcome = Result<Payload, StoreError>;
