//! Store Errors
//!
//! Classified failures returned by store adapters. Every adapter maps its
//! native error surface (SQLite codes, HTTP statuses, connection failures)
//! into this one taxonomy so the coordinator can make fallback decisions
//! without knowing which store produced the failure.

use thiserror::Error;

/// Classification of a store failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No record matches a read, update, or delete target.
    NotFound,
    /// Uniqueness violation on insert.
    ConflictOnInsert,
    /// Network or timeout failure reaching the store.
    StoreUnreachable,
    /// Payload shape rejected by the store (schema constraint).
    ValidationRejected,
    /// Anything not classified.
    Unknown,
}

impl ErrorKind {
    /// Stable string form used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::ConflictOnInsert => "conflict_on_insert",
            Self::StoreUnreachable => "store_unreachable",
            Self::ValidationRejected => "validation_rejected",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A failure from one store adapter.
///
/// Carries the adapter name for diagnostics; callers branch on `kind` only.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{store}: {kind}: {message}")]
pub struct StoreError {
    /// Failure classification.
    pub kind: ErrorKind,
    /// Name of the adapter that produced the failure.
    pub store: String,
    /// Underlying error detail.
    pub message: String,
}

impl StoreError {
    pub fn new(kind: ErrorKind, store: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            store: store.into(),
            message: message.into(),
        }
    }

    /// No record matched the operation's target.
    pub fn not_found(store: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, store, message)
    }

    /// Insert collided with an existing record.
    pub fn conflict(store: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConflictOnInsert, store, message)
    }

    /// The store could not be reached in time.
    pub fn unreachable(store: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::StoreUnreachable, store, message)
    }

    /// The store rejected the payload shape.
    pub fn validation(store: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ValidationRejected, store, message)
    }

    /// Unclassified failure.
    pub fn unknown(store: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, store, message)
    }

    /// True when the failure should trigger the coordinator's fallback path.
    pub fn is_unreachable(&self) -> bool {
        self.kind == ErrorKind::StoreUnreachable
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }

    pub fn is_conflict(&self) -> bool {
        self.kind == ErrorKind::ConflictOnInsert
    }
}
