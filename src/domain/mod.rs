//! Domain Layer
//!
//! Core value types, the error taxonomy, and the store adapter port.

pub mod errors;
pub mod operation;
pub mod ports;

pub use errors::{ErrorKind, StoreError};
pub use operation::{Filter, Operation, OperationKind, OperationOutcome, Payload};
