mod coordinator;
mod toggle;

pub use coordinator::{CoordinatorConfig, ReplicationCoordinator};
pub use toggle::{ToggleHandler, ToggleOutcome};
