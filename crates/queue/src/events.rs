//! Events the registry emits toward its consumer.

use crate::task::TaskSnapshot;

/// Notification stream of registry activity, received via
/// [`TaskRegistry::take_events`](crate::TaskRegistry::take_events).
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    /// A task was registered.
    New { id: u64 },
    /// A task finished successfully.
    Done { id: u64 },
    /// A task failed.
    Error { id: u64, message: String },
    /// A running task settled after a cancellation request.
    Cancel { id: u64 },
    /// Periodic state broadcast from the snapshot loop.
    Refresh(Vec<TaskSnapshot>),
}
