//! Task registry driving upload and download jobs under a bounded
//! concurrency ceiling.
//!
//! Jobs implement [`TransferJob`] (the adapters for the concrete tasks
//! in `stowage-transfer` are provided here) and are registered with a
//! [`TaskRegistry`], which schedules them through WAIT, RUN and the
//! terminal states, broadcasts periodic [`TaskSnapshot`] refreshes, and
//! supports pause, resume and filtered deletion in bulk.

mod events;
mod jobs;
mod registry;
mod task;

pub use events::RegistryEvent;
pub use registry::{
    ActivityGauge, ActivityPermit, DEFAULT_MAX_ACTIVITY, DeleteFilter, TaskRegistry, TaskSelector,
};
pub use task::{JobFuture, TaskSnapshot, TaskStatus, TransferJob};
