//! Task states and the job abstraction the registry drives.

use std::future::Future;
use std::pin::Pin;

use serde::Serialize;
use stowage_protocol::{TransferError, TransferSummary};

/// Lifecycle of a registered task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Queued, waiting for an activity slot.
    Wait,
    /// Currently transferring.
    Run,
    /// Cancelled by the user; resumable.
    Pause,
    /// Finished successfully.
    Complete,
    /// Failed; resumable.
    Error,
}

pub type JobFuture<'a> = Pin<Box<dyn Future<Output = Result<(), TransferError>> + Send + 'a>>;

/// A runnable transfer the registry can schedule.
///
/// `start` must be safe to invoke again after it returned with a
/// cancellation or error; `stop` requests cooperative cancellation of
/// an in-flight `start`. A `stop` that races task startup must still
/// cancel the attempt being started, not the previous one.
pub trait TransferJob: Send + Sync {
    fn start(&self) -> JobFuture<'_>;
    fn stop(&self);
    fn summary(&self) -> TransferSummary;
}

/// Point-in-time view of one task, shaped for display.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSnapshot {
    pub id: u64,
    pub status: TaskStatus,
    /// Whether the task mutated since the previous snapshot.
    pub dirty: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub summary: TransferSummary,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&TaskStatus::Wait).unwrap();
        assert_eq!(json, "\"wait\"");
        let json = serde_json::to_string(&TaskStatus::Complete).unwrap();
        assert_eq!(json, "\"complete\"");
    }

    #[test]
    fn snapshot_flattens_summary_and_skips_empty_error() {
        let snapshot = TaskSnapshot {
            id: 3,
            status: TaskStatus::Run,
            dirty: true,
            error: None,
            summary: TransferSummary {
                key: "k".into(),
                bucket: None,
                region: None,
                file_name: "f".into(),
                size: 10,
                loaded: 4,
                speed: 0,
            },
        };
        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(value["id"], 3);
        assert_eq!(value["status"], "run");
        assert_eq!(value["fileName"], "f");
        assert!(value.get("error").is_none());
        assert!(value.get("bucket").is_none());
    }
}
