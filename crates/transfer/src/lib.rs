//! Resumable multipart upload and single-stream download tasks.
//!
//! An [`UploadTask`] splits its source file into fixed-size slices,
//! hashes each slice, and pushes them through a bounded worker pool as
//! multipart parts, skipping parts the remote session already holds
//! with a matching integrity tag. A [`DownloadTask`] streams one object
//! into a temporary file and publishes it atomically. Both report
//! throttled aggregate progress and honor cooperative cancellation.
//!
//! The remote side is an injected
//! [`ObjectStore`](stowage_protocol::ObjectStore); this crate never
//! opens a connection itself.

mod body;
mod download;
mod progress;
mod retry;
mod slice;
#[cfg(test)]
pub(crate) mod testutil;
mod upload;

pub use body::{SliceReader, TempWriter};
pub use download::DownloadTask;
pub use progress::TransferProgress;
pub use retry::{DEFAULT_ATTEMPTS, retry, retry_with};
pub use slice::{Slice, SliceSequencer, slice_plan};
pub use stowage_protocol::TransferError;
pub use upload::{UploadOptions, UploadTask};

/// Default slice size: 1 MiB per part.
pub const DEFAULT_SLICE_SIZE: u64 = 1 << 20;

/// Default number of concurrent part uploads per task.
pub const DEFAULT_WORKER_WIDTH: usize = 2;
