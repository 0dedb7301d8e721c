//! Single-stream download task.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use stowage_protocol::{ObjectParams, ObjectStore, TransferError, TransferSummary};
use tokio::fs::File;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::body::TempWriter;
use crate::progress::TransferProgress;
use crate::retry::retry;

/// Streams one object into `<dest>.tmp` and renames it into place on
/// success. Failure or cancellation removes the temporary file.
pub struct DownloadTask {
    store: Arc<dyn ObjectStore>,
    params: ObjectParams,
    dest: PathBuf,
    progress: Arc<TransferProgress>,
    cancel: Mutex<CancellationToken>,
    /// Latches a `stop` that races task startup, before the fresh
    /// token is armed.
    stop_requested: AtomicBool,
}

impl DownloadTask {
    /// Probes the object's size (with retries) so the plan and totals
    /// are known before the task ever runs.
    pub async fn new(
        store: Arc<dyn ObjectStore>,
        params: ObjectParams,
        dest: impl Into<PathBuf>,
    ) -> Result<Self, TransferError> {
        let head = retry(|| store.head_object(&params))
            .await
            .map_err(|err| err.with_params(&params))?;
        Ok(Self {
            store,
            params,
            dest: dest.into(),
            progress: Arc::new(TransferProgress::single(head.content_length)),
            cancel: Mutex::new(CancellationToken::new()),
            stop_requested: AtomicBool::new(false),
        })
    }

    pub async fn start(&self) -> Result<(), TransferError> {
        let cancel = self.arm_cancel();
        let tmp = temp_path(&self.dest);
        let result = self.run(&tmp, &cancel).await;
        // A stop delivered to this attempt is spent.
        self.stop_requested.store(false, Ordering::SeqCst);
        result.map_err(|err| err.with_params(&self.params))
    }

    /// Requests cooperative cancellation; the in-flight stream aborts
    /// at its next write. A stop arriving before the stream is armed
    /// cancels the next `start` instead.
    pub fn stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        self.cancel.lock().unwrap().cancel();
    }

    fn arm_cancel(&self) -> CancellationToken {
        let fresh = CancellationToken::new();
        *self.cancel.lock().unwrap() = fresh.clone();
        // A stop that raced startup cancelled the previous token; make
        // it land on this attempt instead of getting lost.
        if self.stop_requested.swap(false, Ordering::SeqCst) {
            fresh.cancel();
        }
        fresh
    }

    pub fn params(&self) -> &ObjectParams {
        &self.params
    }

    pub fn summary(&self) -> TransferSummary {
        TransferSummary {
            key: self.params.key.clone(),
            bucket: None,
            region: None,
            file_name: self.dest.display().to_string(),
            size: self.progress.total(),
            loaded: self.progress.loaded(),
            speed: self.progress.speed(),
        }
    }

    async fn run(&self, tmp: &Path, cancel: &CancellationToken) -> Result<(), TransferError> {
        let file = File::create(tmp).await?;
        let sink = TempWriter::new(file, Arc::clone(&self.progress), cancel.clone());

        match self.store.get_object(&self.params, Box::pin(sink)).await {
            Ok(()) => {
                self.progress.settle();
                tokio::fs::rename(tmp, &self.dest).await?;
                Ok(())
            }
            Err(failure) => {
                if let Err(err) = tokio::fs::remove_file(tmp).await {
                    warn!(error = %err, path = %tmp.display(), "failed to remove partial download");
                }
                Err(if cancel.is_cancelled() {
                    TransferError::Cancelled
                } else {
                    failure.into()
                })
            }
        }
    }
}

fn temp_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}
