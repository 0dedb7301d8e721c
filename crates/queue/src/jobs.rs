//! [`TransferJob`] adapters for the concrete transfer tasks.

use stowage_protocol::TransferSummary;
use stowage_transfer::{DownloadTask, UploadTask};

use crate::task::{JobFuture, TransferJob};

impl TransferJob for UploadTask {
    fn start(&self) -> JobFuture<'_> {
        Box::pin(UploadTask::start(self))
    }

    fn stop(&self) {
        UploadTask::stop(self);
    }

    fn summary(&self) -> TransferSummary {
        UploadTask::summary(self)
    }
}

impl TransferJob for DownloadTask {
    fn start(&self) -> JobFuture<'_> {
        Box::pin(DownloadTask::start(self))
    }

    fn stop(&self) {
        DownloadTask::stop(self);
    }

    fn summary(&self) -> TransferSummary {
        DownloadTask::summary(self)
    }
}
