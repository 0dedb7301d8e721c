//! Resumable multipart upload task.
//!
//! The pipeline, driven by [`UploadTask::start`]:
//!
//! 1. Session acquisition — reuse a supplied session id by paginating
//!    its existing-part listing, or open a fresh session.
//! 2. Bounded slice transfer — a fixed-width worker pool pulls from
//!    one shared [`SliceSequencer`].
//! 3. Instant skip — a slice whose recovered part already carries the
//!    quoted local hash is never re-transferred.
//! 4. Verification — the returned tag must match the local hash
//!    (strict mode fails the task, lenient mode logs and records).
//! 5. Finalization — assemble the object from the parts array.
//!
//! Files smaller than one slice take a single-request path instead.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::future::try_join_all;
use stowage_protocol::{
    CompleteRequest, ListPartsRequest, ObjectParams, ObjectStore, Part, PutObjectRequest,
    TransferError, TransferSummary, UploadPartRequest,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::body::SliceReader;
use crate::progress::TransferProgress;
use crate::retry::retry;
use crate::slice::{Slice, SliceSequencer, slice_plan};
use crate::{DEFAULT_SLICE_SIZE, DEFAULT_WORKER_WIDTH};

/// Construction options for an upload.
#[derive(Debug, Clone)]
pub struct UploadOptions {
    /// Bytes per part.
    pub slice_size: u64,
    /// Concurrent part uploads within this task.
    pub worker_width: usize,
    /// Fail the task on an integrity-tag mismatch. Lenient mode logs a
    /// warning and records the backend's tag instead.
    pub strict_verification: bool,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            slice_size: DEFAULT_SLICE_SIZE,
            worker_width: DEFAULT_WORKER_WIDTH,
            strict_verification: true,
        }
    }
}

pub struct UploadTask {
    store: Arc<dyn ObjectStore>,
    params: ObjectParams,
    path: PathBuf,
    file_size: u64,
    options: UploadOptions,
    upload_id: Mutex<Option<String>>,
    /// Parts keyed by part number: `parts[i]` holds part `i + 1`.
    parts: Mutex<Vec<Option<Part>>>,
    progress: Arc<TransferProgress>,
    /// Rearmed on every `start`; `stop` cancels the active one.
    cancel: Mutex<CancellationToken>,
    /// Latches a `stop` that races task startup, before the fresh
    /// token is armed.
    stop_requested: AtomicBool,
}

impl UploadTask {
    /// Stats the source file and builds the full slice plan. No network
    /// call happens here.
    ///
    /// `upload_id` resumes an existing multipart session; its parts are
    /// recovered from the backend when the task starts.
    pub async fn new(
        store: Arc<dyn ObjectStore>,
        path: impl Into<PathBuf>,
        params: ObjectParams,
        upload_id: Option<String>,
        options: UploadOptions,
    ) -> Result<Self, TransferError> {
        let path = path.into();
        let file_size = tokio::fs::metadata(&path).await?.len();
        let plan = slice_plan(file_size, options.slice_size);
        Ok(Self {
            store,
            params,
            path,
            file_size,
            options,
            upload_id: Mutex::new(upload_id),
            parts: Mutex::new(Vec::new()),
            progress: Arc::new(TransferProgress::new(&plan)),
            cancel: Mutex::new(CancellationToken::new()),
            stop_requested: AtomicBool::new(false),
        })
    }

    /// Runs the transfer to completion, cancellation, or error.
    ///
    /// Safe to call again after a cancellation or failure: recovered
    /// and already-uploaded parts are skipped via their tags.
    pub async fn start(&self) -> Result<(), TransferError> {
        let cancel = self.arm_cancel();
        let result = if self.file_size < self.options.slice_size {
            self.put_single(&cancel).await
        } else {
            self.run_multipart(&cancel).await
        };
        // A stop delivered to this attempt is spent.
        self.stop_requested.store(false, Ordering::SeqCst);
        result.map_err(|err| err.with_params(&self.params))
    }

    /// Requests cooperative cancellation. Takes effect on the in-flight
    /// `start`, or on the next one if none is armed yet.
    pub fn stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        self.cancel.lock().unwrap().cancel();
    }

    pub fn params(&self) -> &ObjectParams {
        &self.params
    }

    /// Session id of the current multipart attempt, if one is open.
    pub fn upload_id(&self) -> Option<String> {
        self.upload_id.lock().unwrap().clone()
    }

    pub fn summary(&self) -> TransferSummary {
        TransferSummary {
            key: self.params.key.clone(),
            bucket: Some(self.params.bucket.clone()),
            region: Some(self.params.region.clone()),
            file_name: self.path.display().to_string(),
            size: self.progress.total(),
            loaded: self.progress.loaded(),
            speed: self.progress.speed(),
        }
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

    /// Whole-body transfer for sub-threshold files.
    async fn put_single(&self, cancel: &CancellationToken) -> Result<(), TransferError> {
        if self.file_size == 0 {
            // An empty body is replayable, so this path gets retries.
            retry(|| {
                self.store.put_object(PutObjectRequest {
                    params: self.params.clone(),
                    content_length: 0,
                    body: Box::pin(tokio::io::empty()),
                })
            })
            .await?;
            self.progress.settle();
            return Ok(());
        }

        let body = SliceReader::open(
            &self.path,
            0,
            self.file_size,
            Arc::clone(&self.progress),
            1,
            cancel.clone(),
        )
        .await?;
        let result = self
            .store
            .put_object(PutObjectRequest {
                params: self.params.clone(),
                content_length: self.file_size,
                body: Box::pin(body),
            })
            .await;
        match result {
            Ok(()) => {
                self.progress.settle();
                Ok(())
            }
            Err(failure) => Err(if cancel.is_cancelled() {
                TransferError::Cancelled
            } else {
                failure.into()
            }),
        }
    }

    async fn run_multipart(&self, cancel: &CancellationToken) -> Result<(), TransferError> {
        let session = self.upload_id.lock().unwrap().clone();
        match session {
            Some(id) => self.recover_parts(&id).await?,
            None => self.open_session().await?,
        }
        // Post-listing checkpoint: a task stopped while it was only
        // listing must not start moving bytes.
        if cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }

        let sequencer = SliceSequencer::new(&self.path, self.file_size, self.options.slice_size);
        let workers =
            (0..self.options.worker_width.max(1)).map(|_| self.worker(&sequencer, cancel));
        try_join_all(workers).await?;
        self.progress.settle();

        self.complete_session().await
    }

    async fn open_session(&self) -> Result<(), TransferError> {
        let resp = retry(|| self.store.initiate_multipart(&self.params)).await?;
        let id = resp
            .upload_id
            .filter(|id| !id.is_empty())
            .ok_or(TransferError::MissingUploadId)?;
        debug!(upload_id = %id, key = %self.params.key, "multipart session created");
        *self.upload_id.lock().unwrap() = Some(id);
        Ok(())
    }

    /// Rebuilds the parts array of a resumed session by following the
    /// listing's continuation marker until exhausted.
    async fn recover_parts(&self, upload_id: &str) -> Result<(), TransferError> {
        let mut recovered: Vec<Option<Part>> = Vec::new();
        let mut marker = None;
        loop {
            let page = retry(|| {
                self.store.list_parts(ListPartsRequest {
                    params: self.params.clone(),
                    upload_id: upload_id.to_string(),
                    part_number_marker: marker,
                })
            })
            .await?;
            for part in page.parts {
                let Some(idx) = (part.part_number as usize).checked_sub(1) else {
                    continue;
                };
                if recovered.len() <= idx {
                    recovered.resize(idx + 1, None);
                }
                recovered[idx] = Some(part);
            }
            if !page.truncated {
                break;
            }
            marker = page.next_part_number_marker;
        }
        debug!(
            upload_id,
            parts = recovered.iter().flatten().count(),
            "recovered existing parts"
        );
        *self.parts.lock().unwrap() = recovered;
        Ok(())
    }

    /// One worker of the bounded pool: pulls slices from the shared
    /// sequencer until it is exhausted.
    async fn worker(
        &self,
        sequencer: &SliceSequencer,
        cancel: &CancellationToken,
    ) -> Result<(), TransferError> {
        while let Some(next) = sequencer.next().await {
            let slice = next?;
            if cancel.is_cancelled() {
                return Err(TransferError::Cancelled);
            }
            let expected = format!("\"{}\"", slice.hash);
            if self.satisfied(&slice, &expected) {
                debug!(index = slice.index, hash = %slice.hash, "instant skip");
                self.progress.complete_slice(slice.index);
                self.progress.tick();
                continue;
            }
            self.upload_slice(&slice, &expected, cancel).await?;
            if cancel.is_cancelled() {
                return Err(TransferError::Cancelled);
            }
        }
        Ok(())
    }

    fn satisfied(&self, slice: &Slice, expected: &str) -> bool {
        let parts = self.parts.lock().unwrap();
        matches!(
            parts.get(slice.index as usize - 1),
            Some(Some(part)) if part.etag == expected
        )
    }

    async fn upload_slice(
        &self,
        slice: &Slice,
        expected: &str,
        cancel: &CancellationToken,
    ) -> Result<(), TransferError> {
        let upload_id = self
            .upload_id
            .lock()
            .unwrap()
            .clone()
            .ok_or(TransferError::MissingUploadId)?;
        let body = SliceReader::open(
            &self.path,
            slice.offset,
            slice.len,
            Arc::clone(&self.progress),
            slice.index,
            cancel.clone(),
        )
        .await?;

        let resp = match self
            .store
            .upload_part(UploadPartRequest {
                params: self.params.clone(),
                upload_id,
                part_number: slice.index,
                content_length: slice.len,
                body: Box::pin(body),
            })
            .await
        {
            Ok(resp) => resp,
            Err(failure) => {
                return Err(if cancel.is_cancelled() {
                    TransferError::Cancelled
                } else {
                    failure.into()
                });
            }
        };

        if resp.etag != expected {
            let err = TransferError::TagMismatch {
                part_number: slice.index,
                expected: expected.to_string(),
                actual: resp.etag.clone(),
            };
            if self.options.strict_verification {
                return Err(err);
            }
            warn!(error = %err, "accepting mismatched part in lenient mode");
        }

        let mut parts = self.parts.lock().unwrap();
        let idx = slice.index as usize - 1;
        if parts.len() <= idx {
            parts.resize(idx + 1, None);
        }
        parts[idx] = Some(Part {
            part_number: slice.index,
            etag: resp.etag,
        });
        Ok(())
    }

    async fn complete_session(&self) -> Result<(), TransferError> {
        let upload_id = self
            .upload_id
            .lock()
            .unwrap()
            .clone()
            .ok_or(TransferError::MissingUploadId)?;
        let parts: Vec<Part> = self.parts.lock().unwrap().iter().flatten().cloned().collect();
        self.store
            .complete_multipart(CompleteRequest {
                params: self.params.clone(),
                upload_id,
                parts,
            })
            .await?;
        Ok(())
    }
}
