//! Progress-counting body adapters handed to the backend.
//!
//! The engine owns progress accounting and cooperative abort: bodies
//! and sinks given to the [`ObjectStore`](stowage_protocol::ObjectStore)
//! wrap the underlying file and intercept every read/write, so the
//! backend just pumps bytes.

use std::io;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWrite, ReadBuf, SeekFrom, Take};
use tokio_util::sync::CancellationToken;

use crate::progress::TransferProgress;

fn cancelled() -> io::Error {
    io::Error::new(io::ErrorKind::Interrupted, "cancelled")
}

/// Reads one byte range of the source file, recording absolute
/// transferred counts into the task progress and failing the stream as
/// soon as the task is cancelled.
pub struct SliceReader {
    inner: Take<File>,
    progress: Arc<TransferProgress>,
    index: u32,
    cancel: CancellationToken,
    seen: u64,
}

impl SliceReader {
    pub async fn open(
        path: &Path,
        offset: u64,
        len: u64,
        progress: Arc<TransferProgress>,
        index: u32,
        cancel: CancellationToken,
    ) -> io::Result<Self> {
        let mut file = File::open(path).await?;
        if offset > 0 {
            file.seek(SeekFrom::Start(offset)).await?;
        }
        Ok(Self {
            inner: file.take(len),
            progress,
            index,
            cancel,
            seen: 0,
        })
    }
}

impl AsyncRead for SliceReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.cancel.is_cancelled() {
            return Poll::Ready(Err(cancelled()));
        }
        let before = buf.filled().len();
        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;
        let n = buf.filled().len() - before;
        if n > 0 {
            this.seen += n as u64;
            this.progress.record(this.index, this.seen);
            this.progress.tick();
        }
        Poll::Ready(Ok(()))
    }
}

/// Counts bytes the backend writes into the download's temporary file.
pub struct TempWriter {
    inner: File,
    progress: Arc<TransferProgress>,
    cancel: CancellationToken,
    written: u64,
}

impl TempWriter {
    pub fn new(inner: File, progress: Arc<TransferProgress>, cancel: CancellationToken) -> Self {
        Self {
            inner,
            progress,
            cancel,
            written: 0,
        }
    }
}

impl AsyncWrite for TempWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.cancel.is_cancelled() {
            return Poll::Ready(Err(cancelled()));
        }
        let n = ready!(Pin::new(&mut this.inner).poll_write(cx, buf))?;
        this.written += n as u64;
        this.progress.record(1, this.written);
        this.progress.tick();
        Poll::Ready(Ok(n))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
