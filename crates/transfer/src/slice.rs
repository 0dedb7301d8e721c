//! Fixed-size slice plan and the shared slice sequencer.

use std::path::{Path, PathBuf};

use md5::{Digest, Md5};
use stowage_protocol::TransferError;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};
use tokio::sync::Mutex;

/// Content-addressed descriptor for one byte range of the source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slice {
    /// 1-based, contiguous, gapless index. Slice `n` maps to part `n`.
    pub index: u32,
    /// Hex MD5 of the range, computed in one streaming pass at
    /// generation time.
    pub hash: String,
    pub offset: u64,
    pub len: u64,
}

/// Returns the per-slice byte lengths partitioning `[0, file_size)`.
///
/// Every slice but the last has length `slice_size`; the last carries
/// the remainder (or a full `slice_size` when the file size is an
/// exact multiple). A zero-size file yields one zero-length entry so
/// progress bookkeeping always has at least one row.
pub fn slice_plan(file_size: u64, slice_size: u64) -> Vec<u64> {
    let mut plan = Vec::new();
    let mut remaining = file_size;
    while remaining > slice_size {
        plan.push(slice_size);
        remaining -= slice_size;
    }
    plan.push(remaining);
    plan
}

/// Lazy, strictly sequential source of slice descriptors, shared by
/// all workers of one upload.
///
/// The cursor is guarded so exactly one worker claims the next range;
/// hashing then proceeds outside the guard, so two workers may hash
/// concurrently but indices are handed out in ascending order and each
/// descriptor is consumed by exactly one worker. The sequence is
/// finite, forward-only and not restartable — a restarted upload
/// builds a fresh sequencer.
pub struct SliceSequencer {
    path: PathBuf,
    file_size: u64,
    slice_size: u64,
    cursor: Mutex<Cursor>,
}

struct Cursor {
    next_index: u32,
    offset: u64,
}

impl SliceSequencer {
    pub fn new(path: impl Into<PathBuf>, file_size: u64, slice_size: u64) -> Self {
        Self {
            path: path.into(),
            file_size,
            slice_size,
            cursor: Mutex::new(Cursor {
                next_index: 1,
                offset: 0,
            }),
        }
    }

    /// Produces the next slice in order, or `None` when exhausted.
    pub async fn next(&self) -> Option<Result<Slice, TransferError>> {
        let (index, offset, len) = {
            let mut cursor = self.cursor.lock().await;
            if cursor.offset >= self.file_size {
                return None;
            }
            let offset = cursor.offset;
            let len = self.slice_size.min(self.file_size - offset);
            let index = cursor.next_index;
            cursor.next_index += 1;
            cursor.offset += len;
            (index, offset, len)
        };

        match hash_range(&self.path, offset, len).await {
            Ok(hash) => Some(Ok(Slice {
                index,
                hash,
                offset,
                len,
            })),
            Err(err) => Some(Err(TransferError::Io(err))),
        }
    }
}

/// Streams `len` bytes starting at `offset` through an MD5 digest.
async fn hash_range(path: &Path, offset: u64, len: u64) -> std::io::Result<String> {
    let mut file = File::open(path).await?;
    file.seek(SeekFrom::Start(offset)).await?;

    let mut hasher = Md5::new();
    let mut remaining = len;
    let mut buf = [0u8; 64 * 1024];
    while remaining > 0 {
        let want = buf.len().min(remaining as usize);
        let n = file.read(&mut buf[..want]).await?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("file truncated at offset {}", offset + len - remaining),
            ));
        }
        hasher.update(&buf[..n]);
        remaining -= n as u64;
    }
    Ok(hex::encode(hasher.finalize()))
}
