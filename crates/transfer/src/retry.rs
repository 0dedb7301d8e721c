//! Bounded retry for fallible backend calls.

use std::future::Future;

use stowage_protocol::{StoreFailure, TransferError};
use tracing::warn;

/// Default attempt bound.
pub const DEFAULT_ATTEMPTS: u32 = 3;

/// Re-invokes `op` up to [`DEFAULT_ATTEMPTS`] times.
pub async fn retry<T, F, Fut>(op: F) -> Result<T, TransferError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreFailure>>,
{
    retry_with(op, DEFAULT_ATTEMPTS).await
}

/// Re-invokes `op` up to `attempts` times, logging intermediate
/// failures and propagating the last normalized error on exhaustion.
///
/// A cancellation-tagged failure short-circuits the loop: a cancelled
/// operation is not transient and must not be re-issued.
pub async fn retry_with<T, F, Fut>(mut op: F, attempts: u32) -> Result<T, TransferError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreFailure>>,
{
    let attempts = attempts.max(1);
    let mut last = None;
    for attempt in 1..=attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(failure) => {
                let err = TransferError::from(failure);
                if err.is_cancelled() {
                    return Err(err);
                }
                if attempt < attempts {
                    warn!(attempt, error = %err, "backend call failed, retrying");
                }
                last = Some(err);
            }
        }
    }
    // attempts >= 1, so at least one iteration ran and stored an error.
    Err(last.unwrap())
}
