//! Canonical transfer error and backend failure normalization.

use serde_json::Value;

use crate::types::ObjectParams;

/// The canonical error every transfer surfaces.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    /// User-requested cooperative cancellation. Tasks failing with this
    /// sentinel settle to PAUSE, not ERROR.
    #[error("cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Normalized backend failure. The raw response document, when one
    /// exists, is retained for diagnostics.
    #[error("{message}")]
    Backend {
        message: String,
        payload: Option<Value>,
    },

    /// The backend acknowledged a multipart init without a session id.
    #[error("multipart init returned no upload id")]
    MissingUploadId,

    /// The uploaded part's integrity tag does not match the locally
    /// computed hash.
    #[error("part {part_number} integrity tag mismatch: expected {expected}, got {actual}")]
    TagMismatch {
        part_number: u32,
        expected: String,
        actual: String,
    },

    /// An error annotated with the request parameters it occurred under.
    #[error("{source} [{params}]")]
    Request {
        params: ObjectParams,
        source: Box<TransferError>,
    },
}

impl TransferError {
    /// Wraps the error with the parameters of the failing request.
    pub fn with_params(self, params: &ObjectParams) -> Self {
        Self::Request {
            params: params.clone(),
            source: Box::new(self),
        }
    }

    /// Whether this error (or the error it wraps) is the cancellation
    /// sentinel.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Request { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }
}

/// Failure shape handed back by an [`ObjectStore`](crate::ObjectStore)
/// operation.
///
/// Backends able to produce the canonical error return `Canonical`;
/// others hand over whatever response document the transport gave them
/// and let normalization extract a message from it.
#[derive(Debug)]
pub enum StoreFailure {
    Canonical(TransferError),
    Payload(Value),
}

impl From<std::io::Error> for StoreFailure {
    fn from(err: std::io::Error) -> Self {
        Self::Canonical(TransferError::Io(err))
    }
}

/// Normalization precedence, first match wins:
/// already-canonical passes through; a payload without an `error` field
/// becomes "unknown"; a string `error` field is the message; an object
/// `error` field contributes its string `message` when it has one.
impl From<StoreFailure> for TransferError {
    fn from(failure: StoreFailure) -> Self {
        match failure {
            StoreFailure::Canonical(err) => err,
            StoreFailure::Payload(payload) => {
                let message = match payload.get("error") {
                    None | Some(Value::Null) => "unknown".to_string(),
                    Some(Value::String(s)) => s.clone(),
                    Some(other) => match other.get("message").and_then(Value::as_str) {
                        Some(m) => m.to_string(),
                        None => "unknown".to_string(),
                    },
                };
                TransferError::Backend {
                    message,
                    payload: Some(payload),
                }
            }
        }
    }
}
