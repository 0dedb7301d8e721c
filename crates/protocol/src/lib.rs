//! Backend contract and shared types for the stowage transfer engine.
//!
//! The engine never talks to remote storage directly: it drives an
//! injected [`ObjectStore`] implementation through a fixed operation
//! contract (single put, multipart session lifecycle, metadata probe,
//! streaming get). This crate defines that contract, the shared data
//! types, and the canonical [`TransferError`] every backend failure is
//! normalized into.

pub mod error;
pub mod store;
pub mod types;

// Re-export primary types for convenience.
pub use error::{StoreFailure, TransferError};
pub use store::{
    Body, CompleteRequest, HeadObjectResponse, InitiateResponse, ListPartsRequest,
    ListPartsResponse, ObjectSink, ObjectStore, PutObjectRequest, StoreFuture, UploadPartRequest,
    UploadPartResponse,
};
pub use types::{ObjectParams, Part, TransferSummary};
