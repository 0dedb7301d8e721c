//! Abstract remote object store.
//!
//! `ObjectStore` is implemented by the embedding application on top of
//! whatever storage client it uses. Using a trait keeps the transfer
//! engine decoupled from the transport and testable with mocks.

use std::future::Future;
use std::pin::Pin;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::StoreFailure;
use crate::types::{ObjectParams, Part};

/// Streaming request body.
///
/// Bodies are built by the engine: they count transferred bytes into
/// the task's progress and abort the read when the task is cancelled,
/// so implementations just pump bytes until EOF or error.
pub type Body = Pin<Box<dyn AsyncRead + Send + 'static>>;

/// Streaming destination for [`ObjectStore::get_object`].
///
/// Implementations must write the full object body and `shutdown` the
/// sink before resolving, so the engine can atomically publish the
/// file afterwards.
pub type ObjectSink = Pin<Box<dyn AsyncWrite + Send + 'static>>;

/// Boxed future returned by store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreFailure>> + Send + 'a>>;

/// Single-request object write.
pub struct PutObjectRequest {
    pub params: ObjectParams,
    pub content_length: u64,
    pub body: Body,
}

/// Result of beginning a multipart session.
pub struct InitiateResponse {
    /// Session handle for subsequent part operations. The engine treats
    /// a missing or empty id as an error.
    pub upload_id: Option<String>,
}

/// One page of the existing-part listing for a resumed session.
pub struct ListPartsRequest {
    pub params: ObjectParams,
    pub upload_id: String,
    /// Continuation marker from the previous page, if any.
    pub part_number_marker: Option<u32>,
}

pub struct ListPartsResponse {
    pub parts: Vec<Part>,
    pub next_part_number_marker: Option<u32>,
    /// More pages follow when set.
    pub truncated: bool,
}

/// Upload of one part of a multipart session.
pub struct UploadPartRequest {
    pub params: ObjectParams,
    pub upload_id: String,
    /// 1-based part number.
    pub part_number: u32,
    pub content_length: u64,
    pub body: Body,
}

pub struct UploadPartResponse {
    /// Integrity tag for the uploaded part.
    pub etag: String,
}

/// Finalization call assembling the object from its parts.
pub struct CompleteRequest {
    pub params: ObjectParams,
    pub upload_id: String,
    /// All satisfied parts, in ascending part-number order.
    pub parts: Vec<Part>,
}

/// Result of a metadata probe.
pub struct HeadObjectResponse {
    pub content_length: u64,
}

/// Operation contract the engine drives.
///
/// All operations are asynchronous and may fail with an arbitrary
/// [`StoreFailure`] shape; the engine normalizes those into the
/// canonical error. Implementations must be safe to call from
/// concurrently running tasks.
pub trait ObjectStore: Send + Sync {
    /// Writes a whole object in one request. Must accept an empty body.
    fn put_object(&self, req: PutObjectRequest) -> StoreFuture<'_, ()>;

    /// Begins a new multipart session for the object.
    fn initiate_multipart(&self, params: &ObjectParams) -> StoreFuture<'_, InitiateResponse>;

    /// Lists parts already present in an existing session, one page at
    /// a time.
    fn list_parts(&self, req: ListPartsRequest) -> StoreFuture<'_, ListPartsResponse>;

    /// Uploads one part and returns its integrity tag.
    fn upload_part(&self, req: UploadPartRequest) -> StoreFuture<'_, UploadPartResponse>;

    /// Assembles the final object from uploaded parts.
    fn complete_multipart(&self, req: CompleteRequest) -> StoreFuture<'_, ()>;

    /// Metadata probe for the object's size.
    fn head_object(&self, params: &ObjectParams) -> StoreFuture<'_, HeadObjectResponse>;

    /// Streams the object body into `sink`.
    fn get_object(&self, params: &ObjectParams, sink: ObjectSink) -> StoreFuture<'_, ()>;
}
