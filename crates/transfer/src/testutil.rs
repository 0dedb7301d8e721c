//! In-memory `ObjectStore` mock with call counters and failure knobs.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use md5::{Digest, Md5};
use serde_json::json;
use stowage_protocol::{
    CompleteRequest, HeadObjectResponse, InitiateResponse, ListPartsRequest, ListPartsResponse,
    ObjectParams, ObjectSink, ObjectStore, Part, PutObjectRequest, StoreFailure, StoreFuture,
    UploadPartRequest, UploadPartResponse,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Semaphore;

pub fn quoted_md5(data: &[u8]) -> String {
    format!("\"{}\"", hex::encode(Md5::digest(data)))
}

pub fn params() -> ObjectParams {
    ObjectParams {
        bucket: "bucket".into(),
        region: "region".into(),
        key: "key".into(),
    }
}

pub struct MockStore {
    /// Parts pre-seeded into the listing (on top of anything uploaded
    /// through the mock itself).
    pub listed_parts: Mutex<Vec<Part>>,
    pub list_page_size: usize,
    /// Id handed out by `initiate_multipart`; `None` models a backend
    /// that acknowledges without a session id.
    pub issued_upload_id: Option<String>,
    /// Remaining `put_object` failures before success.
    pub put_failures: AtomicU32,
    /// Remaining `head_object` failures before success.
    pub head_failures: AtomicU32,
    pub head_size: u64,
    /// Body served by `get_object`.
    pub object_body: Vec<u8>,
    /// Cut the get stream with an error after this many bytes.
    pub get_fail_after: Option<usize>,
    /// When set, `get_object` pauses mid-stream until a permit arrives.
    pub get_gate: Option<Semaphore>,
    /// Tag returned for every uploaded part instead of the body hash.
    pub etag_override: Mutex<Option<String>>,
    /// When set, `upload_part` waits for a permit before reading its
    /// body.
    pub upload_gate: Option<Semaphore>,

    pub put_bodies: Mutex<Vec<Vec<u8>>>,
    pub uploaded: Mutex<HashMap<u32, Vec<u8>>>,
    pub completed: Mutex<Vec<(String, Vec<Part>)>>,

    pub put_calls: AtomicU32,
    pub init_calls: AtomicU32,
    pub list_calls: AtomicU32,
    pub upload_calls: AtomicU32,
    pub complete_calls: AtomicU32,
    pub head_calls: AtomicU32,
    pub get_calls: AtomicU32,
}

impl Default for MockStore {
    fn default() -> Self {
        Self {
            listed_parts: Mutex::new(Vec::new()),
            list_page_size: 1000,
            issued_upload_id: Some("session-1".into()),
            put_failures: AtomicU32::new(0),
            head_failures: AtomicU32::new(0),
            head_size: 0,
            object_body: Vec::new(),
            get_fail_after: None,
            get_gate: None,
            etag_override: Mutex::new(None),
            upload_gate: None,
            put_bodies: Mutex::new(Vec::new()),
            uploaded: Mutex::new(HashMap::new()),
            completed: Mutex::new(Vec::new()),
            put_calls: AtomicU32::new(0),
            init_calls: AtomicU32::new(0),
            list_calls: AtomicU32::new(0),
            upload_calls: AtomicU32::new(0),
            complete_calls: AtomicU32::new(0),
            head_calls: AtomicU32::new(0),
            get_calls: AtomicU32::new(0),
        }
    }
}

impl MockStore {
    /// Current remote view of the session: pre-seeded listing entries
    /// overlaid with everything uploaded so far.
    fn current_parts(&self) -> Vec<Part> {
        let mut map = BTreeMap::new();
        for part in self.listed_parts.lock().unwrap().iter() {
            map.insert(part.part_number, part.clone());
        }
        for (number, body) in self.uploaded.lock().unwrap().iter() {
            map.insert(
                *number,
                Part {
                    part_number: *number,
                    etag: quoted_md5(body),
                },
            );
        }
        map.into_values().collect()
    }
}

impl ObjectStore for MockStore {
    fn put_object(&self, req: PutObjectRequest) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.put_calls.fetch_add(1, Ordering::SeqCst);
            if self.put_failures.load(Ordering::SeqCst) > 0 {
                self.put_failures.fetch_sub(1, Ordering::SeqCst);
                return Err(StoreFailure::Payload(json!({"error": "put refused"})));
            }
            let mut body = req.body;
            let mut buf = Vec::new();
            body.read_to_end(&mut buf).await.map_err(StoreFailure::from)?;
            self.put_bodies.lock().unwrap().push(buf);
            Ok(())
        })
    }

    fn initiate_multipart(&self, _params: &ObjectParams) -> StoreFuture<'_, InitiateResponse> {
        Box::pin(async move {
            self.init_calls.fetch_add(1, Ordering::SeqCst);
            Ok(InitiateResponse {
                upload_id: self.issued_upload_id.clone(),
            })
        })
    }

    fn list_parts(&self, req: ListPartsRequest) -> StoreFuture<'_, ListPartsResponse> {
        Box::pin(async move {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            let after = req.part_number_marker.unwrap_or(0);
            let remaining: Vec<Part> = self
                .current_parts()
                .into_iter()
                .filter(|part| part.part_number > after)
                .collect();
            let page: Vec<Part> = remaining.iter().take(self.list_page_size).cloned().collect();
            let truncated = remaining.len() > page.len();
            let next_part_number_marker = page.last().map(|part| part.part_number);
            Ok(ListPartsResponse {
                parts: page,
                next_part_number_marker,
                truncated,
            })
        })
    }

    fn upload_part(&self, req: UploadPartRequest) -> StoreFuture<'_, UploadPartResponse> {
        Box::pin(async move {
            self.upload_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.upload_gate {
                gate.acquire().await.unwrap().forget();
            }
            let mut body = req.body;
            let mut buf = Vec::new();
            body.read_to_end(&mut buf).await.map_err(StoreFailure::from)?;
            let etag = self
                .etag_override
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(|| quoted_md5(&buf));
            self.uploaded.lock().unwrap().insert(req.part_number, buf);
            Ok(UploadPartResponse { etag })
        })
    }

    fn complete_multipart(&self, req: CompleteRequest) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.complete_calls.fetch_add(1, Ordering::SeqCst);
            self.completed
                .lock()
                .unwrap()
                .push((req.upload_id, req.parts));
            Ok(())
        })
    }

    fn head_object(&self, _params: &ObjectParams) -> StoreFuture<'_, HeadObjectResponse> {
        Box::pin(async move {
            self.head_calls.fetch_add(1, Ordering::SeqCst);
            if self.head_failures.load(Ordering::SeqCst) > 0 {
                self.head_failures.fetch_sub(1, Ordering::SeqCst);
                return Err(StoreFailure::Payload(json!({"error": "head failed"})));
            }
            Ok(HeadObjectResponse {
                content_length: self.head_size,
            })
        })
    }

    fn get_object(&self, _params: &ObjectParams, mut sink: ObjectSink) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.get_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(cut) = self.get_fail_after {
                sink.write_all(&self.object_body[..cut])
                    .await
                    .map_err(StoreFailure::from)?;
                return Err(StoreFailure::Payload(json!({"error": "stream reset"})));
            }
            if let Some(gate) = &self.get_gate {
                let half = self.object_body.len() / 2;
                sink.write_all(&self.object_body[..half])
                    .await
                    .map_err(StoreFailure::from)?;
                gate.acquire().await.unwrap().forget();
                sink.write_all(&self.object_body[half..])
                    .await
                    .map_err(StoreFailure::from)?;
            } else {
                sink.write_all(&self.object_body)
                    .await
                    .map_err(StoreFailure::from)?;
            }
            sink.shutdown().await.map_err(StoreFailure::from)?;
            Ok(())
        })
    }
}
