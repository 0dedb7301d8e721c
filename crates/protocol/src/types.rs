//! Shared data types for transfers.

use serde::{Deserialize, Serialize};

/// Remote coordinates of one object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectParams {
    pub bucket: String,
    pub region: String,
    pub key: String,
}

impl std::fmt::Display for ObjectParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{} ({})", self.bucket, self.key, self.region)
    }
}

/// One uploaded byte range of a multipart object.
///
/// `etag` is the backend-returned integrity tag, conventionally the
/// quoted hex MD5 of the part body. A part satisfies its slice only
/// when the tag equals the quoted form of the locally computed hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    /// 1-based part number; part `n` corresponds to slice `n`.
    pub part_number: u32,
    pub etag: String,
}

/// Per-task summary exported with every registry snapshot.
///
/// Upload tasks fill `bucket`/`region`; download tasks omit them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferSummary {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    pub file_name: String,
    pub size: u64,
    pub loaded: u64,
    pub speed: u64,
}
