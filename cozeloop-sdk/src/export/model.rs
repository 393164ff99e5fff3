//! Wire records sent to the CozeLoop trace ingest endpoint.
use std::collections::BTreeMap;

use bytes::Bytes;
use serde::Serialize;

/// One span as reported to the backend.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct UploadSpan {
    /// Start time in microseconds since the epoch.
    pub started_at_micros: i64,
    /// Log id correlating the span with request logs.
    pub log_id: String,
    /// 16 lowercase hex digits.
    pub span_id: String,
    /// Span id of the parent, or `"0"` for root spans.
    pub parent_id: String,
    /// 32 lowercase hex digits.
    pub trace_id: String,
    /// Never negative.
    pub duration_micros: i64,
    /// Service the span was recorded in.
    pub service_name: String,
    /// Workspace the span belongs to.
    pub workspace_id: String,
    /// Human readable name.
    pub span_name: String,
    /// Wire name of the span type.
    pub span_type: String,
    /// `0` on success, `1` on error.
    pub status_code: i32,
    /// Inline input, possibly truncated or rewritten.
    pub input: String,
    /// Inline output, possibly truncated or rewritten.
    pub output: String,
    /// JSON-encoded [`ObjectStorage`], empty when nothing was offloaded.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub object_storage: String,
    /// SDK computed string tags.
    pub system_tags_string: BTreeMap<String, String>,
    /// SDK computed integer tags.
    pub system_tags_long: BTreeMap<String, i64>,
    /// SDK computed float tags.
    pub system_tags_double: BTreeMap<String, f64>,
    /// Business string tags.
    pub tags_string: BTreeMap<String, String>,
    /// Business integer tags.
    pub tags_long: BTreeMap<String, i64>,
    /// Business float tags.
    pub tags_double: BTreeMap<String, f64>,
    /// Business boolean tags.
    pub tags_bool: BTreeMap<String, bool>,
}

/// Payload offloaded to object storage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadFile {
    /// Storage key, also used as file name.
    pub tos_key: String,
    /// Raw contents.
    pub data: Bytes,
    /// MIME type of `data`.
    pub content_type: String,
}

/// Offloaded parts of one span.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ObjectStorage {
    /// Key of the whole input when it was offloaded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_tos_key: Option<String>,
    /// Key of the whole output when it was offloaded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_tos_key: Option<String>,
    /// Files extracted from multimodal messages.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

impl ObjectStorage {
    /// Returns `true` when nothing was offloaded.
    pub fn is_empty(&self) -> bool {
        self.input_tos_key.is_none() && self.output_tos_key.is_none() && self.attachments.is_empty()
    }
}

/// A file extracted from a multimodal message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Attachment {
    /// `input` or `output`.
    pub field: String,
    /// Name the message gave the file, may be empty.
    pub name: String,
    /// `image` or `file`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Storage key the file was uploaded under.
    pub tos_key: String,
}
