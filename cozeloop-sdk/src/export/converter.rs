//! Conversion of finished spans into the CozeLoop wire record.
//!
//! Besides mapping fields, the converter enforces the size policy of the
//! backend: tag keys and string values are truncated symmetrically, inline
//! files of model calls are replaced by storage keys, and oversized inputs
//! or outputs are either offloaded (ultra-large-report) or hard truncated.
//! Every truncated tag, input or output is listed in the `cut_off` system
//! tag.
use std::collections::BTreeSet;
use std::time::SystemTime;

use bytes::Bytes;
use cozeloop::loop_debug;
use cozeloop::trace::{Status, ROOT_SPAN_PARENT_ID};
use cozeloop::{KeyValue, Value};
use serde::Serialize;

use crate::export::model::{ObjectStorage, UploadFile, UploadSpan};
use crate::export::multimodal::extract_files;
use crate::trace::SpanData;
use crate::util::{prefix_chars, truncate_prefix, truncate_symmetric};

const RESERVED_KEYS: [&str; 5] = ["span_name", "span_type", "input", "output", "ultra_large_report"];

const ERROR_TAG: &str = "error";
const CUT_OFF_TAG: &str = "cut_off";
const RUNTIME_TAG: &str = "runtime";
const INPUT: &str = "input";
const OUTPUT: &str = "output";

/// Size limits applied while converting a span.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConverterLimits {
    /// Maximum tag key length in bytes.
    pub max_key_bytes: usize,
    /// Maximum string tag value length in bytes.
    pub max_value_bytes: usize,
    /// Maximum inline input or output length in bytes.
    pub max_text_bytes: usize,
    /// Characters of an offloaded input or output kept inline.
    pub inline_prefix_chars: usize,
}

impl Default for ConverterLimits {
    fn default() -> Self {
        ConverterLimits {
            max_key_bytes: 1024,
            max_value_bytes: 1024,
            max_text_bytes: 1024 * 1024,
            inline_prefix_chars: 1000,
        }
    }
}

/// Wire record of a span plus the payloads to upload before reporting it.
#[derive(Clone, Debug, PartialEq)]
pub struct ConvertedSpan {
    /// Record for the ingest endpoint.
    pub span: UploadSpan,
    /// Offloaded payloads referenced by `span`.
    pub files: Vec<UploadFile>,
}

#[derive(Serialize)]
struct Runtime<'a> {
    language: &'a str,
    library: &'a str,
    loop_sdk_version: &'a str,
    scene: &'a str,
}

/// Converts [`SpanData`] into [`UploadSpan`]s for one workspace.
#[derive(Clone, Debug)]
pub struct SpanConverter {
    workspace_id: String,
    limits: ConverterLimits,
}

impl SpanConverter {
    /// Creates a converter with the default limits.
    pub fn new(workspace_id: impl Into<String>) -> Self {
        SpanConverter {
            workspace_id: workspace_id.into(),
            limits: ConverterLimits::default(),
        }
    }

    /// Replaces the size limits.
    pub fn with_limits(mut self, limits: ConverterLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Converts one span.
    pub fn convert(&self, span: &SpanData) -> ConvertedSpan {
        let trace_id = span.span_context.trace_id().to_string();
        let span_id = span.span_context.span_id().to_string();
        let key_prefix = format!("{trace_id}_{span_id}");
        let ultra_large = span.ultra_large_report;

        let mut record = UploadSpan {
            started_at_micros: micros_since_epoch(span.start_time),
            log_id: span.log_id.clone().unwrap_or_default(),
            parent_id: span
                .parent_span_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| ROOT_SPAN_PARENT_ID.to_string()),
            duration_micros: span
                .end_time
                .duration_since(span.start_time)
                .map(|d| d.as_micros() as i64)
                .unwrap_or(0),
            service_name: span.service_name.clone().unwrap_or_default(),
            workspace_id: self.workspace_id.clone(),
            span_name: span.name.to_string(),
            span_type: span.span_type.as_str().to_string(),
            trace_id,
            span_id,
            ..Default::default()
        };

        let mut cut_off = BTreeSet::new();
        for tag in &span.tags {
            if RESERVED_KEYS.contains(&tag.key.as_str()) {
                loop_debug!(name: "SpanConverter.ReservedTagDropped", key = tag.key.as_str());
                continue;
            }
            self.bucket_tag(&mut record, tag, ultra_large, &mut cut_off);
        }

        if let Status::Error { message } = &span.status {
            record.status_code = 1;
            let message = self.truncate_value(ERROR_TAG, message, ultra_large, &mut cut_off);
            record.tags_string.insert(ERROR_TAG.to_string(), message);
        }

        let mut files = Vec::new();
        let mut storage = ObjectStorage::default();
        record.input = self.payload(
            INPUT,
            span.input.as_ref(),
            ultra_large,
            &key_prefix,
            &mut files,
            &mut storage,
            &mut cut_off,
        );
        record.output = self.payload(
            OUTPUT,
            span.output.as_ref(),
            ultra_large,
            &key_prefix,
            &mut files,
            &mut storage,
            &mut cut_off,
        );
        if !storage.is_empty() {
            record.object_storage = serde_json::to_string(&storage).unwrap_or_default();
        }

        for tag in &span.system_tags {
            bucket_system_tag(&mut record, tag);
        }
        let scene = if span.span_type.is_builtin() {
            span.span_type.as_str()
        } else {
            "custom"
        };
        let runtime = Runtime {
            language: "rust",
            library: "cozeloop",
            loop_sdk_version: env!("CARGO_PKG_VERSION"),
            scene,
        };
        record.system_tags_string.insert(
            RUNTIME_TAG.to_string(),
            serde_json::to_string(&runtime).unwrap_or_default(),
        );
        if !cut_off.is_empty() {
            let keys: Vec<&String> = cut_off.iter().collect();
            record.system_tags_string.insert(
                CUT_OFF_TAG.to_string(),
                serde_json::to_string(&keys).unwrap_or_default(),
            );
        }

        ConvertedSpan {
            span: record,
            files,
        }
    }

    fn truncate_value(
        &self,
        key: &str,
        value: &str,
        ultra_large: bool,
        cut_off: &mut BTreeSet<String>,
    ) -> String {
        if ultra_large {
            return value.to_string();
        }
        let truncated = truncate_symmetric(value, self.limits.max_value_bytes);
        if truncated.len() < value.len() {
            cut_off.insert(key.to_string());
        }
        truncated.into_owned()
    }

    fn bucket_tag(
        &self,
        record: &mut UploadSpan,
        tag: &KeyValue,
        ultra_large: bool,
        cut_off: &mut BTreeSet<String>,
    ) {
        let original = tag.key.as_str();
        let key = truncate_symmetric(original, self.limits.max_key_bytes).into_owned();
        if key.len() < original.len() {
            cut_off.insert(key.clone());
        }

        match &tag.value {
            Value::Bool(v) => {
                record.tags_bool.insert(key, *v);
            }
            Value::I64(v) => {
                record.tags_long.insert(key, *v);
            }
            Value::F64(v) => match as_integral(*v) {
                Some(v) => {
                    record.tags_long.insert(key, v);
                }
                None => {
                    record.tags_double.insert(key, *v);
                }
            },
            Value::String(v) => {
                let value = self.truncate_value(&key, v, ultra_large, cut_off);
                record.tags_string.insert(key, value);
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn payload(
        &self,
        field: &str,
        value: Option<&serde_json::Value>,
        ultra_large: bool,
        key_prefix: &str,
        files: &mut Vec<UploadFile>,
        storage: &mut ObjectStorage,
        cut_off: &mut BTreeSet<String>,
    ) -> String {
        let text = match value {
            None => return String::new(),
            Some(serde_json::Value::String(text)) => text.clone(),
            Some(value) => {
                let mut value = value.clone();
                extract_files(&mut value, field, key_prefix, files, &mut storage.attachments);
                value.to_string()
            }
        };

        if text.len() <= self.limits.max_text_bytes {
            return text;
        }

        if !ultra_large {
            cut_off.insert(field.to_string());
            return truncate_prefix(&text, self.limits.max_text_bytes).to_string();
        }

        let tos_key = format!("{key_prefix}_{field}_text_large_text");
        let inline = prefix_chars(&text, self.limits.inline_prefix_chars).to_string();
        if field == INPUT {
            storage.input_tos_key = Some(tos_key.clone());
        } else {
            storage.output_tos_key = Some(tos_key.clone());
        }
        files.push(UploadFile {
            tos_key,
            data: Bytes::from(text),
            content_type: "text/plain".to_string(),
        });
        inline
    }
}

fn bucket_system_tag(record: &mut UploadSpan, tag: &KeyValue) {
    let key = tag.key.as_str().to_string();
    match &tag.value {
        Value::Bool(v) => {
            record.system_tags_string.insert(key, v.to_string());
        }
        Value::I64(v) => {
            record.system_tags_long.insert(key, *v);
        }
        Value::F64(v) => {
            record.system_tags_double.insert(key, *v);
        }
        Value::String(v) => {
            record.system_tags_string.insert(key, v.to_string());
        }
    }
}

fn as_integral(v: f64) -> Option<i64> {
    // i64::MAX is not representable, so the upper bound is exclusive
    if v.is_finite() && v.fract() == 0.0 && v >= i64::MIN as f64 && v < i64::MAX as f64 {
        Some(v as i64)
    } else {
        None
    }
}

fn micros_since_epoch(time: SystemTime) -> i64 {
    time.duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cozeloop::trace::{SpanContext, SpanId, SpanType, TraceFlags, TraceId};
    use rstest::rstest;
    use serde_json::json;
    use std::borrow::Cow;
    use std::time::Duration;

    fn span_data() -> SpanData {
        let start = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        SpanData {
            span_context: SpanContext::new(
                TraceId::from(0x4bf9_2f35_77b3_4da6_a3ce_929d_0e0e_4736),
                SpanId::from(0x00f0_67aa_0ba9_02b7),
                TraceFlags::SAMPLED,
                false,
            ),
            parent_span_id: None,
            name: Cow::Borrowed("chat"),
            span_type: SpanType::Model,
            start_time: start,
            end_time: start + Duration::from_millis(1500),
            input: None,
            output: None,
            tags: Vec::new(),
            system_tags: Vec::new(),
            status: Status::Unset,
            ultra_large_report: false,
            service_name: Some("svc".into()),
            log_id: None,
        }
    }

    fn small_limits() -> ConverterLimits {
        ConverterLimits {
            max_key_bytes: 8,
            max_value_bytes: 8,
            max_text_bytes: 16,
            inline_prefix_chars: 4,
        }
    }

    #[test]
    fn identity_and_timing() {
        let converted = SpanConverter::new("ws").convert(&span_data());
        let span = converted.span;
        assert_eq!(span.trace_id, "4bf92f3577b34da6a3ce929d0e0e4736");
        assert_eq!(span.span_id, "00f067aa0ba902b7");
        assert_eq!(span.started_at_micros, 1_700_000_000_000_000);
        assert_eq!(span.duration_micros, 1_500_000);
        assert_eq!(span.workspace_id, "ws");
        assert_eq!(span.service_name, "svc");
        assert_eq!(span.span_type, "model");
        assert_eq!(span.status_code, 0);
        assert!(converted.files.is_empty());
    }

    #[test]
    fn root_span_reports_sentinel_parent() {
        let span = SpanConverter::new("ws").convert(&span_data()).span;
        assert_eq!(span.parent_id, ROOT_SPAN_PARENT_ID);

        let mut child = span_data();
        child.parent_span_id = Some(SpanId::from(0xab));
        let span = SpanConverter::new("ws").convert(&child).span;
        assert_eq!(span.parent_id, "00000000000000ab");
    }

    #[test]
    fn negative_duration_is_clamped() {
        let mut data = span_data();
        data.end_time = data.start_time - Duration::from_secs(3);
        let span = SpanConverter::new("ws").convert(&data).span;
        assert_eq!(span.duration_micros, 0);
    }

    #[rstest]
    #[case(KeyValue::new("flag", true), "tags_bool")]
    #[case(KeyValue::new("count", 3), "tags_long")]
    #[case(KeyValue::new("whole", 2.0), "tags_long")]
    #[case(KeyValue::new("ratio", 0.5), "tags_double")]
    #[case(KeyValue::new("huge", 1e300), "tags_double")]
    #[case(KeyValue::new("name", "x"), "tags_string")]
    fn tags_are_bucketed_by_type(#[case] tag: KeyValue, #[case] bucket: &str) {
        let mut data = span_data();
        let key = tag.key.to_string();
        data.tags.push(tag);
        let span = SpanConverter::new("ws").convert(&data).span;
        let json = serde_json::to_value(&span).unwrap();
        assert!(json[bucket].get(&key).is_some(), "{key} not in {bucket}");
    }

    #[test]
    fn reserved_keys_are_dropped() {
        let mut data = span_data();
        data.tags.push(KeyValue::new("input", "sneaky"));
        data.tags.push(KeyValue::new("span_type", "tool"));
        data.tags.push(KeyValue::new("kept", "yes"));
        let span = SpanConverter::new("ws").convert(&data).span;
        assert_eq!(span.tags_string.len(), 1);
        assert_eq!(span.tags_string["kept"], "yes");
        assert_eq!(span.input, "");
    }

    #[test]
    fn long_keys_and_values_are_cut_off() {
        let mut data = span_data();
        data.tags.push(KeyValue::new("a_very_long_key", "short"));
        data.tags.push(KeyValue::new("note", "0123456789abcdef"));
        let span = SpanConverter::new("ws")
            .with_limits(small_limits())
            .convert(&data)
            .span;

        assert_eq!(span.tags_string["a_ve_key"], "short");
        assert_eq!(span.tags_string["note"], "0123cdef");
        assert_eq!(
            span.system_tags_string[CUT_OFF_TAG],
            r#"["a_ve_key","note"]"#
        );
    }

    #[test]
    fn ultra_large_report_keeps_values() {
        let mut data = span_data();
        data.ultra_large_report = true;
        data.tags.push(KeyValue::new("note", "0123456789abcdef"));
        let span = SpanConverter::new("ws")
            .with_limits(small_limits())
            .convert(&data)
            .span;
        assert_eq!(span.tags_string["note"], "0123456789abcdef");
        assert!(!span.system_tags_string.contains_key(CUT_OFF_TAG));
    }

    #[test]
    fn error_status_sets_code_and_message() {
        let mut data = span_data();
        data.status = Status::error("boom");
        let span = SpanConverter::new("ws").convert(&data).span;
        assert_eq!(span.status_code, 1);
        assert_eq!(span.tags_string[ERROR_TAG], "boom");
    }

    #[rstest]
    #[case(SpanType::Model, "model")]
    #[case(SpanType::PromptHub, "prompt_hub")]
    #[case(SpanType::from("my_step"), "custom")]
    fn runtime_tag_describes_scene(#[case] span_type: SpanType, #[case] scene: &str) {
        let mut data = span_data();
        data.span_type = span_type;
        let span = SpanConverter::new("ws").convert(&data).span;
        let runtime: serde_json::Value =
            serde_json::from_str(&span.system_tags_string[RUNTIME_TAG]).unwrap();
        assert_eq!(runtime["language"], "rust");
        assert_eq!(runtime["library"], "cozeloop");
        assert_eq!(runtime["loop_sdk_version"], env!("CARGO_PKG_VERSION"));
        assert_eq!(runtime["scene"], scene);
    }

    #[test]
    fn system_tags_are_bucketed() {
        let mut data = span_data();
        data.system_tags.push(KeyValue::new("stream", true));
        data.system_tags.push(KeyValue::new("latency_first_resp", 120));
        let span = SpanConverter::new("ws").convert(&data).span;
        assert_eq!(span.system_tags_string["stream"], "true");
        assert_eq!(span.system_tags_long["latency_first_resp"], 120);
    }

    #[test]
    fn string_payloads_are_used_raw() {
        let mut data = span_data();
        data.input = Some(json!("plain question"));
        data.output = Some(json!({"answer": 42}));
        let span = SpanConverter::new("ws").convert(&data).span;
        assert_eq!(span.input, "plain question");
        assert_eq!(span.output, r#"{"answer":42}"#);
    }

    #[test]
    fn oversized_payload_is_truncated_without_ultra_large_report() {
        let mut data = span_data();
        data.input = Some(json!("é".repeat(20)));
        let converted = SpanConverter::new("ws")
            .with_limits(small_limits())
            .convert(&data);
        assert_eq!(converted.span.input, "é".repeat(8));
        assert!(converted.files.is_empty());
        assert_eq!(
            converted.span.system_tags_string[CUT_OFF_TAG],
            r#"["input"]"#
        );
    }

    #[test]
    fn oversized_payload_is_offloaded_with_ultra_large_report() {
        let mut data = span_data();
        data.ultra_large_report = true;
        let text = "0123456789".repeat(3);
        data.output = Some(json!(text.clone()));
        let converted = SpanConverter::new("ws")
            .with_limits(small_limits())
            .convert(&data);

        let key = "4bf92f3577b34da6a3ce929d0e0e4736_00f067aa0ba902b7_output_text_large_text";
        assert_eq!(converted.span.output, "0123");
        assert_eq!(converted.files.len(), 1);
        assert_eq!(converted.files[0].tos_key, key);
        assert_eq!(converted.files[0].data, Bytes::from(text));
        assert_eq!(
            converted.span.object_storage,
            format!(r#"{{"output_tos_key":"{key}"}}"#)
        );
    }

    #[test]
    fn multimodal_input_lists_attachments() {
        let mut data = span_data();
        data.input = Some(json!({
            "messages": [{
                "role": "user",
                "content": [{"type": "image_url", "image_url": {"url": "data:image/png;base64,aGVsbG8="}}]
            }]
        }));
        let converted = SpanConverter::new("ws").convert(&data);

        assert_eq!(converted.files.len(), 1);
        let key = &converted.files[0].tos_key;
        assert!(converted.span.input.contains(key.as_str()));
        assert!(!converted.span.input.contains("base64"));
        let storage: serde_json::Value =
            serde_json::from_str(&converted.span.object_storage).unwrap();
        assert_eq!(storage["attachments"][0]["tos_key"], json!(key));
        assert_eq!(storage["attachments"][0]["type"], "image");
        assert!(storage.get("input_tos_key").is_none());
    }

    #[test]
    fn conversion_is_deterministic() {
        let mut data = span_data();
        data.tags.push(KeyValue::new("a_very_long_key", "0123456789abcdef"));
        data.input = Some(json!({"q": "x".repeat(40)}));
        let converter = SpanConverter::new("ws").with_limits(small_limits());
        assert_eq!(converter.convert(&data), converter.convert(&data));
    }
}
