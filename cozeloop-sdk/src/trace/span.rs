//! # Span
//!
//! `Span`s represent a single operation within a trace. `Span`s can be nested to form a trace
//! tree. Each trace contains a root span, which typically describes the end-to-end latency and,
//! optionally, one or more sub-spans for its sub-operations.
//!
//! A [`Span`] is a cheap, cloneable handle. The traced callee and the wrapper
//! that started it share the same underlying data; whichever ends the span
//! first hands it to the span processors, later calls to [`Span::end`] are
//! ignored.
use std::borrow::Cow;
use std::fmt::Display;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use cozeloop::loop_debug;
use cozeloop::trace::{SpanContext, SpanId, SpanType, Status};
use cozeloop::{Key, KeyValue, Value};
use serde::Serialize;

use crate::trace::Tracer;

const MODEL_PROVIDER: &str = "model_provider";
const MODEL_NAME: &str = "model_name";
const INPUT_TOKENS: &str = "input_tokens";
const OUTPUT_TOKENS: &str = "output_tokens";
const TOKENS: &str = "tokens";
const START_TIME_FIRST_RESP: &str = "start_time_first_resp";

/// Finished span as handed to span processors and exporters.
#[derive(Clone, Debug, PartialEq)]
pub struct SpanData {
    /// Exportable `SpanContext`
    pub span_context: SpanContext,
    /// Span parent id, `None` for root spans
    pub parent_span_id: Option<SpanId>,
    /// Span name
    pub name: Cow<'static, str>,
    /// Category of the span
    pub span_type: SpanType,
    /// Span start time
    pub start_time: SystemTime,
    /// Span end time
    pub end_time: SystemTime,
    /// Recorded input payload
    pub input: Option<serde_json::Value>,
    /// Recorded output payload
    pub output: Option<serde_json::Value>,
    /// Business tags
    pub tags: Vec<KeyValue>,
    /// Tags computed by the SDK
    pub system_tags: Vec<KeyValue>,
    /// Span status
    pub status: Status,
    /// Offload oversized payloads instead of truncating them
    pub ultra_large_report: bool,
    /// Service the span was recorded in
    pub service_name: Option<String>,
    /// Log id correlating the span with request logs
    pub log_id: Option<String>,
}

/// Single operation within a trace.
#[derive(Clone, Debug)]
pub struct Span {
    span_context: SpanContext,
    data: Option<Arc<Mutex<Option<SpanData>>>>,
    tracer: Tracer,
}

impl Span {
    pub(crate) fn new(span_context: SpanContext, data: Option<SpanData>, tracer: Tracer) -> Self {
        Span {
            span_context,
            data: data.map(|data| Arc::new(Mutex::new(Some(data)))),
            tracer,
        }
    }

    /// Operate on a mutable reference to span data
    fn with_data<T, F>(&self, f: F) -> Option<T>
    where
        F: FnOnce(&mut SpanData) -> T,
    {
        self.data
            .as_ref()
            .and_then(|data| data.lock().ok().and_then(|mut guard| guard.as_mut().map(f)))
    }

    /// Returns the `SpanContext` for the given `Span`.
    pub fn span_context(&self) -> &SpanContext {
        &self.span_context
    }

    /// Returns `true` while the span records data. Always `false` for
    /// suppressed spans and after [`Span::end`].
    pub fn is_recording(&self) -> bool {
        self.with_data(|_| ()).is_some()
    }

    /// Record `value` as the span input, replacing any earlier one.
    pub fn set_input<T: Serialize + ?Sized>(&self, value: &T) {
        if let Some(value) = to_json(value, "input") {
            self.with_data(|data| data.input = Some(value));
        }
    }

    /// Record `value` as the span output, replacing any earlier one.
    pub fn set_output<T: Serialize + ?Sized>(&self, value: &T) {
        if let Some(value) = to_json(value, "output") {
            self.with_data(|data| data.output = Some(value));
        }
    }

    /// Sets a single business tag, replacing an earlier tag with the same key.
    pub fn set_tag(&self, key: impl Into<Key>, value: impl Into<Value>) {
        let tag = KeyValue::new(key, value);
        self.with_data(|data| upsert(&mut data.tags, tag));
    }

    /// Sets several business tags.
    pub fn set_tags<I>(&self, tags: I)
    where
        I: IntoIterator<Item = KeyValue>,
    {
        self.with_data(|data| {
            for tag in tags {
                upsert(&mut data.tags, tag);
            }
        });
    }

    /// Sets a tag holding the JSON serialization of `value`.
    pub fn set_tag_json<T: Serialize + ?Sized>(&self, key: impl Into<Key>, value: &T) {
        let key = key.into();
        match serde_json::to_string(value) {
            Ok(json) => self.set_tag(key, json),
            Err(err) => {
                loop_debug!(name: "Span.TagNotSerializable", key = key.as_str(), reason = format!("{err}"));
            }
        }
    }

    /// Marks the span as failed with the error's message.
    pub fn set_error(&self, error: impl Display) {
        self.set_status(Status::error(error.to_string()));
    }

    /// Sets the status of this `Span`.
    pub fn set_status(&self, status: Status) {
        self.with_data(|data| data.status = status);
    }

    /// Tags the span with the end user it acts for.
    pub fn set_user_id(&self, user_id: impl Into<String>) {
        self.set_tag(cozeloop::baggage::USER_ID, Value::String(Cow::Owned(user_id.into())));
    }

    /// Tags the span with the chat message it handles.
    pub fn set_message_id(&self, message_id: impl Into<String>) {
        self.set_tag(cozeloop::baggage::MESSAGE_ID, Value::String(Cow::Owned(message_id.into())));
    }

    /// Tags the span with the conversation thread it belongs to.
    pub fn set_thread_id(&self, thread_id: impl Into<String>) {
        self.set_tag(cozeloop::baggage::THREAD_ID, Value::String(Cow::Owned(thread_id.into())));
    }

    /// Tags a model span with the vendor serving the model.
    pub fn set_model_provider(&self, provider: impl Into<String>) {
        self.set_tag(MODEL_PROVIDER, Value::String(Cow::Owned(provider.into())));
    }

    /// Tags a model span with the model name.
    pub fn set_model_name(&self, name: impl Into<String>) {
        self.set_tag(MODEL_NAME, Value::String(Cow::Owned(name.into())));
    }

    /// Records prompt tokens and updates the `tokens` total.
    pub fn set_input_tokens(&self, tokens: i64) {
        self.with_data(|data| {
            upsert(&mut data.tags, KeyValue::new(INPUT_TOKENS, tokens));
            update_total_tokens(data);
        });
    }

    /// Records completion tokens and updates the `tokens` total.
    pub fn set_output_tokens(&self, tokens: i64) {
        self.with_data(|data| {
            upsert(&mut data.tags, KeyValue::new(OUTPUT_TOKENS, tokens));
            update_total_tokens(data);
        });
    }

    /// Records when the first streamed response chunk arrived, in
    /// microseconds since the epoch.
    pub fn set_start_time_first_resp(&self, timestamp: SystemTime) {
        let micros = timestamp
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_micros() as i64)
            .unwrap_or(0);
        self.set_tag(START_TIME_FIRST_RESP, micros);
    }

    /// Overrides the provider's service name for this span.
    pub fn set_service_name(&self, service_name: impl Into<String>) {
        let service_name = service_name.into();
        self.with_data(|data| data.service_name = Some(service_name));
    }

    /// Correlates the span with a request log.
    pub fn set_log_id(&self, log_id: impl Into<String>) {
        let log_id = log_id.into();
        self.with_data(|data| data.log_id = Some(log_id));
    }

    /// Offload oversized payloads of this span instead of truncating them.
    pub fn set_ultra_large_report(&self, enabled: bool) {
        self.with_data(|data| data.ultra_large_report = enabled);
    }

    pub(crate) fn has_output(&self) -> bool {
        self.with_data(|data| data.output.is_some()).unwrap_or(false)
    }

    /// A copy of the data recorded so far, `None` once ended.
    pub fn exported_data(&self) -> Option<SpanData> {
        self.with_data(|data| data.clone())
    }

    /// Finishes the span now.
    pub fn end(&self) {
        self.ensure_ended_and_exported(None);
    }

    /// Finishes the span with given timestamp.
    pub fn end_with_timestamp(&self, timestamp: SystemTime) {
        self.ensure_ended_and_exported(Some(timestamp));
    }

    fn ensure_ended_and_exported(&self, timestamp: Option<SystemTime>) {
        let Some(inner) = &self.data else {
            return;
        };
        // Take data, skip if it has already been exported
        let data = match inner.lock().ok().and_then(|mut guard| guard.take()) {
            Some(data) => data,
            None => {
                loop_debug!(
                    name: "Span.AlreadyEnded",
                    span_id = format!("{}", self.span_context.span_id())
                );
                return;
            }
        };

        end_and_export_span(data, &self.tracer, timestamp);
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T, field: &'static str) -> Option<serde_json::Value> {
    match serde_json::to_value(value) {
        Ok(value) => Some(value),
        Err(err) => {
            loop_debug!(name: "Span.PayloadNotSerializable", field = field, reason = format!("{err}"));
            None
        }
    }
}

fn upsert(tags: &mut Vec<KeyValue>, tag: KeyValue) {
    match tags.iter_mut().find(|existing| existing.key == tag.key) {
        Some(existing) => existing.value = tag.value,
        None => tags.push(tag),
    }
}

fn tag_i64(tags: &[KeyValue], key: &str) -> i64 {
    tags.iter()
        .find(|tag| tag.key.as_str() == key)
        .and_then(|tag| match tag.value {
            Value::I64(v) => Some(v),
            _ => None,
        })
        .unwrap_or(0)
}

fn update_total_tokens(data: &mut SpanData) {
    let total = tag_i64(&data.tags, INPUT_TOKENS).saturating_add(tag_i64(&data.tags, OUTPUT_TOKENS));
    upsert(&mut data.tags, KeyValue::new(TOKENS, total));
}

fn end_and_export_span(mut data: SpanData, tracer: &Tracer, timestamp: Option<SystemTime>) {
    let provider = tracer.provider();
    // skip if provider has been shut down
    if provider.is_shutdown() {
        loop_debug!(
            name: "Span.DroppedAfterShutdown",
            span_id = format!("{}", data.span_context.span_id())
        );
        return;
    }

    data.end_time = timestamp.unwrap_or_else(SystemTime::now);

    match provider.span_processors() {
        [] => {}
        [processor] => processor.on_end(data),
        processors => {
            for processor in processors {
                processor.on_end(data.clone());
            }
        }
    }
}
