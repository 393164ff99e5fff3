//! # Tracer
//!
//! The `Tracer` creates spans. It never looks at ambient state: the parent of
//! a new span is whatever span context the caller's [`Context`] carries, so
//! concurrent call trees cannot pick up each other's parents.
use std::borrow::Cow;
use std::fmt;
use std::time::SystemTime;

use cozeloop::trace::{SpanContext, SpanType, Status, TraceFlags};
use cozeloop::{Context, KeyValue};

use crate::trace::provider::TracerProvider;
use crate::trace::span::{Span, SpanData};

/// Options of a span that is about to start.
#[derive(Clone, Debug, Default)]
pub struct SpanBuilder {
    /// Span name
    pub name: Cow<'static, str>,
    /// Category of the span
    pub span_type: SpanType,
    /// Initial business tags
    pub attributes: Option<Vec<KeyValue>>,
    /// Start time, `now` when unset
    pub start_time: Option<SystemTime>,
    /// Per-span override of the provider's ultra-large-report default
    pub ultra_large_report: Option<bool>,
}

impl SpanBuilder {
    /// Create a new span builder from a span name
    pub fn from_name<T: Into<Cow<'static, str>>>(name: T) -> Self {
        SpanBuilder {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Assign span type
    pub fn with_type(self, span_type: impl Into<SpanType>) -> Self {
        SpanBuilder {
            span_type: span_type.into(),
            ..self
        }
    }

    /// Assign span attributes
    pub fn with_attributes<I>(self, attributes: I) -> Self
    where
        I: IntoIterator<Item = KeyValue>,
    {
        SpanBuilder {
            attributes: Some(attributes.into_iter().collect()),
            ..self
        }
    }

    /// Assign span start time
    pub fn with_start_time<T: Into<SystemTime>>(self, start_time: T) -> Self {
        SpanBuilder {
            start_time: Some(start_time.into()),
            ..self
        }
    }

    /// Override whether oversized payloads of the span are offloaded
    pub fn with_ultra_large_report(self, enabled: bool) -> Self {
        SpanBuilder {
            ultra_large_report: Some(enabled),
            ..self
        }
    }
}

/// `Tracer` implementation to create and manage spans
#[derive(Clone)]
pub struct Tracer {
    provider: TracerProvider,
}

impl fmt::Debug for Tracer {
    /// Omitting `provider` here is necessary to avoid cycles.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracer").finish_non_exhaustive()
    }
}

impl Tracer {
    /// Create a new tracer (used internally by `TracerProvider`s).
    pub(crate) fn new(provider: TracerProvider) -> Self {
        Tracer { provider }
    }

    /// TracerProvider associated with this tracer.
    pub(crate) fn provider(&self) -> &TracerProvider {
        &self.provider
    }

    /// Starts a new span named `name` as a child of the span in `parent_cx`.
    pub fn start_with_context<T>(&self, name: T, parent_cx: &Context) -> Span
    where
        T: Into<Cow<'static, str>>,
    {
        self.build_with_context(SpanBuilder::from_name(name), parent_cx)
    }

    /// Starts a span from a [`SpanBuilder`].
    ///
    /// The span becomes a child of the span active in `parent_cx`, or the
    /// root of a new trace when there is none. Baggage of `parent_cx` is
    /// copied into the span's tags. When tracing is suppressed in
    /// `parent_cx` the span gets real ids, so descendants stay linked, but
    /// records nothing and never reaches the span processors.
    pub fn build_with_context(&self, mut builder: SpanBuilder, parent_cx: &Context) -> Span {
        let provider = self.provider();
        // no point start a span if the tracer provider has already being shutdown
        if provider.is_shutdown() {
            return Span::new(SpanContext::empty_context(), None, self.clone());
        }

        let config = provider.config();
        let span_id = config.id_generator.new_span_id();
        let parent = parent_cx.span_context();
        let trace_id = match parent {
            Some(parent) => parent.trace_id(),
            None => config.id_generator.new_trace_id(),
        };

        if parent_cx.is_tracing_suppressed() {
            let sc = SpanContext::new(trace_id, span_id, TraceFlags::NOT_SAMPLED, false);
            return Span::new(sc, None, self.clone());
        }

        let sc = SpanContext::new(trace_id, span_id, TraceFlags::SAMPLED, false);
        let mut tags = builder.attributes.take().unwrap_or_default();
        for (key, value) in parent_cx.baggage().iter() {
            if !tags.iter().any(|tag| tag.key.as_str() == key) {
                tags.push(KeyValue::new(key.to_string(), value.to_string()));
            }
        }

        let start_time = builder.start_time.unwrap_or_else(SystemTime::now);
        let data = SpanData {
            span_context: sc.clone(),
            parent_span_id: parent.map(|parent| parent.span_id()),
            name: builder.name,
            span_type: builder.span_type,
            start_time,
            end_time: start_time,
            input: None,
            output: None,
            tags,
            system_tags: Vec::new(),
            status: Status::Unset,
            ultra_large_report: builder
                .ultra_large_report
                .unwrap_or(config.ultra_large_report),
            service_name: config.service_name.clone(),
            log_id: None,
        };

        let mut span = Span::new(sc, Some(data), self.clone());
        for processor in provider.span_processors() {
            processor.on_start(&mut span, parent_cx);
        }
        span
    }
}
