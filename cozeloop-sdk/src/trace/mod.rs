//! # CozeLoop Trace SDK
//!
//! The tracing SDK consists of a few main structs:
//!
//! * The [`TracerProvider`] owns the span processors and the tracing
//!   [`Config`], and creates [`Tracer`]s.
//! * The [`Tracer`] starts [`Span`]s as children of the span carried by a
//!   [`Context`](cozeloop::Context).
//! * [`Span`] handles record input, output, tags and status until they are
//!   ended and handed to the [`SpanProcessor`]s as [`SpanData`].
//! * The [`BatchSpanProcessor`] groups finished spans in a [`BatchQueue`]
//!   before handing them to a [`SpanExporter`](crate::export::SpanExporter).
mod batch_queue;
mod config;
mod id_generator;
mod provider;
mod span;
mod span_processor;
mod tracer;

#[cfg(any(test, feature = "testing"))]
mod in_memory_exporter;

pub use batch_queue::{BatchCallback, BatchQueue};
pub use config::Config;
#[cfg(any(test, feature = "testing"))]
pub use id_generator::IncrementIdGenerator;
pub use id_generator::{IdGenerator, RandomIdGenerator};
#[cfg(any(test, feature = "testing"))]
pub use in_memory_exporter::InMemorySpanExporter;
pub use provider::{TracerProvider, TracerProviderBuilder};
pub use span::{Span, SpanData};
pub use span_processor::{
    BatchConfig, BatchConfigBuilder, BatchSpanProcessor, BatchSpanProcessorBuilder,
    SimpleSpanProcessor, SpanProcessor, COZELOOP_TRACE_BATCH_SIZE,
    COZELOOP_TRACE_BATCH_SIZE_DEFAULT, COZELOOP_TRACE_SCHEDULE_DELAY,
    COZELOOP_TRACE_SCHEDULE_DELAY_DEFAULT,
};
pub use tracer::{SpanBuilder, Tracer};
