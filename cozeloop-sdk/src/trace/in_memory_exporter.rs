use crate::export::{ExportResult, SpanExporter};
use crate::trace::SpanData;
use cozeloop::trace::{TraceError, TraceResult};
use futures_util::future::BoxFuture;
use std::sync::{Arc, Mutex};

/// An in-memory span exporter that stores span data in memory.
///
/// This exporter is useful for testing and debugging purposes. It stores
/// span data in a `Vec<SpanData>`. Spans can be retrieved
/// using the `get_finished_spans` method.
///
/// # Example
/// ```
///# use cozeloop::Context;
///# use cozeloop_sdk::trace::{BatchSpanProcessor, InMemorySpanExporter, TracerProvider};
///# #[tokio::main(flavor = "current_thread")]
///# async fn main() {
///     let exporter = InMemorySpanExporter::default();
///     let processor = BatchSpanProcessor::builder(exporter.clone())
///         .build()
///         .unwrap();
///     let provider = TracerProvider::builder()
///         .with_span_processor(processor)
///         .build();
///
///     let span = provider.tracer().start_with_context("say hello", &Context::new());
///     span.set_tag("greeting", "hello");
///     span.end();
///
///     provider.force_flush().await.unwrap();
///     for span in exporter.get_finished_spans().unwrap() {
///         println!("{:?}", span)
///     }
///# }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemorySpanExporter {
    spans: Arc<Mutex<Vec<SpanData>>>,
}

impl InMemorySpanExporter {
    /// Returns the finished span as a vector of `SpanData`.
    ///
    /// # Errors
    ///
    /// Returns a `TraceError` if the internal lock cannot be acquired.
    pub fn get_finished_spans(&self) -> TraceResult<Vec<SpanData>> {
        self.spans
            .lock()
            .map(|spans_guard| spans_guard.iter().cloned().collect())
            .map_err(|err| TraceError::from(format!("Failed to lock spans: {err}")))
    }

    /// Clears the internal storage of finished spans.
    pub fn reset(&self) {
        let _ = self.spans.lock().map(|mut spans_guard| spans_guard.clear());
    }
}

impl SpanExporter for InMemorySpanExporter {
    fn export(&self, mut batch: Vec<SpanData>) -> BoxFuture<'static, ExportResult> {
        let result = self
            .spans
            .lock()
            .map(|mut spans_guard| spans_guard.append(&mut batch))
            .map_err(|err| TraceError::from(format!("Failed to lock spans: {err}")));
        Box::pin(std::future::ready(result))
    }
}
