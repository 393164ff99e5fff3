//! # Span Processor
//!
//! Span processors observe span start and end. They are the hook where
//! finished spans are handed to exporters.
//!
//! ```ascii
//!   +-----+--------------+   +-----------------------+   +-------------------+
//!   |     |              |   |                       |   |                   |
//!   |     |              |   | BatchSpanProcessor    |   | LoopSpanExporter  |
//!   |     |              +---> SimpleSpanProcessor   +--->  (SpanExporter)   |
//!   |     |  Span::end() |   |                       |   |                   |
//!   |     |              |   +-----------------------+   +-------------------+
//!   |     |              |
//!   | SDK | Tracer::     |
//!   |     |  build_with_ |
//!   |     |  context()   |
//!   +-----+--------------+
//! ```
//!
//! Processors are registered on the [`TracerProvider`](crate::trace::TracerProvider)
//! and invoked in registration order. Only recording spans reach them.
use std::env;
use std::fmt::Debug;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cozeloop::trace::TraceError;
use cozeloop::{loop_debug, Context};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use crate::error::{LoopSdkError, LoopSdkResult};
use crate::export::SpanExporter;
use crate::trace::{BatchQueue, Span, SpanData};

/// Maximum number of spans in one export batch. Default 100.
pub const COZELOOP_TRACE_BATCH_SIZE: &str = "COZELOOP_TRACE_BATCH_SIZE";
/// Default maximum batch size.
pub const COZELOOP_TRACE_BATCH_SIZE_DEFAULT: usize = 100;
/// Delay in milliseconds before a partial batch is exported. Default 30000.
pub const COZELOOP_TRACE_SCHEDULE_DELAY: &str = "COZELOOP_TRACE_SCHEDULE_DELAY";
/// Default schedule delay in milliseconds.
pub const COZELOOP_TRACE_SCHEDULE_DELAY_DEFAULT: u64 = 30_000;

/// `SpanProcessor` is an interface which allows hooks for span start and end
/// method invocations.
pub trait SpanProcessor: Send + Sync + Debug {
    /// `on_start` is called when a `Span` is started. This method is called
    /// synchronously on the thread that started the span, therefore it should
    /// not block or throw exceptions.
    fn on_start(&self, span: &mut Span, cx: &Context);

    /// `on_end` is called after a `Span` is ended (i.e., the end timestamp is
    /// already set). This method is called synchronously within the `Span::end`
    /// API, therefore it should not block or throw an exception.
    fn on_end(&self, span: SpanData);

    /// Export all ended spans that have not yet been exported.
    fn force_flush(&self) -> BoxFuture<'_, LoopSdkResult>;

    /// Shuts down the processor. Called when SDK is shut down. This is an
    /// opportunity for processors to do any cleanup required.
    fn shutdown(&self) -> BoxFuture<'_, LoopSdkResult>;
}

fn export_failure(err: TraceError) -> LoopSdkError {
    LoopSdkError::InternalFailure(err.to_string())
}

/// A [SpanProcessor] that passes finished spans to the configured
/// `SpanExporter`, as soon as they are finished, without any batching.
///
/// The export future is driven to completion on the calling thread, so this
/// processor suits exporters that do not depend on a runtime, such as the
/// in-memory exporter used in tests. Use [BatchSpanProcessor] otherwise.
#[derive(Debug)]
pub struct SimpleSpanProcessor {
    exporter: Box<dyn SpanExporter>,
}

impl SimpleSpanProcessor {
    /// Create a new [SimpleSpanProcessor] using the provided exporter.
    pub fn new<E: SpanExporter + 'static>(exporter: E) -> Self {
        Self {
            exporter: Box::new(exporter),
        }
    }
}

impl SpanProcessor for SimpleSpanProcessor {
    fn on_start(&self, _span: &mut Span, _cx: &Context) {
        // Ignored
    }

    fn on_end(&self, span: SpanData) {
        if !span.span_context.is_sampled() {
            return;
        }

        if let Err(err) = futures_executor::block_on(self.exporter.export(vec![span])) {
            loop_debug!(name: "SimpleProcessor.OnEnd.Error", reason = format!("{err}"));
        }
    }

    fn force_flush(&self) -> BoxFuture<'_, LoopSdkResult> {
        self.exporter
            .force_flush()
            .map(|result| result.map_err(export_failure))
            .boxed()
    }

    fn shutdown(&self) -> BoxFuture<'_, LoopSdkResult> {
        self.exporter
            .shutdown()
            .map(|result| result.map_err(export_failure))
            .boxed()
    }
}

/// A [`SpanProcessor`] that groups finished spans in a [`BatchQueue`] and
/// exports a batch when it is full or when the schedule delay elapsed.
///
/// Export failures of background batches are reported by the exporter
/// through the global error handler; failures of batches exported by
/// [`SpanProcessor::force_flush`] or [`SpanProcessor::shutdown`] are also
/// returned to the caller.
#[derive(Debug)]
pub struct BatchSpanProcessor {
    queue: BatchQueue<SpanData, TraceError>,
    exporter: Arc<dyn SpanExporter>,
    is_shutdown: AtomicBool,
}

impl BatchSpanProcessor {
    /// Creates a new instance builder of [`BatchSpanProcessor`].
    pub fn builder<E: SpanExporter + 'static>(exporter: E) -> BatchSpanProcessorBuilder {
        BatchSpanProcessorBuilder {
            exporter: Arc::new(exporter),
            config: BatchConfig::default(),
        }
    }

    fn new(exporter: Arc<dyn SpanExporter>, config: BatchConfig) -> Result<Self, LoopSdkError> {
        let sink = Arc::clone(&exporter);
        let queue = BatchQueue::new(
            "BatchSpanProcessor",
            config.batch_size,
            config.schedule_delay,
            move |batch| sink.export(batch),
        )?;
        Ok(BatchSpanProcessor {
            queue,
            exporter,
            is_shutdown: AtomicBool::new(false),
        })
    }
}

impl SpanProcessor for BatchSpanProcessor {
    fn on_start(&self, _span: &mut Span, _cx: &Context) {
        // Ignored
    }

    fn on_end(&self, span: SpanData) {
        if self.is_shutdown.load(Ordering::Relaxed) {
            loop_debug!(
                name: "BatchSpanProcessor.SpanDroppedAfterShutdown",
                span_id = format!("{}", span.span_context.span_id())
            );
            return;
        }
        if !span.span_context.is_sampled() {
            return;
        }
        self.queue.enqueue(span);
    }

    fn force_flush(&self) -> BoxFuture<'_, LoopSdkResult> {
        async move {
            self.queue.flush().await.map_err(export_failure)?;
            self.exporter.force_flush().await.map_err(export_failure)
        }
        .boxed()
    }

    fn shutdown(&self) -> BoxFuture<'_, LoopSdkResult> {
        async move {
            if self
                .is_shutdown
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                return Err(LoopSdkError::AlreadyShutdown);
            }
            let drained = self.queue.destroy().await.map_err(export_failure);
            let stopped = self.exporter.shutdown().await.map_err(export_failure);
            drained.and(stopped)
        }
        .boxed()
    }
}

/// A builder for creating [`BatchSpanProcessor`] instances.
#[derive(Debug)]
pub struct BatchSpanProcessorBuilder {
    exporter: Arc<dyn SpanExporter>,
    config: BatchConfig,
}

impl BatchSpanProcessorBuilder {
    /// Set the BatchConfig for [BatchSpanProcessorBuilder]
    pub fn with_batch_config(self, config: BatchConfig) -> Self {
        BatchSpanProcessorBuilder { config, ..self }
    }

    /// Build a batch processor. Fails outside of a Tokio runtime.
    pub fn build(self) -> Result<BatchSpanProcessor, LoopSdkError> {
        BatchSpanProcessor::new(self.exporter, self.config)
    }
}

/// Batch span processor configuration.
/// Use [`BatchConfigBuilder`] to configure your own instance of [`BatchConfig`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchConfig {
    /// The maximum number of spans exported in one batch. Reaching it exports
    /// immediately.
    pub(crate) batch_size: usize,

    /// The delay after which a partial batch is exported.
    pub(crate) schedule_delay: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        BatchConfigBuilder::default().build()
    }
}

impl BatchConfig {
    /// The maximum number of spans exported in one batch.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// The delay after which a partial batch is exported.
    pub fn schedule_delay(&self) -> Duration {
        self.schedule_delay
    }
}

/// A builder for creating [`BatchConfig`] instances.
#[derive(Debug)]
pub struct BatchConfigBuilder {
    batch_size: usize,
    schedule_delay: Duration,
}

impl Default for BatchConfigBuilder {
    /// Create a new [`BatchConfigBuilder`] initialized with default batch config values as per the specs.
    /// The values are overridden by environment variables if set.
    /// The supported environment variables are:
    /// * `COZELOOP_TRACE_BATCH_SIZE`
    /// * `COZELOOP_TRACE_SCHEDULE_DELAY`
    fn default() -> Self {
        BatchConfigBuilder {
            batch_size: COZELOOP_TRACE_BATCH_SIZE_DEFAULT,
            schedule_delay: Duration::from_millis(COZELOOP_TRACE_SCHEDULE_DELAY_DEFAULT),
        }
        .init_from_env_vars()
    }
}

impl BatchConfigBuilder {
    /// Set the maximum number of spans exported in one batch. Zero is
    /// treated as one.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the delay after which a partial batch is exported.
    pub fn with_schedule_delay(mut self, schedule_delay: Duration) -> Self {
        self.schedule_delay = schedule_delay;
        self
    }

    /// Builds a `BatchConfig` enforcing the following invariants:
    /// * `batch_size` is at least one.
    pub fn build(self) -> BatchConfig {
        BatchConfig {
            batch_size: self.batch_size.max(1),
            schedule_delay: self.schedule_delay,
        }
    }

    fn init_from_env_vars(mut self) -> Self {
        if let Some(batch_size) = env::var(COZELOOP_TRACE_BATCH_SIZE)
            .ok()
            .and_then(|batch_size| usize::from_str(&batch_size).ok())
        {
            self.batch_size = batch_size;
        }

        if let Some(schedule_delay) = env::var(COZELOOP_TRACE_SCHEDULE_DELAY)
            .ok()
            .and_then(|delay| u64::from_str(&delay).ok())
        {
            self.schedule_delay = Duration::from_millis(schedule_delay);
        }

        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::ExportResult;
    use crate::trace::{InMemorySpanExporter, TracerProvider};
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_default_batch_config_adheres_to_specification() {
        let env_vars = vec![COZELOOP_TRACE_BATCH_SIZE, COZELOOP_TRACE_SCHEDULE_DELAY];
        let config = temp_env::with_vars_unset(env_vars, BatchConfig::default);

        assert_eq!(config.batch_size, COZELOOP_TRACE_BATCH_SIZE_DEFAULT);
        assert_eq!(
            config.schedule_delay,
            Duration::from_millis(COZELOOP_TRACE_SCHEDULE_DELAY_DEFAULT)
        );
    }

    #[test]
    fn test_batch_config_configurable_by_env_vars() {
        let env_vars = vec![
            (COZELOOP_TRACE_BATCH_SIZE, Some("20")),
            (COZELOOP_TRACE_SCHEDULE_DELAY, Some("2000")),
        ];
        let config = temp_env::with_vars(env_vars, BatchConfig::default);

        assert_eq!(config.batch_size, 20);
        assert_eq!(config.schedule_delay, Duration::from_millis(2000));
    }

    #[test]
    fn test_batch_config_invalid_env_vars_fall_back_to_defaults() {
        let env_vars = vec![
            (COZELOOP_TRACE_BATCH_SIZE, Some("many")),
            (COZELOOP_TRACE_SCHEDULE_DELAY, Some("-1")),
        ];
        let config = temp_env::with_vars(env_vars, BatchConfig::default);

        assert_eq!(config.batch_size, COZELOOP_TRACE_BATCH_SIZE_DEFAULT);
        assert_eq!(
            config.schedule_delay,
            Duration::from_millis(COZELOOP_TRACE_SCHEDULE_DELAY_DEFAULT)
        );
    }

    #[test]
    fn test_batch_config_builder_overrides_env() {
        let env_vars = vec![(COZELOOP_TRACE_BATCH_SIZE, Some("20"))];
        let config = temp_env::with_vars(env_vars, || {
            BatchConfigBuilder::default()
                .with_batch_size(0)
                .with_schedule_delay(Duration::from_millis(10))
                .build()
        });

        assert_eq!(config.batch_size(), 1);
        assert_eq!(config.schedule_delay(), Duration::from_millis(10));
    }

    fn batch_provider(batch_size: usize) -> (TracerProvider, InMemorySpanExporter) {
        let exporter = InMemorySpanExporter::default();
        let config = BatchConfigBuilder::default()
            .with_batch_size(batch_size)
            .with_schedule_delay(Duration::from_secs(30))
            .build();
        let processor = BatchSpanProcessor::builder(exporter.clone())
            .with_batch_config(config)
            .build()
            .unwrap();
        let provider = TracerProvider::builder()
            .with_span_processor(processor)
            .build();
        (provider, exporter)
    }

    #[tokio::test(start_paused = true)]
    async fn batch_processor_exports_on_flush() {
        let (provider, exporter) = batch_provider(10);
        let tracer = provider.tracer();
        tracer.start_with_context("a", &Context::new()).end();
        tracer.start_with_context("b", &Context::new()).end();
        assert!(exporter.get_finished_spans().unwrap().is_empty());

        provider.force_flush().await.unwrap();
        let names: Vec<_> = exporter
            .get_finished_spans()
            .unwrap()
            .into_iter()
            .map(|span| span.name)
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn batch_processor_exports_after_schedule_delay() {
        let (provider, exporter) = batch_provider(10);
        provider
            .tracer()
            .start_with_context("slow", &Context::new())
            .end();

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(exporter.get_finished_spans().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn batch_processor_drops_spans_after_shutdown() {
        let exporter = InMemorySpanExporter::default();
        let processor = BatchSpanProcessor::builder(exporter.clone()).build().unwrap();
        processor.shutdown().await.unwrap();
        assert!(matches!(
            processor.shutdown().await,
            Err(LoopSdkError::AlreadyShutdown)
        ));

        let provider = TracerProvider::builder().build();
        let span = provider.tracer().start_with_context("late", &Context::new());
        processor.on_end(span.exported_data().unwrap());
        assert!(exporter.get_finished_spans().unwrap().is_empty());
    }

    #[derive(Debug, Default)]
    struct FailingExporter {
        calls: Arc<AtomicUsize>,
    }

    impl SpanExporter for FailingExporter {
        fn export(&self, _batch: Vec<SpanData>) -> BoxFuture<'static, ExportResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            async { Err(TraceError::from("report rejected")) }.boxed()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn flush_surfaces_export_error() {
        let exporter = FailingExporter::default();
        let calls = exporter.calls.clone();
        let processor = BatchSpanProcessor::builder(exporter).build().unwrap();
        let provider = TracerProvider::builder()
            .with_span_processor(processor)
            .build();
        provider
            .tracer()
            .start_with_context("doomed", &Context::new())
            .end();

        let err = provider.force_flush().await.unwrap_err();
        assert!(err.to_string().contains("report rejected"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn builder_outside_runtime_fails() {
        let result = BatchSpanProcessor::builder(InMemorySpanExporter::default()).build();
        assert!(matches!(result, Err(LoopSdkError::RuntimeUnavailable(_))));
    }
}
