//! # Trace Provider
//!
//! The `TracerProvider` owns the span processors and the tracing
//! [`Config`]. It is the explicit lifecycle object of the SDK: build one at
//! startup, hand out [`Tracer`]s, and call [`TracerProvider::shutdown`]
//! before the process exits so batched spans are exported.
//!
//! ```
//! use cozeloop::Context;
//! use cozeloop_sdk::trace::TracerProvider;
//!
//! let provider = TracerProvider::builder()
//!     .with_service_name("checkout-service")
//!     .build();
//!
//! let tracer = provider.tracer();
//! tracer.start_with_context("checkout", &Context::new()).end();
//!
//! futures_executor::block_on(provider.shutdown()).unwrap();
//! ```
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cozeloop::loop_debug;
use futures_util::future::join_all;

use crate::error::{LoopSdkError, LoopSdkResult};
use crate::export::SpanExporter;
use crate::trace::{Config, IdGenerator, SimpleSpanProcessor, SpanProcessor, Tracer};

/// TracerProvider inner type
#[derive(Debug)]
pub(crate) struct TracerProviderInner {
    processors: Vec<Box<dyn SpanProcessor>>,
    config: Config,
    is_shutdown: AtomicBool,
}

impl Drop for TracerProviderInner {
    fn drop(&mut self) {
        if !self.is_shutdown.load(Ordering::Relaxed) {
            loop_debug!(
                name: "TracerProvider.Drop.NotShutdown",
                message = "TracerProvider dropped without shutdown; buffered spans are lost."
            );
        }
    }
}

/// Creator of [`Tracer`] instances and owner of the span processors.
///
/// Cloning a `TracerProvider` is cheap and shares the processors. Spans are
/// only guaranteed to reach the exporter after [`TracerProvider::force_flush`]
/// or [`TracerProvider::shutdown`] completed.
#[derive(Clone, Debug)]
pub struct TracerProvider {
    inner: Arc<TracerProviderInner>,
}

impl Default for TracerProvider {
    fn default() -> Self {
        TracerProvider::builder().build()
    }
}

impl TracerProvider {
    /// Create a new [`TracerProvider`] builder.
    pub fn builder() -> TracerProviderBuilder {
        TracerProviderBuilder::default()
    }

    /// Span processors associated with this provider
    pub(crate) fn span_processors(&self) -> &[Box<dyn SpanProcessor>] {
        &self.inner.processors
    }

    /// Config associated with this tracer
    pub(crate) fn config(&self) -> &Config {
        &self.inner.config
    }

    /// true if the provider has been shutdown
    /// Don't start span or export spans when provider is shutdown
    pub(crate) fn is_shutdown(&self) -> bool {
        self.inner.is_shutdown.load(Ordering::Relaxed)
    }

    /// Returns a tracer creating spans through this provider.
    pub fn tracer(&self) -> Tracer {
        Tracer::new(self.clone())
    }

    /// Export every buffered span now, without stopping the processors.
    pub async fn force_flush(&self) -> LoopSdkResult {
        let results = join_all(
            self.span_processors()
                .iter()
                .map(|processor| processor.force_flush()),
        )
        .await;
        collect_errors("Flush errors", results)
    }

    /// Flush and stop every span processor.
    ///
    /// Spans started afterwards are non-recording. A second call returns
    /// [`LoopSdkError::AlreadyShutdown`] and has no other effect.
    pub async fn shutdown(&self) -> LoopSdkResult {
        if self
            .inner
            .is_shutdown
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(LoopSdkError::AlreadyShutdown);
        }

        let results = join_all(
            self.span_processors()
                .iter()
                .map(|processor| processor.shutdown()),
        )
        .await;
        for err in results.iter().filter_map(|result| result.as_ref().err()) {
            loop_debug!(name: "TracerProvider.ShutdownError", error = format!("{err}"));
        }
        collect_errors("Shutdown errors", results)
    }

    /// Like [`TracerProvider::force_flush`], but gives up after `timeout`
    /// with [`LoopSdkError::Timeout`].
    pub async fn force_flush_with_timeout(&self, timeout: Duration) -> LoopSdkResult {
        tokio::time::timeout(timeout, self.force_flush())
            .await
            .unwrap_or(Err(LoopSdkError::Timeout(timeout)))
    }

    /// Like [`TracerProvider::shutdown`], but stops waiting for the
    /// processors after `timeout` and returns [`LoopSdkError::Timeout`].
    ///
    /// The provider counts as shut down either way; spans still buffered
    /// when the timeout fires are lost.
    pub async fn shutdown_with_timeout(&self, timeout: Duration) -> LoopSdkResult {
        match tokio::time::timeout(timeout, self.shutdown()).await {
            Ok(result) => result,
            Err(_) => {
                loop_debug!(name: "TracerProvider.ShutdownTimedOut", timeout = format!("{timeout:?}"));
                Err(LoopSdkError::Timeout(timeout))
            }
        }
    }
}

fn collect_errors(label: &str, results: Vec<LoopSdkResult>) -> LoopSdkResult {
    let errors: Vec<_> = results.into_iter().filter_map(Result::err).collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(LoopSdkError::InternalFailure(format!("{label}: {errors:?}")))
    }
}

/// Builder for provider attributes.
#[derive(Debug, Default)]
pub struct TracerProviderBuilder {
    processors: Vec<Box<dyn SpanProcessor>>,
    config: Config,
}

impl TracerProviderBuilder {
    /// Adds a [SimpleSpanProcessor] with the configured exporter to the pipeline.
    ///
    /// Every span is exported as soon as it ends. Meant for tests and
    /// debugging; use a [`BatchSpanProcessor`](crate::trace::BatchSpanProcessor)
    /// in production.
    pub fn with_simple_exporter<T: SpanExporter + 'static>(self, exporter: T) -> Self {
        let simple = SimpleSpanProcessor::new(exporter);
        self.with_span_processor(simple)
    }

    /// Adds a [`SpanProcessor`] to the pipeline.
    pub fn with_span_processor<T: SpanProcessor + 'static>(self, processor: T) -> Self {
        self.with_boxed_span_processor(Box::new(processor))
    }

    pub(crate) fn with_boxed_span_processor(mut self, processor: Box<dyn SpanProcessor>) -> Self {
        self.processors.push(processor);
        self
    }

    /// The sdk [`Config`] that this provider will use.
    pub fn with_config(self, config: Config) -> Self {
        TracerProviderBuilder { config, ..self }
    }

    /// The [`IdGenerator`] that this provider will use.
    pub fn with_id_generator<T: IdGenerator + 'static>(mut self, id_generator: T) -> Self {
        self.config.id_generator = Box::new(id_generator);
        self
    }

    /// Offload oversized payloads by default instead of truncating them.
    pub fn with_ultra_large_report(mut self, enabled: bool) -> Self {
        self.config.ultra_large_report = enabled;
        self
    }

    /// Default for capturing arguments of traced calls.
    pub fn with_record_inputs(mut self, enabled: bool) -> Self {
        self.config.record_inputs = enabled;
        self
    }

    /// Default for capturing results of traced calls.
    pub fn with_record_outputs(mut self, enabled: bool) -> Self {
        self.config.record_outputs = enabled;
        self
    }

    /// Service name attached to every span.
    pub fn with_service_name(mut self, service_name: impl Into<String>) -> Self {
        self.config.service_name = Some(service_name.into());
        self
    }

    /// Create a new provider from this configuration.
    pub fn build(self) -> TracerProvider {
        TracerProvider {
            inner: Arc::new(TracerProviderInner {
                processors: self.processors,
                config: self.config,
                is_shutdown: AtomicBool::new(false),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::{InMemorySpanExporter, SpanData};
    use cozeloop::Context;
    use futures_util::future::BoxFuture;
    use futures_util::FutureExt;
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug, Default)]
    struct CountingProcessor {
        flushes: Arc<AtomicUsize>,
        shutdowns: Arc<AtomicUsize>,
        fail: bool,
        stall: bool,
    }

    impl SpanProcessor for CountingProcessor {
        fn on_start(&self, _span: &mut crate::trace::Span, _cx: &Context) {}

        fn on_end(&self, _span: SpanData) {}

        fn force_flush(&self) -> BoxFuture<'_, LoopSdkResult> {
            self.flushes.fetch_add(1, Ordering::SeqCst);
            let (fail, stall) = (self.fail, self.stall);
            async move {
                if stall {
                    std::future::pending::<()>().await;
                }
                if fail {
                    Err(LoopSdkError::InternalFailure("flush failed".into()))
                } else {
                    Ok(())
                }
            }
            .boxed()
        }

        fn shutdown(&self) -> BoxFuture<'_, LoopSdkResult> {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
            let stall = self.stall;
            async move {
                if stall {
                    std::future::pending::<()>().await;
                }
                Ok(())
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let shutdowns = Arc::new(AtomicUsize::new(0));
        let provider = TracerProvider::builder()
            .with_span_processor(CountingProcessor {
                shutdowns: shutdowns.clone(),
                ..Default::default()
            })
            .build();

        assert!(provider.shutdown().await.is_ok());
        assert!(matches!(
            provider.shutdown().await,
            Err(LoopSdkError::AlreadyShutdown)
        ));
        assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn spans_after_shutdown_are_not_recorded() {
        let exporter = InMemorySpanExporter::default();
        let provider = TracerProvider::builder()
            .with_simple_exporter(exporter.clone())
            .build();
        let tracer = provider.tracer();
        let open = tracer.start_with_context("open", &Context::new());

        provider.shutdown().await.unwrap();

        let late = tracer.start_with_context("late", &Context::new());
        assert!(!late.is_recording());
        open.end();
        assert!(exporter.get_finished_spans().unwrap().is_empty());
    }

    #[tokio::test]
    async fn force_flush_aggregates_errors() {
        let flushes = Arc::new(AtomicUsize::new(0));
        let provider = TracerProvider::builder()
            .with_span_processor(CountingProcessor {
                flushes: flushes.clone(),
                ..Default::default()
            })
            .with_span_processor(CountingProcessor {
                flushes: flushes.clone(),
                fail: true,
                ..Default::default()
            })
            .build();

        let err = provider.force_flush().await.unwrap_err();
        assert!(err.to_string().contains("flush failed"));
        assert_eq!(flushes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_flush_times_out() {
        let provider = TracerProvider::builder()
            .with_span_processor(CountingProcessor {
                stall: true,
                ..Default::default()
            })
            .build();

        let timeout = Duration::from_secs(5);
        assert!(matches!(
            provider.force_flush_with_timeout(timeout).await,
            Err(LoopSdkError::Timeout(d)) if d == timeout
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_shutdown_times_out_and_stays_shut_down() {
        let shutdowns = Arc::new(AtomicUsize::new(0));
        let provider = TracerProvider::builder()
            .with_span_processor(CountingProcessor {
                shutdowns: shutdowns.clone(),
                stall: true,
                ..Default::default()
            })
            .build();

        assert!(matches!(
            provider.shutdown_with_timeout(Duration::from_secs(5)).await,
            Err(LoopSdkError::Timeout(_))
        ));
        assert!(matches!(
            provider.shutdown().await,
            Err(LoopSdkError::AlreadyShutdown)
        ));
        assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn flush_within_timeout_succeeds() {
        let provider = TracerProvider::builder()
            .with_span_processor(CountingProcessor::default())
            .build();
        provider
            .force_flush_with_timeout(Duration::from_secs(1))
            .await
            .unwrap();
    }
}
