//! # Traced execution
//!
//! [`Tracer::traceable`] runs a unit of work inside a new span that is a child
//! of the span active in the caller's [`Context`]. The work receives a
//! [`TraceScope`]: the live [`Span`] to tag and the derived [`Context`] to
//! hand to nested traced calls.
//!
//! The wrapper records the call's arguments as span input and its `Ok` value
//! as span output unless the work set its own, marks the span as failed on
//! `Err` or panic, and ends it when the work settles. Errors and panics reach
//! the caller unchanged.
//!
//! ```
//! use cozeloop::Context;
//! use cozeloop_sdk::trace::TracerProvider;
//! use cozeloop_sdk::traceable::TraceOptions;
//!
//! # futures_executor::block_on(async {
//! let provider = TracerProvider::builder().build();
//! let tracer = provider.tracer();
//!
//! let answer = tracer
//!     .traceable(
//!         &Context::new(),
//!         TraceOptions::new("answer").with_type("tool"),
//!         &("question", 7),
//!         |scope| async move {
//!             scope.span().set_tag("attempt", 1);
//!             Ok::<_, std::io::Error>(42)
//!         },
//!     )
//!     .await
//!     .unwrap();
//! assert_eq!(answer, 42);
//! # });
//! ```
use std::any::Any;
use std::borrow::Cow;
use std::fmt::Display;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};

use cozeloop::baggage::{MESSAGE_ID, THREAD_ID, USER_ID};
use cozeloop::trace::SpanType;
use cozeloop::{Context, KeyValue};
use futures_util::FutureExt;
use serde::Serialize;

use crate::trace::{Span, SpanBuilder, Tracer};

/// Options of one traced call.
#[derive(Clone, Debug)]
pub struct TraceOptions {
    /// Span name
    pub name: Cow<'static, str>,
    /// Category of the span
    pub span_type: SpanType,
    /// Initial business tags
    pub attributes: Vec<KeyValue>,
    /// End user, propagated as baggage to this span and its descendants
    pub user_id: Option<String>,
    /// Chat message, propagated as baggage
    pub message_id: Option<String>,
    /// Conversation thread, propagated as baggage
    pub thread_id: Option<String>,
    /// Overrides the provider's ultra-large-report default
    pub ultra_large_report: Option<bool>,
    /// Overrides the provider's `record_inputs` default
    pub record_inputs: Option<bool>,
    /// Overrides the provider's `record_outputs` default
    pub record_outputs: Option<bool>,
    /// `Some(true)` stops recording for this call and everything below it,
    /// `Some(false)` resumes recording under a disabled ancestor.
    pub disable_tracing: Option<bool>,
    /// End the span when the work settles. When `false` the work must end
    /// the span itself, for example after a response stream completes.
    pub end_when_done: bool,
}

impl Default for TraceOptions {
    fn default() -> Self {
        TraceOptions {
            name: Cow::Borrowed(""),
            span_type: SpanType::default(),
            attributes: Vec::new(),
            user_id: None,
            message_id: None,
            thread_id: None,
            ultra_large_report: None,
            record_inputs: None,
            record_outputs: None,
            disable_tracing: None,
            end_when_done: true,
        }
    }
}

impl TraceOptions {
    /// Options for a span named `name`.
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        TraceOptions {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Assign span type
    pub fn with_type(mut self, span_type: impl Into<SpanType>) -> Self {
        self.span_type = span_type.into();
        self
    }

    /// Assign initial tags
    pub fn with_attributes<I: IntoIterator<Item = KeyValue>>(mut self, attributes: I) -> Self {
        self.attributes = attributes.into_iter().collect();
        self
    }

    /// Propagate the end user id
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Propagate the message id
    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    /// Propagate the thread id
    pub fn with_thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    /// Override ultra-large-report for this span
    pub fn with_ultra_large_report(mut self, enabled: bool) -> Self {
        self.ultra_large_report = Some(enabled);
        self
    }

    /// Override input capture
    pub fn with_record_inputs(mut self, enabled: bool) -> Self {
        self.record_inputs = Some(enabled);
        self
    }

    /// Override output capture
    pub fn with_record_outputs(mut self, enabled: bool) -> Self {
        self.record_outputs = Some(enabled);
        self
    }

    /// Disable or re-enable recording for this subtree
    pub fn with_disable_tracing(mut self, disabled: bool) -> Self {
        self.disable_tracing = Some(disabled);
        self
    }

    /// Leave the span open when the work settles
    pub fn with_end_when_done(mut self, end_when_done: bool) -> Self {
        self.end_when_done = end_when_done;
        self
    }
}

/// What a traced call hands to its work.
#[derive(Clone, Debug)]
pub struct TraceScope {
    span: Span,
    context: Context,
}

impl TraceScope {
    /// The span of the call.
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Context to pass to nested traced calls. Its active span is
    /// [`TraceScope::span`].
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Splits the scope into its span and context.
    pub fn into_parts(self) -> (Span, Context) {
        (self.span, self.context)
    }
}

struct Finish {
    span: Span,
    record_outputs: bool,
    end_when_done: bool,
}

impl Finish {
    fn settle<T, E>(self, outcome: Result<Result<T, E>, Box<dyn Any + Send>>) -> Result<T, E>
    where
        T: Serialize,
        E: Display,
    {
        match outcome {
            Ok(Ok(value)) => {
                if self.record_outputs && !self.span.has_output() {
                    self.span.set_output(&value);
                }
                self.end();
                Ok(value)
            }
            Ok(Err(err)) => {
                self.span.set_error(&err);
                self.end();
                Err(err)
            }
            Err(payload) => {
                self.span.set_error(panic_message(payload.as_ref()));
                // Nobody can end the span once the work unwound.
                self.span.end();
                panic::resume_unwind(payload)
            }
        }
    }

    fn end(&self) {
        if self.end_when_done {
            self.span.end();
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "panic"
    }
}

impl Tracer {
    /// Runs `f` inside a new span that is a child of the span active in `cx`.
    ///
    /// `args` is recorded as the span input before `f` starts and the `Ok`
    /// value as its output, unless recording is disabled or `f` set its own
    /// value. `Err` marks the span as failed with the error's message and is
    /// returned unchanged, as is a panic.
    pub async fn traceable<A, F, Fut, T, E>(
        &self,
        cx: &Context,
        options: TraceOptions,
        args: &A,
        f: F,
    ) -> Result<T, E>
    where
        A: Serialize + ?Sized,
        F: FnOnce(TraceScope) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        T: Serialize,
        E: Display,
    {
        let (scope, finish) = self.start_traced(cx, options, args);
        let outcome = AssertUnwindSafe(async move { f(scope).await })
            .catch_unwind()
            .await;
        finish.settle(outcome)
    }

    /// The synchronous counterpart of [`Tracer::traceable`].
    pub fn traceable_sync<A, F, T, E>(
        &self,
        cx: &Context,
        options: TraceOptions,
        args: &A,
        f: F,
    ) -> Result<T, E>
    where
        A: Serialize + ?Sized,
        F: FnOnce(TraceScope) -> Result<T, E>,
        T: Serialize,
        E: Display,
    {
        let (scope, finish) = self.start_traced(cx, options, args);
        let outcome = panic::catch_unwind(AssertUnwindSafe(move || f(scope)));
        finish.settle(outcome)
    }

    fn start_traced<A: Serialize + ?Sized>(
        &self,
        cx: &Context,
        options: TraceOptions,
        args: &A,
    ) -> (TraceScope, Finish) {
        let baggage = [
            (USER_ID, options.user_id),
            (MESSAGE_ID, options.message_id),
            (THREAD_ID, options.thread_id),
        ];
        let mut parent_cx =
            cx.with_baggage_values(baggage.into_iter().filter_map(|(k, v)| v.map(|v| (k, v))));
        if let Some(disabled) = options.disable_tracing {
            parent_cx = parent_cx.with_tracing_suppressed(disabled);
        }

        let mut builder = SpanBuilder::from_name(options.name)
            .with_type(options.span_type)
            .with_attributes(options.attributes);
        if let Some(enabled) = options.ultra_large_report {
            builder = builder.with_ultra_large_report(enabled);
        }
        let span = self.build_with_context(builder, &parent_cx);

        let config = self.provider().config();
        if options.record_inputs.unwrap_or(config.record_inputs) {
            span.set_input(args);
        }

        let finish = Finish {
            span: span.clone(),
            record_outputs: options.record_outputs.unwrap_or(config.record_outputs),
            end_when_done: options.end_when_done,
        };
        let context = parent_cx.with_span_context(span.span_context().clone());
        (TraceScope { span, context }, finish)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::{InMemorySpanExporter, SpanData, TracerProvider};
    use cozeloop::trace::Status;
    use serde_json::json;

    fn setup() -> (TracerProvider, InMemorySpanExporter) {
        let exporter = InMemorySpanExporter::default();
        let provider = TracerProvider::builder()
            .with_simple_exporter(exporter.clone())
            .build();
        (provider, exporter)
    }

    fn finished(exporter: &InMemorySpanExporter, name: &str) -> SpanData {
        exporter
            .get_finished_spans()
            .unwrap()
            .into_iter()
            .find(|span| span.name == name)
            .unwrap()
    }

    #[tokio::test]
    async fn error_is_recorded_and_returned() {
        let (provider, exporter) = setup();
        let result: Result<(), String> = provider
            .tracer()
            .traceable(&Context::new(), TraceOptions::new("fails"), &(), |_| async {
                Err("boom".to_string())
            })
            .await;

        assert_eq!(result.unwrap_err(), "boom");
        assert_eq!(finished(&exporter, "fails").status, Status::error("boom"));
    }

    #[tokio::test]
    async fn custom_input_wins_over_arguments() {
        let (provider, exporter) = setup();
        provider
            .tracer()
            .traceable(
                &Context::new(),
                TraceOptions::new("chat"),
                &json!({"raw": "args"}),
                |scope| async move {
                    scope.span().set_input("custom");
                    Ok::<_, String>(())
                },
            )
            .await
            .unwrap();

        assert_eq!(finished(&exporter, "chat").input, Some(json!("custom")));
    }

    #[tokio::test]
    async fn arguments_and_result_are_captured() {
        let (provider, exporter) = setup();
        let value = provider
            .tracer()
            .traceable(&Context::new(), TraceOptions::new("add"), &[1, 2], |_| async {
                Ok::<_, String>(3)
            })
            .await
            .unwrap();

        assert_eq!(value, 3);
        let span = finished(&exporter, "add");
        assert_eq!(span.input, Some(json!([1, 2])));
        assert_eq!(span.output, Some(json!(3)));
    }

    #[tokio::test]
    async fn custom_output_wins_over_result() {
        let (provider, exporter) = setup();
        provider
            .tracer()
            .traceable(&Context::new(), TraceOptions::new("stream"), &(), |scope| async move {
                scope.span().set_output("assembled");
                Ok::<_, String>("first chunk")
            })
            .await
            .unwrap();

        assert_eq!(finished(&exporter, "stream").output, Some(json!("assembled")));
    }

    #[tokio::test]
    async fn recording_can_be_turned_off() {
        let exporter = InMemorySpanExporter::default();
        let provider = TracerProvider::builder()
            .with_simple_exporter(exporter.clone())
            .with_record_inputs(false)
            .build();

        provider
            .tracer()
            .traceable(
                &Context::new(),
                TraceOptions::new("quiet").with_record_outputs(false),
                &"secret",
                |_| async { Ok::<_, String>("secret") },
            )
            .await
            .unwrap();

        let span = finished(&exporter, "quiet");
        assert_eq!(span.input, None);
        assert_eq!(span.output, None);
    }

    #[tokio::test]
    async fn nested_calls_link_to_parent() {
        let (provider, exporter) = setup();
        let tracer = provider.tracer();
        tracer
            .traceable(&Context::new(), TraceOptions::new("outer"), &(), |scope| {
                let tracer = tracer.clone();
                async move {
                    tracer
                        .traceable(scope.context(), TraceOptions::new("inner"), &(), |_| async {
                            Ok::<_, String>(())
                        })
                        .await
                }
            })
            .await
            .unwrap();

        let outer = finished(&exporter, "outer");
        let inner = finished(&exporter, "inner");
        assert_eq!(outer.parent_span_id, None);
        assert_eq!(inner.parent_span_id, Some(outer.span_context.span_id()));
        assert_eq!(inner.span_context.trace_id(), outer.span_context.trace_id());
    }

    async fn traced_tree(tracer: Tracer, root: &'static str, child: &'static str) {
        tracer
            .traceable(&Context::new(), TraceOptions::new(root), &(), |scope| {
                let tracer = tracer.clone();
                async move {
                    tokio::task::yield_now().await;
                    tracer
                        .traceable(scope.context(), TraceOptions::new(child), &(), |_| async {
                            tokio::task::yield_now().await;
                            Ok::<_, String>(())
                        })
                        .await
                }
            })
            .await
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_trees_keep_their_own_parents() {
        let (provider, exporter) = setup();
        let first = tokio::spawn(traced_tree(provider.tracer(), "root_a", "child_a"));
        let second = tokio::spawn(traced_tree(provider.tracer(), "root_b", "child_b"));
        first.await.unwrap();
        second.await.unwrap();

        let (root_a, child_a) = (finished(&exporter, "root_a"), finished(&exporter, "child_a"));
        let (root_b, child_b) = (finished(&exporter, "root_b"), finished(&exporter, "child_b"));
        assert_eq!(child_a.parent_span_id, Some(root_a.span_context.span_id()));
        assert_eq!(child_b.parent_span_id, Some(root_b.span_context.span_id()));
        assert_eq!(child_a.span_context.trace_id(), root_a.span_context.trace_id());
        assert_eq!(child_b.span_context.trace_id(), root_b.span_context.trace_id());
        assert_ne!(root_a.span_context.trace_id(), root_b.span_context.trace_id());
    }

    #[tokio::test]
    async fn baggage_ids_reach_descendants() {
        let (provider, exporter) = setup();
        let tracer = provider.tracer();
        tracer
            .traceable(
                &Context::new(),
                TraceOptions::new("turn").with_user_id("u-1").with_thread_id("t-9"),
                &(),
                |scope| {
                    let tracer = tracer.clone();
                    async move {
                        assert_eq!(scope.context().baggage().get(USER_ID), Some("u-1"));
                        tracer
                            .traceable(scope.context(), TraceOptions::new("tool"), &(), |_| async {
                                Ok::<_, String>(())
                            })
                            .await
                    }
                },
            )
            .await
            .unwrap();

        for name in ["turn", "tool"] {
            let span = finished(&exporter, name);
            assert!(span
                .tags
                .iter()
                .any(|tag| tag.key.as_str() == USER_ID && tag.value.as_str() == "u-1"));
            assert!(span
                .tags
                .iter()
                .any(|tag| tag.key.as_str() == THREAD_ID && tag.value.as_str() == "t-9"));
        }
    }

    #[tokio::test]
    async fn disabled_subtree_is_not_exported_but_stays_linked() {
        let (provider, exporter) = setup();
        let tracer = provider.tracer();
        let mut hidden_id = None;
        tracer
            .traceable(
                &Context::new(),
                TraceOptions::new("hidden").with_disable_tracing(true),
                &(),
                |scope| {
                    assert!(!scope.span().is_recording());
                    hidden_id = Some(scope.span().span_context().span_id());
                    let tracer = tracer.clone();
                    async move {
                        tracer
                            .traceable(
                                scope.context(),
                                TraceOptions::new("visible").with_disable_tracing(false),
                                &(),
                                |_| async { Ok::<_, String>(()) },
                            )
                            .await
                    }
                },
            )
            .await
            .unwrap();

        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].name, "visible");
        assert_eq!(spans[0].parent_span_id, hidden_id);
        assert!(hidden_id.is_some());
    }

    #[tokio::test]
    async fn span_left_open_when_not_ending() {
        let (provider, exporter) = setup();
        let mut open = None;
        provider
            .tracer()
            .traceable(
                &Context::new(),
                TraceOptions::new("stream").with_end_when_done(false),
                &(),
                |scope| {
                    open = Some(scope.span().clone());
                    async { Ok::<_, String>(()) }
                },
            )
            .await
            .unwrap();

        assert!(exporter.get_finished_spans().unwrap().is_empty());
        let span = open.unwrap();
        assert!(span.is_recording());
        span.end();
        assert_eq!(exporter.get_finished_spans().unwrap().len(), 1);
    }

    #[test]
    fn sync_work_is_traced() {
        let (provider, exporter) = setup();
        let result: Result<i32, String> = provider.tracer().traceable_sync(
            &Context::new(),
            TraceOptions::new("sync").with_type("tool"),
            &"in",
            |scope| {
                scope.span().set_tag("k", "v");
                Err("boom".to_string())
            },
        );

        assert_eq!(result, Err("boom".to_string()));
        let span = finished(&exporter, "sync");
        assert_eq!(span.span_type, SpanType::Tool);
        assert_eq!(span.input, Some(json!("in")));
        assert_eq!(span.status, Status::error("boom"));
    }

    #[test]
    fn panic_ends_span_and_unwinds() {
        let (provider, exporter) = setup();
        let tracer = provider.tracer();
        let unwound = panic::catch_unwind(AssertUnwindSafe(|| {
            let _: Result<(), String> =
                tracer.traceable_sync(&Context::new(), TraceOptions::new("crash"), &(), |_| {
                    panic!("kaboom")
                });
        }));

        assert!(unwound.is_err());
        assert_eq!(finished(&exporter, "crash").status, Status::error("kaboom"));
    }
}
