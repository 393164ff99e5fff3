use std::sync::Arc;

use crate::baggage::Baggage;
use crate::trace::SpanContext;

/// An execution-scoped collection of values propagated through a call tree.
///
/// A `Context` holds the span that is currently active (the parent of any
/// span started with it), the [`Baggage`] inherited by descendants and a flag
/// that suppresses recording for a subtree.
///
/// Contexts are immutable. Every `with_*` method returns a derived context
/// and leaves the receiver untouched, so a context can be cloned into
/// concurrently running tasks without them observing each other's spans.
/// Cloning is cheap.
///
/// # Examples
///
/// ```
/// use cozeloop::Context;
///
/// let root = Context::new();
/// let child = root.with_baggage_value("thread_id", "t-1");
///
/// assert!(root.baggage().is_empty());
/// assert_eq!(child.baggage().get("thread_id"), Some("t-1"));
/// ```
#[derive(Clone, Debug, Default)]
pub struct Context {
    span: Option<Arc<SpanContext>>,
    baggage: Arc<Baggage>,
    tracing_suppressed: bool,
}

impl Context {
    /// Creates an empty `Context`: no active span, no baggage, recording on.
    pub fn new() -> Self {
        Context::default()
    }

    /// Returns a copy of this context with `span_context` as the active span.
    ///
    /// Invalid span contexts are ignored, so the derived context has the same
    /// parent as `self`.
    pub fn with_span_context(&self, span_context: SpanContext) -> Self {
        if !span_context.is_valid() {
            return self.clone();
        }
        Context {
            span: Some(Arc::new(span_context)),
            ..self.clone()
        }
    }

    /// The active span, if any.
    pub fn span_context(&self) -> Option<&SpanContext> {
        self.span.as_deref()
    }

    /// Returns `true` if a valid span is active in this context.
    pub fn has_active_span(&self) -> bool {
        self.span.is_some()
    }

    /// The baggage carried by this context.
    pub fn baggage(&self) -> &Baggage {
        &self.baggage
    }

    /// Returns a copy of this context carrying `baggage` instead of the
    /// current baggage.
    pub fn with_baggage(&self, baggage: Baggage) -> Self {
        Context {
            baggage: Arc::new(baggage),
            ..self.clone()
        }
    }

    /// Returns a copy of this context with one baggage entry added or
    /// replaced.
    pub fn with_baggage_value(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut baggage = Baggage::clone(&self.baggage);
        baggage.insert(key, value);
        self.with_baggage(baggage)
    }

    /// Returns a copy of this context with every entry of `entries` merged
    /// into the current baggage. Later entries win.
    pub fn with_baggage_values<I, K, V>(&self, entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut baggage = Baggage::clone(&self.baggage);
        baggage.extend(entries);
        self.with_baggage(baggage)
    }

    /// Returns a copy of this context where spans are created but not
    /// recorded (`true`) or recorded again (`false`).
    pub fn with_tracing_suppressed(&self, suppressed: bool) -> Self {
        Context {
            tracing_suppressed: suppressed,
            ..self.clone()
        }
    }

    /// Returns `true` if spans started from this context must not be
    /// recorded.
    pub fn is_tracing_suppressed(&self) -> bool {
        self.tracing_suppressed
    }
}
