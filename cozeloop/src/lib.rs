//! Implements the trace API of the CozeLoop observability platform.
//!
//! # Overview
//!
//! This crate holds the pieces of a CozeLoop trace that have to be shared
//! between a traced program, its libraries and the SDK that finally exports
//! the spans:
//!
//! - **Identity**: [`trace::TraceId`], [`trace::SpanId`], [`trace::TraceFlags`]
//!   and the [`trace::SpanContext`] that ties them together.
//! - **Context**: an immutable [`Context`] value carrying the active span,
//!   [`baggage::Baggage`] and the tracing suppression flag. Contexts are
//!   passed explicitly down the call chain, so independent call trees never
//!   see each other's parent spans.
//! - **Propagation**: the [`propagation::Injector`] / [`propagation::Extractor`]
//!   carrier abstractions and the [`propagation::TextMapPropagator`] trait.
//! - **Tags**: the primitive [`Value`] type stored on spans.
//! - **Diagnostics**: the [`global`] error handler and the internal
//!   `loop_*!` logging macros used by the SDK and exporters.
//!
//! The span implementation, exporters and batching live in `cozeloop-sdk`.
//!
//! # Example
//!
//! ```
//! use cozeloop::baggage::USER_ID;
//! use cozeloop::trace::{SpanContext, SpanId, TraceFlags, TraceId};
//! use cozeloop::Context;
//!
//! let parent = SpanContext::new(
//!     TraceId::from(0x4bf9_2f35_77b3_4da6_a3ce_929d_0e0e_4736),
//!     SpanId::from(0x00f0_67aa_0ba9_02b7),
//!     TraceFlags::SAMPLED,
//!     false,
//! );
//!
//! let cx = Context::new()
//!     .with_span_context(parent)
//!     .with_baggage_value(USER_ID, "u-1");
//!
//! assert!(cx.has_active_span());
//! assert_eq!(cx.baggage().get(USER_ID), Some("u-1"));
//! ```
#![warn(
    future_incompatible,
    missing_debug_implementations,
    missing_docs,
    nonstandard_style,
    rust_2018_idioms,
    unreachable_pub,
    unused
)]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

pub mod baggage;
mod common;
mod context;
pub mod global;
pub mod propagation;
pub mod trace;

pub use common::{Key, KeyValue, Value};
pub use context::Context;

#[doc(hidden)]
#[cfg(feature = "internal-logs")]
pub mod _private {
    pub use tracing::{debug, error, info, warn};
}
