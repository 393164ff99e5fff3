//! # CozeLoop Trace SDK
//!
//! This SDK records spans of LLM applications and reports them to CozeLoop.
//! It builds on the API types of the [`cozeloop`] crate:
//!
//! * [`trace`]: spans, tracers, the [`TracerProvider`](trace::TracerProvider)
//!   lifecycle object, span processors and the generic batch queue.
//! * [`traceable`]: runs a unit of work inside a span, capturing arguments,
//!   results, errors and panics.
//! * [`propagation`]: carries the trace context and baggage over HTTP headers.
//! * [`export`]: converts spans to the CozeLoop wire format, offloads large
//!   payloads and reports batches through an [`ApiClient`](cozeloop_http::ApiClient).
//! * [`config`] and [`global`]: client configuration with environment
//!   fallbacks and the process-wide tracer registry.
//!
//! # Getting started
//!
//! ```no_run
//! use cozeloop::Context;
//! use cozeloop_sdk::config::LoopConfig;
//! use cozeloop_sdk::global::TracerRegistry;
//! use cozeloop_sdk::traceable::TraceOptions;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = TracerRegistry::new();
//! registry.initialize(
//!     LoopConfig::builder()
//!         .with_workspace_id("7300000000000000000")
//!         .with_api_token("pat_xxx")
//!         .build()?,
//! )?;
//!
//! let reply = registry
//!     .tracer()
//!     .traceable(
//!         &Context::new(),
//!         TraceOptions::new("reply").with_type("model").with_user_id("u-1"),
//!         &"hello",
//!         |scope| async move {
//!             scope.span().set_model_name("doubao-pro");
//!             Ok::<_, std::io::Error>("hi there")
//!         },
//!     )
//!     .await?;
//! println!("{reply}");
//!
//! registry.shutdown().await?;
//! # Ok(())
//! # }
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
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

pub mod config;
pub mod error;
pub mod export;
pub mod global;
pub mod propagation;
pub mod retry;
#[cfg(any(test, feature = "testing"))]
#[doc(hidden)]
pub mod testing;
pub mod trace;
pub mod traceable;
mod util;
