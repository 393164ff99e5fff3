//! Trace exporters
//!
//! Finished spans leave the SDK through a [`SpanExporter`]. The
//! [`LoopSpanExporter`] converts them into the CozeLoop wire format with the
//! [`SpanConverter`], uploads offloaded payloads and reports the batch through
//! the [`TraceClient`].
use std::fmt::Debug;

use cozeloop::trace::TraceError;
use futures_util::future::BoxFuture;

use crate::trace::SpanData;

mod client;
mod converter;
mod exporter;
mod model;
mod multimodal;

pub use client::{TraceClient, TraceClientError, FILE_UPLOAD_PATH, TRACE_INGEST_PATH};
pub use converter::{ConvertedSpan, ConverterLimits, SpanConverter};
pub use exporter::LoopSpanExporter;
pub use model::{Attachment, ObjectStorage, UploadFile, UploadSpan};
pub use multimodal::{is_model_input, is_model_output};

/// Describes the result of an export.
pub type ExportResult = Result<(), TraceError>;

/// `SpanExporter` defines the interface that exporters must implement so
/// that they can be plugged into the SDK's span processors.
///
/// The returned futures are `'static` so processors can run them on a
/// background task.
pub trait SpanExporter: Send + Sync + Debug {
    /// Exports a batch of finished spans, in the order they were ended.
    ///
    /// Any retry logic that is required by the exporter is the responsibility
    /// of the exporter.
    fn export(&self, batch: Vec<SpanData>) -> BoxFuture<'static, ExportResult>;

    /// Completes work the exporter started for earlier batches, such as
    /// background uploads.
    fn force_flush(&self) -> BoxFuture<'static, ExportResult> {
        Box::pin(async { Ok(()) })
    }

    /// Shuts down the exporter. Called once when the SDK is shut down, after
    /// the last batch was exported.
    fn shutdown(&self) -> BoxFuture<'static, ExportResult> {
        Box::pin(async { Ok(()) })
    }
}
