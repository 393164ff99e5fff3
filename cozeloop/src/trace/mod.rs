//! Span identity, classification and status.
//!
//! The types here are shared by everything that touches a span: the SDK that
//! records it, the propagator that carries its [`SpanContext`] across process
//! boundaries and the exporter that reports it.
//!
//! A span with no parent is reported with [`ROOT_SPAN_PARENT_ID`] as its
//! parent id, never with an empty string.
use std::borrow::Cow;
use std::fmt;
use std::time;

use thiserror::Error;

mod ids;
mod span_context;

pub use ids::{SpanId, TraceFlags, TraceId};
pub use span_context::SpanContext;

/// Parent id reported for spans that start a new trace.
pub const ROOT_SPAN_PARENT_ID: &str = "0";

/// Category of the work a span describes.
///
/// The built-in kinds are understood by the CozeLoop backend and select the
/// "scene" a span is displayed under. Anything else is carried as
/// [`SpanType::Custom`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SpanType {
    /// A call to a language model.
    Model,
    /// Prompt formatting.
    Prompt,
    /// A prompt fetched from the prompt hub.
    PromptHub,
    /// Prompt template rendering.
    PromptTemplate,
    /// A tool invocation.
    Tool,
    /// A retrieval step.
    Retriever,
    /// An agent turn.
    Agent,
    /// A free-form category.
    Custom(Cow<'static, str>),
}

impl SpanType {
    /// Wire name of the span type.
    pub fn as_str(&self) -> &str {
        match self {
            SpanType::Model => "model",
            SpanType::Prompt => "prompt",
            SpanType::PromptHub => "prompt_hub",
            SpanType::PromptTemplate => "prompt_template",
            SpanType::Tool => "tool",
            SpanType::Retriever => "retriever",
            SpanType::Agent => "agent",
            SpanType::Custom(name) => name.as_ref(),
        }
    }

    /// Returns `true` for every variant except [`SpanType::Custom`].
    pub fn is_builtin(&self) -> bool {
        !matches!(self, SpanType::Custom(_))
    }
}

impl Default for SpanType {
    fn default() -> Self {
        SpanType::Custom(Cow::Borrowed("custom"))
    }
}

impl From<&'static str> for SpanType {
    fn from(name: &'static str) -> Self {
        SpanType::from(Cow::Borrowed(name))
    }
}

impl From<String> for SpanType {
    fn from(name: String) -> Self {
        SpanType::from(Cow::<'static, str>::Owned(name))
    }
}

impl From<Cow<'static, str>> for SpanType {
    fn from(name: Cow<'static, str>) -> Self {
        match name.as_ref() {
            "model" => SpanType::Model,
            "prompt" => SpanType::Prompt,
            "prompt_hub" => SpanType::PromptHub,
            "prompt_template" => SpanType::PromptTemplate,
            "tool" => SpanType::Tool,
            "retriever" => SpanType::Retriever,
            "agent" => SpanType::Agent,
            _ => SpanType::Custom(name),
        }
    }
}

impl fmt::Display for SpanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The outcome of the operation a span describes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum Status {
    /// The default status.
    #[default]
    Unset,

    /// The operation contains an error.
    Error {
        /// The description of the error
        message: Cow<'static, str>,
    },

    /// The operation has been validated to have completed successfully.
    Ok,
}

impl Status {
    /// Create a new error status with a given message.
    ///
    /// # Examples
    ///
    /// ```
    /// use cozeloop::trace::Status;
    ///
    /// // record error with `str` message
    /// let error_status = Status::error("boom");
    ///
    /// // or with `String` message
    /// let error_status = Status::error(format!("{} failed", "retrieval"));
    /// ```
    pub fn error(message: impl Into<Cow<'static, str>>) -> Self {
        Status::Error {
            message: message.into(),
        }
    }

    /// Returns `true` for [`Status::Error`].
    pub fn is_error(&self) -> bool {
        matches!(self, Status::Error { .. })
    }
}

/// Describe the result of operations in the trace export pipeline.
pub type TraceResult<T> = Result<T, TraceError>;

/// Marker trait for errors returned by exporters.
pub trait ExportError: std::error::Error + Send + Sync + 'static {
    /// The name of exporter that returned this error
    fn exporter_name(&self) -> &'static str;
}

/// Errors raised while exporting spans or their offloaded payloads.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TraceError {
    /// Export failed with the error returned by the exporter
    #[error("Exporter {} failed with {}", .0.exporter_name(), .0)]
    ExportFailed(Box<dyn ExportError>),

    /// An offloaded payload could not be uploaded.
    #[error("Upload of {key} failed: {reason}")]
    UploadFailed {
        /// Storage key of the payload
        key: String,
        /// Last failure reported by the uploader
        reason: String,
    },

    /// Export failed to finish after certain period and processor stopped the export.
    #[error("Exporting timed out after {} seconds", .0.as_secs())]
    ExportTimedOut(time::Duration),

    /// Other errors propagated from the trace SDK that weren't covered above
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync + 'static>),
}

impl<T> From<T> for TraceError
where
    T: ExportError,
{
    fn from(err: T) -> Self {
        TraceError::ExportFailed(Box::new(err))
    }
}

impl From<String> for TraceError {
    fn from(err_msg: String) -> Self {
        TraceError::Other(Box::new(Custom(err_msg)))
    }
}

impl From<&'static str> for TraceError {
    fn from(err_msg: &'static str) -> Self {
        TraceError::Other(Box::new(Custom(err_msg.into())))
    }
}

/// Wrap type for string
#[derive(Error, Debug)]
#[error("{0}")]
struct Custom(String);
