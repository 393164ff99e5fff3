//! Errors returned by lifecycle operations of the SDK.
use std::time::Duration;

/// Errors returned by flush and shutdown operations and by components that
/// need a Tokio runtime.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum LoopSdkError {
    /// Shutdown has already been invoked.
    ///
    /// While shutdown is idempotent and calling it multiple times has no
    /// impact, this error suggests that another part of the application is
    /// invoking `shutdown` earlier than intended. Users should review their
    /// code to identify unintended or duplicate shutdown calls and ensure it
    /// is only triggered once at the correct place.
    #[error("Shutdown already invoked")]
    AlreadyShutdown,

    /// Operation timed out before completing.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// The component was created outside of a Tokio runtime.
    ///
    /// Batching and uploads run as Tokio tasks, so processors and exporters
    /// must be built from within a runtime.
    #[error("No Tokio runtime is available: {0}")]
    RuntimeUnavailable(String),

    /// Operation failed due to an internal error.
    ///
    /// The error message is intended for logging purposes only and should not
    /// be used to make programmatic decisions.
    #[error("Operation failed: {0}")]
    InternalFailure(String),
}

impl From<tokio::runtime::TryCurrentError> for LoopSdkError {
    fn from(err: tokio::runtime::TryCurrentError) -> Self {
        LoopSdkError::RuntimeUnavailable(err.to_string())
    }
}

/// A specialized `Result` type for SDK lifecycle operations.
pub type LoopSdkResult = Result<(), LoopSdkError>;
