use std::sync::{OnceLock, RwLock};

use crate::trace::TraceError;

fn global_error_handler() -> &'static RwLock<Option<ErrorHandler>> {
    static GLOBAL_ERROR_HANDLER: OnceLock<RwLock<Option<ErrorHandler>>> = OnceLock::new();
    GLOBAL_ERROR_HANDLER.get_or_init(|| RwLock::new(None))
}

/// Errors reported to the global error handler.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// A failure while exporting or uploading spans.
    #[error(transparent)]
    Trace(#[from] TraceError),

    /// Any other failure, described by its message.
    #[error("{0}")]
    Other(String),
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Error::Other(err.to_string())
    }
}

struct ErrorHandler(Box<dyn Fn(Error) + Send + Sync>);

/// Handle error using the globally configured error handler.
///
/// Writes to stderr if unset.
pub fn handle_error<T: Into<Error>>(err: T) {
    match global_error_handler().read() {
        Ok(handler) => match handler.as_ref() {
            Some(handler) => (handler.0)(err.into()),
            None => report_to_stderr(err.into()),
        },
        Err(_) => report_to_stderr(err.into()),
    }
}

fn report_to_stderr(err: Error) {
    match err {
        Error::Trace(err) => eprintln!("CozeLoop trace error occurred. {err}"),
        Error::Other(err_msg) => eprintln!("CozeLoop error occurred. {err_msg}"),
    }
}

/// Set global error handler.
///
/// Replaces any handler installed earlier.
pub fn set_error_handler<F>(f: F) -> std::result::Result<(), Error>
where
    F: Fn(Error) + Send + Sync + 'static,
{
    global_error_handler()
        .write()
        .map(|mut handler| *handler = Some(ErrorHandler(Box::new(f))))
        .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn custom_handler_receives_trace_errors() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        set_error_handler(move |err| sink.lock().unwrap().push(err.to_string())).unwrap();

        handle_error(TraceError::from("status 500"));
        handle_error(Error::Other("boom".into()));

        let seen = seen.lock().unwrap();
        assert!(seen.iter().any(|m| m.contains("status 500")));
        assert!(seen.iter().any(|m| m == "boom"));
    }
}
