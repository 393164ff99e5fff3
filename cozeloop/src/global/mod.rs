//! Process-wide diagnostics shared by the CozeLoop crates.
//!
//! Failures that happen away from the caller (a background batch drain, a
//! detached file upload) cannot be returned as a `Result`. They are handed
//! to [`handle_error`] instead, which forwards them to the handler installed
//! with [`set_error_handler`] or prints them to stderr.
//!
//! The tracer registry itself lives in `cozeloop_sdk::global`.

mod error_handler;
mod internal_logging;

pub use error_handler::{handle_error, set_error_handler, Error};
