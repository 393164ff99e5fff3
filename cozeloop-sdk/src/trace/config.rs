//! SDK Configuration
//!
//! Configuration represents the global tracing configuration, overrides
//! can be set for the default `IdGenerator` and for the provider-wide
//! payload recording defaults individual calls fall back to.
use crate::trace::{IdGenerator, RandomIdGenerator};

/// Tracer configuration
#[derive(Debug)]
#[non_exhaustive]
pub struct Config {
    /// The id generator that the sdk should use
    pub id_generator: Box<dyn IdGenerator>,

    /// Offload oversized payloads instead of truncating them.
    pub ultra_large_report: bool,

    /// Capture arguments of traced calls as span input.
    pub record_inputs: bool,

    /// Capture results of traced calls as span output.
    pub record_outputs: bool,

    /// Service name attached to spans that do not set their own.
    pub service_name: Option<String>,
}

impl Default for Config {
    /// Create default global sdk configuration.
    fn default() -> Self {
        Config {
            id_generator: Box::<RandomIdGenerator>::default(),
            ultra_large_report: false,
            record_inputs: true,
            record_outputs: true,
            service_name: None,
        }
    }
}
