//! HTTP plumbing shared by the CozeLoop crates.
//!
//! - [`HeaderInjector`] / [`HeaderExtractor`] adapt an [`http::HeaderMap`] to
//!   the propagation carrier traits.
//! - [`ApiClient`] is the interface the trace exporter reports through: a JSON
//!   POST and a multipart file upload against the CozeLoop API. A reqwest
//!   implementation is available behind the `reqwest` feature.
use async_trait::async_trait;
use std::borrow::Cow;
use std::fmt::Debug;

#[doc(no_inline)]
pub use bytes::Bytes;
use cozeloop::propagation::{Extractor, Injector};

#[cfg(feature = "reqwest")]
mod reqwest;
#[cfg(feature = "reqwest")]
pub use self::reqwest::{ReqwestApiClient, ReqwestApiClientBuilder};

/// Helper for injecting headers into HTTP Requests. This is used for
/// propagating a trace context to downstream services.
#[derive(Debug)]
pub struct HeaderInjector<'a>(pub &'a mut http::HeaderMap);

impl Injector for HeaderInjector<'_> {
    /// Set a key and value in the HeaderMap.  Does nothing if the key or value are not valid inputs.
    fn set(&mut self, key: &str, value: String) {
        if let Ok(name) = http::header::HeaderName::from_bytes(key.as_bytes()) {
            if let Ok(val) = http::header::HeaderValue::from_str(&value) {
                self.0.insert(name, val);
            }
        }
    }
}

/// Helper for extracting headers from HTTP Requests. This is used for
/// continuing a trace started by an upstream service.
#[derive(Debug)]
pub struct HeaderExtractor<'a>(pub &'a http::HeaderMap);

impl Extractor for HeaderExtractor<'_> {
    /// Get a value for a key from the HeaderMap.  If the value is not valid ASCII, returns None.
    fn get(&self, key: &str) -> Option<Cow<'_, str>> {
        self.0
            .get(key.to_ascii_lowercase())
            .and_then(|value| value.to_str().ok())
            .map(Cow::Borrowed)
    }

    /// Collect all the keys from the HeaderMap.
    fn keys(&self) -> Vec<Cow<'_, str>> {
        self.0
            .keys()
            .map(|value| Cow::Borrowed(value.as_str()))
            .collect::<Vec<_>>()
    }
}

/// Error returned by an [`ApiClient`].
pub type HttpError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// One file sent through [`ApiClient::upload_file`].
#[derive(Clone, Debug, PartialEq)]
pub struct FilePart {
    /// Name of the file in the multipart form.
    pub file_name: String,
    /// MIME type of `data`.
    pub content_type: String,
    /// File contents.
    pub data: Bytes,
    /// Extra text fields sent alongside the file.
    pub fields: Vec<(String, String)>,
}

impl FilePart {
    /// Creates a part with no extra form fields.
    pub fn new(
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        FilePart {
            file_name: file_name.into(),
            content_type: content_type.into(),
            data: data.into(),
            fields: Vec::new(),
        }
    }

    /// Adds a text field to the form.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }
}

/// The calls the tracing core makes against the CozeLoop API.
///
/// Implementations own the base URL, authentication headers and transport
/// timeouts. `path` is always relative to the API base, e.g.
/// `/v1/loop/traces/ingest`. Both calls return the raw response body of a
/// successful (2xx) response.
#[async_trait]
pub trait ApiClient: Debug + Send + Sync {
    /// POST `body` as `application/json`.
    async fn post_json(&self, path: &str, body: Bytes) -> Result<Bytes, HttpError>;

    /// POST `file` as `multipart/form-data`.
    async fn upload_file(&self, path: &str, file: FilePart) -> Result<Bytes, HttpError>;
}
