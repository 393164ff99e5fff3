//! # Propagator interface
//!
//! Propagators carry a [`Context`] to the next process by writing it into,
//! and reading it back from, the messages exchanged between services.
//!
//! A [`TextMapPropagator`] works on string key/value carriers such as HTTP
//! headers. It writes through an [`Injector`] and reads through an
//! [`Extractor`]; implementations for `HashMap<String, String>` are provided
//! here and for `http::HeaderMap` in `cozeloop-http`.
//!
//! Header names are case-insensitive: carriers may be rewritten by proxies or
//! transports that lower-case every name.
//!
//! [`Context`]: crate::Context
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt::Debug;

use crate::Context;

/// Injector provides an interface for adding fields from an underlying struct like `HashMap`
pub trait Injector {
    /// Add a key and value to the underlying data.
    fn set(&mut self, key: &str, value: String);
}

/// Extractor provides an interface for removing fields from an underlying struct like `HashMap`
pub trait Extractor {
    /// Get a value from a key from the underlying data. Lookups ignore ASCII case.
    fn get(&self, key: &str) -> Option<Cow<'_, str>>;

    /// Collect all the keys from the underlying data.
    fn keys(&self) -> Vec<Cow<'_, str>>;
}

impl<S: std::hash::BuildHasher> Injector for HashMap<String, String, S> {
    /// Set a key and value in the HashMap. Keys are stored lower-cased.
    fn set(&mut self, key: &str, value: String) {
        self.insert(key.to_lowercase(), value);
    }
}

impl<S: std::hash::BuildHasher> Extractor for HashMap<String, String, S> {
    /// Get a value for a key from the HashMap.
    fn get(&self, key: &str) -> Option<Cow<'_, str>> {
        self.get(&key.to_lowercase())
            .or_else(|| {
                self.iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(key))
                    .map(|(_, v)| v)
            })
            .map(|v| Cow::Borrowed(v.as_str()))
    }

    /// Collect all the keys from the HashMap.
    fn keys(&self) -> Vec<Cow<'_, str>> {
        self.keys()
            .map(|k| Cow::Borrowed(k.as_str()))
            .collect::<Vec<_>>()
    }
}

/// Methods to inject and extract a [`Context`] into and from text-based carriers.
pub trait TextMapPropagator: Debug {
    /// Properly encodes the values of the [`Context`] and injects them into the
    /// [`Injector`].
    fn inject_context(&self, cx: &Context, injector: &mut dyn Injector);

    /// Retrieves encoded data using the provided [`Extractor`]. If no data for
    /// this format was retrieved or the data was malformed, `cx` is returned
    /// unchanged.
    fn extract_with_context(&self, cx: &Context, extractor: &dyn Extractor) -> Context;

    /// Retrieves encoded data into a fresh [`Context`].
    fn extract(&self, extractor: &dyn Extractor) -> Context {
        self.extract_with_context(&Context::new(), extractor)
    }

    /// Returns the carrier fields this propagator reads and writes.
    fn fields(&self) -> &[&'static str];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_map_get() {
        let mut carrier = HashMap::new();
        carrier.set("headerName", "value".to_string());

        assert_eq!(
            Extractor::get(&carrier, "HEADERNAME"),
            Some(Cow::Borrowed("value")),
            "case insensitive extraction"
        );
    }

    #[test]
    fn hash_map_get_mixed_case_carrier() {
        let mut carrier = HashMap::new();
        carrier.insert("X-Cozeloop-Traceparent".to_string(), "value".to_string());

        assert_eq!(
            Extractor::get(&carrier, "x-cozeloop-traceparent"),
            Some(Cow::Borrowed("value")),
            "carrier keys that were not lower-cased are still found"
        );
    }

    #[test]
    fn hash_map_keys() {
        let mut carrier = HashMap::new();
        carrier.set("headerName1", "value1".to_string());
        carrier.set("headerName2", "value2".to_string());

        let got = Extractor::keys(&carrier);
        assert_eq!(got.len(), 2);
        assert!(got.contains(&"headername1".into()));
        assert!(got.contains(&"headername2".into()));
    }
}
