//! # CozeLoop trace context propagator
use std::collections::HashMap;
use std::iter;

use cozeloop::loop_debug;
use cozeloop::propagation::{Extractor, Injector, TextMapPropagator};
use cozeloop::trace::{SpanContext, SpanId, TraceFlags, TraceId};
use cozeloop::Context;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};

const SUPPORTED_VERSION: u8 = 0;
const INVALID_VERSION: &str = "ff";

/// Standard trace parent header.
pub const TRACEPARENT_HEADER: &str = "traceparent";
/// Standard trace state header, carrying baggage.
pub const TRACESTATE_HEADER: &str = "tracestate";
/// Vendor trace parent header, same value as [`TRACEPARENT_HEADER`].
pub const LOOP_TRACEPARENT_HEADER: &str = "X-Cozeloop-Traceparent";
/// Vendor trace state header, same value as [`TRACESTATE_HEADER`].
pub const LOOP_TRACESTATE_HEADER: &str = "X-Cozeloop-Tracestate";

const FIELDS: [&str; 4] = [
    TRACEPARENT_HEADER,
    TRACESTATE_HEADER,
    LOOP_TRACEPARENT_HEADER,
    LOOP_TRACESTATE_HEADER,
];

const FRAGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b';')
    .add(b',')
    .add(b'=')
    .add(b'%');

/// Propagates span contexts and baggage under the W3C header names and
/// their CozeLoop duplicates.
///
/// Inject writes both header pairs with identical values:
///
/// `traceparent: 00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01`
///
/// `tracestate: user_id=u-1,thread_id=t-9`
///
/// The trace state carries the context's baggage as comma separated
/// `key=value` entries, percent-encoded. Extract prefers the vendor headers
/// and falls back to the standard ones, each header on its own, so a proxy
/// stripping either pair does not break the trace.
///
/// # Examples
///
/// ```
/// use cozeloop::propagation::TextMapPropagator;
/// use cozeloop::trace::{SpanContext, SpanId, TraceFlags, TraceId};
/// use cozeloop::Context;
/// use cozeloop_sdk::propagation::LoopPropagator;
/// use std::collections::HashMap;
///
/// let propagator = LoopPropagator::new();
/// let cx = Context::new()
///     .with_span_context(SpanContext::new(
///         TraceId::from(0x0af7_6519_16cd_43dd_8448_eb21_1c80_319c),
///         SpanId::from(0xb7ad_6b71_6920_3331),
///         TraceFlags::SAMPLED,
///         false,
///     ))
///     .with_baggage_value("user_id", "u-1");
///
/// let headers = propagator.inject_headers(&cx);
/// assert_eq!(
///     headers["x-cozeloop-traceparent"],
///     "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01"
/// );
///
/// let extracted = propagator.extract(&headers);
/// assert_eq!(extracted.baggage().get("user_id"), Some("u-1"));
/// ```
#[derive(Clone, Debug, Default)]
pub struct LoopPropagator {
    _private: (),
}

impl LoopPropagator {
    /// Create a new `LoopPropagator`.
    pub fn new() -> Self {
        LoopPropagator { _private: () }
    }

    /// Injects `cx` into a fresh header map. Keys are lower-cased.
    pub fn inject_headers(&self, cx: &Context) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        self.inject_context(cx, &mut headers);
        headers
    }

    fn extract_span_context(&self, extractor: &dyn Extractor) -> Result<SpanContext, ()> {
        let header_value = extractor
            .get(LOOP_TRACEPARENT_HEADER)
            .or_else(|| extractor.get(TRACEPARENT_HEADER))
            .ok_or(())?;
        let parts = header_value.trim().split('-').collect::<Vec<&str>>();
        if parts.len() < 4 {
            return Err(());
        }

        // Version must be two hex digits, `ff` is forbidden and version 0 has
        // exactly four parts.
        let version = parse_hex_field(parts[0], 2)?;
        if parts[0] == INVALID_VERSION || version == SUPPORTED_VERSION && parts.len() != 4 {
            return Err(());
        }

        if !is_lower_hex(parts[1], 32) || !is_lower_hex(parts[2], 16) {
            return Err(());
        }
        let trace_id = TraceId::from_hex(parts[1]).map_err(|_| ())?;
        let span_id = SpanId::from_hex(parts[2]).map_err(|_| ())?;
        let flags = parse_hex_field(parts[3], 2)?;

        let span_context = SpanContext::new(trace_id, span_id, TraceFlags::new(flags), true);
        if !span_context.is_valid() {
            return Err(());
        }

        Ok(span_context)
    }
}

fn is_lower_hex(s: &str, len: usize) -> bool {
    s.len() == len && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

fn parse_hex_field(s: &str, len: usize) -> Result<u8, ()> {
    if s.len() != len || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(());
    }
    u8::from_str_radix(s, 16).map_err(|_| ())
}

fn serialize_baggage(cx: &Context) -> String {
    cx.baggage()
        .iter()
        .map(|(name, value)| {
            utf8_percent_encode(name, FRAGMENT)
                .chain(iter::once("="))
                .chain(utf8_percent_encode(value, FRAGMENT))
                .collect::<String>()
        })
        .collect::<Vec<String>>()
        .join(",")
}

fn parse_baggage(header_value: &str) -> Vec<(String, String)> {
    header_value
        .split(',')
        .filter_map(|entry| {
            // Anything after `;` is a property list, which is not carried.
            let name_and_value = entry.split(';').next().unwrap_or_default();
            let Some((name, value)) = name_and_value.split_once('=') else {
                loop_debug!(
                    name: "LoopPropagator.Extract.InvalidKeyValueFormat",
                    entry = entry
                );
                return None;
            };
            match (
                percent_decode_str(name.trim()).decode_utf8(),
                percent_decode_str(value.trim()).decode_utf8(),
            ) {
                (Ok(name), Ok(value)) if !name.is_empty() => {
                    Some((name.into_owned(), value.into_owned()))
                }
                _ => {
                    loop_debug!(name: "LoopPropagator.Extract.InvalidUTF8", entry = entry);
                    None
                }
            }
        })
        .collect()
}

impl TextMapPropagator for LoopPropagator {
    /// Writes the active span context and the baggage of `cx` under both the
    /// standard and the vendor header names.
    fn inject_context(&self, cx: &Context, injector: &mut dyn Injector) {
        let Some(span_context) = cx.span_context().filter(|sc| sc.is_valid()) else {
            return;
        };
        let traceparent = format!(
            "{:02x}-{}-{}-{:02x}",
            SUPPORTED_VERSION,
            span_context.trace_id(),
            span_context.span_id(),
            span_context.trace_flags()
        );
        injector.set(TRACEPARENT_HEADER, traceparent.clone());
        injector.set(LOOP_TRACEPARENT_HEADER, traceparent);

        if !cx.baggage().is_empty() {
            let tracestate = serialize_baggage(cx);
            injector.set(TRACESTATE_HEADER, tracestate.clone());
            injector.set(LOOP_TRACESTATE_HEADER, tracestate);
        }
    }

    /// Returns a context whose active span is the remote parent found in
    /// `extractor`, with the propagated baggage merged into the baggage of
    /// `cx`. Returns `cx` unchanged when no valid parent is found.
    fn extract_with_context(&self, cx: &Context, extractor: &dyn Extractor) -> Context {
        let Ok(span_context) = self.extract_span_context(extractor) else {
            return cx.clone();
        };
        let cx = cx.with_span_context(span_context);
        match extractor
            .get(LOOP_TRACESTATE_HEADER)
            .or_else(|| extractor.get(TRACESTATE_HEADER))
        {
            Some(tracestate) => cx.with_baggage_values(parse_baggage(&tracestate)),
            None => cx,
        }
    }

    fn fields(&self) -> &[&'static str] {
        &FIELDS
    }
}
