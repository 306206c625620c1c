// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # OpenTelemetry Integration
//!
//! Propagates trace context through AMQP message headers: publishing injects
//! the caller's context, consuming extracts it and opens a consumer span for
//! the delivery.

use lapin::{
    protocol::basic::AMQPProperties,
    types::{AMQPValue, FieldTable, ShortString},
};
use opentelemetry::{
    global::{self, BoxedSpan, BoxedTracer},
    propagation::{Extractor, Injector},
    trace::{SpanKind, Tracer},
    Context,
};
use std::{borrow::Cow, collections::BTreeMap};
use tracing::warn;

type Headers = BTreeMap<ShortString, AMQPValue>;

/// Carrier letting the global text-map propagator read and write AMQP
/// message headers.
///
/// Keys are stored lowercased so that `traceparent` survives brokers and
/// clients that normalise header casing. Only long-string header values are
/// visible to the extractor.
pub(crate) struct HeaderCarrier<'a> {
    headers: &'a mut Headers,
}

impl<'a> HeaderCarrier<'a> {
    /// Wraps a header table.
    ///
    /// # Parameters
    /// * `headers` - Header table read on extraction and written on injection
    ///
    /// # Returns
    /// A carrier borrowing `headers` for its lifetime
    pub(crate) fn new(headers: &'a mut Headers) -> Self {
        HeaderCarrier { headers }
    }
}

impl Injector for HeaderCarrier<'_> {
    /// Stores `value` as a long string under the lowercased `key`.
    fn set(&mut self, key: &str, value: String) {
        let key = ShortString::from(key.to_ascii_lowercase());
        self.headers.insert(key, AMQPValue::LongString(value.into()));
    }
}

impl Extractor for HeaderCarrier<'_> {
    /// Looks up `key`, yielding its value when it is a UTF-8 long string.
    ///
    /// # Parameters
    /// * `key` - Propagation field name, e.g. `traceparent`
    ///
    /// # Returns
    /// The header text, or `None` if the header is absent, of another AMQP
    /// type or not valid UTF-8
    fn get(&self, key: &str) -> Option<&str> {
        let AMQPValue::LongString(raw) = self.headers.get(key)? else {
            return None;
        };

        match std::str::from_utf8(raw.as_bytes()) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(header = key, error = err.to_string(), "trace header is not utf-8");
                None
            }
        }
    }

    fn keys(&self) -> Vec<&str> {
        self.headers.keys().map(ShortString::as_str).collect()
    }
}

/// Serializes `ctx` into a header table for an outbound message.
///
/// # Parameters
/// * `ctx` - Context whose active span becomes the consumer's parent
///
/// # Returns
/// A `FieldTable` holding whatever fields the global propagator writes
/// (empty when no propagator is installed)
pub(crate) fn inject_headers(ctx: &Context) -> FieldTable {
    let mut headers = Headers::default();

    global::get_text_map_propagator(|propagator| {
        propagator.inject_context(ctx, &mut HeaderCarrier::new(&mut headers))
    });

    FieldTable::from(headers)
}

/// Opens the consumer span for a delivery.
///
/// The producer's context is recovered from the delivery headers so the span
/// joins the publisher's trace.
///
/// # Parameters
/// * `props` - Properties of the received delivery
/// * `tracer` - Tracer the span is started on
/// * `name` - Span name, the queue being consumed
///
/// # Returns
/// The extracted parent context and the started span
pub(crate) fn new_span(
    props: &AMQPProperties,
    tracer: &BoxedTracer,
    name: &str,
) -> (Context, BoxedSpan) {
    let mut headers = props
        .headers()
        .as_ref()
        .map(|table| table.inner().clone())
        .unwrap_or_default();

    let parent = global::get_text_map_propagator(|propagator| {
        propagator.extract(&HeaderCarrier::new(&mut headers))
    });

    let span = tracer
        .span_builder(Cow::from(name.to_owned()))
        .with_kind(SpanKind::Consumer)
        .start_with_context(tracer, &parent);

    (parent, span)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_injector_lowercases_keys() {
        let mut btree = BTreeMap::new();
        let mut propagator = HeaderCarrier::new(&mut btree);
        propagator.set("TraceParent", "00-abc-01".to_owned());

        assert_eq!(propagator.get("traceparent"), Some("00-abc-01"));
        assert_eq!(propagator.keys(), vec!["traceparent"]);
    }

    #[test]
    fn test_extractor_ignores_non_string_values() {
        let mut btree = BTreeMap::new();
        btree.insert(ShortString::from("count"), AMQPValue::LongInt(3));
        let propagator = HeaderCarrier::new(&mut btree);

        assert_eq!(propagator.get("count"), None);
    }
}
