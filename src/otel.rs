// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # OpenTelemetry Integration
//!
//! Propagates trace context through message headers. Publishing injects the
//! current context, consumption extracts it and opens a consumer span named
//! after the message type.

use opentelemetry::{
    global::{BoxedSpan, BoxedTracer},
    propagation::{Extractor, Injector},
    trace::{SpanKind, Tracer},
    Context,
};
use std::{borrow::Cow, collections::HashMap};

/// Writes propagation fields into a string header map.
struct HeaderInjector<'a> {
    headers: &'a mut HashMap<String, String>,
}

impl Injector for HeaderInjector<'_> {
    /// Sets a header, lowercasing the key as the W3C propagator expects.
    fn set(&mut self, key: &str, value: String) {
        self.headers.insert(key.to_lowercase(), value);
    }
}

/// Reads propagation fields from the headers of a delivery.
struct HeaderExtractor<'a> {
    headers: &'a HashMap<String, String>,
}

impl Extractor for HeaderExtractor<'_> {
    /// Header lookup, falling back to a case-insensitive match since brokers
    /// preserve whatever case the publisher used.
    fn get(&self, key: &str) -> Option<&str> {
        self.headers
            .get(key)
            .or_else(|| {
                self.headers
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(key))
                    .map(|(_, value)| value)
            })
            .map(|value| value.as_str())
    }

    fn keys(&self) -> Vec<&str> {
        self.headers.keys().map(|key| key.as_str()).collect()
    }
}

/// Writes the trace context of `ctx` into outgoing message headers.
///
/// Uses the globally installed text map propagator; with none installed the
/// headers are left untouched.
///
/// # Parameters
/// * `ctx` - Context whose span becomes the parent on the consumer side
/// * `headers` - Outgoing headers, extended in place
pub fn inject(ctx: &Context, headers: &mut HashMap<String, String>) {
    opentelemetry::global::get_text_map_propagator(|propagator| {
        propagator.inject_context(ctx, &mut HeaderInjector { headers })
    });
}

/// Extracts the publisher's context from the headers and starts a consumer span.
///
/// # Parameters
/// * `headers` - Headers of the received delivery
/// * `tracer` - Tracer the span is started on
/// * `name` - Span name, the message type
///
/// # Returns
/// The extracted parent context and the started span of kind `Consumer`
pub fn new_span(
    headers: &HashMap<String, String>,
    tracer: &BoxedTracer,
    name: &str,
) -> (Context, BoxedSpan) {
    let ctx = opentelemetry::global::get_text_map_propagator(|propagator| {
        propagator.extract(&HeaderExtractor { headers })
    });

    let span = tracer
        .span_builder(Cow::from(name.to_owned()))
        .with_kind(SpanKind::Consumer)
        .start_with_context(tracer, &ctx);

    (ctx, span)
}
