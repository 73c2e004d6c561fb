//! W3C Trace Context propagation for outbound calls.
//!
//! Calls to external collaborators carry `traceparent`/`tracestate` from the
//! current span plus the caller's request id, so a slow verification agent can
//! be found in the same trace as the request that waited on it.

use opentelemetry::trace::TraceContextExt;
use reqwest::header::{HeaderMap, HeaderValue};
use tracing::Span;
use tracing_opentelemetry::OpenTelemetrySpanExt;

pub const TRACEPARENT_HEADER: &str = "traceparent";
pub const TRACESTATE_HEADER: &str = "tracestate";
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Write the current span's trace context into `headers`.
///
/// Does nothing when there is no sampled OpenTelemetry span.
pub fn inject_trace_context(headers: &mut HeaderMap) {
    let context = Span::current().context();
    let otel_span = context.span();
    let span_context = otel_span.span_context();

    if !span_context.is_valid() {
        return;
    }

    let traceparent = format!(
        "00-{}-{}-{:02x}",
        span_context.trace_id(),
        span_context.span_id(),
        span_context.trace_flags().to_u8()
    );
    if let Ok(value) = HeaderValue::from_str(&traceparent) {
        headers.insert(TRACEPARENT_HEADER, value);
    }

    let tracestate = span_context.trace_state().header();
    if !tracestate.is_empty()
        && let Ok(value) = HeaderValue::from_str(&tracestate)
    {
        headers.insert(TRACESTATE_HEADER, value);
    }
}

/// Headers for an outbound call: trace context plus an optional request id.
pub fn outbound_headers(request_id: Option<&str>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    inject_trace_context(&mut headers);

    if let Some(id) = request_id
        && let Ok(value) = HeaderValue::from_str(id)
    {
        headers.insert(REQUEST_ID_HEADER, value);
    }

    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_span_means_no_trace_headers() {
        let headers = outbound_headers(None);
        assert!(headers.get(TRACEPARENT_HEADER).is_none());
        assert!(headers.get(REQUEST_ID_HEADER).is_none());
    }

    #[test]
    fn request_id_is_forwarded() {
        let headers = outbound_headers(Some("req-42"));
        assert_eq!(headers.get(REQUEST_ID_HEADER).unwrap(), "req-42");
    }
}
