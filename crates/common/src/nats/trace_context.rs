use async_nats::HeaderMap;
use opentelemetry::{
    global,
    propagation::{Extractor, Injector},
    Context,
};
use tracing::Span;
use tracing_opentelemetry::OpenTelemetrySpanExt;

/// W3C Trace Context header names
const TRACEPARENT: &str = "traceparent";
const TRACESTATE: &str = "tracestate";

struct HeaderInjector<'a>(&'a mut HeaderMap);

impl Injector for HeaderInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        self.0.insert(key, value.as_str());
    }
}

struct HeaderExtractor<'a>(&'a HeaderMap);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(|v| v.as_str())
    }

    fn keys(&self) -> Vec<&str> {
        [TRACEPARENT, TRACESTATE]
            .into_iter()
            .filter(|key| self.0.get(*key).is_some())
            .collect()
    }
}

/// Writes the current span's context into `headers` as `traceparent`/`tracestate`.
pub fn inject_trace_context(headers: &mut HeaderMap) {
    global::get_text_map_propagator(|propagator| {
        let ctx = Span::current().context();
        propagator.inject_context(&ctx, &mut HeaderInjector(headers));
    });
}

pub fn extract_trace_context(headers: &HeaderMap) -> Context {
    global::get_text_map_propagator(|propagator| propagator.extract(&HeaderExtractor(headers)))
}

/// Parents `span` onto the publisher's trace carried in `headers`, if any.
pub fn link_span_to_headers(span: &Span, headers: Option<&HeaderMap>) {
    if let Some(headers) = headers {
        if headers.get(TRACEPARENT).is_some() {
            span.set_parent(extract_trace_context(headers));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inject_without_propagator_does_not_panic() {
        let mut headers = HeaderMap::new();
        inject_trace_context(&mut headers);
    }

    #[test]
    fn test_link_span_ignores_missing_headers() {
        let span = tracing::info_span!("test");
        link_span_to_headers(&span, None);
        link_span_to_headers(&span, Some(&HeaderMap::new()));
    }

    #[test]
    fn test_extractor_only_lists_present_keys() {
        let mut headers = HeaderMap::new();
        headers.insert(
            TRACEPARENT,
            "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01",
        );

        let extractor = HeaderExtractor(&headers);
        assert_eq!(extractor.keys(), vec![TRACEPARENT]);
        assert!(extractor.get(TRACEPARENT).unwrap().starts_with("00-"));
        assert!(extractor.get(TRACESTATE).is_none());
    }
}
