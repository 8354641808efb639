//! Innermost client span for distributed-tracing export.
//!
//! The span follows OpenTelemetry's HTTP client conventions so a `tracing-opentelemetry` layer
//! can export it. A response of any status leaves the span successful; only transport errors
//! mark it failed.

// crates.io
use async_trait::async_trait;
use tracing::{Instrument, field};
// self
use crate::{
	_prelude::*,
	transport::{RoundTrip, Transport, decorator::Decorator},
};

/// Decorator opening a client-kind span around the wrapped transport.
pub fn span_decorator() -> Decorator {
	Decorator::new("span", |inner| Arc::new(SpanTransport { inner }) as Transport)
}

/// Transport running `inner` inside a client span.
pub struct SpanTransport {
	inner: Transport,
}
#[async_trait]
impl RoundTrip for SpanTransport {
	async fn round_trip(&self, request: Request) -> Result<Response> {
		let span = tracing::info_span!(
			"HTTP",
			otel.name = %request.method(),
			otel.kind = "client",
			otel.status_code = field::Empty,
			http.request.method = %request.method(),
			url.full = %request.uri(),
			http.response.status_code = field::Empty,
		);
		let outcome = self.inner.round_trip(request).instrument(span.clone()).await;

		match &outcome {
			Ok(response) => {
				span.record("http.response.status_code", response.status().as_u16());
				span.record("otel.status_code", "OK");
			},
			Err(err) => {
				span.record("otel.status_code", "ERROR");

				tracing::debug!(parent: &span, error = %err, "round trip failed");
			},
		}

		outcome
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use http::StatusCode;
	// self
	use super::*;
	use crate::test_support::MockTransport;

	#[tokio::test]
	async fn passes_outcomes_through_unchanged() {
		let ok = MockTransport::with_status(StatusCode::BAD_GATEWAY);
		let failing = MockTransport::failing(|| Error::Canceled);
		let response =
			span_decorator().decorate(ok.transport()).round_trip(Request::default()).await.expect("response");
		let err = span_decorator()
			.decorate(failing.transport())
			.round_trip(Request::default())
			.await
			.expect_err("error");

		assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
		assert!(err.is_canceled());
	}
}
