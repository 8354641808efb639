//! Request latency metrics, with optional connection-phase timings.
//!
//! Both variants record [`METRIC_REQUEST_DURATION`](crate::metrics::METRIC_REQUEST_DURATION)
//! once per round trip and run the wrapped transport inside a span named after the endpoint.
//! The extended variant also attaches a [`ClientTrace`] to the request, which instrumented
//! base transports such as [`PooledTransport`](crate::transport::pooled::PooledTransport)
//! invoke as the connection progresses, and times the full read of the response body.

// std
use std::{
	pin::Pin,
	task::{Context as TaskContext, Poll},
};
// crates.io
use async_trait::async_trait;
use bytes::Bytes;
use http::{Method, StatusCode};
use http_body::{Body as HttpBody, Frame, SizeHint};
use metrics::Label;
use tracing::{Instrument, field};
// self
use crate::{
	_prelude::*,
	ResponseBody,
	context::RequestMeta,
	metrics::{self as telemetry, LabelSet},
	transport::{RoundTrip, Transport, decorator::Decorator},
};

/// Connection state reported when a request obtains its connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GotConnInfo {
	/// The connection served an earlier request.
	pub reused: bool,
	/// The connection was taken idle from the pool.
	pub was_idle: bool,
}

/// Connection lifecycle callbacks, fired in order by instrumented base transports.
///
/// DNS, connect and TLS handshake only fire for new connections.
pub trait ConnectionTrace: Send + Sync {
	/// Name resolution finished after `elapsed`.
	fn dns_done(&self, elapsed: Duration, err: Option<&Error>) {
		let _ = (elapsed, err);
	}

	/// TCP connect finished after `elapsed`.
	fn connect_done(&self, elapsed: Duration, err: Option<&Error>) {
		let _ = (elapsed, err);
	}

	/// TLS handshake finished after `elapsed`.
	fn tls_handshake_done(&self, elapsed: Duration, err: Option<&Error>) {
		let _ = (elapsed, err);
	}

	/// A connection was obtained at `at`.
	fn got_conn(&self, info: GotConnInfo, at: Instant) {
		let _ = (info, at);
	}

	/// The request was fully written at `at`.
	fn wrote_request(&self, at: Instant, err: Option<&Error>) {
		let _ = (at, err);
	}

	/// The response head arrived at `at`.
	fn got_first_response_byte(&self, at: Instant) {
		let _ = at;
	}
}

/// Request metadata carrying the connection trace of the current attempt.
#[derive(Clone)]
pub struct ClientTrace(pub Arc<dyn ConnectionTrace>);

/// Connection trace attached to the request, if any.
pub fn client_trace<M>(meta: &M) -> Option<Arc<dyn ConnectionTrace>>
where
	M: RequestMeta + ?Sized,
{
	meta.meta().get::<ClientTrace>().map(|ClientTrace(trace)| trace.clone())
}

/// Decorator recording one latency metric per round trip.
pub fn trace_decorator() -> Decorator {
	Decorator::new("trace", |inner| Arc::new(TraceTransport { inner, extended: false }) as Transport)
}

/// Decorator recording the round-trip latency plus connection-phase and body-read timings.
pub fn extended_trace_decorator() -> Decorator {
	Decorator::new("extended_trace", |inner| {
		Arc::new(TraceTransport { inner, extended: true }) as Transport
	})
}

/// Transport timing the round trips of `inner`.
pub struct TraceTransport {
	inner: Transport,
	extended: bool,
}
#[async_trait]
impl RoundTrip for TraceTransport {
	async fn round_trip(&self, mut request: Request) -> Result<Response> {
		let method = request.method().clone();
		let labels = telemetry::request_labels(&method, request.target_id());
		let span = tracing::debug_span!(
			"http.client.request",
			procedure = %procedure(&method, &request),
			method = %method,
			status = field::Empty,
			error = field::Empty,
		);
		let started = Instant::now();

		if self.extended {
			request.meta_mut().insert(ClientTrace(Arc::new(PhaseRecorder {
				labels: labels.clone(),
				started,
			})));
		}

		let outcome = self.inner.round_trip(request).instrument(span.clone()).await;

		match &outcome {
			Ok(response) => {
				span.record("status", response.status().as_u16());
			},
			Err(err) => {
				span.record("error", field::display(err));
			},
		}

		telemetry::record_duration(
			telemetry::METRIC_REQUEST_DURATION,
			&telemetry::outcome_labels(labels.clone(), outcome_status(&outcome)),
			started.elapsed(),
		);

		if !self.extended {
			return outcome;
		}

		outcome.map(|response| {
			let status = response.status();

			response.map(|body| {
				ResponseBody::new(ReadCompletionBody {
					inner: body,
					on_done: Some(Box::new(move |err: Option<&Error>| {
						let outcome = match err {
							Some(err) => Err(err),
							None => Ok(status),
						};

						telemetry::record_duration(
							telemetry::METRIC_FULLY_READ_DURATION,
							&telemetry::outcome_labels(labels, outcome),
							started.elapsed(),
						);
					})),
				})
			})
		})
	}
}

fn outcome_status(outcome: &Result<Response>) -> Result<StatusCode, &Error> {
	outcome.as_ref().map(|response| response.status())
}

fn procedure(method: &Method, request: &Request) -> String {
	match request.endpoint_template().or_else(|| request.target_id()) {
		Some(name) => format!("{method} {name}"),
		None => String::new(),
	}
}

struct PhaseRecorder {
	labels: LabelSet,
	started: Instant,
}
impl ConnectionTrace for PhaseRecorder {
	fn dns_done(&self, elapsed: Duration, err: Option<&Error>) {
		telemetry::record_duration(
			telemetry::METRIC_DNS_DURATION,
			&telemetry::phase_labels(self.labels.clone(), err),
			elapsed,
		);
	}

	fn connect_done(&self, elapsed: Duration, err: Option<&Error>) {
		telemetry::record_duration(
			telemetry::METRIC_TCP_CONNECT_DURATION,
			&telemetry::phase_labels(self.labels.clone(), err),
			elapsed,
		);
	}

	fn tls_handshake_done(&self, elapsed: Duration, err: Option<&Error>) {
		telemetry::record_duration(
			telemetry::METRIC_TLS_HANDSHAKE_DURATION,
			&telemetry::phase_labels(self.labels.clone(), err),
			elapsed,
		);
	}

	fn got_conn(&self, info: GotConnInfo, at: Instant) {
		let mut labels = self.labels.clone();

		labels.push(Label::new("reused", info.reused.to_string()));
		labels.push(Label::new("was_idle", info.was_idle.to_string()));

		telemetry::record_duration(
			telemetry::METRIC_GOT_CONNECTION_DURATION,
			&labels,
			at.saturating_duration_since(self.started),
		);
	}

	fn wrote_request(&self, at: Instant, err: Option<&Error>) {
		telemetry::record_duration(
			telemetry::METRIC_REQUEST_WRITTEN_DURATION,
			&telemetry::phase_labels(self.labels.clone(), err),
			at.saturating_duration_since(self.started),
		);
	}

	fn got_first_response_byte(&self, at: Instant) {
		telemetry::record_duration(
			telemetry::METRIC_FIRST_BYTE_DURATION,
			&self.labels,
			at.saturating_duration_since(self.started),
		);
	}
}

type OnDone = Box<dyn FnOnce(Option<&Error>) + Send + Sync>;

/// Response body invoking `on_done` once, at end of stream (`None`) or on the first error.
struct ReadCompletionBody {
	inner: ResponseBody,
	on_done: Option<OnDone>,
}
impl ReadCompletionBody {
	fn finish(&mut self, err: Option<&Error>) {
		if let Some(on_done) = self.on_done.take() {
			on_done(err);
		}
	}
}
impl HttpBody for ReadCompletionBody {
	type Data = Bytes;
	type Error = Error;

	fn poll_frame(
		self: Pin<&mut Self>,
		cx: &mut TaskContext<'_>,
	) -> Poll<Option<std::result::Result<Frame<Bytes>, Error>>> {
		let this = self.get_mut();
		let polled = Pin::new(&mut this.inner).poll_frame(cx);

		match &polled {
			Poll::Ready(None) => this.finish(None),
			Poll::Ready(Some(Err(err))) => this.finish(Some(err)),
			_ => {},
		}

		polled
	}

	fn is_end_stream(&self) -> bool {
		self.inner.is_end_stream()
	}

	fn size_hint(&self) -> SizeHint {
		self.inner.size_hint()
	}
}
