//! Circuit breaker adapter: gates admission per bucket and reports the outcome.
//!
//! The breaker algorithm itself is injected through [`CircuitBreaker`]; this module only maps
//! requests to buckets and responses to success or failure.

// std
use std::fmt::{Debug, Formatter, Result as FmtResult};
// crates.io
use async_trait::async_trait;
use metrics::Label;
// self
use crate::{
	_prelude::*,
	context::RequestMeta,
	metrics::{self as telemetry, LabelSet},
	transport::{RoundTrip, Transport, decorator::Decorator},
};

/// Classifies a response as a success (`true`) or a failure (`false`) for the breaker.
pub type BreakerCheckFn = Arc<dyn Fn(&Response) -> bool + Send + Sync>;

/// Maps a request to its breaker bucket.
pub type BucketFn = Arc<dyn Fn(&Request) -> String + Send + Sync>;

/// Bucket-keyed admission gate.
pub trait CircuitBreaker: Send + Sync {
	/// Admit a request for `bucket`, returning the permit used to report its outcome, or
	/// `None` when the circuit is open.
	fn allow(&self, bucket: &str) -> Option<BreakerPermit>;
}

type Callback = Box<dyn FnOnce() + Send>;

/// Outcome reporter handed out by [`CircuitBreaker::allow`]; consumed by exactly one report.
pub struct BreakerPermit {
	on_success: Callback,
	on_failure: Callback,
}
impl BreakerPermit {
	/// Create a permit from its success and failure callbacks.
	pub fn new<S, F>(on_success: S, on_failure: F) -> Self
	where
		S: FnOnce() + Send + 'static,
		F: FnOnce() + Send + 'static,
	{
		Self { on_success: Box::new(on_success), on_failure: Box::new(on_failure) }
	}

	/// Permit whose reports are ignored.
	pub fn noop() -> Self {
		Self::new(|| {}, || {})
	}

	/// Report a successful exchange.
	pub fn success(self) {
		(self.on_success)();
	}

	/// Report a failed exchange.
	pub fn failure(self) {
		(self.on_failure)();
	}
}
impl Debug for BreakerPermit {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.write_str("BreakerPermit")
	}
}

/// Default classifier: any status below 500 is a success.
///
/// Unlike [`crate::client::retry::server_errors_retry_policy`], a 501 counts as a failure here.
pub fn default_check() -> BreakerCheckFn {
	Arc::new(|response: &Response| response.status().as_u16() < 500)
}

/// Default bucket: the target id, falling back to the endpoint template.
pub fn default_bucket() -> BucketFn {
	Arc::new(|request: &Request| {
		request.target_id().or_else(|| request.endpoint_template()).unwrap_or_default().to_owned()
	})
}

/// Decorator gating requests through `breaker`.
pub fn circuit_breaker_decorator(
	breaker: Arc<dyn CircuitBreaker>,
	check: BreakerCheckFn,
	bucket: BucketFn,
) -> Decorator {
	Decorator::new("circuit_breaker", move |inner| {
		Arc::new(BreakerTransport {
			inner,
			breaker: breaker.clone(),
			check: check.clone(),
			bucket: bucket.clone(),
		}) as Transport
	})
}

/// Transport consulting a circuit breaker before delegating to `inner`.
pub struct BreakerTransport {
	inner: Transport,
	breaker: Arc<dyn CircuitBreaker>,
	check: BreakerCheckFn,
	bucket: BucketFn,
}
#[async_trait]
impl RoundTrip for BreakerTransport {
	async fn round_trip(&self, request: Request) -> Result<Response> {
		let bucket = (self.bucket)(&request);
		let Some(permit) = self.breaker.allow(&bucket) else {
			let mut labels = LabelSet::new();

			if let Some(target_id) = request.target_id() {
				labels.push(Label::new("target_id", telemetry::sanitize_label_value(target_id)));
				labels.push(Label::new("bucket", bucket.clone()));
			}

			telemetry::increment(telemetry::METRIC_CIRCUIT_OPEN_TOTAL, &labels);
			tracing::warn!(bucket = %bucket, uri = %request.uri(), "circuit breaker rejected request");

			return Err(Error::CircuitOpen { bucket });
		};

		match self.inner.round_trip(request).await {
			Ok(response) => {
				if (self.check)(&response) {
					permit.success();
				} else {
					permit.failure();
				}

				Ok(response)
			},
			Err(err) => {
				permit.failure();

				Err(err)
			},
		}
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::sync::atomic::{AtomicUsize, Ordering};
	// crates.io
	use http::StatusCode;
	use parking_lot::Mutex;
	// self
	use super::*;
	use crate::{
		client::retry::{RetryDecision, server_errors_retry_policy},
		context::Context,
		test_support::{MockTransport, capture_metrics_async, counter_value},
	};

	#[derive(Default)]
	struct RecordingBreaker {
		open: bool,
		buckets: Mutex<Vec<String>>,
		successes: Arc<AtomicUsize>,
		failures: Arc<AtomicUsize>,
	}
	impl CircuitBreaker for RecordingBreaker {
		fn allow(&self, bucket: &str) -> Option<BreakerPermit> {
			self.buckets.lock().push(bucket.to_owned());

			if self.open {
				return None;
			}

			let successes = self.successes.clone();
			let failures = self.failures.clone();

			Some(BreakerPermit::new(
				move || {
					successes.fetch_add(1, Ordering::SeqCst);
				},
				move || {
					failures.fetch_add(1, Ordering::SeqCst);
				},
			))
		}
	}

	fn decorate(breaker: Arc<RecordingBreaker>, mock: &Arc<MockTransport>) -> Transport {
		circuit_breaker_decorator(breaker, default_check(), default_bucket()).decorate(mock.transport())
	}

	#[test]
	fn open_circuit_never_reaches_the_transport() {
		let breaker = Arc::new(RecordingBreaker { open: true, ..Default::default() });
		let mock = MockTransport::with_status(StatusCode::OK);
		let transport = decorate(breaker.clone(), &mock);
		let mut request = Request::default();

		request.set_target_id("users-api");

		let (outcome, snapshot) = capture_metrics_async(transport.round_trip(request));
		let err = outcome.expect_err("circuit open");

		assert!(err.is_circuit_open());
		assert_eq!(mock.calls(), 0);
		assert_eq!(*breaker.buckets.lock(), ["users-api"]);
		assert_eq!(
			counter_value(
				&snapshot,
				telemetry::METRIC_CIRCUIT_OPEN_TOTAL,
				&[("target_id", "users-api"), ("bucket", "users-api")]
			),
			1
		);
	}

	#[tokio::test]
	async fn bucket_falls_back_to_endpoint_template() {
		let breaker = Arc::new(RecordingBreaker::default());
		let mock = MockTransport::with_status(StatusCode::OK);
		let transport = decorate(breaker.clone(), &mock);
		let mut request = Request::default();

		request.set_endpoint_template("/users/{id}");
		transport.round_trip(request).await.expect("response");

		assert_eq!(*breaker.buckets.lock(), ["/users/{id}"]);
		assert_eq!(breaker.successes.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn server_errors_and_transport_errors_count_as_failures() {
		let breaker = Arc::new(RecordingBreaker::default());
		let unavailable = MockTransport::with_status(StatusCode::SERVICE_UNAVAILABLE);
		let failing = MockTransport::failing(|| Error::Canceled);
		let response = decorate(breaker.clone(), &unavailable)
			.round_trip(Request::default())
			.await
			.expect("response");

		assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

		decorate(breaker.clone(), &failing).round_trip(Request::default()).await.expect_err("error");

		assert_eq!(breaker.failures.load(Ordering::SeqCst), 2);
		assert_eq!(breaker.successes.load(Ordering::SeqCst), 0);
	}

	#[tokio::test]
	async fn not_implemented_fails_the_breaker_but_is_not_retried() {
		let breaker = Arc::new(RecordingBreaker::default());
		let mock = MockTransport::with_status(StatusCode::NOT_IMPLEMENTED);
		let response = decorate(breaker.clone(), &mock)
			.round_trip(Request::default())
			.await
			.expect("response");
		let decision = server_errors_retry_policy()(&Context::new(), Ok(&response));

		assert_eq!(breaker.failures.load(Ordering::SeqCst), 1);
		assert!(matches!(decision, RetryDecision::Done));
	}
}
