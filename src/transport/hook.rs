//! Request and response hooks around the wrapped transport.

// crates.io
use async_trait::async_trait;
use http::request::Parts;
// self
use crate::{
	_prelude::*,
	transport::{RoundTrip, Transport, decorator::Decorator},
};

/// Callback run before the request is sent; an error aborts the request.
///
/// Hooks may change headers and metadata. The body is left to the caller.
pub type RequestHook = Arc<dyn Fn(&mut Request) -> Result<()> + Send + Sync>;

/// Callback observing the outcome of a round trip. Its return value is ignored.
pub type ResponseHook = Arc<dyn Fn(&Parts, Result<&Response, &Error>) + Send + Sync>;

/// Decorator running `request_hooks` and `response_hooks` in registration order.
pub fn hook_decorator(request_hooks: Vec<RequestHook>, response_hooks: Vec<ResponseHook>) -> Decorator {
	let request_hooks: Arc<[RequestHook]> = request_hooks.into();
	let response_hooks: Arc<[ResponseHook]> = response_hooks.into();

	Decorator::new("hooks", move |inner| {
		Arc::new(HookTransport {
			inner,
			request_hooks: request_hooks.clone(),
			response_hooks: response_hooks.clone(),
		}) as Transport
	})
}

/// Transport running hooks around `inner`.
pub struct HookTransport {
	inner: Transport,
	request_hooks: Arc<[RequestHook]>,
	response_hooks: Arc<[ResponseHook]>,
}
#[async_trait]
impl RoundTrip for HookTransport {
	async fn round_trip(&self, mut request: Request) -> Result<Response> {
		for hook in self.request_hooks.iter() {
			hook(&mut request)?;
		}

		if self.response_hooks.is_empty() {
			return self.inner.round_trip(request).await;
		}

		let (parts, body) = request.into_parts();
		let head = parts.clone();
		let outcome = self.inner.round_trip(Request::from_parts(parts, body)).await;

		for hook in self.response_hooks.iter() {
			hook(&head, outcome.as_ref());
		}

		outcome
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::sync::atomic::{AtomicUsize, Ordering};
	// crates.io
	use http::{HeaderValue, StatusCode};
	use parking_lot::Mutex;
	// self
	use super::*;
	use crate::test_support::MockTransport;

	#[tokio::test]
	async fn failing_request_hook_skips_network_and_response_hooks() {
		let mock = MockTransport::with_status(StatusCode::OK);
		let observed = Arc::new(AtomicUsize::new(0));
		let counter = observed.clone();
		let reject: RequestHook =
			Arc::new(|_: &mut Request| Err::<(), _>(Error::custom("missing credentials")));
		let observe: ResponseHook = Arc::new(move |_: &Parts, _: Result<&Response, &Error>| {
			counter.fetch_add(1, Ordering::SeqCst);
		});
		let transport = hook_decorator(vec![reject], vec![observe]).decorate(mock.transport());
		let err = transport.round_trip(Request::default()).await.expect_err("hook failure");

		assert_eq!(err.to_string(), "missing credentials");
		assert_eq!(mock.calls(), 0);
		assert_eq!(observed.load(Ordering::SeqCst), 0);
	}

	#[tokio::test]
	async fn hooks_run_in_registration_order() {
		let mock = MockTransport::with_status(StatusCode::ACCEPTED);
		let order = Arc::new(Mutex::new(Vec::new()));
		let (first_log, second_log) = (order.clone(), order.clone());
		let first: RequestHook = Arc::new(move |request: &mut Request| {
			first_log.lock().push("first");
			request.headers_mut().insert("x-step", HeaderValue::from_static("1"));

			Ok(())
		});
		let second: RequestHook = Arc::new(move |request: &mut Request| {
			second_log.lock().push(if request.headers().contains_key("x-step") {
				"second-after-first"
			} else {
				"second"
			});

			Ok(())
		});
		let transport = hook_decorator(vec![first, second], Vec::new()).decorate(mock.transport());
		let response = transport.round_trip(Request::default()).await.expect("response");

		assert_eq!(response.status(), StatusCode::ACCEPTED);
		assert_eq!(*order.lock(), ["first", "second-after-first"]);
		assert_eq!(mock.requests()[0].headers["x-step"], "1");
	}

	#[tokio::test]
	async fn response_hooks_observe_transport_errors() {
		let mock = MockTransport::failing(|| Error::Canceled);
		let seen = Arc::new(Mutex::new(Vec::new()));
		let (first_log, second_log) = (seen.clone(), seen.clone());
		let first: ResponseHook = Arc::new(move |_: &Parts, outcome: Result<&Response, &Error>| {
			first_log.lock().push(format!("first:{}", outcome.is_err()));
		});
		let second: ResponseHook =
			Arc::new(move |_: &Parts, outcome: Result<&Response, &Error>| {
				second_log.lock().push(format!("second:{}", outcome.is_err()));
			});
		let transport = hook_decorator(Vec::new(), vec![first, second]).decorate(mock.transport());
		let err = transport.round_trip(Request::default()).await.expect_err("error");

		assert!(err.is_canceled());
		assert_eq!(*seen.lock(), ["first:true", "second:true"]);
	}
}
