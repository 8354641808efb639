//! Request-scoped metadata carried in `http::Extensions`.
//!
//! Every value here travels with the request through each decorator without changing any
//! signature. Values are typed, so a decorator can only observe what it asks for by type.

// crates.io
use http::{Extensions, HeaderMap, request::Parts};
use tokio::time;
use tokio_util::sync::CancellationToken;
// self
use crate::_prelude::*;

/// Cancellation and deadline scope of a logical request.
///
/// Cloning shares the cancellation token, so canceling any clone cancels them all.
#[derive(Clone, Debug, Default)]
pub struct Context {
	deadline: Option<Instant>,
	token: CancellationToken,
}
impl Context {
	/// Create a context without deadline which is never canceled unless asked to.
	pub fn new() -> Self {
		Self::default()
	}

	/// Bound the context by a timeout measured from now.
	pub fn with_timeout(self, timeout: Duration) -> Self {
		self.with_deadline(Instant::now() + timeout)
	}

	/// Bound the context by an absolute deadline; an earlier existing deadline wins.
	pub fn with_deadline(mut self, deadline: Instant) -> Self {
		self.deadline = Some(match self.deadline {
			Some(current) => current.min(deadline),
			None => deadline,
		});

		self
	}

	/// Tie the context to an externally owned cancellation token.
	pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
		self.token = token;

		self
	}

	/// Absolute deadline, if any.
	pub fn deadline(&self) -> Option<Instant> {
		self.deadline
	}

	/// Time left until the deadline, saturating at zero.
	pub fn remaining(&self) -> Option<Duration> {
		self.deadline.map(|deadline| deadline.saturating_duration_since(Instant::now()))
	}

	/// Cancel the context and every clone of it.
	pub fn cancel(&self) {
		self.token.cancel();
	}

	/// Underlying cancellation token.
	pub fn token(&self) -> &CancellationToken {
		&self.token
	}

	/// Error describing why the context is done, or `None` while it is still live.
	pub fn err(&self) -> Option<Error> {
		if self.token.is_cancelled() {
			Some(Error::Canceled)
		} else if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
			Some(Error::DeadlineExceeded)
		} else {
			None
		}
	}

	/// Resolve once the context is canceled or its deadline passes.
	pub async fn done(&self) {
		match self.deadline {
			Some(deadline) => tokio::select! {
				_ = self.token.cancelled() => {},
				_ = time::sleep_until(deadline) => {},
			},
			None => self.token.cancelled().await,
		}
	}

	/// Error to report after [`Context::done`] resolved.
	pub(crate) fn done_err(&self) -> Error {
		self.err().unwrap_or(Error::Canceled)
	}
}

/// Low-cardinality label of the logical destination of a request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TargetId(pub Arc<str>);

/// Route template (e.g. `/users/{id}`) used when no target id is available.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EndpointTemplate(pub Arc<str>);

/// Retry attempt number of the request currently in flight; zero for the first attempt.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RetryAttempt(pub u32);

/// Headers that must be propagated to every outgoing request of the current scope.
#[derive(Clone, Debug, Default)]
pub struct ForwardedHeaders(pub HeaderMap);

/// Typed accessors over the request metadata bag.
pub trait RequestMeta {
	/// Metadata storage.
	fn meta(&self) -> &Extensions;

	/// Mutable metadata storage.
	fn meta_mut(&mut self) -> &mut Extensions;

	/// Request context; a fresh, never-expiring one when none was attached.
	fn context(&self) -> Context {
		self.meta().get::<Context>().cloned().unwrap_or_default()
	}

	/// Attach the request context.
	fn set_context(&mut self, context: Context) {
		self.meta_mut().insert(context);
	}

	/// Target identifier, if set.
	fn target_id(&self) -> Option<&str> {
		self.meta().get::<TargetId>().map(|TargetId(id)| id.as_ref())
	}

	/// Attach a target identifier.
	fn set_target_id(&mut self, target_id: &str) {
		self.meta_mut().insert(TargetId(Arc::from(target_id)));
	}

	/// Endpoint template, if set.
	fn endpoint_template(&self) -> Option<&str> {
		self.meta().get::<EndpointTemplate>().map(|EndpointTemplate(template)| template.as_ref())
	}

	/// Attach an endpoint template.
	fn set_endpoint_template(&mut self, template: &str) {
		self.meta_mut().insert(EndpointTemplate(Arc::from(template)));
	}

	/// Retry attempt of the request; zero when it is not a retry.
	fn retry_count(&self) -> u32 {
		self.meta().get::<RetryAttempt>().map(|RetryAttempt(attempt)| *attempt).unwrap_or_default()
	}

	/// Headers to forward, if any.
	fn forwarded_headers(&self) -> Option<&HeaderMap> {
		self.meta().get::<ForwardedHeaders>().map(|ForwardedHeaders(headers)| headers)
	}

	/// Attach headers to forward.
	fn set_forwarded_headers(&mut self, headers: HeaderMap) {
		self.meta_mut().insert(ForwardedHeaders(headers));
	}
}
impl<B> RequestMeta for http::Request<B> {
	fn meta(&self) -> &Extensions {
		self.extensions()
	}

	fn meta_mut(&mut self) -> &mut Extensions {
		self.extensions_mut()
	}
}
impl RequestMeta for Parts {
	fn meta(&self) -> &Extensions {
		&self.extensions
	}

	fn meta_mut(&mut self) -> &mut Extensions {
		&mut self.extensions
	}
}

pub(crate) fn stamp_retry_attempt(parts: &mut Parts, attempt: u32) {
	if attempt > 0 {
		parts.extensions.insert(RetryAttempt(attempt));
	}
}
