//! Retry engine, retry policies and backoff functions.

// std
use std::cell::RefCell;
// crates.io
use async_trait::async_trait;
use http::{StatusCode, header::RETRY_AFTER};
use rand::{Rng, SeedableRng, rngs::SmallRng};
use tokio::time;
// self
use crate::{
	_prelude::*,
	Body,
	body::RESPONSE_DRAIN_LIMIT,
	client::{Client, Requester},
	context::{Context, RequestMeta, stamp_retry_attempt},
};

thread_local! {
	static SMALL_RNG: RefCell<SmallRng> = RefCell::new(SmallRng::from_rng(&mut rand::rng()));
}

/// Verdict of a retry policy on one attempt.
#[derive(Debug)]
pub enum RetryDecision {
	/// Send the request again, if retries are left.
	Retry,
	/// Hand the outcome to the caller as is.
	Done,
	/// Stop and fail with this error instead of the outcome.
	Abort(Error),
}

/// Retry policy invoked after every attempt with the request context and its outcome.
pub type CheckRetryFn =
	Arc<dyn Fn(&Context, Result<&Response, &Error>) -> RetryDecision + Send + Sync>;

/// Wait before retry `attempt`, where zero is the wait after the first attempt.
pub type BackoffFn = Arc<dyn Fn(u32) -> Duration + Send + Sync>;

/// Retry transport errors and 5xx responses except 501.
///
/// A canceled or expired context aborts with the context error, whatever the outcome.
pub fn server_errors_retry_policy() -> CheckRetryFn {
	Arc::new(|ctx, outcome| {
		if let Some(err) = ctx.err() {
			return RetryDecision::Abort(err);
		}

		match outcome {
			Err(_) => RetryDecision::Retry,
			Ok(response) if is_retryable_status(response.status()) => RetryDecision::Retry,
			Ok(_) => RetryDecision::Done,
		}
	})
}

/// Never retry.
pub fn no_retry_policy() -> CheckRetryFn {
	Arc::new(|_, _| RetryDecision::Done)
}

fn is_retryable_status(status: StatusCode) -> bool {
	status.as_u16() >= 500 && status != StatusCode::NOT_IMPLEMENTED
}

/// Same wait before every retry.
pub fn constant_backoff(wait: Duration) -> BackoffFn {
	Arc::new(move |_| wait)
}

/// `min * 2^attempt`, clamped to `max` including on overflow.
pub fn exponential_backoff(min: Duration, max: Duration) -> BackoffFn {
	Arc::new(move |attempt| {
		2_u32
			.checked_pow(attempt)
			.and_then(|factor| min.checked_mul(factor))
			.map_or(max, |wait| wait.min(max))
	})
}

/// Random wait in `[min, max)` multiplied by `attempt + 1`.
///
/// With `max <= min` the wait is `min * (attempt + 1)`.
pub fn linear_jitter_backoff(min: Duration, max: Duration) -> BackoffFn {
	Arc::new(move |attempt| {
		let base = if max <= min { min } else { random_within(min, max) };

		base.checked_mul(attempt.saturating_add(1)).unwrap_or(Duration::MAX)
	})
}

fn random_within(min: Duration, max: Duration) -> Duration {
	SMALL_RNG.with(|cell| {
		let mut rng = cell.borrow_mut();
		let span = (max - min).as_nanos().min(u64::MAX as u128) as u64;

		min + Duration::from_nanos(rng.random_range(0..span))
	})
}

/// Server-requested wait of a 429 or 503 response, from an HTTP date or delta seconds.
fn retry_after(response: &Response) -> Option<Duration> {
	if !matches!(response.status(), StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE)
	{
		return None;
	}

	let value = response.headers().get(RETRY_AFTER)?.to_str().ok()?.trim();

	if let Ok(when) = httpdate::parse_http_date(value) {
		let delta = DateTime::<Utc>::from(when) - Utc::now();

		return Some(delta.to_std().unwrap_or(Duration::ZERO));
	}

	value.parse::<u64>().ok().map(Duration::from_secs)
}

/// Client resending failed requests according to a retry policy and a backoff function.
///
/// Request bodies are rewound before every attempt. A body built with
/// [`Body::wrap_stream`] can only be sent once; retrying it fails with
/// [`Error::BodyNotRewindable`] before any further network call.
#[derive(Clone)]
pub struct RetryableClient {
	client: Client,
	retry_max: u32,
	check_retry: CheckRetryFn,
	backoff: BackoffFn,
}
impl RetryableClient {
	/// Retry up to `retry_max` times over `client`, on server errors and without waiting.
	pub fn new(client: Client, retry_max: u32) -> Self {
		Self {
			client,
			retry_max,
			check_retry: server_errors_retry_policy(),
			backoff: constant_backoff(Duration::ZERO),
		}
	}

	/// Replace the retry policy.
	pub fn with_check_retry(mut self, check_retry: CheckRetryFn) -> Self {
		self.check_retry = check_retry;

		self
	}

	/// Replace the backoff function.
	pub fn with_backoff(mut self, backoff: BackoffFn) -> Self {
		self.backoff = backoff;

		self
	}

	/// Client executing each attempt.
	pub fn client(&self) -> &Client {
		&self.client
	}

	/// Maximum number of retries after the first attempt.
	pub fn retry_max(&self) -> u32 {
		self.retry_max
	}

	fn backoff_duration(&self, attempt: u32, outcome: &Result<Response>) -> Duration {
		outcome.as_ref().ok().and_then(retry_after).unwrap_or_else(|| (self.backoff)(attempt))
	}
}
#[async_trait]
impl Requester for RetryableClient {
	async fn execute(&self, request: Request) -> Result<Response> {
		let (parts, body) = request.into_parts();
		let ctx = parts.context();
		let mut payload = Payload::new(body);
		let mut attempt = 0;

		loop {
			let mut attempt_parts = parts.clone();

			stamp_retry_attempt(&mut attempt_parts, attempt);

			let body = payload.for_attempt()?;
			let outcome = self.client.execute(Request::from_parts(attempt_parts, body)).await;

			match (self.check_retry)(&ctx, outcome.as_ref()) {
				RetryDecision::Done => return outcome,
				RetryDecision::Abort(err) => return Err(err),
				RetryDecision::Retry => {},
			}

			if attempt >= self.retry_max {
				tracing::debug!(attempt, retry_max = self.retry_max, "retries exhausted");

				return outcome;
			}

			let wait = self.backoff_duration(attempt, &outcome);

			if ctx.remaining().is_some_and(|remaining| remaining <= wait) {
				tracing::debug!(attempt, ?wait, "backoff would outlive the request deadline");

				return outcome;
			}
			if let Ok(response) = outcome {
				response.into_body().drain(RESPONSE_DRAIN_LIMIT).await;
			}

			tracing::debug!(attempt = attempt + 1, ?wait, "retrying request");

			tokio::select! {
				biased;
				_ = ctx.done() => return Err(ctx.done_err()),
				_ = time::sleep(wait) => {},
			}

			attempt += 1;
		}
	}
}

/// Request payload of a retried request.
enum Payload {
	Replayable(Body),
	SingleUse(Option<Body>),
}
impl Payload {
	fn new(body: Body) -> Self {
		if body.is_replayable() { Self::Replayable(body) } else { Self::SingleUse(Some(body)) }
	}

	fn for_attempt(&mut self) -> Result<Body> {
		match self {
			Self::Replayable(body) => body.rewind(),
			Self::SingleUse(body) => body.take().ok_or(Error::BodyNotRewindable),
		}
	}
}
