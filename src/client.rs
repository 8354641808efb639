//! Clients assembled from the default decorator chain.

pub mod hooks;
pub mod retry;

// std
use std::sync::OnceLock;
// crates.io
use async_trait::async_trait;
use http::Method;
use tokio::time;
// self
use crate::{
	_prelude::*,
	Body,
	client::retry::{BackoffFn, CheckRetryFn, RetryableClient},
	config::{ClientConfig, DEFAULT_CACHE_SIZE_MIB, DEFAULT_TIMEOUT, TransportConfig},
	context::RequestMeta,
	memory_cache::MemoryCache,
	transport::{
		Transport,
		breaker::{self, CircuitBreaker},
		cache::{Cache, cache_decorator},
		decorator::Chain,
		hook::{RequestHook, ResponseHook, hook_decorator},
		pooled::PooledTransport,
		redirect::redirect_decorator,
		span::span_decorator,
		target::target_decorator,
		trace::{extended_trace_decorator, trace_decorator},
		user_agent::user_agent_decorator,
	},
};

/// Name of the pool shared by clients built without an explicit transport.
pub const DEFAULT_POOL_NAME: &str = "roundtrip-default";

static DEFAULT_TRANSPORT: OnceLock<PooledTransport> = OnceLock::new();
static DEFAULT_CACHE: OnceLock<Arc<MemoryCache>> = OnceLock::new();

/// Pooled transport shared by every client built without an explicit one.
pub fn default_transport() -> PooledTransport {
	DEFAULT_TRANSPORT
		.get_or_init(|| PooledTransport::new(DEFAULT_POOL_NAME, &TransportConfig::default()))
		.clone()
}

/// Process-wide response cache used by [`ClientBuilder::enable_cache`].
pub fn default_cache() -> Arc<MemoryCache> {
	DEFAULT_CACHE.get_or_init(|| Arc::new(MemoryCache::new(DEFAULT_CACHE_SIZE_MIB))).clone()
}

/// Anything able to execute a request.
#[async_trait]
pub trait Requester: Send + Sync {
	/// Execute `request` and return its response.
	async fn execute(&self, request: Request) -> Result<Response>;
}

/// Build a request from a URL string, rejecting malformed URLs before any I/O.
pub fn new_request(method: Method, url: &str, body: impl Into<Body>) -> Result<Request> {
	let url = url::Url::parse(url)?;

	Ok(http::Request::builder().method(method).uri(url.as_str()).body(body.into())?)
}

/// Single-attempt client over a decorated transport.
///
/// The timeout covers one attempt up to the response head. A canceled or expired request
/// [`Context`](crate::Context) aborts the call, and the client refuses to start once it is done.
#[derive(Clone)]
pub struct Client {
	transport: Transport,
	timeout: Option<Duration>,
	layers: Arc<[String]>,
}
impl Client {
	/// Client sending through `transport` without timeout.
	pub fn new(transport: Transport) -> Self {
		Self { transport, timeout: None, layers: Arc::from([]) }
	}

	/// Builder starting from the defaults.
	pub fn builder() -> ClientBuilder {
		ClientBuilder::default()
	}

	/// Bound every attempt by `timeout`; zero disables it.
	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.timeout = (!timeout.is_zero()).then_some(timeout);

		self
	}

	/// Per-attempt timeout.
	pub fn timeout(&self) -> Option<Duration> {
		self.timeout
	}

	/// Decorated transport.
	pub fn transport(&self) -> &Transport {
		&self.transport
	}

	/// Decorator names, outermost first.
	pub fn layers(&self) -> &[String] {
		&self.layers
	}
}
#[async_trait]
impl Requester for Client {
	async fn execute(&self, request: Request) -> Result<Response> {
		let ctx = request.context();

		if let Some(err) = ctx.err() {
			return Err(err);
		}

		let call = self.transport.round_trip(request);
		let bounded = async {
			match self.timeout {
				Some(timeout) => match time::timeout(timeout, call).await {
					Ok(outcome) => outcome,
					Err(_) => Err(Error::Timeout(timeout)),
				},
				None => call.await,
			}
		};

		tokio::select! {
			biased;
			_ = ctx.done() => Err(ctx.done_err()),
			outcome = bounded => outcome,
		}
	}
}

/// Options of [`Client`] and [`RetryableClient`].
pub struct ClientBuilder {
	transport: Option<Transport>,
	timeout: Duration,
	request_hooks: Vec<RequestHook>,
	response_hooks: Vec<ResponseHook>,
	cache: Option<Arc<dyn Cache>>,
	breaker: Option<Arc<dyn CircuitBreaker>>,
	extended_trace: bool,
	follow_redirects: bool,
	target_id: Option<String>,
	backoff: BackoffFn,
	check_retry: CheckRetryFn,
}
impl ClientBuilder {
	/// Builder from declarative settings, with its own pool and cache.
	pub fn from_config(config: &ClientConfig) -> Result<Self> {
		config.validate()?;

		let pool = PooledTransport::new("roundtrip", &config.transport);
		let mut builder = Self::default()
			.transport(Arc::new(pool))
			.timeout(config.timeout)
			.extended_trace(config.extended_trace)
			.follow_redirects(config.follow_redirects)
			.backoff(config.backoff.build());

		if config.enable_cache {
			builder = builder.cache(Arc::new(MemoryCache::new(config.cache_size_mib)));
		}
		if let Some(target_id) = &config.target_id {
			builder = builder.target_id(target_id.as_str());
		}

		Ok(builder)
	}

	/// Base transport; the shared default pool otherwise.
	pub fn transport(mut self, transport: Transport) -> Self {
		self.transport = Some(transport);

		self
	}

	/// Per-attempt timeout; zero disables it.
	pub fn timeout(mut self, timeout: Duration) -> Self {
		self.timeout = timeout;

		self
	}

	/// Disable the per-attempt timeout.
	pub fn disable_timeout(self) -> Self {
		self.timeout(Duration::ZERO)
	}

	/// Append a request hook, run after the built-in ones.
	pub fn request_hook(mut self, hook: RequestHook) -> Self {
		self.request_hooks.push(hook);

		self
	}

	/// Append a response hook, run after the built-in ones.
	pub fn response_hook(mut self, hook: ResponseHook) -> Self {
		self.response_hooks.push(hook);

		self
	}

	/// Serve cacheable responses from `cache`.
	pub fn cache(mut self, cache: Arc<dyn Cache>) -> Self {
		self.cache = Some(cache);

		self
	}

	/// Enable caching with the process-wide [`default_cache`] unless a cache is already set.
	pub fn enable_cache(mut self) -> Self {
		if self.cache.is_none() {
			self.cache = Some(default_cache());
		}

		self
	}

	/// Guard requests with `breaker`, bucketed by target id or endpoint template.
	pub fn circuit_breaker(mut self, breaker: Arc<dyn CircuitBreaker>) -> Self {
		self.breaker = Some(breaker);

		self
	}

	/// Record connection-phase and body-read timings.
	pub fn extended_trace(mut self, enabled: bool) -> Self {
		self.extended_trace = enabled;

		self
	}

	/// Follow `3xx` redirects, up to ten hops; redirect responses are returned as is otherwise.
	pub fn follow_redirects(mut self, follow: bool) -> Self {
		self.follow_redirects = follow;

		self
	}

	/// Target id for requests that carry none.
	pub fn target_id(mut self, target_id: impl Into<String>) -> Self {
		self.target_id = Some(target_id.into());

		self
	}

	/// Backoff of retryable clients.
	pub fn backoff(mut self, backoff: BackoffFn) -> Self {
		self.backoff = backoff;

		self
	}

	/// Retry policy of retryable clients.
	pub fn retry_policy(mut self, check_retry: CheckRetryFn) -> Self {
		self.check_retry = check_retry;

		self
	}

	/// Build a single-attempt client forwarding tracing headers.
	pub fn build(self) -> Client {
		self.assemble(vec![hooks::forward_tracing_headers_hook()], Vec::new())
	}

	/// Build a client retrying up to `retry_max` times, which also stamps `x-retry` on
	/// retries and counts their outcomes.
	pub fn build_retryable(self, retry_max: u32) -> RetryableClient {
		let backoff = self.backoff.clone();
		let check_retry = self.check_retry.clone();
		let client = self.assemble(
			vec![hooks::forward_tracing_headers_hook(), hooks::retry_header_hook()],
			vec![hooks::retry_metric_hook()],
		);

		RetryableClient::new(client, retry_max).with_backoff(backoff).with_check_retry(check_retry)
	}

	fn assemble(
		mut self,
		mut request_hooks: Vec<RequestHook>,
		mut response_hooks: Vec<ResponseHook>,
	) -> Client {
		request_hooks.append(&mut self.request_hooks);
		response_hooks.append(&mut self.response_hooks);

		// Order matters: a cache hit never reaches the layers below the cache, so the breaker never
		// counts it. Every redirect hop runs the full chain.
		let mut chain = Chain::new();

		if self.follow_redirects {
			chain.push(redirect_decorator());
		}
		if let Some(target_id) = &self.target_id {
			chain.push(target_decorator(target_id));
		}

		chain.push(user_agent_decorator());

		if let Some(cache) = &self.cache {
			chain.push(cache_decorator(cache.clone()));
		}

		chain.push(hook_decorator(request_hooks, response_hooks));
		chain.push(if self.extended_trace { extended_trace_decorator() } else { trace_decorator() });

		if let Some(circuit) = &self.breaker {
			chain.push(breaker::circuit_breaker_decorator(
				circuit.clone(),
				breaker::default_check(),
				breaker::default_bucket(),
			));
		}

		// The span stays innermost so it wraps the base transport alone.
		chain.push(span_decorator());

		let base = self.transport.unwrap_or_else(|| Arc::new(default_transport()));
		let layers = chain.names().into_iter().map(str::to_owned).collect();

		Client { transport: chain.apply(base), timeout: None, layers }.with_timeout(self.timeout)
	}
}
impl Default for ClientBuilder {
	fn default() -> Self {
		Self {
			transport: None,
			timeout: DEFAULT_TIMEOUT,
			request_hooks: Vec::new(),
			response_hooks: Vec::new(),
			cache: None,
			breaker: None,
			extended_trace: false,
			follow_redirects: false,
			target_id: None,
			backoff: retry::constant_backoff(Duration::ZERO),
			check_retry: retry::server_errors_retry_policy(),
		}
	}
}
