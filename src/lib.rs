//! Composable async HTTP client transport pipeline: decorators for hooks, caching, circuit
//! breaking, and tracing over an instrumented connection pool, driven by a retry engine with
//! pluggable policies and backoff.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod body;
pub mod client;
pub mod config;
pub mod context;
pub mod memory_cache;
pub mod metrics;
pub mod transport;

mod error;
#[cfg(test)] mod test_support;
mod _prelude {
	pub use std::{
		sync::Arc,
		time::{Duration, SystemTime},
	};

	pub use chrono::{DateTime, Utc};
	pub use tokio::time::Instant;

	pub use crate::{Error, Request, Response, Result};
}

#[cfg(feature = "prometheus")] pub use crate::metrics::install_default_exporter;
pub use crate::{
	body::{Body, ResponseBody},
	client::{
		Client, ClientBuilder, Requester,
		retry::{BackoffFn, CheckRetryFn, RetryDecision, RetryableClient},
	},
	config::{BackoffStrategy, ClientConfig, TransportConfig},
	context::{Context, RequestMeta},
	error::{BoxError, Error, Result},
	memory_cache::MemoryCache,
	transport::{
		RoundTrip, Transport,
		breaker::CircuitBreaker,
		cache::Cache,
		decorator::{Chain, Decorator},
		pooled::PooledTransport,
	},
};

/// Outgoing request carrying a replayable or streaming body.
pub type Request = http::Request<Body>;

/// Incoming response carrying a streaming body.
pub type Response = http::Response<ResponseBody>;
