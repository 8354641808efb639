//! Transport abstraction and the decorators composing the client pipeline.

pub mod breaker;
pub mod cache;
pub mod decorator;
pub mod hook;
pub mod pooled;
pub mod redirect;
pub mod reqwest_transport;
pub mod span;
pub mod target;
pub mod trace;
pub mod user_agent;

// std
use std::future::Future;
// crates.io
use async_trait::async_trait;
// self
use crate::_prelude::*;

/// Executes a single HTTP exchange.
///
/// Implementations must tolerate unlimited concurrent invocations.
#[async_trait]
pub trait RoundTrip: Send + Sync {
	/// Send the request and resolve with the response head; the body streams afterwards.
	async fn round_trip(&self, request: Request) -> Result<Response>;
}

/// Shared transport handle, the unit decorators wrap.
pub type Transport = Arc<dyn RoundTrip>;

/// Build a transport from an async closure.
pub fn from_fn<F, Fut>(f: F) -> Transport
where
	F: Fn(Request) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = Result<Response>> + Send + 'static,
{
	Arc::new(FnTransport(f))
}

struct FnTransport<F>(F);
#[async_trait]
impl<F, Fut> RoundTrip for FnTransport<F>
where
	F: Fn(Request) -> Fut + Send + Sync,
	Fut: Future<Output = Result<Response>> + Send,
{
	async fn round_trip(&self, request: Request) -> Result<Response> {
		(self.0)(request).await
	}
}
