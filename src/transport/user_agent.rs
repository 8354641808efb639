//! Default `User-Agent` stamping.

// crates.io
use async_trait::async_trait;
use http::{HeaderValue, header::USER_AGENT};
// self
use crate::{
	_prelude::*,
	transport::{RoundTrip, Transport, decorator::Decorator},
};

/// User agent sent when the caller provides none.
pub const DEFAULT_USER_AGENT: &str = concat!("roundtrip-rust/", env!("CARGO_PKG_VERSION"));

/// Decorator setting [`DEFAULT_USER_AGENT`] on requests without a `User-Agent`.
pub fn user_agent_decorator() -> Decorator {
	Decorator::new("user_agent", |inner| Arc::new(UserAgentTransport { inner }) as Transport)
}

/// Transport filling in a missing `User-Agent` header.
pub struct UserAgentTransport {
	inner: Transport,
}
#[async_trait]
impl RoundTrip for UserAgentTransport {
	async fn round_trip(&self, mut request: Request) -> Result<Response> {
		if request.headers().get(USER_AGENT).is_none_or(|value| value.is_empty()) {
			request.headers_mut().insert(USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));
		}

		self.inner.round_trip(request).await
	}
}
