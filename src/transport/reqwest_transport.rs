//! `reqwest` client exposed as a base transport.

// crates.io
use async_trait::async_trait;
// self
use crate::{_prelude::*, ResponseBody, transport::RoundTrip};

/// Base transport delegating to a `reqwest::Client`, for endpoints needing proxies or custom
/// TLS settings. It reports no connection counters or phase timings, and redirects follow the
/// wrapped client's own policy.
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransport {
	client: reqwest::Client,
}
impl ReqwestTransport {
	/// Wrap an existing client.
	pub fn new(client: reqwest::Client) -> Self {
		Self { client }
	}
}
#[async_trait]
impl RoundTrip for ReqwestTransport {
	async fn round_trip(&self, request: Request) -> Result<Response> {
		let request = request.map(|body| match body.try_into_bytes() {
			Ok(bytes) => reqwest::Body::from(bytes),
			Err(stream) => reqwest::Body::wrap(stream),
		});
		let response = self.client.execute(reqwest::Request::try_from(request)?).await?;

		Ok(http::Response::from(response).map(ResponseBody::new))
	}
}
