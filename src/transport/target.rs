//! Default target id stamping.

// crates.io
use async_trait::async_trait;
// self
use crate::{
	_prelude::*,
	context::{RequestMeta, TargetId},
	transport::{RoundTrip, Transport, decorator::Decorator},
};

/// Decorator tagging requests that carry no target id with `target_id`.
pub fn target_decorator(target_id: &str) -> Decorator {
	let target_id: Arc<str> = Arc::from(target_id);

	Decorator::new("target", move |inner| {
		Arc::new(TargetTransport { inner, target_id: target_id.clone() }) as Transport
	})
}

/// Transport applying a default target id.
pub struct TargetTransport {
	inner: Transport,
	target_id: Arc<str>,
}
#[async_trait]
impl RoundTrip for TargetTransport {
	async fn round_trip(&self, mut request: Request) -> Result<Response> {
		if request.target_id().is_none_or(str::is_empty) {
			request.meta_mut().insert(TargetId(self.target_id.clone()));
		}

		self.inner.round_trip(request).await
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use http::StatusCode;
	// self
	use super::*;
	use crate::test_support::MockTransport;

	#[tokio::test]
	async fn request_target_wins_over_default() {
		let mock = MockTransport::with_status(StatusCode::OK);
		let transport = target_decorator("default-api").decorate(mock.transport());
		let mut tagged = Request::default();

		tagged.set_target_id("users-api");

		transport.round_trip(Request::default()).await.expect("untagged");
		transport.round_trip(tagged).await.expect("tagged");

		let requests = mock.requests();

		assert_eq!(requests[0].target_id.as_deref(), Some("default-api"));
		assert_eq!(requests[1].target_id.as_deref(), Some("users-api"));
	}
}
