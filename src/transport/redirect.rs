//! Redirect following.
//!
//! Each hop runs through the whole inner chain. `303` (and `301`/`302` after a `POST`) switch
//! to a bodyless `GET`; `307` and `308` resend method and body, which requires a replayable
//! body. Credentials are dropped once a hop leaves the original host.

// crates.io
use async_trait::async_trait;
use http::{
	HeaderMap, Method, StatusCode, Uri,
	header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, COOKIE, LOCATION, PROXY_AUTHORIZATION},
};
// self
use crate::{
	_prelude::*,
	Body,
	body::RESPONSE_DRAIN_LIMIT,
	transport::{RoundTrip, Transport, decorator::Decorator},
};

/// Redirects followed before giving up with [`Error::TooManyRedirects`].
pub const MAX_REDIRECTS: usize = 10;

/// Decorator following up to [`MAX_REDIRECTS`] redirects.
pub fn redirect_decorator() -> Decorator {
	Decorator::new("redirect", |inner| {
		Arc::new(RedirectTransport { inner, max_redirects: MAX_REDIRECTS }) as Transport
	})
}

/// Transport resending requests to the `Location` of redirect responses.
pub struct RedirectTransport {
	inner: Transport,
	max_redirects: usize,
}
#[async_trait]
impl RoundTrip for RedirectTransport {
	async fn round_trip(&self, request: Request) -> Result<Response> {
		let (mut parts, body) = request.into_parts();
		let origin = parts.uri.host().map(str::to_owned);
		let mut body = Some(body);
		let mut hops = 0;

		loop {
			let sent = match &body {
				Some(template) if template.is_replayable() => template.rewind()?,
				_ => body.take().unwrap_or_default(),
			};
			let response = self.inner.round_trip(Request::from_parts(parts.clone(), sent)).await?;
			let Some(location) = location(&response) else {
				return Ok(response);
			};
			let status = response.status();
			let keeps_body =
				matches!(status, StatusCode::TEMPORARY_REDIRECT | StatusCode::PERMANENT_REDIRECT);

			if keeps_body && body.as_ref().is_none_or(|body| !body.is_replayable()) {
				tracing::debug!(%status, uri = %parts.uri, "redirect needs a replayable body");

				return Ok(response);
			}
			if hops == self.max_redirects {
				return Err(Error::TooManyRedirects(self.max_redirects));
			}

			let next = resolve(&parts.uri, &location)?;

			tracing::debug!(%status, from = %parts.uri, to = %next, "following redirect");

			response.into_body().drain(RESPONSE_DRAIN_LIMIT).await;

			if !keeps_body {
				if switches_to_get(status, &parts.method) {
					parts.method = Method::GET;
				}

				body = Some(Body::empty());
				parts.headers.remove(CONTENT_LENGTH);
				parts.headers.remove(CONTENT_TYPE);
			}
			if next.host() != origin.as_deref() {
				strip_credentials(&mut parts.headers);
			}

			parts.uri = next;
			hops += 1;
		}
	}
}

fn location(response: &Response) -> Option<String> {
	if !matches!(
		response.status(),
		StatusCode::MOVED_PERMANENTLY
			| StatusCode::FOUND
			| StatusCode::SEE_OTHER
			| StatusCode::TEMPORARY_REDIRECT
			| StatusCode::PERMANENT_REDIRECT
	) {
		return None;
	}

	response.headers().get(LOCATION)?.to_str().ok().map(str::to_owned)
}

fn switches_to_get(status: StatusCode, method: &Method) -> bool {
	match status {
		StatusCode::SEE_OTHER => method != Method::HEAD,
		_ => method == Method::POST,
	}
}

fn resolve(base: &Uri, location: &str) -> Result<Uri> {
	let next = url::Url::parse(&base.to_string())?.join(location)?;

	Ok(next.as_str().parse()?)
}

fn strip_credentials(headers: &mut HeaderMap) {
	for name in [AUTHORIZATION, PROXY_AUTHORIZATION, COOKIE] {
		headers.remove(name);
	}
}
