//! HTTP response caching over a pluggable key-value store.
//!
//! Freshness and revalidation follow RFC 9111 as implemented by `http-cache-semantics`, with
//! the cache acting as a private (per-client) cache. Only `GET` and `HEAD` requests without a
//! `Range` header are served from the store. Responses served without a network call carry
//! `x-from-cache: 1`.

// crates.io
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use bytes::Bytes;
use http::{
	HeaderMap, HeaderName, HeaderValue, Method, StatusCode,
	header::RANGE,
	request::Parts as RequestParts,
	response::Parts as ResponseParts,
};
use http_cache_semantics::{AfterResponse, BeforeRequest, CacheOptions, CachePolicy};
use serde::{Deserialize, Serialize};
// self
use crate::{
	_prelude::*,
	Body, ResponseBody,
	body::RESPONSE_DRAIN_LIMIT,
	metrics as telemetry,
	transport::{RoundTrip, Transport, decorator::Decorator},
};

/// Header marking responses served from the cache.
pub const FROM_CACHE_HEADER: &str = "x-from-cache";

/// Key-value store for serialized responses. Last write wins per key.
pub trait Cache: Send + Sync {
	/// Stored bytes for `key`, if any.
	fn get(&self, key: &str) -> Option<Bytes>;

	/// Store `value` under `key`.
	fn set(&self, key: &str, value: Bytes);

	/// Remove `key`.
	fn delete(&self, key: &str);
}

/// Decorator serving cacheable requests from `cache`.
pub fn cache_decorator(cache: Arc<dyn Cache>) -> Decorator {
	Decorator::new("cache", move |inner| {
		Arc::new(CacheTransport { inner, cache: cache.clone() }) as Transport
	})
}

/// Transport answering from a response cache before delegating to `inner`.
pub struct CacheTransport {
	inner: Transport,
	cache: Arc<dyn Cache>,
}
impl CacheTransport {
	async fn revalidate(
		&self,
		key: String,
		parts: RequestParts,
		body: Body,
		entry: CachedEntry,
		conditional: HeaderMap,
	) -> Result<Response> {
		let mut revalidation = parts.clone();

		revalidation.headers = conditional;

		let response = self.inner.round_trip(Request::from_parts(revalidation, body)).await?;
		let (response_parts, response_body) = response.into_parts();

		match entry.policy.after_response(&parts, &response_parts, SystemTime::now()) {
			AfterResponse::NotModified(policy, merged)
				if response_parts.status == StatusCode::NOT_MODIFIED =>
			{
				response_body.drain(RESPONSE_DRAIN_LIMIT).await;
				telemetry::record_cache_result("revalidated");
				tracing::debug!(%key, "cache entry revalidated");

				if policy.is_storable() {
					self.store(&key, &parts, &merged, &entry.body);
				}

				Ok(cached_response(merged, entry.body))
			},
			_ => self.store_response(key, &parts, response_parts, response_body).await,
		}
	}

	async fn store_response(
		&self,
		key: String,
		parts: &RequestParts,
		response_parts: ResponseParts,
		response_body: ResponseBody,
	) -> Result<Response> {
		let policy = policy(parts, &response_parts, SystemTime::now());

		if !policy.is_storable() {
			self.cache.delete(&key);

			return Ok(Response::from_parts(response_parts, response_body));
		}

		let bytes = response_body.bytes().await?;

		self.store(&key, parts, &response_parts, &bytes);

		Ok(Response::from_parts(response_parts, ResponseBody::full(bytes)))
	}

	fn store(&self, key: &str, parts: &RequestParts, response_parts: &ResponseParts, body: &Bytes) {
		match CacheEntry::new(parts, response_parts, body).encode() {
			Ok(encoded) => {
				self.cache.set(key, encoded);

				tracing::debug!(%key, status = %response_parts.status, "response cached");
			},
			Err(err) => tracing::debug!(%key, error = %err, "failed to encode cache entry"),
		}
	}

	fn lookup(&self, key: &str) -> Option<CachedEntry> {
		let bytes = self.cache.get(key)?;

		match CacheEntry::decode(&bytes).and_then(CacheEntry::into_cached) {
			Ok(entry) => Some(entry),
			Err(err) => {
				tracing::debug!(%key, error = %err, "discarding unreadable cache entry");

				self.cache.delete(key);

				None
			},
		}
	}
}
#[async_trait]
impl RoundTrip for CacheTransport {
	async fn round_trip(&self, request: Request) -> Result<Response> {
		let (parts, body) = request.into_parts();
		let key = cache_key(&parts.method, &parts.uri.to_string());

		if !is_cacheable(&parts) {
			let uri = parts.uri.to_string();
			let invalidates = !is_safe(&parts.method);
			let response = self.inner.round_trip(Request::from_parts(parts, body)).await?;

			if invalidates && (response.status().is_success() || response.status().is_redirection())
			{
				self.cache.delete(&cache_key(&Method::GET, &uri));
			}

			return Ok(response);
		}

		if let Some(entry) = self.lookup(&key) {
			match entry.policy.before_request(&parts, SystemTime::now()) {
				BeforeRequest::Fresh(response_parts) => {
					telemetry::record_cache_result("hit");
					tracing::debug!(%key, "serving fresh response from cache");

					return Ok(cached_response(response_parts, entry.body));
				},
				BeforeRequest::Stale { request: conditional, matches: true } =>
					return self.revalidate(key, parts, body, entry, conditional.headers).await,
				BeforeRequest::Stale { .. } => {},
			}
		}

		telemetry::record_cache_result("miss");

		let response = self.inner.round_trip(Request::from_parts(parts.clone(), body)).await?;
		let (response_parts, response_body) = response.into_parts();

		self.store_response(key, &parts, response_parts, response_body).await
	}
}

fn cache_key(method: &Method, uri: &str) -> String {
	if method == Method::GET { uri.to_owned() } else { format!("{method} {uri}") }
}

fn is_cacheable(parts: &RequestParts) -> bool {
	(parts.method == Method::GET || parts.method == Method::HEAD)
		&& !parts.headers.contains_key(RANGE)
}

fn is_safe(method: &Method) -> bool {
	matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE)
}

fn policy(request: &RequestParts, response: &ResponseParts, response_time: SystemTime) -> CachePolicy {
	let options = CacheOptions { shared: false, ..Default::default() };

	CachePolicy::new_options(request, response, response_time, options)
}

fn cached_response(parts: ResponseParts, body: Bytes) -> Response {
	let mut response = Response::from_parts(parts, ResponseBody::full(body));

	response.headers_mut().insert(FROM_CACHE_HEADER, HeaderValue::from_static("1"));

	response
}

struct CachedEntry {
	policy: CachePolicy,
	body: Bytes,
}

/// Serialized form of a cached exchange.
#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
	method: String,
	uri: String,
	request_headers: Vec<(String, String)>,
	status: u16,
	response_headers: Vec<(String, String)>,
	body: String,
	stored_at: DateTime<Utc>,
}
impl CacheEntry {
	fn new(request: &RequestParts, response: &ResponseParts, body: &Bytes) -> Self {
		Self {
			method: request.method.to_string(),
			uri: request.uri.to_string(),
			request_headers: encode_headers(&request.headers),
			status: response.status.as_u16(),
			response_headers: encode_headers(&response.headers),
			body: STANDARD.encode(body),
			stored_at: Utc::now(),
		}
	}

	fn encode(&self) -> Result<Bytes> {
		Ok(Bytes::from(serde_json::to_vec(self)?))
	}

	fn decode(bytes: &[u8]) -> Result<Self> {
		Ok(serde_json::from_slice(bytes)?)
	}

	fn into_cached(self) -> Result<CachedEntry> {
		let mut request = http::Request::builder()
			.method(self.method.as_str())
			.uri(self.uri.as_str())
			.body(())?
			.into_parts()
			.0;
		let mut response = http::Response::builder().status(self.status).body(())?.into_parts().0;

		request.headers = decode_headers(&self.request_headers)?;
		response.headers = decode_headers(&self.response_headers)?;

		let body = STANDARD
			.decode(self.body.as_bytes())
			.map_err(|err| Error::Cache(format!("Invalid cached body encoding: {err}")))?;

		Ok(CachedEntry {
			policy: policy(&request, &response, SystemTime::from(self.stored_at)),
			body: Bytes::from(body),
		})
	}
}

fn encode_headers(headers: &HeaderMap) -> Vec<(String, String)> {
	headers
		.iter()
		.map(|(name, value)| {
			(name.as_str().to_owned(), String::from_utf8_lossy(value.as_bytes()).into_owned())
		})
		.collect()
}

fn decode_headers(headers: &[(String, String)]) -> Result<HeaderMap> {
	let mut decoded = HeaderMap::with_capacity(headers.len());

	for (name, value) in headers {
		decoded.append(
			HeaderName::from_bytes(name.as_bytes()).map_err(http::Error::from)?,
			HeaderValue::from_str(value)?,
		);
	}

	Ok(decoded)
}
